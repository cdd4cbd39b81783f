mod backend;
mod compose;
mod navigation;
mod search;
mod sync;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use indexmap::IndexMap;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use crate::core::error::{ChatError, ChatResult};
use crate::core::models::{
    ContactPayload, Conversation, MessagePayload, ThreadId, ThreadTarget, Upload, UserId,
};

pub use backend::{ChatBackend, LocalBackend};
pub use navigation::ScrollState;

const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Client-side timing knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncSettings {
    pub poll_interval: Duration,
    pub search_debounce: Duration,
    /// Distance from the bottom, in pixels, within which new messages are
    /// followed.
    pub scroll_threshold: f32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            poll_interval: Duration::from_secs(10),
            search_debounce: Duration::from_millis(300),
            scroll_threshold: 80.0,
        }
    }
}

/// Background work produced by `update`; each future resolves to the
/// message that reports its outcome.
pub struct Task(Vec<BoxFuture<'static, Message>>);

impl Task {
    pub fn none() -> Self {
        Task(Vec::new())
    }

    pub fn future<F>(f: F) -> Self
    where
        F: Future<Output = Message> + Send + 'static,
    {
        Task(vec![Box::pin(f)])
    }

    pub fn batch(tasks: impl IntoIterator<Item = Task>) -> Self {
        Task(tasks.into_iter().flat_map(|t| t.0).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

type SendReply = oneshot::Sender<ChatResult<MessagePayload>>;

#[derive(Debug)]
pub enum Message {
    // Sync
    Tick,
    Refresh,
    ContactsLoaded {
        generation: u64,
        result: ChatResult<Vec<ContactPayload>>,
    },
    UnreadLoaded {
        generation: u64,
        result: ChatResult<u32>,
    },
    ConversationLoaded {
        generation: u64,
        /// Request number; older than `conversation_applied` means stale.
        seq: u64,
        result: ChatResult<Conversation>,
    },

    // Search
    SearchQueryChanged(String),
    SearchDebounced(u64),

    // Navigation
    OpenContact(UserId),
    OpenThread(ThreadId),
    CloseConversation,
    Scrolled(f32),

    // Compose
    Send {
        text: String,
        upload: Option<Upload>,
        reply: SendReply,
    },
    SendComplete {
        generation: u64,
        result: ChatResult<MessagePayload>,
        reply: SendReply,
    },

    Close,
    Noop,
}

/// The conversation currently on screen.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenConversation {
    /// How it was opened; used until the server reports the thread id.
    pub target: ThreadTarget,
    pub thread_id: ThreadId,
    pub contact: Option<ContactPayload>,
    pub messages: Vec<MessagePayload>,
    pub loading: bool,
}

impl OpenConversation {
    fn new(target: ThreadTarget, contact: Option<ContactPayload>) -> Self {
        let thread_id = match target {
            ThreadTarget::Thread(id) => id,
            ThreadTarget::Contact(_) => 0,
        };
        OpenConversation {
            target,
            thread_id,
            contact,
            messages: Vec::new(),
            loading: true,
        }
    }

    /// Where follow-up requests for this conversation go.
    pub fn current_target(&self) -> ThreadTarget {
        if self.thread_id > 0 {
            ThreadTarget::Thread(self.thread_id)
        } else {
            self.target
        }
    }

    fn contains(&self, id: i64) -> bool {
        self.messages.iter().any(|m| m.id == id)
    }
}

/// Snapshot published to renderers after every update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewState {
    pub contacts: Vec<ContactPayload>,
    pub unread_total: u32,
    pub search_query: String,
    pub conversation: Option<OpenConversation>,
    pub scroll: ScrollState,
    pub send_error: Option<String>,
    pub is_sending: bool,
    pub status_message: String,
    pub closed: bool,
}

/// One open chat surface: the state it renders and the generation counters
/// used to drop responses that were overtaken by newer requests.
pub struct ChatSession {
    pub(super) backend: Arc<dyn ChatBackend>,
    pub(super) settings: SyncSettings,

    pub(super) contacts: IndexMap<UserId, ContactPayload>,
    pub(super) unread_total: u32,
    pub(super) search_query: String,

    pub(super) conversation: Option<OpenConversation>,
    pub(super) scroll: ScrollState,

    pub(super) send_error: Option<String>,
    pub(super) sending: usize,
    pub(super) status_message: String,
    pub(super) closed: bool,

    pub(super) search_generation: u64,
    pub(super) contacts_generation: u64,
    pub(super) unread_generation: u64,
    pub(super) conversation_generation: u64,
    /// Last conversation request issued, and the newest one whose snapshot
    /// may still be applied. Confirmed sends raise the floor.
    pub(super) conversation_seq: u64,
    pub(super) conversation_applied: u64,

    /// Send results held back until the matching state has been published.
    pub(super) replies: Vec<(SendReply, ChatResult<MessagePayload>)>,
}

impl ChatSession {
    pub fn new(backend: Arc<dyn ChatBackend>, settings: SyncSettings) -> Self {
        ChatSession {
            backend,
            settings,
            contacts: IndexMap::new(),
            unread_total: 0,
            search_query: String::new(),
            conversation: None,
            scroll: ScrollState::default(),
            send_error: None,
            sending: 0,
            status_message: String::new(),
            closed: false,
            search_generation: 0,
            contacts_generation: 0,
            unread_generation: 0,
            conversation_generation: 0,
            conversation_seq: 0,
            conversation_applied: 0,
            replies: Vec::new(),
        }
    }

    /// Initial loads: contact list and unread count.
    pub fn init(&mut self) -> Task {
        self.status_message = "Loading contacts...".into();
        Task::batch([self.fetch_contacts(), self.fetch_unread()])
    }

    pub fn update(&mut self, message: Message) -> Task {
        if self.closed {
            log::debug!("Dropping {} after close", message_name(&message));
            return Task::none();
        }
        self.dispatch(message)
    }

    pub(super) fn dispatch(&mut self, message: Message) -> Task {
        match message {
            Message::Tick
            | Message::Refresh
            | Message::ContactsLoaded { .. }
            | Message::UnreadLoaded { .. }
            | Message::ConversationLoaded { .. } => self.handle_sync(message),

            Message::SearchQueryChanged(_) | Message::SearchDebounced(_) => {
                self.handle_search(message)
            }

            Message::OpenContact(_)
            | Message::OpenThread(_)
            | Message::CloseConversation
            | Message::Scrolled(_) => self.handle_navigation(message),

            Message::Send { .. } | Message::SendComplete { .. } => self.handle_compose(message),

            Message::Close => {
                self.closed = true;
                self.conversation_generation += 1;
                self.status_message = "Closed".into();
                Task::none()
            }
            Message::Noop => Task::none(),
        }
    }

    pub fn view(&self) -> ViewState {
        ViewState {
            contacts: self.contacts.values().cloned().collect(),
            unread_total: self.unread_total,
            search_query: self.search_query.clone(),
            conversation: self.conversation.clone(),
            scroll: self.scroll,
            send_error: self.send_error.clone(),
            is_sending: self.sending > 0,
            status_message: self.status_message.clone(),
            closed: self.closed,
        }
    }

    pub(super) fn take_replies(&mut self) -> Vec<(SendReply, ChatResult<MessagePayload>)> {
        std::mem::take(&mut self.replies)
    }
}

fn message_name(message: &Message) -> &'static str {
    match message {
        Message::Tick => "Tick",
        Message::Refresh => "Refresh",
        Message::ContactsLoaded { .. } => "ContactsLoaded",
        Message::UnreadLoaded { .. } => "UnreadLoaded",
        Message::ConversationLoaded { .. } => "ConversationLoaded",
        Message::SearchQueryChanged(_) => "SearchQueryChanged",
        Message::SearchDebounced(_) => "SearchDebounced",
        Message::OpenContact(_) => "OpenContact",
        Message::OpenThread(_) => "OpenThread",
        Message::CloseConversation => "CloseConversation",
        Message::Scrolled(_) => "Scrolled",
        Message::Send { .. } => "Send",
        Message::SendComplete { .. } => "SendComplete",
        Message::Close => "Close",
        Message::Noop => "Noop",
    }
}

/// Start a session on the current tokio runtime.
pub fn start(backend: Arc<dyn ChatBackend>, settings: SyncSettings) -> SessionHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let session = ChatSession::new(backend, settings);
    let (state_tx, state_rx) = watch::channel(session.view());

    tokio::spawn(run_loop(session, rx, state_tx));
    log::info!("Chat session started");

    SessionHandle {
        tx,
        closed: Arc::new(AtomicBool::new(false)),
        state: state_rx,
    }
}

async fn run_loop(
    mut session: ChatSession,
    mut rx: mpsc::UnboundedReceiver<Message>,
    state_tx: watch::Sender<ViewState>,
) {
    let mut tasks: JoinSet<Message> = JoinSet::new();
    let period = if session.settings.poll_interval.is_zero() {
        log::warn!("Poll interval of zero, using {}s", MIN_POLL_INTERVAL.as_secs());
        MIN_POLL_INTERVAL
    } else {
        session.settings.poll_interval
    };
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately; init covers it.
    ticker.tick().await;

    spawn_all(&mut tasks, session.init());
    publish(&mut session, &state_tx);

    loop {
        let message = tokio::select! {
            _ = ticker.tick() => Message::Tick,
            received = rx.recv() => match received {
                Some(Message::Close) | None => break,
                Some(message) => message,
            },
            Some(joined) = tasks.join_next() => match joined {
                Ok(message) => message,
                Err(e) => {
                    log::warn!("Background task failed: {e}");
                    continue;
                }
            },
        };

        let task = session.update(message);
        spawn_all(&mut tasks, task);
        publish(&mut session, &state_tx);
    }

    tasks.abort_all();
    session.update(Message::Close);
    publish(&mut session, &state_tx);
    log::info!("Chat session closed");
}

fn spawn_all(tasks: &mut JoinSet<Message>, task: Task) {
    for future in task.0 {
        tasks.spawn(future);
    }
}

/// Push the snapshot out, then release any send results waiting on it.
fn publish(session: &mut ChatSession, state_tx: &watch::Sender<ViewState>) {
    state_tx.send_replace(session.view());
    for (reply, result) in session.take_replies() {
        let _ = reply.send(result);
    }
}

/// Cheap handle to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<Message>,
    closed: Arc<AtomicBool>,
    state: watch::Receiver<ViewState>,
}

impl SessionHandle {
    pub fn state(&self) -> ViewState {
        self.state.borrow().clone()
    }

    /// Receiver that wakes on every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<ViewState> {
        self.state.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn post(&self, message: Message) {
        if self.is_closed() {
            return;
        }
        if self.tx.send(message).is_err() {
            log::debug!("Session loop is gone, dropping message");
        }
    }

    pub fn set_search(&self, query: impl Into<String>) {
        self.post(Message::SearchQueryChanged(query.into()));
    }

    pub fn open_contact(&self, user_id: UserId) {
        self.post(Message::OpenContact(user_id));
    }

    pub fn open_thread(&self, thread_id: ThreadId) {
        self.post(Message::OpenThread(thread_id));
    }

    pub fn close_conversation(&self) {
        self.post(Message::CloseConversation);
    }

    /// Report the viewer's distance from the bottom of the message list.
    pub fn scrolled(&self, from_bottom: f32) {
        self.post(Message::Scrolled(from_bottom));
    }

    pub fn refresh(&self) {
        self.post(Message::Refresh);
    }

    /// Send into the open conversation and wait for the server's answer.
    pub async fn send(&self, text: impl Into<String>, upload: Option<Upload>) -> ChatResult<MessagePayload> {
        if self.is_closed() {
            return Err(ChatError::InvalidRequest("session is closed".into()));
        }
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Message::Send {
                text: text.into(),
                upload,
                reply,
            })
            .map_err(|_| ChatError::InvalidRequest("session is closed".into()))?;
        rx.await
            .map_err(|_| ChatError::InvalidRequest("session closed before the send finished".into()))?
    }

    /// Stop polling. Returns `false` if the session was already closed.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        let _ = self.tx.send(Message::Close);
        true
    }
}
