use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use deskchat::app::{self, ChatBackend, SessionHandle, SyncSettings, ViewState};
use deskchat::core::models::{
    ContactPayload, Conversation, MessagePayload, ThreadTarget, Upload, UserId,
};
use deskchat::core::{ChatError, ChatResult};

const FINANCE: UserId = 1;

#[derive(Default)]
struct FakeState {
    contact_queries: Vec<String>,
    unread_calls: usize,
    fetches: Vec<ThreadTarget>,
    messages: Vec<MessagePayload>,
    unread: u32,
    fail_send: Option<ChatError>,
    slow_contacts: HashMap<UserId, Duration>,
    /// Delay applied after the messages were read, so the reply is already
    /// out of date when it lands.
    late_delivery: Option<Duration>,
    next_id: i64,
}

#[derive(Default)]
struct FakeBackend {
    state: Mutex<FakeState>,
}

impl FakeBackend {
    fn with<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    fn incoming(&self, text: &str) {
        self.with(|s| {
            s.next_id += 1;
            let id = s.next_id;
            s.messages.push(message(id, false, text));
        });
    }
}

fn message(id: i64, is_own: bool, text: &str) -> MessagePayload {
    MessagePayload {
        id,
        sender_id: if is_own { 2 } else { FINANCE },
        text: text.into(),
        attachment_url: String::new(),
        created_at: "2026-01-05T10:00:00+00:00".into(),
        is_own,
    }
}

fn contact(user_id: UserId) -> ContactPayload {
    ContactPayload {
        user_id,
        name: format!("User {user_id}"),
        email: format!("u{user_id}@example.org"),
        role: "finance".into(),
        thread_id: 100 + user_id,
        unread: 0,
        can_start: true,
        can_message: true,
    }
}

#[async_trait]
impl ChatBackend for FakeBackend {
    async fn list_contacts(&self, search: &str) -> ChatResult<Vec<ContactPayload>> {
        self.with(|s| s.contact_queries.push(search.to_string()));
        Ok(vec![contact(FINANCE)])
    }

    async fn fetch_messages(&self, target: ThreadTarget) -> ChatResult<Conversation> {
        let user_id = match target {
            ThreadTarget::Contact(id) => id,
            ThreadTarget::Thread(id) => id - 100,
        };
        let delay = self.with(|s| {
            s.fetches.push(target);
            s.slow_contacts.get(&user_id).copied()
        });
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let (messages, late) = self.with(|s| (s.messages.clone(), s.late_delivery));
        if let Some(late) = late {
            tokio::time::sleep(late).await;
        }
        Ok(Conversation {
            thread_id: 100 + user_id,
            contact: contact(user_id),
            messages,
        })
    }

    async fn send_message(
        &self,
        _target: ThreadTarget,
        text: String,
        _upload: Option<Upload>,
    ) -> ChatResult<MessagePayload> {
        self.with(|s| {
            if let Some(err) = s.fail_send.clone() {
                return Err(err);
            }
            s.next_id += 1;
            let sent = message(s.next_id, true, &text);
            s.messages.push(sent.clone());
            Ok(sent)
        })
    }

    async fn unread_count(&self) -> ChatResult<u32> {
        self.with(|s| {
            s.unread_calls += 1;
            Ok(s.unread)
        })
    }
}

fn start(backend: &Arc<FakeBackend>) -> SessionHandle {
    app::start(backend.clone(), SyncSettings::default())
}

/// Let every ready task run without moving the paused clock forward much.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

async fn wait_until(handle: &SessionHandle, pred: impl Fn(&ViewState) -> bool) -> ViewState {
    let mut rx = handle.subscribe();
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let state = rx.borrow_and_update().clone();
            if pred(&state) {
                return state;
            }
            if rx.changed().await.is_err() {
                return handle.state();
            }
        }
    })
    .await;
    match waited {
        Ok(state) => state,
        Err(_) => panic!("condition not reached, last state: {:?}", handle.state()),
    }
}

async fn open_finance(handle: &SessionHandle) -> ViewState {
    handle.open_contact(FINANCE);
    wait_until(handle, |s| {
        s.conversation.as_ref().is_some_and(|c| !c.loading)
    })
    .await
}

#[tokio::test(start_paused = true)]
async fn start_loads_contacts_and_unread_count() {
    let backend = Arc::new(FakeBackend::default());
    backend.with(|s| s.unread = 3);
    let handle = start(&backend);

    let state = wait_until(&handle, |s| s.unread_total == 3 && !s.contacts.is_empty()).await;

    assert_eq!(state.contacts[0].user_id, FINANCE);
    assert_eq!(backend.with(|s| s.contact_queries.clone()), vec![String::new()]);
    handle.close();
}

#[tokio::test(start_paused = true)]
async fn each_tick_polls_unread_and_refetches_the_open_conversation() {
    let backend = Arc::new(FakeBackend::default());
    let handle = start(&backend);
    let opened = open_finance(&handle).await;
    settle().await;

    assert_eq!(opened.conversation.unwrap().thread_id, 100 + FINANCE);
    let (unread_before, fetches_before) = backend.with(|s| (s.unread_calls, s.fetches.len()));

    backend.with(|s| s.unread = 1);
    backend.incoming("we received your invoice");
    tokio::time::sleep(Duration::from_millis(10_500)).await;

    let (unread_after, fetches) = backend.with(|s| (s.unread_calls, s.fetches.clone()));
    // The tick polls once; new messages in the refetch poll once more.
    assert!(unread_after >= unread_before + 1);
    assert_eq!(fetches.len(), fetches_before + 1);
    // Once the thread id is known it is used instead of the contact.
    assert_eq!(fetches.last(), Some(&ThreadTarget::Thread(100 + FINANCE)));

    let state = handle.state();
    assert_eq!(state.conversation.unwrap().messages.len(), 1);
    assert_eq!(state.unread_total, 1);
    handle.close();
}

#[tokio::test(start_paused = true)]
async fn reading_history_is_not_interrupted_by_new_messages() {
    let backend = Arc::new(FakeBackend::default());
    let handle = start(&backend);
    open_finance(&handle).await;

    handle.scrolled(500.0);
    backend.incoming("one");
    backend.incoming("two");
    tokio::time::sleep(Duration::from_millis(10_500)).await;

    let state = handle.state();
    assert_eq!(state.scroll.from_bottom, 500.0);
    assert_eq!(state.scroll.unseen, 2);

    handle.scrolled(20.0);
    backend.incoming("three");
    tokio::time::sleep(Duration::from_secs(10)).await;

    let state = handle.state();
    assert_eq!(state.scroll.from_bottom, 0.0);
    assert_eq!(state.scroll.unseen, 0);
    assert_eq!(state.conversation.unwrap().messages.len(), 3);
    handle.close();
}

#[tokio::test(start_paused = true)]
async fn search_is_debounced_into_one_fetch() {
    let backend = Arc::new(FakeBackend::default());
    let handle = start(&backend);
    wait_until(&handle, |s| !s.contacts.is_empty()).await;

    handle.set_search("a");
    handle.set_search("al");
    handle.set_search("ali");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(backend.with(|s| s.contact_queries.len()), 1);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(
        backend.with(|s| s.contact_queries.clone()),
        vec![String::new(), "ali".to_string()]
    );
    assert_eq!(handle.state().search_query, "ali");
    handle.close();
}

#[tokio::test(start_paused = true)]
async fn sent_message_shows_up_once_without_waiting_for_a_tick() {
    let backend = Arc::new(FakeBackend::default());
    let handle = start(&backend);
    open_finance(&handle).await;

    let sent = handle.send("Olá", None).await.unwrap();
    assert!(sent.is_own);

    let messages = handle.state().conversation.unwrap().messages;
    assert_eq!(messages, vec![sent.clone()]);

    // The next poll returns the same message; it must not be duplicated.
    tokio::time::sleep(Duration::from_millis(10_500)).await;
    let messages = handle.state().conversation.unwrap().messages;
    assert_eq!(messages, vec![sent]);
    handle.close();
}

#[tokio::test(start_paused = true)]
async fn send_failures_reach_the_caller_and_the_view() {
    let backend = Arc::new(FakeBackend::default());
    let handle = start(&backend);

    let no_conversation = handle.send("hello?", None).await.unwrap_err();
    assert!(matches!(no_conversation, ChatError::InvalidRequest(_)));

    open_finance(&handle).await;
    backend.with(|s| s.fail_send = Some(ChatError::UnsupportedAttachment("application/pdf".into())));

    let err = handle.send("see attached", None).await.unwrap_err();
    assert!(matches!(err, ChatError::UnsupportedAttachment(_)));

    let state = handle.state();
    assert_eq!(state.send_error, Some(err.user_message()));
    assert!(!state.is_sending);
    assert!(state.conversation.unwrap().messages.is_empty());
    handle.close();
}

#[tokio::test(start_paused = true)]
async fn a_slow_response_for_an_abandoned_conversation_is_dropped() {
    let backend = Arc::new(FakeBackend::default());
    backend.with(|s| {
        s.slow_contacts.insert(7, Duration::from_secs(2));
    });
    let handle = start(&backend);
    wait_until(&handle, |s| !s.contacts.is_empty()).await;

    handle.open_contact(7);
    settle().await;
    handle.open_contact(FINANCE);
    tokio::time::sleep(Duration::from_secs(3)).await;

    let open = handle.state().conversation.unwrap();
    assert_eq!(open.thread_id, 100 + FINANCE);
    assert_eq!(open.contact.unwrap().user_id, FINANCE);
    handle.close();
}

#[tokio::test(start_paused = true)]
async fn a_poll_taken_before_a_send_does_not_hide_the_sent_message() {
    let backend = Arc::new(FakeBackend::default());
    let handle = start(&backend);
    open_finance(&handle).await;

    // The tick at 10s reads an empty thread and answers 2s later.
    backend.with(|s| s.late_delivery = Some(Duration::from_secs(2)));
    tokio::time::sleep(Duration::from_millis(10_500)).await;
    let fetches_before = backend.with(|s| s.fetches.len());

    let sent = handle.send("Olá", None).await.unwrap();
    assert_eq!(handle.state().conversation.unwrap().messages, vec![sent.clone()]);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(handle.state().conversation.unwrap().messages, vec![sent.clone()]);
    // The overtaken poll was replaced by a fresh fetch.
    assert_eq!(backend.with(|s| s.fetches.len()), fetches_before + 1);

    backend.incoming("received, thanks");
    tokio::time::sleep(Duration::from_secs(10)).await;
    let messages = handle.state().conversation.unwrap().messages;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0], sent);
    handle.close();
}

#[tokio::test(start_paused = true)]
async fn a_zero_poll_interval_still_runs_the_session() {
    let backend = Arc::new(FakeBackend::default());
    let settings = SyncSettings {
        poll_interval: Duration::ZERO,
        ..SyncSettings::default()
    };
    let handle = app::start(backend.clone(), settings);

    let state = wait_until(&handle, |s| !s.contacts.is_empty()).await;
    assert_eq!(state.contacts[0].user_id, FINANCE);
    handle.close();
}

#[tokio::test(start_paused = true)]
async fn close_is_idempotent_and_stops_polling() {
    let backend = Arc::new(FakeBackend::default());
    let handle = start(&backend);
    open_finance(&handle).await;

    assert!(handle.close());
    assert!(!handle.close());
    wait_until(&handle, |s| s.closed).await;

    let calls = backend.with(|s| (s.unread_calls, s.fetches.len()));
    tokio::time::sleep(Duration::from_secs(35)).await;
    assert_eq!(backend.with(|s| (s.unread_calls, s.fetches.len())), calls);

    assert!(handle.is_closed());
    assert!(handle.send("too late", None).await.is_err());
}
