use std::sync::Arc;
use std::time::Duration;

use crate::core::directory::Directory;
use crate::core::error::{ChatError, ChatResult};
use crate::core::finance::{FinanceProvider, RequestContext};
use crate::core::media::MediaStore;
use crate::core::mime::validate_attachment_type;
use crate::core::models::{
    format_timestamp, now_millis, ChatMessage, ContactView, Conversation, Identity,
    MessagePayload, Thread, ThreadId, ThreadTarget, Upload, UserId,
};
use crate::core::permissions::{can_initiate, can_initiate_either, Party};
use crate::core::roles::{resolve_role, role_label, Role};
use crate::core::store::{StoreHandle, DEFAULT_MESSAGE_WINDOW};

/// Limits applied by the messaging service.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSettings {
    /// Newest messages returned per fetch.
    pub message_window: u32,
    pub upload_timeout: Duration,
    pub max_attachment_bytes: u64,
    pub max_text_chars: usize,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        ServiceSettings {
            message_window: DEFAULT_MESSAGE_WINDOW,
            upload_timeout: Duration::from_secs(15),
            max_attachment_bytes: 5 * 1024 * 1024,
            max_text_chars: 5_000,
        }
    }
}

/// The only writer of threads and messages. Every call is independent;
/// durability and race safety live in the store.
pub struct MessagingService {
    store: StoreHandle,
    directory: Arc<dyn Directory>,
    media: Arc<dyn MediaStore>,
    finance: Arc<dyn FinanceProvider>,
    settings: ServiceSettings,
}

impl MessagingService {
    pub fn new(
        store: StoreHandle,
        directory: Arc<dyn Directory>,
        media: Arc<dyn MediaStore>,
        finance: Arc<dyn FinanceProvider>,
        settings: ServiceSettings,
    ) -> Self {
        MessagingService {
            store,
            directory,
            media,
            finance,
            settings,
        }
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    /// Build the context for one request. Unknown callers are forbidden, and
    /// so is acting for the finance desk without holding the finance role.
    pub async fn begin(&self, viewer_id: UserId, acting_as_finance: bool) -> ChatResult<RequestContext> {
        let viewer = self
            .directory
            .identity(viewer_id)
            .await?
            .ok_or(ChatError::Forbidden)?;
        let ctx = RequestContext::new(viewer, acting_as_finance);
        if acting_as_finance && ctx.role != Role::Finance {
            log::warn!(
                "User {} asked for the finance view with role {:?}",
                viewer_id,
                ctx.role
            );
            return Err(ChatError::Forbidden);
        }
        Ok(ctx)
    }

    // -- contacts ------------------------------------------------------------

    /// Finance view: one entry per thread of the finance identity, most
    /// recent first, optionally filtered. Everyone else: the finance desk,
    /// with a thread opened on the spot when the viewer may start one.
    pub async fn list_contacts(
        &self,
        ctx: &RequestContext,
        search: Option<&str>,
    ) -> ChatResult<Vec<ContactView>> {
        if ctx.is_acting_as_finance() {
            self.finance_dashboard(ctx, search).await
        } else {
            self.finance_contact(ctx).await
        }
    }

    async fn finance_dashboard(
        &self,
        ctx: &RequestContext,
        search: Option<&str>,
    ) -> ChatResult<Vec<ContactView>> {
        let finance = ctx.finance(self.finance.as_ref()).await?;
        let me = Party::of(finance);
        let needle = search
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());

        let threads = self.store.threads_for(finance.id).await?;
        let mut contacts = Vec::with_capacity(threads.len());
        for thread in threads {
            let Some(other_id) = thread.other(finance.id) else {
                continue;
            };
            let Some(identity) = self.directory.identity(other_id).await? else {
                log::warn!("Thread {} references missing user {}", thread.id, other_id);
                continue;
            };
            if let Some(needle) = &needle {
                let haystack =
                    format!("{} {}", identity.display_name, identity.email).to_lowercase();
                if !haystack.contains(needle.as_str()) {
                    continue;
                }
            }
            let unread = self.store.unread_in_thread(thread.id, finance.id).await?;
            contacts.push(contact_view(&me, identity, thread.id, unread));
        }
        Ok(contacts)
    }

    async fn finance_contact(&self, ctx: &RequestContext) -> ChatResult<Vec<ContactView>> {
        let finance = ctx.finance(self.finance.as_ref()).await?;
        if ctx.viewer.id == finance.id {
            return Ok(Vec::new());
        }

        let me = Party::of(&ctx.viewer);
        let them = Party::of(finance);
        let thread_id = match self.store.find_thread(me.id, them.id).await? {
            Some(thread) => thread.id,
            None if can_initiate_either(&me, &them) => {
                self.store
                    .create_thread(me.id, them.id, now_millis())
                    .await?
                    .id
            }
            None => 0,
        };
        let unread = if thread_id == 0 {
            0
        } else {
            self.store.unread_in_thread(thread_id, me.id).await?
        };
        Ok(vec![contact_view(&me, finance.clone(), thread_id, unread)])
    }

    // -- threads -------------------------------------------------------------

    /// Existing thread with `contact_id`, or a new one if either side may
    /// start it.
    pub async fn get_or_create_thread(
        &self,
        ctx: &RequestContext,
        contact_id: UserId,
    ) -> ChatResult<Thread> {
        let actor = ctx.actor(self.finance.as_ref()).await?;
        self.thread_with(actor, contact_id).await
    }

    async fn thread_with(&self, actor: &Identity, contact_id: UserId) -> ChatResult<Thread> {
        let denied = ChatError::ThreadCreationDenied {
            actor: actor.id,
            target: contact_id,
        };
        if contact_id == actor.id {
            return Err(denied);
        }
        if let Some(thread) = self.store.find_thread(actor.id, contact_id).await? {
            return Ok(thread);
        }

        let contact = self
            .directory
            .identity(contact_id)
            .await?
            .ok_or(ChatError::NotFound)?;
        if !can_initiate_either(&Party::of(actor), &Party::of(&contact)) {
            log::info!("User {} may not start a thread with {}", actor.id, contact_id);
            return Err(denied);
        }

        let thread = self
            .store
            .create_thread(actor.id, contact.id, now_millis())
            .await?;
        log::debug!("Thread {} open between {} and {}", thread.id, actor.id, contact.id);
        Ok(thread)
    }

    /// Resolve the target and make sure `actor` is a participant. Outsiders
    /// get `NotFound` so thread ids reveal nothing.
    async fn authorized_thread(&self, actor: &Identity, target: ThreadTarget) -> ChatResult<Thread> {
        let thread = match target {
            ThreadTarget::Contact(contact_id) => self.thread_with(actor, contact_id).await?,
            ThreadTarget::Thread(thread_id) => self
                .store
                .thread(thread_id)
                .await?
                .ok_or(ChatError::NotFound)?,
        };
        if !self.store.user_in_thread(actor.id, thread.id).await? {
            log::debug!("User {} is not in thread {}", actor.id, thread.id);
            return Err(ChatError::NotFound);
        }
        Ok(thread)
    }

    // -- messages ------------------------------------------------------------

    /// Open a conversation: latest window of messages, oldest first. Also
    /// marks everything from the other side as read.
    pub async fn fetch_messages(
        &self,
        ctx: &RequestContext,
        target: ThreadTarget,
    ) -> ChatResult<Conversation> {
        let actor = ctx.actor(self.finance.as_ref()).await?;
        let thread = self.authorized_thread(actor, target).await?;

        let messages = self
            .store
            .latest(thread.id, self.settings.message_window)
            .await?;
        let marked = self.store.mark_read_except(thread.id, actor.id).await?;
        if marked > 0 {
            log::debug!("Marked {marked} messages read in thread {} for {}", thread.id, actor.id);
        }

        let other_id = thread.other(actor.id).ok_or(ChatError::NotFound)?;
        let other = self
            .directory
            .identity(other_id)
            .await?
            .ok_or(ChatError::NotFound)?;
        let unread = self.store.unread_in_thread(thread.id, actor.id).await?;
        let contact = contact_view(&Party::of(actor), other, thread.id, unread).to_payload();

        let mut payloads = Vec::with_capacity(messages.len());
        for message in &messages {
            payloads.push(self.message_payload(message, actor.id).await);
        }

        Ok(Conversation {
            thread_id: thread.id,
            contact,
            messages: payloads,
        })
    }

    pub async fn send_message(
        &self,
        ctx: &RequestContext,
        target: ThreadTarget,
        text: &str,
        upload: Option<Upload>,
    ) -> ChatResult<MessagePayload> {
        let actor = ctx.actor(self.finance.as_ref()).await?;
        let thread = self.authorized_thread(actor, target).await?;

        let text = text.trim();
        if text.chars().count() > self.settings.max_text_chars {
            return Err(ChatError::InvalidRequest(format!(
                "message longer than {} characters",
                self.settings.max_text_chars
            )));
        }

        let upload = upload.filter(|u| !u.is_blank());
        let accepted = match &upload {
            Some(upload) => Some((upload, self.check_upload(upload)?)),
            None => None,
        };

        if text.is_empty() && accepted.is_none() {
            return Err(ChatError::EmptyMessage);
        }

        let attachment = match accepted {
            Some((upload, mime)) => Some(self.store_upload(upload, mime).await?),
            None => None,
        };

        let message = match self
            .store
            .append(thread.id, actor.id, text, attachment, now_millis())
            .await
        {
            Ok(message) => message,
            Err(e) => {
                if let Some(media_id) = attachment {
                    log::warn!("Message insert failed, discarding media {media_id}: {e}");
                    if let Err(cleanup) = self.media.discard(media_id).await {
                        log::warn!("Failed to discard media {media_id}: {cleanup}");
                    }
                }
                return Err(e);
            }
        };

        log::debug!(
            "User {} sent message {} in thread {}",
            actor.id,
            message.id,
            thread.id
        );
        Ok(self.message_payload(&message, actor.id).await)
    }

    /// Mark everything the other side sent in `thread_id` as read.
    pub async fn mark_read(&self, ctx: &RequestContext, thread_id: ThreadId) -> ChatResult<usize> {
        let actor_id = ctx.actor_id(self.finance.as_ref()).await?;
        if !self.store.user_in_thread(actor_id, thread_id).await? {
            return Err(ChatError::NotFound);
        }
        self.store.mark_read_except(thread_id, actor_id).await
    }

    pub async fn unread_count(&self, ctx: &RequestContext) -> ChatResult<u32> {
        let actor_id = ctx.actor_id(self.finance.as_ref()).await?;
        self.store.unread_count_for_user(actor_id).await
    }

    // -- helpers -------------------------------------------------------------

    fn check_upload(&self, upload: &Upload) -> ChatResult<&'static str> {
        let mime = validate_attachment_type(&upload.content_type)?;
        let size = upload.bytes.len() as u64;
        if size == 0 {
            return Err(ChatError::InvalidRequest("attachment is empty".into()));
        }
        if size > self.settings.max_attachment_bytes {
            return Err(ChatError::AttachmentTooLarge {
                size,
                limit: self.settings.max_attachment_bytes,
            });
        }
        Ok(mime)
    }

    async fn store_upload(&self, upload: &Upload, mime: &str) -> ChatResult<i64> {
        let timeout = self.settings.upload_timeout;
        match tokio::time::timeout(timeout, self.media.store(upload, mime)).await {
            Ok(Ok(id)) => Ok(id),
            Ok(Err(e @ ChatError::UploadFailed { .. })) => Err(e),
            Ok(Err(e)) => Err(ChatError::UploadFailed {
                reason: e.to_string(),
                retryable: false,
            }),
            Err(_) => {
                log::warn!("Attachment {:?} not stored within {:?}", upload.file_name, timeout);
                Err(ChatError::UploadFailed {
                    reason: format!("media storage did not answer within {timeout:?}"),
                    retryable: true,
                })
            }
        }
    }

    async fn message_payload(&self, message: &ChatMessage, viewer: UserId) -> MessagePayload {
        let attachment_url = match message.attachment {
            Some(media_id) => match self.media.url(media_id).await {
                Ok(url) => url.unwrap_or_default(),
                Err(e) => {
                    log::warn!("No URL for media {media_id}: {e}");
                    String::new()
                }
            },
            None => String::new(),
        };
        MessagePayload {
            id: message.id,
            sender_id: message.sender_id,
            text: message.text.clone(),
            attachment_url,
            created_at: format_timestamp(message.created_at),
            is_own: message.sender_id == viewer,
        }
    }
}

fn contact_view(me: &Party, identity: Identity, thread_id: ThreadId, unread: u32) -> ContactView {
    let them = Party::of(&identity);
    ContactView {
        role: resolve_role(&identity),
        role_label: role_label(&identity),
        can_initiate: can_initiate(me, &them),
        identity,
        thread_id,
        unread,
    }
}
