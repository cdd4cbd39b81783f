use std::sync::Arc;

use async_trait::async_trait;

use crate::core::api::{
    Action, ChatEndpoint, FetchMessagesRequest, ListContactsRequest, SendMessageRequest, Session,
    UnreadCountRequest,
};
use crate::core::error::ChatResult;
use crate::core::models::{ContactPayload, Conversation, MessagePayload, ThreadTarget, Upload};

/// What the sync loop needs from the server, whatever carries the calls.
#[async_trait]
pub trait ChatBackend: Send + Sync + 'static {
    async fn list_contacts(&self, search: &str) -> ChatResult<Vec<ContactPayload>>;

    /// Also marks the other side's messages read.
    async fn fetch_messages(&self, target: ThreadTarget) -> ChatResult<Conversation>;

    async fn send_message(
        &self,
        target: ThreadTarget,
        text: String,
        upload: Option<Upload>,
    ) -> ChatResult<MessagePayload>;

    async fn unread_count(&self) -> ChatResult<u32>;
}

/// Drives a `ChatEndpoint` in-process on behalf of one session.
pub struct LocalBackend {
    endpoint: Arc<ChatEndpoint>,
    session: Session,
    as_finance: bool,
}

impl LocalBackend {
    pub fn new(endpoint: Arc<ChatEndpoint>, session: Session, as_finance: bool) -> Self {
        LocalBackend {
            endpoint,
            session,
            as_finance,
        }
    }

    fn token(&self, action: Action) -> ChatResult<String> {
        self.endpoint.token_for(&self.session, action)
    }
}

fn ids(target: ThreadTarget) -> (i64, i64) {
    match target {
        ThreadTarget::Thread(id) => (id, 0),
        ThreadTarget::Contact(id) => (0, id),
    }
}

#[async_trait]
impl ChatBackend for LocalBackend {
    async fn list_contacts(&self, search: &str) -> ChatResult<Vec<ContactPayload>> {
        let token = self.token(Action::ListContacts)?;
        let req = ListContactsRequest {
            search: search.to_string(),
            as_finance: self.as_finance,
        };
        self.endpoint.list_contacts(&self.session, &token, req).await
    }

    async fn fetch_messages(&self, target: ThreadTarget) -> ChatResult<Conversation> {
        let token = self.token(Action::FetchMessages)?;
        let (thread_id, contact_id) = ids(target);
        let req = FetchMessagesRequest {
            thread_id,
            contact_id,
            as_finance: self.as_finance,
        };
        self.endpoint.fetch_messages(&self.session, &token, req).await
    }

    async fn send_message(
        &self,
        target: ThreadTarget,
        text: String,
        upload: Option<Upload>,
    ) -> ChatResult<MessagePayload> {
        let token = self.token(Action::SendMessage)?;
        let (thread_id, contact_id) = ids(target);
        let req = SendMessageRequest {
            thread_id,
            contact_id,
            text,
            as_finance: self.as_finance,
        };
        self.endpoint
            .send_message(&self.session, &token, req, upload)
            .await
    }

    async fn unread_count(&self) -> ChatResult<u32> {
        let token = self.token(Action::UnreadCount)?;
        let req = UnreadCountRequest {
            as_finance: self.as_finance,
        };
        self.endpoint.unread_count(&self.session, &token, req).await
    }
}
