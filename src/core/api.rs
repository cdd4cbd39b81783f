//! Inbound boundary: one typed request per action, an anti-forgery token
//! bound to that action, and the JSON envelope used by the HTTP binding.

use std::sync::Arc;

use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::Sha256;

use crate::core::error::{ChatError, ChatResult};
use crate::core::models::{
    ContactPayload, Conversation, MessagePayload, ThreadId, ThreadTarget, Upload, UserId,
};
use crate::core::service::MessagingService;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    ListContacts,
    FetchMessages,
    SendMessage,
    MarkRead,
    UnreadCount,
}

impl Action {
    pub const ALL: [Action; 5] = [
        Action::ListContacts,
        Action::FetchMessages,
        Action::SendMessage,
        Action::MarkRead,
        Action::UnreadCount,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Action::ListContacts => "deskchat_list_contacts",
            Action::FetchMessages => "deskchat_fetch_messages",
            Action::SendMessage => "deskchat_send_message",
            Action::MarkRead => "deskchat_mark_read",
            Action::UnreadCount => "deskchat_unread_count",
        }
    }

    pub fn from_name(name: &str) -> Option<Action> {
        Action::ALL.into_iter().find(|a| a.name() == name)
    }
}

/// Issues and checks per-session, per-action anti-forgery tokens
/// (hex HMAC-SHA256 over session id and action name).
pub struct TokenIssuer {
    secret: Vec<u8>,
}

impl TokenIssuer {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        TokenIssuer {
            secret: secret.into(),
        }
    }

    fn mac(&self, session_id: &str, action: Action) -> Option<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).ok()?;
        mac.update(session_id.as_bytes());
        mac.update(&[0]);
        mac.update(action.name().as_bytes());
        Some(mac)
    }

    pub fn issue(&self, session_id: &str, action: Action) -> ChatResult<String> {
        let mac = self.mac(session_id, action).ok_or(ChatError::Forbidden)?;
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    pub fn verify(&self, session_id: &str, action: Action, token: &str) -> bool {
        let Ok(bytes) = hex::decode(token.trim()) else {
            return false;
        };
        match self.mac(session_id, action) {
            Some(mac) => mac.verify_slice(&bytes).is_ok(),
            None => false,
        }
    }
}

/// The caller as the host authenticated it.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: String,
    /// `None` for anonymous visitors.
    pub user_id: Option<UserId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListContactsRequest {
    #[serde(default)]
    pub search: String,
    #[serde(default)]
    pub as_finance: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FetchMessagesRequest {
    #[serde(default)]
    pub thread_id: ThreadId,
    #[serde(default)]
    pub contact_id: UserId,
    #[serde(default)]
    pub as_finance: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub thread_id: ThreadId,
    #[serde(default)]
    pub contact_id: UserId,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub as_finance: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarkReadRequest {
    pub thread_id: ThreadId,
    #[serde(default)]
    pub as_finance: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnreadCountRequest {
    #[serde(default)]
    pub as_finance: bool,
}

/// `thread_id` wins over `contact_id`; 0 means absent.
pub fn thread_target(thread_id: ThreadId, contact_id: UserId) -> ChatResult<ThreadTarget> {
    if thread_id < 0 || contact_id < 0 {
        return Err(ChatError::InvalidRequest("ids must not be negative".into()));
    }
    if thread_id > 0 {
        Ok(ThreadTarget::Thread(thread_id))
    } else if contact_id > 0 {
        Ok(ThreadTarget::Contact(contact_id))
    } else {
        Err(ChatError::InvalidRequest(
            "thread_id or contact_id is required".into(),
        ))
    }
}

/// Status plus JSON body, ready for whatever transport carries it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub status: u16,
    pub body: Value,
}

pub struct ChatEndpoint {
    service: Arc<MessagingService>,
    tokens: TokenIssuer,
}

impl ChatEndpoint {
    pub fn new(service: Arc<MessagingService>, tokens: TokenIssuer) -> Self {
        ChatEndpoint { service, tokens }
    }

    /// Token the page embeds for `action`.
    pub fn token_for(&self, session: &Session, action: Action) -> ChatResult<String> {
        self.tokens.issue(&session.id, action)
    }

    fn authorize(&self, session: &Session, action: Action, token: &str) -> ChatResult<UserId> {
        let user_id = session.user_id.ok_or(ChatError::Forbidden)?;
        if !self.tokens.verify(&session.id, action, token) {
            log::warn!("Rejected {} for user {}: bad token", action.name(), user_id);
            return Err(ChatError::Forbidden);
        }
        Ok(user_id)
    }

    // -- typed actions -------------------------------------------------------

    pub async fn list_contacts(
        &self,
        session: &Session,
        token: &str,
        req: ListContactsRequest,
    ) -> ChatResult<Vec<ContactPayload>> {
        let user_id = self.authorize(session, Action::ListContacts, token)?;
        self.list_contacts_as(user_id, req).await
    }

    pub async fn fetch_messages(
        &self,
        session: &Session,
        token: &str,
        req: FetchMessagesRequest,
    ) -> ChatResult<Conversation> {
        let user_id = self.authorize(session, Action::FetchMessages, token)?;
        self.fetch_messages_as(user_id, req).await
    }

    pub async fn send_message(
        &self,
        session: &Session,
        token: &str,
        req: SendMessageRequest,
        upload: Option<Upload>,
    ) -> ChatResult<MessagePayload> {
        let user_id = self.authorize(session, Action::SendMessage, token)?;
        self.send_message_as(user_id, req, upload).await
    }

    pub async fn mark_read(
        &self,
        session: &Session,
        token: &str,
        req: MarkReadRequest,
    ) -> ChatResult<usize> {
        let user_id = self.authorize(session, Action::MarkRead, token)?;
        self.mark_read_as(user_id, req).await
    }

    pub async fn unread_count(
        &self,
        session: &Session,
        token: &str,
        req: UnreadCountRequest,
    ) -> ChatResult<u32> {
        let user_id = self.authorize(session, Action::UnreadCount, token)?;
        self.unread_count_as(user_id, req).await
    }

    async fn list_contacts_as(
        &self,
        user_id: UserId,
        req: ListContactsRequest,
    ) -> ChatResult<Vec<ContactPayload>> {
        let ctx = self.service.begin(user_id, req.as_finance).await?;
        let search = Some(req.search.as_str()).filter(|s| !s.trim().is_empty());
        let contacts = self.service.list_contacts(&ctx, search).await?;
        Ok(contacts.iter().map(|c| c.to_payload()).collect())
    }

    async fn fetch_messages_as(
        &self,
        user_id: UserId,
        req: FetchMessagesRequest,
    ) -> ChatResult<Conversation> {
        let target = thread_target(req.thread_id, req.contact_id)?;
        let ctx = self.service.begin(user_id, req.as_finance).await?;
        self.service.fetch_messages(&ctx, target).await
    }

    async fn send_message_as(
        &self,
        user_id: UserId,
        req: SendMessageRequest,
        upload: Option<Upload>,
    ) -> ChatResult<MessagePayload> {
        let target = thread_target(req.thread_id, req.contact_id)?;
        let ctx = self.service.begin(user_id, req.as_finance).await?;
        self.service
            .send_message(&ctx, target, &req.text, upload)
            .await
    }

    async fn mark_read_as(&self, user_id: UserId, req: MarkReadRequest) -> ChatResult<usize> {
        if req.thread_id <= 0 {
            return Err(ChatError::InvalidRequest("thread_id is required".into()));
        }
        let ctx = self.service.begin(user_id, req.as_finance).await?;
        self.service.mark_read(&ctx, req.thread_id).await
    }

    async fn unread_count_as(&self, user_id: UserId, req: UnreadCountRequest) -> ChatResult<u32> {
        let ctx = self.service.begin(user_id, req.as_finance).await?;
        self.service.unread_count(&ctx).await
    }

    // -- JSON binding --------------------------------------------------------

    /// Authorize, parse, dispatch, and wrap the outcome in the
    /// `{"success": .., "data": ..}` envelope.
    pub async fn handle(
        &self,
        session: &Session,
        action: Action,
        token: &str,
        body: Value,
        upload: Option<Upload>,
    ) -> Response {
        match self.dispatch(session, action, token, body, upload).await {
            Ok(data) => Response {
                status: 200,
                body: json!({ "success": true, "data": data }),
            },
            Err(e) => {
                if matches!(e, ChatError::FinanceChannelUnavailable | ChatError::Storage(_)) {
                    log::error!("{} failed: {e}", action.name());
                } else {
                    log::debug!("{} rejected: {e}", action.name());
                }
                Response {
                    status: e.status_code(),
                    body: json!({
                        "success": false,
                        "data": { "code": e.kind(), "message": e.user_message() },
                    }),
                }
            }
        }
    }

    async fn dispatch(
        &self,
        session: &Session,
        action: Action,
        token: &str,
        body: Value,
        upload: Option<Upload>,
    ) -> ChatResult<Value> {
        let user_id = self.authorize(session, action, token)?;
        let body = if body.is_null() { json!({}) } else { body };

        match action {
            Action::ListContacts => to_json(self.list_contacts_as(user_id, parse(body)?).await?),
            Action::FetchMessages => to_json(self.fetch_messages_as(user_id, parse(body)?).await?),
            Action::SendMessage => {
                to_json(self.send_message_as(user_id, parse(body)?, upload).await?)
            }
            Action::MarkRead => {
                let marked = self.mark_read_as(user_id, parse(body)?).await?;
                Ok(json!({ "marked": marked }))
            }
            Action::UnreadCount => to_json(self.unread_count_as(user_id, parse(body)?).await?),
        }
    }
}

fn parse<T: DeserializeOwned>(body: Value) -> ChatResult<T> {
    serde_json::from_value(body).map_err(|e| ChatError::InvalidRequest(e.to_string()))
}

fn to_json<T: Serialize>(data: T) -> ChatResult<Value> {
    serde_json::to_value(data).map_err(|e| ChatError::Storage(format!("encode response: {e}")))
}
