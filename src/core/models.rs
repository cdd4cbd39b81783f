use serde::{Deserialize, Serialize};

use crate::core::roles::Role;

pub type UserId = i64;
pub type ThreadId = i64;
pub type MessageId = i64;
pub type MediaId = i64;

/// An account owned by the host system.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Identity {
    pub id: UserId,
    pub login: String,
    pub display_name: String,
    pub email: String,
    /// Raw role labels as the host stores them, in host order.
    pub roles: Vec<String>,
    pub is_admin: bool,
    /// Coordinator responsible for this account, if any.
    pub managed_by: Option<UserId>,
}

/// Fields needed to provision a new host account.
#[derive(Debug, Clone)]
pub struct NewIdentity {
    pub login: String,
    pub display_name: String,
    pub email: String,
    pub roles: Vec<String>,
    pub is_admin: bool,
    pub managed_by: Option<UserId>,
    pub credential: String,
}

/// A 1:1 conversation. Stored with `user_a < user_b`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Thread {
    pub id: ThreadId,
    pub user_a: UserId,
    pub user_b: UserId,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Thread {
    pub fn involves(&self, user: UserId) -> bool {
        self.user_a == user || self.user_b == user
    }

    /// The participant that is not `me`, or `None` if `me` is not in the thread.
    pub fn other(&self, me: UserId) -> Option<UserId> {
        if self.user_a == me {
            Some(self.user_b)
        } else if self.user_b == me {
            Some(self.user_a)
        } else {
            None
        }
    }
}

/// A persisted message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub id: MessageId,
    pub thread_id: ThreadId,
    pub sender_id: UserId,
    pub text: String,
    pub attachment: Option<MediaId>,
    pub created_at: i64,
    pub is_read: bool,
}

/// Per-viewer summary of someone the viewer talks to. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ContactView {
    pub identity: Identity,
    pub role: Role,
    pub role_label: String,
    /// 0 when no thread exists yet.
    pub thread_id: ThreadId,
    pub unread: u32,
    pub can_initiate: bool,
}

impl ContactView {
    pub fn to_payload(&self) -> ContactPayload {
        ContactPayload {
            user_id: self.identity.id,
            name: self.identity.display_name.clone(),
            email: self.identity.email.clone(),
            role: self.role_label.clone(),
            thread_id: self.thread_id,
            unread: self.unread,
            can_start: self.can_initiate,
            can_message: self.thread_id != 0 || self.can_initiate,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContactPayload {
    pub user_id: UserId,
    pub name: String,
    pub email: String,
    pub role: String,
    pub thread_id: ThreadId,
    pub unread: u32,
    pub can_start: bool,
    pub can_message: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessagePayload {
    pub id: MessageId,
    pub sender_id: UserId,
    pub text: String,
    /// Empty when the message carries no attachment.
    pub attachment_url: String,
    pub created_at: String,
    pub is_own: bool,
}

/// What `fetch_messages` hands back: the thread, who is on the other side,
/// and the most recent window of messages in ascending order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    pub thread_id: ThreadId,
    pub contact: ContactPayload,
    pub messages: Vec<MessagePayload>,
}

/// A file received with a send request.
#[derive(Debug, Clone, PartialEq)]
pub struct Upload {
    pub file_name: String,
    /// MIME type as declared by the client.
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    /// Browsers post an empty file part when nothing was picked.
    pub fn is_blank(&self) -> bool {
        self.file_name.trim().is_empty() && self.bytes.is_empty()
    }
}

/// A stored attachment in the host media table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaRecord {
    pub id: MediaId,
    pub file_name: String,
    pub mime_type: String,
    pub size: u64,
    pub created_at: i64,
}

/// Where a fetch or send is aimed: an existing thread, or the thread with a
/// contact (created on demand).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadTarget {
    Thread(ThreadId),
    Contact(UserId),
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// RFC 3339 rendering of a millisecond timestamp.
pub fn format_timestamp(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|d| d.to_rfc3339())
        .unwrap_or_default()
}
