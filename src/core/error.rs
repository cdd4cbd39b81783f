use thiserror::Error;

/// Every failure a messaging call can end in. All of them are terminal for
/// the call that produced them; nothing is retried server-side.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ChatError {
    /// No session, no authenticated user, bad anti-forgery token, or a
    /// finance-only view requested by someone without the finance role.
    #[error("forbidden")]
    Forbidden,
    #[error("user {actor} may not start a conversation with user {target}")]
    ThreadCreationDenied { actor: i64, target: i64 },
    /// Thread not owned by the caller, or a contact that does not resolve.
    #[error("not found")]
    NotFound,
    #[error("message has neither text nor attachment")]
    EmptyMessage,
    #[error("unsupported attachment type: {0}")]
    UnsupportedAttachment(String),
    #[error("attachment is {size} bytes, limit is {limit}")]
    AttachmentTooLarge { size: u64, limit: u64 },
    #[error("upload failed: {reason}")]
    UploadFailed { reason: String, retryable: bool },
    #[error("finance channel unavailable")]
    FinanceChannelUnavailable,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("storage: {0}")]
    Storage(String),
}

pub type ChatResult<T> = Result<T, ChatError>;

impl ChatError {
    /// HTTP status used by the JSON binding.
    pub fn status_code(&self) -> u16 {
        match self {
            ChatError::Forbidden | ChatError::ThreadCreationDenied { .. } => 403,
            ChatError::NotFound => 404,
            ChatError::EmptyMessage
            | ChatError::UnsupportedAttachment(_)
            | ChatError::AttachmentTooLarge { .. }
            | ChatError::InvalidRequest(_) => 400,
            ChatError::UploadFailed { retryable: true, .. } => 503,
            ChatError::UploadFailed { retryable: false, .. } => 500,
            ChatError::FinanceChannelUnavailable => 503,
            ChatError::Storage(_) => 500,
        }
    }

    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ChatError::Forbidden => "forbidden",
            ChatError::ThreadCreationDenied { .. } => "thread_creation_denied",
            ChatError::NotFound => "not_found",
            ChatError::EmptyMessage => "empty_message",
            ChatError::UnsupportedAttachment(_) => "unsupported_attachment",
            ChatError::AttachmentTooLarge { .. } => "attachment_too_large",
            ChatError::UploadFailed { .. } => "upload_failed",
            ChatError::FinanceChannelUnavailable => "finance_channel_unavailable",
            ChatError::InvalidRequest(_) => "invalid_request",
            ChatError::Storage(_) => "storage",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ChatError::UploadFailed { retryable: true, .. })
    }

    /// Text safe to show to the person who triggered the call.
    pub fn user_message(&self) -> String {
        match self {
            ChatError::Forbidden => "Your session has expired. Reload the page.".into(),
            ChatError::ThreadCreationDenied { .. } => {
                "You are not allowed to start a conversation with this person.".into()
            }
            ChatError::NotFound => "Conversation not found.".into(),
            ChatError::EmptyMessage => "Write a message or attach an image.".into(),
            ChatError::UnsupportedAttachment(_) => {
                "Only JPEG, PNG and GIF images can be attached.".into()
            }
            ChatError::AttachmentTooLarge { limit, .. } => {
                format!("Attachments are limited to {} KiB.", limit / 1024)
            }
            ChatError::UploadFailed { .. } => "The attachment could not be uploaded. Try again.".into(),
            ChatError::FinanceChannelUnavailable => {
                "The finance desk is unavailable right now.".into()
            }
            ChatError::InvalidRequest(reason) => format!("Invalid request: {reason}"),
            ChatError::Storage(_) => "Something went wrong. Try again later.".into(),
        }
    }
}

/// Wrap a rusqlite error with the operation that produced it.
pub(crate) fn db_err(context: &'static str) -> impl Fn(rusqlite::Error) -> ChatError {
    move |e| ChatError::Storage(format!("{context}: {e}"))
}
