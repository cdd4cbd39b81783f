use crate::core::error::{ChatError, ChatResult};

/// Image types accepted as message attachments.
pub const ALLOWED_ATTACHMENT_TYPES: [&str; 3] = ["image/jpeg", "image/png", "image/gif"];

/// Normalize a declared `Content-Type` and check it against the allow-list.
///
/// Parameters (`; charset=...`) and case are ignored. Returns the canonical
/// type on success.
pub fn validate_attachment_type(declared: &str) -> ChatResult<&'static str> {
    let essence = declared
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    ALLOWED_ATTACHMENT_TYPES
        .iter()
        .copied()
        .find(|allowed| *allowed == essence)
        .ok_or_else(|| ChatError::UnsupportedAttachment(declared.trim().to_string()))
}

/// File extension used when storing an accepted attachment.
pub fn extension_for(mime: &str) -> &'static str {
    match mime {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        _ => "bin",
    }
}

/// Guess MIME type from file extension.
pub fn mime_from_ext(path: &std::path::Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg" | "jpeg" | "jpe") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain",
        Some("csv") => "text/csv",
        Some("doc") => "application/msword",
        Some("docx") => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        Some("xls") => "application/vnd.ms-excel",
        Some("xlsx") => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        _ => "application/octet-stream",
    }
}
