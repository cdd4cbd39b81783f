use crate::app::{OpenConversation, ScrollState};
use crate::core::models::MessagePayload;

fn render_message(msg: &MessagePayload, contact_name: &str) -> String {
    let who = if msg.is_own { "You" } else { contact_name };
    let mut line = format!("  {} {}: {}", msg.created_at, who, msg.text);
    if !msg.attachment_url.is_empty() {
        if !msg.text.is_empty() {
            line.push(' ');
        }
        line.push_str(&format!("[image: {}]", msg.attachment_url));
    }
    line.push('\n');
    line
}

/// Render the open conversation, oldest message first.
pub fn render(open: &OpenConversation, scroll: &ScrollState, threshold: f32) -> String {
    let name = open
        .contact
        .as_ref()
        .map(|c| c.name.as_str())
        .unwrap_or("Finance");

    let mut out = format!("== {name} ==\n");
    if open.loading {
        out.push_str("  Loading...\n");
        return out;
    }
    if open.messages.is_empty() {
        out.push_str("  No messages yet\n");
    }
    for msg in &open.messages {
        out.push_str(&render_message(msg, name));
    }
    if !scroll.is_following(threshold) && scroll.unseen > 0 {
        out.push_str(&format!("  -- {} new below --\n", scroll.unseen));
    }
    out
}
