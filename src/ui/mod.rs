//! Plain-text renderers for session snapshots.

pub mod contact_list;
pub mod conversation;

use crate::app::ViewState;

/// Full screen: status line, contacts, then the open conversation.
pub fn render(state: &ViewState, threshold: f32) -> String {
    let mut out = String::new();
    if !state.status_message.is_empty() {
        out.push_str(&format!("[{}]\n", state.status_message));
    }
    out.push_str(&contact_list::render(
        &state.contacts,
        state.unread_total,
        &state.search_query,
    ));
    if let Some(open) = &state.conversation {
        out.push('\n');
        out.push_str(&conversation::render(open, &state.scroll, threshold));
    }
    if let Some(error) = &state.send_error {
        out.push_str(&format!("! {error}\n"));
    }
    out
}
