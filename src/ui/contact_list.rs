use crate::core::models::ContactPayload;

/// Render the contact list with unread markers.
pub fn render(contacts: &[ContactPayload], unread_total: u32, search_query: &str) -> String {
    let mut out = String::new();

    let header = if unread_total > 0 {
        format!("Contacts ({unread_total} unread)")
    } else {
        "Contacts".to_string()
    };
    out.push_str(&header);
    if !search_query.trim().is_empty() {
        out.push_str(&format!("  search: \"{}\"", search_query.trim()));
    }
    out.push('\n');

    if contacts.is_empty() {
        out.push_str("  No contacts\n");
        return out;
    }

    for contact in contacts {
        let marker = if contact.unread > 0 { "● " } else { "  " };
        let badge = if contact.unread > 0 {
            format!(" ({})", contact.unread)
        } else {
            String::new()
        };
        let status = if !contact.can_message {
            " [cannot message]"
        } else if contact.thread_id == 0 {
            " [new]"
        } else {
            ""
        };
        out.push_str(&format!(
            "{marker}#{} {} <{}> {}{badge}{status}\n",
            contact.user_id, contact.name, contact.email, contact.role
        ));
    }
    out
}
