use crate::core::models::{ContactPayload, ThreadTarget};

use super::{ChatSession, Message, OpenConversation, Task};

/// Where the viewer is in the message list, measured from the bottom.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScrollState {
    pub from_bottom: f32,
    /// Messages that arrived while the viewer was reading history.
    pub unseen: usize,
}

impl ScrollState {
    pub fn is_following(&self, threshold: f32) -> bool {
        self.from_bottom <= threshold
    }

    /// Returns `true` when the view should jump to the newest message.
    pub fn on_new_messages(&mut self, added: usize, threshold: f32) -> bool {
        if added == 0 {
            return false;
        }
        if self.is_following(threshold) {
            self.from_bottom = 0.0;
            self.unseen = 0;
            true
        } else {
            self.unseen += added;
            false
        }
    }

    pub fn on_scrolled(&mut self, from_bottom: f32, threshold: f32) {
        self.from_bottom = from_bottom.max(0.0);
        if self.is_following(threshold) {
            self.unseen = 0;
        }
    }

    pub fn reset(&mut self) {
        *self = ScrollState::default();
    }
}

impl ChatSession {
    pub(super) fn handle_navigation(&mut self, message: Message) -> Task {
        match message {
            Message::OpenContact(user_id) => {
                let contact = self.contacts.get(&user_id).cloned();
                return self.open(ThreadTarget::Contact(user_id), contact);
            }
            Message::OpenThread(thread_id) => {
                let contact = self
                    .contacts
                    .values()
                    .find(|c| c.thread_id == thread_id)
                    .cloned();
                return self.open(ThreadTarget::Thread(thread_id), contact);
            }
            Message::CloseConversation => {
                if self.conversation.take().is_some() {
                    self.conversation_generation += 1;
                    self.scroll.reset();
                    self.send_error = None;
                }
            }
            Message::Scrolled(from_bottom) => {
                self.scroll
                    .on_scrolled(from_bottom, self.settings.scroll_threshold);
            }

            _ => {}
        }
        Task::none()
    }

    fn open(&mut self, target: ThreadTarget, contact: Option<ContactPayload>) -> Task {
        // Responses for whatever was open before are now stale.
        self.conversation_generation += 1;
        self.conversation = Some(OpenConversation::new(target, contact));
        self.scroll.reset();
        self.send_error = None;
        self.refresh_conversation()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLD: f32 = 80.0;

    #[test]
    fn follows_new_messages_near_the_bottom() {
        let mut scroll = ScrollState::default();
        scroll.on_scrolled(40.0, THRESHOLD);

        assert!(scroll.on_new_messages(2, THRESHOLD));
        assert_eq!(scroll.from_bottom, 0.0);
        assert_eq!(scroll.unseen, 0);
    }

    #[test]
    fn keeps_position_while_reading_history() {
        let mut scroll = ScrollState::default();
        scroll.on_scrolled(600.0, THRESHOLD);

        assert!(!scroll.on_new_messages(3, THRESHOLD));
        assert!(!scroll.on_new_messages(1, THRESHOLD));
        assert_eq!(scroll.from_bottom, 600.0);
        assert_eq!(scroll.unseen, 4);

        // Coming back down clears the badge.
        scroll.on_scrolled(10.0, THRESHOLD);
        assert_eq!(scroll.unseen, 0);
    }

    #[test]
    fn nothing_new_is_not_a_jump() {
        let mut scroll = ScrollState::default();
        assert!(!scroll.on_new_messages(0, THRESHOLD));
    }

    #[test]
    fn negative_offsets_clamp_to_bottom() {
        let mut scroll = ScrollState::default();
        scroll.on_scrolled(-25.0, THRESHOLD);
        assert_eq!(scroll.from_bottom, 0.0);
    }
}
