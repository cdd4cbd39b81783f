use crate::core::error::ChatError;

use super::{ChatSession, Message, Task};

impl ChatSession {
    pub(super) fn handle_compose(&mut self, message: Message) -> Task {
        match message {
            Message::Send {
                text,
                upload,
                reply,
            } => {
                let Some(open) = &self.conversation else {
                    let _ = reply.send(Err(ChatError::InvalidRequest(
                        "no conversation is open".into(),
                    )));
                    return Task::none();
                };

                let target = open.current_target();
                let generation = self.conversation_generation;
                let backend = self.backend.clone();
                self.sending += 1;
                self.send_error = None;

                return Task::future(async move {
                    Message::SendComplete {
                        generation,
                        result: backend.send_message(target, text, upload).await,
                        reply,
                    }
                });
            }

            Message::SendComplete {
                generation,
                result,
                reply,
            } => {
                self.sending = self.sending.saturating_sub(1);
                let mut task = Task::none();
                match &result {
                    Ok(sent) => {
                        // Only after the server confirmed it, and only into the
                        // conversation it was sent from.
                        if generation == self.conversation_generation {
                            if let Some(open) = self.conversation.as_mut() {
                                if !open.contains(sent.id) {
                                    open.messages.push(sent.clone());
                                    self.scroll
                                        .on_new_messages(1, self.settings.scroll_threshold);
                                }
                                // Snapshots requested before the confirmation may
                                // predate the message; drop them and fetch again.
                                let in_flight = self.conversation_applied < self.conversation_seq;
                                self.conversation_applied = self.conversation_seq;
                                if in_flight {
                                    task = self.refresh_conversation();
                                }
                            }
                        }
                    }
                    Err(e) => {
                        log::error!("Send failed: {e}");
                        self.send_error = Some(e.user_message());
                    }
                }
                self.replies.push((reply, result));
                return task;
            }

            _ => {}
        }
        Task::none()
    }
}
