use super::{ChatSession, Message, Task};

impl ChatSession {
    pub(super) fn handle_sync(&mut self, message: Message) -> Task {
        match message {
            Message::Tick => {
                return Task::batch([self.fetch_unread(), self.refresh_conversation()]);
            }
            Message::Refresh => {
                return Task::batch([
                    self.fetch_contacts(),
                    self.fetch_unread(),
                    self.refresh_conversation(),
                ]);
            }

            Message::ContactsLoaded { generation, result } => {
                if generation != self.contacts_generation {
                    log::debug!("Discarding stale contact list (generation {generation})");
                    return Task::none();
                }
                match result {
                    Ok(contacts) => {
                        self.contacts = contacts.into_iter().map(|c| (c.user_id, c)).collect();
                        self.status_message = match self.contacts.len() {
                            0 => "No contacts".into(),
                            1 => "1 contact".into(),
                            n => format!("{n} contacts"),
                        };
                    }
                    Err(e) => {
                        log::warn!("Failed to load contacts: {e}");
                        self.status_message = e.user_message();
                    }
                }
            }

            Message::UnreadLoaded { generation, result } => {
                if generation != self.unread_generation {
                    return Task::none();
                }
                match result {
                    Ok(count) => self.unread_total = count,
                    // Retried on the next tick.
                    Err(e) => log::warn!("Unread count poll failed: {e}"),
                }
            }

            Message::ConversationLoaded {
                generation,
                seq,
                result,
            } => {
                if generation != self.conversation_generation {
                    log::debug!("Discarding stale conversation (generation {generation})");
                    return Task::none();
                }
                if seq <= self.conversation_applied {
                    log::debug!("Discarding overtaken conversation snapshot (request {seq})");
                    return Task::none();
                }
                self.conversation_applied = seq;
                let Some(open) = self.conversation.as_mut() else {
                    return Task::none();
                };
                let first_load = open.loading;
                match result {
                    Ok(conversation) => {
                        let added = conversation
                            .messages
                            .iter()
                            .filter(|m| !open.contains(m.id))
                            .count();

                        open.thread_id = conversation.thread_id;
                        open.messages = conversation.messages;
                        open.loading = false;

                        let contact = conversation.contact;
                        if let Some(listed) = self.contacts.get_mut(&contact.user_id) {
                            listed.thread_id = contact.thread_id;
                            listed.unread = 0;
                        }
                        open.contact = Some(contact);

                        if first_load {
                            self.scroll.reset();
                        } else {
                            self.scroll
                                .on_new_messages(added, self.settings.scroll_threshold);
                        }

                        // Opening marks messages read; the badge catches up now
                        // rather than on the next tick.
                        if first_load || added > 0 {
                            return self.fetch_unread();
                        }
                    }
                    Err(e) if first_load => {
                        log::warn!("Failed to open conversation: {e}");
                        self.status_message = e.user_message();
                        self.conversation = None;
                    }
                    // Refresh failures keep what is on screen and retry next tick.
                    Err(e) => log::warn!("Conversation refresh failed: {e}"),
                }
            }

            _ => {}
        }
        Task::none()
    }

    pub(super) fn fetch_contacts(&mut self) -> Task {
        self.contacts_generation += 1;
        let generation = self.contacts_generation;
        let backend = self.backend.clone();
        let query = self.search_query.trim().to_string();
        Task::future(async move {
            Message::ContactsLoaded {
                generation,
                result: backend.list_contacts(&query).await,
            }
        })
    }

    pub(super) fn fetch_unread(&mut self) -> Task {
        self.unread_generation += 1;
        let generation = self.unread_generation;
        let backend = self.backend.clone();
        Task::future(async move {
            Message::UnreadLoaded {
                generation,
                result: backend.unread_count().await,
            }
        })
    }

    /// Refetch the open conversation, if any. Keeps the current generation
    /// so the response is still accepted unless the viewer navigated away,
    /// but numbers the request so an older snapshot never replaces a newer one.
    pub(super) fn refresh_conversation(&mut self) -> Task {
        let Some(open) = &self.conversation else {
            return Task::none();
        };
        let target = open.current_target();
        self.conversation_seq += 1;
        let seq = self.conversation_seq;
        let generation = self.conversation_generation;
        let backend = self.backend.clone();
        Task::future(async move {
            Message::ConversationLoaded {
                generation,
                seq,
                result: backend.fetch_messages(target).await,
            }
        })
    }
}
