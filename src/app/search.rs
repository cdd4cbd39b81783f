use super::{ChatSession, Message, Task};

impl ChatSession {
    pub(super) fn handle_search(&mut self, message: Message) -> Task {
        match message {
            Message::SearchQueryChanged(query) => {
                if query == self.search_query {
                    return Task::none();
                }
                self.search_query = query;
                self.search_generation += 1;
                let generation = self.search_generation;
                let delay = self.settings.search_debounce;
                return Task::future(async move {
                    tokio::time::sleep(delay).await;
                    Message::SearchDebounced(generation)
                });
            }
            Message::SearchDebounced(generation) => {
                // A later keystroke restarted the wait.
                if generation != self.search_generation {
                    return Task::none();
                }
                self.status_message = if self.search_query.trim().is_empty() {
                    "Loading contacts...".into()
                } else {
                    format!("Searching for \"{}\"...", self.search_query.trim())
                };
                return self.fetch_contacts();
            }

            _ => {}
        }
        Task::none()
    }
}
