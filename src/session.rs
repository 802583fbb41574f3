use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::events::{Conversation, Message, derive_title};
use crate::llm::StreamChunk;
use crate::prompts::STREAM_ERROR_TEXT;
use crate::storage::SessionStorage;

/// One user prompt and the assistant placeholder its answer streams into
#[derive(Debug, Clone)]
pub struct Exchange {
    pub conversation_id: String,
    pub message_id: String,
    /// Messages that preceded this exchange
    pub history: Vec<Message>,
    pub user_text: String,
}

/// Owns the conversation list and the active selection.
///
/// Every mutation writes the full list back to storage and bumps a revision
/// counter that views can watch through [`SessionStore::subscribe`].
pub struct SessionStore {
    storage: Box<dyn SessionStorage>,
    sessions: Vec<Conversation>,
    active_id: Option<String>,
    revision: watch::Sender<u64>,
}

impl SessionStore {
    /// Restore the stored list, or start with a single empty conversation
    pub fn load(storage: Box<dyn SessionStorage>) -> Self {
        let (revision, _) = watch::channel(0);
        let mut store = Self {
            storage,
            sessions: Vec::new(),
            active_id: None,
            revision,
        };

        match store.storage.load() {
            Some(sessions) if !sessions.is_empty() => {
                info!(count = sessions.len(), "restored conversations");
                store.active_id = sessions.first().map(|s| s.id.clone());
                store.sessions = sessions;
            }
            _ => {
                store.create_session();
            }
        }

        store
    }

    /// Receiver that changes whenever the store is mutated
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn sessions(&self) -> &[Conversation] {
        &self.sessions
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active_id.as_deref()
    }

    pub fn active(&self) -> Option<&Conversation> {
        self.active_id.as_deref().and_then(|id| self.get(id))
    }

    pub fn get(&self, id: &str) -> Option<&Conversation> {
        self.sessions.iter().find(|s| s.id == id)
    }

    /// Insert a new empty conversation at the front and make it active
    pub fn create_session(&mut self) -> String {
        let conversation = Conversation::new();
        let id = conversation.id.clone();
        self.sessions.insert(0, conversation);
        self.active_id = Some(id.clone());
        debug!(%id, "created conversation");
        self.commit();
        id
    }

    /// Remove a conversation; unknown ids are ignored
    pub fn delete_session(&mut self, id: &str) {
        let Some(index) = self.sessions.iter().position(|s| s.id == id) else {
            return;
        };
        self.sessions.remove(index);
        debug!(%id, "deleted conversation");

        if self.active_id.as_deref() == Some(id) {
            if self.sessions.is_empty() {
                self.sessions.push(Conversation::new());
            }
            self.active_id = self.sessions.first().map(|s| s.id.clone());
        }
        self.commit();
    }

    /// Make `id` active; returns `false` if no such conversation exists
    pub fn select_session(&mut self, id: &str) -> bool {
        if self.get(id).is_none() {
            return false;
        }
        if self.active_id.as_deref() != Some(id) {
            self.active_id = Some(id.to_string());
            self.commit();
        }
        true
    }

    pub fn select_next(&mut self) {
        self.select_offset(1);
    }

    pub fn select_previous(&mut self) {
        self.select_offset(-1);
    }

    fn select_offset(&mut self, delta: isize) {
        let len = self.sessions.len() as isize;
        if len == 0 {
            return;
        }
        let current = self
            .active_id
            .as_deref()
            .and_then(|id| self.sessions.iter().position(|s| s.id == id))
            .unwrap_or(0) as isize;
        let next = (current + delta).rem_euclid(len) as usize;
        let id = self.sessions[next].id.clone();
        self.select_session(&id);
    }

    /// Append `text` and an empty assistant placeholder to the active conversation
    pub fn begin_exchange(&mut self, text: &str) -> Option<Exchange> {
        if text.trim().is_empty() {
            return None;
        }
        let active_id = self.active_id.clone()?;
        let conversation = self.sessions.iter_mut().find(|s| s.id == active_id)?;

        let history = conversation.messages.clone();
        if conversation.is_empty() {
            conversation.title = derive_title(text);
        }

        let placeholder = Message::placeholder();
        let exchange = Exchange {
            conversation_id: active_id,
            message_id: placeholder.id.clone(),
            history,
            user_text: text.to_string(),
        };
        conversation.messages.push(Message::user(text));
        conversation.messages.push(placeholder);
        conversation.touch();

        self.commit();
        Some(exchange)
    }

    /// Overwrite the placeholder with the cumulative text of `chunk`
    pub fn apply_chunk(&mut self, exchange: &Exchange, chunk: &StreamChunk) {
        let Some(message) = self.placeholder_mut(exchange) else {
            return;
        };
        message.content.clone_from(&chunk.text);
        if !chunk.citations.is_empty() {
            message.grounding_links = Some(chunk.citations.clone());
        }
        self.commit();
    }

    /// Mark the placeholder as failed
    pub fn fail_exchange(&mut self, exchange: &Exchange) {
        let Some(message) = self.placeholder_mut(exchange) else {
            return;
        };
        message.content = STREAM_ERROR_TEXT.to_string();
        message.is_error = true;
        self.commit();
    }

    fn placeholder_mut(&mut self, exchange: &Exchange) -> Option<&mut Message> {
        let message = self
            .sessions
            .iter_mut()
            .find(|s| s.id == exchange.conversation_id)
            .and_then(|s| s.message_mut(&exchange.message_id));
        if message.is_none() {
            debug!(
                conversation = %exchange.conversation_id,
                message = %exchange.message_id,
                "exchange target no longer exists"
            );
        }
        message
    }

    fn commit(&mut self) {
        self.revision.send_modify(|rev| *rev += 1);
        if self.sessions.is_empty() {
            return;
        }
        if let Err(e) = self.storage.save(&self.sessions) {
            warn!(error = %e, "failed to persist conversations");
        }
    }
}
