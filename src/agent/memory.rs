//! Per-conversation memory.
//!
//! Turns are keyed by conversation id. Each state keeps the recent chat
//! history plus what the concierge has learned so far (accumulated
//! filters, the current shortlist and the project in focus), so a
//! follow-up like "book it" or "what about 3 bedrooms" resolves against
//! the previous turn.

use crate::intent::IntentFilters;
use crate::llm::ChatMessage;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ConversationState {
    pub id: String,
    /// User and assistant messages only; tool traffic is not kept.
    pub history: Vec<ChatMessage>,
    /// Filters accumulated over the conversation.
    pub filters: IntentFilters,
    pub shortlisted_ids: Vec<i64>,
    pub focus_project_id: Option<i64>,
    pub turns: usize,
}

impl ConversationState {
    pub fn new(id: String) -> Self {
        Self {
            id,
            history: Vec::new(),
            filters: IntentFilters::default(),
            shortlisted_ids: Vec::new(),
            focus_project_id: None,
            turns: 0,
        }
    }

    /// Append one exchange, keeping at most `limit` messages.
    pub fn push_turn(&mut self, user: &str, assistant: &str, limit: usize) {
        self.history.push(ChatMessage::user(user));
        self.history.push(ChatMessage::assistant(assistant));
        self.turns += 1;

        if self.history.len() > limit {
            let excess = self.history.len() - limit;
            self.history.drain(..excess);
        }
    }
}

/// In-process store of conversation states, capped at a fixed number of
/// conversations.
///
/// Each state sits behind its own lock. A turn holds the lock from load to
/// save, so concurrent turns on one conversation run one after another
/// while other conversations proceed. When the cap is exceeded the least
/// recently used idle conversation is dropped; a conversation with a turn
/// in flight is never evicted.
#[derive(Debug)]
pub struct ConversationStore {
    inner: Mutex<StoreInner>,
    max_conversations: usize,
}

#[derive(Debug, Default)]
struct StoreInner {
    entries: HashMap<String, Entry>,
    clock: u64,
}

#[derive(Debug)]
struct Entry {
    state: Arc<Mutex<ConversationState>>,
    last_used: u64,
}

impl StoreInner {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn evict(&mut self, max: usize) {
        while self.entries.len() > max {
            let oldest = self
                .entries
                .iter()
                .filter(|(_, e)| Arc::strong_count(&e.state) == 1)
                .min_by_key(|(_, e)| e.last_used)
                .map(|(id, _)| id.clone());
            match oldest {
                Some(id) => {
                    self.entries.remove(&id);
                    debug!("Evicted conversation {}", id);
                }
                None => break,
            }
        }
    }
}

impl ConversationStore {
    pub fn new(max_conversations: usize) -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            max_conversations: max_conversations.max(1),
        }
    }

    /// Register a fresh conversation and return its id.
    pub async fn create(&self) -> String {
        let id = Uuid::new_v4().to_string();
        let mut inner = self.inner.lock().await;
        let last_used = inner.tick();
        inner.entries.insert(
            id.clone(),
            Entry {
                state: Arc::new(Mutex::new(ConversationState::new(id.clone()))),
                last_used,
            },
        );
        inner.evict(self.max_conversations);
        debug!("Created conversation {}", id);
        id
    }

    /// Lock the state for `id`, registering a fresh one when the id is
    /// unknown. Changes made through the guard are kept; the next checkout
    /// of the same id waits until the guard is dropped.
    pub async fn checkout(&self, id: &str) -> OwnedMutexGuard<ConversationState> {
        let state = {
            let mut inner = self.inner.lock().await;
            let now = inner.tick();
            let entry = inner.entries.entry(id.to_string()).or_insert_with(|| Entry {
                state: Arc::new(Mutex::new(ConversationState::new(id.to_string()))),
                last_used: now,
            });
            entry.last_used = now;
            let state = entry.state.clone();
            inner.evict(self.max_conversations);
            state
        };
        state.lock_owned().await
    }

    /// Number of conversations currently held.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }
}
