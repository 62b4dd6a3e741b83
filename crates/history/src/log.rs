//! In-process index of conversation logs, shared by the memory and file backends.

use botloom_core::history::{Window, select_window};
use botloom_core::turn::{Conversation, ConversationId, NewTurn, Turn};
use std::collections::HashMap;

struct Entry {
    conversation: Conversation,
    /// idempotency key -> seq
    keys: HashMap<String, u64>,
}

#[derive(Default)]
pub(crate) struct ConversationLogs {
    /// Conversation ids in creation order
    order: Vec<ConversationId>,
    entries: HashMap<ConversationId, Entry>,
}

impl ConversationLogs {
    /// The turn already committed under `key`, if any.
    pub fn find(&self, id: &ConversationId, key: &str) -> Option<&Turn> {
        let entry = self.entries.get(id)?;
        let seq = *entry.keys.get(key)?;
        entry.conversation.turns.get(seq as usize)
    }

    /// Stamp `turn` with the next sequence number without storing it.
    pub fn prepare(&self, id: &ConversationId, turn: NewTurn) -> Turn {
        let seq = self
            .entries
            .get(id)
            .map(|e| e.conversation.turns.len() as u64)
            .unwrap_or(0);
        turn.commit(id.clone(), seq)
    }

    /// Store a committed turn. Returns false when its seq or key is already taken.
    pub fn insert(&mut self, turn: Turn) -> bool {
        let id = turn.conversation_id.clone();
        let next_seq = self
            .entries
            .get(&id)
            .map(|e| e.conversation.turns.len() as u64)
            .unwrap_or(0);
        if turn.seq != next_seq || self.find(&id, &turn.idempotency_key).is_some() {
            return false;
        }

        if !self.entries.contains_key(&id) {
            let mut conversation = Conversation::new(id.clone());
            conversation.created_at = turn.timestamp;
            self.order.push(id.clone());
            self.entries.insert(
                id.clone(),
                Entry {
                    conversation,
                    keys: HashMap::new(),
                },
            );
        }
        let Some(entry) = self.entries.get_mut(&id) else {
            return false;
        };
        entry.keys.insert(turn.idempotency_key.clone(), turn.seq);
        entry.conversation.turns.push(turn);
        true
    }

    pub fn window(&self, id: &ConversationId, window: &Window) -> Vec<Turn> {
        self.entries
            .get(id)
            .map(|e| select_window(&e.conversation.turns, window))
            .unwrap_or_default()
    }

    pub fn conversation(&self, id: &ConversationId) -> Option<Conversation> {
        self.entries.get(id).map(|e| e.conversation.clone())
    }

    pub fn ids(&self) -> Vec<ConversationId> {
        self.order.clone()
    }

    pub fn turn_count(&self) -> usize {
        self.entries.values().map(|e| e.conversation.turns.len()).sum()
    }
}
