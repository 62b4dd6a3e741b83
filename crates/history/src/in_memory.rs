//! In-memory backend — useful for testing and ephemeral bots.

use crate::log::ConversationLogs;
use async_trait::async_trait;
use botloom_core::error::PersistenceError;
use botloom_core::history::{HistoryStore, Window};
use botloom_core::turn::{Conversation, ConversationId, NewTurn, Turn};
use std::sync::Arc;
use tokio::sync::RwLock;

/// A history store that keeps every conversation in process memory.
pub struct InMemoryHistory {
    logs: Arc<RwLock<ConversationLogs>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self {
            logs: Arc::new(RwLock::new(ConversationLogs::default())),
        }
    }
}

impl Default for InMemoryHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistory {
    fn name(&self) -> &str { "memory" }

    async fn append(
        &self,
        conversation_id: &ConversationId,
        turn: NewTurn,
    ) -> Result<Turn, PersistenceError> {
        let mut logs = self.logs.write().await;
        if let Some(existing) = logs.find(conversation_id, &turn.idempotency_key) {
            return Ok(existing.clone());
        }
        let committed = logs.prepare(conversation_id, turn);
        if !logs.insert(committed.clone()) {
            return Err(PersistenceError::Storage(format!(
                "sequence {} already taken in {conversation_id}",
                committed.seq
            )));
        }
        Ok(committed)
    }

    async fn read_window(
        &self,
        conversation_id: &ConversationId,
        window: Window,
    ) -> Result<Vec<Turn>, PersistenceError> {
        Ok(self.logs.read().await.window(conversation_id, &window))
    }

    async fn conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<Conversation>, PersistenceError> {
        Ok(self.logs.read().await.conversation(conversation_id))
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationId>, PersistenceError> {
        Ok(self.logs.read().await.ids())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use botloom_core::turn::Role;

    #[tokio::test]
    async fn append_assigns_sequence() {
        let store = InMemoryHistory::new();
        let id = ConversationId::from("c1");
        let first = store.append(&id, NewTurn::new(Role::User, "hi", 5, "k1")).await.unwrap();
        let second = store.append(&id, NewTurn::new(Role::Assistant, "hello", 6, "k2")).await.unwrap();
        assert_eq!(first.seq, 0);
        assert_eq!(second.seq, 1);
    }

    #[tokio::test]
    async fn same_key_commits_once() {
        let store = InMemoryHistory::new();
        let id = ConversationId::from("c1");
        let first = store.append(&id, NewTurn::new(Role::User, "hi", 5, "k1")).await.unwrap();
        let again = store.append(&id, NewTurn::new(Role::User, "hi", 5, "k1")).await.unwrap();
        assert_eq!(first, again);
        assert_eq!(store.read_window(&id, Window::all()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn keys_are_scoped_per_conversation() {
        let store = InMemoryHistory::new();
        let a = ConversationId::from("a");
        let b = ConversationId::from("b");
        store.append(&a, NewTurn::new(Role::User, "x", 1, "k")).await.unwrap();
        let in_b = store.append(&b, NewTurn::new(Role::User, "y", 1, "k")).await.unwrap();
        assert_eq!(in_b.seq, 0);
        assert_eq!(in_b.content, "y");
        assert_eq!(store.list_conversations().await.unwrap(), vec![a, b]);
    }

    #[tokio::test]
    async fn unknown_conversation_reads_empty() {
        let store = InMemoryHistory::new();
        let id = ConversationId::from("nope");
        assert!(store.read_window(&id, Window::all()).await.unwrap().is_empty());
        assert!(store.conversation(&id).await.unwrap().is_none());
    }
}
