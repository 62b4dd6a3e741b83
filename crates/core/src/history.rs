//! History trait — the durable, append-only log of conversation turns.
//!
//! Backends: in-memory (for testing), JSONL file, SQLite.
//! All of them share [`select_window`] so windowed reads agree exactly.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::error::PersistenceError;
use crate::turn::{Conversation, ConversationId, NewTurn, Turn};

/// How many turns a windowed read returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowLimit {
    /// The whole log
    #[default]
    All,
    /// At most this many of the newest turns
    MaxTurns(usize),
    /// Newest turns whose cached costs sum to at most this
    MaxTokens(usize),
}

/// Order of the returned turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowOrder {
    #[default]
    Chronological,
    NewestFirst,
}

/// A windowed read request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Window {
    #[serde(default)]
    pub limit: WindowLimit,
    #[serde(default)]
    pub order: WindowOrder,
}

impl Window {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn last_turns(n: usize) -> Self {
        Self {
            limit: WindowLimit::MaxTurns(n),
            order: WindowOrder::Chronological,
        }
    }

    pub fn max_tokens(n: usize) -> Self {
        Self {
            limit: WindowLimit::MaxTokens(n),
            order: WindowOrder::Chronological,
        }
    }

    pub fn newest_first(mut self) -> Self {
        self.order = WindowOrder::NewestFirst;
        self
    }
}

/// Select a contiguous newest suffix of `turns` (which must be chronological).
pub fn select_window(turns: &[Turn], window: &Window) -> Vec<Turn> {
    let keep = match window.limit {
        WindowLimit::All => turns.len(),
        WindowLimit::MaxTurns(n) => n.min(turns.len()),
        WindowLimit::MaxTokens(max) => {
            let mut used = 0usize;
            let mut kept = 0usize;
            for turn in turns.iter().rev() {
                if used + turn.token_cost > max {
                    break;
                }
                used += turn.token_cost;
                kept += 1;
            }
            kept
        }
    };

    let suffix = &turns[turns.len() - keep..];
    match window.order {
        WindowOrder::Chronological => suffix.to_vec(),
        WindowOrder::NewestFirst => suffix.iter().rev().cloned().collect(),
    }
}

/// The core HistoryStore trait.
///
/// Implementations: in-memory, JSONL file, SQLite.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// The backend name (e.g., "sqlite", "file", "memory").
    fn name(&self) -> &str;

    /// Commit a turn, assigning its order index and timestamp.
    ///
    /// Appending the same idempotency key twice returns the turn committed
    /// the first time and writes nothing.
    async fn append(
        &self,
        conversation_id: &ConversationId,
        turn: NewTurn,
    ) -> std::result::Result<Turn, PersistenceError>;

    /// A contiguous suffix of the log. Unknown conversations read as empty.
    async fn read_window(
        &self,
        conversation_id: &ConversationId,
        window: Window,
    ) -> std::result::Result<Vec<Turn>, PersistenceError>;

    /// The full conversation, if it exists.
    async fn conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> std::result::Result<Option<Conversation>, PersistenceError>;

    /// All known conversation ids, oldest first.
    async fn list_conversations(&self) -> std::result::Result<Vec<ConversationId>, PersistenceError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::turn::Role;

    fn log(costs: &[usize]) -> Vec<Turn> {
        let id = ConversationId::from("c1");
        costs
            .iter()
            .enumerate()
            .map(|(i, &cost)| {
                NewTurn::new(Role::User, format!("turn {i}"), cost, format!("k{i}"))
                    .commit(id.clone(), i as u64)
            })
            .collect()
    }

    fn seqs(turns: &[Turn]) -> Vec<u64> {
        turns.iter().map(|t| t.seq).collect()
    }

    #[test]
    fn all_returns_everything() {
        let turns = log(&[1, 2, 3]);
        assert_eq!(seqs(&select_window(&turns, &Window::all())), vec![0, 1, 2]);
    }

    #[test]
    fn max_turns_keeps_newest() {
        let turns = log(&[1, 2, 3, 4]);
        assert_eq!(seqs(&select_window(&turns, &Window::last_turns(2))), vec![2, 3]);
        assert_eq!(seqs(&select_window(&turns, &Window::last_turns(10))), vec![0, 1, 2, 3]);
        assert!(select_window(&turns, &Window::last_turns(0)).is_empty());
    }

    #[test]
    fn max_tokens_stops_at_first_misfit() {
        // Turn 1 is too big, so turn 0 is dropped even though it would fit.
        let turns = log(&[1, 50, 5, 5]);
        assert_eq!(seqs(&select_window(&turns, &Window::max_tokens(12))), vec![2, 3]);
    }

    #[test]
    fn newest_first_reverses() {
        let turns = log(&[1, 1, 1]);
        let window = Window::last_turns(2).newest_first();
        assert_eq!(seqs(&select_window(&turns, &window)), vec![2, 1]);
    }

    #[test]
    fn empty_log() {
        assert!(select_window(&[], &Window::max_tokens(100)).is_empty());
    }

    #[test]
    fn window_serialization() {
        let json = serde_json::to_string(&Window::last_turns(3)).unwrap();
        assert!(json.contains("max_turns"));
    }
}
