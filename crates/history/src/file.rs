//! File-based history backend — append-only JSON lines.
//!
//! Every committed turn is one line in a single JSONL file. The file is
//! read once on open; after that each append writes exactly one line
//! through an `O_APPEND` handle, so existing lines are never rewritten.
//!
//! Storage location: `~/.botloom/history.jsonl` unless configured.

use crate::log::ConversationLogs;
use async_trait::async_trait;
use botloom_core::error::PersistenceError;
use botloom_core::history::{HistoryStore, Window};
use botloom_core::turn::{Conversation, ConversationId, NewTurn, Turn};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, warn};

struct State {
    logs: ConversationLogs,
    /// The file ends in a partial line (torn write); the next append starts a fresh line.
    torn_tail: bool,
}

/// A history store backed by one JSONL file.
pub struct FileHistory {
    path: PathBuf,
    state: Mutex<State>,
}

impl FileHistory {
    /// Open (or lazily create) the history file at `path`.
    ///
    /// Lines that fail to parse are skipped with a warning.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let path = path.into();
        let (logs, torn_tail) = Self::load_from_disk(&path)?;
        debug!(path = %path.display(), turns = logs.turn_count(), "File history loaded");
        Ok(Self {
            path,
            state: Mutex::new(State { logs, torn_tail }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_from_disk(path: &Path) -> Result<(ConversationLogs, bool), PersistenceError> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok((ConversationLogs::default(), false));
            }
            Err(e) => {
                return Err(PersistenceError::Storage(format!(
                    "Failed to read history file {}: {e}",
                    path.display()
                )));
            }
        };

        let mut logs = ConversationLogs::default();
        for (lineno, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Turn>(line) {
                Ok(turn) => {
                    let seq = turn.seq;
                    if !logs.insert(turn) {
                        warn!(line = lineno + 1, seq, "Skipping out-of-order or duplicate turn");
                    }
                }
                Err(e) => {
                    warn!(line = lineno + 1, error = %e, "Skipping corrupted history line");
                }
            }
        }

        let torn_tail = !content.is_empty() && !content.ends_with('\n');
        Ok((logs, torn_tail))
    }

    async fn open_for_append(&self) -> Result<tokio::fs::File, PersistenceError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    PersistenceError::Storage(format!("Failed to create history directory: {e}"))
                })?;
            }
        }

        tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| PersistenceError::Storage(format!("Failed to open history file: {e}")))
    }
}

/// Write one JSON line, starting a fresh line first if the tail is torn.
///
/// `torn_tail` stays set unless the whole line was written: a failed write
/// may have left a fragment behind, and the next line must not join it.
async fn write_line<W: AsyncWrite + Unpin>(
    writer: &mut W,
    torn_tail: &mut bool,
    json: &str,
) -> std::io::Result<()> {
    let mut line = Vec::with_capacity(json.len() + 2);
    if *torn_tail {
        line.push(b'\n');
    }
    line.extend_from_slice(json.as_bytes());
    line.push(b'\n');

    *torn_tail = true;
    writer.write_all(&line).await?;
    writer.flush().await?;
    *torn_tail = false;
    Ok(())
}

#[async_trait]
impl HistoryStore for FileHistory {
    fn name(&self) -> &str {
        "file"
    }

    async fn append(
        &self,
        conversation_id: &ConversationId,
        turn: NewTurn,
    ) -> Result<Turn, PersistenceError> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.logs.find(conversation_id, &turn.idempotency_key) {
            debug!(conversation_id = %conversation_id, seq = existing.seq, "Idempotent append, reusing turn");
            return Ok(existing.clone());
        }

        let committed = state.logs.prepare(conversation_id, turn);
        let json = serde_json::to_string(&committed)
            .map_err(|e| PersistenceError::Storage(format!("Failed to serialize turn: {e}")))?;

        // Only index the turn once the line is on disk.
        let mut file = self.open_for_append().await?;
        write_line(&mut file, &mut state.torn_tail, &json)
            .await
            .map_err(|e| PersistenceError::Storage(format!("Failed to write history file: {e}")))?;
        file.sync_data()
            .await
            .map_err(|e| PersistenceError::Storage(format!("Failed to sync history file: {e}")))?;
        state.logs.insert(committed.clone());
        Ok(committed)
    }

    async fn read_window(
        &self,
        conversation_id: &ConversationId,
        window: Window,
    ) -> Result<Vec<Turn>, PersistenceError> {
        Ok(self.state.lock().await.logs.window(conversation_id, &window))
    }

    async fn conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<Conversation>, PersistenceError> {
        Ok(self.state.lock().await.logs.conversation(conversation_id))
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationId>, PersistenceError> {
        Ok(self.state.lock().await.logs.ids())
    }
}
