//! SQLite history backend.
//!
//! Uses a single SQLite database file with two tables:
//! - `conversations` — one row per conversation, with its creation time
//! - `turns` — the append-only log, unique on `(conversation_id, seq)` and
//!   on `(conversation_id, idempotency_key)`
//!
//! Each append is one transaction: reuse the turn already stored under the
//! idempotency key, or insert at `max(seq) + 1`.

use async_trait::async_trait;
use botloom_core::error::PersistenceError;
use botloom_core::history::{HistoryStore, Window, WindowLimit, select_window};
use botloom_core::turn::{Conversation, ConversationId, NewTurn, PluginCallRecord, Role, Turn};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// A durable SQLite history store.
pub struct SqliteHistory {
    pool: SqlitePool,
    /// Serializes appends within this process so transactions never race on upgrade.
    write_lock: Mutex<()>,
}

impl SqliteHistory {
    /// Open a SQLite history database from a file path.
    ///
    /// The database and all tables/indexes are created automatically.
    /// Pass `":memory:"` for an in-process ephemeral database (useful for tests).
    pub async fn new(path: &str) -> Result<Self, PersistenceError> {
        let in_memory = path == ":memory:" || path.starts_with("sqlite::memory:");
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| PersistenceError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .pragma("foreign_keys", "ON");

        // An in-memory database lives only as long as its connection.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(4)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| PersistenceError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self::from_pool(pool).await?;
        info!("SQLite history initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, PersistenceError> {
        let store = Self {
            pool,
            write_lock: Mutex::new(()),
        };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create tables and indexes.
    async fn run_migrations(&self) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                iid          INTEGER PRIMARY KEY AUTOINCREMENT,
                id           TEXT UNIQUE NOT NULL,
                created_at   TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| PersistenceError::MigrationFailed(format!("conversations table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS turns (
                conversation_id  TEXT NOT NULL REFERENCES conversations(id),
                seq              INTEGER NOT NULL,
                role             TEXT NOT NULL,
                content          TEXT NOT NULL,
                token_cost       INTEGER NOT NULL,
                timestamp        TEXT NOT NULL,
                idempotency_key  TEXT NOT NULL,
                plugin_call      TEXT,
                UNIQUE (conversation_id, seq),
                UNIQUE (conversation_id, idempotency_key)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| PersistenceError::MigrationFailed(format!("turns table: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    /// Parse a `Turn` from a SQLite row.
    fn row_to_turn(row: &sqlx::sqlite::SqliteRow) -> Result<Turn, PersistenceError> {
        let conversation_id: String = row
            .try_get("conversation_id")
            .map_err(|e| PersistenceError::QueryFailed(format!("conversation_id column: {e}")))?;
        let seq: i64 = row
            .try_get("seq")
            .map_err(|e| PersistenceError::QueryFailed(format!("seq column: {e}")))?;
        let role: String = row
            .try_get("role")
            .map_err(|e| PersistenceError::QueryFailed(format!("role column: {e}")))?;
        let content: String = row
            .try_get("content")
            .map_err(|e| PersistenceError::QueryFailed(format!("content column: {e}")))?;
        let token_cost: i64 = row
            .try_get("token_cost")
            .map_err(|e| PersistenceError::QueryFailed(format!("token_cost column: {e}")))?;
        let timestamp: String = row
            .try_get("timestamp")
            .map_err(|e| PersistenceError::QueryFailed(format!("timestamp column: {e}")))?;
        let idempotency_key: String = row
            .try_get("idempotency_key")
            .map_err(|e| PersistenceError::QueryFailed(format!("idempotency_key column: {e}")))?;
        let plugin_call: Option<String> = row
            .try_get("plugin_call")
            .map_err(|e| PersistenceError::QueryFailed(format!("plugin_call column: {e}")))?;

        let role = Role::from_str(&role).map_err(PersistenceError::Corrupt)?;
        let plugin_call = plugin_call
            .map(|json| serde_json::from_str::<PluginCallRecord>(&json))
            .transpose()
            .map_err(|e| PersistenceError::Corrupt(format!("plugin_call: {e}")))?;

        Ok(Turn {
            conversation_id: ConversationId(conversation_id),
            seq: seq as u64,
            role,
            content,
            token_cost: token_cost as usize,
            timestamp: parse_timestamp(&timestamp)?,
            idempotency_key,
            plugin_call,
        })
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, PersistenceError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| PersistenceError::Corrupt(format!("timestamp {s:?}: {e}")))
}

const SELECT_TURN: &str = "SELECT conversation_id, seq, role, content, token_cost, timestamp, \
                           idempotency_key, plugin_call FROM turns";

#[async_trait]
impl HistoryStore for SqliteHistory {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn append(
        &self,
        conversation_id: &ConversationId,
        turn: NewTurn,
    ) -> Result<Turn, PersistenceError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| PersistenceError::Storage(format!("BEGIN failed: {e}")))?;

        let existing = sqlx::query(&format!(
            "{SELECT_TURN} WHERE conversation_id = ?1 AND idempotency_key = ?2"
        ))
        .bind(conversation_id.as_str())
        .bind(&turn.idempotency_key)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| PersistenceError::QueryFailed(format!("Key lookup: {e}")))?;

        if let Some(row) = existing {
            let turn = Self::row_to_turn(&row)?;
            tx.rollback()
                .await
                .map_err(|e| PersistenceError::Storage(format!("ROLLBACK failed: {e}")))?;
            debug!(conversation_id = %conversation_id, seq = turn.seq, "Idempotent append, reusing turn");
            return Ok(turn);
        }

        let next_seq: i64 = sqlx::query(
            "SELECT COALESCE(MAX(seq) + 1, 0) AS next_seq FROM turns WHERE conversation_id = ?1",
        )
        .bind(conversation_id.as_str())
        .fetch_one(&mut *tx)
        .await
        .and_then(|row| row.try_get("next_seq"))
        .map_err(|e| PersistenceError::QueryFailed(format!("Next seq: {e}")))?;

        let committed = turn.commit(conversation_id.clone(), next_seq as u64);
        let timestamp = committed.timestamp.to_rfc3339();

        sqlx::query("INSERT OR IGNORE INTO conversations (id, created_at) VALUES (?1, ?2)")
            .bind(conversation_id.as_str())
            .bind(&timestamp)
            .execute(&mut *tx)
            .await
            .map_err(|e| PersistenceError::Storage(format!("INSERT conversation failed: {e}")))?;

        let plugin_call = committed
            .plugin_call
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| PersistenceError::Storage(format!("plugin_call serialization: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO turns (conversation_id, seq, role, content, token_cost, timestamp, idempotency_key, plugin_call)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(conversation_id.as_str())
        .bind(next_seq)
        .bind(committed.role.as_str())
        .bind(&committed.content)
        .bind(committed.token_cost as i64)
        .bind(&timestamp)
        .bind(&committed.idempotency_key)
        .bind(plugin_call.as_deref())
        .execute(&mut *tx)
        .await
        .map_err(|e| PersistenceError::Storage(format!("INSERT turn failed: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| PersistenceError::Storage(format!("COMMIT failed: {e}")))?;

        debug!(conversation_id = %conversation_id, seq = committed.seq, role = %committed.role, "Appended turn");
        Ok(committed)
    }

    async fn read_window(
        &self,
        conversation_id: &ConversationId,
        window: Window,
    ) -> Result<Vec<Turn>, PersistenceError> {
        let rows = match window.limit {
            WindowLimit::MaxTurns(n) => sqlx::query(&format!(
                "SELECT * FROM ({SELECT_TURN} WHERE conversation_id = ?1 ORDER BY seq DESC LIMIT ?2) \
                 ORDER BY seq ASC"
            ))
            .bind(conversation_id.as_str())
            .bind(n as i64)
            .fetch_all(&self.pool)
            .await,
            WindowLimit::All | WindowLimit::MaxTokens(_) => sqlx::query(&format!(
                "{SELECT_TURN} WHERE conversation_id = ?1 ORDER BY seq ASC"
            ))
            .bind(conversation_id.as_str())
            .fetch_all(&self.pool)
            .await,
        }
        .map_err(|e| PersistenceError::QueryFailed(format!("Window read: {e}")))?;

        let turns = rows.iter().map(Self::row_to_turn).collect::<Result<Vec<_>, _>>()?;
        Ok(select_window(&turns, &window))
    }

    async fn conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<Conversation>, PersistenceError> {
        let row = sqlx::query("SELECT created_at FROM conversations WHERE id = ?1")
            .bind(conversation_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PersistenceError::QueryFailed(format!("Conversation lookup: {e}")))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let created_at: String = row
            .try_get("created_at")
            .map_err(|e| PersistenceError::QueryFailed(format!("created_at column: {e}")))?;

        let turns = self.read_window(conversation_id, Window::all()).await?;
        Ok(Some(Conversation {
            id: conversation_id.clone(),
            created_at: parse_timestamp(&created_at)?,
            turns,
        }))
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationId>, PersistenceError> {
        let rows = sqlx::query("SELECT id FROM conversations ORDER BY iid ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| PersistenceError::QueryFailed(format!("List conversations: {e}")))?;

        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("id")
                    .map(ConversationId)
                    .map_err(|e| PersistenceError::QueryFailed(format!("id column: {e}")))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> SqliteHistory {
        SqliteHistory::new(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn append_and_read_back() {
        let store = test_store().await;
        let id = ConversationId::from("c1");
        store.append(&id, NewTurn::new(Role::User, "Who was the 3rd president?", 9, "r1:user")).await.unwrap();
        let obs = NewTurn::new(Role::PluginObservation, "encyclopedia returned: Thomas Jefferson", 12, "r1:step1:observation")
            .with_plugin_call(PluginCallRecord {
                plugin: "encyclopedia".into(),
                arguments: serde_json::json!({"topic": "3rd president"}),
                result: "Thomas Jefferson".into(),
                success: true,
            });
        store.append(&id, obs).await.unwrap();

        let turns = store.read_window(&id, Window::all()).await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].role, Role::PluginObservation);
        assert_eq!(turns[1].plugin_call.as_ref().map(|c| c.plugin.as_str()), Some("encyclopedia"));
        assert_eq!(turns[1].token_cost, 12);
    }

    #[tokio::test]
    async fn idempotent_append() {
        let store = test_store().await;
        let id = ConversationId::from("c1");
        let first = store.append(&id, NewTurn::new(Role::User, "hi", 3, "k")).await.unwrap();
        let second = store.append(&id, NewTurn::new(Role::User, "hi", 3, "k")).await.unwrap();
        assert_eq!(first.seq, second.seq);
        assert_eq!(first.timestamp, second.timestamp);
        assert_eq!(store.read_window(&id, Window::all()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn max_turns_window_is_newest_suffix() {
        let store = test_store().await;
        let id = ConversationId::from("c1");
        for i in 0..5 {
            store.append(&id, NewTurn::new(Role::User, format!("m{i}"), 1, format!("k{i}"))).await.unwrap();
        }
        let turns = store.read_window(&id, Window::last_turns(2)).await.unwrap();
        assert_eq!(turns.iter().map(|t| t.seq).collect::<Vec<_>>(), vec![3, 4]);

        let newest = store.read_window(&id, Window::last_turns(2).newest_first()).await.unwrap();
        assert_eq!(newest.iter().map(|t| t.seq).collect::<Vec<_>>(), vec![4, 3]);
    }

    #[tokio::test]
    async fn conversation_and_listing() {
        let store = test_store().await;
        let a = ConversationId::from("a");
        let b = ConversationId::from("b");
        store.append(&a, NewTurn::new(Role::User, "x", 1, "k")).await.unwrap();
        store.append(&b, NewTurn::new(Role::User, "y", 1, "k")).await.unwrap();

        assert_eq!(store.list_conversations().await.unwrap(), vec![a.clone(), b]);
        let conv = store.conversation(&a).await.unwrap().unwrap();
        assert_eq!(conv.turns.len(), 1);
        assert!(store.conversation(&ConversationId::from("zzz")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn persists_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.db");
        let path = path.to_string_lossy().to_string();
        let id = ConversationId::from("c1");
        {
            let store = SqliteHistory::new(&path).await.unwrap();
            store.append(&id, NewTurn::new(Role::User, "hello", 3, "k0")).await.unwrap();
            store.pool.close().await;
        }
        let store = SqliteHistory::new(&path).await.unwrap();
        let turns = store.read_window(&id, Window::all()).await.unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].content, "hello");
    }
}
