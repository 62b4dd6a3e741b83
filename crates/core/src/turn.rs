//! Turn and Conversation domain types.
//!
//! A conversation is an append-only log of turns. The orchestrator builds a
//! [`NewTurn`], the history store commits it and hands back a [`Turn`] with
//! its order index and timestamp filled in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The end user
    User,
    /// The bot's reply
    Assistant,
    /// Result of a plugin invocation, fed back to the model
    PluginObservation,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::PluginObservation => "plugin_observation",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "plugin_observation" => Ok(Self::PluginObservation),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Metadata for a plugin call attached to an observation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginCallRecord {
    /// Registered plugin name
    pub plugin: String,

    /// Arguments the model supplied
    pub arguments: serde_json::Value,

    /// Raw plugin output, or the failure description
    pub result: String,

    /// Whether the invocation succeeded
    pub success: bool,
}

/// A turn that has not been committed yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTurn {
    pub role: Role,

    /// Text exactly as it appears in a prompt
    pub content: String,

    /// Token cost, computed once by the caller
    pub token_cost: usize,

    /// Client-supplied key; re-appending the same key is a no-op
    pub idempotency_key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_call: Option<PluginCallRecord>,
}

impl NewTurn {
    pub fn new(
        role: Role,
        content: impl Into<String>,
        token_cost: usize,
        idempotency_key: impl Into<String>,
    ) -> Self {
        Self {
            role,
            content: content.into(),
            token_cost,
            idempotency_key: idempotency_key.into(),
            plugin_call: None,
        }
    }

    pub fn with_plugin_call(mut self, call: PluginCallRecord) -> Self {
        self.plugin_call = Some(call);
        self
    }

    /// Stamp this turn with its position in the log.
    pub fn commit(self, conversation_id: ConversationId, seq: u64) -> Turn {
        Turn {
            conversation_id,
            seq,
            role: self.role,
            content: self.content,
            token_cost: self.token_cost,
            timestamp: Utc::now(),
            idempotency_key: self.idempotency_key,
            plugin_call: self.plugin_call,
        }
    }
}

/// A committed turn. Never edited in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub conversation_id: ConversationId,

    /// 0-based order index within the conversation
    pub seq: u64,

    pub role: Role,

    pub content: String,

    /// Cached at write time
    pub token_cost: usize,

    pub timestamp: DateTime<Utc>,

    pub idempotency_key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_call: Option<PluginCallRecord>,
}

/// A conversation and its full ordered log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,

    pub created_at: DateTime<Utc>,

    /// Ordered by `seq`
    pub turns: Vec<Turn>,
}

impl Conversation {
    pub fn new(id: ConversationId) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            turns: Vec::new(),
        }
    }

    /// Sum of cached token costs.
    pub fn total_tokens(&self) -> usize {
        self.turns.iter().map(|t| t.token_cost).sum()
    }

    pub fn last_turn(&self) -> Option<&Turn> {
        self.turns.last()
    }
}
