//! # botloom core
//!
//! Domain types, traits, and error definitions for the botloom bot
//! orchestration library. This crate has **no I/O of its own**; it defines
//! the domain model that all other crates implement against.
//!
//! ## Layout
//!
//! Every collaborator of the orchestration loop is a trait here:
//! [`Provider`] for models, [`Plugin`] for capabilities, [`HistoryStore`]
//! for durable turns. Implementations live in their own crates and all of
//! them depend inward on this one.

pub mod error;
pub mod turn;
pub mod provider;
pub mod plugin;
pub mod schema;
pub mod history;
pub mod event;

// Re-export key types at crate root for ergonomics
pub use error::{
    BudgetError, Error, PersistenceError, PluginError, ProviderError, Result, TokenizationError,
};
pub use turn::{Conversation, ConversationId, NewTurn, PluginCallRecord, Role, Turn};
pub use provider::{
    ModelRequest, ModelResponse, PromptMessage, Provider, RequestedPluginCall, SamplingParams, Usage,
};
pub use plugin::{Plugin, PluginDescriptor, PluginFailure, PluginRegistry, PluginRegistryBuilder};
pub use history::{HistoryStore, Window, WindowLimit, WindowOrder, select_window};
pub use event::{DomainEvent, EventBus};
