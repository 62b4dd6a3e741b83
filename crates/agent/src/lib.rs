//! # botloom agent
//!
//! The orchestration loop. A user turn moves through an explicit state
//! machine (`AwaitingModel` ↔ `HandlingPluginCall` → `Done` / `Failed`),
//! with every prompt assembled under a hard token budget and every model
//! response optionally served from a fingerprint-keyed cache.
//!
//! ## Pieces
//!
//! | Module | Role |
//! |--------|------|
//! | [`token`] | Pinned token counting |
//! | [`prompt`] | Budgeted prompt assembly |
//! | [`parse`] | Final answer vs plugin call |
//! | [`cache`] | Response cache with TTL and LRU eviction |
//! | [`retry`] | Model calls with timeout and backoff |
//! | [`machine`] | The per-turn state machine |
//! | [`orchestrator`] | Drives the machine against real collaborators |

pub mod cache;
pub mod machine;
pub mod orchestrator;
pub mod parse;
pub mod prompt;
pub mod retry;
pub mod token;

pub use cache::{CacheStats, Fingerprint, ResponseCache};
pub use machine::{FailureCause, InvalidTransition, TurnEvent, TurnMachine, TurnState};
pub use orchestrator::{Orchestrator, OrchestratorConfig, TurnFailure, TurnOutcome, TurnRequest};
pub use parse::{ModelAction, parse_response};
pub use prompt::{AssembledPrompt, PromptBudget, assemble, system_section};
pub use retry::{RetryPolicy, call_with_retry};
pub use token::{HeuristicCounter, MESSAGE_OVERHEAD, TokenCounter, message_cost};

#[cfg(feature = "hf-tokenizer")]
pub use token::HfTokenizerCounter;
