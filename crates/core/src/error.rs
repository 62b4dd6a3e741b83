//! Error types for the botloom domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error type; [`Error`] is what a
//! failed user turn surfaces to its caller.

use thiserror::Error;

/// The top-level error type for all botloom operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Token counting ---
    #[error("Tokenization error: {0}")]
    Tokenization(#[from] TokenizationError),

    // --- Plugin errors ---
    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    // --- Prompt budget ---
    #[error("Budget exceeded: {0}")]
    BudgetExceeded(#[from] BudgetError),

    // --- History persistence ---
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    // --- Model transport, after retries ---
    #[error("Model unavailable after {attempts} attempt(s): {last_error}")]
    ModelUnavailable {
        attempts: u32,
        last_error: ProviderError,
    },

    // --- Loop guard ---
    #[error("Step limit exceeded: more than {limit} plugin call(s) in one turn")]
    StepLimitExceeded { limit: u32 },

    #[error("Turn cancelled")]
    Cancelled,

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Errors returned by a model provider.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),
}

impl ProviderError {
    /// Transient failures worth retrying with backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) | Self::RateLimited { .. } => true,
            Self::ApiError { status_code, .. } => *status_code >= 500,
            Self::AuthenticationFailed(_) | Self::NotConfigured(_) | Self::MalformedResponse(_) => {
                false
            }
        }
    }
}

/// Errors raised by the plugin registry.
///
/// Every variant carries the plugin name so a failure is never unlabeled.
#[derive(Debug, Clone, Error)]
pub enum PluginError {
    #[error("Unknown plugin: {0}")]
    Unknown(String),

    #[error("Invalid arguments for {plugin}: {reason}")]
    InvalidArguments { plugin: String, reason: String },

    #[error("Plugin execution failed: {plugin}: {reason}")]
    Execution { plugin: String, reason: String },

    #[error("Plugin timed out: {plugin} after {timeout_secs}s")]
    Timeout { plugin: String, timeout_secs: u64 },
}

impl PluginError {
    /// The plugin this error belongs to.
    pub fn plugin(&self) -> &str {
        match self {
            Self::Unknown(name) => name,
            Self::InvalidArguments { plugin, .. }
            | Self::Execution { plugin, .. }
            | Self::Timeout { plugin, .. } => plugin,
        }
    }
}

/// The input could not be tokenized.
#[derive(Debug, Clone, Error)]
#[error("tokenizer {tokenizer} could not encode input: {reason}")]
pub struct TokenizationError {
    pub tokenizer: String,
    pub reason: String,
}

/// Fixed prompt sections alone do not fit the budget.
#[derive(Debug, Clone, Error)]
pub enum BudgetError {
    #[error(
        "system instructions and plugin descriptions need {reserved} tokens, budget is {max}"
    )]
    ReservedExceedsMax { reserved: usize, max: usize },

    #[error("newest turn needs {needed} tokens, only {remaining} remain after reserved sections")]
    NoRoomForHistory { needed: usize, remaining: usize },
}

/// History storage failures.
#[derive(Debug, Clone, Error)]
pub enum PersistenceError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}
