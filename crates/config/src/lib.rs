//! Configuration loading, validation, and management for botloom.
//!
//! Loads configuration from `~/.botloom/config.toml` with environment
//! variable overrides. Validates all settings at startup.
//!
//! Overrides come from the process environment first, then from an env file
//! (`~/.botloom/.env`, or the path in `BOTLOOM_ENV_FILE`) holding
//! `KEY=value` lines.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.botloom/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the model provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL of an OpenAI-compatible API
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Model id
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Max tokens per model response
    #[serde(default = "default_max_response_tokens")]
    pub max_response_tokens: u32,

    /// Per model call timeout
    #[serde(default = "default_model_timeout_secs")]
    pub model_timeout_secs: u64,

    /// Deterministic runs: temperature 0, no default plugins, verbose chat
    #[serde(default)]
    pub test_mode: bool,

    #[serde(default)]
    pub agent: AgentSettings,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub tokenizer: TokenizerConfig,

    #[serde(default)]
    pub plugins: PluginsConfig,
}

fn default_api_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_response_tokens() -> u32 {
    1024
}
fn default_model_timeout_secs() -> u64 {
    60
}
fn default_true() -> bool {
    true
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_response_tokens", &self.max_response_tokens)
            .field("model_timeout_secs", &self.model_timeout_secs)
            .field("test_mode", &self.test_mode)
            .field("agent", &self.agent)
            .field("retry", &self.retry)
            .field("cache", &self.cache)
            .field("history", &self.history)
            .field("tokenizer", &self.tokenizer)
            .field("plugins", &self.plugins)
            .finish()
    }
}

/// Orchestration loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_system_instructions")]
    pub system_instructions: String,

    /// Plugin calls allowed per user turn
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Hard ceiling on an assembled prompt
    #[serde(default = "default_max_prompt_tokens")]
    pub max_prompt_tokens: usize,

    /// Turns read from history before budget trimming
    #[serde(default = "default_history_window_turns")]
    pub history_window_turns: usize,

    #[serde(default = "default_plugin_timeout_secs")]
    pub plugin_timeout_secs: u64,

    /// Extra attempts for a failed history append
    #[serde(default = "default_append_retries")]
    pub append_retries: u32,
}

fn default_system_instructions() -> String {
    "You are a helpful assistant. Use a plugin when it helps you answer accurately, \
     then give a concise final answer."
        .into()
}
fn default_max_steps() -> u32 {
    10
}
fn default_max_prompt_tokens() -> usize {
    4096
}
fn default_history_window_turns() -> usize {
    50
}
fn default_plugin_timeout_secs() -> u64 {
    30
}
fn default_append_retries() -> u32 {
    2
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            system_instructions: default_system_instructions(),
            max_steps: default_max_steps(),
            max_prompt_tokens: default_max_prompt_tokens(),
            history_window_turns: default_history_window_turns(),
            plugin_timeout_secs: default_plugin_timeout_secs(),
            append_retries: default_append_retries(),
        }
    }
}

/// Model-call retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}
fn default_initial_backoff_ms() -> u64 {
    500
}
fn default_max_backoff_ms() -> u64 {
    8000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,

    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_cache_capacity() -> usize {
    256
}
fn default_cache_ttl_secs() -> u64 {
    3600
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: default_cache_capacity(),
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

/// Which history backend to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryBackendKind {
    #[default]
    Sqlite,
    File,
    Memory,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default)]
    pub backend: HistoryBackendKind,

    /// Defaults to `history.db` / `history.jsonl` under the config dir
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl HistoryConfig {
    /// The storage path, falling back to the per-backend default.
    pub fn resolved_path(&self) -> PathBuf {
        if let Some(path) = &self.path {
            return path.clone();
        }
        let file = match self.backend {
            HistoryBackendKind::File => "history.jsonl",
            _ => "history.db",
        };
        AppConfig::config_dir().join(file)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenizerKind {
    #[default]
    Heuristic,
    Huggingface,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenizerConfig {
    #[serde(default)]
    pub kind: TokenizerKind,

    /// Path to a pinned `tokenizer.json`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Version label recorded with the pin
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginsConfig {
    /// Plugins to register, in order. Empty means "not chosen".
    #[serde(default)]
    pub enabled: Vec<String>,

    /// Register every built-in plugin when `enabled` is empty
    #[serde(default = "default_true")]
    pub load_defaults: bool,
}

impl PluginsConfig {
    /// Whether the built-in set should be registered.
    pub fn uses_defaults(&self) -> bool {
        self.enabled.is_empty() && self.load_defaults
    }
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            enabled: Vec::new(),
            load_defaults: true,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default location, then apply env overrides.
    ///
    /// Priority: env vars > config file > defaults
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        let env_file = std::env::var("BOTLOOM_ENV_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::config_dir().join(".env"));
        let file_vars = read_env_file(&env_file)?;
        config.apply_env_overrides(|key| {
            std::env::var(key)
                .ok()
                .or_else(|| file_vars.get(key).cloned())
        });
        config.apply_test_mode();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply `BOTLOOM_*` overrides using the given variable lookup.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.api_key.is_none() {
            self.api_key = lookup("BOTLOOM_API_KEY").or_else(|| lookup("OPENAI_API_KEY"));
        }

        if let Some(model) = lookup("BOTLOOM_MODEL") {
            self.model = model;
        }

        if let Some(url) = lookup("BOTLOOM_API_URL") {
            self.api_url = url;
        }

        if let Some(flag) = lookup("BOTLOOM_TEST_MODE") {
            let flag = flag.trim().to_ascii_lowercase();
            self.test_mode = matches!(flag.as_str(), "1" | "true" | "yes");
        }
    }

    /// In test mode, remove sampling variance and the default plugin set.
    pub fn apply_test_mode(&mut self) {
        if !self.test_mode {
            return;
        }
        self.temperature = 0.0;
        self.plugins.load_defaults = false;
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".botloom")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.max_steps == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_steps must be at least 1".into(),
            ));
        }

        if self.agent.max_prompt_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_prompt_tokens must be > 0".into(),
            ));
        }

        if self.cache.enabled && self.cache.capacity == 0 {
            return Err(ConfigError::ValidationError(
                "cache.capacity must be > 0 when the cache is enabled".into(),
            ));
        }

        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(ConfigError::ValidationError(
                "retry.initial_backoff_ms must not exceed retry.max_backoff_ms".into(),
            ));
        }

        if self.tokenizer.kind == TokenizerKind::Huggingface && self.tokenizer.path.is_none() {
            return Err(ConfigError::ValidationError(
                "tokenizer.path is required for the huggingface tokenizer".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for `init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_api_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_response_tokens: default_max_response_tokens(),
            model_timeout_secs: default_model_timeout_secs(),
            test_mode: false,
            agent: AgentSettings::default(),
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
            history: HistoryConfig::default(),
            tokenizer: TokenizerConfig::default(),
            plugins: PluginsConfig::default(),
        }
    }
}

/// Read `KEY=value` lines from an env file. A missing file is empty.
///
/// Blank lines and `#` comments are skipped, a leading `export ` is allowed,
/// and one pair of surrounding quotes is stripped from the value.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(parse_env(&content))
}

fn parse_env(content: &str) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim();
        let value = ['"', '\'']
            .iter()
            .find_map(|q| value.strip_prefix(*q).and_then(|v| v.strip_suffix(*q)))
            .unwrap_or(value);
        vars.insert(key.trim().to_string(), value.to_string());
    }
    vars
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for botloom_core::Error {
    fn from(e: ConfigError) -> Self {
        botloom_core::Error::Config {
            message: e.to_string(),
        }
    }
}
