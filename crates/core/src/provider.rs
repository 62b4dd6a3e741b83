//! Provider trait — the abstraction over LLM backends.
//!
//! A Provider takes an assembled prompt plus sampling parameters and returns
//! the model's raw response. Deciding whether that response is a final
//! answer or a plugin call is the orchestrator's job, not the provider's.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::error::ProviderError;
use crate::plugin::PluginDescriptor;
use crate::turn::Role;

/// Sampling parameters. Part of the response-cache fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    /// Temperature (0.0 = deterministic, 2.0 = very creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Nucleus sampling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Stop sequences
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

fn default_temperature() -> f32 {
    0.7
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_tokens: None,
            top_p: None,
            stop: Vec::new(),
        }
    }
}

/// One message of an assembled prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

/// A complete request to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRequest {
    /// The model to use (e.g., "gpt-4o-mini")
    pub model: String,

    /// System instructions plus the plugin section
    pub system: String,

    /// History window, chronological
    pub messages: Vec<PromptMessage>,

    /// Plugins offered for native function calling
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<PluginDescriptor>,

    pub sampling: SamplingParams,
}

/// The function-tool definition a provider sends for one plugin.
///
/// Prompt assembly counts exactly this JSON against the budget, so a
/// provider that offers native function calling must send it unchanged.
pub fn plugin_definition(plugin: &PluginDescriptor) -> serde_json::Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": plugin.name,
            "description": plugin.usage,
            "parameters": plugin.schema,
        }
    })
}

/// A plugin call requested through the provider's native function calling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestedPluginCall {
    /// Provider-assigned call id
    #[serde(default)]
    pub id: String,

    pub name: String,

    /// Arguments as JSON. Unparseable payloads are kept as a JSON string.
    pub arguments: serde_json::Value,
}

/// Token usage information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A raw model response. Cached as-is by the response cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    /// Generated text (may be empty when only plugin calls were returned)
    pub content: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plugin_calls: Vec<RequestedPluginCall>,

    /// Which model actually responded (may differ from requested)
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl ModelResponse {
    /// A plain text response.
    pub fn text(model: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            plugin_calls: Vec::new(),
            model: model.into(),
            usage: None,
        }
    }
}

/// The core Provider trait.
///
/// Every LLM backend implements this trait. The orchestrator calls
/// `complete()` without knowing which backend is in use.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openai", "ollama").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(&self, request: ModelRequest) -> std::result::Result<ModelResponse, ProviderError>;
}
