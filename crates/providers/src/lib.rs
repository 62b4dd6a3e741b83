//! LLM Provider implementations for botloom.
//!
//! All providers implement the `botloom_core::Provider` trait.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;

use botloom_config::AppConfig;
use botloom_core::error::ProviderError;
use botloom_core::provider::Provider;
use std::sync::Arc;
use std::time::Duration;

/// Build the configured provider.
///
/// Local endpoints (localhost / 127.0.0.1) may run without an API key.
pub fn build_from_config(config: &AppConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    let is_local = config.api_url.contains("localhost") || config.api_url.contains("127.0.0.1");
    let api_key = match (&config.api_key, is_local) {
        (Some(key), _) => key.clone(),
        (None, true) => "local".to_string(),
        (None, false) => {
            return Err(ProviderError::NotConfigured(
                "no API key: set api_key in ~/.botloom/config.toml or BOTLOOM_API_KEY".into(),
            ));
        }
    };

    let name = if is_local { "local" } else { "openai-compat" };
    let provider = OpenAiCompatProvider::new(name, &config.api_url, api_key)
        .with_timeout(Duration::from_secs(config.model_timeout_secs));
    Ok(Arc::new(provider))
}
