//! Model calls with a timeout and bounded exponential backoff.

use botloom_config::RetryConfig;
use botloom_core::error::{Error, ProviderError};
use botloom_core::provider::{ModelRequest, ModelResponse, Provider};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How a model call is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    /// Upper bound for any single wait, including provider `Retry-After` hints.
    pub max_backoff: Duration,
    /// Per-attempt timeout.
    pub call_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig, call_timeout: Duration) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            call_timeout,
        }
    }

    /// A policy that makes exactly one attempt.
    pub fn no_retries(call_timeout: Duration) -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            call_timeout,
        }
    }

    /// Wait before retry number `attempt + 1`: `min(initial * 2^attempt, max)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .map_or(self.max_backoff, |d| d.min(self.max_backoff))
    }

    fn wait_for(&self, attempt: u32, error: &ProviderError) -> Duration {
        let delay = self.backoff(attempt);
        match error {
            ProviderError::RateLimited { retry_after_secs } => {
                delay.max(Duration::from_secs(*retry_after_secs)).min(self.max_backoff)
            }
            _ => delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default(), Duration::from_secs(60))
    }
}

/// Call the provider until it succeeds, fails permanently, or retries run out.
///
/// Returns the response and the number of attempts made. Exhausted or
/// non-retryable failures become [`Error::ModelUnavailable`]. Cancellation is
/// honoured while waiting between attempts, never during one.
pub async fn call_with_retry(
    provider: &dyn Provider,
    request: &ModelRequest,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<(ModelResponse, u32), Error> {
    let mut attempt = 0u32;
    loop {
        let call = provider.complete(request.clone());
        let outcome = match tokio::time::timeout(policy.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(format!(
                "no response within {}s",
                policy.call_timeout.as_secs()
            ))),
        };

        let error = match outcome {
            Ok(response) => {
                debug!(provider = provider.name(), attempts = attempt + 1, "Model call succeeded");
                return Ok((response, attempt + 1));
            }
            Err(e) => e,
        };

        if !error.is_retryable() || attempt >= policy.max_retries {
            return Err(Error::ModelUnavailable {
                attempts: attempt + 1,
                last_error: error,
            });
        }

        let wait = policy.wait_for(attempt, &error);
        warn!(
            provider = provider.name(),
            attempt = attempt + 1,
            max_attempts = policy.max_retries + 1,
            wait_ms = wait.as_millis() as u64,
            "Model call failed: {error}; retrying"
        );
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        }
        attempt += 1;
    }
}
