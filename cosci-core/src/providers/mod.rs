//! LLM provider implementations.
//!
//! Every supported backend speaks the OpenAI chat completions format
//! (OpenAI, Azure, Ollama, vLLM, LM Studio). Use `create_provider()` to
//! build one from config; it comes wrapped in [`RetryingProvider`].

pub mod openai_compat;

use crate::brain::LlmProvider;
use crate::config::{LlmConfig, RetryConfig};
use crate::error::LlmError;
use crate::types::{CompletionRequest, CompletionResponse};
use async_trait::async_trait;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub use openai_compat::OpenAiCompatibleProvider;

/// Provider names routed to the OpenAI-compatible client.
const OPENAI_COMPATIBLE: &[&str] = &[
    "openai", "azure", "ollama", "vllm", "lmstudio", "local", "openai_compatible",
];

/// Execute an async operation with exponential backoff retry on transient errors.
///
/// Retries on `LlmError::RateLimited` (respects `retry_after_secs`),
/// `LlmError::Connection`, and `LlmError::Timeout`. Permanent errors (auth,
/// parse) return immediately.
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, operation: F) -> Result<T, LlmError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(e) if !is_retryable(&e) || attempt >= config.max_retries => return Err(e),
            Err(e) => {
                let backoff_ms = compute_backoff(config, attempt, &e);
                tracing::warn!(
                    attempt = attempt + 1,
                    max = config.max_retries,
                    backoff_ms = backoff_ms,
                    error = %e,
                    "Retrying after transient error"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                attempt += 1;
            }
        }
    }
}

fn is_retryable(err: &LlmError) -> bool {
    matches!(
        err,
        LlmError::RateLimited { .. } | LlmError::Connection { .. } | LlmError::Timeout { .. }
    )
}

fn compute_backoff(config: &RetryConfig, attempt: u32, err: &LlmError) -> u64 {
    let computed = compute_exponential_backoff(config, attempt);
    match err {
        LlmError::RateLimited { retry_after_secs } => (retry_after_secs * 1000).max(computed),
        _ => computed,
    }
}

fn compute_exponential_backoff(config: &RetryConfig, attempt: u32) -> u64 {
    let base = config.initial_backoff_ms as f64 * config.backoff_multiplier.powi(attempt as i32);
    let capped = base.min(config.max_backoff_ms as f64) as u64;
    if config.jitter {
        let jitter = (capped as f64 * 0.25 * rand::thread_rng().r#gen::<f64>()) as u64;
        capped + jitter
    } else {
        capped
    }
}

/// Wraps a provider so every completion goes through [`with_retry`].
pub struct RetryingProvider {
    inner: Arc<dyn LlmProvider>,
    retry: RetryConfig,
}

impl RetryingProvider {
    pub fn new(inner: Arc<dyn LlmProvider>, retry: RetryConfig) -> Self {
        Self { inner, retry }
    }
}

#[async_trait]
impl LlmProvider for RetryingProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        with_retry(&self.retry, || self.inner.complete(request.clone())).await
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

/// Create an LLM provider based on the configuration.
///
/// Returns `LlmError::UnsupportedProvider` for names that do not speak the
/// OpenAI chat completions format.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let name = config.provider.to_ascii_lowercase();
    if !OPENAI_COMPATIBLE.contains(&name.as_str()) {
        return Err(LlmError::UnsupportedProvider {
            provider: config.provider.clone(),
        });
    }
    let provider: Arc<dyn LlmProvider> = Arc::new(OpenAiCompatibleProvider::new(config)?);
    Ok(with_retry_policy(provider, &config.retry))
}

/// Wrap `provider` in a `RetryingProvider` when retries are enabled.
pub fn with_retry_policy(provider: Arc<dyn LlmProvider>, retry: &RetryConfig) -> Arc<dyn LlmProvider> {
    if retry.max_retries == 0 {
        return provider;
    }
    Arc::new(RetryingProvider::new(provider, retry.clone()))
}
