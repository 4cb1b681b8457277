//! Brain module: reasoning backend abstraction.
//!
//! Defines the `LlmProvider` trait for model-agnostic completions and the
//! `Brain` wrapper the stages use: one prompt string in, free text out.

use crate::error::LlmError;
use crate::types::{CompletionRequest, CompletionResponse, Message, TokenUsage};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Trait for LLM providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Perform a full completion and return the response.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Return the model name.
    fn model_name(&self) -> &str;
}

/// Thin wrapper around a provider with the sampling settings of one role
/// (supervisor or worker).
#[derive(Clone)]
pub struct Brain {
    provider: Arc<dyn LlmProvider>,
    temperature: f32,
    max_tokens: Option<usize>,
    usage: Arc<Mutex<TokenUsage>>,
}

impl Brain {
    pub fn new(provider: Arc<dyn LlmProvider>, temperature: f32) -> Self {
        Self {
            provider,
            temperature,
            max_tokens: None,
            usage: Arc::new(Mutex::new(TokenUsage::default())),
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Send a single prompt and return the response text.
    pub async fn invoke(&self, prompt: &str) -> Result<String, LlmError> {
        let request = CompletionRequest {
            messages: vec![Message::user(prompt)],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            model: None,
        };
        debug!(
            model = self.provider.model_name(),
            prompt_chars = prompt.len(),
            "Invoking reasoning backend"
        );
        let response = self.provider.complete(request).await?;
        self.usage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .accumulate(&response.usage);
        Ok(response.message.content)
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Token usage accumulated by this brain and all of its clones.
    pub fn total_usage(&self) -> TokenUsage {
        *self.usage.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Brain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Brain")
            .field("model", &self.provider.model_name())
            .field("temperature", &self.temperature)
            .finish()
    }
}

type ResponseHandler = dyn Fn(&str) -> Result<String, LlmError> + Send + Sync;

/// A mock LLM provider for testing.
///
/// Queued responses are returned first, in order. Once the queue is empty the
/// optional handler is consulted with the prompt text, so concurrent callers
/// can be answered by content rather than by arrival order.
pub struct MockLlmProvider {
    model: String,
    responses: Mutex<VecDeque<Result<String, LlmError>>>,
    handler: Option<Box<ResponseHandler>>,
    prompts: Mutex<Vec<String>>,
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            responses: Mutex::new(VecDeque::new()),
            handler: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Create a MockLlmProvider that answers every prompt through `handler`.
    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        let mut provider = Self::new();
        provider.handler = Some(Box::new(move |prompt| Ok(handler(prompt))));
        provider
    }

    /// Like `with_handler`, but the handler may fail.
    pub fn with_fallible_handler<F>(handler: F) -> Self
    where
        F: Fn(&str) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        let mut provider = Self::new();
        provider.handler = Some(Box::new(handler));
        provider
    }

    /// Queue a response to be returned by the next `complete` call.
    pub fn queue_response(&self, text: impl Into<String>) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(Ok(text.into()));
    }

    /// Queue a failure to be returned by the next `complete` call.
    pub fn queue_error(&self, error: LlmError) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(Err(error));
    }

    /// All prompts received so far, in arrival order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn text_response(text: String) -> CompletionResponse {
        CompletionResponse {
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: text.len() / 4,
            },
            message: Message::assistant(text),
            model: "mock-model".to_string(),
            finish_reason: Some("stop".to_string()),
        }
    }
}

impl Default for MockLlmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let prompt = request
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(prompt.clone());

        let queued = self
            .responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        let text = match (queued, &self.handler) {
            (Some(result), _) => result?,
            (None, Some(handler)) => handler(&prompt)?,
            (None, None) => "I'm a mock LLM. No queued responses available.".to_string(),
        };
        Ok(Self::text_response(text))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
