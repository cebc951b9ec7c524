//! AI provider boundary.
//!
//! The engine only needs "history in, reply out". Concrete providers live
//! outside this crate and implement [`LlmProvider`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use edaha_types::NodeKind;

/// Role of a message in a completion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Human/user message.
    User,
    /// Assistant/model message.
    Assistant,
}

impl From<NodeKind> for Role {
    fn from(kind: NodeKind) -> Self {
        match kind {
            NodeKind::User => Role::User,
            NodeKind::Ai => Role::Assistant,
        }
    }
}

/// A message in a completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

impl From<&edaha_types::Message> for Message {
    fn from(stored: &edaha_types::Message) -> Self {
        Self {
            role: stored.author.into(),
            content: stored.content.clone(),
        }
    }
}

/// Token usage information.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    /// Total tokens (input + output).
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// Response from a completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// The generated text content.
    pub content: String,
    /// Model that generated the response.
    pub model: String,
    /// Reason the generation stopped.
    pub stop_reason: Option<String>,
    pub usage: Usage,
}

impl CompletionResponse {
    pub fn text(model: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            model: model.into(),
            stop_reason: None,
            usage: Usage::default(),
        }
    }
}

/// A completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Conversation history, oldest first, ending with the new question.
    pub messages: Vec<Message>,
    /// System prompt.
    pub system: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    /// Temperature (0.0 = deterministic, 1.0 = creative).
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            messages,
            system: None,
            model: model.into(),
            max_tokens: 4096,
            temperature: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Error type for LLM operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    /// Provider not configured or unavailable.
    #[error("provider not available: {0}")]
    Unavailable(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("api error: {0}")]
    ApiError(String),

    #[error("network error: {0}")]
    NetworkError(String),

    /// The provider answered with no text.
    #[error("empty response from {0}")]
    EmptyResponse(String),
}

/// Result type for LLM operations.
pub type LlmResult<T> = Result<T, LlmError>;

/// Trait for LLM providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name for logs (e.g. "anthropic", "local").
    fn name(&self) -> &str;

    /// Send a completion request.
    async fn complete(&self, request: CompletionRequest) -> LlmResult<CompletionResponse>;
}

/// Call `provider` up to `attempts` times (at least once), returning the first
/// non-empty reply or the last error.
pub async fn complete_with_retry(
    provider: &dyn LlmProvider,
    request: &CompletionRequest,
    attempts: u32,
) -> LlmResult<CompletionResponse> {
    let attempts = attempts.max(1);
    let mut last_error = LlmError::Unavailable(provider.name().to_string());

    for attempt in 1..=attempts {
        let result = match provider.complete(request.clone()).await {
            Ok(response) if response.content.trim().is_empty() => {
                Err(LlmError::EmptyResponse(provider.name().to_string()))
            }
            other => other,
        };
        match result {
            Ok(response) => {
                tracing::debug!(
                    provider = provider.name(),
                    attempt,
                    tokens = response.usage.total(),
                    "completion succeeded"
                );
                return Ok(response);
            }
            Err(e) => {
                tracing::warn!(provider = provider.name(), attempt, attempts, error = %e, "completion failed");
                last_error = e;
            }
        }
    }

    Err(last_error)
}
