//! Error types for engine operations.

use thiserror::Error;

use edaha_graph::GraphError;
use edaha_types::ConversationId;

use crate::config::ConfigError;
use crate::llm::LlmError;

/// Errors surfaced by [`GraphEngine`](crate::GraphEngine) commands.
#[derive(Error, Debug)]
pub enum KernelError {
    /// A graph rule was violated; nothing was changed.
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The AI call failed after all attempts; the exchange was not recorded.
    #[error("ai request failed: {0}")]
    Llm(#[from] LlmError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("conversation not found: {0:?}")]
    ConversationNotFound(ConversationId),

    /// The request itself is unusable (e.g. blank question text).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Result type for engine operations.
pub type KernelResult<T> = Result<T, KernelError>;
