//! Conversation engine for edaha.
//!
//! Wraps the pure graph algorithms of `edaha-graph` with everything stateful:
//! SQLite persistence, the AI provider boundary, per-conversation locking,
//! debounced position writes and change events.
//!
//! ```text
//! caller ──► GraphEngine ──► Snapshot (graph, messages, layout, drafts)
//!                │                 ▲ swapped in after the write commits
//!                ├──► LlmProvider  │
//!                ├──► GraphDb ─────┘
//!                └──► PositionBatcher (debounced)
//! ```

use std::sync::Arc;

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod events;
pub mod llm;
pub mod positions;

pub use config::{ConfigError, EngineConfig, LlmConfig};
pub use db::GraphDb;
pub use engine::{DeleteResult, ExchangeRequest, ExchangeResult, GraphDelta, GraphEngine, GraphView};
pub use error::{KernelError, KernelResult};
pub use events::{GraphEvent, NodePosition};
pub use llm::{CompletionRequest, CompletionResponse, LlmError, LlmProvider, LlmResult};
pub use positions::{BatcherStats, FlushConfig, PositionBatcher, spawn_flusher};

/// Database handle shared between the engine and the position batcher.
pub type SharedDb = Arc<parking_lot::Mutex<GraphDb>>;
