//! Shared identity and graph types for edaha.
//!
//! This crate is the leaf of the workspace: typed IDs, nodes, edges, stored
//! messages, quoted context ranges and conversation metadata. It has **no
//! internal edaha dependencies**.
//!
//! # Entity-Relationship Overview
//!
//! ```text
//! Conversation (ConversationId)
//!     └── owns Node (NodeId), kind = user | ai
//!     │     └── points at its stored Message (MessageId)
//!     └── owns Edge (EdgeId), source → target
//!           "target was generated in the context of source"
//!
//! Message (MessageId)
//!     └── carries ContextRange[] (quotes copied from other nodes)
//! ```
//!
//! # Key Types
//!
//! |--------------------|-----------------------------------------------|
//! | Type               | Purpose                                       |
//! |--------------------|-----------------------------------------------|
//! | [`Node`]           | One side of a question/answer exchange        |
//! | [`Edge`]           | Context link between two nodes                |
//! | [`Message`]        | Stored text behind a node                     |
//! | [`ContextRange`]   | Quoted span linking new text to its source    |
//! | [`Conversation`]   | Title, system instruction, saved viewport     |
//! |--------------------|-----------------------------------------------|

pub mod conversation;
pub mod ids;
pub mod message;
pub mod node;

pub use conversation::{Conversation, Viewport};
pub use ids::{ContextEntryId, ConversationId, EdgeId, MessageId, NodeId};
pub use message::{ContextRange, Message};
pub use node::{Edge, Node, NodeKind, Position};

/// Current time as Unix milliseconds. Used by constructors throughout the workspace.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
