//! Error types for graph operations.

use thiserror::Error;

use edaha_types::{ContextEntryId, NodeId, NodeKind};

/// Errors that can occur while mutating or querying a conversation graph.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    /// Node not found in the graph.
    #[error("node not found: {0:?}")]
    NodeNotFound(NodeId),

    /// Node already present; new nodes must have fresh ids.
    #[error("node already exists: {0:?}")]
    DuplicateNode(NodeId),

    /// Only user (question) nodes can be edited.
    #[error("node {id:?} is an {kind} node; only user nodes can be edited")]
    NotAUserNode { id: NodeId, kind: NodeKind },

    /// An AI node must hang off exactly one user node.
    #[error("ai node {0:?} needs exactly one user parent")]
    InvalidAiParent(NodeId),

    /// Draft not found in the tracker.
    #[error("draft not found: {0:?}")]
    DraftNotFound(NodeId),

    /// Quoted text must not be empty.
    #[error("context entry {0:?} has no quoted text")]
    EmptyQuote(ContextEntryId),
}
