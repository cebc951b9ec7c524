//! Graph nodes and edges.
//!
//! A conversation graph is a DAG of [`Node`]s joined by [`Edge`]s. Nodes come
//! in two kinds: the user's question and the AI answer produced for it. An
//! edge reads "target was generated in the context of source"; a target with
//! several incoming edges is a *join*.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::EnumString;

use crate::ids::{ConversationId, EdgeId, MessageId, NodeId};
use crate::now_millis;

/// Which side of an exchange a node holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum NodeKind {
    /// A question typed by the user.
    #[default]
    #[strum(serialize = "user", serialize = "human")]
    User,
    /// An answer produced by the model.
    #[strum(serialize = "ai", serialize = "assistant", serialize = "model")]
    Ai,
}

impl NodeKind {
    /// Parse from string (case-insensitive).
    ///
    /// Supports aliases: "human" -> User, "assistant"/"model" -> Ai.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    /// Convert to the string stored in the `type` / `author` columns.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::User => "user",
            NodeKind::Ai => "ai",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Canvas position of a node's top-left corner.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// One side of a question/answer exchange.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,
    pub conversation_id: ConversationId,
    pub kind: NodeKind,
    /// Rendered text. Mirrors the stored message content when there is one.
    pub text: String,
    /// Creation timestamp (Unix millis).
    pub created_at: u64,
    /// `None` until the node has been placed on the canvas.
    pub position: Option<Position>,
    /// The stored message behind this node, if any.
    pub source_message_id: Option<MessageId>,
}

impl Node {
    /// Create a node with a fresh id and no position.
    pub fn new(conversation_id: ConversationId, kind: NodeKind, text: impl Into<String>) -> Self {
        Self {
            id: NodeId::new(),
            conversation_id,
            kind,
            text: text.into(),
            created_at: now_millis(),
            position: None,
            source_message_id: None,
        }
    }

    /// Create a user (question) node.
    pub fn user(conversation_id: ConversationId, text: impl Into<String>) -> Self {
        Self::new(conversation_id, NodeKind::User, text)
    }

    /// Create an AI (answer) node.
    pub fn ai(conversation_id: ConversationId, text: impl Into<String>) -> Self {
        Self::new(conversation_id, NodeKind::Ai, text)
    }

    /// Use a specific id (promoting a draft keeps the draft's id).
    pub fn with_id(mut self, id: NodeId) -> Self {
        self.id = id;
        self
    }

    /// Set the canvas position.
    pub fn with_position(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }

    /// Link to the stored message behind this node.
    pub fn with_message(mut self, message_id: MessageId) -> Self {
        self.source_message_id = Some(message_id);
        self
    }

    /// Override the creation timestamp.
    pub fn with_created_at(mut self, created_at: u64) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn is_user(&self) -> bool {
        self.kind == NodeKind::User
    }

    pub fn is_ai(&self) -> bool {
        self.kind == NodeKind::Ai
    }
}

/// Context link: `target` was generated in the context of `source`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: EdgeId,
    pub conversation_id: ConversationId,
    pub source: NodeId,
    pub target: NodeId,
    pub created_at: u64,
}

impl Edge {
    pub fn new(conversation_id: ConversationId, source: NodeId, target: NodeId) -> Self {
        Self {
            id: EdgeId::new(),
            conversation_id,
            source,
            target,
            created_at: now_millis(),
        }
    }

    /// True if this edge touches `node` on either end.
    pub fn touches(&self, node: &NodeId) -> bool {
        self.source == *node || self.target == *node
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parse_with_aliases() {
        assert_eq!(NodeKind::from_str("user"), Some(NodeKind::User));
        assert_eq!(NodeKind::from_str("Human"), Some(NodeKind::User));
        assert_eq!(NodeKind::from_str("ai"), Some(NodeKind::Ai));
        assert_eq!(NodeKind::from_str("assistant"), Some(NodeKind::Ai));
        assert_eq!(NodeKind::from_str("robot"), None);
    }

    #[test]
    fn test_kind_serde_lowercase() {
        assert_eq!(serde_json::to_string(&NodeKind::Ai).unwrap(), "\"ai\"");
        assert_eq!(NodeKind::User.to_string(), "user");
    }

    #[test]
    fn test_node_builders() {
        let conv = ConversationId::new();
        let id = NodeId::new();
        let msg = MessageId::new();
        let node = Node::user(conv, "why?")
            .with_id(id)
            .with_position(Position::new(10.0, 20.0))
            .with_message(msg);

        assert_eq!(node.id, id);
        assert!(node.is_user());
        assert_eq!(node.position, Some(Position::new(10.0, 20.0)));
        assert_eq!(node.source_message_id, Some(msg));
    }

    #[test]
    fn test_edge_touches() {
        let conv = ConversationId::new();
        let (a, b, c) = (NodeId::new(), NodeId::new(), NodeId::new());
        let edge = Edge::new(conv, a, b);
        assert!(edge.touches(&a));
        assert!(edge.touches(&b));
        assert!(!edge.touches(&c));
    }
}
