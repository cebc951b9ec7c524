//! Change notifications for graph observers.

use serde::{Deserialize, Serialize};

use edaha_types::{ConversationId, Edge, Node, NodeId, Position};

/// A node position as reported by the canvas.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePosition {
    pub node_id: NodeId,
    pub x: f64,
    pub y: f64,
}

impl NodePosition {
    pub fn new(node_id: NodeId, x: f64, y: f64) -> Self {
        Self { node_id, x, y }
    }

    pub fn position(&self) -> Position {
        Position::new(self.x, self.y)
    }
}

/// Events broadcast when a conversation graph changes.
#[derive(Clone, Debug)]
pub enum GraphEvent {
    /// A question and its answer were recorded.
    ExchangeCreated {
        conversation_id: ConversationId,
        user_node: Node,
        ai_node: Node,
        edges: Vec<Edge>,
    },
    /// A question was rewritten; `deleted` are the stale descendants removed.
    NodeEdited {
        conversation_id: ConversationId,
        node_id: NodeId,
        deleted: Vec<NodeId>,
    },
    NodesDeleted {
        conversation_id: ConversationId,
        node_ids: Vec<NodeId>,
    },
    PositionsUpdated {
        conversation_id: ConversationId,
        positions: Vec<NodePosition>,
    },
    /// Nodes moved after their measured size made them overlap.
    LayoutReflowed {
        conversation_id: ConversationId,
        positions: Vec<NodePosition>,
    },
    ConversationDeleted {
        conversation_id: ConversationId,
    },
}

impl GraphEvent {
    pub fn conversation_id(&self) -> ConversationId {
        match self {
            GraphEvent::ExchangeCreated { conversation_id, .. }
            | GraphEvent::NodeEdited { conversation_id, .. }
            | GraphEvent::NodesDeleted { conversation_id, .. }
            | GraphEvent::PositionsUpdated { conversation_id, .. }
            | GraphEvent::LayoutReflowed { conversation_id, .. }
            | GraphEvent::ConversationDeleted { conversation_id } => *conversation_id,
        }
    }
}
