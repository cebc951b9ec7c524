//! Conversation metadata.

use serde::{Deserialize, Serialize};

use crate::ids::ConversationId;
use crate::now_millis;

/// Saved canvas camera for a conversation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub x: f64,
    pub y: f64,
    pub zoom: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self { x: 0.0, y: 0.0, zoom: 1.0 }
    }
}

/// A conversation's metadata. Nodes, edges and messages live in the graph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    pub title: String,
    /// Creation timestamp (Unix millis).
    pub created_at: u64,
    /// Prepended as the system prompt on every AI call in this conversation.
    pub system_instruction: Option<String>,
    pub viewport: Viewport,
}

impl Conversation {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: ConversationId::new(),
            title: title.into(),
            created_at: now_millis(),
            system_instruction: None,
            viewport: Viewport::default(),
        }
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }
}
