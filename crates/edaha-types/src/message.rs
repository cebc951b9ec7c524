//! Stored messages and quoted context ranges.

use serde::{Deserialize, Serialize};

use crate::ids::{ConversationId, MessageId, NodeId};
use crate::node::NodeKind;
use crate::now_millis;

/// A span of a new node's text that was copied from another node.
///
/// `start_pos..end_pos` indexes the new node's own text. The optional
/// `source_start_pos..source_end_pos` records where the quote sat in the
/// source node's text when it was taken, so a click can jump to and highlight
/// the original occurrence. All offsets count Unicode scalar values (`char`s),
/// not bytes.
///
/// The camelCase field names are the stored JSON shape of the
/// `messages.context_ranges` column and must round-trip unchanged.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextRange {
    pub source_node_id: NodeId,
    pub start_pos: usize,
    pub end_pos: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_start_pos: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_end_pos: Option<usize>,
}

impl ContextRange {
    pub fn new(source_node_id: NodeId, start_pos: usize, end_pos: usize) -> Self {
        Self {
            source_node_id,
            start_pos,
            end_pos,
            source_start_pos: None,
            source_end_pos: None,
        }
    }

    /// Record where the quoted text sat in the source node.
    pub fn with_source_span(mut self, start: usize, end: usize) -> Self {
        self.source_start_pos = Some(start);
        self.source_end_pos = Some(end);
        self
    }

    /// Length of the quoted span in chars.
    pub fn len(&self) -> usize {
        self.end_pos.saturating_sub(self.start_pos)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Source span, when both ends were recorded.
    pub fn source_span(&self) -> Option<(usize, usize)> {
        match (self.source_start_pos, self.source_end_pos) {
            (Some(start), Some(end)) => Some((start, end)),
            _ => None,
        }
    }
}

/// Text behind a node, as persisted in the `messages` table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub author: NodeKind,
    pub content: String,
    /// Creation timestamp (Unix millis).
    pub created_at: u64,
    #[serde(default)]
    pub context_ranges: Vec<ContextRange>,
}

impl Message {
    pub fn new(conversation_id: ConversationId, author: NodeKind, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            conversation_id,
            author,
            content: content.into(),
            created_at: now_millis(),
            context_ranges: Vec::new(),
        }
    }

    pub fn user(conversation_id: ConversationId, content: impl Into<String>) -> Self {
        Self::new(conversation_id, NodeKind::User, content)
    }

    pub fn ai(conversation_id: ConversationId, content: impl Into<String>) -> Self {
        Self::new(conversation_id, NodeKind::Ai, content)
    }

    pub fn with_context_ranges(mut self, ranges: Vec<ContextRange>) -> Self {
        self.context_ranges = ranges;
        self
    }

    pub fn with_created_at(mut self, created_at: u64) -> Self {
        self.created_at = created_at;
        self
    }

    /// Serialize the context ranges to the JSON stored alongside the message.
    pub fn context_ranges_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.context_ranges)
    }

    /// Parse context ranges from the stored JSON column.
    ///
    /// An empty string is treated as "no ranges" (rows written before the
    /// column was populated).
    pub fn parse_context_ranges(json: &str) -> serde_json::Result<Vec<ContextRange>> {
        if json.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_range_json_shape() {
        let src = NodeId::new();
        let range = ContextRange::new(src, 4, 9).with_source_span(100, 105);
        let json = serde_json::to_value(&range).unwrap();

        assert_eq!(json["sourceNodeId"], serde_json::json!(src.to_string()));
        assert_eq!(json["startPos"], 4);
        assert_eq!(json["endPos"], 9);
        assert_eq!(json["sourceStartPos"], 100);
        assert_eq!(json["sourceEndPos"], 105);
    }

    #[test]
    fn test_context_range_omits_missing_source_span() {
        let range = ContextRange::new(NodeId::new(), 0, 3);
        let json = serde_json::to_string(&range).unwrap();
        assert!(!json.contains("sourceStartPos"));
        assert_eq!(range.source_span(), None);
    }

    #[test]
    fn test_message_ranges_survive_column_roundtrip() {
        let conv = ConversationId::new();
        let ranges = vec![
            ContextRange::new(NodeId::new(), 0, 5).with_source_span(12, 17),
            ContextRange::new(NodeId::new(), 5, 11),
        ];
        let msg = Message::user(conv, "hello world").with_context_ranges(ranges.clone());

        let stored = msg.context_ranges_json().unwrap();
        let parsed = Message::parse_context_ranges(&stored).unwrap();
        assert_eq!(parsed, ranges);
    }

    #[test]
    fn test_parse_empty_column() {
        assert!(Message::parse_context_ranges("").unwrap().is_empty());
        assert!(Message::parse_context_ranges("[]").unwrap().is_empty());
    }
}
