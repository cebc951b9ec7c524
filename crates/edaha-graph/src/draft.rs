//! Drafts: unsent questions with quoted context.
//!
//! A draft is working state only; it is never persisted. The user types text
//! and attaches quotes taken from other nodes. On submit the draft is
//! serialized into plain text plus the [`ContextRange`]s that say which
//! spans of that text were quoted from where.
//!
//! ```text
//! segments:  Text("Why does ")  Context("the borrow")  Text(" fail?")
//! text:      "Why does the borrow fail?"
//! ranges:              [9, 19) → source node
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use edaha_types::{ContextEntryId, ContextRange, NodeId, now_millis};

use crate::spans::{Span, locate};
use crate::{GraphError, Result};

/// A quote taken from another node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub entry_id: ContextEntryId,
    pub source_node_id: NodeId,
    pub text: String,
    /// Where the quote sits in the source node's text, if known.
    pub source_span: Option<Span>,
}

impl Quote {
    pub fn new(source_node_id: NodeId, text: impl Into<String>) -> Self {
        Self {
            entry_id: ContextEntryId::new(),
            source_node_id,
            text: text.into(),
            source_span: None,
        }
    }

    pub fn with_entry_id(mut self, entry_id: ContextEntryId) -> Self {
        self.entry_id = entry_id;
        self
    }

    pub fn with_source_span(mut self, span: Span) -> Self {
        self.source_span = Some(span);
        self
    }
}

/// One piece of a draft, in the order the user built it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum DraftSegment {
    Text(String),
    Context(Quote),
}

/// An unsent question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Draft {
    /// Becomes the user node id when the draft is submitted.
    pub id: NodeId,
    /// Node the draft hangs off on the canvas, if any.
    pub anchor: Option<NodeId>,
    /// Parents the submitted question will be linked to.
    pub from_node_ids: Vec<NodeId>,
    pub segments: Vec<DraftSegment>,
    pub created_at: u64,
}

/// Serialized draft, ready to become a user message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedDraft {
    pub text: String,
    pub context_ranges: Vec<ContextRange>,
}

impl Draft {
    fn new(anchor: Option<NodeId>, from_node_ids: Vec<NodeId>) -> Self {
        Self {
            id: NodeId::new(),
            anchor,
            from_node_ids,
            segments: Vec::new(),
            created_at: now_millis(),
        }
    }

    pub fn quotes(&self) -> impl Iterator<Item = &Quote> {
        self.segments.iter().filter_map(|s| match s {
            DraftSegment::Context(q) => Some(q),
            DraftSegment::Text(_) => None,
        })
    }

    pub fn has_quote(&self, entry_id: &ContextEntryId) -> bool {
        self.quotes().any(|q| q.entry_id == *entry_id)
    }

    /// True when there is nothing to send.
    pub fn is_blank(&self) -> bool {
        self.segments.iter().all(|s| match s {
            DraftSegment::Text(t) => t.trim().is_empty(),
            DraftSegment::Context(_) => false,
        })
    }

    /// Flatten segments into text plus quote ranges.
    pub fn serialize(&self) -> SerializedDraft {
        let mut text = String::new();
        let mut cursor = 0usize;
        let mut context_ranges = Vec::new();

        for segment in &self.segments {
            match segment {
                DraftSegment::Text(t) => {
                    text.push_str(t);
                    cursor += t.chars().count();
                }
                DraftSegment::Context(quote) => {
                    let len = quote.text.chars().count();
                    let mut range = ContextRange::new(quote.source_node_id, cursor, cursor + len);
                    if let Some(span) = quote.source_span {
                        range = range.with_source_span(span.start, span.end);
                    }
                    context_ranges.push(range);
                    text.push_str(&quote.text);
                    cursor += len;
                }
            }
        }

        SerializedDraft { text, context_ranges }
    }
}

/// Live drafts, keyed by draft id.
#[derive(Debug, Clone, Default)]
pub struct ContextSpanTracker {
    drafts: IndexMap<NodeId, Draft>,
}

impl ContextSpanTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a draft and return its id.
    pub fn create_draft(&mut self, anchor: Option<NodeId>, from_node_ids: Vec<NodeId>) -> NodeId {
        let draft = Draft::new(anchor, from_node_ids);
        let id = draft.id;
        self.drafts.insert(id, draft);
        id
    }

    pub fn draft(&self, id: &NodeId) -> Option<&Draft> {
        self.drafts.get(id)
    }

    pub fn drafts(&self) -> impl Iterator<Item = &Draft> {
        self.drafts.values()
    }

    pub fn len(&self) -> usize {
        self.drafts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drafts.is_empty()
    }

    fn draft_mut(&mut self, id: &NodeId) -> Result<&mut Draft> {
        self.drafts.get_mut(id).ok_or(GraphError::DraftNotFound(*id))
    }

    /// Append typed text, merging with a trailing text segment.
    pub fn push_text(&mut self, id: &NodeId, text: &str) -> Result<()> {
        let draft = self.draft_mut(id)?;
        if let Some(DraftSegment::Text(last)) = draft.segments.last_mut() {
            last.push_str(text);
        } else {
            draft.segments.push(DraftSegment::Text(text.to_string()));
        }
        Ok(())
    }

    /// Attach a quote to a draft.
    ///
    /// Attaching the same entry id twice is a no-op and returns `false`.
    /// When the quote carries no source span and `source_text` is given, the
    /// span is located in it; a quote that cannot be located is still
    /// attached, just without a source span.
    pub fn attach(&mut self, id: &NodeId, mut quote: Quote, source_text: Option<&str>) -> Result<bool> {
        if quote.text.is_empty() {
            return Err(GraphError::EmptyQuote(quote.entry_id));
        }
        let draft = self.draft_mut(id)?;
        if draft.has_quote(&quote.entry_id) {
            return Ok(false);
        }

        if quote.source_span.is_none() {
            quote.source_span = source_text.and_then(|text| locate(text, &quote.text));
            if quote.source_span.is_none() && source_text.is_some() {
                tracing::debug!(
                    entry = %quote.entry_id,
                    source = %quote.source_node_id,
                    "quote not found in source text"
                );
            }
        }

        draft.segments.push(DraftSegment::Context(quote));
        Ok(true)
    }

    /// Drop a quote. Returns whether anything was removed.
    pub fn remove_context(&mut self, id: &NodeId, entry_id: &ContextEntryId) -> Result<bool> {
        let draft = self.draft_mut(id)?;
        let before = draft.segments.len();
        draft
            .segments
            .retain(|s| !matches!(s, DraftSegment::Context(q) if q.entry_id == *entry_id));
        Ok(draft.segments.len() != before)
    }

    /// Quotes attached to a draft, in order.
    pub fn pending_contexts(&self, id: &NodeId) -> Result<Vec<&Quote>> {
        let draft = self.drafts.get(id).ok_or(GraphError::DraftNotFound(*id))?;
        Ok(draft.quotes().collect())
    }

    pub fn serialize(&self, id: &NodeId) -> Result<SerializedDraft> {
        self.drafts
            .get(id)
            .map(Draft::serialize)
            .ok_or(GraphError::DraftNotFound(*id))
    }

    /// Remove a draft, returning it if it existed.
    pub fn discard(&mut self, id: &NodeId) -> Option<Draft> {
        self.drafts.shift_remove(id)
    }

    /// Put a draft back, e.g. after a failed submit.
    pub fn restore(&mut self, draft: Draft) {
        self.drafts.insert(draft.id, draft);
    }
}
