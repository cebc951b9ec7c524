//! Conversation graph engine for edaha.
//!
//! Every conversation is a DAG of user (question) and AI (answer) nodes.
//! A user node may draw from several parents (a join); an AI node always
//! hangs off exactly one user node. Everything in this crate is synchronous
//! and works on an explicit [`ConversationGraph`] value:
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`model`] | Graph storage, adjacency, QA pairs, validation |
//! | [`ancestors`] | History for an AI call: ancestors of the seeds, oldest first |
//! | [`deletion`] | Join-preserving subtree deletion plans |
//! | [`placement`] | Collision-free placement and measured-size reflow |
//! | [`spans`] | Locating quoted text (char offsets) |
//! | [`draft`] | Unsent questions with quoted context |
//!
//! Persistence, AI calls and concurrency live in `edaha-kernel`.

pub mod ancestors;
pub mod deletion;
pub mod draft;
pub mod error;
pub mod model;
pub mod placement;
pub mod spans;

pub use ancestors::{AncestorResolver, DEFAULT_ANCESTOR_LIMIT};
pub use deletion::{DeletionPlan, plan_descendant_deletion, plan_subtree_deletion};
pub use draft::{ContextSpanTracker, Draft, DraftSegment, Quote, SerializedDraft};
pub use error::GraphError;
pub use model::{ConversationGraph, InvariantViolation, QaPair};
pub use placement::{
    LayoutPlanner, NodeBox, Placement, PlacementConfig, PlacementStrategy, Reflow, Slot,
    place_node, place_root,
};
pub use spans::{Span, locate, slice_chars, surviving_ranges};

/// Result type for graph operations.
pub type Result<T> = std::result::Result<T, GraphError>;
