//! Ancestor context resolution for AI calls.
//!
//! Walks the graph backward from a set of seed nodes and returns the stored
//! messages of everything reachable, oldest first, capped to the most recent
//! `limit` entries. Joins (nodes with several parents) pull in every branch
//! they draw from; shared ancestors are visited once.

use std::collections::{HashMap, HashSet};

use edaha_types::{Message, MessageId, NodeId};

use crate::ConversationGraph;

/// Default number of messages handed to the model.
pub const DEFAULT_ANCESTOR_LIMIT: usize = 20;

/// Resolves conversation history for a set of seed nodes.
#[derive(Debug, Clone, Copy)]
pub struct AncestorResolver {
    limit: usize,
}

impl Default for AncestorResolver {
    fn default() -> Self {
        Self::new(DEFAULT_ANCESTOR_LIMIT)
    }
}

impl AncestorResolver {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Every node reachable backward from `seeds`, seeds included, in
    /// depth-first visit order. Seeds missing from the graph contribute nothing.
    pub fn ancestor_nodes(&self, graph: &ConversationGraph, seeds: &[NodeId]) -> Vec<NodeId> {
        let reverse = graph.reverse_adjacency();
        let mut visited: HashSet<NodeId> = HashSet::new();
        let mut order = Vec::new();
        let mut stack: Vec<NodeId> = seeds.iter().rev().copied().collect();

        while let Some(id) = stack.pop() {
            if !graph.contains(&id) || !visited.insert(id) {
                continue;
            }
            order.push(id);
            if let Some(parents) = reverse.get(&id) {
                for parent in parents.iter().rev() {
                    if !visited.contains(parent) {
                        stack.push(*parent);
                    }
                }
            }
        }

        order
    }

    /// Message ids attached to the ancestors of `seeds`.
    pub fn ancestor_message_ids(&self, graph: &ConversationGraph, seeds: &[NodeId]) -> Vec<MessageId> {
        self.ancestor_nodes(graph, seeds)
            .iter()
            .filter_map(|id| graph.node(id).and_then(|n| n.source_message_id))
            .collect()
    }

    /// Chronological history for an AI call: the ancestors' messages sorted by
    /// creation time (id breaks ties), keeping only the newest `limit`.
    pub fn resolve(
        &self,
        graph: &ConversationGraph,
        messages: &HashMap<MessageId, Message>,
        seeds: &[NodeId],
    ) -> Vec<Message> {
        if seeds.is_empty() {
            return Vec::new();
        }

        let ids = self.ancestor_message_ids(graph, seeds);
        let mut history: Vec<Message> = ids
            .iter()
            .filter_map(|id| {
                let found = messages.get(id);
                if found.is_none() {
                    tracing::debug!(message = %id, "ancestor message missing from snapshot");
                }
                found.cloned()
            })
            .collect();

        history.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        if history.len() > self.limit {
            let excess = history.len() - self.limit;
            history.drain(..excess);
        }

        history
    }
}
