//! Join-preserving subtree deletion.
//!
//! Deleting a node removes it and every descendant whose *only* incoming edge
//! is the one being severed. A descendant with another live parent (a join)
//! survives, and the walk stops there. This needs only the neighbourhood
//! below the deletion root, never a reachability pass from the conversation
//! roots.

use std::collections::{HashMap, HashSet};

use edaha_types::{MessageId, NodeId};

use crate::ConversationGraph;

/// What a deletion will remove.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletionPlan {
    /// Nodes to delete, in depth-first visit order (root first).
    pub node_ids: Vec<NodeId>,
    /// Stored messages referenced by those nodes.
    pub message_ids: Vec<MessageId>,
}

impl DeletionPlan {
    pub fn is_empty(&self) -> bool {
        self.node_ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.node_ids.len()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.node_ids.contains(id)
    }

    pub fn node_set(&self) -> HashSet<NodeId> {
        self.node_ids.iter().copied().collect()
    }

    fn absorb(&mut self, other: DeletionPlan) {
        for id in other.node_ids {
            if !self.node_ids.contains(&id) {
                self.node_ids.push(id);
            }
        }
        for id in other.message_ids {
            if !self.message_ids.contains(&id) {
                self.message_ids.push(id);
            }
        }
    }
}

/// Plan the deletion of `root` and its exclusively-owned descendants.
///
/// A root that is not in the graph yields an empty plan.
pub fn plan_subtree_deletion(graph: &ConversationGraph, root: &NodeId) -> DeletionPlan {
    if !graph.contains(root) {
        return DeletionPlan::default();
    }
    let forward = graph.forward_adjacency();
    let degrees = graph.in_degrees();
    walk(graph, &forward, &degrees, *root)
}

/// Plan the deletion of everything hanging off `node`, leaving `node` itself.
///
/// Each direct child is deleted as a root in its own right (children of an
/// edited question are stale whatever else they draw from); their
/// descendants follow the usual join-preserving rule.
pub fn plan_descendant_deletion(graph: &ConversationGraph, node: &NodeId) -> DeletionPlan {
    let mut plan = DeletionPlan::default();
    if !graph.contains(node) {
        return plan;
    }
    let forward = graph.forward_adjacency();
    let degrees = graph.in_degrees();
    for child in forward.get(node).map(Vec::as_slice).unwrap_or(&[]) {
        if plan.contains(child) {
            continue;
        }
        plan.absorb(walk(graph, &forward, &degrees, *child));
    }
    plan
}

fn walk(
    graph: &ConversationGraph,
    forward: &HashMap<NodeId, Vec<NodeId>>,
    degrees: &HashMap<NodeId, usize>,
    root: NodeId,
) -> DeletionPlan {
    let mut plan = DeletionPlan::default();
    let mut visited: HashSet<NodeId> = HashSet::new();
    let mut stack = vec![root];

    while let Some(id) = stack.pop() {
        if !visited.insert(id) {
            continue;
        }
        plan.node_ids.push(id);
        if let Some(message_id) = graph.node(&id).and_then(|n| n.source_message_id) {
            plan.message_ids.push(message_id);
        }

        if let Some(children) = forward.get(&id) {
            for child in children.iter().rev() {
                // In-degree counts the edge we are severing; exactly one means
                // nothing else keeps the child alive.
                if degrees.get(child).copied().unwrap_or(0) == 1 {
                    stack.push(*child);
                } else {
                    tracing::debug!(node = %child, "keeping joined node with another live parent");
                }
            }
        }
    }

    plan
}

impl ConversationGraph {
    /// Apply a deletion plan, returning the number of nodes removed.
    pub fn apply_deletion(&mut self, plan: &DeletionPlan) -> usize {
        self.remove_nodes(&plan.node_set()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edaha_types::{ConversationId, Message, Node, NodeKind};
    use pretty_assertions::assert_eq;

    fn add(graph: &mut ConversationGraph, kind: NodeKind, parents: &[NodeId]) -> NodeId {
        let conv = graph.conversation_id();
        let node = Node::new(conv, kind, "").with_message(Message::new(conv, kind, "").id);
        let id = node.id;
        graph.insert_node(node, parents).unwrap();
        id
    }

    /// A(user) → B(ai) → C(user) → D(ai)
    fn chain() -> (ConversationGraph, [NodeId; 4]) {
        let mut g = ConversationGraph::new(ConversationId::new());
        let a = add(&mut g, NodeKind::User, &[]);
        let b = add(&mut g, NodeKind::Ai, &[a]);
        let c = add(&mut g, NodeKind::User, &[b]);
        let d = add(&mut g, NodeKind::Ai, &[c]);
        (g, [a, b, c, d])
    }

    fn sorted(mut ids: Vec<NodeId>) -> Vec<NodeId> {
        ids.sort();
        ids
    }

    #[test]
    fn test_delete_mid_chain_takes_descendants() {
        let (mut g, [a, b, c, d]) = chain();
        let plan = plan_subtree_deletion(&g, &c);

        assert_eq!(plan.node_ids, vec![c, d]);
        assert_eq!(plan.message_ids.len(), 2);

        assert_eq!(g.apply_deletion(&plan), 2);
        assert_eq!(sorted(g.nodes().map(|n| n.id).collect()), sorted(vec![a, b]));
        assert_eq!(g.edges().len(), 1);
    }

    #[test]
    fn test_delete_leaf_removes_only_leaf() {
        let (g, [_, _, _, d]) = chain();
        let plan = plan_subtree_deletion(&g, &d);
        assert_eq!(plan.node_ids, vec![d]);
    }

    #[test]
    fn test_delete_missing_node_is_noop() {
        let (g, _) = chain();
        let plan = plan_subtree_deletion(&g, &NodeId::new());
        assert!(plan.is_empty());
        assert!(plan.message_ids.is_empty());
    }

    #[test]
    fn test_join_survives_deleting_one_parent() {
        let (mut g, [a, b, c, d]) = chain();
        let e = add(&mut g, NodeKind::User, &[b, d]);

        let plan = plan_subtree_deletion(&g, &b);
        // C hangs only off B, so it goes, and D with it. E is a join: its
        // in-degree is 2, so the walk stops there.
        assert!(plan.contains(&b));
        assert!(!plan.contains(&e));
        assert!(!plan.contains(&a));
        assert_eq!(sorted(plan.node_ids.clone()), sorted(vec![b, c, d]));

        g.apply_deletion(&plan);
        assert!(g.contains(&e));
    }

    #[test]
    fn test_join_node_root_is_always_removed() {
        let (mut g, [_, b, _, d]) = chain();
        let e = add(&mut g, NodeKind::User, &[b, d]);
        let f = add(&mut g, NodeKind::Ai, &[e]);

        let plan = plan_subtree_deletion(&g, &e);
        assert_eq!(plan.node_ids, vec![e, f]);
    }

    #[test]
    fn test_join_preservation_property() {
        // Diamond plus a tail: X → {L, R} → J → T, and an outside parent O → J.
        let mut g = ConversationGraph::new(ConversationId::new());
        let x = add(&mut g, NodeKind::User, &[]);
        let l = add(&mut g, NodeKind::User, &[x]);
        let r = add(&mut g, NodeKind::User, &[x]);
        let o = add(&mut g, NodeKind::User, &[]);
        let j = add(&mut g, NodeKind::User, &[l, r, o]);
        let _t = add(&mut g, NodeKind::Ai, &[j]);

        for root in [x, l, r, o, j] {
            let plan = plan_subtree_deletion(&g, &root);
            let deleted = plan.node_set();
            for edge in g.edges() {
                if edge.target != root && deleted.contains(&edge.target) {
                    assert!(
                        deleted.contains(&edge.source),
                        "deleted {:?} which still has live parent {:?}",
                        edge.target,
                        edge.source
                    );
                }
            }
        }
    }

    #[test]
    fn test_descendant_deletion_keeps_the_node() {
        let (g, [a, b, c, d]) = chain();
        let plan = plan_descendant_deletion(&g, &a);
        assert_eq!(plan.node_ids, vec![b, c, d]);
        assert!(!plan.contains(&a));

        let leaf = plan_descendant_deletion(&g, &d);
        assert!(leaf.is_empty());
    }

    #[test]
    fn test_descendant_deletion_removes_joined_children() {
        let (mut g, [_, b, c, d]) = chain();
        let e = add(&mut g, NodeKind::User, &[c, b]);

        let plan = plan_descendant_deletion(&g, &c);
        assert_eq!(sorted(plan.node_ids.clone()), sorted(vec![d, e]));
    }
}
