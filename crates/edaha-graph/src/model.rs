//! In-memory conversation graph.
//!
//! [`ConversationGraph`] is an explicit value: an arena of nodes (kept in
//! insertion order) plus the flat edge list. Algorithms take it by reference
//! and return plans or derived views; the only mutators are the handful of
//! methods here, each of which keeps the DAG invariants intact.
//!
//! Acyclicity holds by construction: [`ConversationGraph::insert_node`] is the
//! only way to add edges, and it only links *existing* nodes to the node being
//! inserted.

use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::IndexMap;

use edaha_types::{ConversationId, Edge, Node, NodeId, NodeKind, Position};

use crate::{GraphError, Result};

/// A user node plus the AI node produced in direct response to it.
///
/// Derived, never persisted. Operations that "attach to a node" attach to
/// the pair's [`anchor`](QaPair::anchor).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QaPair {
    pub user: NodeId,
    pub ai: Option<NodeId>,
}

impl QaPair {
    /// The AI node if the question has been answered, else the user node.
    pub fn anchor(&self) -> NodeId {
        self.ai.unwrap_or(self.user)
    }

    pub fn is_answered(&self) -> bool {
        self.ai.is_some()
    }
}

/// A broken invariant reported by [`ConversationGraph::validate`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InvariantViolation {
    /// An AI node without exactly one incoming edge.
    AiParentCount { node: NodeId, count: usize },
    /// An AI node whose parent is not a user node.
    AiParentNotUser { node: NodeId, parent: NodeId },
    /// An edge whose source or target is not in the graph.
    DanglingEdge { source: NodeId, target: NodeId },
    /// Nodes that sit on (or behind) a cycle.
    Cycle { nodes: Vec<NodeId> },
}

/// Node/edge snapshot for one conversation.
#[derive(Clone, Debug)]
pub struct ConversationGraph {
    conversation_id: ConversationId,
    nodes: IndexMap<NodeId, Node>,
    edges: Vec<Edge>,
}

impl ConversationGraph {
    /// Create an empty graph.
    pub fn new(conversation_id: ConversationId) -> Self {
        Self {
            conversation_id,
            nodes: IndexMap::new(),
            edges: Vec::new(),
        }
    }

    /// Rebuild a graph from stored rows.
    ///
    /// Edges whose endpoints are missing are dropped with a warning; stored
    /// data is otherwise trusted as-is.
    pub fn from_parts(conversation_id: ConversationId, nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        let nodes: IndexMap<NodeId, Node> = nodes.into_iter().map(|n| (n.id, n)).collect();
        let edges = edges
            .into_iter()
            .filter(|e| {
                let known = nodes.contains_key(&e.source) && nodes.contains_key(&e.target);
                if !known {
                    tracing::warn!(
                        source = %e.source,
                        target = %e.target,
                        "dropping edge with unknown endpoint"
                    );
                }
                known
            })
            .collect();

        Self {
            conversation_id,
            nodes,
            edges,
        }
    }

    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    /// Get a node by ID.
    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// All nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    // =========================================================================
    // Adjacency
    // =========================================================================

    /// Sources of every edge pointing at `id`, in edge order.
    pub fn parents(&self, id: &NodeId) -> Vec<NodeId> {
        self.edges
            .iter()
            .filter(|e| e.target == *id)
            .map(|e| e.source)
            .collect()
    }

    /// Targets of every edge leaving `id`, in edge order.
    pub fn children(&self, id: &NodeId) -> Vec<NodeId> {
        self.edges
            .iter()
            .filter(|e| e.source == *id)
            .map(|e| e.target)
            .collect()
    }

    pub fn in_degree(&self, id: &NodeId) -> usize {
        self.edges.iter().filter(|e| e.target == *id).count()
    }

    /// `target → [source, …]` for every edge.
    pub fn reverse_adjacency(&self) -> HashMap<NodeId, Vec<NodeId>> {
        let mut map: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for edge in &self.edges {
            map.entry(edge.target).or_default().push(edge.source);
        }
        map
    }

    /// `source → [target, …]` for every edge.
    pub fn forward_adjacency(&self) -> HashMap<NodeId, Vec<NodeId>> {
        let mut map: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for edge in &self.edges {
            map.entry(edge.source).or_default().push(edge.target);
        }
        map
    }

    /// Incoming edge count per edge target. Nodes absent from the map have
    /// in-degree 0.
    pub fn in_degrees(&self) -> HashMap<NodeId, usize> {
        let mut map: HashMap<NodeId, usize> = HashMap::new();
        for edge in &self.edges {
            *map.entry(edge.target).or_default() += 1;
        }
        map
    }

    /// Nodes with no incoming edge, in insertion order.
    pub fn roots(&self) -> Vec<NodeId> {
        let degrees = self.in_degrees();
        self.nodes
            .keys()
            .filter(|id| !degrees.contains_key(id))
            .copied()
            .collect()
    }

    // =========================================================================
    // QA pairs
    // =========================================================================

    /// The question/answer pair a node belongs to.
    pub fn qa_pair(&self, id: &NodeId) -> Option<QaPair> {
        let node = self.nodes.get(id)?;
        match node.kind {
            NodeKind::User => {
                let ai = self
                    .children(id)
                    .into_iter()
                    .find(|child| self.nodes.get(child).is_some_and(Node::is_ai));
                Some(QaPair { user: *id, ai })
            }
            NodeKind::Ai => {
                let user = self
                    .parents(id)
                    .into_iter()
                    .find(|parent| self.nodes.get(parent).is_some_and(Node::is_user))?;
                Some(QaPair { user, ai: Some(*id) })
            }
        }
    }

    /// Anchor of the pair containing `id`.
    pub fn anchor_of(&self, id: &NodeId) -> Option<NodeId> {
        self.qa_pair(id).map(|pair| pair.anchor())
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Insert a new node with an edge from each distinct parent.
    ///
    /// Fails without touching the graph if the id is taken, a parent is
    /// unknown, or an AI node is not given exactly one user parent.
    pub fn insert_node(&mut self, node: Node, parents: &[NodeId]) -> Result<Vec<Edge>> {
        if self.nodes.contains_key(&node.id) {
            return Err(GraphError::DuplicateNode(node.id));
        }

        let mut distinct: Vec<NodeId> = Vec::with_capacity(parents.len());
        for parent in parents {
            if !self.nodes.contains_key(parent) {
                return Err(GraphError::NodeNotFound(*parent));
            }
            if !distinct.contains(parent) {
                distinct.push(*parent);
            }
        }

        if node.is_ai() {
            let user_parent = distinct.len() == 1
                && self.nodes.get(&distinct[0]).is_some_and(Node::is_user);
            if !user_parent {
                return Err(GraphError::InvalidAiParent(node.id));
            }
        }

        let edges: Vec<Edge> = distinct
            .iter()
            .map(|parent| Edge::new(self.conversation_id, *parent, node.id))
            .collect();

        self.nodes.insert(node.id, node);
        self.edges.extend(edges.iter().cloned());
        Ok(edges)
    }

    /// Rewrite a node's text.
    pub fn set_text(&mut self, id: &NodeId, text: impl Into<String>) -> Result<()> {
        let node = self.nodes.get_mut(id).ok_or(GraphError::NodeNotFound(*id))?;
        node.text = text.into();
        Ok(())
    }

    /// Move a node on the canvas.
    pub fn set_position(&mut self, id: &NodeId, position: Position) -> Result<()> {
        let node = self.nodes.get_mut(id).ok_or(GraphError::NodeNotFound(*id))?;
        node.position = Some(position);
        Ok(())
    }

    /// Remove nodes and every edge that touches them. Returns the removed
    /// nodes; unknown ids are ignored.
    pub fn remove_nodes(&mut self, ids: &HashSet<NodeId>) -> Vec<Node> {
        let removed: Vec<Node> = ids.iter().filter_map(|id| self.nodes.shift_remove(id)).collect();
        self.edges
            .retain(|e| !ids.contains(&e.source) && !ids.contains(&e.target));
        removed
    }

    // =========================================================================
    // Validation
    // =========================================================================

    /// Check the structural invariants. An empty result means the graph is sound.
    pub fn validate(&self) -> Vec<InvariantViolation> {
        let mut violations = Vec::new();

        for edge in &self.edges {
            if !self.nodes.contains_key(&edge.source) || !self.nodes.contains_key(&edge.target) {
                violations.push(InvariantViolation::DanglingEdge {
                    source: edge.source,
                    target: edge.target,
                });
            }
        }

        let reverse = self.reverse_adjacency();
        for node in self.nodes.values().filter(|n| n.is_ai()) {
            let parents = reverse.get(&node.id).map(Vec::as_slice).unwrap_or(&[]);
            if parents.len() != 1 {
                violations.push(InvariantViolation::AiParentCount {
                    node: node.id,
                    count: parents.len(),
                });
            } else if !self.nodes.get(&parents[0]).is_some_and(Node::is_user) {
                violations.push(InvariantViolation::AiParentNotUser {
                    node: node.id,
                    parent: parents[0],
                });
            }
        }

        // Kahn's algorithm: whatever never reaches in-degree 0 is on or behind a cycle.
        let forward = self.forward_adjacency();
        let mut degrees = self.in_degrees();
        let mut queue: VecDeque<NodeId> = self
            .nodes
            .keys()
            .filter(|id| !degrees.contains_key(id))
            .copied()
            .collect();
        let mut sorted = 0usize;
        while let Some(id) = queue.pop_front() {
            sorted += 1;
            for child in forward.get(&id).map(Vec::as_slice).unwrap_or(&[]) {
                if let Some(d) = degrees.get_mut(child) {
                    *d -= 1;
                    if *d == 0 {
                        queue.push_back(*child);
                    }
                }
            }
        }
        if sorted < self.nodes.len() {
            let stuck: Vec<NodeId> = self
                .nodes
                .keys()
                .filter(|id| degrees.get(id).is_some_and(|d| *d > 0))
                .copied()
                .collect();
            violations.push(InvariantViolation::Cycle { nodes: stuck });
        }

        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> ConversationGraph {
        ConversationGraph::new(ConversationId::new())
    }

    fn user(g: &ConversationGraph, text: &str) -> Node {
        Node::user(g.conversation_id(), text)
    }

    fn ai(g: &ConversationGraph, text: &str) -> Node {
        Node::ai(g.conversation_id(), text)
    }

    #[test]
    fn test_insert_and_adjacency() {
        let mut g = graph();
        let q = user(&g, "q");
        let a = ai(&g, "a");
        let (q_id, a_id) = (q.id, a.id);

        assert!(g.insert_node(q, &[]).unwrap().is_empty());
        let edges = g.insert_node(a, &[q_id]).unwrap();

        assert_eq!(edges.len(), 1);
        assert_eq!(g.children(&q_id), vec![a_id]);
        assert_eq!(g.parents(&a_id), vec![q_id]);
        assert_eq!(g.in_degree(&a_id), 1);
        assert_eq!(g.roots(), vec![q_id]);
        assert!(g.validate().is_empty());
    }

    #[test]
    fn test_insert_rejects_unknown_parent_without_mutation() {
        let mut g = graph();
        let q = user(&g, "q");
        let err = g.insert_node(q, &[NodeId::new()]).unwrap_err();
        assert!(matches!(err, GraphError::NodeNotFound(_)));
        assert!(g.is_empty());
        assert!(g.edges().is_empty());
    }

    #[test]
    fn test_insert_rejects_duplicate() {
        let mut g = graph();
        let q = user(&g, "q");
        g.insert_node(q.clone(), &[]).unwrap();
        assert_eq!(g.insert_node(q.clone(), &[]), Err(GraphError::DuplicateNode(q.id)));
    }

    #[test]
    fn test_ai_node_needs_single_user_parent() {
        let mut g = graph();
        let q1 = user(&g, "q1");
        let q2 = user(&g, "q2");
        let (q1_id, q2_id) = (q1.id, q2.id);
        g.insert_node(q1, &[]).unwrap();
        g.insert_node(q2, &[]).unwrap();

        let orphan = ai(&g, "no parent");
        assert!(matches!(g.insert_node(orphan, &[]), Err(GraphError::InvalidAiParent(_))));

        let joined = ai(&g, "two parents");
        assert!(matches!(
            g.insert_node(joined, &[q1_id, q2_id]),
            Err(GraphError::InvalidAiParent(_))
        ));

        let a = ai(&g, "a");
        let a_id = a.id;
        g.insert_node(a, &[q1_id]).unwrap();
        let on_ai = ai(&g, "ai under ai");
        assert!(matches!(g.insert_node(on_ai, &[a_id]), Err(GraphError::InvalidAiParent(_))));
    }

    #[test]
    fn test_duplicate_parents_make_one_edge() {
        let mut g = graph();
        let q = user(&g, "q");
        let q_id = q.id;
        g.insert_node(q, &[]).unwrap();
        let follow = user(&g, "follow");
        let edges = g.insert_node(follow, &[q_id, q_id]).unwrap();
        assert_eq!(edges.len(), 1);
    }

    #[test]
    fn test_qa_pair_and_anchor() {
        let mut g = graph();
        let q = user(&g, "q");
        let a = ai(&g, "a");
        let lone = user(&g, "unanswered");
        let (q_id, a_id, lone_id) = (q.id, a.id, lone.id);
        g.insert_node(q, &[]).unwrap();
        g.insert_node(a, &[q_id]).unwrap();
        g.insert_node(lone, &[a_id]).unwrap();

        let pair = g.qa_pair(&q_id).unwrap();
        assert_eq!(pair, QaPair { user: q_id, ai: Some(a_id) });
        assert_eq!(g.anchor_of(&q_id), Some(a_id));
        assert_eq!(g.anchor_of(&a_id), Some(a_id));

        let unanswered = g.qa_pair(&lone_id).unwrap();
        assert!(!unanswered.is_answered());
        assert_eq!(g.anchor_of(&lone_id), Some(lone_id));
        assert_eq!(g.anchor_of(&NodeId::new()), None);
    }

    #[test]
    fn test_remove_nodes_drops_touching_edges() {
        let mut g = graph();
        let q = user(&g, "q");
        let a = ai(&g, "a");
        let (q_id, a_id) = (q.id, a.id);
        g.insert_node(q, &[]).unwrap();
        g.insert_node(a, &[q_id]).unwrap();

        let removed = g.remove_nodes(&HashSet::from([a_id]));
        assert_eq!(removed.len(), 1);
        assert!(g.edges().is_empty());
        assert!(g.contains(&q_id));
    }

    #[test]
    fn test_from_parts_drops_dangling_edges() {
        let conv = ConversationId::new();
        let q = Node::user(conv, "q");
        let ghost = Edge::new(conv, q.id, NodeId::new());
        let g = ConversationGraph::from_parts(conv, vec![q], vec![ghost]);
        assert_eq!(g.len(), 1);
        assert!(g.edges().is_empty());
    }

    #[test]
    fn test_validate_reports_bad_ai_and_cycle() {
        let conv = ConversationId::new();
        let u1 = Node::user(conv, "u1");
        let u2 = Node::user(conv, "u2");
        let stray = Node::ai(conv, "stray");
        let edges = vec![
            Edge::new(conv, u1.id, u2.id),
            Edge::new(conv, u2.id, u1.id),
        ];
        let g = ConversationGraph::from_parts(conv, vec![u1, u2, stray.clone()], edges);

        let violations = g.validate();
        assert!(violations.contains(&InvariantViolation::AiParentCount { node: stray.id, count: 0 }));
        assert!(violations.iter().any(|v| matches!(v, InvariantViolation::Cycle { nodes } if nodes.len() == 2)));
    }

    #[test]
    fn test_set_text_and_position() {
        let mut g = graph();
        let q = user(&g, "old");
        let q_id = q.id;
        g.insert_node(q, &[]).unwrap();

        g.set_text(&q_id, "new").unwrap();
        g.set_position(&q_id, Position::new(5.0, 6.0)).unwrap();
        let node = g.node(&q_id).unwrap();
        assert_eq!(node.text, "new");
        assert_eq!(node.position, Some(Position::new(5.0, 6.0)));

        assert!(g.set_text(&NodeId::new(), "x").is_err());
    }
}
