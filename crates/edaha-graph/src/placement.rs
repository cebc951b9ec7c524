//! Collision-free placement of new nodes.
//!
//! A new node is tried at a fixed list of slots around its parent, then on a
//! spiral around the parent's centre, and finally directly below everything
//! already on the canvas. The last step always succeeds, so placement never
//! fails; it may just land far from the parent.
//!
//! Nodes that have not been rendered yet have no measured size, so they are
//! placed with default dimensions. [`LayoutPlanner`] makes that explicit:
//! [`place_provisional`](LayoutPlanner::place_provisional) records a guess,
//! and [`reconcile`](LayoutPlanner::reconcile) applies measured sizes and
//! reports every node it had to move as a [`Reflow`].

use std::collections::{HashMap, HashSet};
use std::f64::consts::{FRAC_PI_2, TAU};

use indexmap::IndexMap;
use kurbo::{Point, Rect, Size, Vec2};
use serde::{Deserialize, Serialize};

use edaha_types::{NodeId, Position};

use crate::ConversationGraph;

pub const DEFAULT_NODE_WIDTH: f64 = 320.0;
pub const DEFAULT_NODE_HEIGHT: f64 = 180.0;
pub const DEFAULT_SPACING: f64 = 40.0;

/// Rings tried by the spiral search.
pub const SPIRAL_RINGS: usize = 10;
/// Directions tried per spiral ring.
pub const SPIRAL_DIRECTIONS: usize = 8;

/// Placement tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementConfig {
    /// Minimum gap between two nodes on at least one axis.
    pub spacing: f64,
    /// Width assumed for nodes that have not been measured.
    pub default_width: f64,
    /// Height assumed for nodes that have not been measured.
    pub default_height: f64,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            spacing: DEFAULT_SPACING,
            default_width: DEFAULT_NODE_WIDTH,
            default_height: DEFAULT_NODE_HEIGHT,
        }
    }
}

impl PlacementConfig {
    pub fn default_size(&self) -> Size {
        Size::new(self.default_width, self.default_height)
    }
}

/// Fixed candidate positions relative to the parent, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Below,
    BelowRight,
    BelowLeft,
    FurtherBelow,
    Right,
    Left,
    /// Last resort before the spiral.
    Above,
}

impl Slot {
    pub const ORDER: [Slot; 7] = [
        Slot::Below,
        Slot::BelowRight,
        Slot::BelowLeft,
        Slot::FurtherBelow,
        Slot::Right,
        Slot::Left,
        Slot::Above,
    ];

    /// Top-left corner of a `size` node in this slot around `parent`.
    pub fn origin(self, parent: Rect, size: Size, spacing: f64) -> Point {
        let centered_x = parent.x0 + (parent.width() - size.width) / 2.0;
        let below_y = parent.y1 + spacing;
        let right_x = parent.x1 + spacing;
        let left_x = parent.x0 - size.width - spacing;

        match self {
            Slot::Below => Point::new(centered_x, below_y),
            Slot::BelowRight => Point::new(right_x, below_y),
            Slot::BelowLeft => Point::new(left_x, below_y),
            Slot::FurtherBelow => Point::new(centered_x, below_y + size.height + spacing),
            Slot::Right => Point::new(right_x, parent.y0),
            Slot::Left => Point::new(left_x, parent.y0),
            Slot::Above => Point::new(centered_x, parent.y0 - size.height - spacing),
        }
    }
}

/// How a placement was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementStrategy {
    /// Empty canvas, placed at the origin.
    Origin,
    Slot(Slot),
    /// `direction` counts 45° steps clockwise from straight below.
    Spiral { ring: usize, direction: usize },
    /// Below the lowest occupied rectangle.
    Fallback,
}

/// Result of a placement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub origin: Point,
    pub strategy: PlacementStrategy,
}

impl Placement {
    pub fn position(&self) -> Position {
        to_position(self.origin)
    }
}

pub fn to_position(point: Point) -> Position {
    Position::new(point.x, point.y)
}

pub fn to_point(position: Position) -> Point {
    Point::new(position.x, position.y)
}

/// Two rectangles collide unless at least `spacing` separates them on the x
/// or the y axis. A gap of exactly `spacing` is fine.
pub fn collides(a: &Rect, b: &Rect, spacing: f64) -> bool {
    a.x0 < b.x1 + spacing && b.x0 < a.x1 + spacing && a.y0 < b.y1 + spacing && b.y0 < a.y1 + spacing
}

fn is_free(candidate: &Rect, parent: &Rect, occupied: &[Rect], spacing: f64) -> bool {
    !collides(candidate, parent, spacing) && occupied.iter().all(|o| !collides(candidate, o, spacing))
}

/// Place a `size` node next to `parent` without touching anything in `occupied`.
///
/// The parent counts as occupied whether or not it is in the slice.
pub fn place_node(parent: Rect, size: Size, occupied: &[Rect], spacing: f64) -> Placement {
    for slot in Slot::ORDER {
        let origin = slot.origin(parent, size, spacing);
        if is_free(&Rect::from_origin_size(origin, size), &parent, occupied, spacing) {
            return Placement {
                origin,
                strategy: PlacementStrategy::Slot(slot),
            };
        }
    }

    let center = parent.center();
    let half = Vec2::new(size.width / 2.0, size.height / 2.0);
    let step = size.max_side() + spacing;
    for ring in 1..=SPIRAL_RINGS {
        let radius = ring as f64 * step;
        for direction in 0..SPIRAL_DIRECTIONS {
            let angle = FRAC_PI_2 + direction as f64 * TAU / SPIRAL_DIRECTIONS as f64;
            let origin = center + Vec2::from_angle(angle) * radius - half;
            if is_free(&Rect::from_origin_size(origin, size), &parent, occupied, spacing) {
                return Placement {
                    origin,
                    strategy: PlacementStrategy::Spiral { ring, direction },
                };
            }
        }
    }

    tracing::debug!(occupied = occupied.len(), "placement slots and spiral exhausted");
    let lowest = occupied.iter().map(|r| r.y1).fold(parent.y1, f64::max);
    Placement {
        origin: Point::new(center.x - half.x, lowest + 2.0 * spacing),
        strategy: PlacementStrategy::Fallback,
    }
}

/// Place a node that has no parent (a new root question).
pub fn place_root(occupied: &[Rect], spacing: f64) -> Placement {
    if occupied.is_empty() {
        return Placement {
            origin: Point::ZERO,
            strategy: PlacementStrategy::Origin,
        };
    }
    let left = occupied.iter().map(|r| r.x0).fold(f64::INFINITY, f64::min);
    let lowest = occupied.iter().map(|r| r.y1).fold(f64::NEG_INFINITY, f64::max);
    Placement {
        origin: Point::new(left, lowest + 2.0 * spacing),
        strategy: PlacementStrategy::Fallback,
    }
}

// ============================================================================
// Two-phase layout
// ============================================================================

/// A node's rectangle as the planner knows it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeBox {
    pub origin: Point,
    pub size: Size,
    /// False while the size is still the default guess.
    pub measured: bool,
}

impl NodeBox {
    pub fn rect(&self) -> Rect {
        Rect::from_origin_size(self.origin, self.size)
    }
}

/// A node moved by [`LayoutPlanner::reconcile`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reflow {
    pub node_id: NodeId,
    pub from: Point,
    pub to: Point,
}

/// Tracks node rectangles for a conversation and places new nodes against them.
#[derive(Debug, Clone, Default)]
pub struct LayoutPlanner {
    config: PlacementConfig,
    boxes: IndexMap<NodeId, NodeBox>,
    /// Parent used when a provisional node was placed, for re-placement.
    anchors: HashMap<NodeId, Option<NodeId>>,
    /// Nodes placed with guessed dimensions and not yet reconciled.
    provisional: HashSet<NodeId>,
}

impl LayoutPlanner {
    pub fn new(config: PlacementConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Seed the planner with every positioned node of a graph, at default size.
    pub fn from_graph(graph: &ConversationGraph, config: PlacementConfig) -> Self {
        let mut planner = Self::new(config);
        for node in graph.nodes() {
            if let Some(position) = node.position {
                planner.insert(node.id, to_point(position), None);
            }
        }
        planner
    }

    pub fn config(&self) -> &PlacementConfig {
        &self.config
    }

    /// Record an already placed node. `None` size means "not measured yet".
    pub fn insert(&mut self, id: NodeId, origin: Point, size: Option<Size>) {
        let measured = size.is_some();
        let size = size.unwrap_or_else(|| self.config.default_size());
        self.boxes.insert(id, NodeBox { origin, size, measured });
    }

    /// Move a node (user drag). Does not change its size.
    pub fn move_to(&mut self, id: &NodeId, origin: Point) {
        if let Some(b) = self.boxes.get_mut(id) {
            b.origin = origin;
        }
        self.provisional.remove(id);
    }

    pub fn remove(&mut self, id: &NodeId) {
        self.boxes.shift_remove(id);
        self.anchors.remove(id);
        self.provisional.remove(id);
    }

    pub fn get(&self, id: &NodeId) -> Option<&NodeBox> {
        self.boxes.get(id)
    }

    pub fn is_provisional(&self, id: &NodeId) -> bool {
        self.provisional.contains(id)
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    fn occupied_except(&self, skip: &NodeId) -> Vec<Rect> {
        self.boxes
            .iter()
            .filter(|(id, _)| *id != skip)
            .map(|(_, b)| b.rect())
            .collect()
    }

    fn compute(&self, id: &NodeId, parent: Option<NodeId>, size: Size) -> Placement {
        let occupied = self.occupied_except(id);
        let parent_rect = parent.and_then(|p| self.boxes.get(&p)).map(NodeBox::rect);
        match parent_rect {
            Some(rect) => place_node(rect, size, &occupied, self.config.spacing),
            None => place_root(&occupied, self.config.spacing),
        }
    }

    /// Phase one: place a new node using its measured size if known, else
    /// the default size, and remember it as provisional until reconciled.
    ///
    /// A parent the planner has never seen is treated as no parent.
    pub fn place_provisional(&mut self, id: NodeId, parent: Option<NodeId>, size: Option<Size>) -> Placement {
        let measured = size.is_some();
        let size = size.unwrap_or_else(|| self.config.default_size());
        let placement = self.compute(&id, parent, size);

        self.boxes.insert(id, NodeBox { origin: placement.origin, size, measured });
        self.anchors.insert(id, parent);
        if !measured {
            self.provisional.insert(id);
        }
        placement
    }

    /// Phase two: apply measured sizes. Any provisional node that now
    /// collides with another node is re-placed, and every move is returned.
    ///
    /// Nodes placed explicitly (not provisional) keep their positions even
    /// if their new size overlaps something.
    pub fn reconcile(&mut self, measured: &HashMap<NodeId, Size>) -> Vec<Reflow> {
        for (id, size) in measured {
            if let Some(b) = self.boxes.get_mut(id) {
                b.size = *size;
                b.measured = true;
            }
        }

        let candidates: Vec<NodeId> = self
            .boxes
            .keys()
            .filter(|id| self.provisional.contains(*id) && measured.contains_key(*id))
            .copied()
            .collect();

        let mut reflows = Vec::new();
        for id in candidates {
            self.provisional.remove(&id);
            let Some(current) = self.boxes.get(&id).copied() else {
                continue;
            };
            let rect = current.rect();
            let overlapping = self
                .occupied_except(&id)
                .iter()
                .any(|o| collides(&rect, o, self.config.spacing));
            if !overlapping {
                continue;
            }

            let parent = self.anchors.get(&id).copied().flatten();
            let placement = self.compute(&id, parent, current.size);
            if let Some(b) = self.boxes.get_mut(&id) {
                b.origin = placement.origin;
            }
            tracing::debug!(node = %id, strategy = ?placement.strategy, "reflowed node after measurement");
            reflows.push(Reflow {
                node_id: id,
                from: current.origin,
                to: placement.origin,
            });
        }

        reflows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn rect(x: f64, y: f64, w: f64, h: f64) -> Rect {
        Rect::from_origin_size(Point::new(x, y), Size::new(w, h))
    }

    fn default_size() -> Size {
        PlacementConfig::default().default_size()
    }

    #[test]
    fn test_below_when_free() {
        let parent = rect(0.0, 0.0, 320.0, 180.0);
        let placement = place_node(parent, default_size(), &[], DEFAULT_SPACING);
        assert_eq!(placement.strategy, PlacementStrategy::Slot(Slot::Below));
        assert_eq!(placement.origin, Point::new(0.0, 220.0));
    }

    #[test]
    fn test_below_right_when_below_taken() {
        let parent = rect(0.0, 0.0, 320.0, 180.0);
        let taken = [rect(0.0, 220.0, 320.0, 180.0)];
        let placement = place_node(parent, default_size(), &taken, DEFAULT_SPACING);
        assert_eq!(placement.strategy, PlacementStrategy::Slot(Slot::BelowRight));
        assert_eq!(placement.origin, Point::new(360.0, 220.0));
    }

    #[test]
    fn test_slot_order_progresses() {
        let parent = rect(0.0, 0.0, 320.0, 180.0);
        let size = default_size();
        let mut taken = Vec::new();
        for expected in [Slot::Below, Slot::BelowRight, Slot::BelowLeft, Slot::FurtherBelow] {
            let placement = place_node(parent, size, &taken, DEFAULT_SPACING);
            assert_eq!(placement.strategy, PlacementStrategy::Slot(expected));
            taken.push(Rect::from_origin_size(placement.origin, size));
        }
    }

    #[test]
    fn test_collision_uses_spacing() {
        let a = rect(0.0, 0.0, 100.0, 100.0);
        assert!(collides(&a, &rect(130.0, 0.0, 100.0, 100.0), 40.0));
        assert!(!collides(&a, &rect(140.0, 0.0, 100.0, 100.0), 40.0));
        assert!(!collides(&a, &rect(0.0, 140.0, 100.0, 100.0), 40.0));
        assert!(collides(&a, &rect(50.0, 50.0, 10.0, 10.0), 0.0));
    }

    #[test]
    fn test_spiral_when_slots_taken() {
        let parent = rect(0.0, 0.0, 320.0, 180.0);
        let size = default_size();
        let taken: Vec<Rect> = Slot::ORDER
            .iter()
            .map(|slot| Rect::from_origin_size(slot.origin(parent, size, DEFAULT_SPACING), size))
            .collect();

        let placement = place_node(parent, size, &taken, DEFAULT_SPACING);
        assert!(matches!(placement.strategy, PlacementStrategy::Spiral { .. }));
        let placed = Rect::from_origin_size(placement.origin, size);
        assert!(taken.iter().all(|t| !collides(&placed, t, DEFAULT_SPACING)));
        assert!(!collides(&placed, &parent, DEFAULT_SPACING));
    }

    #[test]
    fn test_first_spiral_step_is_straight_below() {
        // A wide, flat node pushes the first ring well past every slot.
        let parent = rect(0.0, 0.0, 320.0, 20.0);
        let size = Size::new(1000.0, 20.0);
        let taken: Vec<Rect> = Slot::ORDER
            .iter()
            .map(|slot| Rect::from_origin_size(slot.origin(parent, size, DEFAULT_SPACING), Size::new(1.0, 1.0)))
            .collect();

        let placement = place_node(parent, size, &taken, DEFAULT_SPACING);
        assert_eq!(placement.strategy, PlacementStrategy::Spiral { ring: 1, direction: 0 });
        // Centre is (160, 10); step is 1000 + 40 straight down.
        assert!((placement.origin.x + 340.0).abs() < 1e-9);
        assert_eq!(placement.origin.y, 1040.0);
    }

    #[test]
    fn test_fallback_when_everything_taken() {
        let parent = rect(0.0, 0.0, 320.0, 180.0);
        // One huge rectangle covers every slot and spiral ring.
        let wall = [rect(-10_000.0, -10_000.0, 20_000.0, 20_000.0)];
        let placement = place_node(parent, default_size(), &wall, DEFAULT_SPACING);

        assert_eq!(placement.strategy, PlacementStrategy::Fallback);
        assert_eq!(placement.origin.y, 10_000.0 + 2.0 * DEFAULT_SPACING);
        let placed = Rect::from_origin_size(placement.origin, default_size());
        assert!(!collides(&placed, &wall[0], DEFAULT_SPACING));
    }

    #[test]
    fn test_never_overlaps_dense_grid() {
        // Deterministic pseudo-random clutter around the parent.
        let parent = rect(0.0, 0.0, 200.0, 120.0);
        let size = Size::new(180.0, 90.0);
        let mut occupied = Vec::new();
        let mut seed: u64 = 42;
        for _ in 0..60 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let x = ((seed >> 33) % 2000) as f64 - 1000.0;
            let y = ((seed >> 17) % 2000) as f64 - 1000.0;
            occupied.push(rect(x, y, 150.0, 80.0));
        }

        for _ in 0..20 {
            let placement = place_node(parent, size, &occupied, DEFAULT_SPACING);
            let placed = Rect::from_origin_size(placement.origin, size);
            assert!(occupied.iter().all(|o| !collides(&placed, o, DEFAULT_SPACING)));
            assert!(!collides(&placed, &parent, DEFAULT_SPACING));
            occupied.push(placed);
        }
    }

    #[test]
    fn test_root_placement() {
        let empty = place_root(&[], DEFAULT_SPACING);
        assert_eq!(empty.strategy, PlacementStrategy::Origin);
        assert_eq!(empty.origin, Point::ZERO);

        let occupied = [rect(10.0, 0.0, 320.0, 180.0), rect(400.0, 300.0, 100.0, 100.0)];
        let root = place_root(&occupied, DEFAULT_SPACING);
        assert_eq!(root.origin, Point::new(10.0, 400.0 + 2.0 * DEFAULT_SPACING));
    }

    #[test]
    fn test_planner_reconcile_reflows_grown_node() {
        let mut planner = LayoutPlanner::new(PlacementConfig::default());
        let parent = NodeId::new();
        planner.insert(parent, Point::ZERO, Some(Size::new(320.0, 180.0)));

        let first = NodeId::new();
        let second = NodeId::new();
        let p1 = planner.place_provisional(first, Some(parent), None);
        let p2 = planner.place_provisional(second, Some(parent), None);
        assert_eq!(p1.origin, Point::new(0.0, 220.0));
        assert_eq!(p2.origin, Point::new(360.0, 220.0));
        assert!(planner.is_provisional(&first));

        // `first` renders much wider than guessed and now overlaps `second`.
        let measured = HashMap::from([(first, Size::new(500.0, 180.0))]);
        let reflows = planner.reconcile(&measured);

        assert_eq!(reflows.len(), 1);
        assert_eq!(reflows[0].node_id, first);
        assert_eq!(reflows[0].from, Point::new(0.0, 220.0));
        assert!(!planner.is_provisional(&first));

        let moved = planner.get(&first).unwrap();
        assert!(moved.measured);
        let other = planner.get(&second).unwrap();
        assert!(!collides(&moved.rect(), &other.rect(), DEFAULT_SPACING));
    }

    #[test]
    fn test_planner_reconcile_without_overlap_is_quiet() {
        let mut planner = LayoutPlanner::new(PlacementConfig::default());
        let parent = NodeId::new();
        planner.insert(parent, Point::ZERO, None);
        let child = NodeId::new();
        planner.place_provisional(child, Some(parent), None);

        let measured = HashMap::from([(child, Size::new(300.0, 150.0))]);
        assert!(planner.reconcile(&measured).is_empty());
        assert_eq!(planner.get(&child).unwrap().size, Size::new(300.0, 150.0));
    }

    #[test]
    fn test_config_from_partial_json() {
        let config: PlacementConfig = serde_json::from_str(r#"{"spacing": 12.0}"#).unwrap();
        assert_eq!(config.spacing, 12.0);
        assert_eq!(config.default_width, DEFAULT_NODE_WIDTH);
    }
}
