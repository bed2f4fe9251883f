use std::collections::BTreeMap;

use serde::Serialize;

use crate::ir::Point;

pub use super::geometry::Rect;

#[derive(Debug, Clone, Serialize)]
pub struct TextBlock {
    pub lines: Vec<String>,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BendOrder {
    HorizontalFirst,
    VerticalFirst,
}

/// One arc's routed polyline for the current cycle.
#[derive(Debug, Clone, Serialize)]
pub struct RoutedArc {
    pub arc_id: String,
    /// `[from port, exit, …, entry, to port]`, axis-aligned.
    pub points: Vec<Point>,
    pub label_anchor: Point,
    /// Unit normal at the anchor; labels sit on this side of the route.
    pub label_normal: Point,
    pub bend_order: BendOrder,
    /// Total perpendicular offset (bundle lane plus any extra shift).
    pub lane_offset: f32,
    pub score: f32,
    /// Interior segments that strictly cross a non-endpoint node.
    pub node_crossings: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum LabelKey {
    Port(String),
    Arc(String),
}

impl LabelKey {
    pub fn class(&self) -> LabelClass {
        match self {
            LabelKey::Port(_) => LabelClass::Port,
            LabelKey::Arc(_) => LabelClass::Arc,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            LabelKey::Port(id) | LabelKey::Arc(id) => id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LabelClass {
    Port,
    Arc,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlacedLabel {
    pub key: LabelKey,
    pub rect: Rect,
    pub preferred: Rect,
    /// The class drift limit was exceeded because no clear spot existed
    /// inside it.
    pub widened: bool,
}

impl PlacedLabel {
    pub fn drift(&self) -> Point {
        (self.rect.x - self.preferred.x, self.rect.y - self.preferred.y)
    }
}

/// A rectangle the router should steer around, tagged with the label it
/// came from.
#[derive(Debug, Clone, Serialize)]
pub struct LabelObstacle {
    pub key: LabelKey,
    pub rect: Rect,
}

/// Everything one cycle produced for the rendering layer.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LayoutFrame {
    pub routes: Vec<RoutedArc>,
    pub labels: Vec<PlacedLabel>,
    pub node_positions: BTreeMap<String, Point>,
    /// Whether the node-repositioning sub-pass moved anything.
    pub repositioned: bool,
}

impl LayoutFrame {
    pub fn route(&self, arc_id: &str) -> Option<&RoutedArc> {
        self.routes.iter().find(|route| route.arc_id == arc_id)
    }

    pub fn label(&self, key: &LabelKey) -> Option<&PlacedLabel> {
        self.labels.iter().find(|label| &label.key == key)
    }

    /// Label rectangles in the shape the router consumes next cycle.
    pub fn label_obstacles(&self) -> Vec<LabelObstacle> {
        self.labels
            .iter()
            .map(|label| LabelObstacle {
                key: label.key.clone(),
                rect: label.rect,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ForceBreakdown {
    pub gravity: Point,
    pub overlap: Point,
    pub arc: Point,
    pub total: Point,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodePrediction {
    pub node_id: String,
    pub forces: ForceBreakdown,
    pub position: Point,
    pub velocity: Point,
}

/// Result of a non-mutating physics step.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StepPreview {
    pub dt: f32,
    pub nodes: Vec<NodePrediction>,
    /// Forces on each arc's internal points, keyed by arc id.
    pub arc_point_forces: BTreeMap<String, Vec<Point>>,
}

impl StepPreview {
    pub fn net_force(&self) -> Point {
        self.nodes.iter().fold((0.0, 0.0), |acc, node| {
            (acc.0 + node.forces.total.0, acc.1 + node.forces.total.1)
        })
    }

    pub fn node(&self, node_id: &str) -> Option<&NodePrediction> {
        self.nodes.iter().find(|node| node.node_id == node_id)
    }
}
