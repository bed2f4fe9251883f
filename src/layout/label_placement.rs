// Port and arc label placement. Labels start from a deterministic preferred
// rectangle plus whatever drift they had last cycle, then relax against their
// surroundings.

use std::collections::HashMap;

use crate::config::{LabelConfig, PortLabelAlign};
use crate::ir::{Diagram, Node, Point, Port, Side, port_world_position};

use super::geometry::{EPS, Rect, add, clamp_length, length, scale, sub};
use super::text::measure_label;
use super::types::{LabelClass, LabelKey, PlacedLabel, RoutedArc};

/// Fallback view size when the diagram has no nodes to take bounds from.
const EMPTY_VIEW_EXTENT: f32 = 1000.0;

/// Label drift carried between cycles, keyed by entity.
#[derive(Debug, Clone, Default)]
pub struct LabelState {
    drift: HashMap<LabelKey, Point>,
}

impl LabelState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.drift.clear();
    }

    pub fn drift(&self, key: &LabelKey) -> Option<Point> {
        self.drift.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.drift.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drift.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
struct ClassParams {
    stiffness: f32,
    max_drift: f32,
    wide_drift: f32,
    mobility: f32,
}

impl ClassParams {
    fn for_class(class: LabelClass, config: &LabelConfig) -> Self {
        let (stiffness, max_drift, mobility) = match class {
            LabelClass::Port => (config.port_stiffness, config.port_max_drift, config.port_mobility),
            LabelClass::Arc => (config.arc_stiffness, config.arc_max_drift, config.arc_mobility),
        };
        let max_drift = max_drift.max(0.0);
        Self {
            stiffness: stiffness.clamp(0.0, 1.0),
            max_drift,
            wide_drift: max_drift * config.fallback_drift_multiplier.max(1.0),
            mobility: mobility.max(0.0),
        }
    }
}

struct LabelEntry {
    key: LabelKey,
    params: ClassParams,
    /// Owning node for port labels.
    owner: Option<usize>,
    preferred: Rect,
    rect: Rect,
}

impl LabelEntry {
    fn is_arc(&self) -> bool {
        matches!(self.key, LabelKey::Arc(_))
    }

    fn drift(&self) -> Point {
        (self.rect.x - self.preferred.x, self.rect.y - self.preferred.y)
    }

    fn set_drift(&mut self, drift: Point) {
        self.rect = self.preferred.translate(drift);
    }
}

/// View rectangle labels are clamped into: the caller's, or the diagram
/// bounds inflated by the view margin.
pub fn view_bounds(diagram: &Diagram, config: &LabelConfig, view: Option<Rect>) -> Rect {
    if let Some(view) = view {
        return view;
    }
    diagram
        .bounds()
        .map(|bounds| bounds.inflate(config.view_margin.max(0.0)))
        .unwrap_or_else(|| {
            Rect::centered((0.0, 0.0), EMPTY_VIEW_EXTENT, EMPTY_VIEW_EXTENT)
        })
}

fn aligned_start(port_coord: f32, extent: f32, align: PortLabelAlign) -> f32 {
    match align {
        PortLabelAlign::Flush => port_coord,
        PortLabelAlign::Centered => port_coord - extent / 2.0,
        PortLabelAlign::Opposite => port_coord - extent,
    }
}

/// Preferred rectangle of a port label of `size`. Side ports put the label
/// beside the node, top/bottom ports above or below it.
pub fn preferred_port_label_rect(
    node: &Node,
    port: &Port,
    size: (f32, f32),
    config: &LabelConfig,
) -> Rect {
    let (w, h) = size;
    let (px, py) = port_world_position(node, &port.reference);
    let offset = config.port_label_offset;
    // Side ports: Flush keeps the label's bottom edge on the port.
    let side_y = match config.side_port_align {
        PortLabelAlign::Flush => py - h,
        PortLabelAlign::Centered => py - h / 2.0,
        PortLabelAlign::Opposite => py,
    };
    match port.side() {
        Side::Right => Rect::new(px + offset, side_y, w, h),
        Side::Left => Rect::new(px - offset - w, side_y, w, h),
        Side::Top => Rect::new(aligned_start(px, w, config.end_port_align), py - offset - h, w, h),
        Side::Bottom => Rect::new(aligned_start(px, w, config.end_port_align), py + offset, w, h),
    }
}

/// Preferred rectangle of an arc label: centered on the route's anchor,
/// pushed along the anchor normal until it clears the route by the offset.
pub fn preferred_arc_label_rect(route: &RoutedArc, size: (f32, f32), config: &LabelConfig) -> Rect {
    let (w, h) = size;
    let n = route.label_normal;
    let reach = n.0.abs() * w / 2.0 + n.1.abs() * h / 2.0 + config.arc_label_offset;
    Rect::centered(add(route.label_anchor, scale(n, reach)), w, h)
}

fn build_entries(
    diagram: &Diagram,
    routes: &[RoutedArc],
    config: &LabelConfig,
    state: &LabelState,
) -> Vec<LabelEntry> {
    let mut entries = Vec::new();
    for port in diagram.ports() {
        let Some((owner, node)) = diagram
            .nodes()
            .iter()
            .enumerate()
            .find(|(_, node)| node.id() == port.node_id())
        else {
            continue;
        };
        let Some(block) = measure_label(&port.text, config) else {
            continue;
        };
        let preferred = preferred_port_label_rect(node, port, (block.width, block.height), config);
        entries.push(new_entry(
            LabelKey::Port(port.id().to_string()),
            Some(owner),
            preferred,
            config,
            state,
        ));
    }
    for route in routes {
        let Some(arc) = diagram.try_get_arc(&route.arc_id) else {
            continue;
        };
        let Some(block) = measure_label(&arc.text, config) else {
            continue;
        };
        let preferred = preferred_arc_label_rect(route, (block.width, block.height), config);
        entries.push(new_entry(
            LabelKey::Arc(route.arc_id.clone()),
            None,
            preferred,
            config,
            state,
        ));
    }
    entries.sort_by(|a, b| a.key.cmp(&b.key));
    entries
}

fn new_entry(
    key: LabelKey,
    owner: Option<usize>,
    preferred: Rect,
    config: &LabelConfig,
    state: &LabelState,
) -> LabelEntry {
    let params = ClassParams::for_class(key.class(), config);
    let drift = state
        .drift(&key)
        .filter(|d| d.0.is_finite() && d.1.is_finite())
        .map(|d| clamp_length(d, params.wide_drift))
        .unwrap_or((0.0, 0.0));
    LabelEntry {
        key,
        params,
        owner,
        preferred,
        rect: preferred.translate(drift),
    }
}

/// Thin rectangles for every routed segment, used to keep arc labels off
/// the lines.
fn segment_rects(routes: &[RoutedArc], clearance: f32) -> Vec<Rect> {
    routes
        .iter()
        .flat_map(|route| route.points.windows(2))
        .map(|seg| {
            let x = seg[0].0.min(seg[1].0);
            let y = seg[0].1.min(seg[1].1);
            Rect::new(x, y, (seg[0].0 - seg[1].0).abs(), (seg[0].1 - seg[1].1).abs())
                .inflate(clearance)
        })
        .collect()
}

/// Places every non-blank port and arc label and updates the drift cache.
pub fn place_labels(
    diagram: &Diagram,
    routes: &[RoutedArc],
    config: &LabelConfig,
    view: Option<Rect>,
    state: &mut LabelState,
) -> Vec<PlacedLabel> {
    let view = view_bounds(diagram, config, view);
    let mut entries = build_entries(diagram, routes, config, state);
    let node_rects: Vec<Rect> = diagram.nodes().iter().map(Node::bounds).collect();
    let segments = segment_rects(routes, config.arc_clearance.max(0.0));

    for _ in 0..config.iterations {
        relax_once(&mut entries, &node_rects, &segments, config, &view);
    }

    let placed = finalize(&entries, &node_rects, &segments, config, &view);
    state.drift = placed
        .iter()
        .map(|label| (label.key.clone(), label.drift()))
        .collect();
    placed
}

fn relax_once(
    entries: &mut [LabelEntry],
    node_rects: &[Rect],
    segments: &[Rect],
    config: &LabelConfig,
    view: &Rect,
) {
    // Spring toward the preferred origin.
    for entry in entries.iter_mut() {
        let drift = scale(entry.drift(), 1.0 - entry.params.stiffness);
        entry.set_drift(clamp_length(drift, entry.params.wide_drift));
    }

    // Label against label, shared by mobility.
    let clearance = config.label_clearance.max(0.0);
    for i in 0..entries.len() {
        for j in (i + 1)..entries.len() {
            let Some(sep) = entries[i].rect.inflate(clearance).separation(&entries[j].rect) else {
                continue;
            };
            let mi = entries[i].params.mobility;
            let mj = entries[j].params.mobility;
            let (wi, wj) = if mi + mj <= EPS {
                (0.5, 0.5)
            } else {
                (mi / (mi + mj), mj / (mi + mj))
            };
            let push = sep.vector();
            entries[i].rect = entries[i].rect.translate(scale(push, wi));
            entries[j].rect = entries[j].rect.translate(scale(push, -wj));
        }
    }

    // Label against node. A port label never yields to its own node.
    let node_clearance = config.node_clearance.max(0.0);
    for entry in entries.iter_mut() {
        for (node_idx, node_rect) in node_rects.iter().enumerate() {
            if entry.owner == Some(node_idx) {
                continue;
            }
            if let Some(sep) = entry.rect.inflate(node_clearance).separation(node_rect) {
                entry.rect = entry.rect.translate(sep.vector());
            }
        }
    }

    // Arc labels off the routed lines.
    for entry in entries.iter_mut().filter(|entry| entry.is_arc()) {
        for segment in segments {
            if let Some(sep) = entry.rect.separation(segment) {
                entry.rect = entry.rect.translate(sep.vector());
            }
        }
    }

    for entry in entries.iter_mut() {
        entry.rect = entry.rect.clamp_within(view);
    }
}

fn collides(
    idx: usize,
    rect: &Rect,
    entries: &[LabelEntry],
    node_rects: &[Rect],
    segments: &[Rect],
    config: &LabelConfig,
) -> bool {
    let entry = &entries[idx];
    let hits_node = node_rects.iter().enumerate().any(|(node_idx, node_rect)| {
        entry.owner != Some(node_idx) && rect.inflate(config.node_clearance).overlaps(node_rect)
    });
    let hits_label = entries
        .iter()
        .enumerate()
        .any(|(other_idx, other)| other_idx != idx && rect.overlaps(&other.rect));
    let hits_arc = entry.is_arc() && segments.iter().any(|segment| rect.overlaps(segment));
    hits_node || hits_label || hits_arc
}

/// Applies the class drift limit. The wider fallback limit is kept only
/// when the strict placement collides and the relaxed one does not.
fn finalize(
    entries: &[LabelEntry],
    node_rects: &[Rect],
    segments: &[Rect],
    config: &LabelConfig,
    view: &Rect,
) -> Vec<PlacedLabel> {
    entries
        .iter()
        .enumerate()
        .map(|(idx, entry)| {
            let drift = entry.drift();
            let strict = entry
                .preferred
                .translate(clamp_length(drift, entry.params.max_drift))
                .clamp_within(view);
            let relaxed = entry
                .preferred
                .translate(clamp_length(drift, entry.params.wide_drift))
                .clamp_within(view);
            let widened = length(sub((relaxed.x, relaxed.y), (strict.x, strict.y))) > EPS
                && collides(idx, &strict, entries, node_rects, segments, config)
                && !collides(idx, &relaxed, entries, node_rects, segments, config);
            PlacedLabel {
                key: entry.key.clone(),
                rect: if widened { relaxed } else { strict },
                preferred: entry.preferred,
                widened,
            }
        })
        .collect()
}
