use tracing::debug;

use crate::config::LabelConfig;
use crate::ir::{Diagram, Point};

use super::geometry::{EPS, Rect, add, clamp_length, dot, length, normalize, scale, sub};
use super::types::{LabelKey, PlacedLabel};

/// Own port-label rectangles per node, in node order.
fn port_labels_by_node(diagram: &Diagram, labels: &[PlacedLabel]) -> Vec<Vec<Rect>> {
    let mut by_node = vec![Vec::new(); diagram.nodes().len()];
    for label in labels {
        let LabelKey::Port(port_id) = &label.key else {
            continue;
        };
        let Some(port) = diagram.try_get_port(port_id) else {
            continue;
        };
        if let Some(idx) = diagram
            .nodes()
            .iter()
            .position(|node| node.id() == port.node_id())
        {
            by_node[idx].push(label.rect);
        }
    }
    by_node
}

/// True when any port label, grown by the node clearance, overlaps a node.
fn needs_reposition(diagram: &Diagram, labels: &[PlacedLabel], clearance: f32) -> bool {
    labels
        .iter()
        .filter(|label| matches!(label.key, LabelKey::Port(_)))
        .any(|label| {
            let grown = label.rect.inflate(clearance);
            diagram
                .nodes()
                .iter()
                .any(|node| grown.overlaps(&node.bounds()))
        })
}

fn effective_obstacle(bounds: Rect, labels: &[Rect], offset: Point, margin: f32, view: &Rect) -> Rect {
    labels
        .iter()
        .map(|rect| rect.translate(offset).clamp_within(view))
        .fold(bounds.translate(offset).inflate(margin), |acc, rect| acc.union(&rect))
}

/// Nudges nodes apart when their port labels collide with neighbours.
///
/// Each node is treated as its bounds (plus margin) merged with its own port
/// labels carried along at the candidate position. Overlapping pairs are
/// pushed apart with damping and a per-iteration step cap. When nothing is
/// held the mean displacement is removed so the diagram does not drift.
/// Returns whether any node moved.
pub fn reposition_nodes(
    diagram: &mut Diagram,
    labels: &[PlacedLabel],
    config: &LabelConfig,
    view: &Rect,
    held: Option<&str>,
) -> bool {
    let settings = &config.reposition;
    if !settings.enabled
        || diagram.nodes().len() < 2
        || !needs_reposition(diagram, labels, config.node_clearance.max(0.0))
    {
        return false;
    }

    let own_labels = port_labels_by_node(diagram, labels);
    let bounds: Vec<Rect> = diagram.nodes().iter().map(|node| node.bounds()).collect();
    let held_idx = held.and_then(|id| diagram.nodes().iter().position(|node| node.id() == id));
    let n = bounds.len();
    let margin = settings.node_margin.max(0.0);
    let mut offsets = vec![(0.0_f32, 0.0_f32); n];

    for _ in 0..settings.iterations {
        let obstacles: Vec<Rect> = (0..n)
            .map(|i| effective_obstacle(bounds[i], &own_labels[i], offsets[i], margin, view))
            .collect();
        let mut pushes = vec![(0.0_f32, 0.0_f32); n];
        let mut any = false;
        for i in 0..n {
            for j in (i + 1)..n {
                let Some(sep) = obstacles[i].separation(&obstacles[j]) else {
                    continue;
                };
                if sep.depth <= settings.hysteresis {
                    continue;
                }
                any = true;
                let push = sep.vector();
                let (share_i, share_j) = match held_idx {
                    Some(h) if h == i => (0.0, 1.0),
                    Some(h) if h == j => (1.0, 0.0),
                    _ => (0.5, 0.5),
                };
                pushes[i] = add(pushes[i], scale(push, share_i));
                pushes[j] = sub(pushes[j], scale(push, share_j));
            }
        }
        if !any {
            break;
        }
        for (offset, push) in offsets.iter_mut().zip(&pushes) {
            let step = clamp_length(scale(*push, settings.damping), settings.max_step);
            *offset = add(*offset, step);
        }
    }

    if held_idx.is_none() {
        let mean = offsets
            .iter()
            .fold((0.0, 0.0), |acc, offset| add(acc, *offset));
        let mean = scale(mean, 1.0 / n as f32);
        for offset in &mut offsets {
            *offset = sub(*offset, mean);
        }
    }

    let mut moved = 0usize;
    for (idx, (node, offset)) in diagram.nodes_mut().iter_mut().zip(&offsets).enumerate() {
        if Some(idx) == held_idx || length(*offset) <= EPS {
            continue;
        }
        node.position = add(node.position, *offset);
        // Drop the velocity component that would carry the node straight back.
        if dot(node.velocity, *offset) < 0.0
            && let Some(unit) = normalize(*offset)
        {
            node.velocity = sub(node.velocity, scale(unit, dot(node.velocity, unit)));
        }
        moved += 1;
    }
    if moved > 0 {
        debug!(moved, "repositioned nodes to clear port labels");
    }
    moved > 0
}
