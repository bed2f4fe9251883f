// Force-directed node simulation: background gravity, overlap repulsion and
// arc chain springs are accumulated per node, drift-corrected, integrated
// with exponential drag, and then cleaned up by the hard spacing solver.

use tracing::{trace, warn};

use crate::config::{ArcForceModel, LayoutSettings};
use crate::error::{LayoutError, Result};
use crate::ir::{Arc, Diagram, DiagramIndex, Node, Point};

use super::arc_points::{self, ArcGeometry};
use super::geometry::{
    Axis, EPS, Separation, add, clamp_length, is_finite, length, normalize, scale, sub,
};
use super::types::{ForceBreakdown, NodePrediction, StepPreview};

/// Counters from one physics step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepStats {
    /// Hard spacing iterations that applied a correction.
    pub hard_spacing_iterations: usize,
    pub inserted_points: usize,
    pub merged_points: usize,
    /// The hard spacing solver ran out of iterations with pairs still overlapping.
    pub unresolved_overlap: bool,
}

pub(super) struct ForceField {
    pub(super) nodes: Vec<ForceBreakdown>,
    pub(super) arc_points: Vec<Vec<Point>>,
}

/// Advances the simulation by `dt` seconds in place.
///
/// `held` names a node being dragged: its forces are still computed, but it
/// is never integrated or moved by the spacing solver. Non-positive or
/// non-finite `dt` is a no-op.
pub fn step(
    diagram: &mut Diagram,
    settings: &LayoutSettings,
    dt: f32,
    held: Option<&str>,
) -> StepStats {
    if !(dt > 0.0 && dt.is_finite()) {
        return StepStats::default();
    }
    run_step(diagram, settings, dt, held).0
}

/// Runs the same step on a copy of the diagram and reports the force
/// breakdown plus the predicted node states. The diagram is not touched.
pub fn preview_step(
    diagram: &Diagram,
    settings: &LayoutSettings,
    dt: f32,
    held: Option<&str>,
) -> Result<StepPreview> {
    if !(dt > 0.0 && dt.is_finite()) {
        return Err(LayoutError::InvalidTimeStep { dt });
    }
    let mut scratch = diagram.clone();
    let (_, field) = run_step(&mut scratch, settings, dt, held);
    let nodes = scratch
        .nodes()
        .iter()
        .zip(field.nodes)
        .map(|(node, forces)| NodePrediction {
            node_id: node.id().to_string(),
            forces,
            position: node.position,
            velocity: node.velocity,
        })
        .collect();
    let arc_point_forces = scratch
        .arcs()
        .iter()
        .zip(field.arc_points)
        .map(|(arc, forces)| (arc.id().to_string(), forces))
        .collect();
    Ok(StepPreview {
        dt,
        nodes,
        arc_point_forces,
    })
}

fn run_step(
    diagram: &mut Diagram,
    settings: &LayoutSettings,
    dt: f32,
    held: Option<&str>,
) -> (StepStats, ForceField) {
    let mut settings = settings.clone();
    settings.validate_and_clamp();
    let settings = &settings;

    let index = DiagramIndex::build(diagram);
    let held = held.and_then(|id| index.node_by_id.get(id).copied());
    let (nodes, ports, arcs) = diagram.parts_mut();
    let mut stats = StepStats::default();

    let before = arc_points::arc_geometries(nodes, ports, &index);
    let (inserted, merged) = arc_points::enforce_point_count(arcs, &before, nodes, settings);
    stats.inserted_points += inserted;
    stats.merged_points += merged;

    let field = accumulate_forces(nodes, arcs, &before, settings);

    arc_points::relax_points(arcs, &field.arc_points, settings, dt);
    arc_points::constrain_points(arcs, &before, nodes, settings);
    stats.inserted_points += arc_points::repair_crossings(arcs, &before, nodes, settings);
    stats.merged_points += arc_points::merge_and_trim(arcs, &before, settings);

    integrate(nodes, &field.nodes, settings, dt, held);
    if settings.use_hard_min_spacing {
        let (iterations, unresolved) = solve_hard_spacing(nodes, settings, held);
        stats.hard_spacing_iterations = iterations;
        stats.unresolved_overlap = unresolved;
    }

    let after = arc_points::arc_geometries(nodes, ports, &index);
    arc_points::follow_endpoints(arcs, &before, &after);

    trace!(
        nodes = nodes.len(),
        arcs = arcs.len(),
        hard_spacing_iterations = stats.hard_spacing_iterations,
        inserted_points = stats.inserted_points,
        merged_points = stats.merged_points,
        "physics step"
    );
    (stats, field)
}

/// Edge-to-edge gap between two nodes: the larger of the per-axis gaps,
/// negative when they overlap.
pub fn node_gap(a: &Node, b: &Node) -> f32 {
    let dx = (a.position.0 - b.position.0).abs() - (a.width + b.width) / 2.0;
    let dy = (a.position.1 - b.position.1).abs() - (a.height + b.height) / 2.0;
    dx.max(dy)
}

/// Separation that moves `a` out of `b` once both are inflated by `pad`.
/// Coincident centers split along the shallower axis, lower id toward the
/// negative side.
pub(super) fn pair_separation(a: &Node, b: &Node, pad: f32) -> Option<Separation> {
    let ra = a.bounds().inflate(pad);
    let rb = b.bounds().inflate(pad);
    if !ra.overlaps(&rb) {
        return None;
    }
    let d = sub(a.position, b.position);
    if d.0.abs() <= EPS && d.1.abs() <= EPS {
        let pen_x = (ra.width + rb.width) / 2.0;
        let pen_y = (ra.height + rb.height) / 2.0;
        let sign = if a.id() < b.id() { -1.0 } else { 1.0 };
        let (axis, depth) = if pen_x <= pen_y {
            (Axis::X, pen_x)
        } else {
            (Axis::Y, pen_y)
        };
        return Some(Separation { axis, sign, depth });
    }
    ra.separation(&rb)
}

fn spring_force(from: Point, to: Point, k: f32, rest: f32) -> Point {
    let d = sub(to, from);
    let dist = length(d);
    let Some(dir) = normalize(d) else {
        return (0.0, 0.0);
    };
    scale(dir, k * (dist - rest))
}

fn at_min_spacing(a: &Node, b: &Node, settings: &LayoutSettings) -> bool {
    node_gap(a, b) <= settings.min_node_spacing + settings.hard_min_spacing_slop
}

pub(super) fn accumulate_forces(
    nodes: &[Node],
    arcs: &[Arc],
    geometry: &[Option<ArcGeometry>],
    settings: &LayoutSettings,
) -> ForceField {
    let n = nodes.len();
    let mut gravity = vec![(0.0f32, 0.0f32); n];
    let mut overlap = vec![(0.0f32, 0.0f32); n];
    let mut arc_force = vec![(0.0f32, 0.0f32); n];
    let mut point_forces: Vec<Vec<Point>> = arcs
        .iter()
        .map(|arc| vec![(0.0, 0.0); arc.internal_points.len()])
        .collect();

    let mass_sq = settings.node_mass * settings.node_mass;
    let softening_sq = settings.softening * settings.softening;
    let pad = settings.min_node_spacing / 2.0;
    let overlap_k = settings.overlap_repulsion_k * settings.overlap_boost();

    for i in 0..n {
        for j in (i + 1)..n {
            let d = sub(nodes[j].position, nodes[i].position);
            if settings.background_gravity > 0.0
                && let Some(dir) = normalize(d)
            {
                let dist_sq = d.0 * d.0 + d.1 * d.1;
                let f = scale(
                    dir,
                    settings.background_gravity * mass_sq / (dist_sq + softening_sq),
                );
                gravity[i] = add(gravity[i], f);
                gravity[j] = sub(gravity[j], f);
            }
            if let Some(sep) = pair_separation(&nodes[i], &nodes[j], pad) {
                let p = sep.depth;
                let f = scale(sep.axis.unit(sep.sign), overlap_k * p * (p + 1.0));
                overlap[i] = add(overlap[i], f);
                overlap[j] = sub(overlap[j], f);
            }
        }
    }

    for (arc_idx, arc) in arcs.iter().enumerate() {
        let Some(geo) = geometry.get(arc_idx).copied().flatten() else {
            continue;
        };
        let transfer = !(settings.suppress_arc_attraction_at_min_spacing
            && !geo.is_self_loop()
            && at_min_spacing(&nodes[geo.from_node], &nodes[geo.to_node], settings));
        let members = arc_points::chain(&geo, &arc.internal_points);
        let last = members.len() - 1;
        let rest = if settings.minimize_arc_length {
            0.0
        } else {
            settings.edge_rest_length / last as f32
        };
        let mut ends = [(0.0f32, 0.0f32); 2];
        for s in 0..last {
            let f = spring_force(members[s], members[s + 1], settings.arc_attraction_k, rest);
            for (member, force) in [(s, f), (s + 1, scale(f, -1.0))] {
                if member == 0 {
                    ends[0] = add(ends[0], force);
                } else if member == last {
                    ends[1] = add(ends[1], force);
                } else {
                    let slot = &mut point_forces[arc_idx][member - 1];
                    *slot = add(*slot, force);
                }
            }
        }
        if !transfer {
            continue;
        }
        match settings.arc_force_model {
            ArcForceModel::PointChain => {
                arc_force[geo.from_node] = add(arc_force[geo.from_node], ends[0]);
                arc_force[geo.to_node] = add(arc_force[geo.to_node], ends[1]);
            }
            ArcForceModel::RestLength => {
                let rest = if settings.minimize_arc_length {
                    0.0
                } else {
                    settings.edge_rest_length
                };
                let f = spring_force(geo.from, geo.to, settings.arc_attraction_k, rest);
                arc_force[geo.from_node] = add(arc_force[geo.from_node], f);
                arc_force[geo.to_node] = sub(arc_force[geo.to_node], f);
            }
        }
    }

    // Internal points are pushed out of every node's clearance zone; the
    // node takes the reaction.
    for (arc_idx, arc) in arcs.iter().enumerate() {
        for (point_idx, point) in arc.internal_points.iter().enumerate() {
            for (node_idx, node) in nodes.iter().enumerate() {
                let zone = arc_points::clearance_zone(node, settings);
                let Some((dir, depth)) = arc_points::nearest_exit(*point, &zone) else {
                    continue;
                };
                let f = scale(dir, settings.arc_point_repulsion_k * depth);
                let slot = &mut point_forces[arc_idx][point_idx];
                *slot = add(*slot, f);
                arc_force[node_idx] = sub(arc_force[node_idx], f);
            }
        }
    }

    // Drift correction. Gravity and overlap are pairwise symmetric, so the
    // arc component carries the whole imbalance.
    if n > 0 {
        let inv_n = 1.0 / n as f32;
        let mean_arc = scale(arc_force.iter().fold((0.0, 0.0), |acc, f| add(acc, *f)), inv_n);
        for f in &mut arc_force {
            *f = sub(*f, mean_arc);
        }
    }
    let mut breakdown: Vec<ForceBreakdown> = (0..n)
        .map(|i| ForceBreakdown {
            gravity: gravity[i],
            overlap: overlap[i],
            arc: arc_force[i],
            total: add(add(gravity[i], overlap[i]), arc_force[i]),
        })
        .collect();
    if n > 0 {
        let mean_total = scale(
            breakdown.iter().fold((0.0, 0.0), |acc, f| add(acc, f.total)),
            1.0 / n as f32,
        );
        for f in &mut breakdown {
            f.total = sub(f.total, mean_total);
        }
    }

    ForceField {
        nodes: breakdown,
        arc_points: point_forces,
    }
}

fn integrate(
    nodes: &mut [Node],
    forces: &[ForceBreakdown],
    settings: &LayoutSettings,
    dt: f32,
    held: Option<usize>,
) {
    let damping = (-settings.drag * dt).exp();
    let inv_mass = 1.0 / settings.node_mass;
    for (idx, (node, force)) in nodes.iter_mut().zip(forces).enumerate() {
        if held == Some(idx) {
            node.velocity = (0.0, 0.0);
            continue;
        }
        let velocity = add(node.velocity, scale(force.total, inv_mass * dt));
        let velocity = clamp_length(scale(velocity, damping), settings.max_speed);
        let position = add(node.position, scale(velocity, dt));
        if !is_finite(velocity) || !is_finite(position) {
            node.velocity = (0.0, 0.0);
            continue;
        }
        node.velocity = velocity;
        node.position = position;
    }
}

fn axis_component(velocity: Point, axis: Axis) -> f32 {
    match axis {
        Axis::X => velocity.0,
        Axis::Y => velocity.1,
    }
}

fn set_axis_component(velocity: &mut Point, axis: Axis, value: f32) {
    match axis {
        Axis::X => velocity.0 = value,
        Axis::Y => velocity.1 = value,
    }
}

/// Removes the relative velocity of a contact pair along `axis`. Both nodes
/// take the mean axis velocity so the pair keeps its momentum; a held node
/// stays at rest and its partner stops on that axis.
fn settle_contact_velocity(
    nodes: &mut [Node],
    i: usize,
    j: usize,
    axis: Axis,
    held: Option<usize>,
) {
    let shared = if held == Some(i) || held == Some(j) {
        0.0
    } else {
        (axis_component(nodes[i].velocity, axis) + axis_component(nodes[j].velocity, axis)) / 2.0
    };
    set_axis_component(&mut nodes[i].velocity, axis, shared);
    set_axis_component(&mut nodes[j].velocity, axis, shared);
}

/// Post-integration position correction. Returns the number of iterations
/// that applied a correction and whether overlaps remain.
fn solve_hard_spacing(
    nodes: &mut [Node],
    settings: &LayoutSettings,
    held: Option<usize>,
) -> (usize, bool) {
    let pad = settings.min_node_spacing / 2.0;
    let n = nodes.len();
    for iteration in 0..settings.hard_min_spacing_iterations {
        let mut corrected = false;
        for i in 0..n {
            for j in (i + 1)..n {
                let Some(sep) = pair_separation(&nodes[i], &nodes[j], pad) else {
                    continue;
                };
                if sep.depth <= EPS {
                    continue;
                }
                let push = sep.depth + settings.hard_min_spacing_slop;
                let (share_i, share_j) = match (held == Some(i), held == Some(j)) {
                    (true, _) => (0.0, push),
                    (_, true) => (push, 0.0),
                    _ => (push / 2.0, push / 2.0),
                };
                let unit = sep.axis.unit(sep.sign);
                nodes[i].position = add(nodes[i].position, scale(unit, share_i));
                nodes[j].position = sub(nodes[j].position, scale(unit, share_j));
                settle_contact_velocity(nodes, i, j, sep.axis, held);
                corrected = true;
            }
        }
        if !corrected {
            return (iteration, false);
        }
    }
    let unresolved = (0..n).any(|i| {
        ((i + 1)..n).any(|j| {
            pair_separation(&nodes[i], &nodes[j], pad).is_some_and(|sep| sep.depth > EPS)
        })
    });
    if unresolved {
        warn!(
            iterations = settings.hard_min_spacing_iterations,
            nodes = n,
            "hard spacing solver exhausted its iterations with overlaps remaining"
        );
    }
    (settings.hard_min_spacing_iterations, unresolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{PortRef, Side};

    fn isolated_settings() -> LayoutSettings {
        LayoutSettings {
            background_gravity: 0.0,
            arc_attraction_k: 0.0,
            ..LayoutSettings::default()
        }
    }

    fn pair(a: Point, b: Point) -> Diagram {
        let mut diagram = Diagram::new();
        diagram.add_node(Node::new("a", "", a, 100.0, 60.0)).unwrap();
        diagram.add_node(Node::new("b", "", b, 100.0, 60.0)).unwrap();
        diagram
    }

    fn linked_pair(a: Point, b: Point) -> Diagram {
        let mut diagram = pair(a, b);
        diagram
            .add_port("out", "", PortRef::new("a", Side::Right, 0.5))
            .unwrap();
        diagram
            .add_port("in", "", PortRef::new("b", Side::Left, 0.5))
            .unwrap();
        diagram.add_arc("x", "", "out", "in").unwrap();
        diagram
    }

    #[test]
    fn non_positive_dt_is_a_no_op() {
        let mut diagram = pair((0.0, 0.0), (10.0, 0.0));
        for dt in [0.0, -1.0, f32::NAN] {
            let stats = step(&mut diagram, &LayoutSettings::default(), dt, None);
            assert_eq!(stats, StepStats::default());
        }
        assert_eq!(diagram.nodes()[1].position, (10.0, 0.0));
    }

    #[test]
    fn preview_rejects_bad_dt_and_leaves_diagram_alone() {
        let diagram = linked_pair((0.0, 0.0), (300.0, 0.0));
        let settings = LayoutSettings::default();
        assert!(matches!(
            preview_step(&diagram, &settings, 0.0, None),
            Err(LayoutError::InvalidTimeStep { .. })
        ));
        assert!(preview_step(&diagram, &settings, f32::INFINITY, None).is_err());
        let preview = preview_step(&diagram, &settings, 1.0 / 60.0, None).unwrap();
        assert_eq!(preview.nodes.len(), 2);
        assert_eq!(preview.arc_point_forces["x"].len(), 1);
        assert!(diagram.arcs()[0].internal_points.is_empty());
        assert_eq!(diagram.nodes()[1].position, (300.0, 0.0));
    }

    #[test]
    fn forces_sum_to_zero() {
        let mut diagram = linked_pair((0.0, 0.0), (260.0, 40.0));
        diagram
            .add_node(Node::new("c", "", (120.0, 200.0), 80.0, 40.0))
            .unwrap();
        let preview =
            preview_step(&diagram, &LayoutSettings::default(), 1.0 / 60.0, None).unwrap();
        let net = preview.net_force();
        assert!(net.0.abs() < 1e-2 && net.1.abs() < 1e-2, "net force {:?}", net);
    }

    #[test]
    fn coincident_nodes_split_by_id() {
        let mut diagram = pair((0.0, 0.0), (0.0, 0.0));
        step(&mut diagram, &isolated_settings(), 1.0 / 60.0, None);
        let a = &diagram.nodes()[0];
        let b = &diagram.nodes()[1];
        // Expanded boxes are shallower than they are wide, so the split is vertical.
        assert!(a.position.1 < b.position.1);
        assert_eq!(a.position.0, b.position.0);
        assert!(node_gap(a, b) >= 40.0 - 1e-3);
    }

    #[test]
    fn hard_spacing_resolves_overlap_in_one_step() {
        let mut diagram = pair((0.0, 0.0), (60.0, 10.0));
        let settings = isolated_settings();
        let stats = step(&mut diagram, &settings, 1.0 / 60.0, None);
        assert!(!stats.unresolved_overlap);
        let gap = node_gap(&diagram.nodes()[0], &diagram.nodes()[1]);
        assert!(gap >= settings.min_node_spacing - 1e-3, "gap {gap}");
    }

    fn centroid(diagram: &Diagram) -> Point {
        let n = diagram.nodes().len() as f32;
        let sum = diagram
            .nodes()
            .iter()
            .fold((0.0, 0.0), |acc, node| add(acc, node.position));
        scale(sum, 1.0 / n)
    }

    #[test]
    fn contacts_keep_the_cluster_in_place() {
        let mut diagram = pair((0.0, 0.0), (0.0, 200.0));
        diagram
            .add_node(Node::new("c", "", (130.0, -10.0), 60.0, 40.0))
            .unwrap();
        let settings = LayoutSettings::default();
        let start = centroid(&diagram);
        for _ in 0..6000 {
            step(&mut diagram, &settings, 1.0 / 60.0, None);
        }
        let end = centroid(&diagram);
        assert!(
            (end.0 - start.0).abs() < 0.5 && (end.1 - start.1).abs() < 0.5,
            "centroid moved from {:?} to {:?}",
            start,
            end
        );
    }

    #[test]
    fn contact_removes_only_relative_velocity() {
        let mut nodes = vec![
            Node::new("a", "", (0.0, 0.0), 100.0, 60.0),
            Node::new("b", "", (0.0, 90.0), 100.0, 60.0),
        ];
        nodes[0].velocity = (5.0, 30.0);
        nodes[1].velocity = (-5.0, -10.0);
        let (_, unresolved) = solve_hard_spacing(&mut nodes, &isolated_settings(), None);
        assert!(!unresolved);
        assert_eq!(nodes[0].velocity, (5.0, 10.0));
        assert_eq!(nodes[1].velocity, (-5.0, 10.0));
    }

    #[test]
    fn held_node_does_not_move() {
        let mut diagram = pair((0.0, 0.0), (60.0, 0.0));
        step(&mut diagram, &isolated_settings(), 1.0 / 60.0, Some("a"));
        assert_eq!(diagram.nodes()[0].position, (0.0, 0.0));
        let gap = node_gap(&diagram.nodes()[0], &diagram.nodes()[1]);
        assert!(gap >= 40.0 - 1e-3);
    }

    #[test]
    fn arc_pulls_distant_nodes_together() {
        let diagram = linked_pair((0.0, 0.0), (600.0, 0.0));
        let settings = LayoutSettings {
            background_gravity: 0.0,
            ..LayoutSettings::default()
        };
        let preview = preview_step(&diagram, &settings, 1.0 / 60.0, None).unwrap();
        assert!(preview.nodes[0].forces.arc.0 > 0.0);
        assert!(preview.nodes[1].forces.arc.0 < 0.0);
    }

    #[test]
    fn rest_length_model_pushes_when_too_close() {
        let diagram = linked_pair((0.0, 0.0), (200.0, 0.0));
        let settings = LayoutSettings {
            background_gravity: 0.0,
            arc_point_repulsion_k: 0.0,
            minimize_arc_length: false,
            edge_rest_length: 300.0,
            arc_force_model: ArcForceModel::RestLength,
            ..LayoutSettings::default()
        };
        let preview = preview_step(&diagram, &settings, 1.0 / 60.0, None).unwrap();
        assert!(preview.nodes[0].forces.arc.0 < 0.0);
    }

    #[test]
    fn suppression_stops_arc_attraction_at_min_spacing() {
        // Gap of exactly 40 between the facing sides.
        let diagram = linked_pair((0.0, 0.0), (140.0, 0.0));
        let base = LayoutSettings {
            background_gravity: 0.0,
            arc_point_repulsion_k: 0.0,
            ..LayoutSettings::default()
        };
        let pulled = preview_step(&diagram, &base, 1.0 / 60.0, None).unwrap();
        assert!(pulled.nodes[0].forces.arc.0 > 0.0);

        let suppressed = LayoutSettings {
            suppress_arc_attraction_at_min_spacing: true,
            ..base
        };
        let quiet = preview_step(&diagram, &suppressed, 1.0 / 60.0, None).unwrap();
        assert_eq!(quiet.nodes[0].forces.arc, (0.0, 0.0));
    }

    #[test]
    fn soft_mode_relies_on_repulsion() {
        let mut diagram = pair((0.0, 0.0), (80.0, 0.0));
        let settings = LayoutSettings {
            use_hard_min_spacing: false,
            ..isolated_settings()
        };
        let stats = step(&mut diagram, &settings, 1.0 / 60.0, None);
        assert_eq!(stats.hard_spacing_iterations, 0);
        assert!(diagram.nodes()[0].velocity.0 < 0.0);
        assert!(diagram.nodes()[1].velocity.0 > 0.0);
    }
}
