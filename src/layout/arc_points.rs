// Maintenance of arc internal points: the massless interior vertices each
// arc carries between its two ports. They are relaxed by the chain forces
// computed in `physics`, kept out of third-party nodes, and pruned so the
// chain stays short.

use crate::config::LayoutSettings;
use crate::ir::{Arc, DiagramIndex, Node, Point, Port, port_world_position};

use super::geometry::{
    EPS, Rect, add, clamp_length, distance, is_finite, lerp, point_segment_distance, scale,
    segment_crosses_rect, sub,
};

/// Extra distance a repair waypoint is placed beyond the blocking zone.
const REPAIR_WAYPOINT_MARGIN: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(super) struct ArcGeometry {
    pub(super) from_node: usize,
    pub(super) to_node: usize,
    pub(super) from: Point,
    pub(super) to: Point,
}

impl ArcGeometry {
    pub(super) fn is_self_loop(&self) -> bool {
        self.from_node == self.to_node
    }

    fn touches(&self, node_idx: usize) -> bool {
        self.from_node == node_idx || self.to_node == node_idx
    }
}

/// Port positions and owning nodes for every arc; `None` for arcs whose
/// references do not resolve.
pub(super) fn arc_geometries(
    nodes: &[Node],
    ports: &[Port],
    index: &DiagramIndex,
) -> Vec<Option<ArcGeometry>> {
    (0..index.arc_ends.len())
        .map(|arc_idx| {
            let (from_port, to_port) = index.arc_ends[arc_idx]?;
            let (from_node, to_node) = index.arc_nodes(arc_idx)?;
            Some(ArcGeometry {
                from_node,
                to_node,
                from: port_world_position(&nodes[from_node], &ports[from_port].reference),
                to: port_world_position(&nodes[to_node], &ports[to_port].reference),
            })
        })
        .collect()
}

/// `[from port, internal points…, to port]`.
pub(super) fn chain(geometry: &ArcGeometry, points: &[Point]) -> Vec<Point> {
    let mut out = Vec::with_capacity(points.len() + 2);
    out.push(geometry.from);
    out.extend_from_slice(points);
    out.push(geometry.to);
    out
}

/// Zone an internal point must stay out of for `node`.
pub(super) fn clearance_zone(node: &Node, settings: &LayoutSettings) -> Rect {
    node.bounds()
        .inflate(settings.min_node_spacing / 2.0 + settings.arc_point_extra_clearance)
}

/// Unit direction toward the nearest exterior edge of `rect` and the
/// distance to it, for points strictly inside.
pub(super) fn nearest_exit(point: Point, rect: &Rect) -> Option<(Point, f32)> {
    if !rect.contains(point) {
        return None;
    }
    let candidates = [
        ((-1.0, 0.0), point.0 - rect.x),
        ((1.0, 0.0), rect.right() - point.0),
        ((0.0, -1.0), point.1 - rect.y),
        ((0.0, 1.0), rect.bottom() - point.1),
    ];
    candidates
        .into_iter()
        .min_by(|a, b| a.1.total_cmp(&b.1))
}

fn push_outside(point: Point, rect: &Rect) -> Point {
    match nearest_exit(point, rect) {
        Some((dir, depth)) => add(point, scale(dir, depth)),
        None => point,
    }
}

/// Guarantees every arc has between one and `max_arc_internal_points`
/// internal points. Returns `(inserted, merged)`.
pub(super) fn enforce_point_count(
    arcs: &mut [Arc],
    geometry: &[Option<ArcGeometry>],
    nodes: &[Node],
    settings: &LayoutSettings,
) -> (usize, usize) {
    let mut inserted = 0usize;
    let mut merged = 0usize;
    for (arc, geo) in arcs.iter_mut().zip(geometry) {
        let Some(geo) = geo else {
            continue;
        };
        arc.internal_points.retain(|p| is_finite(*p));
        if arc.internal_points.is_empty() {
            let mut mid = lerp(geo.from, geo.to, 0.5);
            if geo.is_self_loop() {
                mid = push_outside(mid, &clearance_zone(&nodes[geo.from_node], settings));
            }
            arc.internal_points.push(mid);
            inserted += 1;
        }
        while arc.internal_points.len() > settings.max_arc_internal_points {
            merge_closest_pair(&mut arc.internal_points);
            merged += 1;
        }
    }
    (inserted, merged)
}

fn merge_closest_pair(points: &mut Vec<Point>) {
    let Some(idx) = (0..points.len().saturating_sub(1))
        .min_by(|&a, &b| {
            distance(points[a], points[a + 1]).total_cmp(&distance(points[b], points[b + 1]))
        })
    else {
        return;
    };
    points[idx] = lerp(points[idx], points[idx + 1], 0.5);
    points.remove(idx + 1);
}

/// `position += F · move_factor · dt`, capped at `max_speed · dt`.
pub(super) fn relax_points(
    arcs: &mut [Arc],
    forces: &[Vec<Point>],
    settings: &LayoutSettings,
    dt: f32,
) {
    let max_move = settings.max_speed * dt;
    for (arc, arc_forces) in arcs.iter_mut().zip(forces) {
        for (point, force) in arc.internal_points.iter_mut().zip(arc_forces) {
            let delta = clamp_length(scale(*force, settings.arc_point_move_factor * dt), max_move);
            let next = add(*point, delta);
            if is_finite(next) {
                *point = next;
            }
        }
    }
}

/// Pushes points out of the clearance zone of any node the arc does not
/// attach to.
pub(super) fn constrain_points(
    arcs: &mut [Arc],
    geometry: &[Option<ArcGeometry>],
    nodes: &[Node],
    settings: &LayoutSettings,
) {
    let zones: Vec<Rect> = nodes
        .iter()
        .map(|node| clearance_zone(node, settings))
        .collect();
    for (arc, geo) in arcs.iter_mut().zip(geometry) {
        let Some(geo) = geo else {
            continue;
        };
        for _ in 0..settings.arc_point_constraint_iterations {
            let mut moved = false;
            for point in &mut arc.internal_points {
                for (node_idx, zone) in zones.iter().enumerate() {
                    if geo.touches(node_idx) {
                        continue;
                    }
                    let next = push_outside(*point, zone);
                    if next != *point {
                        *point = next;
                        moved = true;
                    }
                }
            }
            if !moved {
                break;
            }
        }
    }
}

/// Inserts a waypoint beside any third-party node a chain segment runs
/// through. At most one insertion per arc and
/// `max_waypoint_insertions_per_step` overall.
pub(super) fn repair_crossings(
    arcs: &mut [Arc],
    geometry: &[Option<ArcGeometry>],
    nodes: &[Node],
    settings: &LayoutSettings,
) -> usize {
    let mut budget = settings.max_waypoint_insertions_per_step;
    let zones: Vec<Rect> = nodes
        .iter()
        .map(|node| clearance_zone(node, settings))
        .collect();
    let mut inserted = 0usize;
    for (arc, geo) in arcs.iter_mut().zip(geometry) {
        if budget == 0 {
            break;
        }
        let Some(geo) = geo else {
            continue;
        };
        if arc.internal_points.len() >= settings.max_arc_internal_points {
            continue;
        }
        let members = chain(geo, &arc.internal_points);
        let hit = members.windows(2).enumerate().find_map(|(seg_idx, seg)| {
            zones
                .iter()
                .enumerate()
                .filter(|(node_idx, _)| !geo.touches(*node_idx))
                .find(|(_, zone)| segment_crosses_rect(seg[0], seg[1], zone))
                .map(|(_, zone)| (seg_idx, detour_waypoint(seg[0], seg[1], zone)))
        });
        if let Some((seg_idx, waypoint)) = hit {
            arc.internal_points.insert(seg_idx, waypoint);
            inserted += 1;
            budget -= 1;
        }
    }
    inserted
}

/// A point just outside `zone`, past whichever side across the segment's
/// travel direction is nearer to the segment midpoint.
fn detour_waypoint(a: Point, b: Point, zone: &Rect) -> Point {
    let mid = lerp(a, b, 0.5);
    let outside = zone.inflate(REPAIR_WAYPOINT_MARGIN);
    let d = sub(b, a);
    if d.0.abs() >= d.1.abs() {
        if mid.1 - zone.y <= zone.bottom() - mid.1 {
            (mid.0, outside.y)
        } else {
            (mid.0, outside.bottom())
        }
    } else if mid.0 - zone.x <= zone.right() - mid.0 {
        (outside.x, mid.1)
    } else {
        (outside.right(), mid.1)
    }
}

/// Merges points closer than the merge distance and trims tail points that
/// lie on the straight run from an endpoint. Always leaves one point.
pub(super) fn merge_and_trim(
    arcs: &mut [Arc],
    geometry: &[Option<ArcGeometry>],
    settings: &LayoutSettings,
) -> usize {
    let merge_distance = settings.arc_point_merge_distance;
    let mut removed = 0usize;
    for (arc, geo) in arcs.iter_mut().zip(geometry) {
        let Some(geo) = geo else {
            continue;
        };
        let points = &mut arc.internal_points;
        let mut idx = 0;
        while idx + 1 < points.len() {
            if distance(points[idx], points[idx + 1]) < merge_distance {
                points[idx] = lerp(points[idx], points[idx + 1], 0.5);
                points.remove(idx + 1);
                removed += 1;
            } else {
                idx += 1;
            }
        }
        while points.len() > 1 && distance(geo.from, points[0]) < merge_distance {
            points.remove(0);
            removed += 1;
        }
        while points.len() > 1
            && points
                .last()
                .is_some_and(|last| distance(*last, geo.to) < merge_distance)
        {
            points.pop();
            removed += 1;
        }
        removed += trim_tails(points, geo.from, geo.to, merge_distance * 0.5);
    }
    removed
}

fn trim_tails(points: &mut Vec<Point>, from: Point, to: Point, tolerance: f32) -> usize {
    let mut trimmed = 0usize;
    while points.len() > 1 && point_segment_distance(points[0], from, points[1]) <= tolerance {
        points.remove(0);
        trimmed += 1;
    }
    while points.len() > 1 {
        let n = points.len();
        if point_segment_distance(points[n - 1], points[n - 2], to) > tolerance {
            break;
        }
        points.pop();
        trimmed += 1;
    }
    trimmed
}

/// Carries internal points along with their endpoints after the nodes moved:
/// each point shifts by the blend of both endpoint displacements weighted by
/// its position in the chain.
pub(super) fn follow_endpoints(
    arcs: &mut [Arc],
    before: &[Option<ArcGeometry>],
    after: &[Option<ArcGeometry>],
) {
    for ((arc, old), new) in arcs.iter_mut().zip(before).zip(after) {
        let (Some(old), Some(new)) = (old, new) else {
            continue;
        };
        let d_from = sub(new.from, old.from);
        let d_to = sub(new.to, old.to);
        if distance(d_from, (0.0, 0.0)) <= EPS && distance(d_to, (0.0, 0.0)) <= EPS {
            continue;
        }
        let count = arc.internal_points.len() as f32;
        for (idx, point) in arc.internal_points.iter_mut().enumerate() {
            let t = (idx as f32 + 1.0) / (count + 1.0);
            *point = add(*point, lerp(d_from, d_to, t));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Diagram, PortRef, Side};

    fn two_node_arc(points: Vec<Point>) -> (Diagram, Vec<Option<ArcGeometry>>) {
        let mut diagram = Diagram::new();
        diagram
            .add_node(Node::new("a", "", (0.0, 0.0), 100.0, 60.0))
            .unwrap();
        diagram
            .add_node(Node::new("b", "", (400.0, 0.0), 100.0, 60.0))
            .unwrap();
        diagram
            .add_port("out", "", PortRef::new("a", Side::Right, 0.5))
            .unwrap();
        diagram
            .add_port("in", "", PortRef::new("b", Side::Left, 0.5))
            .unwrap();
        diagram.add_arc("x", "", "out", "in").unwrap();
        diagram.arcs_mut()[0].internal_points = points;
        let index = DiagramIndex::build(&diagram);
        let geometry = arc_geometries(diagram.nodes(), diagram.ports(), &index);
        (diagram, geometry)
    }

    #[test]
    fn empty_arc_gets_a_midpoint() {
        let (mut diagram, geometry) = two_node_arc(Vec::new());
        let settings = LayoutSettings::default();
        let (nodes, _, arcs) = diagram.parts_mut();
        let (inserted, _) = enforce_point_count(arcs, &geometry, nodes, &settings);
        assert_eq!(inserted, 1);
        assert_eq!(arcs[0].internal_points, vec![(200.0, 0.0)]);
    }

    #[test]
    fn point_count_is_capped() {
        let points = (0..10).map(|i| (60.0 + i as f32 * 30.0, 50.0)).collect();
        let (mut diagram, geometry) = two_node_arc(points);
        let settings = LayoutSettings {
            max_arc_internal_points: 3,
            ..LayoutSettings::default()
        };
        let (nodes, _, arcs) = diagram.parts_mut();
        enforce_point_count(arcs, &geometry, nodes, &settings);
        assert_eq!(arcs[0].internal_points.len(), 3);
    }

    #[test]
    fn close_points_merge_and_straight_tails_trim() {
        let (mut diagram, geometry) =
            two_node_arc(vec![(100.0, 0.0), (103.0, 0.0), (200.0, 80.0), (300.0, 0.0)]);
        let settings = LayoutSettings::default();
        let (_, _, arcs) = diagram.parts_mut();
        let removed = merge_and_trim(arcs, &geometry, &settings);
        assert!(removed >= 1);
        assert!(arcs[0].internal_points.contains(&(200.0, 80.0)));
        assert!(
            arcs[0]
                .internal_points
                .windows(2)
                .all(|w| distance(w[0], w[1]) >= settings.arc_point_merge_distance)
        );
    }

    #[test]
    fn collinear_single_point_is_kept() {
        let (mut diagram, geometry) = two_node_arc(vec![(200.0, 0.0)]);
        let settings = LayoutSettings::default();
        let (_, _, arcs) = diagram.parts_mut();
        merge_and_trim(arcs, &geometry, &settings);
        assert_eq!(arcs[0].internal_points.len(), 1);
    }

    #[test]
    fn crossing_through_third_node_inserts_waypoint() {
        let (mut diagram, _) = two_node_arc(vec![(200.0, 0.0)]);
        diagram
            .add_node(Node::new("m", "", (120.0, 0.0), 40.0, 40.0))
            .unwrap();
        let index = DiagramIndex::build(&diagram);
        let geometry = arc_geometries(diagram.nodes(), diagram.ports(), &index);
        let settings = LayoutSettings::default();
        let (nodes, _, arcs) = diagram.parts_mut();
        let inserted = repair_crossings(arcs, &geometry, nodes, &settings);
        assert_eq!(inserted, 1);
        let zone = clearance_zone(&nodes[2], &settings);
        assert!(!zone.contains(arcs[0].internal_points[0]));
    }

    #[test]
    fn points_follow_moving_endpoints() {
        let (mut diagram, before) = two_node_arc(vec![(150.0, 10.0), (250.0, 10.0)]);
        diagram.set_node_position("b", (430.0, 0.0));
        let index = DiagramIndex::build(&diagram);
        let after = arc_geometries(diagram.nodes(), diagram.ports(), &index);
        let (_, _, arcs) = diagram.parts_mut();
        follow_endpoints(arcs, &before, &after);
        assert!((arcs[0].internal_points[0].0 - 160.0).abs() < 1e-4);
        assert!((arcs[0].internal_points[1].0 - 270.0).abs() < 1e-4);
    }

    #[test]
    fn nearest_exit_picks_closest_edge() {
        let rect = Rect::new(0.0, 0.0, 100.0, 40.0);
        let (dir, depth) = nearest_exit((50.0, 5.0), &rect).unwrap();
        assert_eq!(dir, (0.0, -1.0));
        assert_eq!(depth, 5.0);
        assert!(nearest_exit((150.0, 5.0), &rect).is_none());
    }
}
