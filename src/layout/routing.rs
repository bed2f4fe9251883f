use std::collections::{HashMap, HashSet};

use crate::config::{LayoutSettings, RouterConfig};
use crate::ir::{Diagram, DiagramIndex, Point, Side};

use super::geometry::{
    EPS, Rect, add, compress_path, path_bend_count, path_length, point_at_fraction, scale, sub,
    segment_crosses_rect,
};
use super::types::{BendOrder, LabelKey, LabelObstacle, RoutedArc};

pub(super) type Segment = (Point, Point);

/// Per-arc routing choices carried from one cycle to the next.
#[derive(Debug, Clone, Default)]
pub struct RouterState {
    bend_orders: HashMap<String, BendOrder>,
    lane_shifts: HashMap<String, i32>,
}

impl RouterState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.bend_orders.clear();
        self.lane_shifts.clear();
    }

    pub fn bend_order(&self, arc_id: &str) -> Option<BendOrder> {
        self.bend_orders.get(arc_id).copied()
    }

    /// Extra lane shift (in lane-spacing units) chosen last cycle.
    pub fn lane_shift(&self, arc_id: &str) -> i32 {
        self.lane_shifts.get(arc_id).copied().unwrap_or(0)
    }

    fn retain_arcs(&mut self, live: &HashSet<&str>) {
        self.bend_orders.retain(|id, _| live.contains(id.as_str()));
        self.lane_shifts.retain(|id, _| live.contains(id.as_str()));
    }
}

struct ArcJob<'a> {
    id: &'a str,
    from_port: &'a str,
    to_port: &'a str,
    from_node: usize,
    to_node: usize,
    from: Point,
    to: Point,
    from_side: Side,
    to_side: Side,
    /// Bounds of the owning node, used to band self-loops.
    from_bounds: Rect,
}

impl ArcJob<'_> {
    fn is_self_loop(&self) -> bool {
        self.from_node == self.to_node
    }

    fn is_endpoint(&self, node_idx: usize) -> bool {
        self.from_node == node_idx || self.to_node == node_idx
    }

    fn owns_label(&self, key: &LabelKey) -> bool {
        match key {
            LabelKey::Arc(id) => id == self.id,
            LabelKey::Port(id) => id == self.from_port || id == self.to_port,
        }
    }
}

struct RouteContext<'a> {
    config: &'a RouterConfig,
    node_rects: &'a [Rect],
    label_rects: &'a [Rect],
    routed: &'a [Segment],
    exit: f32,
}

#[derive(Debug, Clone)]
struct Candidate {
    order: BendOrder,
    points: Vec<Point>,
    score: f32,
    node_crossings: usize,
    overlaps: usize,
}

/// Routes every arc whose ports resolve, in arc-id order.
///
/// `obstacles` are the label rectangles from the previous label pass; each
/// arc ignores its own label and the labels of its two ports.
pub fn route_arcs(
    diagram: &Diagram,
    settings: &LayoutSettings,
    config: &RouterConfig,
    obstacles: &[LabelObstacle],
    state: &mut RouterState,
) -> Vec<RoutedArc> {
    let index = DiagramIndex::build(diagram);
    let mut jobs: Vec<ArcJob> = diagram
        .arcs()
        .iter()
        .enumerate()
        .filter_map(|(arc_idx, arc)| {
            let (from_port, to_port) = index.arc_ends[arc_idx]?;
            let (from_node, to_node) = index.arc_nodes(arc_idx)?;
            let (from, to) = index.arc_endpoints(diagram, arc_idx)?;
            Some(ArcJob {
                id: arc.id(),
                from_port: arc.from_port(),
                to_port: arc.to_port(),
                from_node,
                to_node,
                from,
                to,
                from_side: diagram.ports()[from_port].side(),
                to_side: diagram.ports()[to_port].side(),
                from_bounds: diagram.nodes()[from_node].bounds(),
            })
        })
        .collect();
    jobs.sort_by(|a, b| a.id.cmp(b.id));

    let live: HashSet<&str> = jobs.iter().map(|job| job.id).collect();
    state.retain_arcs(&live);

    let lanes = assign_lanes(&jobs, config.lane_spacing);
    let exit = config
        .min_exit_distance
        .max(settings.min_node_spacing / 2.0)
        .max(0.0);
    let node_rects: Vec<Rect> = diagram
        .nodes()
        .iter()
        .map(|node| node.bounds().inflate(config.node_clearance))
        .collect();

    let mut routed: Vec<Segment> = Vec::new();
    let mut routes = Vec::with_capacity(jobs.len());
    for (job, base_lane) in jobs.iter().zip(lanes) {
        let label_rects: Vec<Rect> = obstacles
            .iter()
            .filter(|obstacle| !job.owns_label(&obstacle.key))
            .map(|obstacle| obstacle.rect.inflate(config.label_clearance))
            .collect();
        let ctx = RouteContext {
            config,
            node_rects: &node_rects,
            label_rects: &label_rects,
            routed: &routed,
            exit,
        };
        let Some((candidate, shift, lane)) = route_one(job, base_lane, &ctx, state) else {
            continue;
        };
        state.bend_orders.insert(job.id.to_string(), candidate.order);
        state.lane_shifts.insert(job.id.to_string(), shift);
        routed.extend(candidate.points.windows(2).map(|w| (w[0], w[1])));
        let (label_anchor, label_normal) = label_anchor(&candidate.points);
        routes.push(RoutedArc {
            arc_id: job.id.to_string(),
            points: candidate.points,
            label_anchor,
            label_normal,
            bend_order: candidate.order,
            lane_offset: lane,
            score: candidate.score,
            node_crossings: candidate.node_crossings,
        });
    }
    routes
}

/// Lane offsets per job: arcs leaving the same node side are spread around
/// the side's center line in id order.
fn assign_lanes(jobs: &[ArcJob], spacing: f32) -> Vec<f32> {
    let mut bundles: HashMap<(usize, Side), Vec<usize>> = HashMap::new();
    for (idx, job) in jobs.iter().enumerate() {
        bundles
            .entry((job.from_node, job.from_side))
            .or_default()
            .push(idx);
    }
    let mut lanes = vec![0.0; jobs.len()];
    for members in bundles.values() {
        let center = (members.len() as f32 - 1.0) / 2.0;
        for (rank, &idx) in members.iter().enumerate() {
            lanes[idx] = (rank as f32 - center) * spacing;
        }
    }
    lanes
}

/// Remembered shift first, then 0, +1, -1, +2, -2, …
fn shift_sequence(remembered: i32, max_steps: usize) -> Vec<i32> {
    let mut out = vec![remembered];
    for k in 0..=max_steps as i32 {
        for shift in [k, -k] {
            if !out.contains(&shift) {
                out.push(shift);
            }
        }
    }
    out
}

fn route_one(
    job: &ArcJob,
    base_lane: f32,
    ctx: &RouteContext,
    state: &RouterState,
) -> Option<(Candidate, i32, f32)> {
    let previous = state.bend_order(job.id);
    let mut best: Option<(Candidate, i32, f32)> = None;
    for shift in shift_sequence(state.lane_shift(job.id), ctx.config.max_lane_shift_steps) {
        let lane = base_lane + shift as f32 * ctx.config.lane_spacing;
        let candidate = pick_order(job, lane, ctx, previous);
        if candidate.overlaps == 0 {
            return Some((candidate, shift, lane));
        }
        if best
            .as_ref()
            .is_none_or(|(current, _, _)| candidate.score < current.score)
        {
            best = Some((candidate, shift, lane));
        }
    }
    best
}

fn pick_order(
    job: &ArcJob,
    lane: f32,
    ctx: &RouteContext,
    previous: Option<BendOrder>,
) -> Candidate {
    let horizontal = best_candidate(job, BendOrder::HorizontalFirst, lane, ctx);
    let vertical = best_candidate(job, BendOrder::VerticalFirst, lane, ctx);
    let (kept, other) = match previous {
        Some(BendOrder::HorizontalFirst) => (horizontal, vertical),
        Some(BendOrder::VerticalFirst) => (vertical, horizontal),
        None => {
            return if vertical.score < horizontal.score {
                vertical
            } else {
                horizontal
            };
        }
    };
    if other.score + ctx.config.choice_hysteresis.max(0.0) < kept.score {
        other
    } else {
        kept
    }
}

/// Best route for one bend order. The channel sits midway between the exits;
/// when that route runs through a node, channels just past the blocking
/// nodes are tried as well.
fn best_candidate(job: &ArcJob, order: BendOrder, lane: f32, ctx: &RouteContext) -> Candidate {
    if job.is_self_loop() {
        let points = self_loop_points(job, order, lane, ctx.exit);
        return score_candidate(order, points, job, ctx);
    }
    let (e0, e1) = exits(job, ctx.exit);
    let mid = match order {
        BendOrder::HorizontalFirst => (e0.0 + e1.0) / 2.0 + lane,
        BendOrder::VerticalFirst => (e0.1 + e1.1) / 2.0 + lane,
    };
    let mut best = score_candidate(order, channel_points(job, order, mid, ctx.exit), job, ctx);
    if best.node_crossings == 0 {
        return best;
    }
    let blockers = crossed_nodes(&best.points, job, ctx.node_rects);
    let mut channels = Vec::new();
    let mut low = f32::INFINITY;
    let mut high = f32::NEG_INFINITY;
    let margin = ctx.exit + lane.abs();
    for &node_idx in &blockers {
        let rect = ctx.node_rects[node_idx];
        let (lo, hi) = match order {
            BendOrder::HorizontalFirst => (rect.x, rect.right()),
            BendOrder::VerticalFirst => (rect.y, rect.bottom()),
        };
        channels.push(lo - margin);
        channels.push(hi + margin);
        low = low.min(lo);
        high = high.max(hi);
    }
    if blockers.len() > 1 {
        channels.push(low - margin);
        channels.push(high + margin);
    }
    for channel in channels {
        let candidate =
            score_candidate(order, channel_points(job, order, channel, ctx.exit), job, ctx);
        if candidate.score < best.score {
            best = candidate;
        }
    }
    best
}

fn exits(job: &ArcJob, exit: f32) -> (Point, Point) {
    (
        add(job.from, scale(job.from_side.normal(), exit)),
        add(job.to, scale(job.to_side.normal(), exit)),
    )
}

/// Keeps the channel coordinate from pulling a route back over either exit
/// stub. The from side is applied last, so it wins a conflict.
fn clamp_channel(value: f32, from: (f32, f32), to: (f32, f32)) -> f32 {
    let mut v = value;
    for (exit_coord, normal) in [to, from] {
        if normal > 0.0 {
            v = v.max(exit_coord);
        } else if normal < 0.0 {
            v = v.min(exit_coord);
        }
    }
    v
}

fn channel_points(job: &ArcJob, order: BendOrder, channel: f32, exit: f32) -> Vec<Point> {
    let (e0, e1) = exits(job, exit);
    let n0 = job.from_side.normal();
    let n1 = job.to_side.normal();
    let raw = match order {
        BendOrder::HorizontalFirst => {
            let x = clamp_channel(channel, (e0.0, n0.0), (e1.0, n1.0));
            vec![job.from, e0, (x, e0.1), (x, e1.1), e1, job.to]
        }
        BendOrder::VerticalFirst => {
            let y = clamp_channel(channel, (e0.1, n0.1), (e1.1, n1.1));
            vec![job.from, e0, (e0.0, y), (e1.0, y), e1, job.to]
        }
    };
    compress_path(&raw)
}

/// Self-loops walk a band around their node: clockwise for
/// horizontal-first, counter-clockwise for vertical-first.
fn self_loop_points(job: &ArcJob, order: BendOrder, lane: f32, exit: f32) -> Vec<Point> {
    let band = job.from_bounds.inflate(exit + lane.abs());
    let clockwise = order == BendOrder::HorizontalFirst;
    let start = project_to_band(&band, job.from_side, job.from);
    let end = project_to_band(&band, job.to_side, job.to);
    let mut raw = vec![job.from, start];
    let mut side = job.from_side;
    let mut pos = start;
    // Four corners take the walk back to any side.
    for _ in 0..5 {
        if side == job.to_side && ahead_on_side(side, pos, end, clockwise) {
            break;
        }
        let (corner, next) = next_corner(&band, side, clockwise);
        raw.push(corner);
        pos = corner;
        side = next;
    }
    raw.push(end);
    raw.push(job.to);
    compress_path(&raw)
}

fn project_to_band(band: &Rect, side: Side, port: Point) -> Point {
    match side {
        Side::Top => (port.0, band.y),
        Side::Bottom => (port.0, band.bottom()),
        Side::Left => (band.x, port.1),
        Side::Right => (band.right(), port.1),
    }
}

fn ahead_on_side(side: Side, pos: Point, target: Point, clockwise: bool) -> bool {
    let travel = match side {
        Side::Top => (1.0, 0.0),
        Side::Right => (0.0, 1.0),
        Side::Bottom => (-1.0, 0.0),
        Side::Left => (0.0, -1.0),
    };
    let travel = if clockwise { travel } else { scale(travel, -1.0) };
    let d = sub(target, pos);
    d.0 * travel.0 + d.1 * travel.1 >= -EPS
}

fn next_corner(band: &Rect, side: Side, clockwise: bool) -> (Point, Side) {
    match (side, clockwise) {
        (Side::Top, true) => ((band.right(), band.y), Side::Right),
        (Side::Right, true) => ((band.right(), band.bottom()), Side::Bottom),
        (Side::Bottom, true) => ((band.x, band.bottom()), Side::Left),
        (Side::Left, true) => ((band.x, band.y), Side::Top),
        (Side::Top, false) => ((band.x, band.y), Side::Left),
        (Side::Left, false) => ((band.x, band.bottom()), Side::Bottom),
        (Side::Bottom, false) => ((band.right(), band.bottom()), Side::Right),
        (Side::Right, false) => ((band.right(), band.y), Side::Top),
    }
}

/// Segments between the exit and entry points; the port stubs are fixed and
/// shared by every candidate.
fn interior_segments(points: &[Point]) -> impl Iterator<Item = Segment> + '_ {
    let interior = if points.len() > 2 {
        &points[1..points.len() - 1]
    } else {
        &points[0..0]
    };
    interior.windows(2).map(|w| (w[0], w[1]))
}

fn crossed_nodes(points: &[Point], job: &ArcJob, node_rects: &[Rect]) -> Vec<usize> {
    node_rects
        .iter()
        .enumerate()
        .filter(|(node_idx, rect)| {
            !job.is_endpoint(*node_idx)
                && interior_segments(points).any(|(a, b)| segment_crosses_rect(a, b, rect))
        })
        .map(|(node_idx, _)| node_idx)
        .collect()
}

fn score_candidate(
    order: BendOrder,
    points: Vec<Point>,
    job: &ArcJob,
    ctx: &RouteContext,
) -> Candidate {
    let config = ctx.config;
    let mut node_crossings = 0usize;
    for (a, b) in interior_segments(&points) {
        node_crossings += ctx
            .node_rects
            .iter()
            .enumerate()
            .filter(|(node_idx, rect)| {
                !job.is_endpoint(*node_idx) && segment_crosses_rect(a, b, rect)
            })
            .count();
    }
    let mut label_crossings = 0usize;
    let mut overlaps = 0usize;
    for seg in points.windows(2) {
        label_crossings += ctx
            .label_rects
            .iter()
            .filter(|rect| segment_crosses_rect(seg[0], seg[1], rect))
            .count();
        overlaps += ctx
            .routed
            .iter()
            .filter(|other| {
                collinear_overlap((seg[0], seg[1]), **other, config.collinear_clearance) > EPS
            })
            .count();
    }
    let score = node_crossings as f32 * config.node_crossing_penalty
        + label_crossings as f32 * config.label_crossing_penalty
        + path_length(&points) * config.length_weight
        + path_bend_count(&points) as f32 * config.bend_weight
        + overlaps as f32 * config.collinear_overlap_penalty;
    Candidate {
        order,
        points,
        score,
        node_crossings,
        overlaps,
    }
}

fn same_point(a: Point, b: Point) -> bool {
    (a.0 - b.0).abs() <= EPS && (a.1 - b.1).abs() <= EPS
}

fn interval_overlap(a0: f32, a1: f32, b0: f32, b1: f32) -> f32 {
    (a0.max(a1).min(b0.max(b1)) - a0.min(a1).max(b0.min(b1))).max(0.0)
}

/// Length over which two axis-aligned segments run along the same line
/// (within `clearance`). Segments sharing an endpoint never count.
pub(super) fn collinear_overlap(a: Segment, b: Segment, clearance: f32) -> f32 {
    if same_point(a.0, b.0) || same_point(a.0, b.1) || same_point(a.1, b.0) || same_point(a.1, b.1)
    {
        return 0.0;
    }
    let horizontal = |s: Segment| (s.0.1 - s.1.1).abs() <= EPS && (s.0.0 - s.1.0).abs() > EPS;
    let vertical = |s: Segment| (s.0.0 - s.1.0).abs() <= EPS && (s.0.1 - s.1.1).abs() > EPS;
    if horizontal(a) && horizontal(b) && (a.0.1 - b.0.1).abs() <= clearance {
        return interval_overlap(a.0.0, a.1.0, b.0.0, b.1.0);
    }
    if vertical(a) && vertical(b) && (a.0.0 - b.0.0).abs() <= clearance {
        return interval_overlap(a.0.1, a.1.1, b.0.1, b.1.1);
    }
    0.0
}

/// Arclength midpoint of a route and the unit normal labels sit along:
/// upward for horizontal runs, rightward for vertical ones.
pub(super) fn label_anchor(points: &[Point]) -> (Point, Point) {
    let Some((anchor, dir)) = point_at_fraction(points, 0.5) else {
        let anchor = points.first().copied().unwrap_or((0.0, 0.0));
        return (anchor, (0.0, -1.0));
    };
    let normal = if dir.0.abs() >= dir.1.abs() {
        let n = (-dir.1, dir.0);
        if n.1 <= 0.0 { n } else { scale(n, -1.0) }
    } else {
        let n = (dir.1, -dir.0);
        if n.0 >= 0.0 { n } else { scale(n, -1.0) }
    };
    (anchor, normal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::geometry::is_axis_aligned;
    use crate::ir::{Node, PortRef};

    fn facing_pair(gap_node: bool) -> Diagram {
        let mut diagram = Diagram::new();
        diagram
            .add_node(Node::new("a", "", (0.0, 0.0), 100.0, 60.0))
            .unwrap();
        diagram
            .add_node(Node::new("b", "", (400.0, 0.0), 100.0, 60.0))
            .unwrap();
        if gap_node {
            diagram
                .add_node(Node::new("m", "", (200.0, 0.0), 100.0, 60.0))
                .unwrap();
        }
        diagram
            .add_port("out", "", PortRef::new("a", Side::Right, 0.5))
            .unwrap();
        diagram
            .add_port("in", "", PortRef::new("b", Side::Left, 0.5))
            .unwrap();
        diagram.add_arc("x", "", "out", "in").unwrap();
        diagram
    }

    fn route(diagram: &Diagram, state: &mut RouterState) -> Vec<RoutedArc> {
        route_arcs(
            diagram,
            &LayoutSettings::default(),
            &RouterConfig::default(),
            &[],
            state,
        )
    }

    #[test]
    fn facing_ports_route_straight() {
        let diagram = facing_pair(false);
        let routes = route(&diagram, &mut RouterState::new());
        assert_eq!(routes.len(), 1);
        assert_eq!(
            routes[0].points,
            vec![(50.0, 0.0), (70.0, 0.0), (330.0, 0.0), (350.0, 0.0)]
        );
        assert_eq!(routes[0].label_anchor, (200.0, 0.0));
        assert_eq!(routes[0].label_normal, (0.0, -1.0));
    }

    #[test]
    fn route_detours_around_blocking_node() {
        let diagram = facing_pair(true);
        let routes = route(&diagram, &mut RouterState::new());
        let route = &routes[0];
        assert_eq!(route.node_crossings, 0, "route {:?}", route.points);
        assert!(route.score < RouterConfig::default().node_crossing_penalty);
        assert!(is_axis_aligned(&route.points));
    }

    #[test]
    fn exit_stub_is_at_least_half_the_spacing() {
        let diagram = facing_pair(false);
        let routes = route(&diagram, &mut RouterState::new());
        let points = &routes[0].points;
        assert_eq!(points[1].0 - points[0].0, 20.0);
    }

    #[test]
    fn channel_never_backs_over_an_exit() {
        // Right exit at 70, left entry at 330.
        assert_eq!(clamp_channel(50.0, (70.0, 1.0), (330.0, -1.0)), 70.0);
        assert_eq!(clamp_channel(400.0, (70.0, 1.0), (330.0, -1.0)), 330.0);
        assert_eq!(clamp_channel(200.0, (70.0, 1.0), (330.0, -1.0)), 200.0);
        // Conflicting exits: the from side wins.
        assert_eq!(clamp_channel(0.0, (70.0, 1.0), (-70.0, -1.0)), 70.0);
        // Top/bottom exits do not constrain a vertical channel.
        assert_eq!(clamp_channel(-500.0, (70.0, 0.0), (330.0, 0.0)), -500.0);
    }

    #[test]
    fn target_behind_the_exit_keeps_the_stub() {
        let mut diagram = facing_pair(false);
        diagram.set_node_position("b", (0.0, 300.0));
        let routes = route(&diagram, &mut RouterState::new());
        assert!(is_axis_aligned(&routes[0].points));
        assert_eq!(routes[0].points[1], (70.0, 0.0));
    }

    #[test]
    fn bundled_arcs_get_distinct_lanes() {
        let mut diagram = facing_pair(false);
        diagram
            .add_node(Node::new("c", "", (400.0, 200.0), 100.0, 60.0))
            .unwrap();
        diagram
            .add_port("out2", "", PortRef::new("a", Side::Right, 0.5))
            .unwrap();
        diagram
            .add_port("in2", "", PortRef::new("c", Side::Left, 0.5))
            .unwrap();
        diagram.add_arc("y", "", "out2", "in2").unwrap();
        let routes = route(&diagram, &mut RouterState::new());
        assert_eq!(routes.len(), 2);
        assert_ne!(routes[0].lane_offset, routes[1].lane_offset);
        assert_eq!(routes[0].lane_offset, -routes[1].lane_offset);
    }

    #[test]
    fn self_loop_stays_outside_its_node() {
        let mut diagram = Diagram::new();
        diagram
            .add_node(Node::new("a", "", (0.0, 0.0), 100.0, 60.0))
            .unwrap();
        diagram
            .add_port("r", "", PortRef::new("a", Side::Right, 0.5))
            .unwrap();
        diagram
            .add_port("t", "", PortRef::new("a", Side::Top, 0.5))
            .unwrap();
        diagram.add_arc("loop", "", "r", "t").unwrap();
        let routes = route(&diagram, &mut RouterState::new());
        let points = &routes[0].points;
        let bounds = diagram.nodes()[0].bounds();
        assert!(is_axis_aligned(points));
        assert!(
            interior_segments(points).all(|(a, b)| !segment_crosses_rect(a, b, &bounds)),
            "loop {:?}",
            points
        );
    }

    #[test]
    fn router_state_remembers_choices() {
        let diagram = facing_pair(true);
        let mut state = RouterState::new();
        let first = route(&diagram, &mut state);
        assert_eq!(state.bend_order("x"), Some(first[0].bend_order));
        let second = route(&diagram, &mut state);
        assert_eq!(first[0].points, second[0].points);
        state.clear();
        assert_eq!(state.bend_order("x"), None);
    }

    #[test]
    fn label_obstacle_flips_bend_order() {
        let mut diagram = facing_pair(false);
        diagram.set_node_position("b", (400.0, 200.0));
        let clear = route(&diagram, &mut RouterState::new());
        assert_eq!(clear[0].bend_order, BendOrder::HorizontalFirst);
        assert!(clear[0].points.contains(&(200.0, 0.0)), "route {:?}", clear[0].points);

        // A foreign label sitting on the horizontal-first channel at x = 200.
        let blocker = Rect::new(190.0, 20.0, 20.0, 40.0);
        let obstacles = [LabelObstacle {
            key: LabelKey::Arc("other".to_string()),
            rect: blocker,
        }];
        let routes = route_arcs(
            &diagram,
            &LayoutSettings::default(),
            &RouterConfig::default(),
            &obstacles,
            &mut RouterState::new(),
        );
        assert_eq!(routes[0].bend_order, BendOrder::VerticalFirst);
        assert!(
            routes[0]
                .points
                .windows(2)
                .all(|w| !segment_crosses_rect(w[0], w[1], &blocker)),
            "route {:?}",
            routes[0].points
        );
    }

    #[test]
    fn own_port_label_is_not_an_obstacle() {
        let mut diagram = facing_pair(false);
        diagram.set_node_position("b", (400.0, 200.0));
        let obstacles = [LabelObstacle {
            key: LabelKey::Port("out".to_string()),
            rect: Rect::new(190.0, 20.0, 20.0, 40.0),
        }];
        let routes = route_arcs(
            &diagram,
            &LayoutSettings::default(),
            &RouterConfig::default(),
            &obstacles,
            &mut RouterState::new(),
        );
        assert_eq!(routes[0].bend_order, BendOrder::HorizontalFirst);
    }

    /// `a0` runs down x = 200 and `a1` along y = 0. Both unshifted candidates
    /// for `a2` (from c's bottom to d's top) sit on one of those lines.
    fn crossroads() -> Diagram {
        let mut diagram = Diagram::new();
        for (id, pos, width) in [
            ("p", (200.0, -300.0), 100.0),
            ("q", (200.0, 300.0), 100.0),
            ("a", (0.0, 0.0), 100.0),
            ("b", (400.0, 0.0), 100.0),
            ("c", (150.0, -150.0), 80.0),
            ("d", (250.0, 150.0), 80.0),
        ] {
            diagram.add_node(Node::new(id, "", pos, width, 60.0)).unwrap();
        }
        for (port, node, side) in [
            ("p.out", "p", Side::Bottom),
            ("q.in", "q", Side::Top),
            ("a.out", "a", Side::Right),
            ("b.in", "b", Side::Left),
            ("c.out", "c", Side::Bottom),
            ("d.in", "d", Side::Top),
        ] {
            diagram
                .add_port(port, "", PortRef::new(node, side, 0.5))
                .unwrap();
        }
        diagram.add_arc("a0", "", "p.out", "q.in").unwrap();
        diagram.add_arc("a1", "", "a.out", "b.in").unwrap();
        diagram.add_arc("a2", "", "c.out", "d.in").unwrap();
        diagram
    }

    #[test]
    fn collinear_overlap_shifts_lane_and_is_remembered() {
        let diagram = crossroads();
        let mut state = RouterState::new();
        let routes = route(&diagram, &mut state);
        assert_eq!(routes.len(), 3);
        assert_eq!(state.lane_shift("a0"), 0);
        assert_eq!(state.lane_shift("a1"), 0);
        assert_eq!(state.lane_shift("a2"), 1);
        let shifted = &routes[2];
        assert_eq!(shifted.arc_id, "a2");
        assert_eq!(shifted.lane_offset, RouterConfig::default().lane_spacing);
        assert_eq!(shifted.node_crossings, 0);

        let again = route(&diagram, &mut state);
        assert_eq!(state.lane_shift("a2"), 1);
        assert_eq!(again[2].points, shifted.points);
    }

    #[test]
    fn collinear_overlap_requires_shared_line() {
        let a = ((0.0, 0.0), (10.0, 0.0));
        let b = ((5.0, 2.0), (20.0, 2.0));
        let c = ((5.0, 30.0), (20.0, 30.0));
        assert_eq!(collinear_overlap(a, b, 4.0), 5.0);
        assert_eq!(collinear_overlap(a, c, 4.0), 0.0);
    }

    #[test]
    fn vertical_anchor_normal_points_right() {
        let (anchor, normal) = label_anchor(&[(0.0, 0.0), (0.0, 100.0)]);
        assert_eq!(anchor, (0.0, 50.0));
        assert_eq!(normal, (1.0, 0.0));
    }
}
