use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::StructuralError;
use crate::layout::geometry::Rect;

pub type Point = (f32, f32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Side {
    Top,
    Right,
    Bottom,
    Left,
}

impl Side {
    pub const ALL: [Side; 4] = [Side::Top, Side::Right, Side::Bottom, Side::Left];

    pub fn slot(self) -> usize {
        match self {
            Side::Top => 0,
            Side::Right => 1,
            Side::Bottom => 2,
            Side::Left => 3,
        }
    }

    /// Unit vector pointing away from the node through this side.
    pub fn normal(self) -> Point {
        match self {
            Side::Top => (0.0, -1.0),
            Side::Right => (1.0, 0.0),
            Side::Bottom => (0.0, 1.0),
            Side::Left => (-1.0, 0.0),
        }
    }

    /// Left/Right sides: arcs leave and enter horizontally.
    pub fn exits_horizontally(self) -> bool {
        matches!(self, Side::Left | Side::Right)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowDirection {
    Incoming,
    Outgoing,
}

/// Which arc directions a node side accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SideFlow {
    #[default]
    Both,
    IncomingOnly,
    OutgoingOnly,
    None,
}

impl SideFlow {
    pub fn allows(self, direction: FlowDirection) -> bool {
        match (self, direction) {
            (SideFlow::Both, _) => true,
            (SideFlow::IncomingOnly, FlowDirection::Incoming) => true,
            (SideFlow::OutgoingOnly, FlowDirection::Outgoing) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SideFlows([SideFlow; 4]);

impl SideFlows {
    pub fn uniform(flow: SideFlow) -> Self {
        Self([flow; 4])
    }

    pub fn get(&self, side: Side) -> SideFlow {
        self.0[side.slot()]
    }

    pub fn set(&mut self, side: Side, flow: SideFlow) {
        self.0[side.slot()] = flow;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Node {
    id: String,
    pub text: String,
    /// Center of the node.
    pub position: Point,
    pub velocity: Point,
    pub width: f32,
    pub height: f32,
    pub flows: SideFlows,
}

impl Node {
    pub fn new(
        id: impl Into<String>,
        text: impl Into<String>,
        position: Point,
        width: f32,
        height: f32,
    ) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            position,
            velocity: (0.0, 0.0),
            width: width.max(0.0),
            height: height.max(0.0),
            flows: SideFlows::default(),
        }
    }

    pub fn with_flow(mut self, side: Side, flow: SideFlow) -> Self {
        self.flows.set(side, flow);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn bounds(&self) -> Rect {
        Rect::centered(self.position, self.width, self.height)
    }

    pub fn allows(&self, side: Side, direction: FlowDirection) -> bool {
        self.flows.get(side).allows(direction)
    }
}

/// Where a port sits: a side of its node and a normalized offset along it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortRef {
    pub node_id: String,
    pub side: Side,
    pub offset: f32,
}

impl PortRef {
    pub fn new(node_id: impl Into<String>, side: Side, offset: f32) -> Self {
        Self {
            node_id: node_id.into(),
            side,
            offset,
        }
    }

    /// Offset clamped to `[0, 1]`; NaN reads as the side's midpoint.
    pub fn clamped_offset(&self) -> f32 {
        if self.offset.is_nan() {
            return 0.5;
        }
        self.offset.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Port {
    id: String,
    pub text: String,
    pub reference: PortRef,
}

impl Port {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn node_id(&self) -> &str {
        &self.reference.node_id
    }

    pub fn side(&self) -> Side {
        self.reference.side
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Arc {
    id: String,
    pub text: String,
    from_port: String,
    to_port: String,
    /// Massless interior shape points, owned and rewritten by the physics step.
    pub internal_points: Vec<Point>,
}

impl Arc {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn from_port(&self) -> &str {
        &self.from_port
    }

    pub fn to_port(&self) -> &str {
        &self.to_port
    }
}

/// World position of a port on the boundary of `node`.
///
/// Offsets run in increasing coordinate order along each side (left to right
/// on Top/Bottom, top to bottom on Left/Right).
pub fn port_world_position(node: &Node, port: &PortRef) -> Point {
    let t = port.clamped_offset();
    let bounds = node.bounds();
    match port.side {
        Side::Top => (bounds.x + bounds.width * t, bounds.y),
        Side::Bottom => (bounds.x + bounds.width * t, bounds.bottom()),
        Side::Left => (bounds.x, bounds.y + bounds.height * t),
        Side::Right => (bounds.right(), bounds.y + bounds.height * t),
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagram {
    nodes: Vec<Node>,
    ports: Vec<Port>,
    arcs: Vec<Arc>,
    #[serde(skip)]
    node_lookup: HashMap<String, usize>,
    #[serde(skip)]
    port_lookup: HashMap<String, usize>,
    #[serde(skip)]
    arc_lookup: HashMap<String, usize>,
}

impl Diagram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn ports(&self) -> &[Port] {
        &self.ports
    }

    pub fn arcs(&self) -> &[Arc] {
        &self.arcs
    }

    pub fn nodes_mut(&mut self) -> &mut [Node] {
        &mut self.nodes
    }

    pub fn arcs_mut(&mut self) -> &mut [Arc] {
        &mut self.arcs
    }

    /// Disjoint borrows for the physics step, which moves nodes and arc
    /// points while reading ports.
    pub(crate) fn parts_mut(&mut self) -> (&mut [Node], &[Port], &mut [Arc]) {
        (&mut self.nodes, &self.ports, &mut self.arcs)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn add_node(&mut self, node: Node) -> Result<(), StructuralError> {
        if self.node_lookup.contains_key(&node.id) {
            return Err(StructuralError::DuplicateNode { id: node.id });
        }
        self.node_lookup.insert(node.id.clone(), self.nodes.len());
        self.nodes.push(node);
        Ok(())
    }

    /// Adds a port and re-spreads every port on the same node side.
    pub fn add_port(
        &mut self,
        id: impl Into<String>,
        text: impl Into<String>,
        reference: PortRef,
    ) -> Result<(), StructuralError> {
        let id = id.into();
        if self.port_lookup.contains_key(&id) {
            return Err(StructuralError::DuplicatePort { id });
        }
        if !self.node_lookup.contains_key(&reference.node_id) {
            return Err(StructuralError::MissingNode {
                port_id: id,
                node_id: reference.node_id,
            });
        }
        let node_id = reference.node_id.clone();
        let side = reference.side;
        self.port_lookup.insert(id.clone(), self.ports.len());
        self.ports.push(Port {
            id,
            text: text.into(),
            reference,
        });
        self.distribute_side(&node_id, side);
        Ok(())
    }

    pub fn add_arc(
        &mut self,
        id: impl Into<String>,
        text: impl Into<String>,
        from_port: &str,
        to_port: &str,
    ) -> Result<(), StructuralError> {
        let id = id.into();
        if self.arc_lookup.contains_key(&id) {
            return Err(StructuralError::DuplicateArc { id });
        }
        let from = self
            .try_get_port(from_port)
            .ok_or_else(|| StructuralError::MissingPort {
                arc_id: id.clone(),
                port_id: from_port.to_string(),
            })?;
        let to = self
            .try_get_port(to_port)
            .ok_or_else(|| StructuralError::MissingPort {
                arc_id: id.clone(),
                port_id: to_port.to_string(),
            })?;
        // Self-loops are exempt from side flow rules.
        if from.node_id() != to.node_id() {
            self.check_flow(&id, from, FlowDirection::Outgoing)?;
            self.check_flow(&id, to, FlowDirection::Incoming)?;
        }
        self.arc_lookup.insert(id.clone(), self.arcs.len());
        self.arcs.push(Arc {
            id,
            text: text.into(),
            from_port: from_port.to_string(),
            to_port: to_port.to_string(),
            internal_points: Vec::new(),
        });
        Ok(())
    }

    fn check_flow(
        &self,
        arc_id: &str,
        port: &Port,
        direction: FlowDirection,
    ) -> Result<(), StructuralError> {
        let node = self
            .try_get_node(port.node_id())
            .ok_or_else(|| StructuralError::MissingNode {
                port_id: port.id.clone(),
                node_id: port.node_id().to_string(),
            })?;
        if node.allows(port.side(), direction) {
            return Ok(());
        }
        Err(StructuralError::FlowViolation {
            arc_id: arc_id.to_string(),
            port_id: port.id.clone(),
            node_id: node.id.clone(),
            side: port.side(),
            direction,
        })
    }

    pub fn try_get_node(&self, id: &str) -> Option<&Node> {
        self.node_lookup.get(id).map(|&idx| &self.nodes[idx])
    }

    pub fn try_get_node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.node_lookup.get(id).map(|&idx| &mut self.nodes[idx])
    }

    pub fn try_get_port(&self, id: &str) -> Option<&Port> {
        self.port_lookup.get(id).map(|&idx| &self.ports[idx])
    }

    pub fn try_get_arc(&self, id: &str) -> Option<&Arc> {
        self.arc_lookup.get(id).map(|&idx| &self.arcs[idx])
    }

    pub fn ports_on<'a>(&'a self, node_id: &'a str, side: Side) -> impl Iterator<Item = &'a Port> {
        self.ports
            .iter()
            .filter(move |port| port.node_id() == node_id && port.side() == side)
    }

    pub fn port_world_position(&self, port_id: &str) -> Option<Point> {
        let port = self.try_get_port(port_id)?;
        let node = self.try_get_node(port.node_id())?;
        Some(port_world_position(node, &port.reference))
    }

    /// Outward normal of the side a port sits on.
    pub fn port_side_normal(&self, port_id: &str) -> Option<Point> {
        self.try_get_port(port_id).map(|port| port.side().normal())
    }

    /// Moves a node directly (drag input) and clears its velocity.
    pub fn set_node_position(&mut self, id: &str, position: Point) -> bool {
        let Some(node) = self.try_get_node_mut(id) else {
            return false;
        };
        node.position = position;
        node.velocity = (0.0, 0.0);
        true
    }

    pub fn clear_velocities(&mut self) {
        for node in &mut self.nodes {
            node.velocity = (0.0, 0.0);
        }
    }

    /// Union of all node bounds, `None` for an empty diagram.
    pub fn bounds(&self) -> Option<Rect> {
        self.nodes
            .iter()
            .map(Node::bounds)
            .reduce(|acc, rect| acc.union(&rect))
    }

    pub fn distribute_all_ports_proportionally(&mut self) {
        let mut groups: Vec<(String, Side)> = self
            .ports
            .iter()
            .map(|port| (port.node_id().to_string(), port.side()))
            .collect();
        groups.sort();
        groups.dedup();
        for (node_id, side) in groups {
            self.distribute_side(&node_id, side);
        }
    }

    /// Spreads the ports of one node side to `(i + 1) / (n + 1)`, ordered by
    /// current offset and then by id.
    fn distribute_side(&mut self, node_id: &str, side: Side) {
        let mut members: Vec<usize> = self
            .ports
            .iter()
            .enumerate()
            .filter(|(_, port)| port.node_id() == node_id && port.side() == side)
            .map(|(idx, _)| idx)
            .collect();
        members.sort_by(|&a, &b| {
            let pa = &self.ports[a];
            let pb = &self.ports[b];
            pa.reference
                .clamped_offset()
                .total_cmp(&pb.reference.clamped_offset())
                .then_with(|| pa.id.cmp(&pb.id))
        });
        let count = members.len() as f32;
        for (rank, idx) in members.into_iter().enumerate() {
            let reference = &self.ports[idx].reference;
            self.ports[idx].reference = PortRef {
                offset: (rank as f32 + 1.0) / (count + 1.0),
                ..reference.clone()
            };
        }
    }
}

/// Id → index maps rebuilt at the start of every pass.
///
/// Arcs whose ports cannot be resolved get `None` ends and are skipped by the
/// per-frame passes rather than failing them.
#[derive(Debug, Clone, Default)]
pub struct DiagramIndex {
    pub node_by_id: HashMap<String, usize>,
    pub port_by_id: HashMap<String, usize>,
    /// Owning node index per port.
    pub port_node: Vec<Option<usize>>,
    /// `(from port, to port)` indices per arc.
    pub arc_ends: Vec<Option<(usize, usize)>>,
}

impl DiagramIndex {
    pub fn build(diagram: &Diagram) -> Self {
        let node_by_id: HashMap<String, usize> = diagram
            .nodes
            .iter()
            .enumerate()
            .map(|(idx, node)| (node.id.clone(), idx))
            .collect();
        let port_by_id: HashMap<String, usize> = diagram
            .ports
            .iter()
            .enumerate()
            .map(|(idx, port)| (port.id.clone(), idx))
            .collect();
        let port_node = diagram
            .ports
            .iter()
            .map(|port| node_by_id.get(port.node_id()).copied())
            .collect();
        let arc_ends = diagram
            .arcs
            .iter()
            .map(|arc| {
                let from = port_by_id.get(&arc.from_port)?;
                let to = port_by_id.get(&arc.to_port)?;
                Some((*from, *to))
            })
            .collect();
        Self {
            node_by_id,
            port_by_id,
            port_node,
            arc_ends,
        }
    }

    /// Node indices at both ends of an arc.
    pub fn arc_nodes(&self, arc_idx: usize) -> Option<(usize, usize)> {
        let (from, to) = self.arc_ends.get(arc_idx).copied().flatten()?;
        let from_node = self.port_node.get(from).copied().flatten()?;
        let to_node = self.port_node.get(to).copied().flatten()?;
        Some((from_node, to_node))
    }

    /// Current world positions of an arc's two ports.
    pub fn arc_endpoints(&self, diagram: &Diagram, arc_idx: usize) -> Option<(Point, Point)> {
        let (from, to) = self.arc_ends.get(arc_idx).copied().flatten()?;
        let (from_node, to_node) = self.arc_nodes(arc_idx)?;
        Some((
            port_world_position(&diagram.nodes[from_node], &diagram.ports[from].reference),
            port_world_position(&diagram.nodes[to_node], &diagram.ports[to].reference),
        ))
    }
}
