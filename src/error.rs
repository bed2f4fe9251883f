use crate::ir::{FlowDirection, Side};

/// Diagram mutations that would break a structural invariant.
///
/// These are raised eagerly by the model-building APIs; the diagram is left
/// untouched when one is returned.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StructuralError {
    #[error("node id already exists: {id}")]
    DuplicateNode { id: String },

    #[error("port id already exists: {id}")]
    DuplicatePort { id: String },

    #[error("arc id already exists: {id}")]
    DuplicateArc { id: String },

    #[error("port {port_id} references missing node {node_id}")]
    MissingNode { port_id: String, node_id: String },

    #[error("arc {arc_id} references missing port {port_id}")]
    MissingPort { arc_id: String, port_id: String },

    #[error(
        "arc {arc_id}: {side:?} side of node {node_id} (port {port_id}) does not allow {direction:?} arcs"
    )]
    FlowViolation {
        arc_id: String,
        port_id: String,
        node_id: String,
        side: Side,
        direction: FlowDirection,
    },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LayoutError {
    #[error(transparent)]
    Structural(#[from] StructuralError),

    #[error("time step must be positive and finite, got {dt}")]
    InvalidTimeStep { dt: f32 },

    #[error("unknown node: {id}")]
    UnknownNode { id: String },
}

pub type Result<T> = std::result::Result<T, LayoutError>;
