pub mod config;
pub mod error;
pub mod ir;
pub mod layout;

pub use config::{Config, LabelConfig, LayoutSettings, RouterConfig, StabilityConfig, load_config};
pub use error::{LayoutError, Result, StructuralError};
pub use ir::{Arc, Diagram, FlowDirection, Node, Point, Port, PortRef, Side, SideFlow};
pub use layout::{LayoutEngine, LayoutFrame, RunState, layout_diagram};
