mod arc_points;
pub mod geometry;
mod label_placement;
mod physics;
mod reposition;
mod routing;
mod stability;
mod text;
mod types;
pub use label_placement::{
    LabelState, place_labels, preferred_arc_label_rect, preferred_port_label_rect, view_bounds,
};
pub use physics::{StepStats, node_gap, preview_step, step};
pub use reposition::reposition_nodes;
pub use routing::{RouterState, route_arcs};
pub use stability::{LiveClock, RunState, StabilityController};
pub use types::*;

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::config::Config;
use crate::error::{LayoutError, Result};
use crate::ir::{Diagram, Point};

/// What one live tick did.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TickOutcome {
    pub substeps: usize,
    pub sub_dt: f32,
    pub state: RunState,
}

/// Drives the full cycle: physics sub-steps, arc routing, label placement
/// and node repositioning, then the stability check. Holds every cache that
/// has to survive between cycles.
#[derive(Debug, Clone)]
pub struct LayoutEngine {
    config: Config,
    router: RouterState,
    labels: LabelState,
    stability: StabilityController,
    clock: LiveClock,
    dragging: Option<String>,
    view: Option<Rect>,
    frame: LayoutFrame,
}

impl LayoutEngine {
    pub fn new(mut config: Config) -> Self {
        config.settings.validate_and_clamp();
        Self {
            router: RouterState::new(),
            labels: LabelState::new(),
            stability: StabilityController::new(&config.stability),
            clock: LiveClock::new(&config.stability),
            dragging: None,
            view: None,
            frame: LayoutFrame::default(),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn frame(&self) -> &LayoutFrame {
        &self.frame
    }

    pub fn into_frame(self) -> LayoutFrame {
        self.frame
    }

    pub fn state(&self) -> RunState {
        self.stability.state()
    }

    pub fn stable_cycles(&self) -> usize {
        self.stability.stable_cycles()
    }

    pub fn dragged_node(&self) -> Option<&str> {
        self.dragging.as_deref()
    }

    /// Overrides the rectangle labels are clamped into. `None` falls back
    /// to the diagram bounds plus the configured margin.
    pub fn set_view(&mut self, view: Option<Rect>) {
        self.view = view;
    }

    /// Runs one full cycle advancing `sim_dt` seconds of simulated time,
    /// whatever the run state.
    pub fn cycle(&mut self, diagram: &mut Diagram, sim_dt: f32) -> &LayoutFrame {
        let (substeps, sub_dt) = self.clock.split(sim_dt);
        self.run_cycle(diagram, substeps, sub_dt);
        self.observe(diagram);
        &self.frame
    }

    /// Live ticking. Does nothing once the layout has auto-stopped.
    pub fn tick(&mut self, diagram: &mut Diagram, wall_dt: f32) -> TickOutcome {
        if !self.stability.is_running() {
            return TickOutcome {
                substeps: 0,
                sub_dt: 0.0,
                state: RunState::AutoStopped,
            };
        }
        let (substeps, sub_dt) = self.clock.substeps(wall_dt);
        self.run_cycle(diagram, substeps, sub_dt);
        let state = self.observe(diagram);
        TickOutcome {
            substeps,
            sub_dt,
            state,
        }
    }

    /// Runs cycles back to back until the node centers hold still at pixel
    /// resolution, or the tick budget runs out. Leaves the engine running.
    pub fn warm_start(&mut self, diagram: &mut Diagram, max_ticks: usize) -> bool {
        let (substeps, sub_dt) = self.clock.split(self.config.stability.warm_start_dt);
        let mut watcher = StabilityController::new(&self.config.stability);
        let mut settled = false;
        let mut ticks = 0;
        while ticks < max_ticks {
            self.run_cycle(diagram, substeps, sub_dt);
            ticks += 1;
            if watcher.observe(diagram, self.dragging.is_some()) == RunState::AutoStopped {
                settled = true;
                break;
            }
        }
        self.stability.force_running();
        debug!(ticks, settled, "warm start finished");
        settled
    }

    /// Warm start that stops the simulation when it settles.
    pub fn warm_start_and_stop(&mut self, diagram: &mut Diagram, max_ticks: usize) -> bool {
        let settled = self.warm_start(diagram, max_ticks);
        if settled {
            self.stability.stop();
            diagram.clear_velocities();
        }
        settled
    }

    /// Starts dragging `node_id`. Physics keeps computing its forces but no
    /// longer moves it.
    pub fn begin_drag(&mut self, diagram: &mut Diagram, node_id: &str) -> Result<()> {
        let Some(node) = diagram.try_get_node_mut(node_id) else {
            return Err(LayoutError::UnknownNode {
                id: node_id.to_string(),
            });
        };
        node.velocity = (0.0, 0.0);
        self.dragging = Some(node_id.to_string());
        self.stability.on_drag_start();
        Ok(())
    }

    /// Moves the dragged node. Without an active drag this does nothing.
    pub fn drag_to(&mut self, diagram: &mut Diagram, position: Point) -> Result<()> {
        let Some(id) = self.dragging.as_deref() else {
            return Ok(());
        };
        if !diagram.set_node_position(id, position) {
            return Err(LayoutError::UnknownNode { id: id.to_string() });
        }
        Ok(())
    }

    pub fn end_drag(&mut self) {
        self.dragging = None;
    }

    pub fn set_config(&mut self, mut config: Config) {
        config.settings.validate_and_clamp();
        self.stability.set_config(&config.stability);
        self.clock = LiveClock::new(&config.stability);
        self.config = config;
        self.stability.on_settings_changed();
    }

    /// Forgets everything carried between cycles, for a replaced diagram.
    pub fn reset(&mut self, diagram: &mut Diagram) {
        self.router.clear();
        self.labels.clear();
        self.dragging = None;
        self.frame = LayoutFrame::default();
        diagram.clear_velocities();
        self.stability.on_diagram_replaced();
    }

    fn run_cycle(&mut self, diagram: &mut Diagram, substeps: usize, sub_dt: f32) {
        let held = self.dragging.as_deref();
        for _ in 0..substeps {
            step(diagram, &self.config.settings, sub_dt, held);
        }

        let obstacles = self.frame.label_obstacles();
        let mut routes = route_arcs(
            diagram,
            &self.config.settings,
            &self.config.router,
            &obstacles,
            &mut self.router,
        );
        let view = view_bounds(diagram, &self.config.labels, self.view);
        let mut labels = place_labels(
            diagram,
            &routes,
            &self.config.labels,
            Some(view),
            &mut self.labels,
        );

        let repositioned = reposition_nodes(diagram, &labels, &self.config.labels, &view, held);
        if repositioned {
            let obstacles: Vec<LabelObstacle> = labels
                .iter()
                .map(|label| LabelObstacle {
                    key: label.key.clone(),
                    rect: label.rect,
                })
                .collect();
            routes = route_arcs(
                diagram,
                &self.config.settings,
                &self.config.router,
                &obstacles,
                &mut self.router,
            );
            let view = view_bounds(diagram, &self.config.labels, self.view);
            labels = place_labels(
                diagram,
                &routes,
                &self.config.labels,
                Some(view),
                &mut self.labels,
            );
        }

        self.frame = LayoutFrame {
            routes,
            labels,
            node_positions: node_positions(diagram),
            repositioned,
        };
    }

    fn observe(&mut self, diagram: &mut Diagram) -> RunState {
        let was_running = self.stability.is_running();
        let state = self.stability.observe(diagram, self.dragging.is_some());
        if was_running && state == RunState::AutoStopped {
            diagram.clear_velocities();
        }
        state
    }
}

fn node_positions(diagram: &Diagram) -> BTreeMap<String, Point> {
    diagram
        .nodes()
        .iter()
        .map(|node| (node.id().to_string(), node.position))
        .collect()
}

/// Lays out a diagram in one call: warm start until settled (or the
/// configured tick budget runs out) and return the final frame.
pub fn layout_diagram(diagram: &mut Diagram, config: &Config) -> LayoutFrame {
    let mut engine = LayoutEngine::new(config.clone());
    let settled = engine.warm_start_and_stop(diagram, config.stability.warm_start_max_ticks);
    if !settled {
        debug!("layout did not settle within the warm start budget");
    }
    engine.into_frame()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Node, PortRef, Side};

    fn pair() -> Diagram {
        let mut diagram = Diagram::new();
        diagram
            .add_node(Node::new("a", "A", (0.0, 0.0), 100.0, 60.0))
            .unwrap();
        diagram
            .add_node(Node::new("b", "B", (300.0, 0.0), 100.0, 60.0))
            .unwrap();
        diagram
            .add_port("a.out", "out", PortRef::new("a", Side::Right, 0.5))
            .unwrap();
        diagram
            .add_port("b.in", "in", PortRef::new("b", Side::Left, 0.5))
            .unwrap();
        diagram.add_arc("ab", "flow", "a.out", "b.in").unwrap();
        diagram
    }

    #[test]
    fn cycle_fills_the_frame() {
        let mut diagram = pair();
        let mut engine = LayoutEngine::new(Config::default());
        let frame = engine.cycle(&mut diagram, 1.0 / 60.0);
        assert_eq!(frame.routes.len(), 1);
        assert_eq!(frame.labels.len(), 3);
        assert_eq!(frame.node_positions.len(), 2);
        assert!(frame.label(&LabelKey::Arc("ab".into())).is_some());
    }

    #[test]
    fn dragged_node_follows_the_pointer_only() {
        let mut diagram = pair();
        let mut engine = LayoutEngine::new(Config::default());
        engine.begin_drag(&mut diagram, "a").unwrap();
        engine.drag_to(&mut diagram, (-50.0, 20.0)).unwrap();
        for _ in 0..10 {
            engine.tick(&mut diagram, 1.0 / 60.0);
        }
        assert_eq!(diagram.nodes()[0].position, (-50.0, 20.0));
        assert_eq!(engine.dragged_node(), Some("a"));
        engine.end_drag();
        assert_eq!(engine.dragged_node(), None);
    }

    #[test]
    fn unknown_drag_target_is_an_error() {
        let mut diagram = pair();
        let mut engine = LayoutEngine::new(Config::default());
        let err = engine.begin_drag(&mut diagram, "missing").unwrap_err();
        assert!(matches!(err, LayoutError::UnknownNode { .. }));
        // No drag active, so moving is a no-op.
        engine.drag_to(&mut diagram, (1.0, 1.0)).unwrap();
        assert_eq!(diagram.nodes()[0].position, (0.0, 0.0));
    }

    #[test]
    fn stopped_engine_ignores_ticks_until_restarted() {
        let mut diagram = pair();
        let mut engine = LayoutEngine::new(Config::default());
        engine.stability.stop();
        let before = diagram.nodes()[1].position;
        let outcome = engine.tick(&mut diagram, 1.0 / 60.0);
        assert_eq!(outcome.state, RunState::AutoStopped);
        assert_eq!(outcome.substeps, 0);
        assert_eq!(diagram.nodes()[1].position, before);

        engine.set_config(Config::default());
        assert_eq!(engine.state(), RunState::Running);
        engine.stability.stop();
        engine.begin_drag(&mut diagram, "b").unwrap();
        assert_eq!(engine.state(), RunState::Running);
    }

    #[test]
    fn reset_clears_caches() {
        let mut diagram = pair();
        let mut engine = LayoutEngine::new(Config::default());
        engine.cycle(&mut diagram, 1.0 / 60.0);
        engine.begin_drag(&mut diagram, "a").unwrap();
        engine.reset(&mut diagram);
        assert!(engine.frame().routes.is_empty());
        assert!(engine.labels.is_empty());
        assert_eq!(engine.dragged_node(), None);
        assert!(diagram.nodes().iter().all(|n| n.velocity == (0.0, 0.0)));
    }

    #[test]
    fn labels_stay_in_view_after_repositioning() {
        let mut diagram = Diagram::new();
        diagram
            .add_node(Node::new("a", "", (0.0, 0.0), 100.0, 60.0))
            .unwrap();
        diagram
            .add_node(Node::new("b", "", (130.0, -10.0), 60.0, 40.0))
            .unwrap();
        diagram
            .add_port("a.out", "a long port label", PortRef::new("a", Side::Right, 0.5))
            .unwrap();
        let config = Config::default();
        let mut engine = LayoutEngine::new(config.clone());
        let frame = engine.cycle(&mut diagram, 0.0).clone();
        assert!(frame.repositioned);

        let view = view_bounds(&diagram, &config.labels, None);
        for label in &frame.labels {
            let r = label.rect;
            assert!(
                r.x >= view.x - 1e-3
                    && r.y >= view.y - 1e-3
                    && r.right() <= view.right() + 1e-3
                    && r.bottom() <= view.bottom() + 1e-3,
                "label {:?} outside view {:?}",
                r,
                view
            );
        }
    }

    #[test]
    fn zero_budget_warm_start_reports_unsettled() {
        let mut diagram = pair();
        let mut engine = LayoutEngine::new(Config::default());
        assert!(!engine.warm_start_and_stop(&mut diagram, 0));
        assert_eq!(engine.state(), RunState::Running);
    }
}
