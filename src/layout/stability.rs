use serde::Serialize;
use tracing::{debug, info};

use crate::config::StabilityConfig;
use crate::ir::Diagram;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    Running,
    AutoStopped,
}

/// Watches node centers at whole-pixel resolution and stops the
/// simulation once they hold still for enough consecutive cycles.
#[derive(Debug, Clone)]
pub struct StabilityController {
    stop_after: usize,
    state: RunState,
    stable_cycles: usize,
    snapshot: Option<Vec<(String, i64, i64)>>,
}

impl StabilityController {
    pub fn new(config: &StabilityConfig) -> Self {
        Self {
            stop_after: config.stable_cycles_to_stop.max(1),
            state: RunState::Running,
            stable_cycles: 0,
            snapshot: None,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == RunState::Running
    }

    pub fn stable_cycles(&self) -> usize {
        self.stable_cycles
    }

    pub fn set_config(&mut self, config: &StabilityConfig) {
        self.stop_after = config.stable_cycles_to_stop.max(1);
    }

    /// Records the diagram after a cycle. Cycles under an active drag never
    /// count as stable. Stopping is one-way until a drag, settings change, or
    /// diagram replacement restarts it.
    pub fn observe(&mut self, diagram: &Diagram, dragging: bool) -> RunState {
        if self.state == RunState::AutoStopped {
            return self.state;
        }
        let snapshot = pixel_snapshot(diagram);
        if !dragging && self.snapshot.as_ref() == Some(&snapshot) {
            self.stable_cycles += 1;
        } else {
            self.stable_cycles = 0;
        }
        self.snapshot = Some(snapshot);
        if self.stable_cycles >= self.stop_after {
            self.state = RunState::AutoStopped;
            info!(
                stable_cycles = self.stable_cycles,
                "layout settled, stopping simulation"
            );
        }
        self.state
    }

    /// Stops immediately. A no-op when already stopped.
    pub fn stop(&mut self) {
        if self.state == RunState::Running {
            self.state = RunState::AutoStopped;
            debug!("simulation stopped");
        }
    }

    /// Back to running with a fresh stable-cycle count.
    pub fn force_running(&mut self) {
        if self.state == RunState::AutoStopped {
            debug!("restarting simulation");
        }
        self.state = RunState::Running;
        self.stable_cycles = 0;
        self.snapshot = None;
    }

    pub fn on_drag_start(&mut self) {
        self.force_running();
    }

    pub fn on_settings_changed(&mut self) {
        self.force_running();
    }

    pub fn on_diagram_replaced(&mut self) {
        self.force_running();
    }
}

fn pixel_snapshot(diagram: &Diagram) -> Vec<(String, i64, i64)> {
    diagram
        .nodes()
        .iter()
        .map(|node| {
            (
                node.id().to_string(),
                node.position.0.round() as i64,
                node.position.1.round() as i64,
            )
        })
        .collect()
}

/// Turns wall-clock time between frames into simulation sub-steps.
#[derive(Debug, Clone)]
pub struct LiveClock {
    time_multiplier: f32,
    max_wall_delta: f32,
    max_substep: f32,
    max_substeps: usize,
}

impl LiveClock {
    pub fn new(config: &StabilityConfig) -> Self {
        Self {
            time_multiplier: config.time_multiplier.max(0.0),
            max_wall_delta: config.max_wall_delta.max(0.0),
            max_substep: config.max_substep.max(f32::EPSILON),
            max_substeps: config.max_substeps_per_tick.max(1),
        }
    }

    /// Simulated time for a wall-clock delta: capped, then scaled.
    pub fn simulated(&self, wall_dt: f32) -> f32 {
        if !wall_dt.is_finite() || wall_dt <= 0.0 {
            return 0.0;
        }
        wall_dt.min(self.max_wall_delta) * self.time_multiplier
    }

    /// Number of sub-steps and their length for one tick of wall time.
    pub fn substeps(&self, wall_dt: f32) -> (usize, f32) {
        self.split(self.simulated(wall_dt))
    }

    /// Splits simulated time into sub-steps. Time beyond the sub-step cap is
    /// dropped rather than taken in oversized steps.
    pub fn split(&self, sim_dt: f32) -> (usize, f32) {
        if !(sim_dt > 0.0 && sim_dt.is_finite()) {
            return (0, 0.0);
        }
        let needed = (sim_dt / self.max_substep).ceil() as usize;
        let count = needed.clamp(1, self.max_substeps);
        (count, (sim_dt / count as f32).min(self.max_substep))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Node;

    fn diagram_at(x: f32) -> Diagram {
        let mut diagram = Diagram::new();
        diagram
            .add_node(Node::new("a", "", (x, 0.0), 10.0, 10.0))
            .unwrap();
        diagram
    }

    fn quick_config() -> StabilityConfig {
        StabilityConfig {
            stable_cycles_to_stop: 3,
            ..StabilityConfig::default()
        }
    }

    #[test]
    fn stops_after_enough_still_cycles() {
        let mut controller = StabilityController::new(&quick_config());
        let diagram = diagram_at(10.0);
        // The first observation only seeds the snapshot.
        for _ in 0..3 {
            assert_eq!(controller.observe(&diagram, false), RunState::Running);
        }
        assert_eq!(controller.observe(&diagram, false), RunState::AutoStopped);
    }

    #[test]
    fn sub_pixel_motion_counts_as_still() {
        let mut controller = StabilityController::new(&quick_config());
        for x in [10.0, 10.1, 10.2, 10.3] {
            controller.observe(&diagram_at(x), false);
        }
        assert!(!controller.is_running());
    }

    #[test]
    fn movement_resets_the_count() {
        let mut controller = StabilityController::new(&quick_config());
        controller.observe(&diagram_at(10.0), false);
        controller.observe(&diagram_at(10.0), false);
        assert_eq!(controller.stable_cycles(), 1);
        controller.observe(&diagram_at(12.0), false);
        assert_eq!(controller.stable_cycles(), 0);
    }

    #[test]
    fn dragging_never_counts_as_still() {
        let mut controller = StabilityController::new(&quick_config());
        let diagram = diagram_at(10.0);
        for _ in 0..10 {
            assert_eq!(controller.observe(&diagram, true), RunState::Running);
        }
        assert_eq!(controller.stable_cycles(), 0);
    }

    #[test]
    fn stopping_is_idempotent_and_restartable() {
        let mut controller = StabilityController::new(&quick_config());
        let diagram = diagram_at(0.0);
        for _ in 0..4 {
            controller.observe(&diagram, false);
        }
        let stopped_at = controller.stable_cycles();
        assert_eq!(controller.observe(&diagram_at(50.0), false), RunState::AutoStopped);
        assert_eq!(controller.stable_cycles(), stopped_at);

        controller.on_drag_start();
        assert!(controller.is_running());
        assert_eq!(controller.stable_cycles(), 0);
    }

    #[test]
    fn clock_caps_and_splits_wall_time() {
        let clock = LiveClock::new(&StabilityConfig::default());
        let (count, dt) = clock.substeps(0.04);
        assert_eq!(count, 3);
        assert!((dt * count as f32 - 0.04).abs() < 1e-6);

        // A long stall is capped at max_wall_delta.
        let (count, dt) = clock.substeps(5.0);
        assert!((6..=7).contains(&count));
        assert!((dt * count as f32 - 0.1).abs() < 1e-5);

        assert_eq!(clock.substeps(0.0), (0, 0.0));
        assert_eq!(clock.substeps(f32::NAN), (0, 0.0));
    }

    #[test]
    fn time_multiplier_scales_simulated_time() {
        let config = StabilityConfig {
            time_multiplier: 4.0,
            ..StabilityConfig::default()
        };
        let clock = LiveClock::new(&config);
        assert!((clock.simulated(0.02) - 0.08).abs() < 1e-6);
        let (count, dt) = clock.substeps(0.1);
        assert_eq!(count, 8);
        assert!(dt <= config.max_substep + 1e-6);
    }
}
