use serde::{Deserialize, Serialize};
use std::path::Path;

/// How arcs pull on their endpoint nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ArcForceModel {
    /// Springs along `[from port, internal points…, to port]`; only the two
    /// end springs reach the nodes.
    #[default]
    PointChain,
    /// Legacy direct port-to-port spring with a rest length.
    RestLength,
}

/// Physics parameters. Units are pixels and seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutSettings {
    pub node_mass: f32,
    pub softening: f32,
    pub background_gravity: f32,
    pub edge_rest_length: f32,
    /// Rest length 0 for every arc spring.
    pub minimize_arc_length: bool,
    pub arc_attraction_k: f32,
    pub arc_point_move_factor: f32,
    pub arc_point_repulsion_k: f32,
    pub arc_point_merge_distance: f32,
    pub arc_point_constraint_iterations: usize,
    pub arc_point_extra_clearance: f32,
    pub max_arc_internal_points: usize,
    pub min_node_spacing: f32,
    pub use_hard_min_spacing: bool,
    pub hard_min_spacing_iterations: usize,
    pub hard_min_spacing_slop: f32,
    pub overlap_repulsion_k: f32,
    /// Overlap repulsion multiplier when the hard spacing solver is off.
    pub soft_overlap_boost: f32,
    pub drag: f32,
    pub max_speed: f32,
    pub arc_force_model: ArcForceModel,
    /// Skip arc attraction on nodes that already sit at minimum spacing.
    pub suppress_arc_attraction_at_min_spacing: bool,
    pub max_waypoint_insertions_per_step: usize,
}

impl Default for LayoutSettings {
    fn default() -> Self {
        Self {
            node_mass: 1.0,
            softening: 80.0,
            background_gravity: 1_500_000.0,
            edge_rest_length: 120.0,
            minimize_arc_length: true,
            arc_attraction_k: 0.8,
            arc_point_move_factor: 6.0,
            arc_point_repulsion_k: 8.0,
            arc_point_merge_distance: 8.0,
            arc_point_constraint_iterations: 4,
            arc_point_extra_clearance: 6.0,
            max_arc_internal_points: 6,
            min_node_spacing: 40.0,
            use_hard_min_spacing: true,
            hard_min_spacing_iterations: 8,
            hard_min_spacing_slop: 0.5,
            overlap_repulsion_k: 2.0,
            soft_overlap_boost: 4.0,
            drag: 3.0,
            max_speed: 600.0,
            arc_force_model: ArcForceModel::PointChain,
            suppress_arc_attraction_at_min_spacing: false,
            max_waypoint_insertions_per_step: 8,
        }
    }
}

impl LayoutSettings {
    /// Pulls out-of-range values back into something the solvers can run
    /// with instead of rejecting the settings.
    pub fn validate_and_clamp(&mut self) {
        fn non_negative(v: &mut f32) {
            if !v.is_finite() || *v < 0.0 {
                *v = 0.0;
            }
        }
        if !self.node_mass.is_finite() || self.node_mass <= 1e-3 {
            self.node_mass = 1e-3;
        }
        if !self.softening.is_finite() || self.softening < 1.0 {
            self.softening = 1.0;
        }
        for v in [
            &mut self.background_gravity,
            &mut self.edge_rest_length,
            &mut self.arc_attraction_k,
            &mut self.arc_point_move_factor,
            &mut self.arc_point_repulsion_k,
            &mut self.arc_point_merge_distance,
            &mut self.arc_point_extra_clearance,
            &mut self.min_node_spacing,
            &mut self.hard_min_spacing_slop,
            &mut self.overlap_repulsion_k,
            &mut self.soft_overlap_boost,
            &mut self.drag,
        ] {
            non_negative(v);
        }
        if !self.max_speed.is_finite() || self.max_speed <= 0.0 {
            self.max_speed = 1.0;
        }
        self.arc_point_constraint_iterations = self.arc_point_constraint_iterations.max(1);
        self.hard_min_spacing_iterations = self.hard_min_spacing_iterations.max(1);
        self.max_arc_internal_points = self.max_arc_internal_points.max(1);
    }

    pub(crate) fn overlap_boost(&self) -> f32 {
        if self.use_hard_min_spacing {
            1.0
        } else {
            self.soft_overlap_boost
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Lower bound for how far a route runs straight out of its port.
    pub min_exit_distance: f32,
    pub lane_spacing: f32,
    /// Node bounds are inflated by this much before crossing tests.
    pub node_clearance: f32,
    pub label_clearance: f32,
    pub node_crossing_penalty: f32,
    pub label_crossing_penalty: f32,
    pub length_weight: f32,
    pub bend_weight: f32,
    pub collinear_overlap_penalty: f32,
    pub collinear_clearance: f32,
    pub max_lane_shift_steps: usize,
    /// Score margin the alternative bend order must win by to replace the
    /// previous cycle's choice.
    pub choice_hysteresis: f32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            min_exit_distance: 12.0,
            lane_spacing: 10.0,
            node_clearance: 4.0,
            label_clearance: 2.0,
            node_crossing_penalty: 10_000.0,
            label_crossing_penalty: 400.0,
            length_weight: 1.0,
            bend_weight: 25.0,
            collinear_overlap_penalty: 300.0,
            collinear_clearance: 4.0,
            max_lane_shift_steps: 3,
            choice_hysteresis: 15.0,
        }
    }
}

/// Where a port label sits along the side it is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PortLabelAlign {
    /// Label edge flush with the port: above side ports, to the right of
    /// top/bottom ports.
    #[default]
    Flush,
    Centered,
    /// Label edge flush with the port, body on the opposite side.
    Opposite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelConfig {
    pub font_size: f32,
    pub line_height: f32,
    pub padding_x: f32,
    pub padding_y: f32,
    pub port_label_offset: f32,
    /// Vertical alignment of labels on Left/Right ports.
    pub side_port_align: PortLabelAlign,
    /// Horizontal alignment of labels on Top/Bottom ports.
    pub end_port_align: PortLabelAlign,
    pub arc_label_offset: f32,
    pub iterations: usize,
    pub port_stiffness: f32,
    pub arc_stiffness: f32,
    pub port_max_drift: f32,
    pub arc_max_drift: f32,
    pub fallback_drift_multiplier: f32,
    pub port_mobility: f32,
    pub arc_mobility: f32,
    pub label_clearance: f32,
    pub node_clearance: f32,
    pub arc_clearance: f32,
    pub view_margin: f32,
    pub reposition: RepositionConfig,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            font_size: 12.0,
            line_height: 1.3,
            padding_x: 3.0,
            padding_y: 2.0,
            port_label_offset: 6.0,
            side_port_align: PortLabelAlign::Flush,
            end_port_align: PortLabelAlign::Flush,
            arc_label_offset: 4.0,
            iterations: 24,
            port_stiffness: 0.6,
            arc_stiffness: 0.25,
            port_max_drift: 6.0,
            arc_max_drift: 48.0,
            fallback_drift_multiplier: 3.0,
            port_mobility: 0.1,
            arc_mobility: 1.0,
            label_clearance: 2.0,
            node_clearance: 2.0,
            arc_clearance: 2.0,
            view_margin: 80.0,
            reposition: RepositionConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositionConfig {
    pub enabled: bool,
    pub node_margin: f32,
    pub iterations: usize,
    pub damping: f32,
    pub max_step: f32,
    /// Overlaps at or below this depth are left alone.
    pub hysteresis: f32,
}

impl Default for RepositionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            node_margin: 4.0,
            iterations: 12,
            damping: 0.6,
            max_step: 24.0,
            hysteresis: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StabilityConfig {
    /// Consecutive pixel-stable cycles before auto-stop.
    pub stable_cycles_to_stop: usize,
    pub time_multiplier: f32,
    /// Wall-clock deltas above this are treated as this (seconds).
    pub max_wall_delta: f32,
    pub max_substep: f32,
    pub max_substeps_per_tick: usize,
    pub warm_start_max_ticks: usize,
    /// Simulated time per warm-start tick.
    pub warm_start_dt: f32,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            stable_cycles_to_stop: 20,
            time_multiplier: 1.0,
            max_wall_delta: 0.1,
            max_substep: 1.0 / 60.0,
            max_substeps_per_tick: 8,
            warm_start_max_ticks: 2000,
            warm_start_dt: 1.0 / 30.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub settings: LayoutSettings,
    pub router: RouterConfig,
    pub labels: LabelConfig,
    pub stability: StabilityConfig,
}

impl Config {
    pub fn from_json_str(contents: &str) -> anyhow::Result<Self> {
        let parsed: ConfigFile = serde_json::from_str(contents)?;
        let mut config = Config::default();
        parsed.apply(&mut config);
        config.settings.validate_and_clamp();
        Ok(config)
    }
}

macro_rules! override_fields {
    ($target:expr, $source:expr, [$($field:ident),* $(,)?]) => {
        $(
            if let Some(v) = $source.$field {
                $target.$field = v;
            }
        )*
    };
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct LayoutSettingsFile {
    node_mass: Option<f32>,
    softening: Option<f32>,
    background_gravity: Option<f32>,
    edge_rest_length: Option<f32>,
    minimize_arc_length: Option<bool>,
    arc_attraction_k: Option<f32>,
    arc_point_move_factor: Option<f32>,
    arc_point_repulsion_k: Option<f32>,
    arc_point_merge_distance: Option<f32>,
    arc_point_constraint_iterations: Option<usize>,
    arc_point_extra_clearance: Option<f32>,
    max_arc_internal_points: Option<usize>,
    min_node_spacing: Option<f32>,
    use_hard_min_spacing: Option<bool>,
    hard_min_spacing_iterations: Option<usize>,
    hard_min_spacing_slop: Option<f32>,
    overlap_repulsion_k: Option<f32>,
    soft_overlap_boost: Option<f32>,
    drag: Option<f32>,
    max_speed: Option<f32>,
    arc_force_model: Option<ArcForceModel>,
    suppress_arc_attraction_at_min_spacing: Option<bool>,
    max_waypoint_insertions_per_step: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RouterConfigFile {
    min_exit_distance: Option<f32>,
    lane_spacing: Option<f32>,
    node_clearance: Option<f32>,
    label_clearance: Option<f32>,
    node_crossing_penalty: Option<f32>,
    label_crossing_penalty: Option<f32>,
    length_weight: Option<f32>,
    bend_weight: Option<f32>,
    collinear_overlap_penalty: Option<f32>,
    collinear_clearance: Option<f32>,
    max_lane_shift_steps: Option<usize>,
    choice_hysteresis: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RepositionConfigFile {
    enabled: Option<bool>,
    node_margin: Option<f32>,
    iterations: Option<usize>,
    damping: Option<f32>,
    max_step: Option<f32>,
    hysteresis: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct LabelConfigFile {
    font_size: Option<f32>,
    line_height: Option<f32>,
    padding_x: Option<f32>,
    padding_y: Option<f32>,
    port_label_offset: Option<f32>,
    side_port_align: Option<PortLabelAlign>,
    end_port_align: Option<PortLabelAlign>,
    arc_label_offset: Option<f32>,
    iterations: Option<usize>,
    port_stiffness: Option<f32>,
    arc_stiffness: Option<f32>,
    port_max_drift: Option<f32>,
    arc_max_drift: Option<f32>,
    fallback_drift_multiplier: Option<f32>,
    port_mobility: Option<f32>,
    arc_mobility: Option<f32>,
    label_clearance: Option<f32>,
    node_clearance: Option<f32>,
    arc_clearance: Option<f32>,
    view_margin: Option<f32>,
    reposition: Option<RepositionConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct StabilityConfigFile {
    stable_cycles_to_stop: Option<usize>,
    time_multiplier: Option<f32>,
    max_wall_delta: Option<f32>,
    max_substep: Option<f32>,
    max_substeps_per_tick: Option<usize>,
    warm_start_max_ticks: Option<usize>,
    warm_start_dt: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    settings: Option<LayoutSettingsFile>,
    router: Option<RouterConfigFile>,
    labels: Option<LabelConfigFile>,
    stability: Option<StabilityConfigFile>,
}

impl ConfigFile {
    fn apply(self, config: &mut Config) {
        if let Some(settings) = self.settings {
            override_fields!(
                config.settings,
                settings,
                [
                    node_mass,
                    softening,
                    background_gravity,
                    edge_rest_length,
                    minimize_arc_length,
                    arc_attraction_k,
                    arc_point_move_factor,
                    arc_point_repulsion_k,
                    arc_point_merge_distance,
                    arc_point_constraint_iterations,
                    arc_point_extra_clearance,
                    max_arc_internal_points,
                    min_node_spacing,
                    use_hard_min_spacing,
                    hard_min_spacing_iterations,
                    hard_min_spacing_slop,
                    overlap_repulsion_k,
                    soft_overlap_boost,
                    drag,
                    max_speed,
                    arc_force_model,
                    suppress_arc_attraction_at_min_spacing,
                    max_waypoint_insertions_per_step,
                ]
            );
        }

        if let Some(router) = self.router {
            override_fields!(
                config.router,
                router,
                [
                    min_exit_distance,
                    lane_spacing,
                    node_clearance,
                    label_clearance,
                    node_crossing_penalty,
                    label_crossing_penalty,
                    length_weight,
                    bend_weight,
                    collinear_overlap_penalty,
                    collinear_clearance,
                    max_lane_shift_steps,
                    choice_hysteresis,
                ]
            );
        }

        if let Some(mut labels) = self.labels {
            if let Some(reposition) = labels.reposition.take() {
                override_fields!(
                    config.labels.reposition,
                    reposition,
                    [enabled, node_margin, iterations, damping, max_step, hysteresis]
                );
            }
            override_fields!(
                config.labels,
                labels,
                [
                    font_size,
                    line_height,
                    padding_x,
                    padding_y,
                    port_label_offset,
                    side_port_align,
                    end_port_align,
                    arc_label_offset,
                    iterations,
                    port_stiffness,
                    arc_stiffness,
                    port_max_drift,
                    arc_max_drift,
                    fallback_drift_multiplier,
                    port_mobility,
                    arc_mobility,
                    label_clearance,
                    node_clearance,
                    arc_clearance,
                    view_margin,
                ]
            );
        }

        if let Some(stability) = self.stability {
            override_fields!(
                config.stability,
                stability,
                [
                    stable_cycles_to_stop,
                    time_multiplier,
                    max_wall_delta,
                    max_substep,
                    max_substeps_per_tick,
                    warm_start_max_ticks,
                    warm_start_dt,
                ]
            );
        }
    }
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let Some(path) = path else {
        return Ok(Config::default());
    };
    let contents = std::fs::read_to_string(path)?;
    Config::from_json_str(&contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_path_yields_defaults() {
        let config = load_config(None).unwrap();
        assert_eq!(config.settings.min_node_spacing, 40.0);
        assert!(config.settings.use_hard_min_spacing);
    }

    #[test]
    fn partial_file_overrides_only_given_fields() {
        let config = Config::from_json_str(
            r#"{
                "settings": { "minNodeSpacing": 64, "arcForceModel": "restLength" },
                "labels": { "sidePortAlign": "centered", "reposition": { "enabled": false } }
            }"#,
        )
        .unwrap();
        assert_eq!(config.settings.min_node_spacing, 64.0);
        assert_eq!(config.settings.arc_force_model, ArcForceModel::RestLength);
        assert_eq!(config.settings.drag, LayoutSettings::default().drag);
        assert_eq!(config.labels.side_port_align, PortLabelAlign::Centered);
        assert!(!config.labels.reposition.enabled);
        assert_eq!(config.labels.reposition.iterations, 12);
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(Config::from_json_str("{ settings: ").is_err());
    }

    #[test]
    fn clamp_repairs_invalid_values() {
        let mut settings = LayoutSettings {
            node_mass: 0.0,
            min_node_spacing: -5.0,
            hard_min_spacing_iterations: 0,
            max_speed: f32::NAN,
            ..LayoutSettings::default()
        };
        settings.validate_and_clamp();
        assert!(settings.node_mass > 0.0);
        assert_eq!(settings.min_node_spacing, 0.0);
        assert_eq!(settings.hard_min_spacing_iterations, 1);
        assert_eq!(settings.max_speed, 1.0);
    }

    #[test]
    fn soft_mode_uses_boost() {
        let settings = LayoutSettings {
            use_hard_min_spacing: false,
            ..LayoutSettings::default()
        };
        assert_eq!(settings.overlap_boost(), settings.soft_overlap_boost);
    }
}
