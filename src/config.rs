//! Planner configuration, loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file at all) yields the stock
//! gantry setup:
//!
//! ```toml
//! position_tolerance = 0.01
//! pregrasp_distance = 0.05
//! arm_group = "main_arm"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TampError};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Translation error (m) above which an object is re-planned.
    pub position_tolerance: f64,
    /// Orientation error (rad) above which an object is re-planned.
    pub orientation_tolerance: f64,
    /// Standoff used for both the approach and the retreat of a grasp.
    pub pregrasp_distance: f64,
    /// Per-waypoint delay (s) while a visual session plays back a trajectory.
    pub playback_dt: f64,
    /// How many grasps are sampled per object before giving up.
    pub max_grasp_attempts: usize,
    /// Closed finger width is the lower gripper limit scaled by `1 + margin`.
    pub gripper_close_margin: f64,
    pub arm_group: String,
    pub gripper_group: String,
    /// Arm home configuration used by the demo perception.
    pub default_joint_positions: Vec<f64>,
    /// Name given to the composite command dispatched at the end of a run.
    pub plan_name: String,
    /// Offset of the pre-grasp pose along the gripper approach axis.
    pub approach_offset: f64,
    /// Full extents of the support table.
    pub table_extents: [f64; 3],
    /// Table center; the default puts its top surface at z = 0.
    pub table_position: [f64; 3],
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            position_tolerance: 1e-2,
            orientation_tolerance: 1e-2,
            pregrasp_distance: 0.05,
            playback_dt: 0.01,
            max_grasp_attempts: 1,
            gripper_close_margin: 5e-2,
            arm_group: "main_arm".to_string(),
            gripper_group: "main_gripper".to_string(),
            default_joint_positions: vec![0.45, 0.0, 0.3, 0.0],
            plan_name: "rearrangement_plan".to_string(),
            approach_offset: 0.0,
            table_extents: [0.5, 1.0, 0.03],
            table_position: [0.45, 0.0, -0.015],
        }
    }
}

impl PlannerConfig {
    /// Whether a `(position, orientation)` error pair is outside tolerance.
    pub fn exceeds_tolerance(&self, error: (f64, f64)) -> bool {
        error.0 > self.position_tolerance || error.1 > self.orientation_tolerance
    }
}

/// Loads the planner configuration; `None` means built-in defaults.
pub fn load_config(path: Option<&Path>) -> Result<PlannerConfig> {
    let Some(path) = path else {
        return Ok(PlannerConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .map_err(|e| TampError::Config(format!("{}: {e}", path.display())))?;
    toml::from_str(&raw).map_err(|e| TampError::Config(format!("{}: {e}", path.display())))
}
