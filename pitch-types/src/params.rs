use serde::{Deserialize, Serialize};

use crate::Nanos;

/// Ball motion model parameters shared by all ball filters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BallModel {
    /// vertical speed retained after a bounce
    #[serde(default = "default_z_damping")]
    pub z_damping: f64,
    /// ground speed retained after a bounce
    #[serde(default = "default_xy_damping")]
    pub xy_damping: f64,
    /// rolling friction deceleration \[m/s^2\]
    #[serde(default = "default_slow_deceleration")]
    pub slow_deceleration: f64,
}

fn default_z_damping() -> f64 {
    0.55
}

fn default_xy_damping() -> f64 {
    0.7
}

fn default_slow_deceleration() -> f64 {
    0.4
}

impl Default for BallModel {
    fn default() -> Self {
        Self {
            z_damping: default_z_damping(),
            xy_damping: default_xy_damping(),
            slow_deceleration: default_slow_deceleration(),
        }
    }
}

/// Static configuration supplied at tracker construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default)]
    pub ball_model: BallModel,
    /// robot hull radius \[m\]
    #[serde(default = "default_robot_radius")]
    pub robot_radius: f64,
    /// ball radius \[m\]
    #[serde(default = "default_ball_radius")]
    pub ball_radius: f64,
    /// half-width of the dribbler contact plate \[m\]
    #[serde(default = "default_dribbler_width")]
    pub dribbler_width: f64,
    /// robot cylinder height for shadow computations \[m\]
    #[serde(default = "default_robot_height")]
    pub robot_height: f64,
    /// acceleration clamp for command integration \[m/s^2\]
    #[serde(default = "default_max_linear_accel")]
    pub max_linear_accel: f64,
    /// angular acceleration clamp for command integration \[rad/s^2\]
    #[serde(default = "default_max_rotation_accel")]
    pub max_rotation_accel: f64,
    /// primary camera switches after this long without data from it
    #[serde(default = "default_primary_timeout_ns")]
    pub primary_timeout_ns: Nanos,
    /// constant transmission delay subtracted from receive timestamps
    #[serde(default = "default_system_delay_ns")]
    pub system_delay_ns: Nanos,
}

fn default_robot_radius() -> f64 {
    0.09
}

fn default_ball_radius() -> f64 {
    0.0215
}

fn default_dribbler_width() -> f64 {
    0.07
}

fn default_robot_height() -> f64 {
    0.15
}

fn default_max_linear_accel() -> f64 {
    10.0
}

fn default_max_rotation_accel() -> f64 {
    60.0
}

fn default_primary_timeout_ns() -> Nanos {
    42_000_000
}

fn default_system_delay_ns() -> Nanos {
    30_000_000
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            ball_model: BallModel::default(),
            robot_radius: default_robot_radius(),
            ball_radius: default_ball_radius(),
            dribbler_width: default_dribbler_width(),
            robot_height: default_robot_height(),
            max_linear_accel: default_max_linear_accel(),
            max_rotation_accel: default_max_rotation_accel(),
            primary_timeout_ns: default_primary_timeout_ns(),
            system_delay_ns: default_system_delay_ns(),
        }
    }
}
