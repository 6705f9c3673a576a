//! Multi-camera ball and robot tracking core.
//!
//! The core is a single-threaded pipeline driven by a monotonic clock
//! supplied by the host: vision detection frames and actuator commands are
//! queued from the outside, [`Tracker::process`] runs one tick to completion,
//! and [`Tracker::world_state`] reads out the filtered state for a requested
//! prediction time. No I/O happens inside; parsing, transport and persistence
//! belong to the host.

mod error;
pub use error::{Error, Result};

mod camera;
pub use camera::CameraInfo;

mod debug;

pub mod geom;

mod frame;
pub use frame::{RobotInfo, VisionFrame};

mod ground_filter;
pub use ground_filter::GroundFilter;

mod fly_filter;
pub use fly_filter::{BallFlight, FlyFilter};

mod collision_filter;
pub use collision_filter::CollisionFilter;

mod ball_tracker;
pub use ball_tracker::BallTracker;

mod robot_filter;
pub use robot_filter::{RobotFilter, RobotVisionFrame};

mod tracker;
pub use tracker::{Tracker, TrackerMode};

/// Standard gravity used by the flight model [m/s^2].
pub(crate) const GRAVITY: f64 = 9.81;
