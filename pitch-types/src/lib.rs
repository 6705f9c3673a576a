use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};

mod field_transform;
pub use field_transform::FieldTransform;

mod params;
pub use params::{BallModel, TrackerConfig};

/// Nanoseconds on the host monotonic clock.
pub type Nanos = i64;

pub const NANOS_PER_SEC: f64 = 1e9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TeamColor {
    Yellow,
    Blue,
}

/// Robot identity, unique across both teams.
///
/// The numeric identifier keeps yellow ids in 0..100 and blue ids offset by
/// 100, so it can be used as a plain map key or compared across teams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RobotId {
    pub team: TeamColor,
    pub number: u8,
}

impl RobotId {
    pub fn new(team: TeamColor, number: u8) -> Self {
        Self { team, number }
    }

    pub fn identifier(&self) -> i32 {
        match self.team {
            TeamColor::Yellow => i32::from(self.number),
            TeamColor::Blue => i32::from(self.number) + 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KickStyle {
    Linear,
    Chip,
}

/// A radio command as sent to one robot, body-frame velocities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadioCommand {
    pub id: RobotId,
    /// sideways body-frame velocity \[m/s\]
    pub v_s: f64,
    /// forward body-frame velocity \[m/s\]
    pub v_f: f64,
    /// angular velocity \[rad/s\]
    pub omega: f64,
    pub kick_style: Option<KickStyle>,
    /// kick power in \[0, 1\]
    pub kick_power: f64,
    /// dribbler setting, > 0 means spinning
    pub dribbler: f64,
}

impl RadioCommand {
    /// A command that requests no motion and no kick.
    pub fn halt(id: RobotId) -> Self {
        Self {
            id,
            v_s: 0.0,
            v_f: 0.0,
            omega: 0.0,
            kick_style: None,
            kick_power: 0.0,
            dribbler: 0.0,
        }
    }

    pub fn dribbler_active(&self) -> bool {
        self.dribbler > 0.0
    }
}

/// One raw ball detection as reported by the vision protocol, millimeters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BallDetection {
    pub x: f64,
    pub y: f64,
    pub area: u32,
}

/// One raw robot detection as reported by the vision protocol, millimeters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotDetection {
    pub robot_id: Option<u8>,
    pub x: f64,
    pub y: f64,
    pub orientation: f64,
}

/// A full detection frame from one camera.
///
/// `t_capture` and `t_sent` are in seconds on the vision computer's clock;
/// positions are raw vision millimeters. Conversion to the tracker's
/// coordinate convention happens at ingress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionFrame {
    pub camera_id: u32,
    pub t_capture: f64,
    pub t_sent: f64,
    pub balls: Vec<BallDetection>,
    pub robots_yellow: Vec<RobotDetection>,
    pub robots_blue: Vec<RobotDetection>,
}

impl DetectionFrame {
    /// Vision processing latency in nanoseconds.
    pub fn vision_processing_time(&self) -> Nanos {
        ((self.t_sent - self.t_capture) * NANOS_PER_SEC) as Nanos
    }
}

/// Per-camera calibration as delivered by geometry packets, millimeters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraGeometry {
    pub camera_id: u32,
    pub derived_camera_world_tx: f64,
    pub derived_camera_world_ty: f64,
    pub derived_camera_world_tz: f64,
    pub focal_length: f64,
}

/// Vision ingress packet: either calibration or a detection frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VisionPacket {
    Geometry(Vec<CameraGeometry>),
    Detection(DetectionFrame),
}

/// Convert a raw vision position (mm, vision axes) to field meters.
///
/// The vision protocol reports with swapped axes relative to the tracker's
/// convention.
pub fn field_pos_from_vision(x_mm: f64, y_mm: f64) -> Vector2<f64> {
    Vector2::new(-y_mm / 1000.0, x_mm / 1000.0)
}

/// Convert a raw vision orientation to the tracker's convention.
pub fn field_angle_from_vision(orientation: f64) -> f64 {
    orientation + std::f64::consts::FRAC_PI_2
}

/// Area of interest in world meters; detections outside are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AreaOfInterest {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl AreaOfInterest {
    pub fn contains(&self, pos: Vector2<f64>) -> bool {
        pos.x > self.x1 && pos.x < self.x2 && pos.y > self.y1 && pos.y < self.y2
    }
}

/// Runtime control for the tracker, every field optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackingCommand {
    pub aoi_enabled: Option<bool>,
    pub aoi: Option<AreaOfInterest>,
    /// constant transmission delay subtracted from receive timestamps \[ns\]
    pub system_delay: Option<Nanos>,
    /// row-major 2x2 matrix plus translation: \[a11, a12, a21, a22, offset_x, offset_y\]
    pub field_transform: Option<[f64; 6]>,
    pub enable_virtual_field: Option<bool>,
    /// drop all filters and all queued frames older than the command timestamp
    pub reset: bool,
}

/// Raw ball detection echoed with the world state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawBallMeasurement {
    pub time: Nanos,
    pub pos: Vector2<f64>,
    pub camera_id: u32,
    pub area: u32,
    pub vision_processing_time: Nanos,
}

/// Raw robot detection echoed with the world state.
///
/// Velocity fields are only present when a previous raw measurement from the
/// same camera within 0.2 s allows a finite-difference estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRobotMeasurement {
    pub time: Nanos,
    pub pos: Vector2<f64>,
    pub phi: f64,
    pub camera_id: u32,
    pub vision_processing_time: Nanos,
    pub velocity: Option<Vector2<f64>>,
    pub omega: Option<f64>,
    pub time_diff_scaled: Option<f64>,
    pub system_delay: Option<f64>,
}

/// Filtered ball state at the requested prediction time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BallState {
    pub pos: Vector3<f64>,
    pub vel: Vector3<f64>,
    pub is_bouncing: bool,
    /// predicted touchdown point while flying
    pub touchdown: Option<Vector2<f64>>,
    pub raw: Vec<RawBallMeasurement>,
}

impl BallState {
    pub fn at_rest(pos: Vector2<f64>) -> Self {
        Self {
            pos: Vector3::new(pos.x, pos.y, 0.0),
            vel: Vector3::zeros(),
            is_bouncing: false,
            touchdown: None,
            raw: Vec::new(),
        }
    }
}

/// Filtered robot state at the requested prediction time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotState {
    pub id: RobotId,
    pub pos: Vector2<f64>,
    pub phi: f64,
    pub vel: Vector2<f64>,
    pub omega: f64,
    pub raw: Vec<RawRobotMeasurement>,
}

/// Debug primitives emitted by the tracking core, world coordinates.
///
/// Emitting these is behaviorally neutral; hosts may ignore them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DebugShape {
    Circle {
        name: String,
        center: Vector2<f64>,
        radius: f64,
    },
    Line {
        name: String,
        from: Vector2<f64>,
        to: Vector2<f64>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DebugValue {
    Float(f64),
    Text(String),
}

/// Key/value pairs, plot samples and shapes from one tick, keyed by camera id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackingDebug {
    pub values: Vec<(String, DebugValue)>,
    pub plots: Vec<(String, f64)>,
    pub shapes: Vec<DebugShape>,
}

/// The filtered world state for one requested prediction time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldFrame {
    pub time: Nanos,
    pub has_vision_data: bool,
    pub system_delay: Nanos,
    pub ball: Option<BallState>,
    pub yellow: Vec<RobotState>,
    pub blue: Vec<RobotState>,
    pub aoi: Option<AreaOfInterest>,
    /// human-readable warnings accumulated since the last read
    pub warnings: Vec<String>,
    pub debug: TrackingDebug,
}
