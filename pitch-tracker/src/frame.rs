use nalgebra::Vector2;
use pitch_types::{BallDetection, Nanos, field_pos_from_vision};

/// Snapshot of one tracked robot, borrowed by the ball subsystems for a tick.
///
/// `robot_pos`/`dribbler_pos` are the prediction for the current output time;
/// the `past_*` fields are the state at the latest fused vision frame, which
/// is the right reference when relating the robot to raw ball detections.
#[derive(Debug, Clone)]
pub struct RobotInfo {
    pub identifier: i32,
    pub robot_pos: Vector2<f64>,
    pub dribbler_pos: Vector2<f64>,
    pub past_robot_pos: Vector2<f64>,
    pub past_dribbler_pos: Vector2<f64>,
    pub speed: Vector2<f64>,
    pub angular_velocity: f64,
    pub chip_command: bool,
    pub linear_command: bool,
    pub dribbler_active: bool,
    pub kick_power: f64,
}

impl Default for RobotInfo {
    fn default() -> Self {
        Self {
            identifier: -1,
            robot_pos: Vector2::zeros(),
            dribbler_pos: Vector2::zeros(),
            past_robot_pos: Vector2::zeros(),
            past_dribbler_pos: Vector2::zeros(),
            speed: Vector2::zeros(),
            angular_velocity: 0.0,
            chip_command: false,
            linear_command: false,
            dribbler_active: false,
            kick_power: 0.0,
        }
    }
}

impl RobotInfo {
    /// The same robot with its past pose promoted to the current one.
    pub fn at_past_pose(&self) -> Self {
        let mut r = self.clone();
        r.robot_pos = self.past_robot_pos;
        r.dribbler_pos = self.past_dribbler_pos;
        r
    }
}

/// One ball detection, normalized to meters and the tracker's axes, together
/// with the nearest robot at that moment.
#[derive(Debug, Clone)]
pub struct VisionFrame {
    pub camera_id: u32,
    pub ball_area: u32,
    pub pos: Vector2<f64>,
    pub time: Nanos,
    pub capture_time: Nanos,
    pub robot: RobotInfo,
    pub vision_processing_time: Nanos,
}

impl VisionFrame {
    pub fn new(
        ball: &BallDetection,
        time: Nanos,
        camera_id: u32,
        robot: RobotInfo,
        vision_processing_time: Nanos,
        capture_time: Nanos,
    ) -> Self {
        Self {
            camera_id,
            ball_area: ball.area,
            pos: field_pos_from_vision(ball.x, ball.y),
            time,
            capture_time,
            robot,
            vision_processing_time,
        }
    }
}
