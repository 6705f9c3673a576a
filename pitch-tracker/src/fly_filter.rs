//! Chip detection and 3D flight reconstruction.
//!
//! A single overhead camera only sees the ground projection of a flying ball,
//! so the 3D trajectory is reconstructed by fitting a parabola to the
//! projections using the known camera position. Shots are detected from a
//! sliding window of ball/dribbler kinematics, flights are refit as frames
//! arrive, and bounces spawn follow-up flight segments.

use nalgebra::{DVector, Dyn, OMatrix, U3, U4, U6, Vector2, Vector3};
use pitch_types::{BallModel, BallState, NANOS_PER_SEC, Nanos};
use tracing::trace;

use crate::camera::CameraInfo;
use crate::debug::DebugLog;
use crate::frame::VisionFrame;
use crate::geom::perpendicular;
use crate::GRAVITY;

const MAX_FRAMES_PER_FLIGHT: usize = 200; // 60 Hz, 3 seconds in the air
const ADDITIONAL_DATA_INSERTION: usize = 1; // extra rows for the position bias
const INITIAL_BIAS_STRENGTH: f64 = 0.1;
/// Upper bound for the bias adaptation loop; hitting it abandons the attempt.
const MAX_BIAS_ITERATIONS: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ShootCommand {
    None = 0,
    Linear = 1,
    Chip = 2,
    Both = 3,
}

impl ShootCommand {
    fn combine(self, other: ShootCommand) -> ShootCommand {
        match (self as u8) | (other as u8) {
            0 => ShootCommand::None,
            1 => ShootCommand::Linear,
            2 => ShootCommand::Chip,
            _ => ShootCommand::Both,
        }
    }
}

#[derive(Debug, Clone)]
struct ChipDetection {
    dribbler_speed: f64,
    abs_speed: f64,
    /// seconds since filter init, receive clock
    time: f64,
    /// seconds since filter init, capture clock
    capture_time: f64,
    ball_pos: Vector2<f64>,
    dribbler_pos: Vector2<f64>,
    robot_pos: Vector2<f64>,
    camera_id: u32,
    shoot_command: ShootCommand,
    robot_id: i32,
}

/// One parabolic arc between bounces.
#[derive(Debug, Clone, Copy)]
pub struct BallFlight {
    pub flight_start_pos: Vector2<f64>,
    pub flight_start_time: f64,
    pub capture_flight_start_time: f64,
    pub ground_speed: Vector2<f64>,
    pub z_speed: f64,
    pub start_frame: usize,
    pub reconstruction_error: f64,
}

impl BallFlight {
    fn flight_duration(&self) -> f64 {
        2.0 * self.z_speed / GRAVITY
    }

    pub fn has_bounced(&self, time: f64) -> bool {
        time - self.flight_start_time > self.flight_duration()
    }

    pub fn touchdown_pos(&self) -> Vector2<f64> {
        self.flight_start_pos + self.ground_speed * self.flight_duration()
    }

    fn after_bounce(&self, new_start_frame: usize, ball_model: &BallModel) -> BallFlight {
        let flight_duration = self.flight_duration();
        BallFlight {
            flight_start_time: self.flight_start_time + flight_duration,
            capture_flight_start_time: self.capture_flight_start_time + flight_duration,
            z_speed: self.z_speed * ball_model.z_damping,
            // only the initial estimate
            ground_speed: self.ground_speed * ball_model.xy_damping,
            flight_start_pos: self.touchdown_pos(),
            start_frame: new_start_frame,
            reconstruction_error: self.reconstruction_error,
        }
    }

    /// A flight pinned to exactly span two observed frames, assuming the
    /// bounce happened at the second one.
    fn between_chip_frames(
        first: &ChipDetection,
        last: &ChipDetection,
        start_frame: usize,
    ) -> BallFlight {
        let flight_time = last.time - first.time;
        BallFlight {
            flight_start_pos: first.ball_pos,
            flight_start_time: first.time,
            capture_flight_start_time: first.capture_time,
            ground_speed: (last.ball_pos - first.ball_pos) / flight_time,
            z_speed: GRAVITY * flight_time / 2.0,
            start_frame,
            reconstruction_error: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Prediction {
    pub pos: Vector3<f64>,
    pub speed: Vector3<f64>,
    pub touchdown_pos: Vector2<f64>,
}

#[derive(Debug, Clone)]
pub struct FlyFilter {
    primary_camera: u32,
    ball_model: BallModel,
    init_time: Nanos,

    shot_detection_window: Vec<ChipDetection>,
    kick_frames: Vec<ChipDetection>,
    flight_reconstructions: Vec<BallFlight>,
    shoot_command: ShootCommand,
    shot_start_frame: usize,
    last_bounce_frame: usize,
    chip_detected: bool,
    dist_to_start_pos: f64,

    pinv_data_inserted: Option<usize>,
    bias_strength: f64,
    d_mat: OMatrix<f64, Dyn, U6>,
    d_vec: DVector<f64>,

    pub(crate) debug: DebugLog,
}

impl FlyFilter {
    pub fn new(frame: &VisionFrame, ball_model: BallModel) -> Self {
        let rows = 2 * (MAX_FRAMES_PER_FLIGHT + ADDITIONAL_DATA_INSERTION);
        let mut filter = Self {
            primary_camera: frame.camera_id,
            ball_model,
            init_time: frame.time,
            shot_detection_window: Vec::new(),
            kick_frames: Vec::new(),
            flight_reconstructions: Vec::new(),
            shoot_command: ShootCommand::None,
            shot_start_frame: 0,
            last_bounce_frame: 0,
            chip_detected: false,
            dist_to_start_pos: 0.0,
            pinv_data_inserted: None,
            bias_strength: INITIAL_BIAS_STRENGTH,
            d_mat: OMatrix::<f64, Dyn, U6>::zeros(rows),
            d_vec: DVector::<f64>::zeros(rows),
            debug: DebugLog::default(),
        };
        filter.reset_flight_reconstruction();
        filter
    }

    pub fn clone_for_camera(&self, primary_camera: u32) -> Self {
        let mut copy = self.clone();
        copy.primary_camera = primary_camera;
        copy.debug = DebugLog::default();
        copy
    }

    pub fn is_active(&self) -> bool {
        !self.flight_reconstructions.is_empty()
    }

    pub fn is_bouncing(&self) -> bool {
        self.flight_reconstructions.len() > 1
    }

    pub fn dist_to_start_pos(&self) -> f64 {
        self.dist_to_start_pos
    }

    fn to_local_time(&self, time: Nanos) -> f64 {
        (time - self.init_time) as f64 / NANOS_PER_SEC
    }

    fn check_is_shot(&self) -> bool {
        if self.shot_detection_window.len() < 4 {
            return false;
        }

        let w = &self.shot_detection_window;
        let b = w.len() - 4;
        let dist = (w[b + 1].ball_pos - w[b + 3].ball_pos).norm();
        let time_diff = w[b + 3].time - w[b + 1].time;
        let abs_speed = dist / time_diff;

        let dribbler_dist0 = (w[b].dribbler_pos - w[b].ball_pos).norm();
        let dribbler_dist1 = (w[b].dribbler_pos - w[b + 1].ball_pos).norm();
        let dribbler_dist2 = (w[b].dribbler_pos - w[b + 2].ball_pos).norm();
        let dribbler_dist3 = (w[b].dribbler_pos - w[b + 3].ball_pos).norm();

        let distance_monotonic_rising = dribbler_dist0 < dribbler_dist1
            && dribbler_dist1 < dribbler_dist2
            && dribbler_dist2 < dribbler_dist3;

        w[b + 1].dribbler_speed > w[b].dribbler_speed
            && w[b + 1].dribbler_speed > 0.1
            && abs_speed > 1.0
            && w[b + 1].abs_speed - w[b].abs_speed > 0.2
            && distance_monotonic_rising
            // moved at least 6 cm
            && dribbler_dist3 - dribbler_dist0 > 0.06
            // initial ball pos close to dribbler
            && dribbler_dist0 < 0.1
    }

    fn num_measurements_with_own_camera(&self) -> usize {
        let Some(last) = self.kick_frames.last() else {
            return 0;
        };
        self.kick_frames
            .iter()
            .filter(|f| f.camera_id == last.camera_id)
            .count()
    }

    fn collision(&self) -> bool {
        if self.kick_frames.len() <= 5 {
            return false;
        }
        let n = self.kick_frames.len();
        let first = &self.kick_frames[n - 3];
        let second = &self.kick_frames[n - 2];
        let third = &self.kick_frames[n - 1];

        let angle = ((first.ball_pos.y - second.ball_pos.y)
            .atan2(first.ball_pos.x - second.ball_pos.x)
            - (third.ball_pos.y - second.ball_pos.y).atan2(third.ball_pos.x - second.ball_pos.x))
        .abs();

        let last = &self.kick_frames[n - 1];
        let robot_dist = (last.ball_pos - last.robot_pos).norm();
        let height = if self.flight_reconstructions.is_empty() {
            0.0
        } else {
            self.predict_trajectory(last.time).pos.z
        };
        let pi = std::f64::consts::PI;
        (angle < 0.86 * pi || angle > 1.14 * pi) && height < 0.15 && robot_dist < 0.18
    }

    /// Full pseudoinverse reconstruction of the flight from the collected
    /// kick frames, with a soft prior pinning the start position.
    fn calc_pinv(&mut self, cameras: &CameraInfo) -> Option<BallFlight> {
        let first_in_the_air = self.kick_frames[self.shot_start_frame].clone();

        let insert_from = match self.pinv_data_inserted {
            None => self.shot_start_frame,
            Some(i) => i + 1,
        };
        for i in insert_from..self.kick_frames.len() {
            let cam = cameras.position(self.kick_frames[i].camera_id)?;
            let t_i = self.kick_frames[i].capture_time - first_in_the_air.capture_time;
            let x = self.kick_frames[i].ball_pos.x;
            let y = self.kick_frames[i].ball_pos.y;
            let alpha = (x - cam.x) / cam.z;
            let beta = (y - cam.y) / cam.z;

            let base_index = (i + ADDITIONAL_DATA_INSERTION) * 2;
            self.d_mat[(base_index, 0)] = alpha;
            self.d_mat[(base_index, 1)] = alpha * t_i;
            self.d_mat[(base_index, 2)] = 1.0;
            self.d_mat[(base_index, 3)] = t_i;
            self.d_mat[(base_index, 4)] = 0.0;
            self.d_mat[(base_index, 5)] = 0.0;
            self.d_vec[base_index] = 0.5 * GRAVITY * alpha * t_i * t_i + x;

            self.d_mat[(base_index + 1, 0)] = beta;
            self.d_mat[(base_index + 1, 1)] = beta * t_i;
            self.d_mat[(base_index + 1, 2)] = 0.0;
            self.d_mat[(base_index + 1, 3)] = 0.0;
            self.d_mat[(base_index + 1, 4)] = 1.0;
            self.d_mat[(base_index + 1, 5)] = t_i;
            self.d_vec[base_index + 1] = 0.5 * GRAVITY * beta * t_i * t_i + y;
            self.pinv_data_inserted = Some(i);
        }

        const MAX_DISTANCE: f64 = 0.03;
        const FACTOR: f64 = 1.2;
        let filled = (self.kick_frames.len() + ADDITIONAL_DATA_INSERTION) * 2;

        let mut pi_vec;
        let mut iterations = 0;
        loop {
            self.d_mat[(0, 2)] = self.bias_strength;
            self.d_vec[0] = first_in_the_air.ball_pos.x * self.bias_strength;
            self.d_mat[(1, 4)] = self.bias_strength;
            self.d_vec[1] = first_in_the_air.ball_pos.y * self.bias_strength;

            let a = self.d_mat.rows(0, filled).into_owned();
            let b = self.d_vec.rows(0, filled).into_owned();
            pi_vec = lstsq::lstsq(&a, &b, f64::EPSILON).ok()?.solution;
            if !pi_vec.iter().all(|v| v.is_finite()) {
                return None;
            }

            let start_pos = Vector2::new(pi_vec[2], pi_vec[4]);
            let start_distance = (start_pos - first_in_the_air.ball_pos).norm();

            if start_distance > MAX_DISTANCE {
                self.bias_strength *= FACTOR;
            } else {
                if self.bias_strength > INITIAL_BIAS_STRENGTH {
                    self.bias_strength /= FACTOR;
                }
                break;
            }
            iterations += 1;
            if iterations >= MAX_BIAS_ITERATIONS {
                return None;
            }
        }

        let pi_error = {
            let a = self.d_mat.rows(0, filled);
            let b = self.d_vec.rows(0, filled);
            (a * pi_vec - b).iter().map(|v| v.abs()).sum::<f64>()
        };

        let z0 = pi_vec[0];
        let vz = pi_vec[1];
        if vz * vz + GRAVITY * z0 * 2.0 < 0.0 {
            return None;
        }

        // time the reconstruction thinks the shot crossed ground level,
        // relative to the detected shot start
        let at_ground_time = (vz - (vz * vz + GRAVITY * z0 * 2.0).sqrt()) / GRAVITY;

        let ground_speed = Vector2::new(pi_vec[3], pi_vec[5]);
        let start_pos = Vector2::new(pi_vec[2], pi_vec[4]);
        let result = BallFlight {
            ground_speed,
            flight_start_pos: start_pos + ground_speed * at_ground_time,
            flight_start_time: first_in_the_air.time + at_ground_time,
            capture_flight_start_time: first_in_the_air.capture_time + at_ground_time,
            z_speed: vz - GRAVITY * at_ground_time,
            start_frame: self.shot_start_frame,
            reconstruction_error: pi_error
                / (self.kick_frames.len() - self.shot_start_frame) as f64,
        };

        self.debug
            .value(self.primary_camera, "pinv_params/vz", result.z_speed);
        self.debug
            .plot("reconstruction error", result.reconstruction_error);

        let dist_start_pos = (result.flight_start_pos - first_in_the_air.ball_pos).norm();
        if self.flight_reconstructions.len() < 2 {
            self.dist_to_start_pos = dist_start_pos; // used for filter choice
        }

        let end_pos = result.flight_start_pos + result.ground_speed;
        self.debug
            .line("computed ground speed", result.flight_start_pos, end_pos);

        Some(result)
    }

    /// Constrained fit with a fixed ground speed direction; solves only for
    /// vertical speed, ground speed magnitude and a small start height.
    fn constrained_reconstruction(
        &self,
        shot_start_pos: Vector2<f64>,
        ground_speed: Vector2<f64>,
        start_time: f64,
        start_frame: usize,
        cameras: &CameraInfo,
    ) -> Option<BallFlight> {
        let ground_dir = ground_speed.normalize();

        let max_entries = 2 * (self.kick_frames.len() - start_frame + 1);
        let mut solver = OMatrix::<f64, Dyn, U3>::zeros(max_entries);
        let mut positions = DVector::<f64>::zeros(max_entries);

        for i in start_frame..self.kick_frames.len() {
            let cam = cameras.position(self.kick_frames[i].camera_id)?;
            let t_i = self.kick_frames[i].time - start_time;
            let x = self.kick_frames[i].ball_pos.x;
            let y = self.kick_frames[i].ball_pos.y;
            let alpha = (cam.x - x) / cam.z;
            let beta = (cam.y - y) / cam.z;

            let base_index = (i - start_frame) * 2;
            solver[(base_index, 0)] = alpha * t_i;
            solver[(base_index, 1)] = -ground_dir.x * t_i;
            solver[(base_index, 2)] = alpha;
            positions[base_index] = 0.5 * GRAVITY * alpha * t_i * t_i + shot_start_pos.x - x;

            solver[(base_index + 1, 0)] = beta * t_i;
            solver[(base_index + 1, 1)] = -ground_dir.y * t_i;
            solver[(base_index + 1, 2)] = beta;
            positions[base_index + 1] = 0.5 * GRAVITY * beta * t_i * t_i + shot_start_pos.y - y;
        }

        let values = lstsq::lstsq(&solver, &positions, f64::EPSILON).ok()?.solution;
        if !values.iter().all(|v| v.is_finite()) {
            return None;
        }

        let error = (solver * values - positions).norm()
            / (self.kick_frames.len() - start_frame) as f64;

        // the z0 component is ignored; it only absorbs noise in the start
        // position
        Some(BallFlight {
            flight_start_pos: shot_start_pos,
            flight_start_time: start_time,
            capture_flight_start_time: start_time,
            ground_speed: ground_dir * values[1],
            z_speed: values[0],
            start_frame,
            reconstruction_error: error,
        })
    }

    fn approx_ground_direction(&self) -> Vector2<f64> {
        self.kick_frames[self.shot_start_frame].dribbler_pos
            - self.kick_frames[self.shot_start_frame].robot_pos
    }

    fn approach_shot_direction_apply(&self, cameras: &CameraInfo) -> Option<BallFlight> {
        let first_in_the_air = &self.kick_frames[self.shot_start_frame];
        let mut reconstruction = self.constrained_reconstruction(
            first_in_the_air.ball_pos,
            self.approx_ground_direction(),
            first_in_the_air.time,
            self.shot_start_frame,
            cameras,
        )?;
        // the actual kick happened slightly before the first frame in the air
        reconstruction.flight_start_time -= 0.01;
        reconstruction.capture_flight_start_time -= 0.01;
        Some(reconstruction)
    }

    /// Residual of the reconstructed flight against the observed ground
    /// projections.
    fn chip_shot_error(&self, pinv_res: &BallFlight, cameras: &CameraInfo) -> f64 {
        let start_frame = self.shot_start_frame + 2;
        let Some(cam) = cameras.position(self.kick_frames[0].camera_id) else {
            return f64::INFINITY;
        };

        let mut error = 0.0;
        for frame in &self.kick_frames[start_frame.min(self.kick_frames.len())..] {
            let t_i = frame.capture_time - pinv_res.capture_flight_start_time;
            let ground_pos = pinv_res.flight_start_pos + pinv_res.ground_speed * t_i;
            let pz = pinv_res.z_speed * t_i - 0.5 * GRAVITY * t_i * t_i;
            let p = Vector3::new(ground_pos.x, ground_pos.y, pz);

            let lambda = -cam.z / (cam.z - p.z);
            let pred_ground = cam + (cam - p) * lambda;

            error += (Vector2::new(pred_ground.x, pred_ground.y) - frame.ball_pos).norm();
        }
        error
    }

    /// Residual of the best purely linear (rolling, possibly decelerating)
    /// shot explanation of the same frames.
    fn linear_shot_error(&self) -> f64 {
        let start_frame = self.shot_start_frame + 2;
        if start_frame >= self.kick_frames.len() {
            return f64::INFINITY;
        }
        let first_in_the_air = &self.kick_frames[start_frame];

        let max_entries = 2 * (self.kick_frames.len() - start_frame + 1);
        let mut solver = OMatrix::<f64, Dyn, U4>::zeros(max_entries);
        let mut positions = DVector::<f64>::zeros(max_entries);

        for i in start_frame..self.kick_frames.len() {
            let t_i = self.kick_frames[i].capture_time - first_in_the_air.capture_time;

            let base_index = (i - start_frame) * 2;
            solver.set_row(base_index, &nalgebra::RowVector4::new(1.0, 0.0, t_i, 0.0));
            positions[base_index] = self.kick_frames[i].ball_pos.x;

            solver.set_row(base_index + 1, &nalgebra::RowVector4::new(0.0, 1.0, 0.0, t_i));
            positions[base_index + 1] = self.kick_frames[i].ball_pos.y;
        }

        let Ok(simple) = lstsq::lstsq(&solver, &positions, f64::EPSILON) else {
            return f64::INFINITY;
        };
        let simple = simple.solution;

        let mut start_pos = Vector2::new(simple[0], simple[1]);
        let mut start_speed = Vector2::new(simple[2], simple[3]);
        let ground_dir = start_speed.normalize();

        for i in start_frame..self.kick_frames.len() {
            let t_i = self.kick_frames[i].capture_time - first_in_the_air.capture_time;

            let base_index = (i - start_frame) * 2;
            solver.set_row(
                base_index,
                &nalgebra::RowVector4::new(
                    1.0,
                    0.0,
                    t_i * ground_dir.x,
                    -0.5 * t_i * t_i * ground_dir.x,
                ),
            );
            positions[base_index] = self.kick_frames[i].ball_pos.x;

            solver.set_row(
                base_index + 1,
                &nalgebra::RowVector4::new(
                    0.0,
                    1.0,
                    t_i * ground_dir.y,
                    -0.5 * t_i * t_i * ground_dir.y,
                ),
            );
            positions[base_index + 1] = self.kick_frames[i].ball_pos.y;
        }

        let Ok(decel) = lstsq::lstsq(&solver, &positions, f64::EPSILON) else {
            return f64::INFINITY;
        };
        let decel = decel.solution;
        if decel[3] >= 0.0 {
            start_pos = Vector2::new(decel[0], decel[1]);
            start_speed = ground_dir * decel[2];
        }
        let acc = ground_dir * decel[3].max(0.0);

        let mut error = 0.0;
        for i in start_frame..self.kick_frames.len() {
            let t_i = self.kick_frames[i].capture_time - first_in_the_air.capture_time;
            let pos = start_pos + start_speed * t_i - 0.5 * t_i * t_i * acc;
            error += (pos - self.kick_frames[i].ball_pos).norm();
        }
        error
    }

    fn approach_pinv_applicable(&self, pinv_res: &BallFlight, cameras: &CameraInfo) -> bool {
        let center = self.kick_frames[0].ball_pos;
        let v_to_proj = inner_angle(
            center,
            self.kick_frames[self.kick_frames.len() - 1].ball_pos,
            center + pinv_res.ground_speed,
        );

        let vz = pinv_res.z_speed;
        let frames = self.kick_frames.len() - self.shot_start_frame;
        let shot_error_factor = if self.flight_reconstructions.is_empty() {
            1.5
        } else {
            1.0
        };
        vz > 1.0
            && vz < 10.0
            && (v_to_proj.is_nan() || v_to_proj < 0.7)
            && ((frames > 5 && self.kick_frames[self.shot_start_frame].abs_speed > 1.0)
                || frames > 10)
            && self.linear_shot_error() > self.chip_shot_error(pinv_res, cameras) * shot_error_factor
    }

    fn approach_shot_direction_applicable(&self, reconstruction: &BallFlight) -> bool {
        // the fitted speed direction must not differ too much from the
        // observed projection
        let center = self.kick_frames[0].ball_pos;
        let ground_speed = self.approx_ground_direction();
        let v_to_proj = inner_angle(
            center,
            self.kick_frames[self.kick_frames.len() - 1].ball_pos,
            center + ground_speed,
        );

        let frames = self.kick_frames.len() - self.shot_start_frame;
        v_to_proj < 0.7
            && frames > 5
            && frames < 15
            && reconstruction.z_speed > 1.0
            && reconstruction.z_speed < 10.0
            && reconstruction.ground_speed.norm() < 10.0
            && max_ball_height(reconstruction.z_speed) > 0.3
    }

    fn parabolic_flight_reconstruct(
        &mut self,
        pinv_res: &BallFlight,
        cameras: &CameraInfo,
    ) -> Option<BallFlight> {
        if self.approach_pinv_applicable(pinv_res, cameras) {
            self.debug
                .text(self.primary_camera, "chip approach", "pinv");
            return Some(*pinv_res);
        }

        if let Some(shot_dir) = self.approach_shot_direction_apply(cameras)
            && self.approach_shot_direction_applicable(&shot_dir)
        {
            self.debug
                .text(self.primary_camera, "chip approach", "shot direction");
            return Some(shot_dir);
        }
        self.debug
            .text(self.primary_camera, "chip approach", "unavailable");
        None
    }

    /// Chips that line up with the camera produce no visible curvature.
    /// Linear shots decelerate quickly from friction while the perceived
    /// ground speed of a flight is constant, so a shallow slope of the
    /// per-frame speeds indicates a flight.
    fn detection_speed(&self) -> bool {
        let Some(last) = self.kick_frames.last() else {
            return false;
        };
        let mut speeds = Vec::with_capacity(self.kick_frames.len().saturating_sub(1));
        for i in 1..self.kick_frames.len() {
            if self.kick_frames[i].camera_id != last.camera_id {
                // bad geometry calibration may fake accelerations
                continue;
            }
            let dist = (self.kick_frames[i].ball_pos - self.kick_frames[i - 1].ball_pos).norm();
            let time_diff =
                self.kick_frames[i].capture_time - self.kick_frames[i - 1].capture_time;
            speeds.push(dist / time_diff);
        }
        if speeds.len() < 2 {
            return false;
        }
        let avg = speeds.iter().sum::<f64>() / speeds.len() as f64;

        let mut x_sum = 0.0;
        let mut val_sum = 0.0;
        let mut x_sum_sq = 0.0;
        let mut val_x_sum = 0.0;
        let mut n = speeds.len() as f64 - 1.0;
        for (i, &speed) in speeds.iter().enumerate().skip(1) {
            if speed > 1.4 * avg {
                n -= 1.0;
                continue;
            }
            let x = i as f64;
            x_sum += x;
            x_sum_sq += x * x;
            val_sum += speed;
            val_x_sum += x * speed;
        }
        let mut slope = (n * val_x_sum - x_sum * val_sum) / (n * x_sum_sq - x_sum * x_sum);
        slope /= val_sum / n;

        slope > 0.005 && speeds.len() > 15 && self.num_measurements_with_own_camera() > 10
    }

    fn detection_pinv(&mut self, pinv_res: &BallFlight) -> bool {
        let vz = pinv_res.z_speed;
        let max_flight_duration = vz / GRAVITY * 2.0;
        let max_height = max_ball_height(vz);
        let last = self.kick_frames.last().expect("kick frames present");
        let time_elapsed = last.time - pinv_res.flight_start_time;

        if self.kick_frames[0].camera_id != last.camera_id {
            self.debug
                .value(self.primary_camera, "pinv detection/cameraChange", 1.0);
            if max_height < 0.5 {
                // camera changes lead to false detections, probably from
                // geometry calibration differences
                return false;
            }
        }

        vz > 1.0
            && vz < 10.0
            && pinv_res.reconstruction_error < 0.003
            && pinv_res.ground_speed.norm() > 1.5
            && time_elapsed < max_flight_duration
            && max_height > 0.3
            && (self.kick_frames.len() - self.shot_start_frame) > 8
    }

    /// Abort shot collection when the shooting robot keeps the ball close,
    /// i.e. dribbles it.
    fn check_is_dribbling(&self) -> bool {
        if self.kick_frames.len() > 10 {
            let current = self.kick_frames.last().expect("kick frames present");
            return (current.ball_pos - current.robot_pos).norm() < 0.12
                && self.kick_frames[0].robot_id == current.robot_id;
        }
        false
    }

    fn detect_chip(&mut self, pinv_res: &BallFlight) -> bool {
        if self.shoot_command == ShootCommand::Chip {
            self.debug
                .text(self.primary_camera, "detection source", "chip");
            return true;
        }
        if self.detection_speed() {
            self.debug
                .text(self.primary_camera, "detection source", "speed");
            return true;
        }
        if self.detection_pinv(pinv_res) {
            self.debug
                .text(self.primary_camera, "detection source", "pinv");
            return true;
        }
        false
    }

    fn create_chip_detection(&self, frame: &VisionFrame) -> ChipDetection {
        let reported_ball_pos = frame.pos;
        let time_since_init = self.to_local_time(frame.time);

        let mut dribbler_speed = 0.0;
        let mut abs_speed = 0.0;
        if let Some(last) = self.shot_detection_window.last() {
            let time_diff = time_since_init - last.time;
            let last_dribbler_dist = (last.dribbler_pos - last.ball_pos).norm();
            let dribbler_dist = (frame.robot.dribbler_pos - reported_ball_pos).norm();
            dribbler_speed = (dribbler_dist - last_dribbler_dist) / time_diff;
            abs_speed = (reported_ball_pos - last.ball_pos).norm() / time_diff;
        }

        let robot = &frame.robot;
        let mut shoot_command = match (robot.linear_command, robot.chip_command) {
            (true, true) => ShootCommand::Both,
            (true, false) => ShootCommand::Linear,
            (false, true) => ShootCommand::Chip,
            (false, false) => ShootCommand::None,
        };
        if robot.kick_power > 0.0 && robot.kick_power < 0.5 {
            // too weak to produce a useful flight, keep the fly filter out
            shoot_command = ShootCommand::Linear;
        }

        ChipDetection {
            dribbler_speed,
            abs_speed,
            time: time_since_init,
            capture_time: self.to_local_time(frame.capture_time),
            ball_pos: reported_ball_pos,
            dribbler_pos: robot.dribbler_pos,
            robot_pos: robot.robot_pos,
            camera_id: frame.camera_id,
            shoot_command,
            robot_id: robot.identifier,
        }
    }

    pub fn process_vision_frame(&mut self, frame: &VisionFrame, cameras: &CameraInfo) {
        let current_detection = self.create_chip_detection(frame);
        self.shot_detection_window.push(current_detection.clone());
        if self.shot_detection_window.len() > 8 {
            self.shot_detection_window.remove(0);
        }

        if self.kick_frames.is_empty() && self.check_is_shot() {
            // both a linear and a chip command may appear inside the window,
            // yielding Both, which the flight tracking mostly treats as None
            for d in &self.shot_detection_window {
                self.shoot_command = self.shoot_command.combine(d.shoot_command);
            }

            let w = self.shot_detection_window.len();
            self.shot_start_frame = if self.shot_detection_window[w - 4].dribbler_speed > 0.1 {
                0
            } else {
                1
            };
            self.last_bounce_frame = self.shot_start_frame;

            self.kick_frames.push(self.shot_detection_window[w - 4].clone());
            self.kick_frames.push(self.shot_detection_window[w - 3].clone());
            self.kick_frames.push(self.shot_detection_window[w - 2].clone());
            // the current detection is appended below with the ongoing shot;
            // the window keeps it to infer the next frame's speed
            self.shot_detection_window.clear();
            self.shot_detection_window.push(current_detection.clone());

            trace!("shot detected");
        }

        if self.check_is_dribbling() {
            self.reset_flight_reconstruction();
            return;
        }

        if !self.kick_frames.is_empty() {
            // chip detection or tracking ongoing
            self.kick_frames.push(current_detection);

            if self.collision() {
                trace!("flight aborted by collision");
                self.reset_flight_reconstruction();
                return;
            }

            if !self.flight_reconstructions.is_empty() {
                self.update_bouncing(frame.time, cameras);
                if self.kick_frames.is_empty() {
                    // reset by update_bouncing
                    return;
                }
            }
            if self.flight_reconstructions.len() < 2 {
                if self.shoot_command == ShootCommand::Linear {
                    self.reset_flight_reconstruction();
                    return; // no detection for linear kicks
                }

                let pinv_res = self.calc_pinv(cameras);
                if let Some(pinv_res) = pinv_res {
                    if !self.chip_detected {
                        self.chip_detected = self.detect_chip(&pinv_res);
                    }
                    if self.chip_detected {
                        match self.parabolic_flight_reconstruct(&pinv_res, cameras) {
                            Some(reconstruction) => {
                                self.flight_reconstructions = vec![reconstruction];
                            }
                            None => self.flight_reconstructions.clear(),
                        }
                    }
                }
            }
        }

        if self.kick_frames.len() > 30 && !self.chip_detected {
            trace!("flight aborted, no detection");
            self.reset_flight_reconstruction();
        }
        if self.kick_frames.len() >= MAX_FRAMES_PER_FLIGHT {
            self.reset_flight_reconstruction();
        }
    }

    /// Curvature-based bounce detector: after a bounce the projections drift
    /// to one side of the shot line only.
    fn detect_bouncing(&mut self) -> Option<usize> {
        self.debug.circle(
            "last bounce",
            self.kick_frames[self.last_bounce_frame].ball_pos,
            0.03,
        );

        let n = self.kick_frames.len();
        if n < 10 || self.kick_frames[n - 1].camera_id != self.kick_frames[n - 7].camera_id {
            return None;
        }

        let check_frame = n - 3;
        let camera_change_after_bounce =
            self.kick_frames[self.last_bounce_frame].camera_id != self.kick_frames[n - 1].camera_id;
        let shot_frame = if camera_change_after_bounce {
            self.shot_start_frame
        } else {
            self.last_bounce_frame
        };
        let shot_pos = self.kick_frames[check_frame].ball_pos;
        let shot_dir = (shot_pos - self.kick_frames[shot_frame].ball_pos).normalize();
        let side_dir = perpendicular(shot_dir);

        let mut left_dist: f64 = 0.0;
        let mut right_dist: f64 = 0.0;
        for i in self.last_bounce_frame + 5..n {
            if self.kick_frames[i].camera_id != self.kick_frames[n - 1].camera_id {
                continue;
            }
            let offset = self.kick_frames[i].ball_pos - shot_pos;
            let side_part = offset.dot(&side_dir);
            // left and right may be swapped here, which does not matter
            left_dist = left_dist.min(side_part);
            right_dist = right_dist.max(side_part);
        }
        let max_dist = left_dist.abs().max(right_dist.abs());
        let min_dist = left_dist.abs().min(right_dist.abs());

        if max_dist > 0.03 && min_dist == 0.0 {
            self.last_bounce_frame = check_frame;
            return Some(check_frame);
        }
        None
    }

    fn update_bouncing(&mut self, time: Nanos, cameras: &CameraInfo) {
        let t = self.to_local_time(time) - self.kick_frames[self.shot_start_frame].time;
        let current = *self
            .flight_reconstructions
            .last()
            .expect("called with at least one flight");
        if t > 0.3 && current.has_bounced(self.to_local_time(time)) {
            let after_bounce =
                current.after_bounce(self.kick_frames.len() - 1, &self.ball_model);
            self.flight_reconstructions.push(after_bounce);

            let last_ball_pos = self.kick_frames[self.kick_frames.len() - 1].ball_pos;
            let dist_to_detection = (after_bounce.flight_start_pos - last_ball_pos).norm();
            if self.flight_reconstructions.len() > 2 && dist_to_detection > 0.3 {
                trace!("flight aborted, bad bounce");
                self.reset_flight_reconstruction();
                return;
            }
        }

        if let Some(bounce_frame) = self.detect_bouncing() {
            while self.flight_reconstructions.len() > 1
                && self
                    .flight_reconstructions
                    .last()
                    .expect("non-empty")
                    .start_frame
                    + 20
                    > bounce_frame
            {
                self.flight_reconstructions.pop();
            }
            let start_frame = self
                .flight_reconstructions
                .last()
                .expect("non-empty")
                .start_frame;
            let fixed_flight = BallFlight::between_chip_frames(
                &self.kick_frames[start_frame],
                &self.kick_frames[bounce_frame],
                start_frame,
            );
            *self.flight_reconstructions.last_mut().expect("non-empty") = fixed_flight;
            self.flight_reconstructions
                .push(fixed_flight.after_bounce(bounce_frame, &self.ball_model));
        }

        let current = *self.flight_reconstructions.last().expect("non-empty");
        let frames_since_bounce = self.kick_frames.len() - 1 - current.start_frame;
        if self.flight_reconstructions.len() > 1 && frames_since_bounce > 0 {
            let shot_dir = current.ground_speed.normalize();
            let side_dir = perpendicular(shot_dir);

            let mut max_shot_line_dist: f64 = 0.0;
            let mut min_shot_line_dist: f64 = 0.0;
            for frame in &self.kick_frames[current.start_frame..] {
                let dist = (frame.ball_pos - current.flight_start_pos).dot(&side_dir);
                max_shot_line_dist = max_shot_line_dist.max(dist.abs());
                min_shot_line_dist = min_shot_line_dist.min(dist.abs());
            }

            if max_shot_line_dist - min_shot_line_dist > 0.05 && frames_since_bounce > 4 {
                // sufficiently curved, refit with constrained least squares
                let reconstruction = self.constrained_reconstruction(
                    current.flight_start_pos,
                    current.ground_speed,
                    current.flight_start_time,
                    current.start_frame,
                    cameras,
                );
                let previous =
                    self.flight_reconstructions[self.flight_reconstructions.len() - 2];
                if let Some(reconstruction) = reconstruction
                    && reconstruction.ground_speed.norm() < previous.ground_speed.norm()
                    && reconstruction.z_speed > 0.0
                    && reconstruction.z_speed < previous.z_speed
                {
                    *self.flight_reconstructions.last_mut().expect("non-empty") = reconstruction;
                }
            } else {
                let start_detection = &self.kick_frames[current.start_frame];
                let last_detection = &self.kick_frames[self.kick_frames.len() - 1];
                let init_dist =
                    (start_detection.ball_pos - current.flight_start_pos).dot(&shot_dir);
                let projected_distance =
                    (last_detection.ball_pos - current.flight_start_pos).dot(&shot_dir) - init_dist;
                let speed_length = projected_distance
                    / (last_detection.capture_time - start_detection.capture_time);

                self.flight_reconstructions
                    .last_mut()
                    .expect("non-empty")
                    .ground_speed = shot_dir * speed_length;
            }
        }

        if t > 0.5
            && self
                .flight_reconstructions
                .last()
                .expect("non-empty")
                .z_speed
                < 0.5
        {
            trace!("flight aborted, bounce too flat");
            self.reset_flight_reconstruction();
        }
    }

    pub(crate) fn predict_trajectory(&self, time: f64) -> Prediction {
        let mut flight = *self
            .flight_reconstructions
            .last()
            .expect("prediction requires an active flight");
        if flight.has_bounced(time) {
            flight = flight.after_bounce(self.kick_frames.len() - 1, &self.ball_model);
        }

        let relative_time = time - flight.flight_start_time;
        let ground_pos = flight.flight_start_pos + flight.ground_speed * relative_time;
        let z_speed = flight.z_speed - GRAVITY * relative_time;
        let z_pos = relative_time * flight.z_speed - 0.5 * GRAVITY * relative_time * relative_time;
        Prediction {
            pos: Vector3::new(ground_pos.x, ground_pos.y, z_pos),
            speed: Vector3::new(flight.ground_speed.x, flight.ground_speed.y, z_speed),
            touchdown_pos: flight.touchdown_pos(),
        }
    }

    /// While a flight is active, only accept detections close to the
    /// predicted ground shadow; otherwise abstain so the ground filter
    /// decides.
    pub fn choose_detection(&self, frames: &[VisionFrame], cameras: &CameraInfo) -> Option<usize> {
        const ACCEPT_DIST: f64 = 0.35;

        if self.flight_reconstructions.is_empty() {
            return None;
        }
        // all frames share the same time and camera
        let pred = self.predict_trajectory(self.to_local_time(frames.first()?.time));
        let cam = cameras.position(frames[0].camera_id)?;
        let lambda = -cam.z / (cam.z - pred.pos.z);
        let pred_ground = cam + (cam - pred.pos) * lambda;

        let mut best_detection = None;
        let mut best_distance = ACCEPT_DIST;
        for (i, frame) in frames.iter().enumerate() {
            let ball = Vector3::new(frame.pos.x, frame.pos.y, 0.0);
            let dist = (ball - pred_ground).norm();
            if dist < best_distance {
                best_detection = Some(i);
                best_distance = dist;
            }
        }
        best_detection
    }

    pub fn write_ball_state(&self, ball: &mut BallState, prediction_time: Nanos) {
        let p = self.predict_trajectory(self.to_local_time(prediction_time));
        ball.pos = p.pos;
        ball.vel = p.speed;
        ball.is_bouncing = self.flight_reconstructions.len() > 1;
        ball.touchdown = Some(p.touchdown_pos);
    }

    pub fn reset_flight_reconstruction(&mut self) {
        self.chip_detected = false;
        self.flight_reconstructions.clear();
        self.kick_frames.clear();
        self.shoot_command = ShootCommand::None;
        self.pinv_data_inserted = None;
        self.bias_strength = INITIAL_BIAS_STRENGTH;
        let rows = 2 * (MAX_FRAMES_PER_FLIGHT + ADDITIONAL_DATA_INSERTION);
        self.d_mat = OMatrix::<f64, Dyn, U6>::zeros(rows);
        self.d_vec = DVector::<f64>::zeros(rows);
    }
}

fn max_ball_height(vz: f64) -> f64 {
    let max_flight_duration_half = vz / GRAVITY;
    vz * max_flight_duration_half - (GRAVITY * 0.5) * max_flight_duration_half * max_flight_duration_half
}

/// Angle at `center` between the rays to `a` and `b`, in [0, pi].
fn inner_angle(center: Vector2<f64>, a: Vector2<f64>, b: Vector2<f64>) -> f64 {
    let d1 = a - center;
    let d2 = b - center;
    (d1.dot(&d2) / (d1.norm() * d2.norm())).acos()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::RobotInfo;
    use approx::assert_relative_eq;
    use pitch_types::CameraGeometry;

    const DT: f64 = 1.0 / 60.0;

    fn cameras_at(positions: &[(u32, Vector3<f64>)]) -> CameraInfo {
        let mut info = CameraInfo::default();
        for (id, pos) in positions {
            // CameraInfo converts vision axes, invert that here
            info.update(
                &CameraGeometry {
                    camera_id: *id,
                    derived_camera_world_tx: pos.y * 1000.0,
                    derived_camera_world_ty: -pos.x * 1000.0,
                    derived_camera_world_tz: pos.z * 1000.0,
                    focal_length: 580.0,
                },
                "test",
            );
        }
        info
    }

    /// Ground projection of a flying ball as one camera would report it.
    fn project(ball: Vector3<f64>, cam: Vector3<f64>) -> Vector2<f64> {
        let t = cam.z / (cam.z - ball.z);
        let g = cam + (ball - cam) * t;
        Vector2::new(g.x, g.y)
    }

    fn chip_detection_at(
        ball_pos: Vector2<f64>,
        time: f64,
        camera_id: u32,
        robot: &RobotInfo,
    ) -> ChipDetection {
        ChipDetection {
            dribbler_speed: 1.0,
            abs_speed: 2.0,
            time,
            capture_time: time,
            ball_pos,
            dribbler_pos: robot.dribbler_pos,
            robot_pos: robot.robot_pos,
            camera_id,
            shoot_command: ShootCommand::None,
            robot_id: robot.identifier,
        }
    }

    fn filter_with_kick_frames(
        flight: &BallFlight,
        n_frames: usize,
        cameras: &CameraInfo,
        camera_ids: &[u32],
    ) -> FlyFilter {
        let robot = RobotInfo {
            identifier: 0,
            robot_pos: flight.flight_start_pos - Vector2::new(0.08, 0.0),
            dribbler_pos: flight.flight_start_pos,
            ..RobotInfo::default()
        };
        let frame0 = VisionFrame {
            camera_id: camera_ids[0],
            ball_area: 0,
            pos: flight.flight_start_pos,
            time: 0,
            capture_time: 0,
            robot: robot.clone(),
            vision_processing_time: 0,
        };
        let mut filter = FlyFilter::new(&frame0, BallModel::default());
        filter.shot_start_frame = 0;
        for i in 0..n_frames {
            let t = i as f64 * DT;
            let rel = t - flight.flight_start_time;
            let ball = Vector3::new(
                flight.flight_start_pos.x + flight.ground_speed.x * rel,
                flight.flight_start_pos.y + flight.ground_speed.y * rel,
                flight.z_speed * rel - 0.5 * GRAVITY * rel * rel,
            );
            let camera_id = camera_ids[i % camera_ids.len()];
            let cam = cameras.position(camera_id).unwrap();
            let observed = project(ball, cam);
            filter
                .kick_frames
                .push(chip_detection_at(observed, t, camera_id, &robot));
        }
        filter
    }

    fn ideal_flight(
        start: Vector2<f64>,
        ground_speed: Vector2<f64>,
        z_speed: f64,
    ) -> BallFlight {
        BallFlight {
            flight_start_pos: start,
            flight_start_time: 0.0,
            capture_flight_start_time: 0.0,
            ground_speed,
            z_speed,
            start_frame: 0,
            reconstruction_error: 0.0,
        }
    }

    #[test]
    fn pinv_reconstructs_ideal_chip() {
        // four cameras, the shot crosses between their fields of view
        let cameras = cameras_at(&[
            (0, Vector3::new(-2.0, -1.5, 4.0)),
            (1, Vector3::new(2.0, -1.5, 4.0)),
            (2, Vector3::new(-2.0, 1.5, 4.0)),
            (3, Vector3::new(2.0, 1.5, 4.0)),
        ]);
        let truth = ideal_flight(Vector2::new(0.1, -0.2), Vector2::new(2.0, 0.5), 3.0);
        let mut filter = filter_with_kick_frames(&truth, 10, &cameras, &[0, 1, 2, 3]);

        let res = filter.calc_pinv(&cameras).expect("reconstruction");
        assert_relative_eq!(res.flight_start_pos.x, 0.1, epsilon = 0.1 * 0.05);
        assert_relative_eq!(res.flight_start_pos.y, -0.2, epsilon = 0.2 * 0.05);
        assert_relative_eq!(res.ground_speed.x, 2.0, epsilon = 2.0 * 0.05);
        assert_relative_eq!(res.ground_speed.y, 0.5, epsilon = 0.5 * 0.05);
        assert_relative_eq!(res.z_speed, 3.0, epsilon = 3.0 * 0.05);
        assert!(res.reconstruction_error < 1e-3);

        // touchdown within 10 cm
        let expected_touchdown =
            truth.flight_start_pos + truth.ground_speed * (2.0 * 3.0 / GRAVITY);
        assert!((res.touchdown_pos() - expected_touchdown).norm() < 0.1);
    }

    #[test]
    fn pinv_detection_accepts_real_chip() {
        let cameras = cameras_at(&[(0, Vector3::new(-2.0, 0.0, 4.0))]);
        let truth = ideal_flight(Vector2::zeros(), Vector2::new(2.0, 0.0), 3.0);
        let mut filter = filter_with_kick_frames(&truth, 12, &cameras, &[0]);

        let res = filter.calc_pinv(&cameras).expect("reconstruction");
        assert!(filter.detection_pinv(&res));
    }

    #[test]
    fn rolling_ball_is_not_detected_as_chip() {
        let cameras = cameras_at(&[(0, Vector3::new(0.0, 0.0, 4.0))]);
        // flat trajectory: the projections show no parabola at all
        let truth = ideal_flight(Vector2::zeros(), Vector2::new(2.0, 0.0), 0.0);
        let mut filter = filter_with_kick_frames(&truth, 12, &cameras, &[0]);

        match filter.calc_pinv(&cameras) {
            Some(res) => assert!(!filter.detection_pinv(&res)),
            None => {} // rejection is fine too
        }
    }

    #[test]
    fn bounce_keeps_position_and_damps_speeds() {
        let flight = ideal_flight(Vector2::new(0.0, 0.0), Vector2::new(5.0, 0.0), 4.0);
        let model = BallModel::default();
        let bounced = flight.after_bounce(10, &model);

        let duration = 2.0 * 4.0 / GRAVITY; // ~0.815 s
        assert_relative_eq!(bounced.flight_start_time, duration, epsilon = 1e-9);
        assert_relative_eq!(bounced.flight_start_pos.x, 5.0 * duration, epsilon = 1e-9);
        assert_relative_eq!(bounced.z_speed, 0.55 * 4.0, epsilon = 1e-9);
        assert_relative_eq!(bounced.ground_speed.x, 0.7 * 5.0, epsilon = 1e-9);
        assert_relative_eq!(bounced.ground_speed.y, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn expected_bounce_of_scenario_flight() {
        // vz = 4 m/s, vg = (5, 0): first bounce at t ~ 0.815 s, x ~ 4.08 m
        let flight = ideal_flight(Vector2::zeros(), Vector2::new(5.0, 0.0), 4.0);
        assert!(!flight.has_bounced(0.8));
        assert!(flight.has_bounced(0.82));
        let touchdown = flight.touchdown_pos();
        assert_relative_eq!(touchdown.x, 4.08, epsilon = 0.01);
    }

    #[test]
    fn choose_detection_accepts_near_shadow_only() {
        let cameras = cameras_at(&[(0, Vector3::new(0.0, 0.0, 4.0))]);
        let truth = ideal_flight(Vector2::zeros(), Vector2::new(2.0, 0.0), 3.0);
        let mut filter = filter_with_kick_frames(&truth, 10, &cameras, &[0]);
        filter.flight_reconstructions.push(truth);

        let t = 10.0 * DT;
        let ball = Vector3::new(
            truth.ground_speed.x * t,
            0.0,
            truth.z_speed * t - 0.5 * GRAVITY * t * t,
        );
        let shadow = project(ball, cameras.position(0).unwrap());
        let robot = RobotInfo::default();
        let near = VisionFrame {
            camera_id: 0,
            ball_area: 0,
            pos: shadow + Vector2::new(0.05, 0.0),
            time: (t * NANOS_PER_SEC) as Nanos,
            capture_time: (t * NANOS_PER_SEC) as Nanos,
            robot: robot.clone(),
            vision_processing_time: 0,
        };
        let far = VisionFrame {
            camera_id: 0,
            ball_area: 0,
            pos: shadow + Vector2::new(1.0, 0.0),
            time: (t * NANOS_PER_SEC) as Nanos,
            capture_time: (t * NANOS_PER_SEC) as Nanos,
            robot,
            vision_processing_time: 0,
        };
        assert_eq!(filter.choose_detection(&[far.clone(), near], &cameras), Some(1));
        assert_eq!(filter.choose_detection(&[far], &cameras), None);
    }

    #[test]
    fn inner_angle_basics() {
        let c = Vector2::zeros();
        assert_relative_eq!(
            inner_angle(c, Vector2::new(1.0, 0.0), Vector2::new(0.0, 1.0)),
            std::f64::consts::FRAC_PI_2,
            epsilon = 1e-9
        );
        assert_relative_eq!(
            inner_angle(c, Vector2::new(1.0, 0.0), Vector2::new(2.0, 0.0)),
            0.0,
            epsilon = 1e-6
        );
    }
}
