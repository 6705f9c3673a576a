use std::collections::{BTreeMap, VecDeque};
use std::f64::consts::{FRAC_PI_2, PI};

use nalgebra::{SVector, Vector2};
use pitch_kalman::KalmanFilter;
use pitch_types::{
    FieldTransform, Nanos, RadioCommand, RawRobotMeasurement, RobotId, RobotState, TrackerConfig,
};

use crate::frame::RobotInfo;

type Kalman = KalmanFilter<6, 3>;

const PROCESSOR_TICK_DURATION: Nanos = 10_000_000;
const OMEGA_MAX: f64 = 10.0 * 2.0 * PI;
const DRIBBLER_DIST: f64 = 0.08;

/// One converted robot detection queued for fusion.
#[derive(Debug, Clone)]
pub struct RobotVisionFrame {
    pub camera_id: u32,
    pub pos: Vector2<f64>,
    pub phi: f64,
    pub time: Nanos,
    pub vision_processing_time: Nanos,
    pub switch_camera: bool,
}

/// Wrap an angle to (-pi, pi].
pub(crate) fn limit_angle(mut angle: f64) -> f64 {
    while angle > PI {
        angle -= 2.0 * PI;
    }
    while angle < -PI {
        angle += 2.0 * PI;
    }
    angle
}

/// Tracks one robot as seen from one primary camera.
///
/// Keeps two Kalman states: `kalman` holds the estimate at the latest fused
/// vision frame, `future_kalman` is rebased on it and predicted ahead to the
/// requested output time, integrating radio commands that postdate the last
/// vision frame.
#[derive(Debug, Clone)]
pub struct RobotFilter {
    id: RobotId,
    last_time: Nanos,
    last_primary_time: Nanos,
    primary_camera: Option<u32>,
    frame_counter: i32,

    kalman: Kalman,
    future_kalman: Kalman,
    future_time: Nanos,
    vision_frames: VecDeque<RobotVisionFrame>,
    radio_commands: VecDeque<(RadioCommand, Nanos)>,
    last_radio_command: (RadioCommand, Nanos),
    future_radio_command: (RadioCommand, Nanos),
    measurements: Vec<RawRobotMeasurement>,
    last_raw: BTreeMap<u32, RawRobotMeasurement>,
}

impl RobotFilter {
    pub fn new(id: RobotId, pos: Vector2<f64>, phi: f64, last_time: Nanos) -> Self {
        let mut x = SVector::<f64, 6>::zeros();
        x[0] = pos.x;
        x[1] = pos.y;
        x[2] = phi;

        let mut kalman = Kalman::new(x);
        // only the pose is observable
        kalman.h[(0, 0)] = 1.0;
        kalman.h[(1, 1)] = 1.0;
        kalman.h[(2, 2)] = 1.0;

        let mut filter = Self {
            id,
            last_time,
            last_primary_time: 0,
            primary_camera: None,
            frame_counter: 0,
            future_kalman: kalman.clone(),
            kalman,
            future_time: 0,
            vision_frames: VecDeque::new(),
            radio_commands: VecDeque::new(),
            last_radio_command: (RadioCommand::halt(id), 0),
            future_radio_command: (RadioCommand::halt(id), 0),
            measurements: Vec::new(),
            last_raw: BTreeMap::new(),
        };
        filter.reset_future_kalman();
        filter
    }

    pub fn id(&self) -> RobotId {
        self.id
    }

    pub fn last_update(&self) -> Nanos {
        self.last_time
    }

    pub fn last_primary_time(&self) -> Nanos {
        self.last_primary_time
    }

    pub fn primary_camera(&self) -> Option<u32> {
        self.primary_camera
    }

    pub fn frame_counter(&self) -> i32 {
        self.frame_counter
    }

    fn reset_future_kalman(&mut self) {
        self.future_kalman = self.kalman.clone();
        self.future_time = self.last_time;

        self.future_kalman.h = nalgebra::SMatrix::zeros();
        self.future_kalman.h[(0, 3)] = 1.0;
        self.future_kalman.h[(1, 4)] = 1.0;
        self.future_kalman.h[(2, 5)] = 1.0;
    }

    /// Advance the filter to the best possible prediction for `time`.
    ///
    /// Vision frames are applied permanently, so their timestamps must
    /// increase monotonically. Radio commands newer than the newest vision
    /// frame only shape the future prediction.
    pub fn update(&mut self, time: Nanos, config: &TrackerConfig) {
        let mut is_vision_updated = false;
        while let Some(frame) = self.vision_frames.front().cloned() {
            if frame.time > time {
                break;
            }

            // only apply radio commands that have reached the robot yet
            while let Some(command_time) = self.radio_commands.front().map(|(_, t)| *t) {
                if command_time > frame.time {
                    break;
                }
                let acting = self.last_radio_command.clone();
                self.predict(command_time, false, true, false, &acting, config);
                self.last_radio_command = self.radio_commands.pop_front().expect("peeked above");
            }

            self.predict(
                frame.time,
                false,
                true,
                frame.switch_camera,
                &self.last_radio_command.clone(),
                config,
            );
            self.apply_vision_frame(&frame);

            is_vision_updated = true;
            self.vision_frames.pop_front();
        }
        if is_vision_updated || time < self.future_time {
            // rebase the prediction on the latest vision frame
            self.reset_future_kalman();
            self.future_radio_command = self.last_radio_command.clone();
        }

        let pending: Vec<(RadioCommand, Nanos)> = self.radio_commands.iter().cloned().collect();
        for command in pending {
            if command.1 > time {
                break;
            }
            // only radio commands not used yet
            if command.1 > self.future_time {
                let acting = self.future_radio_command.clone();
                self.predict(command.1, true, true, false, &acting, config);
                self.future_radio_command = command;
            }
        }

        // predict to the requested timestep
        self.predict(
            time,
            true,
            false,
            false,
            &self.future_radio_command.clone(),
            config,
        );
    }

    fn predict(
        &mut self,
        time: Nanos,
        update_future: bool,
        permanent_update: bool,
        camera_switched: bool,
        cmd: &(RadioCommand, Nanos),
        config: &TrackerConfig,
    ) {
        let last_time = if update_future {
            self.future_time
        } else {
            self.last_time
        };
        let kalman = if update_future {
            &mut self.future_kalman
        } else {
            &mut self.kalman
        };
        debug_assert!(time >= last_time);
        let time_diff = ((time - last_time).max(0)) as f64 * 1e-9;

        // local and global coordinate systems are rotated by 90 degrees
        let phi = kalman.base_state()[2] - FRAC_PI_2;
        let v_x = kalman.base_state()[3];
        let v_y = kalman.base_state()[4];
        let omega = kalman.base_state()[5];

        // update position with the current speed
        kalman.f[(0, 3)] = time_diff;
        kalman.f[(1, 4)] = time_diff;
        kalman.f[(2, 5)] = time_diff;

        kalman.u = SVector::zeros();
        if time < cmd.1 + 2 * PROCESSOR_TICK_DURATION {
            // radio commands are intended to be applied over one tick
            let cmd_interval = (PROCESSOR_TICK_DURATION as f64 * 1e-9).max(time_diff);
            let cmd_omega = cmd.0.omega;
            let cmd_v_s = cmd.0.v_s;
            let cmd_v_f = cmd.0.v_f;

            // predict phi to execution end time
            let cmd_phi = phi + (omega + cmd_omega) / 2.0 * cmd_interval;
            let cmd_v_x = cmd_phi.cos() * cmd_v_s - cmd_phi.sin() * cmd_v_f;
            let cmd_v_y = cmd_phi.sin() * cmd_v_s + cmd_phi.cos() * cmd_v_f;

            let accel_x = (cmd_v_x - v_x) / cmd_interval;
            let accel_y = (cmd_v_y - v_y) / cmd_interval;
            let accel_omega = (cmd_omega - omega) / cmd_interval;

            let bounded_a_x = accel_x.clamp(-config.max_linear_accel, config.max_linear_accel);
            let bounded_a_y = accel_y.clamp(-config.max_linear_accel, config.max_linear_accel);
            let bounded_a_omega =
                accel_omega.clamp(-config.max_rotation_accel, config.max_rotation_accel);

            kalman.u[3] = bounded_a_x * time_diff;
            kalman.u[4] = bounded_a_y * time_diff;
            kalman.u[5] = bounded_a_omega * time_diff;
        }

        // prevent rotation speed windup
        if omega > OMEGA_MAX {
            kalman.u[5] = kalman.u[5].min(OMEGA_MAX - omega);
        } else if omega < -OMEGA_MAX {
            kalman.u[5] = kalman.u[5].max(-OMEGA_MAX + omega);
        }

        kalman.b = kalman.f;

        // process noise: acceleration stddev, guessed from plausible average
        // accelerations
        let sigma_a_x = 4.0;
        let sigma_a_y = 4.0;
        let sigma_a_phi = 10.0;

        // d = timediff
        // G = (d^2/2, d^2/2, d^2/2, d, d, d)
        // Q = GG^T (with the per-axis sigmas folded into G)
        let mut g = SVector::<f64, 6>::from([
            time_diff * time_diff / 2.0 * sigma_a_x,
            time_diff * time_diff / 2.0 * sigma_a_y,
            time_diff * time_diff / 2.0 * sigma_a_phi,
            time_diff * sigma_a_x,
            time_diff * sigma_a_y,
            time_diff * sigma_a_phi,
        ]);

        if camera_switched {
            // handle small errors in camera alignment
            g[0] += 0.02;
            g[1] += 0.02;
            g[2] += 0.05;
        }

        for (pos, vel) in [(0, 3), (1, 4), (2, 5)] {
            kalman.q[(pos, pos)] = g[pos] * g[pos];
            kalman.q[(pos, vel)] = g[pos] * g[vel];
            kalman.q[(vel, pos)] = g[vel] * g[pos];
            kalman.q[(vel, vel)] = g[vel] * g[vel];
        }

        kalman.predict(permanent_update);
        if permanent_update {
            if update_future {
                self.future_time = time;
            } else {
                self.last_time = time;
            }
        }
    }

    fn apply_vision_frame(&mut self, frame: &RobotVisionFrame) {
        if frame.switch_camera || self.primary_camera.is_none() {
            self.primary_camera = Some(frame.camera_id);
        }
        if self.primary_camera == Some(frame.camera_id) {
            self.last_primary_time = frame.time;
        }

        let p_rot = self.kalman.state()[2];
        let p_rot_limited = limit_angle(p_rot);
        if p_rot != p_rot_limited {
            // prevent rotation windup
            self.kalman.modify_state(2, p_rot_limited);
        }
        let rot = frame.phi;
        // prevent discontinuities
        let diff = limit_angle(rot - p_rot_limited);

        // staged for the raw echo
        self.measurements.push(RawRobotMeasurement {
            time: frame.time,
            pos: frame.pos,
            phi: p_rot_limited + diff,
            camera_id: frame.camera_id,
            vision_processing_time: frame.vision_processing_time,
            velocity: None,
            omega: None,
            time_diff_scaled: None,
            system_delay: None,
        });

        self.kalman.z[0] = frame.pos.x;
        self.kalman.z[1] = frame.pos.y;
        self.kalman.z[2] = p_rot_limited + diff;

        let (dev_pos, dev_phi) = if self.primary_camera == Some(frame.camera_id) {
            // a good calibration should work with 0.002/0.006, but moving
            // robots need a safety margin to smooth out vibrations
            (0.004, 0.01)
        } else {
            // non-primary data must not corrupt the result
            (0.02, 0.03)
        };
        self.kalman.r = nalgebra::SMatrix::zeros();
        self.kalman.r[(0, 0)] = dev_pos * dev_pos;
        self.kalman.r[(1, 1)] = dev_pos * dev_pos;
        self.kalman.r[(2, 2)] = dev_phi * dev_phi;
        self.kalman.update();
    }

    pub fn get(&mut self, transform: &FieldTransform, no_raw_data: bool) -> RobotState {
        let state = self.future_kalman.state();
        let pos = transform.apply_pos(Vector2::new(state[0], state[1]));
        let phi = limit_angle(transform.apply_angle(state[2]));
        let vel = transform.apply_speed(Vector2::new(state[3], state[4]));
        let omega = state[5];

        let mut robot_state = RobotState {
            id: self.id,
            pos,
            phi,
            vel,
            omega,
            raw: Vec::new(),
        };

        if no_raw_data {
            return robot_state;
        }

        for m in self.measurements.drain(..) {
            let mut np = RawRobotMeasurement {
                time: m.time,
                pos: transform.apply_pos(m.pos),
                phi: limit_angle(transform.apply_angle(m.phi)),
                camera_id: m.camera_id,
                vision_processing_time: m.vision_processing_time,
                velocity: None,
                omega: None,
                time_diff_scaled: None,
                system_delay: None,
            };

            if let Some(prev) = self.last_raw.get(&np.camera_id)
                && np.time > prev.time
                && prev.time + 200_000_000 > np.time
            {
                let dt = (np.time - prev.time) as f64 * 1e-9;
                np.velocity = Some((np.pos - prev.pos) / dt);
                np.omega = Some(limit_angle(np.phi - prev.phi) / dt);
                np.time_diff_scaled = Some((np.time - prev.time) as f64 * 1e-7);
                np.system_delay = Some((self.last_time - np.time) as f64 * 1e-9);
            }
            self.last_raw.insert(np.camera_id, np.clone());
            robot_state.raw.push(np);
        }

        robot_state
    }

    /// Distance from the vision-based (not command-predicted) estimate.
    pub fn distance_to(&self, pos: Vector2<f64>) -> f64 {
        let state = self.kalman.state();
        (pos - Vector2::new(state[0], state[1])).norm()
    }

    pub fn add_vision_frame(&mut self, frame: RobotVisionFrame) {
        // only count frames for the primary camera
        if self.primary_camera.is_none() || self.primary_camera == Some(frame.camera_id) {
            self.frame_counter += 1;
        }
        self.vision_frames.push_back(frame);
    }

    pub fn add_radio_command(&mut self, command: RadioCommand, time: Nanos) {
        self.radio_commands.push_back((command, time));
    }

    /// Snapshot for the ball subsystems: predicted and past poses, speeds,
    /// and the kick/dribbler flags of the latest radio command.
    pub fn robot_info(&self) -> RobotInfo {
        let future = self.future_kalman.state();
        let robot_pos = Vector2::new(future[0], future[1]);
        let phi = limit_angle(future[2]);
        let dribbler_pos = robot_pos + DRIBBLER_DIST * Vector2::new(phi.cos(), phi.sin());

        let past = self.kalman.state();
        let past_robot_pos = Vector2::new(past[0], past[1]);
        let past_phi = limit_angle(past[2]);
        let past_dribbler_pos =
            past_robot_pos + DRIBBLER_DIST * Vector2::new(past_phi.cos(), past_phi.sin());

        let cmd = &self.last_radio_command.0;
        RobotInfo {
            identifier: self.id.identifier(),
            robot_pos,
            dribbler_pos,
            past_robot_pos,
            past_dribbler_pos,
            speed: Vector2::new(future[3], future[4]),
            angular_velocity: future[5],
            chip_command: cmd.kick_style == Some(pitch_types::KickStyle::Chip),
            linear_command: cmd.kick_style == Some(pitch_types::KickStyle::Linear),
            dribbler_active: cmd.dribbler_active(),
            kick_power: cmd.kick_power,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pitch_types::TeamColor;

    const DT: Nanos = 16_000_000;

    fn config() -> TrackerConfig {
        TrackerConfig::default()
    }

    fn filter_with_track(v: f64, frames: i64) -> RobotFilter {
        let id = RobotId::new(TeamColor::Yellow, 3);
        let mut filter = RobotFilter::new(id, Vector2::zeros(), FRAC_PI_2, 0);
        for i in 1..=frames {
            let t = i * DT;
            filter.add_vision_frame(RobotVisionFrame {
                camera_id: 0,
                pos: Vector2::new(v * t as f64 * 1e-9, 0.0),
                phi: FRAC_PI_2,
                time: t,
                vision_processing_time: 0,
                switch_camera: false,
            });
        }
        filter
    }

    #[test]
    fn angle_wrapping() {
        assert_relative_eq!(limit_angle(3.0 * PI), PI);
        assert_relative_eq!(limit_angle(-3.0 * PI), PI);
        assert_relative_eq!(limit_angle(0.3), 0.3);
    }

    #[test]
    fn tracks_constant_velocity_robot() {
        let mut filter = filter_with_track(1.5, 30);
        filter.update(30 * DT, &config());
        let state = filter.get(&FieldTransform::default(), true);
        assert_relative_eq!(state.vel.x, 1.5, epsilon = 0.2);
        assert_relative_eq!(state.vel.y, 0.0, epsilon = 0.05);
        assert_relative_eq!(state.phi, FRAC_PI_2, epsilon = 1e-3);
    }

    #[test]
    fn prediction_extrapolates_between_frames() {
        let mut filter = filter_with_track(2.0, 30);
        filter.update(30 * DT, &config());
        let at_last = filter.get(&FieldTransform::default(), true);
        filter.update(30 * DT + 50_000_000, &config());
        let ahead = filter.get(&FieldTransform::default(), true);
        let moved = ahead.pos.x - at_last.pos.x;
        assert_relative_eq!(moved, 2.0 * 0.05, epsilon = 0.03);
    }

    #[test]
    fn first_camera_becomes_primary() {
        let mut filter = filter_with_track(0.0, 3);
        filter.update(3 * DT, &config());
        assert_eq!(filter.primary_camera(), Some(0));
        assert_eq!(filter.frame_counter(), 3);
    }

    #[test]
    fn non_primary_frames_count_nothing() {
        let mut filter = filter_with_track(0.0, 2);
        filter.update(2 * DT, &config());
        filter.add_vision_frame(RobotVisionFrame {
            camera_id: 7,
            pos: Vector2::zeros(),
            phi: FRAC_PI_2,
            time: 3 * DT,
            vision_processing_time: 0,
            switch_camera: false,
        });
        assert_eq!(filter.frame_counter(), 2);
    }

    #[test]
    fn raw_echo_carries_interframe_velocity() {
        let mut filter = filter_with_track(2.0, 5);
        filter.update(5 * DT, &config());
        let state = filter.get(&FieldTransform::default(), false);
        assert_eq!(state.raw.len(), 5);
        // the first raw record has no predecessor
        assert!(state.raw[0].velocity.is_none());
        let vel = state.raw[4].velocity.expect("velocity from consecutive frames");
        assert_relative_eq!(vel.x, 2.0, epsilon = 1e-6);
    }

    #[test]
    fn radio_command_shapes_future_prediction() {
        let mut filter = filter_with_track(0.0, 10);
        filter.update(10 * DT, &config());
        let before = filter.get(&FieldTransform::default(), true);
        assert_relative_eq!(before.vel.norm(), 0.0, epsilon = 0.05);

        // command forward motion (robot looks along +y at phi = pi/2)
        let id = RobotId::new(TeamColor::Yellow, 3);
        let mut cmd = RadioCommand::halt(id);
        cmd.v_f = 1.0;
        filter.add_radio_command(cmd, 10 * DT + 1_000_000);
        filter.update(10 * DT + 15_000_000, &config());
        let after = filter.get(&FieldTransform::default(), true);
        // the command accelerates the prediction without any vision input
        assert!(after.vel.norm() > 0.1);
    }
}
