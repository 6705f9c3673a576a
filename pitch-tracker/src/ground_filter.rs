use nalgebra::{SVector, Vector2, Vector3};
use pitch_kalman::KalmanFilter;
use pitch_types::{BallModel, BallState, NANOS_PER_SEC, Nanos};

use crate::frame::VisionFrame;
use crate::{Error, GRAVITY, Result};

type Kalman = KalmanFilter<6, 2>;

/// Kalman filter for a ball on (or near) the ground.
///
/// State is [x, y, z, vx, vy, vz]; only the planar position is observed. The
/// control input models rolling friction while the ball is low and plain
/// gravity while it is not, so a flying ball predicted by this filter at
/// least falls instead of rolling forever.
#[derive(Debug, Clone)]
pub struct GroundFilter {
    kalman: Kalman,
    last_update: Nanos,
    ball_model: BallModel,
}

impl GroundFilter {
    pub fn new(frame: &VisionFrame, ball_model: BallModel) -> Self {
        let mut filter = Self {
            kalman: Kalman::new(SVector::zeros()),
            last_update: frame.time,
            ball_model,
        };
        filter.reset(frame);
        filter
    }

    pub fn reset(&mut self, frame: &VisionFrame) {
        let mut x = SVector::<f64, 6>::zeros();
        x[0] = frame.pos.x;
        x[1] = frame.pos.y;
        self.kalman = Kalman::new(x);
        self.kalman.h[(0, 0)] = 1.0;
        self.kalman.h[(1, 1)] = 1.0;

        // a good calibration should also work with 0.002 or a bit less;
        // a resting ball would even allow 0.001
        self.set_observation_std_dev(0.003);

        self.last_update = frame.time;
    }

    /// Poke the velocity without touching the position. Used after a dribble
    /// release, where the position is known but the filter never saw the
    /// speed the robot imparted.
    pub fn set_speed(&mut self, speed: Vector2<f64>) {
        self.kalman.modify_state(3, speed.x);
        self.kalman.modify_state(4, speed.y);
    }

    pub fn predict(&mut self, time: Nanos) -> Result<()> {
        if time == self.last_update {
            return Ok(());
        }
        if time < self.last_update {
            return Err(Error::NonMonotonicTime {
                requested: time,
                filter_time: self.last_update,
            });
        }
        let time_diff = (time - self.last_update) as f64 / NANOS_PER_SEC;

        // update position with current speed
        self.kalman.f[(0, 3)] = time_diff;
        self.kalman.f[(1, 4)] = time_diff;
        self.kalman.f[(2, 5)] = time_diff;
        self.kalman.b = self.kalman.f;

        // simple rolling friction estimation
        let deceleration = self.ball_model.slow_deceleration * time_diff;
        let d = *self.kalman.base_state();
        let v = (d[3] * d[3] + d[4] * d[4]).sqrt();
        let phi = d[4].atan2(d[3]);
        if v < deceleration {
            self.kalman.u[0] = -v * phi.cos() * time_diff / 2.0;
            self.kalman.u[1] = -v * phi.sin() * time_diff / 2.0;
            self.kalman.u[3] = -d[3] / 2.0;
            self.kalman.u[4] = -d[4] / 2.0;
            // only a moving ball can fly
            self.kalman.u[2] = -d[2] / 2.0;
            self.kalman.u[5] = -d[5] / 2.0;
        } else if d[2] < 0.1 {
            // rolling
            self.kalman.u[0] = -deceleration * phi.cos() * time_diff / 2.0;
            self.kalman.u[1] = -deceleration * phi.sin() * time_diff / 2.0;
            self.kalman.u[3] = -deceleration * phi.cos();
            self.kalman.u[4] = -deceleration * phi.sin();
            self.kalman.u[2] = -d[2] / 2.0;
            self.kalman.u[5] = -d[5] / 2.0;
        } else {
            self.kalman.u[0] = 0.0;
            self.kalman.u[1] = 0.0;
            self.kalman.u[3] = 0.0;
            self.kalman.u[4] = 0.0;
            self.kalman.u[2] = -GRAVITY * time_diff * time_diff / 2.0;
            self.kalman.u[5] = -GRAVITY * time_diff;
        }

        // process noise: acceleration stddev per axis
        let sigma_a_x = 4.0;
        let sigma_a_y = 4.0;
        let sigma_a_z = 4.0;

        // d = timediff
        // G = (d^2/2, d^2/2, d^2/2, d, d, d)
        // Q = GG^T (with the per-axis sigmas folded into G)
        let g = SVector::<f64, 6>::from([
            time_diff * time_diff / 2.0 * sigma_a_x,
            time_diff * time_diff / 2.0 * sigma_a_y,
            time_diff * time_diff / 2.0 * sigma_a_z,
            time_diff * sigma_a_x,
            time_diff * sigma_a_y,
            time_diff * sigma_a_z,
        ]);

        for (pos, vel) in [(0, 3), (1, 4), (2, 5)] {
            self.kalman.q[(pos, pos)] = g[pos] * g[pos];
            self.kalman.q[(pos, vel)] = g[pos] * g[vel];
            self.kalman.q[(vel, pos)] = g[vel] * g[pos];
            self.kalman.q[(vel, vel)] = g[vel] * g[vel];
        }

        self.kalman.predict(false);
        Ok(())
    }

    pub fn set_observation_std_dev(&mut self, deviation: f64) {
        self.kalman.r[(0, 0)] = deviation * deviation;
        self.kalman.r[(1, 1)] = deviation * deviation;
    }

    pub fn process_vision_frame(&mut self, frame: &VisionFrame) -> Result<()> {
        self.predict(frame.time)?;

        self.kalman.z[0] = frame.pos.x;
        self.kalman.z[1] = frame.pos.y;

        self.kalman.update();
        self.last_update = frame.time;
        Ok(())
    }

    pub fn distance_to(&self, obj_pos: Vector2<f64>) -> f64 {
        let state = self.kalman.state();
        (obj_pos - Vector2::new(state[0], state[1])).norm()
    }

    pub fn write_ball_state(&mut self, ball: &mut BallState, time: Nanos) {
        // a prediction into the past keeps the last state
        let _ = self.predict(time);
        let state = self.kalman.state();
        ball.pos = Vector3::new(state[0], state[1], state[2]);
        ball.vel = Vector3::new(state[3], state[4], state[5]);
    }

    pub fn last_update(&self) -> Nanos {
        self.last_update
    }
}
