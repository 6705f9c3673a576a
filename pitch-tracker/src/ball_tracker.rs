use std::collections::VecDeque;

use nalgebra::Vector2;
use pitch_types::{BallState, Nanos, RawBallMeasurement, TrackerConfig};
use tracing::trace;

use crate::camera::CameraInfo;
use crate::collision_filter::CollisionFilter;
use crate::debug::DebugLog;
use crate::fly_filter::FlyFilter;
use crate::frame::{RobotInfo, VisionFrame};

/// One tracked ball candidate: a collision/dribble filter around the ground
/// filter, plus a flight filter, sharing a primary camera.
#[derive(Debug, Clone)]
pub struct BallTracker {
    last_time: Nanos,
    primary_camera: u32,
    frame_counter: i32,

    last_update_time: Nanos,
    ground_filter: CollisionFilter,
    fly_filter: FlyFilter,
    vision_frames: VecDeque<VisionFrame>,
    raw_measurements: Vec<RawBallMeasurement>,
    init_time: Nanos,
    last_ball_pos: Vector2<f64>,
    last_frame_time: Nanos,
    confidence: f64,
    update_frame_counter: i32,
    cached_dist_to_camera: f64,

    pub(crate) debug: DebugLog,
}

impl BallTracker {
    pub fn new(frame: &VisionFrame, config: TrackerConfig) -> Self {
        Self {
            last_time: frame.time,
            primary_camera: frame.camera_id,
            frame_counter: 0,
            last_update_time: frame.time,
            ground_filter: CollisionFilter::new(frame, config.clone()),
            fly_filter: FlyFilter::new(frame, config.ball_model),
            vision_frames: VecDeque::new(),
            raw_measurements: Vec::new(),
            init_time: frame.time,
            last_ball_pos: frame.pos,
            last_frame_time: 0,
            confidence: 0.0,
            update_frame_counter: 0,
            cached_dist_to_camera: 0.0,
            debug: DebugLog::default(),
        }
    }

    /// Camera handover: a new tracker continuing this one's filters on a new
    /// primary camera. The frame counter starts over, so the copy has to
    /// re-earn the right to be reported.
    pub fn clone_for_camera(&self, primary_camera: u32) -> Self {
        Self {
            last_time: self.last_time,
            primary_camera,
            frame_counter: 0,
            last_update_time: self.last_update_time,
            ground_filter: self.ground_filter.clone_for_camera(primary_camera),
            fly_filter: self.fly_filter.clone_for_camera(primary_camera),
            vision_frames: VecDeque::new(),
            raw_measurements: Vec::new(),
            init_time: self.init_time,
            last_ball_pos: self.last_ball_pos,
            last_frame_time: self.last_frame_time,
            confidence: self.confidence,
            update_frame_counter: self.update_frame_counter,
            cached_dist_to_camera: self.cached_dist_to_camera,
            debug: DebugLog::default(),
        }
    }

    pub fn last_update(&self) -> Nanos {
        self.last_time
    }

    pub fn primary_camera(&self) -> u32 {
        self.primary_camera
    }

    pub fn frame_counter(&self) -> i32 {
        self.frame_counter
    }

    pub fn init_time(&self) -> Nanos {
        self.init_time
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn is_flying(&self) -> bool {
        self.fly_filter.is_active()
    }

    pub fn is_feasibly_invisible(&self) -> bool {
        self.ground_filter.is_feasibly_invisible()
    }

    pub fn add_vision_frame(&mut self, frame: VisionFrame) {
        self.last_time = frame.time;
        self.vision_frames.push_back(frame);
        self.frame_counter += 1;
        self.update_frame_counter += 1;
    }

    /// Exponentially decaying confidence in this tracker, fed by how many
    /// frames arrived since the last decay step.
    pub fn update_confidence(&mut self) {
        self.confidence = 0.98 * self.confidence + 0.02 * f64::from(self.update_frame_counter);
        self.update_frame_counter = 0;
    }

    /// Apply queued vision frames up to `time`.
    pub fn update(&mut self, time: Nanos, cameras: &CameraInfo) {
        while let Some(frame) = self.vision_frames.front() {
            if frame.time == self.last_frame_time {
                // duplicate timestamps cannot be fused twice
                self.vision_frames.pop_front();
                continue;
            }
            if frame.time > time {
                return; // try again later
            }
            let frame = self.vision_frames.pop_front().expect("peeked above");

            self.fly_filter.process_vision_frame(&frame, cameras);
            if let Err(err) = self.ground_filter.process_vision_frame(&frame, cameras) {
                trace!("dropping ball frame: {err}");
                continue;
            }
            self.raw_measurements.push(RawBallMeasurement {
                time: frame.time,
                pos: frame.pos,
                camera_id: frame.camera_id,
                area: frame.ball_area,
                vision_processing_time: frame.vision_processing_time,
            });

            self.last_frame_time = frame.time;
            self.last_time = time;
            self.last_ball_pos = frame.pos;
        }
        self.last_update_time = time;
        self.debug.merge_from(&mut self.ground_filter.debug);
        self.debug.merge_from(&mut self.fly_filter.debug);
    }

    /// Each tracker can consume at most one detection per vision frame; the
    /// flight filter gets the first say, the ground filter decides otherwise.
    pub fn choose_detection(&self, frames: &[VisionFrame], cameras: &CameraInfo) -> Option<usize> {
        self.fly_filter
            .choose_detection(frames, cameras)
            .or_else(|| self.ground_filter.choose_detection(frames))
    }

    /// Distance used for camera-affinity ordering. While a flight is being
    /// reconstructed its start-position distance keeps the flight on its own
    /// camera.
    pub fn calc_dist_to_camera(&mut self, flying: bool, cameras: &CameraInfo) {
        let mut dist = match cameras.position(self.primary_camera) {
            Some(cam) => (self.last_ball_pos - Vector2::new(cam.x, cam.y)).norm(),
            None => f64::MAX,
        };
        if flying && self.fly_filter.is_active() {
            dist = self.fly_filter.dist_to_start_pos();
        }
        self.cached_dist_to_camera = dist;
    }

    pub fn cached_dist_to_camera(&self) -> f64 {
        self.cached_dist_to_camera
    }

    /// Write the filtered ball state for the time of the last `update` call.
    pub fn get(
        &mut self,
        ball: &mut BallState,
        reset_raw: bool,
        robots: &[RobotInfo],
        last_camera_frame_time: Nanos,
        cameras: &CameraInfo,
    ) {
        ball.is_bouncing = false; // the fly filter overwrites if appropriate
        ball.touchdown = None;

        let time = self.last_update_time;
        self.ground_filter
            .write_ball_state(ball, time, robots, last_camera_frame_time, cameras);
        if self.fly_filter.is_active() {
            self.fly_filter.write_ball_state(ball, time);
        }
        self.debug.merge_from(&mut self.ground_filter.debug);

        ball.raw = if reset_raw {
            std::mem::take(&mut self.raw_measurements)
        } else {
            self.raw_measurements.clone()
        };
    }
}
