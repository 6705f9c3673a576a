use std::collections::{BTreeMap, VecDeque};

use nalgebra::Vector2;
use pitch_types::{
    AreaOfInterest, BallState, DetectionFrame, FieldTransform, Nanos, RadioCommand, RobotDetection,
    RobotId, TeamColor, TrackerConfig, TrackingCommand, VisionPacket, WorldFrame,
    field_angle_from_vision, field_pos_from_vision,
};
use tracing::{debug, warn};

use crate::ball_tracker::BallTracker;
use crate::camera::CameraInfo;
use crate::debug::DebugLog;
use crate::frame::{RobotInfo, VisionFrame};
use crate::robot_filter::{RobotFilter, RobotVisionFrame};

/// Tracker flavor flags.
///
/// A robots-only tracker ignores geometry and ball detections entirely. A
/// speed tracker uses shortened expiry times, trading stability for latency.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrackerMode {
    pub robots_only: bool,
    pub speed_tracker: bool,
}

type RobotMap = BTreeMap<u8, Vec<RobotFilter>>;

/// The tracking core: routes detection frames to per-object filters and
/// produces the filtered world state on demand.
///
/// Single-threaded; all ingress is queued and applied by [`Tracker::process`],
/// all egress happens in [`Tracker::world_state`].
pub struct Tracker {
    config: TrackerConfig,
    mode: TrackerMode,
    camera_info: CameraInfo,
    system_delay: Nanos,
    time_since_last_reset: Nanos,
    time_to_reset: Nanos,
    has_vision_data: bool,
    virtual_field_enabled: bool,
    last_slow_vision_frame: Nanos,
    num_slow_vision_frames: u32,

    ball_filters: Vec<(u64, BallTracker)>,
    next_ball_tracker_id: u64,
    current_ball_filter: Option<u64>,
    robot_filter_yellow: RobotMap,
    robot_filter_blue: RobotMap,

    vision_packets: VecDeque<(VisionPacket, Nanos, String)>,
    /// newest processed source time per camera
    last_update_time: BTreeMap<u32, Nanos>,

    aoi_enabled: bool,
    aoi: AreaOfInterest,
    field_transform: FieldTransform,
    desired_robot_camera: Option<u32>,

    reset_timeout: Nanos,
    max_time_last: Nanos,

    warnings: Vec<String>,
    debug: DebugLog,
}

impl Tracker {
    pub fn new(config: TrackerConfig, mode: TrackerMode) -> Self {
        let (reset_timeout, max_time_last) = if mode.speed_tracker {
            (100_000_000, 200_000_000)
        } else {
            (500_000_000, 1_000_000_000)
        };
        Self {
            system_delay: config.system_delay_ns,
            config,
            mode,
            camera_info: CameraInfo::default(),
            time_since_last_reset: 0,
            time_to_reset: Nanos::MAX,
            has_vision_data: false,
            virtual_field_enabled: false,
            last_slow_vision_frame: 0,
            num_slow_vision_frames: 0,
            ball_filters: Vec::new(),
            next_ball_tracker_id: 0,
            current_ball_filter: None,
            robot_filter_yellow: RobotMap::new(),
            robot_filter_blue: RobotMap::new(),
            vision_packets: VecDeque::new(),
            last_update_time: BTreeMap::new(),
            aoi_enabled: false,
            aoi: AreaOfInterest {
                x1: 0.0,
                y1: 0.0,
                x2: 0.0,
                y2: 0.0,
            },
            field_transform: FieldTransform::default(),
            desired_robot_camera: None,
            reset_timeout,
            max_time_last,
            warnings: Vec::new(),
            debug: DebugLog::default(),
        }
    }

    /// Exchange goals between the teams.
    pub fn set_flip(&mut self, flip: bool) {
        self.field_transform.set_flip(flip);
    }

    pub fn virtual_field_enabled(&self) -> bool {
        self.virtual_field_enabled
    }

    pub fn queue_packet(&mut self, packet: VisionPacket, time: Nanos, sender: &str) {
        self.vision_packets
            .push_back((packet, time, sender.to_string()));
        self.has_vision_data = true;
    }

    pub fn queue_radio_commands(&mut self, commands: &[RadioCommand], time: Nanos) {
        for command in commands {
            let map = match command.id.team {
                TeamColor::Yellow => &mut self.robot_filter_yellow,
                TeamColor::Blue => &mut self.robot_filter_blue,
            };
            if let Some(list) = map.get_mut(&command.id.number) {
                for filter in list.iter_mut() {
                    filter.add_radio_command(command.clone(), time);
                }
            }
        }
    }

    pub fn handle_command(&mut self, command: &TrackingCommand, time: Nanos) {
        if let Some(enabled) = command.aoi_enabled {
            self.aoi_enabled = enabled;
        }
        if let Some(aoi) = command.aoi {
            self.aoi = aoi;
        }
        if let Some(delay) = command.system_delay {
            self.system_delay = delay;
        }
        // delayed reset: drops everything older than the command
        if command.reset {
            self.time_to_reset = time;
        }
        if let Some(transform) = command.field_transform {
            self.field_transform.set_transform(transform);
        }
        if let Some(enabled) = command.enable_virtual_field {
            self.virtual_field_enabled = enabled;
            if !enabled {
                self.field_transform.reset_transform();
            }
        }
    }

    fn reset(&mut self) {
        self.robot_filter_yellow.clear();
        self.robot_filter_blue.clear();
        self.ball_filters.clear();
        self.current_ball_filter = None;
        self.has_vision_data = false;
        self.time_since_last_reset = 0;
        self.last_update_time.clear();
        self.vision_packets.clear();
        self.camera_info.clear();
    }

    fn is_in_aoi(&self, detection_x_mm: f64, detection_y_mm: f64) -> bool {
        let pos = field_pos_from_vision(detection_x_mm, detection_y_mm);
        self.aoi.contains(self.field_transform.apply_pos(pos))
    }

    /// Misconfigured or slow vision computers produce frames with a large
    /// processing time; those frames are mostly discarded as stale, so warn
    /// when the delay is continuously high.
    fn check_vision_processing_time(&mut self, current_time: Nanos, processing_time: Nanos) {
        const VISION_WARN_TIME: Nanos = 40_000_000;
        if processing_time >= VISION_WARN_TIME {
            self.num_slow_vision_frames += 1;
            self.last_slow_vision_frame = current_time;
        }

        // tolerate outliers, only a continuously high delay counts
        if self.last_slow_vision_frame + 10_000_000_000 < current_time {
            self.num_slow_vision_frames = 0;
        }

        // around 75 detections per second arrive; a third of them slow for
        // five seconds within a ten second window triggers the warning
        if self.num_slow_vision_frames > 125 {
            self.warnings.push(
                "multiple vision detection frames with a high processing time, \
                 these may be discarded"
                    .to_string(),
            );
            warn!("repeated slow vision frames");
            self.num_slow_vision_frames = 0;
        }
    }

    /// Run one tick: apply all queued vision packets.
    pub fn process(&mut self, current_time: Nanos) {
        // reset time is used to show robots immediately after a reset
        if self.time_since_last_reset == 0 {
            self.time_since_last_reset = current_time;
        }

        self.invalidate_ball(current_time);
        self.invalidate_robots(current_time);

        let packets = std::mem::take(&mut self.vision_packets);
        for (packet, time, sender) in packets {
            match packet {
                VisionPacket::Geometry(calibrations) => {
                    if self.mode.robots_only {
                        continue;
                    }
                    for calibration in &calibrations {
                        if let Some(warning) = self.camera_info.update(calibration, &sender) {
                            warn!("{warning}");
                            self.warnings.push(warning);
                        }
                    }
                }
                VisionPacket::Detection(detection) => {
                    let vision_processing_time = detection.vision_processing_time();
                    self.check_vision_processing_time(current_time, vision_processing_time);

                    // when the frame was captured, on this computer's clock
                    let source_time = time - vision_processing_time - self.system_delay;

                    if source_time > self.time_to_reset {
                        self.time_to_reset = Nanos::MAX;
                        self.reset();
                        // the queue was cleared along with everything else
                        break;
                    }

                    // drop frames older than the current state
                    let camera_id = detection.camera_id;
                    if source_time <= *self.last_update_time.get(&camera_id).unwrap_or(&0) {
                        continue;
                    }

                    for robot in &detection.robots_yellow {
                        self.track_robot(
                            TeamColor::Yellow,
                            robot,
                            source_time,
                            camera_id,
                            vision_processing_time,
                        );
                    }
                    for robot in &detection.robots_blue {
                        self.track_robot(
                            TeamColor::Blue,
                            robot,
                            source_time,
                            camera_id,
                            vision_processing_time,
                        );
                    }

                    if !self.mode.robots_only {
                        self.track_ball_detections(&detection, source_time, vision_processing_time);

                        for (_, filter) in &mut self.ball_filters {
                            filter.update_confidence();
                        }
                    }

                    self.last_update_time.insert(camera_id, source_time);
                }
            }
        }
    }

    fn track_robot(
        &mut self,
        team: TeamColor,
        robot: &RobotDetection,
        source_time: Nanos,
        camera_id: u32,
        vision_processing_time: Nanos,
    ) {
        let Some(number) = robot.robot_id else {
            return;
        };
        if self.aoi_enabled && !self.is_in_aoi(robot.x, robot.y) {
            return;
        }

        let pos = field_pos_from_vision(robot.x, robot.y);
        let phi = field_angle_from_vision(robot.orientation);

        // One filter per camera in which the robot is visible. Every filter
        // gets the data from every matching camera, but the per-filter
        // primary camera still matters when the calibration is bad.
        const MAX_DISTANCE: f64 = 0.5;
        let primary_timeout = self.config.primary_timeout_ns;

        let map = match team {
            TeamColor::Yellow => &mut self.robot_filter_yellow,
            TeamColor::Blue => &mut self.robot_filter_blue,
        };
        let list = map.entry(number).or_default();

        // camera key with -1 for filters that have no primary yet
        let camera_key = |c: Option<u32>| c.map_or(-1i64, i64::from);

        let mut nearest_filter_by_camera: BTreeMap<i64, (f64, usize)> = BTreeMap::new();
        let mut total_closest: Option<usize> = None;
        let mut total_closest_dist = MAX_DISTANCE;

        for (i, filter) in list.iter_mut().enumerate() {
            filter.update(source_time, &self.config);
            let dist = filter.distance_to(pos);
            if dist > MAX_DISTANCE {
                continue;
            }
            let primary_is_stale = source_time - filter.last_primary_time() > primary_timeout;
            if filter.primary_camera() != Some(camera_id) && primary_is_stale {
                continue;
            }

            if dist < total_closest_dist {
                total_closest_dist = dist;
                total_closest = Some(i);
            }

            let key = camera_key(filter.primary_camera());
            match nearest_filter_by_camera.get(&key) {
                Some((best_dist, _)) if dist >= *best_dist => {}
                _ => {
                    nearest_filter_by_camera.insert(key, (dist, i));
                }
            }
        }

        if total_closest.is_none() {
            list.push(RobotFilter::new(
                RobotId::new(team, number),
                pos,
                phi,
                source_time,
            ));
            let idx = list.len() - 1;
            total_closest = Some(idx);
            nearest_filter_by_camera.insert(i64::from(camera_id), (total_closest_dist, idx));
        }
        let total_closest = total_closest.expect("set above");

        let create_own_camera_filter =
            !nearest_filter_by_camera.contains_key(&i64::from(camera_id));
        if create_own_camera_filter {
            let copy = list[total_closest].clone();
            list.push(copy);
            nearest_filter_by_camera
                .insert(i64::from(camera_id), (total_closest_dist, list.len() - 1));
        }

        for (key, (_, idx)) in nearest_filter_by_camera {
            list[idx].add_vision_frame(RobotVisionFrame {
                camera_id,
                pos,
                phi,
                time: source_time,
                vision_processing_time,
                switch_camera: key == i64::from(camera_id) && create_own_camera_filter,
            });
        }
    }

    fn track_ball_detections(
        &mut self,
        detection: &DetectionFrame,
        source_time: Nanos,
        vision_processing_time: Nanos,
    ) {
        let capture_time = (detection.t_capture * 1e9) as Nanos;
        let camera_id = detection.camera_id;

        if !self.camera_info.has_camera(camera_id) {
            return;
        }

        let best_robots = self.best_robot_infos(source_time, Some(camera_id));

        let mut ball_frames: Vec<VisionFrame> = Vec::with_capacity(detection.balls.len());
        for ball in &detection.balls {
            if self.aoi_enabled && !self.is_in_aoi(ball.x, ball.y) {
                continue;
            }

            // People on the field show up as many detections in a small
            // area; drop all of them.
            const RADIUS_MM: f64 = 500.0;
            const MAX_NEAR_COUNT: usize = 3;
            let near_count = detection
                .balls
                .iter()
                .filter(|other| {
                    (Vector2::new(ball.x, ball.y) - Vector2::new(other.x, other.y)).norm()
                        < RADIUS_MM
                })
                .count();

            if near_count <= MAX_NEAR_COUNT {
                let robot_info = nearest_robot_info(&best_robots, ball.x, ball.y);
                ball_frames.push(VisionFrame::new(
                    ball,
                    source_time,
                    camera_id,
                    robot_info,
                    vision_processing_time,
                    capture_time,
                ));
            }
        }

        if ball_frames.is_empty() {
            return;
        }

        let mut detection_was_accepted = false;
        let mut accepted_by_own_camera = vec![false; ball_frames.len()];
        let mut accepting_other_camera: Vec<Option<u64>> = vec![None; ball_frames.len()];
        for (id, filter) in &mut self.ball_filters {
            filter.update(source_time, &self.camera_info);

            // the true ball cannot be seen twice in one frame, so each
            // filter accepts at most one detection
            if let Some(choice) = filter.choose_detection(&ball_frames, &self.camera_info) {
                if filter.primary_camera() == camera_id {
                    filter.add_vision_frame(ball_frames[choice].clone());
                    accepted_by_own_camera[choice] = true;
                    detection_was_accepted = true;
                } else {
                    // remember this filter in case no same-camera filter
                    // accepts the frame; its state seeds the handover copy
                    accepting_other_camera[choice] = Some(*id);
                }
            }
        }

        for (i, frame) in ball_frames.iter().enumerate() {
            if accepted_by_own_camera[i] {
                continue;
            }
            let donor = accepting_other_camera[i].and_then(|id| {
                self.ball_filters
                    .iter()
                    .find(|(fid, _)| *fid == id)
                    .map(|(_, f)| f)
            });
            let mut tracker = match donor {
                Some(other) => other.clone_for_camera(camera_id),
                None => BallTracker::new(frame, self.config.clone()),
            };
            tracker.add_vision_frame(frame.clone());
            debug!(
                camera_id,
                cloned = donor.is_some(),
                "new ball tracker at {:.3},{:.3}",
                frame.pos.x,
                frame.pos.y
            );
            let id = self.next_ball_tracker_id;
            self.next_ball_tracker_id += 1;
            self.ball_filters.push((id, tracker));
        }

        if detection_was_accepted {
            self.prioritize_ball_filters();
        }
    }

    /// Sort candidate ball filters so the one whose camera is closest to its
    /// last detection comes first; an active flight keeps its reconstruction
    /// distance instead, to stay with the camera it started on.
    fn prioritize_ball_filters(&mut self) {
        let flying = self
            .current_ball_filter
            .and_then(|id| self.ball_filters.iter().find(|(fid, _)| *fid == id))
            .is_some_and(|(_, f)| f.is_flying());

        for (_, filter) in &mut self.ball_filters {
            filter.calc_dist_to_camera(flying, &self.camera_info);
        }
        self.ball_filters.sort_by(|(_, a), (_, b)| {
            a.cached_dist_to_camera().total_cmp(&b.cached_dist_to_camera())
        });
    }

    /// The single ball filter to report: oldest stable tracker, confidence
    /// with hysteresis as the tiebreaker.
    fn best_ball_filter(&mut self) -> Option<usize> {
        const CONFIDENCE_HYSTERESIS: f64 = 0.15;
        const MIN_RAW_DETECTIONS: i32 = 3;

        let mut best: Option<usize> = None;
        let mut oldest_time = 0;
        let mut best_confidence = -1.0;
        for (i, (id, filter)) in self.ball_filters.iter().enumerate() {
            if filter.frame_counter() < MIN_RAW_DETECTIONS {
                continue;
            }
            let confidence = filter.confidence()
                + if self.current_ball_filter == Some(*id) {
                    CONFIDENCE_HYSTERESIS
                } else {
                    0.0
                };
            if best.is_none()
                || filter.init_time() < oldest_time
                || (filter.init_time() == oldest_time && confidence > best_confidence)
            {
                best = Some(i);
                oldest_time = filter.init_time();
                best_confidence = confidence;
            }
        }
        self.current_ball_filter = best.map(|i| self.ball_filters[i].0);
        best
    }

    fn invalidate_robot_filter(
        list: &mut Vec<RobotFilter>,
        max_time: Nanos,
        max_time_last: Nanos,
        current_time: Nanos,
    ) {
        const MIN_FRAME_COUNT: i32 = 5;

        let mut i = 0;
        while i < list.len() {
            // the last filter gets more time, but only once it is credible
            let time_limit = if list.len() > 1 || list[i].frame_counter() < MIN_FRAME_COUNT {
                max_time
            } else {
                max_time_last
            };
            if list[i].last_update() + time_limit < current_time {
                list.remove(i);
            } else {
                i += 1;
            }
        }
    }

    fn invalidate_robots(&mut self, current_time: Nanos) {
        // expiry when multiple filters track the same id; rarely reached
        let max_time = 200_000_000;
        for map in [&mut self.robot_filter_yellow, &mut self.robot_filter_blue] {
            for list in map.values_mut() {
                Self::invalidate_robot_filter(list, max_time, self.max_time_last, current_time);
            }
        }
    }

    fn invalidate_ball(&mut self, current_time: Nanos) {
        // tracking time with multiple balls visible
        let max_time_ball = 100_000_000;
        // tracking time for the last ball
        let max_time_last_ball = 1_000_000_000;
        // tracking time for a ball that could still be hidden by a robot
        let max_time_feasible_ball = 10_000_000_000;
        const MIN_FRAME_COUNT: i32 = 5;

        let long_living_filters = self
            .ball_filters
            .iter()
            .filter(|(_, t)| t.frame_counter() >= 3)
            .count();

        let mut kept = Vec::with_capacity(self.ball_filters.len());
        let mut possible_removals = Vec::new();
        for (id, filter) in self.ball_filters.drain(..) {
            let time_limit = if filter.frame_counter() < MIN_FRAME_COUNT {
                max_time_ball
            } else if long_living_filters == 1 && filter.is_feasibly_invisible() {
                max_time_feasible_ball
            } else if long_living_filters > 1 {
                max_time_ball
            } else {
                max_time_last_ball
            };
            if filter.last_update() + time_limit < current_time {
                if filter.frame_counter() >= 3 {
                    possible_removals.push((id, filter));
                }
            } else {
                kept.push((id, filter));
            }
        }
        if !possible_removals.is_empty() {
            possible_removals.sort_by(|(_, a), (_, b)| {
                b.is_feasibly_invisible()
                    .cmp(&a.is_feasibly_invisible())
                    .then(a.init_time().cmp(&b.init_time()))
            });
            // too many filters accumulate with many balls or bad detections
            while possible_removals.len() > 5 {
                possible_removals.pop();
            }
            // always remove at least one
            possible_removals.pop();
            kept.extend(possible_removals);
        }
        self.ball_filters = kept;
    }

    fn best_filter(
        list: &mut Vec<RobotFilter>,
        min_frame_count: i32,
        desired_camera: Option<u32>,
    ) -> Option<usize> {
        // Take the first credible filter for the desired camera and move it
        // to the front, for a stable result across reads. Without one, the
        // first otherwise matching filter wins.
        let mut result: Option<usize> = None;
        for (i, item) in list.iter().enumerate() {
            if item.frame_counter() >= min_frame_count {
                let is_correct_camera =
                    desired_camera.is_some() && item.primary_camera() == desired_camera;
                if result.is_none() || is_correct_camera {
                    result = Some(i);
                }
                if is_correct_camera || desired_camera.is_none() {
                    break;
                }
            }
        }
        if let Some(i) = result
            && i != 0
        {
            let filter = list.remove(i);
            list.insert(0, filter);
            return Some(0);
        }
        result
    }

    /// Best robot filter per id, updated to `current_time`, as robot infos
    /// for the ball subsystems.
    fn best_robot_infos(&mut self, current_time: Nanos, desired_camera: Option<u32>) -> Vec<RobotInfo> {
        let reset_timeout = 100_000_000;
        // after a reset, allow fast repopulation
        let min_frame_count = if current_time > self.time_since_last_reset + reset_timeout {
            5
        } else {
            0
        };

        let mut infos = Vec::new();
        for map in [&mut self.robot_filter_yellow, &mut self.robot_filter_blue] {
            for list in map.values_mut() {
                if let Some(idx) = Self::best_filter(list, min_frame_count, desired_camera) {
                    list[idx].update(current_time, &self.config);
                    infos.push(list[idx].robot_info());
                }
            }
        }
        infos
    }

    /// Produce the filtered world state for `current_time`.
    ///
    /// `reset_raw` drains the raw-measurement echo; pass `false` for
    /// secondary readers that must not consume it.
    pub fn world_state(&mut self, current_time: Nanos, reset_raw: bool) -> WorldFrame {
        // only report objects tracked for several frames, except shortly
        // after a reset, to repopulate fast
        let min_frame_count = if current_time > self.time_since_last_reset + self.reset_timeout {
            5
        } else {
            0
        };

        let mut world = WorldFrame {
            time: current_time,
            has_vision_data: self.has_vision_data,
            system_delay: self.system_delay,
            ..WorldFrame::default()
        };

        if !self.mode.robots_only
            && let Some(i) = self.best_ball_filter()
        {
            self.desired_robot_camera = Some(self.ball_filters[i].1.primary_camera());
        }

        let mut robot_infos = Vec::new();
        let transform = self.field_transform.clone();
        for (team, map) in [
            (TeamColor::Yellow, &mut self.robot_filter_yellow),
            (TeamColor::Blue, &mut self.robot_filter_blue),
        ] {
            for list in map.values_mut() {
                let Some(idx) = Self::best_filter(list, min_frame_count, self.desired_robot_camera)
                else {
                    continue;
                };
                let robot = &mut list[idx];
                robot.update(current_time, &self.config);
                let state = robot.get(&transform, false);
                robot_infos.push(robot.robot_info());
                match team {
                    TeamColor::Yellow => world.yellow.push(state),
                    TeamColor::Blue => world.blue.push(state),
                }
            }
        }

        if !self.mode.robots_only
            && let Some(i) = self.best_ball_filter()
        {
            let last_camera_frame_time = {
                let primary = self.ball_filters[i].1.primary_camera();
                *self.last_update_time.get(&primary).unwrap_or(&0)
            };
            let (_, ball_filter) = &mut self.ball_filters[i];
            ball_filter.update(current_time, &self.camera_info);

            let mut ball = BallState::at_rest(Vector2::zeros());
            ball_filter.get(
                &mut ball,
                reset_raw,
                &robot_infos,
                last_camera_frame_time,
                &self.camera_info,
            );

            // field transform applies at egress only
            let pos = transform.apply_pos(Vector2::new(ball.pos.x, ball.pos.y));
            ball.pos.x = pos.x;
            ball.pos.y = pos.y;
            let vel = transform.apply_speed(Vector2::new(ball.vel.x, ball.vel.y));
            ball.vel.x = vel.x;
            ball.vel.y = vel.y;
            ball.touchdown = ball.touchdown.map(|td| transform.apply_pos(td));
            for raw in &mut ball.raw {
                raw.pos = transform.apply_pos(raw.pos);
            }

            self.debug.merge_from(&mut self.ball_filters[i].1.debug);
            world.ball = Some(ball);
        }

        if self.aoi_enabled {
            world.aoi = Some(self.aoi);
        }

        world.warnings = std::mem::take(&mut self.warnings);
        world.debug = self.debug.take();
        world
    }
}

fn nearest_robot_info(robots: &[RobotInfo], ball_x_mm: f64, ball_y_mm: f64) -> RobotInfo {
    let ball = field_pos_from_vision(ball_x_mm, ball_y_mm);

    let mut nearest = RobotInfo::default();
    let mut min_dist = f64::MAX;
    for info in robots {
        let dist = (ball - info.dribbler_pos).norm();
        if dist < min_dist {
            min_dist = dist;
            nearest = info.clone();
        }
    }
    nearest
}
