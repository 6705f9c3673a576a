//! Ball/robot collision handling and dribbling around the ground filter.
//!
//! Wraps a [`GroundFilter`] and overrides its output while the ball is bound
//! to a robot: pushed, dribbled, rotated with, or occluded behind one. Also
//! resets the ground filter after volley shots so the outgoing velocity is
//! not averaged with the incoming one.

use nalgebra::Vector2;
use pitch_types::{BallState, Nanos, TrackerConfig};

use crate::camera::CameraInfo;
use crate::debug::DebugLog;
use crate::frame::{RobotInfo, VisionFrame};
use crate::geom::{
    dist_to_robot_shadow, intersect_line_segment_robot, is_ball_visible, is_inside_robot,
    perpendicular,
};
use crate::ground_filter::GroundFilter;
use crate::Result;

const DRIBBLING_ROBOT_VISIBILITY_FACTOR: f64 = 1.03;
/// How long a reported zero speed is held back after losing vision [ms].
const RESET_SPEED_TIME_MS: i64 = 150;

/// The ball bound to a robot-relative offset while it cannot be trusted to
/// vision: pushed, dribbled or occluded.
#[derive(Debug, Clone)]
struct BallOffsetInfo {
    robot_identifier: i32,
    /// robot-local offset, x toward the dribbler, y sideways
    ball_offset: Vector2<f64>,
    /// where a standing ball would be if the robot pushed it until now
    pushing_ball_pos: Vector2<f64>,
    /// last position while the dribbler was active
    stop_dribbling_pos: Vector2<f64>,
    force_dribble_mode: bool,
    is_intersecting: bool,
    dribbler_active: bool,
}

impl BallOffsetInfo {
    fn new(
        projected_ball_pos: Vector2<f64>,
        robot: &RobotInfo,
        force_dribbling: bool,
        intersecting: bool,
    ) -> Self {
        Self {
            robot_identifier: robot.identifier,
            ball_offset: compute_relative_position(projected_ball_pos, robot),
            pushing_ball_pos: projected_ball_pos,
            stop_dribbling_pos: projected_ball_pos,
            force_dribble_mode: force_dribbling,
            is_intersecting: intersecting,
            dribbler_active: false,
        }
    }
}

fn compute_relative_position(ball_pos: Vector2<f64>, robot: &RobotInfo) -> Vector2<f64> {
    let to_dribbler = (robot.dribbler_pos - robot.robot_pos).normalize();
    Vector2::new(
        (ball_pos - robot.robot_pos).dot(&to_dribbler),
        (ball_pos - robot.robot_pos).dot(&perpendicular(to_dribbler)),
    )
}

fn unproject_relative_position(relative_pos: Vector2<f64>, robot: &RobotInfo) -> Vector2<f64> {
    let to_dribbler = (robot.dribbler_pos - robot.robot_pos).normalize();
    let relative_ball_pos =
        relative_pos.x * to_dribbler + relative_pos.y * perpendicular(to_dribbler);
    robot.robot_pos + relative_ball_pos
}

/// Surface speed of the bound ball: robot velocity plus omega cross offset.
fn compute_dribbling_ball_speed(robot: &RobotInfo, relative_position: Vector2<f64>) -> Vector2<f64> {
    let absolute_offset = unproject_relative_position(relative_position, robot) - robot.robot_pos;
    let dist_to_robot = absolute_offset.norm();
    let tangential_length = robot.angular_velocity * dist_to_robot;
    let tangential = -perpendicular(absolute_offset.normalize()) * tangential_length;
    robot.speed + tangential
}

fn set_ball_data(ball: &mut BallState, pos: Vector2<f64>, speed: Vector2<f64>, write_speed: bool) {
    ball.pos.x = pos.x;
    ball.pos.y = pos.y;
    if write_speed {
        ball.vel.x = speed.x;
        ball.vel.y = speed.y;
    }
}

#[derive(Debug, Clone)]
pub struct CollisionFilter {
    config: TrackerConfig,
    primary_camera: u32,
    ground_filter: GroundFilter,
    last_update_time: Nanos,
    past_ball_state: BallState,
    dribble_offset: Option<BallOffsetInfo>,
    last_reported_ball_pos: Vector2<f64>,
    feasibly_invisible: bool,
    last_vision_frame: VisionFrame,
    invisible_frames: u32,
    had_robot_intersection: bool,
    last_valid_speed: f64,
    in_dribbler_frames: u32,
    rotate_and_dribble_offset: Option<BallOffsetInfo>,
    max_speed: f64,
    frames_decelerating: u32,
    ball_was_near_robot: bool,
    highest_speed: f64,

    pub(crate) debug: DebugLog,
}

impl CollisionFilter {
    pub fn new(frame: &VisionFrame, config: TrackerConfig) -> Self {
        Self {
            primary_camera: frame.camera_id,
            ground_filter: GroundFilter::new(frame, config.ball_model),
            config,
            last_update_time: 0,
            past_ball_state: BallState::at_rest(Vector2::zeros()),
            dribble_offset: None,
            last_reported_ball_pos: frame.pos,
            feasibly_invisible: false,
            last_vision_frame: frame.clone(),
            invisible_frames: 0,
            had_robot_intersection: false,
            last_valid_speed: 0.0,
            in_dribbler_frames: 0,
            rotate_and_dribble_offset: None,
            max_speed: 0.0,
            frames_decelerating: 0,
            ball_was_near_robot: false,
            highest_speed: 0.0,
            debug: DebugLog::default(),
        }
    }

    pub fn clone_for_camera(&self, primary_camera: u32) -> Self {
        let mut copy = self.clone();
        copy.primary_camera = primary_camera;
        copy.debug = DebugLog::default();
        copy
    }

    pub fn is_feasibly_invisible(&self) -> bool {
        self.feasibly_invisible
    }

    pub fn distance_to(&self, pos: Vector2<f64>) -> f64 {
        self.ground_filter.distance_to(pos)
    }

    fn reset_filter(&mut self, frame: &VisionFrame) {
        self.ground_filter.reset(frame);
        self.frames_decelerating = 0;
        self.ball_was_near_robot = true;
    }

    fn update_max_speed(&mut self, frame: &VisionFrame, last_speed_length: f64, last_pos: Vector2<f64>) {
        const MAXSPEED_MIN_ROBOT_DIST: f64 = 0.1;
        const NUM_DECELERATION_FRAMES: u32 = 3;

        let speed = Vector2::new(self.past_ball_state.vel.x, self.past_ball_state.vel.y);
        let speed_length = speed.norm();
        let pos = Vector2::new(self.past_ball_state.pos.x, self.past_ball_state.pos.y);

        if speed.norm() - last_speed_length > 0.2 {
            self.frames_decelerating = 0;
        } else {
            self.frames_decelerating += 1;
        }
        // without extreme acceleration for a few frames straight, the current
        // velocity counts as the maximum plausible ball speed
        if self.frames_decelerating <= NUM_DECELERATION_FRAMES {
            if (frame.robot.past_robot_pos - pos).norm() < MAXSPEED_MIN_ROBOT_DIST
                || (frame.robot.past_robot_pos - last_pos).norm() < MAXSPEED_MIN_ROBOT_DIST
            {
                self.ball_was_near_robot = true;
            }
            self.highest_speed = self.highest_speed.max(speed_length);
        }

        if self.frames_decelerating == NUM_DECELERATION_FRAMES {
            if self.ball_was_near_robot {
                self.max_speed = self.highest_speed;
            }
            self.ball_was_near_robot = false;
            self.highest_speed = 0.0;
        }
        if self.max_speed < speed_length {
            self.max_speed += 0.5 * (speed_length - self.max_speed);
        }
    }

    /// Detect the ball sitting directly in front of the dribbler plate and
    /// count for how long that has been the case.
    fn update_dribble_and_rotate(&mut self, frame: &VisionFrame) {
        let frame_pos = frame.pos;
        let to_dribbler = (frame.robot.dribbler_pos - frame.robot.robot_pos).normalize();
        let sideways = perpendicular(to_dribbler);

        let front_dist = (frame_pos - frame.robot.dribbler_pos).dot(&to_dribbler).abs();
        let side_dist = (frame_pos - frame.robot.dribbler_pos).dot(&sideways).abs();

        let max_front_dist = self.config.ball_radius + 0.03;
        let max_side_dist = self.config.dribbler_width + 0.02;
        if front_dist < max_front_dist && side_dist < max_side_dist {
            self.in_dribbler_frames += 1;
        } else {
            self.in_dribbler_frames = 0;
        }
        if let Some(offset) = &self.rotate_and_dribble_offset
            && offset.robot_identifier != frame.robot.identifier
        {
            self.in_dribbler_frames = 0;
        }
        self.rotate_and_dribble_offset = Some(BallOffsetInfo::new(frame_pos, &frame.robot, true, true));
    }

    pub fn choose_detection(&self, frames: &[VisionFrame]) -> Option<usize> {
        const ACCEPT_BALL_DIST: f64 = 0.45;
        let mut min_distance = ACCEPT_BALL_DIST;
        let mut best_frame = None;
        for (i, frame) in frames.iter().enumerate() {
            let reported_ball_dist = if self.dribble_offset.is_some() {
                (self.last_reported_ball_pos - frame.pos).norm()
            } else {
                f64::MAX
            };
            let ground_filter_dist = self.ground_filter.distance_to(frame.pos);

            let dist = reported_ball_dist.min(ground_filter_dist);
            if dist < min_distance {
                min_distance = dist;
                best_frame = Some(i);
            }
        }
        best_frame
    }

    fn is_ball_close_to_robot_shadow(&self, frame: &VisionFrame, cameras: &CameraInfo) -> bool {
        let Some(cam_pos) = cameras.position(self.primary_camera) else {
            return false;
        };
        let shadow_dist = dist_to_robot_shadow(
            frame.pos,
            &frame.robot,
            self.config.robot_radius,
            self.config.robot_height,
            cam_pos,
            self.config.ball_radius,
        );
        let robot_dist = (frame.pos - frame.robot.robot_pos).norm();
        shadow_dist < 0.02 && robot_dist > self.config.robot_radius + 0.03
    }

    pub fn process_vision_frame(&mut self, frame: &VisionFrame, cameras: &CameraInfo) -> Result<()> {
        // 'intersections' where the ball was merely close and invisible for a
        // frame do not require a filter reset
        let true_intersection = self.dribble_offset.as_ref().is_some_and(|offset| {
            (offset.is_intersecting && !offset.force_dribble_mode) || self.invisible_frames > 5
        });
        if true_intersection {
            // reset during dribbling so the ball speed is computed properly
            // once the ball is visible again
            self.reset_filter(frame);
            let ball_offset = self.dribble_offset.as_ref().expect("checked above").ball_offset;
            let current_ball_speed = compute_dribbling_ball_speed(&frame.robot, ball_offset);
            self.ground_filter.set_speed(current_ball_speed);
        }
        self.dribble_offset = None;

        self.feasibly_invisible = false;
        self.last_update_time = frame.time;
        self.last_vision_frame = frame.clone();
        self.invisible_frames = 0;

        let close_to_shadow = self.is_ball_close_to_robot_shadow(frame, cameras);
        self.ground_filter
            .set_observation_std_dev(if close_to_shadow { 0.02 } else { 0.003 });

        let last_speed = Vector2::new(self.past_ball_state.vel.x, self.past_ball_state.vel.y);
        let last_pos = Vector2::new(self.past_ball_state.pos.x, self.past_ball_state.pos.y);

        self.ground_filter.process_vision_frame(frame)?;
        self.ground_filter
            .write_ball_state(&mut self.past_ball_state, frame.time + 1);

        self.check_volley_shot(frame);
        self.update_dribble_and_rotate(frame);
        self.update_max_speed(frame, last_speed.norm(), last_pos);
        Ok(())
    }

    /// After a shot, reset the filter so the reported speed matches the true
    /// outgoing speed as soon as possible. Most important for volleys, where
    /// averaging in the incoming velocity points the result backwards.
    fn check_volley_shot(&mut self, frame: &VisionFrame) {
        let current_pos = Vector2::new(self.past_ball_state.pos.x, self.past_ball_state.pos.y);
        let current_speed = Vector2::new(self.past_ball_state.vel.x, self.past_ball_state.vel.y);
        const FUTURE_TIME_MS: f64 = 50.0;
        let future_pos = current_pos + current_speed * (FUTURE_TIME_MS * 0.001);
        let has_intersection = intersect_line_segment_robot(
            current_pos,
            future_pos,
            &frame.robot,
            self.config.robot_radius,
            1.05,
        )
        .is_some();

        let no_dribbling = current_speed.norm() - frame.robot.speed.norm() > 2.0
            || self.last_valid_speed - frame.robot.speed.norm() > 2.0;
        if !has_intersection && self.had_robot_intersection && no_dribbling {
            self.reset_filter(frame);
            let _ = self.ground_filter.process_vision_frame(frame);
            self.ground_filter
                .write_ball_state(&mut self.past_ball_state, frame.time + 1);
        }
        if !has_intersection {
            self.last_valid_speed = current_speed.norm();
        }
        self.had_robot_intersection = has_intersection;
    }

    fn check_feasible_invisibility(&self, robots: &[RobotInfo], cameras: &CameraInfo) -> bool {
        let mut ball_pos = Vector2::new(self.past_ball_state.pos.x, self.past_ball_state.pos.y);
        if let Some(offset) = &self.dribble_offset
            && let Some(robot) = robots
                .iter()
                .find(|r| r.identifier == offset.robot_identifier)
        {
            ball_pos = unproject_relative_position(offset.ball_offset, &robot.at_past_pose());
        }
        let Some(cam_pos) = cameras.position(self.primary_camera) else {
            return false;
        };
        let size_factor = DRIBBLING_ROBOT_VISIBILITY_FACTOR;
        robots.iter().any(|r| {
            !is_ball_visible(
                ball_pos,
                &r.at_past_pose(),
                self.config.robot_radius * size_factor,
                self.config.robot_height * size_factor,
                cam_pos,
                self.config.ball_radius,
            )
        })
    }

    pub fn write_ball_state(
        &mut self,
        ball: &mut BallState,
        time: Nanos,
        robots: &[RobotInfo],
        last_camera_frame_time: Nanos,
        cameras: &CameraInfo,
    ) {
        self.compute_ball_state(ball, time, robots, last_camera_frame_time, cameras);
        let pos = Vector2::new(ball.pos.x, ball.pos.y);
        let vel = Vector2::new(ball.vel.x, ball.vel.y);
        self.debug.line("reported ball speed", pos, pos + vel);
        self.last_reported_ball_pos = pos;
    }

    fn update_dribbling(&mut self, robots: &[RobotInfo]) {
        let Some(offset) = &mut self.dribble_offset else {
            return;
        };
        let Some(robot) = robots
            .iter()
            .find(|r| r.identifier == offset.robot_identifier)
        else {
            return;
        };
        let robot = robot.at_past_pose();

        let ball_pos = unproject_relative_position(offset.ball_offset, &robot);
        if robot.dribbler_active {
            offset.dribbler_active = true;
            offset.stop_dribbling_pos = ball_pos;
        }

        let was_pushed = is_inside_robot(
            offset.pushing_ball_pos,
            robot.robot_pos,
            robot.dribbler_pos,
            self.config.robot_radius,
            1.0,
        );
        if was_pushed {
            offset.pushing_ball_pos = ball_pos;
            offset.stop_dribbling_pos = ball_pos;
        }
    }

    fn handle_dribbling(
        &mut self,
        ball: &mut BallState,
        robots: &[RobotInfo],
        overwrite_ball_speed: bool,
        cameras: &CameraInfo,
    ) -> bool {
        let Some(offset) = self.dribble_offset.clone() else {
            return false;
        };
        let Some(robot) = robots
            .iter()
            .find(|r| r.identifier == offset.robot_identifier)
        else {
            return false;
        };

        let ball_pos = unproject_relative_position(offset.ball_offset, robot);

        let was_pushed = is_inside_robot(
            offset.pushing_ball_pos,
            robot.robot_pos,
            robot.dribbler_pos,
            self.config.robot_radius,
            1.0,
        );
        let cam_pos = cameras.position(self.primary_camera);
        let pushing_pos_visible = cam_pos.is_some_and(|cam| {
            is_ball_visible(
                offset.pushing_ball_pos,
                robot,
                self.config.robot_radius * DRIBBLING_ROBOT_VISIBILITY_FACTOR,
                self.config.robot_height * DRIBBLING_ROBOT_VISIBILITY_FACTOR,
                cam,
                self.config.ball_radius,
            )
        });
        let other_robot_obstruction = cam_pos.is_some_and(|cam| {
            robots.iter().any(|r| {
                r.identifier != robot.identifier
                    && !is_ball_visible(
                        offset.pushing_ball_pos,
                        r,
                        self.config.robot_radius,
                        self.config.robot_height,
                        cam,
                        self.config.ball_radius,
                    )
            })
        });
        if pushing_pos_visible || other_robot_obstruction || was_pushed || offset.force_dribble_mode
        {
            if offset.dribbler_active && !robot.dribbler_active {
                set_ball_data(
                    ball,
                    offset.stop_dribbling_pos,
                    Vector2::zeros(),
                    overwrite_ball_speed,
                );
                self.debug
                    .text(self.primary_camera, "ground filter mode", "stopped dribbling");
            } else {
                let ball_speed = compute_dribbling_ball_speed(robot, offset.ball_offset);
                set_ball_data(ball, ball_pos, ball_speed, overwrite_ball_speed);
                self.debug
                    .text(self.primary_camera, "ground filter mode", "dribbling");
            }
        } else {
            set_ball_data(
                ball,
                offset.pushing_ball_pos,
                Vector2::zeros(),
                overwrite_ball_speed,
            );
            self.debug.text(
                self.primary_camera,
                "ground filter mode",
                "invisible standing ball",
            );
        }
        true
    }

    fn check_ball_robot_intersection(
        &mut self,
        ball: &mut BallState,
        robot: &RobotInfo,
        overwrite_ball_speed: bool,
        past_pos: Vector2<f64>,
        current_pos: Vector2<f64>,
    ) -> bool {
        let mut outside_robot_past_pos = past_pos;
        let past_inside_current = is_inside_robot(
            past_pos,
            robot.robot_pos,
            robot.dribbler_pos,
            self.config.robot_radius,
            1.01,
        );
        if past_inside_current {
            outside_robot_past_pos = robot.robot_pos + (past_pos - robot.past_robot_pos);
            if is_inside_robot(
                outside_robot_past_pos,
                robot.robot_pos,
                robot.dribbler_pos,
                self.config.robot_radius,
                1.01,
            ) && let Some(intersection) = intersect_line_segment_robot(
                outside_robot_past_pos,
                robot.robot_pos + (outside_robot_past_pos - robot.robot_pos).normalize(),
                robot,
                self.config.robot_radius,
                1.05,
            ) {
                outside_robot_past_pos = intersection;
            }
        }

        if let Some(intersection) = intersect_line_segment_robot(
            outside_robot_past_pos,
            current_pos,
            robot,
            self.config.robot_radius,
            1.0,
        ) {
            let ball_speed = compute_dribbling_ball_speed(
                robot,
                compute_relative_position(intersection, robot),
            );
            set_ball_data(ball, intersection, ball_speed, overwrite_ball_speed);
            self.debug
                .text(self.primary_camera, "ground filter mode", "shot at robot");
            return true;
        }
        false
    }

    fn update_empty_frame(&mut self, frame_time: Nanos, robots: &[RobotInfo], cameras: &CameraInfo) {
        self.invisible_frames += 1;
        self.last_update_time = frame_time;

        let mut past_pos = Vector2::new(self.past_ball_state.pos.x, self.past_ball_state.pos.y);
        let mut past_speed = Vector2::new(self.past_ball_state.vel.x, self.past_ball_state.vel.y);
        // Partially occluded by the robot shadow, the ball often drifts a bit
        // before becoming invisible while a robot drives up to it. The
        // resulting persistent speed is wrong, so re-seed at the last
        // filtered position.
        let close_to_shadow = self.is_ball_close_to_robot_shadow(&self.last_vision_frame, cameras);
        if self.invisible_frames == 3
            && past_speed.norm() < 0.05
            && self.dribble_offset.is_none()
            && close_to_shadow
        {
            let mut reset_frame = self.last_vision_frame.clone();
            reset_frame.pos = past_pos;
            self.reset_filter(&reset_frame);
            self.ground_filter
                .write_ball_state(&mut self.past_ball_state, self.last_vision_frame.time + 1);
            past_pos = Vector2::new(self.past_ball_state.pos.x, self.past_ball_state.pos.y);
            past_speed = Vector2::new(self.past_ball_state.vel.x, self.past_ball_state.vel.y);
        }

        self.debug.circle("invisible ball now", past_pos, 0.05);
        self.ground_filter
            .write_ball_state(&mut self.past_ball_state, frame_time);
        let current_pos = Vector2::new(self.past_ball_state.pos.x, self.past_ball_state.pos.y);

        if self
            .dribble_offset
            .as_ref()
            .is_some_and(|offset| offset.is_intersecting)
        {
            self.update_dribbling(robots);
            return;
        }

        // ball colliding with a robot while invisible
        let mut close_robot: Option<RobotInfo> = None;
        for r in robots {
            let robot = r.at_past_pose();
            if is_inside_robot(
                current_pos,
                robot.past_robot_pos,
                robot.past_dribbler_pos,
                self.config.robot_radius,
                1.0,
            ) {
                if let Some(intersection) = intersect_line_segment_robot(
                    past_pos,
                    current_pos,
                    &robot,
                    self.config.robot_radius,
                    1.0,
                ) {
                    self.dribble_offset = Some(BallOffsetInfo::new(intersection, &robot, false, true));
                    return;
                }

                if let Some(direct_intersection) = intersect_line_segment_robot(
                    robot.robot_pos,
                    robot.robot_pos + (current_pos - robot.robot_pos).normalize(),
                    &robot,
                    self.config.robot_radius,
                    1.0,
                ) {
                    self.dribble_offset =
                        Some(BallOffsetInfo::new(direct_intersection, &robot, false, true));
                    return;
                }
            }

            let robot_dist = (robot.robot_pos - current_pos).norm();
            let in_front_of_robot =
                (robot.dribbler_pos - robot.robot_pos).dot(&(current_pos - robot.robot_pos)) > 0.0;
            if robot_dist < self.config.robot_radius + self.config.ball_radius
                && in_front_of_robot
                && self
                    .dribble_offset
                    .as_ref()
                    .is_none_or(|offset| robot_dist < offset.ball_offset.norm())
            {
                close_robot = Some(robot);
            }
        }

        // dribble and rotate
        if self
            .dribble_offset
            .as_ref()
            .is_none_or(|offset| !offset.is_intersecting)
            && self.rotate_and_dribble_offset.is_some()
            && self.in_dribbler_frames > 15
        {
            let identifier = self
                .rotate_and_dribble_offset
                .as_ref()
                .expect("checked above")
                .robot_identifier;
            if let Some(r) = robots.iter().find(|r| r.identifier == identifier) {
                let robot = r.at_past_pose();
                let unprojected = unproject_relative_position(
                    self.rotate_and_dribble_offset
                        .as_ref()
                        .expect("checked above")
                        .ball_offset,
                    &robot,
                );
                if let Some(cam_pos) = cameras.position(self.primary_camera)
                    && !is_ball_visible(
                        unprojected,
                        &robot,
                        self.config.robot_radius,
                        self.config.robot_height,
                        cam_pos,
                        self.config.ball_radius,
                    )
                {
                    self.dribble_offset = self.rotate_and_dribble_offset.clone();
                    return;
                }
            }
        }

        // a robot close to the ball but not intersecting activates dribbling,
        // while still allowing proper intersections later on
        if let Some(close_robot) = close_robot
            && past_speed.norm() < 0.1
        {
            self.dribble_offset = Some(BallOffsetInfo::new(current_pos, &close_robot, false, false));
        }
    }

    fn compute_ball_state(
        &mut self,
        ball: &mut BallState,
        time: Nanos,
        robots: &[RobotInfo],
        last_camera_frame_time: Nanos,
        cameras: &CameraInfo,
    ) {
        if self.last_update_time > 0 && last_camera_frame_time > self.last_update_time {
            self.update_empty_frame(last_camera_frame_time, robots, cameras);
            self.feasibly_invisible = self.check_feasible_invisibility(robots, cameras);
        }

        self.ground_filter.write_ball_state(ball, time);

        // During dribbling the ball speed should follow the robot. During a
        // volley shot however the future ball intersects the robot before the
        // vision data arrives, and zeroing the speed there would be wrong, so
        // the filtered speed is kept for a short while.
        let invisible_time_ms = (time - self.last_vision_frame.time) / 1_000_000;
        let rotate_and_dribble = self
            .dribble_offset
            .as_ref()
            .is_some_and(|offset| offset.force_dribble_mode);
        let dribbling = self.last_valid_speed < 2.0;
        let overwrite_ball_speed =
            invisible_time_ms > RESET_SPEED_TIME_MS || rotate_and_dribble || dribbling;

        if self.dribble_offset.is_some() {
            self.handle_dribbling(ball, robots, overwrite_ball_speed, cameras);
            return;
        }

        let past_ball_pos = Vector2::new(self.past_ball_state.pos.x, self.past_ball_state.pos.y);
        let current_ball_pos = Vector2::new(ball.pos.x, ball.pos.y);
        for robot in robots {
            if self.check_ball_robot_intersection(
                ball,
                robot,
                overwrite_ball_speed,
                past_ball_pos,
                current_ball_pos,
            ) {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pitch_types::BallDetection;

    fn robot_info(identifier: i32, pos: Vector2<f64>, phi: f64) -> RobotInfo {
        let dribbler = pos + 0.08 * Vector2::new(phi.cos(), phi.sin());
        RobotInfo {
            identifier,
            robot_pos: pos,
            dribbler_pos: dribbler,
            past_robot_pos: pos,
            past_dribbler_pos: dribbler,
            ..RobotInfo::default()
        }
    }

    fn ball_frame(pos: Vector2<f64>, time: Nanos, robot: RobotInfo) -> VisionFrame {
        VisionFrame::new(
            &BallDetection {
                x: pos.y * 1000.0,
                y: -pos.x * 1000.0,
                area: 0,
            },
            time,
            0,
            robot,
            0,
            time,
        )
    }

    #[test]
    fn relative_position_roundtrips() {
        for phi in [0.0, 0.4, std::f64::consts::FRAC_PI_2, 2.8] {
            let robot = robot_info(1, Vector2::new(0.3, -0.2), phi);
            let ball = Vector2::new(0.42, -0.13);
            let rel = compute_relative_position(ball, &robot);
            let back = unproject_relative_position(rel, &robot);
            assert_relative_eq!(back.x, ball.x, epsilon = 1e-9);
            assert_relative_eq!(back.y, ball.y, epsilon = 1e-9);
        }
    }

    #[test]
    fn dribbling_speed_adds_tangential_component() {
        let mut robot = robot_info(1, Vector2::zeros(), 0.0);
        robot.speed = Vector2::new(0.5, 0.0);
        robot.angular_velocity = 2.0;
        // ball straight ahead at the dribbler
        let rel = Vector2::new(0.08, 0.0);
        let speed = compute_dribbling_ball_speed(&robot, rel);
        // omega x r points sideways (+y for positive omega and +x offset)
        assert_relative_eq!(speed.x, 0.5, epsilon = 1e-9);
        assert_relative_eq!(speed.y, 2.0 * 0.08, epsilon = 1e-9);
    }

    #[test]
    fn dribble_binding_follows_rotating_robot() {
        let config = TrackerConfig::default();
        let robot0 = robot_info(1, Vector2::new(0.02, 0.0), 0.0);
        let start = ball_frame(Vector2::new(0.10, 0.0), 0, robot0.clone());
        let mut filter = CollisionFilter::new(&start, config);
        // bind the ball to the robot as the intersection path would
        filter.dribble_offset = Some(BallOffsetInfo::new(
            Vector2::new(0.10, 0.0),
            &robot0,
            true,
            true,
        ));

        // the robot rotated to pi/2; the reported ball must follow the offset
        let robot1 = robot_info(1, Vector2::new(0.02, 0.0), std::f64::consts::FRAC_PI_2);
        let mut ball = BallState::at_rest(Vector2::zeros());
        let cameras = CameraInfo::default();
        filter.write_ball_state(&mut ball, 16_000_000, &[robot1.clone()], 0, &cameras);

        let expected = unproject_relative_position(
            compute_relative_position(Vector2::new(0.10, 0.0), &robot0),
            &robot1,
        );
        assert_relative_eq!(ball.pos.x, expected.x, epsilon = 1e-3);
        assert_relative_eq!(ball.pos.y, expected.y, epsilon = 1e-3);
    }

    #[test]
    fn volley_resets_speed_to_outgoing() {
        let config = TrackerConfig::default();
        let dt = 16_000_000;
        let robot = robot_info(1, Vector2::zeros(), 0.0);

        // ball rolls toward the robot at -3 m/s along x
        let mut time = 0;
        let mut filter = CollisionFilter::new(
            &ball_frame(Vector2::new(1.0, 0.0), 0, robot.clone()),
            config,
        );
        let cameras = CameraInfo::default();
        for i in 1..=20 {
            time = i * dt;
            let x = 1.0 - 3.0 * (time as f64 / 1e9);
            if x < 0.15 {
                break;
            }
            filter
                .process_vision_frame(&ball_frame(Vector2::new(x, 0.0), time, robot.clone()), &cameras)
                .unwrap();
        }
        let incoming = Vector2::new(
            filter.past_ball_state.vel.x,
            filter.past_ball_state.vel.y,
        );
        assert!(incoming.x < -2.0);

        // the kicked ball leaves at +4 m/s; after the intersection clears,
        // the filter resets and reports the outgoing speed within two frames
        let leave_start = Vector2::new(0.15, 0.0);
        for i in 1..=3 {
            let t = time + i * dt;
            let pos = leave_start + Vector2::new(4.0, 0.0) * ((i * dt) as f64 / 1e9);
            filter
                .process_vision_frame(&ball_frame(pos, t, robot.clone()), &cameras)
                .unwrap();
        }
        let outgoing = Vector2::new(
            filter.past_ball_state.vel.x,
            filter.past_ball_state.vel.y,
        );
        assert!(
            outgoing.x > 1.0,
            "velocity must flip to the outgoing direction, got {outgoing:?}"
        );
    }
}
