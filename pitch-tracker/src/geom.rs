//! Planar geometry against the robot hull.
//!
//! The robot is modelled as a circle clipped by a chord at the dribbler line;
//! the dribbler plate sits on that chord. All positions are field meters.

use nalgebra::{Vector2, Vector3};

use crate::frame::RobotInfo;

pub fn perpendicular(dir: Vector2<f64>) -> Vector2<f64> {
    Vector2::new(dir.y, -dir.x)
}

/// Intersections of the line `offset + lambda*dir` with a circle, returned
/// with their lambda (measured in meters along the normalized direction).
pub fn intersect_line_circle(
    offset: Vector2<f64>,
    dir: Vector2<f64>,
    center: Vector2<f64>,
    radius: f64,
) -> Vec<(Vector2<f64>, f64)> {
    let dir = dir.normalize();
    let const_part = offset - center;

    let a = dir.dot(&dir);
    let b = 2.0 * dir.dot(&const_part);
    let c = const_part.dot(&const_part) - radius * radius;

    let det = b * b - 4.0 * a * c;

    if det < 0.0 {
        return vec![];
    }

    if det < 1e-5 {
        let lambda1 = -b / (2.0 * a);
        return vec![(offset + dir * lambda1, lambda1)];
    }

    let lambda1 = (-b + det.sqrt()) / (2.0 * a);
    let lambda2 = (-b - det.sqrt()) / (2.0 * a);
    vec![
        (offset + dir * lambda1, lambda1),
        (offset + dir * lambda2, lambda2),
    ]
}

pub fn intersect_line_segment_circle(
    p1: Vector2<f64>,
    p2: Vector2<f64>,
    center: Vector2<f64>,
    radius: f64,
) -> Option<Vector2<f64>> {
    let dist = (p2 - p1).norm();
    let mut intersections = intersect_line_circle(p1, p2 - p1, center, radius);
    match intersections.len() {
        0 => None,
        1 => {
            let (point, lambda) = intersections[0];
            (lambda >= 0.0 && lambda <= dist).then_some(point)
        }
        _ => {
            if intersections[0].1 > intersections[1].1 {
                intersections.swap(0, 1);
            }
            intersections
                .into_iter()
                .find(|&(_, lambda)| lambda >= 0.0 && lambda <= dist)
                .map(|(point, _)| point)
        }
    }
}

/// Intersection parameters of two lines given as point plus direction.
///
/// Returns `(t1, t2)` with the intersection at `pos1 + dir1 * t1`, or `None`
/// for (nearly) collinear directions.
pub fn intersect_line_line(
    pos1: Vector2<f64>,
    dir1: Vector2<f64>,
    pos2: Vector2<f64>,
    dir2: Vector2<f64>,
) -> Option<(f64, f64)> {
    if perpendicular(dir1).dot(&dir2).abs() / (dir1.norm() * dir2.norm()) < 1e-4 {
        return None;
    }

    let normal1 = perpendicular(dir1);
    let normal2 = perpendicular(dir2);
    let diff = pos2 - pos1;
    let t1 = normal2.dot(&diff) / normal2.dot(&dir1);
    let t2 = -normal1.dot(&diff) / normal1.dot(&dir2);
    Some((t1, t2))
}

/// First intersection of the segment `p1..p2` with the robot hull: the circle
/// of `robot_radius` clipped by the dribbler chord. `size_factor` scales the
/// whole hull around the robot center.
pub fn intersect_line_segment_robot(
    p1: Vector2<f64>,
    p2: Vector2<f64>,
    robot: &RobotInfo,
    robot_radius: f64,
    size_factor: f64,
) -> Option<Vector2<f64>> {
    let mut robot_radius = robot_radius;
    let mut dribbler_pos = robot.dribbler_pos;
    if size_factor != 1.0 {
        robot_radius *= size_factor;
        dribbler_pos = robot.robot_pos + (robot.dribbler_pos - robot.robot_pos) * size_factor;
    }

    let to_dribbler = (dribbler_pos - robot.robot_pos).normalize();
    let dribbler_sideways = perpendicular(to_dribbler);
    let dribbler_intersection = intersect_line_line(dribbler_pos, dribbler_sideways, p1, p2 - p1);
    let mut dribbler_intersection_pos = None;
    if let Some((t1, t2)) = dribbler_intersection
        && t2 >= 0.0
        && t2 <= 1.0
    {
        let candidate = dribbler_pos + dribbler_sideways * t1;
        if (candidate - robot.robot_pos).norm() <= robot_radius {
            dribbler_intersection_pos = Some(candidate);
        }
        if dribbler_intersection_pos.is_some() && (p1 - dribbler_pos).dot(&to_dribbler) >= 0.0 {
            // the segment comes from in front of the robot, the chord
            // intersection is the correct one
            return dribbler_intersection_pos;
        }
    }
    let mut hull_intersection = intersect_line_segment_circle(p1, p2, robot.robot_pos, robot_radius);
    if let Some(hull) = hull_intersection
        && (hull - dribbler_pos).dot(&to_dribbler) >= 0.0
    {
        hull_intersection = None;
    }
    match (dribbler_intersection_pos, hull_intersection) {
        (Some(d), None) => Some(d),
        (Some(d), Some(h)) => {
            // select the closer of the two intersections
            if (h - p1).norm() < (d - p1).norm() {
                Some(h)
            } else {
                Some(d)
            }
        }
        (None, hull) => hull,
    }
}

pub fn is_inside_robot(
    pos: Vector2<f64>,
    robot_pos: Vector2<f64>,
    dribbler_pos: Vector2<f64>,
    robot_radius: f64,
    size_factor: f64,
) -> bool {
    if (pos - robot_pos).norm() > robot_radius * size_factor {
        return false;
    }
    let to_dribbler = (dribbler_pos - robot_pos).normalize();
    let scaled_dribbler_pos = robot_pos + (dribbler_pos - robot_pos) * size_factor;
    (pos - scaled_dribbler_pos).dot(&to_dribbler) <= 0.0
}

/// Whether the ball at `pos` (center at ball radius height) can be seen by the
/// camera, i.e. the sight line does not pass through the robot cylinder short
/// of the dribbler chord.
pub fn is_ball_visible(
    pos: Vector2<f64>,
    robot: &RobotInfo,
    robot_radius: f64,
    robot_height: f64,
    camera_pos: Vector3<f64>,
    ball_radius: f64,
) -> bool {
    let to_ball = Vector3::new(pos.x, pos.y, ball_radius) - camera_pos;
    let length = (camera_pos.z - robot_height) / (camera_pos.z - ball_radius);
    let projected = camera_pos + to_ball * length;
    let projected_2d = Vector2::new(projected.x, projected.y);
    // the ball is treated as invisible only once its center is overshadowed
    let in_radius = (robot.robot_pos - projected_2d).norm() <= robot_radius;
    let front_of_dribbler =
        (projected_2d - robot.dribbler_pos).dot(&(robot.dribbler_pos - robot.robot_pos)) > 0.0;
    let has_intersection =
        intersect_line_segment_robot(pos, projected_2d, robot, robot_radius, 0.98).is_some();
    (!in_radius || front_of_dribbler) && !has_intersection
}

pub fn distance_to_line_segment(
    line_start: Vector2<f64>,
    line_end: Vector2<f64>,
    pos: Vector2<f64>,
) -> f64 {
    let dir = (line_end - line_start).normalize();
    let offset = pos - line_start;
    if offset.dot(&dir) < 0.0 {
        return offset.norm();
    }
    let d = pos - line_end;
    if d.dot(&dir) > 0.0 {
        return d.norm();
    }
    (d.x * dir.y - d.y * dir.x).abs()
}

/// Signed distance from the ball position to the edge of the robot's shadow
/// on the field plane. In contrast to [`is_ball_visible`] the robot is a
/// perfect cylinder here, without the dribbler indentation.
pub fn dist_to_robot_shadow(
    pos: Vector2<f64>,
    robot: &RobotInfo,
    robot_radius: f64,
    robot_height: f64,
    camera_pos: Vector3<f64>,
    ball_radius: f64,
) -> f64 {
    let to_ball = Vector3::new(pos.x, pos.y, ball_radius) - camera_pos;
    let length = (camera_pos.z - robot_height) / (camera_pos.z - ball_radius);
    let projected = camera_pos + to_ball * length;
    let projected_2d = Vector2::new(projected.x, projected.y);
    distance_to_line_segment(pos, projected_2d, robot.robot_pos) - robot_radius
}
