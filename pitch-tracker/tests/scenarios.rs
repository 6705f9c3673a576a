//! Whole-tracker scenarios: feed raw-style detection frames through the
//! tracker and check the filtered world state.

use nalgebra::Vector2;
use pitch_tracker::{Tracker, TrackerMode};
use pitch_types::{
    BallDetection, CameraGeometry, DetectionFrame, KickStyle, Nanos, RadioCommand, RobotDetection,
    RobotId, TeamColor, TrackerConfig, TrackingCommand, VisionPacket,
};

const GRAVITY: f64 = 9.81;

fn test_config() -> TrackerConfig {
    TrackerConfig {
        // tests drive the clock directly, without a transmission delay
        system_delay_ns: 0,
        ..TrackerConfig::default()
    }
}

fn tracker() -> Tracker {
    Tracker::new(test_config(), TrackerMode::default())
}

/// Geometry packet for one camera at a field position (meters).
fn geometry(camera_id: u32, pos: (f64, f64, f64)) -> VisionPacket {
    VisionPacket::Geometry(vec![CameraGeometry {
        camera_id,
        derived_camera_world_tx: pos.1 * 1000.0,
        derived_camera_world_ty: -pos.0 * 1000.0,
        derived_camera_world_tz: pos.2 * 1000.0,
        focal_length: 580.0,
    }])
}

fn ball_detection(field_pos: Vector2<f64>) -> BallDetection {
    BallDetection {
        x: field_pos.y * 1000.0,
        y: -field_pos.x * 1000.0,
        area: 0,
    }
}

fn robot_detection(number: u8, field_pos: Vector2<f64>, phi: f64) -> RobotDetection {
    RobotDetection {
        robot_id: Some(number),
        x: field_pos.y * 1000.0,
        y: -field_pos.x * 1000.0,
        orientation: phi - std::f64::consts::FRAC_PI_2,
    }
}

fn detection_frame(
    camera_id: u32,
    time: Nanos,
    balls: Vec<BallDetection>,
    robots_yellow: Vec<RobotDetection>,
) -> VisionPacket {
    let seconds = time as f64 / 1e9;
    VisionPacket::Detection(DetectionFrame {
        camera_id,
        t_capture: seconds,
        t_sent: seconds,
        balls,
        robots_yellow,
        robots_blue: vec![],
    })
}

fn feed(tracker: &mut Tracker, packet: VisionPacket, time: Nanos) {
    tracker.queue_packet(packet, time, "test-vision");
    tracker.process(time);
}

/// Ground projection of a flying ball as seen by a camera.
fn project(ball: (f64, f64, f64), cam: (f64, f64, f64)) -> Vector2<f64> {
    let t = cam.2 / (cam.2 - ball.2);
    Vector2::new(cam.0 + (ball.0 - cam.0) * t, cam.1 + (ball.1 - cam.1) * t)
}

#[test]
fn rolling_ball_velocity_estimate() {
    let mut tracker = tracker();
    feed(&mut tracker, geometry(0, (0.0, 0.0, 4.0)), 999_000_000);

    let base = 1_000_000_000;
    let times_ms = [0, 16, 33, 50];
    let xs = [0.0, 0.04, 0.075, 0.105];
    for (ms, x) in times_ms.iter().zip(xs.iter()) {
        let t = base + ms * 1_000_000;
        feed(
            &mut tracker,
            detection_frame(0, t, vec![ball_detection(Vector2::new(*x, 0.0))], vec![]),
            t,
        );
    }

    let world = tracker.world_state(base + 55_000_000, true);
    let ball = world.ball.expect("ball tracked after four frames");
    assert!(
        (ball.vel.x - 2.1).abs() < 0.2,
        "expected vx close to 2.1, got {}",
        ball.vel.x
    );
    assert!(ball.vel.y.abs() < 0.1);
    assert!(ball.vel.z.abs() < 1e-6);
    assert!(!ball.is_bouncing);
    assert_eq!(ball.raw.len(), 4);
}

#[test]
fn chip_kick_reconstruction_and_touchdown() {
    let cam = (0.0, 0.0, 4.0);
    let mut tracker = tracker();
    feed(&mut tracker, geometry(0, cam), 999_000_000);

    let base: Nanos = 1_000_000_000;
    let dt: Nanos = 16_666_666;
    let robot_pos = Vector2::new(0.0, 0.0);
    let dribbler = Vector2::new(0.08, 0.0);

    // ball resting at the dribbler
    let mut t = base;
    for _ in 0..4 {
        feed(
            &mut tracker,
            detection_frame(
                0,
                t,
                vec![ball_detection(dribbler)],
                vec![robot_detection(0, robot_pos, 0.0)],
            ),
            t,
        );
        t += dt;
    }

    // the chip command goes out just before the kick
    let mut command = RadioCommand::halt(RobotId::new(TeamColor::Yellow, 0));
    command.kick_style = Some(KickStyle::Chip);
    command.kick_power = 0.8;
    tracker.queue_radio_commands(&[command], t - 5_000_000);

    // flight: vx = 2 m/s, vz = 3 m/s from the dribbler
    let kick_time = t;
    let mut last_time = t;
    for _ in 0..14 {
        let flight_t = (t - kick_time) as f64 / 1e9;
        let ball = (
            dribbler.x + 2.0 * flight_t,
            0.0,
            3.0 * flight_t - 0.5 * GRAVITY * flight_t * flight_t,
        );
        let observed = project(ball, cam);
        feed(
            &mut tracker,
            detection_frame(
                0,
                t,
                vec![ball_detection(observed)],
                vec![robot_detection(0, robot_pos, 0.0)],
            ),
            t,
        );
        last_time = t;
        t += dt;
    }

    let world = tracker.world_state(last_time + 1_000_000, true);
    let ball = world.ball.expect("ball tracked through the chip");
    assert!(!ball.is_bouncing);
    let touchdown = ball
        .touchdown
        .expect("flight reconstruction predicts a touchdown");
    // flight length 2 * vz / g * vx from the dribbler
    let expected_x = 0.08 + 2.0 * 3.0 / GRAVITY * 2.0;
    assert!(
        (touchdown.x - expected_x).abs() < 0.1,
        "touchdown at {}, expected {}",
        touchdown.x,
        expected_x
    );
    assert!(touchdown.y.abs() < 0.1);
    // the ball is reported in the air with upward or downward motion
    assert!(ball.pos.z > 0.05, "ball should be airborne, z = {}", ball.pos.z);
}

#[test]
fn people_on_field_create_no_tracker() {
    let mut tracker = tracker();
    feed(&mut tracker, geometry(0, (0.0, 0.0, 4.0)), 999_000_000);

    // five detections inside a 0.5 m disc: a person's shoes, not a ball
    let t = 1_000_000_000;
    let cluster: Vec<BallDetection> = (0..5)
        .map(|i| ball_detection(Vector2::new(1.0 + 0.05 * f64::from(i), 0.5)))
        .collect();
    feed(&mut tracker, detection_frame(0, t, cluster, vec![]), t);

    let world = tracker.world_state(t + 10_000_000, true);
    assert!(world.ball.is_none());

    // a lone detection afterwards is tracked normally
    for i in 1..=4 {
        let t2 = t + i * 16_000_000;
        feed(
            &mut tracker,
            detection_frame(0, t2, vec![ball_detection(Vector2::new(-1.0, -1.0))], vec![]),
            t2,
        );
    }
    let world = tracker.world_state(t + 70_000_000, true);
    let ball = world.ball.expect("single ball is tracked");
    assert!((ball.pos.x - -1.0).abs() < 0.01);
}

#[test]
fn ball_camera_handover_keeps_track() {
    let mut tracker = tracker();
    feed(&mut tracker, geometry(0, (-1.0, 0.0, 3.0)), 998_000_000);
    feed(&mut tracker, geometry(1, (1.0, 0.0, 3.0)), 999_000_000);

    let base: Nanos = 1_000_000_000;
    let dt: Nanos = 16_000_000;
    // ball rolls from -0.5 to beyond the midline at 1 m/s
    let mut last_world_x = None;
    for i in 0..64 {
        let t = base + i * dt;
        let x = -0.5 + (t - base) as f64 / 1e9;
        let camera_id = if x < 0.0 { 0 } else { 1 };
        feed(
            &mut tracker,
            detection_frame(camera_id, t, vec![ball_detection(Vector2::new(x, 0.0))], vec![]),
            t,
        );

        let world = tracker.world_state(t + 1_000_000, true);
        if let Some(ball) = world.ball {
            if let Some(prev) = last_world_x {
                let jump: f64 = ball.pos.x - prev;
                assert!(
                    jump.abs() < 0.1,
                    "handover must not jump, frame {i}: {prev} -> {}",
                    ball.pos.x
                );
            }
            last_world_x = Some(ball.pos.x);
        }
    }

    // well after the handover the reported ball is fed by camera 1
    let t_end = base + 64 * dt;
    let x_end = -0.5 + (t_end - base) as f64 / 1e9;
    feed(
        &mut tracker,
        detection_frame(1, t_end, vec![ball_detection(Vector2::new(x_end, 0.0))], vec![]),
        t_end,
    );
    let world = tracker.world_state(t_end + 1_000_000, true);
    let ball = world.ball.expect("ball still tracked after handover");
    assert!(
        ball.raw.iter().any(|raw| raw.camera_id == 1),
        "raw echo should contain camera 1 measurements"
    );
}

#[test]
fn robot_camera_switch_has_no_velocity_spike() {
    let mut tracker = tracker();

    let base: Nanos = 1_000_000_000;
    let dt: Nanos = 16_000_000;
    let mut speeds = Vec::new();
    for i in 0..26 {
        let t = base + i * dt;
        let x = (t - base) as f64 / 1e9; // 1 m/s along +x
        // camera 0 for the first 100 ms, camera 1 afterwards
        let camera_id = if i < 7 { 0 } else { 1 };
        feed(
            &mut tracker,
            detection_frame(
                camera_id,
                t,
                vec![],
                vec![robot_detection(2, Vector2::new(x, 0.0), 0.0)],
            ),
            t,
        );

        let world = tracker.world_state(t + 1_000_000, true);
        if i >= 5 {
            if let Some(robot) = world.yellow.first() {
                speeds.push(robot.vel.norm());
            }
        }
    }

    assert!(speeds.len() > 10, "robot must be reported through the switch");
    for pair in speeds.windows(2) {
        assert!(
            (pair[1] - pair[0]).abs() < 0.3,
            "velocity spike across camera switch: {} -> {}",
            pair[0],
            pair[1]
        );
    }
    let final_speed = *speeds.last().unwrap();
    assert!(
        (final_speed - 1.0).abs() < 0.3,
        "expected ~1 m/s, got {final_speed}"
    );
}

#[test]
fn area_of_interest_drops_outside_detections() {
    let mut tracker = tracker();
    feed(&mut tracker, geometry(0, (0.0, 0.0, 4.0)), 999_000_000);

    tracker.handle_command(
        &TrackingCommand {
            aoi_enabled: Some(true),
            aoi: Some(pitch_types::AreaOfInterest {
                x1: -1.0,
                y1: -1.0,
                x2: 1.0,
                y2: 1.0,
            }),
            ..TrackingCommand::default()
        },
        999_500_000,
    );

    let base = 1_000_000_000;
    for i in 0..4 {
        let t = base + i * 16_000_000;
        feed(
            &mut tracker,
            detection_frame(
                0,
                t,
                vec![ball_detection(Vector2::new(2.0, 0.0))],
                vec![robot_detection(1, Vector2::new(3.0, 0.0), 0.0)],
            ),
            t,
        );
    }

    let world = tracker.world_state(base + 70_000_000, true);
    assert!(world.ball.is_none(), "ball outside the AOI must be ignored");
    assert!(world.yellow.is_empty(), "robot outside the AOI must be ignored");
    assert_eq!(world.aoi.map(|a| a.x2), Some(1.0));
}

#[test]
fn slow_vision_frames_raise_a_warning() {
    let mut tracker = tracker();

    let base: Nanos = 1_000_000_000;
    let mut warned = false;
    for i in 0..130 {
        let t = base + i * 16_000_000;
        let seconds = t as f64 / 1e9;
        // 50 ms processing latency on every frame
        tracker.queue_packet(
            VisionPacket::Detection(DetectionFrame {
                camera_id: 0,
                t_capture: seconds - 0.05,
                t_sent: seconds,
                balls: vec![],
                robots_yellow: vec![],
                robots_blue: vec![],
            }),
            t,
            "test-vision",
        );
        tracker.process(t);
        let world = tracker.world_state(t + 1_000_000, true);
        warned |= world
            .warnings
            .iter()
            .any(|w| w.contains("processing time"));
    }
    assert!(warned, "persistent slow vision must produce a warning");
}

#[test]
fn duplicate_geometry_sender_warns_once_per_change() {
    let mut tracker = tracker();
    tracker.queue_packet(geometry(2, (0.0, 0.0, 4.0)), 1_000_000_000, "vision-a");
    tracker.process(1_000_000_000);
    tracker.queue_packet(geometry(2, (0.0, 0.0, 4.0)), 1_100_000_000, "vision-b");
    tracker.process(1_100_000_000);

    let world = tracker.world_state(1_200_000_000, true);
    assert!(
        world
            .warnings
            .iter()
            .any(|w| w.contains("two different vision sources")),
        "conflicting senders for one camera must warn"
    );
}

#[test]
fn reset_command_drops_all_tracking_state() {
    let mut tracker = tracker();
    feed(&mut tracker, geometry(0, (0.0, 0.0, 4.0)), 999_000_000);

    let base = 1_000_000_000;
    for i in 0..6 {
        let t = base + i * 16_000_000;
        feed(
            &mut tracker,
            detection_frame(
                0,
                t,
                vec![ball_detection(Vector2::new(0.5, 0.5))],
                vec![robot_detection(4, Vector2::new(-0.5, 0.0), 0.0)],
            ),
            t,
        );
    }
    let world = tracker.world_state(base + 100_000_000, true);
    assert!(world.ball.is_some());
    assert_eq!(world.yellow.len(), 1);

    tracker.handle_command(
        &TrackingCommand {
            reset: true,
            ..TrackingCommand::default()
        },
        base + 110_000_000,
    );
    // the next newer frame triggers the delayed reset and is itself dropped
    let t = base + 200_000_000;
    feed(
        &mut tracker,
        detection_frame(0, t, vec![ball_detection(Vector2::new(0.5, 0.5))], vec![]),
        t,
    );

    let world = tracker.world_state(t + 10_000_000, true);
    assert!(world.ball.is_none(), "reset must drop ball tracking");
    assert!(world.yellow.is_empty(), "reset must drop robot tracking");
}

#[test]
fn robots_only_mode_ignores_balls() {
    let mut tracker = Tracker::new(
        test_config(),
        TrackerMode {
            robots_only: true,
            speed_tracker: true,
        },
    );
    feed(&mut tracker, geometry(0, (0.0, 0.0, 4.0)), 999_000_000);

    let base = 1_000_000_000;
    for i in 0..6 {
        let t = base + i * 16_000_000;
        feed(
            &mut tracker,
            detection_frame(
                0,
                t,
                vec![ball_detection(Vector2::new(0.5, 0.5))],
                vec![robot_detection(9, Vector2::new(0.0, 1.0), 1.0)],
            ),
            t,
        );
    }

    let world = tracker.world_state(base + 90_000_000, true);
    assert!(world.ball.is_none(), "robots-only tracker must not track balls");
    assert_eq!(world.yellow.len(), 1);
    let robot = &world.yellow[0];
    assert_eq!(robot.id, RobotId::new(TeamColor::Yellow, 9));
    assert!((robot.phi - 1.0).abs() < 0.05);
}

#[test]
fn stale_frames_are_dropped_per_camera() {
    let mut tracker = tracker();
    feed(&mut tracker, geometry(0, (0.0, 0.0, 4.0)), 999_000_000);

    let base = 1_000_000_000;
    // normal frame, then one whose source time lies in the past
    feed(
        &mut tracker,
        detection_frame(0, base, vec![ball_detection(Vector2::new(0.0, 0.0))], vec![]),
        base,
    );
    for _ in 0..4 {
        feed(
            &mut tracker,
            detection_frame(
                0,
                base - 1_000_000,
                vec![ball_detection(Vector2::new(1.0, 1.0))],
                vec![],
            ),
            // receive time before the first frame: dropped as stale
            base - 1_000_000,
        );
    }

    let world = tracker.world_state(base + 30_000_000, true);
    match world.ball {
        // either nothing credible yet, or the original detection only
        Some(ball) => assert_eq!(ball.raw.len(), 1),
        None => {}
    }
}
