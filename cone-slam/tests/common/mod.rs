//! Synthetic square track shared by the integration tests.
//!
//! A 20 m square driven counter-clockwise in 1 m steps, lined with an inner
//! ring of left cones and an outer ring of right cones 2 m from the center
//! line. The sensor sees cones ahead of the vehicle within 12 m.

#![allow(dead_code)]

use std::f64::consts::{FRAC_PI_2, PI};

use crossbeam_channel::{Receiver, bounded};

use cone_slam::engine::slam::Observation;
use cone_slam::{ConeClass, Point2D, Pose2D, Slam, SlamConfig, SlamEvent};

pub const SEC: u64 = 1_000_000;
pub const SIDE: f64 = 20.0;
pub const SENSOR_RANGE: f64 = 12.0;

pub fn test_config() -> SlamConfig {
    let mut config = SlamConfig::default();
    config.session.cid = 111;
    config.reference.latitude = 57.7;
    config.reference.longitude = 11.9;
    config.persistence.output_dir = None;
    config
}

pub fn new_slam(config: SlamConfig) -> (Slam, Receiver<SlamEvent>) {
    let (tx, rx) = bounded(1024);
    (Slam::new(config, tx), rx)
}

/// Cone positions with their class.
pub fn square_track() -> Vec<(Point2D, ConeClass)> {
    let mut cones = Vec::new();
    for t in [2.0, 6.0, 10.0, 14.0] {
        let inner = [
            (t, 2.0),
            (SIDE - 2.0, t),
            (SIDE - t, SIDE - 2.0),
            (2.0, SIDE - t),
        ];
        let outer = [
            (t, -2.0),
            (SIDE + 2.0, t),
            (SIDE - t, SIDE + 2.0),
            (-2.0, SIDE - t),
        ];
        cones.extend(inner.map(|(x, y)| (Point2D::new(x, y), ConeClass::Left)));
        cones.extend(outer.map(|(x, y)| (Point2D::new(x, y), ConeClass::Right)));
    }
    cones
}

/// Ground-truth keyframe poses; step `i` is `i` meters along the loop.
pub fn square_path(steps: usize) -> Vec<Pose2D> {
    let side = SIDE as usize;
    (0..steps)
        .map(|i| {
            let s = i % (4 * side);
            let t = (s % side) as f64;
            match s / side {
                0 => Pose2D::new(t, 0.0, 0.0),
                1 => Pose2D::new(SIDE, t, FRAC_PI_2),
                2 => Pose2D::new(SIDE - t, SIDE, PI),
                _ => Pose2D::new(0.0, SIDE - t, -FRAC_PI_2),
            }
        })
        .collect()
}

/// Noise-free observations from `truth` and the indices of the seen cones.
pub fn observe(truth: &Pose2D, track: &[(Point2D, ConeClass)]) -> (Vec<Observation>, Vec<usize>) {
    let mut observations = Vec::new();
    let mut seen = Vec::new();
    for (i, (cone, class)) in track.iter().enumerate() {
        let local = truth.inverse_transform_point(cone);
        if local.x > 0.5 && local.norm() < SENSOR_RANGE {
            observations.push(Observation::new(local, *class));
            seen.push(i);
        }
    }
    (observations, seen)
}

/// Odometry with zero-mean errors that do not accumulate.
pub fn jittered_odometry(truth: &[Pose2D]) -> Vec<Pose2D> {
    truth
        .iter()
        .enumerate()
        .map(|(i, pose)| {
            let s = match i {
                0 => 0.0,
                i if i % 2 == 0 => 1.0,
                _ => -1.0,
            };
            pose.compose(&Pose2D::new(0.03 * s, 0.02 * s, 0.005 * s))
        })
        .collect()
}

/// Odometry with a constant per-step bias, accumulating drift.
pub fn biased_odometry(truth: &[Pose2D], bias: Pose2D) -> Vec<Pose2D> {
    let mut odometry: Vec<Pose2D> = Vec::with_capacity(truth.len());
    for (i, pose) in truth.iter().enumerate() {
        let next = match odometry.last() {
            None => *pose,
            Some(last) => last.compose(&truth[i - 1].relative_to(pose)).compose(&bias),
        };
        odometry.push(next);
    }
    odometry
}

/// Distance from `point` to the nearest track cone.
pub fn nearest_truth(point: &Point2D, track: &[(Point2D, ConeClass)]) -> f64 {
    track
        .iter()
        .map(|(cone, _)| cone.distance(point))
        .fold(f64::INFINITY, f64::min)
}
