//! Keyframe gating.
//!
//! Not every pose becomes a graph node. A pose is committed as a keyframe
//! only after enough time has passed since the previous keyframe AND the
//! vehicle has moved or turned enough, so standing still does not grow the
//! graph.

use serde::{Deserialize, Serialize};

use crate::core::math::angle_diff;
use crate::core::types::Pose2D;

/// Configuration for keyframe gating.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyframeConfig {
    /// Minimum time between keyframes (seconds).
    #[serde(default = "default_time_between_keyframes")]
    pub time_between_keyframes: f64,

    /// Minimum translation since the last keyframe (meters).
    #[serde(default = "default_min_translation")]
    pub min_translation: f64,

    /// Minimum rotation since the last keyframe (radians).
    #[serde(default = "default_min_rotation")]
    pub min_rotation: f64,
}

fn default_time_between_keyframes() -> f64 {
    0.5
}

fn default_min_translation() -> f64 {
    0.1
}

fn default_min_rotation() -> f64 {
    0.05
}

impl Default for KeyframeConfig {
    fn default() -> Self {
        Self {
            time_between_keyframes: default_time_between_keyframes(),
            min_translation: default_min_translation(),
            min_rotation: default_min_rotation(),
        }
    }
}

/// Tracks the last committed keyframe and decides on the next one.
#[derive(Debug, Clone)]
pub struct KeyframeGate {
    config: KeyframeConfig,
    last: Option<(u64, Pose2D)>,
}

impl KeyframeGate {
    pub fn new(config: KeyframeConfig) -> Self {
        Self { config, last: None }
    }

    /// Check whether `pose` at `timestamp_us` should become a keyframe
    /// without committing it.
    pub fn should_create_keyframe(&self, timestamp_us: u64, pose: &Pose2D) -> bool {
        let Some((last_time, last_pose)) = &self.last else {
            return true;
        };

        let elapsed = timestamp_us.saturating_sub(*last_time) as f64 * 1e-6;
        if elapsed < self.config.time_between_keyframes {
            return false;
        }

        let translation = pose.position().distance(&last_pose.position());
        if translation >= self.config.min_translation {
            return true;
        }

        angle_diff(last_pose.theta, pose.theta).abs() >= self.config.min_rotation
    }

    /// Gate and, when accepted, commit `pose` as the new reference.
    pub fn is_keyframe(&mut self, timestamp_us: u64, pose: &Pose2D) -> bool {
        let accept = self.should_create_keyframe(timestamp_us, pose);
        if accept {
            self.last = Some((timestamp_us, *pose));
        }
        accept
    }

    /// Timestamp of the last keyframe.
    pub fn last_timestamp_us(&self) -> Option<u64> {
        self.last.map(|(t, _)| t)
    }
}
