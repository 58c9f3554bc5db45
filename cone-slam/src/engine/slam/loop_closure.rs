//! Loop-closure acceptance from accumulated localization corrections.
//!
//! Every time the localizer moves the pose away from the odometry
//! prediction, the deviation is summed. When the vehicle re-observes a cone
//! created many keyframes ago and the mean deviation is large, the map has
//! drifted and a full optimization is due.
//!
//! While a closure is running, matching against the map is suspended; the
//! caller parks its frames and replays them after [`LoopClosureMonitor::complete`].

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::core::math::angle_diff;
use crate::core::types::Pose2D;

/// Configuration for loop-closure acceptance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopClosureConfig {
    /// A revisit needs a cone first seen at least this many keyframes ago.
    #[serde(default = "default_min_loop_poses")]
    pub min_loop_poses: usize,

    /// Mean positional correction that triggers a closure (meters).
    #[serde(default = "default_error_threshold")]
    pub error_threshold: f64,

    /// Mean heading correction that triggers a closure (radians).
    #[serde(default = "default_heading_error_threshold")]
    pub heading_error_threshold: f64,

    /// Corrections needed before the mean is trusted.
    #[serde(default = "default_min_error_samples")]
    pub min_error_samples: u32,
}

fn default_min_loop_poses() -> usize {
    10
}

fn default_error_threshold() -> f64 {
    0.3
}

fn default_heading_error_threshold() -> f64 {
    0.1
}

fn default_min_error_samples() -> u32 {
    3
}

impl Default for LoopClosureConfig {
    fn default() -> Self {
        Self {
            min_loop_poses: default_min_loop_poses(),
            error_threshold: default_error_threshold(),
            heading_error_threshold: default_heading_error_threshold(),
            min_error_samples: default_min_error_samples(),
        }
    }
}

/// Running correction statistics and closure state.
#[derive(Debug, Clone)]
pub struct LoopClosureMonitor {
    config: LoopClosureConfig,
    x_error: f64,
    y_error: f64,
    heading_error: f64,
    error_counter: u32,
    loop_closing: bool,
    loop_closing_complete: bool,
    closures: u32,
}

impl LoopClosureMonitor {
    pub fn new(config: LoopClosureConfig) -> Self {
        Self {
            config,
            x_error: 0.0,
            y_error: 0.0,
            heading_error: 0.0,
            error_counter: 0,
            loop_closing: false,
            loop_closing_complete: false,
            closures: 0,
        }
    }

    /// Add the deviation of a localized pose from its prediction.
    pub fn record_correction(&mut self, predicted: &Pose2D, corrected: &Pose2D) {
        self.x_error += corrected.x - predicted.x;
        self.y_error += corrected.y - predicted.y;
        self.heading_error += angle_diff(predicted.theta, corrected.theta);
        self.error_counter += 1;
    }

    /// Mean `(x, y, heading)` correction since the last reset.
    pub fn mean_error(&self) -> (f64, f64, f64) {
        if self.error_counter == 0 {
            return (0.0, 0.0, 0.0);
        }
        let n = self.error_counter as f64;
        (self.x_error / n, self.y_error / n, self.heading_error / n)
    }

    /// Decide whether to start a loop closure.
    ///
    /// `revisit_gap` is the largest number of keyframes between the current
    /// keyframe and the creation of any cone it matched.
    pub fn check_offset(&mut self, revisit_gap: Option<usize>) -> bool {
        if self.loop_closing {
            return false;
        }
        let Some(gap) = revisit_gap else {
            return false;
        };
        if gap < self.config.min_loop_poses || self.error_counter < self.config.min_error_samples {
            return false;
        }

        let (x, y, heading) = self.mean_error();
        let position_error = x.hypot(y);
        debug!(
            "Revisit after {} keyframes, mean correction {:.3} m / {:.3} rad over {} samples",
            gap, position_error, heading, self.error_counter
        );
        if position_error <= self.config.error_threshold
            && heading.abs() <= self.config.heading_error_threshold
        {
            return false;
        }

        info!(
            "Loop closure accepted: gap {} keyframes, drift {:.3} m / {:.3} rad",
            gap, position_error, heading
        );
        self.loop_closing = true;
        self.loop_closing_complete = false;
        self.closures += 1;
        self.reset_errors();
        true
    }

    /// Mark the running closure as finished.
    pub fn complete(&mut self) {
        self.loop_closing = false;
        self.loop_closing_complete = true;
    }

    /// A closure was accepted and has not completed yet.
    pub fn is_closing(&self) -> bool {
        self.loop_closing && !self.loop_closing_complete
    }

    /// At least one closure has completed.
    pub fn has_completed(&self) -> bool {
        self.loop_closing_complete
    }

    pub fn closures(&self) -> u32 {
        self.closures
    }

    fn reset_errors(&mut self) {
        self.x_error = 0.0;
        self.y_error = 0.0;
        self.heading_error = 0.0;
        self.error_counter = 0;
    }
}
