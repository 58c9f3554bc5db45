//! Cone frame collector.
//!
//! The perception pipeline sends every detected cone as three separate
//! messages (direction, distance, type) keyed by an object id. The collector
//! buckets those parts by sample time and hands out a frame once every
//! object in the bucket is complete.
//!
//! ```text
//!   part(t0, id 1, dir) ─┐
//!   part(t0, id 1, dist) ├─▶ bucket [t0, t0 + window] ──tick(quiet ≥ gathering)──▶ frame
//!   part(t0, id 1, type) ┘                    │
//!   part(t1 > t0 + window) ───────────────────┴──▶ timeout flush, new bucket
//! ```
//!
//! A timeout flush emits the complete objects and drops the incomplete ones
//! with a warning. Nothing else discards parts.

use std::collections::BTreeMap;
use std::mem;
use std::time::Duration;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::core::math::DEG_TO_RAD;
use crate::map::ConeClass;

/// Configuration for the frame collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Quiet time after the last part before a complete frame is emitted (ms).
    #[serde(default = "default_gathering_time_ms")]
    pub gathering_time_ms: u64,

    /// Width of a frame bucket in sample time, and the give-up timeout (ms).
    #[serde(default = "default_time_diff_ms")]
    pub time_diff_ms: u64,
}

fn default_gathering_time_ms() -> u64 {
    10
}

fn default_time_diff_ms() -> u64 {
    110
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            gathering_time_ms: default_gathering_time_ms(),
            time_diff_ms: default_time_diff_ms(),
        }
    }
}

/// One of the three messages describing a detected cone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConePart {
    /// Bearing in degrees.
    Direction { azimuth_deg: f64, zenith_deg: f64 },
    /// Range in meters.
    Distance(f64),
    /// Wire classification id.
    Type(u32),
}

#[derive(Debug, Clone, Copy, Default)]
struct PartialCone {
    direction: Option<(f64, f64)>,
    distance: Option<f64>,
    type_id: Option<u32>,
}

impl PartialCone {
    fn apply(&mut self, part: ConePart) {
        match part {
            ConePart::Direction {
                azimuth_deg,
                zenith_deg,
            } => self.direction = Some((azimuth_deg, zenith_deg)),
            ConePart::Distance(d) => self.distance = Some(d),
            ConePart::Type(t) => self.type_id = Some(t),
        }
    }

    fn is_complete(&self) -> bool {
        self.direction.is_some() && self.distance.is_some() && self.type_id.is_some()
    }

    fn measurement(&self, object_id: u32) -> Option<ConeMeasurement> {
        let (azimuth_deg, zenith_deg) = self.direction?;
        Some(ConeMeasurement {
            object_id,
            azimuth: azimuth_deg * DEG_TO_RAD,
            zenith: zenith_deg * DEG_TO_RAD,
            distance: self.distance?,
            class: ConeClass::from_type_id(self.type_id?),
        })
    }
}

/// A complete cone measurement in the sensor frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConeMeasurement {
    pub object_id: u32,
    /// Radians.
    pub azimuth: f64,
    /// Radians above the ground plane.
    pub zenith: f64,
    /// Meters.
    pub distance: f64,
    pub class: ConeClass,
}

/// A frame of cone measurements sharing one sample time.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedFrame {
    /// Sample time of the first part in the bucket.
    pub timestamp_us: u64,
    /// Measurements ordered by object id.
    pub cones: Vec<ConeMeasurement>,
    /// Whether the frame was flushed by timeout.
    pub timed_out: bool,
}

/// Buckets cone parts into frames.
#[derive(Debug)]
pub struct FrameCollector {
    config: CollectorConfig,
    frame_start_us: Option<u64>,
    buffer: BTreeMap<u32, PartialCone>,
}

impl FrameCollector {
    pub fn new(config: CollectorConfig) -> Self {
        Self {
            config,
            frame_start_us: None,
            buffer: BTreeMap::new(),
        }
    }

    /// Add a part. Returns the previous frame if this part opened a new bucket.
    pub fn push(&mut self, sample_time_us: u64, object_id: u32, part: ConePart) -> Option<CompletedFrame> {
        let window_us = self.config.time_diff_ms * 1_000;
        let flushed = match self.frame_start_us {
            Some(start) if sample_time_us.abs_diff(start) > window_us => self.take_frame(true),
            _ => None,
        };

        self.frame_start_us.get_or_insert(sample_time_us);
        self.buffer.entry(object_id).or_default().apply(part);
        flushed
    }

    /// Periodic check, given how long no part has arrived.
    pub fn tick(&mut self, quiet_for: Duration) -> Option<CompletedFrame> {
        if self.buffer.is_empty() {
            return None;
        }

        let quiet_ms = quiet_for.as_millis() as u64;
        if quiet_ms >= self.config.gathering_time_ms && self.buffer.values().all(|c| c.is_complete()) {
            self.take_frame(false)
        } else if quiet_ms >= self.config.time_diff_ms {
            self.take_frame(true)
        } else {
            None
        }
    }

    /// Number of objects waiting in the current bucket.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Swap the bucket out and convert its complete objects.
    fn take_frame(&mut self, timed_out: bool) -> Option<CompletedFrame> {
        let buffer = mem::take(&mut self.buffer);
        let timestamp_us = self.frame_start_us.take()?;

        let total = buffer.len();
        let cones: Vec<ConeMeasurement> = buffer
            .iter()
            .filter_map(|(&id, partial)| partial.measurement(id))
            .collect();

        if cones.len() < total {
            warn!(
                "Frame at {} us timed out, dropping {} incomplete cones",
                timestamp_us,
                total - cones.len()
            );
        }

        if cones.is_empty() {
            return None;
        }
        Some(CompletedFrame {
            timestamp_us,
            cones,
            timed_out,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    fn full_cone(c: &mut FrameCollector, t: u64, id: u32) -> Option<CompletedFrame> {
        assert!(
            c.push(
                t,
                id,
                ConePart::Direction {
                    azimuth_deg: 90.0,
                    zenith_deg: 0.0,
                },
            )
            .is_none()
        );
        assert!(c.push(t, id, ConePart::Distance(4.0)).is_none());
        c.push(t, id, ConePart::Type(2))
    }

    #[test]
    fn test_complete_frame_emitted_after_gathering_time() {
        let mut c = FrameCollector::new(CollectorConfig::default());
        full_cone(&mut c, 1_000, 1);
        full_cone(&mut c, 1_000, 2);
        assert!(c.tick(Duration::from_millis(5)).is_none());

        let frame = c.tick(Duration::from_millis(10)).unwrap();
        assert!(!frame.timed_out);
        assert_eq!(frame.timestamp_us, 1_000);
        assert_eq!(frame.cones.len(), 2);
        assert_relative_eq!(frame.cones[0].azimuth, FRAC_PI_2, epsilon = 1e-9);
        assert_relative_eq!(frame.cones[0].distance, 4.0);
        assert_eq!(frame.cones[0].class, ConeClass::Right);
        assert_eq!(c.pending(), 0);
    }

    #[test]
    fn test_incomplete_frame_held_until_timeout() {
        let mut c = FrameCollector::new(CollectorConfig::default());
        full_cone(&mut c, 0, 1);
        c.push(0, 2, ConePart::Distance(3.0));

        assert!(c.tick(Duration::from_millis(50)).is_none());
        assert_eq!(c.pending(), 2);

        let frame = c.tick(Duration::from_millis(110)).unwrap();
        assert!(frame.timed_out);
        assert_eq!(frame.cones.len(), 1);
        assert_eq!(frame.cones[0].object_id, 1);
        assert_eq!(c.pending(), 0);
    }

    #[test]
    fn test_late_part_completes_held_object() {
        let mut c = FrameCollector::new(CollectorConfig::default());
        c.push(0, 7, ConePart::Distance(3.0));
        c.push(0, 7, ConePart::Type(1));
        assert!(c.tick(Duration::from_millis(20)).is_none());

        c.push(
            50_000,
            7,
            ConePart::Direction {
                azimuth_deg: 0.0,
                zenith_deg: 0.0,
            },
        );
        let frame = c.tick(Duration::from_millis(10)).unwrap();
        assert_eq!(frame.cones.len(), 1);
        assert_eq!(frame.cones[0].class, ConeClass::Left);
    }

    #[test]
    fn test_part_outside_window_flushes_previous_bucket() {
        let mut c = FrameCollector::new(CollectorConfig::default());
        full_cone(&mut c, 0, 1);

        let flushed = c
            .push(
                200_000,
                1,
                ConePart::Direction {
                    azimuth_deg: 10.0,
                    zenith_deg: 0.0,
                },
            )
            .unwrap();
        assert!(flushed.timed_out);
        assert_eq!(flushed.timestamp_us, 0);
        assert_eq!(flushed.cones.len(), 1);
        assert_eq!(c.pending(), 1);
    }

    #[test]
    fn test_flush_with_only_incomplete_parts_yields_nothing() {
        let mut c = FrameCollector::new(CollectorConfig::default());
        c.push(0, 1, ConePart::Distance(3.0));
        assert!(c.tick(Duration::from_millis(200)).is_none());
        assert_eq!(c.pending(), 0);
    }
}
