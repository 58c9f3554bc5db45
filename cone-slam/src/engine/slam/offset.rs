//! Offset lock-in between the localization frame and the SLAM frame.
//!
//! The localization pipeline reports geodetic fixes. They are projected onto
//! a tangent plane at the configured reference position, and the first
//! complete fix becomes the SLAM origin:
//!
//! ```text
//!   offset  = first fix (x0, y0, h0)
//!   heading = raw_heading − h0
//!   position = R(−h0) · (raw − (x0, y0))       i.e. offset⁻¹ ∘ raw
//! ```
//!
//! The offset is never recomputed once locked.

use log::{debug, info};

use crate::core::geodetic::GeodeticReference;
use crate::core::types::Pose2D;

/// A geodetic fix. Any missing part makes it incomplete.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GeoFix {
    /// Degrees.
    pub latitude: Option<f64>,
    /// Degrees.
    pub longitude: Option<f64>,
    /// Radians, counter-clockwise from east.
    pub heading: Option<f64>,
}

impl GeoFix {
    pub fn new(latitude: f64, longitude: f64, heading: f64) -> Self {
        let finite = |v: f64| v.is_finite().then_some(v);
        Self {
            latitude: finite(latitude),
            longitude: finite(longitude),
            heading: finite(heading),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some() && self.heading.is_some()
    }
}

/// Builds fixes from separately delivered position and heading readings.
#[derive(Debug, Clone, Copy, Default)]
pub struct SplitPoseAssembler {
    position: Option<(f64, f64)>,
    heading: Option<f64>,
}

impl SplitPoseAssembler {
    pub fn update_position(&mut self, latitude: f64, longitude: f64) {
        if latitude.is_finite() && longitude.is_finite() {
            self.position = Some((latitude, longitude));
        }
    }

    pub fn update_heading(&mut self, heading: f64) {
        if heading.is_finite() {
            self.heading = Some(heading);
        }
    }

    /// Latest position and heading combined.
    pub fn fix(&self) -> GeoFix {
        GeoFix {
            latitude: self.position.map(|p| p.0),
            longitude: self.position.map(|p| p.1),
            heading: self.heading,
        }
    }
}

/// One-time calibration of the SLAM frame.
#[derive(Debug, Clone)]
pub struct OffsetCalibration {
    reference: GeodeticReference,
    offset: Option<Pose2D>,
}

impl OffsetCalibration {
    pub fn new(reference: GeodeticReference) -> Self {
        Self {
            reference,
            offset: None,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.offset.is_some()
    }

    /// The locked offset in the localization frame.
    pub fn offset(&self) -> Option<Pose2D> {
        self.offset
    }

    /// Project a fix onto the reference tangent plane.
    pub fn project(&self, fix: &GeoFix) -> Option<Pose2D> {
        let local = self.reference.to_local(fix.latitude?, fix.longitude?);
        Some(Pose2D::new(local.x, local.y, fix.heading?))
    }

    /// Lock the offset from `fix` unless already locked.
    ///
    /// Returns whether the calibration is locked afterwards. Incomplete
    /// fixes are skipped so the next one can retry.
    pub fn lock_in(&mut self, fix: &GeoFix) -> bool {
        if self.offset.is_some() {
            return true;
        }
        let Some(pose) = self.project(fix) else {
            debug!("Offset lock-in skipped, incomplete fix {:?}", fix);
            return false;
        };
        info!(
            "SLAM frame locked at ({:.3}, {:.3}, {:.3} rad)",
            pose.x, pose.y, pose.theta
        );
        self.offset = Some(pose);
        true
    }

    /// Map a fix into the SLAM frame.
    pub fn apply(&self, fix: &GeoFix) -> Option<Pose2D> {
        self.correct(&self.project(fix)?)
    }

    /// Map a projected localization-frame pose into the SLAM frame.
    pub fn correct(&self, raw: &Pose2D) -> Option<Pose2D> {
        Some(self.offset?.relative_to(raw))
    }

    /// Map a SLAM-frame pose back into the localization frame.
    pub fn to_external(&self, pose: &Pose2D) -> Option<Pose2D> {
        Some(self.offset?.compose(pose))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    const LAT: f64 = 57.7;
    const LON: f64 = 11.9;

    fn calibration() -> OffsetCalibration {
        OffsetCalibration::new(GeodeticReference::new(LAT, LON))
    }

    #[test]
    fn test_first_fix_becomes_origin() {
        let mut cal = calibration();
        let fix = GeoFix::new(LAT + 0.0001, LON + 0.0002, FRAC_PI_2);
        assert!(cal.lock_in(&fix));

        let pose = cal.apply(&fix).unwrap();
        assert_relative_eq!(pose.x, 0.0, epsilon = 1e-9);
        assert_relative_eq!(pose.y, 0.0, epsilon = 1e-9);
        assert_relative_eq!(pose.theta, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_lock_in_is_idempotent() {
        let mut cal = calibration();
        let first = GeoFix::new(LAT, LON, 0.4);
        assert!(cal.lock_in(&first));
        let locked = cal.offset().unwrap();

        assert!(cal.lock_in(&first));
        assert!(cal.lock_in(&GeoFix::new(LAT + 0.01, LON, 1.0)));
        assert_eq!(cal.offset().unwrap(), locked);
    }

    #[test]
    fn test_incomplete_fix_is_retried() {
        let mut cal = calibration();
        assert!(!cal.lock_in(&GeoFix::new(LAT, LON, f64::NAN)));
        assert!(!cal.is_locked());
        assert!(cal.apply(&GeoFix::new(LAT, LON, 0.0)).is_none());

        assert!(cal.lock_in(&GeoFix::new(LAT, LON, 0.0)));
        assert!(cal.is_locked());
    }

    #[test]
    fn test_apply_rotates_into_start_heading() {
        let mut cal = calibration();
        // Start facing north: the SLAM +x axis points north.
        cal.lock_in(&GeoFix::new(LAT, LON, FRAC_PI_2));

        let raw = Pose2D::new(0.0, 10.0, FRAC_PI_2);
        let pose = cal.correct(&raw).unwrap();
        assert_relative_eq!(pose.x, 10.0, epsilon = 1e-9);
        assert_relative_eq!(pose.y, 0.0, epsilon = 1e-9);
        assert_relative_eq!(pose.theta, 0.0, epsilon = 1e-12);

        let back = cal.to_external(&pose).unwrap();
        assert_relative_eq!(back.x, raw.x, epsilon = 1e-9);
        assert_relative_eq!(back.y, raw.y, epsilon = 1e-9);
        assert_relative_eq!(back.theta, raw.theta, epsilon = 1e-12);
    }

    #[test]
    fn test_split_pose_needs_both_parts() {
        let mut split = SplitPoseAssembler::default();
        split.update_heading(0.2);
        assert!(!split.fix().is_complete());

        split.update_position(LAT, LON);
        let fix = split.fix();
        assert!(fix.is_complete());
        assert_eq!(fix.heading, Some(0.2));
    }
}
