//! Pose and point types for planar SLAM.

use serde::{Deserialize, Serialize};

use crate::core::math::normalize_angle;

/// A 2D point in meters.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2D {
    /// X coordinate in meters
    pub x: f64,
    /// Y coordinate in meters
    pub y: f64,
}

impl Point2D {
    /// Create a new point.
    #[inline]
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Squared distance to another point (avoids sqrt).
    #[inline]
    pub fn distance_squared(&self, other: &Point2D) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    /// Distance to another point.
    #[inline]
    pub fn distance(&self, other: &Point2D) -> f64 {
        self.distance_squared(other).sqrt()
    }

    /// Distance from the origin.
    #[inline]
    pub fn norm(&self) -> f64 {
        self.x.hypot(self.y)
    }
}

/// Vehicle pose in the plane.
///
/// Position (x, y) in meters and heading (theta) in radians, normalized
/// to (-π, π].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose2D {
    /// X position in meters
    pub x: f64,
    /// Y position in meters
    pub y: f64,
    /// Heading in radians
    pub theta: f64,
}

impl Default for Pose2D {
    fn default() -> Self {
        Self::identity()
    }
}

impl Pose2D {
    /// Create a new pose with theta normalized.
    #[inline]
    pub fn new(x: f64, y: f64, theta: f64) -> Self {
        Self {
            x,
            y,
            theta: normalize_angle(theta),
        }
    }

    /// Identity pose at origin with zero heading.
    #[inline]
    pub fn identity() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            theta: 0.0,
        }
    }

    /// Position part of the pose.
    #[inline]
    pub fn position(&self) -> Point2D {
        Point2D::new(self.x, self.y)
    }

    /// Compose two poses: self ⊕ other
    ///
    /// ```text
    /// C = A ⊕ B:
    ///   C.x = A.x + B.x * cos(A.θ) - B.y * sin(A.θ)
    ///   C.y = A.y + B.x * sin(A.θ) + B.y * cos(A.θ)
    ///   C.θ = normalize(A.θ + B.θ)
    /// ```
    #[inline]
    pub fn compose(&self, other: &Pose2D) -> Pose2D {
        let (sin_t, cos_t) = self.theta.sin_cos();
        Pose2D::new(
            self.x + other.x * cos_t - other.y * sin_t,
            self.y + other.x * sin_t + other.y * cos_t,
            self.theta + other.theta,
        )
    }

    /// Inverse of this pose.
    #[inline]
    pub fn inverse(&self) -> Pose2D {
        let (sin_t, cos_t) = self.theta.sin_cos();
        Pose2D::new(
            -self.x * cos_t - self.y * sin_t,
            self.x * sin_t - self.y * cos_t,
            -self.theta,
        )
    }

    /// Transform `other` expressed globally into this pose's frame: self⁻¹ ⊕ other.
    #[inline]
    pub fn relative_to(&self, other: &Pose2D) -> Pose2D {
        self.inverse().compose(other)
    }

    /// Transform a point from local frame to global frame.
    #[inline]
    pub fn transform_point(&self, point: &Point2D) -> Point2D {
        let (sin_t, cos_t) = self.theta.sin_cos();
        Point2D::new(
            self.x + point.x * cos_t - point.y * sin_t,
            self.y + point.x * sin_t + point.y * cos_t,
        )
    }

    /// Transform a point from global frame to local frame.
    #[inline]
    pub fn inverse_transform_point(&self, point: &Point2D) -> Point2D {
        let (sin_t, cos_t) = self.theta.sin_cos();
        let dx = point.x - self.x;
        let dy = point.y - self.y;
        Point2D::new(dx * cos_t + dy * sin_t, -dx * sin_t + dy * cos_t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::{FRAC_PI_2, PI};

    #[test]
    fn test_point_distance() {
        let a = Point2D::new(0.0, 0.0);
        let b = Point2D::new(3.0, 4.0);
        assert_relative_eq!(a.distance(&b), 5.0);
        assert_relative_eq!(a.distance_squared(&b), 25.0);
        assert_relative_eq!(b.norm(), 5.0);
    }

    #[test]
    fn test_pose_normalizes_heading() {
        let p = Pose2D::new(1.0, 2.0, 2.5 * PI);
        assert_relative_eq!(p.theta, FRAC_PI_2, epsilon = 1e-12);
    }

    #[test]
    fn test_compose_with_identity() {
        let p = Pose2D::new(1.0, -2.0, 0.3);
        let c = p.compose(&Pose2D::identity());
        assert_relative_eq!(c.x, p.x);
        assert_relative_eq!(c.y, p.y);
        assert_relative_eq!(c.theta, p.theta);
    }

    #[test]
    fn test_compose_rotated() {
        let a = Pose2D::new(1.0, 0.0, FRAC_PI_2);
        let b = Pose2D::new(1.0, 0.0, 0.0);
        let c = a.compose(&b);
        assert_relative_eq!(c.x, 1.0, epsilon = 1e-12);
        assert_relative_eq!(c.y, 1.0, epsilon = 1e-12);
        assert_relative_eq!(c.theta, FRAC_PI_2, epsilon = 1e-12);
    }

    #[test]
    fn test_inverse_composes_to_identity() {
        let p = Pose2D::new(3.0, -1.5, 1.2);
        let id = p.compose(&p.inverse());
        assert_relative_eq!(id.x, 0.0, epsilon = 1e-12);
        assert_relative_eq!(id.y, 0.0, epsilon = 1e-12);
        assert_relative_eq!(id.theta, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_relative_to_recovers_delta() {
        let a = Pose2D::new(2.0, 1.0, 0.7);
        let delta = Pose2D::new(0.5, -0.2, 0.1);
        let b = a.compose(&delta);
        let r = a.relative_to(&b);
        assert_relative_eq!(r.x, delta.x, epsilon = 1e-12);
        assert_relative_eq!(r.y, delta.y, epsilon = 1e-12);
        assert_relative_eq!(r.theta, delta.theta, epsilon = 1e-12);
    }

    #[test]
    fn test_point_transform_round_trip() {
        let pose = Pose2D::new(5.0, -3.0, -2.0);
        let local = Point2D::new(1.5, 0.25);
        let global = pose.transform_point(&local);
        let back = pose.inverse_transform_point(&global);
        assert_relative_eq!(back.x, local.x, epsilon = 1e-12);
        assert_relative_eq!(back.y, local.y, epsilon = 1e-12);
    }
}
