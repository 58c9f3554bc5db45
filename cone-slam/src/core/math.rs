//! Angle arithmetic shared by every layer.

use std::f64::consts::PI;

/// Degrees to radians.
pub const DEG_TO_RAD: f64 = PI / 180.0;

/// Radians to degrees.
pub const RAD_TO_DEG: f64 = 180.0 / PI;

/// Normalize angle to (-π, π].
///
/// # Example
/// ```
/// use cone_slam::core::math::normalize_angle;
/// use std::f64::consts::PI;
///
/// assert!((normalize_angle(2.5 * PI) - 0.5 * PI).abs() < 1e-9);
/// assert!((normalize_angle(-0.5 * PI) + 0.5 * PI).abs() < 1e-9);
/// ```
#[inline]
pub fn normalize_angle(angle: f64) -> f64 {
    let mut a = angle % (2.0 * PI);
    if a > PI {
        a -= 2.0 * PI;
    } else if a <= -PI {
        a += 2.0 * PI;
    }
    a
}

/// Shortest signed angle that takes `a` to `b`.
///
/// # Example
/// ```
/// use cone_slam::core::math::angle_diff;
/// use std::f64::consts::PI;
///
/// let diff = angle_diff(PI - 0.1, -PI + 0.1);
/// assert!((diff - 0.2).abs() < 1e-9);
/// ```
#[inline]
pub fn angle_diff(a: f64, b: f64) -> f64 {
    normalize_angle(b - a)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_normalize_angle_zero() {
        assert_relative_eq!(normalize_angle(0.0), 0.0);
    }

    #[test]
    fn test_normalize_angle_pi_boundary() {
        assert_relative_eq!(normalize_angle(PI), PI);
        assert_relative_eq!(normalize_angle(-PI), PI, epsilon = 1e-12);
    }

    #[test]
    fn test_normalize_angle_wraps() {
        assert_relative_eq!(normalize_angle(2.0 * PI), 0.0, epsilon = 1e-12);
        assert_relative_eq!(normalize_angle(2.5 * PI), 0.5 * PI, epsilon = 1e-12);
        assert_relative_eq!(normalize_angle(-2.5 * PI), -0.5 * PI, epsilon = 1e-12);
    }

    #[test]
    fn test_angle_diff_short_way() {
        assert_relative_eq!(angle_diff(0.0, PI / 2.0), PI / 2.0, epsilon = 1e-12);
        assert_relative_eq!(angle_diff(PI / 2.0, 0.0), -PI / 2.0, epsilon = 1e-12);
        assert_relative_eq!(angle_diff(-PI + 0.1, PI - 0.1), -0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_degree_conversion() {
        assert_relative_eq!(90.0 * DEG_TO_RAD, PI / 2.0);
        assert_relative_eq!(PI * RAD_TO_DEG, 180.0);
    }
}
