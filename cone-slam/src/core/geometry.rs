//! Frame transforms between the cone sensor, the vehicle and the map.
//!
//! ```text
//!   sensor (spherical)  ──spherical_to_cartesian──▶  sensor (x, y, z)
//!   sensor (polar, ground plane) ──transform_sensor_to_vehicle──▶ vehicle
//!   vehicle ──cone_to_global(pose)──▶ map
//! ```
//!
//! All functions are pure.

use serde::{Deserialize, Serialize};

use super::types::{Point2D, Pose2D};

/// Mounting of the cone sensor relative to the vehicle reference point.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SensorMount {
    /// Forward offset in meters.
    #[serde(default)]
    pub x: f64,
    /// Leftward offset in meters.
    #[serde(default)]
    pub y: f64,
    /// Yaw of the sensor frame relative to the vehicle frame (radians).
    #[serde(default)]
    pub yaw: f64,
}

impl SensorMount {
    /// Sensor at the vehicle reference point, aligned with it.
    pub fn identity() -> Self {
        Self::default()
    }
}

/// Convert a spherical measurement to Cartesian coordinates.
///
/// Angles in radians, zenith measured from the ground plane. Negative
/// distances are treated as zero, which yields the origin.
#[inline]
pub fn spherical_to_cartesian(azimuth: f64, zenith: f64, distance: f64) -> [f64; 3] {
    let distance = distance.max(0.0);
    let (sin_az, cos_az) = azimuth.sin_cos();
    let (sin_ze, cos_ze) = zenith.sin_cos();
    let ground = distance * cos_ze;
    [ground * cos_az, ground * sin_az, distance * sin_ze]
}

/// Map a ground-plane polar measurement in the sensor frame into the vehicle frame.
#[inline]
pub fn transform_sensor_to_vehicle(angle: f64, distance: f64, mount: &SensorMount) -> Point2D {
    let (sin_a, cos_a) = angle.sin_cos();
    let in_sensor = Point2D::new(distance * cos_a, distance * sin_a);
    Pose2D::new(mount.x, mount.y, mount.yaw).transform_point(&in_sensor)
}

/// Map a full spherical sensor measurement into the vehicle ground plane.
#[inline]
pub fn measurement_to_vehicle(
    azimuth: f64,
    zenith: f64,
    distance: f64,
    mount: &SensorMount,
) -> Point2D {
    let [x, y, _] = spherical_to_cartesian(azimuth, zenith, distance);
    transform_sensor_to_vehicle(y.atan2(x), x.hypot(y), mount)
}

/// Place a vehicle-frame cone into the map frame.
#[inline]
pub fn cone_to_global(pose: &Pose2D, local: &Point2D) -> Point2D {
    pose.transform_point(local)
}

/// Express a map-frame cone relative to a pose.
#[inline]
pub fn global_to_local(pose: &Pose2D, global: &Point2D) -> Point2D {
    pose.inverse_transform_point(global)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_spherical_straight_ahead() {
        let [x, y, z] = spherical_to_cartesian(0.0, 0.0, 4.0);
        assert_relative_eq!(x, 4.0);
        assert_relative_eq!(y, 0.0);
        assert_relative_eq!(z, 0.0);
    }

    #[test]
    fn test_spherical_zero_distance_is_origin() {
        assert_eq!(spherical_to_cartesian(1.0, 0.3, 0.0), [0.0, 0.0, 0.0]);
        assert_eq!(spherical_to_cartesian(1.0, 0.3, -2.0), [0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_spherical_elevated() {
        let [x, y, z] = spherical_to_cartesian(FRAC_PI_2, 0.5, 2.0);
        assert_relative_eq!(x, 0.0, epsilon = 1e-12);
        assert_relative_eq!(y, 2.0 * 0.5f64.cos(), epsilon = 1e-12);
        assert_relative_eq!(z, 2.0 * 0.5f64.sin(), epsilon = 1e-12);
    }

    #[test]
    fn test_sensor_to_vehicle_applies_mount() {
        let mount = SensorMount {
            x: 1.5,
            y: 0.0,
            yaw: 0.0,
        };
        let p = transform_sensor_to_vehicle(FRAC_PI_2, 2.0, &mount);
        assert_relative_eq!(p.x, 1.5, epsilon = 1e-12);
        assert_relative_eq!(p.y, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_sensor_to_vehicle_rotated_mount() {
        let mount = SensorMount {
            x: 0.0,
            y: 0.0,
            yaw: FRAC_PI_2,
        };
        let p = transform_sensor_to_vehicle(0.0, 3.0, &mount);
        assert_relative_eq!(p.x, 0.0, epsilon = 1e-12);
        assert_relative_eq!(p.y, 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_measurement_to_vehicle_projects_to_ground() {
        let p = measurement_to_vehicle(0.0, 0.2, 5.0, &SensorMount::identity());
        assert_relative_eq!(p.x, 5.0 * 0.2f64.cos(), epsilon = 1e-12);
        assert_relative_eq!(p.y, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_cone_to_global_and_back() {
        let pose = Pose2D::new(10.0, 5.0, FRAC_PI_2);
        let local = Point2D::new(2.0, 0.0);
        let global = cone_to_global(&pose, &local);
        assert_relative_eq!(global.x, 10.0, epsilon = 1e-12);
        assert_relative_eq!(global.y, 7.0, epsilon = 1e-12);

        let back = global_to_local(&pose, &global);
        assert_relative_eq!(back.x, 2.0, epsilon = 1e-12);
        assert_relative_eq!(back.y, 0.0, epsilon = 1e-12);
    }
}
