//! WGS84 to local tangent plane projection.
//!
//! Positions from the localization pipeline arrive as latitude/longitude.
//! They are projected onto an east/north plane centered at a configured
//! reference position. The radii of curvature are evaluated once at the
//! reference latitude, which is accurate to centimeters over a race track.

use serde::{Deserialize, Serialize};

use super::math::DEG_TO_RAD;
use super::types::Point2D;

/// WGS84 semi-major axis (meters).
const WGS84_A: f64 = 6_378_137.0;

/// WGS84 first eccentricity squared.
const WGS84_E2: f64 = 6.694_379_990_14e-3;

/// Reference position for the local Cartesian frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeodeticReference {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
}

impl GeodeticReference {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Project a latitude/longitude (degrees) to east (x) / north (y) meters.
    pub fn to_local(&self, latitude: f64, longitude: f64) -> Point2D {
        let lat0 = self.latitude * DEG_TO_RAD;
        let sin_lat = lat0.sin();
        let denom = 1.0 - WGS84_E2 * sin_lat * sin_lat;

        // Meridional and prime vertical radii of curvature
        let meridional = WGS84_A * (1.0 - WGS84_E2) / denom.powf(1.5);
        let prime_vertical = WGS84_A / denom.sqrt();

        let d_lat = (latitude - self.latitude) * DEG_TO_RAD;
        let d_lon = (longitude - self.longitude) * DEG_TO_RAD;

        Point2D::new(d_lon * prime_vertical * lat0.cos(), d_lat * meridional)
    }
}
