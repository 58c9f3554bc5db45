//! Core foundation layer.
//!
//! Bottom of the stack with no internal dependencies.
//!
//! # Contents
//!
//! - [`types`]: Poses and points
//! - [`math`]: Angle normalization
//! - [`geometry`]: Sensor, vehicle and map frame transforms
//! - [`geodetic`]: WGS84 to local tangent plane projection

pub mod geodetic;
pub mod geometry;
pub mod math;
pub mod types;
