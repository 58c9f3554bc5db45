//! Core data types.
//!
//! - [`Point2D`]: 2D point in meters
//! - [`Pose2D`]: Vehicle pose (x, y, theta) in meters and radians
//! - [`NodeId`]: Stable pose-graph node identifier

mod pose;

pub use pose::{Point2D, Pose2D};

/// Pose-graph node identifier. Never reused within a process.
pub type NodeId = u64;
