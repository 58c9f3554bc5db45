//! SLAM engine layer.
//!
//! - [`graph`]: Pose graph store and optimization
//! - [`slam`]: Ingestion, association, loop closure and the [`Slam`](slam::Slam) driver

pub mod graph;
pub mod slam;
