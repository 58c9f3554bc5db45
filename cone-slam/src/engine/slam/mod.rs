//! Cone SLAM pipeline.
//!
//! ```text
//! cone parts ──► FrameCollector ──► CompletedFrame
//!                                        │
//! geolocation ──► OffsetCalibration ──►  │  (predicted pose)
//!                                        ▼
//!                      KeyframeGate ──► ConeMatcher ──► PoseGraph
//!                                        │                  │
//!                          LoopClosureMonitor ──► full / essential optimization
//! ```
//!
//! [`Slam`] owns every stage and is shared between the handler threads.

mod frame_collector;
mod keyframe;
mod loop_closure;
mod matcher;
mod offset;
mod online_slam;

pub use frame_collector::{
    CollectorConfig, CompletedFrame, ConeMeasurement, ConePart, FrameCollector,
};
pub use keyframe::{KeyframeConfig, KeyframeGate};
pub use loop_closure::{LoopClosureConfig, LoopClosureMonitor};
pub use matcher::{
    ConeMatch, ConeMatcher, MatcherConfig, Observation, PoseEstimate,
    cone_to_measurement_distance,
};
pub use offset::{GeoFix, OffsetCalibration, SplitPoseAssembler};
pub use online_slam::{
    ConeReport, OptimizeRequest, PoseRecord, Slam, SlamEvent, SlamResult, SlamStatus, SplitPose,
};
