//! ConeSLAM - Cone landmark pose-graph SLAM for autonomous race cars
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                threads/  main.rs                    │  ← Daemon
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                      io/                            │  ← Infrastructure
//! │     (messages, router, udp transport, persistence)  │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                    engine/                          │  ← Orchestration
//! │            (slam pipeline, pose graph)              │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                      map/                           │  ← Landmarks
//! │                 (cones, registry)                   │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                     core/                           │  ← Foundation
//! │        (types, math, geometry, geodetic)            │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! # Data flow
//!
//! Cone detections arrive as separate direction, distance and type parts.
//! They are gathered into frames, converted into the vehicle frame and
//! associated with the cone map at a pose predicted from the geolocation
//! stream. Each accepted keyframe becomes a pose node with an odometry edge
//! to its predecessor and an observation edge to every cone it sees. A
//! sliding-window optimization keeps the recent map consistent; revisiting
//! old cones with a persistent localization offset triggers a full
//! optimization of the graph.

// ============================================================================
// Layer 1: Core foundation (no internal deps)
// ============================================================================
pub mod core;
pub mod error;

// ============================================================================
// Layer 2: Landmark map (depends on core)
// ============================================================================
pub mod map;

// ============================================================================
// Layer 3: SLAM engine (depends on core, map)
// ============================================================================
pub mod config;
pub mod engine;

// ============================================================================
// Layer 4: I/O and threads (depends on all layers)
// ============================================================================
pub mod io;
pub mod threads;

// ============================================================================
// Convenience re-exports
// ============================================================================

pub use config::{Args, SlamConfig};
pub use core::types::{NodeId, Point2D, Pose2D};
pub use engine::graph::{GraphSolver, LevenbergMarquardt, OptimizationResult, PoseGraph};
pub use engine::slam::{Slam, SlamEvent, SlamResult, SlamStatus};
pub use error::{Result, SlamError};
pub use map::{Cone, ConeClass, ConeId, ConeMap};
