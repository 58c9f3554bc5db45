//! Pose graph backend.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        POSE GRAPH                           │
//! │                                                             │
//! │   [P0] ──odom──▶ [P1] ──odom──▶ [P2] ──odom──▶ [P3]         │
//! │     │  ╲           │              │  ╲                       │
//! │    obs  obs       obs            obs  obs                   │
//! │     ▼     ▼        ▼              ▼     ▼                    │
//! │   (L0)   (L1) ◀────┘            (L2)  (L0)  ← revisit         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       OPTIMIZATION                          │
//! │   full graph (loop closure, shutdown)                       │
//! │   essential subgraph [start, end] in anchor frame (periodic)│
//! │   Levenberg-Marquardt behind the GraphSolver trait          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`PoseGraph`]: Node/edge arena with stable ids
//! - [`EssentialGraph`]: Anchor-frame copy of a keyframe range
//! - [`GraphSolver`], [`LevenbergMarquardt`]: Solver contract and default solver

mod essential;
mod optimizer;
mod pose_graph;

pub use essential::EssentialGraph;
pub use optimizer::{
    GraphOptimizerConfig, GraphSolver, LevenbergMarquardt, OptimizationResult, TerminationReason,
};
pub use pose_graph::{
    EdgeMeasurement, EdgeType, GraphEdge, GraphNode, GraphSnapshot, Information2D, NodeState,
    PointInformation, PoseGraph,
};
