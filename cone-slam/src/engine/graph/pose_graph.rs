//! Pose graph data structure for the SLAM backend.
//!
//! Nodes are vehicle keyframe poses (3 DOF) and cone landmarks (2 DOF).
//! Edges are relative constraints:
//! - odometry: pose → pose, relative `Pose2D`
//! - observation: pose → landmark, landmark position in the pose frame
//!
//! Nodes live in an arena addressed by stable [`NodeId`]s. Ids are never
//! reused, and edges can only be added between existing nodes of the right
//! kind, so a graph is always structurally consistent.

use std::collections::{HashMap, HashSet};

use nalgebra::{Matrix2, Matrix3};
use serde::{Deserialize, Serialize};

use crate::core::types::{NodeId, Point2D, Pose2D};
use crate::error::{Result, SlamError};

/// Information matrix (inverse covariance) for a 2D pose constraint.
///
/// Stored as the upper triangle of a 3x3 symmetric matrix:
/// ```text
/// | xx  xy  xt |
/// | xy  yy  yt |
/// | xt  yt  tt |
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Information2D {
    pub xx: f64,
    pub xy: f64,
    pub xt: f64,
    pub yy: f64,
    pub yt: f64,
    pub tt: f64,
}

impl Information2D {
    /// Create a diagonal information matrix.
    pub fn diagonal(xx: f64, yy: f64, tt: f64) -> Self {
        Self {
            xx,
            xy: 0.0,
            xt: 0.0,
            yy,
            yt: 0.0,
            tt,
        }
    }

    /// Create from standard deviations.
    pub fn from_std_dev(sigma_x: f64, sigma_y: f64, sigma_t: f64) -> Self {
        Self::diagonal(
            1.0 / (sigma_x * sigma_x),
            1.0 / (sigma_y * sigma_y),
            1.0 / (sigma_t * sigma_t),
        )
    }

    pub fn as_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.xx, self.xy, self.xt, //
            self.xy, self.yy, self.yt, //
            self.xt, self.yt, self.tt,
        )
    }
}

impl Default for Information2D {
    fn default() -> Self {
        // 10cm position, ~3 degree heading
        Self::from_std_dev(0.1, 0.1, 0.05)
    }
}

/// Information matrix for a 2D point observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointInformation {
    pub xx: f64,
    pub xy: f64,
    pub yy: f64,
}

impl PointInformation {
    pub fn diagonal(xx: f64, yy: f64) -> Self {
        Self { xx, xy: 0.0, yy }
    }

    pub fn from_std_dev(sigma_x: f64, sigma_y: f64) -> Self {
        Self::diagonal(1.0 / (sigma_x * sigma_x), 1.0 / (sigma_y * sigma_y))
    }

    pub fn as_matrix(&self) -> Matrix2<f64> {
        Matrix2::new(self.xx, self.xy, self.xy, self.yy)
    }
}

impl Default for PointInformation {
    fn default() -> Self {
        Self::from_std_dev(0.1, 0.1)
    }
}

/// Estimate held by a node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum NodeState {
    Pose(Pose2D),
    Landmark(Point2D),
}

impl NodeState {
    /// Degrees of freedom.
    pub fn dim(&self) -> usize {
        match self {
            NodeState::Pose(_) => 3,
            NodeState::Landmark(_) => 2,
        }
    }

    fn same_kind(&self, other: &NodeState) -> bool {
        matches!(
            (self, other),
            (NodeState::Pose(_), NodeState::Pose(_))
                | (NodeState::Landmark(_), NodeState::Landmark(_))
        )
    }
}

/// A node in the pose graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: NodeId,
    pub state: NodeState,
    /// Keyframe time for pose nodes, 0 for landmarks.
    pub timestamp_us: u64,
    /// Fixed nodes are held constant by the optimizer.
    pub fixed: bool,
}

/// Type of edge in the pose graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeType {
    /// Sequential odometry constraint between keyframes.
    Odometry,
    /// Keyframe to cone observation.
    Observation,
}

/// Measurement carried by an edge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum EdgeMeasurement {
    Odometry {
        /// Pose of `to` expressed in the frame of `from`.
        measurement: Pose2D,
        information: Information2D,
    },
    Observation {
        /// Landmark position expressed in the frame of the pose.
        measurement: Point2D,
        information: PointInformation,
    },
}

/// An edge in the pose graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: NodeId,
    pub to: NodeId,
    pub measurement: EdgeMeasurement,
}

impl GraphEdge {
    pub fn edge_type(&self) -> EdgeType {
        match self.measurement {
            EdgeMeasurement::Odometry { .. } => EdgeType::Odometry,
            EdgeMeasurement::Observation { .. } => EdgeType::Observation,
        }
    }
}

/// Read-only copy of the graph layout for visualization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub poses: Vec<(NodeId, Pose2D)>,
    pub landmarks: Vec<(NodeId, Point2D)>,
    pub edges: Vec<(NodeId, NodeId, EdgeType)>,
}

/// Pose graph for SLAM optimization.
#[derive(Debug, Clone, Default)]
pub struct PoseGraph {
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
    node_index: HashMap<NodeId, usize>,
    /// Pose nodes that already have their incoming odometry edge.
    odometry_targets: HashSet<NodeId>,
    /// Landmark nodes with at least one observation edge.
    observed_landmarks: HashSet<NodeId>,
    next_node_id: NodeId,
}

impl PoseGraph {
    /// Create an empty pose graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pose node and return its id.
    pub fn add_pose(&mut self, pose: Pose2D, timestamp_us: u64) -> NodeId {
        let id = self.next_node_id;
        self.push_node(GraphNode {
            id,
            state: NodeState::Pose(pose),
            timestamp_us,
            fixed: false,
        });
        id
    }

    /// Add a landmark node and return its id.
    pub fn add_landmark(&mut self, position: Point2D, fixed: bool) -> NodeId {
        let id = self.next_node_id;
        self.push_node(GraphNode {
            id,
            state: NodeState::Landmark(position),
            timestamp_us: 0,
            fixed,
        });
        id
    }

    /// Insert a node with a caller-chosen id (used to build subgraphs that
    /// share ids with a parent graph).
    pub fn insert_node(&mut self, node: GraphNode) -> Result<()> {
        if self.node_index.contains_key(&node.id) {
            return Err(SlamError::Graph(format!("duplicate node id {}", node.id)));
        }
        self.push_node(node);
        Ok(())
    }

    fn push_node(&mut self, node: GraphNode) {
        self.next_node_id = self.next_node_id.max(node.id + 1);
        self.node_index.insert(node.id, self.nodes.len());
        self.nodes.push(node);
    }

    /// Add an odometry edge `from → to` between two pose nodes.
    ///
    /// Each pose may receive only one odometry edge.
    pub fn add_odometry_edge(
        &mut self,
        from: NodeId,
        to: NodeId,
        measurement: Pose2D,
        information: Information2D,
    ) -> Result<()> {
        self.require_pose(from)?;
        self.require_pose(to)?;
        if from == to {
            return Err(SlamError::Graph(format!("odometry self-loop on {}", from)));
        }
        if !self.odometry_targets.insert(to) {
            return Err(SlamError::Graph(format!(
                "pose {} already has an odometry edge",
                to
            )));
        }
        self.edges.push(GraphEdge {
            from,
            to,
            measurement: EdgeMeasurement::Odometry {
                measurement,
                information,
            },
        });
        Ok(())
    }

    /// Add an observation edge from a pose to a landmark.
    pub fn add_observation_edge(
        &mut self,
        pose: NodeId,
        landmark: NodeId,
        measurement: Point2D,
        information: PointInformation,
    ) -> Result<()> {
        self.require_pose(pose)?;
        match self.get_node(landmark).map(|n| n.state) {
            Some(NodeState::Landmark(_)) => {}
            _ => {
                return Err(SlamError::Graph(format!(
                    "observation target {} is not a landmark",
                    landmark
                )));
            }
        }
        self.observed_landmarks.insert(landmark);
        self.edges.push(GraphEdge {
            from: pose,
            to: landmark,
            measurement: EdgeMeasurement::Observation {
                measurement,
                information,
            },
        });
        Ok(())
    }

    fn require_pose(&self, id: NodeId) -> Result<()> {
        match self.get_node(id).map(|n| n.state) {
            Some(NodeState::Pose(_)) => Ok(()),
            Some(NodeState::Landmark(_)) => {
                Err(SlamError::Graph(format!("node {} is not a pose", id)))
            }
            None => Err(SlamError::Graph(format!("unknown node {}", id))),
        }
    }

    /// Get a node by id.
    pub fn get_node(&self, id: NodeId) -> Option<&GraphNode> {
        self.node_index.get(&id).map(|&idx| &self.nodes[idx])
    }

    /// Arena index of a node.
    pub fn get_node_index(&self, id: NodeId) -> Option<usize> {
        self.node_index.get(&id).copied()
    }

    /// Current estimate of a pose node.
    pub fn pose(&self, id: NodeId) -> Option<Pose2D> {
        match self.get_node(id)?.state {
            NodeState::Pose(p) => Some(p),
            NodeState::Landmark(_) => None,
        }
    }

    /// Current estimate of a landmark node.
    pub fn landmark(&self, id: NodeId) -> Option<Point2D> {
        match self.get_node(id)?.state {
            NodeState::Landmark(p) => Some(p),
            NodeState::Pose(_) => None,
        }
    }

    /// Overwrite a node estimate. Returns false if the node is unknown or
    /// of a different kind.
    pub fn set_state(&mut self, id: NodeId, state: NodeState) -> bool {
        match self.node_index.get(&id) {
            Some(&idx) if self.nodes[idx].state.same_kind(&state) => {
                self.nodes[idx].state = state;
                true
            }
            _ => false,
        }
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn num_poses(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n.state, NodeState::Pose(_)))
            .count()
    }

    pub fn num_landmarks(&self) -> usize {
        self.nodes.len() - self.num_poses()
    }

    /// Check whether every landmark is observed and every pose after the
    /// first has its odometry edge.
    pub fn is_consistent(&self) -> bool {
        let mut first_pose = true;
        self.nodes.iter().all(|n| match n.state {
            NodeState::Landmark(_) => self.observed_landmarks.contains(&n.id),
            NodeState::Pose(_) => {
                let ok = first_pose || self.odometry_targets.contains(&n.id);
                first_pose = false;
                ok
            }
        })
    }

    /// Copy out node estimates and edge endpoints.
    pub fn snapshot(&self) -> GraphSnapshot {
        let mut snapshot = GraphSnapshot::default();
        for node in &self.nodes {
            match node.state {
                NodeState::Pose(p) => snapshot.poses.push((node.id, p)),
                NodeState::Landmark(p) => snapshot.landmarks.push((node.id, p)),
            }
        }
        snapshot.edges = self
            .edges
            .iter()
            .map(|e| (e.from, e.to, e.edge_type()))
            .collect();
        snapshot
    }
}
