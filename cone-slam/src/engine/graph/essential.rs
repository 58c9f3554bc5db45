//! Essential subgraph extraction for local refinement.
//!
//! A contiguous keyframe range `[start, end]` is copied out of the full
//! graph together with every landmark those keyframes observe. The copy is
//! expressed in the frame of the first keyframe in the range (the anchor),
//! which is fixed during the solve. Landmarks that are also observed from
//! keyframes outside the range are fixed too, so the local solve cannot drag
//! them away from the rest of the map.
//!
//! Node ids are shared with the full graph, so results can be written back
//! directly after [`EssentialGraph::to_global`] re-anchors them.

use std::collections::{HashMap, HashSet};

use super::pose_graph::{EdgeMeasurement, GraphNode, NodeState, PoseGraph};
use crate::core::types::{NodeId, Pose2D};
use crate::error::{Result, SlamError};

/// A local copy of part of the pose graph.
#[derive(Debug, Clone)]
pub struct EssentialGraph {
    /// Subgraph in the anchor frame.
    pub graph: PoseGraph,
    /// Global pose of the anchor keyframe.
    pub anchor: Pose2D,
    /// Anchor node id.
    pub anchor_id: NodeId,
}

impl EssentialGraph {
    /// Extract the subgraph spanned by `pose_ids` (ordered, anchor first).
    pub fn extract(full: &PoseGraph, pose_ids: &[NodeId]) -> Result<Self> {
        let &anchor_id = pose_ids
            .first()
            .ok_or_else(|| SlamError::Graph("empty essential range".to_string()))?;
        let anchor = full
            .pose(anchor_id)
            .ok_or_else(|| SlamError::Graph(format!("anchor {} is not a pose", anchor_id)))?;

        let in_range: HashSet<NodeId> = pose_ids.iter().copied().collect();
        let mut graph = PoseGraph::new();

        for &id in pose_ids {
            let node = full
                .get_node(id)
                .ok_or_else(|| SlamError::Graph(format!("unknown pose {}", id)))?;
            let NodeState::Pose(pose) = node.state else {
                return Err(SlamError::Graph(format!("node {} is not a pose", id)));
            };
            graph.insert_node(GraphNode {
                id,
                state: NodeState::Pose(anchor.relative_to(&pose)),
                timestamp_us: node.timestamp_us,
                fixed: id == anchor_id || node.fixed,
            })?;
        }

        // Landmarks seen from outside the range act as fixed boundary.
        let mut boundary: HashMap<NodeId, bool> = HashMap::new();
        for edge in full.edges() {
            if let EdgeMeasurement::Observation { .. } = edge.measurement {
                let outside = !in_range.contains(&edge.from);
                *boundary.entry(edge.to).or_insert(false) |= outside;
            }
        }

        for edge in full.edges() {
            if !in_range.contains(&edge.from) {
                continue;
            }
            match edge.measurement {
                EdgeMeasurement::Odometry {
                    measurement,
                    information,
                } => {
                    if in_range.contains(&edge.to) {
                        graph.add_odometry_edge(edge.from, edge.to, measurement, information)?;
                    }
                }
                EdgeMeasurement::Observation {
                    measurement,
                    information,
                } => {
                    if graph.get_node(edge.to).is_none() {
                        let node = full
                            .get_node(edge.to)
                            .ok_or_else(|| SlamError::Graph(format!("unknown landmark {}", edge.to)))?;
                        let NodeState::Landmark(position) = node.state else {
                            return Err(SlamError::Graph(format!(
                                "node {} is not a landmark",
                                edge.to
                            )));
                        };
                        let on_boundary = boundary.get(&edge.to).copied().unwrap_or(false);
                        graph.insert_node(GraphNode {
                            id: edge.to,
                            state: NodeState::Landmark(anchor.inverse_transform_point(&position)),
                            timestamp_us: 0,
                            fixed: node.fixed || on_boundary,
                        })?;
                    }
                    graph.add_observation_edge(edge.from, edge.to, measurement, information)?;
                }
            }
        }

        Ok(Self {
            graph,
            anchor,
            anchor_id,
        })
    }

    /// Re-anchor local estimates into the global frame.
    pub fn to_global(&self, estimates: &[(NodeId, NodeState)]) -> Vec<(NodeId, NodeState)> {
        estimates
            .iter()
            .map(|&(id, state)| {
                let global = match state {
                    NodeState::Pose(p) => NodeState::Pose(self.anchor.compose(&p)),
                    NodeState::Landmark(l) => NodeState::Landmark(self.anchor.transform_point(&l)),
                };
                (id, global)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Point2D;
    use crate::engine::graph::optimizer::{GraphSolver, LevenbergMarquardt};
    use crate::engine::graph::pose_graph::{Information2D, PointInformation};
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    /// Three poses driving north from (5, 5); landmark L0 seen by all,
    /// L1 only by the last pose.
    fn corridor() -> (PoseGraph, Vec<NodeId>, NodeId, NodeId) {
        let mut g = PoseGraph::new();
        let step = Pose2D::new(1.0, 0.0, 0.0);
        let mut ids = Vec::new();
        let mut pose = Pose2D::new(5.0, 5.0, FRAC_PI_2);
        for i in 0..3 {
            let id = g.add_pose(pose, i);
            if let Some(&prev) = ids.last() {
                g.add_odometry_edge(prev, id, step, Information2D::default()).unwrap();
            }
            ids.push(id);
            pose = pose.compose(&step);
        }

        let l0_global = Point2D::new(4.0, 7.0);
        let l0 = g.add_landmark(l0_global, false);
        for &id in &ids {
            let p = g.pose(id).unwrap();
            g.add_observation_edge(id, l0, p.inverse_transform_point(&l0_global), PointInformation::default())
                .unwrap();
        }

        let l1_global = Point2D::new(6.0, 8.0);
        let l1 = g.add_landmark(l1_global, false);
        let p = g.pose(ids[2]).unwrap();
        g.add_observation_edge(ids[2], l1, p.inverse_transform_point(&l1_global), PointInformation::default())
            .unwrap();
        (g, ids, l0, l1)
    }

    #[test]
    fn test_extract_expresses_range_in_anchor_frame() {
        let (full, ids, l0, l1) = corridor();
        let essential = EssentialGraph::extract(&full, &ids[1..]).unwrap();

        assert_eq!(essential.anchor_id, ids[1]);
        let anchor = essential.graph.get_node(ids[1]).unwrap();
        assert!(anchor.fixed);
        let NodeState::Pose(local_anchor) = anchor.state else {
            panic!("anchor must be a pose");
        };
        assert_relative_eq!(local_anchor.x, 0.0, epsilon = 1e-12);
        assert_relative_eq!(local_anchor.theta, 0.0, epsilon = 1e-12);

        let last = essential.graph.pose(ids[2]).unwrap();
        assert_relative_eq!(last.x, 1.0, epsilon = 1e-12);
        assert_relative_eq!(last.y, 0.0, epsilon = 1e-12);

        // L0 is also seen by ids[0], outside the range.
        assert!(essential.graph.get_node(l0).unwrap().fixed);
        assert!(!essential.graph.get_node(l1).unwrap().fixed);
        assert!(essential.graph.get_node(ids[0]).is_none());
        assert_eq!(essential.graph.num_edges(), 1 + 2 + 1);
        assert!(essential.graph.is_consistent());
    }

    #[test]
    fn test_to_global_round_trips_unchanged_estimates() {
        let (full, ids, _, l1) = corridor();
        let essential = EssentialGraph::extract(&full, &ids[1..]).unwrap();

        let local = vec![
            (ids[2], NodeState::Pose(essential.graph.pose(ids[2]).unwrap())),
            (l1, NodeState::Landmark(essential.graph.landmark(l1).unwrap())),
        ];
        let global = essential.to_global(&local);

        let NodeState::Pose(p) = global[0].1 else {
            panic!("expected pose");
        };
        let expected = full.pose(ids[2]).unwrap();
        assert_relative_eq!(p.x, expected.x, epsilon = 1e-9);
        assert_relative_eq!(p.y, expected.y, epsilon = 1e-9);
        assert_relative_eq!(p.theta, expected.theta, epsilon = 1e-9);

        let NodeState::Landmark(l) = global[1].1 else {
            panic!("expected landmark");
        };
        assert_relative_eq!(l.x, 6.0, epsilon = 1e-9);
        assert_relative_eq!(l.y, 8.0, epsilon = 1e-9);
    }

    #[test]
    fn test_local_solve_corrects_perturbed_landmark() {
        let (mut full, ids, _, l1) = corridor();
        full.set_state(l1, NodeState::Landmark(Point2D::new(6.4, 7.7)));

        let essential = EssentialGraph::extract(&full, &ids[1..]).unwrap();
        let result = LevenbergMarquardt::default().optimize(&essential.graph, 50);
        assert!(result.converged);

        let global = essential.to_global(&result.estimates);
        let (_, state) = global.iter().find(|(id, _)| *id == l1).unwrap();
        let NodeState::Landmark(l) = state else {
            panic!("expected landmark");
        };
        assert_relative_eq!(l.x, 6.0, epsilon = 1e-4);
        assert_relative_eq!(l.y, 8.0, epsilon = 1e-4);
    }

    #[test]
    fn test_empty_range_is_error() {
        let (full, _, _, _) = corridor();
        assert!(EssentialGraph::extract(&full, &[]).is_err());
    }
}
