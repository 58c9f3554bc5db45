//! Cone landmark.

use serde::{Deserialize, Serialize};

use crate::core::types::{NodeId, Point2D};

/// Index of a cone in the [`ConeMap`](super::ConeMap). Stable for the process lifetime.
pub type ConeId = usize;

/// Cone classification as reported by the perception pipeline.
///
/// Wire type ids: 0 unknown, 1 yellow (left boundary), 2 blue (right
/// boundary), 3 small orange, 4 big orange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConeClass {
    #[default]
    Unknown,
    Left,
    Right,
    Orange,
    BigOrange,
}

impl ConeClass {
    /// Number of classes (size of the vote table).
    pub const COUNT: usize = 5;

    /// Decode a wire type id. Unrecognized ids are `Unknown`.
    pub fn from_type_id(type_id: u32) -> Self {
        match type_id {
            1 => ConeClass::Left,
            2 => ConeClass::Right,
            3 => ConeClass::Orange,
            4 => ConeClass::BigOrange,
            _ => ConeClass::Unknown,
        }
    }

    /// Wire type id.
    pub fn type_id(self) -> u32 {
        match self {
            ConeClass::Unknown => 0,
            ConeClass::Left => 1,
            ConeClass::Right => 2,
            ConeClass::Orange => 3,
            ConeClass::BigOrange => 4,
        }
    }

    fn index(self) -> usize {
        self.type_id() as usize
    }
}

/// A mapped cone.
///
/// `position` is the current best estimate and is overwritten by the
/// optimizer. The raw observation sum is kept separately so the
/// unoptimized map can still be drawn.
#[derive(Debug, Clone, PartialEq)]
pub struct Cone {
    /// Arena index, never reused.
    pub id: ConeId,
    /// Landmark node in the pose graph. `None` only for cones loaded from a
    /// map file and not yet observed in this run.
    pub graph_node: Option<NodeId>,
    /// Estimated position in the map frame.
    pub position: Point2D,
    /// Index of the keyframe that created the cone.
    pub first_seen_pose: usize,
    /// Index of the latest keyframe that observed the cone.
    pub last_seen_pose: usize,
    votes: [u32; ConeClass::COUNT],
    observations: u32,
    raw_sum: Point2D,
    active: bool,
}

impl Cone {
    /// Create a cone from its first observation.
    pub fn new(id: ConeId, position: Point2D, class: ConeClass, pose_index: usize) -> Self {
        let mut votes = [0; ConeClass::COUNT];
        votes[class.index()] = 1;
        Self {
            id,
            graph_node: None,
            position,
            first_seen_pose: pose_index,
            last_seen_pose: pose_index,
            votes,
            observations: 1,
            raw_sum: position,
            active: true,
        }
    }

    /// Rebuild a cone from a persisted record.
    pub fn from_record(id: ConeId, position: Point2D, class: ConeClass, observations: u32) -> Self {
        let observations = observations.max(1);
        let mut votes = [0; ConeClass::COUNT];
        votes[class.index()] = observations;
        Self {
            id,
            graph_node: None,
            position,
            first_seen_pose: 0,
            last_seen_pose: 0,
            votes,
            observations,
            raw_sum: Point2D::new(
                position.x * observations as f64,
                position.y * observations as f64,
            ),
            active: true,
        }
    }

    /// Record another observation of this cone at a map-frame position.
    pub fn add_observation(&mut self, global: Point2D, class: ConeClass, pose_index: usize) {
        self.votes[class.index()] += 1;
        self.observations += 1;
        self.raw_sum.x += global.x;
        self.raw_sum.y += global.y;
        self.last_seen_pose = self.last_seen_pose.max(pose_index);
    }

    /// Majority class over typed observations.
    ///
    /// `Unknown` votes only count when no typed vote exists. Ties go to the
    /// lower type id.
    pub fn class(&self) -> ConeClass {
        let mut best = ConeClass::Unknown;
        let mut best_votes = 0;
        for class in [
            ConeClass::Left,
            ConeClass::Right,
            ConeClass::Orange,
            ConeClass::BigOrange,
        ] {
            let votes = self.votes[class.index()];
            if votes > best_votes {
                best = class;
                best_votes = votes;
            }
        }
        best
    }

    /// Number of observations merged into this cone.
    pub fn observations(&self) -> u32 {
        self.observations
    }

    /// Mean of the raw map-frame observations.
    pub fn mean_observation(&self) -> Point2D {
        let n = self.observations.max(1) as f64;
        Point2D::new(self.raw_sum.x / n, self.raw_sum.y / n)
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub(super) fn deactivate(&mut self) {
        self.active = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_type_id_round_trip() {
        for id in 0..ConeClass::COUNT as u32 {
            assert_eq!(ConeClass::from_type_id(id).type_id(), id);
        }
        assert_eq!(ConeClass::from_type_id(42), ConeClass::Unknown);
    }

    #[test]
    fn test_class_majority_ignores_unknown() {
        let mut cone = Cone::new(0, Point2D::new(1.0, 1.0), ConeClass::Unknown, 0);
        assert_eq!(cone.class(), ConeClass::Unknown);

        cone.add_observation(Point2D::new(1.0, 1.0), ConeClass::Unknown, 1);
        cone.add_observation(Point2D::new(1.0, 1.0), ConeClass::Right, 2);
        assert_eq!(cone.class(), ConeClass::Right);

        cone.add_observation(Point2D::new(1.0, 1.0), ConeClass::Left, 3);
        cone.add_observation(Point2D::new(1.0, 1.0), ConeClass::Left, 4);
        assert_eq!(cone.class(), ConeClass::Left);
        assert_eq!(cone.observations(), 5);
        assert_eq!(cone.first_seen_pose, 0);
        assert_eq!(cone.last_seen_pose, 4);
    }

    #[test]
    fn test_mean_observation() {
        let mut cone = Cone::new(3, Point2D::new(1.0, 0.0), ConeClass::Left, 0);
        cone.add_observation(Point2D::new(3.0, 2.0), ConeClass::Left, 1);
        let mean = cone.mean_observation();
        assert_relative_eq!(mean.x, 2.0);
        assert_relative_eq!(mean.y, 1.0);
    }

    #[test]
    fn test_from_record_keeps_class_and_count() {
        let cone = Cone::from_record(7, Point2D::new(-2.0, 4.5), ConeClass::BigOrange, 6);
        assert_eq!(cone.class(), ConeClass::BigOrange);
        assert_eq!(cone.observations(), 6);
        assert!(cone.graph_node.is_none());
        let mean = cone.mean_observation();
        assert_relative_eq!(mean.x, -2.0);
        assert_relative_eq!(mean.y, 4.5);
    }
}
