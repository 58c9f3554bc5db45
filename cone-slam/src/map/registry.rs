//! Id-stable cone arena.
//!
//! Cones are only ever appended. Filtering deactivates instead of removing
//! so that ids, and the pose-graph nodes linked to them, stay valid for the
//! lifetime of the process.

use log::debug;
use serde::{Deserialize, Serialize};

use super::cone::{Cone, ConeClass, ConeId};
use crate::core::types::Point2D;

/// Configuration for [`ConeMap::filter`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapFilterConfig {
    /// Cones seen fewer times than this are dropped.
    #[serde(default = "default_min_observations")]
    pub min_observations: u32,

    /// Same-class cones closer than this (meters) are duplicates.
    #[serde(default = "default_duplicate_distance")]
    pub duplicate_distance: f64,

    /// Run the filter after every completed loop closure.
    #[serde(default = "default_filter_after_loop_closure")]
    pub filter_after_loop_closure: bool,
}

fn default_min_observations() -> u32 {
    2
}

fn default_duplicate_distance() -> f64 {
    1.0
}

fn default_filter_after_loop_closure() -> bool {
    true
}

impl Default for MapFilterConfig {
    fn default() -> Self {
        Self {
            min_observations: default_min_observations(),
            duplicate_distance: default_duplicate_distance(),
            filter_after_loop_closure: default_filter_after_loop_closure(),
        }
    }
}

/// The cone map.
#[derive(Debug, Clone, Default)]
pub struct ConeMap {
    cones: Vec<Cone>,
}

impl ConeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of cones ever created, active or not.
    pub fn len(&self) -> usize {
        self.cones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cones.is_empty()
    }

    /// Number of active cones.
    pub fn num_active(&self) -> usize {
        self.cones.iter().filter(|c| c.is_active()).count()
    }

    /// Create a cone from its first observation and return its id.
    pub fn insert(&mut self, position: Point2D, class: ConeClass, pose_index: usize) -> ConeId {
        let id = self.cones.len();
        self.cones.push(Cone::new(id, position, class, pose_index));
        id
    }

    /// Append a cone restored from disk.
    pub fn insert_record(&mut self, position: Point2D, class: ConeClass, observations: u32) -> ConeId {
        let id = self.cones.len();
        self.cones
            .push(Cone::from_record(id, position, class, observations));
        id
    }

    pub fn get(&self, id: ConeId) -> Option<&Cone> {
        self.cones.get(id)
    }

    pub fn get_mut(&mut self, id: ConeId) -> Option<&mut Cone> {
        self.cones.get_mut(id)
    }

    /// All cones including deactivated ones, in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Cone> {
        self.cones.iter()
    }

    /// Active cones in id order.
    pub fn active(&self) -> impl Iterator<Item = &Cone> {
        self.cones.iter().filter(|c| c.is_active())
    }

    /// Nearest active cone to `point` and its distance.
    pub fn nearest(&self, point: &Point2D) -> Option<(ConeId, f64)> {
        self.active()
            .map(|c| (c.id, c.position.distance_squared(point)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(id, d2)| (id, d2.sqrt()))
    }

    /// Nearest cone among `candidates` (inactive candidates are skipped).
    pub fn nearest_among(&self, point: &Point2D, candidates: &[ConeId]) -> Option<(ConeId, f64)> {
        candidates
            .iter()
            .filter_map(|&id| self.get(id))
            .filter(|c| c.is_active())
            .map(|c| (c.id, c.position.distance_squared(point)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(id, d2)| (id, d2.sqrt()))
    }

    /// Active cones within `radius` of `point`.
    pub fn within(&self, point: &Point2D, radius: f64) -> Vec<ConeId> {
        let r2 = radius * radius;
        self.active()
            .filter(|c| c.position.distance_squared(point) <= r2)
            .map(|c| c.id)
            .collect()
    }

    /// Deactivate weak and duplicate cones. Returns the deactivated ids.
    ///
    /// Among same-class cones closer than `duplicate_distance`, the one with
    /// more observations survives (older id on ties).
    pub fn filter(&mut self, config: &MapFilterConfig) -> Vec<ConeId> {
        let mut removed = Vec::new();

        for cone in self.cones.iter_mut().filter(|c| c.is_active()) {
            if cone.observations() < config.min_observations {
                cone.deactivate();
                removed.push(cone.id);
            }
        }

        let mut order: Vec<ConeId> = self.active().map(|c| c.id).collect();
        order.sort_by(|&a, &b| {
            self.cones[b]
                .observations()
                .cmp(&self.cones[a].observations())
                .then(a.cmp(&b))
        });

        let d2 = config.duplicate_distance * config.duplicate_distance;
        let mut kept: Vec<ConeId> = Vec::with_capacity(order.len());
        for id in order {
            let cone = &self.cones[id];
            let duplicate = kept.iter().any(|&k| {
                let other = &self.cones[k];
                other.class() == cone.class()
                    && other.position.distance_squared(&cone.position) < d2
            });
            if duplicate {
                removed.push(id);
            } else {
                kept.push(id);
            }
        }

        for &id in &removed {
            self.cones[id].deactivate();
        }
        removed.sort_unstable();
        removed.dedup();

        debug!(
            "Map filter deactivated {} cones, {} active",
            removed.len(),
            self.num_active()
        );
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn seen(map: &mut ConeMap, id: ConeId, times: u32) {
        for i in 0..times {
            let p = map.get(id).map(|c| c.position).unwrap_or_default();
            let class = map.get(id).map(|c| c.class()).unwrap_or_default();
            map.get_mut(id).unwrap().add_observation(p, class, i as usize + 1);
        }
    }

    #[test]
    fn test_insert_assigns_sequential_ids() {
        let mut map = ConeMap::new();
        assert_eq!(map.insert(Point2D::new(0.0, 0.0), ConeClass::Left, 0), 0);
        assert_eq!(map.insert(Point2D::new(5.0, 0.0), ConeClass::Right, 0), 1);
        assert_eq!(map.len(), 2);
        assert_eq!(map.num_active(), 2);
    }

    #[test]
    fn test_nearest() {
        let mut map = ConeMap::new();
        map.insert(Point2D::new(0.0, 0.0), ConeClass::Left, 0);
        map.insert(Point2D::new(5.0, 0.0), ConeClass::Right, 0);

        let (id, d) = map.nearest(&Point2D::new(4.0, 0.0)).unwrap();
        assert_eq!(id, 1);
        assert_relative_eq!(d, 1.0);

        let (id, _) = map.nearest_among(&Point2D::new(4.0, 0.0), &[0]).unwrap();
        assert_eq!(id, 0);
        assert!(ConeMap::new().nearest(&Point2D::default()).is_none());
    }

    #[test]
    fn test_within_radius() {
        let mut map = ConeMap::new();
        map.insert(Point2D::new(1.0, 0.0), ConeClass::Left, 0);
        map.insert(Point2D::new(10.0, 0.0), ConeClass::Left, 0);
        assert_eq!(map.within(&Point2D::default(), 2.0), vec![0]);
    }

    #[test]
    fn test_filter_drops_weak_cones() {
        let mut map = ConeMap::new();
        let weak = map.insert(Point2D::new(0.0, 0.0), ConeClass::Left, 0);
        let strong = map.insert(Point2D::new(5.0, 0.0), ConeClass::Left, 0);
        seen(&mut map, strong, 3);

        let removed = map.filter(&MapFilterConfig::default());
        assert_eq!(removed, vec![weak]);
        assert!(!map.get(weak).unwrap().is_active());
        assert!(map.get(strong).unwrap().is_active());
        assert!(map.nearest(&Point2D::new(0.0, 0.0)).map(|(id, _)| id) == Some(strong));
    }

    #[test]
    fn test_filter_merges_duplicates_keeping_most_observed() {
        let mut map = ConeMap::new();
        let a = map.insert(Point2D::new(0.0, 0.0), ConeClass::Right, 0);
        let b = map.insert(Point2D::new(0.4, 0.0), ConeClass::Right, 0);
        let other_class = map.insert(Point2D::new(0.2, 0.2), ConeClass::Left, 0);
        seen(&mut map, a, 2);
        seen(&mut map, b, 5);
        seen(&mut map, other_class, 2);

        let removed = map.filter(&MapFilterConfig::default());
        assert_eq!(removed, vec![a]);
        assert!(map.get(b).unwrap().is_active());
        assert!(map.get(other_class).unwrap().is_active());
    }

    #[test]
    fn test_ids_not_reused_after_filter() {
        let mut map = ConeMap::new();
        map.insert(Point2D::new(0.0, 0.0), ConeClass::Left, 0);
        map.filter(&MapFilterConfig::default());
        let next = map.insert(Point2D::new(3.0, 0.0), ConeClass::Left, 1);
        assert_eq!(next, 1);
        assert_eq!(map.len(), 2);
        assert_eq!(map.num_active(), 1);
    }
}
