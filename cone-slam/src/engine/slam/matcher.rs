//! Cone data association and landmark-based localization.
//!
//! A frame of vehicle-frame cone observations is associated with the map in
//! four steps:
//!
//! 1. **Search** - evaluate a small pose grid around the predicted pose and
//!    keep the pose with the lowest truncated matching cost.
//! 2. **Filter** - at that pose, keep only correspondences closer than the
//!    strict filter threshold.
//! 3. **Localize** - with enough correspondences, solve the closed-form 2D
//!    rigid alignment of observations onto their matched cones.
//! 4. **Match** - at the final pose, every observation is either matched to
//!    its nearest active cone (`distance < new_cone_threshold`) or becomes a
//!    new-cone candidate.

use serde::{Deserialize, Serialize};

use crate::core::geometry::{cone_to_global, measurement_to_vehicle, SensorMount};
use crate::core::types::{Point2D, Pose2D};
use crate::engine::slam::frame_collector::ConeMeasurement;
use crate::map::{Cone, ConeClass, ConeId, ConeMap};

/// Configuration for cone matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatcherConfig {
    /// Observations closer than this to a mapped cone are the same cone (meters).
    #[serde(default = "default_new_cone_threshold")]
    pub new_cone_threshold: f64,

    /// Correspondences used for localization must be closer than this (meters).
    #[serde(default = "default_filter_threshold")]
    pub filter_threshold: f64,

    /// Observations farther than this from the vehicle are ignored (meters).
    #[serde(default = "default_cone_mapping_threshold")]
    pub cone_mapping_threshold: f64,

    /// Minimum filtered correspondences for a landmark-based pose.
    #[serde(default = "default_min_localization_matches")]
    pub min_localization_matches: usize,

    /// Half-width of the position search grid (meters).
    #[serde(default = "default_search_radius")]
    pub search_radius: f64,

    /// Half-width of the heading search grid (radians).
    #[serde(default = "default_search_heading")]
    pub search_heading: f64,

    /// Grid steps on each side of the prediction, per position axis.
    #[serde(default = "default_position_steps")]
    pub position_steps: u32,

    /// Grid steps on each side of the prediction, for heading.
    #[serde(default = "default_heading_steps")]
    pub heading_steps: u32,
}

fn default_new_cone_threshold() -> f64 {
    1.0
}

fn default_filter_threshold() -> f64 {
    0.5
}

fn default_cone_mapping_threshold() -> f64 {
    67.0
}

fn default_min_localization_matches() -> usize {
    3
}

fn default_search_radius() -> f64 {
    0.5
}

fn default_search_heading() -> f64 {
    0.05
}

fn default_position_steps() -> u32 {
    5
}

fn default_heading_steps() -> u32 {
    2
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            new_cone_threshold: default_new_cone_threshold(),
            filter_threshold: default_filter_threshold(),
            cone_mapping_threshold: default_cone_mapping_threshold(),
            min_localization_matches: default_min_localization_matches(),
            search_radius: default_search_radius(),
            search_heading: default_search_heading(),
            position_steps: default_position_steps(),
            heading_steps: default_heading_steps(),
        }
    }
}

/// A cone observation in the vehicle frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub local: Point2D,
    pub class: ConeClass,
}

impl Observation {
    pub fn new(local: Point2D, class: ConeClass) -> Self {
        Self { local, class }
    }

    /// Project a spherical sensor measurement onto the vehicle ground plane.
    pub fn from_measurement(measurement: &ConeMeasurement, mount: &SensorMount) -> Self {
        Self {
            local: measurement_to_vehicle(
                measurement.azimuth,
                measurement.zenith,
                measurement.distance,
                mount,
            ),
            class: measurement.class,
        }
    }

    /// Range from the vehicle reference point.
    pub fn range(&self) -> f64 {
        self.local.norm()
    }
}

/// Correspondence between an observation and a mapped cone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConeMatch {
    /// Index into the observation slice.
    pub observation: usize,
    pub cone: ConeId,
    /// Map-frame distance between the projected observation and the cone.
    pub distance: f64,
}

/// Result of the pose grid search.
#[derive(Debug, Clone)]
pub struct PoseEstimate {
    pub pose: Pose2D,
    pub cost: f64,
    pub matches: Vec<ConeMatch>,
}

/// Plain 2D distance between a map-frame point and a cone.
#[inline]
pub fn cone_to_measurement_distance(global: &Point2D, cone: &Cone) -> f64 {
    global.distance(&cone.position)
}

/// Cone association engine.
#[derive(Debug, Clone, Default)]
pub struct ConeMatcher {
    config: MatcherConfig,
}

impl ConeMatcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Drop observations beyond the mapping range.
    pub fn in_range(&self, observations: Vec<Observation>) -> Vec<Observation> {
        let limit = self.config.cone_mapping_threshold;
        observations
            .into_iter()
            .filter(|o| o.range() <= limit)
            .collect()
    }

    /// Active cones within mapping range of `pose`.
    pub fn candidates(&self, map: &ConeMap, pose: &Pose2D) -> Vec<ConeId> {
        map.within(&pose.position(), self.config.cone_mapping_threshold)
    }

    /// Nearest candidate per observation, matched iff strictly closer than
    /// `new_cone_threshold`. The output is aligned with `observations`.
    pub fn match_cones(
        &self,
        map: &ConeMap,
        candidates: &[ConeId],
        observations: &[Observation],
        pose: &Pose2D,
    ) -> Vec<Option<ConeMatch>> {
        observations
            .iter()
            .enumerate()
            .map(|(i, obs)| {
                let global = cone_to_global(pose, &obs.local);
                map.nearest_among(&global, candidates)
                    .filter(|&(_, d)| d < self.config.new_cone_threshold)
                    .map(|(cone, distance)| ConeMatch {
                        observation: i,
                        cone,
                        distance,
                    })
            })
            .collect()
    }

    /// Score a pose hypothesis.
    ///
    /// Each observation contributes its squared distance to the nearest
    /// candidate, truncated at `new_cone_threshold²` so unmatched
    /// observations cost the same wherever they land.
    pub fn evaluate_pose(
        &self,
        map: &ConeMap,
        candidates: &[ConeId],
        observations: &[Observation],
        pose: &Pose2D,
    ) -> (f64, Vec<ConeMatch>) {
        let cap = self.config.new_cone_threshold * self.config.new_cone_threshold;
        let mut cost = 0.0;
        let mut matches = Vec::new();

        for (i, obs) in observations.iter().enumerate() {
            let global = cone_to_global(pose, &obs.local);
            match map.nearest_among(&global, candidates) {
                Some((cone, distance)) if distance * distance < cap => {
                    cost += distance * distance;
                    matches.push(ConeMatch {
                        observation: i,
                        cone,
                        distance,
                    });
                }
                _ => cost += cap,
            }
        }
        (cost, matches)
    }

    /// Grid search around `predicted`. The prediction wins ties.
    pub fn search_pose(
        &self,
        map: &ConeMap,
        candidates: &[ConeId],
        observations: &[Observation],
        predicted: &Pose2D,
    ) -> PoseEstimate {
        let (cost, matches) = self.evaluate_pose(map, candidates, observations, predicted);
        let mut best = PoseEstimate {
            pose: *predicted,
            cost,
            matches,
        };
        if candidates.is_empty() || observations.is_empty() {
            return best;
        }

        let n = self.config.position_steps as i32;
        let m = self.config.heading_steps as i32;
        let step = if n > 0 {
            self.config.search_radius / n as f64
        } else {
            0.0
        };
        let heading_step = if m > 0 {
            self.config.search_heading / m as f64
        } else {
            0.0
        };

        for k in -m..=m {
            for i in -n..=n {
                for j in -n..=n {
                    if i == 0 && j == 0 && k == 0 {
                        continue;
                    }
                    let pose = Pose2D::new(
                        predicted.x + i as f64 * step,
                        predicted.y + j as f64 * step,
                        predicted.theta + k as f64 * heading_step,
                    );
                    let (cost, matches) = self.evaluate_pose(map, candidates, observations, &pose);
                    if cost < best.cost {
                        best = PoseEstimate {
                            pose,
                            cost,
                            matches,
                        };
                    }
                }
            }
        }
        best
    }

    /// Keep correspondences closer than `filter_threshold` at `pose`.
    pub fn filter_match(
        &self,
        map: &ConeMap,
        observations: &[Observation],
        pose: &Pose2D,
        matches: &[ConeMatch],
    ) -> Vec<ConeMatch> {
        matches
            .iter()
            .filter_map(|m| {
                let obs = observations.get(m.observation)?;
                let cone = map.get(m.cone)?;
                let distance = cone_to_measurement_distance(&cone_to_global(pose, &obs.local), cone);
                (distance < self.config.filter_threshold).then_some(ConeMatch { distance, ..*m })
            })
            .collect()
    }

    pub fn localizable(&self, matches: &[ConeMatch]) -> bool {
        matches.len() >= self.config.min_localization_matches
    }

    /// Refine `pose` by rigidly aligning the matched observations onto their
    /// cones.
    ///
    /// Returns `pose` unchanged when fewer than two correspondences remain or
    /// the observations are all at one point.
    pub fn localizer(
        &self,
        map: &ConeMap,
        observations: &[Observation],
        pose: &Pose2D,
        matches: &[ConeMatch],
    ) -> Pose2D {
        let pairs: Vec<(Point2D, Point2D)> = matches
            .iter()
            .filter_map(|m| Some((observations.get(m.observation)?.local, map.get(m.cone)?.position)))
            .collect();
        align(&pairs).unwrap_or(*pose)
    }
}

/// Closed-form least-squares rigid transform taking each `local` onto its
/// `global` partner.
fn align(pairs: &[(Point2D, Point2D)]) -> Option<Pose2D> {
    if pairs.len() < 2 {
        return None;
    }

    let n = pairs.len() as f64;
    let (mut lx, mut ly, mut gx, mut gy) = (0.0, 0.0, 0.0, 0.0);
    for (l, g) in pairs {
        lx += l.x;
        ly += l.y;
        gx += g.x;
        gy += g.y;
    }
    let local_mean = Point2D::new(lx / n, ly / n);
    let global_mean = Point2D::new(gx / n, gy / n);

    let (mut dot, mut cross, mut spread) = (0.0, 0.0, 0.0);
    for (l, g) in pairs {
        let (ax, ay) = (l.x - local_mean.x, l.y - local_mean.y);
        let (bx, by) = (g.x - global_mean.x, g.y - global_mean.y);
        dot += ax * bx + ay * by;
        cross += ax * by - ay * bx;
        spread += ax * ax + ay * ay;
    }
    if spread < 1e-9 {
        return None;
    }

    let theta = cross.atan2(dot);
    let (s, c) = theta.sin_cos();
    Some(Pose2D::new(
        global_mean.x - (c * local_mean.x - s * local_mean.y),
        global_mean.y - (s * local_mean.x + c * local_mean.y),
        theta,
    ))
}
