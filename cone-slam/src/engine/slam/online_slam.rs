//! Online cone SLAM.
//!
//! [`Slam`] is shared between the handler threads as `Arc<Slam>`. Each piece
//! of state sits behind its own lock so unrelated sensor streams never wait
//! on each other:
//!
//! | lock           | guards                                            |
//! |----------------|---------------------------------------------------|
//! | `cone_buffer`  | frame collector                                   |
//! | `sensor`       | offset calibration, latest odometry pose          |
//! | `yaw`          | latest yaw rate                                   |
//! | `ground_speed` | latest ground speed                               |
//! | `state_machine`| readiness flags                                   |
//! | `optimizer`    | pose graph, keyframe gate, loop-closure state     |
//! | `map`          | cones, keyframe poses, essential map              |
//! | `send`         | map broadcast cursor                              |
//!
//! Nested locks are always taken in the order `optimizer` → `map` → `send`.
//! The graph and the arrays are only changed while both `optimizer` and
//! `map` are held, so a snapshot taken under either lock never sees a cone
//! without its landmark node or an edge to a missing node.

use std::collections::HashMap;
use std::mem;
use std::path::Path;
use std::time::Instant;

use crossbeam_channel::{Sender, TrySendError};
use log::{debug, info, trace, warn};
use parking_lot::Mutex;

use super::frame_collector::{CompletedFrame, ConePart, FrameCollector};
use super::keyframe::KeyframeGate;
use super::loop_closure::LoopClosureMonitor;
use super::matcher::{ConeMatcher, Observation};
use super::offset::{GeoFix, OffsetCalibration, SplitPoseAssembler};
use crate::config::SlamConfig;
use crate::core::geometry::{cone_to_global, global_to_local};
use crate::core::math::RAD_TO_DEG;
use crate::core::types::{NodeId, Pose2D};
use crate::engine::graph::{
    EssentialGraph, GraphSnapshot, GraphSolver, Information2D, LevenbergMarquardt, NodeState,
    PointInformation, PoseGraph,
};
use crate::error::Result;
use crate::io::persistence::{self, ConeRecord, MAP_FILE_NAME, PATH_FILE_NAME};
use crate::map::{Cone, ConeId, ConeMap};

/// A committed keyframe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseRecord {
    pub node_id: NodeId,
    pub pose: Pose2D,
    pub timestamp_us: u64,
}

/// Half of a split pose.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SplitPose {
    Position { latitude: f64, longitude: f64 },
    Heading(f64),
}

/// A mapped cone as seen from the current pose.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConeReport {
    pub object_id: u32,
    pub azimuth_deg: f64,
    pub zenith_deg: f64,
    pub distance: f64,
    pub type_id: u32,
}

/// Output handed to the publisher thread.
#[derive(Debug, Clone, PartialEq)]
pub enum SlamEvent {
    /// Corrected pose in the localization frame.
    Pose { pose: Pose2D, timestamp_us: u64 },
    /// One packet of the map broadcast.
    Cones {
        cones: Vec<ConeReport>,
        timestamp_us: u64,
    },
}

/// Request for the background optimizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizeRequest {
    /// Full optimization followed by loop-closure completion.
    LoopClosure,
}

/// Outcome of one SLAM step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlamResult {
    /// Index of the committed keyframe, if the step created one.
    pub keyframe: Option<usize>,
    /// Pose committed for the keyframe.
    pub pose: Pose2D,
    /// Whether the pose came from landmark localization.
    pub localized: bool,
    /// Observations associated with existing cones.
    pub matched: usize,
    /// Cones created by this step.
    pub new_cones: usize,
    /// Whether this step started a loop closure.
    pub loop_closure: bool,
    /// Whether the frame was parked for replay after a running closure.
    pub parked: bool,
}

/// Summary counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlamStatus {
    pub keyframes: usize,
    pub cones: usize,
    pub active_cones: usize,
    pub graph_nodes: usize,
    pub graph_edges: usize,
    pub loop_closures: u32,
    pub loop_closing: bool,
    pub localization: bool,
    pub ready: bool,
}

#[derive(Debug, Clone, Copy)]
struct Reading {
    value: f64,
    sample_time_us: u64,
}

struct ConeBuffer {
    collector: FrameCollector,
    last_part: Option<Instant>,
}

struct SensorState {
    calibration: OffsetCalibration,
    split: SplitPoseAssembler,
    last_fix: GeoFix,
    /// Latest pose in the SLAM frame, before graph correction.
    odometry: Option<(u64, Pose2D)>,
}

impl SensorState {
    fn update(&mut self, fix: GeoFix, sample_time_us: u64) {
        self.last_fix = fix;
        self.calibration.lock_in(&fix);
        if let Some(pose) = self.calibration.apply(&fix) {
            self.odometry = Some((sample_time_us, pose));
        }
    }
}

struct MapState {
    cones: ConeMap,
    poses: Vec<PoseRecord>,
    essential_map: Vec<Cone>,
    landmark_cones: HashMap<NodeId, ConeId>,
    reference_path: Vec<Pose2D>,
}

struct ParkedFrame {
    pose_index: usize,
    node_id: NodeId,
    observations: Vec<Observation>,
}

struct OptimizerState {
    graph: PoseGraph,
    gate: KeyframeGate,
    monitor: LoopClosureMonitor,
    keyframes_since_local: usize,
    /// Node and uncorrected pose of the latest keyframe.
    last_keyframe: Option<(NodeId, Pose2D)>,
    /// Maps uncorrected poses onto the graph: `graph ≈ correction ∘ odometry`.
    correction: Pose2D,
    parked: Vec<ParkedFrame>,
    held_frame: Option<CompletedFrame>,
    localization: bool,
}

impl OptimizerState {
    fn refresh_correction(&mut self) {
        if let Some((id, odometry)) = self.last_keyframe
            && let Some(pose) = self.graph.pose(id)
        {
            self.correction = pose.compose(&odometry.inverse());
        }
    }
}

struct ModuleStatus {
    state_machine_ready: bool,
    ready: bool,
}

#[derive(Default)]
struct ConnectionStats {
    matched: usize,
    created: usize,
    revisit_gap: Option<usize>,
}

/// Cone landmark SLAM shared by the handler threads.
pub struct Slam {
    config: SlamConfig,
    matcher: ConeMatcher,
    solver: Box<dyn GraphSolver>,
    odometry_information: Information2D,
    observation_information: PointInformation,
    events: Sender<SlamEvent>,
    optimize_requests: Mutex<Option<Sender<OptimizeRequest>>>,

    cone_buffer: Mutex<ConeBuffer>,
    sensor: Mutex<SensorState>,
    map: Mutex<MapState>,
    optimizer: Mutex<OptimizerState>,
    yaw: Mutex<Option<Reading>>,
    ground_speed: Mutex<Option<Reading>>,
    state_machine: Mutex<ModuleStatus>,
    send: Mutex<usize>,
}

impl Slam {
    /// Create a SLAM instance with the Levenberg-Marquardt solver.
    pub fn new(config: SlamConfig, events: Sender<SlamEvent>) -> Self {
        let solver = LevenbergMarquardt::new(config.optimizer.clone());
        Self::with_solver(config, Box::new(solver), events)
    }

    /// Create a SLAM instance with a custom solver.
    pub fn with_solver(
        config: SlamConfig,
        solver: Box<dyn GraphSolver>,
        events: Sender<SlamEvent>,
    ) -> Self {
        let state_machine_ready = !config.session.wait_for_state_machine;
        Self {
            matcher: ConeMatcher::new(config.matcher.clone()),
            solver,
            odometry_information: config.noise.odometry_information(),
            observation_information: config.noise.observation_information(),
            events,
            optimize_requests: Mutex::new(None),
            cone_buffer: Mutex::new(ConeBuffer {
                collector: FrameCollector::new(config.collector.clone()),
                last_part: None,
            }),
            sensor: Mutex::new(SensorState {
                calibration: OffsetCalibration::new(config.reference.geodetic()),
                split: SplitPoseAssembler::default(),
                last_fix: GeoFix::default(),
                odometry: None,
            }),
            map: Mutex::new(MapState {
                cones: ConeMap::new(),
                poses: Vec::new(),
                essential_map: Vec::new(),
                landmark_cones: HashMap::new(),
                reference_path: Vec::new(),
            }),
            optimizer: Mutex::new(OptimizerState {
                graph: PoseGraph::new(),
                gate: KeyframeGate::new(config.keyframe.clone()),
                monitor: LoopClosureMonitor::new(config.loop_closure.clone()),
                keyframes_since_local: 0,
                last_keyframe: None,
                correction: Pose2D::identity(),
                parked: Vec::new(),
                held_frame: None,
                localization: false,
            }),
            yaw: Mutex::new(None),
            ground_speed: Mutex::new(None),
            state_machine: Mutex::new(ModuleStatus {
                state_machine_ready,
                ready: false,
            }),
            send: Mutex::new(0),
            config,
        }
    }

    pub fn config(&self) -> &SlamConfig {
        &self.config
    }

    /// Route loop-closure optimizations to a background thread.
    pub fn attach_optimizer(&self, requests: Sender<OptimizeRequest>) {
        *self.optimize_requests.lock() = Some(requests);
    }

    /// Run loop-closure optimizations synchronously again.
    pub fn detach_optimizer(&self) {
        self.optimize_requests.lock().take();
    }

    // ------------------------------------------------------------------
    // Sensor inputs
    // ------------------------------------------------------------------

    /// Full geolocation fix from the localization pipeline.
    pub fn next_pose(&self, fix: GeoFix, sample_time_us: u64) {
        self.sensor.lock().update(fix, sample_time_us);
    }

    /// Position or heading half of a split pose.
    pub fn next_split_pose(&self, part: SplitPose, sample_time_us: u64) {
        let mut sensor = self.sensor.lock();
        match part {
            SplitPose::Position {
                latitude,
                longitude,
            } => sensor.split.update_position(latitude, longitude),
            SplitPose::Heading(heading) => sensor.split.update_heading(heading),
        }
        let fix = sensor.split.fix();
        if fix.is_complete() {
            sensor.update(fix, sample_time_us);
        }
    }

    pub fn next_yaw_rate(&self, rate: f64, sample_time_us: u64) {
        *self.yaw.lock() = Some(Reading {
            value: rate,
            sample_time_us,
        });
    }

    pub fn next_ground_speed(&self, speed: f64, sample_time_us: u64) {
        *self.ground_speed.lock() = Some(Reading {
            value: speed,
            sample_time_us,
        });
    }

    /// Uncorrected pose at `sample_time_us`, extrapolated from the latest
    /// odometry with the latest yaw rate and speed.
    pub fn predict_pose(&self, sample_time_us: u64) -> Option<Pose2D> {
        let (odometry_time, pose) = self.sensor.lock().odometry?;
        let yaw = *self.yaw.lock();
        let speed = *self.ground_speed.lock();
        Some(predict_motion(
            &pose,
            odometry_time,
            sample_time_us,
            yaw,
            speed,
            self.config.motion.max_prediction_s,
        ))
    }

    // ------------------------------------------------------------------
    // Cone frames
    // ------------------------------------------------------------------

    /// Buffer one cone part. Returns a frame flushed by this part, if any.
    pub fn push_cone_part(
        &self,
        sample_time_us: u64,
        object_id: u32,
        part: ConePart,
    ) -> Option<CompletedFrame> {
        let mut buffer = self.cone_buffer.lock();
        buffer.last_part = Some(Instant::now());
        buffer.collector.push(sample_time_us, object_id, part)
    }

    /// Emit the buffered frame if it is complete or timed out at `now`.
    pub fn poll_cone_buffer(&self, now: Instant) -> Option<CompletedFrame> {
        let mut buffer = self.cone_buffer.lock();
        let quiet = buffer
            .last_part
            .map(|t| now.saturating_duration_since(t))
            .unwrap_or_default();
        buffer.collector.tick(quiet)
    }

    /// Run the SLAM step for a completed frame.
    ///
    /// A frame that arrives before any pose is known is held and processed
    /// ahead of the next frame; a newer held frame replaces an older one.
    pub fn receive_combined_message(&self, frame: CompletedFrame) -> Option<SlamResult> {
        let Some(odometry) = self.predict_pose(frame.timestamp_us) else {
            let mut opt = self.optimizer.lock();
            if let Some(old) = opt.held_frame.replace(frame) {
                debug!(
                    "No pose yet, dropping held frame at {} us",
                    old.timestamp_us
                );
            }
            return None;
        };

        let held = self.optimizer.lock().held_frame.take();
        if let Some(held) = held
            && let Some(held_odometry) = self.predict_pose(held.timestamp_us)
        {
            self.process_frame(&held, &held_odometry);
        }
        self.process_frame(&frame, &odometry)
    }

    fn process_frame(&self, frame: &CompletedFrame, odometry: &Pose2D) -> Option<SlamResult> {
        let observations: Vec<Observation> = frame
            .cones
            .iter()
            .map(|m| Observation::from_measurement(m, &self.config.sensor_mount))
            .collect();
        let observations = self.matcher.in_range(observations);

        let result = self.perform_slam(frame.timestamp_us, odometry, &observations)?;
        if result.loop_closure {
            self.request_full_optimization();
        }
        Some(result)
    }

    /// One SLAM step at an uncorrected odometry pose.
    ///
    /// Returns `None` when the keyframe gate rejects the pose.
    pub fn perform_slam(
        &self,
        timestamp_us: u64,
        odometry: &Pose2D,
        observations: &[Observation],
    ) -> Option<SlamResult> {
        let mut opt_guard = self.optimizer.lock();
        let opt = &mut *opt_guard;
        if !opt.gate.is_keyframe(timestamp_us, odometry) {
            return None;
        }
        let predicted = opt.correction.compose(odometry);

        let mut map_guard = self.map.lock();
        let map = &mut *map_guard;

        let closing = opt.monitor.is_closing();
        let (pose, localized) = if closing {
            (predicted, false)
        } else {
            self.localize(map, observations, &predicted)
        };
        if localized {
            opt.monitor.record_correction(&predicted, &pose);
        }

        let node_id = opt.graph.add_pose(pose, timestamp_us);
        if let Some((previous, previous_odometry)) = opt.last_keyframe
            && let Err(e) = opt.graph.add_odometry_edge(
                previous,
                node_id,
                previous_odometry.relative_to(odometry),
                self.odometry_information,
            )
        {
            warn!("Odometry edge {} -> {} rejected: {}", previous, node_id, e);
        }
        opt.last_keyframe = Some((node_id, *odometry));
        opt.correction = pose.compose(&odometry.inverse());

        let pose_index = map.poses.len();
        map.poses.push(PoseRecord {
            node_id,
            pose,
            timestamp_us,
        });

        let mut result = SlamResult {
            keyframe: Some(pose_index),
            pose,
            localized,
            ..SlamResult::default()
        };

        if closing {
            opt.parked.push(ParkedFrame {
                pose_index,
                node_id,
                observations: observations.to_vec(),
            });
            result.parked = true;
            debug!("Loop closure running, parked keyframe {}", pose_index);
        } else {
            let stats = self.create_connections(opt, map, pose_index, node_id, &pose, observations);
            result.matched = stats.matched;
            result.new_cones = stats.created;
            if !opt.localization {
                result.loop_closure = opt.monitor.check_offset(stats.revisit_gap);
            }
        }

        opt.keyframes_since_local += 1;
        if !closing
            && !result.loop_closure
            && opt.keyframes_since_local >= self.config.driver.optimize_every_keyframes
        {
            opt.keyframes_since_local = 0;
            self.run_essential(opt, map);
        }

        trace!(
            "Keyframe {} at ({:.2}, {:.2}, {:.2}), {} matched, {} new",
            pose_index, pose.x, pose.y, pose.theta, result.matched, result.new_cones
        );
        Some(result)
    }

    /// Landmark-based pose, or the prediction when not localizable.
    fn localize(
        &self,
        map: &MapState,
        observations: &[Observation],
        predicted: &Pose2D,
    ) -> (Pose2D, bool) {
        let candidates = self.matcher.candidates(&map.cones, predicted);
        if candidates.is_empty() || observations.is_empty() {
            return (*predicted, false);
        }

        let estimate = self
            .matcher
            .search_pose(&map.cones, &candidates, observations, predicted);
        let filtered =
            self.matcher
                .filter_match(&map.cones, observations, &estimate.pose, &estimate.matches);
        if !self.matcher.localizable(&filtered) {
            return (*predicted, false);
        }
        let pose = self
            .matcher
            .localizer(&map.cones, observations, &estimate.pose, &filtered);
        (pose, true)
    }

    /// Link a keyframe to the cones it observes, creating cones for
    /// unmatched observations.
    ///
    /// Caller holds the optimizer and map locks.
    fn create_connections(
        &self,
        opt: &mut OptimizerState,
        map: &mut MapState,
        pose_index: usize,
        node_id: NodeId,
        pose: &Pose2D,
        observations: &[Observation],
    ) -> ConnectionStats {
        let threshold = self.matcher.config().new_cone_threshold;
        let candidates = self.matcher.candidates(&map.cones, pose);
        let matches = self
            .matcher
            .match_cones(&map.cones, &candidates, observations, pose);

        let mut stats = ConnectionStats::default();
        let mut created: Vec<ConeId> = Vec::new();

        for (obs, matched) in observations.iter().zip(matches) {
            let global = cone_to_global(pose, &obs.local);

            let existing = match matched {
                Some(m) => Some(m.cone),
                None => map
                    .cones
                    .nearest_among(&global, &created)
                    .filter(|&(_, d)| d < threshold)
                    .map(|(id, _)| id),
            };

            let Some(cone_id) = existing else {
                if opt.localization {
                    continue;
                }
                let cone_id = map.cones.insert(global, obs.class, pose_index);
                let landmark = opt.graph.add_landmark(global, false);
                if let Some(cone) = map.cones.get_mut(cone_id) {
                    cone.graph_node = Some(landmark);
                }
                map.landmark_cones.insert(landmark, cone_id);
                self.add_observation(opt, node_id, landmark, obs);
                created.push(cone_id);
                stats.created += 1;
                continue;
            };

            let Some(cone) = map.cones.get_mut(cone_id) else {
                continue;
            };
            let landmark = match cone.graph_node {
                Some(landmark) => landmark,
                None => {
                    // Cone from a loaded map, first seen in this run
                    let landmark = opt.graph.add_landmark(cone.position, true);
                    cone.graph_node = Some(landmark);
                    map.landmark_cones.insert(landmark, cone_id);
                    landmark
                }
            };
            cone.add_observation(global, obs.class, pose_index);
            let gap = pose_index.saturating_sub(cone.first_seen_pose);
            self.add_observation(opt, node_id, landmark, obs);

            if !created.contains(&cone_id) {
                stats.matched += 1;
                stats.revisit_gap = Some(stats.revisit_gap.map_or(gap, |g| g.max(gap)));
            }
        }
        stats
    }

    fn add_observation(
        &self,
        opt: &mut OptimizerState,
        pose: NodeId,
        landmark: NodeId,
        obs: &Observation,
    ) {
        if let Err(e) =
            opt.graph
                .add_observation_edge(pose, landmark, obs.local, self.observation_information)
        {
            warn!("Observation edge {} -> {} rejected: {}", pose, landmark, e);
        }
    }

    // ------------------------------------------------------------------
    // Optimization
    // ------------------------------------------------------------------

    /// Local optimization over the latest keyframes.
    pub fn optimize_essential(&self) -> bool {
        let mut opt = self.optimizer.lock();
        let mut map = self.map.lock();
        self.run_essential(&mut opt, &mut map)
    }

    fn run_essential(&self, opt: &mut OptimizerState, map: &mut MapState) -> bool {
        let n = map.poses.len();
        if n < 2 {
            return false;
        }
        let start = n.saturating_sub(self.config.driver.essential_window.max(2));
        self.update_from_essential(opt, map, start, n - 1)
    }

    /// Optimize keyframes `start..=end` in the frame of keyframe `start`
    /// and copy the re-anchored result back.
    fn update_from_essential(
        &self,
        opt: &mut OptimizerState,
        map: &mut MapState,
        start: usize,
        end: usize,
    ) -> bool {
        let Some(range) = map.poses.get(start..=end) else {
            return false;
        };
        let ids: Vec<NodeId> = range.iter().map(|r| r.node_id).collect();
        let essential = match EssentialGraph::extract(&opt.graph, &ids) {
            Ok(essential) => essential,
            Err(e) => {
                warn!("Essential graph {}..={} not extracted: {}", start, end, e);
                return false;
            }
        };

        let result = self
            .solver
            .optimize(&essential.graph, self.config.driver.local_iterations);
        if !result.converged {
            warn!(
                "Local optimization {}..={} stopped ({:?}), keeping previous estimates",
                start, end, result.termination_reason
            );
            return false;
        }

        let estimates = essential.to_global(&result.estimates);
        self.update_map(opt, map, &estimates);
        let essential_map: Vec<Cone> = estimates
            .iter()
            .filter_map(|(id, _)| map.landmark_cones.get(id))
            .filter_map(|&cone| map.cones.get(cone).cloned())
            .collect();
        map.essential_map = essential_map;
        opt.refresh_correction();

        debug!(
            "Local optimization {}..={}: {} iterations, error {:.4} -> {:.4}",
            start, end, result.iterations, result.initial_error, result.final_error
        );
        true
    }

    /// Write global estimates into the graph, the keyframes and the cones.
    fn update_map(
        &self,
        opt: &mut OptimizerState,
        map: &mut MapState,
        estimates: &[(NodeId, NodeState)],
    ) {
        for &(id, state) in estimates {
            opt.graph.set_state(id, state);
            match state {
                NodeState::Pose(pose) => {
                    if let Ok(i) = map.poses.binary_search_by_key(&id, |r| r.node_id) {
                        map.poses[i].pose = pose;
                    }
                }
                NodeState::Landmark(position) => {
                    if let Some(&cone_id) = map.landmark_cones.get(&id)
                        && let Some(cone) = map.cones.get_mut(cone_id)
                    {
                        cone.position = position;
                    }
                }
            }
        }
    }

    /// Full graph optimization.
    ///
    /// The graph is copied under the lock, solved without it and the result
    /// applied under the lock again. Nodes added while solving move with the
    /// correction of the newest keyframe in the copy. Returns whether the
    /// result was committed.
    pub fn optimize_graph(&self) -> bool {
        let (snapshot, newest) = {
            let opt = self.optimizer.lock();
            (opt.graph.clone(), opt.last_keyframe.map(|(id, _)| id))
        };

        let started = Instant::now();
        let result = self
            .solver
            .optimize(&snapshot, self.config.optimizer.max_iterations);
        if !result.converged {
            warn!(
                "Full optimization stopped ({:?}) after {} iterations, keeping previous estimates",
                result.termination_reason, result.iterations
            );
            return false;
        }

        let mut opt_guard = self.optimizer.lock();
        let opt = &mut *opt_guard;
        let mut map_guard = self.map.lock();
        let map = &mut *map_guard;

        let carry = newest
            .and_then(|id| {
                let before = snapshot.pose(id)?;
                let after = result.estimates.iter().find_map(|&(n, state)| match state {
                    NodeState::Pose(p) if n == id => Some(p),
                    _ => None,
                })?;
                Some(after.compose(&before.inverse()))
            })
            .unwrap_or_else(Pose2D::identity);

        let mut estimates = result.estimates;
        for node in opt.graph.nodes() {
            if node.fixed || snapshot.get_node(node.id).is_some() {
                continue;
            }
            let moved = match node.state {
                NodeState::Pose(p) => NodeState::Pose(carry.compose(&p)),
                NodeState::Landmark(l) => NodeState::Landmark(carry.transform_point(&l)),
            };
            estimates.push((node.id, moved));
        }
        self.update_map(opt, map, &estimates);
        opt.refresh_correction();

        info!(
            "Full optimization: {} nodes, {} iterations, error {:.4} -> {:.4} in {:?}",
            snapshot.num_nodes(),
            result.iterations,
            result.initial_error,
            result.final_error,
            started.elapsed()
        );
        true
    }

    fn request_full_optimization(&self) {
        let requests = self.optimize_requests.lock().clone();
        match requests {
            Some(tx) => match tx.try_send(OptimizeRequest::LoopClosure) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => debug!("Optimization already pending"),
                Err(TrySendError::Disconnected(_)) => {
                    warn!("Optimizer thread gone, optimizing synchronously");
                    self.run_loop_closure();
                }
            },
            None => {
                self.run_loop_closure();
            }
        }
    }

    /// Full optimization followed by loop-closure completion.
    pub fn run_loop_closure(&self) -> bool {
        let converged = self.optimize_graph();
        self.complete_loop_closure();
        converged
    }

    /// Finish a running loop closure and replay the parked frames against
    /// the corrected map.
    pub fn complete_loop_closure(&self) {
        let replayed = {
            let mut opt_guard = self.optimizer.lock();
            let opt = &mut *opt_guard;
            if !opt.monitor.is_closing() {
                return;
            }
            opt.monitor.complete();
            let parked = mem::take(&mut opt.parked);

            let mut map_guard = self.map.lock();
            let map = &mut *map_guard;
            for frame in &parked {
                let Some(pose) = opt.graph.pose(frame.node_id) else {
                    continue;
                };
                self.create_connections(
                    opt,
                    map,
                    frame.pose_index,
                    frame.node_id,
                    &pose,
                    &frame.observations,
                );
            }
            parked.len()
        };

        info!("Loop closure complete, replayed {} parked keyframes", replayed);
        if self.config.map_filter.filter_after_loop_closure {
            self.filter_map();
        }
    }

    // ------------------------------------------------------------------
    // Map and output
    // ------------------------------------------------------------------

    /// Deactivate weak and duplicate cones. Returns how many were removed.
    pub fn filter_map(&self) -> usize {
        let removed = self.map.lock().cones.filter(&self.config.map_filter);
        if !removed.is_empty() {
            info!("Map filter deactivated {} cones", removed.len());
        }
        removed.len()
    }

    /// Publish the next packet of the map broadcast. Returns its size.
    pub fn send_cones(&self) -> usize {
        let Some(pose) = self.draw_current_pose() else {
            return 0;
        };

        let (cones, timestamp_us) = {
            let map = self.map.lock();
            let active: Vec<&Cone> = map.cones.active().collect();
            if active.is_empty() {
                return 0;
            }
            let mut cursor = self.send.lock();
            let start = *cursor % active.len();
            let end = (start + self.config.output.cones_per_packet).min(active.len());
            *cursor = if end >= active.len() { 0 } else { end };

            let cones: Vec<ConeReport> = active[start..end]
                .iter()
                .filter_map(|cone| cone_report(&pose, cone))
                .collect();
            (cones, map.poses.last().map_or(0, |r| r.timestamp_us))
        };

        let count = cones.len();
        self.emit(SlamEvent::Cones {
            cones,
            timestamp_us,
        });
        count
    }

    /// Publish the corrected pose in the localization frame.
    pub fn send_pose(&self) -> Option<Pose2D> {
        let pose = self.draw_current_pose()?;
        let (timestamp_us, external) = {
            let sensor = self.sensor.lock();
            let timestamp_us = sensor.odometry.map_or(0, |(t, _)| t);
            (timestamp_us, sensor.calibration.to_external(&pose)?)
        };
        self.emit(SlamEvent::Pose {
            pose: external,
            timestamp_us,
        });
        Some(external)
    }

    fn emit(&self, event: SlamEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => debug!("Publisher queue full, dropping event"),
            Err(TrySendError::Disconnected(_)) => trace!("Publisher gone, dropping event"),
        }
    }

    // ------------------------------------------------------------------
    // Module control
    // ------------------------------------------------------------------

    /// State machine readiness; state 2 means ready.
    pub fn set_state_machine_status(&self, state: i32) {
        let mut status = self.state_machine.lock();
        status.state_machine_ready = state == 2;
        if !status.state_machine_ready {
            status.ready = false;
        }
    }

    /// Retry offset lock-in and update the module readiness.
    pub fn initialize_module(&self) -> bool {
        let locked = {
            let mut sensor = self.sensor.lock();
            let fix = sensor.last_fix;
            sensor.calibration.lock_in(&fix)
        };
        let mut status = self.state_machine.lock();
        let ready = locked && status.state_machine_ready;
        if ready && !status.ready {
            info!("Module ready");
        }
        status.ready = ready;
        ready
    }

    pub fn module_state(&self) -> bool {
        self.state_machine.lock().ready
    }

    pub fn is_localization_mode(&self) -> bool {
        self.optimizer.lock().localization
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    /// Active cones at their optimized positions.
    pub fn draw_cones(&self) -> Vec<Cone> {
        self.map.lock().cones.active().cloned().collect()
    }

    /// Active cones at the mean of their raw observations.
    pub fn draw_raw_cones(&self) -> Vec<Cone> {
        let map = self.map.lock();
        map.cones
            .active()
            .map(|cone| {
                let mut raw = cone.clone();
                raw.position = cone.mean_observation();
                raw
            })
            .collect()
    }

    /// Cones from the latest local optimization.
    pub fn draw_local_optimized_cones(&self) -> Vec<Cone> {
        self.map.lock().essential_map.clone()
    }

    pub fn draw_poses(&self) -> Vec<PoseRecord> {
        self.map.lock().poses.clone()
    }

    /// Latest odometry pose mapped through the graph correction.
    pub fn draw_current_pose(&self) -> Option<Pose2D> {
        let correction = self.optimizer.lock().correction;
        let (_, odometry) = self.sensor.lock().odometry?;
        Some(correction.compose(&odometry))
    }

    pub fn draw_graph(&self) -> GraphSnapshot {
        self.optimizer.lock().graph.snapshot()
    }

    /// Path loaded with [`Slam::load_path`].
    pub fn draw_reference_path(&self) -> Vec<Pose2D> {
        self.map.lock().reference_path.clone()
    }

    pub fn status(&self) -> SlamStatus {
        let (graph_nodes, graph_edges, loop_closures, loop_closing, localization) = {
            let opt = self.optimizer.lock();
            (
                opt.graph.num_nodes(),
                opt.graph.num_edges(),
                opt.monitor.closures(),
                opt.monitor.is_closing(),
                opt.localization,
            )
        };
        let (keyframes, cones, active_cones) = {
            let map = self.map.lock();
            (map.poses.len(), map.cones.len(), map.cones.num_active())
        };
        SlamStatus {
            keyframes,
            cones,
            active_cones,
            graph_nodes,
            graph_edges,
            loop_closures,
            loop_closing,
            localization,
            ready: self.module_state(),
        }
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Append the cones of a map file. Switches to localization mode when
    /// configured. Returns the number of cones loaded.
    pub fn load_map(&self, path: &Path) -> Result<usize> {
        let records = persistence::load_map(path)?;
        let mut opt = self.optimizer.lock();
        let mut map = self.map.lock();
        for record in &records {
            map.cones
                .insert_record(record.position, record.class, record.observations);
        }
        if self.config.persistence.localization && !records.is_empty() {
            opt.localization = true;
            info!("Localization mode on {} preloaded cones", records.len());
        }
        Ok(records.len())
    }

    /// Load a reference path for display.
    pub fn load_path(&self, path: &Path) -> Result<usize> {
        let poses = persistence::load_path(path)?;
        let count = poses.len();
        self.map.lock().reference_path = poses;
        Ok(count)
    }

    /// Write the active cones.
    pub fn save_map(&self, path: &Path) -> Result<()> {
        let records: Vec<ConeRecord> = {
            let map = self.map.lock();
            map.cones
                .active()
                .map(|cone| ConeRecord {
                    id: cone.id,
                    position: cone.position,
                    class: cone.class(),
                    observations: cone.observations(),
                })
                .collect()
        };
        persistence::save_map(path, &records)
    }

    /// Write the keyframe path.
    pub fn save_path(&self, path: &Path) -> Result<()> {
        let poses: Vec<Pose2D> = self.map.lock().poses.iter().map(|r| r.pose).collect();
        persistence::save_path(path, &poses)
    }

    /// Final optimization, filtering and persistence at shutdown.
    pub fn tear_down(&self) -> Result<()> {
        self.detach_optimizer();
        if self.config.driver.optimize_on_teardown && !self.map.lock().poses.is_empty() {
            self.optimize_graph();
        }
        self.complete_loop_closure();
        self.filter_map();

        if let Some(dir) = &self.config.persistence.output_dir {
            self.save_map(&dir.join(MAP_FILE_NAME))?;
            self.save_path(&dir.join(PATH_FILE_NAME))?;
        }
        let status = self.status();
        info!(
            "SLAM shut down: {} keyframes, {} active cones, {} loop closures",
            status.keyframes, status.active_cones, status.loop_closures
        );
        Ok(())
    }
}

/// Constant turn-rate extrapolation of `pose` from `from_us` to `to_us`.
///
/// Falls back to `pose` when the gap is not in `(0, max_s]` or either
/// reading is missing or older than `max_s` at `to_us`.
fn predict_motion(
    pose: &Pose2D,
    from_us: u64,
    to_us: u64,
    yaw_rate: Option<Reading>,
    speed: Option<Reading>,
    max_s: f64,
) -> Pose2D {
    if to_us <= from_us {
        return *pose;
    }
    let dt = (to_us - from_us) as f64 * 1e-6;
    if dt > max_s {
        return *pose;
    }
    let fresh = |reading: Option<Reading>| {
        reading
            .filter(|r| to_us.abs_diff(r.sample_time_us) as f64 * 1e-6 <= max_s)
            .map(|r| r.value)
    };
    let (Some(w), Some(v)) = (fresh(yaw_rate), fresh(speed)) else {
        return *pose;
    };

    let theta = pose.theta + w * dt;
    if w.abs() < 1e-6 {
        let (s, c) = pose.theta.sin_cos();
        return Pose2D::new(pose.x + v * dt * c, pose.y + v * dt * s, theta);
    }
    let r = v / w;
    Pose2D::new(
        pose.x + r * (theta.sin() - pose.theta.sin()),
        pose.y + r * (pose.theta.cos() - theta.cos()),
        theta,
    )
}

/// Wire report of `cone` relative to `pose`; `None` when the id does not
/// fit the wire object id.
fn cone_report(pose: &Pose2D, cone: &Cone) -> Option<ConeReport> {
    let object_id = match u32::try_from(cone.id) {
        Ok(id) => id,
        Err(_) => {
            warn!("Cone {} has no wire object id, not broadcast", cone.id);
            return None;
        }
    };
    let local = global_to_local(pose, &cone.position);
    Some(ConeReport {
        object_id,
        azimuth_deg: local.y.atan2(local.x) * RAD_TO_DEG,
        zenith_deg: 0.0,
        distance: local.norm(),
        type_id: cone.class().type_id(),
    })
}
