//! Graph optimization using Gauss-Newton with Levenberg-Marquardt damping.
//!
//! Minimizes
//!
//! ```text
//! F(x) = Σ e(xi, xj, zij)ᵀ · Ωij · e(xi, xj, zij)
//! ```
//!
//! over all free nodes, where the error of an edge is
//!
//! ```text
//! odometry:     e = (xi⁻¹ ⊕ xj) − z          (angle normalized)
//! observation:  e = R(θi)ᵀ · (l − ti) − z
//! ```
//!
//! Each iteration solves the damped normal equations `(H + λD) Δx = −b`
//! with a dense Cholesky factorization. The solver works on a copy of the
//! node estimates and never touches the graph; callers decide whether to
//! commit [`OptimizationResult::estimates`].

use nalgebra::{DMatrix, DVector, Matrix2, Matrix2x3, Matrix3, SMatrix, SVector, Vector2, Vector3};
use serde::{Deserialize, Serialize};

use super::pose_graph::{EdgeMeasurement, NodeState, PoseGraph};
use crate::core::math::normalize_angle;
use crate::core::types::{NodeId, Point2D, Pose2D};

/// Result of graph optimization.
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    /// Number of iterations performed.
    pub iterations: u32,

    /// Initial chi-squared error.
    pub initial_error: f64,

    /// Final chi-squared error.
    pub final_error: f64,

    /// Whether the optimization converged within the budget.
    pub converged: bool,

    /// Reason for termination.
    pub termination_reason: TerminationReason,

    /// Optimized estimates of every free node.
    pub estimates: Vec<(NodeId, NodeState)>,
}

impl OptimizationResult {
    fn finished(
        iterations: u32,
        initial_error: f64,
        final_error: f64,
        termination_reason: TerminationReason,
        estimates: Vec<(NodeId, NodeState)>,
    ) -> Self {
        Self {
            iterations,
            initial_error,
            final_error,
            converged: matches!(
                termination_reason,
                TerminationReason::Converged
                    | TerminationReason::NoEdges
                    | TerminationReason::NoFreeNodes
            ),
            termination_reason,
            estimates,
        }
    }
}

/// Reason for optimization termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Converged (error change below threshold).
    Converged,

    /// Iteration budget exhausted.
    MaxIterations,

    /// Damping grew without finding a descent step.
    Diverged,

    /// Linear system solve failed.
    SolveFailed,

    /// No edges to optimize.
    NoEdges,

    /// Every node is fixed.
    NoFreeNodes,
}

/// Narrow solver interface used by the SLAM driver.
///
/// Implementations must not mutate the graph. Estimates are only committed
/// by the caller when `converged` is true.
pub trait GraphSolver: Send + Sync {
    fn optimize(&self, graph: &PoseGraph, iteration_budget: u32) -> OptimizationResult;
}

/// Configuration for graph optimization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphOptimizerConfig {
    /// Default iteration budget.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Convergence threshold for relative error change.
    #[serde(default = "default_convergence_threshold")]
    pub convergence_threshold: f64,

    /// Initial Levenberg-Marquardt damping factor.
    #[serde(default = "default_damping_factor")]
    pub damping_factor: f64,

    /// Whether to use Levenberg-Marquardt (vs pure Gauss-Newton).
    #[serde(default = "default_use_levenberg_marquardt")]
    pub use_levenberg_marquardt: bool,

    /// Fix the first pose when no node is fixed (gauge freedom).
    #[serde(default = "default_fix_first_pose")]
    pub fix_first_pose: bool,
}

fn default_max_iterations() -> u32 {
    50
}

fn default_convergence_threshold() -> f64 {
    1e-6
}

fn default_damping_factor() -> f64 {
    1e-3
}

fn default_use_levenberg_marquardt() -> bool {
    true
}

fn default_fix_first_pose() -> bool {
    true
}

impl Default for GraphOptimizerConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            convergence_threshold: default_convergence_threshold(),
            damping_factor: default_damping_factor(),
            use_levenberg_marquardt: default_use_levenberg_marquardt(),
            fix_first_pose: default_fix_first_pose(),
        }
    }
}

/// Errors below this are treated as an exact fit.
const ZERO_ERROR: f64 = 1e-12;

/// Damping above this means no descent direction exists.
const MAX_LAMBDA: f64 = 1e10;

/// Column offsets of free nodes in the linear system.
struct Layout {
    offsets: Vec<Option<usize>>,
    dim: usize,
}

impl Layout {
    fn new(graph: &PoseGraph, fix_first_pose: bool) -> Self {
        let nodes = graph.nodes();
        let gauge = if fix_first_pose && !nodes.iter().any(|n| n.fixed) {
            nodes
                .iter()
                .position(|n| matches!(n.state, NodeState::Pose(_)))
        } else {
            None
        };

        let mut dim = 0;
        let offsets = nodes
            .iter()
            .enumerate()
            .map(|(idx, node)| {
                if node.fixed || Some(idx) == gauge {
                    None
                } else {
                    let offset = dim;
                    dim += node.state.dim();
                    Some(offset)
                }
            })
            .collect();

        Self { offsets, dim }
    }
}

/// Dense Gauss-Newton / Levenberg-Marquardt solver.
pub struct LevenbergMarquardt {
    config: GraphOptimizerConfig,
}

impl LevenbergMarquardt {
    /// Create a new graph optimizer.
    pub fn new(config: GraphOptimizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GraphOptimizerConfig {
        &self.config
    }

    /// Chi-squared error of the graph at its current estimates.
    pub fn chi_squared(graph: &PoseGraph) -> f64 {
        let states: Vec<NodeState> = graph.nodes().iter().map(|n| n.state).collect();
        compute_chi_squared(graph, &states)
    }
}

impl Default for LevenbergMarquardt {
    fn default() -> Self {
        Self::new(GraphOptimizerConfig::default())
    }
}

impl GraphSolver for LevenbergMarquardt {
    fn optimize(&self, graph: &PoseGraph, iteration_budget: u32) -> OptimizationResult {
        let mut states: Vec<NodeState> = graph.nodes().iter().map(|n| n.state).collect();
        let initial_error = compute_chi_squared(graph, &states);

        if graph.num_edges() == 0 {
            return OptimizationResult::finished(
                0,
                initial_error,
                initial_error,
                TerminationReason::NoEdges,
                Vec::new(),
            );
        }

        let layout = Layout::new(graph, self.config.fix_first_pose);
        if layout.dim == 0 {
            return OptimizationResult::finished(
                0,
                initial_error,
                initial_error,
                TerminationReason::NoFreeNodes,
                Vec::new(),
            );
        }

        let free_estimates = |states: &[NodeState]| -> Vec<(NodeId, NodeState)> {
            graph
                .nodes()
                .iter()
                .zip(states)
                .zip(&layout.offsets)
                .filter(|(_, offset)| offset.is_some())
                .map(|((node, state), _)| (node.id, *state))
                .collect()
        };

        let mut current_error = initial_error;
        let mut lambda = self.config.damping_factor;
        let mut iterations = 0;

        while iterations < iteration_budget {
            if current_error < ZERO_ERROR {
                return OptimizationResult::finished(
                    iterations,
                    initial_error,
                    current_error,
                    TerminationReason::Converged,
                    free_estimates(&states),
                );
            }
            iterations += 1;

            let (mut h, b) = build_linear_system(graph, &states, &layout);

            if self.config.use_levenberg_marquardt {
                for i in 0..layout.dim {
                    h[(i, i)] += lambda * h[(i, i)].max(1.0);
                }
            }

            let dx = match h.cholesky() {
                Some(chol) => chol.solve(&(-b)),
                None => {
                    return OptimizationResult::finished(
                        iterations,
                        initial_error,
                        current_error,
                        TerminationReason::SolveFailed,
                        free_estimates(&states),
                    );
                }
            };

            let candidate = apply_update(&states, &layout, &dx);
            let new_error = compute_chi_squared(graph, &candidate);

            if new_error > current_error {
                // At the minimum a step can only add rounding noise.
                let relative_rise = (new_error - current_error) / current_error.max(ZERO_ERROR);
                if relative_rise < self.config.convergence_threshold {
                    return OptimizationResult::finished(
                        iterations,
                        initial_error,
                        current_error,
                        TerminationReason::Converged,
                        free_estimates(&states),
                    );
                }

                if !self.config.use_levenberg_marquardt {
                    return OptimizationResult::finished(
                        iterations,
                        initial_error,
                        current_error,
                        TerminationReason::Diverged,
                        free_estimates(&states),
                    );
                }

                lambda *= 10.0;
                if lambda > MAX_LAMBDA {
                    return OptimizationResult::finished(
                        iterations,
                        initial_error,
                        current_error,
                        TerminationReason::Diverged,
                        free_estimates(&states),
                    );
                }
                continue;
            }

            if self.config.use_levenberg_marquardt {
                lambda = (lambda * 0.1).max(1e-10);
            }

            let relative_change = (current_error - new_error) / current_error.max(ZERO_ERROR);
            states = candidate;
            current_error = new_error;

            if relative_change < self.config.convergence_threshold || current_error < ZERO_ERROR {
                return OptimizationResult::finished(
                    iterations,
                    initial_error,
                    current_error,
                    TerminationReason::Converged,
                    free_estimates(&states),
                );
            }
        }

        OptimizationResult::finished(
            iterations,
            initial_error,
            current_error,
            TerminationReason::MaxIterations,
            free_estimates(&states),
        )
    }
}

/// Chi-squared error for a set of node estimates laid out like the graph arena.
fn compute_chi_squared(graph: &PoseGraph, states: &[NodeState]) -> f64 {
    let mut chi2 = 0.0;

    for edge in graph.edges() {
        let (Some(i), Some(j)) = (graph.get_node_index(edge.from), graph.get_node_index(edge.to))
        else {
            continue;
        };

        match (states[i], states[j], edge.measurement) {
            (
                NodeState::Pose(xi),
                NodeState::Pose(xj),
                EdgeMeasurement::Odometry {
                    measurement,
                    information,
                },
            ) => {
                let e = odometry_error(&xi, &xj, &measurement);
                chi2 += e.dot(&(information.as_matrix() * e));
            }
            (
                NodeState::Pose(xi),
                NodeState::Landmark(l),
                EdgeMeasurement::Observation {
                    measurement,
                    information,
                },
            ) => {
                let e = observation_error(&xi, &l, &measurement);
                chi2 += e.dot(&(information.as_matrix() * e));
            }
            _ => {}
        }
    }

    chi2
}

/// Error of an odometry edge: inv(xi) ⊕ xj − z.
fn odometry_error(xi: &Pose2D, xj: &Pose2D, measurement: &Pose2D) -> Vector3<f64> {
    let (sin_i, cos_i) = xi.theta.sin_cos();
    let dx = xj.x - xi.x;
    let dy = xj.y - xi.y;
    Vector3::new(
        cos_i * dx + sin_i * dy - measurement.x,
        -sin_i * dx + cos_i * dy - measurement.y,
        normalize_angle(xj.theta - xi.theta - measurement.theta),
    )
}

/// Error of an observation edge: R(θi)ᵀ(l − ti) − z.
fn observation_error(xi: &Pose2D, landmark: &Point2D, measurement: &Point2D) -> Vector2<f64> {
    let local = xi.inverse_transform_point(landmark);
    Vector2::new(local.x - measurement.x, local.y - measurement.y)
}

/// Jacobians of the odometry error w.r.t. xi and xj.
fn odometry_jacobians(xi: &Pose2D, xj: &Pose2D) -> (Matrix3<f64>, Matrix3<f64>) {
    let (sin_i, cos_i) = xi.theta.sin_cos();
    let dx = xj.x - xi.x;
    let dy = xj.y - xi.y;

    let ji = Matrix3::new(
        -cos_i, -sin_i, -sin_i * dx + cos_i * dy, //
        sin_i, -cos_i, -cos_i * dx - sin_i * dy, //
        0.0, 0.0, -1.0,
    );
    let jj = Matrix3::new(
        cos_i, sin_i, 0.0, //
        -sin_i, cos_i, 0.0, //
        0.0, 0.0, 1.0,
    );
    (ji, jj)
}

/// Jacobians of the observation error w.r.t. the pose and the landmark.
fn observation_jacobians(xi: &Pose2D, landmark: &Point2D) -> (Matrix2x3<f64>, Matrix2<f64>) {
    let (sin_i, cos_i) = xi.theta.sin_cos();
    let dx = landmark.x - xi.x;
    let dy = landmark.y - xi.y;

    let jp = Matrix2x3::new(
        -cos_i, -sin_i, -sin_i * dx + cos_i * dy, //
        sin_i, -cos_i, -cos_i * dx - sin_i * dy,
    );
    let jl = Matrix2::new(
        cos_i, sin_i, //
        -sin_i, cos_i,
    );
    (jp, jl)
}

/// Build the normal equations H·Δx = −b over free nodes.
fn build_linear_system(
    graph: &PoseGraph,
    states: &[NodeState],
    layout: &Layout,
) -> (DMatrix<f64>, DVector<f64>) {
    let mut h = DMatrix::zeros(layout.dim, layout.dim);
    let mut b = DVector::zeros(layout.dim);

    for edge in graph.edges() {
        let (Some(i), Some(j)) = (graph.get_node_index(edge.from), graph.get_node_index(edge.to))
        else {
            continue;
        };
        let (oi, oj) = (layout.offsets[i], layout.offsets[j]);

        match (states[i], states[j], edge.measurement) {
            (
                NodeState::Pose(xi),
                NodeState::Pose(xj),
                EdgeMeasurement::Odometry {
                    measurement,
                    information,
                },
            ) => {
                let e = odometry_error(&xi, &xj, &measurement);
                let (ji, jj) = odometry_jacobians(&xi, &xj);
                accumulate(&mut h, &mut b, oi, oj, &ji, &jj, &information.as_matrix(), &e);
            }
            (
                NodeState::Pose(xi),
                NodeState::Landmark(l),
                EdgeMeasurement::Observation {
                    measurement,
                    information,
                },
            ) => {
                let e = observation_error(&xi, &l, &measurement);
                let (jp, jl) = observation_jacobians(&xi, &l);
                accumulate(&mut h, &mut b, oi, oj, &jp, &jl, &information.as_matrix(), &e);
            }
            _ => {}
        }
    }

    (h, b)
}

/// Add one edge's contribution to H and b. `None` offsets are fixed nodes.
#[allow(clippy::too_many_arguments)]
fn accumulate<const E: usize, const DI: usize, const DJ: usize>(
    h: &mut DMatrix<f64>,
    b: &mut DVector<f64>,
    oi: Option<usize>,
    oj: Option<usize>,
    ji: &SMatrix<f64, E, DI>,
    jj: &SMatrix<f64, E, DJ>,
    omega: &SMatrix<f64, E, E>,
    error: &SVector<f64, E>,
) {
    let omega_e = omega * error;
    let omega_ji = omega * ji;
    let omega_jj = omega * jj;

    if let Some(oi) = oi {
        add_block(h, oi, oi, &(ji.transpose() * omega_ji));
        add_segment(b, oi, &(ji.transpose() * omega_e));
    }
    if let Some(oj) = oj {
        add_block(h, oj, oj, &(jj.transpose() * omega_jj));
        add_segment(b, oj, &(jj.transpose() * omega_e));
    }
    if let (Some(oi), Some(oj)) = (oi, oj) {
        let h_ij = ji.transpose() * omega_jj;
        add_block(h, oi, oj, &h_ij);
        add_block(h, oj, oi, &h_ij.transpose());
    }
}

fn add_block<const R: usize, const C: usize>(
    h: &mut DMatrix<f64>,
    row: usize,
    col: usize,
    block: &SMatrix<f64, R, C>,
) {
    for r in 0..R {
        for c in 0..C {
            h[(row + r, col + c)] += block[(r, c)];
        }
    }
}

fn add_segment<const R: usize>(b: &mut DVector<f64>, row: usize, segment: &SVector<f64, R>) {
    for r in 0..R {
        b[row + r] += segment[r];
    }
}

/// Apply Δx to the free nodes, returning the new estimates.
fn apply_update(states: &[NodeState], layout: &Layout, dx: &DVector<f64>) -> Vec<NodeState> {
    states
        .iter()
        .zip(&layout.offsets)
        .map(|(state, offset)| match (state, offset) {
            (NodeState::Pose(p), Some(o)) => {
                NodeState::Pose(Pose2D::new(p.x + dx[*o], p.y + dx[o + 1], p.theta + dx[o + 2]))
            }
            (NodeState::Landmark(l), Some(o)) => {
                NodeState::Landmark(Point2D::new(l.x + dx[*o], l.y + dx[o + 1]))
            }
            (state, None) => *state,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::graph::pose_graph::{Information2D, PointInformation};
    use approx::assert_relative_eq;

    fn estimate(result: &OptimizationResult, id: NodeId) -> Option<NodeState> {
        result
            .estimates
            .iter()
            .find(|(n, _)| *n == id)
            .map(|(_, s)| *s)
    }

    #[test]
    fn test_empty_graph() {
        let graph = PoseGraph::new();
        let result = LevenbergMarquardt::default().optimize(&graph, 10);
        assert!(result.converged);
        assert_eq!(result.termination_reason, TerminationReason::NoEdges);
        assert!(result.estimates.is_empty());
    }

    #[test]
    fn test_consistent_chain_converges_immediately() {
        let mut graph = PoseGraph::new();
        let a = graph.add_pose(Pose2D::identity(), 0);
        let b = graph.add_pose(Pose2D::new(1.0, 0.0, 0.0), 1);
        graph
            .add_odometry_edge(a, b, Pose2D::new(1.0, 0.0, 0.0), Information2D::default())
            .unwrap();

        let result = LevenbergMarquardt::default().optimize(&graph, 10);
        assert!(result.converged);
        assert_eq!(result.iterations, 0);
        assert_relative_eq!(result.final_error, 0.0);
    }

    #[test]
    fn test_pulls_pose_onto_measurement() {
        let mut graph = PoseGraph::new();
        let a = graph.add_pose(Pose2D::identity(), 0);
        let b = graph.add_pose(Pose2D::new(1.3, 0.2, 0.1), 1);
        graph
            .add_odometry_edge(a, b, Pose2D::new(1.0, 0.0, 0.0), Information2D::default())
            .unwrap();

        let result = LevenbergMarquardt::default().optimize(&graph, 50);
        assert!(result.converged);
        assert!(result.final_error < result.initial_error);
        assert!(estimate(&result, a).is_none(), "first pose is the gauge");

        let Some(NodeState::Pose(p)) = estimate(&result, b) else {
            panic!("missing pose estimate");
        };
        assert_relative_eq!(p.x, 1.0, epsilon = 1e-4);
        assert_relative_eq!(p.y, 0.0, epsilon = 1e-4);
        assert_relative_eq!(p.theta, 0.0, epsilon = 1e-4);
    }

    #[test]
    fn test_landmark_triangulated_from_two_poses() {
        let mut graph = PoseGraph::new();
        let a = graph.add_pose(Pose2D::identity(), 0);
        let b = graph.add_pose(Pose2D::new(2.0, 0.0, 0.0), 1);
        graph
            .add_odometry_edge(a, b, Pose2D::new(2.0, 0.0, 0.0), Information2D::default())
            .unwrap();

        // True landmark at (1, 1); initial guess off by half a meter.
        let l = graph.add_landmark(Point2D::new(1.5, 0.6), false);
        graph
            .add_observation_edge(a, l, Point2D::new(1.0, 1.0), PointInformation::default())
            .unwrap();
        graph
            .add_observation_edge(b, l, Point2D::new(-1.0, 1.0), PointInformation::default())
            .unwrap();

        let result = LevenbergMarquardt::default().optimize(&graph, 50);
        assert!(result.converged);
        let Some(NodeState::Landmark(p)) = estimate(&result, l) else {
            panic!("missing landmark estimate");
        };
        assert_relative_eq!(p.x, 1.0, epsilon = 1e-4);
        assert_relative_eq!(p.y, 1.0, epsilon = 1e-4);
    }

    #[test]
    fn test_fixed_nodes_not_estimated() {
        let mut graph = PoseGraph::new();
        let a = graph.add_pose(Pose2D::identity(), 0);
        let l = graph.add_landmark(Point2D::new(1.0, 0.0), true);
        graph
            .add_observation_edge(a, l, Point2D::new(1.2, 0.0), PointInformation::default())
            .unwrap();

        // With a fixed landmark, the first pose is free and moves instead.
        let result = LevenbergMarquardt::default().optimize(&graph, 50);
        assert!(result.converged);
        assert!(estimate(&result, l).is_none());
        let Some(NodeState::Pose(p)) = estimate(&result, a) else {
            panic!("missing pose estimate");
        };
        assert_relative_eq!(p.x, -0.2, epsilon = 1e-3);
    }

    #[test]
    fn test_zero_budget_reports_not_converged() {
        let mut graph = PoseGraph::new();
        let a = graph.add_pose(Pose2D::identity(), 0);
        let b = graph.add_pose(Pose2D::new(1.5, 0.0, 0.0), 1);
        graph
            .add_odometry_edge(a, b, Pose2D::new(1.0, 0.0, 0.0), Information2D::default())
            .unwrap();

        let result = LevenbergMarquardt::default().optimize(&graph, 0);
        assert!(!result.converged);
        assert_eq!(result.termination_reason, TerminationReason::MaxIterations);
    }

    #[test]
    fn test_chi_squared_weights_by_information() {
        let mut graph = PoseGraph::new();
        let a = graph.add_pose(Pose2D::identity(), 0);
        let b = graph.add_pose(Pose2D::new(1.1, 0.0, 0.0), 1);
        graph
            .add_odometry_edge(
                a,
                b,
                Pose2D::new(1.0, 0.0, 0.0),
                Information2D::diagonal(100.0, 100.0, 100.0),
            )
            .unwrap();
        assert_relative_eq!(LevenbergMarquardt::chi_squared(&graph), 1.0, epsilon = 1e-9);
    }
}
