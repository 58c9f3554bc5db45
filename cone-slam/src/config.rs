//! Configuration loading for cone-slam
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! command-line options. The result is validated once at startup and shared
//! read-only with every component.

use std::path::{Path, PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::core::geodetic::GeodeticReference;
use crate::core::geometry::SensorMount;
use crate::engine::graph::{GraphOptimizerConfig, Information2D, PointInformation};
use crate::engine::slam::{CollectorConfig, KeyframeConfig, LoopClosureConfig, MatcherConfig};
use crate::error::{Result, SlamError};
use crate::map::MapFilterConfig;

/// Command-line options.
///
/// Long names follow the camelCase spelling used by the rest of the vehicle
/// software.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Cone landmark pose-graph SLAM", long_about = None)]
pub struct Args {
    /// Session id; selects multicast group 225.0.0.<cid>
    #[arg(long)]
    pub cid: u16,

    /// Sender stamp of this module
    #[arg(long)]
    pub id: u32,

    /// Sender stamp of the cone detection module
    #[arg(long = "detectConeId")]
    pub detect_cone_id: u32,

    /// Sender stamp of the pose estimation module
    #[arg(long = "estimationId")]
    pub estimation_id: u32,

    /// Sender stamp of the state machine
    #[arg(long = "stateMachineId")]
    pub state_machine_id: u32,

    /// Quiet time before a complete cone frame is processed (ms)
    #[arg(long = "gatheringTimeMs")]
    pub gathering_time_ms: Option<u64>,

    /// Distance under which an observation is the same cone (m)
    #[arg(long = "sameConeThreshold")]
    pub same_cone_threshold: Option<f64>,

    /// Reference latitude of the local frame (degrees)
    #[arg(long = "refLatitude", allow_negative_numbers = true)]
    pub ref_latitude: Option<f64>,

    /// Reference longitude of the local frame (degrees)
    #[arg(long = "refLongitude", allow_negative_numbers = true)]
    pub ref_longitude: Option<f64>,

    /// Minimum time between keyframes (s)
    #[arg(long = "timeBetweenKeyframes")]
    pub time_between_keyframes: Option<f64>,

    /// Maximum range of cones used for mapping (m)
    #[arg(long = "coneMappingThreshold")]
    pub cone_mapping_threshold: Option<f64>,

    /// Cones per outbound map packet
    #[arg(long = "conesPerPacket")]
    pub cones_per_packet: Option<usize>,

    /// Debug logging
    #[arg(long)]
    pub verbose: bool,

    /// TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Main configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SlamConfig {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub reference: ReferenceConfig,
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub keyframe: KeyframeConfig,
    #[serde(default)]
    pub noise: NoiseConfig,
    #[serde(default)]
    pub matcher: MatcherConfig,
    #[serde(default)]
    pub optimizer: GraphOptimizerConfig,
    #[serde(default)]
    pub driver: DriverConfig,
    #[serde(default)]
    pub loop_closure: LoopClosureConfig,
    #[serde(default)]
    pub map_filter: MapFilterConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub motion: MotionConfig,
    #[serde(default)]
    pub sensor_mount: SensorMount,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub verbose: bool,
}

/// Session and sender stamps
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Session id (1..=254)
    #[serde(default)]
    pub cid: u16,

    /// Sender stamp used on everything this module publishes
    #[serde(default)]
    pub id: u32,

    #[serde(default)]
    pub detect_cone_id: u32,

    #[serde(default)]
    pub estimation_id: u32,

    #[serde(default)]
    pub state_machine_id: u32,

    /// Start not ready and wait for the state machine (default: false)
    #[serde(default)]
    pub wait_for_state_machine: bool,

    /// UDP port (default: 12175)
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    12175
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cid: 0,
            id: 0,
            detect_cone_id: 0,
            estimation_id: 0,
            state_machine_id: 0,
            wait_for_state_machine: false,
            port: default_port(),
        }
    }
}

/// Origin of the local Cartesian frame
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ReferenceConfig {
    /// Degrees
    #[serde(default)]
    pub latitude: f64,
    /// Degrees
    #[serde(default)]
    pub longitude: f64,
}

impl ReferenceConfig {
    pub fn geodetic(&self) -> GeodeticReference {
        GeodeticReference::new(self.latitude, self.longitude)
    }
}

/// Edge uncertainty
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NoiseConfig {
    /// Odometry std-dev along x (m, default: 0.1)
    #[serde(default = "default_odometry_sigma_xy")]
    pub odometry_sigma_x: f64,

    /// Odometry std-dev along y (m, default: 0.1)
    #[serde(default = "default_odometry_sigma_xy")]
    pub odometry_sigma_y: f64,

    /// Odometry heading std-dev (rad, default: 0.05)
    #[serde(default = "default_odometry_sigma_theta")]
    pub odometry_sigma_theta: f64,

    /// Cone observation std-dev per axis (m, default: 0.1)
    #[serde(default = "default_observation_sigma")]
    pub observation_sigma: f64,
}

fn default_odometry_sigma_xy() -> f64 {
    0.1
}

fn default_odometry_sigma_theta() -> f64 {
    0.05
}

fn default_observation_sigma() -> f64 {
    0.1
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            odometry_sigma_x: default_odometry_sigma_xy(),
            odometry_sigma_y: default_odometry_sigma_xy(),
            odometry_sigma_theta: default_odometry_sigma_theta(),
            observation_sigma: default_observation_sigma(),
        }
    }
}

impl NoiseConfig {
    pub fn odometry_information(&self) -> Information2D {
        Information2D::from_std_dev(
            self.odometry_sigma_x,
            self.odometry_sigma_y,
            self.odometry_sigma_theta,
        )
    }

    pub fn observation_information(&self) -> PointInformation {
        PointInformation::from_std_dev(self.observation_sigma, self.observation_sigma)
    }
}

/// When and how the graph is optimized
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Run a local optimization every N keyframes (default: 5)
    #[serde(default = "default_optimize_every_keyframes")]
    pub optimize_every_keyframes: usize,

    /// Keyframes in the local optimization window (default: 10)
    #[serde(default = "default_essential_window")]
    pub essential_window: usize,

    /// Iteration budget of a local optimization (default: 10)
    #[serde(default = "default_local_iterations")]
    pub local_iterations: u32,

    /// Run full optimizations on a background thread (default: true)
    #[serde(default = "default_true")]
    pub background_optimizer: bool,

    /// Run a full optimization at shutdown (default: true)
    #[serde(default = "default_true")]
    pub optimize_on_teardown: bool,
}

fn default_optimize_every_keyframes() -> usize {
    5
}

fn default_essential_window() -> usize {
    10
}

fn default_local_iterations() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            optimize_every_keyframes: default_optimize_every_keyframes(),
            essential_window: default_essential_window(),
            local_iterations: default_local_iterations(),
            background_optimizer: true,
            optimize_on_teardown: true,
        }
    }
}

/// Outbound publishing
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Cones per map packet (default: 20)
    #[serde(default = "default_cones_per_packet")]
    pub cones_per_packet: usize,

    /// Interval between pose and map packets (ms, default: 100)
    #[serde(default = "default_publish_interval_ms")]
    pub publish_interval_ms: u64,
}

fn default_cones_per_packet() -> usize {
    20
}

fn default_publish_interval_ms() -> u64 {
    100
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            cones_per_packet: default_cones_per_packet(),
            publish_interval_ms: default_publish_interval_ms(),
        }
    }
}

/// Pose prediction between odometry updates
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MotionConfig {
    /// Longest extrapolation from the last pose (s, default: 0.2)
    #[serde(default = "default_max_prediction_s")]
    pub max_prediction_s: f64,
}

fn default_max_prediction_s() -> f64 {
    0.2
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            max_prediction_s: default_max_prediction_s(),
        }
    }
}

/// Map and path files
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Map to preload at startup
    #[serde(default)]
    pub map_file: Option<PathBuf>,

    /// Reference path to preload at startup
    #[serde(default)]
    pub path_file: Option<PathBuf>,

    /// Directory for map.txt and path.txt at shutdown (default: none)
    #[serde(default)]
    pub output_dir: Option<PathBuf>,

    /// Localize on the preloaded map without adding cones (default: false)
    #[serde(default)]
    pub localization: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            map_file: None,
            path_file: None,
            output_dir: Some(PathBuf::from(".")),
            localization: false,
        }
    }
}

impl SlamConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SlamError::Config(format!("Failed to read config file: {}", e)))?;
        let config: SlamConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Build the runtime configuration from command-line options.
    pub fn from_args(args: &Args) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_args(args);
        config.validate()?;
        Ok(config)
    }

    /// Override file values with command-line options.
    pub fn apply_args(&mut self, args: &Args) {
        self.session.cid = args.cid;
        self.session.id = args.id;
        self.session.detect_cone_id = args.detect_cone_id;
        self.session.estimation_id = args.estimation_id;
        self.session.state_machine_id = args.state_machine_id;

        if let Some(v) = args.gathering_time_ms {
            self.collector.gathering_time_ms = v;
        }
        if let Some(v) = args.same_cone_threshold {
            self.matcher.new_cone_threshold = v;
        }
        if let Some(v) = args.ref_latitude {
            self.reference.latitude = v;
        }
        if let Some(v) = args.ref_longitude {
            self.reference.longitude = v;
        }
        if let Some(v) = args.time_between_keyframes {
            self.keyframe.time_between_keyframes = v;
        }
        if let Some(v) = args.cone_mapping_threshold {
            self.matcher.cone_mapping_threshold = v;
        }
        if let Some(v) = args.cones_per_packet {
            self.output.cones_per_packet = v;
        }
        self.verbose |= args.verbose;
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !(1..=254).contains(&self.session.cid) {
            return Err(SlamError::Config(format!(
                "cid must be in 1..=254, got {}",
                self.session.cid
            )));
        }

        let positive = [
            ("sameConeThreshold", self.matcher.new_cone_threshold),
            ("coneMappingThreshold", self.matcher.cone_mapping_threshold),
            ("matcher.filter_threshold", self.matcher.filter_threshold),
            ("map_filter.duplicate_distance", self.map_filter.duplicate_distance),
            ("noise.observation_sigma", self.noise.observation_sigma),
            ("noise.odometry_sigma_x", self.noise.odometry_sigma_x),
            ("noise.odometry_sigma_y", self.noise.odometry_sigma_y),
            ("noise.odometry_sigma_theta", self.noise.odometry_sigma_theta),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(SlamError::Config(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }

        if self.keyframe.time_between_keyframes < 0.0 {
            return Err(SlamError::Config(format!(
                "timeBetweenKeyframes must not be negative, got {}",
                self.keyframe.time_between_keyframes
            )));
        }
        if self.output.cones_per_packet == 0 {
            return Err(SlamError::Config("conesPerPacket must be at least 1".to_string()));
        }
        if self.collector.gathering_time_ms > self.collector.time_diff_ms {
            return Err(SlamError::Config(format!(
                "gatheringTimeMs ({}) exceeds the frame window ({} ms)",
                self.collector.gathering_time_ms, self.collector.time_diff_ms
            )));
        }
        if !(self.reference.latitude.abs() <= 90.0 && self.reference.longitude.abs() <= 180.0) {
            return Err(SlamError::Config(format!(
                "reference position ({}, {}) is not a valid latitude/longitude",
                self.reference.latitude, self.reference.longitude
            )));
        }
        Ok(())
    }
}
