//! JSON wire messages.
//!
//! Every UDP datagram carries one envelope:
//!
//! ```json
//! { "sender_stamp": 114, "sample_time_us": 1700000000000000,
//!   "message": { "type": "GroundSpeed", "ground_speed": 4.2 } }
//! ```
//!
//! Angles on the wire are degrees for cone directions and radians for
//! headings, matching the producing modules.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Inbound datagram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub sender_stamp: u32,
    pub sample_time_us: u64,
    pub message: InboundMessage,
}

impl Envelope {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Messages consumed by the SLAM module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InboundMessage {
    /// Full pose from the localization pipeline.
    Geolocation {
        latitude: f64,
        longitude: f64,
        heading: f64,
    },
    /// Position half of a split pose.
    GeodeticWgs84 { latitude: f64, longitude: f64 },
    /// Heading half of a split pose.
    GeodeticHeading { north_heading: f64 },
    /// Yaw rate in rad/s.
    AngularVelocity { z: f64 },
    /// Speed in m/s.
    GroundSpeed { ground_speed: f64 },
    ObjectDirection {
        object_id: u32,
        azimuth_angle: f64,
        zenith_angle: f64,
    },
    ObjectDistance { object_id: u32, distance: f64 },
    ObjectType { object_id: u32, type_id: u32 },
    SwitchState { state: i32 },
}

/// Outbound datagram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEnvelope {
    pub sender_stamp: u32,
    pub sample_time_us: u64,
    pub message: OutboundMessage,
}

impl OutboundEnvelope {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Messages published by the SLAM module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutboundMessage {
    /// A mapped cone relative to the current pose.
    Cone {
        object_id: u32,
        azimuth_angle: f64,
        zenith_angle: f64,
        distance: f64,
        type_id: u32,
    },
    /// Corrected pose in the localization frame.
    Pose { x: f64, y: f64, heading: f64 },
    /// Module status; code 1 means ready.
    Status { code: i32, description: String },
}
