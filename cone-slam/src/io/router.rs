//! Typed message routing.
//!
//! Decoded envelopes are turned into [`Route`]s, one variant per handler.
//! A message is only accepted from the sender stamp configured for its
//! stream; everything else is dropped.
//!
//! | message                              | accepted from      |
//! |--------------------------------------|--------------------|
//! | Geolocation, GeodeticWgs84/Heading   | `estimation_id`    |
//! | AngularVelocity, GroundSpeed         | `estimation_id`    |
//! | ObjectDirection/Distance/Type        | `detect_cone_id`   |
//! | SwitchState                          | `state_machine_id` |

use std::f64::consts::FRAC_PI_2;

use log::trace;

use super::messages::{Envelope, InboundMessage};
use crate::config::SessionConfig;
use crate::core::math::normalize_angle;
use crate::engine::slam::{ConePart, GeoFix};

/// Handler-specific payload of an accepted envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    Pose { fix: GeoFix, sample_time_us: u64 },
    SplitPosition { latitude: f64, longitude: f64, sample_time_us: u64 },
    SplitHeading { heading: f64, sample_time_us: u64 },
    YawRate { rate: f64, sample_time_us: u64 },
    GroundSpeed { speed: f64, sample_time_us: u64 },
    ConePart { object_id: u32, part: ConePart, sample_time_us: u64 },
    StateMachine { state: i32 },
}

impl Route {
    /// Whether the route belongs to the cone stream.
    pub fn is_cone(&self) -> bool {
        matches!(self, Route::ConePart { .. })
    }
}

/// Sender-stamp filter and dispatcher.
#[derive(Debug, Clone, Copy)]
pub struct Router {
    detect_cone_id: u32,
    estimation_id: u32,
    state_machine_id: u32,
}

impl Router {
    pub fn new(session: &SessionConfig) -> Self {
        Self {
            detect_cone_id: session.detect_cone_id,
            estimation_id: session.estimation_id,
            state_machine_id: session.state_machine_id,
        }
    }

    pub fn route(&self, envelope: Envelope) -> Option<Route> {
        let stamp = envelope.sender_stamp;
        let t = envelope.sample_time_us;
        let from_estimation = stamp == self.estimation_id;
        let from_detection = stamp == self.detect_cone_id;

        let route = match envelope.message {
            InboundMessage::Geolocation {
                latitude,
                longitude,
                heading,
            } if from_estimation => Route::Pose {
                fix: GeoFix::new(latitude, longitude, heading),
                sample_time_us: t,
            },
            InboundMessage::GeodeticWgs84 {
                latitude,
                longitude,
            } if from_estimation => Route::SplitPosition {
                latitude,
                longitude,
                sample_time_us: t,
            },
            // Clockwise from north on the wire, counter-clockwise from east here
            InboundMessage::GeodeticHeading { north_heading } if from_estimation => {
                Route::SplitHeading {
                    heading: normalize_angle(FRAC_PI_2 - north_heading),
                    sample_time_us: t,
                }
            }
            InboundMessage::AngularVelocity { z } if from_estimation => Route::YawRate {
                rate: z,
                sample_time_us: t,
            },
            InboundMessage::GroundSpeed { ground_speed } if from_estimation => Route::GroundSpeed {
                speed: ground_speed,
                sample_time_us: t,
            },
            InboundMessage::ObjectDirection {
                object_id,
                azimuth_angle,
                zenith_angle,
            } if from_detection => Route::ConePart {
                object_id,
                part: ConePart::Direction {
                    azimuth_deg: azimuth_angle,
                    zenith_deg: zenith_angle,
                },
                sample_time_us: t,
            },
            InboundMessage::ObjectDistance {
                object_id,
                distance,
            } if from_detection => Route::ConePart {
                object_id,
                part: ConePart::Distance(distance),
                sample_time_us: t,
            },
            InboundMessage::ObjectType { object_id, type_id } if from_detection => Route::ConePart {
                object_id,
                part: ConePart::Type(type_id),
                sample_time_us: t,
            },
            InboundMessage::SwitchState { state } if stamp == self.state_machine_id => {
                Route::StateMachine { state }
            }
            other => {
                trace!("Dropping {:?} from sender {}", other, stamp);
                return None;
            }
        };
        Some(route)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn router() -> Router {
        Router::new(&SessionConfig {
            cid: 111,
            id: 120,
            detect_cone_id: 118,
            estimation_id: 114,
            state_machine_id: 1401,
            ..SessionConfig::default()
        })
    }

    fn envelope(sender_stamp: u32, message: InboundMessage) -> Envelope {
        Envelope {
            sender_stamp,
            sample_time_us: 1_000,
            message,
        }
    }

    #[test]
    fn test_routes_by_stamp() {
        let r = router();
        let speed = InboundMessage::GroundSpeed { ground_speed: 3.0 };
        assert_eq!(
            r.route(envelope(114, speed.clone())),
            Some(Route::GroundSpeed {
                speed: 3.0,
                sample_time_us: 1_000,
            })
        );
        assert_eq!(r.route(envelope(118, speed)), None);
    }

    #[test]
    fn test_cone_parts_only_from_detection() {
        let r = router();
        let msg = InboundMessage::ObjectType {
            object_id: 4,
            type_id: 2,
        };
        let route = r.route(envelope(118, msg.clone())).unwrap();
        assert!(route.is_cone());
        assert_eq!(
            route,
            Route::ConePart {
                object_id: 4,
                part: ConePart::Type(2),
                sample_time_us: 1_000,
            }
        );
        assert!(r.route(envelope(114, msg)).is_none());
    }

    #[test]
    fn test_state_machine_stamp() {
        let r = router();
        let msg = InboundMessage::SwitchState { state: 2 };
        assert_eq!(
            r.route(envelope(1401, msg.clone())),
            Some(Route::StateMachine { state: 2 })
        );
        assert!(r.route(envelope(114, msg)).is_none());
    }

    #[test]
    fn test_north_heading_becomes_east_heading() {
        let r = router();
        let heading = |north_heading| {
            match r.route(envelope(114, InboundMessage::GeodeticHeading { north_heading })) {
                Some(Route::SplitHeading { heading, .. }) => heading,
                other => panic!("expected split heading, got {:?}", other),
            }
        };
        // North, east and west
        assert_relative_eq!(heading(0.0), FRAC_PI_2, epsilon = 1e-12);
        assert_relative_eq!(heading(FRAC_PI_2), 0.0, epsilon = 1e-12);
        assert_relative_eq!(heading(-FRAC_PI_2), std::f64::consts::PI, epsilon = 1e-12);
    }

    #[test]
    fn test_geolocation_becomes_fix() {
        let r = router();
        let msg = InboundMessage::Geolocation {
            latitude: 57.7,
            longitude: 11.9,
            heading: 0.5,
        };
        match r.route(envelope(114, msg)) {
            Some(Route::Pose { fix, .. }) => assert!(fix.is_complete()),
            other => panic!("expected pose route, got {:?}", other),
        }
    }
}
