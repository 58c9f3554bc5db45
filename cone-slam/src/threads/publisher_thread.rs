//! Publisher thread.
//!
//! Every publish interval the thread asks [`Slam`] for the corrected pose and
//! the next packet of the map broadcast, then drains the resulting events
//! onto the session group.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, select};
use log::{info, warn};

use crate::engine::slam::{Slam, SlamEvent};
use crate::io::{OutboundMessage, UdpPublisher};

/// Publisher thread handle.
pub struct PublisherThread {
    handle: JoinHandle<()>,
}

impl PublisherThread {
    pub fn spawn(
        slam: Arc<Slam>,
        events: Receiver<SlamEvent>,
        publisher: UdpPublisher,
        running: Arc<AtomicBool>,
    ) -> std::io::Result<Self> {
        let interval = Duration::from_millis(slam.config().output.publish_interval_ms.max(1));
        let handle = thread::Builder::new()
            .name("publisher".into())
            .spawn(move || run_publisher_loop(&slam, &events, &publisher, interval, &running))?;
        Ok(Self { handle })
    }

    pub fn join(self) -> thread::Result<()> {
        self.handle.join()
    }
}

fn run_publisher_loop(
    slam: &Slam,
    events: &Receiver<SlamEvent>,
    publisher: &UdpPublisher,
    interval: Duration,
    running: &AtomicBool,
) {
    info!("Publisher thread started ({:?} interval)", interval);
    let mut next_tick = Instant::now();

    while running.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now >= next_tick {
            next_tick = now + interval;
            if slam.module_state() {
                slam.send_pose();
                slam.send_cones();
            }
        }

        select! {
            recv(events) -> event => match event {
                Ok(event) => publish(publisher, event),
                Err(_) => break,
            },
            default(next_tick.saturating_duration_since(Instant::now())) => {}
        }
    }

    info!("Publisher thread stopped");
}

fn publish(publisher: &UdpPublisher, event: SlamEvent) {
    let (sample_time_us, messages) = to_messages(event);
    for message in messages {
        if let Err(e) = publisher.publish(sample_time_us, message) {
            warn!("Publish failed: {}", e);
            return;
        }
    }
}

/// Wire messages for one event.
pub fn to_messages(event: SlamEvent) -> (u64, Vec<OutboundMessage>) {
    match event {
        SlamEvent::Pose { pose, timestamp_us } => (
            timestamp_us,
            vec![OutboundMessage::Pose {
                x: pose.x,
                y: pose.y,
                heading: pose.theta,
            }],
        ),
        SlamEvent::Cones {
            cones,
            timestamp_us,
        } => (
            timestamp_us,
            cones
                .into_iter()
                .map(|cone| OutboundMessage::Cone {
                    object_id: cone.object_id,
                    azimuth_angle: cone.azimuth_deg,
                    zenith_angle: cone.zenith_deg,
                    distance: cone.distance,
                    type_id: cone.type_id,
                })
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Pose2D;
    use crate::engine::slam::ConeReport;

    #[test]
    fn test_cone_packet_becomes_one_message_per_cone() {
        let report = ConeReport {
            object_id: 7,
            azimuth_deg: -12.0,
            zenith_deg: 0.0,
            distance: 4.5,
            type_id: 2,
        };
        let (t, messages) = to_messages(SlamEvent::Cones {
            cones: vec![report; 3],
            timestamp_us: 99,
        });
        assert_eq!(t, 99);
        assert_eq!(messages.len(), 3);
        assert_eq!(
            messages[0],
            OutboundMessage::Cone {
                object_id: 7,
                azimuth_angle: -12.0,
                zenith_angle: 0.0,
                distance: 4.5,
                type_id: 2,
            }
        );
    }

    #[test]
    fn test_pose_event() {
        let (_, messages) = to_messages(SlamEvent::Pose {
            pose: Pose2D::new(1.0, 2.0, 0.5),
            timestamp_us: 0,
        });
        assert_eq!(
            messages,
            vec![OutboundMessage::Pose {
                x: 1.0,
                y: 2.0,
                heading: 0.5,
            }]
        );
    }
}
