//! UDP multicast transport.
//!
//! All modules of a session share the group `225.0.0.<cid>` on one port.
//! Each datagram is one JSON envelope (see [`messages`](super::messages)).
//!
//! The receiver decodes and routes envelopes, then fans them out to two
//! bounded channels so the cone stream never queues behind pose updates:
//!
//! ```text
//! socket ──► Envelope::decode ──► Router ──► RouteFanout ──┬──► sensor channel
//!                                                          └──► cone channel
//! ```
//!
//! Sensor routes only matter while they are fresh and are dropped when the
//! sensor thread lags. Cone parts wait up to one collector window for room.

use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, SendTimeoutError, Sender, TrySendError, bounded};
use log::{error, info, trace, warn};

use super::messages::{Envelope, OutboundEnvelope, OutboundMessage};
use super::router::{Route, Router};
use crate::config::SessionConfig;
use crate::error::{Result, SlamError};

/// Channel capacity for pose, motion and state machine routes.
const SENSOR_CHANNEL_CAPACITY: usize = 64;

/// Channel capacity for cone parts (three parts per cone).
const CONE_CHANNEL_CAPACITY: usize = 1024;

const MAX_DATAGRAM_SIZE: usize = 65536;

/// Multicast group of session `cid`.
pub fn multicast_group(cid: u16) -> Result<Ipv4Addr> {
    match u8::try_from(cid) {
        Ok(octet @ 1..=254) => Ok(Ipv4Addr::new(225, 0, 0, octet)),
        _ => Err(SlamError::Config(format!("cid {} outside 1..=254", cid))),
    }
}

/// Outcome of handing a route to the handler threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// The handler queue stayed full.
    Dropped,
    /// The handler thread is gone.
    Closed,
}

/// Splits routes between the sensor and cone channels.
pub struct RouteFanout {
    sensor_tx: Sender<Route>,
    cone_tx: Sender<Route>,
    cone_timeout: Duration,
    dropped: u64,
}

impl RouteFanout {
    /// `cone_timeout` bounds how long a cone part waits for queue room.
    pub fn new(sensor_tx: Sender<Route>, cone_tx: Sender<Route>, cone_timeout: Duration) -> Self {
        Self {
            sensor_tx,
            cone_tx,
            cone_timeout,
            dropped: 0,
        }
    }

    pub fn forward(&mut self, route: Route) -> Delivery {
        if route.is_cone() {
            match self.cone_tx.send_timeout(route, self.cone_timeout) {
                Ok(()) => Delivery::Sent,
                Err(SendTimeoutError::Timeout(route)) => self.drop_route(&route),
                Err(SendTimeoutError::Disconnected(_)) => Delivery::Closed,
            }
        } else {
            match self.sensor_tx.try_send(route) {
                Ok(()) => Delivery::Sent,
                Err(TrySendError::Full(route)) => self.drop_route(&route),
                Err(TrySendError::Disconnected(_)) => Delivery::Closed,
            }
        }
    }

    /// Routes dropped so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn drop_route(&mut self, route: &Route) -> Delivery {
        self.dropped += 1;
        warn!(
            "Handler queue full, dropped {:?} ({} dropped so far)",
            route, self.dropped
        );
        Delivery::Dropped
    }
}

/// Multicast receiver feeding the handler threads.
pub struct UdpReceiver {
    socket: UdpSocket,
    router: Router,
    running: Arc<AtomicBool>,
    fanout: RouteFanout,
}

impl UdpReceiver {
    /// Join the session group.
    ///
    /// Cone parts wait up to `cone_timeout` for the cone thread. Returns the
    /// receiver and the sensor and cone channels.
    pub fn new(
        session: &SessionConfig,
        cone_timeout: Duration,
        running: Arc<AtomicBool>,
    ) -> Result<(Self, Receiver<Route>, Receiver<Route>)> {
        let group = multicast_group(session.cid)?;
        let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, session.port))?;
        socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;

        // Short timeout for shutdown checks
        socket.set_read_timeout(Some(Duration::from_millis(100)))?;

        let (sensor_tx, sensor_rx) = bounded(SENSOR_CHANNEL_CAPACITY);
        let (cone_tx, cone_rx) = bounded(CONE_CHANNEL_CAPACITY);

        info!("UDP receiver joined {}:{}", group, session.port);

        Ok((
            Self {
                socket,
                router: Router::new(session),
                running,
                fanout: RouteFanout::new(sensor_tx, cone_tx, cone_timeout),
            },
            sensor_rx,
            cone_rx,
        ))
    }

    /// Receive loop (blocking).
    pub fn run(mut self) {
        info!("UDP receiver started");

        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

        while self.running.load(Ordering::Relaxed) {
            let len = match self.socket.recv_from(&mut buffer) {
                Ok((len, _src)) => len,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                Err(e) => {
                    error!("UDP recv error: {}", e);
                    continue;
                }
            };

            let envelope = match Envelope::decode(&buffer[..len]) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!("Dropping malformed datagram ({} bytes): {}", len, e);
                    continue;
                }
            };

            let Some(route) = self.router.route(envelope) else {
                continue;
            };

            if self.fanout.forward(route) == Delivery::Closed {
                break;
            }
        }

        info!(
            "UDP receiver stopped, {} routes dropped",
            self.fanout.dropped()
        );
    }
}

/// Multicast sender for everything this module publishes.
pub struct UdpPublisher {
    socket: UdpSocket,
    target: SocketAddrV4,
    sender_stamp: u32,
}

impl UdpPublisher {
    pub fn new(session: &SessionConfig) -> Result<Self> {
        let group = multicast_group(session.cid)?;
        let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))?;
        socket.set_multicast_loop_v4(true)?;
        Ok(Self {
            socket,
            target: SocketAddrV4::new(group, session.port),
            sender_stamp: session.id,
        })
    }

    /// Stamp and send one message.
    pub fn publish(&self, sample_time_us: u64, message: OutboundMessage) -> Result<()> {
        let envelope = OutboundEnvelope {
            sender_stamp: self.sender_stamp,
            sample_time_us,
            message,
        };
        let bytes = envelope.encode()?;
        self.socket.send_to(&bytes, self.target)?;
        trace!("Sent {} bytes to {}", bytes.len(), self.target);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::slam::ConePart;
    use std::thread;

    fn cone_part(object_id: u32) -> Route {
        Route::ConePart {
            object_id,
            part: ConePart::Distance(5.0),
            sample_time_us: 10,
        }
    }

    #[test]
    fn test_multicast_group_from_cid() {
        assert_eq!(multicast_group(111).unwrap(), Ipv4Addr::new(225, 0, 0, 111));
        assert!(multicast_group(0).is_err());
        assert!(multicast_group(255).is_err());
        assert!(multicast_group(1000).is_err());
    }

    #[test]
    fn test_cone_parts_wait_for_a_slow_cone_thread() {
        let (sensor_tx, _sensor_rx) = bounded(1);
        let (cone_tx, cone_rx) = bounded(2);
        let mut fanout = RouteFanout::new(sensor_tx, cone_tx, Duration::from_secs(5));

        let consumer = thread::spawn(move || {
            let mut received = Vec::new();
            for _ in 0..10 {
                thread::sleep(Duration::from_millis(2));
                received.push(cone_rx.recv().unwrap());
            }
            received
        });

        for id in 0..10 {
            assert_eq!(fanout.forward(cone_part(id)), Delivery::Sent);
        }
        let received = consumer.join().unwrap();
        assert_eq!(received.len(), 10);
        assert_eq!(received[9], cone_part(9));
        assert_eq!(fanout.dropped(), 0);
    }

    #[test]
    fn test_stalled_queues_report_drops() {
        let (sensor_tx, _sensor_rx) = bounded(1);
        let (cone_tx, _cone_rx) = bounded(1);
        let mut fanout = RouteFanout::new(sensor_tx, cone_tx, Duration::from_millis(10));

        assert_eq!(fanout.forward(cone_part(0)), Delivery::Sent);
        assert_eq!(fanout.forward(cone_part(1)), Delivery::Dropped);

        let speed = || Route::GroundSpeed {
            speed: 3.0,
            sample_time_us: 10,
        };
        assert_eq!(fanout.forward(speed()), Delivery::Sent);
        assert_eq!(fanout.forward(speed()), Delivery::Dropped);
        assert_eq!(fanout.dropped(), 2);
    }

    #[test]
    fn test_closed_handler_stops_forwarding() {
        let (sensor_tx, _sensor_rx) = bounded(1);
        let (cone_tx, cone_rx) = bounded(1);
        drop(cone_rx);
        let mut fanout = RouteFanout::new(sensor_tx, cone_tx, Duration::from_millis(10));
        assert_eq!(fanout.forward(cone_part(0)), Delivery::Closed);
        assert_eq!(fanout.dropped(), 0);
    }
}
