//! I/O layer.
//!
//! - [`messages`]: JSON envelopes exchanged on the session group
//! - [`router`]: sender-stamp filtering and dispatch to handlers
//! - [`udp_transport`]: multicast receive and publish
//! - [`persistence`]: map and path text files

pub mod messages;
pub mod persistence;
pub mod router;
pub mod udp_transport;

pub use messages::{Envelope, InboundMessage, OutboundEnvelope, OutboundMessage};
pub use router::{Route, Router};
pub use udp_transport::{Delivery, RouteFanout, UdpPublisher, UdpReceiver, multicast_group};
