//! Handler threads of the SLAM daemon.
//!
//! - `udp-receiver`: decodes and routes datagrams
//! - [`SensorThread`]: poses, motion and state machine
//! - [`ConeThread`]: frame gathering and the SLAM step
//! - [`OptimizerThread`]: loop-closure optimization
//! - [`PublisherThread`]: pose and map broadcast
//!
//! Every thread checks the shared `running` flag at least every 100 ms.

mod cone_thread;
mod optimizer_thread;
mod publisher_thread;
mod sensor_thread;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Receiver;
use log::{error, info};

pub use cone_thread::ConeThread;
pub use optimizer_thread::OptimizerThread;
pub use publisher_thread::{PublisherThread, to_messages};
pub use sensor_thread::SensorThread;

use crate::engine::slam::{Slam, SlamEvent};
use crate::error::Result;
use crate::io::{UdpPublisher, UdpReceiver};

/// Handles of all running threads.
pub struct ThreadHandles {
    receiver: JoinHandle<()>,
    sensor: SensorThread,
    cones: ConeThread,
    optimizer: Option<OptimizerThread>,
    publisher: PublisherThread,
}

/// Join the session group and start every handler thread.
pub fn spawn_threads(
    slam: Arc<Slam>,
    events: Receiver<SlamEvent>,
    running: Arc<AtomicBool>,
) -> Result<ThreadHandles> {
    let session = &slam.config().session;
    let cone_timeout = Duration::from_millis(slam.config().collector.time_diff_ms);
    let (receiver, sensor_rx, cone_rx) =
        UdpReceiver::new(session, cone_timeout, Arc::clone(&running))?;
    let publisher = UdpPublisher::new(session)?;

    let receiver = thread::Builder::new()
        .name("udp-receiver".into())
        .spawn(move || receiver.run())?;

    let optimizer = if slam.config().driver.background_optimizer {
        Some(OptimizerThread::spawn(Arc::clone(&slam), Arc::clone(&running))?)
    } else {
        None
    };

    let handles = ThreadHandles {
        receiver,
        sensor: SensorThread::spawn(Arc::clone(&slam), sensor_rx, Arc::clone(&running))?,
        cones: ConeThread::spawn(Arc::clone(&slam), cone_rx, Arc::clone(&running))?,
        optimizer,
        publisher: PublisherThread::spawn(slam, events, publisher, running)?,
    };
    info!("All threads started");
    Ok(handles)
}

impl ThreadHandles {
    /// Wait for every thread to stop.
    pub fn join(self) {
        let results = [
            ("udp-receiver", self.receiver.join()),
            ("sensor", self.sensor.join()),
            ("cones", self.cones.join()),
            ("publisher", self.publisher.join()),
        ];
        for (name, result) in results {
            if result.is_err() {
                error!("{} thread panicked", name);
            }
        }
        if let Some(optimizer) = self.optimizer
            && optimizer.join().is_err()
        {
            error!("optimizer thread panicked");
        }
    }
}
