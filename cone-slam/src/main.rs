//! cone-slam daemon.
//!
//! Joins the session group, runs cone SLAM on the incoming detections and
//! publishes the corrected pose and the cone map until interrupted.
//!
//! ```text
//! cone-slam --cid 111 --id 120 --detectConeId 118 --estimationId 114 \
//!           --stateMachineId 1401 --refLatitude 57.71 --refLongitude 11.95
//! ```

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Parser;
use crossbeam_channel::bounded;

use cone_slam::config::{Args, SlamConfig};
use cone_slam::io::{OutboundMessage, UdpPublisher};
use cone_slam::threads::spawn_threads;
use cone_slam::{Result, Slam};

/// Capacity of the SLAM to publisher event queue.
const EVENT_CHANNEL_CAPACITY: usize = 256;

fn main() {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {} - {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let config = match SlamConfig::from_args(&args) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(1);
        }
    };

    log::info!("cone-slam starting");
    log::info!(
        "  Session: cid {} port {}, sender stamp {}",
        config.session.cid,
        config.session.port,
        config.session.id
    );
    log::info!(
        "  Reference: ({:.6}, {:.6})",
        config.reference.latitude,
        config.reference.longitude
    );

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        r.store(false, Ordering::Relaxed);
    }) {
        log::error!("Cannot install signal handler: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(config, running) {
        log::error!("Daemon error: {}", e);
        std::process::exit(1);
    }

    log::info!("cone-slam shutdown complete");
}

fn run(config: SlamConfig, running: Arc<AtomicBool>) -> Result<()> {
    let (events_tx, events_rx) = bounded(EVENT_CHANNEL_CAPACITY);
    let status = UdpPublisher::new(&config.session)?;
    let slam = Arc::new(Slam::new(config, events_tx));

    if let Some(path) = &slam.config().persistence.map_file {
        slam.load_map(path)?;
    }
    if let Some(path) = &slam.config().persistence.path_file {
        slam.load_path(path)?;
    }

    let threads = spawn_threads(Arc::clone(&slam), events_rx, Arc::clone(&running))?;

    // Readiness is repeated every tick for late subscribers; losing it is
    // announced once
    let mut was_ready = false;
    while running.load(Ordering::Relaxed) {
        slam.initialize_module();
        let ready = slam.module_state();
        if let Some(message) = readiness_message(ready, was_ready)
            && let Err(e) = status.publish(0, message)
        {
            log::warn!("Status publish failed: {}", e);
        }
        was_ready = ready;
        std::thread::sleep(Duration::from_millis(100));
    }

    log::info!("Shutdown signal received, waiting for threads...");
    threads.join();
    slam.tear_down()
}

/// Status to publish for this tick, given the readiness of the last one.
fn readiness_message(ready: bool, was_ready: bool) -> Option<OutboundMessage> {
    let (code, description) = match (ready, was_ready) {
        (true, _) => (1, "ready"),
        (false, true) => (0, "waiting for pose or state machine"),
        (false, false) => return None,
    };
    Some(OutboundMessage::Status {
        code,
        description: description.to_string(),
    })
}
