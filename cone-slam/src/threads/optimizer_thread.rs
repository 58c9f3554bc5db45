//! Background optimizer thread.
//!
//! Loop closures are detected on the cone thread but the full graph
//! optimization runs here, so cone frames keep flowing (and are parked)
//! while the solver works on a copy of the graph.
//!
//! ```text
//! cone thread ──► OptimizeRequest ──► optimize_graph ──► complete_loop_closure
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, bounded};
use log::{info, warn};

use crate::engine::slam::{OptimizeRequest, Slam};

/// Background optimizer handle.
pub struct OptimizerThread {
    handle: JoinHandle<()>,
}

impl OptimizerThread {
    /// Spawn the thread and route loop-closure requests of `slam` to it.
    pub fn spawn(slam: Arc<Slam>, running: Arc<AtomicBool>) -> std::io::Result<Self> {
        // One pending request is enough, the closure flag covers the rest
        let (tx, rx) = bounded(1);
        let handle = thread::Builder::new()
            .name("optimizer".into())
            .spawn({
                let slam = Arc::clone(&slam);
                move || run_optimizer_loop(&slam, &rx, &running)
            })?;
        slam.attach_optimizer(tx);
        Ok(Self { handle })
    }

    pub fn join(self) -> thread::Result<()> {
        self.handle.join()
    }
}

fn run_optimizer_loop(slam: &Slam, requests: &Receiver<OptimizeRequest>, running: &AtomicBool) {
    info!("Optimizer thread started");

    while running.load(Ordering::Relaxed) {
        match requests.recv_timeout(Duration::from_millis(100)) {
            Ok(OptimizeRequest::LoopClosure) => {
                let started = Instant::now();
                if slam.run_loop_closure() {
                    info!("Loop closure optimized in {:?}", started.elapsed());
                } else {
                    warn!("Loop closure optimization rejected, map kept as is");
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    info!("Optimizer thread stopped");
}
