//! Cone thread.
//!
//! Buffers cone parts into frames and runs the SLAM step on each completed
//! frame. The short select timeout doubles as the gathering clock: when no
//! part arrives, the buffer is polled so a frame completes once the stream
//! goes quiet.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, select};
use log::{debug, info};

use crate::engine::slam::{CompletedFrame, Slam};
use crate::io::Route;

/// Cone thread handle.
pub struct ConeThread {
    handle: JoinHandle<()>,
}

impl ConeThread {
    pub fn spawn(
        slam: Arc<Slam>,
        routes: Receiver<Route>,
        running: Arc<AtomicBool>,
    ) -> std::io::Result<Self> {
        let handle = thread::Builder::new()
            .name("cones".into())
            .spawn(move || run_cone_loop(&slam, &routes, &running))?;
        Ok(Self { handle })
    }

    pub fn join(self) -> thread::Result<()> {
        self.handle.join()
    }
}

fn run_cone_loop(slam: &Slam, routes: &Receiver<Route>, running: &AtomicBool) {
    info!("Cone thread started");
    let mut frames = 0u64;

    while running.load(Ordering::Relaxed) {
        select! {
            recv(routes) -> route => match route {
                Ok(Route::ConePart { object_id, part, sample_time_us }) => {
                    if let Some(frame) = slam.push_cone_part(sample_time_us, object_id, part) {
                        process(slam, frame, &mut frames);
                    }
                }
                Ok(_) => {}
                Err(_) => break,
            },
            default(Duration::from_millis(5)) => {
                if let Some(frame) = slam.poll_cone_buffer(Instant::now()) {
                    process(slam, frame, &mut frames);
                }
            }
        }
    }

    info!("Cone thread stopped after {} frames", frames);
}

fn process(slam: &Slam, frame: CompletedFrame, frames: &mut u64) {
    *frames += 1;
    let cones = frame.cones.len();
    if let Some(result) = slam.receive_combined_message(frame)
        && result.loop_closure
    {
        debug!("Loop closure started at keyframe {:?} ({} cones)", result.keyframe, cones);
    }
}
