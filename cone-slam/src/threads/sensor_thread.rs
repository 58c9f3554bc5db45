//! Sensor thread.
//!
//! Feeds poses, split poses, yaw rate, ground speed and state machine
//! switches into [`Slam`]. Each update only takes its own lock, so a long
//! SLAM step on the cone thread never delays pose ingestion.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, select};
use log::{info, trace};

use crate::engine::slam::{Slam, SplitPose};
use crate::io::Route;

/// Sensor thread handle.
pub struct SensorThread {
    handle: JoinHandle<()>,
}

impl SensorThread {
    pub fn spawn(
        slam: Arc<Slam>,
        routes: Receiver<Route>,
        running: Arc<AtomicBool>,
    ) -> std::io::Result<Self> {
        let handle = thread::Builder::new()
            .name("sensor".into())
            .spawn(move || run_sensor_loop(&slam, &routes, &running))?;
        Ok(Self { handle })
    }

    pub fn join(self) -> thread::Result<()> {
        self.handle.join()
    }
}

fn run_sensor_loop(slam: &Slam, routes: &Receiver<Route>, running: &AtomicBool) {
    info!("Sensor thread started");

    while running.load(Ordering::Relaxed) {
        select! {
            recv(routes) -> route => match route {
                Ok(route) => dispatch(slam, route),
                Err(_) => break,
            },
            default(Duration::from_millis(100)) => {}
        }
    }

    info!("Sensor thread stopped");
}

/// Hand one route to its handler.
pub(crate) fn dispatch(slam: &Slam, route: Route) {
    match route {
        Route::Pose {
            fix,
            sample_time_us,
        } => slam.next_pose(fix, sample_time_us),
        Route::SplitPosition {
            latitude,
            longitude,
            sample_time_us,
        } => slam.next_split_pose(
            SplitPose::Position {
                latitude,
                longitude,
            },
            sample_time_us,
        ),
        Route::SplitHeading {
            heading,
            sample_time_us,
        } => slam.next_split_pose(SplitPose::Heading(heading), sample_time_us),
        Route::YawRate {
            rate,
            sample_time_us,
        } => slam.next_yaw_rate(rate, sample_time_us),
        Route::GroundSpeed {
            speed,
            sample_time_us,
        } => slam.next_ground_speed(speed, sample_time_us),
        Route::StateMachine { state } => slam.set_state_machine_status(state),
        Route::ConePart { object_id, .. } => {
            trace!("Cone part {} on sensor channel ignored", object_id);
        }
    }
}
