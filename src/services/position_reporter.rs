// src/services/position_reporter.rs
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::models::ReservationId;
use crate::services::runtime::{spawn_ticker, TimerTick};

/// Drives the periodic `position:update` while the driver is online with a
/// current trip. The timer only posts ticks; the session emits the update.
pub struct PositionReporter {
    interval: Duration,
    active: Option<(ReservationId, JoinHandle<()>)>,
}

impl PositionReporter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            active: None,
        }
    }

    /// Start, restart or stop the timer to match the session's target.
    pub fn sync(&mut self, target: Option<&ReservationId>, ticks: &mpsc::Sender<TimerTick>) {
        match (target, &self.active) {
            (Some(id), Some((active_id, _))) if active_id == id => {}
            (Some(id), _) => {
                self.stop();
                info!(reservation_id = %id, interval_secs = self.interval.as_secs(), "Position reporting started");
                let handle = spawn_ticker(self.interval, TimerTick::Position, ticks.clone());
                self.active = Some((id.clone(), handle));
            }
            (None, Some(_)) => self.stop(),
            (None, None) => {}
        }
    }

    pub fn stop(&mut self) {
        if let Some((id, handle)) = self.active.take() {
            handle.abort();
            debug!(reservation_id = %id, "Position reporting stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }
}

impl Drop for PositionReporter {
    fn drop(&mut self) {
        self.stop();
    }
}
