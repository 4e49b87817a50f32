//! Progress estimation for long readings.
//!
//! A gated frequency reading of `n` samples takes roughly `n` gate times and
//! the counter says nothing until it is done. The monitor ticks once per
//! expected unit and publishes elapsed/remaining estimates through a `watch`
//! channel and the log. It never touches the instrument and its result never
//! affects the measurement.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::session::Liveness;

/// Snapshot of a running estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    /// Units elapsed so far.
    pub completed: u64,
    /// Units expected in total.
    pub total: u64,
    /// Estimated time spent.
    pub elapsed: Duration,
    /// Estimated time left.
    pub remaining: Duration,
}

impl Progress {
    /// Completed share in `0.0..=1.0`.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }
}

/// Parameters for one monitor run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressMonitor {
    units: u64,
    unit_delay: Duration,
}

impl ProgressMonitor {
    /// `units` steps of `unit_delay` each.
    pub fn new(units: u64, unit_delay: Duration) -> Self {
        Self { units, unit_delay }
    }

    /// Start the monitor task.
    ///
    /// Returns `None` when there is nothing to estimate (zero units or zero
    /// delay).
    pub fn spawn(self, liveness: Liveness) -> Option<ProgressHandle> {
        if self.units == 0 || self.unit_delay.is_zero() {
            return None;
        }

        let stop = Arc::new(Notify::new());
        let (tx, rx) = watch::channel(Progress {
            total: self.units,
            remaining: self.unit_delay.saturating_mul(clamp_u32(self.units)),
            ..Progress::default()
        });
        let task = tokio::spawn(run(self, liveness, Arc::clone(&stop), tx));

        Some(ProgressHandle {
            stop,
            updates: rx,
            task,
        })
    }
}

/// Owner's handle on a running monitor.
#[derive(Debug)]
pub struct ProgressHandle {
    stop: Arc<Notify>,
    updates: watch::Receiver<Progress>,
    task: JoinHandle<Progress>,
}

impl ProgressHandle {
    /// Receiver of progress snapshots.
    pub fn subscribe(&self) -> watch::Receiver<Progress> {
        self.updates.clone()
    }

    /// Stop the monitor and wait for it to exit.
    pub async fn finish(self) -> Progress {
        self.stop.notify_one();
        self.join().await
    }

    /// Wait for the monitor to run out on its own.
    pub async fn join(self) -> Progress {
        let last = *self.updates.borrow();
        match self.task.await {
            Ok(progress) => progress,
            Err(err) => {
                debug!(error = %err, "Progress monitor task failed");
                last
            }
        }
    }
}

fn clamp_u32(units: u64) -> u32 {
    u32::try_from(units).unwrap_or(u32::MAX)
}

async fn run(
    monitor: ProgressMonitor,
    liveness: Liveness,
    stop: Arc<Notify>,
    tx: watch::Sender<Progress>,
) -> Progress {
    let started = Instant::now();
    let total = monitor.units;
    let mut progress = *tx.borrow();

    while progress.completed < total {
        if !liveness.is_alive() {
            debug!(completed = progress.completed, total, "Progress monitor cancelled");
            break;
        }

        tokio::select! {
            () = stop.notified() => break,
            () = tokio::time::sleep(monitor.unit_delay) => {}
        }

        let completed = progress.completed + 1;
        let left = clamp_u32(total - completed);
        progress = Progress {
            completed,
            total,
            elapsed: started.elapsed(),
            remaining: monitor.unit_delay.saturating_mul(left),
        };
        tx.send_replace(progress);
        info!(
            completed,
            total,
            elapsed_s = progress.elapsed.as_secs_f64(),
            remaining_s = progress.remaining.as_secs_f64(),
            "Measurement progress"
        );
    }

    progress
}
