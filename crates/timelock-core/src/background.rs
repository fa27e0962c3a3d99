//! Periodic unlock loop.
//!
//! Stands in for a host's background-refresh opportunity: every `interval`
//! (or sooner, when woken) the scheduler runs once on the blocking pool.
//! Late or skipped runs are harmless; the next one catches up.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

use crate::scheduler::{UnlockReport, UnlockScheduler};

pub const DEFAULT_UNLOCK_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Control handle for a running unlock loop.
pub struct UnlockLoopHandle {
    /// Wake the loop for an immediate scan.
    pub wake: Arc<Notify>,
    /// Send `true` to stop the loop.
    pub shutdown_tx: watch::Sender<bool>,
}

impl UnlockLoopHandle {
    pub fn wake_now(&self) {
        self.wake.notify_one();
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Spawn the loop on the current tokio runtime. `on_report` sees every
/// successful run, including empty ones.
pub fn spawn_unlock_loop<F>(
    scheduler: UnlockScheduler,
    interval: Duration,
    on_report: F,
) -> (tokio::task::JoinHandle<()>, UnlockLoopHandle)
where
    F: Fn(UnlockReport) + Send + Sync + 'static,
{
    let wake = Arc::new(Notify::new());
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let wake_rx = wake.clone();

    let handle = tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "unlock loop started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = wake_rx.notified() => {
                    debug!("unlock loop woken early");
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("unlock loop shutting down");
                        return;
                    }
                }
            }

            if *shutdown_rx.borrow() {
                return;
            }

            let scheduler = scheduler.clone();
            match tokio::task::spawn_blocking(move || scheduler.run()).await {
                Ok(Ok(report)) => on_report(report),
                Ok(Err(e)) => warn!(error = %e, "unlock run failed; retrying next tick"),
                Err(e) => warn!(error = %e, "unlock run panicked"),
            }
        }
    });

    (handle, UnlockLoopHandle { wake, shutdown_tx })
}
