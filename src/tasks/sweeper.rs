//! TTL Sweep Task
//!
//! Background task that periodically removes expired entries from a cache,
//! whether or not those entries are ever read again.

use std::sync::Weak;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// == Sweep Trait ==
/// A store whose expired entries can be purged in one pass.
pub trait Sweep: Send + Sync + 'static {
    /// Removes every expired entry and returns how many were removed.
    fn sweep_expired(&self) -> usize;
}

// == Sweep Handle ==
/// Owned handle to a running sweep task.
///
/// Dropping the handle stops the task.
#[derive(Debug)]
pub struct SweepHandle {
    label: &'static str,
    token: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SweepHandle {
    // == Stop ==
    /// Signals the task to exit. Idempotent.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Returns true once [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    // == Join ==
    /// Stops the task and waits for it to finish.
    ///
    /// Returns the task's `JoinError` if a sweep pass panicked. Calling it
    /// again after the task has been joined returns `Ok`.
    pub async fn join(&self) -> Result<(), JoinError> {
        self.stop();
        let handle = self.handle.lock().take();
        let Some(handle) = handle else {
            return Ok(());
        };
        handle.await.map_err(|err| {
            if err.is_panic() {
                warn!(cache = self.label, "TTL sweep task panicked");
            }
            err
        })
    }
}

impl Drop for SweepHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Spawns a background task that calls [`Sweep::sweep_expired`] every `interval`.
///
/// The task only holds a weak reference to its target and exits on its own
/// once the target has been dropped. It must be called from within a tokio
/// runtime.
///
/// # Arguments
/// * `target` - Weak reference to the store to sweep
/// * `interval` - Time between sweep passes; must be non-zero
/// * `label` - Name used in log output
pub fn spawn_sweep_task<S: Sweep>(
    target: Weak<S>,
    interval: Duration,
    label: &'static str,
) -> SweepHandle {
    let token = CancellationToken::new();
    let cancelled = token.clone();

    let handle = tokio::spawn(async move {
        info!(
            cache = label,
            interval_ms = interval.as_millis() as u64,
            "Starting TTL sweep task"
        );

        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancelled.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let Some(target) = target.upgrade() else {
                break;
            };
            let removed = target.sweep_expired();
            drop(target);

            if removed > 0 {
                info!(cache = label, removed, "TTL sweep removed expired entries");
            } else {
                debug!(cache = label, "TTL sweep found no expired entries");
            }
        }

        info!(cache = label, "TTL sweep task stopped");
    });

    SweepHandle {
        label,
        token,
        handle: Mutex::new(Some(handle)),
    }
}
