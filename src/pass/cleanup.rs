//! Periodic removal of expired tokens.
//!
//! Expiry is decided by comparing timestamps, so the sweep is pure
//! housekeeping: a token the sweep has not reached yet still validates as
//! expired, and one it already removed validates as not found.

use std::future::Future;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::rate_limit::RateLimiter;
use super::storage::TokenStore;
use super::PassError;

/// Runs one sweep cycle at `now`.
///
/// Deletes every token whose expiry instant is at or before `now` and drops
/// elapsed rate-limit windows. Returns the number of tokens removed; running
/// it again at the same instant removes nothing.
pub async fn sweep_once<S: TokenStore + ?Sized>(
    storage: &S,
    rate_limiter: &RateLimiter,
    now: i64,
) -> Result<usize, PassError> {
    let removed = storage.cleanup_expired(now).await?;
    let pruned = rate_limiter.prune(now).await;
    if removed > 0 || pruned > 0 {
        debug!(
            "Sweep removed {} expired tokens and {} idle rate-limit windows",
            removed, pruned
        );
    }
    Ok(removed)
}

/// Handle to a background task that runs a sweep job on a fixed interval.
///
/// The first run happens one full interval after [`ExpirySweeper::start`].
/// A failing run is reported with `tracing::warn!` and the task keeps going.
/// Dropping the handle aborts the task; [`ExpirySweeper::stop`] shuts it
/// down gracefully and waits for it.
///
/// # Example
///
/// ```rust
/// use qr_pass::ExpirySweeper;
/// use std::time::Duration;
///
/// # async fn example() {
/// let sweeper = ExpirySweeper::start(Duration::from_secs(30), || async {
///     Ok::<usize, qr_pass::PassError>(0)
/// });
/// assert!(sweeper.is_running());
/// sweeper.stop().await;
/// # }
/// ```
#[derive(Debug)]
pub struct ExpirySweeper {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ExpirySweeper {
    /// Spawns the sweep task on the current tokio runtime.
    ///
    /// `job` is called once per tick and returns the number of tokens removed.
    pub fn start<F, Fut>(interval: Duration, job: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<usize, PassError>> + Send + 'static,
    {
        let (shutdown, mut shutdown_rx) = oneshot::channel::<()>();
        // tokio::time::interval panics on a zero period
        let period = interval.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        if let Err(e) = job().await {
                            warn!("Expiry sweep failed: {}", e);
                        }
                    }
                }
            }
            debug!("Expiry sweeper stopped");
        });

        debug!("Expiry sweeper started with a {:?} interval", period);
        Self {
            shutdown: Some(shutdown),
            handle: Some(handle),
        }
    }

    /// Whether the background task is still alive.
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Signals the task to stop and waits until it has exited.
    ///
    /// A sweep already in progress is allowed to finish.
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!("Expiry sweeper task ended abnormally: {}", e);
                }
            }
        }
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
