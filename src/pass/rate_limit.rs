//! Per-identity fixed-window generation limit.
//!
//! Each identity owns a [`RateLimitWindow`]. A window is **open** while it
//! has generations remaining and **closed** once the counter reaches zero.
//! A closed window reopens lazily: the first check after `window` has
//! elapsed since `window_started_at` resets the counter and restarts the
//! window clock.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::debug;

use super::PassError;

/// Generation budget of one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitWindow {
    /// Generations still allowed in the current window
    pub generations_remaining: u32,
    /// Unix timestamp at which the current window began
    pub window_started_at: i64,
}

impl RateLimitWindow {
    fn fresh(max_per_window: u32, now: i64) -> Self {
        Self {
            generations_remaining: max_per_window,
            window_started_at: now,
        }
    }

    fn elapsed(&self, now: i64, window_secs: i64) -> bool {
        now - self.window_started_at >= window_secs
    }
}

/// Server-side generation limiter keyed by identity id.
#[derive(Debug)]
pub struct RateLimiter {
    max_per_window: u32,
    window: Duration,
    windows: RwLock<HashMap<String, RateLimitWindow>>,
}

impl RateLimiter {
    pub fn new(max_per_window: u32, window: Duration) -> Self {
        Self {
            max_per_window,
            window,
            windows: RwLock::new(HashMap::new()),
        }
    }

    fn window_secs(&self) -> i64 {
        i64::try_from(self.window.as_secs()).unwrap_or(i64::MAX)
    }

    /// Consumes one generation for `identity_id`, or refuses with
    /// [`PassError::RateLimited`] while the window is closed.
    ///
    /// Returns the window state after consumption.
    pub async fn check_and_consume(
        &self,
        identity_id: &str,
        now: i64,
    ) -> Result<RateLimitWindow, PassError> {
        let window_secs = self.window_secs();
        let mut windows = self.windows.write().await;
        let window = windows
            .entry(identity_id.to_string())
            .or_insert_with(|| RateLimitWindow::fresh(self.max_per_window, now));

        if window.elapsed(now, window_secs) {
            *window = RateLimitWindow::fresh(self.max_per_window, now);
        }

        if window.generations_remaining == 0 {
            let wait = window.window_started_at + window_secs - now;
            debug!(
                "Identity {} rate limited for another {}s",
                identity_id, wait
            );
            return Err(PassError::RateLimited {
                retry_after_secs: wait.max(1) as u64,
            });
        }

        window.generations_remaining -= 1;
        Ok(*window)
    }

    /// Returns a generation consumed by a request that failed afterwards.
    pub async fn refund(&self, identity_id: &str) {
        let mut windows = self.windows.write().await;
        if let Some(window) = windows.get_mut(identity_id) {
            window.generations_remaining =
                (window.generations_remaining + 1).min(self.max_per_window);
        }
    }

    /// Generations `identity_id` could still perform at `now`.
    pub async fn remaining(&self, identity_id: &str, now: i64) -> u32 {
        let windows = self.windows.read().await;
        match windows.get(identity_id) {
            Some(window) if !window.elapsed(now, self.window_secs()) => {
                window.generations_remaining
            }
            _ => self.max_per_window,
        }
    }

    /// Drops windows that have elapsed; they would be reset on next use anyway.
    pub async fn prune(&self, now: i64) -> usize {
        let window_secs = self.window_secs();
        let mut windows = self.windows.write().await;
        let before = windows.len();
        windows.retain(|_, window| !window.elapsed(now, window_secs));
        before - windows.len()
    }

    /// Number of identities with a live window.
    pub async fn tracked_identities(&self) -> usize {
        self.windows.read().await.len()
    }
}
