//! Time utilities for safe timestamp handling.
//!
//! All lifecycle decisions compare unix timestamps in seconds obtained from a
//! [`TimeProviderFn`], so tests can drive the clock explicitly.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::PassError;

/// A function that provides the current unix timestamp in seconds.
pub type TimeProviderFn = Arc<dyn Fn() -> Result<i64, PassError> + Send + Sync>;

const SECONDS_PER_DAY: i64 = 86_400;

/// Get current timestamp in seconds since Unix epoch.
///
/// In the extremely rare case where system time is before Unix epoch,
/// it returns an error instead of panicking.
pub fn current_timestamp() -> Result<i64, PassError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .map_err(|_| PassError::Clock("System time is before Unix epoch".to_string()))
}

/// The default time provider backed by the system clock.
pub(crate) fn system_time_provider() -> TimeProviderFn {
    Arc::new(current_timestamp)
}

/// Adds a duration to a timestamp, saturating instead of overflowing.
pub(crate) fn add_duration(timestamp: i64, duration: Duration) -> i64 {
    let secs = i64::try_from(duration.as_secs()).unwrap_or(i64::MAX);
    timestamp.saturating_add(secs)
}

/// Whether a token with the given expiry instant is expired at `now`.
pub(crate) fn is_expired(expires_at: i64, now: i64) -> bool {
    now >= expires_at
}

/// Start of the UTC day containing `timestamp`.
pub(crate) fn start_of_day(timestamp: i64) -> i64 {
    timestamp - timestamp.rem_euclid(SECONDS_PER_DAY)
}
