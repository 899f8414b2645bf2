//! Counters for token issuance, validation outcomes and sweeps.
//!
//! Collection is pluggable through [`MetricsCollector`] and only compiled
//! with the `metrics` feature.

use crate::PassError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Snapshot of everything the collector has counted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassMetrics {
    /// Tokens successfully issued
    pub tokens_issued: u64,
    /// Generation requests refused by the rate limiter
    pub rate_limited: u64,
    /// Validation attempts, any outcome
    pub validation_attempts: u64,
    /// Validations that consumed a token
    pub validations_valid: u64,
    /// Validations refused because the token expired
    pub validations_expired: u64,
    /// Validations refused for a used, unknown or malformed token
    pub validations_invalid: u64,
    /// Validations refused because the cardholder is not active
    pub validations_blocked: u64,
    /// Storage calls that returned an error
    pub storage_errors: u64,
    /// Completed expiry sweeps
    pub sweeps: u64,
    /// Tokens removed by sweeps
    pub tokens_swept: u64,
    /// Average issuance latency (microseconds)
    pub avg_issue_time_us: u64,
    /// Average validation latency (microseconds)
    pub avg_validation_time_us: u64,
}

/// Events reported by the pass server.
#[derive(Debug, Clone)]
pub enum MetricEvent {
    /// A token was issued
    TokenIssued {
        /// Time taken to issue
        duration: Duration,
    },
    /// A generation request hit the limit
    RateLimited,
    /// A validation attempt completed
    Validation {
        /// Outcome name as reported by `ValidationOutcome::as_str`
        outcome: &'static str,
        /// Time taken to validate
        duration: Duration,
    },
    /// A storage call failed
    StorageError {
        /// Operation that failed (insert, get, mark_used, cleanup, ...)
        operation: &'static str,
    },
    /// An expiry sweep completed
    Sweep {
        /// Tokens removed
        removed: usize,
        /// Time taken
        duration: Duration,
    },
}

/// Trait for metrics collection backends.
///
/// # Thread Safety
///
/// All methods may be called concurrently from request handlers and the
/// background sweeper.
#[async_trait]
pub trait MetricsCollector: Send + Sync {
    /// Record a metric event.
    async fn record_event(&self, event: MetricEvent);

    /// Get current metrics snapshot.
    async fn get_metrics(&self) -> Result<PassMetrics, PassError>;

    /// Reset all metrics to zero.
    async fn reset_metrics(&self) -> Result<(), PassError>;

    /// Flush any buffered metrics.
    async fn flush(&self) -> Result<(), PassError> {
        Ok(())
    }
}

/// In-memory collector built on atomic counters.
///
/// # Example
///
/// ```rust
/// use qr_pass::metrics::{InMemoryMetricsCollector, MetricEvent, MetricsCollector};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), qr_pass::PassError> {
/// let collector = InMemoryMetricsCollector::new();
/// collector
///     .record_event(MetricEvent::TokenIssued {
///         duration: Duration::from_micros(150),
///     })
///     .await;
///
/// let metrics = collector.get_metrics().await?;
/// assert_eq!(metrics.tokens_issued, 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct InMemoryMetricsCollector {
    tokens_issued: AtomicU64,
    rate_limited: AtomicU64,
    validation_attempts: AtomicU64,
    validations_valid: AtomicU64,
    validations_expired: AtomicU64,
    validations_invalid: AtomicU64,
    validations_blocked: AtomicU64,
    storage_errors: AtomicU64,
    sweeps: AtomicU64,
    tokens_swept: AtomicU64,

    // Performance tracking
    issue_time_total: AtomicU64,
    validation_time_total: AtomicU64,
}

impl InMemoryMetricsCollector {
    /// Create a new in-memory metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    fn counters(&self) -> [&AtomicU64; 12] {
        [
            &self.tokens_issued,
            &self.rate_limited,
            &self.validation_attempts,
            &self.validations_valid,
            &self.validations_expired,
            &self.validations_invalid,
            &self.validations_blocked,
            &self.storage_errors,
            &self.sweeps,
            &self.tokens_swept,
            &self.issue_time_total,
            &self.validation_time_total,
        ]
    }
}

fn average(total: &AtomicU64, samples: u64) -> u64 {
    if samples > 0 {
        total.load(Ordering::Relaxed) / samples
    } else {
        0
    }
}

#[async_trait]
impl MetricsCollector for InMemoryMetricsCollector {
    async fn record_event(&self, event: MetricEvent) {
        match event {
            MetricEvent::TokenIssued { duration } => {
                self.tokens_issued.fetch_add(1, Ordering::Relaxed);
                self.issue_time_total
                    .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
            }
            MetricEvent::RateLimited => {
                self.rate_limited.fetch_add(1, Ordering::Relaxed);
            }
            MetricEvent::Validation { outcome, duration } => {
                self.validation_attempts.fetch_add(1, Ordering::Relaxed);
                self.validation_time_total
                    .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
                let counter = match outcome {
                    "valid" => &self.validations_valid,
                    "expired" => &self.validations_expired,
                    "identity_blocked" => &self.validations_blocked,
                    _ => &self.validations_invalid,
                };
                counter.fetch_add(1, Ordering::Relaxed);
            }
            MetricEvent::StorageError { .. } => {
                self.storage_errors.fetch_add(1, Ordering::Relaxed);
            }
            MetricEvent::Sweep { removed, .. } => {
                self.sweeps.fetch_add(1, Ordering::Relaxed);
                self.tokens_swept
                    .fetch_add(removed as u64, Ordering::Relaxed);
            }
        }
    }

    async fn get_metrics(&self) -> Result<PassMetrics, PassError> {
        let tokens_issued = self.tokens_issued.load(Ordering::Relaxed);
        let validation_attempts = self.validation_attempts.load(Ordering::Relaxed);

        Ok(PassMetrics {
            tokens_issued,
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            validation_attempts,
            validations_valid: self.validations_valid.load(Ordering::Relaxed),
            validations_expired: self.validations_expired.load(Ordering::Relaxed),
            validations_invalid: self.validations_invalid.load(Ordering::Relaxed),
            validations_blocked: self.validations_blocked.load(Ordering::Relaxed),
            storage_errors: self.storage_errors.load(Ordering::Relaxed),
            sweeps: self.sweeps.load(Ordering::Relaxed),
            tokens_swept: self.tokens_swept.load(Ordering::Relaxed),
            avg_issue_time_us: average(&self.issue_time_total, tokens_issued),
            avg_validation_time_us: average(&self.validation_time_total, validation_attempts),
        })
    }

    async fn reset_metrics(&self) -> Result<(), PassError> {
        for counter in self.counters() {
            counter.store(0, Ordering::Relaxed);
        }
        Ok(())
    }
}

/// Collector that discards every event.
#[derive(Debug, Default)]
pub struct NoOpMetricsCollector;

impl NoOpMetricsCollector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MetricsCollector for NoOpMetricsCollector {
    async fn record_event(&self, _event: MetricEvent) {}

    async fn get_metrics(&self) -> Result<PassMetrics, PassError> {
        Ok(PassMetrics::default())
    }

    async fn reset_metrics(&self) -> Result<(), PassError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_metrics_collector() -> Result<(), PassError> {
        let collector = InMemoryMetricsCollector::new();

        collector
            .record_event(MetricEvent::TokenIssued {
                duration: Duration::from_micros(100),
            })
            .await;
        collector
            .record_event(MetricEvent::TokenIssued {
                duration: Duration::from_micros(300),
            })
            .await;
        collector.record_event(MetricEvent::RateLimited).await;

        for outcome in ["valid", "expired", "already_used", "not_found", "identity_blocked"] {
            collector
                .record_event(MetricEvent::Validation {
                    outcome,
                    duration: Duration::from_micros(50),
                })
                .await;
        }

        let metrics = collector.get_metrics().await?;
        assert_eq!(metrics.tokens_issued, 2);
        assert_eq!(metrics.avg_issue_time_us, 200);
        assert_eq!(metrics.rate_limited, 1);
        assert_eq!(metrics.validation_attempts, 5);
        assert_eq!(metrics.validations_valid, 1);
        assert_eq!(metrics.validations_expired, 1);
        assert_eq!(metrics.validations_invalid, 2);
        assert_eq!(metrics.validations_blocked, 1);
        assert_eq!(metrics.avg_validation_time_us, 50);
        Ok(())
    }

    #[tokio::test]
    async fn test_sweep_and_storage_errors() -> Result<(), PassError> {
        let collector = InMemoryMetricsCollector::new();
        collector
            .record_event(MetricEvent::Sweep {
                removed: 7,
                duration: Duration::from_millis(2),
            })
            .await;
        collector
            .record_event(MetricEvent::StorageError { operation: "insert" })
            .await;

        let metrics = collector.get_metrics().await?;
        assert_eq!(metrics.sweeps, 1);
        assert_eq!(metrics.tokens_swept, 7);
        assert_eq!(metrics.storage_errors, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_metrics_reset() -> Result<(), PassError> {
        let collector = InMemoryMetricsCollector::new();
        collector.record_event(MetricEvent::RateLimited).await;
        collector.reset_metrics().await?;

        assert_eq!(collector.get_metrics().await?, PassMetrics::default());
        Ok(())
    }

    #[tokio::test]
    async fn test_noop_metrics_collector() -> Result<(), PassError> {
        let collector = NoOpMetricsCollector::new();
        collector.record_event(MetricEvent::RateLimited).await;

        let metrics = collector.get_metrics().await?;
        assert_eq!(metrics.rate_limited, 0);
        collector.flush().await?;
        Ok(())
    }
}
