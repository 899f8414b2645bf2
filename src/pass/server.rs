use std::sync::Arc;
#[cfg(feature = "metrics")]
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::cleanup::{ExpirySweeper, sweep_once};
use super::config::PassConfig;
use super::generator::{TokenGeneratorFn, is_well_formed_token};
use super::rate_limit::RateLimiter;
use super::record::{ClientMetadata, LogOutcome, TokenRecord, ValidationLogEntry};
use super::storage::{MemoryStorage, PassStorage};
use super::time_utils::{self, TimeProviderFn};
use super::validator::{TokenValidator, ValidationOutcome};
use super::{PassError, PassServerBuilder};

#[cfg(feature = "metrics")]
use super::metrics::{MetricEvent, MetricsCollector, PassMetrics};

/// Attempts at drawing a fresh token before a collision is reported.
const MAX_GENERATION_ATTEMPTS: usize = 3;

/// A freshly issued token, ready to be rendered as a QR code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedToken {
    pub token: String,
    /// Public validation URL encoding the token
    pub url: String,
    pub ttl_seconds: u64,
    pub expires_at: i64,
}

/// Aggregate figures for the admin dashboard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassStats {
    pub total_identities: usize,
    pub active_identities: usize,
    pub inactive_identities: usize,
    pub blocked_identities: usize,
    /// Successful validations since the start of the current UTC day
    pub validations_today: usize,
    /// Token records currently held by the store
    pub tokens_stored: usize,
    pub unused_tokens: usize,
}

/// Issues and validates single-use pass tokens.
///
/// The server owns the rate limiter and the validation policy; persistence
/// is delegated to the storage backend `S`.
///
/// To create an instance, use the `PassServer::builder()` method.
pub struct PassServer<S: PassStorage> {
    pub(crate) storage: Arc<S>,
    pub(crate) config: PassConfig,
    pub(crate) rate_limiter: Arc<RateLimiter>,
    pub(crate) validator: TokenValidator<S>,
    pub(crate) time_provider: TimeProviderFn,
    pub(crate) token_generator: TokenGeneratorFn,
    #[cfg(feature = "metrics")]
    pub(crate) metrics_collector: Arc<dyn MetricsCollector>,
}

impl PassServer<MemoryStorage> {
    /// Creates a new `PassServerBuilder` to construct a `PassServer`.
    ///
    /// The builder defaults to using `MemoryStorage`. Provide a custom storage
    /// backend using the `.with_storage()` method on the builder.
    pub fn builder() -> PassServerBuilder<MemoryStorage> {
        PassServerBuilder::new()
    }
}

impl<S: PassStorage + 'static> PassServer<S> {
    /// Internal constructor used by the builder.
    pub(crate) fn new(
        storage: Arc<S>,
        config: PassConfig,
        time_provider: TimeProviderFn,
        token_generator: TokenGeneratorFn,
        #[cfg(feature = "metrics")] metrics_collector: Arc<dyn MetricsCollector>,
    ) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(
            config.max_per_window,
            config.rate_window,
        ));
        let validator = TokenValidator::new(
            Arc::clone(&storage),
            config.status_check,
            Arc::clone(&time_provider),
        );
        Self {
            storage,
            config,
            rate_limiter,
            validator,
            time_provider,
            token_generator,
            #[cfg(feature = "metrics")]
            metrics_collector,
        }
    }

    /// Initializes the storage backend (e.g., creates database tables).
    pub(crate) async fn init(&self) -> Result<(), PassError> {
        self.storage.init().await
    }

    fn now(&self) -> Result<i64, PassError> {
        (self.time_provider)()
    }

    /// Issues a token for `identity_id` after checking the directory.
    ///
    /// Unknown identities fail with [`PassError::UnknownIdentity`]; blocked
    /// or inactive ones with [`PassError::IdentityBlocked`]. Use
    /// [`PassServer::generate`] when the caller has already checked.
    pub async fn issue(&self, identity_id: &str) -> Result<IssuedToken, PassError> {
        let identity = self
            .storage
            .find_identity(identity_id)
            .await?
            .ok_or_else(|| PassError::UnknownIdentity(identity_id.to_string()))?;
        if identity.status.is_blocked() {
            debug!(
                "Refusing to issue a token for {} identity {}",
                identity.status, identity_id
            );
            return Err(PassError::IdentityBlocked);
        }
        self.generate(identity_id).await
    }

    /// Issues a token for an identity the caller has already vetted.
    ///
    /// Consumes one generation from the identity's rate-limit window. When
    /// storing the token fails the generation is refunded.
    ///
    /// # Example
    ///
    /// ```rust
    /// use qr_pass::PassServer;
    ///
    /// # async fn example() -> Result<(), qr_pass::PassError> {
    /// let server = PassServer::builder()
    ///     .with_base_url("https://pass.example.org")
    ///     .build_and_init()
    ///     .await?;
    ///
    /// let issued = server.generate("employee-1").await?;
    /// assert_eq!(issued.ttl_seconds, 120);
    /// assert!(issued.url.starts_with("https://pass.example.org/validate/"));
    /// # Ok(())
    /// # }
    /// ```
    pub async fn generate(&self, identity_id: &str) -> Result<IssuedToken, PassError> {
        #[cfg(feature = "metrics")]
        let start_time = Instant::now();

        let now = self.now()?;
        let window = match self.rate_limiter.check_and_consume(identity_id, now).await {
            Ok(window) => window,
            Err(e) => {
                #[cfg(feature = "metrics")]
                self.metrics_collector
                    .record_event(MetricEvent::RateLimited)
                    .await;
                return Err(e);
            }
        };

        match self.insert_fresh_token(identity_id, now).await {
            Ok(issued) => {
                info!(
                    "Issued token for identity {} ({} generations left in window)",
                    identity_id, window.generations_remaining
                );
                #[cfg(feature = "metrics")]
                self.metrics_collector
                    .record_event(MetricEvent::TokenIssued {
                        duration: start_time.elapsed(),
                    })
                    .await;
                Ok(issued)
            }
            Err(e) => {
                self.rate_limiter.refund(identity_id).await;
                #[cfg(feature = "metrics")]
                {
                    if matches!(e, PassError::StorageUnavailable(_)) {
                        self.metrics_collector
                            .record_event(MetricEvent::StorageError { operation: "insert" })
                            .await;
                    }
                }
                Err(e)
            }
        }
    }

    /// Draws tokens until one is stored without colliding.
    async fn insert_fresh_token(
        &self,
        identity_id: &str,
        now: i64,
    ) -> Result<IssuedToken, PassError> {
        let expires_at = time_utils::add_duration(now, self.config.token_ttl);

        for attempt in 1..=MAX_GENERATION_ATTEMPTS {
            let token = (self.token_generator)(now);
            if !is_well_formed_token(&token) {
                return Err(PassError::Configuration(
                    "token generator produced a string that is not URL-safe".to_string(),
                ));
            }

            let record = TokenRecord {
                id: new_record_id(now, &token),
                identity_id: identity_id.to_string(),
                token,
                created_at: now,
                expires_at,
                used: false,
                used_at: None,
            };

            match self.storage.insert_token(&record).await {
                Ok(()) => {
                    return Ok(IssuedToken {
                        url: self.validation_url(&record.token),
                        token: record.token,
                        ttl_seconds: self.config.token_ttl.as_secs(),
                        expires_at,
                    });
                }
                Err(PassError::DuplicateToken) => {
                    warn!(
                        "Token collision for identity {} (attempt {}/{})",
                        identity_id, attempt, MAX_GENERATION_ATTEMPTS
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Err(PassError::DuplicateToken)
    }

    /// Public URL a merchant opens to validate `token`.
    pub fn validation_url(&self, token: &str) -> String {
        format!(
            "{}/validate/{}",
            self.config.base_url.trim_end_matches('/'),
            token
        )
    }

    /// Validates and, on success, consumes `token`.
    ///
    /// Lifecycle failures (expired, used, unknown, blocked, malformed) come
    /// back as [`ValidationOutcome`] variants; `Err` means the store failed.
    pub async fn validate(
        &self,
        token: &str,
        client: Option<ClientMetadata>,
    ) -> Result<ValidationOutcome, PassError> {
        #[cfg(feature = "metrics")]
        let start_time = Instant::now();

        let result = self.validator.validate(token, client).await;

        #[cfg(feature = "metrics")]
        {
            let event = match &result {
                Ok(outcome) => Some(MetricEvent::Validation {
                    outcome: outcome.as_str(),
                    duration: start_time.elapsed(),
                }),
                Err(PassError::StorageUnavailable(_)) => Some(MetricEvent::StorageError {
                    operation: "validate",
                }),
                Err(_) => None,
            };
            if let Some(event) = event {
                self.metrics_collector.record_event(event).await;
            }
        }

        result
    }

    /// Up to `limit` validation log entries, newest first.
    pub async fn recent_validations(
        &self,
        limit: usize,
    ) -> Result<Vec<ValidationLogEntry>, PassError> {
        self.storage.list(limit).await
    }

    /// Aggregate figures for the admin dashboard.
    pub async fn stats(&self) -> Result<PassStats, PassError> {
        let now = self.now()?;
        let counts = self.storage.status_counts().await?;
        let validations_today = self
            .storage
            .count_since(LogOutcome::Valid, time_utils::start_of_day(now))
            .await?;
        let token_stats = self.storage.get_stats().await?;

        Ok(PassStats {
            total_identities: counts.total(),
            active_identities: counts.active,
            inactive_identities: counts.inactive,
            blocked_identities: counts.blocked,
            validations_today,
            tokens_stored: token_stats.total_records,
            unused_tokens: token_stats.unused_records,
        })
    }

    /// Runs one expiry sweep now, returning the number of tokens removed.
    pub async fn sweep_expired(&self) -> Result<usize, PassError> {
        #[cfg(feature = "metrics")]
        let start_time = Instant::now();

        let now = self.now()?;
        let removed = sweep_once(self.storage.as_ref(), &self.rate_limiter, now).await?;

        #[cfg(feature = "metrics")]
        self.metrics_collector
            .record_event(MetricEvent::Sweep {
                removed,
                duration: start_time.elapsed(),
            })
            .await;

        Ok(removed)
    }

    /// Starts the periodic expiry sweep on the configured interval.
    ///
    /// The returned handle owns the task; stop it with
    /// [`ExpirySweeper::stop`] on shutdown.
    pub fn start_sweeper(&self) -> ExpirySweeper {
        let storage = Arc::clone(&self.storage);
        let rate_limiter = Arc::clone(&self.rate_limiter);
        let clock = Arc::clone(&self.time_provider);
        #[cfg(feature = "metrics")]
        let metrics = Arc::clone(&self.metrics_collector);

        ExpirySweeper::start(self.config.sweep_interval, move || {
            let storage = Arc::clone(&storage);
            let rate_limiter = Arc::clone(&rate_limiter);
            let clock = Arc::clone(&clock);
            #[cfg(feature = "metrics")]
            let metrics = Arc::clone(&metrics);

            async move {
                #[cfg(feature = "metrics")]
                let start_time = Instant::now();

                let now = (clock)()?;
                let removed = sweep_once(storage.as_ref(), &rate_limiter, now).await?;

                #[cfg(feature = "metrics")]
                metrics
                    .record_event(MetricEvent::Sweep {
                        removed,
                        duration: start_time.elapsed(),
                    })
                    .await;

                Ok::<usize, PassError>(removed)
            }
        })
    }

    /// Generations `identity_id` may still perform in its current window.
    pub async fn remaining_generations(&self, identity_id: &str) -> Result<u32, PassError> {
        let now = self.now()?;
        Ok(self.rate_limiter.remaining(identity_id, now).await)
    }

    /// Returns the active configuration.
    pub fn config(&self) -> &PassConfig {
        &self.config
    }

    /// Returns a reference to the storage backend.
    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// Snapshot of the collected metrics.
    #[cfg(feature = "metrics")]
    pub async fn metrics(&self) -> Result<PassMetrics, PassError> {
        self.metrics_collector.get_metrics().await
    }
}

#[cfg(feature = "default-generators")]
fn new_record_id(_issued_at: i64, _token: &str) -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(not(feature = "default-generators"))]
fn new_record_id(issued_at: i64, token: &str) -> String {
    format!("{issued_at}-{token}")
}
