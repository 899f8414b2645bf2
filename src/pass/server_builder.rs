use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::pass::config::{ConfigPreset, PassConfig, StatusCheckOrder};
use crate::pass::generator::{self, TokenGeneratorFn};
use crate::pass::time_utils::{self, TimeProviderFn};
use crate::pass::{PassError, PassServer};
use crate::storage::{MemoryStorage, PassStorage};

#[cfg(feature = "metrics")]
use crate::pass::metrics::{MetricsCollector, NoOpMetricsCollector};

/// A builder for creating a `PassServer` instance.
///
/// This builder defaults to `MemoryStorage` and the production preset, and
/// allows overriding each setting individually. Pass
/// `PassConfig::from(ConfigPreset::FromEnv)` to `with_config` to read the
/// `QR_PASS_*` variables instead.
#[must_use = "The builder does nothing unless `.build_and_init()` is called."]
pub struct PassServerBuilder<S: PassStorage> {
    storage: Arc<S>,
    config: PassConfig,
    time_provider: Option<TimeProviderFn>,
    token_generator: Option<TokenGeneratorFn>,
    #[cfg(feature = "metrics")]
    metrics_collector: Option<Arc<dyn MetricsCollector>>,
}

impl PassServerBuilder<MemoryStorage> {
    pub(crate) fn new() -> Self {
        Self {
            storage: Arc::new(MemoryStorage::new()),
            config: PassConfig::from(ConfigPreset::Production),
            time_provider: None,
            token_generator: None,
            #[cfg(feature = "metrics")]
            metrics_collector: None,
        }
    }
}

impl<S: PassStorage + 'static> PassServerBuilder<S> {
    /// Specifies a custom storage backend to use instead of the default `MemoryStorage`.
    pub fn with_storage<T: PassStorage + 'static>(self, storage: Arc<T>) -> PassServerBuilder<T> {
        PassServerBuilder {
            storage,
            config: self.config,
            time_provider: self.time_provider,
            token_generator: self.token_generator,
            #[cfg(feature = "metrics")]
            metrics_collector: self.metrics_collector,
        }
    }

    /// Replaces the whole configuration.
    pub fn with_config(mut self, config: PassConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the lifetime of issued tokens.
    ///
    /// If not set, defaults to 2 minutes.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.config.token_ttl = ttl;
        self
    }

    /// Sets how many tokens one identity may generate per window.
    ///
    /// If not set, defaults to 10 per 60 seconds.
    pub fn with_rate_limit(mut self, max_per_window: u32, window: Duration) -> Self {
        self.config.max_per_window = max_per_window;
        self.config.rate_window = window;
        self
    }

    /// Sets the interval of the background expiry sweep.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.config.sweep_interval = interval;
        self
    }

    /// Sets the base URL validation links are built from.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.base_url = base_url.into();
        self
    }

    /// Chooses when the identity status is checked during validation.
    pub fn with_status_check(mut self, order: StatusCheckOrder) -> Self {
        self.config.status_check = order;
        self
    }

    /// Replaces the system clock.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use qr_pass::PassServer;
    /// # async fn example() -> Result<(), qr_pass::PassError> {
    /// let server = PassServer::builder()
    ///     .with_time_provider(|| Ok(1_700_000_000))
    ///     .build_and_init()
    ///     .await?;
    ///
    /// let issued = server.generate("employee-1").await?;
    /// assert_eq!(issued.expires_at, 1_700_000_120);
    /// # Ok(())
    /// # }
    /// ```
    pub fn with_time_provider<F>(mut self, provider: F) -> Self
    where
        F: Fn() -> Result<i64, PassError> + Send + Sync + 'static,
    {
        self.time_provider = Some(Arc::new(provider));
        self
    }

    /// Replaces the token generator.
    ///
    /// The generator receives the issuance timestamp and must return a
    /// URL-safe string; collisions are detected by the store and retried.
    pub fn with_token_generator<F>(mut self, generator: F) -> Self
    where
        F: Fn(i64) -> String + Send + Sync + 'static,
    {
        self.token_generator = Some(Arc::new(generator));
        self
    }

    /// Sets the collector that receives issuance, validation and sweep events.
    #[cfg(feature = "metrics")]
    pub fn with_metrics_collector(mut self, collector: Arc<dyn MetricsCollector>) -> Self {
        self.metrics_collector = Some(collector);
        self
    }

    /// Builds and initializes the `PassServer`.
    ///
    /// Rejects unusable configuration, reports questionable values with
    /// `tracing::warn!`, and calls the storage backend's `init()`. A backend
    /// that cannot be reached fails here, once, rather than per request.
    pub async fn build_and_init(self) -> Result<PassServer<S>, PassError> {
        self.config.ensure_usable()?;
        for warning in self.config.validate() {
            warn!("Configuration warning: {}", warning);
        }

        let token_generator = match self.token_generator {
            Some(generator) => generator,
            None => generator::default_generator()?,
        };
        let time_provider = self
            .time_provider
            .unwrap_or_else(time_utils::system_time_provider);

        #[cfg(feature = "metrics")]
        let metrics_collector = self
            .metrics_collector
            .unwrap_or_else(|| Arc::new(NoOpMetricsCollector::new()));

        let server = PassServer::new(
            self.storage,
            self.config,
            time_provider,
            token_generator,
            #[cfg(feature = "metrics")]
            metrics_collector,
        );
        server.init().await?;

        info!("Pass server initialized: {}", server.config().summary());
        Ok(server)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pass::config::ConfigPreset;

    #[tokio::test]
    async fn test_builder_overrides() -> Result<(), PassError> {
        let server = PassServer::builder()
            .with_config(PassConfig::from(ConfigPreset::Production))
            .with_ttl(Duration::from_secs(90))
            .with_rate_limit(3, Duration::from_secs(30))
            .with_sweep_interval(Duration::from_secs(5))
            .with_base_url("https://pass.example.org")
            .with_status_check(StatusCheckOrder::BeforeTokenState)
            .build_and_init()
            .await?;

        let config = server.config();
        assert_eq!(config.token_ttl, Duration::from_secs(90));
        assert_eq!(config.max_per_window, 3);
        assert_eq!(config.rate_window, Duration::from_secs(30));
        assert_eq!(config.sweep_interval, Duration::from_secs(5));
        assert_eq!(config.base_url, "https://pass.example.org");
        assert_eq!(config.status_check, StatusCheckOrder::BeforeTokenState);
        Ok(())
    }

    #[tokio::test]
    async fn test_builder_rejects_zero_ttl() {
        let result = PassServer::builder()
            .with_ttl(Duration::ZERO)
            .build_and_init()
            .await;
        assert!(matches!(result, Err(PassError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_builder_surfaces_clock_failure() -> Result<(), PassError> {
        let server = PassServer::builder()
            .with_time_provider(|| Err(PassError::Clock("clock unavailable".to_string())))
            .build_and_init()
            .await?;

        assert!(matches!(
            server.generate("E1").await,
            Err(PassError::Clock(_))
        ));
        Ok(())
    }
}
