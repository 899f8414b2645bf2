use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::PassError;

/// When the owning identity's status is consulted during validation.
///
/// Token-state checks (expired, already used) and the identity-status check
/// are independent; this value is the single place that decides their order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusCheckOrder {
    /// Expired and already-used checks win; a blocked identity is reported
    /// only for otherwise valid tokens.
    #[default]
    AfterTokenState,
    /// A blocked identity is reported even for expired or used tokens.
    BeforeTokenState,
    /// The identity status is never checked; a blocked identity's valid
    /// token still validates and the projection carries its status.
    Disabled,
}

impl StatusCheckOrder {
    /// Returns the configuration spelling of this order.
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCheckOrder::AfterTokenState => "after",
            StatusCheckOrder::BeforeTokenState => "before",
            StatusCheckOrder::Disabled => "disabled",
        }
    }
}

impl fmt::Display for StatusCheckOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatusCheckOrder {
    type Err = PassError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "after" | "after_token_state" => Ok(StatusCheckOrder::AfterTokenState),
            "before" | "before_token_state" => Ok(StatusCheckOrder::BeforeTokenState),
            "disabled" | "off" | "none" => Ok(StatusCheckOrder::Disabled),
            other => Err(PassError::Configuration(format!(
                "unknown status check order: {other}"
            ))),
        }
    }
}

/// Predefined configuration presets for common deployments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigPreset {
    /// Production configuration.
    ///
    /// - Token TTL: 2 minutes
    /// - Rate limit: 10 generations per 1 minute window
    /// - Sweep interval: 30 seconds
    Production,

    /// Development-friendly configuration.
    ///
    /// Longer-lived codes and a generous rate limit for manual testing:
    /// - Token TTL: 10 minutes
    /// - Rate limit: 100 generations per 1 minute window
    /// - Sweep interval: 1 minute
    Development,

    /// Strict configuration for high-traffic redemption points.
    ///
    /// - Token TTL: 1 minute
    /// - Rate limit: 3 generations per 1 minute window
    /// - Sweep interval: 15 seconds
    Strict,

    /// Load configuration from environment variables.
    ///
    /// See [`PassConfig`] for the variables that are read.
    FromEnv,
}

/// Configuration for token issuance and validation.
///
/// # Environment Variables
///
/// - `QR_PASS_TOKEN_TTL`: token lifetime in seconds (default: 120)
/// - `QR_PASS_MAX_PER_WINDOW`: generations allowed per window (default: 10)
/// - `QR_PASS_RATE_WINDOW`: rate-limit window in seconds (default: 60)
/// - `QR_PASS_SWEEP_INTERVAL`: expiry sweep interval in seconds (default: 30)
/// - `QR_PASS_BASE_URL`: base of the public validation URL (default: `http://localhost:8080`)
/// - `QR_PASS_STATUS_CHECK`: `after`, `before` or `disabled` (default: `after`)
///
/// # Example
///
/// ```rust
/// use qr_pass::{ConfigPreset, PassConfig};
/// use std::time::Duration;
///
/// let config = PassConfig::from(ConfigPreset::Production);
/// assert_eq!(config.token_ttl, Duration::from_secs(120));
///
/// let custom = PassConfig {
///     token_ttl: Duration::from_secs(90),
///     ..PassConfig::from(ConfigPreset::Production)
/// };
/// assert_eq!(custom.max_per_window, 10);
/// ```
#[derive(Debug, Clone)]
pub struct PassConfig {
    /// Lifetime of an issued token
    pub token_ttl: Duration,
    /// Generations allowed per identity per window
    pub max_per_window: u32,
    /// Length of the rate-limit window
    pub rate_window: Duration,
    /// Interval between expiry sweeps
    pub sweep_interval: Duration,
    /// Base URL the public validation path is appended to
    pub base_url: String,
    /// Order of the identity-status check during validation
    pub status_check: StatusCheckOrder,
}

const DEFAULT_BASE_URL: &str = "http://localhost:8080";

fn env_secs(key: &str, default: u64) -> Duration {
    Duration::from_secs(
        std::env::var(key)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(default),
    )
}

impl Default for PassConfig {
    fn default() -> Self {
        Self {
            token_ttl: env_secs("QR_PASS_TOKEN_TTL", 120),
            max_per_window: std::env::var("QR_PASS_MAX_PER_WINDOW")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            rate_window: env_secs("QR_PASS_RATE_WINDOW", 60),
            sweep_interval: env_secs("QR_PASS_SWEEP_INTERVAL", 30),
            base_url: std::env::var("QR_PASS_BASE_URL")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            status_check: std::env::var("QR_PASS_STATUS_CHECK")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
        }
    }
}

impl PassConfig {
    /// Validates the configuration and returns any warnings.
    ///
    /// Warnings do not prevent the server from starting; use
    /// [`PassConfig::ensure_usable`] for the settings that do.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.token_ttl.as_secs() < 30 {
            warnings.push(
                "Very short token TTL (< 30 seconds) may expire before a merchant can scan it"
                    .to_string(),
            );
        }
        if self.token_ttl.as_secs() > 900 {
            warnings.push(
                "Long token TTL (> 15 minutes) widens the window for screenshot sharing"
                    .to_string(),
            );
        }

        if self.max_per_window > 100 {
            warnings.push(
                "High generation limit (> 100 per window) offers little abuse protection"
                    .to_string(),
            );
        }

        if self.sweep_interval > self.token_ttl.saturating_mul(10) {
            warnings.push(
                "Sweep interval is much longer than the token TTL; expired tokens will pile up"
                    .to_string(),
            );
        }

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            warnings.push("Base URL should start with http:// or https://".to_string());
        }

        warnings
    }

    /// Rejects settings the server cannot run with.
    pub fn ensure_usable(&self) -> Result<(), PassError> {
        if self.token_ttl.is_zero() {
            return Err(PassError::Configuration(
                "token TTL must be greater than zero".to_string(),
            ));
        }
        if self.max_per_window == 0 {
            return Err(PassError::Configuration(
                "max generations per window must be greater than zero".to_string(),
            ));
        }
        if self.rate_window.is_zero() {
            return Err(PassError::Configuration(
                "rate-limit window must be greater than zero".to_string(),
            ));
        }
        if self.sweep_interval.is_zero() {
            return Err(PassError::Configuration(
                "sweep interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns a summary of the current configuration.
    pub fn summary(&self) -> String {
        format!(
            "PassConfig {{ TTL: {}s, Limit: {}/{}s, Sweep: {}s, Base URL: {}, Status check: {} }}",
            self.token_ttl.as_secs(),
            self.max_per_window,
            self.rate_window.as_secs(),
            self.sweep_interval.as_secs(),
            self.base_url,
            self.status_check,
        )
    }
}

impl From<ConfigPreset> for PassConfig {
    fn from(preset: ConfigPreset) -> Self {
        let base = |ttl: u64, max: u32, window: u64, sweep: u64| Self {
            token_ttl: Duration::from_secs(ttl),
            max_per_window: max,
            rate_window: Duration::from_secs(window),
            sweep_interval: Duration::from_secs(sweep),
            base_url: DEFAULT_BASE_URL.to_string(),
            status_check: StatusCheckOrder::AfterTokenState,
        };
        match preset {
            ConfigPreset::Production => base(120, 10, 60, 30),
            ConfigPreset::Development => base(600, 100, 60, 60),
            ConfigPreset::Strict => base(60, 3, 60, 15),
            ConfigPreset::FromEnv => Self::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const ENV_KEYS: [&str; 6] = [
        "QR_PASS_TOKEN_TTL",
        "QR_PASS_MAX_PER_WINDOW",
        "QR_PASS_RATE_WINDOW",
        "QR_PASS_SWEEP_INTERVAL",
        "QR_PASS_BASE_URL",
        "QR_PASS_STATUS_CHECK",
    ];

    fn clear_env_vars() {
        for key in ENV_KEYS {
            unsafe {
                std::env::remove_var(key);
            }
        }
    }

    #[test]
    fn test_production_preset() {
        let config = PassConfig::from(ConfigPreset::Production);
        assert_eq!(config.token_ttl.as_secs(), 120);
        assert_eq!(config.max_per_window, 10);
        assert_eq!(config.rate_window.as_secs(), 60);
        assert_eq!(config.sweep_interval.as_secs(), 30);
        assert_eq!(config.status_check, StatusCheckOrder::AfterTokenState);
    }

    #[test]
    fn test_development_and_strict_presets() {
        let dev = PassConfig::from(ConfigPreset::Development);
        assert_eq!(dev.token_ttl.as_secs(), 600);
        assert_eq!(dev.max_per_window, 100);

        let strict = PassConfig::from(ConfigPreset::Strict);
        assert_eq!(strict.token_ttl.as_secs(), 60);
        assert_eq!(strict.max_per_window, 3);
        assert_eq!(strict.sweep_interval.as_secs(), 15);
    }

    #[test]
    #[serial]
    fn test_from_env() {
        clear_env_vars();

        unsafe {
            std::env::set_var("QR_PASS_TOKEN_TTL", "300");
            std::env::set_var("QR_PASS_MAX_PER_WINDOW", "5");
            std::env::set_var("QR_PASS_RATE_WINDOW", "120");
            std::env::set_var("QR_PASS_BASE_URL", "https://pass.example.org");
            std::env::set_var("QR_PASS_STATUS_CHECK", "before");
        }

        let config = PassConfig::from(ConfigPreset::FromEnv);
        assert_eq!(config.token_ttl.as_secs(), 300);
        assert_eq!(config.max_per_window, 5);
        assert_eq!(config.rate_window.as_secs(), 120);
        assert_eq!(config.sweep_interval.as_secs(), 30);
        assert_eq!(config.base_url, "https://pass.example.org");
        assert_eq!(config.status_check, StatusCheckOrder::BeforeTokenState);

        clear_env_vars();
    }

    #[test]
    #[serial]
    fn test_unparseable_env_falls_back_to_defaults() {
        clear_env_vars();

        unsafe {
            std::env::set_var("QR_PASS_TOKEN_TTL", "two minutes");
            std::env::set_var("QR_PASS_STATUS_CHECK", "sometimes");
        }

        let config = PassConfig::default();
        assert_eq!(config.token_ttl.as_secs(), 120);
        assert_eq!(config.status_check, StatusCheckOrder::AfterTokenState);

        clear_env_vars();
    }

    #[test]
    fn test_status_check_parsing() {
        assert_eq!(
            "AFTER".parse::<StatusCheckOrder>().unwrap(),
            StatusCheckOrder::AfterTokenState
        );
        assert_eq!(
            "disabled".parse::<StatusCheckOrder>().unwrap(),
            StatusCheckOrder::Disabled
        );
        assert!(matches!(
            "later".parse::<StatusCheckOrder>(),
            Err(PassError::Configuration(_))
        ));
    }

    #[test]
    fn test_validation_valid_config() {
        let config = PassConfig::from(ConfigPreset::Production);
        assert!(config.validate().is_empty());
        assert!(config.ensure_usable().is_ok());
    }

    #[test]
    fn test_validation_warnings() {
        let config = PassConfig {
            token_ttl: Duration::from_secs(10),
            base_url: "pass.example.org".to_string(),
            ..PassConfig::from(ConfigPreset::Production)
        };
        let warnings = config.validate();
        assert!(warnings.iter().any(|w| w.contains("Very short token TTL")));
        assert!(warnings.iter().any(|w| w.contains("Base URL")));
    }

    #[test]
    fn test_validation_with_huge_ttl() {
        let config = PassConfig {
            token_ttl: Duration::from_secs(u64::MAX / 2),
            ..PassConfig::from(ConfigPreset::Production)
        };
        let warnings = config.validate();
        assert!(!warnings.iter().any(|w| w.contains("Sweep interval")));
    }

    #[test]
    fn test_zero_limit_is_unusable() {
        let config = PassConfig {
            max_per_window: 0,
            ..PassConfig::from(ConfigPreset::Production)
        };
        assert!(matches!(
            config.ensure_usable(),
            Err(PassError::Configuration(_))
        ));
    }

    #[test]
    fn test_summary() {
        let summary = PassConfig::from(ConfigPreset::Production).summary();
        assert!(summary.contains("TTL: 120s"));
        assert!(summary.contains("Limit: 10/60s"));
    }
}
