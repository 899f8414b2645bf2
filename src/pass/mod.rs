// Core components
mod config;
mod error;
mod generator;
mod rate_limit;
mod record;
mod server;
mod server_builder;
mod time_utils;
mod validator;

// Storage and housekeeping
pub mod cleanup;
pub mod storage;

// HTTP surface (optional feature)
#[cfg(feature = "http")]
pub mod http;

// Metrics (optional feature)
#[cfg(feature = "metrics")]
pub mod metrics;

// Core components exports
pub use config::{ConfigPreset, PassConfig, StatusCheckOrder};
pub use error::PassError;
#[cfg(feature = "default-generators")]
pub use generator::default_token;
pub use generator::{MAX_TOKEN_LEN, TokenGeneratorFn, is_well_formed_token};
pub use rate_limit::{RateLimitWindow, RateLimiter};
pub use record::{
    ClientMetadata, Identity, IdentityProjection, IdentityStatus, LogOutcome, TokenRecord,
    ValidationLogEntry, mask_document,
};
pub use server::{IssuedToken, PassServer, PassStats};
pub use server_builder::PassServerBuilder;
pub use time_utils::{TimeProviderFn, current_timestamp};
pub use validator::{TokenValidator, ValidationOutcome};

// Storage and housekeeping exports
pub use cleanup::{ExpirySweeper, sweep_once};
pub use storage::{
    IdentityDirectory, MemoryStorage, PassStorage, StatusCounts, StorageStats, TokenStore,
    ValidationLog,
};

// Metrics exports (optional feature)
#[cfg(feature = "metrics")]
pub use metrics::{
    InMemoryMetricsCollector, MetricEvent, MetricsCollector, NoOpMetricsCollector, PassMetrics,
};
