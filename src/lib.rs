//! # QR Pass
//!
//! Short-lived, single-use pass tokens for digital employee ID cards.
//!
//! A cardholder asks for a token, renders the returned URL as a QR code, and
//! a merchant opens the URL to confirm the cardholder is an active employee.
//! Each token validates successfully at most once and only until it expires.
//!
//! ## Features
//!
//! - **Single-use tokens**: consumption is an atomic compare-and-set in the store
//! - **Short TTL**: tokens expire two minutes after issuance by default
//! - **Server-side rate limiting**: ten generations per identity per minute
//! - **Redacted projection**: validation never returns the full document number
//! - **Audit log**: every validation attempt against a real token is recorded
//! - **Pluggable storage**: in-memory or SQLite, chosen once at startup
//! - **Expiry sweep**: a background task with an explicit start/stop lifecycle
//!
//! ## Quick Start
//!
//! ```rust
//! use qr_pass::{Identity, IdentityStatus, PassServer, ValidationOutcome};
//! use qr_pass::storage::{IdentityDirectory, MemoryStorage};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), qr_pass::PassError> {
//! let storage = Arc::new(MemoryStorage::new());
//! storage
//!     .upsert_identity(&Identity {
//!         id: "E1".to_string(),
//!         document_number: "123.456.789-00".to_string(),
//!         name: "João da Silva Santos".to_string(),
//!         registration: "2021001".to_string(),
//!         department: "Secretaria de Educação".to_string(),
//!         role: "Professor".to_string(),
//!         photo_url: None,
//!         status: IdentityStatus::Active,
//!     })
//!     .await?;
//!
//! let server = PassServer::builder()
//!     .with_storage(storage)
//!     .build_and_init()
//!     .await?;
//!
//! let issued = server.issue("E1").await?;
//!
//! match server.validate(&issued.token, None).await? {
//!     ValidationOutcome::Valid { identity } => {
//!         assert_eq!(identity.id_masked, "***.456.789-**");
//!     }
//!     other => panic!("unexpected outcome: {other:?}"),
//! }
//!
//! // The second presentation is refused
//! assert!(matches!(
//!     server.validate(&issued.token, None).await?,
//!     ValidationOutcome::AlreadyUsed { .. }
//! ));
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! [`PassConfig`] reads `QR_PASS_*` environment variables by default; see its
//! documentation for the full list, or start from a [`ConfigPreset`].
//!
//! ## Architecture
//!
//! - **[`PassServer`]**: issues tokens, validates them, runs the sweep
//! - **[`RateLimiter`]**: fixed-window generation budget per identity
//! - **[`storage`]**: token store, validation log and identity directory traits
//! - **[`ExpirySweeper`]**: background removal of expired tokens
//! - **[`PassError`]**: error taxonomy for every failure mode
//!
//! With the `http` feature, `pass::http::router` exposes the server over axum.

pub mod pass;

// Re-export commonly used types for convenience
pub use pass::{
    ClientMetadata, ConfigPreset, ExpirySweeper, Identity, IdentityProjection, IdentityStatus,
    IssuedToken, LogOutcome, PassConfig, PassError, PassServer, PassServerBuilder, PassStats,
    RateLimiter, StatusCheckOrder, TimeProviderFn, TokenGeneratorFn, TokenRecord,
    ValidationLogEntry, ValidationOutcome, mask_document,
};

// Re-export storage module for easier access to storage-related types
pub use pass::storage;

#[cfg(feature = "http")]
pub use pass::http;

#[cfg(feature = "metrics")]
pub use pass::metrics;
