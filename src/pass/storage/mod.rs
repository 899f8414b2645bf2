//! Pluggable storage backends for tokens, identities and the validation log.
//!
//! A backend implements three capability traits:
//!
//! - [`TokenStore`] persists tokens and performs the single-use transition
//! - [`ValidationLog`] is the append-only audit trail
//! - [`IdentityDirectory`] resolves identity ids to employee records
//!
//! Anything implementing all three is a [`PassStorage`] and can back a
//! [`PassServer`](crate::PassServer). The backend is chosen once, when the
//! server is built.

use crate::PassError;
use crate::pass::record::{Identity, LogOutcome, TokenRecord, ValidationLogEntry};
use async_trait::async_trait;

// Always available
mod memory;
pub use memory::MemoryStorage;

// Feature-gated storage backends
#[cfg(feature = "sqlite-storage")]
mod sqlite;
#[cfg(feature = "sqlite-storage")]
pub use sqlite::SqliteStorage;

/// Statistics about the token storage backend.
#[derive(Debug, Clone)]
pub struct StorageStats {
    /// Total number of token records in storage
    pub total_records: usize,
    /// Token records not yet consumed
    pub unused_records: usize,
    /// Additional backend-specific information
    pub backend_info: String,
}

/// Identity counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub active: usize,
    pub inactive: usize,
    pub blocked: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.active + self.inactive + self.blocked
    }
}

/// Persistence for issued tokens.
///
/// # Thread Safety
///
/// All methods are async and must be safe to call concurrently. In
/// particular [`TokenStore::mark_used`] must be atomic: when several callers
/// race to consume the same token, exactly one may observe `true`.
///
/// # Error Handling
///
/// Backend failures map to [`PassError::StorageUnavailable`]; a uniqueness
/// violation on insert maps to [`PassError::DuplicateToken`].
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Optional method for storage backend initialization.
    ///
    /// Called once while the server is built. Implementations can use this
    /// for schema creation and connectivity checks.
    async fn init(&self) -> Result<(), PassError> {
        Ok(())
    }

    /// Inserts a freshly issued token.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The token was stored
    /// * `Err(PassError::DuplicateToken)` - The token string (or id) already exists
    /// * `Err(PassError)` - Storage could not be accessed
    async fn insert_token(&self, record: &TokenRecord) -> Result<(), PassError>;

    /// Looks a token up by its string.
    ///
    /// Returns expired and used tokens too; interpreting them is the
    /// validator's job.
    async fn get_token(&self, token: &str) -> Result<Option<TokenRecord>, PassError>;

    /// Atomically marks a token as used if, and only if, it is currently unused.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - This call performed the `used: false -> true` transition
    /// * `Ok(false)` - The token was already used or does not exist
    /// * `Err(PassError)` - Storage could not be accessed
    async fn mark_used(&self, token: &str, used_at: i64) -> Result<bool, PassError>;

    /// Removes every token whose expiry instant is at or before `now`.
    ///
    /// Removing nothing is not an error.
    ///
    /// # Returns
    ///
    /// * `Ok(count)` - Number of tokens removed
    async fn cleanup_expired(&self, now: i64) -> Result<usize, PassError>;

    /// Returns statistics about the token store.
    async fn get_stats(&self) -> Result<StorageStats, PassError>;
}

/// Append-only record of validation attempts.
#[async_trait]
pub trait ValidationLog: Send + Sync {
    /// Appends one entry. Entries are never updated or deleted.
    async fn append(&self, entry: &ValidationLogEntry) -> Result<(), PassError>;

    /// Lists up to `limit` entries, newest first.
    async fn list(&self, limit: usize) -> Result<Vec<ValidationLogEntry>, PassError>;

    /// Counts entries with `outcome` recorded at or after `since`.
    async fn count_since(&self, outcome: LogOutcome, since: i64) -> Result<usize, PassError>;
}

/// Lookup of employee records by identity id.
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    /// Finds an identity by id.
    async fn find_identity(&self, identity_id: &str) -> Result<Option<Identity>, PassError>;

    /// Inserts or replaces an identity.
    async fn upsert_identity(&self, identity: &Identity) -> Result<(), PassError>;

    /// Counts identities per status.
    async fn status_counts(&self) -> Result<StatusCounts, PassError>;
}

/// A complete backend: token store, validation log and identity directory.
pub trait PassStorage: TokenStore + ValidationLog + IdentityDirectory {}

impl<T: TokenStore + ValidationLog + IdentityDirectory> PassStorage for T {}
