//! In-memory storage backend implementation.
//!
//! This module provides a simple in-memory backend that keeps tokens,
//! identities and the validation log in process memory. It's ideal for
//! testing, development, and single-instance deployments where persistence
//! across restarts is not required.

use super::{IdentityDirectory, StatusCounts, StorageStats, TokenStore, ValidationLog};
use crate::PassError;
use crate::pass::record::{Identity, IdentityStatus, LogOutcome, TokenRecord, ValidationLogEntry};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

/// A simple in-memory storage implementation.
///
/// Each collection sits behind its own `Arc<RwLock<>>` for thread-safe
/// access. Token strings and record ids share one lock so both stay unique.
/// Expired tokens stay in the map until [`TokenStore::cleanup_expired`] runs.
///
/// # Example
///
/// ```rust
/// use qr_pass::storage::{MemoryStorage, TokenStore};
/// use qr_pass::TokenRecord;
///
/// # async fn example() -> Result<(), qr_pass::PassError> {
/// let storage = MemoryStorage::new();
/// let record = TokenRecord {
///     id: "t-1".to_string(),
///     identity_id: "1".to_string(),
///     token: "ABC123".to_string(),
///     created_at: 1_700_000_000,
///     expires_at: 1_700_000_120,
///     used: false,
///     used_at: None,
/// };
/// storage.insert_token(&record).await?;
///
/// assert!(storage.mark_used("ABC123", 1_700_000_010).await?);
/// assert!(!storage.mark_used("ABC123", 1_700_000_015).await?);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    tokens: Arc<RwLock<TokenTable>>,
    log: Arc<RwLock<Vec<ValidationLogEntry>>>,
    identities: Arc<RwLock<HashMap<String, Identity>>>,
}

/// Tokens keyed by token string, plus the set of record ids in use.
#[derive(Debug, Default)]
struct TokenTable {
    by_token: HashMap<String, TokenRecord>,
    ids: HashSet<String>,
}

impl MemoryStorage {
    /// Creates a new, empty in-memory storage instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a storage instance pre-populated with identities.
    pub fn with_identities(identities: impl IntoIterator<Item = Identity>) -> Self {
        let map = identities
            .into_iter()
            .map(|identity| (identity.id.clone(), identity))
            .collect();
        Self {
            identities: Arc::new(RwLock::new(map)),
            ..Self::default()
        }
    }
}

#[async_trait]
impl TokenStore for MemoryStorage {
    async fn insert_token(&self, record: &TokenRecord) -> Result<(), PassError> {
        let mut tokens = self.tokens.write().await;
        if tokens.by_token.contains_key(&record.token) || tokens.ids.contains(&record.id) {
            return Err(PassError::DuplicateToken);
        }
        tokens.ids.insert(record.id.clone());
        tokens.by_token.insert(record.token.clone(), record.clone());
        Ok(())
    }

    async fn get_token(&self, token: &str) -> Result<Option<TokenRecord>, PassError> {
        let tokens = self.tokens.read().await;
        Ok(tokens.by_token.get(token).cloned())
    }

    async fn mark_used(&self, token: &str, used_at: i64) -> Result<bool, PassError> {
        let mut tokens = self.tokens.write().await;
        match tokens.by_token.get_mut(token) {
            Some(record) if !record.used => {
                record.used = true;
                record.used_at = Some(used_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn cleanup_expired(&self, now: i64) -> Result<usize, PassError> {
        let mut guard = self.tokens.write().await;
        let TokenTable { by_token, ids } = &mut *guard;
        let initial_count = by_token.len();
        by_token.retain(|_, record| {
            let keep = !record.is_expired_at(now);
            if !keep {
                ids.remove(&record.id);
            }
            keep
        });
        Ok(initial_count - by_token.len())
    }

    async fn get_stats(&self) -> Result<StorageStats, PassError> {
        let tokens = self.tokens.read().await;
        let memory_usage = tokens.by_token.len() * std::mem::size_of::<TokenRecord>();
        Ok(StorageStats {
            total_records: tokens.by_token.len(),
            unused_records: tokens.by_token.values().filter(|t| !t.used).count(),
            backend_info: format!("In-memory HashMap storage (~{} bytes)", memory_usage),
        })
    }
}

#[async_trait]
impl ValidationLog for MemoryStorage {
    async fn append(&self, entry: &ValidationLogEntry) -> Result<(), PassError> {
        self.log.write().await.push(entry.clone());
        Ok(())
    }

    async fn list(&self, limit: usize) -> Result<Vec<ValidationLogEntry>, PassError> {
        let log = self.log.read().await;
        let mut entries: Vec<_> = log.iter().cloned().collect();
        // Stable sort keeps later appends first among equal timestamps.
        entries.reverse();
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        entries.truncate(limit);
        Ok(entries)
    }

    async fn count_since(&self, outcome: LogOutcome, since: i64) -> Result<usize, PassError> {
        let log = self.log.read().await;
        Ok(log
            .iter()
            .filter(|e| e.outcome == outcome && e.timestamp >= since)
            .count())
    }
}

#[async_trait]
impl IdentityDirectory for MemoryStorage {
    async fn find_identity(&self, identity_id: &str) -> Result<Option<Identity>, PassError> {
        Ok(self.identities.read().await.get(identity_id).cloned())
    }

    async fn upsert_identity(&self, identity: &Identity) -> Result<(), PassError> {
        self.identities
            .write()
            .await
            .insert(identity.id.clone(), identity.clone());
        Ok(())
    }

    async fn status_counts(&self) -> Result<StatusCounts, PassError> {
        let identities = self.identities.read().await;
        let mut counts = StatusCounts::default();
        for identity in identities.values() {
            match identity.status {
                IdentityStatus::Active => counts.active += 1,
                IdentityStatus::Inactive => counts.inactive += 1,
                IdentityStatus::Blocked => counts.blocked += 1,
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: i64 = 1_700_000_000;

    fn token(id: &str, token: &str, created_at: i64) -> TokenRecord {
        TokenRecord {
            id: id.to_string(),
            identity_id: "E1".to_string(),
            token: token.to_string(),
            created_at,
            expires_at: created_at + 120,
            used: false,
            used_at: None,
        }
    }

    fn log_entry(outcome: LogOutcome, timestamp: i64) -> ValidationLogEntry {
        ValidationLogEntry {
            identity_id: "E1".to_string(),
            token_id: Some("t-1".to_string()),
            outcome,
            timestamp,
            client: None,
        }
    }

    #[tokio::test]
    async fn test_memory_storage_basic_operations() -> Result<(), PassError> {
        let storage = MemoryStorage::new();
        storage.insert_token(&token("t-1", "ABC123", T0)).await?;

        let entry = storage.get_token("ABC123").await?.unwrap();
        assert_eq!(entry.identity_id, "E1");
        assert_eq!(entry.expires_at, T0 + 120);
        assert!(!entry.used);

        assert!(storage.get_token("NOPE").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_memory_storage_duplicate_token() -> Result<(), PassError> {
        let storage = MemoryStorage::new();
        storage.insert_token(&token("t-1", "ABC123", T0)).await?;

        let result = storage.insert_token(&token("t-2", "ABC123", T0)).await;
        assert!(matches!(result, Err(PassError::DuplicateToken)));

        let result = storage.insert_token(&token("t-1", "DEF456", T0)).await;
        assert!(matches!(result, Err(PassError::DuplicateToken)));
        Ok(())
    }

    #[tokio::test]
    async fn test_mark_used_is_one_way() -> Result<(), PassError> {
        let storage = MemoryStorage::new();
        storage.insert_token(&token("t-1", "ABC123", T0)).await?;

        assert!(storage.mark_used("ABC123", T0 + 10).await?);
        assert!(!storage.mark_used("ABC123", T0 + 15).await?);
        assert!(!storage.mark_used("MISSING", T0 + 15).await?);

        let entry = storage.get_token("ABC123").await?.unwrap();
        assert!(entry.used);
        assert_eq!(entry.used_at, Some(T0 + 10));
        Ok(())
    }

    #[tokio::test]
    async fn test_memory_storage_cleanup() -> Result<(), PassError> {
        let storage = MemoryStorage::new();
        storage.insert_token(&token("t-1", "OLD", T0)).await?;
        storage.insert_token(&token("t-2", "NEW", T0 + 100)).await?;

        assert_eq!(storage.cleanup_expired(T0 + 120).await?, 1);
        assert!(storage.get_token("OLD").await?.is_none());
        assert!(storage.get_token("NEW").await?.is_some());

        // Idempotent
        assert_eq!(storage.cleanup_expired(T0 + 120).await?, 0);

        // Swept ids are released
        storage.insert_token(&token("t-1", "LATER", T0 + 200)).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_memory_storage_stats() -> Result<(), PassError> {
        let storage = MemoryStorage::new();
        let stats = storage.get_stats().await?;
        assert_eq!(stats.total_records, 0);
        assert!(stats.backend_info.contains("In-memory"));

        storage.insert_token(&token("t-1", "A", T0)).await?;
        storage.insert_token(&token("t-2", "B", T0)).await?;
        storage.mark_used("A", T0 + 1).await?;

        let stats = storage.get_stats().await?;
        assert_eq!(stats.total_records, 2);
        assert_eq!(stats.unused_records, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_log_lists_newest_first() -> Result<(), PassError> {
        let storage = MemoryStorage::new();
        storage.append(&log_entry(LogOutcome::Valid, T0)).await?;
        storage.append(&log_entry(LogOutcome::Invalid, T0 + 5)).await?;
        storage.append(&log_entry(LogOutcome::Expired, T0 + 9)).await?;

        let entries = storage.list(2).await?;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].outcome, LogOutcome::Expired);
        assert_eq!(entries[1].outcome, LogOutcome::Invalid);

        assert_eq!(storage.count_since(LogOutcome::Valid, T0).await?, 1);
        assert_eq!(storage.count_since(LogOutcome::Valid, T0 + 1).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_identity_directory() -> Result<(), PassError> {
        let storage = MemoryStorage::new();
        let mut identity = Identity {
            id: "1".to_string(),
            document_number: "123.456.789-00".to_string(),
            name: "João da Silva Santos".to_string(),
            registration: "2021001".to_string(),
            department: "Secretaria de Educação".to_string(),
            role: "Professor".to_string(),
            photo_url: None,
            status: IdentityStatus::Active,
        };
        storage.upsert_identity(&identity).await?;

        identity.status = IdentityStatus::Blocked;
        storage.upsert_identity(&identity).await?;

        let found = storage.find_identity("1").await?.unwrap();
        assert_eq!(found.status, IdentityStatus::Blocked);

        let counts = storage.status_counts().await?;
        assert_eq!(counts.blocked, 1);
        assert_eq!(counts.total(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_memory_storage_concurrent_mark_used() -> Result<(), PassError> {
        let storage = Arc::new(MemoryStorage::new());
        storage.insert_token(&token("t-1", "RACE", T0)).await?;

        let mut handles = vec![];
        for i in 0..16 {
            let storage = Arc::clone(&storage);
            handles.push(tokio::spawn(async move {
                storage.mark_used("RACE", T0 + i).await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap()? {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        Ok(())
    }
}
