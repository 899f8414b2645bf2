//! SQLite storage backend implementation.
//!
//! This module provides a persistent SQLite backend for tokens, identities
//! and the validation log. It's suited to single-instance deployments that
//! need data to survive restarts.

use super::{IdentityDirectory, StatusCounts, StorageStats, TokenStore, ValidationLog};
use crate::PassError;
use crate::pass::record::{
    ClientMetadata, Identity, IdentityStatus, LogOutcome, TokenRecord, ValidationLogEntry,
};
use async_trait::async_trait;
use rusqlite::{Connection, Row, params};
use std::sync::{Arc, Mutex, MutexGuard};

/// SQLite-based storage backend.
///
/// # Features
///
/// - **Persistent storage**: Data survives application restarts
/// - **Atomic consumption**: `mark_used` is a guarded `UPDATE ... WHERE used = 0`
/// - **Uniqueness**: The token string carries a `UNIQUE` constraint
/// - **Thread-safe**: Uses `Arc<Mutex<Connection>>` for concurrent access
///
/// # Example
///
/// ```rust
/// use qr_pass::storage::{SqliteStorage, TokenStore};
///
/// # async fn example() -> Result<(), qr_pass::PassError> {
/// // File-based storage
/// let storage = SqliteStorage::new("qr_pass.db")?;
/// storage.init().await?;
///
/// // Or in-memory SQLite (for testing)
/// let memory_storage = SqliteStorage::new(":memory:")?;
/// # Ok(())
/// # }
/// ```
pub struct SqliteStorage {
    connection: Arc<Mutex<Connection>>,
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tokens (
    id TEXT PRIMARY KEY,
    identity_id TEXT NOT NULL,
    token TEXT NOT NULL UNIQUE,
    used INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL,
    used_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_tokens_expires_at ON tokens (expires_at);
CREATE INDEX IF NOT EXISTS idx_tokens_identity ON tokens (identity_id);

CREATE TABLE IF NOT EXISTS validation_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    identity_id TEXT NOT NULL,
    token_id TEXT,
    outcome TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    ip_origin TEXT,
    user_agent TEXT
);
CREATE INDEX IF NOT EXISTS idx_validation_log_timestamp ON validation_log (timestamp);

CREATE TABLE IF NOT EXISTS identities (
    id TEXT PRIMARY KEY,
    document_number TEXT NOT NULL,
    name TEXT NOT NULL,
    registration TEXT NOT NULL,
    department TEXT NOT NULL,
    role TEXT NOT NULL,
    photo_url TEXT,
    status TEXT NOT NULL DEFAULT 'active'
);
"#;

impl SqliteStorage {
    /// Create a new SQLite storage backend.
    ///
    /// # Arguments
    ///
    /// * `db_path` - Path to the SQLite database file, or ":memory:" for an in-memory database
    pub fn new(db_path: &str) -> Result<Self, PassError> {
        let connection = if db_path == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(db_path)
        };

        let connection = connection.map_err(PassError::from_storage_error)?;

        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, PassError> {
        self.connection
            .lock()
            .map_err(|_| PassError::from_storage_message("SQLite connection lock poisoned"))
    }

    /// Create the database schema if it doesn't exist.
    fn init_schema(&self) -> Result<(), PassError> {
        let conn = self.conn()?;
        conn.execute_batch(SCHEMA)
            .map_err(PassError::from_storage_error)
    }

    fn token_from_row(row: &Row<'_>) -> rusqlite::Result<TokenRecord> {
        Ok(TokenRecord {
            id: row.get(0)?,
            identity_id: row.get(1)?,
            token: row.get(2)?,
            used: row.get(3)?,
            created_at: row.get(4)?,
            expires_at: row.get(5)?,
            used_at: row.get(6)?,
        })
    }
}

#[async_trait]
impl TokenStore for SqliteStorage {
    async fn init(&self) -> Result<(), PassError> {
        self.init_schema()
    }

    async fn insert_token(&self, record: &TokenRecord) -> Result<(), PassError> {
        let conn = self.conn()?;

        conn.execute(
            "INSERT INTO tokens (id, identity_id, token, used, created_at, expires_at, used_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.id,
                record.identity_id,
                record.token,
                record.used,
                record.created_at,
                record.expires_at,
                record.used_at
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(sqlite_err, _)
                if sqlite_err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                PassError::DuplicateToken
            }
            _ => PassError::from_storage_error(e),
        })?;

        Ok(())
    }

    async fn get_token(&self, token: &str) -> Result<Option<TokenRecord>, PassError> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare(
                "SELECT id, identity_id, token, used, created_at, expires_at, used_at \
                 FROM tokens WHERE token = ?1",
            )
            .map_err(PassError::from_storage_error)?;

        match stmt.query_row(params![token], Self::token_from_row) {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(PassError::from_storage_error(e)),
        }
    }

    async fn mark_used(&self, token: &str, used_at: i64) -> Result<bool, PassError> {
        let conn = self.conn()?;

        let changes = conn
            .execute(
                "UPDATE tokens SET used = 1, used_at = ?2 WHERE token = ?1 AND used = 0",
                params![token, used_at],
            )
            .map_err(PassError::from_storage_error)?;

        Ok(changes == 1)
    }

    async fn cleanup_expired(&self, now: i64) -> Result<usize, PassError> {
        let conn = self.conn()?;

        conn.execute("DELETE FROM tokens WHERE expires_at <= ?1", params![now])
            .map_err(PassError::from_storage_error)
    }

    async fn get_stats(&self) -> Result<StorageStats, PassError> {
        let conn = self.conn()?;

        let (count, unused): (i64, i64) = conn
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(CASE WHEN used = 0 THEN 1 ELSE 0 END), 0) FROM tokens",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(PassError::from_storage_error)?;

        let page_count: i64 = conn
            .query_row("PRAGMA page_count", [], |row| row.get(0))
            .unwrap_or(0);
        let page_size: i64 = conn
            .query_row("PRAGMA page_size", [], |row| row.get(0))
            .unwrap_or(4096);

        Ok(StorageStats {
            total_records: count as usize,
            unused_records: unused as usize,
            backend_info: format!(
                "SQLite storage ({} bytes, {} pages)",
                page_count * page_size,
                page_count
            ),
        })
    }
}

#[async_trait]
impl ValidationLog for SqliteStorage {
    async fn append(&self, entry: &ValidationLogEntry) -> Result<(), PassError> {
        let conn = self.conn()?;
        let client = entry.client.clone().unwrap_or_default();

        conn.execute(
            "INSERT INTO validation_log (identity_id, token_id, outcome, timestamp, ip_origin, user_agent) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.identity_id,
                entry.token_id,
                entry.outcome.as_str(),
                entry.timestamp,
                client.ip_origin,
                client.user_agent
            ],
        )
        .map_err(PassError::from_storage_error)?;

        Ok(())
    }

    async fn list(&self, limit: usize) -> Result<Vec<ValidationLogEntry>, PassError> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare(
                "SELECT identity_id, token_id, outcome, timestamp, ip_origin, user_agent \
                 FROM validation_log ORDER BY timestamp DESC, id DESC LIMIT ?1",
            )
            .map_err(PassError::from_storage_error)?;

        let rows = stmt
            .query_map(params![limit as i64], |row| {
                let outcome: String = row.get(2)?;
                let ip_origin: Option<String> = row.get(4)?;
                let user_agent: Option<String> = row.get(5)?;
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    outcome,
                    row.get::<_, i64>(3)?,
                    ip_origin,
                    user_agent,
                ))
            })
            .map_err(PassError::from_storage_error)?;

        let mut entries = Vec::new();
        for row in rows {
            let (identity_id, token_id, outcome, timestamp, ip_origin, user_agent) =
                row.map_err(PassError::from_storage_error)?;
            let client = if ip_origin.is_some() || user_agent.is_some() {
                Some(ClientMetadata {
                    ip_origin,
                    user_agent,
                })
            } else {
                None
            };
            entries.push(ValidationLogEntry {
                identity_id,
                token_id,
                outcome: outcome.parse::<LogOutcome>()?,
                timestamp,
                client,
            });
        }
        Ok(entries)
    }

    async fn count_since(&self, outcome: LogOutcome, since: i64) -> Result<usize, PassError> {
        let conn = self.conn()?;

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM validation_log WHERE outcome = ?1 AND timestamp >= ?2",
                params![outcome.as_str(), since],
                |row| row.get(0),
            )
            .map_err(PassError::from_storage_error)?;

        Ok(count as usize)
    }
}

#[async_trait]
impl IdentityDirectory for SqliteStorage {
    async fn find_identity(&self, identity_id: &str) -> Result<Option<Identity>, PassError> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare(
                "SELECT id, document_number, name, registration, department, role, photo_url, status \
                 FROM identities WHERE id = ?1",
            )
            .map_err(PassError::from_storage_error)?;

        let result = stmt.query_row(params![identity_id], |row| {
            Ok((
                Identity {
                    id: row.get(0)?,
                    document_number: row.get(1)?,
                    name: row.get(2)?,
                    registration: row.get(3)?,
                    department: row.get(4)?,
                    role: row.get(5)?,
                    photo_url: row.get(6)?,
                    status: IdentityStatus::Active,
                },
                row.get::<_, String>(7)?,
            ))
        });

        match result {
            Ok((mut identity, status)) => {
                identity.status = status.parse()?;
                Ok(Some(identity))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(PassError::from_storage_error(e)),
        }
    }

    async fn upsert_identity(&self, identity: &Identity) -> Result<(), PassError> {
        let conn = self.conn()?;

        conn.execute(
            "INSERT INTO identities (id, document_number, name, registration, department, role, photo_url, status) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
             ON CONFLICT(id) DO UPDATE SET \
                document_number = excluded.document_number, \
                name = excluded.name, \
                registration = excluded.registration, \
                department = excluded.department, \
                role = excluded.role, \
                photo_url = excluded.photo_url, \
                status = excluded.status",
            params![
                identity.id,
                identity.document_number,
                identity.name,
                identity.registration,
                identity.department,
                identity.role,
                identity.photo_url,
                identity.status.as_str()
            ],
        )
        .map_err(PassError::from_storage_error)?;

        Ok(())
    }

    async fn status_counts(&self) -> Result<StatusCounts, PassError> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare("SELECT status, COUNT(*) FROM identities GROUP BY status")
            .map_err(PassError::from_storage_error)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(PassError::from_storage_error)?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let (status, count) = row.map_err(PassError::from_storage_error)?;
            match status.parse::<IdentityStatus>()? {
                IdentityStatus::Active => counts.active = count as usize,
                IdentityStatus::Inactive => counts.inactive = count as usize,
                IdentityStatus::Blocked => counts.blocked = count as usize,
            }
        }
        Ok(counts)
    }
}
