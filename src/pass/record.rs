//! Records shared by the token store, the identity directory and the
//! validation log.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::PassError;

/// A persisted pass token.
///
/// A token is valid iff `now < expires_at && !used`. `used` only ever moves
/// from `false` to `true`, and `expires_at` never changes after insertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Storage identifier, referenced by validation log entries
    pub id: String,
    /// Identity that owns the token
    pub identity_id: String,
    /// The opaque, URL-safe token string
    pub token: String,
    /// Unix timestamp of issuance
    pub created_at: i64,
    /// Unix timestamp from which the token is expired
    pub expires_at: i64,
    /// Whether the token has been consumed
    pub used: bool,
    /// Unix timestamp of consumption
    pub used_at: Option<i64>,
}

impl TokenRecord {
    /// Whether the token is expired at `now`, regardless of `used`.
    pub fn is_expired_at(&self, now: i64) -> bool {
        super::time_utils::is_expired(self.expires_at, now)
    }

    /// Whether the token can still be consumed at `now`.
    pub fn is_valid_at(&self, now: i64) -> bool {
        !self.used && !self.is_expired_at(now)
    }
}

/// Employment status of an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IdentityStatus {
    #[default]
    Active,
    Inactive,
    Blocked,
}

impl IdentityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityStatus::Active => "active",
            IdentityStatus::Inactive => "inactive",
            IdentityStatus::Blocked => "blocked",
        }
    }

    /// Blocked and inactive identities may not redeem benefits.
    pub fn is_blocked(&self) -> bool {
        !matches!(self, IdentityStatus::Active)
    }
}

impl fmt::Display for IdentityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdentityStatus {
    type Err = PassError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(IdentityStatus::Active),
            "inactive" => Ok(IdentityStatus::Inactive),
            "blocked" => Ok(IdentityStatus::Blocked),
            other => Err(PassError::from_storage_message(format!(
                "unknown identity status: {other}"
            ))),
        }
    }
}

/// An employee record as held by the identity directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    /// Full national document number; never leaves the crate unmasked
    pub document_number: String,
    pub name: String,
    /// Employee registration number
    pub registration: String,
    /// Organizational unit
    pub department: String,
    /// Role or job title
    pub role: String,
    #[serde(default)]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub status: IdentityStatus,
}

impl Identity {
    /// Builds the redacted view shown to whoever validates a token.
    pub fn projection(&self) -> IdentityProjection {
        IdentityProjection {
            name: self.name.clone(),
            id_masked: mask_document(&self.document_number),
            department: self.department.clone(),
            role: self.role.clone(),
            status: self.status,
            photo_url: self.photo_url.clone(),
        }
    }
}

/// Redacted identity data returned by a successful validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityProjection {
    pub name: String,
    pub id_masked: String,
    pub department: String,
    pub role: String,
    pub status: IdentityStatus,
    pub photo_url: Option<String>,
}

/// Masks a document number, keeping only the middle digits.
///
/// The first three and last two digits become `*`, separators are kept, and
/// any letters are always masked. Inputs with fewer than six digits are masked
/// entirely.
///
/// ```rust
/// use qr_pass::mask_document;
///
/// assert_eq!(mask_document("123.456.789-00"), "***.456.789-**");
/// assert_eq!(mask_document("12345678900"), "***456789**");
/// ```
pub fn mask_document(raw: &str) -> String {
    let digit_count = raw.chars().filter(char::is_ascii_digit).count();
    let visible = if digit_count >= 6 {
        3..digit_count - 2
    } else {
        0..0
    };

    let mut digit_index = 0;
    raw.chars()
        .map(|c| {
            if c.is_ascii_digit() {
                let shown = visible.contains(&digit_index);
                digit_index += 1;
                if shown { c } else { '*' }
            } else if c.is_alphanumeric() {
                '*'
            } else {
                c
            }
        })
        .collect()
}

/// Result recorded for a validation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutcome {
    Valid,
    Expired,
    Invalid,
    Blocked,
}

impl LogOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogOutcome::Valid => "valid",
            LogOutcome::Expired => "expired",
            LogOutcome::Invalid => "invalid",
            LogOutcome::Blocked => "blocked",
        }
    }
}

impl FromStr for LogOutcome {
    type Err = PassError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "valid" => Ok(LogOutcome::Valid),
            "expired" => Ok(LogOutcome::Expired),
            "invalid" => Ok(LogOutcome::Invalid),
            "blocked" => Ok(LogOutcome::Blocked),
            other => Err(PassError::from_storage_message(format!(
                "unknown validation outcome: {other}"
            ))),
        }
    }
}

/// Origin information about whoever presented a token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMetadata {
    pub ip_origin: Option<String>,
    pub user_agent: Option<String>,
}

/// An append-only audit entry for one validation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationLogEntry {
    pub identity_id: String,
    /// Storage id of the token, when one was resolved
    pub token_id: Option<String>,
    pub outcome: LogOutcome,
    pub timestamp: i64,
    #[serde(default)]
    pub client: Option<ClientMetadata>,
}
