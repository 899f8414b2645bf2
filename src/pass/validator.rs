use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::config::StatusCheckOrder;
use super::generator::is_well_formed_token;
use super::record::{
    ClientMetadata, Identity, IdentityProjection, LogOutcome, TokenRecord, ValidationLogEntry,
};
use super::storage::PassStorage;
use super::time_utils::TimeProviderFn;
use super::PassError;

const MSG_EXPIRED: &str = "Code expired. Ask the cardholder to generate a new one.";
const MSG_ALREADY_USED: &str = "Code has already been used";
const MSG_NOT_FOUND: &str = "Code not found";
const MSG_IDENTITY_MISSING: &str = "Code does not belong to a known cardholder";
const MSG_BLOCKED: &str = "Cardholder is not active";
const MSG_MALFORMED: &str = "Code not provided or malformed";

/// Result of presenting a token for validation.
///
/// Only [`ValidationOutcome::Valid`] consumes the token. The failure variants
/// carry a human-readable message suitable for the merchant's screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ValidationOutcome {
    /// The token was unexpired and unused, and is now consumed.
    Valid { identity: IdentityProjection },
    /// The token's expiry instant has passed.
    Expired { message: String },
    /// The token was consumed by an earlier validation.
    AlreadyUsed { message: String },
    /// No token matches, or the owning identity no longer exists.
    NotFound { message: String },
    /// The owning identity is blocked or inactive.
    IdentityBlocked { message: String },
    /// The presented string can never be a token.
    Malformed { message: String },
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationOutcome::Valid { .. })
    }

    /// Short machine-readable name of the outcome.
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationOutcome::Valid { .. } => "valid",
            ValidationOutcome::Expired { .. } => "expired",
            ValidationOutcome::AlreadyUsed { .. } => "already_used",
            ValidationOutcome::NotFound { .. } => "not_found",
            ValidationOutcome::IdentityBlocked { .. } => "identity_blocked",
            ValidationOutcome::Malformed { .. } => "malformed",
        }
    }

    /// Converts the outcome into the crate's error taxonomy.
    pub fn into_result(self) -> Result<IdentityProjection, PassError> {
        match self {
            ValidationOutcome::Valid { identity } => Ok(identity),
            ValidationOutcome::Expired { .. } => Err(PassError::TokenExpired),
            ValidationOutcome::AlreadyUsed { .. } => Err(PassError::TokenAlreadyUsed),
            ValidationOutcome::NotFound { .. } => Err(PassError::TokenNotFound),
            ValidationOutcome::IdentityBlocked { .. } => Err(PassError::IdentityBlocked),
            ValidationOutcome::Malformed { .. } => Err(PassError::MalformedToken),
        }
    }

    fn expired() -> Self {
        ValidationOutcome::Expired {
            message: MSG_EXPIRED.to_string(),
        }
    }

    fn already_used() -> Self {
        ValidationOutcome::AlreadyUsed {
            message: MSG_ALREADY_USED.to_string(),
        }
    }

    fn not_found(message: &str) -> Self {
        ValidationOutcome::NotFound {
            message: message.to_string(),
        }
    }

    fn blocked() -> Self {
        ValidationOutcome::IdentityBlocked {
            message: MSG_BLOCKED.to_string(),
        }
    }

    fn malformed() -> Self {
        ValidationOutcome::Malformed {
            message: MSG_MALFORMED.to_string(),
        }
    }
}

/// What the validator decided before touching the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Verdict {
    /// Reject without consuming; log with the given outcome.
    Reject(ValidationOutcome, LogOutcome),
    /// Attempt the atomic consumption.
    Consume,
}

/// Applies the token state machine and the identity-status policy.
///
/// Pure: reads `record`, `identity` and `now`, performs no I/O.
pub(crate) fn evaluate(
    record: &TokenRecord,
    identity: &Identity,
    now: i64,
    order: StatusCheckOrder,
) -> Verdict {
    let token_state = || {
        if record.is_expired_at(now) {
            Some(Verdict::Reject(ValidationOutcome::expired(), LogOutcome::Expired))
        } else if record.used {
            Some(Verdict::Reject(
                ValidationOutcome::already_used(),
                LogOutcome::Invalid,
            ))
        } else {
            None
        }
    };
    let identity_state = || {
        identity
            .status
            .is_blocked()
            .then(|| Verdict::Reject(ValidationOutcome::blocked(), LogOutcome::Blocked))
    };

    let rejection = match order {
        StatusCheckOrder::AfterTokenState => token_state().or_else(identity_state),
        StatusCheckOrder::BeforeTokenState => identity_state().or_else(token_state),
        StatusCheckOrder::Disabled => token_state(),
    };

    rejection.unwrap_or(Verdict::Consume)
}

/// Looks tokens up, applies the lifecycle rules and records every attempt.
pub struct TokenValidator<S: PassStorage> {
    storage: Arc<S>,
    status_check: StatusCheckOrder,
    time_provider: TimeProviderFn,
}

impl<S: PassStorage> TokenValidator<S> {
    pub(crate) fn new(
        storage: Arc<S>,
        status_check: StatusCheckOrder,
        time_provider: TimeProviderFn,
    ) -> Self {
        Self {
            storage,
            status_check,
            time_provider,
        }
    }

    /// Validates `token`, consuming it on success.
    ///
    /// Returns `Err` only when the store cannot be read or updated; every
    /// lifecycle failure is a [`ValidationOutcome`] variant.
    pub async fn validate(
        &self,
        token: &str,
        client: Option<ClientMetadata>,
    ) -> Result<ValidationOutcome, PassError> {
        let token = token.trim();
        if !is_well_formed_token(token) {
            debug!("Rejected malformed token input");
            return Ok(ValidationOutcome::malformed());
        }

        let now = (self.time_provider)()?;

        let Some(record) = self.storage.get_token(token).await? else {
            debug!("Token {} not found", token);
            return Ok(ValidationOutcome::not_found(MSG_NOT_FOUND));
        };

        let Some(identity) = self.storage.find_identity(&record.identity_id).await? else {
            warn!(
                "Token {} references unknown identity {}",
                record.id, record.identity_id
            );
            self.record_attempt(&record, LogOutcome::Invalid, now, client)
                .await;
            return Ok(ValidationOutcome::not_found(MSG_IDENTITY_MISSING));
        };

        let outcome = match evaluate(&record, &identity, now, self.status_check) {
            Verdict::Reject(outcome, log_outcome) => {
                self.record_attempt(&record, log_outcome, now, client).await;
                outcome
            }
            Verdict::Consume => {
                if self.storage.mark_used(token, now).await? {
                    info!(
                        "Token {} consumed for identity {}",
                        record.id, record.identity_id
                    );
                    self.record_attempt(&record, LogOutcome::Valid, now, client)
                        .await;
                    ValidationOutcome::Valid {
                        identity: identity.projection(),
                    }
                } else {
                    // Lost the race against a concurrent validation.
                    self.record_attempt(&record, LogOutcome::Invalid, now, client)
                        .await;
                    ValidationOutcome::already_used()
                }
            }
        };

        Ok(outcome)
    }

    /// Appends a log entry; failures are reported and swallowed.
    async fn record_attempt(
        &self,
        record: &TokenRecord,
        outcome: LogOutcome,
        now: i64,
        client: Option<ClientMetadata>,
    ) {
        let entry = ValidationLogEntry {
            identity_id: record.identity_id.clone(),
            token_id: Some(record.id.clone()),
            outcome,
            timestamp: now,
            client,
        };
        if let Err(e) = self.storage.append(&entry).await {
            warn!(
                "Failed to record {} validation for token {}: {}",
                outcome.as_str(),
                record.id,
                e
            );
        }
    }
}
