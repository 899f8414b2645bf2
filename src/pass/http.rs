//! HTTP surface built on axum.
//!
//! | Route | Access | Response |
//! |-------|--------|----------|
//! | `POST /cards/:identity_id/token` | cardholder secret | [`IssuedToken`] or 429 |
//! | `GET /validate/:token` | public | [`ValidationOutcome`] |
//! | `GET /validations?limit=N` | admin secret | validation log, newest first |
//! | `GET /stats` | admin secret | [`PassStats`] |
//! | `GET /health` | public | `{"status": "ok"}` |
//!
//! Secrets are read from the `x-pass-secret` header and checked by a
//! [`CredentialCheck`].

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use super::record::{ClientMetadata, ValidationLogEntry};
use super::server::{IssuedToken, PassServer, PassStats};
use super::storage::PassStorage;
use super::validator::ValidationOutcome;
use super::PassError;

/// Header carrying the caller's secret.
pub const PASS_SECRET_HEADER: &str = "x-pass-secret";

const DEFAULT_LOG_LIMIT: usize = 50;
const MAX_LOG_LIMIT: usize = 500;

/// Decides who may issue tokens and read admin data.
#[async_trait]
pub trait CredentialCheck: Send + Sync {
    /// Whether `secret` entitles the caller to issue tokens for `identity_id`.
    async fn verify(&self, identity_id: &str, secret: &str) -> bool;

    /// Whether `secret` grants access to the admin routes.
    async fn verify_admin(&self, _secret: &str) -> bool {
        false
    }
}

/// Static shared secrets, typically loaded from the environment.
///
/// The issuer secret is the same for every identity, so it suits a trusted
/// front end that authenticates cardholders itself.
#[derive(Debug, Clone)]
pub struct SharedSecretCheck {
    issuer_secret: String,
    admin_secret: Option<String>,
}

impl SharedSecretCheck {
    pub fn new(issuer_secret: impl Into<String>, admin_secret: Option<String>) -> Self {
        Self {
            issuer_secret: issuer_secret.into(),
            admin_secret,
        }
    }
}

/// Constant-time secret comparison.
fn secrets_match(expected: &str, presented: &str) -> bool {
    expected.as_bytes().ct_eq(presented.as_bytes()).into()
}

#[async_trait]
impl CredentialCheck for SharedSecretCheck {
    async fn verify(&self, _identity_id: &str, secret: &str) -> bool {
        !self.issuer_secret.is_empty() && secrets_match(&self.issuer_secret, secret)
    }

    async fn verify_admin(&self, secret: &str) -> bool {
        self.admin_secret
            .as_deref()
            .is_some_and(|expected| !expected.is_empty() && secrets_match(expected, secret))
    }
}

/// Shared state of the HTTP handlers.
pub struct AppState<S: PassStorage> {
    pub server: Arc<PassServer<S>>,
    pub credentials: Arc<dyn CredentialCheck>,
}

impl<S: PassStorage> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            server: Arc::clone(&self.server),
            credentials: Arc::clone(&self.credentials),
        }
    }
}

/// Builds the router for `server`.
pub fn router<S: PassStorage + 'static>(
    server: Arc<PassServer<S>>,
    credentials: Arc<dyn CredentialCheck>,
) -> Router {
    let state = AppState {
        server,
        credentials,
    };
    Router::new()
        .route("/cards/:identity_id/token", post(issue_token_handler::<S>))
        .route("/validate/:token", get(validate_handler::<S>))
        .route("/validations", get(list_validations_handler::<S>))
        .route("/stats", get(stats_handler::<S>))
        .route("/health", get(health_handler))
        .with_state(state)
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Origin IP and user agent of the merchant's request, when present.
fn client_metadata(headers: &HeaderMap) -> Option<ClientMetadata> {
    let ip_origin = header_value(headers, "x-forwarded-for")
        .and_then(|forwarded| forwarded.split(',').next())
        .map(|ip| ip.trim().to_string())
        .or_else(|| header_value(headers, "x-real-ip").map(str::to_string));
    let user_agent = header_value(headers, header::USER_AGENT.as_str()).map(str::to_string);

    if ip_origin.is_none() && user_agent.is_none() {
        return None;
    }
    Some(ClientMetadata {
        ip_origin,
        user_agent,
    })
}

async fn require_admin<S: PassStorage>(
    state: &AppState<S>,
    headers: &HeaderMap,
) -> Result<(), PassError> {
    let secret = header_value(headers, PASS_SECRET_HEADER).ok_or(PassError::Unauthorized)?;
    if state.credentials.verify_admin(secret).await {
        Ok(())
    } else {
        warn!("Rejected admin request with invalid secret");
        Err(PassError::Unauthorized)
    }
}

async fn issue_token_handler<S: PassStorage + 'static>(
    State(state): State<AppState<S>>,
    Path(identity_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<IssuedToken>, PassError> {
    let secret = header_value(&headers, PASS_SECRET_HEADER).ok_or(PassError::Unauthorized)?;
    if !state.credentials.verify(&identity_id, secret).await {
        warn!("Rejected token request for identity {}", identity_id);
        return Err(PassError::Unauthorized);
    }

    let issued = state.server.issue(&identity_id).await?;
    Ok(Json(issued))
}

fn outcome_status(outcome: &ValidationOutcome) -> StatusCode {
    match outcome {
        ValidationOutcome::Valid { .. } => StatusCode::OK,
        ValidationOutcome::Expired { .. } => StatusCode::GONE,
        ValidationOutcome::AlreadyUsed { .. } => StatusCode::CONFLICT,
        ValidationOutcome::NotFound { .. } => StatusCode::NOT_FOUND,
        ValidationOutcome::IdentityBlocked { .. } => StatusCode::FORBIDDEN,
        ValidationOutcome::Malformed { .. } => StatusCode::BAD_REQUEST,
    }
}

async fn validate_handler<S: PassStorage + 'static>(
    State(state): State<AppState<S>>,
    Path(token): Path<String>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<ValidationOutcome>), PassError> {
    let outcome = state
        .server
        .validate(&token, client_metadata(&headers))
        .await?;
    debug!("Validation answered with {}", outcome.as_str());
    Ok((outcome_status(&outcome), Json(outcome)))
}

#[derive(Debug, Deserialize)]
struct LogQuery {
    limit: Option<usize>,
}

async fn list_validations_handler<S: PassStorage + 'static>(
    State(state): State<AppState<S>>,
    Query(query): Query<LogQuery>,
    headers: HeaderMap,
) -> Result<Json<Vec<ValidationLogEntry>>, PassError> {
    require_admin(&state, &headers).await?;
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT).min(MAX_LOG_LIMIT);
    Ok(Json(state.server.recent_validations(limit).await?))
}

async fn stats_handler<S: PassStorage + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
) -> Result<Json<PassStats>, PassError> {
    require_admin(&state, &headers).await?;
    Ok(Json(state.server.stats().await?))
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

impl IntoResponse for PassError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            PassError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, self.to_string()),
            PassError::TokenNotFound => (StatusCode::NOT_FOUND, "Code not found".to_string()),
            PassError::UnknownIdentity(_) => {
                (StatusCode::NOT_FOUND, "Identity not found".to_string())
            }
            PassError::TokenExpired => (StatusCode::GONE, "Code expired".to_string()),
            PassError::TokenAlreadyUsed => {
                (StatusCode::CONFLICT, "Code has already been used".to_string())
            }
            PassError::IdentityBlocked => {
                (StatusCode::FORBIDDEN, "Cardholder is not active".to_string())
            }
            PassError::MalformedToken => (StatusCode::BAD_REQUEST, "Malformed code".to_string()),
            PassError::Unauthorized => {
                (StatusCode::UNAUTHORIZED, "Authentication failed".to_string())
            }
            PassError::StorageUnavailable(_) | PassError::DuplicateToken => {
                tracing::error!("Storage error: {:?}", self);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Service temporarily unavailable, try again".to_string(),
                )
            }
            PassError::Configuration(_) | PassError::Clock(_) => {
                // Internal details stay in the operator log
                tracing::error!("Internal error: {:?}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": error_message,
            "code": status.as_u16()
        }));

        match self {
            PassError::RateLimited { retry_after_secs } => (
                status,
                [(header::RETRY_AFTER, retry_after_secs.to_string())],
                body,
            )
                .into_response(),
            _ => (status, body).into_response(),
        }
    }
}
