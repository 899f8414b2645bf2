use thiserror::Error;

/// Error types that can occur while issuing or validating pass tokens.
///
/// Every failure of the generator and the validator is returned as one of
/// these variants; nothing in the token lifecycle panics on bad input.
///
/// # Error Categories
///
/// - **Issuance Errors**: `RateLimited`, `DuplicateToken`, `UnknownIdentity`
/// - **Validation Errors**: `TokenNotFound`, `TokenExpired`, `TokenAlreadyUsed`,
///   `IdentityBlocked`, `MalformedToken`
/// - **Access Errors**: `Unauthorized`
/// - **System Errors**: `StorageUnavailable`, `Configuration`, `Clock`
///
/// # Example
///
/// ```rust
/// use qr_pass::{PassError, PassServer};
///
/// # async fn example() -> Result<(), PassError> {
/// let server = PassServer::builder().build_and_init().await?;
///
/// match server.generate("employee-1").await {
///     Ok(issued) => println!("Show QR for {}", issued.url),
///     Err(PassError::RateLimited { retry_after_secs }) => {
///         println!("Too many codes, retry in {retry_after_secs}s")
///     }
///     Err(e) => println!("Other error: {e}"),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Error, Debug)]
pub enum PassError {
    /// The identity has used up its generations for the current window.
    ///
    /// The window reopens lazily once `retry_after_secs` have elapsed; the
    /// next generation request after that succeeds and resets the counter.
    #[error("Generation limit reached, wait ~{retry_after_secs}s before requesting a new code")]
    RateLimited {
        /// Seconds until the current window elapses
        retry_after_secs: u64,
    },

    /// No token matches the presented string.
    ///
    /// The token may be fabricated, mistyped, or already removed by the
    /// expiry sweep.
    #[error("Token not found")]
    TokenNotFound,

    /// The token exists but its expiry instant has passed.
    #[error("Token expired")]
    TokenExpired,

    /// The token was already consumed by an earlier successful validation.
    #[error("Token already used")]
    TokenAlreadyUsed,

    /// The identity owning the token is blocked or inactive.
    #[error("Identity is blocked or inactive")]
    IdentityBlocked,

    /// The presented token is empty or contains characters that can never
    /// appear in an issued token.
    #[error("Malformed token")]
    MalformedToken,

    /// The identity referenced by a request does not exist in the directory.
    #[error("Unknown identity: {0}")]
    UnknownIdentity(String),

    /// The caller failed the credential check for a protected operation.
    #[error("Unauthorized")]
    Unauthorized,

    /// The storage backend rejected an insert because the token string is
    /// already present.
    ///
    /// The generator retries with a fresh token when it sees this; callers
    /// only observe it if every retry collided.
    #[error("Token already exists")]
    DuplicateToken,

    /// The storage backend could not be reached or failed the operation.
    ///
    /// This error is retryable from the caller's point of view.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The system is misconfigured.
    ///
    /// Only raised while building the server; never per request.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The system clock could not be read.
    #[error("Clock error: {0}")]
    Clock(String),
}

impl PassError {
    /// Wraps a backend error as [`PassError::StorageUnavailable`].
    pub fn from_storage_error<E: std::fmt::Display>(error: E) -> Self {
        PassError::StorageUnavailable(error.to_string())
    }

    /// Builds a [`PassError::StorageUnavailable`] from a plain message.
    pub fn from_storage_message(message: impl Into<String>) -> Self {
        PassError::StorageUnavailable(message.into())
    }

    /// Returns a short machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            PassError::RateLimited { .. } => "rate_limited",
            PassError::TokenNotFound => "token_not_found",
            PassError::TokenExpired => "token_expired",
            PassError::TokenAlreadyUsed => "token_already_used",
            PassError::IdentityBlocked => "identity_blocked",
            PassError::MalformedToken => "malformed_token",
            PassError::UnknownIdentity(_) => "unknown_identity",
            PassError::Unauthorized => "unauthorized",
            PassError::DuplicateToken => "duplicate_token",
            PassError::StorageUnavailable(_) => "storage_unavailable",
            PassError::Configuration(_) => "configuration",
            PassError::Clock(_) => "clock",
        }
    }

    /// Whether retrying the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PassError::RateLimited { .. }
                | PassError::StorageUnavailable(_)
                | PassError::DuplicateToken
        )
    }
}
