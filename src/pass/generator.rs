//! Token string generation.
//!
//! Issued tokens combine a base-36 timestamp prefix with a random suffix and
//! are upper-cased so they read well when typed from a printed code.

use std::sync::Arc;

use super::PassError;

/// A function that produces a token string for the given issuance instant.
///
/// Implementations must only emit characters accepted by
/// [`is_well_formed_token`]; uniqueness is enforced by the store.
pub type TokenGeneratorFn = Arc<dyn Fn(i64) -> String + Send + Sync>;

/// Longest token string the validator will look up.
pub const MAX_TOKEN_LEN: usize = 128;

/// Encodes a non-negative integer in upper-case base 36.
fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::with_capacity(13);
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Default generator: `<base36 timestamp>-<128 random bits as hex>`.
#[cfg(feature = "default-generators")]
pub fn default_token(issued_at: i64) -> String {
    let prefix = to_base36(issued_at.max(0) as u64);
    let suffix = uuid::Uuid::new_v4().simple().to_string().to_uppercase();
    format!("{prefix}-{suffix}")
}

/// Returns the generator used when none is configured.
pub(crate) fn default_generator() -> Result<TokenGeneratorFn, PassError> {
    #[cfg(feature = "default-generators")]
    {
        Ok(Arc::new(default_token))
    }
    #[cfg(not(feature = "default-generators"))]
    {
        Err(PassError::Configuration(
            "no token generator configured; enable `default-generators` or call `with_token_generator`"
                .to_string(),
        ))
    }
}

/// Whether `token` could have been produced by a generator.
///
/// Accepts 1..=[`MAX_TOKEN_LEN`] URL-safe characters (`A-Z a-z 0-9 - _`).
pub fn is_well_formed_token(token: &str) -> bool {
    !token.is_empty()
        && token.len() <= MAX_TOKEN_LEN
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}
