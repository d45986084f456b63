use thiserror::Error;

/// Failures produced while authenticating or authorizing a request.
///
/// Every variant maps to a client-visible outcome: the first five are
/// answered with 401, `Forbidden` with 403. The messages are intentionally
/// generic — which step of the ladder failed is logged server-side only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Authorization header missing or not a Bearer credential.
    #[error("authentication required")]
    Unauthenticated,

    /// Token failed signature or structural verification.
    #[error("token is not valid")]
    TokenInvalid,

    /// Token verified but its embedded expiry is in the past.
    #[error("token has expired")]
    TokenExpired,

    /// Token's user id does not resolve to an active account.
    #[error("user not found or account disabled")]
    UserNotFound,

    /// No active, unexpired session entry matches the presented token.
    /// Revocation wins over signature validity.
    #[error("session has been revoked or is no longer valid")]
    SessionInvalid,

    /// Authenticated, but the derived role is not in the allowed set.
    #[error("insufficient permissions for this operation")]
    Forbidden,
}

/// Faults from the user/session registry backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("registry database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("registry error: {0}")]
    Internal(String),
}

/// Startup configuration failures. The process refuses to start on any of
/// these — a wallet service with a half-validated config is worse than none.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

impl ConfigError {
    pub fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            name,
            reason: reason.into(),
        }
    }
}
