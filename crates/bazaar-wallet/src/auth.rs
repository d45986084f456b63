//! Bearer-token authentication cross-checked against the session registry.
//!
//! Signature validity alone never admits a request: after the JWT verifies,
//! the presented token must also match an active, unexpired entry in the
//! user's server-side session list. That makes logout, password change, and
//! administrative revocation effective immediately instead of at token
//! expiry.

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::JwtSettings;
use crate::error::{AuthError, StoreError};
use crate::registry::{User, UserStore};

/// Claims embedded in every issued token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    pub phone: String,
    pub is_admin: bool,
    /// Issued-at (Unix seconds).
    pub iat: i64,
    /// Expiry (Unix seconds).
    pub exp: i64,
}

/// Closed role set derived from user state — never a free-form string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    User,
}

impl Role {
    /// Pure derivation from the identity record.
    pub fn of(user: &User) -> Role {
        if user.is_admin {
            Role::Admin
        } else {
            Role::User
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }
}

/// Authenticated caller identity, attached to the request after the ladder
/// passes.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: String,
    pub phone: String,
    pub role: Role,
}

/// Outcome of [`authenticate`] when the request is not admitted: either the
/// caller was denied, or the registry itself failed.
#[derive(Debug, Error)]
pub enum AuthFailure {
    #[error(transparent)]
    Denied(#[from] AuthError),
    #[error(transparent)]
    Registry(#[from] StoreError),
}

/// Sign a token for a user. The caller records the matching [`crate::registry::Session`]
/// in the registry — a token without a registry entry will not authenticate.
pub fn issue_token(user: &User, jwt: &JwtSettings) -> Result<String, AuthError> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: user.id.clone(),
        phone: user.phone.clone(),
        is_admin: user.is_admin,
        iat: now,
        exp: now + jwt.expires_in.as_secs() as i64,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(jwt.secret.as_bytes()),
    )
    .map_err(|_| AuthError::TokenInvalid)
}

/// Decode and verify a token's signature and expiry.
pub fn decode_token(token: &str, jwt: &JwtSettings) -> Result<Claims, AuthError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_required_spec_claims(&["sub", "exp"]);

    decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt.secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
        _ => AuthError::TokenInvalid,
    })
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
fn bearer_token(header: Option<&str>) -> Result<&str, AuthError> {
    header
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::Unauthenticated)
}

/// Full authentication ladder for one request.
///
/// Failure order: missing header → `Unauthenticated`; bad signature or
/// structure → `TokenInvalid`; past embedded expiry → `TokenExpired`;
/// unknown or disabled user → `UserNotFound`; no matching active session →
/// `SessionInvalid`.
pub fn authenticate(
    header: Option<&str>,
    users: &dyn UserStore,
    jwt: &JwtSettings,
) -> Result<AuthContext, AuthFailure> {
    let token = bearer_token(header)?;
    let claims = decode_token(token, jwt)?;

    let user = users
        .find_user(&claims.sub)?
        .filter(|u| u.is_active)
        .ok_or(AuthError::UserNotFound)?;

    // Registry cross-check: the token must still be on the books.
    if user.current_session(token, Utc::now()).is_none() {
        return Err(AuthError::SessionInvalid.into());
    }

    Ok(AuthContext {
        user_id: user.id.clone(),
        phone: user.phone.clone(),
        role: Role::of(&user),
    })
}

/// Role gate. An empty `allowed` slice admits any authenticated identity.
pub fn authorize(ctx: &AuthContext, allowed: &[Role]) -> Result<(), AuthError> {
    if allowed.is_empty() || allowed.contains(&ctx.role) {
        Ok(())
    } else {
        Err(AuthError::Forbidden)
    }
}
