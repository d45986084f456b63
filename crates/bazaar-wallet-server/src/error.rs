//! Translation of internal failures into the uniform client-facing shape.
//!
//! Every expected failure short-circuits the pipeline as an [`ApiError`] and
//! leaves the process as `{success: false, message}` with a stable status
//! code. Internal detail is logged server-side; the client body carries it
//! only in debug builds.

use actix_web::http::StatusCode;
use actix_web::{HttpRequest, HttpResponse, ResponseError};
use bazaar_wallet::{AuthError, AuthFailure, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Failed login attempt. Deliberately indistinguishable between unknown
    /// phone and wrong password.
    #[error("invalid phone or password")]
    InvalidCredentials,

    #[error("too many requests, retry in {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64, limit: u32 },

    #[error("request body exceeds the allowed size")]
    PayloadTooLarge,

    #[error("request body must be JSON")]
    UnsupportedMediaType,

    #[error("invalid request payload: {0}")]
    InvalidPayload(String),

    /// Callback validation failed; carries every accumulated field reason.
    #[error("callback rejected: {}", .0.join("; "))]
    CallbackRejected(Vec<String>),

    /// Catch-all for faults outside the expected taxonomy. The detail is
    /// logged, never shown to production clients.
    #[error("internal server error")]
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<AuthFailure> for ApiError {
    fn from(e: AuthFailure) -> Self {
        match e {
            AuthFailure::Denied(e) => ApiError::Auth(e),
            AuthFailure::Registry(e) => e.into(),
        }
    }
}

impl ApiError {
    /// Client-facing message. Matches `Display` except for `Internal`, which
    /// exposes its detail only in debug builds.
    fn client_message(&self) -> String {
        match self {
            ApiError::Internal(detail) => {
                if cfg!(debug_assertions) {
                    format!("internal server error: {detail}")
                } else {
                    "internal server error".to_string()
                }
            }
            other => other.to_string(),
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Auth(AuthError::Forbidden) => StatusCode::FORBIDDEN,
            ApiError::Auth(_) | ApiError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::UnsupportedMediaType
            | ApiError::InvalidPayload(_)
            | ApiError::CallbackRejected(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = serde_json::json!({
            "success": false,
            "message": self.client_message(),
        });

        match self {
            ApiError::RateLimited {
                retry_after_secs,
                limit,
            } => HttpResponse::TooManyRequests()
                .insert_header(("Retry-After", retry_after_secs.to_string()))
                .insert_header(("X-RateLimit-Limit", limit.to_string()))
                .insert_header(("X-RateLimit-Remaining", "0"))
                .json(body),
            ApiError::Internal(detail) => {
                tracing::error!(detail = %detail, "internal error surfaced to client");
                HttpResponse::InternalServerError().json(body)
            }
            other => HttpResponse::build(other.status_code()).json(body),
        }
    }
}

/// Map actix JSON extraction failures into the taxonomy: oversized bodies to
/// 413, wrong content type to 400, everything else to an invalid payload.
pub fn json_error_handler(
    err: actix_web::error::JsonPayloadError,
    _req: &HttpRequest,
) -> actix_web::Error {
    use actix_web::error::JsonPayloadError;

    let api = match &err {
        JsonPayloadError::Overflow { .. } | JsonPayloadError::OverflowKnownLength { .. } => {
            ApiError::PayloadTooLarge
        }
        JsonPayloadError::ContentType => ApiError::UnsupportedMediaType,
        other => ApiError::InvalidPayload(other.to_string()),
    };
    api.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_taxonomy() {
        assert_eq!(
            ApiError::Auth(AuthError::TokenExpired).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::Auth(AuthError::SessionInvalid).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::Auth(AuthError::Forbidden).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::RateLimited {
                retry_after_secs: 60,
                limit: 100
            }
            .status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::PayloadTooLarge.status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            ApiError::UnsupportedMediaType.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::CallbackRejected(vec![]).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Internal("boom".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn callback_rejection_joins_reasons() {
        let err = ApiError::CallbackRejected(vec![
            "authority must be exactly 36 characters".to_string(),
            "status must be either OK or NOK".to_string(),
        ]);
        let message = err.to_string();
        assert!(message.contains("authority"));
        assert!(message.contains("status"));
    }

    #[test]
    fn rate_limited_response_carries_headers() {
        let err = ApiError::RateLimited {
            retry_after_secs: 42,
            limit: 100,
        };
        let resp = err.error_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.headers().get("Retry-After").unwrap(), "42");
        assert_eq!(resp.headers().get("X-RateLimit-Limit").unwrap(), "100");
        assert_eq!(resp.headers().get("X-RateLimit-Remaining").unwrap(), "0");
    }
}
