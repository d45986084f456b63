//! The ordered request pipeline.
//!
//! Stages run strictly in sequence for each request: rate-limit gate →
//! sanitize → authenticate → authorize → handler, with the request logger
//! wrapped around the whole chain. Each stage takes the request context and
//! either continues or short-circuits with an [`ApiError`] that the
//! translator turns into the terminal response.

use std::time::Instant;

use actix_web::body::{BoxBody, MessageBody};
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::http::header::AUTHORIZATION;
use actix_web::middleware::Next;
use actix_web::{web, Error, HttpRequest, ResponseError};
use serde::de::DeserializeOwned;
use serde_json::Value;

use bazaar_wallet::rate_limit::RateLimitDecision;
use bazaar_wallet::{sanitize, AuthContext, AuthError, AuthFailure, Role};

use crate::error::ApiError;
use crate::metrics;
use crate::state::AppState;

/// Best-effort client address: first X-Forwarded-For element behind a proxy,
/// otherwise the peer address with any port stripped.
pub fn client_ip(req: &HttpRequest) -> String {
    let info = req.connection_info();
    match info.realip_remote_addr() {
        Some(addr) => match addr.parse::<std::net::SocketAddr>() {
            Ok(sock) => sock.ip().to_string(),
            Err(_) => addr.to_string(),
        },
        None => "unknown".to_string(),
    }
}

/// Entry/exit logging around the whole pipeline, plus the per-endpoint
/// request counter. Uses the matched route pattern as the metric label to
/// keep cardinality bounded.
pub async fn request_logger(
    req: ServiceRequest,
    next: Next<impl MessageBody>,
) -> Result<ServiceResponse<impl MessageBody>, Error> {
    let method = req.method().to_string();
    let path = req.path().to_string();
    let ip = client_ip(req.request());
    let started = Instant::now();

    tracing::info!(%method, %path, ip = %ip, "request received");

    let result = next.call(req).await;
    let duration_ms = started.elapsed().as_millis() as u64;

    match &result {
        Ok(resp) => {
            let status = resp.status();
            let endpoint = resp
                .request()
                .match_pattern()
                .unwrap_or_else(|| path.clone());
            metrics::REQUESTS
                .with_label_values(&[endpoint.as_str(), status.as_str()])
                .inc();
            tracing::info!(
                %method,
                %path,
                status = status.as_u16(),
                duration_ms,
                "request completed"
            );
        }
        Err(err) => {
            let status = err.as_response_error().status_code();
            metrics::REQUESTS
                .with_label_values(&[path.as_str(), status.as_str()])
                .inc();
            tracing::warn!(
                %method,
                %path,
                status = status.as_u16(),
                duration_ms,
                error = %err,
                "request failed"
            );
        }
    }

    result
}

/// General API admission gate. Runs before any handler on the /api scope;
/// rejected requests never reach the downstream stages.
pub async fn api_rate_limit(
    req: ServiceRequest,
    next: Next<impl MessageBody + 'static>,
) -> Result<ServiceResponse<BoxBody>, Error> {
    let denied = match req.app_data::<web::Data<AppState>>() {
        Some(state) => {
            let ip = client_ip(req.request());
            let decision = state.api_limiter.check(&ip);
            if decision.allowed {
                None
            } else {
                metrics::RATE_LIMITED
                    .with_label_values(&[state.api_limiter.policy().name])
                    .inc();
                tracing::warn!(ip = %ip, path = %req.path(), "request rejected by rate limiter");
                Some(rate_limited(&decision))
            }
        }
        None => None,
    };

    if let Some(err) = denied {
        let response = err.error_response();
        return Ok(req.into_response(response));
    }
    Ok(next.call(req).await?.map_into_boxed_body())
}

/// Build the 429 error for a denied decision.
pub fn rate_limited(decision: &RateLimitDecision) -> ApiError {
    ApiError::RateLimited {
        retry_after_secs: decision.retry_after.as_secs().max(1),
        limit: decision.limit,
    }
}

/// Sanitize a JSON body and deserialize it into the handler's request type.
pub fn sanitized<T: DeserializeOwned>(body: web::Json<Value>) -> Result<T, ApiError> {
    let mut value = body.into_inner();
    sanitize::scrub_value(&mut value);
    serde_json::from_value(value).map_err(|e| ApiError::InvalidPayload(e.to_string()))
}

fn failure_label(e: &AuthError) -> &'static str {
    match e {
        AuthError::Unauthenticated => "unauthenticated",
        AuthError::TokenInvalid => "token_invalid",
        AuthError::TokenExpired => "token_expired",
        AuthError::UserNotFound => "user_not_found",
        AuthError::SessionInvalid => "session_invalid",
        AuthError::Forbidden => "forbidden",
    }
}

/// Authentication stage: bearer token verified and cross-checked against
/// the session registry.
pub fn authenticate(req: &HttpRequest, state: &AppState) -> Result<AuthContext, ApiError> {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match bazaar_wallet::authenticate(header, state.users.as_ref(), &state.config.jwt) {
        Ok(ctx) => Ok(ctx),
        Err(AuthFailure::Denied(e)) => {
            metrics::AUTH_FAILURES
                .with_label_values(&[failure_label(&e)])
                .inc();
            tracing::warn!(
                path = %req.path(),
                ip = %client_ip(req),
                reason = %e,
                "authentication rejected"
            );
            Err(ApiError::Auth(e))
        }
        Err(AuthFailure::Registry(e)) => Err(e.into()),
    }
}

/// Authenticate, then gate on the derived role. An empty `allowed` slice
/// admits any authenticated identity.
pub fn require_role(
    req: &HttpRequest,
    state: &AppState,
    allowed: &[Role],
) -> Result<AuthContext, ApiError> {
    let ctx = authenticate(req, state)?;
    if let Err(e) = bazaar_wallet::authorize(&ctx, allowed) {
        metrics::AUTH_FAILURES
            .with_label_values(&[failure_label(&e)])
            .inc();
        tracing::warn!(
            path = %req.path(),
            user_id = %ctx.user_id,
            role = ctx.role.as_str(),
            "authorization rejected"
        );
        return Err(ApiError::Auth(e));
    }
    Ok(ctx)
}

/// The presented bearer token, for handlers that act on it (logout).
pub fn bearer_token(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}
