use actix_web::{get, post, web, HttpRequest, HttpResponse};
use serde::Deserialize;
use serde_json::Value;

use bazaar_wallet::zarinpal::{self, CallbackStatus, MAX_AMOUNT, MIN_AMOUNT};
use bazaar_wallet::{auth, sanitize, signature, GatewayError, Role, Session};

use crate::error::ApiError;
use crate::metrics;
use crate::pipeline;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub phone: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct DepositRequest {
    pub amount: i64,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackRequest {
    pub authority: String,
    pub status: String,
    pub amount: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeRequest {
    pub user_id: String,
}

/// Iranian mobile number: exactly `09` followed by nine digits.
fn is_valid_phone(phone: &str) -> bool {
    phone.len() == 11 && phone.starts_with("09") && phone.bytes().all(|b| b.is_ascii_digit())
}

#[post("/auth/login")]
pub async fn login(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<Value>,
) -> Result<HttpResponse, ApiError> {
    // Login throttling keys on IP + path and counts only failures, so
    // legitimate repeated logins are never penalized.
    let key = format!("{}:{}", pipeline::client_ip(&req), req.path());
    let decision = state.login_limiter.check(&key);
    if !decision.allowed {
        metrics::RATE_LIMITED
            .with_label_values(&[state.login_limiter.policy().name])
            .inc();
        tracing::warn!(key = %key, "login attempts rejected by rate limiter");
        return Err(pipeline::rate_limited(&decision));
    }

    let login: LoginRequest = pipeline::sanitized(body)?;
    if !is_valid_phone(&login.phone) {
        return Err(ApiError::InvalidPayload(
            "phone must be an Iranian mobile number (09xxxxxxxxx)".to_string(),
        ));
    }

    let user = state
        .users
        .find_by_phone(&login.phone)?
        .filter(|u| u.is_active);

    let user = match user {
        Some(user) => user,
        None => {
            state.login_limiter.record_failure(&key);
            metrics::AUTH_FAILURES
                .with_label_values(&["bad_credentials"])
                .inc();
            return Err(ApiError::InvalidCredentials);
        }
    };

    if !state.users.verify_password(&user.id, &login.password)? {
        state.login_limiter.record_failure(&key);
        metrics::AUTH_FAILURES
            .with_label_values(&["bad_credentials"])
            .inc();
        tracing::warn!(user_id = %user.id, "login failed: wrong password");
        return Err(ApiError::InvalidCredentials);
    }

    let token = auth::issue_token(&user, &state.config.jwt)
        .map_err(|e| ApiError::Internal(format!("token issuance failed: {e}")))?;
    state
        .users
        .push_session(&user.id, Session::new(token.clone(), state.config.jwt.expires_in))?;

    tracing::info!(user_id = %user.id, "login succeeded");
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "token": token,
        "expiresInSecs": state.config.jwt.expires_in.as_secs(),
    })))
}

#[post("/auth/logout")]
pub async fn logout(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let ctx = pipeline::authenticate(&req, &state)?;

    // Authentication just matched this exact token against the registry.
    let token = pipeline::bearer_token(&req).ok_or(ApiError::Internal(
        "bearer token vanished after authentication".to_string(),
    ))?;

    state.users.revoke_session(&ctx.user_id, &token)?;
    tracing::info!(user_id = %ctx.user_id, "session revoked on logout");

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": "logged out",
    })))
}

#[get("/auth/me")]
pub async fn me(req: HttpRequest, state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let ctx = pipeline::authenticate(&req, &state)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "user": {
            "id": ctx.user_id,
            "phone": ctx.phone,
            "role": ctx.role.as_str(),
        },
    })))
}

#[post("/wallet/deposit")]
pub async fn deposit(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<Value>,
) -> Result<HttpResponse, ApiError> {
    let ctx = pipeline::authenticate(&req, &state)?;
    let deposit: DepositRequest = pipeline::sanitized(body)?;

    if !(MIN_AMOUNT..=MAX_AMOUNT).contains(&deposit.amount) {
        return Err(ApiError::InvalidPayload(format!(
            "amount must be between {MIN_AMOUNT} and {MAX_AMOUNT} rials"
        )));
    }

    let transaction_id = zarinpal::generate_transaction_id();
    let description = deposit
        .description
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| format!("wallet deposit {transaction_id}"));

    let intent = state
        .payments
        .request_payment(deposit.amount, &description)
        .await
        .map_err(|e| {
            tracing::error!(user_id = %ctx.user_id, error = %e, "payment request failed");
            ApiError::Internal("payment processing failed".to_string())
        })?;

    tracing::info!(
        user_id = %ctx.user_id,
        transaction_id = %transaction_id,
        authority = %zarinpal::mask(&intent.authority),
        amount = deposit.amount,
        "payment requested"
    );

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "transactionId": transaction_id,
        "authority": intent.authority,
        "redirectUrl": intent.redirect_url,
    })))
}

#[post("/wallet/callback")]
pub async fn callback(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<Value>,
) -> Result<HttpResponse, ApiError> {
    let mut value = body.into_inner();
    sanitize::scrub_value(&mut value);
    let cb: CallbackRequest =
        serde_json::from_value(value).map_err(|e| ApiError::InvalidPayload(e.to_string()))?;

    // When the caller presents a signature it must verify; the signing input
    // is the canonical field string, so JSON formatting cannot break it.
    if let Some(sig) = req
        .headers()
        .get("X-Wallet-Signature")
        .and_then(|v| v.to_str().ok())
    {
        let message = signature::callback_signing_input(&cb.authority, &cb.status, cb.amount);
        let secret = state.config.zarinpal.webhook_secret.as_bytes();
        if !signature::verify_signature(secret, message.as_bytes(), sig) {
            metrics::CALLBACKS.with_label_values(&["bad_signature"]).inc();
            tracing::warn!(
                authority = %zarinpal::mask(&cb.authority),
                "callback signature mismatch"
            );
            return Err(ApiError::Auth(bazaar_wallet::AuthError::Unauthenticated));
        }
    }

    let report = state
        .gateway
        .validate_callback(&cb.authority, &cb.status, cb.amount);
    if !report.valid {
        metrics::CALLBACKS.with_label_values(&["invalid"]).inc();
        return Err(ApiError::CallbackRejected(report.errors));
    }

    if CallbackStatus::parse(&cb.status) == Some(CallbackStatus::Nok) {
        metrics::CALLBACKS.with_label_values(&["canceled"]).inc();
        tracing::info!(
            authority = %zarinpal::mask(&cb.authority),
            "payment canceled at the gateway"
        );
        return Ok(HttpResponse::Ok().json(serde_json::json!({
            "success": false,
            "message": "payment was not completed",
        })));
    }

    match state.payments.verify_payment(&cb.authority, cb.amount).await {
        Ok(settled) => {
            metrics::CALLBACKS.with_label_values(&["settled"]).inc();
            tracing::info!(
                authority = %zarinpal::mask(&cb.authority),
                ref_id = settled.ref_id,
                already_verified = settled.already_verified,
                "payment settled"
            );
            Ok(HttpResponse::Ok().json(serde_json::json!({
                "success": true,
                "refId": settled.ref_id,
                "alreadyVerified": settled.already_verified,
            })))
        }
        Err(GatewayError::Rejected { code }) => {
            metrics::CALLBACKS.with_label_values(&["rejected"]).inc();
            tracing::warn!(
                authority = %zarinpal::mask(&cb.authority),
                code,
                "gateway refused verification"
            );
            Err(ApiError::CallbackRejected(vec![format!(
                "gateway verification failed (code {code})"
            )]))
        }
        Err(e) => {
            tracing::error!(
                authority = %zarinpal::mask(&cb.authority),
                error = %e,
                "gateway verification errored"
            );
            Err(ApiError::Internal("payment processing failed".to_string()))
        }
    }
}

#[get("/wallet/health")]
pub async fn wallet_health(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    pipeline::authenticate(&req, &state)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "gateway": state.gateway.health(),
    })))
}

/// Administrative lockout: revoke every active session of a user. The
/// registry keeps the entries with `is_active = false`, so a still-signed
/// token for that user stops authenticating immediately.
#[post("/admin/revoke")]
pub async fn revoke_sessions(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<Value>,
) -> Result<HttpResponse, ApiError> {
    let ctx = pipeline::require_role(&req, &state, &[Role::Admin])?;
    let revoke: RevokeRequest = pipeline::sanitized(body)?;

    let revoked = state.users.revoke_all_sessions(&revoke.user_id)?;
    tracing::info!(
        admin = %ctx.user_id,
        target = %revoke.user_id,
        revoked,
        "sessions revoked by administrator"
    );

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "revoked": revoked,
    })))
}

#[get("/health")]
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "service": "bazaar-wallet",
    }))
}

#[get("/metrics")]
pub async fn metrics_endpoint(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> HttpResponse {
    match &state.config.metrics_token {
        Some(expected) => {
            let authorized = pipeline::bearer_token(&req)
                .map(|t| signature::constant_time_eq(t.as_bytes(), expected.as_bytes()))
                .unwrap_or(false);
            if !authorized {
                return HttpResponse::Unauthorized().json(serde_json::json!({
                    "success": false,
                    "message": "valid bearer token required for /metrics",
                }));
            }
        }
        None => {
            // No token configured — metrics stay closed.
            return HttpResponse::Forbidden().json(serde_json::json!({
                "success": false,
                "message": "set METRICS_TOKEN to enable /metrics",
            }));
        }
    }

    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(metrics::metrics_output())
}
