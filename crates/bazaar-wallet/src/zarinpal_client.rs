//! HTTP client for Zarinpal's payment REST endpoints.
//!
//! Two calls: `request_payment` obtains an authority before redirecting the
//! shopper to the gateway, `verify_payment` settles a confirmed callback.
//! The gateway reports failures by swapping the `data` object for an empty
//! array and filling `errors`, so responses are read as raw JSON rather
//! than a fixed wire struct.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::config::ZarinpalSettings;

const PRODUCTION_BASE: &str = "https://payment.zarinpal.com";
const SANDBOX_BASE: &str = "https://sandbox.zarinpal.com";

/// Gateway call success code.
const CODE_OK: i64 = 100;
/// Verification repeated for an already-settled authority.
const CODE_ALREADY_VERIFIED: i64 = 101;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway request failed: {0}")]
    Http(String),

    #[error("gateway rejected the transaction (code {code})")]
    Rejected { code: i64 },

    #[error("unexpected gateway response: {0}")]
    InvalidResponse(String),
}

/// Outcome of a payment request: the authority plus the URL to send the
/// shopper to.
#[derive(Debug, Clone)]
pub struct PaymentIntent {
    pub authority: String,
    pub redirect_url: String,
}

/// Outcome of a successful verification.
#[derive(Debug, Clone)]
pub struct SettledPayment {
    pub ref_id: i64,
    /// The gateway had already settled this authority (code 101). Treated as
    /// success so callback retries stay idempotent.
    pub already_verified: bool,
}

pub struct ZarinpalClient {
    http: reqwest::Client,
    merchant_id: String,
    callback_url: String,
    base: &'static str,
}

impl ZarinpalClient {
    pub fn new(settings: &ZarinpalSettings) -> Self {
        ZarinpalClient {
            http: reqwest::Client::new(),
            merchant_id: settings.merchant_id.clone(),
            callback_url: settings.callback_url.clone(),
            base: if settings.sandbox {
                SANDBOX_BASE
            } else {
                PRODUCTION_BASE
            },
        }
    }

    /// Gateway page the shopper is redirected to for a given authority.
    pub fn start_pay_url(&self, authority: &str) -> String {
        format!("{}/pg/StartPay/{authority}", self.base)
    }

    /// Ask the gateway for an authority covering `amount` rials.
    pub async fn request_payment(
        &self,
        amount: i64,
        description: &str,
    ) -> Result<PaymentIntent, GatewayError> {
        let url = format!("{}/pg/v4/payment/request.json", self.base);
        let body = serde_json::json!({
            "merchant_id": self.merchant_id,
            "amount": amount,
            "callback_url": self.callback_url,
            "description": description,
        });

        let resp = self
            .http
            .post(&url)
            .json(&body)
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| GatewayError::Http(e.to_string()))?;

        let envelope: Value = resp
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        let authority = parse_request_response(&envelope)?;
        let redirect_url = self.start_pay_url(&authority);
        Ok(PaymentIntent {
            authority,
            redirect_url,
        })
    }

    /// Settle a confirmed callback: ask the gateway whether `authority` was
    /// actually paid for `amount` rials.
    pub async fn verify_payment(
        &self,
        authority: &str,
        amount: i64,
    ) -> Result<SettledPayment, GatewayError> {
        let url = format!("{}/pg/v4/payment/verify.json", self.base);
        let body = serde_json::json!({
            "merchant_id": self.merchant_id,
            "amount": amount,
            "authority": authority,
        });

        let resp = self
            .http
            .post(&url)
            .json(&body)
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| GatewayError::Http(e.to_string()))?;

        let envelope: Value = resp
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        parse_verify_response(&envelope)
    }
}

fn gateway_code(envelope: &Value) -> Option<i64> {
    envelope
        .get("data")
        .and_then(|d| d.get("code"))
        .and_then(Value::as_i64)
}

fn error_code(envelope: &Value) -> Option<i64> {
    envelope
        .get("errors")
        .and_then(|e| e.get("code"))
        .and_then(Value::as_i64)
}

fn parse_request_response(envelope: &Value) -> Result<String, GatewayError> {
    match gateway_code(envelope) {
        Some(CODE_OK) => envelope["data"]["authority"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                GatewayError::InvalidResponse("missing authority in success response".to_string())
            }),
        Some(code) => Err(GatewayError::Rejected { code }),
        None => match error_code(envelope) {
            Some(code) => Err(GatewayError::Rejected { code }),
            None => Err(GatewayError::InvalidResponse(
                "response carries neither data.code nor errors.code".to_string(),
            )),
        },
    }
}

fn parse_verify_response(envelope: &Value) -> Result<SettledPayment, GatewayError> {
    match gateway_code(envelope) {
        Some(code @ (CODE_OK | CODE_ALREADY_VERIFIED)) => {
            let ref_id = envelope["data"]["ref_id"].as_i64().ok_or_else(|| {
                GatewayError::InvalidResponse("missing ref_id in success response".to_string())
            })?;
            Ok(SettledPayment {
                ref_id,
                already_verified: code == CODE_ALREADY_VERIFIED,
            })
        }
        Some(code) => Err(GatewayError::Rejected { code }),
        None => match error_code(envelope) {
            Some(code) => Err(GatewayError::Rejected { code }),
            None => Err(GatewayError::InvalidResponse(
                "response carries neither data.code nor errors.code".to_string(),
            )),
        },
    }
}
