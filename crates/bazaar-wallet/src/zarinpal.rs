//! Zarinpal gateway adapter.
//!
//! Local transaction-id generation, strict validation of callback payloads,
//! audit-safe masking, and the adapter health record. Everything here works
//! on already-received data; the outbound REST calls live in
//! [`crate::zarinpal_client`].

use std::collections::HashSet;
use std::sync::{LazyLock, Mutex};

use chrono::Utc;
use rand::Rng;
use serde::Serialize;

use crate::config::ZarinpalSettings;

/// Prefix on locally generated transaction ids.
pub const TX_PREFIX: &str = "BZW";

/// The gateway's opaque authority identifier is always 36 characters.
pub const AUTHORITY_LEN: usize = 36;

/// Smallest accepted single transaction, in rials.
pub const MIN_AMOUNT: i64 = 1_000;

/// Platform ceiling for a single transaction, in rials.
pub const MAX_AMOUNT: i64 = 50_000_000;

/// The two callback outcomes the gateway reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackStatus {
    Ok,
    Nok,
}

impl CallbackStatus {
    /// Strict parse — anything but the two exact literals is rejected.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "OK" => Some(CallbackStatus::Ok),
            "NOK" => Some(CallbackStatus::Nok),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackStatus::Ok => "OK",
            CallbackStatus::Nok => "NOK",
        }
    }
}

/// Accumulated verdict for one callback payload.
#[derive(Debug, Clone)]
pub struct CallbackReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Adapter health record. Reads cached configuration only — no I/O.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayHealth {
    pub status: &'static str,
    pub service: &'static str,
    pub sandbox: bool,
    pub merchant_id: String,
    pub timestamp: String,
}

/// Mask a sensitive value for logging: everything but the final four
/// characters is replaced, preserving total length so masked values still
/// correlate with gateway-side records.
pub fn mask(value: &str) -> String {
    let len = value.chars().count();
    if len <= 4 {
        return "****".to_string();
    }
    let tail: String = value.chars().skip(len - 4).collect();
    format!("{}{}", "*".repeat(len - 4), tail)
}

// Suffixes already issued in the current millisecond. The id format has no
// coordinating counter, so a same-millisecond redraw is the only guard
// against duplicate ids under burst load.
static ISSUED: LazyLock<Mutex<(i64, HashSet<u16>)>> =
    LazyLock::new(|| Mutex::new((0, HashSet::new())));

/// Generate a transaction id: fixed prefix, current millisecond timestamp,
/// 4-digit random suffix. Unique within this process; the gateway-issued
/// authority remains the true transaction key.
pub fn generate_transaction_id() -> String {
    loop {
        let millis = Utc::now().timestamp_millis();
        let suffix: u16 = rand::rng().random_range(1000..=9999);

        let mut issued = match ISSUED.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if issued.0 != millis {
            issued.0 = millis;
            issued.1.clear();
        }
        if issued.1.insert(suffix) {
            return format!("{TX_PREFIX}{millis}{suffix}");
        }
        // Suffix collision within this millisecond — draw again.
    }
}

/// Callback validator and health reporter over the merchant settings.
#[derive(Debug, Clone)]
pub struct ZarinpalGateway {
    settings: ZarinpalSettings,
}

impl ZarinpalGateway {
    pub fn new(settings: ZarinpalSettings) -> Self {
        ZarinpalGateway { settings }
    }

    pub fn settings(&self) -> &ZarinpalSettings {
        &self.settings
    }

    /// Validate a gateway callback payload.
    ///
    /// All three checks run regardless of earlier failures so the caller can
    /// report every defect at once. Never mutates state and never fails —
    /// problems only accumulate in the report.
    pub fn validate_callback(&self, authority: &str, status: &str, amount: i64) -> CallbackReport {
        let mut errors = Vec::new();

        if authority.is_empty() || authority.chars().count() != AUTHORITY_LEN {
            errors.push(format!(
                "authority must be exactly {AUTHORITY_LEN} characters"
            ));
        }

        if CallbackStatus::parse(status).is_none() {
            errors.push("status must be either OK or NOK".to_string());
        }

        if !(MIN_AMOUNT..=MAX_AMOUNT).contains(&amount) {
            errors.push(format!(
                "amount must be between {MIN_AMOUNT} and {MAX_AMOUNT} rials"
            ));
        }

        let valid = errors.is_empty();
        if valid {
            tracing::info!(
                authority = %mask(authority),
                amount,
                status,
                "callback validated"
            );
        } else {
            tracing::warn!(
                authority = %mask(authority),
                errors = ?errors,
                "callback validation failed"
            );
        }

        CallbackReport { valid, errors }
    }

    /// Health record with the merchant id masked.
    pub fn health(&self) -> GatewayHealth {
        GatewayHealth {
            status: "healthy",
            service: "zarinpal",
            sandbox: self.settings.sandbox,
            merchant_id: mask(&self.settings.merchant_id),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}
