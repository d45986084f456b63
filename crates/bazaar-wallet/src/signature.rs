//! Callback signature primitives.
//!
//! The gateway webhook signs a canonical string derived from the callback
//! fields with HMAC-SHA256. Verification is constant-time; invalid hex
//! signatures are compared against zeros so the failure path costs the same
//! as a mismatch.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Canonical string covered by the callback signature.
///
/// Signing named fields instead of raw body bytes keeps verification
/// independent of JSON key order and whitespace.
pub fn callback_signing_input(authority: &str, status: &str, amount: i64) -> String {
    format!("{authority}|{status}|{amount}")
}

/// Compute HMAC-SHA256 over `message`, hex-encoded.
pub fn compute_signature(secret: &[u8], message: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(message);
    hex_encode(&mac.finalize().into_bytes())
}

/// Verify a hex-encoded HMAC-SHA256 signature. Constant-time.
pub fn verify_signature(secret: &[u8], message: &[u8], signature: &str) -> bool {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(message);

    // Undecodable hex verifies against zeros instead of short-circuiting.
    let presented = hex_decode(signature).unwrap_or_else(|| vec![0u8; 32]);
    mac.verify_slice(&presented).is_ok()
}

/// Constant-time byte comparison that leaks neither content nor length.
/// Both sides are reduced to fixed-width digests before the compare.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let ha = Sha256::digest(a);
    let hb = Sha256::digest(b);
    ha.ct_eq(&hb).into()
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(String::new(), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 || !s.is_ascii() {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}
