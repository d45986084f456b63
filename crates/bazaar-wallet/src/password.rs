//! Credential hashing for the user registry, Argon2id in PHC string format.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHasher, PasswordVerifier};

use crate::error::StoreError;

/// Hash a plaintext password with a fresh random salt.
pub fn hash_password(password: &str) -> Result<String, StoreError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| StoreError::Internal(format!("password hashing failed: {e}")))
}

/// Verify a plaintext password against a stored PHC-format hash.
///
/// `Ok(false)` is a mismatch; `Err` means the stored hash itself is
/// malformed, which is a registry fault rather than a wrong password.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, StoreError> {
    let parsed = argon2::PasswordHash::new(hash)
        .map_err(|e| StoreError::Internal(format!("invalid stored hash: {e}")))?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(StoreError::Internal(format!("password verify error: {e}"))),
    }
}
