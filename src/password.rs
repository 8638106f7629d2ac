//! bcrypt password hashes for the login flow.
//!
//! Stored hashes use the modular crypt format (`$2b$<cost>$<salt+digest>`),
//! so rows written by other bcrypt implementations (`$2a$`, `$2y$`) verify
//! unchanged.

use thiserror::Error;

/// Work factor for newly hashed passwords.
pub const DEFAULT_COST: u32 = bcrypt::DEFAULT_COST;

/// Lowest work factor bcrypt accepts. Only suitable for tests.
pub const MIN_COST: u32 = 4;

#[derive(Error, Debug)]
#[error("password hashing failed: {0}")]
pub struct PasswordError(#[from] bcrypt::BcryptError);

/// Hash a plaintext password with a fresh salt at `cost`.
///
/// # Errors
///
/// Fails when `cost` is outside bcrypt's supported range.
pub fn hash_password(password: &str, cost: u32) -> Result<String, PasswordError> {
    Ok(bcrypt::hash(password, cost)?)
}

/// Check a plaintext password against a stored hash.
///
/// Malformed stored hashes never verify. CPU-bound; call it off the async
/// executor.
pub fn verify_password(password: &str, stored: &str) -> bool {
    bcrypt::verify(password, stored).unwrap_or(false)
}
