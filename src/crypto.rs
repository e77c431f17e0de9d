//! Password hashing and secret generation
//!
//! Passwords are hashed with Argon2id into PHC strings. Tokens and session
//! ids are 32 random bytes, URL-safe base64 without padding.

use anyhow::{anyhow, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use base64::prelude::*;
use once_cell::sync::Lazy;
use rand::RngExt;
use subtle::ConstantTimeEq;

/// Number of random bytes in tokens and session ids
pub const SECRET_BYTES: usize = 32;

/// Hash checked in place of a missing user's, so unknown ids cost one Argon2 run too
static DUMMY_PASSWORD_HASH: Lazy<Option<String>> =
    Lazy::new(|| hash_password("siteping-unknown-user").ok());

pub fn dummy_password_hash() -> Option<&'static str> {
    DUMMY_PASSWORD_HASH.as_deref()
}

/// Hash a password using Argon2id
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);

    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("password hashing failed: {e}"))?
        .to_string();

    Ok(hash)
}

/// Verify a password against a stored PHC hash.
///
/// A mismatch is `Ok(false)`; only an unparseable stored hash is an error.
pub fn verify_password(password: &str, password_hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(password_hash)
        .map_err(|e| anyhow!("stored password hash is malformed: {e}"))?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(anyhow!("password verification failed: {e}")),
    }
}

/// Run a full verification against the dummy hash. Never matches.
pub fn verify_dummy(password: &str) -> Result<bool> {
    if let Some(hash) = dummy_password_hash() {
        verify_password(password, hash)?;
    }
    Ok(false)
}

/// Generate a random opaque secret
pub fn generate_secret() -> String {
    let mut rng = rand::rng();
    let bytes: Vec<u8> = (0..SECRET_BYTES).map(|_| rng.random::<u8>()).collect();
    BASE64_URL_SAFE_NO_PAD.encode(bytes)
}

/// Compare two secrets in time independent of where they differ
pub fn secrets_match(candidate: &str, expected: &str) -> bool {
    candidate.as_bytes().ct_eq(expected.as_bytes()).into()
}
