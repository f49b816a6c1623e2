//! Password hashing and one-time setup token generation.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use rand::{RngCore, rngs::OsRng};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const MIN_PASSWORD_LEN: usize = 8;
pub const MAX_PASSWORD_LEN: usize = 128;

const SETUP_TOKEN_BYTES: usize = 32;

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("password must be between {MIN_PASSWORD_LEN} and {MAX_PASSWORD_LEN} characters")]
    InvalidLength,
    #[error("password hashing failed: {0}")]
    Hash(String),
    #[error("stored password hash is malformed: {0}")]
    MalformedHash(String),
}

/// Checks the password policy (length counted in characters).
pub fn validate_password(password: &str) -> Result<(), PasswordError> {
    let len = password.chars().count();
    if !(MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&len) {
        return Err(PasswordError::InvalidLength);
    }
    Ok(())
}

/// Hashes a password into an Argon2 PHC string.
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| PasswordError::Hash(e.to_string()))
}

/// Verifies a password against a stored PHC string.
///
/// A mismatch is `Ok(false)`; only an unparseable hash is an error.
pub fn verify_password(password: &str, stored_hash: &str) -> Result<bool, PasswordError> {
    let parsed =
        PasswordHash::new(stored_hash).map_err(|e| PasswordError::MalformedHash(e.to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// A freshly generated setup token: the raw value handed to the user once and
/// the digest that is persisted.
#[derive(Debug, Clone)]
pub struct SetupToken {
    pub raw: String,
    pub digest: String,
}

/// Generates 32 random bytes encoded as URL-safe base64.
pub fn generate_setup_token() -> SetupToken {
    let mut bytes = [0u8; SETUP_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    let raw = base64_url::encode(&bytes);
    let digest = digest_setup_token(&raw);
    SetupToken { raw, digest }
}

/// SHA-256 hex digest under which a setup token is stored and looked up.
pub fn digest_setup_token(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.trim().as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct horse", &hash).unwrap());
        assert!(!verify_password("wrong horse", &hash).unwrap());
    }

    #[test]
    fn malformed_hash_is_an_error() {
        assert!(matches!(
            verify_password("whatever", "not-a-phc-string"),
            Err(PasswordError::MalformedHash(_))
        ));
    }

    #[test]
    fn password_policy_counts_characters() {
        assert!(validate_password("short").is_err());
        assert!(validate_password("exactly8").is_ok());
        assert!(validate_password(&"é".repeat(128)).is_ok());
        assert!(validate_password(&"a".repeat(129)).is_err());
    }

    #[test]
    fn setup_tokens_are_unique_and_digested() {
        let first = generate_setup_token();
        let second = generate_setup_token();

        assert_ne!(first.raw, second.raw);
        assert_eq!(first.digest, digest_setup_token(&first.raw));
        assert_eq!(first.digest.len(), 64);
        assert!(
            first
                .raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }
}
