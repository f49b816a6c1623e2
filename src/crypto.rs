//! Secret encryption using AES-256-GCM
//!
//! Tenant client secrets, tenant access tokens and user GitHub tokens are
//! stored encrypted. Each ciphertext is bound to its owning row and column
//! through additional authenticated data (AAD).

#![allow(deprecated)]

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use uuid::Uuid;

const VERSION_ENCRYPTED: u8 = 0x01;
const VERSION_FIELD_LEN: usize = 1;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const MIN_ENCRYPTED_LEN: usize = VERSION_FIELD_LEN + NONCE_LEN + TAG_LEN;

/// Crypto error types
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("invalid ciphertext format")]
    InvalidFormat,
    #[error("empty ciphertext")]
    EmptyCiphertext,
}

/// Secure wrapper for encryption keys with zeroization
#[derive(Debug, Clone, Zeroize, ZeroizeOnDrop)]
pub struct ZeroizingKey(Vec<u8>);

/// Type alias for crypto keys
pub type CryptoKey = ZeroizingKey;

impl CryptoKey {
    /// Create a new crypto key from bytes
    pub fn new(bytes: Vec<u8>) -> Result<Self, CryptoError> {
        if bytes.len() != 32 {
            return Err(CryptoError::EncryptionFailed(
                "Invalid key length: expected 32 bytes".to_string(),
            ));
        }
        Ok(ZeroizingKey(bytes))
    }

    /// Get the key as bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Encrypt bytes using AES-256-GCM
pub fn encrypt_bytes(
    key: &CryptoKey,
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    // Create cipher
    let cipher_key = Key::<Aes256Gcm>::from_slice(key.as_bytes());
    let cipher = Aes256Gcm::new(cipher_key);

    // Generate random nonce
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    // Encrypt with AAD
    let mut ciphertext = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    // Prepend version byte and nonce to ciphertext
    let mut result = Vec::with_capacity(VERSION_FIELD_LEN + NONCE_LEN + ciphertext.len());
    result.push(VERSION_ENCRYPTED); // Version byte for encrypted tokens
    result.extend_from_slice(&nonce);
    result.append(&mut ciphertext);

    Ok(result)
}

/// Decrypt bytes using AES-256-GCM
pub fn decrypt_bytes(
    key: &CryptoKey,
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.is_empty() {
        return Err(CryptoError::EmptyCiphertext);
    }

    // Detect legacy plaintext payloads (no version marker)
    if ciphertext[0] != VERSION_ENCRYPTED {
        return Ok(ciphertext.to_vec());
    }

    // Validate minimum length (version + nonce + tag)
    if ciphertext.len() < MIN_ENCRYPTED_LEN {
        return Err(CryptoError::InvalidFormat);
    }

    // Extract components
    let nonce = Nonce::from_slice(&ciphertext[VERSION_FIELD_LEN..VERSION_FIELD_LEN + NONCE_LEN]);
    let tag_and_ct = &ciphertext[VERSION_FIELD_LEN + NONCE_LEN..];

    debug_assert!(tag_and_ct.len() >= TAG_LEN);

    // Reconstruct ciphertext + tag for decryption
    let mut reconstructed = Vec::with_capacity(tag_and_ct.len());
    reconstructed.extend_from_slice(tag_and_ct);

    // Create cipher
    let cipher_key = Key::<Aes256Gcm>::from_slice(key.as_bytes());
    let cipher = Aes256Gcm::new(cipher_key);

    // Decrypt with AAD
    cipher
        .decrypt(
            nonce,
            Payload {
                msg: &reconstructed,
                aad,
            },
        )
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
}

/// Determine if a payload is using the encrypted format
pub fn is_encrypted_payload(ciphertext: &[u8]) -> bool {
    ciphertext.len() >= MIN_ENCRYPTED_LEN && ciphertext[0] == VERSION_ENCRYPTED
}

/// Kinds of records whose columns hold ciphertext.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretOwner {
    Tenant,
    User,
}

impl SecretOwner {
    fn as_str(self) -> &'static str {
        match self {
            SecretOwner::Tenant => "tenant",
            SecretOwner::User => "user",
        }
    }
}

/// Additional authenticated data binding a ciphertext to its row and column,
/// e.g. `tenant|<id>|client_secret`. A ciphertext copied into another row or
/// column fails to decrypt.
pub fn secret_aad(owner: SecretOwner, id: Uuid, field: &str) -> String {
    format!("{}|{}|{}", owner.as_str(), id, field)
}

/// Encrypt a UTF-8 secret for storage in a binary column.
pub fn encrypt_secret(key: &CryptoKey, aad: &str, secret: &str) -> Result<Vec<u8>, CryptoError> {
    encrypt_bytes(key, aad.as_bytes(), secret.as_bytes())
}

/// Decrypt a stored secret. Legacy plaintext values are returned as-is.
pub fn decrypt_secret(key: &CryptoKey, aad: &str, stored: &[u8]) -> Result<String, CryptoError> {
    let bytes = if is_encrypted_payload(stored) {
        decrypt_bytes(key, aad.as_bytes(), stored)?
    } else {
        stored.to_vec()
    };

    String::from_utf8(bytes)
        .map_err(|e| CryptoError::DecryptionFailed(format!("Invalid UTF-8: {}", e)))
}

/// Decrypt an optional stored secret column.
pub fn decrypt_optional_secret(
    key: &CryptoKey,
    aad: &str,
    stored: Option<&[u8]>,
) -> Result<Option<String>, CryptoError> {
    stored
        .map(|bytes| decrypt_secret(key, aad, bytes))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> CryptoKey {
        CryptoKey::new(vec![0u8; 32]).expect("valid test key")
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = test_key();
        let aad = b"test-aad";
        let plaintext = b"secret message";

        let encrypted = encrypt_bytes(&key, aad, plaintext).expect("encryption succeeds");
        let decrypted = decrypt_bytes(&key, aad, &encrypted).expect("decryption succeeds");

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_different_aad_fails() {
        let key = test_key();
        let aad1 = b"test-aad-1";
        let aad2 = b"test-aad-2";
        let plaintext = b"secret message";

        let encrypted = encrypt_bytes(&key, aad1, plaintext).expect("encryption succeeds");
        let result = decrypt_bytes(&key, aad2, &encrypted);

        assert!(result.is_err());
    }

    #[test]
    fn test_modified_ciphertext_fails() {
        let key = test_key();
        let aad = b"test-aad";
        let plaintext = b"secret message";

        let mut encrypted = encrypt_bytes(&key, aad, plaintext).expect("encryption succeeds");
        // Modify a byte in the ciphertext
        encrypted[13] ^= 0x01;

        let result = decrypt_bytes(&key, aad, &encrypted);
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_plaintext_works() {
        let key = test_key();
        let aad = b"test-aad";
        let plaintext = b"";

        let encrypted = encrypt_bytes(&key, aad, plaintext).expect("encryption succeeds");
        let decrypted = decrypt_bytes(&key, aad, &encrypted).expect("decryption succeeds");

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_nonce_uniqueness() {
        let key = test_key();
        let aad = b"test-aad";
        let plaintext = b"secret message";

        let encrypted1 = encrypt_bytes(&key, aad, plaintext).expect("encryption succeeds");
        let encrypted2 = encrypt_bytes(&key, aad, plaintext).expect("encryption succeeds");

        // Nonces (bytes 1-13) should be different
        assert_ne!(&encrypted1[1..13], &encrypted2[1..13]);
        // But both should decrypt correctly
        let decrypted1 = decrypt_bytes(&key, aad, &encrypted1).expect("decryption succeeds");
        let decrypted2 = decrypt_bytes(&key, aad, &encrypted2).expect("decryption succeeds");
        assert_eq!(decrypted1, plaintext);
        assert_eq!(decrypted2, plaintext);
    }

    #[test]
    fn test_legacy_token_passthrough() {
        let key = test_key();
        let aad = b"test-aad";
        let legacy_ciphertext = b"legacy-token".to_vec(); // No version marker

        let result =
            decrypt_bytes(&key, aad, &legacy_ciphertext).expect("legacy plaintext is returned");
        assert_eq!(result, legacy_ciphertext);
    }

    #[test]
    fn test_is_encrypted_payload_detection() {
        let key = test_key();
        let aad = b"test-aad";
        let encrypted = encrypt_bytes(&key, aad, b"secret").expect("encryption succeeds");

        assert!(is_encrypted_payload(&encrypted));
        assert!(!is_encrypted_payload(b"legacy"));
    }

    #[test]
    fn test_secret_is_bound_to_row_and_column() {
        let key = test_key();
        let tenant_id = Uuid::new_v4();
        let aad = secret_aad(SecretOwner::Tenant, tenant_id, "client_secret");
        assert_eq!(aad, format!("tenant|{tenant_id}|client_secret"));

        let stored = encrypt_secret(&key, &aad, "s3cr3t").expect("encryption succeeds");
        assert!(is_encrypted_payload(&stored));
        assert_eq!(decrypt_secret(&key, &aad, &stored).unwrap(), "s3cr3t");

        let other_column = secret_aad(SecretOwner::Tenant, tenant_id, "token");
        assert!(decrypt_secret(&key, &other_column, &stored).is_err());

        let other_row = secret_aad(SecretOwner::Tenant, Uuid::new_v4(), "client_secret");
        assert!(decrypt_secret(&key, &other_row, &stored).is_err());
    }

    #[test]
    fn test_optional_secret_handles_legacy_plaintext() {
        let key = test_key();
        let aad = secret_aad(SecretOwner::User, Uuid::new_v4(), "github_token");

        assert_eq!(decrypt_optional_secret(&key, &aad, None).unwrap(), None);
        assert_eq!(
            decrypt_optional_secret(&key, &aad, Some(b"ghp_legacy".as_slice())).unwrap(),
            Some("ghp_legacy".to_string())
        );
    }

    #[test]
    fn test_non_versioned_payload_passthrough() {
        let key = test_key();
        let aad = b"test-aad";
        let invalid_ciphertext = vec![0xFF, 0x01, 0x02, 0x03]; // No 0x01 version marker

        let result = decrypt_bytes(&key, aad, &invalid_ciphertext)
            .expect("non-versioned payload returned as plaintext");
        assert_eq!(result, invalid_ciphertext);
    }

    #[test]
    fn test_invalid_key_length_rejected() {
        let result = CryptoKey::new(vec![0u8; 16]); // Too short
        assert!(result.is_err());

        let result = CryptoKey::new(vec![0u8; 64]); // Too long
        assert!(result.is_err());
    }

    #[test]
    fn test_insufficient_ciphertext_length() {
        let key = test_key();
        let aad = b"test-aad";
        let short_ciphertext = vec![VERSION_ENCRYPTED, 0x02]; // Too short for nonce + tag

        let result = decrypt_bytes(&key, aad, &short_ciphertext);
        assert!(matches!(result, Err(CryptoError::InvalidFormat)));
    }
}
