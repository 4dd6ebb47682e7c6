//! Cryptographic primitives for Sentra.
//!
//! This module provides:
//! - AES-256-GCM blob encryption with the two supported cipher tags
//! - Argon2id key derivation for passphrase wrapping
//! - The portable vault-key envelope stored by the coordinator

pub mod cipher;
pub mod envelope;
pub mod kdf;

pub use cipher::{decrypt_blob, encrypt_blob, BlobKey, CipherKind};
pub use envelope::VaultKeyEnvelope;
pub use kdf::{derive_key, KdfParams};

use thiserror::Error;

/// Errors that can occur in cryptographic operations
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Key derivation failed: {0}")]
    KdfFailed(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("Authentication failed - data may have been tampered with")]
    AuthenticationFailed,

    #[error("unsupported cipher: {0}")]
    UnsupportedCipher(String),

    #[error(
        "file was encrypted on another machine with the legacy cipher; re-push it from the original machine"
    )]
    ForeignDeviceBlob,

    #[error("Invalid encoding: {0}")]
    InvalidEncoding(String),

    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("passphrase must be at least {0} characters")]
    WeakPassphrase(usize),
}

/// Result type for crypto operations
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Encode bytes the way every Sentra wire format does: base64url, no padding.
pub fn b64_encode(bytes: &[u8]) -> String {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decode base64url-nopad, tolerating surrounding whitespace.
pub fn b64_decode(value: &str) -> Result<Vec<u8>> {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    URL_SAFE_NO_PAD
        .decode(value.trim())
        .map_err(|e| CryptoError::InvalidEncoding(e.to_string()))
}

/// Lowercase hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(data))
}
