//! AES-256-GCM blob encryption for `.env` contents.
//!
//! Every encrypted blob travels as base64url (no padding) of
//! `nonce(12) || ciphertext || tag(16)`. The cipher tag recorded next to the
//! blob names which key sealed it.

use crate::crypto::{b64_decode, b64_encode, CryptoError, Result};
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use zeroize::Zeroize;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// A 256-bit symmetric key used to seal blobs.
///
/// The bytes are wiped on drop.
#[derive(Clone)]
pub struct BlobKey {
    key: [u8; 32],
}

impl BlobKey {
    /// Generate a new random key
    pub fn generate() -> Self {
        let key = Aes256Gcm::generate_key(&mut OsRng);
        Self { key: key.into() }
    }

    pub fn from_bytes(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Build a key from a slice, rejecting anything that is not 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength {
                expected: 32,
                got: bytes.len(),
            })?;
        Ok(Self { key })
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }
}

impl Drop for BlobKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl std::fmt::Debug for BlobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BlobKey(..)")
    }
}

/// Cipher tag carried by every file entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherKind {
    /// Sealed with the per-user vault key. Decryptable on any device of the user.
    SentraV1,
    /// Sealed with the per-installation session key. Only the pushing machine can open it.
    LegacySession,
    /// Accepted on the wire, never produced or opened by this client.
    AgeV1,
}

impl CipherKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SentraV1 => "sentra-v1",
            Self::LegacySession => "ed25519+aes-256-gcm-v1",
            Self::AgeV1 => "age-v1",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "sentra-v1" => Some(Self::SentraV1),
            "ed25519+aes-256-gcm-v1" => Some(Self::LegacySession),
            "age-v1" => Some(Self::AgeV1),
            _ => None,
        }
    }
}

impl std::fmt::Display for CipherKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Seal raw bytes with AES-256-GCM and a fresh random nonce.
///
/// Returns `nonce || ciphertext || tag`.
pub fn seal(key: &BlobKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(nonce.as_slice());
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Open bytes produced by [`seal`].
pub fn open(key: &BlobKey, sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::DecryptionFailed(format!(
            "sealed data too short: {} bytes",
            sealed.len()
        )));
    }

    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(key.as_bytes().into());
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| CryptoError::AuthenticationFailed)
}

/// Encrypt a file body into the wire blob form (base64url-nopad).
pub fn encrypt_blob(key: &BlobKey, plaintext: &[u8]) -> Result<String> {
    Ok(b64_encode(&seal(key, plaintext)?))
}

/// Decrypt a wire blob.
pub fn decrypt_blob(key: &BlobKey, blob_b64: &str) -> Result<Vec<u8>> {
    let sealed = b64_decode(blob_b64)?;
    open(key, &sealed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_blob_roundtrip() {
        let key = BlobKey::generate();
        let plaintext = b"API_KEY=abc123\nDATABASE_URL=postgres://localhost/app\n";

        let blob = encrypt_blob(&key, plaintext).unwrap();
        assert!(!blob.contains('='));
        assert!(!blob.contains('+'));
        assert!(!blob.contains('/'));

        let decrypted = decrypt_blob(&key, &blob).unwrap();
        assert_eq!(decrypted, plaintext.to_vec());
    }

    #[test]
    fn test_one_mebibyte_roundtrip() {
        let key = BlobKey::generate();
        let plaintext: Vec<u8> = (0..1_048_576u32).map(|i| (i % 251) as u8).collect();

        let sealed = seal(&key, &plaintext).unwrap();
        assert_eq!(sealed.len(), NONCE_LEN + plaintext.len() + TAG_LEN);
        assert_eq!(open(&key, &sealed).unwrap(), plaintext);
    }

    #[test]
    fn test_unique_nonces() {
        let key = BlobKey::generate();
        let a = seal(&key, b"same").unwrap();
        let b = seal(&key, b"same").unwrap();
        assert_ne!(a[..NONCE_LEN], b[..NONCE_LEN]);
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = seal(&BlobKey::generate(), b"secret").unwrap();
        let result = open(&BlobKey::generate(), &sealed);
        assert!(matches!(result, Err(CryptoError::AuthenticationFailed)));
    }

    #[test]
    fn test_tampering_detected() {
        let key = BlobKey::generate();
        let mut sealed = seal(&key, b"original").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(open(&key, &sealed).is_err());
    }

    #[test]
    fn test_truncated_rejected() {
        let key = BlobKey::generate();
        assert!(matches!(
            open(&key, &[0u8; 20]),
            Err(CryptoError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_key_from_slice_length() {
        assert!(BlobKey::from_slice(&[7u8; 32]).is_ok());
        assert!(matches!(
            BlobKey::from_slice(&[7u8; 31]),
            Err(CryptoError::InvalidKeyLength { expected: 32, got: 31 })
        ));
    }

    #[test]
    fn test_cipher_kind_tags() {
        for kind in [CipherKind::SentraV1, CipherKind::LegacySession, CipherKind::AgeV1] {
            assert_eq!(CipherKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(CipherKind::parse("rot13"), None);
    }

    proptest! {
        #[test]
        fn prop_roundtrip_random_payloads(data in proptest::collection::vec(any::<u8>(), 0..4096)) {
            let key = BlobKey::generate();
            let blob = encrypt_blob(&key, &data).unwrap();
            prop_assert_eq!(decrypt_blob(&key, &blob).unwrap(), data);
        }
    }
}
