//! Passphrase-wrapped vault key.
//!
//! The coordinator stores this envelope as an opaque JSON document so that a
//! second machine can recover the same vault key from the user's passphrase.

use crate::crypto::cipher::{open, seal, BlobKey};
use crate::crypto::kdf::{derive_key, KdfParams, SALT_LEN};
use crate::crypto::{b64_decode, b64_encode, CryptoError, Result};
use serde::{Deserialize, Serialize};

pub const ENVELOPE_VERSION: u32 = 1;
pub const KDF_ARGON2ID: &str = "argon2id";
pub const MIN_PASSPHRASE_LEN: usize = 8;

/// Wire form of a wrapped vault key (`v == 1`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultKeyEnvelope {
    pub v: u32,
    pub kdf: String,
    pub salt_b64: String,
    /// Argon2 time cost
    pub t: u32,
    /// Argon2 memory cost in KiB
    pub m: u32,
    /// Argon2 lanes
    pub p: u32,
    pub key_len: u32,
    /// `nonce(12) || AES-256-GCM(vault_key)`
    pub wrapped_key_b64: String,
}

impl VaultKeyEnvelope {
    /// Wrap `vault_key` under `passphrase` with the default vault cost parameters.
    pub fn seal(passphrase: &str, vault_key: &BlobKey) -> Result<Self> {
        Self::seal_with_params(passphrase, vault_key, KdfParams::default())
    }

    pub fn seal_with_params(
        passphrase: &str,
        vault_key: &BlobKey,
        params: KdfParams,
    ) -> Result<Self> {
        let passphrase = passphrase.trim();
        if passphrase.chars().count() < MIN_PASSPHRASE_LEN {
            return Err(CryptoError::WeakPassphrase(MIN_PASSPHRASE_LEN));
        }

        let salt: [u8; SALT_LEN] = rand::random();
        let wrapping = derive_key(passphrase.as_bytes(), &salt, &params)?;
        let wrapped = seal(&BlobKey::from_bytes(*wrapping), vault_key.as_bytes())?;

        Ok(Self {
            v: ENVELOPE_VERSION,
            kdf: KDF_ARGON2ID.to_string(),
            salt_b64: b64_encode(&salt),
            t: params.time_cost,
            m: params.mem_cost,
            p: params.parallelism,
            key_len: params.output_length,
            wrapped_key_b64: b64_encode(&wrapped),
        })
    }

    /// Recover the vault key. Any failure here means "wrong passphrase" to the user.
    pub fn unwrap(&self, passphrase: &str) -> Result<BlobKey> {
        if self.v != ENVELOPE_VERSION {
            return Err(CryptoError::InvalidEnvelope(format!(
                "unsupported envelope version: {}",
                self.v
            )));
        }
        if self.kdf.trim() != KDF_ARGON2ID {
            return Err(CryptoError::InvalidEnvelope(format!(
                "unsupported kdf: {}",
                self.kdf.trim()
            )));
        }
        if self.key_len != 32 {
            return Err(CryptoError::InvalidEnvelope(format!(
                "unsupported key length: {}",
                self.key_len
            )));
        }
        let passphrase = passphrase.trim();
        if passphrase.is_empty() {
            return Err(CryptoError::InvalidEnvelope("missing passphrase".to_string()));
        }

        let params = KdfParams {
            mem_cost: self.m,
            time_cost: self.t,
            parallelism: self.p,
            output_length: self.key_len,
        };
        let salt = b64_decode(&self.salt_b64)?;
        let wrapped = b64_decode(&self.wrapped_key_b64)?;

        let wrapping = derive_key(passphrase.as_bytes(), &salt, &params)?;
        let key = zeroize::Zeroizing::new(open(&BlobKey::from_bytes(*wrapping), &wrapped)?);
        BlobKey::from_slice(&key)
    }
}
