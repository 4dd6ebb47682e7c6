//! Per-device Ed25519 identity used to sign coordinator requests.

use crate::crypto::{b64_decode, b64_encode};
use crate::keys::SecretStore;
use crate::protocol::{self, SignedHeaders};
use crate::{Result, SentraError};
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use zeroize::Zeroizing;

pub const DEVICE_KEY_ACCOUNT: &str = "device-ed25519";

/// Key type string sent at registration.
pub const DEVICE_KEY_TYPE: &str = "ed25519";

/// The device signing keypair.
pub struct DeviceIdentity {
    signing_key: SigningKey,
}

impl DeviceIdentity {
    /// Generate a fresh, unsaved identity.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        Self { signing_key }
    }

    /// Load the identity from the credential store, generating and saving it on first use.
    pub fn load_or_create(store: &dyn SecretStore) -> Result<Self> {
        if let Some(value) = store.get(DEVICE_KEY_ACCOUNT)? {
            let raw = Zeroizing::new(b64_decode(&value)?);
            let bytes: &[u8; 64] = raw.as_slice().try_into().map_err(|_| {
                SentraError::InvalidInput("invalid device private key length".to_string())
            })?;
            let signing_key = SigningKey::from_keypair_bytes(bytes)
                .map_err(|e| SentraError::InvalidInput(format!("invalid device key: {}", e)))?;
            return Ok(Self { signing_key });
        }

        tracing::info!("generating new device identity");
        let identity = Self::generate();
        let encoded = Zeroizing::new(b64_encode(&identity.signing_key.to_keypair_bytes()));
        store.set(DEVICE_KEY_ACCOUNT, &encoded)?;
        Ok(identity)
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Public key as base64url-nopad of the 32 raw bytes.
    pub fn public_key_b64(&self) -> String {
        b64_encode(self.verifying_key().as_bytes())
    }

    /// Sign `message`, returning the base64url-nopad signature.
    pub fn sign(&self, message: &[u8]) -> String {
        b64_encode(&self.signing_key.sign(message).to_bytes())
    }

    /// Produce the four `X-Sentra-*` headers for a request with a fresh nonce.
    pub fn sign_request(
        &self,
        method: &str,
        path: &str,
        machine_id: &str,
        body: &[u8],
    ) -> SignedHeaders {
        let timestamp = chrono::Utc::now().timestamp();
        let nonce = uuid::Uuid::new_v4().to_string();
        let message = protocol::canonical_message(timestamp, method, path, machine_id, body);

        SignedHeaders {
            machine_id: machine_id.to_string(),
            timestamp,
            nonce,
            signature: self.sign(&message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::MemorySecretStore;

    #[test]
    fn test_identity_persisted_once() {
        let store = MemorySecretStore::new();
        let first = DeviceIdentity::load_or_create(&store).unwrap();
        let second = DeviceIdentity::load_or_create(&store).unwrap();
        assert_eq!(first.public_key_b64(), second.public_key_b64());

        let stored = b64_decode(&store.get(DEVICE_KEY_ACCOUNT).unwrap().unwrap()).unwrap();
        assert_eq!(stored.len(), 64);
    }

    #[test]
    fn test_public_key_encoding() {
        let identity = DeviceIdentity::generate();
        let encoded = identity.public_key_b64();
        assert_eq!(encoded.len(), 43);
        assert_eq!(b64_decode(&encoded).unwrap().len(), 32);
    }

    #[test]
    fn test_signed_request_verifies() {
        let identity = DeviceIdentity::generate();
        let headers = identity.sign_request("post", "/push", "machine-1", b"{}");

        assert!(uuid::Uuid::parse_str(&headers.nonce).is_ok());
        protocol::verify_signature(
            &identity.public_key_b64(),
            headers.timestamp,
            "POST",
            "/push",
            "machine-1",
            b"{}",
            &headers.signature,
        )
        .unwrap();
    }

    #[test]
    fn test_corrupt_stored_key_rejected() {
        let store = MemorySecretStore::new();
        store.set(DEVICE_KEY_ACCOUNT, &b64_encode(&[1u8; 10])).unwrap();
        assert!(DeviceIdentity::load_or_create(&store).is_err());
    }
}
