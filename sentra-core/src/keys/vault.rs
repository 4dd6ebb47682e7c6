//! Per-user portable vault key.
//!
//! The key is cached in the credential store under `vault-key:<user_id>`. On a
//! cache miss it is recovered from the passphrase envelope held by the
//! coordinator, or created and uploaded when this is the user's first device.

use crate::crypto::{b64_decode, b64_encode, BlobKey, KdfParams, VaultKeyEnvelope};
use crate::keys::SecretStore;
use crate::{Result, SentraError};
use async_trait::async_trait;
use tracing::{debug, info, warn};

pub const VAULT_KEY_ACCOUNT_PREFIX: &str = "vault-key:";

/// Where the passphrase envelope lives (the coordinator's `/vault/key`).
#[async_trait]
pub trait EnvelopeRemote: Send + Sync {
    /// `Ok(None)` when the user has no envelope yet.
    async fn fetch_envelope(&self) -> Result<Option<VaultKeyEnvelope>>;
    async fn put_envelope(&self, envelope: &VaultKeyEnvelope) -> Result<()>;
}

/// Supplies the vault passphrase. `confirm` is set when creating a new vault.
pub trait PassphraseSource {
    fn passphrase(&self, confirm: bool) -> Result<String>;
}

pub fn vault_account(user_id: &str) -> String {
    format!("{}{}", VAULT_KEY_ACCOUNT_PREFIX, user_id.trim())
}

pub struct VaultKeyManager<'a> {
    store: &'a dyn SecretStore,
    kdf: KdfParams,
}

impl<'a> VaultKeyManager<'a> {
    pub fn new(store: &'a dyn SecretStore) -> Self {
        Self {
            store,
            kdf: KdfParams::default(),
        }
    }

    /// Override the Argon2 cost used when sealing a new envelope.
    pub fn with_kdf_params(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    /// The cached key, if present and well formed.
    pub fn cached(&self, user_id: &str) -> Option<BlobKey> {
        let value = match self.store.get(&vault_account(user_id)) {
            Ok(Some(v)) => v,
            Ok(None) => return None,
            Err(e) => {
                debug!("vault key cache unavailable: {}", e);
                return None;
            }
        };
        let raw = zeroize::Zeroizing::new(b64_decode(&value).ok()?);
        BlobKey::from_slice(&raw).ok()
    }

    /// Cache writes are best effort; a failure only costs a passphrase prompt later.
    pub fn cache(&self, user_id: &str, key: &BlobKey) {
        let encoded = zeroize::Zeroizing::new(b64_encode(key.as_bytes()));
        if let Err(e) = self.store.set(&vault_account(user_id), &encoded) {
            warn!("could not cache vault key: {}", e);
        }
    }

    pub fn forget(&self, user_id: &str) -> Result<()> {
        self.store.delete(&vault_account(user_id))
    }

    /// Return the user's vault key, creating or recovering it as needed.
    pub async fn ensure(
        &self,
        user_id: &str,
        remote: &dyn EnvelopeRemote,
        passphrase: &dyn PassphraseSource,
    ) -> Result<BlobKey> {
        if let Some(key) = self.cached(user_id) {
            return Ok(key);
        }

        match remote.fetch_envelope().await? {
            None => {
                info!("no vault key envelope on server; creating one");
                let pass = passphrase.passphrase(true)?;
                let key = BlobKey::generate();
                let envelope = VaultKeyEnvelope::seal_with_params(&pass, &key, self.kdf)?;
                remote.put_envelope(&envelope).await?;
                self.cache(user_id, &key);
                Ok(key)
            }
            Some(envelope) => {
                let pass = passphrase.passphrase(false)?;
                let key = self.unlock(&envelope, &pass)?;
                self.cache(user_id, &key);
                Ok(key)
            }
        }
    }

    /// Unwrap an envelope, collapsing every failure into [`SentraError::VaultUnlockFailed`].
    pub fn unlock(&self, envelope: &VaultKeyEnvelope, passphrase: &str) -> Result<BlobKey> {
        envelope.unwrap(passphrase).map_err(|e| {
            debug!("vault key unwrap failed: {}", e);
            SentraError::VaultUnlockFailed
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{decrypt_blob, encrypt_blob};
    use crate::keys::MemorySecretStore;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeRemote {
        envelope: Mutex<Option<VaultKeyEnvelope>>,
    }

    #[async_trait]
    impl EnvelopeRemote for FakeRemote {
        async fn fetch_envelope(&self) -> Result<Option<VaultKeyEnvelope>> {
            Ok(self.envelope.lock().unwrap().clone())
        }

        async fn put_envelope(&self, envelope: &VaultKeyEnvelope) -> Result<()> {
            *self.envelope.lock().unwrap() = Some(envelope.clone());
            Ok(())
        }
    }

    struct Fixed(&'static str);

    impl PassphraseSource for Fixed {
        fn passphrase(&self, _confirm: bool) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    fn manager(store: &MemorySecretStore) -> VaultKeyManager<'_> {
        VaultKeyManager::new(store).with_kdf_params(KdfParams::insecure_for_tests())
    }

    #[tokio::test]
    async fn test_first_device_creates_and_second_recovers() {
        let remote = FakeRemote::default();

        let laptop = MemorySecretStore::new();
        let key = manager(&laptop)
            .ensure("user-1", &remote, &Fixed("correct horse battery"))
            .await
            .unwrap();
        assert!(remote.envelope.lock().unwrap().is_some());
        let blob = encrypt_blob(&key, b"A=1\n").unwrap();

        let desktop = MemorySecretStore::new();
        let recovered = manager(&desktop)
            .ensure("user-1", &remote, &Fixed("correct horse battery"))
            .await
            .unwrap();
        assert_eq!(decrypt_blob(&recovered, &blob).unwrap(), b"A=1\n");
        assert!(manager(&desktop).cached("user-1").is_some());
    }

    #[tokio::test]
    async fn test_wrong_passphrase_is_generic() {
        let remote = FakeRemote::default();
        let laptop = MemorySecretStore::new();
        manager(&laptop)
            .ensure("user-1", &remote, &Fixed("correct horse battery"))
            .await
            .unwrap();

        let desktop = MemorySecretStore::new();
        let err = manager(&desktop)
            .ensure("user-1", &remote, &Fixed("wrong passphrase"))
            .await
            .unwrap_err();
        assert!(matches!(err, SentraError::VaultUnlockFailed));
        assert_eq!(err.to_string(), "failed to unlock vault key (wrong passphrase?)");
        assert!(manager(&desktop).cached("user-1").is_none());
    }

    #[tokio::test]
    async fn test_cached_key_skips_remote() {
        let store = MemorySecretStore::new();
        let key = BlobKey::generate();
        manager(&store).cache("user-1", &key);

        let remote = FakeRemote::default();
        let got = manager(&store)
            .ensure("user-1", &remote, &Fixed("unused-passphrase"))
            .await
            .unwrap();
        assert_eq!(got.as_bytes(), key.as_bytes());
        assert!(remote.envelope.lock().unwrap().is_none());

        manager(&store).forget("user-1").unwrap();
        assert!(manager(&store).cached("user-1").is_none());
    }
}
