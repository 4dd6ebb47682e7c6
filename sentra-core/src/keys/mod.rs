//! Key manager backed by the OS credential store.
//!
//! All secrets live under the `sentra` service:
//! - `session-key`: per-installation AES key (legacy cipher, session file wrapper)
//! - `device-ed25519`: the device signing keypair
//! - `vault-key:<user_id>`: cached per-user vault key
//! - `session`: the login session JSON
//! - `storage:<id>`: BYOS secret access key

pub mod device;
pub mod session_key;
pub mod vault;

pub use device::DeviceIdentity;
pub use session_key::{allow_insecure_session_file, get_or_create_session_key};
pub use vault::{EnvelopeRemote, PassphraseSource, VaultKeyManager};

use crate::{Result, SentraError};
use std::collections::HashMap;
use std::sync::Mutex;

/// Credential-store service name shared by every account.
pub const KEYRING_SERVICE: &str = "sentra";

/// Get/set/delete secrets by account name.
pub trait SecretStore: Send + Sync {
    /// `Ok(None)` when the account has no entry.
    fn get(&self, account: &str) -> Result<Option<String>>;
    fn set(&self, account: &str, value: &str) -> Result<()>;
    /// Deleting a missing entry is not an error.
    fn delete(&self, account: &str) -> Result<()>;
}

/// [`SecretStore`] over the platform keychain via the `keyring` crate.
#[derive(Debug, Clone)]
pub struct KeyringStore {
    service: String,
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new(KEYRING_SERVICE)
    }
}

impl KeyringStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, account: &str) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service, account).map_err(|e| {
            SentraError::CredentialStoreUnavailable(format!(
                "Failed to initialize keyring entry: {}",
                e
            ))
        })
    }
}

impl SecretStore for KeyringStore {
    fn get(&self, account: &str) -> Result<Option<String>> {
        match self.entry(account)?.get_password() {
            Ok(value) if value.trim().is_empty() => Ok(None),
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(SentraError::CredentialStoreUnavailable(e.to_string())),
        }
    }

    fn set(&self, account: &str, value: &str) -> Result<()> {
        self.entry(account)?
            .set_password(value)
            .map_err(|e| SentraError::CredentialStoreUnavailable(e.to_string()))
    }

    fn delete(&self, account: &str) -> Result<()> {
        match self.entry(account)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(SentraError::CredentialStoreUnavailable(e.to_string())),
        }
    }
}

/// In-process [`SecretStore`], used by tests and ephemeral tooling.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| SentraError::CredentialStoreUnavailable("lock poisoned".to_string()))
    }
}

impl SecretStore for MemorySecretStore {
    fn get(&self, account: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get(account).cloned())
    }

    fn set(&self, account: &str, value: &str) -> Result<()> {
        self.lock()?.insert(account.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, account: &str) -> Result<()> {
        self.lock()?.remove(account);
        Ok(())
    }
}
