//! State shared by every command: the local store, the credential store and
//! the resolved session.

use anyhow::{bail, Context as _, Result};
use sentra_core::config::{self, ClientConfig, StorageMode};
use sentra_core::crypto::BlobKey;
use sentra_core::keys::{get_or_create_session_key, PassphraseSource, VaultKeyManager};
use sentra_core::session::SessionStore;
use sentra_core::storage::{S3BlobStore, StorageConfig};
use sentra_core::store::LocalStore;
use sentra_core::sync::{Decryptor, SentraClient};
use sentra_core::{DeviceIdentity, KeyringStore, SecretStore, SentraError};
use std::path::PathBuf;
use tracing::{debug, warn};

pub const PASSPHRASE_ENV: &str = "SENTRA_VAULT_PASSPHRASE";

/// Hostname from the environment, or `unknown`.
pub fn machine_name_from(hostname: Option<String>) -> String {
    hostname
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

pub fn machine_name() -> String {
    machine_name_from(
        std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("COMPUTERNAME"))
            .ok(),
    )
}

/// Passphrase from `SENTRA_VAULT_PASSPHRASE`, else an interactive prompt.
pub struct PromptPassphrase;

impl PassphraseSource for PromptPassphrase {
    fn passphrase(&self, confirm: bool) -> sentra_core::Result<String> {
        if let Some(v) = std::env::var(PASSPHRASE_ENV).ok().filter(|v| !v.trim().is_empty()) {
            return Ok(v);
        }
        if confirm {
            eprintln!("Creating your vault key. The passphrase unlocks it on your other machines.");
        }
        let first = rpassword::prompt_password("Vault passphrase: ")?;
        if confirm {
            let second = rpassword::prompt_password("Confirm passphrase: ")?;
            if first != second {
                return Err(SentraError::InvalidInput("passphrases do not match".to_string()));
            }
        }
        Ok(first)
    }
}

/// A logged-in user talking to the coordinator from this machine.
pub struct Remote {
    pub client: SentraClient,
    pub user_id: String,
    pub config: ClientConfig,
}

/// Keys and storage needed to decrypt exported files.
pub struct Keys {
    vault_key: BlobKey,
    session_key: Option<BlobKey>,
    blob_store: Option<S3BlobStore>,
}

impl Keys {
    pub fn decryptor(&self) -> Decryptor<'_> {
        let mut decryptor = Decryptor::new().with_vault_key(&self.vault_key);
        if let Some(key) = &self.session_key {
            decryptor = decryptor.with_session_key(key);
        }
        if let Some(store) = &self.blob_store {
            decryptor = decryptor.with_blob_store(store);
        }
        decryptor
    }
}

pub struct Context {
    pub store: LocalStore,
    secrets: KeyringStore,
    config_path: PathBuf,
}

impl Context {
    pub fn open() -> Result<Self> {
        Ok(Self {
            store: LocalStore::open_default()?,
            secrets: KeyringStore::default(),
            config_path: ClientConfig::default_path()?,
        })
    }

    pub fn secrets(&self) -> &dyn SecretStore {
        &self.secrets
    }

    pub fn sessions(&self) -> SessionStore<'_> {
        SessionStore::new(&self.secrets)
    }

    pub fn config(&self) -> Result<ClientConfig> {
        Ok(ClientConfig::ensure(&self.config_path)?)
    }

    pub fn save_config(&self, cfg: &ClientConfig) -> Result<()> {
        Ok(cfg.save(&self.config_path)?)
    }

    pub fn server_url(&self) -> Result<String> {
        Ok(config::server_url()?)
    }

    pub fn identity(&self) -> Result<DeviceIdentity> {
        DeviceIdentity::load_or_create(&self.secrets).context("device key unavailable")
    }

    /// Load the session and build a client for it.
    pub fn remote(&self) -> Result<Remote> {
        let session = self.sessions().require()?;
        if session.is_expired(chrono::Utc::now()) {
            bail!("session expired (run: sentra login)");
        }
        let user_id = session.user_id()?;

        let mut cfg = self.config()?;
        if cfg.set_user_id(&user_id) {
            self.save_config(&cfg)?;
        }

        let server_url = self.server_url()?;
        debug!("server url {}", server_url);
        let client = SentraClient::new(&server_url, &session.access_token, &cfg.machine_id)?;
        Ok(Remote {
            client,
            user_id,
            config: cfg,
        })
    }

    /// The user's vault key, unlocking or creating it on first use.
    pub async fn vault_key(&self, remote: &Remote) -> Result<BlobKey> {
        let key = VaultKeyManager::new(&self.secrets)
            .ensure(&remote.user_id, &remote.client, &PromptPassphrase)
            .await?;
        Ok(key)
    }

    pub fn vault_keys(&self) -> VaultKeyManager<'_> {
        VaultKeyManager::new(&self.secrets)
    }

    /// The configured bucket, if any.
    pub fn blob_store(&self) -> Result<Option<S3BlobStore>> {
        let Some(cfg) = StorageConfig::load(&StorageConfig::default_path()?)? else {
            return Ok(None);
        };
        Ok(Some(S3BlobStore::open(&cfg, &self.secrets)?))
    }

    /// The bucket required by BYOS mode; `None` in hosted mode.
    pub fn push_blob_store(&self, mode: StorageMode) -> Result<Option<S3BlobStore>> {
        match mode {
            StorageMode::Hosted => Ok(None),
            StorageMode::Byos => match self.blob_store()? {
                Some(store) => Ok(Some(store)),
                None => bail!("storage not configured (run: sentra storage set)"),
            },
        }
    }

    pub async fn keys(&self, remote: &Remote) -> Result<Keys> {
        let vault_key = self.vault_key(remote).await?;
        let session_key = match get_or_create_session_key(&self.secrets) {
            Ok(key) => Some(key),
            Err(e) => {
                debug!("session key unavailable, legacy blobs cannot be opened: {}", e);
                None
            }
        };
        let blob_store = match self.blob_store() {
            Ok(store) => store,
            Err(e) => {
                warn!("storage configured but unusable: {}", e);
                None
            }
        };
        Ok(Keys {
            vault_key,
            session_key,
            blob_store,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_machine_name_fallback() {
        assert_eq!(machine_name_from(Some(" laptop ".to_string())), "laptop");
        assert_eq!(machine_name_from(Some("  ".to_string())), "unknown");
        assert_eq!(machine_name_from(None), "unknown");
    }
}
