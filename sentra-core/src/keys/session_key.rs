//! Per-installation session key.
//!
//! Used for the legacy `ed25519+aes-256-gcm-v1` cipher and for the encrypted
//! session file wrapper. The key never leaves this machine.

use crate::crypto::{b64_decode, b64_encode, BlobKey};
use crate::keys::SecretStore;
use crate::platform;
use crate::{Result, SentraError};
use std::path::Path;
use tracing::{debug, warn};

pub const SESSION_KEY_ACCOUNT: &str = "session-key";
pub const SESSION_KEY_FILE: &str = "session.key";
pub const INSECURE_FILE_ENV: &str = "SENTRA_ALLOW_INSECURE_SESSION_FILE";

/// Whether the user opted in to on-disk session material.
pub fn allow_insecure_session_file() -> bool {
    std::env::var(INSECURE_FILE_ENV)
        .map(|v| is_truthy(&v))
        .unwrap_or(false)
}

pub(crate) fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "y"
    )
}

/// Load the session key, creating it on first use.
///
/// The credential store is preferred. When it is unavailable the key file
/// under `~/.sentra` is used only if the insecure-file opt-in is set.
pub fn get_or_create_session_key(store: &dyn SecretStore) -> Result<BlobKey> {
    let fallback = if allow_insecure_session_file() {
        platform::sentra_home().map(|h| h.join(SESSION_KEY_FILE))
    } else {
        None
    };
    load_or_create(store, fallback.as_deref())
}

pub(crate) fn load_or_create(
    store: &dyn SecretStore,
    fallback_file: Option<&Path>,
) -> Result<BlobKey> {
    match from_store(store) {
        Ok(key) => Ok(key),
        Err(SentraError::CredentialStoreUnavailable(reason)) => match fallback_file {
            Some(path) => {
                warn!("credential store unavailable ({}), using {}", reason, path.display());
                from_file(path)
            }
            None => Err(SentraError::CredentialStoreUnavailable(format!(
                "{} (set {}=1 to allow a local key file)",
                reason, INSECURE_FILE_ENV
            ))),
        },
        Err(e) => Err(e),
    }
}

fn from_store(store: &dyn SecretStore) -> Result<BlobKey> {
    if let Some(value) = store.get(SESSION_KEY_ACCOUNT)? {
        return Ok(BlobKey::from_slice(&b64_decode(&value)?)?);
    }

    debug!("creating new session key");
    let key = BlobKey::generate();
    store.set(SESSION_KEY_ACCOUNT, &b64_encode(key.as_bytes()))?;
    Ok(key)
}

fn from_file(path: &Path) -> Result<BlobKey> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(BlobKey::from_slice(&b64_decode(&contents)?)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let key = BlobKey::generate();
            platform::write_private_atomic(path, b64_encode(key.as_bytes()).as_bytes())?;
            Ok(key)
        }
        Err(e) => Err(e.into()),
    }
}
