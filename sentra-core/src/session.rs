//! Login session cache.
//!
//! The session JSON lives in the credential store under the `session`
//! account. With `SENTRA_ALLOW_INSECURE_SESSION_FILE` set, a credential store
//! failure falls back to `~/.sentra/session.json`, sealed with the session key:
//!
//! ```text
//! {"v":1,"alg":"A256GCM","nonce":"<b64url>","data":"<b64url ct||tag>"}
//! ```

use crate::crypto::{b64_decode, b64_encode, cipher, BlobKey, CryptoError};
use crate::keys::{allow_insecure_session_file, session_key, SecretStore};
use crate::platform;
use crate::{Result, SentraError};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const SESSION_ACCOUNT: &str = "session";
pub const SESSION_FILE: &str = "session.json";

const FILE_WRAPPER_VERSION: u32 = 1;
const FILE_WRAPPER_ALG: &str = "A256GCM";
const NONCE_LEN: usize = 12;

/// Refresh this long before the token expires.
const EXPIRY_SLACK_SECS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    pub saved_at: DateTime<Utc>,
}

/// Unverified claims read from the access token payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AccessTokenClaims {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
}

/// Decode the JWT payload without checking the signature.
///
/// The server verifies tokens; the client only needs `sub` and `exp`.
pub fn parse_access_token_claims(token: &str) -> Result<AccessTokenClaims> {
    let payload = token
        .trim()
        .split('.')
        .nth(1)
        .ok_or_else(|| SentraError::InvalidInput("invalid jwt".to_string()))?;
    let bytes = b64_decode(payload)?;
    let claims: AccessTokenClaims = serde_json::from_slice(&bytes)?;
    if claims.sub.trim().is_empty() {
        return Err(SentraError::InvalidInput("jwt missing sub".to_string()));
    }
    Ok(claims)
}

impl Session {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into().trim().to_string(),
            refresh_token: None,
            token_type: Some("bearer".to_string()),
            expires_in: None,
            saved_at: Utc::now(),
        }
    }

    pub fn claims(&self) -> Result<AccessTokenClaims> {
        parse_access_token_claims(&self.access_token)
    }

    /// The user id from the token's `sub` claim.
    pub fn user_id(&self) -> Result<String> {
        Ok(self.claims()?.sub)
    }

    /// Prefers the JWT `exp`, then `saved_at + expires_in`.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        if let Some(exp) = self.claims().ok().and_then(|c| c.exp).filter(|e| *e > 0) {
            return Utc.timestamp_opt(exp, 0).single();
        }
        self.expires_in
            .filter(|s| *s > 0)
            .map(|s| self.saved_at + Duration::seconds(s))
    }

    /// Unknown expiry never counts as expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at() {
            Some(exp) => now > exp - Duration::seconds(EXPIRY_SLACK_SECS),
            None => false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct EncryptedSessionFile {
    v: u32,
    alg: String,
    nonce: String,
    data: String,
}

fn seal_session(key: &BlobKey, plain: &[u8]) -> Result<Vec<u8>> {
    let sealed = cipher::seal(key, plain)?;
    let (nonce, ct) = sealed.split_at(NONCE_LEN);
    let wrapper = EncryptedSessionFile {
        v: FILE_WRAPPER_VERSION,
        alg: FILE_WRAPPER_ALG.to_string(),
        nonce: b64_encode(nonce),
        data: b64_encode(ct),
    };
    Ok(serde_json::to_vec_pretty(&wrapper)?)
}

fn open_session(key: &BlobKey, raw: &[u8]) -> Result<Vec<u8>> {
    let wrapper: EncryptedSessionFile = serde_json::from_slice(raw)
        .map_err(|e| CryptoError::InvalidEnvelope(e.to_string()))?;
    if wrapper.v != FILE_WRAPPER_VERSION || wrapper.alg != FILE_WRAPPER_ALG {
        return Err(CryptoError::InvalidEnvelope("unknown session file format".to_string()).into());
    }
    let mut sealed = b64_decode(&wrapper.nonce)?;
    if sealed.len() != NONCE_LEN {
        return Err(CryptoError::InvalidEnvelope("invalid session nonce size".to_string()).into());
    }
    sealed.extend_from_slice(&b64_decode(&wrapper.data)?);
    Ok(cipher::open(key, &sealed)?)
}

/// Reads and writes the session, with the optional encrypted file fallback.
pub struct SessionStore<'a> {
    store: &'a dyn SecretStore,
    /// `(session.json, session.key)` when the insecure-file opt-in is set
    files: Option<(PathBuf, PathBuf)>,
}

impl<'a> SessionStore<'a> {
    /// Honors the `SENTRA_ALLOW_INSECURE_SESSION_FILE` opt-in.
    pub fn new(store: &'a dyn SecretStore) -> Self {
        let files = if allow_insecure_session_file() {
            platform::sentra_home().map(|h| {
                (
                    h.join(SESSION_FILE),
                    h.join(session_key::SESSION_KEY_FILE),
                )
            })
        } else {
            None
        };
        Self { store, files }
    }

    /// A store that falls back to files under `dir`.
    pub fn with_file_fallback(store: &'a dyn SecretStore, dir: &Path) -> Self {
        Self {
            store,
            files: Some((
                dir.join(SESSION_FILE),
                dir.join(session_key::SESSION_KEY_FILE),
            )),
        }
    }

    pub fn save(&self, session: &Session) -> Result<()> {
        let plain = serde_json::to_string(session)?;
        match self.store.set(SESSION_ACCOUNT, &plain) {
            Ok(()) => {
                self.remove_files();
                Ok(())
            }
            Err(SentraError::CredentialStoreUnavailable(reason)) => {
                let Some((session_file, key_file)) = &self.files else {
                    return Err(SentraError::CredentialStoreUnavailable(reason));
                };
                warn!(
                    "credential store unavailable ({}), writing {}",
                    reason,
                    session_file.display()
                );
                let key = session_key::load_or_create(self.store, Some(key_file))?;
                let sealed = seal_session(&key, plain.as_bytes())?;
                platform::write_private_atomic(session_file, &sealed)?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Load the session. A session without an access token counts as absent.
    pub fn load(&self) -> Result<Option<Session>> {
        match self.store.get(SESSION_ACCOUNT) {
            Ok(Some(raw)) if !raw.trim().is_empty() => {
                let session: Session = serde_json::from_str(&raw).map_err(|e| {
                    SentraError::InvalidInput(format!("invalid session in credential store: {}", e))
                })?;
                return Ok(Some(session).filter(|s| !s.access_token.is_empty()));
            }
            Ok(_) => {}
            Err(SentraError::CredentialStoreUnavailable(reason)) if self.files.is_none() => {
                return Err(SentraError::CredentialStoreUnavailable(reason));
            }
            Err(SentraError::CredentialStoreUnavailable(reason)) => {
                debug!("credential store unavailable ({}), trying session file", reason);
            }
            Err(e) => return Err(e),
        }
        self.load_file()
    }

    fn load_file(&self) -> Result<Option<Session>> {
        let Some((session_file, key_file)) = &self.files else {
            return Ok(None);
        };
        let raw = match std::fs::read(session_file) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let key = session_key::load_or_create(self.store, Some(key_file))?;
        let plain = open_session(&key, &raw).map_err(|e| {
            SentraError::InvalidInput(format!("cannot decrypt session; please login again: {}", e))
        })?;
        let session: Session = serde_json::from_slice(&plain)?;
        if session.access_token.is_empty() {
            return Ok(None);
        }

        // Move the session into the credential store once it works again.
        if self.store.set(SESSION_ACCOUNT, &serde_json::to_string(&session)?).is_ok() {
            self.remove_files();
        }
        Ok(Some(session))
    }

    /// Load the session or fail with [`SentraError::NoSession`].
    pub fn require(&self) -> Result<Session> {
        self.load()?.ok_or(SentraError::NoSession)
    }

    pub fn clear(&self) -> Result<()> {
        let result = self.store.delete(SESSION_ACCOUNT);
        if let Some((session_file, _)) = &self.files {
            let _ = std::fs::remove_file(session_file);
        }
        match result {
            Err(SentraError::CredentialStoreUnavailable(_)) if self.files.is_some() => Ok(()),
            other => other,
        }
    }

    fn remove_files(&self) {
        if let Some((session_file, _)) = &self.files {
            let _ = std::fs::remove_file(session_file);
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::crypto::b64_encode;

    /// An unsigned JWT carrying the given claims JSON.
    pub fn fake_jwt(claims: &str) -> String {
        format!(
            "{}.{}.sig",
            b64_encode(br#"{"alg":"none"}"#),
            b64_encode(claims.as_bytes())
        )
    }
}
