//! Decrypting exported files and writing them to disk.
//!
//! `sentra sync` writes `<root>/...` paths under the scan root.
//! `sentra export` writes them under `sentra-export/<root>/`.
//! Paths come from the server and are checked before any write.

use crate::crypto::{cipher, b64_decode, BlobKey, CipherKind, CryptoError};
use crate::models::ExportFile;
use crate::push::BlobStore;
use crate::{platform, Result, SentraError};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Keys and storage needed to open exported blobs.
#[derive(Default)]
pub struct Decryptor<'a> {
    vault_key: Option<&'a BlobKey>,
    session_key: Option<&'a BlobKey>,
    blob_store: Option<&'a dyn BlobStore>,
}

impl<'a> Decryptor<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vault_key(mut self, key: &'a BlobKey) -> Self {
        self.vault_key = Some(key);
        self
    }

    pub fn with_session_key(mut self, key: &'a BlobKey) -> Self {
        self.session_key = Some(key);
        self
    }

    pub fn with_blob_store(mut self, store: &'a dyn BlobStore) -> Self {
        self.blob_store = Some(store);
        self
    }

    async fn sealed_bytes(&self, file: &ExportFile) -> Result<Vec<u8>> {
        if !file.blob_b64.trim().is_empty() {
            return Ok(b64_decode(&file.blob_b64)?);
        }
        let storage = file.storage_ref().ok_or_else(|| {
            SentraError::InvalidInput(format!("no blob or storage for {}", file.file_path))
        })?;
        let store = self.blob_store.ok_or_else(|| {
            SentraError::NotConfigured(
                "file is in external storage (run: sentra storage set)".to_string(),
            )
        })?;
        debug!("downloading {} from {}", file.file_path, storage.bucket);
        store.get_object(&storage.key).await
    }

    /// Decrypt one exported file according to its cipher tag.
    pub async fn decrypt(&self, file: &ExportFile) -> Result<Vec<u8>> {
        let kind = CipherKind::parse(&file.cipher)
            .ok_or_else(|| CryptoError::UnsupportedCipher(file.cipher.clone()))?;
        let legacy = match kind {
            CipherKind::SentraV1 => false,
            CipherKind::LegacySession => true,
            CipherKind::AgeV1 => {
                return Err(CryptoError::UnsupportedCipher(kind.to_string()).into())
            }
        };

        let sealed = self.sealed_bytes(file).await?;
        if legacy {
            let key = self.session_key.ok_or(CryptoError::ForeignDeviceBlob)?;
            return Ok(cipher::open(key, &sealed).map_err(|_| CryptoError::ForeignDeviceBlob)?);
        }
        let key = self
            .vault_key
            .ok_or_else(|| SentraError::NotConfigured("vault key not unlocked".to_string()))?;
        Ok(cipher::open(key, &sealed)?)
    }
}

/// Normalize a server path into clean relative segments.
fn clean_relative(path: &str) -> Result<Vec<String>> {
    let raw = path.trim();
    let unsafe_path = || SentraError::UnsafePath(path.to_string());
    if raw.is_empty() || raw.starts_with('/') || raw.starts_with('\\') || raw.contains(':') {
        return Err(unsafe_path());
    }

    let mut segments = Vec::new();
    for seg in raw.split(['/', '\\']) {
        match seg {
            "" | "." => continue,
            ".." => return Err(unsafe_path()),
            s => segments.push(s.to_string()),
        }
    }
    if segments.is_empty() {
        return Err(unsafe_path());
    }
    Ok(segments)
}

/// Where `sentra sync` writes `file_path`: it must live under `root/`.
pub fn sync_target(scan_root: &Path, root: &str, file_path: &str) -> Result<PathBuf> {
    let segments = clean_relative(file_path)?;
    if segments.len() < 2 || segments[0] != root.trim() {
        return Err(SentraError::UnsafePath(file_path.to_string()));
    }
    Ok(segments.iter().fold(scan_root.to_path_buf(), |acc, s| acc.join(s)))
}

/// Where `sentra export` writes `file_path`, relative to `<export_dir>/<root>`.
pub fn export_target(export_dir: &Path, root: &str, file_path: &str) -> Result<PathBuf> {
    let root = root.trim();
    let mut segments = clean_relative(file_path)?;
    if segments.len() > 1 && segments[0] == root {
        segments.remove(0);
    }
    let base = clean_relative(root)?
        .iter()
        .fold(export_dir.to_path_buf(), |acc, s| acc.join(s));
    Ok(segments.iter().fold(base, |acc, s| acc.join(s)))
}

/// Write decrypted contents with owner-only permissions.
pub fn write_plaintext(path: &Path, data: &[u8]) -> Result<()> {
    platform::write_private_atomic(path, data)?;
    Ok(())
}
