//! Sentra core library
//!
//! Everything the `sentra` CLI and the coordinator share: blob encryption and
//! vault-key envelopes, the credential-store backed key manager, the local
//! versioning store (staging index, commits, state snapshot), the push
//! builder and the device-signed request protocol.

pub mod config;
pub mod crypto;
pub mod keys;
pub mod models;
pub mod platform;
pub mod protocol;
pub mod push;
pub mod session;
pub mod storage;
pub mod store;
pub mod sync;

pub use crypto::{CipherKind, CryptoError, VaultKeyEnvelope};
pub use keys::{DeviceIdentity, KeyringStore, MemorySecretStore, SecretStore};
pub use push::{MissingFile, MissingFilesError, PushBuilder};
pub use store::{Commit, CommitStore, StagingIndex, StateSnapshot};

use thiserror::Error;

/// Result type for Sentra operations
pub type Result<T> = std::result::Result<T, SentraError>;

/// Every failure a Sentra client operation can surface.
///
/// The variants are deliberately closed so callers can decide between
/// printing remediation text and retrying.
#[derive(Error, Debug)]
pub enum SentraError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] crypto::CryptoError),

    #[error("not logged in (run: sentra login)")]
    NoSession,

    #[error("not configured: {0}")]
    NotConfigured(String),

    #[error("nothing staged (run: sentra add <path>)")]
    NothingStaged,

    #[error("commit not found: {0}")]
    CommitNotFound(String),

    #[error("commit selector is ambiguous: {0}")]
    AmbiguousCommit(String),

    #[error("{0}")]
    MissingFiles(#[from] push::MissingFilesError),

    #[error("failed to unlock vault key (wrong passphrase?)")]
    VaultUnlockFailed,

    #[error("secure credential store unavailable: {0}")]
    CredentialStoreUnavailable(String),

    #[error("server returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("rate limited by server; retry later")]
    RateLimited,

    #[error("{0}")]
    UpgradeRequired(String),

    #[error("unsafe file path from server: {0}")]
    UnsafePath(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for SentraError {
    fn from(e: reqwest::Error) -> Self {
        Self::Network(e.to_string())
    }
}
