//! Repository interfaces for the coordinator.
//!
//! Handlers only see these traits. [`SqliteStore`] implements all of them;
//! [`DisabledStore`] answers `NotConfigured` so the server can start without
//! a database and still serve health checks and auth errors.

pub mod sqlite;

pub use sqlite::SqliteStore;

use sentra_core::models::{CommitInfo, ExportFile, ProjectInfo, PushRequest, PushResponse};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("db not configured")]
    NotConfigured,

    #[error("too many machines")]
    TooManyMachines,

    #[error("device key mismatch")]
    KeyMismatch,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Database(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

pub trait MachineStore: Send + Sync {
    /// Insert or refresh a machine. New machines count against the per-user limit;
    /// a machine whose bound key differs from `device_pub_key` is refused.
    fn register(
        &self,
        user_id: &str,
        machine_id: &str,
        machine_name: &str,
        device_pub_key: &str,
    ) -> StoreResult<()>;

    fn device_pub_key(&self, user_id: &str, machine_id: &str) -> StoreResult<Option<String>>;
}

pub trait PushStore: Send + Sync {
    /// Store one validated push. Repeats of `(user, project, client_id)` return
    /// the existing commit with `deduplicated` set.
    fn push(&self, user_id: &str, request: &PushRequest) -> StoreResult<PushResponse>;
}

pub trait ExportStore: Send + Sync {
    /// Newest version of every path in `root`, at or before commit `at` when given.
    fn export(&self, user_id: &str, root: &str, at: Option<&str>) -> StoreResult<Vec<ExportFile>>;
}

pub trait CommitStore: Send + Sync {
    /// Commits of `root`, newest first.
    fn list_commits(&self, user_id: &str, root: &str) -> StoreResult<Vec<CommitInfo>>;
}

pub trait ProjectStore: Send + Sync {
    fn list_projects(&self, user_id: &str) -> StoreResult<Vec<ProjectInfo>>;
}

pub trait VaultKeyStore: Send + Sync {
    /// The user's envelope document as stored, byte for byte.
    fn get(&self, user_id: &str) -> StoreResult<Option<String>>;
    fn upsert(&self, user_id: &str, doc: &str) -> StoreResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdempotencyStatus {
    InProgress,
    Done,
}

impl IdempotencyStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Done => "done",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "in_progress" => Some(Self::InProgress),
            "done" => Some(Self::Done),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyRecord {
    pub status: IdempotencyStatus,
    pub response_json: Option<String>,
}

pub trait IdempotencyStore: Send + Sync {
    /// Claim `(user, scope, key)`. Returns false when a live row already exists.
    fn create(&self, user_id: &str, scope: &str, key: &str, ttl: Duration) -> StoreResult<bool>;
    fn get(&self, user_id: &str, scope: &str, key: &str) -> StoreResult<Option<IdempotencyRecord>>;
    fn set_done(
        &self,
        user_id: &str,
        scope: &str,
        key: &str,
        response_json: &str,
    ) -> StoreResult<()>;
    fn delete(&self, user_id: &str, scope: &str, key: &str) -> StoreResult<()>;
    /// Drop rows past their expiry. Returns how many were removed.
    fn purge_expired(&self) -> StoreResult<usize>;
}

/// Stand-in for every store when no database is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledStore;

impl MachineStore for DisabledStore {
    fn register(&self, _: &str, _: &str, _: &str, _: &str) -> StoreResult<()> {
        Err(StoreError::NotConfigured)
    }

    fn device_pub_key(&self, _: &str, _: &str) -> StoreResult<Option<String>> {
        Err(StoreError::NotConfigured)
    }
}

impl PushStore for DisabledStore {
    fn push(&self, _: &str, _: &PushRequest) -> StoreResult<PushResponse> {
        Err(StoreError::NotConfigured)
    }
}

impl ExportStore for DisabledStore {
    fn export(&self, _: &str, _: &str, _: Option<&str>) -> StoreResult<Vec<ExportFile>> {
        Err(StoreError::NotConfigured)
    }
}

impl CommitStore for DisabledStore {
    fn list_commits(&self, _: &str, _: &str) -> StoreResult<Vec<CommitInfo>> {
        Err(StoreError::NotConfigured)
    }
}

impl ProjectStore for DisabledStore {
    fn list_projects(&self, _: &str) -> StoreResult<Vec<ProjectInfo>> {
        Err(StoreError::NotConfigured)
    }
}

impl VaultKeyStore for DisabledStore {
    fn get(&self, _: &str) -> StoreResult<Option<String>> {
        Err(StoreError::NotConfigured)
    }

    fn upsert(&self, _: &str, _: &str) -> StoreResult<()> {
        Err(StoreError::NotConfigured)
    }
}

impl IdempotencyStore for DisabledStore {
    fn create(&self, _: &str, _: &str, _: &str, _: Duration) -> StoreResult<bool> {
        Err(StoreError::NotConfigured)
    }

    fn get(&self, _: &str, _: &str, _: &str) -> StoreResult<Option<IdempotencyRecord>> {
        Err(StoreError::NotConfigured)
    }

    fn set_done(&self, _: &str, _: &str, _: &str, _: &str) -> StoreResult<()> {
        Err(StoreError::NotConfigured)
    }

    fn delete(&self, _: &str, _: &str, _: &str) -> StoreResult<()> {
        Err(StoreError::NotConfigured)
    }

    fn purge_expired(&self) -> StoreResult<usize> {
        Err(StoreError::NotConfigured)
    }
}

/// The repositories a router is built over.
#[derive(Clone)]
pub struct Stores {
    pub machines: Arc<dyn MachineStore>,
    pub pushes: Arc<dyn PushStore>,
    pub exports: Arc<dyn ExportStore>,
    pub commits: Arc<dyn CommitStore>,
    pub projects: Arc<dyn ProjectStore>,
    pub vault_keys: Arc<dyn VaultKeyStore>,
    pub idempotency: Arc<dyn IdempotencyStore>,
}

impl Stores {
    pub fn sqlite(store: SqliteStore) -> Self {
        let store = Arc::new(store);
        Self {
            machines: store.clone(),
            pushes: store.clone(),
            exports: store.clone(),
            commits: store.clone(),
            projects: store.clone(),
            vault_keys: store.clone(),
            idempotency: store,
        }
    }

    pub fn disabled() -> Self {
        let store = Arc::new(DisabledStore);
        Self {
            machines: store.clone(),
            pushes: store.clone(),
            exports: store.clone(),
            commits: store.clone(),
            projects: store.clone(),
            vault_keys: store.clone(),
            idempotency: store,
        }
    }
}
