//! Local versioning store under `~/.sentra`.
//!
//! ```text
//! ~/.sentra/
//!   index.json          staging index
//!   state.json          last committed snapshot per project
//!   commits/<id>.json   one file per commit
//! ```
//!
//! Every record is written to `<path>.tmp` and renamed into place.

pub mod commit;
pub mod index;
pub mod scan;
pub mod state;

pub use commit::{Commit, CommitStore, LogFilter, PruneReport};
pub use index::StagingIndex;
pub use scan::scan_env_files;
pub use state::{StateDiff, StateSnapshot};

use crate::crypto::sha256_hex;
use crate::platform;
use crate::protocol::validate;
use crate::{Result, SentraError};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const INDEX_FILE: &str = "index.json";
pub const STATE_FILE: &str = "state.json";
pub const COMMITS_DIR: &str = "commits";

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    platform::write_private_atomic(path, &bytes)?;
    Ok(())
}

/// Normalize a user-supplied relative path: forward slashes, no `./` or leading `/`.
pub fn normalize_rel_path(path: &str) -> String {
    let path = path.trim().replace('\\', "/");
    let mut out: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => continue,
            other => out.push(other),
        }
    }
    out.join("/")
}

/// First path segment, the project root a file belongs to.
pub fn project_root_of(path: &str) -> &str {
    let trimmed = path.trim_start_matches("./").trim_start_matches('/');
    trimmed.split('/').next().unwrap_or(trimmed)
}

/// SHA-256 hex of a file's contents.
pub fn hash_file(path: &Path) -> Result<String> {
    let data = std::fs::read(path)?;
    Ok(sha256_hex(&data))
}

/// Join a stored relative path onto the scan root.
pub fn absolute_path(scan_root: &Path, rel: &str) -> PathBuf {
    rel.split('/')
        .filter(|s| !s.is_empty())
        .fold(scan_root.to_path_buf(), |acc, seg| acc.join(seg))
}

/// The whole local store: staging index, state snapshot and commits.
pub struct LocalStore {
    home: PathBuf,
    commits: CommitStore,
}

impl LocalStore {
    /// Open the store rooted at `home` (normally `~/.sentra`).
    pub fn open(home: impl Into<PathBuf>) -> Result<Self> {
        let home = home.into();
        platform::ensure_private_dir(&home)?;
        let commits = CommitStore::open(home.join(COMMITS_DIR))?;
        Ok(Self { home, commits })
    }

    /// Open `~/.sentra`.
    pub fn open_default() -> Result<Self> {
        Self::open(platform::require_sentra_home()?)
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn commits(&self) -> &CommitStore {
        &self.commits
    }

    pub fn index_path(&self) -> PathBuf {
        self.home.join(INDEX_FILE)
    }

    pub fn state_path(&self) -> PathBuf {
        self.home.join(STATE_FILE)
    }

    pub fn load_index(&self) -> Result<StagingIndex> {
        Ok(StagingIndex::load(&self.index_path())?
            .unwrap_or_else(|| StagingIndex::new(&platform::default_scan_root())))
    }

    pub fn load_state(&self) -> Result<StateSnapshot> {
        let scan_root = self.scan_root()?;
        Ok(StateSnapshot::load(&self.state_path())?
            .unwrap_or_else(|| StateSnapshot::new(&scan_root)))
    }

    /// Scan root recorded in the index, or `~/dev`.
    pub fn scan_root(&self) -> Result<PathBuf> {
        match StagingIndex::load(&self.index_path())? {
            Some(idx) if !idx.scan_root.trim().is_empty() => {
                Ok(PathBuf::from(idx.scan_root.trim()))
            }
            _ => Ok(platform::default_scan_root()),
        }
    }

    /// Change the scan root stored in the index.
    pub fn set_scan_root(&self, root: &Path) -> Result<()> {
        let mut idx = self.load_index()?;
        idx.scan_root = root.to_string_lossy().into_owned();
        idx.save(&self.index_path())
    }

    /// Stage a `.env` file by its path relative to the scan root.
    ///
    /// Returns the normalized path and its content hash.
    pub fn stage(&self, rel_path: &str) -> Result<(String, String)> {
        let rel = normalize_rel_path(rel_path);
        validate::env_file_path(&rel)
            .map_err(|e| SentraError::InvalidInput(format!("{}: {}", e, rel_path)))?;

        let mut idx = self.load_index()?;
        let abs = absolute_path(Path::new(&idx.scan_root), &rel);
        let hash = match hash_file(&abs) {
            Ok(h) => h,
            Err(SentraError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SentraError::InvalidInput(format!(
                    "env file not found: {}",
                    abs.display()
                )))
            }
            Err(e) => return Err(e),
        };

        debug!("staging {} ({})", rel, hash);
        idx.stage(&rel, &hash);
        idx.save(&self.index_path())?;
        Ok((rel, hash))
    }

    /// Stage every `.env` file found under the scan root. Returns the staged paths.
    pub fn stage_all(&self) -> Result<Vec<String>> {
        let mut idx = self.load_index()?;
        let found = scan_env_files(Path::new(&idx.scan_root))?;
        for (path, hash) in &found {
            idx.stage(path, hash);
        }
        idx.save(&self.index_path())?;
        debug!("staged {} file(s) from scan", found.len());
        Ok(found.into_keys().collect())
    }

    /// Remove a path from the staging set. Returns whether it was staged.
    pub fn unstage(&self, rel_path: &str) -> Result<bool> {
        let rel = normalize_rel_path(rel_path);
        let mut idx = self.load_index()?;
        let removed = idx.unstage(&rel);
        if removed {
            idx.save(&self.index_path())?;
        }
        Ok(removed)
    }

    /// Turn the staging set into a commit.
    ///
    /// The commit is written first, then the index is cleared, then the
    /// committed hashes are folded into the state snapshot.
    pub fn commit(&self, message: &str) -> Result<Commit> {
        let message = message.trim();
        if message.is_empty() {
            return Err(SentraError::InvalidInput(
                "commit message cannot be empty".to_string(),
            ));
        }

        let mut idx = self.load_index()?;
        if idx.staged.is_empty() {
            return Err(SentraError::NothingStaged);
        }

        let commit = self.commits.create(message, idx.staged.clone())?;

        idx.staged.clear();
        idx.save(&self.index_path())?;

        let mut state = self.load_state()?;
        state.scan_root = idx.scan_root.clone();
        state.record_files(&commit.files);
        state.save(&self.state_path())?;

        Ok(commit)
    }

    /// Stamp the state snapshot after a successful push.
    pub fn record_push(&self) -> Result<()> {
        let mut state = self.load_state()?;
        state.pushed_at =
            Some(chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true));
        state.save(&self.state_path())
    }

    /// Compare the last committed snapshot with what is on disk now.
    pub fn status(&self) -> Result<(StateSnapshot, StateDiff)> {
        let state = self.load_state()?;
        let idx = self.load_index()?;
        let scan_root = PathBuf::from(&idx.scan_root);

        let mut live: BTreeMap<String, String> = BTreeMap::new();
        for path in state.tracked_paths().into_iter().chain(idx.staged.keys().cloned()) {
            if let Ok(hash) = hash_file(&absolute_path(&scan_root, &path)) {
                live.insert(path, hash);
            }
        }
        let live = StateSnapshot::from_files(&idx.scan_root, &live);
        let diff = state.diff(&live);
        Ok((state, diff))
    }
}


#[cfg(test)]
mod tests {
    use super::testing::store_with_files;
    use super::*;

    #[test]
    fn test_normalize_rel_path() {
        assert_eq!(normalize_rel_path("./api/.env"), "api/.env");
        assert_eq!(normalize_rel_path("/api//.env.local"), "api/.env.local");
        assert_eq!(normalize_rel_path("web\\.env"), "web/.env");
    }

    #[test]
    fn test_project_root_of() {
        assert_eq!(project_root_of("api/.env"), "api");
        assert_eq!(project_root_of("./web/apps/.env"), "web");
        assert_eq!(project_root_of(".env"), ".env");
    }

    #[test]
    fn test_commit_with_nothing_staged() {
        let (_dir, store) = store_with_files(&[]);
        assert!(matches!(store.commit("empty"), Err(SentraError::NothingStaged)));
    }

    #[test]
    fn test_stage_commit_clears_index_and_records_state() {
        let (_dir, store) = store_with_files(&[("api/.env", "A=1\n"), ("web/.env.local", "B=2\n")]);

        store.stage("api/.env").unwrap();
        store.stage("./web/.env.local").unwrap();
        assert_eq!(store.load_index().unwrap().staged.len(), 2);

        let commit = store.commit("  initial  ").unwrap();
        assert_eq!(commit.message, "initial");
        assert_eq!(commit.files.len(), 2);
        assert_eq!(commit.files["api/.env"], sha256_hex(b"A=1\n"));

        assert!(store.load_index().unwrap().staged.is_empty());
        let state = store.load_state().unwrap();
        assert_eq!(state.projects["api"][".env"], sha256_hex(b"A=1\n"));
        assert_eq!(state.projects["web"][".env.local"], sha256_hex(b"B=2\n"));

        assert_eq!(store.commits().list().unwrap().len(), 1);
    }

    #[test]
    fn test_stage_rejects_non_env_and_missing() {
        let (_dir, store) = store_with_files(&[("api/config.json", "{}")]);
        assert!(matches!(store.stage("api/config.json"), Err(SentraError::InvalidInput(_))));
        assert!(matches!(store.stage("api/.env"), Err(SentraError::InvalidInput(_))));
    }

    #[test]
    fn test_stage_all_picks_up_env_files() {
        let (_dir, store) = store_with_files(&[
            ("api/.env", "A=1\n"),
            ("api/node_modules/pkg/.env", "X=1\n"),
            ("web/config/.env.local", "B=2\n"),
            ("web/README.md", "# web\n"),
        ]);
        let staged = store.stage_all().unwrap();
        assert_eq!(staged, vec!["api/.env", "web/config/.env.local"]);
        assert_eq!(store.load_index().unwrap().staged.len(), 2);
    }

    #[test]
    fn test_record_push_stamps_state() {
        let (_dir, store) = store_with_files(&[("api/.env", "A=1\n")]);
        store.stage("api/.env").unwrap();
        store.commit("c").unwrap();
        assert!(store.load_state().unwrap().pushed_at.is_none());

        store.record_push().unwrap();
        let state = store.load_state().unwrap();
        assert!(state.pushed_at.is_some());
        assert_eq!(state.projects["api"].len(), 1);
    }

    #[test]
    fn test_unstage() {
        let (_dir, store) = store_with_files(&[("api/.env", "A=1\n")]);
        store.stage("api/.env").unwrap();
        assert!(store.unstage("./api/.env").unwrap());
        assert!(!store.unstage("api/.env").unwrap());
        assert!(matches!(store.commit("x"), Err(SentraError::NothingStaged)));
    }

    #[test]
    fn test_status_reports_changes() {
        let (dir, store) = store_with_files(&[("api/.env", "A=1\n"), ("web/.env", "B=1\n")]);
        store.stage("api/.env").unwrap();
        store.stage("web/.env").unwrap();
        store.commit("base").unwrap();

        let scan_root = dir.path().join("dev");
        std::fs::write(scan_root.join("api").join(".env"), "A=2\n").unwrap();
        std::fs::remove_file(scan_root.join("web").join(".env")).unwrap();

        let (_, diff) = store.status().unwrap();
        assert_eq!(diff.changed, 1);
        assert_eq!(diff.removed, 1);
        assert_eq!(diff.added, 0);
    }
}
