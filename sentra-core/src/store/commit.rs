//! Local commits (`~/.sentra/commits/<id>.json`).

use crate::store::{absolute_path, read_json, write_json};
use crate::{Result, SentraError};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

fn default_version() -> u32 {
    1
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// A named, immutable set of staged file hashes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commit {
    pub id: String,
    pub created_at: String,
    pub message: String,
    /// Relative path to plaintext SHA-256 hex
    pub files: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pushed_at: Option<String>,
    #[serde(default = "default_version")]
    pub version: u32,
    /// Creation order within this store; 0 for records written before it existed.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub seq: u64,
}

impl Commit {
    pub fn new(message: &str, files: BTreeMap<String, String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now_rfc3339(),
            message: message.trim().to_string(),
            files,
            pushed_at: None,
            version: 1,
            seq: 0,
        }
    }

    pub fn is_pushed(&self) -> bool {
        self.pushed_at
            .as_deref()
            .is_some_and(|p| !p.trim().is_empty())
    }

    /// Git-like short id: first six hex chars of `sha1(id\ncreatedAt\nmessage)`.
    pub fn short_id(&self) -> String {
        let mut hasher = Sha1::new();
        hasher.update(self.id.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.created_at.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.message.as_bytes());
        hex::encode(hasher.finalize())[..6].to_string()
    }

    /// `createdAt` only has second resolution, so `seq` orders commits made
    /// within the same second.
    fn sort_key(&self) -> (i64, u64, &str) {
        let ts = chrono::DateTime::parse_from_rfc3339(&self.created_at)
            .map(|t| t.timestamp())
            .unwrap_or(i64::MIN);
        (ts, self.seq, self.id.as_str())
    }

    /// Relative paths of this commit that no longer exist under `scan_root`.
    pub fn missing_files(&self, scan_root: &Path) -> Vec<String> {
        self.files
            .keys()
            .filter(|rel| {
                matches!(
                    fs::metadata(absolute_path(scan_root, rel)),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound
                )
            })
            .cloned()
            .collect()
    }
}

/// Which commits `sentra log` lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFilter {
    All,
    #[default]
    Pending,
    Pushed,
}

impl LogFilter {
    pub fn accepts(&self, commit: &Commit) -> bool {
        match self {
            Self::All => true,
            Self::Pending => !commit.is_pushed(),
            Self::Pushed => commit.is_pushed(),
        }
    }
}

/// Outcome of a prune.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Commits that had at least one missing file
    pub commits_pruned: usize,
    pub files_pruned: usize,
    /// Commits removed because no files were left
    pub commits_deleted: usize,
}

/// Directory of commit records.
pub struct CommitStore {
    dir: PathBuf,
}

impl CommitStore {
    /// Open the commit directory and migrate any legacy ids found in it.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let store = Self { dir: dir.into() };
        fs::create_dir_all(&store.dir)?;
        let migrated = store.migrate_legacy_ids()?;
        if migrated > 0 {
            info!("migrated {} legacy commit id(s)", migrated);
        }
        Ok(store)
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    fn read_all(&self) -> Result<Vec<(PathBuf, Commit)>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut out = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(mut commit) = read_json::<Commit>(&path)? {
                if commit.version == 0 {
                    commit.version = 1;
                }
                out.push((path, commit));
            }
        }
        Ok(out)
    }

    /// Rewrite commits whose id is not a UUID under `uuid_v5(OID, old_id)`.
    ///
    /// The new record is written before the old file is removed, so a crash
    /// leaves at worst a duplicate that the next run collapses.
    pub fn migrate_legacy_ids(&self) -> Result<usize> {
        let mut migrated = 0;
        for (old_path, mut commit) in self.read_all()? {
            if Uuid::parse_str(&commit.id).is_ok() {
                continue;
            }
            let old_id = std::mem::take(&mut commit.id);
            commit.id = Uuid::new_v5(&Uuid::NAMESPACE_OID, old_id.as_bytes()).to_string();
            debug!("migrating commit {} -> {}", old_id, commit.id);

            self.save(&commit)?;
            if old_path != self.path_for(&commit.id) {
                if let Err(e) = fs::remove_file(&old_path) {
                    warn!("could not remove legacy commit file {}: {}", old_path.display(), e);
                }
            }
            migrated += 1;
        }
        Ok(migrated)
    }

    pub fn save(&self, commit: &Commit) -> Result<()> {
        write_json(&self.path_for(&commit.id), commit)
    }

    /// Create and persist a new commit. `files` must be non-empty.
    pub fn create(&self, message: &str, files: BTreeMap<String, String>) -> Result<Commit> {
        if files.is_empty() {
            return Err(SentraError::NothingStaged);
        }
        let mut commit = Commit::new(message, files);
        commit.seq = self.next_seq()?;
        self.save(&commit)?;
        Ok(commit)
    }

    fn next_seq(&self) -> Result<u64> {
        let last = self
            .read_all()?
            .iter()
            .map(|(_, c)| c.seq)
            .max()
            .unwrap_or(0);
        Ok(last + 1)
    }

    /// All commits, oldest first.
    pub fn list(&self) -> Result<Vec<Commit>> {
        let mut commits: Vec<Commit> = self.read_all()?.into_iter().map(|(_, c)| c).collect();
        commits.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        Ok(commits)
    }

    pub fn list_filtered(&self, filter: LogFilter) -> Result<Vec<Commit>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|c| filter.accepts(c))
            .collect())
    }

    /// Commits not yet pushed, oldest first.
    pub fn pending(&self) -> Result<Vec<Commit>> {
        self.list_filtered(LogFilter::Pending)
    }

    pub fn update(&self, commit: &Commit) -> Result<()> {
        self.save(commit)
    }

    /// Stamp `pushed_at`. A commit that is already pushed keeps its original stamp.
    pub fn mark_pushed(&self, commit: &mut Commit) -> Result<()> {
        if commit.is_pushed() {
            return Ok(());
        }
        commit.pushed_at = Some(now_rfc3339());
        self.save(commit)
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        match fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SentraError::CommitNotFound(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete every commit. Returns how many were removed.
    pub fn clear(&self) -> Result<usize> {
        let all = self.read_all()?;
        for (path, _) in &all {
            fs::remove_file(path)?;
        }
        Ok(all.len())
    }

    /// Resolve a full id, a unique id prefix, or a six-char short id.
    pub fn resolve(&self, selector: &str) -> Result<Commit> {
        let selector = selector.trim();
        if selector.is_empty() {
            return Err(SentraError::InvalidInput("commit id is required".to_string()));
        }
        let commits = self.list()?;

        if Uuid::parse_str(selector).is_ok() {
            return commits
                .into_iter()
                .find(|c| c.id == selector)
                .ok_or_else(|| SentraError::CommitNotFound(selector.to_string()));
        }

        let mut matches: Vec<Commit> = commits
            .into_iter()
            .filter(|c| c.short_id() == selector || c.id.starts_with(selector))
            .collect();

        match matches.len() {
            0 => Err(SentraError::CommitNotFound(selector.to_string())),
            1 => Ok(matches.remove(0)),
            _ => Err(SentraError::AmbiguousCommit(selector.to_string())),
        }
    }

    /// Drop missing files from the selected commits, deleting any that end up empty.
    ///
    /// `all` targets every pending commit; pushed commits are never touched by it.
    pub fn prune(&self, selector: &str, scan_root: &Path) -> Result<PruneReport> {
        let targets = if selector.trim() == "all" {
            self.pending()?
        } else {
            vec![self.resolve(selector)?]
        };

        let mut report = PruneReport::default();
        for mut commit in targets {
            let missing = commit.missing_files(scan_root);
            if missing.is_empty() {
                continue;
            }
            for path in &missing {
                commit.files.remove(path);
            }
            report.files_pruned += missing.len();
            report.commits_pruned += 1;

            if commit.files.is_empty() {
                self.delete(&commit.id)?;
                report.commits_deleted += 1;
            } else {
                self.update(&commit)?;
            }
        }
        Ok(report)
    }

    /// Pending commits that reference files missing under `scan_root`.
    pub fn verify(&self, scan_root: &Path) -> Result<Vec<(Commit, Vec<String>)>> {
        Ok(self
            .pending()?
            .into_iter()
            .filter_map(|c| {
                let missing = c.missing_files(scan_root);
                (!missing.is_empty()).then_some((c, missing))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(paths: &[&str]) -> BTreeMap<String, String> {
        paths.iter().map(|p| (p.to_string(), "00".repeat(32))).collect()
    }

    fn commit_at(id: &str, created_at: &str, message: &str, paths: &[&str]) -> Commit {
        Commit {
            id: id.to_string(),
            created_at: created_at.to_string(),
            message: message.to_string(),
            files: files(paths),
            pushed_at: None,
            version: 1,
            seq: 0,
        }
    }

    fn open() -> (tempfile::TempDir, CommitStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = CommitStore::open(dir.path().join("commits")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_create_rejects_empty() {
        let (_dir, store) = open();
        assert!(matches!(
            store.create("m", BTreeMap::new()),
            Err(SentraError::NothingStaged)
        ));
    }

    #[test]
    fn test_list_sorted_by_created_at() {
        let (_dir, store) = open();
        let late = commit_at(
            "00000000-0000-4000-8000-000000000001",
            "2024-05-02T00:00:00Z",
            "late",
            &["a/.env"],
        );
        let early = commit_at(
            "ffffffff-0000-4000-8000-000000000001",
            "2024-05-01T00:00:00Z",
            "early",
            &["a/.env"],
        );
        store.save(&late).unwrap();
        store.save(&early).unwrap();

        let listed = store.list().unwrap();
        assert_eq!(listed[0].message, "early");
        assert_eq!(listed[1].message, "late");
    }

    #[test]
    fn test_same_second_commits_keep_creation_order() {
        let (_dir, store) = open();
        let stamp = "2024-05-01T00:00:00Z";
        // Ids sort opposite to creation order.
        let ids = [
            "ffffffff-0000-4000-8000-000000000001",
            "88888888-0000-4000-8000-000000000002",
            "00000000-0000-4000-8000-000000000003",
        ];
        for (i, id) in ids.iter().enumerate() {
            let mut c = store.create(&format!("c{}", i), files(&["a/.env"])).unwrap();
            store.delete(&c.id).unwrap();
            c.id = id.to_string();
            c.created_at = stamp.to_string();
            store.save(&c).unwrap();
        }

        let listed: Vec<String> = store.list().unwrap().into_iter().map(|c| c.message).collect();
        assert_eq!(listed, vec!["c0", "c1", "c2"]);
    }

    #[test]
    fn test_legacy_id_migration_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let commits_dir = dir.path().join("commits");
        fs::create_dir_all(&commits_dir).unwrap();
        let legacy = commit_at("20240101T000000", "2024-01-01T00:00:00Z", "legacy", &["a/.env"]);
        fs::write(
            commits_dir.join("20240101T000000.json"),
            serde_json::to_vec(&legacy).unwrap(),
        )
        .unwrap();

        let store = CommitStore::open(&commits_dir).unwrap();
        let expected = Uuid::new_v5(&Uuid::NAMESPACE_OID, b"20240101T000000").to_string();
        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, expected);
        assert!(!commits_dir.join("20240101T000000.json").exists());

        assert_eq!(store.migrate_legacy_ids().unwrap(), 0);
        assert_eq!(store.list().unwrap()[0].id, expected);
    }

    #[test]
    fn test_resolve_by_id_prefix_and_short_id() {
        let (_dir, store) = open();
        let a = commit_at(
            "aaaaaaaa-0000-4000-8000-000000000001",
            "2024-01-01T00:00:00Z",
            "a",
            &["a/.env"],
        );
        let b = commit_at(
            "aaaabbbb-0000-4000-8000-000000000002",
            "2024-01-02T00:00:00Z",
            "b",
            &["a/.env"],
        );
        store.save(&a).unwrap();
        store.save(&b).unwrap();

        assert_eq!(store.resolve(&a.id).unwrap().id, a.id);
        assert_eq!(store.resolve("aaaab").unwrap().id, b.id);
        assert_eq!(store.resolve(&b.short_id()).unwrap().id, b.id);
        assert!(matches!(store.resolve("aaaa"), Err(SentraError::AmbiguousCommit(_))));
        assert!(matches!(store.resolve("zzz"), Err(SentraError::CommitNotFound(_))));
        assert!(matches!(
            store.resolve("bbbbbbbb-0000-4000-8000-000000000009"),
            Err(SentraError::CommitNotFound(_))
        ));
    }

    #[test]
    fn test_short_id_is_stable() {
        let c = commit_at(
            "aaaaaaaa-0000-4000-8000-000000000001",
            "2024-01-01T00:00:00Z",
            "msg",
            &[],
        );
        let mut hasher = Sha1::new();
        hasher.update(b"aaaaaaaa-0000-4000-8000-000000000001\n2024-01-01T00:00:00Z\nmsg");
        let expected = hex::encode(hasher.finalize());
        assert_eq!(c.short_id(), expected[..6]);
    }

    #[test]
    fn test_prune_removes_missing_and_deletes_empty() {
        let (dir, store) = open();
        let scan_root = dir.path().join("dev");
        fs::create_dir_all(scan_root.join("api")).unwrap();
        fs::write(scan_root.join("api").join(".env"), "A=1").unwrap();

        let partial = commit_at(
            "11111111-0000-4000-8000-000000000001",
            "2024-01-01T00:00:00Z",
            "partial",
            &["api/.env", "gone/.env"],
        );
        let empty = commit_at(
            "22222222-0000-4000-8000-000000000002",
            "2024-01-02T00:00:00Z",
            "empty",
            &["gone/.env"],
        );
        let mut pushed = commit_at(
            "33333333-0000-4000-8000-000000000003",
            "2024-01-03T00:00:00Z",
            "pushed",
            &["gone/.env"],
        );
        pushed.pushed_at = Some("2024-01-04T00:00:00Z".to_string());
        for c in [&partial, &empty, &pushed] {
            store.save(c).unwrap();
        }

        let report = store.prune("all", &scan_root).unwrap();
        assert_eq!(
            report,
            PruneReport {
                commits_pruned: 2,
                files_pruned: 2,
                commits_deleted: 1
            }
        );

        let remaining = store.list().unwrap();
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0].files.keys().collect::<Vec<_>>(), vec!["api/.env"]);
        assert!(remaining[1].is_pushed());
    }

    #[test]
    fn test_verify_lists_pending_with_missing() {
        let (dir, store) = open();
        let scan_root = dir.path().join("dev");
        let c = commit_at(
            "11111111-0000-4000-8000-000000000001",
            "2024-01-01T00:00:00Z",
            "m",
            &["api/.env"],
        );
        store.save(&c).unwrap();

        let issues = store.verify(&scan_root).unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].1, vec!["api/.env".to_string()]);
    }

    #[test]
    fn test_mark_pushed_once_and_clear() {
        let (_dir, store) = open();
        let mut c = store.create("m", files(&["a/.env"])).unwrap();
        store.mark_pushed(&mut c).unwrap();
        let first = c.pushed_at.clone();
        store.mark_pushed(&mut c).unwrap();
        assert_eq!(c.pushed_at, first);
        assert!(store.pending().unwrap().is_empty());

        store.create("n", files(&["b/.env"])).unwrap();
        assert_eq!(store.clear().unwrap(), 2);
        assert!(store.list().unwrap().is_empty());
        assert!(matches!(store.delete(&c.id), Err(SentraError::CommitNotFound(_))));
    }
}
