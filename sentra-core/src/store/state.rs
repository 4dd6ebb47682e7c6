//! Last committed snapshot (`~/.sentra/state.json`).

use crate::store::{project_root_of, read_json, write_json};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

fn default_version() -> u32 {
    1
}

/// Project root to (path within project to hash).
pub type Projects = BTreeMap<String, BTreeMap<String, String>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub scan_root: String,
    #[serde(default)]
    pub projects: Projects,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pushed_at: Option<String>,
}

/// Counts of differences between two snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateDiff {
    pub changed: usize,
    pub added: usize,
    pub removed: usize,
}

impl StateDiff {
    pub fn total(&self) -> usize {
        self.changed + self.added + self.removed
    }
}

fn split_root(path: &str) -> (String, String) {
    let root = project_root_of(path).to_string();
    let rest = path
        .trim_start_matches("./")
        .trim_start_matches('/')
        .strip_prefix(&root)
        .map(|r| r.trim_start_matches('/'))
        .unwrap_or_default();
    if rest.is_empty() {
        (".".to_string(), root)
    } else {
        (root, rest.to_string())
    }
}

fn join_root(root: &str, path: &str) -> String {
    if root == "." {
        path.to_string()
    } else {
        format!("{}/{}", root, path)
    }
}

impl StateSnapshot {
    pub fn new(scan_root: &Path) -> Self {
        Self {
            version: 1,
            scan_root: scan_root.to_string_lossy().into_owned(),
            projects: Projects::new(),
            pushed_at: None,
        }
    }

    /// Build a snapshot from flat `path -> hash` pairs.
    pub fn from_files(scan_root: &str, files: &BTreeMap<String, String>) -> Self {
        let mut snapshot = Self::new(Path::new(scan_root));
        snapshot.record_files(files);
        snapshot
    }

    pub fn load(path: &Path) -> Result<Option<Self>> {
        read_json(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json(path, self)
    }

    /// Fold committed `path -> hash` pairs into the per-project map.
    pub fn record_files(&mut self, files: &BTreeMap<String, String>) {
        for (path, hash) in files {
            let (root, rest) = split_root(path);
            self.projects.entry(root).or_default().insert(rest, hash.clone());
        }
    }

    /// Every tracked file as a path relative to the scan root.
    pub fn tracked_paths(&self) -> Vec<String> {
        self.projects
            .iter()
            .flat_map(|(root, files)| files.keys().map(move |p| join_root(root, p)))
            .collect()
    }

    fn flatten(&self) -> BTreeMap<String, &String> {
        self.projects
            .iter()
            .flat_map(|(root, files)| files.iter().map(move |(p, h)| (join_root(root, p), h)))
            .collect()
    }

    /// Differences going from `self` to `live`.
    pub fn diff(&self, live: &StateSnapshot) -> StateDiff {
        let before = self.flatten();
        let after = live.flatten();
        let mut diff = StateDiff::default();

        let keys: BTreeSet<&String> = before.keys().chain(after.keys()).collect();
        for key in keys {
            match (before.get(key), after.get(key)) {
                (Some(a), Some(b)) if a != b => diff.changed += 1,
                (Some(_), None) => diff.removed += 1,
                (None, Some(_)) => diff.added += 1,
                _ => {}
            }
        }
        diff
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(p, h)| (p.to_string(), h.to_string())).collect()
    }

    #[test]
    fn test_record_groups_by_root() {
        let snap = StateSnapshot::from_files(
            "/dev",
            &files(&[("api/.env", "h1"), ("api/sub/.env", "h2"), (".env", "h3")]),
        );
        assert_eq!(snap.projects["api"][".env"], "h1");
        assert_eq!(snap.projects["api"]["sub/.env"], "h2");
        assert_eq!(snap.projects["."][".env"], "h3");

        let mut tracked = snap.tracked_paths();
        tracked.sort();
        assert_eq!(tracked, vec![".env", "api/.env", "api/sub/.env"]);
    }

    #[test]
    fn test_diff_counts() {
        let before = StateSnapshot::from_files(
            "/dev",
            &files(&[("a/.env", "1"), ("b/.env", "1"), ("c/.env", "1")]),
        );
        let after = StateSnapshot::from_files(
            "/dev",
            &files(&[("a/.env", "1"), ("b/.env", "2"), ("d/.env", "1")]),
        );
        assert_eq!(
            before.diff(&after),
            StateDiff { changed: 1, added: 1, removed: 1 }
        );
        assert_eq!(before.diff(&before).total(), 0);
    }

    #[test]
    fn test_state_json_shape() {
        let mut snap = StateSnapshot::new(Path::new("/dev"));
        let raw = serde_json::to_value(&snap).unwrap();
        assert!(raw.get("pushedAt").is_none());
        assert_eq!(raw["scanRoot"], "/dev");

        snap.pushed_at = Some("2024-01-01T00:00:00Z".to_string());
        let raw = serde_json::to_value(&snap).unwrap();
        assert_eq!(raw["pushedAt"], "2024-01-01T00:00:00Z");
    }
}
