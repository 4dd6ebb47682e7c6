//! Staging index (`~/.sentra/index.json`).

use crate::store::{read_json, write_json};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

fn default_version() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StagingIndex {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub scan_root: String,
    #[serde(default)]
    pub updated_at: String,
    /// Relative path to content hash
    #[serde(default)]
    pub staged: BTreeMap<String, String>,
}

impl StagingIndex {
    pub fn new(scan_root: &Path) -> Self {
        Self {
            version: 1,
            scan_root: scan_root.to_string_lossy().into_owned(),
            updated_at: String::new(),
            staged: BTreeMap::new(),
        }
    }

    /// `Ok(None)` if the index file does not exist yet.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let idx: Option<Self> = read_json(path)?;
        Ok(idx.map(|mut idx| {
            if idx.version == 0 {
                idx.version = 1;
            }
            idx
        }))
    }

    pub fn save(&mut self, path: &Path) -> Result<()> {
        if self.version == 0 {
            self.version = 1;
        }
        self.updated_at = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        write_json(path, self)
    }

    pub fn stage(&mut self, path: &str, hash: &str) {
        self.staged.insert(path.to_string(), hash.to_string());
    }

    pub fn unstage(&mut self, path: &str) -> bool {
        self.staged.remove(path).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_index_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(StagingIndex::load(&dir.path().join("index.json")).unwrap().is_none());
    }

    #[test]
    fn test_index_json_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");

        let mut idx = StagingIndex::new(Path::new("/home/dev"));
        idx.stage("api/.env", "abc");
        idx.save(&path).unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["scanRoot"], "/home/dev");
        assert_eq!(raw["staged"]["api/.env"], "abc");
        assert!(raw["updatedAt"].as_str().unwrap().ends_with('Z'));

        let loaded = StagingIndex::load(&path).unwrap().unwrap();
        assert_eq!(loaded.staged.len(), 1);
    }

    #[test]
    fn test_legacy_index_without_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        std::fs::write(&path, r#"{"scanRoot":"/x","staged":{}}"#).unwrap();
        assert_eq!(StagingIndex::load(&path).unwrap().unwrap().version, 1);
    }
}
