//! Discovery of `.env` files under the scan root.

use crate::protocol::validate;
use crate::store::hash_file;
use crate::{Result, SentraError};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// Directories never descended into.
const IGNORED_DIRS: &[&str] = &[
    ".git",
    ".next",
    ".turbo",
    "build",
    "dist",
    "node_modules",
    "target",
    "vendor",
];

fn is_ignored(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| IGNORED_DIRS.contains(&name))
}

fn relative_slash_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let segments: Option<Vec<&str>> = rel.components().map(|c| c.as_os_str().to_str()).collect();
    Some(segments?.join("/"))
}

/// Every `.env` file inside a project under `scan_root`, keyed by relative
/// path, with its content hash. Files directly in the scan root belong to no
/// project and are skipped, as are symlinks.
pub fn scan_env_files(scan_root: &Path) -> Result<BTreeMap<String, String>> {
    if !scan_root.is_dir() {
        return Err(SentraError::InvalidInput(format!(
            "scan root is not a directory: {}",
            scan_root.display()
        )));
    }

    let mut found = BTreeMap::new();
    let walker = WalkDir::new(scan_root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !is_ignored(e));
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                debug!("skipping unreadable entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(rel) = relative_slash_path(scan_root, entry.path()) else {
            continue;
        };
        if !rel.contains('/') || validate::env_file_path(&rel).is_err() {
            continue;
        }
        found.insert(rel, hash_file(entry.path())?);
    }
    Ok(found)
}
