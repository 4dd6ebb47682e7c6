//! Turns a local commit into push requests.
//!
//! One request is built per project root. Every referenced file is read
//! before anything is encrypted or uploaded, so a commit with a missing file
//! fails without side effects.

use crate::crypto::{cipher, sha256_hex, BlobKey, CipherKind};
use crate::models::{
    PushCommit, PushFile, PushMachine, PushProject, PushRequest, StorageRef, PUSH_VERSION,
    STORAGE_PROVIDER_S3,
};
use crate::store::{absolute_path, project_root_of, Commit};
use crate::{Result, SentraError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// A file referenced by a commit that is no longer on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingFile {
    pub path: String,
    pub abs: PathBuf,
}

/// Push aborted because a commit references files that no longer exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingFilesError {
    pub commit_id: String,
    pub message: String,
    pub scan_root: PathBuf,
    pub missing: Vec<MissingFile>,
}

impl fmt::Display for MissingFilesError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "push failed: missing env file(s) referenced by a local commit")?;
        writeln!(f, "- Commit: {}", self.commit_id)?;
        if !self.message.is_empty() {
            writeln!(f, "- Message: {}", self.message)?;
        }
        writeln!(f, "- Scan root: {}", self.scan_root.display())?;
        writeln!(f, "- Missing:")?;
        for m in &self.missing {
            writeln!(f, "  - {} (expected at {})", m.path, m.abs.display())?;
        }
        writeln!(f, "Fix:")?;
        writeln!(f, "  1) Restore the missing file(s) and re-run: sentra push")?;
        writeln!(
            f,
            "  2) Or drop the broken commit: sentra log prune {} (or sentra log rm {})",
            self.commit_id, self.commit_id
        )?;
        write!(
            f,
            "\nDetails: a tracked env file was deleted or moved after creating the commit"
        )
    }
}

impl std::error::Error for MissingFilesError {}

/// Where BYOS uploads land.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketLocation {
    pub bucket: String,
    pub endpoint: Option<String>,
    pub region: Option<String>,
}

/// Object storage for BYOS blobs.
#[async_trait]
pub trait BlobStore: Send + Sync {
    fn location(&self) -> BucketLocation;
    async fn put_object(&self, key: &str, data: &[u8]) -> Result<()>;
    async fn get_object(&self, key: &str) -> Result<Vec<u8>>;
}

/// `client_id` sent for a commit: its id when that is a UUID, else a v5 UUID of it.
pub fn client_id_for(commit_id: &str) -> String {
    let id = commit_id.trim();
    match Uuid::parse_str(id) {
        Ok(u) => u.to_string(),
        Err(_) => Uuid::new_v5(&Uuid::NAMESPACE_OID, id.as_bytes()).to_string(),
    }
}

/// Stable per (user, root, client id) so retried pushes dedupe on the server.
pub fn idempotency_key(user_id: &str, root: &str, client_id: &str) -> String {
    let name = format!("push:{}:{}:{}", user_id.trim(), root.trim(), client_id.trim());
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

/// `sentra/v1/<user>/<root>/<sha>/<sha256(path)>.bin`
pub fn s3_object_key(user_id: &str, root: &str, path: &str, sha_plain: &str) -> String {
    format!(
        "sentra/v1/{}/{}/{}/{}.bin",
        user_id.trim(),
        root.trim(),
        sha_plain.trim(),
        sha256_hex(path.trim().as_bytes())
    )
}

/// Paths of a commit grouped by project root, both sorted.
pub fn group_by_root(commit: &Commit) -> BTreeMap<String, Vec<String>> {
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for path in commit.files.keys() {
        let root = project_root_of(path).trim();
        if root.is_empty() {
            continue;
        }
        groups.entry(root.to_string()).or_default().push(path.clone());
    }
    for paths in groups.values_mut() {
        paths.sort();
    }
    groups
}

/// A push request plus the idempotency key to send it with.
#[derive(Debug, Clone)]
pub struct PreparedPush {
    pub root: String,
    pub idempotency_key: String,
    pub request: PushRequest,
}

pub struct PushBuilder<'a> {
    scan_root: &'a Path,
    user_id: &'a str,
    machine_id: &'a str,
    machine_name: &'a str,
    vault_key: &'a BlobKey,
    blob_store: Option<&'a dyn BlobStore>,
}

impl<'a> PushBuilder<'a> {
    pub fn new(
        scan_root: &'a Path,
        user_id: &'a str,
        machine_id: &'a str,
        machine_name: &'a str,
        vault_key: &'a BlobKey,
    ) -> Self {
        Self {
            scan_root,
            user_id,
            machine_id,
            machine_name,
            vault_key,
            blob_store: None,
        }
    }

    /// Upload blobs to the user's bucket instead of inlining them.
    pub fn with_blob_store(mut self, store: &'a dyn BlobStore) -> Self {
        self.blob_store = Some(store);
        self
    }

    fn read_all(
        &self,
        commit: &Commit,
        groups: &BTreeMap<String, Vec<String>>,
    ) -> Result<BTreeMap<String, Vec<u8>>> {
        let mut contents = BTreeMap::new();
        let mut missing = Vec::new();
        for path in groups.values().flatten() {
            let abs = absolute_path(self.scan_root, path);
            match std::fs::read(&abs) {
                Ok(data) => {
                    contents.insert(path.clone(), data);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    missing.push(MissingFile { path: path.clone(), abs });
                }
                Err(e) => {
                    return Err(SentraError::InvalidInput(format!("cannot read {}: {}", path, e)))
                }
            }
        }
        if !missing.is_empty() {
            return Err(MissingFilesError {
                commit_id: commit.id.trim().to_string(),
                message: commit.message.trim().to_string(),
                scan_root: self.scan_root.to_path_buf(),
                missing,
            }
            .into());
        }
        Ok(contents)
    }

    /// Build one request per project root of `commit`.
    pub async fn build(&self, commit: &Commit) -> Result<Vec<PreparedPush>> {
        let groups = group_by_root(commit);
        if groups.is_empty() {
            return Err(SentraError::InvalidInput(
                "cannot determine project root".to_string(),
            ));
        }

        let contents = self.read_all(commit, &groups)?;
        let client_id = client_id_for(&commit.id);

        let mut out = Vec::with_capacity(groups.len());
        for (root, paths) in &groups {
            let mut files = Vec::with_capacity(paths.len());
            for path in paths {
                let plain = contents
                    .get(path)
                    .ok_or_else(|| SentraError::InvalidInput(format!("cannot read {}", path)))?;
                files.push(self.encode_file(root, path, plain).await?);
            }

            debug!("prepared {} file(s) for {}", files.len(), root);
            out.push(PreparedPush {
                root: root.clone(),
                idempotency_key: idempotency_key(self.user_id, root, &client_id),
                request: PushRequest {
                    v: PUSH_VERSION,
                    project: PushProject {
                        id: None,
                        root: Some(root.clone()),
                    },
                    machine: PushMachine {
                        id: self.machine_id.to_string(),
                        name: Some(self.machine_name.to_string()).filter(|n| !n.is_empty()),
                    },
                    commit: PushCommit {
                        client_id: client_id.clone(),
                        message: commit.message.trim().to_string(),
                        parent_client_id: None,
                    },
                    files,
                },
            });
        }
        Ok(out)
    }

    async fn encode_file(&self, root: &str, path: &str, plain: &[u8]) -> Result<PushFile> {
        let sha = sha256_hex(plain);
        let sealed = cipher::seal(self.vault_key, plain)?;

        let (blob, storage) = match self.blob_store {
            Some(store) => {
                let key = s3_object_key(self.user_id, root, path, &sha);
                store.put_object(&key, &sealed).await.map_err(|e| {
                    SentraError::Network(format!("s3 upload failed ({}): {}", path, e))
                })?;
                let loc = store.location();
                let storage = StorageRef {
                    provider: STORAGE_PROVIDER_S3.to_string(),
                    bucket: loc.bucket,
                    key,
                    endpoint: loc.endpoint,
                    region: loc.region,
                };
                (None, Some(storage))
            }
            None => (Some(crate::crypto::b64_encode(&sealed)), None),
        };

        Ok(PushFile {
            path: path.to_string(),
            sha256: sha,
            size: plain.len() as u64,
            encrypted: true,
            cipher: CipherKind::SentraV1.as_str().to_string(),
            blob,
            storage,
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Records uploads in memory.
    #[derive(Default)]
    pub struct RecordingBlobStore {
        pub objects: Mutex<HashMap<String, Vec<u8>>>,
    }

    #[async_trait]
    impl BlobStore for RecordingBlobStore {
        fn location(&self) -> BucketLocation {
            BucketLocation {
                bucket: "bucket".to_string(),
                endpoint: Some("s3.example.com".to_string()),
                region: None,
            }
        }

        async fn put_object(&self, key: &str, data: &[u8]) -> Result<()> {
            self.objects.lock().unwrap().insert(key.to_string(), data.to_vec());
            Ok(())
        }

        async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
            self.objects
                .lock()
                .unwrap()
                .get(key)
                .cloned()
                .ok_or_else(|| SentraError::Network(format!("no such key: {}", key)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingBlobStore;
    use super::*;
    use crate::crypto::decrypt_blob;
    use crate::store::testing::store_with_files;

    fn commit_of(paths: &[&str]) -> Commit {
        let files = paths
            .iter()
            .map(|p| (p.to_string(), "0".repeat(64)))
            .collect();
        Commit::new("msg", files)
    }

    #[tokio::test]
    async fn test_groups_by_root_and_encrypts() {
        let (_dir, store) = store_with_files(&[
            ("web/.env", "A=1"),
            ("api/.env", "B=2"),
            ("api/config/.env.local", "C=3"),
        ]);
        let scan_root = store.scan_root().unwrap();
        let key = BlobKey::generate();
        let commit = commit_of(&["web/.env", "api/config/.env.local", "api/.env"]);

        let builder = PushBuilder::new(&scan_root, "user-1", "machine-1", "host", &key);
        let pushes = builder.build(&commit).await.unwrap();

        let roots: Vec<_> = pushes.iter().map(|p| p.root.as_str()).collect();
        assert_eq!(roots, vec!["api", "web"]);

        let api = &pushes[0].request;
        assert_eq!(api.project.root.as_deref(), Some("api"));
        assert_eq!(api.commit.client_id, commit.id);
        let paths: Vec<_> = api.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["api/.env", "api/config/.env.local"]);

        let file = &api.files[0];
        assert_eq!(file.cipher, "sentra-v1");
        assert_eq!(file.size, 3);
        assert_eq!(file.sha256, sha256_hex(b"B=2"));
        assert!(file.storage.is_none());
        let blob = file.blob.as_deref().unwrap();
        assert_eq!(decrypt_blob(&key, blob).unwrap(), b"B=2");
    }

    #[tokio::test]
    async fn test_missing_files_abort_before_upload() {
        let (_dir, store) = store_with_files(&[("api/.env", "A=1")]);
        let scan_root = store.scan_root().unwrap();
        let key = BlobKey::generate();
        let blobs = RecordingBlobStore::default();
        let commit = commit_of(&["api/.env", "web/.env", "zzz/.env"]);

        let builder = PushBuilder::new(&scan_root, "u", "m", "h", &key).with_blob_store(&blobs);
        let err = builder.build(&commit).await.unwrap_err();

        let missing = match err {
            SentraError::MissingFiles(m) => m,
            other => panic!("expected MissingFiles, got {other:?}"),
        };
        let paths: Vec<_> = missing.missing.iter().map(|m| m.path.as_str()).collect();
        assert_eq!(paths, vec!["web/.env", "zzz/.env"]);
        assert!(blobs.objects.lock().unwrap().is_empty());

        let text = missing.to_string();
        assert!(text.starts_with("push failed: missing env file(s) referenced by a local commit"));
        assert!(text.contains(&format!("sentra log prune {}", commit.id)));
        let expected = scan_root.join("web").join(".env");
        assert!(text.contains(&format!("(expected at {})", expected.display())));
    }

    #[tokio::test]
    async fn test_byos_uploads_raw_ciphertext() {
        let (_dir, store) = store_with_files(&[("api/.env", "SECRET=1")]);
        let scan_root = store.scan_root().unwrap();
        let key = BlobKey::generate();
        let blobs = RecordingBlobStore::default();
        let commit = commit_of(&["api/.env"]);

        let builder = PushBuilder::new(&scan_root, "u", "m", "h", &key).with_blob_store(&blobs);
        let pushes = builder.build(&commit).await.unwrap();
        let file = &pushes[0].request.files[0];
        assert!(file.blob.is_none());

        let storage = file.storage.as_ref().unwrap();
        assert_eq!(storage.provider, "s3");
        assert_eq!(storage.bucket, "bucket");
        assert_eq!(storage.key, s3_object_key("u", "api", "api/.env", &file.sha256));

        let raw = blobs.get_object(&storage.key).await.unwrap();
        assert_eq!(cipher::open(&key, &raw).unwrap(), b"SECRET=1");
    }

    #[test]
    fn test_legacy_client_id_is_stable_uuid() {
        let a = client_id_for("20240101120000");
        assert_eq!(a, client_id_for("20240101120000"));
        assert!(Uuid::parse_str(&a).is_ok());

        let id = Uuid::new_v4().to_string();
        assert_eq!(client_id_for(&id), id);
    }

    #[test]
    fn test_idempotency_key_depends_on_root() {
        let a = idempotency_key("u", "api", "c");
        assert_eq!(a, idempotency_key("u", "api", "c"));
        assert_ne!(a, idempotency_key("u", "web", "c"));
        assert_ne!(a, idempotency_key("v", "api", "c"));
    }

    #[test]
    fn test_s3_key_layout() {
        let key = s3_object_key("u", "api", "api/.env", "abc");
        assert!(key.starts_with("sentra/v1/u/api/abc/"));
        assert!(key.ends_with(".bin"));
        assert_eq!(key.len(), "sentra/v1/u/api/abc/".len() + 64 + 4);
    }
}
