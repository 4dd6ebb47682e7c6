//! Wire types shared by the CLI and the coordinator.
//!
//! Push payloads reject unknown fields at every level so the server can
//! validate them strictly.

use serde::{Deserialize, Serialize};

pub const PUSH_VERSION: u32 = 1;
pub const STORAGE_PROVIDER_S3: &str = "s3";

/// `POST /push` body, one per (commit, project root).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PushRequest {
    pub v: u32,
    pub project: PushProject,
    pub machine: PushMachine,
    pub commit: PushCommit,
    pub files: Vec<PushFile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PushProject {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PushMachine {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PushCommit {
    pub client_id: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_client_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PushFile {
    pub path: String,
    pub sha256: String,
    /// Plaintext length in bytes
    pub size: u64,
    pub encrypted: bool,
    pub cipher: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageRef>,
}

/// Location of a blob uploaded to the user's own bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageRef {
    pub provider: String,
    pub bucket: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

/// Successful `POST /push` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushResponse {
    pub commit_id: String,
    pub project_id: String,
    pub project_root: String,
    /// Number of files stored with the commit
    pub files: usize,
    pub deduplicated: bool,
}

/// `POST /machines/register` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterMachineRequest {
    pub machine_id: String,
    pub machine_name: String,
    pub device_pub_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_key_type: Option<String>,
}

/// One file version returned by `GET /export`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportFile {
    pub commit_id: String,
    pub file_path: String,
    pub sha256: String,
    pub size: u64,
    pub cipher: String,
    #[serde(default)]
    pub blob_b64: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_bucket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_region: Option<String>,
}

impl ExportFile {
    /// The storage reference, when the blob lives in the user's bucket.
    pub fn storage_ref(&self) -> Option<StorageRef> {
        let bucket = self.storage_bucket.as_deref()?.trim();
        let key = self.storage_key.as_deref()?.trim();
        if bucket.is_empty() || key.is_empty() {
            return None;
        }
        Some(StorageRef {
            provider: self
                .storage_provider
                .clone()
                .unwrap_or_else(|| STORAGE_PROVIDER_S3.to_string()),
            bucket: bucket.to_string(),
            key: key.to_string(),
            endpoint: self.storage_endpoint.clone(),
            region: self.storage_region.clone(),
        })
    }
}

/// One row of `GET /commits`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub commit_id: String,
    pub created_at: String,
    pub message: String,
    pub machine_name: String,
    pub machine_id: String,
    pub files: Vec<String>,
    pub project_id: String,
    pub project_root: String,
    pub project_name: String,
    pub file_count: usize,
}

/// One row of `GET /projects`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub root_path: String,
    #[serde(default)]
    pub last_commit_id: Option<String>,
    #[serde(default)]
    pub last_commit_message: Option<String>,
    pub file_count: usize,
}

/// `GET /users/me`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}
