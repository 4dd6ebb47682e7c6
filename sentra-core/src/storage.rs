//! Bring-your-own-storage configuration and the S3 blob store.
//!
//! `~/.sentra/storage.json` describes the bucket. The secret access key is
//! kept in the credential store under `storage:<id>`, never in the file.

use crate::keys::SecretStore;
use crate::platform;
use crate::push::{BlobStore, BucketLocation};
use crate::store::{read_json, write_json};
use crate::{Result, SentraError};
use async_trait::async_trait;
use s3::creds::Credentials;
use s3::{Bucket, Region};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const STORAGE_FILE: &str = "storage.json";
pub const STORAGE_SECRET_PREFIX: &str = "storage:";
const DEFAULT_REGION: &str = "us-east-1";
const S3_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageProvider {
    AwsS3,
    CloudflareR2,
    Minio,
    CustomS3,
}

impl StorageProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AwsS3 => "aws_s3",
            Self::CloudflareR2 => "cloudflare_r2",
            Self::Minio => "minio",
            Self::CustomS3 => "custom_s3",
        }
    }
}

impl std::str::FromStr for StorageProvider {
    type Err = SentraError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "aws_s3" | "s3" | "aws" => Ok(Self::AwsS3),
            "cloudflare_r2" | "r2" => Ok(Self::CloudflareR2),
            "minio" => Ok(Self::Minio),
            "custom_s3" | "custom" => Ok(Self::CustomS3),
            other => Err(SentraError::InvalidInput(format!(
                "unknown storage provider: {}",
                other
            ))),
        }
    }
}

fn default_version() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    pub id: String,
    pub provider: StorageProvider,
    pub bucket: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub endpoint: String,
    pub use_ssl: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<String>,
    pub created_at: String,
}

impl StorageConfig {
    pub fn new(provider: StorageProvider, bucket: &str, endpoint: &str) -> Self {
        Self {
            version: 1,
            id: uuid::Uuid::new_v4().to_string(),
            provider,
            bucket: bucket.trim().to_string(),
            region: None,
            endpoint: endpoint.trim().to_string(),
            use_ssl: true,
            access_key_id: None,
            secret_ref: None,
            created_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        }
    }

    pub fn default_path() -> Result<PathBuf> {
        Ok(platform::require_sentra_home()?.join(STORAGE_FILE))
    }

    pub fn load(path: &Path) -> Result<Option<Self>> {
        read_json(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        write_json(path, self)
    }

    /// Remove the file and its stored secret.
    pub fn delete(path: &Path, secrets: &dyn SecretStore) -> Result<bool> {
        if let Some(cfg) = Self::load(path)? {
            if let Some(secret_ref) = cfg.secret_ref.as_deref().filter(|r| !r.is_empty()) {
                if let Err(e) = secrets.delete(secret_ref) {
                    debug!("could not delete storage secret: {}", e);
                }
            }
        }
        match std::fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.bucket.trim().is_empty() {
            return Err(SentraError::InvalidInput("missing bucket".to_string()));
        }
        if self.endpoint.trim().is_empty() {
            return Err(SentraError::InvalidInput("missing endpoint".to_string()));
        }
        if self.secret_ref.is_some() && self.access_key_id.as_deref().unwrap_or("").is_empty() {
            return Err(SentraError::InvalidInput("missing access key id".to_string()));
        }
        Ok(())
    }

    pub fn secret_account(&self) -> String {
        format!("{}{}", STORAGE_SECRET_PREFIX, self.id)
    }

    /// Store the secret access key and point `secret_ref` at it.
    pub fn set_secret(&mut self, secrets: &dyn SecretStore, secret_access_key: &str) -> Result<()> {
        let account = self.secret_account();
        secrets.set(&account, secret_access_key.trim())?;
        self.secret_ref = Some(account);
        Ok(())
    }

    /// Endpoint as a URL, adding the scheme implied by `use_ssl` when absent.
    pub fn endpoint_url(&self) -> String {
        let endpoint = self.endpoint.trim().trim_end_matches('/');
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else if self.use_ssl {
            format!("https://{}", endpoint)
        } else {
            format!("http://{}", endpoint)
        }
    }

    pub fn location(&self) -> BucketLocation {
        BucketLocation {
            bucket: self.bucket.clone(),
            endpoint: Some(self.endpoint.clone()).filter(|e| !e.is_empty()),
            region: self.region.clone().filter(|r| !r.is_empty()),
        }
    }
}

fn s3_error(e: impl std::fmt::Display) -> SentraError {
    SentraError::Network(format!("s3: {}", e))
}

/// [`BlobStore`] over an S3-compatible bucket.
pub struct S3BlobStore {
    bucket: Box<Bucket>,
    location: BucketLocation,
}

impl S3BlobStore {
    /// Open the bucket described by `cfg`.
    ///
    /// Credentials come from the credential store, or from
    /// `AWS_ACCESS_KEY_ID`/`AWS_SECRET_ACCESS_KEY` when no secret is stored.
    pub fn open(cfg: &StorageConfig, secrets: &dyn SecretStore) -> Result<Self> {
        cfg.validate()?;

        let secret = match cfg.secret_ref.as_deref() {
            Some(account) => Some(secrets.get(account)?.ok_or_else(|| {
                SentraError::NotConfigured(format!("storage secret missing ({})", account))
            })?),
            None => std::env::var("AWS_SECRET_ACCESS_KEY").ok(),
        };
        let access_key = cfg
            .access_key_id
            .clone()
            .or_else(|| std::env::var("AWS_ACCESS_KEY_ID").ok());
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        let credentials = Credentials::new(
            access_key.as_deref(),
            secret.as_deref(),
            session_token.as_deref(),
            None,
            None,
        )
        .map_err(s3_error)?;

        let region = Region::Custom {
            region: cfg
                .region
                .clone()
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| DEFAULT_REGION.to_string()),
            endpoint: cfg.endpoint_url(),
        };

        let mut bucket = Bucket::new(&cfg.bucket, region, credentials).map_err(s3_error)?;
        if cfg.provider != StorageProvider::AwsS3 {
            bucket = bucket.with_path_style();
        }
        bucket.set_request_timeout(Some(S3_TIMEOUT));

        Ok(Self {
            bucket,
            location: cfg.location(),
        })
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    fn location(&self) -> BucketLocation {
        self.location.clone()
    }

    async fn put_object(&self, key: &str, data: &[u8]) -> Result<()> {
        let resp = self.bucket.put_object(key, data).await.map_err(s3_error)?;
        let status = resp.status_code();
        if !(200..300).contains(&status) {
            return Err(s3_error(format!("put {} returned {}", key, status)));
        }
        debug!("uploaded {} ({} bytes)", key, data.len());
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let resp = self.bucket.get_object(key).await.map_err(s3_error)?;
        let status = resp.status_code();
        if !(200..300).contains(&status) {
            return Err(s3_error(format!("get {} returned {}", key, status)));
        }
        let bytes = resp.bytes().to_vec();
        if bytes.is_empty() {
            return Err(s3_error(format!("empty object: {}", key)));
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::MemorySecretStore;

    #[test]
    fn test_secret_kept_out_of_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(STORAGE_FILE);
        let secrets = MemorySecretStore::new();

        let mut cfg = StorageConfig::new(
            StorageProvider::CloudflareR2,
            "bucket",
            "acct.r2.cloudflarestorage.com",
        );
        cfg.access_key_id = Some("AKID".into());
        cfg.set_secret(&secrets, "super-secret").unwrap();
        cfg.save(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("super-secret"));
        assert!(raw.contains("\"provider\": \"cloudflare_r2\""));
        assert_eq!(
            secrets.get(&cfg.secret_account()).unwrap().as_deref(),
            Some("super-secret")
        );

        assert_eq!(StorageConfig::load(&path).unwrap(), Some(cfg.clone()));
        assert!(StorageConfig::delete(&path, &secrets).unwrap());
        assert!(secrets.get(&cfg.secret_account()).unwrap().is_none());
        assert!(!StorageConfig::delete(&path, &secrets).unwrap());
    }

    #[test]
    fn test_validate() {
        let cfg = StorageConfig::new(StorageProvider::Minio, "", "localhost:9000");
        assert!(cfg.validate().is_err());
        let cfg = StorageConfig::new(StorageProvider::Minio, "b", " ");
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_endpoint_url() {
        let mut cfg = StorageConfig::new(StorageProvider::Minio, "b", "localhost:9000/");
        cfg.use_ssl = false;
        assert_eq!(cfg.endpoint_url(), "http://localhost:9000");
        cfg.endpoint = "https://s3.example.com".into();
        assert_eq!(cfg.endpoint_url(), "https://s3.example.com");
    }

    #[test]
    fn test_provider_parse() {
        assert_eq!("R2".parse::<StorageProvider>().unwrap(), StorageProvider::CloudflareR2);
        assert_eq!("custom-s3".parse::<StorageProvider>().unwrap(), StorageProvider::CustomS3);
        assert!("gcs".parse::<StorageProvider>().is_err());
    }
}
