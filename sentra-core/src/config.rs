//! Client configuration (`~/.sentra/config.json`) and server URL resolution.

use crate::platform;
use crate::store::{read_json, write_json};
use crate::{Result, SentraError};
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const CONFIG_FILE: &str = "config.json";
pub const DEFAULT_HOSTED_SERVER_URL: &str = "https://sentra-server-198360446701.us-east1.run.app";

/// Where encrypted blobs go on push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// Blobs are sent inline and stored by the coordinator.
    #[default]
    Hosted,
    /// Blobs are uploaded to the user's own S3-compatible bucket.
    Byos,
}

impl StorageMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hosted => "hosted",
            Self::Byos => "byos",
        }
    }
}

impl std::str::FromStr for StorageMode {
    type Err = SentraError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "hosted" => Ok(Self::Hosted),
            "byos" => Ok(Self::Byos),
            other => Err(SentraError::InvalidInput(format!(
                "invalid storage mode: {} (expected hosted or byos)",
                other
            ))),
        }
    }
}

fn default_version() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub machine_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,
    #[serde(default)]
    pub storage_mode: StorageMode,
    pub created_at: DateTime<Utc>,
    #[serde(default = "default_version")]
    pub version: u32,
}

impl ClientConfig {
    pub fn new() -> Self {
        Self {
            machine_id: uuid::Uuid::new_v4().to_string(),
            user_id: None,
            server_url: None,
            storage_mode: StorageMode::Hosted,
            created_at: Utc::now(),
            version: 1,
        }
    }

    pub fn default_path() -> Result<PathBuf> {
        Ok(platform::require_sentra_home()?.join(CONFIG_FILE))
    }

    /// Load the config. A file without a machine id counts as absent.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let cfg: Option<Self> = read_json(path)?;
        Ok(cfg.filter(|c| !c.machine_id.trim().is_empty()))
    }

    /// Load the config, creating one with a fresh machine id on first use.
    pub fn ensure(path: &Path) -> Result<Self> {
        if let Some(cfg) = Self::load(path)? {
            return Ok(cfg);
        }
        let cfg = Self::new();
        debug!("created machine id {}", cfg.machine_id);
        cfg.save(path)?;
        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json(path, self)
    }

    /// Record the user id, keeping the machine id stable. Returns whether it changed.
    pub fn set_user_id(&mut self, user_id: &str) -> bool {
        let user_id = user_id.trim();
        if user_id.is_empty() || self.user_id.as_deref() == Some(user_id) {
            return false;
        }
        self.user_id = Some(user_id.to_string());
        true
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// `localhost` or a loopback IP literal.
pub fn is_loopback_host(host: &str) -> bool {
    let host = host.trim().trim_start_matches('[').trim_end_matches(']').to_ascii_lowercase();
    if host == "localhost" {
        return true;
    }
    host.parse::<IpAddr>().map(|ip| ip.is_loopback()).unwrap_or(false)
}

/// Whether `raw` parses as a URL whose host is loopback.
pub fn is_loopback_url(raw: &str) -> bool {
    Url::parse(raw.trim())
        .ok()
        .and_then(|u| u.host_str().map(is_loopback_host))
        .unwrap_or(false)
}

/// Accept http(s) URLs; plain http only for loopback hosts. Trailing slashes are dropped.
pub fn validate_server_url(raw: &str) -> Result<String> {
    let raw = raw.trim();
    let url = Url::parse(raw)
        .map_err(|e| SentraError::InvalidInput(format!("invalid server URL: {}", e)))?;
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| SentraError::InvalidInput("invalid server URL host".to_string()))?;

    match url.scheme() {
        "https" => {}
        "http" if is_loopback_host(host) => {}
        "http" => {
            return Err(SentraError::InvalidInput(
                "insecure connection: HTTP is only allowed for localhost connections".to_string(),
            ))
        }
        other => {
            return Err(SentraError::InvalidInput(format!(
                "invalid server URL scheme: {}",
                other
            )))
        }
    }
    Ok(raw.trim_end_matches('/').to_string())
}

/// Resolve the coordinator URL.
///
/// Order: `SENTRA_SERVER_URL`, the saved config, `http://127.0.0.1:$PORT`,
/// then the hosted default. A saved loopback URL is dropped from `config`;
/// the returned flag tells the caller to persist that change.
pub fn resolve_server_url(
    env: impl Fn(&str) -> Option<String>,
    config: Option<&mut ClientConfig>,
) -> Result<(String, bool)> {
    if let Some(v) = env("SENTRA_SERVER_URL").filter(|v| !v.trim().is_empty()) {
        return Ok((validate_server_url(&v)?, false));
    }

    let mut dirty = false;
    if let Some(cfg) = config {
        if let Some(saved) = cfg.server_url.clone().filter(|s| !s.trim().is_empty()) {
            if !is_loopback_url(&saved) {
                return Ok((validate_server_url(&saved)?, false));
            }
            cfg.server_url = None;
            dirty = true;
        }
    }

    if let Some(port) = env("PORT").map(|p| p.trim().to_string()).filter(|p| !p.is_empty()) {
        return Ok((format!("http://127.0.0.1:{}", port), dirty));
    }

    Ok((DEFAULT_HOSTED_SERVER_URL.to_string(), dirty))
}

/// [`resolve_server_url`] against the process environment and the config file.
pub fn server_url() -> Result<String> {
    let path = ClientConfig::default_path()?;
    let mut cfg = ClientConfig::load(&path)?;
    let (url, dirty) = resolve_server_url(|k| std::env::var(k).ok(), cfg.as_mut())?;
    if dirty {
        if let Some(cfg) = &cfg {
            cfg.save(&path)?;
        }
    }
    Ok(url)
}
