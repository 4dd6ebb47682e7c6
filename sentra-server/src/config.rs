//! Coordinator configuration.
//!
//! Values come from a TOML file, then the environment, then CLI flags.

use crate::storage::sqlite::DEFAULT_MAX_MACHINES;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// SQLite file. `None` starts the server without a database.
    pub database_path: Option<PathBuf>,
    /// Supabase project URL; bearer tokens are verified against its JWKS.
    pub supabase_url: Option<String>,
    /// Reject data routes from non-loopback peers.
    pub loopback_only: bool,
    pub push_rpm: u32,
    pub push_burst: f64,
    pub register_rpm: u32,
    pub register_burst: f64,
    pub max_machines: usize,
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            database_path: Some(PathBuf::from("sentra.db")),
            supabase_url: None,
            loopback_only: true,
            push_rpm: 300,
            push_burst: 60.0,
            register_rpm: 30,
            register_burst: 10.0,
            max_machines: DEFAULT_MAX_MACHINES,
            max_body_size: 12 << 20,
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Apply environment overrides. Unparseable or non-positive numbers are ignored.
    pub fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        let var = |name: &str| env(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(port) = var("PORT").and_then(|p| p.parse::<u16>().ok()) {
            self.listen_addr = format!("0.0.0.0:{}", port);
        }
        if let Some(addr) = var("SENTRA_LISTEN_ADDR") {
            self.listen_addr = addr;
        }
        if let Some(db) = env("SENTRA_DATABASE") {
            let db = db.trim();
            self.database_path = (!db.is_empty()).then(|| PathBuf::from(db));
        }
        if let Some(url) = var("SUPABASE_URL") {
            self.supabase_url = Some(url);
        }
        if let Some(v) = var("SENTRA_LOOPBACK_ONLY") {
            self.loopback_only = !(v == "0" || v.eq_ignore_ascii_case("false"));
        }
        if let Some(n) = var("SENTRA_PUSH_RPM")
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|n| *n > 0)
        {
            self.push_rpm = n;
        }
        if let Some(n) = var("SENTRA_PUSH_BURST")
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|n| *n > 0.0)
        {
            self.push_burst = n;
        }
        if let Some(n) = var("SENTRA_MAX_MACHINES")
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|n| *n > 0)
        {
            self.max_machines = n;
        }
    }

    pub fn apply_process_env(&mut self) {
        self.apply_env(|name| std::env::var(name).ok());
    }
}
