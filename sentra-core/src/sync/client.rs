//! HTTP client for the Sentra coordinator.

use crate::crypto::VaultKeyEnvelope;
use crate::keys::{DeviceIdentity, EnvelopeRemote};
use crate::models::{
    CommitInfo, ExportFile, ProjectInfo, PushResponse, RegisterMachineRequest, UserInfo,
};
use crate::protocol::HEADER_IDEMPOTENCY_KEY;
use crate::push::PreparedPush;
use crate::{Result, SentraError};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

const REGISTER_TIMEOUT: Duration = Duration::from_secs(10);
const PUSH_TIMEOUT: Duration = Duration::from_secs(20);
const LIST_TIMEOUT: Duration = Duration::from_secs(30);
const EXPORT_TIMEOUT: Duration = Duration::from_secs(30);
const VAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// Attempts per push request while the server answers 429.
pub const MAX_PUSH_ATTEMPTS: usize = 5;
const DEFAULT_RETRY_AFTER_SECS: u64 = 2;

/// `Retry-After` in whole seconds, defaulting to two.
pub fn retry_after_secs(header: Option<&str>) -> u64 {
    header
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}

/// Authenticated client for one user on one machine.
pub struct SentraClient {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
    machine_id: String,
}

impl SentraClient {
    pub fn new(base_url: &str, access_token: &str, machine_id: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("sentra/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            access_token: access_token.trim().to_string(),
            machine_id: machine_id.trim().to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str, timeout: Duration) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.access_token)
            .timeout(timeout)
    }

    fn signed(
        &self,
        identity: &DeviceIdentity,
        path: &str,
        body: Vec<u8>,
        timeout: Duration,
    ) -> RequestBuilder {
        let headers = identity.sign_request("POST", path, &self.machine_id, &body);
        let mut req = self
            .request(Method::POST, path, timeout)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        for (name, value) in headers.pairs() {
            req = req.header(name, value);
        }
        req.body(body)
    }

    /// Register this machine and its device key. Safe to repeat.
    pub async fn register_machine(
        &self,
        identity: &DeviceIdentity,
        machine_name: &str,
    ) -> Result<()> {
        let payload = RegisterMachineRequest {
            machine_id: self.machine_id.clone(),
            machine_name: machine_name.to_string(),
            device_pub_key: identity.public_key_b64(),
            device_key_type: Some(crate::keys::device::DEVICE_KEY_TYPE.to_string()),
        };
        let body = serde_json::to_vec(&payload)?;
        let resp = self
            .signed(identity, "/machines/register", body, REGISTER_TIMEOUT)
            .send()
            .await?;
        check_status(resp).await?;
        debug!("machine {} registered", self.machine_id);
        Ok(())
    }

    /// Send one push request, retrying while rate limited.
    pub async fn push(
        &self,
        identity: &DeviceIdentity,
        prepared: &PreparedPush,
    ) -> Result<PushResponse> {
        let body = serde_json::to_vec(&prepared.request)?;

        for attempt in 1..=MAX_PUSH_ATTEMPTS {
            let resp = self
                .signed(identity, "/push", body.clone(), PUSH_TIMEOUT)
                .header(HEADER_IDEMPOTENCY_KEY, &prepared.idempotency_key)
                .send()
                .await?;

            if resp.status() == StatusCode::TOO_MANY_REQUESTS {
                let wait = retry_after_secs(
                    resp.headers()
                        .get(reqwest::header::RETRY_AFTER)
                        .and_then(|v| v.to_str().ok()),
                );
                warn!(
                    "push for {} rate limited (attempt {}/{}), retrying in {}s",
                    prepared.root, attempt, MAX_PUSH_ATTEMPTS, wait
                );
                if attempt < MAX_PUSH_ATTEMPTS {
                    tokio::time::sleep(Duration::from_secs(wait)).await;
                }
                continue;
            }

            return json_body(check_status(resp).await?).await;
        }
        Err(SentraError::RateLimited)
    }

    pub async fn projects(&self) -> Result<Vec<ProjectInfo>> {
        self.get_json("/projects", &[], LIST_TIMEOUT).await
    }

    pub async fn commits(&self, root: &str) -> Result<Vec<CommitInfo>> {
        self.get_json("/commits", &[("root", root.trim())], LIST_TIMEOUT)
            .await
    }

    /// Files of `root` as of commit `at` (latest when `None`), sorted by path.
    pub async fn export(&self, root: &str, at: Option<&str>) -> Result<Vec<ExportFile>> {
        let mut query = vec![("root", root.trim())];
        if let Some(at) = at.map(str::trim).filter(|a| !a.is_empty()) {
            query.push(("at", at));
        }
        let mut files: Vec<ExportFile> = self.get_json("/export", &query, EXPORT_TIMEOUT).await?;
        files.sort_by(|a, b| a.file_path.trim().cmp(b.file_path.trim()));
        Ok(files)
    }

    pub async fn users_me(&self) -> Result<UserInfo> {
        self.get_json("/users/me", &[], LIST_TIMEOUT).await
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<T> {
        let resp = self
            .request(Method::GET, path, timeout)
            .query(query)
            .send()
            .await?;
        json_body(check_status(resp).await?).await
    }
}

#[async_trait]
impl EnvelopeRemote for SentraClient {
    async fn fetch_envelope(&self) -> Result<Option<VaultKeyEnvelope>> {
        let resp = self
            .request(Method::GET, "/vault/key", VAULT_TIMEOUT)
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(json_body(check_status(resp).await?).await?))
    }

    async fn put_envelope(&self, envelope: &VaultKeyEnvelope) -> Result<()> {
        let resp = self
            .request(Method::PUT, "/vault/key", VAULT_TIMEOUT)
            .json(envelope)
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(SentraError::NotConfigured(
                "server does not support portable vault keys".to_string(),
            ));
        }
        check_status(resp).await?;
        Ok(())
    }
}

/// Turn a non-2xx response into an error carrying the server's message.
async fn check_status(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message = error_message(&body);
    match status {
        StatusCode::UPGRADE_REQUIRED => Err(SentraError::UpgradeRequired(message)),
        StatusCode::UNAUTHORIZED => {
            debug!("server rejected credentials: {}", message);
            Err(SentraError::Http {
                status: status.as_u16(),
                body: format!("{} (try: sentra login)", message),
            })
        }
        _ => Err(SentraError::Http {
            status: status.as_u16(),
            body: message,
        }),
    }
}

/// `{"error": "..."}` bodies collapse to their message; anything else to one line.
pub fn error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(msg) = value.get("error").and_then(|v| v.as_str()) {
            return msg.to_string();
        }
    }
    body.split_whitespace().collect::<Vec<_>>().join(" ")
}

async fn json_body<T: DeserializeOwned>(resp: Response) -> Result<T> {
    let bytes = resp.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_after_parsing() {
        assert_eq!(retry_after_secs(Some("7")), 7);
        assert_eq!(retry_after_secs(Some(" 1 ")), 1);
        assert_eq!(retry_after_secs(Some("0")), 2);
        assert_eq!(retry_after_secs(Some("soon")), 2);
        assert_eq!(retry_after_secs(None), 2);
    }

    #[test]
    fn test_error_message() {
        assert_eq!(error_message(r#"{"error":"too many machines"}"#), "too many machines");
        assert_eq!(
            error_message("Please update Sentra CLI\n(requires nonce-signed requests)."),
            "Please update Sentra CLI (requires nonce-signed requests)."
        );
    }

    #[test]
    fn test_base_url_trimmed() {
        let client = SentraClient::new("http://127.0.0.1:8080/", "t", "m").unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:8080");
    }
}
