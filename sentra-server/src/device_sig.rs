//! Device-signature verification and replay protection.

use crate::error::ApiError;
use crate::server::AppState;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use sentra_core::models::UserInfo;
use sentra_core::protocol::{
    self, validate, DeviceAuthError, HEADER_MACHINE_ID, HEADER_NONCE, HEADER_SIGNATURE,
    HEADER_TIMESTAMP, NONCE_TTL_SECS,
};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Largest signed body the middleware will buffer.
pub const MAX_SIGNED_BODY: usize = 12 << 20;

/// Remembers nonces so a signed request cannot be replayed.
pub trait NonceCache: Send + Sync {
    /// Record `key` and return true if it was not seen within the TTL.
    fn check_and_store(&self, key: &str, now: Instant) -> bool;
}

/// Process-local nonce cache, swept on every access.
pub struct InMemoryNonceCache {
    seen: Mutex<HashMap<String, Instant>>,
    ttl: Duration,
}

impl InMemoryNonceCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
            ttl,
        }
    }
}

impl Default for InMemoryNonceCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(NONCE_TTL_SECS))
    }
}

impl NonceCache for InMemoryNonceCache {
    fn check_and_store(&self, key: &str, now: Instant) -> bool {
        let Ok(mut seen) = self.seen.lock() else {
            return false;
        };
        seen.retain(|_, at| now.saturating_duration_since(*at) < self.ttl);
        if seen.contains_key(key) {
            return false;
        }
        seen.insert(key.to_string(), now);
        true
    }
}

/// Signature headers that passed the cheap checks.
#[derive(Debug, Clone)]
pub struct DeviceHeaders {
    pub machine_id: String,
    pub timestamp: i64,
    pub nonce: String,
    pub signature: String,
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .unwrap_or("")
}

impl DeviceHeaders {
    /// Presence, machine id shape, timestamp window and nonce, in that order.
    pub fn parse(headers: &HeaderMap, now: i64) -> Result<Self, ApiError> {
        let machine_id = header(headers, HEADER_MACHINE_ID);
        let timestamp = header(headers, HEADER_TIMESTAMP);
        let signature = header(headers, HEADER_SIGNATURE);
        if machine_id.is_empty() || timestamp.is_empty() || signature.is_empty() {
            return Err(ApiError::Unauthorized);
        }
        if validate::machine_id(machine_id).is_err() {
            return Err(ApiError::Unauthorized);
        }
        let timestamp = protocol::check_timestamp(timestamp, now).map_err(|e| {
            debug!("device signature rejected: {}", e);
            ApiError::Unauthorized
        })?;

        let nonce = header(headers, HEADER_NONCE);
        if nonce.is_empty() {
            return Err(ApiError::UpgradeRequired);
        }

        Ok(Self {
            machine_id: machine_id.to_string(),
            timestamp,
            nonce: nonce.to_string(),
            signature: signature.to_string(),
        })
    }

    /// Verify the signature with `public_key`, then burn the nonce.
    pub fn verify(
        &self,
        nonces: &dyn NonceCache,
        user_id: &str,
        public_key: &str,
        method: &str,
        path: &str,
        body: &[u8],
    ) -> Result<(), ApiError> {
        protocol::verify_signature(
            public_key,
            self.timestamp,
            method,
            path,
            &self.machine_id,
            body,
            &self.signature,
        )
        .map_err(|e| {
            debug!("device signature rejected for {}: {}", self.machine_id, e);
            ApiError::Unauthorized
        })?;

        let key = protocol::replay_key(user_id, &self.machine_id, &self.nonce);
        if !nonces.check_and_store(&key, Instant::now()) {
            warn!(
                "{} for user {} machine {}",
                DeviceAuthError::NonceReused,
                user_id,
                self.machine_id
            );
            return Err(ApiError::Unauthorized);
        }
        Ok(())
    }
}

/// Require a valid device signature from a registered machine of the caller.
///
/// The buffered body is handed on unchanged so handlers parse exactly the
/// bytes that were signed.
pub async fn require_device_signature(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let user_id = request
        .extensions()
        .get::<UserInfo>()
        .map(|u| u.id.trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or(ApiError::Unauthorized)?;

    let device = DeviceHeaders::parse(request.headers(), chrono::Utc::now().timestamp())?;

    let public_key = match state.stores.machines.device_pub_key(&user_id, &device.machine_id) {
        Ok(Some(key)) => key,
        Ok(None) => {
            debug!("no device key for user {} machine {}", user_id, device.machine_id);
            return Err(ApiError::Unauthorized);
        }
        Err(crate::storage::StoreError::NotConfigured) => {
            return Err(ApiError::Unavailable("db not configured".to_string()))
        }
        Err(e) => {
            warn!("device key lookup failed: {}", e);
            return Err(ApiError::Unauthorized);
        }
    };

    let method = request.method().as_str().to_string();
    let path = request.uri().path().to_string();
    let (parts, body) = request.into_parts();
    let body_bytes = axum::body::to_bytes(body, MAX_SIGNED_BODY)
        .await
        .map_err(|_| ApiError::PayloadTooLarge)?;

    device.verify(
        state.nonces.as_ref(),
        &user_id,
        &public_key,
        &method,
        &path,
        &body_bytes,
    )?;

    let request = Request::from_parts(parts, Body::from(body_bytes));
    Ok(next.run(request).await)
}
