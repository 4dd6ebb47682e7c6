//! Push ingestion behind the device-signature guard.

use super::raw_json;
use crate::error::ApiError;
use crate::schema;
use crate::server::AppState;
use crate::storage::{IdempotencyRecord, IdempotencyStatus, IdempotencyStore, StoreError};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use axum::Extension;
use sentra_core::models::UserInfo;
use sentra_core::protocol::{validate, HEADER_IDEMPOTENCY_KEY};
use std::time::Duration;
use tracing::{debug, info, warn};

const IDEMPOTENCY_SCOPE: &str = "push";
const IDEMPOTENCY_TTL: Duration = Duration::from_secs(24 * 60 * 60);

enum Claim {
    Proceed,
    Replay(String),
    InUse,
}

/// Claim an idempotency key. Storage failures let the push through.
fn claim(idem: &dyn IdempotencyStore, user_id: &str, key: &str) -> Claim {
    match idem.create(user_id, IDEMPOTENCY_SCOPE, key, IDEMPOTENCY_TTL) {
        Ok(true) => Claim::Proceed,
        Err(StoreError::NotConfigured) => Claim::Proceed,
        Err(e) => {
            warn!("idempotency create failed user={} key={}: {}", user_id, key, e);
            Claim::Proceed
        }
        Ok(false) => match idem.get(user_id, IDEMPOTENCY_SCOPE, key) {
            Err(e) => {
                warn!("idempotency get failed user={} key={}: {}", user_id, key, e);
                Claim::Proceed
            }
            Ok(Some(IdempotencyRecord {
                status: IdempotencyStatus::Done,
                response_json: Some(json),
            })) if !json.is_empty() => Claim::Replay(json),
            Ok(_) => Claim::InUse,
        },
    }
}

pub async fn push(
    State(state): State<AppState>,
    Extension(user): Extension<UserInfo>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request = schema::validate_push(&body).map_err(|e| {
        warn!("push payload rejected user={}: {}", user.id, e);
        ApiError::bad_request("invalid push payload")
    })?;

    let idem = state.stores.idempotency.as_ref();
    let idem_key = headers
        .get(HEADER_IDEMPOTENCY_KEY)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty());

    if let Some(key) = idem_key {
        validate::idempotency_key(key)
            .map_err(|_| ApiError::bad_request("invalid idempotency key"))?;
        match claim(idem, &user.id, key) {
            Claim::Proceed => {}
            Claim::Replay(json) => {
                debug!("replaying push response for key {}", key);
                return Ok(raw_json(json));
            }
            Claim::InUse => {
                return Err(ApiError::Conflict("idempotency key already used".to_string()));
            }
        }
    }

    let response = match state.stores.pushes.push(&user.id, &request) {
        Ok(response) => response,
        Err(e) => {
            if let Some(key) = idem_key {
                if let Err(del) = idem.delete(&user.id, IDEMPOTENCY_SCOPE, key) {
                    debug!("idempotency release failed: {}", del);
                }
            }
            return Err(ApiError::from_store(e, "push failed"));
        }
    };

    let json = serde_json::to_string(&response).map_err(|e| {
        warn!("push response encode failed: {}", e);
        ApiError::Internal("push failed".to_string())
    })?;
    if let Some(key) = idem_key {
        if let Err(e) = idem.set_done(&user.id, IDEMPOTENCY_SCOPE, key, &json) {
            debug!("idempotency finalize failed: {}", e);
        }
    }

    info!(
        "push user={} root={} commit={} files={} deduplicated={}",
        user.id, response.project_root, response.commit_id, response.files, response.deduplicated
    );
    Ok(raw_json(json))
}
