//! Storage for the user's passphrase-wrapped vault key.
//!
//! The envelope is opaque here apart from its version.

use super::raw_json;
use crate::error::ApiError;
use crate::server::AppState;
use axum::body::Bytes;
use axum::extract::State;
use axum::response::Response;
use axum::Extension;
use sentra_core::models::UserInfo;
use serde::Deserialize;

pub const MAX_ENVELOPE_BODY: usize = 32 << 10;

#[derive(Deserialize)]
struct EnvelopeVersion {
    #[serde(default)]
    v: i64,
}

pub async fn get_vault_key(
    State(state): State<AppState>,
    Extension(user): Extension<UserInfo>,
) -> Result<Response, ApiError> {
    match state.stores.vault_keys.get(&user.id) {
        Ok(Some(doc)) => Ok(raw_json(doc)),
        Ok(None) => Err(ApiError::NotFound("not found".to_string())),
        Err(e) => Err(ApiError::from_store(e, "vault key get failed")),
    }
}

pub async fn put_vault_key(
    State(state): State<AppState>,
    Extension(user): Extension<UserInfo>,
    body: Bytes,
) -> Result<&'static str, ApiError> {
    let envelope: EnvelopeVersion =
        serde_json::from_slice(&body).map_err(|_| ApiError::bad_request("invalid json"))?;
    if envelope.v != 1 {
        return Err(ApiError::bad_request("invalid envelope version"));
    }
    let doc = std::str::from_utf8(&body).map_err(|_| ApiError::bad_request("invalid json"))?;

    state
        .stores
        .vault_keys
        .upsert(&user.id, doc)
        .map_err(|e| ApiError::from_store(e, "vault key save failed"))?;
    tracing::info!("stored vault key envelope for user {}", user.id);
    Ok("ok")
}
