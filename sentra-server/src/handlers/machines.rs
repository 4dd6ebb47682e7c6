//! Machine registration.

use crate::device_sig::DeviceHeaders;
use crate::error::ApiError;
use crate::server::AppState;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Uri};
use axum::Extension;
use sentra_core::keys::device::DEVICE_KEY_TYPE;
use sentra_core::models::{RegisterMachineRequest, UserInfo};
use sentra_core::protocol::{validate, HEADER_MACHINE_ID};
use tracing::info;

pub const MAX_REGISTER_BODY: usize = 1 << 20;

/// Register a machine and its device key.
///
/// The request is signed with the key being registered, which proves the
/// caller holds it. The store refuses a machine that already has a different key.
pub async fn register(
    State(state): State<AppState>,
    Extension(user): Extension<UserInfo>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<&'static str, ApiError> {
    let req: RegisterMachineRequest =
        serde_json::from_slice(&body).map_err(|_| ApiError::bad_request("invalid json"))?;

    let machine_id = req.machine_id.trim();
    let machine_name = req.machine_name.trim();
    let pub_key = req.device_pub_key.trim();
    validate::machine_id(machine_id).map_err(|e| ApiError::bad_request(e.to_string()))?;
    validate::machine_name(machine_name).map_err(|e| ApiError::bad_request(e.to_string()))?;
    validate::device_pub_key(pub_key).map_err(|e| ApiError::bad_request(e.to_string()))?;

    let key_type = req
        .device_key_type
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(DEVICE_KEY_TYPE);
    if key_type != DEVICE_KEY_TYPE {
        return Err(ApiError::bad_request("unsupported device_key_type"));
    }

    let header_machine = headers
        .get(HEADER_MACHINE_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .unwrap_or("");
    if header_machine != machine_id {
        return Err(ApiError::Unauthorized);
    }
    let device = DeviceHeaders::parse(&headers, chrono::Utc::now().timestamp())?;
    device.verify(
        state.nonces.as_ref(),
        &user.id,
        pub_key,
        "POST",
        uri.path(),
        &body,
    )?;

    let machines = state.stores.machines.as_ref();
    machines
        .register(&user.id, machine_id, machine_name, pub_key)
        .map_err(|e| ApiError::from_store(e, "machine register failed"))?;

    info!("registered machine {} for user {}", machine_id, user.id);
    Ok("ok")
}
