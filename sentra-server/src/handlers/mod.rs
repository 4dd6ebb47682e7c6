//! HTTP handlers. Every handler below `/health` runs behind the bearer guard
//! and finds the caller as an `Extension<UserInfo>`.

pub mod export;
pub mod machines;
pub mod push;
pub mod vault_key;

use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use sentra_core::models::UserInfo;

pub async fn health() -> &'static str {
    "ok"
}

pub async fn users_me(Extension(user): Extension<UserInfo>) -> Json<UserInfo> {
    Json(user)
}

/// A JSON body that is already serialized, sent byte for byte.
pub(crate) fn raw_json(body: String) -> Response {
    (
        [(header::CONTENT_TYPE, "application/json; charset=utf-8")],
        body,
    )
        .into_response()
}
