//! Coordinator error types.

use crate::storage::StoreError;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

pub const UPGRADE_REQUIRED_MESSAGE: &str =
    "Please update Sentra CLI (requires nonce-signed requests).";

/// Handler and middleware errors mapped to HTTP status codes.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("auth not configured")]
    AuthNotConfigured,

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("payload too large")]
    PayloadTooLarge,

    #[error("Please update Sentra CLI (requires nonce-signed requests).")]
    UpgradeRequired,

    #[error("rate limit exceeded; retry later")]
    RateLimited { retry_after_secs: u64 },

    #[error("too many machines")]
    TooManyMachines,

    #[error("{0}")]
    Unavailable(String),

    /// The message is what the client sees; details are logged where the error is raised.
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    /// Map a repository error, logging database details under `context`.
    pub fn from_store(err: StoreError, context: &str) -> Self {
        match err {
            StoreError::NotConfigured => Self::Unavailable("db not configured".to_string()),
            StoreError::TooManyMachines => Self::TooManyMachines,
            StoreError::KeyMismatch => Self::Conflict("device key mismatch".to_string()),
            StoreError::NotFound(what) => Self::NotFound(format!("{} not found", what)),
            StoreError::Database(detail) => {
                tracing::error!("{}: {}", context, detail);
                Self::Internal(context.to_string())
            }
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::AuthNotConfigured | Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::UpgradeRequired => StatusCode::UPGRADE_REQUIRED,
            Self::RateLimited { .. } | Self::TooManyMachines => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();
        match self {
            // Older clients print this body verbatim.
            Self::UpgradeRequired => (status, UPGRADE_REQUIRED_MESSAGE).into_response(),
            Self::RateLimited { retry_after_secs } => {
                let body = serde_json::json!({ "error": message });
                (
                    status,
                    [(header::RETRY_AFTER, retry_after_secs.to_string())],
                    axum::Json(body),
                )
                    .into_response()
            }
            _ => {
                let body = serde_json::json!({ "error": message });
                (status, axum::Json(body)).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_map_to_statuses() {
        assert_eq!(
            ApiError::from_store(StoreError::NotConfigured, "push failed").status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from_store(StoreError::TooManyMachines, "register").status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::from_store(StoreError::KeyMismatch, "register").status(),
            StatusCode::CONFLICT
        );
        let err =
            ApiError::from_store(StoreError::Database("disk I/O error".into()), "push failed");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "push failed");
    }

    #[test]
    fn test_rate_limited_sets_retry_after() {
        let resp = ApiError::RateLimited { retry_after_secs: 3 }.into_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.headers()[header::RETRY_AFTER], "3");
    }
}
