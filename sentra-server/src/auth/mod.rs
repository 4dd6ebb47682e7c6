//! Bearer-token authentication.
//!
//! The middleware resolves the caller into a [`UserInfo`] and stores it in the
//! request extensions for the rest of the stack.

pub mod jwks;

pub use jwks::JwksVerifier;

use crate::error::ApiError;
use crate::server::AppState;
use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use sentra_core::models::UserInfo;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("auth not configured")]
    NotConfigured,

    #[error("invalid token: {0}")]
    Invalid(String),
}

/// Turns a bearer token into the user it was issued to.
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<UserInfo, AuthError>;
}

/// Used when no identity provider is configured.
pub struct DisabledVerifier;

#[async_trait]
impl Verifier for DisabledVerifier {
    async fn verify(&self, _token: &str) -> Result<UserInfo, AuthError> {
        Err(AuthError::NotConfigured)
    }
}

/// `Bearer <token>`, exact scheme.
fn bearer_token(value: &str) -> Option<&str> {
    let token = value.trim().strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then_some(token)
}

/// Require a verified bearer token.
pub async fn require_user(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
        .map(str::to_string);

    let Some(token) = token else {
        debug!("missing bearer token for {} {}", request.method(), request.uri().path());
        return Err(ApiError::Unauthorized);
    };

    match state.verifier.verify(&token).await {
        Ok(user) => {
            request.extensions_mut().insert(user);
            Ok(next.run(request).await)
        }
        Err(AuthError::NotConfigured) => {
            warn!("auth not configured; rejecting {}", request.uri().path());
            Err(ApiError::AuthNotConfigured)
        }
        Err(e) => {
            debug!("token rejected for {}: {}", request.uri().path(), e);
            Err(ApiError::Unauthorized)
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("  Bearer  abc  "), Some("abc"));
        assert_eq!(bearer_token("bearer abc"), None);
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("Basic abc"), None);
    }
}
