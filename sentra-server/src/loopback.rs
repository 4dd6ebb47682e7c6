//! Loopback-origin guard for data routes.

use crate::error::ApiError;
use axum::extract::{ConnectInfo, Request};
use axum::middleware::Next;
use axum::response::Response;
use std::net::SocketAddr;

/// Loopback check that also accepts IPv4-mapped IPv6 peers (`::ffff:127.0.0.1`)
/// from dual-stack listeners.
fn is_loopback_peer(addr: &SocketAddr) -> bool {
    addr.ip().to_canonical().is_loopback()
}

/// Reject peers that are not on a loopback address.
///
/// Requests without connection info (no `into_make_service_with_connect_info`)
/// are rejected as well.
pub async fn require_loopback(request: Request, next: Next) -> Result<Response, ApiError> {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    match peer {
        Some(addr) if is_loopback_peer(&addr) => Ok(next.run(request).await),
        Some(addr) => {
            tracing::debug!("rejecting non-loopback peer {}", addr.ip());
            Err(ApiError::Forbidden)
        }
        None => Err(ApiError::Forbidden),
    }
}
