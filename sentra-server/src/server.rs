//! Axum router setup.

use crate::auth::{require_user, Verifier};
use crate::config::ServerConfig;
use crate::device_sig::{require_device_signature, InMemoryNonceCache, NonceCache, MAX_SIGNED_BODY};
use crate::handlers::{self, export, machines, push, vault_key};
use crate::loopback::require_loopback;
use crate::rate_limit::{limit_pushes, limit_registrations, RateLimiter, TokenBuckets};
use crate::storage::Stores;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

/// Shared state handed to every handler and middleware.
#[derive(Clone)]
pub struct AppState {
    pub stores: Stores,
    pub verifier: Arc<dyn Verifier>,
    pub nonces: Arc<dyn NonceCache>,
    pub push_limiter: Arc<dyn RateLimiter>,
    pub register_limiter: Arc<dyn RateLimiter>,
}

impl AppState {
    pub fn new(stores: Stores, verifier: Arc<dyn Verifier>, config: &ServerConfig) -> Self {
        Self {
            stores,
            verifier,
            nonces: Arc::new(InMemoryNonceCache::default()),
            push_limiter: Arc::new(TokenBuckets::new(config.push_rpm, config.push_burst)),
            register_limiter: Arc::new(TokenBuckets::new(
                config.register_rpm,
                config.register_burst,
            )),
        }
    }
}

pub fn build_router(state: AppState, config: &ServerConfig) -> Router {
    // Route layers run last-added first: loopback, auth, rate limit, signature.
    let push = Router::new()
        .route("/push", post(push::push))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_device_signature,
        ))
        .route_layer(middleware::from_fn_with_state(state.clone(), limit_pushes))
        .route_layer(DefaultBodyLimit::max(MAX_SIGNED_BODY));

    let register = Router::new()
        .route("/machines/register", post(machines::register))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            limit_registrations,
        ))
        .route_layer(DefaultBodyLimit::max(machines::MAX_REGISTER_BODY));

    let vault = Router::new()
        .route(
            "/vault/key",
            get(vault_key::get_vault_key).put(vault_key::put_vault_key),
        )
        .route_layer(DefaultBodyLimit::max(vault_key::MAX_ENVELOPE_BODY));

    let mut data = Router::new()
        .route("/projects", get(export::projects))
        .route("/commits", get(export::commits))
        .route("/export", get(export::export))
        .merge(push)
        .merge(register)
        .merge(vault)
        .route_layer(middleware::from_fn_with_state(state.clone(), require_user));
    if config.loopback_only {
        data = data.route_layer(middleware::from_fn(require_loopback));
    }

    let account = Router::new()
        .route("/users/me", get(handlers::users_me))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_user));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(account)
        .merge(data)
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(config.max_body_size))
        .with_state(state)
}
