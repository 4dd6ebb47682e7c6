//! Sentra coordinator.
//!
//! Accepts device-signed pushes of encrypted `.env` files, keeps their
//! commit history per project and serves exports back to the owner's
//! machines. Plaintext never reaches the server.

mod auth;
mod cleanup;
mod config;
mod device_sig;
mod error;
mod handlers;
mod loopback;
mod rate_limit;
mod schema;
mod server;
mod storage;

use auth::{DisabledVerifier, JwksVerifier, Verifier};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use storage::sqlite::SqliteStore;
use storage::Stores;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sentra-server", about = "Sentra sync coordinator")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "sentra-server.toml")]
    config: PathBuf,

    /// Listen address override
    #[arg(short, long)]
    listen: Option<String>,

    /// Database path override
    #[arg(short, long)]
    database: Option<PathBuf>,
}

fn open_stores(cfg: &config::ServerConfig) -> anyhow::Result<Stores> {
    match &cfg.database_path {
        Some(path) => {
            tracing::info!("Opening database {}", path.display());
            Ok(Stores::sqlite(SqliteStore::open(path, cfg.max_machines)?))
        }
        None => {
            tracing::warn!("No database configured; data routes will answer 503");
            Ok(Stores::disabled())
        }
    }
}

fn build_verifier(cfg: &config::ServerConfig) -> Arc<dyn Verifier> {
    let url = cfg.supabase_url.as_deref().unwrap_or("");
    match JwksVerifier::new(url) {
        Ok(verifier) => {
            tracing::info!("Verifying tokens issued by {}", verifier.issuer());
            Arc::new(verifier)
        }
        Err(e) => {
            tracing::warn!("Token verification disabled: {}", e);
            Arc::new(DisabledVerifier)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();

    let mut cfg = if cli.config.exists() {
        config::ServerConfig::load(&cli.config)?
    } else {
        tracing::info!("No config file found, using defaults");
        config::ServerConfig::default()
    };
    cfg.apply_process_env();

    if let Some(listen) = cli.listen {
        cfg.listen_addr = listen;
    }
    if let Some(database) = cli.database {
        cfg.database_path = Some(database);
    }

    let stores = open_stores(&cfg)?;
    cleanup::spawn_cleanup_task(stores.idempotency.clone());

    let state = server::AppState::new(stores, build_verifier(&cfg), &cfg);
    let app = server::build_router(state, &cfg);

    tracing::info!(
        "Starting Sentra coordinator on {} (loopback_only={})",
        cfg.listen_addr,
        cfg.loopback_only
    );
    let listener = tokio::net::TcpListener::bind(&cfg.listen_addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
