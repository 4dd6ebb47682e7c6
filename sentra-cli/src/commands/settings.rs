use crate::context::Context;
use crate::{ConfigCommand, StorageCommand};
use anyhow::{bail, Result};
use clap::Args;
use sentra_core::config::{is_loopback_url, validate_server_url, StorageMode};
use sentra_core::storage::{StorageConfig, StorageProvider};

#[derive(Args)]
pub struct StorageArgs {
    /// s3, r2, minio or custom
    #[arg(long)]
    pub provider: String,
    #[arg(long)]
    pub bucket: String,
    /// Host or URL of the S3 endpoint
    #[arg(long)]
    pub endpoint: String,
    #[arg(long)]
    pub region: Option<String>,
    #[arg(long)]
    pub access_key_id: String,
    /// Prompted for when omitted
    #[arg(long, env = "SENTRA_S3_SECRET_ACCESS_KEY", hide_env_values = true)]
    pub secret_access_key: Option<String>,
    /// Talk plain HTTP to the endpoint
    #[arg(long)]
    pub no_ssl: bool,
}

pub fn config(ctx: &Context, action: ConfigCommand) -> Result<()> {
    let mut cfg = ctx.config()?;
    match action {
        ConfigCommand::Show => {
            println!("Machine id:   {}", cfg.machine_id);
            println!("User id:      {}", cfg.user_id.as_deref().unwrap_or("-"));
            println!("Server URL:   {}", ctx.server_url()?);
            println!("Storage mode: {}", cfg.storage_mode.as_str());
            println!("Scan root:    {}", ctx.store.scan_root()?.display());
        }
        ConfigCommand::ServerUrl { url } => {
            let url = validate_server_url(&url)?;
            if is_loopback_url(&url) {
                println!(
                    "Local servers are not saved; set SENTRA_SERVER_URL={} or PORT instead",
                    url
                );
                return Ok(());
            }
            cfg.server_url = Some(url.clone());
            ctx.save_config(&cfg)?;
            println!("✔ server URL set to {}", url);
        }
        ConfigCommand::StorageMode { mode } => {
            let mode: StorageMode = mode.parse()?;
            if mode == StorageMode::Byos && ctx.blob_store()?.is_none() {
                println!("No bucket configured yet (run: sentra storage set)");
            }
            cfg.storage_mode = mode;
            ctx.save_config(&cfg)?;
            println!("✔ storage mode set to {}", mode.as_str());
        }
        ConfigCommand::ScanRoot { path } => {
            let path = std::path::absolute(&path)?;
            if !path.is_dir() {
                bail!("{} is not a directory", path.display());
            }
            ctx.store.set_scan_root(&path)?;
            println!("✔ scan root set to {}", path.display());
        }
    }
    Ok(())
}

fn set_storage_mode(ctx: &Context, mode: StorageMode) -> Result<()> {
    let mut cfg = ctx.config()?;
    if cfg.storage_mode != mode {
        cfg.storage_mode = mode;
        ctx.save_config(&cfg)?;
    }
    Ok(())
}

pub fn storage(ctx: &Context, action: StorageCommand) -> Result<()> {
    let path = StorageConfig::default_path()?;
    match action {
        StorageCommand::Set(args) => {
            let provider: StorageProvider = args.provider.parse()?;
            let mut cfg = StorageConfig::new(provider, &args.bucket, &args.endpoint);
            cfg.region = args.region.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());
            cfg.use_ssl = !args.no_ssl;
            cfg.access_key_id = Some(args.access_key_id.trim().to_string());

            let secret = match args.secret_access_key.filter(|s| !s.trim().is_empty()) {
                Some(s) => s,
                None => rpassword::prompt_password("Secret access key: ")?,
            };
            if secret.trim().is_empty() {
                bail!("secret access key cannot be empty");
            }
            cfg.set_secret(ctx.secrets(), secret.trim())?;
            cfg.save(&path)?;
            set_storage_mode(ctx, StorageMode::Byos)?;
            println!(
                "✔ storage set to {} ({}); storage mode is byos",
                cfg.bucket,
                cfg.endpoint_url()
            );
        }
        StorageCommand::Show => match StorageConfig::load(&path)? {
            Some(cfg) => {
                println!("Provider:      {}", cfg.provider.as_str());
                println!("Bucket:        {}", cfg.bucket);
                println!("Endpoint:      {}", cfg.endpoint_url());
                println!("Region:        {}", cfg.region.as_deref().unwrap_or("-"));
                println!("Access key id: {}", cfg.access_key_id.as_deref().unwrap_or("-"));
                println!(
                    "Secret:        {}",
                    if cfg.secret_ref.is_some() { "stored in credential store" } else { "missing" }
                );
            }
            None => println!("No storage configured"),
        },
        StorageCommand::Clear => {
            if StorageConfig::delete(&path, ctx.secrets())? {
                println!("✔ storage configuration removed");
            } else {
                println!("No storage configured");
            }
            set_storage_mode(ctx, StorageMode::Hosted)?;
        }
    }
    Ok(())
}
