mod commands;
mod context;

use anyhow::Result;
use clap::{Parser, Subcommand};
use context::Context;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Sentra - version and sync your .env files across machines
#[derive(Parser)]
#[command(name = "sentra", version)]
#[command(about = "Stage, commit and sync encrypted .env files", long_about = None)]
struct Cli {
    /// Print debug logs
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stage .env files (`.` stages every file under the scan root)
    Add {
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Unstage a file
    Rm {
        /// Only remove from the staging set; files on disk are never touched
        #[arg(long)]
        cached: bool,
        path: String,
    },

    /// List .env files found under the scan root
    Scan,

    /// Show staged files, local changes and pending commits
    Status,

    /// Record the staged files as a commit
    Commit {
        #[arg(short, long)]
        message: String,
    },

    /// List or manage local commits (pending by default)
    Log {
        #[command(subcommand)]
        action: Option<LogCommand>,
    },

    /// Encrypt and push pending commits
    Push,

    /// Download the latest files of every project into the scan root
    Sync,

    /// Decrypt a project into ./sentra-export/<project>
    Export {
        project: String,
        /// Server commit id or local commit id
        #[arg(long)]
        at: Option<String>,
    },

    /// Server-side commit history of a project
    History { project: String },

    /// Projects known to the server
    Projects,

    /// Manage this machine's registration
    Machines {
        #[command(subcommand)]
        action: MachinesCommand,
    },

    /// Manage the portable vault key
    Vault {
        #[command(subcommand)]
        action: VaultCommand,
    },

    /// Save an access token for this machine
    Login {
        /// Access token (prompted for when omitted)
        #[arg(long, env = "SENTRA_ACCESS_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },

    /// Remove the saved session
    Logout,

    /// Show the logged-in user and this machine
    Whoami,

    /// Client settings
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },

    /// Bring-your-own S3-compatible storage
    Storage {
        #[command(subcommand)]
        action: StorageCommand,
    },
}

#[derive(Subcommand)]
pub enum LogCommand {
    /// Every commit
    All,
    /// Commits not yet pushed
    Pending,
    /// Commits already pushed
    Pushed,
    /// Delete a commit
    Rm { selector: String },
    /// Delete every local commit
    Clear,
    /// Drop missing files from a commit (or `all` pending commits)
    Prune { selector: String },
    /// List pending commits that reference missing files
    Verify,
}

#[derive(Subcommand)]
pub enum MachinesCommand {
    /// Register this machine and its device key
    Register,
}

#[derive(Subcommand)]
pub enum VaultCommand {
    /// Create the vault key on the first machine
    Init,
    /// Unwrap the server-held vault key with the passphrase
    Unlock,
    /// Drop the locally cached vault key
    Forget,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Print the current settings
    Show,
    /// Set the coordinator URL
    ServerUrl { url: String },
    /// Where blobs are stored on push: hosted or byos
    StorageMode { mode: String },
    /// Folder containing your repositories
    ScanRoot { path: std::path::PathBuf },
}

#[derive(Subcommand)]
pub enum StorageCommand {
    /// Configure a bucket
    Set(commands::settings::StorageArgs),
    /// Print the bucket configuration
    Show,
    /// Remove the bucket configuration and its secret
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let ctx = Context::open()?;

    match cli.command {
        Commands::Add { paths } => commands::local::add(&ctx, &paths),
        Commands::Rm { cached, path } => commands::local::rm(&ctx, cached, &path),
        Commands::Scan => commands::local::scan(&ctx),
        Commands::Status => commands::local::status(&ctx),
        Commands::Commit { message } => commands::local::commit(&ctx, &message),
        Commands::Log { action } => commands::local::log(&ctx, action),
        Commands::Push => commands::remote::push(&ctx).await,
        Commands::Sync => commands::remote::sync(&ctx).await,
        Commands::Export { project, at } => {
            commands::remote::export(&ctx, &project, at.as_deref()).await
        }
        Commands::History { project } => commands::remote::history(&ctx, &project).await,
        Commands::Projects => commands::remote::projects(&ctx).await,
        Commands::Machines { action } => match action {
            MachinesCommand::Register => commands::remote::register_machine(&ctx).await,
        },
        Commands::Vault { action } => commands::account::vault(&ctx, action).await,
        Commands::Login { token } => commands::account::login(&ctx, token).await,
        Commands::Logout => commands::account::logout(&ctx),
        Commands::Whoami => commands::account::whoami(&ctx).await,
        Commands::Config { action } => commands::settings::config(&ctx, action),
        Commands::Storage { action } => commands::settings::storage(&ctx, action),
    }
}
