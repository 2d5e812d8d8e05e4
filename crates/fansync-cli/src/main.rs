//! fansync CLI - command-line interface for fansync
//!
//! Provides commands for:
//! - Running a full synchronization pass (push or pull)
//! - Authorizing the cloud backends
//! - Listing the configured watches

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use fansync_core::config::Config;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{auth::AuthCommand, sync::SyncCommand, watches::WatchesCommand};

#[derive(Debug, Parser)]
#[command(name = "fansync", version, about = "Multi-backend file synchronization")]
pub struct Cli {
    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a full synchronization pass over every configured backend
    Sync(SyncCommand),
    /// Authorize a cloud backend and store its token
    Auth(AuthCommand),
    /// List the configured watches
    Watches(WatchesCommand),
}

fn load_config(path: Option<&PathBuf>) -> Config {
    let path = path.cloned().unwrap_or_else(Config::default_path);
    Config::load_or_default(&path)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let config = load_config(cli.config.as_ref());

    match cli.command {
        Commands::Sync(cmd) => cmd.execute(config).await,
        Commands::Auth(cmd) => cmd.execute(config).await,
        Commands::Watches(cmd) => cmd.execute(config),
    }
}
