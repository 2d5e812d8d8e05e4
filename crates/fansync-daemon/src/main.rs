//! fansync daemon - background synchronization service
//!
//! This binary watches the configured local trees and pushes changes to
//! the configured backends as they happen:
//! - one file watcher feeding the manager's intake queue
//! - one worker task per backend, each draining its own coalescing queue
//! - graceful shutdown on SIGTERM/SIGINT (queues drain, in-flight
//!   operations finish, new events are refused)

use std::sync::Arc;

use anyhow::{bail, Result};
use fansync_backends::builtin_registry;
use fansync_core::config::Config;
use fansync_core::domain::ProgressFn;
use fansync_sync::manager::SyncManager;
use fansync_sync::watcher::FileWatcher;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

/// Progress callback for headless operation: terminal reports are logged,
/// intermediate ones only at debug.
fn logging_progress() -> ProgressFn {
    Arc::new(|backend, item, value| {
        if value >= 1.0 {
            info!(backend, item, "Sync item finished");
        } else {
            debug!(backend, item, progress = value, "Sync progress");
        }
    })
}

/// Waits for SIGTERM or SIGINT and triggers the cancellation token.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }

    token.cancel();
}

async fn run(config: Arc<Config>, shutdown: CancellationToken) -> Result<()> {
    if config.enabled_watches().next().is_none() {
        bail!(
            "No enabled watches configured; edit {}",
            Config::default_path().display()
        );
    }

    let registry = Arc::new(builtin_registry());
    let mut manager = SyncManager::new(config.clone(), registry, logging_progress());

    let started = manager.start().await?;
    if started == 0 {
        bail!("No backend could be started; nothing to do");
    }
    info!(backends = started, "Sync engine running");

    let mut watcher = FileWatcher::start(&config, manager.intake())?;

    shutdown.cancelled().await;
    info!("Shutting down");

    // Watcher first so no new events arrive while the queues drain.
    watcher.stop();
    manager.stop().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = Config::default_path();
    let config = Arc::new(Config::load_or_default(&config_path));

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();

    info!(config_path = %config_path.display(), "fansync daemon starting (fansyncd)");

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal(signal_token).await;
    });

    let result = run(config, shutdown).await;

    match &result {
        Ok(()) => info!("fansync daemon shut down gracefully"),
        Err(err) => error!(error = %format!("{err:#}"), "fansync daemon exiting with error"),
    }

    result
}
