//! Sync command - whole-tree reconciliation across every backend.

use std::io::Write;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Args;
use fansync_backends::builtin_registry;
use fansync_core::config::Config;
use fansync_core::domain::ProgressFn;
use fansync_sync::manager::SyncManager;
use tracing::info;

#[derive(Debug, Args)]
pub struct SyncCommand {
    /// Pull from the backends instead of pushing local state
    #[arg(long)]
    pub pull: bool,
}

/// Prints one line per item, redrawing the percentage in place.
fn console_progress() -> ProgressFn {
    Arc::new(|backend, item, value| {
        let percent = (value * 100.0).round() as u32;
        if value >= 1.0 {
            println!("\r[{backend}] {item} 100%");
        } else {
            print!("\r[{backend}] {item} {percent:>3}%");
            let _ = std::io::stdout().flush();
        }
    })
}

impl SyncCommand {
    pub async fn execute(&self, config: Config) -> Result<()> {
        if config.enabled_watches().next().is_none() {
            bail!(
                "No enabled watches configured; edit {}",
                Config::default_path().display()
            );
        }

        let registry = Arc::new(builtin_registry());
        info!(pull = self.pull, "starting full sync");
        let manager = SyncManager::new(Arc::new(config), registry, console_progress());
        manager.full_sync(self.pull).await?;

        println!("Full sync complete");
        Ok(())
    }
}
