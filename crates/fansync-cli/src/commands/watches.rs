//! Watches command - list the configured watch definitions.

use anyhow::Result;
use clap::Args;
use fansync_core::config::Config;

#[derive(Debug, Args)]
pub struct WatchesCommand {
    /// Include disabled watches
    #[arg(long)]
    pub all: bool,
}

impl WatchesCommand {
    pub fn execute(&self, config: Config) -> Result<()> {
        let mut shown = 0usize;
        for watch in &config.watches {
            if watch.disabled && !self.all {
                continue;
            }
            shown += 1;
            let state = if watch.disabled { " (disabled)" } else { "" };
            println!(
                "{} -> {} [{}]{}",
                watch.source.display(),
                watch.target,
                watch.backends.join(", "),
                state
            );
            for pattern in &watch.exclude {
                println!("    exclude {pattern}");
            }
        }

        if shown == 0 {
            println!(
                "No watches configured; edit {}",
                Config::default_path().display()
            );
        }
        Ok(())
    }
}
