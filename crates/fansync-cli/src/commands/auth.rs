//! Auth command - authorize a cloud backend and persist its token.

use std::io::{BufRead, Write};

use anyhow::{bail, Context, Result};
use clap::Args;
use fansync_backends::auth::{AuthFlow, TokenStore};
use fansync_core::config::Config;
use tracing::info;

#[derive(Debug, Args)]
pub struct AuthCommand {
    /// Backend to authorize: chunkstore or treedrive
    pub backend: String,
}

impl AuthCommand {
    pub async fn execute(&self, config: Config) -> Result<()> {
        let flow = match self.backend.as_str() {
            "chunkstore" => {
                let settings = &config.backends.chunkstore;
                if settings.base_url.is_empty() {
                    bail!("chunkstore.base_url is not set in the config file");
                }
                AuthFlow::new(
                    &settings.base_url,
                    &settings.app_key,
                    &settings.app_secret,
                    TokenStore::new(&settings.token_file),
                )
            }
            "treedrive" => {
                let settings = &config.backends.treedrive;
                if settings.base_url.is_empty() {
                    bail!("treedrive.base_url is not set in the config file");
                }
                AuthFlow::new(
                    &settings.base_url,
                    &settings.app_key,
                    &settings.app_secret,
                    TokenStore::new(&settings.token_file),
                )
            }
            other => bail!("No authorization flow for backend '{other}'"),
        };

        println!("1. Open this URL in a browser and approve access:");
        println!();
        println!("   {}", flow.authorize_url());
        println!();
        print!("2. Paste the authorization code here: ");
        std::io::stdout().flush()?;

        let mut code = String::new();
        std::io::stdin()
            .lock()
            .read_line(&mut code)
            .context("Failed to read authorization code")?;
        if code.trim().is_empty() {
            bail!("No authorization code entered");
        }

        let record = flow.exchange_code(&code).await?;
        info!(backend = %self.backend, "token stored");
        match record.account_id {
            Some(account) => println!("Authorized account {account} for {}", self.backend),
            None => println!("Authorized {}", self.backend),
        }
        Ok(())
    }
}
