//! Token-file authorization for the cloud backends.
//!
//! Both cloud backends use the same code-grant shape: the user opens the
//! provider's authorize URL in a browser, pastes the resulting code back,
//! and the code is exchanged at the token endpoint for a long-lived access
//! token. The token is persisted as a small JSON record next to the config;
//! `init()` on a backend only ever reads that file, it never talks to the
//! authorize endpoint itself.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Persisted access credential for one backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Bearer token presented on every API call.
    pub access_token: String,
    /// Provider-side account identifier, when the token endpoint returns one.
    #[serde(default)]
    pub account_id: Option<String>,
    /// When the code exchange happened.
    pub obtained_at: DateTime<Utc>,
}

/// Reads and writes one backend's token file.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the stored token. A missing file is `Ok(None)`; an unreadable
    /// or malformed file is an error.
    pub fn load(&self) -> Result<Option<TokenRecord>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("Failed to read token file: {}", self.path.display())
                })
            }
        };
        let record: TokenRecord = serde_json::from_str(&content)
            .with_context(|| format!("Malformed token file: {}", self.path.display()))?;
        Ok(Some(record))
    }

    /// Writes the token record, creating parent directories as needed.
    pub fn save(&self, record: &TokenRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create token directory: {}", parent.display())
            })?;
        }
        let json = serde_json::to_string_pretty(record)?;
        let mut file = std::fs::File::create(&self.path)
            .with_context(|| format!("Failed to write token file: {}", self.path.display()))?;
        file.write_all(json.as_bytes())?;
        debug!(path = %self.path.display(), "Token record saved");
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    account_id: Option<String>,
}

/// One backend's authorize/token endpoint pair.
pub struct AuthFlow {
    base_url: String,
    app_key: String,
    app_secret: String,
    store: TokenStore,
}

impl AuthFlow {
    pub fn new(
        base_url: impl Into<String>,
        app_key: impl Into<String>,
        app_secret: impl Into<String>,
        store: TokenStore,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            app_key: app_key.into(),
            app_secret: app_secret.into(),
            store,
        }
    }

    /// URL the user must open in a browser to obtain an authorization code.
    pub fn authorize_url(&self) -> String {
        format!(
            "{}/oauth/authorize?response_type=code&client_id={}",
            self.base_url.trim_end_matches('/'),
            self.app_key
        )
    }

    /// Exchanges a pasted authorization code for an access token and
    /// persists it.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenRecord> {
        let url = format!("{}/oauth/token", self.base_url.trim_end_matches('/'));
        let response = Client::new()
            .post(&url)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code.trim()),
                ("client_id", self.app_key.as_str()),
                ("client_secret", self.app_secret.as_str()),
            ])
            .send()
            .await
            .context("Failed to reach token endpoint")?
            .error_for_status()
            .context("Token endpoint rejected the authorization code")?;

        let token: TokenResponse = response
            .json()
            .await
            .context("Failed to parse token response")?;

        let record = TokenRecord {
            access_token: token.access_token,
            account_id: token.account_id,
            obtained_at: Utc::now(),
        };
        self.store.save(&record)?;
        info!(path = %self.store.path().display(), "Authorization complete");
        Ok(record)
    }
}
