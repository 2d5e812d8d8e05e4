//! Path-addressed object store backend with chunked uploads.
//!
//! The store speaks a small bearer-token HTTP API: single-shot content puts
//! for small files, resumable append sessions for large ones, idempotent
//! folder creation, and a cursor-paged delta listing for remote enumeration.
//! Remote objects are addressed by their full slash-separated path.

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use fansync_core::config::{ChunkStoreConfig, Config};
use fansync_core::domain::{join_target, BackendError, ProgressReporter, SyncEvent};
use fansync_core::ports::SyncBackend;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use crate::auth::TokenStore;
use crate::fswalk;
use crate::http::check;

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AccountResponse {
    email: String,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct DeltaResponse {
    entries: Vec<DeltaEntry>,
    cursor: String,
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct DeltaEntry {
    path: String,
    #[serde(default)]
    is_dir: bool,
}

// ---------------------------------------------------------------------------
// StoreClient
// ---------------------------------------------------------------------------

/// Thin authenticated HTTP client for the store API.
struct StoreClient {
    http: Client,
    base_url: String,
    token: String,
}

impl StoreClient {
    fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            http: Client::new(),
            base_url,
            token: token.into(),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        self.http.request(method, &url).bearer_auth(&self.token)
    }

    async fn account(&self) -> Result<AccountResponse> {
        let response = self
            .request(Method::GET, "/account")
            .send()
            .await
            .context("Failed to reach account endpoint")?;
        let response = check(response, "GET /account").await?;
        response
            .json()
            .await
            .context("Failed to parse account response")
    }
}

/// Remote path relative to `root`, if `remote` lives under it.
fn relative_to(root: &str, remote: &str) -> Option<String> {
    let root = root.trim_end_matches('/');
    let rest = remote.strip_prefix(root)?;
    let rest = rest.trim_start_matches('/');
    if rest.is_empty() {
        None
    } else {
        Some(rest.to_string())
    }
}

async fn read_full(file: &mut tokio::fs::File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

// ---------------------------------------------------------------------------
// ChunkStoreBackend
// ---------------------------------------------------------------------------

/// Object store backend over the chunked-upload HTTP API.
pub struct ChunkStoreBackend {
    config: Arc<Config>,
    settings: ChunkStoreConfig,
    reporter: ProgressReporter,
    client: Option<StoreClient>,
}

impl ChunkStoreBackend {
    pub fn new(config: Arc<Config>, reporter: ProgressReporter) -> Self {
        let settings = config.backends.chunkstore.clone();
        Self {
            config,
            settings,
            reporter,
            client: None,
        }
    }

    fn client(&self) -> Result<&StoreClient> {
        self.client
            .as_ref()
            .ok_or_else(|| anyhow!("chunkstore backend used before init"))
    }

    /// Uploads one local file to `remote`, reporting progress under `item`.
    ///
    /// Files under the small-file threshold go up in a single put; larger
    /// files stream fixed-size chunks through an append session and commit
    /// at the end. A failed chunk abandons the whole item.
    async fn upload_file(&self, local: &Path, remote: &str, item: &str) -> Result<()> {
        let size = tokio::fs::metadata(local)
            .await
            .with_context(|| format!("Failed to stat {}", local.display()))?
            .len();

        if size == 0 || size < self.settings.small_file_threshold {
            return self.upload_small(local, remote, item).await;
        }
        self.upload_chunked(local, remote, item, size).await
    }

    async fn upload_small(&self, local: &Path, remote: &str, item: &str) -> Result<()> {
        let client = self.client()?;
        let bytes = tokio::fs::read(local)
            .await
            .with_context(|| format!("Failed to read {}", local.display()))?;
        debug!(remote, size = bytes.len(), "Single-shot upload");

        let response = client
            .request(Method::POST, "/files/content")
            .query(&[("path", remote), ("overwrite", "true")])
            .body(bytes)
            .send()
            .await
            .context("Failed to send content put")?;
        check(response, "POST /files/content").await?;

        self.reporter.update(item, 1.0);
        Ok(())
    }

    async fn upload_chunked(&self, local: &Path, remote: &str, item: &str, size: u64) -> Result<()> {
        let client = self.client()?;
        let chunk_size = self.settings.chunk_size.max(1) as usize;
        debug!(remote, size, chunk_size, "Chunked upload");

        let mut file = tokio::fs::File::open(local)
            .await
            .with_context(|| format!("Failed to open {}", local.display()))?;
        let mut buf = vec![0u8; chunk_size];
        let mut session: Option<String> = None;
        let mut offset: u64 = 0;

        loop {
            let n = read_full(&mut file, &mut buf)
                .await
                .with_context(|| format!("Failed to read {}", local.display()))?;
            if n == 0 {
                break;
            }

            let mut request = client
                .request(Method::POST, "/files/session/append")
                .query(&[("offset", offset.to_string())]);
            if let Some(id) = &session {
                request = request.query(&[("session_id", id.as_str())]);
            }
            let response = request
                .body(buf[..n].to_vec())
                .send()
                .await
                .context("Failed to send chunk append")?;
            let response = check(response, "POST /files/session/append").await?;
            let parsed: SessionResponse = response
                .json()
                .await
                .context("Failed to parse append response")?;

            session = Some(parsed.session_id);
            offset += n as u64;
            self.reporter
                .update(item, offset.min(size) as f64 / size as f64);

            if n < chunk_size {
                break;
            }
        }

        let session_id = session
            .ok_or_else(|| BackendError::UploadSession("no chunk was accepted".to_string()))?;

        let response = client
            .request(Method::POST, "/files/session/commit")
            .query(&[
                ("session_id", session_id.as_str()),
                ("path", remote),
                ("overwrite", "true"),
            ])
            .send()
            .await
            .context("Failed to send session commit")?;
        check(response, "POST /files/session/commit").await?;
        Ok(())
    }

    /// Creates a remote folder; an already-existing folder is not an error.
    async fn create_folder(&self, remote: &str) -> Result<()> {
        let client = self.client()?;
        let response = client
            .request(Method::POST, "/folders/create")
            .query(&[("path", remote)])
            .send()
            .await
            .context("Failed to send folder create")?;
        if response.status() == StatusCode::CONFLICT {
            debug!(remote, "Folder already exists");
            return Ok(());
        }
        check(response, "POST /folders/create").await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl SyncBackend for ChunkStoreBackend {
    fn name(&self) -> &str {
        "chunkstore"
    }

    fn reporter(&self) -> &ProgressReporter {
        &self.reporter
    }

    async fn init(&mut self) -> Result<()> {
        if self.settings.base_url.is_empty() {
            return Err(BackendError::NotConfigured(
                "chunkstore.base_url is not set".to_string(),
            )
            .into());
        }

        let token = TokenStore::new(&self.settings.token_file)
            .load()?
            .ok_or_else(|| {
                BackendError::Unauthorized(
                    "no chunkstore token; run 'fansync auth chunkstore'".to_string(),
                )
            })?;

        let client = StoreClient::new(&self.settings.base_url, token.access_token);
        let account = client.account().await?;
        info!(email = %account.email, "Chunk store authorized");

        self.client = Some(client);
        Ok(())
    }

    async fn push(&mut self, event: &SyncEvent) -> Result<()> {
        if event.is_directory {
            return self.create_folder(&event.target_absolute).await;
        }

        // The event describes a past state; the file may be gone by the time
        // it is processed. The matching delete event handles the remote side.
        match tokio::fs::metadata(&event.source_absolute).await {
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(
                    path = %event.source_absolute.display(),
                    "Local file vanished before upload"
                );
                return Ok(());
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("Failed to stat {}", event.source_absolute.display())
                })
            }
        }

        self.upload_file(
            &event.source_absolute,
            &event.target_absolute,
            &event.item_id(),
        )
        .await
    }

    async fn delete(&mut self, event: &SyncEvent) -> Result<()> {
        self.rm(&event.target_absolute).await
    }

    async fn walk(&mut self, remote: &str) -> Result<Vec<String>> {
        let client = self.client()?;
        let prefix = format!("{}/", remote.trim_end_matches('/'));
        let mut paths = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut request = client.request(Method::GET, "/delta");
            if let Some(cursor) = &cursor {
                request = request.query(&[("cursor", cursor.as_str())]);
            }
            let response = request.send().await.context("Failed to send delta query")?;
            let response = check(response, "GET /delta").await?;
            let page: DeltaResponse = response
                .json()
                .await
                .context("Failed to parse delta response")?;

            for entry in page.entries {
                if !entry.is_dir && entry.path.starts_with(&prefix) {
                    paths.push(entry.path);
                }
            }
            if !page.has_more {
                break;
            }
            cursor = Some(page.cursor);
        }

        Ok(paths)
    }

    async fn rm(&mut self, remote: &str) -> Result<()> {
        let trimmed = remote.trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(BackendError::RootDeletion(remote.to_string()).into());
        }

        let client = self.client()?;
        let response = client
            .request(Method::POST, "/files/delete")
            .query(&[("path", trimmed)])
            .send()
            .await
            .context("Failed to send delete")?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!(remote = trimmed, "Remote already gone");
            return Ok(());
        }
        check(response, "POST /files/delete").await?;
        Ok(())
    }

    async fn download(&mut self, local: &Path, remote: &str) -> Result<()> {
        let client = self.client()?;
        let response = client
            .request(Method::GET, "/files/content")
            .query(&[("path", remote)])
            .send()
            .await
            .context("Failed to send content get")?;
        let response = check(response, "GET /files/content").await?;
        let bytes = response
            .bytes()
            .await
            .context("Failed to read download body")?;

        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tokio::fs::write(local, &bytes)
            .await
            .with_context(|| format!("Failed to write {}", local.display()))?;
        Ok(())
    }

    async fn upload(&mut self, local: &Path, remote: &str) -> Result<()> {
        let item = local.display().to_string();
        self.reporter.start(&item);
        let result = self.upload_file(local, remote, &item).await;
        self.reporter.finish(&item);
        result
    }

    async fn full_sync(&mut self, pull: bool) -> Result<()> {
        let watches: Vec<_> = self.config.watches_for("chunkstore").cloned().collect();
        let mut failures = 0usize;

        for watch in &watches {
            if pull {
                let remotes = self.walk(&watch.target).await?;
                for remote in remotes {
                    let Some(rel) = relative_to(&watch.target, &remote) else {
                        continue;
                    };
                    let local = watch.source.join(&rel);
                    self.reporter.start(&remote);
                    let result = self.download(&local, &remote).await;
                    self.reporter.finish(&remote);
                    if let Err(err) = result {
                        warn!(remote, error = %err, "Download failed");
                        failures += 1;
                    }
                }
            } else {
                let files = fswalk::local_files(&watch.source, &watch.exclude)?;
                for file in files {
                    let remote = join_target(&watch.target, &file.relative);
                    let item = file.absolute.display().to_string();
                    self.reporter.start(&item);
                    let result = self.upload_file(&file.absolute, &remote, &item).await;
                    self.reporter.finish(&item);
                    if let Err(err) = result {
                        warn!(path = %item, error = %err, "Upload failed");
                        failures += 1;
                    }
                }
            }
        }

        if failures > 0 {
            anyhow::bail!("Chunk store full sync failed for {failures} item(s)");
        }
        Ok(())
    }
}
