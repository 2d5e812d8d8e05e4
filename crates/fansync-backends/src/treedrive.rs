//! Hierarchical node-tree drive backend.
//!
//! The drive addresses everything by opaque node IDs; paths exist only on
//! our side. Every operation resolves its slash-separated remote path one
//! segment at a time from the configured root node, via child-by-name
//! queries. There is no path cache: resolution always reflects the live
//! remote tree, at the cost of one request per segment. Duplicate names
//! under one parent are remote-state corruption and abort the operation.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use fansync_core::config::{Config, TreeDriveConfig};
use fansync_core::domain::{join_target, BackendError, ProgressReporter, SyncEvent};
use fansync_core::ports::SyncBackend;
use reqwest::{Client, Method, RequestBuilder};
use serde::Deserialize;
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

#[derive(Debug, Clone, Deserialize)]
struct Node {
    id: String,
    name: String,
    kind: String,
}

impl Node {
    fn is_folder(&self) -> bool {
        self.kind == "folder"
    }
}

#[derive(Debug, Deserialize)]
struct NodeList {
    nodes: Vec<Node>,
}

// ---------------------------------------------------------------------------
// DriveClient
// ---------------------------------------------------------------------------

struct DriveClient {
    http: Client,
    base_url: String,
    token: String,
}

impl DriveClient {
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

    /// Children of `parent_id` whose name is exactly `name`.
    async fn children_named(&self, parent_id: &str, name: &str) -> Result<Vec<Node>> {
        let response = self
            .request(Method::GET, &format!("/nodes/{parent_id}/children"))
            .query(&[("name", name)])
            .send()
            .await
            .context("Failed to send children query")?;
        let response = check(response, "GET children").await?;
        let list: NodeList = response
            .json()
            .await
            .context("Failed to parse children response")?;
        // The name query may match loosely; keep exact-name entries only.
        Ok(list.nodes.into_iter().filter(|n| n.name == name).collect())
    }

    async fn children(&self, parent_id: &str) -> Result<Vec<Node>> {
        let response = self
            .request(Method::GET, &format!("/nodes/{parent_id}/children"))
            .send()
            .await
            .context("Failed to send children query")?;
        let response = check(response, "GET children").await?;
        let list: NodeList = response
            .json()
            .await
            .context("Failed to parse children response")?;
        Ok(list.nodes)
    }

    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<Node> {
        let response = self
            .request(Method::POST, "/nodes")
            .json(&serde_json::json!({
                "name": name,
                "parent_id": parent_id,
                "kind": "folder",
            }))
            .send()
            .await
            .context("Failed to send folder create")?;
        let response = check(response, "POST /nodes").await?;
        response
            .json()
            .await
            .context("Failed to parse created node")
    }
}

/// Splits a remote path into parent path and final name.
fn split_remote(remote: &str) -> Result<(String, String)> {
    let trimmed = remote.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some((parent, name)) if !name.is_empty() => {
            let parent = if parent.is_empty() { "/" } else { parent };
            Ok((parent.to_string(), name.to_string()))
        }
        _ => bail!("Remote path has no final name component: {remote}"),
    }
}

// ---------------------------------------------------------------------------
// TreeDriveBackend
// ---------------------------------------------------------------------------

/// Drive backend over the node-tree HTTP API.
pub struct TreeDriveBackend {
    config: Arc<Config>,
    settings: TreeDriveConfig,
    reporter: ProgressReporter,
    client: Option<DriveClient>,
}

impl TreeDriveBackend {
    pub fn new(config: Arc<Config>, reporter: ProgressReporter) -> Self {
        let settings = config.backends.treedrive.clone();
        Self {
            config,
            settings,
            reporter,
            client: None,
        }
    }

    fn client(&self) -> Result<&DriveClient> {
        self.client
            .as_ref()
            .ok_or_else(|| anyhow!("treedrive backend used before init"))
    }

    /// Resolves a remote path to the node ID chain from the root, one
    /// segment at a time.
    ///
    /// A segment with no match is either created (`create_missing`) or ends
    /// the resolution with `Ok(None)`. A segment with more than one match is
    /// [`BackendError::AmbiguousRemotePath`]; picking one arbitrarily could
    /// scatter a tree across duplicates.
    pub async fn path_to_ids(
        &self,
        remote: &str,
        create_missing: bool,
    ) -> Result<Option<Vec<String>>> {
        let client = self.client()?;
        let mut ids = vec![self.settings.root_id.clone()];
        let mut resolved = String::new();

        for segment in remote.split('/').filter(|s| !s.is_empty()) {
            resolved.push('/');
            resolved.push_str(segment);
            let parent_id = ids.last().expect("id chain never empty").clone();

            let matches = client.children_named(&parent_id, segment).await?;
            match matches.len() {
                0 => {
                    if !create_missing {
                        return Ok(None);
                    }
                    let node = client.create_folder(&parent_id, segment).await?;
                    debug!(path = %resolved, id = %node.id, "Created remote folder");
                    ids.push(node.id);
                }
                1 => ids.push(matches[0].id.clone()),
                n => {
                    return Err(BackendError::AmbiguousRemotePath(format!(
                        "{resolved} has {n} entries"
                    ))
                    .into())
                }
            }
        }

        Ok(Some(ids))
    }

    async fn upload_file(&self, local: &Path, remote: &str, item: &str) -> Result<()> {
        let (parent, name) = split_remote(remote)?;
        let ids = self
            .path_to_ids(&parent, true)
            .await?
            .expect("create_missing resolution always completes");
        let parent_id = ids.last().expect("id chain never empty").clone();

        let bytes = tokio::fs::read(local)
            .await
            .with_context(|| format!("Failed to read {}", local.display()))?;

        let client = self.client()?;
        let existing = client.children_named(&parent_id, &name).await?;
        match existing.len() {
            0 => {
                debug!(remote, "Inserting new node");
                let response = client
                    .request(Method::POST, "/nodes/upload")
                    .query(&[("parent_id", parent_id.as_str()), ("name", name.as_str())])
                    .body(bytes)
                    .send()
                    .await
                    .context("Failed to send node insert")?;
                check(response, "POST /nodes/upload").await?;
            }
            1 => {
                debug!(remote, id = %existing[0].id, "Updating node content");
                let response = client
                    .request(Method::PUT, &format!("/nodes/{}/content", existing[0].id))
                    .body(bytes)
                    .send()
                    .await
                    .context("Failed to send content update")?;
                check(response, "PUT node content").await?;
            }
            n => {
                return Err(BackendError::AmbiguousRemotePath(format!(
                    "{remote} has {n} entries"
                ))
                .into())
            }
        }

        self.reporter.update(item, 1.0);
        Ok(())
    }
}

#[async_trait::async_trait]
impl SyncBackend for TreeDriveBackend {
    fn name(&self) -> &str {
        "treedrive"
    }

    fn reporter(&self) -> &ProgressReporter {
        &self.reporter
    }

    async fn init(&mut self) -> Result<()> {
        if self.settings.base_url.is_empty() {
            return Err(BackendError::NotConfigured(
                "treedrive.base_url is not set".to_string(),
            )
            .into());
        }

        let token = TokenStore::new(&self.settings.token_file)
            .load()?
            .ok_or_else(|| {
                BackendError::Unauthorized(
                    "no treedrive token; run 'fansync auth treedrive'".to_string(),
                )
            })?;

        let client = DriveClient::new(&self.settings.base_url, token.access_token);
        let account = client.account().await?;
        info!(email = %account.email, "Tree drive authorized");

        self.client = Some(client);
        Ok(())
    }

    async fn push(&mut self, event: &SyncEvent) -> Result<()> {
        if event.is_directory {
            self.path_to_ids(&event.target_absolute, true).await?;
            return Ok(());
        }

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
        let Some(ids) = self.path_to_ids(remote, false).await? else {
            return Ok(Vec::new());
        };
        let client = self.client()?;
        let root_id = ids.last().expect("id chain never empty").clone();
        let prefix = remote.trim_end_matches('/').to_string();

        let mut paths = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut stack = vec![(root_id, prefix)];

        while let Some((id, prefix)) = stack.pop() {
            if !visited.insert(id.clone()) {
                continue;
            }
            for node in client.children(&id).await? {
                let path = format!("{prefix}/{}", node.name);
                if node.is_folder() {
                    stack.push((node.id, path));
                } else {
                    paths.push(path);
                }
            }
        }

        Ok(paths)
    }

    async fn rm(&mut self, remote: &str) -> Result<()> {
        if remote.trim_matches('/').is_empty() {
            return Err(BackendError::RootDeletion(remote.to_string()).into());
        }

        let Some(ids) = self.path_to_ids(remote, false).await? else {
            debug!(remote, "Remote already gone");
            return Ok(());
        };
        let node_id = ids.last().expect("id chain never empty").clone();

        let client = self.client()?;
        let response = if self.settings.trash {
            client
                .request(Method::POST, &format!("/nodes/{node_id}/trash"))
                .send()
                .await
                .context("Failed to send trash request")?
        } else {
            client
                .request(Method::DELETE, &format!("/nodes/{node_id}"))
                .send()
                .await
                .context("Failed to send delete request")?
        };
        check(response, "node removal").await?;
        Ok(())
    }

    async fn download(&mut self, local: &Path, remote: &str) -> Result<()> {
        let ids = self
            .path_to_ids(remote, false)
            .await?
            .ok_or_else(|| BackendError::NotFound(remote.to_string()))?;
        let node_id = ids.last().expect("id chain never empty").clone();

        let client = self.client()?;
        let response = client
            .request(Method::GET, &format!("/nodes/{node_id}/content"))
            .send()
            .await
            .context("Failed to send content get")?;
        let response = check(response, "GET node content").await?;
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
        let watches: Vec<_> = self.config.watches_for("treedrive").cloned().collect();
        let mut failures = 0usize;

        for watch in &watches {
            if pull {
                let remotes = self.walk(&watch.target).await?;
                let root = watch.target.trim_end_matches('/').to_string();
                for remote in remotes {
                    let rel = match remote.strip_prefix(&root) {
                        Some(rest) => rest.trim_start_matches('/').to_string(),
                        None => continue,
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
            anyhow::bail!("Tree drive full sync failed for {failures} item(s)");
        }
        Ok(())
    }
}
