//! Subprocess-driven tree-mirroring backend.
//!
//! Drives an external mirroring tool (rsync by default) and parses the
//! percentage tokens it prints to stdout for incremental progress. The tool
//! is directory-granular: a change to a file is synced by mirroring its
//! containing directory, so the dedup key for this backend is the parent
//! directory rather than the file itself. A burst of saves into one
//! directory coalesces to a single tool run.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result};
use fansync_core::config::{Config, MirrorConfig};
use fansync_core::domain::{join_target, BackendError, ProgressReporter, SyncEvent};
use fansync_core::ports::{EventKeyFn, SyncBackend};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::fswalk;

// ---------------------------------------------------------------------------
// Progress parsing
// ---------------------------------------------------------------------------

/// Extracts the first `NN%` token from a line of tool output.
fn parse_percent(line: &str) -> Option<u8> {
    for token in line.split_whitespace() {
        if let Some(digits) = token.strip_suffix('%') {
            if let Ok(value) = digits.parse::<u8>() {
                if value <= 100 {
                    return Some(value);
                }
            }
        }
    }
    None
}

/// Byte-wise line scanner over the tool's stdout.
///
/// The tool redraws its progress line with carriage returns, so lines are
/// split on CR as well as LF. Percentages are reported only when strictly
/// increasing; the tool restarts its counter per transferred file and only
/// the overall high-water mark is meaningful per run.
struct ProgressScanner {
    line: Vec<u8>,
    last_percent: Option<u8>,
}

impl ProgressScanner {
    fn new() -> Self {
        Self {
            line: Vec::new(),
            last_percent: None,
        }
    }

    /// Feeds one byte; returns a new progress fraction on a line boundary
    /// that carried a higher percentage than seen before.
    fn feed(&mut self, byte: u8) -> Option<f64> {
        if byte == b'\r' || byte == b'\n' {
            self.take_line()
        } else {
            self.line.push(byte);
            None
        }
    }

    /// Flushes a trailing unterminated line.
    fn flush(&mut self) -> Option<f64> {
        self.take_line()
    }

    fn take_line(&mut self) -> Option<f64> {
        if self.line.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.line).into_owned();
        self.line.clear();

        let percent = parse_percent(&line)?;
        if self.last_percent.is_some_and(|last| percent <= last) {
            return None;
        }
        self.last_percent = Some(percent);
        Some(f64::from(percent) / 100.0)
    }
}

// ---------------------------------------------------------------------------
// MirrorBackend
// ---------------------------------------------------------------------------

/// Parent directory of a backend-side path, keeping any `host:` prefix.
fn remote_parent(remote: &str) -> &str {
    match remote.trim_end_matches('/').rsplit_once('/') {
        Some((parent, _)) if !parent.is_empty() => parent,
        _ => "/",
    }
}

/// Mirroring backend over an external subprocess tool.
pub struct MirrorBackend {
    config: Arc<Config>,
    settings: MirrorConfig,
    reporter: ProgressReporter,
}

impl MirrorBackend {
    pub fn new(config: Arc<Config>, reporter: ProgressReporter) -> Self {
        let settings = config.backends.mirror.clone();
        Self {
            config,
            settings,
            reporter,
        }
    }

    /// Runs the mirror tool with the given trailing arguments, streaming its
    /// stdout through the progress scanner for `item`.
    async fn run_mirror(&self, args: &[String], item: &str) -> Result<()> {
        debug!(command = %self.settings.command, ?args, "Running mirror command");

        let mut child = Command::new(&self.settings.command)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| {
                format!("Failed to spawn mirror command '{}'", self.settings.command)
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let progress = async {
            if let Some(stdout) = stdout {
                self.scan_progress(stdout, item).await;
            }
        };
        // Drain stderr concurrently so a chatty tool cannot stall on a full pipe.
        let errors = async {
            let mut text = String::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_string(&mut text).await;
            }
            text
        };
        let (_, stderr_text) = tokio::join!(progress, errors);

        let status = child
            .wait()
            .await
            .context("Mirror command did not exit cleanly")?;
        if !status.success() {
            return Err(BackendError::MirrorCommand(format!(
                "'{}' exited with {status}: {}",
                self.settings.command,
                stderr_text.trim()
            ))
            .into());
        }
        Ok(())
    }

    async fn scan_progress<R: AsyncRead + Unpin>(&self, mut reader: R, item: &str) {
        let mut scanner = ProgressScanner::new();
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    for &byte in &buf[..n] {
                        if let Some(fraction) = scanner.feed(byte) {
                            self.reporter.update(item, fraction);
                        }
                    }
                }
                Err(err) => {
                    debug!(error = %err, "Stopped reading mirror output");
                    break;
                }
            }
        }
        if let Some(fraction) = scanner.flush() {
            self.reporter.update(item, fraction);
        }
    }

    /// Base arguments for one tool invocation, before source and destination.
    fn base_args(&self, recursive: bool) -> Vec<String> {
        let mut args = self.settings.arguments.clone();
        args.push(if recursive { "--recursive" } else { "--dirs" }.to_string());
        args.push("--progress".to_string());
        args
    }

    async fn remove_path(&self, remote: &str, recursive: bool) -> Result<()> {
        let trimmed = remote.trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(BackendError::RootDeletion(remote.to_string()).into());
        }

        let flag = if recursive { "-rf" } else { "-f" };
        let output = Command::new("rm")
            .arg(flag)
            .arg(trimmed)
            .output()
            .await
            .context("Failed to run remove command")?;
        if !output.status.success() {
            return Err(BackendError::MirrorCommand(format!(
                "'rm {flag} {trimmed}' exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ))
            .into());
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl SyncBackend for MirrorBackend {
    fn name(&self) -> &str {
        "mirror"
    }

    fn reporter(&self) -> &ProgressReporter {
        &self.reporter
    }

    async fn init(&mut self) -> Result<()> {
        let output = Command::new(&self.settings.command)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|err| {
                BackendError::MirrorCommand(format!(
                    "'{}' is not runnable: {err}",
                    self.settings.command
                ))
            })?;
        if !output.status.success() {
            return Err(BackendError::MirrorCommand(format!(
                "'{} --version' exited with {}",
                self.settings.command, output.status
            ))
            .into());
        }
        info!(command = %self.settings.command, "Mirror backend ready");
        Ok(())
    }

    async fn push(&mut self, event: &SyncEvent) -> Result<()> {
        // Directory granular: a file change mirrors its containing
        // directory, a directory change mirrors the directory itself into
        // the remote parent.
        let (local, remote, recursive) = if event.is_directory {
            (
                event.source_absolute.display().to_string(),
                format!("{}/", remote_parent(&event.target_absolute)),
                true,
            )
        } else {
            let parent = event
                .source_absolute
                .parent()
                .unwrap_or(&event.source_absolute);
            (
                format!("{}/", parent.display()),
                format!("{}/", remote_parent(&event.target_absolute)),
                false,
            )
        };

        let mut args = self.base_args(recursive);
        args.push(local);
        args.push(remote);
        self.run_mirror(&args, &event.item_id()).await
    }

    async fn delete(&mut self, event: &SyncEvent) -> Result<()> {
        self.remove_path(&event.target_absolute, event.is_directory)
            .await
    }

    async fn walk(&mut self, remote: &str) -> Result<Vec<String>> {
        let files = fswalk::local_files(Path::new(remote), &[])?;
        Ok(files
            .into_iter()
            .map(|f| join_target(remote, &f.relative))
            .collect())
    }

    async fn rm(&mut self, remote: &str) -> Result<()> {
        self.remove_path(remote, true).await
    }

    async fn download(&mut self, local: &Path, remote: &str) -> Result<()> {
        let mut args = self.settings.arguments.clone();
        args.push(remote.to_string());
        args.push(local.display().to_string());
        self.run_mirror(&args, remote).await
    }

    async fn upload(&mut self, local: &Path, remote: &str) -> Result<()> {
        let item = local.display().to_string();
        self.reporter.start(&item);
        let mut args = self.settings.arguments.clone();
        args.push("--progress".to_string());
        args.push(item.clone());
        args.push(remote.to_string());
        let result = self.run_mirror(&args, &item).await;
        self.reporter.finish(&item);
        result
    }

    async fn full_sync(&mut self, pull: bool) -> Result<()> {
        let mut failures = 0usize;
        let watches: Vec<_> = self.config.watches_for("mirror").cloned().collect();

        for watch in &watches {
            let item = watch.source.display().to_string();
            let local = format!("{}/", watch.source.display());
            let remote = format!("{}/", watch.target.trim_end_matches('/'));

            let mut args = self.base_args(true);
            args.push("--delete".to_string());
            for pattern in &watch.exclude {
                args.push(format!("--exclude={pattern}"));
            }
            if pull {
                args.push(remote);
                args.push(local);
            } else {
                args.push(local);
                args.push(remote);
            }

            self.reporter.start(&item);
            let result = self.run_mirror(&args, &item).await;
            self.reporter.finish(&item);
            if let Err(err) = result {
                warn!(watch = %item, error = %err, "Mirror full sync failed for watch");
                failures += 1;
            }
        }

        if failures > 0 {
            anyhow::bail!("Mirror full sync failed for {failures} watch(es)");
        }
        Ok(())
    }

    fn event_key_fn(&self) -> Option<EventKeyFn> {
        Some(Arc::new(|event: &SyncEvent| {
            if event.is_directory {
                event.source_absolute.display().to_string()
            } else {
                event
                    .source_absolute
                    .parent()
                    .unwrap_or(&event.source_absolute)
                    .display()
                    .to_string()
            }
        }))
    }
}
