//! Scripted in-memory backend used by the engine tests.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use fansync_core::domain::{BackendError, ProgressReporter, SyncEvent};
use fansync_core::ports::{EventKeyFn, SyncBackend};

/// Shared, clonable operation log.
#[derive(Clone, Default)]
pub struct OpLog(Arc<Mutex<Vec<String>>>);

impl OpLog {
    pub fn record(&self, op: impl Into<String>) {
        self.0.lock().unwrap().push(op.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// Backend double that records every operation and can be scripted to fail,
/// stall, or override its dedup key.
pub struct RecordingBackend {
    pub name: String,
    pub reporter: ProgressReporter,
    pub log: OpLog,
    /// Artificial operation duration, for overlap detection.
    pub delay: Duration,
    pub fail_init: bool,
    pub fail_pushes: bool,
    pub in_flight: Arc<AtomicUsize>,
    pub max_in_flight: Arc<AtomicUsize>,
    pub key_fn: Option<EventKeyFn>,
}

impl RecordingBackend {
    pub fn new(name: impl Into<String>, reporter: ProgressReporter) -> Self {
        Self {
            name: name.into(),
            reporter,
            log: OpLog::default(),
            delay: Duration::ZERO,
            fail_init: false,
            fail_pushes: false,
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
            key_fn: None,
        }
    }

    async fn tracked(&self, op: String) {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.log.record(op);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl SyncBackend for RecordingBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn reporter(&self) -> &ProgressReporter {
        &self.reporter
    }

    async fn init(&mut self) -> Result<()> {
        if self.fail_init {
            bail!("scripted init failure");
        }
        Ok(())
    }

    async fn push(&mut self, event: &SyncEvent) -> Result<()> {
        self.tracked(format!("push {}", event.source_relative.display()))
            .await;
        if self.fail_pushes {
            bail!("scripted push failure");
        }
        Ok(())
    }

    async fn delete(&mut self, event: &SyncEvent) -> Result<()> {
        self.tracked(format!("delete {}", event.source_relative.display()))
            .await;
        Ok(())
    }

    async fn walk(&mut self, _remote: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn rm(&mut self, remote: &str) -> Result<()> {
        if remote == "/" || remote.is_empty() {
            return Err(BackendError::RootDeletion(remote.to_string()).into());
        }
        self.log.record(format!("rm {remote}"));
        Ok(())
    }

    async fn download(&mut self, local: &Path, remote: &str) -> Result<()> {
        self.log
            .record(format!("download {remote} -> {}", local.display()));
        Ok(())
    }

    async fn upload(&mut self, local: &Path, remote: &str) -> Result<()> {
        self.log
            .record(format!("upload {} -> {remote}", local.display()));
        Ok(())
    }

    async fn full_sync(&mut self, pull: bool) -> Result<()> {
        self.log.record(format!("full_sync pull={pull}"));
        Ok(())
    }

    fn event_key_fn(&self) -> Option<EventKeyFn> {
        self.key_fn.clone()
    }
}
