//! Top-level sync orchestrator.
//!
//! The [`SyncManager`] owns the set of active backend workers (one per
//! configured backend name), fans intake events out to every backend named in
//! their routing set, re-emits progress tagged with backend identity, and
//! owns the start/stop lifecycle of the whole engine.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use fansync_core::config::Config;
use fansync_core::domain::{ProgressFn, ProgressReporter, SyncEvent};
use fansync_core::ports::BackendRegistry;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::queue::{CoalescingQueue, Dequeued, KeyFn};
use crate::worker::BackendWorker;

fn default_key_fn() -> KeyFn<SyncEvent> {
    Arc::new(|event: &SyncEvent| event.default_key())
}

/// Orchestrates backend workers and event fan-out.
///
/// Progress aggregation is pass-through: every backend reporter wraps the
/// single caller-supplied callback, so the caller is responsible for
/// combining per-backend progress into one UI signal.
pub struct SyncManager {
    config: Arc<Config>,
    registry: Arc<BackendRegistry>,
    progress: ProgressFn,
    intake: Arc<CoalescingQueue<SyncEvent>>,
    routes: HashMap<String, Arc<CoalescingQueue<SyncEvent>>>,
    workers: Vec<JoinHandle<()>>,
    intake_task: Option<JoinHandle<()>>,
    started: bool,
    stopped: bool,
}

impl SyncManager {
    /// Creates a manager over an immutable configuration and a registry of
    /// backend constructors. Nothing runs until [`start`](Self::start).
    pub fn new(config: Arc<Config>, registry: Arc<BackendRegistry>, progress: ProgressFn) -> Self {
        Self {
            config,
            registry,
            progress,
            intake: Arc::new(CoalescingQueue::new(default_key_fn())),
            routes: HashMap::new(),
            workers: Vec::new(),
            intake_task: None,
            started: false,
            stopped: false,
        }
    }

    /// The intake queue the file watcher feeds.
    pub fn intake(&self) -> Arc<CoalescingQueue<SyncEvent>> {
        self.intake.clone()
    }

    /// Starts one worker per backend name referenced by an enabled watch,
    /// plus the intake fan-out loop.
    ///
    /// A backend whose constructor or `init()` fails is skipped with an
    /// error log; the others start normally. Returns the number of backends
    /// that actually started.
    pub async fn start(&mut self) -> Result<usize> {
        if self.started {
            bail!("SyncManager already started");
        }
        self.started = true;

        for name in self.config.backend_names() {
            let reporter = ProgressReporter::new(&name, self.progress.clone());
            let mut backend = match self.registry.create(&name, self.config.clone(), reporter) {
                Ok(backend) => backend,
                Err(err) => {
                    error!(
                        backend = %name,
                        error = %format!("{err:#}"),
                        "Unknown or unconstructible backend; skipping"
                    );
                    continue;
                }
            };

            if let Err(err) = backend.init().await {
                error!(
                    backend = %name,
                    error = %format!("{err:#}"),
                    "Backend init failed; backend disabled for this run"
                );
                continue;
            }

            // Backends may coarsen dedup granularity for their own queue.
            let key_fn = backend.event_key_fn().unwrap_or_else(default_key_fn);
            let queue = Arc::new(CoalescingQueue::new(key_fn));
            self.routes.insert(name.clone(), queue.clone());
            self.workers
                .push(tokio::spawn(BackendWorker::new(backend, queue).run()));
            info!(backend = %name, "Backend started");
        }

        let routes = self.routes.clone();
        let intake = self.intake.clone();
        self.intake_task = Some(tokio::spawn(async move {
            loop {
                match intake.get().await {
                    Dequeued::Item(event) => {
                        for name in &event.backends {
                            match routes.get(name) {
                                Some(queue) => {
                                    queue.put(event.clone());
                                }
                                None => warn!(
                                    backend = %name,
                                    path = %event.source_absolute.display(),
                                    "Event routed to a backend that is not running"
                                ),
                            }
                        }
                    }
                    Dequeued::Stopped => break,
                }
            }
            debug!("Intake loop stopped");
        }));

        Ok(self.routes.len())
    }

    /// Graceful, idempotent shutdown.
    ///
    /// The intake queue is stopped and drained first so that every event
    /// accepted before this call still reaches its backend queues; then each
    /// worker drains its own queue up to the sentinel. In-flight operations
    /// run to completion - shutdown is "finish current, refuse new".
    pub async fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        self.intake.stop();
        if let Some(task) = self.intake_task.take() {
            let _ = task.await;
        }

        for queue in self.routes.values() {
            queue.stop();
        }
        for worker in self.workers.drain(..) {
            let _ = worker.await;
        }

        info!("Sync manager stopped");
    }

    /// Whole-tree reconciliation across every configured backend, bypassing
    /// the event queues entirely.
    ///
    /// Builds fresh backend instances so it can run before, or independently
    /// of, [`start`](Self::start). Backends proceed concurrently; one
    /// backend's failure does not stop the others, but any failure makes the
    /// overall result an error.
    pub async fn full_sync(&self, pull: bool) -> Result<()> {
        let mut tasks: JoinSet<(String, Result<()>)> = JoinSet::new();

        for name in self.config.backend_names() {
            let reporter = ProgressReporter::new(&name, self.progress.clone());
            let created = self.registry.create(&name, self.config.clone(), reporter);
            tasks.spawn(async move {
                let outcome = async {
                    let mut backend = created?;
                    backend
                        .init()
                        .await
                        .context("Backend init failed before full sync")?;
                    backend.full_sync(pull).await
                }
                .await;
                (name, outcome)
            });
        }

        let mut failures = 0usize;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, Ok(()))) => info!(backend = %name, pull, "Full sync finished"),
                Ok((name, Err(err))) => {
                    error!(
                        backend = %name,
                        error = %format!("{err:#}"),
                        "Full sync failed"
                    );
                    failures += 1;
                }
                Err(err) => {
                    error!(error = %err, "Full sync task panicked");
                    failures += 1;
                }
            }
        }

        if failures > 0 {
            bail!("Full sync failed for {failures} backend(s)");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use fansync_core::config::WatchConfig;
    use fansync_core::domain::EventKind;
    use fansync_core::ports::BackendFactory;

    use super::*;
    use crate::testutil::{OpLog, RecordingBackend};

    struct Script {
        log: OpLog,
        max_in_flight: Arc<AtomicUsize>,
        delay: Duration,
        fail_init: bool,
        fail_pushes: bool,
    }

    impl Script {
        fn new() -> Self {
            Self {
                log: OpLog::default(),
                max_in_flight: Arc::new(AtomicUsize::new(0)),
                delay: Duration::ZERO,
                fail_init: false,
                fail_pushes: false,
            }
        }

        fn factory(&self) -> BackendFactory {
            let log = self.log.clone();
            let max_in_flight = self.max_in_flight.clone();
            let delay = self.delay;
            let fail_init = self.fail_init;
            let fail_pushes = self.fail_pushes;
            Arc::new(move |_config, reporter| {
                let mut backend =
                    RecordingBackend::new(reporter.backend().to_string(), reporter);
                backend.log = log.clone();
                backend.max_in_flight = max_in_flight.clone();
                backend.delay = delay;
                backend.fail_init = fail_init;
                backend.fail_pushes = fail_pushes;
                Ok(Box::new(backend))
            })
        }
    }

    fn config(backends: &[&str]) -> Arc<Config> {
        Arc::new(Config {
            watches: vec![WatchConfig {
                source: PathBuf::from("/src"),
                target: "/dst".to_string(),
                backends: backends.iter().map(|s| s.to_string()).collect(),
                exclude: Vec::new(),
                disabled: false,
            }],
            ..Config::default()
        })
    }

    fn event(config: &Config, kind: EventKind, rel: &str) -> SyncEvent {
        SyncEvent::resolve(
            &config.watches[0],
            kind,
            false,
            &Path::new("/src").join(rel),
            None,
        )
        .unwrap()
    }

    fn silent() -> ProgressFn {
        Arc::new(|_, _, _| {})
    }

    #[tokio::test]
    async fn test_fan_out_to_all_routed_backends() {
        let (alpha, beta) = (Script::new(), Script::new());
        let mut registry = BackendRegistry::new();
        registry.register("alpha", alpha.factory());
        registry.register("beta", beta.factory());

        let config = config(&["alpha", "beta"]);
        let mut manager = SyncManager::new(config.clone(), Arc::new(registry), silent());
        assert_eq!(manager.start().await.unwrap(), 2);

        manager.intake().put(event(&config, EventKind::Create, "a.txt"));
        manager.stop().await;

        assert!(alpha.log.entries().contains(&"push a.txt".to_string()));
        assert!(beta.log.entries().contains(&"push a.txt".to_string()));
    }

    #[tokio::test]
    async fn test_per_backend_single_flight() {
        let mut alpha = Script::new();
        alpha.delay = Duration::from_millis(15);
        let mut beta = Script::new();
        beta.delay = Duration::from_millis(15);

        let mut registry = BackendRegistry::new();
        registry.register("alpha", alpha.factory());
        registry.register("beta", beta.factory());

        let config = config(&["alpha", "beta"]);
        let mut manager = SyncManager::new(config.clone(), Arc::new(registry), silent());
        manager.start().await.unwrap();

        let intake = manager.intake();
        for i in 0..6 {
            intake.put(event(&config, EventKind::Modify, &format!("f{i}")));
        }
        manager.stop().await;

        assert_eq!(alpha.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(beta.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(alpha.log.entries().len(), 6);
        assert_eq!(beta.log.entries().len(), 6);
    }

    #[tokio::test]
    async fn test_progress_terminates_even_on_failure() {
        let mut alpha = Script::new();
        alpha.fail_pushes = true;

        let mut registry = BackendRegistry::new();
        registry.register("alpha", alpha.factory());

        let seen: Arc<Mutex<Vec<(String, f64)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let progress: ProgressFn = Arc::new(move |backend, _item, value| {
            sink.lock().unwrap().push((backend.to_string(), value));
        });

        let config = config(&["alpha"]);
        let mut manager = SyncManager::new(config.clone(), Arc::new(registry), progress);
        manager.start().await.unwrap();

        manager
            .intake()
            .put(event(&config, EventKind::Create, "boom.txt"));
        manager.stop().await;

        let seen = seen.lock().unwrap();
        let terminal: Vec<_> = seen.iter().filter(|(_, v)| *v >= 1.0).collect();
        assert_eq!(terminal.len(), 1, "exactly one terminal 1.0: {seen:?}");
        assert_eq!(terminal[0].0, "alpha");
    }

    #[tokio::test]
    async fn test_init_failure_is_isolated() {
        let mut bad = Script::new();
        bad.fail_init = true;
        let good = Script::new();

        let mut registry = BackendRegistry::new();
        registry.register("bad", bad.factory());
        registry.register("good", good.factory());

        let config = config(&["bad", "good"]);
        let mut manager = SyncManager::new(config.clone(), Arc::new(registry), silent());
        assert_eq!(manager.start().await.unwrap(), 1);

        manager.intake().put(event(&config, EventKind::Create, "a.txt"));
        manager.stop().await;

        assert!(bad.log.entries().is_empty());
        assert!(good.log.entries().contains(&"push a.txt".to_string()));
    }

    #[tokio::test]
    async fn test_unknown_backend_name_is_skipped() {
        let good = Script::new();
        let mut registry = BackendRegistry::new();
        registry.register("good", good.factory());

        // "ghost" is referenced by the watch but never registered.
        let config = config(&["ghost", "good"]);
        let mut manager = SyncManager::new(config.clone(), Arc::new(registry), silent());
        assert_eq!(manager.start().await.unwrap(), 1);

        manager.intake().put(event(&config, EventKind::Create, "a.txt"));
        manager.stop().await;

        assert!(good.log.entries().contains(&"push a.txt".to_string()));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let good = Script::new();
        let mut registry = BackendRegistry::new();
        registry.register("good", good.factory());

        let config = config(&["good"]);
        let mut manager = SyncManager::new(config, Arc::new(registry), silent());
        manager.start().await.unwrap();
        manager.stop().await;
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_full_sync_runs_every_backend() {
        let (alpha, beta) = (Script::new(), Script::new());
        let mut registry = BackendRegistry::new();
        registry.register("alpha", alpha.factory());
        registry.register("beta", beta.factory());

        let config = config(&["alpha", "beta"]);
        let manager = SyncManager::new(config, Arc::new(registry), silent());
        manager.full_sync(true).await.unwrap();

        assert!(alpha.log.entries().contains(&"full_sync pull=true".to_string()));
        assert!(beta.log.entries().contains(&"full_sync pull=true".to_string()));
    }

    #[tokio::test]
    async fn test_full_sync_reports_failures() {
        let mut bad = Script::new();
        bad.fail_init = true;

        let mut registry = BackendRegistry::new();
        registry.register("bad", bad.factory());

        let config = config(&["bad"]);
        let manager = SyncManager::new(config, Arc::new(registry), silent());
        assert!(manager.full_sync(false).await.is_err());
    }
}
