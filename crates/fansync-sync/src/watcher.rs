//! File watching and event resolution.
//!
//! Wraps the `notify` crate to monitor the configured watch roots, converts
//! raw OS events into resolved [`SyncEvent`] values (absolute, relative and
//! target paths computed against the owning watch), applies exclude
//! patterns, and pushes the result into the manager's intake queue.
//!
//! The notify callback runs on the watcher's own OS thread; the intake
//! queue's synchronous `put` is safe to call from there and never blocks the
//! producer on backend work.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use fansync_core::config::{Config, WatchConfig};
use fansync_core::domain::{EventKind, SyncEvent};
use glob::Pattern;
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{EventKind as NotifyEventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, error, info, trace, warn};

use crate::queue::CoalescingQueue;

// ---------------------------------------------------------------------------
// Watch routes
// ---------------------------------------------------------------------------

/// One enabled watch with its compiled exclude patterns.
struct WatchRoute {
    watch: WatchConfig,
    excludes: Vec<Pattern>,
}

impl WatchRoute {
    fn compile(watch: &WatchConfig) -> Result<Self> {
        let excludes = watch
            .exclude
            .iter()
            .map(|raw| {
                Pattern::new(raw)
                    .with_context(|| format!("Invalid exclude pattern '{raw}'"))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            watch: watch.clone(),
            excludes,
        })
    }

    fn excluded(&self, relative: &Path) -> bool {
        self.excludes.iter().any(|p| p.matches_path(relative))
    }
}

// ---------------------------------------------------------------------------
// Raw event mapping
// ---------------------------------------------------------------------------

/// A notify event reduced to one changed path.
struct RawChange {
    kind: EventKind,
    path: PathBuf,
    moved_from: Option<PathBuf>,
    /// Directory-ness when the OS event already tells us; `None` falls back
    /// to a live filesystem check during routing.
    directory_hint: Option<bool>,
}

/// Converts a `notify::Event` into zero or more raw changes.
///
/// A rename with both ends inside the watched tree becomes a MOVED_FROM for
/// the old path and a MOVED_TO (carrying `moved_from`) for the new one, the
/// way inotify reports it. Access events are ignored.
fn map_notify_event(event: &notify::Event) -> Vec<RawChange> {
    let paths = &event.paths;

    match &event.kind {
        NotifyEventKind::Create(kind) => {
            let hint = match kind {
                CreateKind::Folder => Some(true),
                CreateKind::File => Some(false),
                _ => None,
            };
            paths
                .first()
                .map(|p| RawChange {
                    kind: EventKind::Create,
                    path: p.clone(),
                    moved_from: None,
                    directory_hint: hint,
                })
                .into_iter()
                .collect()
        }

        NotifyEventKind::Remove(kind) => {
            let hint = match kind {
                RemoveKind::Folder => Some(true),
                RemoveKind::File => Some(false),
                _ => None,
            };
            paths
                .first()
                .map(|p| RawChange {
                    kind: EventKind::Delete,
                    path: p.clone(),
                    moved_from: None,
                    directory_hint: hint,
                })
                .into_iter()
                .collect()
        }

        NotifyEventKind::Modify(ModifyKind::Metadata(_)) => paths
            .first()
            .map(|p| RawChange {
                kind: EventKind::Attrib,
                path: p.clone(),
                moved_from: None,
                directory_hint: None,
            })
            .into_iter()
            .collect(),

        NotifyEventKind::Modify(ModifyKind::Name(RenameMode::From)) => paths
            .first()
            .map(|p| RawChange {
                kind: EventKind::MovedFrom,
                path: p.clone(),
                moved_from: None,
                directory_hint: None,
            })
            .into_iter()
            .collect(),

        NotifyEventKind::Modify(ModifyKind::Name(RenameMode::To)) => paths
            .first()
            .map(|p| RawChange {
                kind: EventKind::MovedTo,
                path: p.clone(),
                moved_from: None,
                directory_hint: None,
            })
            .into_iter()
            .collect(),

        NotifyEventKind::Modify(ModifyKind::Name(RenameMode::Both)) if paths.len() >= 2 => {
            let old = paths[0].clone();
            let new = paths[1].clone();
            vec![
                RawChange {
                    kind: EventKind::MovedFrom,
                    path: old.clone(),
                    moved_from: None,
                    directory_hint: None,
                },
                RawChange {
                    kind: EventKind::MovedTo,
                    path: new,
                    moved_from: Some(old),
                    directory_hint: None,
                },
            ]
        }

        // Data changes and everything else notify files under Modify.
        NotifyEventKind::Modify(_) => paths
            .first()
            .map(|p| RawChange {
                kind: EventKind::Modify,
                path: p.clone(),
                moved_from: None,
                directory_hint: None,
            })
            .into_iter()
            .collect(),

        _ => {
            trace!(kind = ?event.kind, "Ignoring event kind");
            Vec::new()
        }
    }
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// Finds the owning watch (longest source-prefix match), applies excludes,
/// and resolves the change into a [`SyncEvent`].
fn route_change(routes: &[WatchRoute], change: RawChange) -> Option<SyncEvent> {
    let route = routes
        .iter()
        .filter(|r| change.path.starts_with(&r.watch.source))
        .max_by_key(|r| r.watch.source.components().count())?;

    // A change to the watch root itself is its own event class.
    let kind = if change.path == route.watch.source {
        match change.kind {
            EventKind::Delete => EventKind::DeleteSelf,
            EventKind::MovedFrom | EventKind::MovedTo => EventKind::MoveSelf,
            other => other,
        }
    } else {
        change.kind
    };

    let relative = change.path.strip_prefix(&route.watch.source).ok()?;
    if route.excluded(relative) {
        debug!(
            path = %change.path.display(),
            "Change matches exclude pattern; dropped"
        );
        return None;
    }

    let is_directory = change
        .directory_hint
        .unwrap_or_else(|| change.path.is_dir());

    match SyncEvent::resolve(&route.watch, kind, is_directory, &change.path, change.moved_from) {
        Ok(event) => Some(event),
        Err(err) => {
            warn!(
                path = %change.path.display(),
                error = %err,
                "Dropping unresolvable change event"
            );
            None
        }
    }
}

// ---------------------------------------------------------------------------
// FileWatcher
// ---------------------------------------------------------------------------

/// Watches every enabled watch root recursively and feeds the intake queue.
pub struct FileWatcher {
    watcher: RecommendedWatcher,
    roots: Vec<PathBuf>,
}

impl FileWatcher {
    /// Compiles the routes, creates the OS watcher, and starts watching all
    /// enabled roots recursively.
    pub fn start(config: &Config, intake: Arc<CoalescingQueue<SyncEvent>>) -> Result<Self> {
        let routes = config
            .enabled_watches()
            .map(WatchRoute::compile)
            .collect::<Result<Vec<_>>>()?;
        let roots: Vec<PathBuf> = routes.iter().map(|r| r.watch.source.clone()).collect();
        let routes = Arc::new(routes);

        let handler_routes = routes.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    for change in map_notify_event(&event) {
                        if let Some(sync_event) = route_change(&handler_routes, change) {
                            if !intake.put(sync_event) {
                                trace!("Duplicate change coalesced in intake queue");
                            }
                        }
                    }
                }
                Err(err) => error!(error = %err, "File watcher error"),
            },
            notify::Config::default(),
        )
        .context("Failed to create file watcher")?;

        for root in &roots {
            watcher
                .watch(root, RecursiveMode::Recursive)
                .with_context(|| format!("Failed to watch path: {}", root.display()))?;
            info!(path = %root.display(), "Watching recursively");
        }

        Ok(Self { watcher, roots })
    }

    /// Stops watching every root. Further OS events are discarded.
    pub fn stop(&mut self) {
        let roots = std::mem::take(&mut self.roots);
        for root in roots {
            if let Err(err) = self.watcher.unwatch(&root) {
                debug!(path = %root.display(), error = %err, "Unwatch failed");
            }
        }
        info!("File watcher stopped");
    }
}
