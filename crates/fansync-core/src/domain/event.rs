//! Change events flowing from the file watcher to the backends.
//!
//! A [`SyncEvent`] describes one filesystem change plus the routing metadata
//! needed to deliver it. Events are constructed once by the watcher and are
//! read-only from then on; in particular `target_absolute` is derived at
//! construction time (`target root ⊕ source_relative`) and never recomputed.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::WatchConfig;
use crate::domain::errors::DomainError;

/// Kind of filesystem change, mirroring the inotify-style event classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// A file or directory was created.
    Create,
    /// A file or directory was deleted.
    Delete,
    /// File content changed.
    Modify,
    /// Metadata (permissions, timestamps) changed.
    Attrib,
    /// A rename moved an entry out of the watched tree.
    MovedFrom,
    /// A rename moved an entry into (or within) the watched tree.
    MovedTo,
    /// The watched root itself was deleted.
    DeleteSelf,
    /// The watched root itself was moved.
    MoveSelf,
}

impl EventKind {
    /// True for the kinds a backend treats as a removal.
    pub fn is_removal(self) -> bool {
        matches!(self, EventKind::Delete | EventKind::MovedFrom)
    }
}

/// One filesystem change plus its sync routing metadata.
///
/// Immutable once constructed. The same event value is cloned into every
/// routed backend's queue; backends never mutate it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncEvent {
    /// What happened.
    pub kind: EventKind,
    /// Whether the changed entry is (or was) a directory.
    pub is_directory: bool,
    /// Absolute path of the changed entry.
    pub source_absolute: PathBuf,
    /// Path of the changed entry relative to the owning watch's source root.
    pub source_relative: PathBuf,
    /// Destination identifier: the watch target root joined with the
    /// relative path, using `/` separators.
    pub target_absolute: String,
    /// For rename events, the path the entry was moved away from.
    pub moved_from: Option<PathBuf>,
    /// Backend names this event routes to, copied from the watch config.
    pub backends: Vec<String>,
}

impl SyncEvent {
    /// Builds an event for a change under `watch.source`, deriving the
    /// relative and target paths.
    pub fn resolve(
        watch: &WatchConfig,
        kind: EventKind,
        is_directory: bool,
        source: &Path,
        moved_from: Option<PathBuf>,
    ) -> Result<Self, DomainError> {
        let relative = source
            .strip_prefix(&watch.source)
            .map_err(|_| DomainError::PathNotInWatchRoot {
                path: source.display().to_string(),
                root: watch.source.display().to_string(),
            })?
            .to_path_buf();

        let target_absolute = join_target(&watch.target, &relative);

        Ok(Self {
            kind,
            is_directory,
            source_absolute: source.to_path_buf(),
            source_relative: relative,
            target_absolute,
            moved_from,
            backends: watch.backends.clone(),
        })
    }

    /// The identifier used for progress reporting.
    pub fn item_id(&self) -> String {
        self.source_absolute.display().to_string()
    }

    /// The default dedup key: per-file coalescing on the absolute source path.
    pub fn default_key(&self) -> String {
        self.item_id()
    }
}

/// Joins a backend target root with a relative path, using `/` separators.
///
/// The target root may be a local path, a remote root like `/docs`, or a
/// `host:/path` spec for the mirror tool; only trailing-slash handling is
/// normalized here.
pub fn join_target(root: &str, relative: &Path) -> String {
    let root = root.trim_end_matches('/');
    let rel = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    if rel.is_empty() {
        root.to_string()
    } else {
        format!("{root}/{rel}")
    }
}
