//! Storage backend port (driven/secondary port)
//!
//! This module defines the contract every remote storage protocol implements:
//! the subprocess mirror tool, the chunked-upload object store, and the
//! hierarchical node-tree drive. The sync engine only ever talks to backends
//! through this trait.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because errors at port boundaries are adapter-specific;
//!   where classification matters the adapter wraps a
//!   [`BackendError`](crate::domain::errors::BackendError) so callers can downcast.
//! - Uses `#[async_trait]` for async trait methods.
//! - A backend instance is owned by exactly one worker task after `init()`,
//!   so implementations need no internal locking.

use std::path::Path;

use anyhow::Result;
use std::sync::Arc;
use tracing::{error, warn};

use crate::domain::errors::BackendError;
use crate::domain::event::SyncEvent;
use crate::domain::progress::ProgressReporter;

/// Backend-supplied dedup key function for its coalescing queue.
///
/// The key is only ever compared for queue membership; it carries no business
/// meaning. `None` from [`SyncBackend::event_key_fn`] means "coalesce per
/// file on the absolute source path".
pub type EventKeyFn = Arc<dyn Fn(&SyncEvent) -> String + Send + Sync>;

/// Contract implemented once per remote storage protocol.
///
/// All operations other than `init` may only be invoked after `init()` has
/// completed successfully. One worker task drives each instance strictly
/// sequentially, so methods take `&mut self` and never race.
#[async_trait::async_trait]
pub trait SyncBackend: Send {
    /// The registered name of this backend (matches watch routing entries).
    fn name(&self) -> &str;

    /// The progress reporter this backend was constructed with.
    fn reporter(&self) -> &ProgressReporter;

    /// One-time setup: load the persisted credential, verify the remote is
    /// reachable. An error here is fatal for this backend only; the manager
    /// starts the others regardless.
    async fn init(&mut self) -> Result<()>;

    /// Propagates a non-removal change to the remote.
    async fn push(&mut self, event: &SyncEvent) -> Result<()>;

    /// Propagates a removal to the remote.
    async fn delete(&mut self, event: &SyncEvent) -> Result<()>;

    /// Enumerates every remote entry path under `remote`.
    ///
    /// Finite and restartable: re-invoking re-walks from scratch and nothing
    /// is mutated. Used for drift detection and by the protocol tests.
    async fn walk(&mut self, remote: &str) -> Result<Vec<String>>;

    /// Deletes (or trashes) a remote object.
    ///
    /// Must refuse the remote root itself with
    /// [`BackendError::RootDeletion`], whatever the caller passed.
    async fn rm(&mut self, remote: &str) -> Result<()>;

    /// Downloads a single remote object to `local`.
    async fn download(&mut self, local: &Path, remote: &str) -> Result<()>;

    /// Uploads a single local file to `remote`.
    async fn upload(&mut self, local: &Path, remote: &str) -> Result<()>;

    /// Whole-tree synchronization of every enabled watch routed to this
    /// backend, bypassing the event queue. `pull` reverses direction:
    /// overwrite source from target.
    async fn full_sync(&mut self, pull: bool) -> Result<()>;

    /// Optional dedup-granularity override for this backend's queue.
    fn event_key_fn(&self) -> Option<EventKeyFn> {
        None
    }

    /// Consumes one queued event: removals go to [`delete`](Self::delete),
    /// everything else to [`push`](Self::push).
    ///
    /// Progress is bracketed here - 0.0 on entry, exactly one terminal 1.0 on
    /// exit - even when the operation fails. Disappearing-file races are
    /// expected and logged as warnings, not treated as errors; an ambiguous
    /// remote path is logged loudly because it means remote state needs a
    /// human.
    async fn consume_event(&mut self, event: &SyncEvent) {
        let item = event.item_id();
        self.reporter().start(&item);

        let outcome = if event.kind.is_removal() {
            self.delete(event).await
        } else {
            self.push(event).await
        };

        if let Err(err) = outcome {
            match err.downcast_ref::<BackendError>() {
                Some(BackendError::AmbiguousRemotePath(path)) => {
                    error!(
                        backend = self.name(),
                        path = %path,
                        "Ambiguous remote path; fix the remote tree manually"
                    );
                }
                _ => {
                    warn!(
                        backend = self.name(),
                        item = %item,
                        error = %format!("{err:#}"),
                        "Sync operation failed; continuing with next event"
                    );
                }
            }
        }

        self.reporter().finish(&item);
    }
}
