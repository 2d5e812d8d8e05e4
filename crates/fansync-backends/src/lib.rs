//! Storage backend implementations.
//!
//! Three backends ship with fansync:
//!
//! - [`mirror`] — drives an external tree-mirroring tool (rsync by default)
//!   as a subprocess and parses its percentage output for progress.
//! - [`chunkstore`] — a path-addressed object store with single-shot small
//!   uploads and resumable chunked upload sessions.
//! - [`treedrive`] — a hierarchical drive addressed by opaque node IDs,
//!   resolved segment by segment from a root node.
//!
//! [`builtin_registry`] wires all three into a [`BackendRegistry`] under
//! their configuration names.

pub mod auth;
pub mod chunkstore;
pub mod mirror;
pub mod treedrive;

mod fswalk;
mod http;

use std::sync::Arc;

use fansync_core::ports::{BackendRegistry, SyncBackend};

pub use chunkstore::ChunkStoreBackend;
pub use mirror::MirrorBackend;
pub use treedrive::TreeDriveBackend;

/// Registry with every built-in backend registered under its config name.
pub fn builtin_registry() -> BackendRegistry {
    let mut registry = BackendRegistry::new();
    registry.register(
        "mirror",
        Arc::new(|config, reporter| {
            Ok(Box::new(MirrorBackend::new(config, reporter)) as Box<dyn SyncBackend>)
        }),
    );
    registry.register(
        "chunkstore",
        Arc::new(|config, reporter| {
            Ok(Box::new(ChunkStoreBackend::new(config, reporter)) as Box<dyn SyncBackend>)
        }),
    );
    registry.register(
        "treedrive",
        Arc::new(|config, reporter| {
            Ok(Box::new(TreeDriveBackend::new(config, reporter)) as Box<dyn SyncBackend>)
        }),
    );
    registry
}
