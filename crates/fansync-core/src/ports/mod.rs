//! Ports (driven interfaces) implemented by adapter crates.

pub mod backend;
pub mod registry;

pub use backend::{EventKeyFn, SyncBackend};
pub use registry::{BackendFactory, BackendRegistry};
