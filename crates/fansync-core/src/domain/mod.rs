//! Domain types shared across the fansync crates.

pub mod errors;
pub mod event;
pub mod progress;

pub use errors::{BackendError, DomainError};
pub use event::{join_target, EventKind, SyncEvent};
pub use progress::{ProgressFn, ProgressReporter};
