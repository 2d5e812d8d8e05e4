//! fansync-sync - The synchronization engine
//!
//! Wires filesystem change notifications to per-backend workers:
//!
//! ```text
//! notify (OS events)
//!       │
//!       ▼
//!  FileWatcher ──→ intake CoalescingQueue ──→ SyncManager fan-out
//!                                                   │
//!                                 ┌─────────────────┼─────────────────┐
//!                                 ▼                 ▼                 ▼
//!                         per-backend queue  per-backend queue  per-backend queue
//!                                 │                 │                 │
//!                           BackendWorker     BackendWorker     BackendWorker
//! ```
//!
//! ## Modules
//!
//! - [`queue`] - Blocking FIFO queue with set semantics on a dedup key
//! - [`worker`] - One sequential consume loop per backend
//! - [`manager`] - Lifecycle, fan-out and progress aggregation
//! - [`watcher`] - notify wrapper producing resolved [`SyncEvent`]s
//!
//! [`SyncEvent`]: fansync_core::domain::SyncEvent

pub mod manager;
pub mod queue;
pub mod watcher;
pub mod worker;

#[cfg(test)]
pub(crate) mod testutil;
