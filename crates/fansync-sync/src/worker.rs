//! Per-backend consume loop.
//!
//! A [`BackendWorker`] owns one backend instance and one coalescing queue and
//! drains it strictly sequentially: at most one in-flight sync operation per
//! backend at any time. This keeps backend protocol state simple (no
//! concurrent upload sessions) and respects typical remote-API rate limits.
//! Different backends' workers run fully in parallel.

use std::sync::Arc;

use fansync_core::domain::SyncEvent;
use fansync_core::ports::SyncBackend;
use tracing::{debug, info};

use crate::queue::{CoalescingQueue, Dequeued};

/// Owns one backend and its queue; exits when the stop sentinel is dequeued.
pub struct BackendWorker {
    backend: Box<dyn SyncBackend>,
    queue: Arc<CoalescingQueue<SyncEvent>>,
}

impl BackendWorker {
    /// The backend must already be initialized.
    pub fn new(backend: Box<dyn SyncBackend>, queue: Arc<CoalescingQueue<SyncEvent>>) -> Self {
        Self { backend, queue }
    }

    /// Runs the consume loop to completion.
    ///
    /// There is no mid-operation cancellation: whatever was dequeued before
    /// the sentinel finishes before the loop exits.
    pub async fn run(mut self) {
        let name = self.backend.name().to_string();
        debug!(backend = %name, "Backend worker running");

        loop {
            match self.queue.get().await {
                Dequeued::Item(event) => {
                    debug!(
                        backend = %name,
                        path = %event.source_absolute.display(),
                        kind = ?event.kind,
                        "Processing change event"
                    );
                    self.backend.consume_event(&event).await;
                }
                Dequeued::Stopped => break,
            }
        }

        info!(backend = %name, "Backend worker stopped");
    }
}
