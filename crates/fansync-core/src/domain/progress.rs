//! Progress reporting from backends to the caller.
//!
//! Every unit of work a backend accepts is bracketed: `start` emits 0.0,
//! zero or more `update` calls emit intermediate values, and `finish` emits
//! the terminal 1.0. The reporter tracks the last value per in-flight item so
//! that exactly one 1.0 reaches the callback per started item, even when the
//! operation itself already reported 100% (the mirror tool does) or failed
//! halfway through. Callers rely on that terminal report to stop indicating
//! "busy".

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Callback surface: `(backend_name, item_identifier, value in 0.0..=1.0)`.
///
/// Invoked from arbitrary backend worker tasks; callers marshal to their own
/// thread if they need affinity.
pub type ProgressFn = Arc<dyn Fn(&str, &str, f64) + Send + Sync>;

/// Per-backend progress reporter handed to each backend at construction.
#[derive(Clone)]
pub struct ProgressReporter {
    backend: String,
    callback: ProgressFn,
    /// Last reported value per in-flight item.
    active: Arc<Mutex<HashMap<String, f64>>>,
}

impl ProgressReporter {
    /// Creates a reporter tagged with the given backend name.
    pub fn new(backend: impl Into<String>, callback: ProgressFn) -> Self {
        Self {
            backend: backend.into(),
            callback,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// A reporter that drops everything; useful in tests and one-shot tools.
    pub fn noop(backend: impl Into<String>) -> Self {
        Self::new(backend, Arc::new(|_, _, _| {}))
    }

    /// The backend name this reporter is tagged with.
    pub fn backend(&self) -> &str {
        &self.backend
    }

    /// Marks the start of a unit of work (emits 0.0).
    pub fn start(&self, item: &str) {
        self.active
            .lock()
            .expect("progress state poisoned")
            .insert(item.to_string(), 0.0);
        (self.callback)(&self.backend, item, 0.0);
    }

    /// Reports partial completion. Values are clamped to `[0.0, 1.0]`.
    pub fn update(&self, item: &str, value: f64) {
        let value = value.clamp(0.0, 1.0);
        self.active
            .lock()
            .expect("progress state poisoned")
            .insert(item.to_string(), value);
        (self.callback)(&self.backend, item, value);
    }

    /// Marks the end of a unit of work, success or failure.
    ///
    /// Emits 1.0 unless an `update` already reached it, so each started item
    /// sees exactly one terminal report.
    pub fn finish(&self, item: &str) {
        let last = self
            .active
            .lock()
            .expect("progress state poisoned")
            .remove(item);
        if last.unwrap_or(0.0) < 1.0 {
            (self.callback)(&self.backend, item, 1.0);
        }
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("backend", &self.backend)
            .finish_non_exhaustive()
    }
}
