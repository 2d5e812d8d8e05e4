//! Startup-time backend registry.
//!
//! Backend implementations are registered under their string name; the
//! manager resolves `WatchConfig.backends` entries to concrete instances
//! through this map at start time. No runtime introspection: the daemon
//! registers the built-in constructors explicitly during wiring.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};

use crate::config::Config;
use crate::domain::progress::ProgressReporter;
use crate::ports::backend::SyncBackend;

/// Constructor for one backend variant.
///
/// Construction must be cheap and non-blocking; anything that touches the
/// network or credential store belongs in [`SyncBackend::init`].
pub type BackendFactory =
    Arc<dyn Fn(Arc<Config>, ProgressReporter) -> Result<Box<dyn SyncBackend>> + Send + Sync>;

/// Maps backend names to constructor functions.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
}

impl BackendRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a constructor under `name`, replacing any previous one.
    pub fn register(&mut self, name: impl Into<String>, factory: BackendFactory) {
        self.factories.insert(name.into(), factory);
    }

    /// True if a constructor is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Instantiates the backend registered under `name`.
    ///
    /// An unresolvable name is an error; the manager treats it as fatal for
    /// that backend only.
    pub fn create(
        &self,
        name: &str,
        config: Arc<Config>,
        reporter: ProgressReporter,
    ) -> Result<Box<dyn SyncBackend>> {
        match self.factories.get(name) {
            Some(factory) => factory(config, reporter),
            None => bail!("No backend registered under name '{name}'"),
        }
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("names", &self.names())
            .finish()
    }
}
