//! Configuration module for fansync.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation and serde defaults. The configuration is loaded once
//! at startup and passed around as an immutable `Arc<Config>`; nothing mutates
//! it for the lifetime of the process.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for fansync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Watch definitions binding local trees to backend targets.
    #[serde(default)]
    pub watches: Vec<WatchConfig>,
    /// Per-backend protocol settings.
    #[serde(default)]
    pub backends: BackendSettings,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// One watched directory tree and its sync routing.
///
/// Many watches may route to the same backend name; the manager still starts
/// exactly one backend instance per name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Absolute path of the local directory to watch.
    pub source: PathBuf,
    /// Backend-specific destination root (path or remote root).
    pub target: String,
    /// Backend names this watch routes to.
    pub backends: Vec<String>,
    /// Glob patterns (relative to `source`) excluded from syncing.
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Disabled watches are ignored entirely.
    #[serde(default)]
    pub disabled: bool,
}

impl WatchConfig {
    /// Returns true if this watch routes events to the given backend name.
    pub fn routes_to(&self, backend: &str) -> bool {
        self.backends.iter().any(|b| b == backend)
    }
}

/// Protocol settings for the built-in backends.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendSettings {
    #[serde(default)]
    pub mirror: MirrorConfig,
    #[serde(default)]
    pub chunkstore: ChunkStoreConfig,
    #[serde(default)]
    pub treedrive: TreeDriveConfig,
}

/// Settings for the subprocess-driven mirror backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// The mirroring command to invoke.
    #[serde(default = "default_mirror_command")]
    pub command: String,
    /// Extra arguments passed on every invocation (e.g. `-az`, `--partial`).
    #[serde(default)]
    pub arguments: Vec<String>,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            command: default_mirror_command(),
            arguments: Vec::new(),
        }
    }
}

fn default_mirror_command() -> String {
    "rsync".to_string()
}

/// Settings for the chunked-upload object store backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkStoreConfig {
    /// Base URL of the object store API. Empty means "not configured".
    #[serde(default)]
    pub base_url: String,
    /// Application key used during authorization.
    #[serde(default)]
    pub app_key: String,
    /// Application secret used during authorization.
    #[serde(default)]
    pub app_secret: String,
    /// Where the persisted access token lives.
    #[serde(default = "default_chunkstore_token_file")]
    pub token_file: PathBuf,
    /// Chunk size for resumable uploads, in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// Files strictly smaller than this go up in a single atomic put.
    #[serde(default = "default_small_file_threshold")]
    pub small_file_threshold: u64,
}

impl Default for ChunkStoreConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            app_key: String::new(),
            app_secret: String::new(),
            token_file: default_chunkstore_token_file(),
            chunk_size: default_chunk_size(),
            small_file_threshold: default_small_file_threshold(),
        }
    }
}

fn default_chunk_size() -> u64 {
    1024 * 1024
}

fn default_small_file_threshold() -> u64 {
    256 * 1024
}

fn default_chunkstore_token_file() -> PathBuf {
    token_dir().join("chunkstore.json")
}

/// Settings for the hierarchical node-tree drive backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeDriveConfig {
    /// Base URL of the drive API. Empty means "not configured".
    #[serde(default)]
    pub base_url: String,
    /// Application key used during authorization.
    #[serde(default)]
    pub app_key: String,
    /// Application secret used during authorization.
    #[serde(default)]
    pub app_secret: String,
    /// Where the persisted access token lives.
    #[serde(default = "default_treedrive_token_file")]
    pub token_file: PathBuf,
    /// Well-known ID of the drive root node.
    #[serde(default = "default_root_id")]
    pub root_id: String,
    /// Move deleted nodes to the trash instead of hard-deleting them.
    #[serde(default = "default_trash")]
    pub trash: bool,
}

impl Default for TreeDriveConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            app_key: String::new(),
            app_secret: String::new(),
            token_file: default_treedrive_token_file(),
            root_id: default_root_id(),
            trash: default_trash(),
        }
    }
}

fn default_treedrive_token_file() -> PathBuf {
    token_dir().join("treedrive.json")
}

fn default_root_id() -> String {
    "root".to_string()
}

fn default_trash() -> bool {
    true
}

fn token_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join("fansync")
        .join("tokens")
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/fansync/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("fansync")
            .join("config.yaml")
    }

    /// All watches that are not disabled.
    pub fn enabled_watches(&self) -> impl Iterator<Item = &WatchConfig> {
        self.watches.iter().filter(|w| !w.disabled)
    }

    /// Enabled watches routed to the given backend name.
    pub fn watches_for(&self, backend: &str) -> impl Iterator<Item = &WatchConfig> + '_ {
        let backend = backend.to_string();
        self.enabled_watches()
            .filter(move |w| w.routes_to(&backend))
    }

    /// The set of backend names referenced by at least one enabled watch.
    ///
    /// Ordered so that startup is deterministic.
    pub fn backend_names(&self) -> BTreeSet<String> {
        self.enabled_watches()
            .flat_map(|w| w.backends.iter().cloned())
            .collect()
    }
}
