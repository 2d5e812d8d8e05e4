//! Error taxonomy for domain and backend operations.
//!
//! [`DomainError`] covers validation failures inside the engine itself;
//! [`BackendError`] classifies failures at the storage-protocol boundary so
//! that callers can distinguish "expected" transient conditions from remote
//! state that a human must untangle. Port methods return `anyhow::Result`
//! and wrap these where classification matters.

use thiserror::Error;

/// Errors that can occur in domain operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid path format or content.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// An event path that does not live under its watch's source root.
    #[error("Path not within watch root: {path} (root {root})")]
    PathNotInWatchRoot {
        /// The offending absolute path.
        path: String,
        /// The watch source root it was checked against.
        root: String,
    },

    /// Generic validation failure.
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

/// Errors raised by storage backends.
#[derive(Debug, Error)]
pub enum BackendError {
    /// No usable credential; the user must run the authorization flow.
    #[error("Not authorized: {0}")]
    Unauthorized(String),

    /// A required configuration value is missing for this backend.
    #[error("Backend not configured: {0}")]
    NotConfigured(String),

    /// More than one remote entry matched a single path segment.
    ///
    /// This indicates remote-state corruption that requires human attention;
    /// it is never resolved heuristically.
    #[error("Ambiguous remote path: {0}")]
    AmbiguousRemotePath(String),

    /// A deletion was requested for the remote root itself.
    #[error("Refusing to delete remote root: {0}")]
    RootDeletion(String),

    /// The remote object does not exist.
    #[error("Remote not found: {0}")]
    NotFound(String),

    /// The remote API answered with an error status.
    #[error("Protocol error (status {status}): {message}")]
    Protocol {
        /// HTTP status code returned by the remote.
        status: u16,
        /// Response body or reason phrase.
        message: String,
    },

    /// A resumable upload session failed mid-flight.
    #[error("Upload session failed: {0}")]
    UploadSession(String),

    /// The external mirror tool exited unsuccessfully.
    #[error("Mirror command failed: {0}")]
    MirrorCommand(String),
}
