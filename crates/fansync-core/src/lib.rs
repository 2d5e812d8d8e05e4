//! fansync-core - Domain logic and ports for the fansync daemon
//!
//! This crate contains the pieces shared by every other fansync crate:
//!
//! - [`config`] - Typed YAML configuration (watch definitions, backend settings)
//! - [`domain`] - Domain types: change events, progress reporting, error taxonomy
//! - [`ports`] - The [`SyncBackend`](ports::backend::SyncBackend) contract that
//!   every storage backend implements
//!
//! No I/O happens here beyond reading the configuration file; backends and the
//! sync engine live in `fansync-backends` and `fansync-sync`.

pub mod config;
pub mod domain;
pub mod ports;
