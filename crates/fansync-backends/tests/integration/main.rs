//! Integration tests for fansync-backends.
//!
//! Uses wiremock to simulate the cloud storage APIs and verifies
//! end-to-end behavior of the chunk store and tree drive backends:
//! authorization, chunked upload sessions, path resolution, removal
//! guards, and remote enumeration.

mod common;

mod test_chunkstore;
mod test_treedrive;
