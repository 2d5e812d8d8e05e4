//! Chunk store backend against a mock API server.

use std::sync::Arc;

use fansync_core::config::Config;
use fansync_core::domain::BackendError;
use fansync_core::ports::SyncBackend;
use wiremock::matchers::{method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

use fansync_backends::ChunkStoreBackend;

use crate::common::{collecting_reporter, mount_account, write_token};

async fn ready_backend(
    server: &MockServer,
    dir: &std::path::Path,
    chunk_size: u64,
    small_file_threshold: u64,
) -> (ChunkStoreBackend, Arc<std::sync::Mutex<Vec<(String, f64)>>>) {
    mount_account(server).await;

    let mut config = Config::default();
    config.backends.chunkstore.base_url = server.uri();
    config.backends.chunkstore.token_file = write_token(dir, "chunkstore.json");
    config.backends.chunkstore.chunk_size = chunk_size;
    config.backends.chunkstore.small_file_threshold = small_file_threshold;

    let (reporter, seen) = collecting_reporter("chunkstore");
    let mut backend = ChunkStoreBackend::new(Arc::new(config), reporter);
    backend.init().await.expect("init against mock server");
    (backend, seen)
}

#[tokio::test]
async fn test_chunked_upload_session() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    // 10 bytes at a 4-byte chunk size: appends at offsets 0, 4, 8.
    let local = dir.path().join("big.bin");
    std::fs::write(&local, b"0123456789").unwrap();

    Mock::given(method("POST"))
        .and(path("/files/session/append"))
        .and(query_param("offset", "0"))
        .and(query_param_is_missing("session_id"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"session_id": "sess-1"})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/files/session/append"))
        .and(query_param("session_id", "sess-1"))
        .and(query_param("offset", "4"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"session_id": "sess-1"})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/files/session/append"))
        .and(query_param("session_id", "sess-1"))
        .and(query_param("offset", "8"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"session_id": "sess-1"})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/files/session/commit"))
        .and(query_param("session_id", "sess-1"))
        .and(query_param("path", "/docs/big.bin"))
        .and(query_param("overwrite", "true"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let (mut backend, seen) = ready_backend(&server, dir.path(), 4, 1).await;
    backend.upload(&local, "/docs/big.bin").await.unwrap();

    let values: Vec<f64> = seen.lock().unwrap().iter().map(|(_, v)| *v).collect();
    // start, then one report per chunk; the final chunk lands on 1.0 so
    // finish adds nothing.
    assert_eq!(values, vec![0.0, 0.4, 0.8, 1.0]);
}

#[tokio::test]
async fn test_small_file_single_put() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    let local = dir.path().join("small.txt");
    std::fs::write(&local, b"hi").unwrap();

    Mock::given(method("POST"))
        .and(path("/files/content"))
        .and(query_param("path", "/docs/small.txt"))
        .and(query_param("overwrite", "true"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let (mut backend, seen) = ready_backend(&server, dir.path(), 1024, 1024).await;
    backend.upload(&local, "/docs/small.txt").await.unwrap();

    let values: Vec<f64> = seen.lock().unwrap().iter().map(|(_, v)| *v).collect();
    assert_eq!(values, vec![0.0, 1.0]);
}

#[tokio::test]
async fn test_rm_tolerates_missing_remote() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("POST"))
        .and(path("/files/delete"))
        .and(query_param("path", "/docs/gone.txt"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let (mut backend, _) = ready_backend(&server, dir.path(), 1024, 1024).await;
    backend.rm("/docs/gone.txt").await.unwrap();
}

#[tokio::test]
async fn test_rm_surfaces_other_protocol_errors() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("POST"))
        .and(path("/files/delete"))
        .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
        .mount(&server)
        .await;

    let (mut backend, _) = ready_backend(&server, dir.path(), 1024, 1024).await;
    let err = backend.rm("/docs/f.txt").await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BackendError>(),
        Some(BackendError::Protocol { status: 503, .. })
    ));
}

#[tokio::test]
async fn test_walk_pages_through_delta() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/delta"))
        .and(query_param_is_missing("cursor"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "entries": [
                {"path": "/docs/a.txt"},
                {"path": "/docs/sub", "is_dir": true},
                {"path": "/other/x.txt"}
            ],
            "cursor": "c1",
            "has_more": true
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/delta"))
        .and(query_param("cursor", "c1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "entries": [{"path": "/docs/sub/b.txt"}],
            "cursor": "c2",
            "has_more": false
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (mut backend, _) = ready_backend(&server, dir.path(), 1024, 1024).await;
    let paths = backend.walk("/docs").await.unwrap();
    assert_eq!(paths, vec!["/docs/a.txt", "/docs/sub/b.txt"]);
}
