//! Tree drive backend against a mock API server.

use std::sync::Arc;

use fansync_core::config::Config;
use fansync_core::domain::BackendError;
use fansync_core::ports::SyncBackend;
use wiremock::matchers::{body_partial_json, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

use fansync_backends::TreeDriveBackend;

use crate::common::{collecting_reporter, mount_account, write_token};

async fn ready_backend(
    server: &MockServer,
    dir: &std::path::Path,
    trash: bool,
) -> TreeDriveBackend {
    mount_account(server).await;

    let mut config = Config::default();
    config.backends.treedrive.base_url = server.uri();
    config.backends.treedrive.token_file = write_token(dir, "treedrive.json");
    config.backends.treedrive.trash = trash;

    let (reporter, _) = collecting_reporter("treedrive");
    let mut backend = TreeDriveBackend::new(Arc::new(config), reporter);
    backend.init().await.expect("init against mock server");
    backend
}

fn node(id: &str, name: &str, kind: &str) -> serde_json::Value {
    serde_json::json!({"id": id, "name": name, "kind": kind})
}

fn nodes(list: Vec<serde_json::Value>) -> serde_json::Value {
    serde_json::json!({ "nodes": list })
}

#[tokio::test]
async fn test_path_resolution_creates_missing_folders_once() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    // First resolution sees an empty tree; the lookups after creation find
    // the folders created moments earlier.
    Mock::given(method("GET"))
        .and(path("/nodes/root/children"))
        .and(query_param("name", "p"))
        .respond_with(ResponseTemplate::new(200).set_body_json(nodes(vec![])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/nodes/root/children"))
        .and(query_param("name", "p"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(nodes(vec![node("id-p", "p", "folder")])),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/nodes/id-p/children"))
        .and(query_param("name", "q"))
        .respond_with(ResponseTemplate::new(200).set_body_json(nodes(vec![])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/nodes/id-p/children"))
        .and(query_param("name", "q"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(nodes(vec![node("id-q", "q", "folder")])),
        )
        .mount(&server)
        .await;

    // Exactly one create per missing segment, parented correctly.
    Mock::given(method("POST"))
        .and(path("/nodes"))
        .and(body_partial_json(
            serde_json::json!({"name": "p", "parent_id": "root"}),
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(node("id-p", "p", "folder")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/nodes"))
        .and(body_partial_json(
            serde_json::json!({"name": "q", "parent_id": "id-p"}),
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(node("id-q", "q", "folder")))
        .expect(1)
        .mount(&server)
        .await;

    let backend = ready_backend(&server, dir.path(), true).await;

    let created = backend.path_to_ids("/p/q", true).await.unwrap().unwrap();
    assert_eq!(created, vec!["root", "id-p", "id-q"]);

    // Resolving again without create_missing issues no creates and yields
    // the same chain.
    let resolved = backend.path_to_ids("/p/q", false).await.unwrap().unwrap();
    assert_eq!(resolved, created);
}

#[tokio::test]
async fn test_missing_segment_without_create_is_none() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/nodes/root/children"))
        .and(query_param("name", "nope"))
        .respond_with(ResponseTemplate::new(200).set_body_json(nodes(vec![])))
        .mount(&server)
        .await;

    let backend = ready_backend(&server, dir.path(), true).await;
    assert!(backend.path_to_ids("/nope", false).await.unwrap().is_none());
}

#[tokio::test]
async fn test_duplicate_names_are_ambiguous() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/nodes/root/children"))
        .and(query_param("name", "dup"))
        .respond_with(ResponseTemplate::new(200).set_body_json(nodes(vec![
            node("id-1", "dup", "folder"),
            node("id-2", "dup", "folder"),
        ])))
        .mount(&server)
        .await;

    let backend = ready_backend(&server, dir.path(), true).await;
    let err = backend.path_to_ids("/dup/child", true).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BackendError>(),
        Some(BackendError::AmbiguousRemotePath(_))
    ));
}

#[tokio::test]
async fn test_rm_trashes_by_default() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/nodes/root/children"))
        .and(query_param("name", "old.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(nodes(vec![node("id-f", "old.txt", "file")])),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/nodes/id-f/trash"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut backend = ready_backend(&server, dir.path(), true).await;
    backend.rm("/old.txt").await.unwrap();
}

#[tokio::test]
async fn test_rm_hard_deletes_when_trash_disabled() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/nodes/root/children"))
        .and(query_param("name", "old.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(nodes(vec![node("id-f", "old.txt", "file")])),
        )
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/nodes/id-f"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut backend = ready_backend(&server, dir.path(), false).await;
    backend.rm("/old.txt").await.unwrap();
}

#[tokio::test]
async fn test_rm_of_missing_path_is_success() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/nodes/root/children"))
        .and(query_param("name", "gone.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_json(nodes(vec![])))
        .mount(&server)
        .await;

    let mut backend = ready_backend(&server, dir.path(), true).await;
    backend.rm("/gone.txt").await.unwrap();
}

#[tokio::test]
async fn test_upload_updates_existing_node() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("f.txt");
    std::fs::write(&local, b"new content").unwrap();

    Mock::given(method("GET"))
        .and(path("/nodes/root/children"))
        .and(query_param("name", "docs"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(nodes(vec![node("id-d", "docs", "folder")])),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/nodes/id-d/children"))
        .and(query_param("name", "f.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(nodes(vec![node("id-f", "f.txt", "file")])),
        )
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/nodes/id-f/content"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut backend = ready_backend(&server, dir.path(), true).await;
    backend.upload(&local, "/docs/f.txt").await.unwrap();
}

#[tokio::test]
async fn test_walk_depth_first_over_node_ids() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/nodes/root/children"))
        .and(query_param("name", "docs"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(nodes(vec![node("id-d", "docs", "folder")])),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/nodes/id-d/children"))
        .and(query_param_is_missing("name"))
        .respond_with(ResponseTemplate::new(200).set_body_json(nodes(vec![
            node("id-a", "a.txt", "file"),
            node("id-s", "sub", "folder"),
        ])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/nodes/id-s/children"))
        .and(query_param_is_missing("name"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(nodes(vec![node("id-b", "b.txt", "file")])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut backend = ready_backend(&server, dir.path(), true).await;
    let mut paths = backend.walk("/docs").await.unwrap();
    paths.sort();
    assert_eq!(paths, vec!["/docs/a.txt", "/docs/sub/b.txt"]);
}
