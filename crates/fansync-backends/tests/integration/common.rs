//! Shared helpers for the backend integration tests.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use fansync_core::domain::{ProgressFn, ProgressReporter};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use fansync_backends::auth::{TokenRecord, TokenStore};

/// Writes a valid token record under `dir` and returns its path.
pub fn write_token(dir: &Path, name: &str) -> PathBuf {
    let token_path = dir.join(name);
    TokenStore::new(&token_path)
        .save(&TokenRecord {
            access_token: "test-token".to_string(),
            account_id: Some("acct-1".to_string()),
            obtained_at: Utc::now(),
        })
        .unwrap();
    token_path
}

/// Mounts the account endpoint every backend hits during `init`.
pub async fn mount_account(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/account"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "email": "test@example.com"
        })))
        .mount(server)
        .await;
}

/// A reporter that records every `(item, value)` pair it sees.
pub fn collecting_reporter(backend: &str) -> (ProgressReporter, Arc<Mutex<Vec<(String, f64)>>>) {
    let seen: Arc<Mutex<Vec<(String, f64)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let callback: ProgressFn = Arc::new(move |_, item, value| {
        sink.lock().unwrap().push((item.to_string(), value));
    });
    (ProgressReporter::new(backend, callback), seen)
}
