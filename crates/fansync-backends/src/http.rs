//! Shared HTTP plumbing for the cloud backends.

use anyhow::Result;
use fansync_core::domain::BackendError;
use reqwest::Response;

/// Maps a non-success response to [`BackendError::Protocol`], keeping the
/// body as the message.
pub(crate) async fn check(response: Response, what: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(anyhow::Error::from(BackendError::Protocol {
        status: status.as_u16(),
        message,
    })
    .context(format!("{what} failed")))
}
