//! HTTP plumbing shared by the remote backends.

use reqwest::{Client, Response, StatusCode};
use std::time::Duration;

use studiosync_common::{Error, Result};

const USER_AGENT: &str = concat!("StudioSync/", env!("CARGO_PKG_VERSION"));

/// Build the HTTP client used by a remote backend.
pub(crate) fn build_client(timeout: Option<Duration>) -> Result<Client> {
    let mut builder = Client::builder().user_agent(USER_AGENT);
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder
        .build()
        .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))
}

/// Wrap a transport-level failure.
pub(crate) fn transport_error(context: &str, e: reqwest::Error) -> Error {
    Error::Network(format!("{}: {}", context, e))
}

/// Pass successful responses through and map failures onto the common
/// taxonomy. 404 becomes [`Error::NotFound`].
pub(crate) async fn check_status(response: Response, context: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, &body, context))
}

pub(crate) fn status_error(status: StatusCode, body: &str, context: &str) -> Error {
    match status {
        StatusCode::NOT_FOUND => Error::NotFound(format!("{}: resource not found", context)),
        StatusCode::UNAUTHORIZED => {
            Error::Network(format!("{}: invalid or expired credentials", context))
        }
        StatusCode::FORBIDDEN => Error::Network(format!("{}: access denied - {}", context, body)),
        _ => Error::Network(format!("{}: {} - {}", context, status, body)),
    }
}

/// Decode a JSON body into `T`.
pub(crate) async fn json_body<T: serde::de::DeserializeOwned>(
    response: Response,
    context: &str,
) -> Result<T> {
    response
        .json()
        .await
        .map_err(|e| Error::Network(format!("{}: failed to parse response: {}", context, e)))
}

/// Collect a binary body.
pub(crate) async fn bytes_body(response: Response, context: &str) -> Result<Vec<u8>> {
    response
        .bytes()
        .await
        .map(|b| b.to_vec())
        .map_err(|e| Error::Network(format!("{}: failed to read body: {}", context, e)))
}
