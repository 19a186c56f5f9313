//! Shared HTTP plumbing for remote providers.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::config::{APP_NAME, APP_VERSION};

/// Upper bound on provider error bodies carried in `ProviderError::Status`.
const MAX_ERROR_BODY_CHARS: usize = 500;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Cannot reach provider at {0}")]
    Connection(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Provider returned error (status {status}): {body}")]
    Status { status: u16, body: String },

    #[error("Malformed provider response: {0}")]
    Malformed(String),

    #[error("Provider response had no content")]
    MissingContent,

    #[error("HTTP client error: {0}")]
    Http(String),
}

/// One client per pipeline so connection pools are reused across stages.
pub fn build_client(request_timeout: Duration) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(request_timeout)
        .user_agent(format!("{APP_NAME}/{APP_VERSION}"))
        .build()
        .map_err(|e| ProviderError::Http(e.to_string()))
}

pub fn map_transport(e: reqwest::Error, endpoint: &str) -> ProviderError {
    if e.is_connect() {
        ProviderError::Connection(endpoint.to_string())
    } else if e.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Http(e.to_string())
    }
}

/// Send a prepared request and decode a 2xx JSON body.
pub async fn send_json(
    request: reqwest::RequestBuilder,
    endpoint: &str,
) -> Result<Value, ProviderError> {
    let response = request
        .send()
        .await
        .map_err(|e| map_transport(e, endpoint))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::Status {
            status: status.as_u16(),
            body: truncate_chars(&body, MAX_ERROR_BODY_CHARS),
        });
    }

    let text = response
        .text()
        .await
        .map_err(|e| map_transport(e, endpoint))?;
    serde_json::from_str(&text).map_err(|e| ProviderError::Malformed(e.to_string()))
}

/// `base` + `/` + `path`, tolerating a trailing slash on the base.
pub fn endpoint(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// First `max` characters of `text` (char-boundary safe).
pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
