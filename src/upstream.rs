//! Shared HTTP plumbing for calls to hosted models.
//!
//! Every external call goes through a `reqwest::Client` built with a
//! bounded timeout, and every failure is mapped into the typed
//! [`UpstreamError`] so timeouts surface as a distinct, retryable class.

use std::time::Duration;

use reqwest::{Client, Response};
use surgisense_core::error::{ConfigurationError, UpstreamError};

/// Longest response body kept in an error message.
const MAX_ERROR_BODY_CHARS: usize = 500;

/// Build a client whose every request is bounded by `timeout_secs`.
pub fn build_client(timeout_secs: u64) -> Result<Client, ConfigurationError> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ConfigurationError::Invalid(format!("failed to build HTTP client: {}", e)))
}

/// Map a transport-level `reqwest` failure into an [`UpstreamError`].
pub fn map_transport_error(
    operation: &'static str,
    timeout_secs: u64,
    err: reqwest::Error,
) -> UpstreamError {
    if err.is_timeout() {
        UpstreamError::Timeout {
            operation,
            timeout_secs,
        }
    } else if err.is_decode() {
        UpstreamError::InvalidResponse {
            operation,
            message: err.to_string(),
        }
    } else {
        UpstreamError::Transport {
            operation,
            message: err.to_string(),
        }
    }
}

/// Pass a successful response through; turn any other status into
/// [`UpstreamError::Status`] carrying a truncated body.
pub async fn check_status(
    operation: &'static str,
    response: Response,
) -> Result<Response, UpstreamError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(UpstreamError::Status {
        operation,
        status: status.as_u16(),
        body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
    })
}

/// Read a successful response as JSON.
pub async fn read_json(
    operation: &'static str,
    timeout_secs: u64,
    response: Response,
) -> Result<serde_json::Value, UpstreamError> {
    let response = check_status(operation, response).await?;
    response
        .json()
        .await
        .map_err(|e| map_transport_error(operation, timeout_secs, e))
}

/// Exponential backoff before retry `attempt` (1-based): 1s, 2s, 4s, … capped at 32s.
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(1 << (attempt.saturating_sub(1)).min(5))
}
