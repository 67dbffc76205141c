//! Shared HTTP plumbing for the REST adapters
//!
//! Responses are classified by status first:
//!
//! - 401/403 → `AuthExpired`
//! - 429 → `RateLimited`
//! - 400/413/422 → `ContentRejected`
//! - 5xx, connect failures, timeouts → `TransientNetwork`
//! - anything else → `Unknown`
//!
//! Adapters whose APIs carry richer error codes in the body refine this
//! through [`HttpFailure::Status`] before falling back to the default mapping.

use reqwest::header::HeaderMap;
use reqwest::{RequestBuilder, StatusCode};
use serde_json::Value;

use crate::error::PlatformError;

const MAX_DETAIL_CHARS: usize = 300;

pub(crate) fn build_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("omnicast/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Join a base URL and a path without doubling slashes
pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// A successful response
#[derive(Debug)]
pub(crate) struct HttpReply {
    pub headers: HeaderMap,
    pub body: Value,
}

/// A failed exchange, before classification
#[derive(Debug)]
pub(crate) enum HttpFailure {
    Status { status: StatusCode, body: String },
    Transport(reqwest::Error),
    Decode(String),
}

impl From<HttpFailure> for PlatformError {
    fn from(failure: HttpFailure) -> Self {
        match failure {
            HttpFailure::Status { status, body } => map_status(status, &body),
            HttpFailure::Transport(e) => map_transport_error(&e),
            HttpFailure::Decode(detail) => PlatformError::Unknown(detail),
        }
    }
}

/// Send a request and decode a JSON body (an empty body decodes to `null`)
pub(crate) async fn send(request: RequestBuilder) -> Result<HttpReply, HttpFailure> {
    let response = request.send().await.map_err(HttpFailure::Transport)?;
    let status = response.status();
    let headers = response.headers().clone();
    let text = response.text().await.map_err(HttpFailure::Transport)?;

    if !status.is_success() {
        return Err(HttpFailure::Status { status, body: text });
    }

    let body = if text.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&text).map_err(|e| {
            HttpFailure::Decode(format!(
                "Malformed response body ({}): {}",
                e,
                truncate(&text)
            ))
        })?
    };

    Ok(HttpReply { headers, body })
}

pub(crate) fn map_status(status: StatusCode, body: &str) -> PlatformError {
    let detail = format!("HTTP {}: {}", status.as_u16(), truncate(body));
    match status.as_u16() {
        401 | 403 => PlatformError::AuthExpired(detail),
        429 => PlatformError::RateLimited(detail),
        400 | 413 | 422 => PlatformError::ContentRejected(detail),
        500..=599 => PlatformError::TransientNetwork(detail),
        _ => PlatformError::Unknown(detail),
    }
}

pub(crate) fn map_transport_error(error: &reqwest::Error) -> PlatformError {
    if error.is_timeout() || error.is_connect() || error.is_request() || error.is_body() {
        PlatformError::TransientNetwork(error.to_string())
    } else {
        PlatformError::Unknown(error.to_string())
    }
}

/// Pull a string (or number) field out of a JSON object path
pub(crate) fn string_at(body: &Value, path: &[&str]) -> Option<String> {
    let mut current = body;
    for key in path {
        current = current.get(key)?;
    }
    match current {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn missing_field(platform: &str, field: &str) -> PlatformError {
    PlatformError::Unknown(format!("{} response is missing '{}'", platform, field))
}

pub(crate) fn truncate(text: &str) -> String {
    let text = text.trim();
    if text.chars().count() <= MAX_DETAIL_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(MAX_DETAIL_CHARS).collect();
    format!("{}...", cut)
}
