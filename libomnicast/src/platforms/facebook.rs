//! Facebook Page adapter (Graph API)
//!
//! Text posts go to `/{page-id}/feed`, images to `/{page-id}/photos` and
//! videos to `/{page-id}/videos`. The account id is the page id and the
//! token a page access token.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use crate::accounts::Credentials;
use crate::error::PlatformError;
use crate::platforms::http::{self, endpoint, string_at, HttpFailure};
use crate::platforms::{PlatformAdapter, DEFAULT_TIMEOUT};
use crate::types::{Content, MediaKind, PlatformId};

pub const DEFAULT_BASE_URL: &str = "https://graph.facebook.com/v19.0";
pub const CHARACTER_LIMIT: usize = 63206;

/// Classify a Graph API failure by its `error.code`, falling back to HTTP status.
///
/// Shared with the Instagram adapter, which speaks the same API.
pub(crate) fn map_graph_failure(failure: HttpFailure) -> PlatformError {
    if let HttpFailure::Status { body, .. } = &failure {
        let code = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| v["error"]["code"].as_i64());
        let detail = http::truncate(body);

        match code {
            Some(190) | Some(102) => return PlatformError::AuthExpired(detail),
            Some(4) | Some(17) | Some(32) | Some(613) => {
                return PlatformError::RateLimited(detail)
            }
            Some(1) | Some(2) => return PlatformError::TransientNetwork(detail),
            _ => {}
        }
    }
    failure.into()
}

pub struct FacebookAdapter {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl FacebookAdapter {
    pub fn new(client: reqwest::Client, base_url: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        if let Some(timeout) = timeout {
            self.timeout = timeout;
        }
        self
    }

    /// Edge and form body for the content's media kind
    fn request_parts(content: &Content, page_id: &str) -> (String, Value) {
        let caption = content.compose();
        let media = content.media_reference.as_deref().map(str::trim);

        match (content.media_kind(), media) {
            (Some(MediaKind::Image), Some(url)) => (
                format!("/{}/photos", page_id),
                json!({ "url": url, "caption": caption }),
            ),
            (Some(MediaKind::Video), Some(url)) => (
                format!("/{}/videos", page_id),
                json!({ "file_url": url, "description": caption }),
            ),
            _ => (format!("/{}/feed", page_id), json!({ "message": caption })),
        }
    }
}

#[async_trait]
impl PlatformAdapter for FacebookAdapter {
    fn platform(&self) -> PlatformId {
        PlatformId::Facebook
    }

    fn character_limit(&self) -> Option<usize> {
        Some(CHARACTER_LIMIT)
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn publish(
        &self,
        content: &Content,
        credentials: &Credentials,
    ) -> Result<String, PlatformError> {
        self.validate_content(content)?;

        let (path, body) = Self::request_parts(content, &credentials.account_id);
        let request = self
            .client
            .post(endpoint(&self.base_url, &path))
            .query(&[("access_token", credentials.access_token())])
            .json(&body);

        let reply = http::send(request).await.map_err(map_graph_failure)?;

        // Photo uploads return both; post_id is the feed story
        string_at(&reply.body, &["post_id"])
            .or_else(|| string_at(&reply.body, &["id"]))
            .ok_or_else(|| http::missing_field("Facebook", "id"))
    }
}
