//! TikTok adapter (Content Posting API)
//!
//! Direct posts are initialised with `POST /v2/post/publish/video/init/`
//! using `PULL_FROM_URL`, so TikTok fetches the video itself. The returned
//! `publish_id` is the post id recorded for the attempt. TikTok accepts
//! video only.
//!
//! TikTok reports failures in an `error.code` string on the body as well as
//! through the HTTP status; the code wins when it is recognised.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use crate::accounts::Credentials;
use crate::error::PlatformError;
use crate::platforms::http::{self, endpoint, string_at, HttpFailure};
use crate::platforms::PlatformAdapter;
use crate::types::{Content, MediaKind, PlatformId};

pub const DEFAULT_BASE_URL: &str = "https://open.tiktokapis.com";
pub const CHARACTER_LIMIT: usize = 2200;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

fn classify_error_code(code: &str, detail: String) -> Option<PlatformError> {
    match code {
        "ok" => None,
        "access_token_invalid" | "scope_not_authorized" | "token_not_authorized_for_specified_scope" => {
            Some(PlatformError::AuthExpired(detail))
        }
        "rate_limit_exceeded" | "spam_risk_too_many_posts" | "spam_risk_user_banned_from_posting" => {
            Some(PlatformError::RateLimited(detail))
        }
        "invalid_params" | "video_pull_failed" | "unaudited_client_can_only_post_to_private_accounts" => {
            Some(PlatformError::ContentRejected(detail))
        }
        "internal_error" => Some(PlatformError::TransientNetwork(detail)),
        _ => Some(PlatformError::Unknown(detail)),
    }
}

fn error_of(body: &Value) -> Option<PlatformError> {
    let code = body["error"]["code"].as_str()?;
    let message = body["error"]["message"].as_str().unwrap_or_default();
    classify_error_code(code, format!("{}: {}", code, message))
}

fn map_failure(failure: HttpFailure) -> PlatformError {
    if let HttpFailure::Status { body, .. } = &failure {
        if let Some(err) = serde_json::from_str::<Value>(body).ok().as_ref().and_then(error_of) {
            return err;
        }
    }
    failure.into()
}

pub struct TikTokAdapter {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl TikTokAdapter {
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
}

#[async_trait]
impl PlatformAdapter for TikTokAdapter {
    fn platform(&self) -> PlatformId {
        PlatformId::TikTok
    }

    fn character_limit(&self) -> Option<usize> {
        Some(CHARACTER_LIMIT)
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn validate_content(&self, content: &Content) -> Result<(), PlatformError> {
        if content.media_kind() != Some(MediaKind::Video) {
            return Err(PlatformError::ContentRejected(
                "TikTok only accepts video content".to_string(),
            ));
        }

        let count = content.compose().chars().count();
        if count > CHARACTER_LIMIT {
            return Err(PlatformError::ContentRejected(format!(
                "Caption exceeds TikTok's {} character limit (current: {} characters)",
                CHARACTER_LIMIT, count
            )));
        }

        Ok(())
    }

    async fn publish(
        &self,
        content: &Content,
        credentials: &Credentials,
    ) -> Result<String, PlatformError> {
        self.validate_content(content)?;
        let video_url = content.media_reference.as_deref().unwrap_or_default().trim();

        let request = self
            .client
            .post(endpoint(&self.base_url, "/v2/post/publish/video/init/"))
            .bearer_auth(credentials.access_token())
            .json(&json!({
                "post_info": {
                    "title": content.compose(),
                    "privacy_level": "PUBLIC_TO_EVERYONE",
                },
                "source_info": {
                    "source": "PULL_FROM_URL",
                    "video_url": video_url,
                },
            }));

        let reply = http::send(request).await.map_err(map_failure)?;

        if let Some(err) = error_of(&reply.body) {
            return Err(err);
        }

        string_at(&reply.body, &["data", "publish_id"])
            .ok_or_else(|| http::missing_field("TikTok", "data.publish_id"))
    }
}
