//! X (formerly Twitter) adapter
//!
//! Publishes through `POST /2/tweets` with the account's OAuth 2.0 user
//! token. Media references are appended to the text as a link.

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

use crate::accounts::Credentials;
use crate::error::PlatformError;
use crate::platforms::http::{self, endpoint, string_at};
use crate::platforms::{PlatformAdapter, DEFAULT_TIMEOUT};
use crate::types::{Content, PlatformId};

pub const DEFAULT_BASE_URL: &str = "https://api.x.com";
pub const CHARACTER_LIMIT: usize = 280;

pub struct XAdapter {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl XAdapter {
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

    fn tweet_text(content: &Content) -> String {
        let caption = content.compose();
        match content.media_reference.as_deref().map(str::trim) {
            Some(media) if !media.is_empty() => {
                if caption.is_empty() {
                    media.to_string()
                } else {
                    format!("{}\n\n{}", caption, media)
                }
            }
            _ => caption,
        }
    }
}

#[async_trait]
impl PlatformAdapter for XAdapter {
    fn platform(&self) -> PlatformId {
        PlatformId::X
    }

    fn character_limit(&self) -> Option<usize> {
        Some(CHARACTER_LIMIT)
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn validate_content(&self, content: &Content) -> Result<(), PlatformError> {
        let text = Self::tweet_text(content);
        if text.trim().is_empty() {
            return Err(PlatformError::ContentRejected(
                "Content cannot be empty".to_string(),
            ));
        }

        let count = text.chars().count();
        if count > CHARACTER_LIMIT {
            return Err(PlatformError::ContentRejected(format!(
                "Content exceeds X's {} character limit (current: {} characters)",
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

        let request = self
            .client
            .post(endpoint(&self.base_url, "/2/tweets"))
            .bearer_auth(credentials.access_token())
            .json(&json!({ "text": Self::tweet_text(content) }));

        let reply = http::send(request).await?;

        string_at(&reply.body, &["data", "id"]).ok_or_else(|| http::missing_field("X", "data.id"))
    }
}
