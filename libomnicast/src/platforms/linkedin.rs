//! LinkedIn adapter
//!
//! Uses the versioned Posts API (`POST /rest/posts`). The account id is the
//! author URN, either `urn:li:person:…` or `urn:li:organization:…`. LinkedIn
//! answers 201 with an empty body and the new post URN in `x-restli-id`.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use crate::accounts::Credentials;
use crate::error::PlatformError;
use crate::platforms::http::{self, endpoint, string_at};
use crate::platforms::{PlatformAdapter, DEFAULT_TIMEOUT};
use crate::types::{Content, PlatformId};

pub const DEFAULT_BASE_URL: &str = "https://api.linkedin.com";
pub const CHARACTER_LIMIT: usize = 3000;
const API_VERSION: &str = "202405";

pub struct LinkedInAdapter {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl LinkedInAdapter {
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

    fn post_body(content: &Content, author: &str) -> Value {
        let mut body = json!({
            "author": author,
            "commentary": content.compose(),
            "visibility": "PUBLIC",
            "distribution": {
                "feedDistribution": "MAIN_FEED",
                "targetEntities": [],
                "thirdPartyDistributionChannels": []
            },
            "lifecycleState": "PUBLISHED",
            "isReshareDisabledByAuthor": false
        });

        if let Some(media) = content.media_reference.as_deref().map(str::trim) {
            if !media.is_empty() {
                body["content"] = json!({ "article": { "source": media } });
            }
        }

        body
    }
}

#[async_trait]
impl PlatformAdapter for LinkedInAdapter {
    fn platform(&self) -> PlatformId {
        PlatformId::LinkedIn
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

        if !credentials.account_id.starts_with("urn:li:") {
            return Err(PlatformError::AuthExpired(format!(
                "LinkedIn account id '{}' is not an author URN; reconnect the account",
                credentials.account_id
            )));
        }

        let request = self
            .client
            .post(endpoint(&self.base_url, "/rest/posts"))
            .bearer_auth(credentials.access_token())
            .header("LinkedIn-Version", API_VERSION)
            .header("X-Restli-Protocol-Version", "2.0.0")
            .json(&Self::post_body(content, &credentials.account_id));

        let reply = http::send(request).await?;

        reply
            .headers
            .get("x-restli-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| string_at(&reply.body, &["id"]))
            .ok_or_else(|| http::missing_field("LinkedIn", "x-restli-id"))
    }
}
