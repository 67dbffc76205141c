//! Instagram adapter (Instagram Graph API)
//!
//! Publishing is two steps: create a media container on
//! `/{ig-user-id}/media`, then publish it with `/{ig-user-id}/media_publish`.
//! Video containers are processed asynchronously and polled until ready.
//! Instagram has no text-only posts, so content without media is rejected
//! before any network call.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use crate::accounts::Credentials;
use crate::error::PlatformError;
use crate::platforms::facebook::map_graph_failure;
use crate::platforms::http::{self, endpoint, string_at};
use crate::platforms::PlatformAdapter;
use crate::types::{Content, MediaKind, PlatformId};

pub const DEFAULT_BASE_URL: &str = "https://graph.facebook.com/v19.0";
pub const CHARACTER_LIMIT: usize = 2200;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);
const MAX_STATUS_POLLS: u32 = 30;

pub struct InstagramAdapter {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    poll_interval: Duration,
}

impl InstagramAdapter {
    pub fn new(client: reqwest::Client, base_url: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        if let Some(timeout) = timeout {
            self.timeout = timeout;
        }
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn container_body(content: &Content, media_url: &str) -> Value {
        let caption = content.compose();
        match content.media_kind() {
            Some(MediaKind::Video) => json!({
                "media_type": "REELS",
                "video_url": media_url,
                "caption": caption,
            }),
            _ => json!({ "image_url": media_url, "caption": caption }),
        }
    }

    async fn create_container(
        &self,
        content: &Content,
        media_url: &str,
        credentials: &Credentials,
    ) -> Result<String, PlatformError> {
        let request = self
            .client
            .post(endpoint(
                &self.base_url,
                &format!("/{}/media", credentials.account_id),
            ))
            .query(&[("access_token", credentials.access_token())])
            .json(&Self::container_body(content, media_url));

        let reply = http::send(request).await.map_err(map_graph_failure)?;
        string_at(&reply.body, &["id"]).ok_or_else(|| http::missing_field("Instagram", "id"))
    }

    /// Wait until a video container finishes processing
    async fn wait_until_ready(
        &self,
        container_id: &str,
        credentials: &Credentials,
    ) -> Result<(), PlatformError> {
        for _ in 0..MAX_STATUS_POLLS {
            let request = self
                .client
                .get(endpoint(&self.base_url, &format!("/{}", container_id)))
                .query(&[
                    ("fields", "status_code"),
                    ("access_token", credentials.access_token()),
                ]);

            let reply = http::send(request).await.map_err(map_graph_failure)?;
            match reply.body["status_code"].as_str() {
                Some("FINISHED") => return Ok(()),
                Some("ERROR") | Some("EXPIRED") => {
                    return Err(PlatformError::ContentRejected(format!(
                        "Instagram could not process media container {}",
                        container_id
                    )))
                }
                _ => tokio::time::sleep(self.poll_interval).await,
            }
        }

        Err(PlatformError::TransientNetwork(format!(
            "Instagram media container {} still processing",
            container_id
        )))
    }

    async fn publish_container(
        &self,
        container_id: &str,
        credentials: &Credentials,
    ) -> Result<String, PlatformError> {
        let request = self
            .client
            .post(endpoint(
                &self.base_url,
                &format!("/{}/media_publish", credentials.account_id),
            ))
            .query(&[("access_token", credentials.access_token())])
            .json(&json!({ "creation_id": container_id }));

        let reply = http::send(request).await.map_err(map_graph_failure)?;
        string_at(&reply.body, &["id"]).ok_or_else(|| http::missing_field("Instagram", "id"))
    }
}

#[async_trait]
impl PlatformAdapter for InstagramAdapter {
    fn platform(&self) -> PlatformId {
        PlatformId::Instagram
    }

    fn character_limit(&self) -> Option<usize> {
        Some(CHARACTER_LIMIT)
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn validate_content(&self, content: &Content) -> Result<(), PlatformError> {
        if content.media_kind().is_none() {
            return Err(PlatformError::ContentRejected(
                "Instagram requires an image or video".to_string(),
            ));
        }

        let count = content.compose().chars().count();
        if count > CHARACTER_LIMIT {
            return Err(PlatformError::ContentRejected(format!(
                "Caption exceeds Instagram's {} character limit (current: {} characters)",
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
        let media_url = content.media_reference.as_deref().unwrap_or_default().trim();

        let container_id = self.create_container(content, media_url, credentials).await?;
        tracing::debug!("Instagram container {} created", container_id);

        if content.media_kind() == Some(MediaKind::Video) {
            self.wait_until_ready(&container_id, credentials).await?;
        }

        self.publish_container(&container_id, credentials).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter(server: &MockServer) -> InstagramAdapter {
        InstagramAdapter::new(reqwest::Client::new(), Some(server.uri()))
            .with_poll_interval(Duration::from_millis(10))
    }

    fn credentials() -> Credentials {
        Credentials::new("17841400000000000", "ig-token")
    }

    #[tokio::test]
    async fn test_text_only_rejected_without_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = adapter(&server)
            .publish(&Content::new("just words"), &credentials())
            .await
            .unwrap_err();
        assert!(matches!(err, PlatformError::ContentRejected(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_image_container_then_publish() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/17841400000000000/media"))
            .and(query_param("access_token", "ig-token"))
            .and(body_partial_json(
                json!({"image_url": "https://cdn.example.com/p.jpg"}),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "c-1"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/17841400000000000/media_publish"))
            .and(body_json(json!({"creation_id": "c-1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "m-99"})))
            .expect(1)
            .mount(&server)
            .await;

        let mut content = Content::new("Sunset");
        content.media_reference = Some("https://cdn.example.com/p.jpg".to_string());

        let id = adapter(&server)
            .publish(&content, &credentials())
            .await
            .unwrap();
        assert_eq!(id, "m-99");
    }

    #[tokio::test]
    async fn test_video_container_is_polled_until_finished() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/17841400000000000/media"))
            .and(body_partial_json(json!({"media_type": "REELS"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "c-2"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/c-2"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"status_code": "IN_PROGRESS"})),
            )
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/c-2"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"status_code": "FINISHED"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/17841400000000000/media_publish"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "m-100"})))
            .expect(1)
            .mount(&server)
            .await;

        let mut content = Content::new("Reel");
        content.media_reference = Some("https://cdn.example.com/r.mp4".to_string());

        let id = adapter(&server)
            .publish(&content, &credentials())
            .await
            .unwrap();
        assert_eq!(id, "m-100");
    }

    #[tokio::test]
    async fn test_container_error_is_content_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/17841400000000000/media"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "c-3"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/c-3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status_code": "ERROR"})))
            .mount(&server)
            .await;

        let mut content = Content::new("Broken reel");
        content.media_reference = Some("https://cdn.example.com/bad.mov".to_string());

        let err = adapter(&server)
            .publish(&content, &credentials())
            .await
            .unwrap_err();
        assert!(matches!(err, PlatformError::ContentRejected(_)));
    }

    #[test]
    fn test_default_timeout_allows_processing() {
        let adapter = InstagramAdapter::new(reqwest::Client::new(), None);
        assert_eq!(adapter.timeout(), Duration::from_secs(120));
    }
}
