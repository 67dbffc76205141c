//! Platform adapters
//!
//! Every publishing target is wrapped behind one [`PlatformAdapter`] contract:
//! given content and an account's credentials, publish once and return the
//! platform-assigned post id, or a classified [`PlatformError`]. Adapters do
//! not retry; the coordinator owns retries, timeouts and persistence.
//!
//! # Examples
//!
//! ```no_run
//! use libomnicast::accounts::Credentials;
//! use libomnicast::platforms::{PlatformAdapter, linkedin::LinkedInAdapter};
//! use libomnicast::types::Content;
//!
//! # async fn example() -> Result<(), libomnicast::error::PlatformError> {
//! let adapter = LinkedInAdapter::new(reqwest::Client::new(), None);
//! let credentials = Credentials::new("urn:li:organization:1234", "AQX...");
//!
//! let content = Content::new("We're hiring!");
//! let post_id = adapter.publish(&content, &credentials).await?;
//! println!("Published: {}", post_id);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::accounts::Credentials;
use crate::config::{Config, EndpointConfig};
use crate::error::{ConfigError, PlatformError, Result};
use crate::types::{Content, PlatformId};

pub mod facebook;
pub mod http;
pub mod instagram;
pub mod linkedin;
pub mod tiktok;
pub mod x;

// Mock adapter is available for all builds (not just tests) to support integration tests
pub mod mock;

/// Default bound on a single adapter invocation
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Contract every publishing target implements
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    /// Which platform this adapter publishes to
    fn platform(&self) -> PlatformId;

    /// Maximum composed caption length in characters, if the platform has one
    fn character_limit(&self) -> Option<usize> {
        None
    }

    /// Upper bound for one `publish` call; exceeded calls count as a transient failure
    fn timeout(&self) -> Duration {
        DEFAULT_TIMEOUT
    }

    /// Check platform content policy before any network activity.
    ///
    /// The default rejects empty content and captions over
    /// [`character_limit`](Self::character_limit).
    fn validate_content(&self, content: &Content) -> std::result::Result<(), PlatformError> {
        if content.is_empty() && content.media_reference.is_none() {
            return Err(PlatformError::ContentRejected(
                "Content cannot be empty".to_string(),
            ));
        }

        if let Some(limit) = self.character_limit() {
            let count = content.compose().chars().count();
            if count > limit {
                return Err(PlatformError::ContentRejected(format!(
                    "Content exceeds {}'s {} character limit (current: {} characters)",
                    self.platform(),
                    limit,
                    count
                )));
            }
        }

        Ok(())
    }

    /// Publish once and return the platform-assigned post id
    async fn publish(
        &self,
        content: &Content,
        credentials: &Credentials,
    ) -> std::result::Result<String, PlatformError>;
}

/// Adapters keyed by the platform they serve
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<PlatformId, Arc<dyn PlatformAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the production adapters for every platform, applying endpoint overrides
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = http::build_client().map_err(|e| ConfigError::InvalidValue {
            field: "platforms".to_string(),
            reason: format!("failed to build HTTP client: {}", e),
        })?;

        let mut registry = Self::new();
        for platform in PlatformId::ALL {
            let endpoint = config.endpoint(platform);
            registry.register(build_adapter(platform, client.clone(), &endpoint));
        }

        Ok(registry)
    }

    /// Register an adapter, replacing any existing one for the same platform
    pub fn register(&mut self, adapter: Arc<dyn PlatformAdapter>) {
        self.adapters.insert(adapter.platform(), adapter);
    }

    pub fn get(&self, platform: PlatformId) -> Option<Arc<dyn PlatformAdapter>> {
        self.adapters.get(&platform).cloned()
    }

    /// Longest per-call timeout among the registered adapters
    pub fn max_timeout(&self) -> Duration {
        self.adapters
            .values()
            .map(|adapter| adapter.timeout())
            .max()
            .unwrap_or(Duration::ZERO)
    }

    /// Registered platforms in canonical order
    pub fn platforms(&self) -> Vec<PlatformId> {
        PlatformId::ALL
            .into_iter()
            .filter(|p| self.adapters.contains_key(p))
            .collect()
    }
}

fn build_adapter(
    platform: PlatformId,
    client: reqwest::Client,
    endpoint: &EndpointConfig,
) -> Arc<dyn PlatformAdapter> {
    let base_url = endpoint.base_url.clone();
    let timeout = endpoint.timeout.map(Duration::from_secs);

    match platform {
        PlatformId::X => Arc::new(x::XAdapter::new(client, base_url).with_timeout(timeout)),
        PlatformId::LinkedIn => {
            Arc::new(linkedin::LinkedInAdapter::new(client, base_url).with_timeout(timeout))
        }
        PlatformId::Facebook => {
            Arc::new(facebook::FacebookAdapter::new(client, base_url).with_timeout(timeout))
        }
        PlatformId::Instagram => {
            Arc::new(instagram::InstagramAdapter::new(client, base_url).with_timeout(timeout))
        }
        PlatformId::TikTok => {
            Arc::new(tiktok::TikTokAdapter::new(client, base_url).with_timeout(timeout))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::mock::MockAdapter;

    #[test]
    fn test_registry_from_default_config_covers_all_platforms() {
        let registry = AdapterRegistry::from_config(&Config::default_config()).unwrap();
        assert_eq!(registry.platforms(), PlatformId::ALL.to_vec());

        for platform in PlatformId::ALL {
            assert_eq!(registry.get(platform).unwrap().platform(), platform);
        }
    }

    #[test]
    fn test_endpoint_timeout_override() {
        let mut config = Config::default_config();
        config.platforms.insert(
            "tiktok".to_string(),
            EndpointConfig {
                base_url: Some("http://localhost:1".to_string()),
                timeout: Some(90),
            },
        );

        let registry = AdapterRegistry::from_config(&config).unwrap();
        let tiktok = registry.get(PlatformId::TikTok).unwrap();
        assert_eq!(tiktok.timeout(), Duration::from_secs(90));
        assert_eq!(
            registry.get(PlatformId::X).unwrap().timeout(),
            DEFAULT_TIMEOUT
        );
    }

    #[test]
    fn test_register_replaces_existing_adapter() {
        let mut registry = AdapterRegistry::from_config(&Config::default_config()).unwrap();
        let mock = Arc::new(MockAdapter::success(PlatformId::X));
        registry.register(mock.clone());

        let adapter = registry.get(PlatformId::X).unwrap();
        assert_eq!(adapter.character_limit(), None);
    }

    #[test]
    fn test_default_validation() {
        let adapter = MockAdapter::with_limit(PlatformId::X, 10);

        assert!(adapter.validate_content(&Content::new("short")).is_ok());
        assert!(matches!(
            adapter.validate_content(&Content::new("this is far too long")),
            Err(PlatformError::ContentRejected(_))
        ));
        assert!(matches!(
            adapter.validate_content(&Content::new("   ")),
            Err(PlatformError::ContentRejected(_))
        ));
    }
}
