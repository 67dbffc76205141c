//! Mock adapter for testing
//!
//! A configurable adapter that can simulate successes, classified failures,
//! scripted failure sequences and slow responses. It is used by integration
//! tests to exercise the coordinator and scheduler without credentials or
//! network access.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::sleep;

use crate::accounts::Credentials;
use crate::error::PlatformError;
use crate::platforms::PlatformAdapter;
use crate::types::{Content, PlatformId};

/// Configuration for mock adapter behavior
#[derive(Debug, Clone)]
pub struct MockConfig {
    pub platform: PlatformId,

    /// Outcomes consumed one per `publish` call; `None` means succeed
    pub script: Arc<Mutex<VecDeque<Option<PlatformError>>>>,

    /// Outcome once the script is exhausted; `None` means succeed
    pub fallback: Option<PlatformError>,

    /// Delay before completing (simulates network latency)
    pub delay: Duration,

    pub character_limit: Option<usize>,

    pub timeout: Duration,

    /// Number of times publish has been called
    pub publish_call_count: Arc<AtomicUsize>,

    /// Captions that were published successfully
    pub published_content: Arc<Mutex<Vec<String>>>,
}

impl MockConfig {
    pub fn new(platform: PlatformId) -> Self {
        Self {
            platform,
            script: Arc::new(Mutex::new(VecDeque::new())),
            fallback: None,
            delay: Duration::ZERO,
            character_limit: None,
            timeout: Duration::from_secs(5),
            publish_call_count: Arc::new(AtomicUsize::new(0)),
            published_content: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

/// Mock platform adapter
pub struct MockAdapter {
    config: MockConfig,
}

impl MockAdapter {
    pub fn new(config: MockConfig) -> Self {
        Self { config }
    }

    /// An adapter that always succeeds
    pub fn success(platform: PlatformId) -> Self {
        Self::new(MockConfig::new(platform))
    }

    /// An adapter that always fails with `error`
    pub fn failing(platform: PlatformId, error: PlatformError) -> Self {
        Self::new(MockConfig {
            fallback: Some(error),
            ..MockConfig::new(platform)
        })
    }

    /// An adapter that fails with each scripted error in turn, then succeeds
    pub fn failing_then_success(platform: PlatformId, errors: Vec<PlatformError>) -> Self {
        let config = MockConfig::new(platform);
        lock(&config.script).extend(errors.into_iter().map(Some));
        Self::new(config)
    }

    /// An adapter that sleeps before succeeding
    pub fn with_delay(platform: PlatformId, delay: Duration) -> Self {
        Self::new(MockConfig {
            delay,
            ..MockConfig::new(platform)
        })
    }

    pub fn with_limit(platform: PlatformId, limit: usize) -> Self {
        Self::new(MockConfig {
            character_limit: Some(limit),
            ..MockConfig::new(platform)
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn publish_call_count(&self) -> usize {
        self.config.publish_call_count.load(Ordering::SeqCst)
    }

    pub fn published_content(&self) -> Vec<String> {
        lock(&self.config.published_content).clone()
    }

    fn next_outcome(&self) -> Option<PlatformError> {
        lock(&self.config.script)
            .pop_front()
            .unwrap_or_else(|| self.config.fallback.clone())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl PlatformAdapter for MockAdapter {
    fn platform(&self) -> PlatformId {
        self.config.platform
    }

    fn character_limit(&self) -> Option<usize> {
        self.config.character_limit
    }

    fn timeout(&self) -> Duration {
        self.config.timeout
    }

    async fn publish(
        &self,
        content: &Content,
        _credentials: &Credentials,
    ) -> Result<String, PlatformError> {
        self.config.publish_call_count.fetch_add(1, Ordering::SeqCst);

        self.validate_content(content)?;

        if !self.config.delay.is_zero() {
            sleep(self.config.delay).await;
        }

        match self.next_outcome() {
            None => {
                lock(&self.config.published_content).push(content.compose());
                Ok(format!(
                    "{}:mock-{}",
                    self.config.platform,
                    uuid::Uuid::new_v4()
                ))
            }
            Some(error) => Err(error),
        }
    }
}
