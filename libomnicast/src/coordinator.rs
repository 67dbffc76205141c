//! Publish coordination
//!
//! [`PublishCoordinator`] delivers one claimed post to all of its target
//! platforms concurrently, retries transient failures with exponential
//! backoff, records every per-platform outcome and finally writes the
//! aggregate status.
//!
//! Dispatch is safe to repeat for the same post: attempts that already
//! succeeded, or failed for a reason retrying cannot fix, are skipped. This
//! is what makes crash recovery of stale `publishing` posts possible.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::accounts::CredentialResolver;
use crate::config::SchedulerConfig;
use crate::db::Database;
use crate::error::{PlatformError, Result};
use crate::platforms::AdapterRegistry;
use crate::service::events::{Event, EventBus};
use crate::types::{PlatformId, PostStatus, PublishAttempt, ScheduledPost};

/// How often and how patiently a retryable failure is retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total adapter invocations allowed per platform
    pub max_attempts: u32,
    /// Delay before the first retry; doubled after each one
    pub backoff_base: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            max_attempts: config.max_retries_per_platform.max(1),
            backoff_base: config.retry_backoff_base(),
        }
    }

    /// Delay after the `attempt`-th failed try (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff_base.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&SchedulerConfig::default())
    }
}

/// Delivers claimed posts to their platforms
pub struct PublishCoordinator {
    db: Database,
    adapters: AdapterRegistry,
    resolver: Arc<dyn CredentialResolver>,
    retry: RetryPolicy,
    events: EventBus,
}

impl PublishCoordinator {
    pub fn new(
        db: Database,
        adapters: AdapterRegistry,
        resolver: Arc<dyn CredentialResolver>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            db,
            adapters,
            resolver,
            retry,
            events: EventBus::default(),
        }
    }

    /// Share an existing event bus instead of the private default one
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.events
    }

    /// Deliver a claimed post and finalise its status.
    ///
    /// Platform failures are recorded on the attempts, never returned; the
    /// only errors are storage errors, in which case the post stays
    /// `publishing` and is recovered once its lease goes stale.
    pub async fn dispatch(&self, post: &ScheduledPost) -> Result<PostStatus> {
        let attempts = self
            .db
            .ensure_attempts(&post.id, &post.target_platforms)
            .await?;

        let (to_deliver, skipped): (Vec<PublishAttempt>, Vec<PublishAttempt>) =
            attempts.into_iter().partition(|a| a.needs_delivery());

        for attempt in &skipped {
            debug!(
                "Skipping {} for post {}: already {}",
                attempt.platform, post.id, attempt.attempt_status
            );
        }

        info!(
            "Dispatching post {} to {} platform(s)",
            post.id,
            to_deliver.len()
        );
        self.events.emit(Event::DispatchStarted {
            post_id: post.id.clone(),
            platforms: to_deliver.iter().map(|a| a.platform).collect(),
        });

        let deliveries = to_deliver
            .iter()
            .map(|attempt| self.deliver(post, attempt.platform, attempt.tries));
        for result in join_all(deliveries).await {
            result?;
        }

        self.finalize(post).await
    }

    /// Deliver to one platform and record the outcome on its attempt row
    async fn deliver(&self, post: &ScheduledPost, platform: PlatformId, prior_tries: u32) -> Result<()> {
        let (outcome, tries) = self.invoke(post, platform, prior_tries).await?;

        let completed_at = chrono::Utc::now().timestamp();
        self.db
            .complete_attempt(&post.id, platform, &outcome, completed_at)
            .await?;

        match &outcome {
            Ok(remote_id) => info!("Published post {} to {}: {}", post.id, platform, remote_id),
            Err(e) => warn!("Failed to publish post {} to {}: {}", post.id, platform, e),
        }

        self.events.emit(Event::AttemptCompleted {
            post_id: post.id.clone(),
            platform,
            success: outcome.is_ok(),
            platform_post_id: outcome.as_ref().ok().cloned(),
            error_kind: outcome.as_ref().err().map(PlatformError::kind),
            tries,
        });

        Ok(())
    }

    /// Resolve the adapter and credentials, then call the adapter with retries.
    ///
    /// Returns the outcome and the attempt's total try count.
    async fn invoke(
        &self,
        post: &ScheduledPost,
        platform: PlatformId,
        prior_tries: u32,
    ) -> Result<(std::result::Result<String, PlatformError>, u32)> {
        let Some(adapter) = self.adapters.get(platform) else {
            let err = PlatformError::Unknown(format!("No adapter registered for {}", platform));
            return Ok((Err(err), prior_tries));
        };

        let credentials = match self.resolver.resolve_credentials(&post.owner, platform).await {
            Ok(credentials) => credentials,
            Err(not_connected) => {
                let err = PlatformError::AuthExpired(not_connected.to_string());
                return Ok((Err(err), prior_tries));
            }
        };

        // Policy rejections never reach the platform and cost no tries
        if let Err(rejected) = adapter.validate_content(&post.content) {
            return Ok((Err(rejected), prior_tries));
        }

        self.db.mark_attempt_in_flight(&post.id, platform).await?;

        // Tries already spent by an interrupted dispatch count against the budget
        let budget = self.retry.max_attempts.saturating_sub(prior_tries).max(1);
        let mut tries = prior_tries;
        let mut n = 0;

        loop {
            n += 1;
            self.db.record_try(&post.id, platform).await?;
            tries += 1;

            let result = match timeout(adapter.timeout(), adapter.publish(&post.content, &credentials)).await {
                Ok(result) => result,
                Err(_) => Err(PlatformError::TransientNetwork(format!(
                    "{} did not respond within {}s",
                    platform,
                    adapter.timeout().as_secs_f64()
                ))),
            };

            match result {
                Ok(remote_id) => {
                    if n > 1 {
                        info!("Published to {} on try {}", platform, tries);
                    }
                    return Ok((Ok(remote_id), tries));
                }
                Err(e) if e.is_retryable() && n < budget => {
                    let delay = self.retry.delay_after(n);
                    warn!(
                        "Retryable error publishing to {} (try {}/{}): {}. Retrying in {:?}",
                        platform, tries, self.retry.max_attempts, e, delay
                    );
                    sleep(delay).await;
                }
                Err(e) => return Ok((Err(e), tries)),
            }
        }
    }

    /// Aggregate attempt outcomes into the post status and persist it
    async fn finalize(&self, post: &ScheduledPost) -> Result<PostStatus> {
        let attempts = self.db.get_attempts(&post.id).await?;
        let statuses: Vec<_> = attempts.iter().map(|a| a.attempt_status).collect();

        let status = PostStatus::aggregate(&statuses).unwrap_or_else(|| {
            warn!("Post {} has no resolved attempts; marking failed", post.id);
            PostStatus::Failed
        });

        // A post that failed before any adapter was invoked never went out
        let invoked = attempts.iter().any(|a| a.tries > 0);
        let published_at = if status == PostStatus::Failed && !invoked {
            None
        } else {
            Some(chrono::Utc::now().timestamp())
        };

        if self.db.finalize_post(&post.id, status, published_at).await? {
            info!("Post {} finished as {}", post.id, status);
        } else {
            warn!(
                "Post {} left publishing before finalisation; {} not written",
                post.id, status
            );
        }

        self.events.emit(Event::DispatchCompleted {
            post_id: post.id.clone(),
            status,
        });

        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::AccountRegistry;
    use crate::error::FailureKind;
    use crate::platforms::mock::MockAdapter;
    use crate::types::{AttemptStatus, Content};

    async fn claimed_post(db: &Database, platforms: Vec<PlatformId>) -> ScheduledPost {
        let now = chrono::Utc::now().timestamp();
        let post = ScheduledPost::new(
            "alice".to_string(),
            Content::new("Hello"),
            platforms,
            now - 1,
            "UTC".to_string(),
        );
        db.create_post(&post).await.unwrap();
        db.claim_due(now, 10).await.unwrap().remove(0)
    }

    fn coordinator(
        db: &Database,
        adapters: AdapterRegistry,
        accounts: &AccountRegistry,
    ) -> PublishCoordinator {
        PublishCoordinator::new(
            db.clone(),
            adapters,
            Arc::new(accounts.clone()),
            RetryPolicy {
                max_attempts: 3,
                backoff_base: Duration::from_millis(1),
            },
        )
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy {
            max_attempts: 4,
            backoff_base: Duration::from_secs(2),
        };
        assert_eq!(policy.delay_after(1), Duration::from_secs(2));
        assert_eq!(policy.delay_after(2), Duration::from_secs(4));
        assert_eq!(policy.delay_after(3), Duration::from_secs(8));
    }

    #[tokio::test]
    async fn test_missing_connection_fails_without_invocation() {
        let db = Database::in_memory().await.unwrap();
        let accounts = AccountRegistry::new();
        let mock = Arc::new(MockAdapter::success(PlatformId::X));
        let mut adapters = AdapterRegistry::new();
        adapters.register(mock.clone());

        let post = claimed_post(&db, vec![PlatformId::X]).await;
        let status = coordinator(&db, adapters, &accounts)
            .dispatch(&post)
            .await
            .unwrap();

        assert_eq!(status, PostStatus::Failed);
        assert_eq!(mock.publish_call_count(), 0);

        let attempts = db.get_attempts(&post.id).await.unwrap();
        assert_eq!(attempts[0].error_kind, Some(FailureKind::AuthExpired));
        assert_eq!(attempts[0].tries, 0);

        let stored = db.get_post(&post.id, "alice").await.unwrap().unwrap();
        assert_eq!(stored.status, PostStatus::Failed);
        assert_eq!(stored.published_at, None);
    }

    #[tokio::test]
    async fn test_timeout_is_transient_and_retried() {
        let db = Database::in_memory().await.unwrap();
        let accounts = AccountRegistry::new();
        accounts.connect("alice", PlatformId::X, "42", "token");

        let slow = Arc::new(
            MockAdapter::with_delay(PlatformId::X, Duration::from_millis(200))
                .with_timeout(Duration::from_millis(20)),
        );
        let mut adapters = AdapterRegistry::new();
        adapters.register(slow.clone());

        let post = claimed_post(&db, vec![PlatformId::X]).await;
        let status = coordinator(&db, adapters, &accounts)
            .dispatch(&post)
            .await
            .unwrap();

        assert_eq!(status, PostStatus::Failed);
        assert_eq!(slow.publish_call_count(), 3);

        let attempts = db.get_attempts(&post.id).await.unwrap();
        assert_eq!(attempts[0].attempt_status, AttemptStatus::Failed);
        assert_eq!(attempts[0].error_kind, Some(FailureKind::TransientNetwork));
        assert_eq!(attempts[0].tries, 3);

        // Failed after real invocations still stamps published_at
        let stored = db.get_post(&post.id, "alice").await.unwrap().unwrap();
        assert!(stored.published_at.is_some());
    }

    #[tokio::test]
    async fn test_content_policy_rejection_costs_no_tries() {
        let db = Database::in_memory().await.unwrap();
        let accounts = AccountRegistry::new();
        accounts.connect("alice", PlatformId::X, "42", "token");

        let strict = Arc::new(MockAdapter::with_limit(PlatformId::X, 3));
        let mut adapters = AdapterRegistry::new();
        adapters.register(strict.clone());

        let post = claimed_post(&db, vec![PlatformId::X]).await;
        let status = coordinator(&db, adapters, &accounts)
            .dispatch(&post)
            .await
            .unwrap();

        assert_eq!(status, PostStatus::Failed);
        assert_eq!(strict.publish_call_count(), 0);

        let attempts = db.get_attempts(&post.id).await.unwrap();
        assert_eq!(attempts[0].error_kind, Some(FailureKind::ContentRejected));
        assert_eq!(attempts[0].tries, 0);

        // Never reached the platform, so no publish time
        let stored = db.get_post(&post.id, "alice").await.unwrap().unwrap();
        assert_eq!(stored.published_at, None);
    }

    #[tokio::test]
    async fn test_unregistered_adapter_is_unknown_failure() {
        let db = Database::in_memory().await.unwrap();
        let accounts = AccountRegistry::new();
        accounts.connect("alice", PlatformId::Facebook, "page", "token");

        let post = claimed_post(&db, vec![PlatformId::Facebook]).await;
        let status = coordinator(&db, AdapterRegistry::new(), &accounts)
            .dispatch(&post)
            .await
            .unwrap();

        assert_eq!(status, PostStatus::Failed);
        let attempts = db.get_attempts(&post.id).await.unwrap();
        assert_eq!(attempts[0].error_kind, Some(FailureKind::Unknown));
    }

    #[tokio::test]
    async fn test_events_follow_dispatch() {
        let db = Database::in_memory().await.unwrap();
        let accounts = AccountRegistry::new();
        accounts.connect("alice", PlatformId::LinkedIn, "urn:li:person:1", "token");

        let mut adapters = AdapterRegistry::new();
        adapters.register(Arc::new(MockAdapter::success(PlatformId::LinkedIn)));

        let coordinator = coordinator(&db, adapters, &accounts);
        let mut receiver = coordinator.event_bus().subscribe();

        let post = claimed_post(&db, vec![PlatformId::LinkedIn]).await;
        coordinator.dispatch(&post).await.unwrap();

        assert!(matches!(
            receiver.recv().await.unwrap(),
            Event::DispatchStarted { .. }
        ));
        match receiver.recv().await.unwrap() {
            Event::AttemptCompleted {
                platform,
                success,
                tries,
                ..
            } => {
                assert_eq!(platform, PlatformId::LinkedIn);
                assert!(success);
                assert_eq!(tries, 1);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(
            receiver.recv().await.unwrap(),
            Event::DispatchCompleted {
                post_id: post.id.clone(),
                status: PostStatus::Published,
            }
        );
    }
}
