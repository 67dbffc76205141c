//! Scheduled post lifecycle and the claim loop
//!
//! The [`Scheduler`] validates and stores new posts, cancels pending ones and
//! runs the loop that hands due posts to the [`PublishCoordinator`].
//!
//! Claiming is an atomic `pending → publishing` transition in the database,
//! so any number of loops (in one process or several daemons sharing a
//! database file) can run side by side and each due post is dispatched by
//! exactly one of them.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::accounts::CredentialResolver;
use crate::config::SchedulerConfig;
use crate::coordinator::PublishCoordinator;
use crate::db::{Database, PostView};
use crate::error::{OmnicastError, Result};
use crate::scheduling::{ensure_not_past, Schedule};
use crate::types::{Content, PlatformId, PostStatus, ScheduledPost};

/// Shutdown flag polling granularity while waiting for the next tick
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Lower bound on how often a running dispatch renews its lease
const MIN_LEASE_RENEWAL: Duration = Duration::from_millis(500);

/// Everything needed to schedule one post
#[derive(Debug, Clone)]
pub struct CreatePostRequest {
    pub owner: String,
    pub content: Content,
    pub platforms: Vec<PlatformId>,
    pub schedule: Schedule,
}

pub struct Scheduler {
    db: Database,
    resolver: Arc<dyn CredentialResolver>,
    coordinator: Arc<PublishCoordinator>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        db: Database,
        resolver: Arc<dyn CredentialResolver>,
        coordinator: Arc<PublishCoordinator>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            db,
            resolver,
            coordinator,
            config,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Validate and store a new pending post. Nothing is stored on failure.
    pub async fn create(&self, request: CreatePostRequest) -> Result<PostView> {
        let post = self.prepare(request, Utc::now()).await?;
        self.db.create_post(&post).await?;

        info!(
            "Scheduled post {} for {} on {} platform(s)",
            post.id,
            post.scheduled_time,
            post.target_platforms.len()
        );

        Ok(PostView {
            post,
            attempts: Vec::new(),
        })
    }

    /// Run every creation check and build the post, without persisting it
    async fn prepare(&self, request: CreatePostRequest, now: DateTime<Utc>) -> Result<ScheduledPost> {
        let owner = request.owner.trim();
        if owner.is_empty() {
            return Err(OmnicastError::Validation("Owner cannot be empty".to_string()));
        }

        let mut platforms: Vec<PlatformId> = Vec::with_capacity(request.platforms.len());
        for platform in request.platforms {
            if !platforms.contains(&platform) {
                platforms.push(platform);
            }
        }
        if platforms.is_empty() {
            return Err(OmnicastError::Validation(
                "At least one target platform is required".to_string(),
            ));
        }

        if request.content.is_empty() {
            return Err(OmnicastError::Validation(
                "Content must have text or a call-to-action".to_string(),
            ));
        }

        let resolved = request.schedule.resolve(now)?;
        if !resolved.immediate {
            ensure_not_past(resolved.instant, now, self.config.grace_period())?;
        }

        for platform in &platforms {
            if let Err(not_connected) = self.resolver.resolve_credentials(owner, *platform).await {
                return Err(OmnicastError::Validation(not_connected.to_string()));
            }
        }

        Ok(ScheduledPost::new(
            owner.to_string(),
            request.content,
            platforms,
            resolved.instant.timestamp(),
            resolved.timezone,
        ))
    }

    /// Cancel a pending post. Cancelling an already-cancelled post is a no-op.
    pub async fn cancel(&self, post_id: &str, owner: &str) -> Result<()> {
        if self.db.cancel_post(post_id, owner).await? {
            info!("Cancelled post {}", post_id);
            return Ok(());
        }

        match self.db.get_post(post_id, owner).await? {
            None => Err(OmnicastError::NotFound(format!("Post {} not found", post_id))),
            Some(post) if post.status == PostStatus::Cancelled => {
                debug!("Post {} was already cancelled", post_id);
                Ok(())
            }
            Some(post) => Err(OmnicastError::InvalidState {
                id: post.id,
                status: post.status,
            }),
        }
    }

    /// Move a pending post to a new time.
    ///
    /// The original is cancelled and a new post with the same content and
    /// platforms is created; the returned view carries the new id.
    pub async fn reschedule(
        &self,
        post_id: &str,
        owner: &str,
        schedule: Schedule,
    ) -> Result<PostView> {
        let original = self
            .db
            .get_post(post_id, owner)
            .await?
            .ok_or_else(|| OmnicastError::NotFound(format!("Post {} not found", post_id)))?;

        if original.status != PostStatus::Pending {
            return Err(OmnicastError::InvalidState {
                id: original.id,
                status: original.status,
            });
        }

        let replacement = self
            .prepare(
                CreatePostRequest {
                    owner: original.owner.clone(),
                    content: original.content.clone(),
                    platforms: original.target_platforms.clone(),
                    schedule,
                },
                Utc::now(),
            )
            .await?;

        // Lost a race with the claim loop or another cancel
        if !self.db.cancel_post(post_id, owner).await? {
            let status = self
                .db
                .get_post(post_id, owner)
                .await?
                .map(|p| p.status)
                .unwrap_or(PostStatus::Cancelled);
            return Err(OmnicastError::InvalidState {
                id: post_id.to_string(),
                status,
            });
        }

        self.db.create_post(&replacement).await?;
        info!("Rescheduled post {} as {}", post_id, replacement.id);

        Ok(PostView {
            post: replacement,
            attempts: Vec::new(),
        })
    }

    /// Atomically claim up to `limit` due posts (oldest first)
    pub async fn claim_due(&self, now: i64, limit: u32) -> Result<Vec<ScheduledPost>> {
        let claimed = self.db.claim_due(now, limit).await?;
        if !claimed.is_empty() {
            info!("Claimed {} due post(s)", claimed.len());
        }
        Ok(claimed)
    }

    /// Re-claim posts whose publishing lease has gone stale
    pub async fn reclaim_stale(&self, now: i64, limit: u32) -> Result<Vec<ScheduledPost>> {
        let stale_before = now - self.config.stale_after as i64;
        let recovered = self.db.reclaim_stale(now, stale_before, limit).await?;
        for post in &recovered {
            warn!(
                "Recovering post {} stuck in publishing since {:?}",
                post.id, post.claimed_at
            );
        }
        Ok(recovered)
    }

    /// How often a running dispatch renews its lease; well inside `stale_after`
    fn lease_renewal(&self) -> Duration {
        (self.config.stale_after() / 3).max(MIN_LEASE_RENEWAL)
    }

    /// Claim work for up to `limit` free worker slots, stale posts first
    async fn claim_work(&self, limit: u32) -> Result<Vec<ScheduledPost>> {
        let now = Utc::now().timestamp();
        let mut posts = self.reclaim_stale(now, limit).await?;
        let remaining = limit.saturating_sub(posts.len() as u32);
        posts.extend(self.claim_due(now, remaining).await?);
        Ok(posts)
    }

    /// One loop iteration: claim what is due and dispatch it to completion.
    ///
    /// Returns the final status of every post dispatched.
    pub async fn tick(&self) -> Result<Vec<(String, PostStatus)>> {
        let posts = self
            .claim_work(self.config.max_concurrent_posts as u32)
            .await?;

        let renew_every = self.lease_renewal();
        let results = join_all(
            posts
                .iter()
                .map(|post| dispatch_holding_lease(&self.coordinator, &self.db, post, renew_every)),
        )
        .await;

        let mut finished = Vec::with_capacity(posts.len());
        for (post, result) in posts.into_iter().zip(results) {
            match result {
                Ok(status) => finished.push((post.id, status)),
                Err(e) => error!("Dispatch of post {} failed: {}", post.id, e),
            }
        }
        Ok(finished)
    }

    /// Run the claim loop until `shutdown` is set, then wait for in-flight
    /// dispatches to finish.
    pub async fn run(&self, shutdown: Arc<AtomicBool>) -> Result<()> {
        let slots = Arc::new(Semaphore::new(self.config.max_concurrent_posts));
        let mut in_flight: JoinSet<(String, Result<PostStatus>)> = JoinSet::new();
        // Posts this loop is dispatching; a stale reclaim must not start them twice
        let active: Arc<Mutex<HashSet<String>>> = Arc::default();
        let renew_every = self.lease_renewal();

        info!(
            "Scheduler running: tick {}s, {} worker(s)",
            self.config.tick_interval, self.config.max_concurrent_posts
        );

        while !shutdown.load(Ordering::Relaxed) {
            while let Some(joined) = in_flight.try_join_next() {
                log_finished(joined);
            }

            let free = slots.available_permits() as u32;
            match self.claim_work(free).await {
                Ok(posts) => {
                    for post in posts {
                        let Some(guard) = ActiveDispatch::enter(&active, &post.id) else {
                            debug!("Post {} is already being dispatched here", post.id);
                            continue;
                        };
                        let Ok(permit) = slots.clone().acquire_owned().await else {
                            break;
                        };
                        let coordinator = self.coordinator.clone();
                        let db = self.db.clone();
                        in_flight.spawn(async move {
                            let _permit = permit;
                            let _guard = guard;
                            let result =
                                dispatch_holding_lease(&coordinator, &db, &post, renew_every).await;
                            (post.id, result)
                        });
                    }
                }
                Err(e) => error!("Claim failed: {}", e),
            }

            sleep_unless_shutdown(self.config.tick_interval(), &shutdown).await;
        }

        if !in_flight.is_empty() {
            info!("Waiting for {} in-flight dispatch(es)", in_flight.len());
        }
        while let Some(joined) = in_flight.join_next().await {
            log_finished(joined);
        }

        info!("Scheduler stopped");
        Ok(())
    }
}

/// Marks a post as dispatched by this loop until dropped
struct ActiveDispatch {
    active: Arc<Mutex<HashSet<String>>>,
    post_id: String,
}

impl ActiveDispatch {
    /// None if the post is already active
    fn enter(active: &Arc<Mutex<HashSet<String>>>, post_id: &str) -> Option<Self> {
        let inserted = active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(post_id.to_string());
        inserted.then(|| Self {
            active: active.clone(),
            post_id: post_id.to_string(),
        })
    }
}

impl Drop for ActiveDispatch {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.post_id);
    }
}

/// Dispatch `post`, renewing its publishing lease every `renew_every` until
/// the dispatch finishes.
async fn dispatch_holding_lease(
    coordinator: &PublishCoordinator,
    db: &Database,
    post: &ScheduledPost,
    renew_every: Duration,
) -> Result<PostStatus> {
    let dispatch = coordinator.dispatch(post);
    tokio::pin!(dispatch);

    tokio::select! {
        result = &mut dispatch => return result,
        () = renew_lease_while_publishing(db, &post.id, renew_every) => {}
    }

    dispatch.await
}

/// Renew the lease on a schedule; returns once the post has left publishing
async fn renew_lease_while_publishing(db: &Database, post_id: &str, renew_every: Duration) {
    let mut renewal = tokio::time::interval_at(tokio::time::Instant::now() + renew_every, renew_every);
    renewal.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        renewal.tick().await;
        match db.renew_lease(post_id, Utc::now().timestamp()).await {
            Ok(true) => debug!("Renewed lease on post {}", post_id),
            Ok(false) => return,
            Err(e) => warn!("Could not renew lease on post {}: {}", post_id, e),
        }
    }
}

fn log_finished(joined: std::result::Result<(String, Result<PostStatus>), tokio::task::JoinError>) {
    match joined {
        Ok((post_id, Ok(status))) => debug!("Dispatch of post {} finished as {}", post_id, status),
        Ok((post_id, Err(e))) => error!("Dispatch of post {} failed: {}", post_id, e),
        Err(e) => error!("Dispatch task panicked: {}", e),
    }
}

async fn sleep_unless_shutdown(duration: Duration, shutdown: &AtomicBool) {
    let deadline = tokio::time::Instant::now() + duration;
    while !shutdown.load(Ordering::Relaxed) {
        let now = tokio::time::Instant::now();
        if now >= deadline {
            break;
        }
        tokio::time::sleep(SHUTDOWN_POLL.min(deadline - now)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::AccountRegistry;
    use crate::coordinator::RetryPolicy;
    use crate::platforms::mock::MockAdapter;
    use crate::platforms::AdapterRegistry;
    use crate::scheduling::parse_wall_clock;

    async fn setup() -> (Database, Scheduler, Arc<MockAdapter>) {
        let db = Database::in_memory().await.unwrap();
        let accounts = AccountRegistry::new();
        accounts.connect("alice", PlatformId::X, "42", "token");
        accounts.connect("alice", PlatformId::LinkedIn, "urn:li:person:1", "token");

        let mock = Arc::new(MockAdapter::success(PlatformId::X));
        let mut adapters = AdapterRegistry::new();
        adapters.register(mock.clone());
        adapters.register(Arc::new(MockAdapter::success(PlatformId::LinkedIn)));

        let resolver: Arc<dyn CredentialResolver> = Arc::new(accounts);
        let coordinator = Arc::new(PublishCoordinator::new(
            db.clone(),
            adapters,
            resolver.clone(),
            RetryPolicy::default(),
        ));
        let scheduler = Scheduler::new(db.clone(), resolver, coordinator, SchedulerConfig::default());
        (db, scheduler, mock)
    }

    fn request(platforms: Vec<PlatformId>, schedule: Schedule) -> CreatePostRequest {
        CreatePostRequest {
            owner: "alice".to_string(),
            content: Content::new("Spring sale starts today"),
            platforms,
            schedule,
        }
    }

    fn in_an_hour() -> Schedule {
        Schedule::After(Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn test_create_pending_post() {
        let (db, scheduler, _) = setup().await;

        let view = scheduler
            .create(request(vec![PlatformId::X, PlatformId::X, PlatformId::LinkedIn], in_an_hour()))
            .await
            .unwrap();

        assert_eq!(view.post.status, PostStatus::Pending);
        assert_eq!(view.post.target_platforms, vec![PlatformId::X, PlatformId::LinkedIn]);

        let stored = db.get_post(&view.post.id, "alice").await.unwrap().unwrap();
        assert_eq!(stored, view.post);
    }

    #[tokio::test]
    async fn test_create_validation_failures_store_nothing() {
        let (db, scheduler, _) = setup().await;

        let cases = vec![
            request(vec![], in_an_hour()),
            request(vec![PlatformId::TikTok], in_an_hour()),
            CreatePostRequest {
                content: Content::new("  "),
                ..request(vec![PlatformId::X], in_an_hour())
            },
            request(
                vec![PlatformId::X],
                Schedule::At {
                    local: parse_wall_clock("2020-01-01T09:00").unwrap(),
                    timezone: "UTC".to_string(),
                },
            ),
            request(
                vec![PlatformId::X],
                Schedule::At {
                    local: parse_wall_clock("2099-01-01T09:00").unwrap(),
                    timezone: "Nowhere/Special".to_string(),
                },
            ),
        ];

        for case in cases {
            let result = scheduler.create(case.clone()).await;
            assert!(
                matches!(result, Err(OmnicastError::Validation(_))),
                "expected validation error for {:?}",
                case
            );
        }

        assert!(db.list_posts("alice", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_transitions() {
        let (db, scheduler, _) = setup().await;
        let view = scheduler
            .create(request(vec![PlatformId::X], in_an_hour()))
            .await
            .unwrap();

        scheduler.cancel(&view.post.id, "alice").await.unwrap();
        // Idempotent
        scheduler.cancel(&view.post.id, "alice").await.unwrap();

        let stored = db.get_post(&view.post.id, "alice").await.unwrap().unwrap();
        assert_eq!(stored.status, PostStatus::Cancelled);

        assert!(matches!(
            scheduler.cancel(&view.post.id, "bob").await,
            Err(OmnicastError::NotFound(_))
        ));
        assert!(matches!(
            scheduler.cancel("missing", "alice").await,
            Err(OmnicastError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_after_publish_is_invalid_state() {
        let (_db, scheduler, _) = setup().await;
        let view = scheduler
            .create(request(vec![PlatformId::X], Schedule::Now))
            .await
            .unwrap();

        scheduler.tick().await.unwrap();

        let result = scheduler.cancel(&view.post.id, "alice").await;
        assert!(matches!(
            result,
            Err(OmnicastError::InvalidState {
                status: PostStatus::Published,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_tick_publishes_due_posts_only() {
        let (_db, scheduler, mock) = setup().await;
        let now_post = scheduler
            .create(request(vec![PlatformId::X], Schedule::Now))
            .await
            .unwrap();
        scheduler
            .create(request(vec![PlatformId::X], in_an_hour()))
            .await
            .unwrap();

        let finished = scheduler.tick().await.unwrap();
        assert_eq!(finished, vec![(now_post.post.id.clone(), PostStatus::Published)]);
        assert_eq!(mock.publish_call_count(), 1);

        // Nothing left due
        assert!(scheduler.tick().await.unwrap().is_empty());
        assert_eq!(mock.publish_call_count(), 1);
    }

    #[tokio::test]
    async fn test_reschedule_replaces_post() {
        let (db, scheduler, _) = setup().await;
        let original = scheduler
            .create(request(vec![PlatformId::LinkedIn], in_an_hour()))
            .await
            .unwrap();

        let moved = scheduler
            .reschedule(
                &original.post.id,
                "alice",
                Schedule::After(Duration::from_secs(7200)),
            )
            .await
            .unwrap();

        assert_ne!(moved.post.id, original.post.id);
        assert_eq!(moved.post.content, original.post.content);
        assert!(moved.post.scheduled_time > original.post.scheduled_time);

        let old = db.get_post(&original.post.id, "alice").await.unwrap().unwrap();
        assert_eq!(old.status, PostStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_failed_reschedule_keeps_original() {
        let (db, scheduler, _) = setup().await;
        let original = scheduler
            .create(request(vec![PlatformId::X], in_an_hour()))
            .await
            .unwrap();

        let past = Schedule::At {
            local: parse_wall_clock("2020-01-01T00:00").unwrap(),
            timezone: "UTC".to_string(),
        };
        assert!(scheduler
            .reschedule(&original.post.id, "alice", past)
            .await
            .is_err());

        let still = db.get_post(&original.post.id, "alice").await.unwrap().unwrap();
        assert_eq!(still.status, PostStatus::Pending);
    }

    #[tokio::test]
    async fn test_dispatch_outliving_stale_after_is_not_repeated() {
        let db = Database::in_memory().await.unwrap();
        let accounts = AccountRegistry::new();
        accounts.connect("alice", PlatformId::X, "42", "token");

        let slow = Arc::new(
            MockAdapter::with_delay(PlatformId::X, Duration::from_millis(3500))
                .with_timeout(Duration::from_secs(10)),
        );
        let mut adapters = AdapterRegistry::new();
        adapters.register(slow.clone());

        let resolver: Arc<dyn CredentialResolver> = Arc::new(accounts);
        let coordinator = Arc::new(PublishCoordinator::new(
            db.clone(),
            adapters,
            resolver.clone(),
            RetryPolicy::default(),
        ));
        let config = SchedulerConfig {
            tick_interval: 1,
            stale_after: 2,
            ..SchedulerConfig::default()
        };
        let scheduler = Arc::new(Scheduler::new(db.clone(), resolver, coordinator, config));

        let view = scheduler
            .create(request(vec![PlatformId::X], Schedule::Now))
            .await
            .unwrap();

        let shutdown = Arc::new(AtomicBool::new(false));
        let handle = {
            let scheduler = scheduler.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { scheduler.run(shutdown).await })
        };

        tokio::time::sleep(Duration::from_secs(5)).await;
        shutdown.store(true, Ordering::Relaxed);
        tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert_eq!(slow.publish_call_count(), 1);
        let stored = db.get_post(&view.post.id, "alice").await.unwrap().unwrap();
        assert_eq!(stored.status, PostStatus::Published);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (_db, scheduler, mock) = setup().await;
        scheduler
            .create(request(vec![PlatformId::X], Schedule::Now))
            .await
            .unwrap();

        let scheduler = Arc::new(scheduler);
        let shutdown = Arc::new(AtomicBool::new(false));
        let handle = {
            let scheduler = scheduler.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { scheduler.run(shutdown).await })
        };

        tokio::time::sleep(Duration::from_millis(300)).await;
        shutdown.store(true, Ordering::Relaxed);

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(mock.publish_call_count(), 1);
    }
}
