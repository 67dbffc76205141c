//! Service layer for Omnicast
//!
//! `OmnicastService` wires the engine together from a [`Config`]: one
//! database, the connected-account registry, the platform adapters, the
//! publish coordinator, the scheduler and the query service, all sharing a
//! single event bus. Both binaries build on it.
//!
//! # Example
//!
//! ```no_run
//! use libomnicast::scheduler::CreatePostRequest;
//! use libomnicast::scheduling::Schedule;
//! use libomnicast::service::OmnicastService;
//! use libomnicast::{Content, PlatformId};
//!
//! # async fn example() -> libomnicast::Result<()> {
//! let service = OmnicastService::new().await?;
//!
//! let view = service
//!     .scheduler()
//!     .create(CreatePostRequest {
//!         owner: "alice".to_string(),
//!         content: Content::new("Doors open at 9"),
//!         platforms: vec![PlatformId::LinkedIn, PlatformId::X],
//!         schedule: Schedule::Now,
//!     })
//!     .await?;
//! println!("Scheduled {}", view.post.id);
//! # Ok(())
//! # }
//! ```

pub mod events;
pub mod query;

use std::sync::Arc;

use self::events::{EventBus, EventReceiver};
use self::query::QueryService;
use crate::accounts::{AccountRegistry, CredentialResolver};
use crate::coordinator::{PublishCoordinator, RetryPolicy};
use crate::platforms::AdapterRegistry;
use crate::scheduler::Scheduler;
use crate::{Config, Database, Result};

/// Main service facade
pub struct OmnicastService {
    db: Database,
    accounts: AccountRegistry,
    scheduler: Arc<Scheduler>,
    query: QueryService,
    event_bus: EventBus,
}

impl OmnicastService {
    /// Create a service from the default configuration file
    pub async fn new() -> Result<Self> {
        let config = Config::load()?;
        Self::from_config(config).await
    }

    /// Create a service with production adapters for every platform
    pub async fn from_config(config: Config) -> Result<Self> {
        let adapters = AdapterRegistry::from_config(&config)?;
        Self::with_adapters(config, adapters).await
    }

    /// Create a service with a caller-supplied adapter set
    pub async fn with_adapters(config: Config, adapters: AdapterRegistry) -> Result<Self> {
        config.scheduler.validate()?;
        config.scheduler.validate_lease(adapters.max_timeout())?;

        let db = Database::new(&config.database_path()).await?;
        let accounts = AccountRegistry::load(&config.accounts.expanded_path())?;
        let event_bus = EventBus::new(100);

        let resolver: Arc<dyn CredentialResolver> = Arc::new(accounts.clone());
        let coordinator = Arc::new(
            PublishCoordinator::new(
                db.clone(),
                adapters,
                resolver.clone(),
                RetryPolicy::from_config(&config.scheduler),
            )
            .with_event_bus(event_bus.clone()),
        );
        let scheduler = Arc::new(Scheduler::new(
            db.clone(),
            resolver,
            coordinator,
            config.scheduler.clone(),
        ));
        let query = QueryService::new(db.clone(), scheduler.clone());

        Ok(Self {
            db,
            accounts,
            scheduler,
            query,
            event_bus,
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// The connected-account registry credentials are resolved from
    pub fn accounts(&self) -> &AccountRegistry {
        &self.accounts
    }

    pub fn scheduler(&self) -> Arc<Scheduler> {
        self.scheduler.clone()
    }

    pub fn query(&self) -> &QueryService {
        &self.query
    }

    /// Subscribe to dispatch events
    pub fn subscribe(&self) -> EventReceiver {
        self.event_bus.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::mock::MockAdapter;
    use crate::scheduler::CreatePostRequest;
    use crate::scheduling::Schedule;
    use crate::service::events::Event;
    use crate::types::{Content, PlatformId, PostStatus};
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> Config {
        let accounts_path = dir.path().join("accounts.toml");
        std::fs::write(
            &accounts_path,
            "[[account]]\nowner = \"alice\"\nplatform = \"x\"\naccount_id = \"42\"\naccess_token = \"t\"\n",
        )
        .unwrap();

        let mut config = Config::default_config();
        config.database.path = dir.path().join("omnicast.db").to_string_lossy().to_string();
        config.accounts.path = accounts_path.to_string_lossy().to_string();
        config
    }

    #[tokio::test]
    async fn test_service_wires_scheduler_and_query() {
        let dir = TempDir::new().unwrap();
        let mut adapters = AdapterRegistry::new();
        adapters.register(Arc::new(MockAdapter::success(PlatformId::X)));

        let service = OmnicastService::with_adapters(config_in(&dir), adapters)
            .await
            .unwrap();
        let mut events = service.subscribe();

        let view = service
            .scheduler()
            .create(CreatePostRequest {
                owner: "alice".to_string(),
                content: Content::new("Hello"),
                platforms: vec![PlatformId::X],
                schedule: Schedule::Now,
            })
            .await
            .unwrap();

        service.scheduler().tick().await.unwrap();

        let stored = service.query().get("alice", &view.post.id).await.unwrap();
        assert_eq!(stored.post.status, PostStatus::Published);
        assert!(matches!(
            events.recv().await.unwrap(),
            Event::DispatchStarted { .. }
        ));
    }

    #[tokio::test]
    async fn test_invalid_scheduler_config_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.scheduler.max_concurrent_posts = 0;

        let result = OmnicastService::with_adapters(config, AdapterRegistry::new()).await;
        assert!(matches!(result, Err(crate::OmnicastError::Config(_))));
    }

    #[tokio::test]
    async fn test_lease_shorter_than_slowest_dispatch_is_rejected() {
        let dir = TempDir::new().unwrap();
        let slow = MockAdapter::success(PlatformId::Instagram)
            .with_timeout(std::time::Duration::from_secs(300));
        let mut adapters = AdapterRegistry::new();
        adapters.register(Arc::new(slow));

        let result = OmnicastService::with_adapters(config_in(&dir), adapters).await;
        match result {
            Err(crate::OmnicastError::Config(e)) => assert!(e.to_string().contains("stale_after")),
            Err(other) => panic!("expected config error, got {}", other),
            Ok(_) => panic!("expected config error"),
        }
    }
}
