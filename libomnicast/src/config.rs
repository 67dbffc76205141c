//! Configuration management for Omnicast
//!
//! ```toml
//! [database]
//! path = "~/.local/share/omnicast/omnicast.db"
//!
//! [scheduler]
//! tick_interval = 10            # seconds between claim loop ticks
//! max_concurrent_posts = 4      # worker pool size
//! max_retries_per_platform = 3  # total tries for retryable failures
//! retry_backoff_base = 2        # seconds, doubled after every try
//!
//! [accounts]
//! path = "~/.config/omnicast/accounts.toml"
//!
//! [platforms.x]
//! base_url = "https://api.x.com"
//! timeout = 30
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ConfigError, Result};
use crate::types::PlatformId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub accounts: AccountsConfig,
    #[serde(default)]
    pub platforms: BTreeMap<String, EndpointConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

/// Operational knobs of the claim loop and coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between claim loop ticks
    pub tick_interval: u64,
    /// Worker pool size; posts dispatched concurrently
    pub max_concurrent_posts: usize,
    /// Total adapter invocations allowed for retryable failures
    pub max_retries_per_platform: u32,
    /// Seconds before the first retry; doubles each time
    pub retry_backoff_base: u64,
    /// Seconds a requested time may lie in the past at creation
    pub grace_period: u64,
    /// Seconds after which a publishing post is assumed abandoned
    pub stale_after: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: 10,
            max_concurrent_posts: 4,
            max_retries_per_platform: 3,
            retry_backoff_base: 2,
            grace_period: 5,
            stale_after: 600,
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval)
    }

    pub fn retry_backoff_base(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_base)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick_interval == 0 {
            return Err(invalid("scheduler.tick_interval", "must be at least 1 second"));
        }
        if self.max_concurrent_posts == 0 {
            return Err(invalid("scheduler.max_concurrent_posts", "must be at least 1"));
        }
        if self.max_retries_per_platform == 0 {
            return Err(invalid("scheduler.max_retries_per_platform", "must be at least 1"));
        }
        if self.stale_after <= self.tick_interval {
            return Err(invalid(
                "scheduler.stale_after",
                "must be longer than tick_interval",
            ));
        }
        Ok(())
    }

    /// Longest a single dispatch can take when every try of a platform times
    /// out: `max_timeout` per try plus the backoff between tries.
    pub fn worst_case_dispatch(&self, max_timeout: Duration) -> Duration {
        let tries = self.max_retries_per_platform.max(1);
        let backoff_steps = 2_u32.saturating_pow(tries - 1).saturating_sub(1);
        max_timeout
            .saturating_mul(tries)
            .saturating_add(self.retry_backoff_base().saturating_mul(backoff_steps))
    }

    /// Reject a lease that could expire while a dispatch is still running
    pub fn validate_lease(&self, max_timeout: Duration) -> Result<()> {
        let worst = self.worst_case_dispatch(max_timeout);
        if self.stale_after() <= worst {
            return Err(invalid(
                "scheduler.stale_after",
                &format!(
                    "must be longer than the worst-case dispatch time of {}s",
                    worst.as_secs_f64().ceil()
                ),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountsConfig {
    /// Registry of connected platform accounts
    pub path: String,
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            path: "~/.config/omnicast/accounts.toml".to_string(),
        }
    }
}

impl AccountsConfig {
    pub fn expanded_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.path).to_string())
    }
}

/// Per-platform API endpoint overrides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub base_url: Option<String>,
    /// Seconds before an adapter call is abandoned
    pub timeout: Option<u64>,
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let mut config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;

        if let Ok(db_path) = std::env::var("OMNICAST_DB_PATH") {
            config.database.path = db_path;
        }

        config.scheduler.validate()?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            database: DatabaseConfig {
                path: "~/.local/share/omnicast/omnicast.db".to_string(),
            },
            scheduler: SchedulerConfig::default(),
            accounts: AccountsConfig::default(),
            platforms: BTreeMap::new(),
        }
    }

    /// Endpoint settings for a platform, empty when not overridden
    pub fn endpoint(&self, platform: PlatformId) -> EndpointConfig {
        self.platforms
            .get(platform.as_str())
            .cloned()
            .unwrap_or_default()
    }

    /// Database path with `~` expanded
    pub fn database_path(&self) -> String {
        shellexpand::tilde(&self.database.path).to_string()
    }
}

fn invalid(field: &str, reason: &str) -> crate::OmnicastError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

/// Resolve the configuration file path following the XDG Base Directory layout
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("OMNICAST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("omnicast").join("config.toml"))
}
