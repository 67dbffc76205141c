//! Connected platform accounts
//!
//! OAuth connection management lives outside this engine. The engine only
//! asks "which credentials does `owner` have for `platform`?" through
//! [`CredentialResolver`]. [`AccountRegistry`] answers from an
//! `accounts.toml` file:
//!
//! ```toml
//! [[account]]
//! owner = "alice"
//! platform = "linkedin"
//! account_id = "urn:li:organization:1234"
//! access_token = "AQX..."
//! ```

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};
use thiserror::Error;

use crate::error::{ConfigError, Result};
use crate::types::PlatformId;

/// Credentials for one connected platform account
pub struct Credentials {
    /// Platform-side identity to publish as (page id, author URN, user id)
    pub account_id: String,
    access_token: SecretString,
}

impl Credentials {
    pub fn new(account_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            access_token: SecretString::from(access_token.into()),
        }
    }

    pub fn access_token(&self) -> &str {
        self.access_token.expose_secret()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("account_id", &self.account_id)
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("No connected {platform} account for {owner}")]
pub struct NotConnected {
    pub owner: String,
    pub platform: PlatformId,
}

/// Source of per-owner platform credentials
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve_credentials(
        &self,
        owner: &str,
        platform: PlatformId,
    ) -> std::result::Result<Credentials, NotConnected>;
}

#[derive(Debug, Clone, Deserialize)]
struct AccountEntry {
    owner: String,
    platform: PlatformId,
    account_id: String,
    access_token: String,
}

#[derive(Debug, Default, Deserialize)]
struct AccountFile {
    #[serde(default)]
    account: Vec<AccountEntry>,
}

/// Connected accounts keyed by (owner, platform)
#[derive(Clone, Default)]
pub struct AccountRegistry {
    accounts: Arc<RwLock<HashMap<(String, PlatformId), AccountEntry>>>,
}

impl AccountRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the registry file. A missing file means nothing is connected.
    pub fn load(path: &Path) -> Result<Self> {
        let registry = Self::new();

        if !path.exists() {
            tracing::debug!("No accounts file at {}, starting empty", path.display());
            return Ok(registry);
        }

        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let file: AccountFile = toml::from_str(&content).map_err(ConfigError::ParseError)?;

        for entry in file.account {
            registry.insert(entry);
        }

        Ok(registry)
    }

    /// Register (or replace) a connection
    pub fn connect(
        &self,
        owner: &str,
        platform: PlatformId,
        account_id: &str,
        access_token: &str,
    ) {
        self.insert(AccountEntry {
            owner: owner.to_string(),
            platform,
            account_id: account_id.to_string(),
            access_token: access_token.to_string(),
        });
    }

    /// Remove a connection; returns whether one existed
    pub fn disconnect(&self, owner: &str, platform: PlatformId) -> bool {
        let mut accounts = self.accounts.write().unwrap_or_else(|e| e.into_inner());
        accounts.remove(&(owner.to_string(), platform)).is_some()
    }

    /// Platforms `owner` has connected, in canonical order
    pub fn connected_platforms(&self, owner: &str) -> Vec<PlatformId> {
        let accounts = self.accounts.read().unwrap_or_else(|e| e.into_inner());
        PlatformId::ALL
            .into_iter()
            .filter(|p| accounts.contains_key(&(owner.to_string(), *p)))
            .collect()
    }

    fn insert(&self, entry: AccountEntry) {
        let mut accounts = self.accounts.write().unwrap_or_else(|e| e.into_inner());
        accounts.insert((entry.owner.clone(), entry.platform), entry);
    }
}

#[async_trait]
impl CredentialResolver for AccountRegistry {
    async fn resolve_credentials(
        &self,
        owner: &str,
        platform: PlatformId,
    ) -> std::result::Result<Credentials, NotConnected> {
        let accounts = self.accounts.read().unwrap_or_else(|e| e.into_inner());
        accounts
            .get(&(owner.to_string(), platform))
            .map(|entry| Credentials::new(entry.account_id.clone(), entry.access_token.clone()))
            .ok_or_else(|| NotConnected {
                owner: owner.to_string(),
                platform,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_load_registry_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("accounts.toml");
        std::fs::write(
            &path,
            r#"
[[account]]
owner = "alice"
platform = "linkedin"
account_id = "urn:li:organization:1"
access_token = "li-token"

[[account]]
owner = "alice"
platform = "x"
account_id = "42"
access_token = "x-token"
"#,
        )
        .unwrap();

        let registry = AccountRegistry::load(&path).unwrap();
        let creds = registry
            .resolve_credentials("alice", PlatformId::LinkedIn)
            .await
            .unwrap();
        assert_eq!(creds.account_id, "urn:li:organization:1");
        assert_eq!(creds.access_token(), "li-token");

        assert_eq!(
            registry.connected_platforms("alice"),
            vec![PlatformId::LinkedIn, PlatformId::X]
        );
    }

    #[tokio::test]
    async fn test_missing_file_is_empty_registry() {
        let registry = AccountRegistry::load(Path::new("/nonexistent/accounts.toml")).unwrap();
        let result = registry.resolve_credentials("alice", PlatformId::X).await;
        assert_eq!(
            result.unwrap_err(),
            NotConnected {
                owner: "alice".to_string(),
                platform: PlatformId::X,
            }
        );
    }

    #[tokio::test]
    async fn test_owners_are_isolated() {
        let registry = AccountRegistry::new();
        registry.connect("alice", PlatformId::Facebook, "page-1", "fb-token");

        assert!(registry
            .resolve_credentials("alice", PlatformId::Facebook)
            .await
            .is_ok());
        assert!(registry
            .resolve_credentials("bob", PlatformId::Facebook)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_disconnect() {
        let registry = AccountRegistry::new();
        registry.connect("alice", PlatformId::TikTok, "open-id", "tt-token");

        assert!(registry.disconnect("alice", PlatformId::TikTok));
        assert!(!registry.disconnect("alice", PlatformId::TikTok));
        assert!(registry.connected_platforms("alice").is_empty());
    }

    #[test]
    fn test_debug_redacts_token() {
        let creds = Credentials::new("page-1", "super-secret");
        let debug = format!("{:?}", creds);
        assert!(debug.contains("page-1"));
        assert!(!debug.contains("super-secret"));
    }
}
