//! Error types for Omnicast

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::PostStatus;

pub type Result<T> = std::result::Result<T, OmnicastError>;

#[derive(Error, Debug)]
pub enum OmnicastError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Post {id} is {status}, expected pending")]
    InvalidState { id: String, status: PostStatus },
}

impl OmnicastError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            OmnicastError::Validation(_) => 3,
            OmnicastError::NotFound(_) | OmnicastError::InvalidState { .. } => 4,
            OmnicastError::Config(_) => 2,
            OmnicastError::Database(_) => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Corrupt row in {table}: {reason}")]
    Corrupt { table: &'static str, reason: String },
}

/// Failure reported by a platform adapter.
///
/// These never cross the coordinator boundary as errors; they are recorded on
/// the publish attempt and folded into the post's aggregate status.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("Authentication expired: {0}")]
    AuthExpired(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Content rejected: {0}")]
    ContentRejected(String),

    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    #[error("Unknown platform error: {0}")]
    Unknown(String),
}

impl PlatformError {
    pub fn kind(&self) -> FailureKind {
        match self {
            PlatformError::AuthExpired(_) => FailureKind::AuthExpired,
            PlatformError::RateLimited(_) => FailureKind::RateLimited,
            PlatformError::ContentRejected(_) => FailureKind::ContentRejected,
            PlatformError::TransientNetwork(_) => FailureKind::TransientNetwork,
            PlatformError::Unknown(_) => FailureKind::Unknown,
        }
    }

    /// The message without the kind prefix
    pub fn detail(&self) -> &str {
        match self {
            PlatformError::AuthExpired(m)
            | PlatformError::RateLimited(m)
            | PlatformError::ContentRejected(m)
            | PlatformError::TransientNetwork(m)
            | PlatformError::Unknown(m) => m,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

/// Storable discriminant of a [`PlatformError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    AuthExpired,
    RateLimited,
    ContentRejected,
    TransientNetwork,
    Unknown,
}

impl FailureKind {
    /// Only network blips and rate limits are worth another try.
    pub fn is_retryable(self) -> bool {
        matches!(self, FailureKind::TransientNetwork | FailureKind::RateLimited)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::AuthExpired => "auth_expired",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::ContentRejected => "content_rejected",
            FailureKind::TransientNetwork => "transient_network",
            FailureKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FailureKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "auth_expired" => Ok(FailureKind::AuthExpired),
            "rate_limited" => Ok(FailureKind::RateLimited),
            "content_rejected" => Ok(FailureKind::ContentRejected),
            "transient_network" => Ok(FailureKind::TransientNetwork),
            "unknown" => Ok(FailureKind::Unknown),
            other => Err(format!("unknown failure kind '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_validation() {
        let error = OmnicastError::Validation("no platforms".to_string());
        assert_eq!(error.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_state_errors() {
        let not_found = OmnicastError::NotFound("post abc".to_string());
        let invalid = OmnicastError::InvalidState {
            id: "abc".to_string(),
            status: PostStatus::Publishing,
        };
        assert_eq!(not_found.exit_code(), 4);
        assert_eq!(invalid.exit_code(), 4);
    }

    #[test]
    fn test_exit_code_config_and_database() {
        let config = OmnicastError::Config(ConfigError::MissingField("database.path".to_string()));
        assert_eq!(config.exit_code(), 2);

        let db = OmnicastError::Database(DbError::IoError(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "File not found",
        )));
        assert_eq!(db.exit_code(), 1);
    }

    #[test]
    fn test_invalid_state_message() {
        let error = OmnicastError::InvalidState {
            id: "post-1".to_string(),
            status: PostStatus::Published,
        };
        assert_eq!(error.to_string(), "Post post-1 is published, expected pending");
    }

    #[test]
    fn test_platform_error_formatting() {
        let error = PlatformError::ContentRejected("video required".to_string());
        assert_eq!(error.to_string(), "Content rejected: video required");
        assert_eq!(error.detail(), "video required");
    }

    #[test]
    fn test_only_transient_and_rate_limit_retry() {
        assert!(PlatformError::TransientNetwork("timeout".into()).is_retryable());
        assert!(PlatformError::RateLimited("429".into()).is_retryable());
        assert!(!PlatformError::AuthExpired("401".into()).is_retryable());
        assert!(!PlatformError::ContentRejected("too long".into()).is_retryable());
        assert!(!PlatformError::Unknown("418".into()).is_retryable());
    }

    #[test]
    fn test_failure_kind_string_mapping() {
        for kind in [
            FailureKind::AuthExpired,
            FailureKind::RateLimited,
            FailureKind::ContentRejected,
            FailureKind::TransientNetwork,
            FailureKind::Unknown,
        ] {
            assert_eq!(kind.as_str().parse::<FailureKind>().unwrap(), kind);
        }
        assert!("exploded".parse::<FailureKind>().is_err());
    }

    #[test]
    fn test_platform_error_clone() {
        // Retry loops keep the last error around after each try
        let original = PlatformError::TransientNetwork("Connection reset".to_string());
        let cloned = original.clone();
        assert_eq!(original, cloned);
    }
}
