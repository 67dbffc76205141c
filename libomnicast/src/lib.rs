//! Omnicast - scheduled publishing to many social platforms
//!
//! A post is created once with content, a set of target platforms and a
//! firing time. The scheduler claims it when it is due, the coordinator
//! fans it out to every platform adapter concurrently, and the outcome of
//! each platform is recorded alongside an aggregate status.

pub mod accounts;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod logging;
pub mod platforms;
pub mod scheduler;
pub mod scheduling;
pub mod service;
pub mod types;

// Re-export commonly used types
pub use accounts::{AccountRegistry, CredentialResolver, Credentials};
pub use config::Config;
pub use db::{Database, PostView};
pub use error::{FailureKind, OmnicastError, PlatformError, Result};
pub use types::{AttemptStatus, Content, PlatformId, PostStatus, PublishAttempt, ScheduledPost};
