//! Core types for Omnicast

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::FailureKind;

/// Publishing destinations supported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformId {
    Facebook,
    Instagram,
    LinkedIn,
    X,
    TikTok,
}

impl PlatformId {
    pub const ALL: [PlatformId; 5] = [
        PlatformId::Facebook,
        PlatformId::Instagram,
        PlatformId::LinkedIn,
        PlatformId::X,
        PlatformId::TikTok,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformId::Facebook => "facebook",
            PlatformId::Instagram => "instagram",
            PlatformId::LinkedIn => "linkedin",
            PlatformId::X => "x",
            PlatformId::TikTok => "tiktok",
        }
    }
}

impl std::fmt::Display for PlatformId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PlatformId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "facebook" => Ok(PlatformId::Facebook),
            "instagram" => Ok(PlatformId::Instagram),
            "linkedin" => Ok(PlatformId::LinkedIn),
            "x" | "twitter" => Ok(PlatformId::X),
            "tiktok" => Ok(PlatformId::TikTok),
            other => Err(format!(
                "Unknown platform '{}'. Valid options: facebook, instagram, linkedin, x, tiktok",
                other
            )),
        }
    }
}

/// Kind of media behind a content item's media reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

const VIDEO_EXTENSIONS: [&str; 5] = ["mp4", "mov", "webm", "m4v", "avi"];

/// The content payload delivered to every target platform
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub text: String,
    #[serde(default)]
    pub hashtags: Vec<String>,
    #[serde(default)]
    pub call_to_action: String,
    /// Opaque URL or id of an image or video
    #[serde(default)]
    pub media_reference: Option<String>,
}

impl Content {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// Content must carry either text or a call-to-action
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.call_to_action.trim().is_empty()
    }

    /// Infer the media kind from the reference's extension, ignoring any query string
    pub fn media_kind(&self) -> Option<MediaKind> {
        let reference = self.media_reference.as_deref()?.trim();
        if reference.is_empty() {
            return None;
        }
        let path = reference.split(['?', '#']).next().unwrap_or(reference);
        let is_video = path
            .rsplit_once('.')
            .map(|(_, ext)| VIDEO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
            .unwrap_or(false);
        Some(if is_video { MediaKind::Video } else { MediaKind::Image })
    }

    /// Hashtags normalised to a single leading '#'
    pub fn hashtag_line(&self) -> String {
        self.hashtags
            .iter()
            .map(|tag| tag.trim().trim_start_matches('#'))
            .filter(|tag| !tag.is_empty())
            .map(|tag| format!("#{}", tag))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Text, call-to-action and hashtags joined as one caption
    pub fn compose(&self) -> String {
        [
            self.text.trim().to_string(),
            self.call_to_action.trim().to_string(),
            self.hashtag_line(),
        ]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
    }
}

/// Aggregate status of a scheduled post
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    Pending,
    Publishing,
    Published,
    PartiallyPublished,
    Failed,
    Cancelled,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Pending => "pending",
            PostStatus::Publishing => "publishing",
            PostStatus::Published => "published",
            PostStatus::PartiallyPublished => "partially_published",
            PostStatus::Failed => "failed",
            PostStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal posts are never claimed again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PostStatus::Published
                | PostStatus::PartiallyPublished
                | PostStatus::Failed
                | PostStatus::Cancelled
        )
    }

    /// Derive the post status from its attempts.
    ///
    /// Returns `None` while any attempt is unresolved or when there are no attempts.
    pub fn aggregate(attempts: &[AttemptStatus]) -> Option<PostStatus> {
        if attempts.is_empty() || attempts.iter().any(|a| !a.is_resolved()) {
            return None;
        }
        let successes = attempts
            .iter()
            .filter(|a| **a == AttemptStatus::Success)
            .count();
        Some(if successes == attempts.len() {
            PostStatus::Published
        } else if successes == 0 {
            PostStatus::Failed
        } else {
            PostStatus::PartiallyPublished
        })
    }
}

impl std::fmt::Display for PostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PostStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(PostStatus::Pending),
            "publishing" => Ok(PostStatus::Publishing),
            "published" => Ok(PostStatus::Published),
            "partially_published" => Ok(PostStatus::PartiallyPublished),
            "failed" => Ok(PostStatus::Failed),
            "cancelled" => Ok(PostStatus::Cancelled),
            other => Err(format!("Unknown status '{}'", other)),
        }
    }
}

/// Status of one (post, platform) publish attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    NotStarted,
    InFlight,
    Success,
    Failed,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::NotStarted => "not_started",
            AttemptStatus::InFlight => "in_flight",
            AttemptStatus::Success => "success",
            AttemptStatus::Failed => "failed",
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, AttemptStatus::Success | AttemptStatus::Failed)
    }
}

impl std::fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AttemptStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(AttemptStatus::NotStarted),
            "in_flight" => Ok(AttemptStatus::InFlight),
            "success" => Ok(AttemptStatus::Success),
            "failed" => Ok(AttemptStatus::Failed),
            other => Err(format!("Unknown attempt status '{}'", other)),
        }
    }
}

/// One user intent to publish one content item to a set of platforms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledPost {
    pub id: String,
    pub owner: String,
    pub content: Content,
    pub target_platforms: Vec<PlatformId>,
    /// Firing instant, Unix seconds UTC
    pub scheduled_time: i64,
    /// IANA zone the wall-clock time was entered in
    pub timezone: String,
    pub status: PostStatus,
    pub created_at: i64,
    pub published_at: Option<i64>,
    /// Lease stamp of the most recent claim
    pub claimed_at: Option<i64>,
}

impl ScheduledPost {
    pub fn new(
        owner: String,
        content: Content,
        target_platforms: Vec<PlatformId>,
        scheduled_time: i64,
        timezone: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            owner,
            content,
            target_platforms,
            scheduled_time,
            timezone,
            status: PostStatus::Pending,
            created_at: chrono::Utc::now().timestamp(),
            published_at: None,
            claimed_at: None,
        }
    }
}

/// Per-platform outcome record of a scheduled post
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishAttempt {
    pub scheduled_post_id: String,
    pub platform: PlatformId,
    pub attempt_status: AttemptStatus,
    pub error_kind: Option<FailureKind>,
    pub error_detail: Option<String>,
    pub platform_post_id: Option<String>,
    /// Adapter invocations made so far
    pub tries: u32,
    pub completed_at: Option<i64>,
}

impl PublishAttempt {
    /// Whether the coordinator should (re)invoke the adapter for this attempt
    pub fn needs_delivery(&self) -> bool {
        match self.attempt_status {
            AttemptStatus::Success => false,
            AttemptStatus::Failed => self.error_kind.map(|k| k.is_retryable()).unwrap_or(false),
            AttemptStatus::NotStarted | AttemptStatus::InFlight => true,
        }
    }
}
