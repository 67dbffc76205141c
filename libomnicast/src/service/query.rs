//! Status and query service
//!
//! Read access to an owner's scheduled posts and their per-platform
//! outcomes. Every lookup is owner-scoped: another owner's post is reported
//! as not found.

use serde::Serialize;
use std::sync::Arc;

use crate::db::{Database, PostView};
use crate::error::{OmnicastError, Result};
use crate::scheduler::Scheduler;
use crate::types::PostStatus;

const ALL_STATUSES: [PostStatus; 6] = [
    PostStatus::Pending,
    PostStatus::Publishing,
    PostStatus::Published,
    PostStatus::PartiallyPublished,
    PostStatus::Failed,
    PostStatus::Cancelled,
];

/// Post counts for one owner
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueStats {
    pub total: i64,
    /// One entry per status, zero counts included
    pub by_status: Vec<StatusCount>,
    /// Firing time of the earliest pending post
    pub next_scheduled: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusCount {
    pub status: PostStatus,
    pub count: i64,
}

impl QueueStats {
    pub fn count(&self, status: PostStatus) -> i64 {
        self.by_status
            .iter()
            .find(|c| c.status == status)
            .map(|c| c.count)
            .unwrap_or(0)
    }
}

pub struct QueryService {
    db: Database,
    scheduler: Arc<Scheduler>,
}

impl QueryService {
    pub fn new(db: Database, scheduler: Arc<Scheduler>) -> Self {
        Self { db, scheduler }
    }

    /// Posts of `owner`, optionally filtered by status, earliest first
    pub async fn list(&self, owner: &str, status: Option<PostStatus>) -> Result<Vec<PostView>> {
        self.db.list_posts_with_attempts(owner, status).await
    }

    pub async fn get(&self, owner: &str, post_id: &str) -> Result<PostView> {
        self.db
            .get_post_with_attempts(post_id, owner)
            .await?
            .ok_or_else(|| OmnicastError::NotFound(format!("Post {} not found", post_id)))
    }

    pub async fn cancel(&self, owner: &str, post_id: &str) -> Result<()> {
        self.scheduler.cancel(post_id, owner).await
    }

    pub async fn stats(&self, owner: &str) -> Result<QueueStats> {
        let counts = self.db.count_by_status(owner).await?;

        let by_status: Vec<StatusCount> = ALL_STATUSES
            .iter()
            .map(|status| StatusCount {
                status: *status,
                count: counts
                    .iter()
                    .find(|(s, _)| s == status)
                    .map(|(_, n)| *n)
                    .unwrap_or(0),
            })
            .collect();

        let next_scheduled = self
            .db
            .list_posts(owner, Some(PostStatus::Pending))
            .await?
            .first()
            .map(|p| p.scheduled_time);

        Ok(QueueStats {
            total: by_status.iter().map(|c| c.count).sum(),
            by_status,
            next_scheduled,
        })
    }
}
