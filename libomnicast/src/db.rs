//! Database operations for Omnicast
//!
//! Every status transition of a scheduled post is a single conditional
//! `UPDATE`, so concurrent schedulers sharing one database file never observe
//! or produce a half-applied transition.

use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use std::time::Duration;

use crate::error::{DbError, FailureKind, PlatformError, Result};
use crate::types::{AttemptStatus, Content, PlatformId, PostStatus, PublishAttempt, ScheduledPost};

const POST_COLUMNS: &str = "id, owner, content, target_platforms, scheduled_time, timezone, \
                            status, created_at, published_at, claimed_at";

const ATTEMPT_COLUMNS: &str = "scheduled_post_id, platform, attempt_status, error_kind, \
                               error_detail, platform_post_id, tries, completed_at";

/// A post with all its platform attempts
#[derive(Debug, Clone, Serialize)]
pub struct PostView {
    pub post: ScheduledPost,
    pub attempts: Vec<PublishAttempt>,
}

/// One platform's reason for not publishing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlatformFailure {
    pub platform: PlatformId,
    pub kind: Option<FailureKind>,
    pub detail: String,
}

impl PostView {
    /// Per-platform failure reasons, empty unless some platform failed
    pub fn failures(&self) -> Vec<PlatformFailure> {
        self.attempts
            .iter()
            .filter(|a| a.attempt_status == AttemptStatus::Failed)
            .map(|a| PlatformFailure {
                platform: a.platform,
                kind: a.error_kind,
                detail: a.error_detail.clone().unwrap_or_default(),
            })
            .collect()
    }
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the database file and run migrations
    pub async fn new(db_path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(10))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .map_err(DbError::SqlxError)?;

        Self::migrate(pool).await
    }

    /// Private in-memory database, used by tests and dry runs
    pub async fn in_memory() -> Result<Self> {
        // A single connection that never recycles, otherwise the data vanishes
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(DbError::SqlxError)?;

        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a new scheduled post
    pub async fn create_post(&self, post: &ScheduledPost) -> Result<()> {
        let content = encode_json(&post.content)?;
        let platforms = encode_json(&post.target_platforms)?;

        sqlx::query(
            r#"
            INSERT INTO scheduled_posts
                (id, owner, content, target_platforms, scheduled_time, timezone,
                 status, created_at, published_at, claimed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&post.id)
        .bind(&post.owner)
        .bind(content)
        .bind(platforms)
        .bind(post.scheduled_time)
        .bind(&post.timezone)
        .bind(post.status.as_str())
        .bind(post.created_at)
        .bind(post.published_at)
        .bind(post.claimed_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Get a post by ID, scoped to its owner
    pub async fn get_post(&self, post_id: &str, owner: &str) -> Result<Option<ScheduledPost>> {
        let query = format!(
            "SELECT {} FROM scheduled_posts WHERE id = ? AND owner = ?",
            POST_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(post_id)
            .bind(owner)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        row.as_ref().map(post_from_row).transpose()
    }

    /// List an owner's posts ordered by firing time
    pub async fn list_posts(
        &self,
        owner: &str,
        status: Option<PostStatus>,
    ) -> Result<Vec<ScheduledPost>> {
        let mut query_str = format!("SELECT {} FROM scheduled_posts WHERE owner = ?", POST_COLUMNS);
        if status.is_some() {
            query_str.push_str(" AND status = ?");
        }
        query_str.push_str(" ORDER BY scheduled_time ASC, created_at ASC");

        let mut query = sqlx::query(&query_str).bind(owner);
        if let Some(status) = status {
            query = query.bind(status.as_str());
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        rows.iter().map(post_from_row).collect()
    }

    /// Count an owner's posts per status
    pub async fn count_by_status(&self, owner: &str) -> Result<Vec<(PostStatus, i64)>> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS total
            FROM scheduled_posts
            WHERE owner = ?
            GROUP BY status
            "#,
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter()
            .map(|r| {
                let status = parse_column::<PostStatus>(r.get("status"), "scheduled_posts")?;
                Ok((status, r.get::<i64, _>("total")))
            })
            .collect()
    }

    /// Transition pending -> cancelled. Returns false when the post was not pending.
    pub async fn cancel_post(&self, post_id: &str, owner: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_posts SET status = 'cancelled'
            WHERE id = ? AND owner = ? AND status = 'pending'
            "#,
        )
        .bind(post_id)
        .bind(owner)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// Atomically move up to `limit` due posts from pending to publishing.
    ///
    /// The status guard is repeated in the outer `WHERE` so a concurrent
    /// claimer that already flipped a row makes this statement skip it.
    pub async fn claim_due(&self, now: i64, limit: u32) -> Result<Vec<ScheduledPost>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let query = format!(
            r#"
            UPDATE scheduled_posts
            SET status = 'publishing', claimed_at = ?
            WHERE id IN (
                SELECT id FROM scheduled_posts
                WHERE status = 'pending' AND scheduled_time <= ?
                ORDER BY scheduled_time ASC
                LIMIT ?
            )
            AND status = 'pending'
            RETURNING {}
            "#,
            POST_COLUMNS
        );

        let rows = sqlx::query(&query)
            .bind(now)
            .bind(now)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        let mut posts = rows.iter().map(post_from_row).collect::<Result<Vec<_>>>()?;
        posts.sort_by_key(|p| p.scheduled_time);
        Ok(posts)
    }

    /// Re-claim posts stuck in publishing whose lease predates `stale_before`
    pub async fn reclaim_stale(
        &self,
        now: i64,
        stale_before: i64,
        limit: u32,
    ) -> Result<Vec<ScheduledPost>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let query = format!(
            r#"
            UPDATE scheduled_posts
            SET claimed_at = ?
            WHERE id IN (
                SELECT id FROM scheduled_posts
                WHERE status = 'publishing' AND (claimed_at IS NULL OR claimed_at < ?)
                ORDER BY scheduled_time ASC
                LIMIT ?
            )
            AND status = 'publishing' AND (claimed_at IS NULL OR claimed_at < ?)
            RETURNING {}
            "#,
            POST_COLUMNS
        );

        let rows = sqlx::query(&query)
            .bind(now)
            .bind(stale_before)
            .bind(limit as i64)
            .bind(stale_before)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        rows.iter().map(post_from_row).collect()
    }

    /// Extend the publishing lease of a post being dispatched.
    ///
    /// Returns false once the post has left publishing.
    pub async fn renew_lease(&self, post_id: &str, now: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE scheduled_posts SET claimed_at = ? WHERE id = ? AND status = 'publishing'",
        )
        .bind(now)
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// Write the aggregate status. Only applies while the post is publishing.
    pub async fn finalize_post(
        &self,
        post_id: &str,
        status: PostStatus,
        published_at: Option<i64>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_posts SET status = ?, published_at = ?
            WHERE id = ? AND status = 'publishing'
            "#,
        )
        .bind(status.as_str())
        .bind(published_at)
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// Create missing attempt rows; existing ones are left untouched
    pub async fn ensure_attempts(
        &self,
        post_id: &str,
        platforms: &[PlatformId],
    ) -> Result<Vec<PublishAttempt>> {
        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        for platform in platforms {
            sqlx::query(
                r#"
                INSERT INTO publish_attempts (scheduled_post_id, platform, attempt_status, tries)
                VALUES (?, ?, 'not_started', 0)
                ON CONFLICT (scheduled_post_id, platform) DO NOTHING
                "#,
            )
            .bind(post_id)
            .bind(platform.as_str())
            .execute(&mut *tx)
            .await
            .map_err(DbError::SqlxError)?;
        }

        tx.commit().await.map_err(DbError::SqlxError)?;

        self.get_attempts(post_id).await
    }

    /// Get all attempts for a post, in creation order
    pub async fn get_attempts(&self, post_id: &str) -> Result<Vec<PublishAttempt>> {
        let query = format!(
            "SELECT {} FROM publish_attempts WHERE scheduled_post_id = ? ORDER BY rowid ASC",
            ATTEMPT_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(post_id)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        rows.iter().map(attempt_from_row).collect()
    }

    pub async fn mark_attempt_in_flight(&self, post_id: &str, platform: PlatformId) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE publish_attempts
            SET attempt_status = 'in_flight', error_kind = NULL, error_detail = NULL, completed_at = NULL
            WHERE scheduled_post_id = ? AND platform = ? AND attempt_status != 'success'
            "#,
        )
        .bind(post_id)
        .bind(platform.as_str())
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Count one adapter invocation against the attempt
    pub async fn record_try(&self, post_id: &str, platform: PlatformId) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE publish_attempts SET tries = tries + 1
            WHERE scheduled_post_id = ? AND platform = ?
            "#,
        )
        .bind(post_id)
        .bind(platform.as_str())
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Record the final outcome of one platform's delivery
    pub async fn complete_attempt(
        &self,
        post_id: &str,
        platform: PlatformId,
        outcome: &std::result::Result<String, PlatformError>,
        completed_at: i64,
    ) -> Result<()> {
        let (status, kind, detail, platform_post_id) = match outcome {
            Ok(remote_id) => (AttemptStatus::Success, None, None, Some(remote_id.as_str())),
            Err(e) => (
                AttemptStatus::Failed,
                Some(e.kind().as_str()),
                Some(e.detail().to_string()),
                None,
            ),
        };

        sqlx::query(
            r#"
            UPDATE publish_attempts
            SET attempt_status = ?, error_kind = ?, error_detail = ?, platform_post_id = ?, completed_at = ?
            WHERE scheduled_post_id = ? AND platform = ?
            "#,
        )
        .bind(status.as_str())
        .bind(kind)
        .bind(detail)
        .bind(platform_post_id)
        .bind(completed_at)
        .bind(post_id)
        .bind(platform.as_str())
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Fetch one post with its attempt breakdown
    pub async fn get_post_with_attempts(
        &self,
        post_id: &str,
        owner: &str,
    ) -> Result<Option<PostView>> {
        match self.get_post(post_id, owner).await? {
            Some(post) => {
                let attempts = self.get_attempts(&post.id).await?;
                Ok(Some(PostView { post, attempts }))
            }
            None => Ok(None),
        }
    }

    /// List an owner's posts with their attempts
    pub async fn list_posts_with_attempts(
        &self,
        owner: &str,
        status: Option<PostStatus>,
    ) -> Result<Vec<PostView>> {
        let posts = self.list_posts(owner, status).await?;

        let mut results = Vec::with_capacity(posts.len());
        for post in posts {
            let attempts = self.get_attempts(&post.id).await?;
            results.push(PostView { post, attempts });
        }

        Ok(results)
    }
}

fn encode_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| {
        DbError::Corrupt {
            table: "scheduled_posts",
            reason: e.to_string(),
        }
        .into()
    })
}

fn parse_column<T>(raw: String, table: &'static str) -> Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    raw.parse::<T>()
        .map_err(|reason| DbError::Corrupt { table, reason }.into())
}

fn post_from_row(row: &SqliteRow) -> Result<ScheduledPost> {
    let corrupt = |e: serde_json::Error| DbError::Corrupt {
        table: "scheduled_posts",
        reason: e.to_string(),
    };

    let content: Content =
        serde_json::from_str(&row.get::<String, _>("content")).map_err(corrupt)?;
    let target_platforms: Vec<PlatformId> =
        serde_json::from_str(&row.get::<String, _>("target_platforms")).map_err(corrupt)?;

    Ok(ScheduledPost {
        id: row.get("id"),
        owner: row.get("owner"),
        content,
        target_platforms,
        scheduled_time: row.get("scheduled_time"),
        timezone: row.get("timezone"),
        status: parse_column(row.get("status"), "scheduled_posts")?,
        created_at: row.get("created_at"),
        published_at: row.get("published_at"),
        claimed_at: row.get("claimed_at"),
    })
}

fn attempt_from_row(row: &SqliteRow) -> Result<PublishAttempt> {
    let error_kind = row
        .get::<Option<String>, _>("error_kind")
        .map(|raw| parse_column::<FailureKind>(raw, "publish_attempts"))
        .transpose()?;

    Ok(PublishAttempt {
        scheduled_post_id: row.get("scheduled_post_id"),
        platform: parse_column(row.get("platform"), "publish_attempts")?,
        attempt_status: parse_column(row.get("attempt_status"), "publish_attempts")?,
        error_kind,
        error_detail: row.get("error_detail"),
        platform_post_id: row.get("platform_post_id"),
        tries: row.get::<i64, _>("tries").max(0) as u32,
        completed_at: row.get("completed_at"),
    })
}
