//! 4.A Persistence — the sole source of truth for "already posted".
//!
//! A thin transactional layer over the SQLite store. Every operation opens
//! a short-lived connection from the pool and commits; there is no
//! in-memory cache, so a crash between any two calls here leaves the
//! database in a state the rest of the system can resume from safely.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::BotIdentity;
use sqlx::{Row, SqlitePool};

use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq)]
pub struct Feed {
    pub id: i64,
    pub feed_url: String,
    pub community_key: String,
    pub community_id: i64,
    pub bot_identity: BotIdentity,
    pub last_modified: Option<String>,
    pub etag: Option<String>,
    pub next_check_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Article {
    pub id: i64,
    pub feed_id: i64,
    pub article_url: String,
    pub headline: String,
    pub fetched_at: DateTime<Utc>,
    pub remote_post_id: Option<i64>,
}

fn row_to_feed(row: &sqlx::sqlite::SqliteRow) -> Result<Feed, StoreError> {
    let bot_identity_raw: String = row.get("bot_identity");
    let bot_identity = bot_identity_raw.parse().unwrap_or(BotIdentity::Bot);
    Ok(Feed {
        id: row.get("id"),
        feed_url: row.get("feed_url"),
        community_key: row.get("community_key"),
        community_id: row.get("community_id"),
        bot_identity,
        last_modified: row.get("last_modified"),
        etag: row.get("etag"),
        next_check_at: row.get("next_check_at"),
    })
}

fn row_to_article(row: &sqlx::sqlite::SqliteRow) -> Article {
    Article {
        id: row.get("id"),
        feed_id: row.get("feed_id"),
        article_url: row.get("article_url"),
        headline: row.get("headline"),
        fetched_at: row.get("fetched_at"),
        remote_post_id: row.get("remote_post_id"),
    }
}

/// The persistence contract every other component depends on. A trait so
/// the scheduler and command processor can be exercised in tests against
/// a plain `SqliteStore` backed by `sqlite::memory:`, without mocking.
#[async_trait]
pub trait Store: Send + Sync {
    async fn list_feeds(&self) -> Result<Vec<Feed>, StoreError>;

    async fn add_feed(
        &self,
        feed_url: &str,
        community_key: &str,
        community_id: i64,
        bot_identity: BotIdentity,
    ) -> Result<Feed, StoreError>;

    async fn update_feed_validators(
        &self,
        feed_id: i64,
        last_modified: Option<&str>,
        etag: Option<&str>,
        next_check_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn update_feed_url(
        &self,
        community_key: &str,
        new_url: &str,
        bot_identity: BotIdentity,
    ) -> Result<(), StoreError>;

    async fn remove_feed(
        &self,
        by_community_key: Option<&str>,
        by_url: Option<&str>,
    ) -> Result<u64, StoreError>;

    async fn get_article_by_url(&self, url: &str) -> Result<Option<Article>, StoreError>;

    async fn add_article(
        &self,
        feed_id: i64,
        url: &str,
        headline: &str,
        fetched_at: DateTime<Utc>,
        remote_post_id: Option<i64>,
    ) -> Result<Option<Article>, StoreError>;

    async fn set_article_post_id(
        &self,
        article_id: i64,
        remote_post_id: i64,
    ) -> Result<(), StoreError>;

    async fn get_earliest_unposted(&self, feed_id: i64) -> Result<Option<Article>, StoreError>;

    async fn get_recent_article_timestamps(
        &self,
        feed_id: i64,
        limit: i64,
    ) -> Result<Vec<DateTime<Utc>>, StoreError>;
}

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn list_feeds(&self) -> Result<Vec<Feed>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, feed_url, community_key, community_id, bot_identity, last_modified, etag, next_check_at FROM feeds ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_feed).collect()
    }

    async fn add_feed(
        &self,
        feed_url: &str,
        community_key: &str,
        community_id: i64,
        bot_identity: BotIdentity,
    ) -> Result<Feed, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO feeds (feed_url, community_key, community_id, bot_identity)
            VALUES (?, ?, ?, ?)
            RETURNING id, feed_url, community_key, community_id, bot_identity, last_modified, etag, next_check_at
            "#,
        )
        .bind(feed_url)
        .bind(community_key)
        .bind(community_id)
        .bind(bot_identity.slug())
        .fetch_one(&self.pool)
        .await?;

        row_to_feed(&row)
    }

    async fn update_feed_validators(
        &self,
        feed_id: i64,
        last_modified: Option<&str>,
        etag: Option<&str>,
        next_check_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE feeds SET last_modified = ?, etag = ?, next_check_at = ? WHERE id = ?",
        )
        .bind(last_modified)
        .bind(etag)
        .bind(next_check_at)
        .bind(feed_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_feed_url(
        &self,
        community_key: &str,
        new_url: &str,
        bot_identity: BotIdentity,
    ) -> Result<(), StoreError> {
        let matched = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM feeds WHERE community_key = ?",
        )
        .bind(community_key)
        .fetch_one(&self.pool)
        .await?;

        if matched != 1 {
            return Err(StoreError::AmbiguousSelector {
                community_key: community_key.to_string(),
                matched: matched.max(0) as u64,
            });
        }

        sqlx::query("UPDATE feeds SET feed_url = ?, bot_identity = ? WHERE community_key = ?")
            .bind(new_url)
            .bind(bot_identity.slug())
            .bind(community_key)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn remove_feed(
        &self,
        by_community_key: Option<&str>,
        by_url: Option<&str>,
    ) -> Result<u64, StoreError> {
        if by_community_key.is_none() && by_url.is_none() {
            return Err(StoreError::NoSelector);
        }

        // Build the WHERE clause purely from the supplied selectors; there
        // is deliberately no fallback that also matches a numeric `id`.
        let result = match (by_community_key, by_url) {
            (Some(key), Some(url)) => {
                sqlx::query("DELETE FROM feeds WHERE community_key = ? AND feed_url = ?")
                    .bind(key)
                    .bind(url)
                    .execute(&self.pool)
                    .await?
            }
            (Some(key), None) => sqlx::query("DELETE FROM feeds WHERE community_key = ?")
                .bind(key)
                .execute(&self.pool)
                .await?,
            (None, Some(url)) => sqlx::query("DELETE FROM feeds WHERE feed_url = ?")
                .bind(url)
                .execute(&self.pool)
                .await?,
            (None, None) => unreachable!("checked above"),
        };

        Ok(result.rows_affected())
    }

    async fn get_article_by_url(&self, url: &str) -> Result<Option<Article>, StoreError> {
        let row = sqlx::query(
            "SELECT id, feed_id, article_url, headline, fetched_at, remote_post_id FROM articles WHERE article_url = ?",
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(row_to_article))
    }

    async fn add_article(
        &self,
        feed_id: i64,
        url: &str,
        headline: &str,
        fetched_at: DateTime<Utc>,
        remote_post_id: Option<i64>,
    ) -> Result<Option<Article>, StoreError> {
        if self.get_article_by_url(url).await?.is_some() {
            return Ok(None);
        }

        let row = sqlx::query(
            r#"
            INSERT INTO articles (feed_id, article_url, headline, fetched_at, remote_post_id)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id, feed_id, article_url, headline, fetched_at, remote_post_id
            "#,
        )
        .bind(feed_id)
        .bind(url)
        .bind(headline)
        .bind(fetched_at)
        .bind(remote_post_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(Some(row_to_article(&row)))
    }

    async fn set_article_post_id(
        &self,
        article_id: i64,
        remote_post_id: i64,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE articles SET remote_post_id = ? WHERE id = ? AND remote_post_id IS NULL")
            .bind(remote_post_id)
            .bind(article_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn get_earliest_unposted(&self, feed_id: i64) -> Result<Option<Article>, StoreError> {
        let row = sqlx::query(
            "SELECT id, feed_id, article_url, headline, fetched_at, remote_post_id \
             FROM articles WHERE feed_id = ? AND remote_post_id IS NULL ORDER BY id ASC LIMIT 1",
        )
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(row_to_article))
    }

    async fn get_recent_article_timestamps(
        &self,
        feed_id: i64,
        limit: i64,
    ) -> Result<Vec<DateTime<Utc>>, StoreError> {
        let rows = sqlx::query(
            "SELECT fetched_at FROM articles WHERE feed_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(feed_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|r| r.get("fetched_at")).collect())
    }
}
