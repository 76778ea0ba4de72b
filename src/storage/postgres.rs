//! Postgres-backed key and video store

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{debug, info, warn};

use super::{KeyStore, VideoStore};
use crate::error::{GatewayError, Result};
use crate::relevance;
use crate::schemas::{ApiKey, KeyCounts, Page, Video};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS api_keys (
        key TEXT PRIMARY KEY,
        is_exhausted BOOLEAN NOT NULL DEFAULT FALSE,
        last_updated TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_api_keys_exhausted ON api_keys(is_exhausted)",
    r#"
    CREATE TABLE IF NOT EXISTS videos (
        seq BIGSERIAL PRIMARY KEY,
        unique_id TEXT NOT NULL UNIQUE,
        title TEXT NOT NULL,
        description TEXT NOT NULL,
        published_at TEXT NOT NULL,
        search_terms TEXT NOT NULL DEFAULT '',
        search_vector TSVECTOR GENERATED ALWAYS AS (
            to_tsvector('simple', search_terms)
        ) STORED
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_videos_search ON videos USING GIN (search_vector)",
];

const KEY_COLUMNS: &str = "key, is_exhausted, last_updated";
const VIDEO_COLUMNS: &str = "unique_id, title, description, published_at";

/// Storage manager backed by a Postgres pool
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Opens a connection pool; `acquire_timeout` bounds waiting for a
    /// connection.
    pub async fn connect(database_url: &str, acquire_timeout: Duration) -> Result<Self> {
        info!("Connecting to database...");

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await?;

        info!("Storage initialized");
        Ok(Self { pool })
    }

    /// Creates tables and the text index if they do not exist yet.
    pub async fn prepare_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("Database schema ready");
        Ok(())
    }

    async fn set_exhausted(&self, key: &str, exhausted: bool) -> Result<()> {
        let result = sqlx::query(
            "UPDATE api_keys SET is_exhausted = $1, last_updated = $2 WHERE key = $3",
        )
        .bind(exhausted)
        .bind(Utc::now())
        .bind(key)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!(key = %crate::schemas::mask_key(key), "Key not found, nothing to update");
        }
        Ok(())
    }
}

fn key_from_row(row: &PgRow) -> Result<ApiKey> {
    Ok(ApiKey {
        key: row.try_get("key")?,
        is_exhausted: row.try_get("is_exhausted")?,
        last_updated: row.try_get::<DateTime<Utc>, _>("last_updated")?,
    })
}

/// Title and description tokens as the ranker sees them, so the text index
/// and the Rust scorer split words the same way.
fn index_terms(video: &Video) -> String {
    let mut terms = relevance::tokenize(&video.title);
    terms.extend(relevance::tokenize(&video.description));
    terms.join(" ")
}

/// `OFFSET`/`LIMIT` binds for a page, or `None` when the offset is past
/// anything Postgres can address.
fn offset_limit(page: Page) -> Option<(i64, i64)> {
    let offset = i64::try_from(page.offset()).ok()?;
    let limit = i64::try_from(page.size).unwrap_or(i64::MAX);
    Some((offset, limit))
}

fn video_from_row(row: &PgRow) -> Result<Video> {
    Ok(Video {
        unique_id: row.try_get("unique_id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        published_at: row.try_get("published_at")?,
    })
}

#[async_trait]
impl KeyStore for PgStore {
    async fn insert_key(&self, key: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO api_keys (key, is_exhausted, last_updated)
            VALUES ($1, FALSE, $2)
            ON CONFLICT (key) DO UPDATE SET
                is_exhausted = FALSE,
                last_updated = EXCLUDED.last_updated
            "#,
        )
        .bind(key)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        info!("Inserted new API key");
        Ok(())
    }

    async fn find_valid_key(&self) -> Result<ApiKey> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM api_keys WHERE is_exhausted = FALSE ORDER BY last_updated ASC LIMIT 1",
            KEY_COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => key_from_row(&row),
            None => Err(GatewayError::NoKeyAvailable),
        }
    }

    fn exhausted_keys(&self) -> BoxStream<'_, Result<ApiKey>> {
        sqlx::query("SELECT key, is_exhausted, last_updated FROM api_keys WHERE is_exhausted = TRUE")
            .fetch(&self.pool)
            .map(|row| row.map_err(GatewayError::from).and_then(|r| key_from_row(&r)))
            .boxed()
    }

    async fn mark_exhausted(&self, key: &str) -> Result<()> {
        self.set_exhausted(key, true).await
    }

    async fn mark_valid(&self, key: &str) -> Result<()> {
        self.set_exhausted(key, false).await
    }

    async fn key_counts(&self) -> Result<KeyCounts> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE NOT is_exhausted) AS valid,
                COUNT(*) FILTER (WHERE is_exhausted) AS exhausted
            FROM api_keys
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(KeyCounts {
            valid: row.try_get::<i64, _>("valid")? as u64,
            exhausted: row.try_get::<i64, _>("exhausted")? as u64,
        })
    }
}

#[async_trait]
impl VideoStore for PgStore {
    async fn insert_missing(&self, videos: &[Video]) -> Result<u64> {
        let mut inserted = 0u64;
        let mut failed = 0u64;

        for video in videos {
            let result = sqlx::query(
                r#"
                INSERT INTO videos (unique_id, title, description, published_at, search_terms)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (unique_id) DO NOTHING
                "#,
            )
            .bind(&video.unique_id)
            .bind(&video.title)
            .bind(&video.description)
            .bind(&video.published_at)
            .bind(index_terms(video))
            .execute(&self.pool)
            .await;

            match result {
                Ok(done) => inserted += done.rows_affected(),
                Err(e) => {
                    warn!(unique_id = %video.unique_id, error = %e, "Failed to insert video");
                    failed += 1;
                }
            }
        }

        debug!(received = videos.len(), inserted, failed, "Inserted videos");

        if failed > 0 {
            return Err(GatewayError::PartialBatch { inserted, failed });
        }
        Ok(inserted)
    }

    async fn list_page(&self, page: Page) -> Result<Vec<Video>> {
        // No table can hold more rows than an i64 offset can skip.
        let Some((offset, limit)) = offset_limit(page) else {
            return Ok(Vec::new());
        };

        let rows = sqlx::query(&format!(
            "SELECT {} FROM videos ORDER BY seq ASC OFFSET $1 LIMIT $2",
            VIDEO_COLUMNS
        ))
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(video_from_row).collect()
    }

    async fn search(&self, query: &str, page: Page) -> Result<Vec<Video>> {
        let terms = relevance::query_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        // Any-term match through the GIN index; scoring happens in Rust.
        let rows = sqlx::query(&format!(
            "SELECT {} FROM videos WHERE search_vector @@ to_tsquery('simple', $1) ORDER BY seq ASC",
            VIDEO_COLUMNS
        ))
        .bind(terms.join(" | "))
        .fetch_all(&self.pool)
        .await?;

        let candidates = rows.iter().map(video_from_row).collect::<Result<Vec<_>>>()?;
        debug!(query = %query, candidates = candidates.len(), "Scoring search candidates");

        Ok(relevance::rank(query, candidates, page))
    }

    async fn video_count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM videos")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}
