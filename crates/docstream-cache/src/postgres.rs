use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use sqlx::PgPool;
use std::time::Duration;

use docstream_core::AppError;

use crate::tier::CacheTier;

/// L3: durable Postgres tier backed by the `cache_entries` table. Survives
/// restarts; used for queue-item blobs and anything crash diagnostics need.
pub struct PostgresTier {
    pool: PgPool,
}

impl PostgresTier {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Drop expired rows; called opportunistically by the server.
    pub async fn purge_expired(&self) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl CacheTier for PostgresTier {
    fn name(&self) -> &'static str {
        "l3-postgres"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT cache_value FROM cache_entries WHERE cache_key = $1 AND expires_at > NOW()",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(value,)| value))
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
        tags: &[String],
    ) -> Result<(), AppError> {
        let expires_at = Utc::now()
            + ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::hours(24));
        sqlx::query(
            r#"
            INSERT INTO cache_entries (cache_key, cache_value, tags, expires_at, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (cache_key)
            DO UPDATE SET cache_value = $2, tags = $3, expires_at = $4, updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(tags)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM cache_entries WHERE cache_key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn invalidate_tag(&self, tag: &str) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE $1 = ANY(tags)")
            .bind(tag)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn invalidate_pattern(&self, pattern: &str) -> Result<u64, AppError> {
        // Translate glob to SQL LIKE; literal % and _ in keys are escaped.
        let like = pattern
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_")
            .replace('*', "%");
        let result = sqlx::query("DELETE FROM cache_entries WHERE cache_key LIKE $1 ESCAPE '\\'")
            .bind(like)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
