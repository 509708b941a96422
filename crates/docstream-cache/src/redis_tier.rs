use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

use docstream_core::AppError;

use crate::tier::CacheTier;

const KEY_PREFIX: &str = "docstream:k:";
const TAG_PREFIX: &str = "docstream:t:";

/// L2: shared Redis tier. Tag membership is kept in Redis sets so any
/// process can invalidate entries written by another.
pub struct RedisTier {
    conn: ConnectionManager,
}

impl RedisTier {
    pub async fn connect(redis_url: &str) -> Result<Self, AppError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| AppError::Cache(format!("Invalid Redis URL: {}", e)))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| AppError::Cache(format!("Redis connection failed: {}", e)))?;
        Ok(Self { conn })
    }

    fn entry_key(key: &str) -> String {
        format!("{}{}", KEY_PREFIX, key)
    }

    fn tag_key(tag: &str) -> String {
        format!("{}{}", TAG_PREFIX, tag)
    }
}

#[async_trait]
impl CacheTier for RedisTier {
    fn name(&self) -> &'static str {
        "l2-redis"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn
            .get(Self::entry_key(key))
            .await
            .map_err(|e| AppError::Cache(format!("Redis GET failed: {}", e)))?;
        Ok(value)
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
        tags: &[String],
    ) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let entry_key = Self::entry_key(key);
        let ttl_secs = ttl.as_secs().max(1);

        let mut pipe = redis::pipe();
        pipe.set_ex(&entry_key, value, ttl_secs).ignore();
        for tag in tags {
            let tag_key = Self::tag_key(tag);
            pipe.sadd(&tag_key, &entry_key).ignore();
            // Tag sets outlive their shortest member a little; invalidation
            // and this expiry both clean them up.
            pipe.expire(&tag_key, (ttl_secs * 2) as i64).ignore();
        }
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|e| AppError::Cache(format!("Redis SET failed: {}", e)))?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(Self::entry_key(key))
            .await
            .map_err(|e| AppError::Cache(format!("Redis DEL failed: {}", e)))?;
        Ok(())
    }

    async fn invalidate_tag(&self, tag: &str) -> Result<u64, AppError> {
        let mut conn = self.conn.clone();
        let tag_key = Self::tag_key(tag);
        let members: Vec<String> = conn
            .smembers(&tag_key)
            .await
            .map_err(|e| AppError::Cache(format!("Redis SMEMBERS failed: {}", e)))?;

        let mut removed = 0u64;
        if !members.is_empty() {
            removed = conn
                .del(&members)
                .await
                .map_err(|e| AppError::Cache(format!("Redis DEL failed: {}", e)))?;
        }
        conn.del::<_, ()>(&tag_key)
            .await
            .map_err(|e| AppError::Cache(format!("Redis DEL failed: {}", e)))?;
        Ok(removed)
    }

    async fn invalidate_pattern(&self, pattern: &str) -> Result<u64, AppError> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(format!("{}{}", KEY_PREFIX, pattern))
            .query_async(&mut conn)
            .await
            .map_err(|e| AppError::Cache(format!("Redis KEYS failed: {}", e)))?;

        if keys.is_empty() {
            return Ok(0);
        }
        let removed: u64 = conn
            .del(&keys)
            .await
            .map_err(|e| AppError::Cache(format!("Redis DEL failed: {}", e)))?;
        Ok(removed)
    }
}
