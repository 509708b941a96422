use async_trait::async_trait;
use std::time::Duration;

use docstream_core::AppError;

/// One cache tier. Values are JSON strings; tags arrive already
/// tenant-prefixed. Implementations must be safe for concurrent callers.
#[async_trait]
pub trait CacheTier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<String>, AppError>;

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
        tags: &[String],
    ) -> Result<(), AppError>;

    async fn remove(&self, key: &str) -> Result<(), AppError>;

    /// Remove every entry carrying the tag; returns the count removed.
    async fn invalidate_tag(&self, tag: &str) -> Result<u64, AppError>;

    /// Remove every entry whose key matches the glob pattern.
    async fn invalidate_pattern(&self, pattern: &str) -> Result<u64, AppError>;
}
