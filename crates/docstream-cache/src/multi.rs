use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use docstream_core::AppError;

use crate::options::CacheOptions;
use crate::tags::scoped_tag;
use crate::tier::CacheTier;

/// Tiered cache facade. Reads walk tiers in latency order and back-fill
/// faster tiers on hit; L2/L3 failures degrade to the remaining tiers with a
/// warning and never fail a read.
pub struct MultiTierCache {
    l1: Arc<dyn CacheTier>,
    l2: Option<Arc<dyn CacheTier>>,
    l3: Option<Arc<dyn CacheTier>>,
    /// Per-key factory locks for `get_or_set` dedup. Entries are removed
    /// once the last holder releases, so the map stays bounded.
    key_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl MultiTierCache {
    pub fn new(
        l1: Arc<dyn CacheTier>,
        l2: Option<Arc<dyn CacheTier>>,
        l3: Option<Arc<dyn CacheTier>>,
    ) -> Self {
        Self {
            l1,
            l2,
            l3,
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    fn tiers(&self) -> Vec<(&Arc<dyn CacheTier>, fn(&CacheOptions) -> Option<Duration>)> {
        let mut tiers: Vec<(&Arc<dyn CacheTier>, fn(&CacheOptions) -> Option<Duration>)> =
            vec![(&self.l1, |o: &CacheOptions| o.l1_ttl)];
        if let Some(l2) = &self.l2 {
            tiers.push((l2, |o: &CacheOptions| o.l2_ttl));
        }
        if let Some(l3) = &self.l3 {
            tiers.push((l3, |o: &CacheOptions| o.l3_ttl));
        }
        tiers
    }

    fn scoped_tags(options: &CacheOptions) -> Vec<String> {
        options
            .tags
            .iter()
            .map(|tag| match options.tenant_id {
                Some(tenant_id) => scoped_tag(tenant_id, tag),
                None => tag.clone(),
            })
            .collect()
    }

    #[tracing::instrument(skip(self, options))]
    pub async fn get<T: DeserializeOwned>(
        &self,
        key: &str,
        options: &CacheOptions,
    ) -> Result<Option<T>, AppError> {
        let tiers = self.tiers();
        for (index, (tier, ttl_of)) in tiers.iter().enumerate() {
            if ttl_of(options).is_none() {
                continue;
            }
            match tier.get(key).await {
                Ok(Some(raw)) => {
                    let value: T = serde_json::from_str(&raw)?;
                    // Back-fill faster tiers so the next read hits earlier.
                    let tags = Self::scoped_tags(options);
                    for (faster, faster_ttl_of) in &tiers[..index] {
                        if let Some(ttl) = faster_ttl_of(options) {
                            if let Err(err) = faster.set(key, &raw, ttl, &tags).await {
                                tracing::warn!(
                                    tier = faster.name(),
                                    key,
                                    error = %err,
                                    "Cache back-fill failed"
                                );
                            }
                        }
                    }
                    return Ok(Some(value));
                }
                Ok(None) => continue,
                Err(err) => {
                    tracing::warn!(tier = tier.name(), key, error = %err, "Cache read failed, degrading");
                    continue;
                }
            }
        }
        Ok(None)
    }

    #[tracing::instrument(skip(self, value, options))]
    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        options: &CacheOptions,
    ) -> Result<(), AppError> {
        let raw = serde_json::to_string(value)?;
        let tags = Self::scoped_tags(options);

        for (tier, ttl_of) in self.tiers() {
            if let Some(ttl) = ttl_of(options) {
                if let Err(err) = tier.set(key, &raw, ttl, &tags).await {
                    tracing::warn!(tier = tier.name(), key, error = %err, "Cache write failed, degrading");
                }
            }
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn invalidate(&self, key: &str) -> Result<(), AppError> {
        for (tier, _) in self.tiers() {
            if let Err(err) = tier.remove(key).await {
                tracing::warn!(tier = tier.name(), key, error = %err, "Cache invalidation failed");
            }
        }
        Ok(())
    }

    /// Broad defensive sweep; issued together with tag invalidation after
    /// document mutations.
    #[tracing::instrument(skip(self))]
    pub async fn invalidate_pattern(&self, pattern: &str) -> Result<u64, AppError> {
        let mut removed = 0;
        for (tier, _) in self.tiers() {
            match tier.invalidate_pattern(pattern).await {
                Ok(count) => removed += count,
                Err(err) => {
                    tracing::warn!(tier = tier.name(), pattern, error = %err, "Pattern invalidation failed");
                }
            }
        }
        Ok(removed)
    }

    /// Invalidates every entry carrying any of the tags, scoped to the
    /// tenant when one is given so tags cannot cross-invalidate tenants.
    #[tracing::instrument(skip(self, tags))]
    pub async fn invalidate_by_tags(
        &self,
        tags: &[String],
        tenant_id: Option<Uuid>,
    ) -> Result<u64, AppError> {
        let mut removed = 0;
        for tag in tags {
            let scoped = match tenant_id {
                Some(tenant_id) => scoped_tag(tenant_id, tag),
                None => tag.clone(),
            };
            for (tier, _) in self.tiers() {
                match tier.invalidate_tag(&scoped).await {
                    Ok(count) => removed += count,
                    Err(err) => {
                        tracing::warn!(tier = tier.name(), tag = %scoped, error = %err, "Tag invalidation failed");
                    }
                }
            }
        }
        Ok(removed)
    }

    /// Cached read-through. Concurrent callers for the same key serialize on
    /// a per-key lock so a slow factory runs a bounded number of times;
    /// callers for different keys never contend.
    pub async fn get_or_set<T, F, Fut>(
        &self,
        key: &str,
        options: &CacheOptions,
        factory: F,
    ) -> Result<T, AppError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        if let Some(value) = self.get(key, options).await? {
            return Ok(value);
        }

        let lock = {
            let mut locks = self.key_locks.lock().await;
            locks.entry(key.to_string()).or_default().clone()
        };
        let _guard = lock.lock().await;

        // Another caller may have populated the key while we waited.
        let result = match self.get(key, options).await? {
            Some(value) => Ok(value),
            None => {
                let value = factory().await?;
                self.set(key, &value, options).await?;
                Ok(value)
            }
        };

        let mut locks = self.key_locks.lock().await;
        if let Some(entry) = locks.get(key) {
            // Only this guard and the map hold the lock: safe to drop.
            if Arc::strong_count(entry) <= 2 {
                locks.remove(key);
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTier;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn three_tier() -> (MultiTierCache, Arc<MemoryTier>, Arc<MemoryTier>) {
        let l1 = Arc::new(MemoryTier::new(100));
        let l2 = Arc::new(MemoryTier::new(100));
        let cache = MultiTierCache::new(
            l1.clone() as Arc<dyn CacheTier>,
            Some(l2.clone() as Arc<dyn CacheTier>),
            None,
        );
        (cache, l1, l2)
    }

    fn all_tiers() -> CacheOptions {
        CacheOptions {
            l1_ttl: Some(Duration::from_secs(60)),
            l2_ttl: Some(Duration::from_secs(60)),
            l3_ttl: None,
            tags: vec![],
            tenant_id: None,
        }
    }

    #[tokio::test]
    async fn set_writes_all_enabled_tiers() {
        let (cache, l1, l2) = three_tier();
        cache.set("k", &42u32, &all_tiers()).await.unwrap();

        assert!(l1.get("k").await.unwrap().is_some());
        assert!(l2.get("k").await.unwrap().is_some());
        let value: Option<u32> = cache.get("k", &all_tiers()).await.unwrap();
        assert_eq!(value, Some(42));
    }

    #[tokio::test]
    async fn slower_tier_hit_backfills_faster_tier() {
        let (cache, l1, l2) = three_tier();
        l2.set("k", "\"hello\"", Duration::from_secs(60), &[])
            .await
            .unwrap();

        let value: Option<String> = cache.get("k", &all_tiers()).await.unwrap();
        assert_eq!(value, Some("hello".to_string()));
        assert_eq!(l1.get("k").await.unwrap(), Some("\"hello\"".to_string()));
    }

    #[tokio::test]
    async fn tag_invalidation_is_tenant_scoped() {
        let (cache, _l1, _l2) = three_tier();
        let tenant_a = Uuid::new_v4();
        let tenant_b = Uuid::new_v4();

        let opts_a = all_tiers()
            .with_tags(vec!["documents".to_string()])
            .with_tenant(tenant_a);
        let opts_b = all_tiers()
            .with_tags(vec!["documents".to_string()])
            .with_tenant(tenant_b);

        cache.set("a", &1u32, &opts_a).await.unwrap();
        cache.set("b", &2u32, &opts_b).await.unwrap();

        cache
            .invalidate_by_tags(&["documents".to_string()], Some(tenant_a))
            .await
            .unwrap();

        let a: Option<u32> = cache.get("a", &opts_a).await.unwrap();
        let b: Option<u32> = cache.get("b", &opts_b).await.unwrap();
        assert_eq!(a, None);
        assert_eq!(b, Some(2));
    }

    #[tokio::test]
    async fn invalidate_by_multiple_tags_clears_any_carrier() {
        let (cache, _l1, _l2) = three_tier();
        let opts_doc = all_tiers().with_tags(vec!["documents".to_string()]);
        let opts_user = all_tiers().with_tags(vec!["user:42".to_string()]);
        let opts_other = all_tiers().with_tags(vec!["sessions".to_string()]);

        cache.set("d", &1u32, &opts_doc).await.unwrap();
        cache.set("u", &2u32, &opts_user).await.unwrap();
        cache.set("s", &3u32, &opts_other).await.unwrap();

        cache
            .invalidate_by_tags(&["documents".to_string(), "user:42".to_string()], None)
            .await
            .unwrap();

        assert_eq!(cache.get::<u32>("d", &opts_doc).await.unwrap(), None);
        assert_eq!(cache.get::<u32>("u", &opts_user).await.unwrap(), None);
        assert_eq!(cache.get::<u32>("s", &opts_other).await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn get_or_set_runs_factory_once_per_key() {
        let (cache, _l1, _l2) = three_tier();
        let cache = Arc::new(cache);
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_set("k", &all_tiers(), move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<u32, AppError>(7)
                    })
                    .await
                    .unwrap()
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn pattern_invalidation_sweeps_all_tiers() {
        let (cache, l1, l2) = three_tier();
        cache
            .set("documents:user:1:p1", &1u32, &all_tiers())
            .await
            .unwrap();
        cache.set("other", &2u32, &all_tiers()).await.unwrap();

        let removed = cache.invalidate_pattern("documents:*").await.unwrap();
        // Removed from both L1 and L2.
        assert_eq!(removed, 2);
        assert!(l1.get("documents:user:1:p1").await.unwrap().is_none());
        assert!(l2.get("documents:user:1:p1").await.unwrap().is_none());
        assert!(l1.get("other").await.unwrap().is_some());
    }
}
