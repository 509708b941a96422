use async_trait::async_trait;
use lru::LruCache;
use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use docstream_core::AppError;

use crate::tags::glob_match;
use crate::tier::CacheTier;

struct Entry {
    value: String,
    expires_at: Instant,
    tags: Vec<String>,
}

struct Inner {
    entries: LruCache<String, Entry>,
    /// tag -> keys carrying it. Pruned lazily as entries expire or evict.
    tag_index: HashMap<String, HashSet<String>>,
}

/// L1: in-process LRU with per-entry expiry.
pub struct MemoryTier {
    inner: Mutex<Inner>,
}

impl MemoryTier {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                tag_index: HashMap::new(),
            }),
        }
    }
}

impl Inner {
    fn detach_tags(&mut self, key: &str, tags: &[String]) {
        for tag in tags {
            if let Some(keys) = self.tag_index.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.tag_index.remove(tag);
                }
            }
        }
    }

    fn remove_key(&mut self, key: &str) -> bool {
        if let Some(entry) = self.entries.pop(key) {
            let tags = entry.tags;
            self.detach_tags(key, &tags);
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl CacheTier for MemoryTier {
    fn name(&self) -> &'static str {
        "l1-memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        let mut inner = self.inner.lock().await;
        let expired = match inner.entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                return Ok(Some(entry.value.clone()))
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            inner.remove_key(key);
        }
        Ok(None)
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
        tags: &[String],
    ) -> Result<(), AppError> {
        let mut inner = self.inner.lock().await;

        // Replace cleanly so stale tag index entries do not accumulate.
        inner.remove_key(key);

        for tag in tags {
            inner
                .tag_index
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }

        if let Some((evicted_key, evicted)) = inner.entries.push(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
                tags: tags.to_vec(),
            },
        ) {
            if evicted_key != key {
                let tags = evicted.tags;
                inner.detach_tags(&evicted_key, &tags);
            }
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), AppError> {
        let mut inner = self.inner.lock().await;
        inner.remove_key(key);
        Ok(())
    }

    async fn invalidate_tag(&self, tag: &str) -> Result<u64, AppError> {
        let mut inner = self.inner.lock().await;
        let keys: Vec<String> = inner
            .tag_index
            .remove(tag)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();
        let mut removed = 0;
        for key in keys {
            if inner.remove_key(&key) {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn invalidate_pattern(&self, pattern: &str) -> Result<u64, AppError> {
        let mut inner = self.inner.lock().await;
        let keys: Vec<String> = inner
            .entries
            .iter()
            .filter(|(key, _)| glob_match(pattern, key))
            .map(|(key, _)| key.clone())
            .collect();
        let mut removed = 0;
        for key in keys {
            if inner.remove_key(&key) {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn set_get_remove() {
        let tier = MemoryTier::new(10);
        tier.set("a", "1", Duration::from_secs(60), &[])
            .await
            .unwrap();
        assert_eq!(tier.get("a").await.unwrap(), Some("1".to_string()));

        tier.remove("a").await.unwrap();
        assert_eq!(tier.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_entries_miss() {
        let tier = MemoryTier::new(10);
        tier.set("a", "1", Duration::from_millis(10), &[])
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(tier.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn tag_invalidation_removes_only_tagged_entries() {
        let tier = MemoryTier::new(10);
        let ttl = Duration::from_secs(60);
        tier.set("doc:1", "a", ttl, &tags(&["t:documents", "t:user:1"]))
            .await
            .unwrap();
        tier.set("doc:2", "b", ttl, &tags(&["t:documents"]))
            .await
            .unwrap();
        tier.set("other", "c", ttl, &tags(&["t:sessions"]))
            .await
            .unwrap();

        let removed = tier.invalidate_tag("t:documents").await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(tier.get("doc:1").await.unwrap(), None);
        assert_eq!(tier.get("doc:2").await.unwrap(), None);
        assert_eq!(tier.get("other").await.unwrap(), Some("c".to_string()));
    }

    #[tokio::test]
    async fn pattern_invalidation() {
        let tier = MemoryTier::new(10);
        let ttl = Duration::from_secs(60);
        tier.set("documents:user:1:page:1", "a", ttl, &[])
            .await
            .unwrap();
        tier.set("documents:user:1:page:2", "b", ttl, &[])
            .await
            .unwrap();
        tier.set("sessions:9", "c", ttl, &[]).await.unwrap();

        let removed = tier.invalidate_pattern("documents:user:1:*").await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(tier.get("sessions:9").await.unwrap(), Some("c".to_string()));
    }

    #[tokio::test]
    async fn overwrite_replaces_tags() {
        let tier = MemoryTier::new(10);
        let ttl = Duration::from_secs(60);
        tier.set("k", "v1", ttl, &tags(&["t:old"])).await.unwrap();
        tier.set("k", "v2", ttl, &tags(&["t:new"])).await.unwrap();

        assert_eq!(tier.invalidate_tag("t:old").await.unwrap(), 0);
        assert_eq!(tier.get("k").await.unwrap(), Some("v2".to_string()));
        assert_eq!(tier.invalidate_tag("t:new").await.unwrap(), 1);
        assert_eq!(tier.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn eviction_prunes_tag_index() {
        let tier = MemoryTier::new(1);
        let ttl = Duration::from_secs(60);
        tier.set("a", "1", ttl, &tags(&["t:x"])).await.unwrap();
        tier.set("b", "2", ttl, &tags(&["t:x"])).await.unwrap();

        // "a" was evicted by capacity; only "b" remains under the tag.
        assert_eq!(tier.invalidate_tag("t:x").await.unwrap(), 1);
    }
}
