use std::time::Duration;
use uuid::Uuid;

/// Per-entry cache behavior. A tier participates only when its TTL is set.
#[derive(Debug, Clone, Default)]
pub struct CacheOptions {
    pub l1_ttl: Option<Duration>,
    pub l2_ttl: Option<Duration>,
    pub l3_ttl: Option<Duration>,
    /// Tags this entry can be invalidated by; tenant-prefixed before they
    /// reach the tiers.
    pub tags: Vec<String>,
    pub tenant_id: Option<Uuid>,
}

impl CacheOptions {
    /// Fast tiers only (L1 + L2), the usual shape for query results.
    pub fn fast(ttl: Duration) -> Self {
        Self {
            l1_ttl: Some(ttl),
            l2_ttl: Some(ttl),
            ..Default::default()
        }
    }

    /// All three tiers, for state that must survive a restart.
    pub fn durable(fast_ttl: Duration, durable_ttl: Duration) -> Self {
        Self {
            l1_ttl: Some(fast_ttl),
            l2_ttl: Some(fast_ttl),
            l3_ttl: Some(durable_ttl),
            ..Default::default()
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_tenant(mut self, tenant_id: Uuid) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }
}
