use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64, // tokens per second
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, refill_rate: f64) -> Self {
        Self {
            tokens: capacity,
            capacity,
            refill_rate,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        let tokens_to_add = elapsed * self.refill_rate;

        self.tokens = (self.tokens + tokens_to_add).min(self.capacity);
        self.last_refill = now;
    }

    fn try_acquire(&mut self) -> bool {
        self.refill();

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn time_until_next_token(&self) -> Duration {
        if self.tokens >= 1.0 {
            Duration::from_secs(0)
        } else {
            let tokens_needed = 1.0 - self.tokens;
            let seconds = tokens_needed / self.refill_rate;
            Duration::from_secs_f64(seconds.max(0.0))
        }
    }
}

/// Sharded token-bucket rate limiter keyed by operation name.
///
/// Multiple shards (separate HashMaps) keep different operations on
/// different locks under concurrent submission load. The pipeline consults
/// `try_acquire` before each engine submission and defers the item when no
/// token is available, so this limiter must never block the drain loop.
#[derive(Clone)]
pub struct RateLimiter {
    shards: Vec<Arc<Mutex<HashMap<String, TokenBucket>>>>,
    shard_count: usize,
    default_rate: f64,
    overrides: Arc<HashMap<String, f64>>,
}

impl RateLimiter {
    /// Create a limiter where every operation refills at `default_rate`
    /// tokens per second (capacity is twice the rate), with 16 shards.
    pub fn new(default_rate: f64) -> Self {
        Self::with_shards(default_rate, HashMap::new(), 16)
    }

    /// Create a limiter with per-operation rate overrides and a custom
    /// shard count for tuning under load.
    pub fn with_shards(
        default_rate: f64,
        overrides: HashMap<String, f64>,
        shard_count: usize,
    ) -> Self {
        let shards = (0..shard_count)
            .map(|_| Arc::new(Mutex::new(HashMap::new())))
            .collect();
        Self {
            shards,
            shard_count,
            default_rate,
            overrides: Arc::new(overrides),
        }
    }

    fn shard_index(&self, operation: &str) -> usize {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        operation.hash(&mut hasher);
        (hasher.finish() as usize) % self.shard_count
    }

    fn initial_bucket(&self, operation: &str) -> TokenBucket {
        let rate = self
            .overrides
            .get(operation)
            .copied()
            .unwrap_or(self.default_rate);
        TokenBucket::new(rate * 2.0, rate)
    }

    /// Acquire a token for the operation, sleeping until one is available.
    #[tracing::instrument(skip(self))]
    pub async fn acquire(&self, operation: &str) {
        loop {
            let wait_duration = {
                let shard_index = self.shard_index(operation);
                let shard = &self.shards[shard_index];
                let mut buckets = shard.lock().await;
                let bucket = buckets
                    .entry(operation.to_string())
                    .or_insert_with(|| self.initial_bucket(operation));

                if bucket.try_acquire() {
                    tracing::trace!(
                        operation = %operation,
                        tokens_remaining = bucket.tokens,
                        "Rate limit token acquired"
                    );
                    return;
                }

                bucket.time_until_next_token()
            };

            if wait_duration > Duration::from_secs(0) {
                tracing::debug!(
                    operation = %operation,
                    wait_ms = wait_duration.as_millis(),
                    "Rate limit reached, waiting for token"
                );
                tokio::time::sleep(wait_duration).await;
            }
        }
    }

    /// Try to acquire a token without blocking.
    #[tracing::instrument(skip(self))]
    pub async fn try_acquire(&self, operation: &str) -> bool {
        let shard_index = self.shard_index(operation);
        let shard = &self.shards[shard_index];
        let mut buckets = shard.lock().await;
        let bucket = buckets
            .entry(operation.to_string())
            .or_insert_with(|| self.initial_bucket(operation));

        let acquired = bucket.try_acquire();

        tracing::trace!(
            operation = %operation,
            tokens_remaining = bucket.tokens,
            acquired,
            "Rate limit try_acquire"
        );

        acquired
    }

    /// Current available tokens for an operation.
    #[tracing::instrument(skip(self))]
    pub async fn available_tokens(&self, operation: &str) -> f64 {
        let shard_index = self.shard_index(operation);
        let shard = &self.shards[shard_index];
        let mut buckets = shard.lock().await;
        let bucket = buckets
            .entry(operation.to_string())
            .or_insert_with(|| self.initial_bucket(operation));

        bucket.refill();
        bucket.tokens
    }
}
