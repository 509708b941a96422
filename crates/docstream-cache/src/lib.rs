//! Docstream Cache Library
//!
//! Three-tier cache (in-process LRU, Redis, Postgres) with tenant-scoped
//! tag invalidation. List-type reads (documents for a user, documents in a
//! collection) are cached with tags so one document mutation can invalidate
//! every related list page without knowing its key.

pub mod memory;
pub mod multi;
pub mod options;
pub mod postgres;
pub mod redis_tier;
pub mod tags;
pub mod tier;

pub use memory::MemoryTier;
pub use multi::MultiTierCache;
pub use options::CacheOptions;
pub use postgres::PostgresTier;
pub use redis_tier::RedisTier;
pub use tier::CacheTier;
