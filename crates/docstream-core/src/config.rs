//! Configuration module
//!
//! Typed configuration structs, one per concern, built from environment
//! variables with sensible defaults. The server binary loads `.env` via
//! dotenvy before calling [`AppConfig::from_env`].

use std::env;

const MIB: u64 = 1024 * 1024;

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_list(name: &str, default: &str) -> Vec<String> {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Upload orchestrator and chunked-transfer settings.
#[derive(Clone, Debug)]
pub struct UploadConfig {
    /// Per-file size ceiling.
    pub max_file_size_bytes: u64,
    /// Aggregate ceiling checked before any bytes are accepted.
    pub max_total_upload_size_bytes: u64,
    /// Files above this threshold are transferred in chunks.
    pub chunking_threshold_bytes: u64,
    pub default_chunk_size_bytes: u64,
    pub min_chunk_size_bytes: u64,
    pub max_chunk_size_bytes: u64,
    pub max_chunk_count: u32,
    /// Counting-semaphore width per user.
    pub max_concurrent_uploads_per_user: usize,
    /// Bounded wait for an upload slot before failing fast.
    pub upload_slot_timeout_secs: u64,
    /// Batch uploads are processed in sub-batches of this size.
    pub sub_batch_size: usize,
    pub sub_batch_pause_ms: u64,
    pub allowed_extensions: Vec<String>,
    pub allowed_content_types: Vec<String>,
    /// Per-user byte quota across live sessions. 0 = unlimited.
    pub per_user_quota_bytes: u64,
    pub session_ttl_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: 100 * MIB,
            max_total_upload_size_bytes: 1024 * MIB,
            chunking_threshold_bytes: 10 * MIB,
            default_chunk_size_bytes: 5 * MIB,
            min_chunk_size_bytes: 256 * 1024,
            max_chunk_size_bytes: 32 * MIB,
            max_chunk_count: 10_000,
            max_concurrent_uploads_per_user: 5,
            upload_slot_timeout_secs: 120,
            sub_batch_size: 5,
            sub_batch_pause_ms: 100,
            allowed_extensions: default_extensions(),
            allowed_content_types: default_content_types(),
            per_user_quota_bytes: 0,
            session_ttl_secs: 24 * 3600,
        }
    }
}

fn default_extensions() -> Vec<String> {
    ["pdf", "txt", "md", "doc", "docx", "ppt", "pptx", "xls", "xlsx", "csv", "html", "json"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_content_types() -> Vec<String> {
    [
        "application/pdf",
        "text/plain",
        "text/markdown",
        "text/html",
        "text/csv",
        "application/json",
        "application/msword",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "application/vnd.ms-powerpoint",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "application/vnd.ms-excel",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl UploadConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_file_size_bytes: env_parse("MAX_FILE_SIZE_MB", 100u64) * MIB,
            max_total_upload_size_bytes: env_parse("MAX_TOTAL_UPLOAD_SIZE_MB", 1024u64) * MIB,
            chunking_threshold_bytes: env_parse("CHUNKING_THRESHOLD_MB", 10u64) * MIB,
            default_chunk_size_bytes: env_parse("CHUNK_SIZE_MB", 5u64) * MIB,
            min_chunk_size_bytes: env_parse("MIN_CHUNK_SIZE_BYTES", defaults.min_chunk_size_bytes),
            max_chunk_size_bytes: env_parse("MAX_CHUNK_SIZE_BYTES", defaults.max_chunk_size_bytes),
            max_chunk_count: env_parse("MAX_CHUNK_COUNT", defaults.max_chunk_count),
            max_concurrent_uploads_per_user: env_parse(
                "MAX_CONCURRENT_UPLOADS_PER_USER",
                defaults.max_concurrent_uploads_per_user,
            ),
            upload_slot_timeout_secs: env_parse(
                "UPLOAD_SLOT_TIMEOUT_SECS",
                defaults.upload_slot_timeout_secs,
            ),
            sub_batch_size: env_parse("UPLOAD_SUB_BATCH_SIZE", defaults.sub_batch_size),
            sub_batch_pause_ms: env_parse("UPLOAD_SUB_BATCH_PAUSE_MS", defaults.sub_batch_pause_ms),
            allowed_extensions: env_list("ALLOWED_EXTENSIONS", &defaults.allowed_extensions.join(",")),
            allowed_content_types: env_list(
                "ALLOWED_CONTENT_TYPES",
                &defaults.allowed_content_types.join(","),
            ),
            per_user_quota_bytes: env_parse("PER_USER_QUOTA_MB", 0u64) * MIB,
            session_ttl_secs: env_parse("UPLOAD_SESSION_TTL_SECS", defaults.session_ttl_secs),
        }
    }
}

/// Processing pipeline scheduling, retry and circuit-breaker settings.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub max_concurrent_processing: usize,
    pub poll_interval_ms: u64,
    /// Slower cadence while the queue is empty.
    pub idle_poll_interval_ms: u64,
    /// Token-bucket refill rate for engine submissions, per second.
    pub submission_rate_per_sec: f64,
    /// Deferral applied when the rate limiter has no token.
    pub rate_limit_delay_secs: u64,
    pub base_retry_delay_secs: u64,
    pub max_retries: i32,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_cooldown_secs: u64,
    /// Ceiling for items stuck in Processing before they are failed.
    pub processing_timeout_secs: u64,
    pub reconcile_interval_secs: u64,
    pub reconcile_page_size: u32,
    pub reconcile_max_pages: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_processing: 5,
            poll_interval_ms: 1000,
            idle_poll_interval_ms: 5000,
            submission_rate_per_sec: 10.0,
            rate_limit_delay_secs: 10,
            base_retry_delay_secs: 5,
            max_retries: 3,
            circuit_breaker_threshold: 5,
            circuit_breaker_cooldown_secs: 600,
            processing_timeout_secs: 600,
            reconcile_interval_secs: 30,
            reconcile_page_size: 100,
            reconcile_max_pages: 3,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent_processing: env_parse(
                "MAX_CONCURRENT_PROCESSING",
                defaults.max_concurrent_processing,
            ),
            poll_interval_ms: env_parse("PIPELINE_POLL_INTERVAL_MS", defaults.poll_interval_ms),
            idle_poll_interval_ms: env_parse(
                "PIPELINE_IDLE_POLL_INTERVAL_MS",
                defaults.idle_poll_interval_ms,
            ),
            submission_rate_per_sec: env_parse(
                "SUBMISSION_RATE_PER_SEC",
                defaults.submission_rate_per_sec,
            ),
            rate_limit_delay_secs: env_parse(
                "RATE_LIMIT_DELAY_SECS",
                defaults.rate_limit_delay_secs,
            ),
            base_retry_delay_secs: env_parse(
                "BASE_RETRY_DELAY_SECS",
                defaults.base_retry_delay_secs,
            ),
            max_retries: env_parse("MAX_RETRIES", defaults.max_retries),
            circuit_breaker_threshold: env_parse(
                "CIRCUIT_BREAKER_THRESHOLD",
                defaults.circuit_breaker_threshold,
            ),
            circuit_breaker_cooldown_secs: env_parse(
                "CIRCUIT_BREAKER_COOLDOWN_SECS",
                defaults.circuit_breaker_cooldown_secs,
            ),
            processing_timeout_secs: env_parse(
                "PROCESSING_TIMEOUT_SECS",
                defaults.processing_timeout_secs,
            ),
            reconcile_interval_secs: env_parse(
                "RECONCILE_INTERVAL_SECS",
                defaults.reconcile_interval_secs,
            ),
            reconcile_page_size: env_parse("RECONCILE_PAGE_SIZE", defaults.reconcile_page_size),
            reconcile_max_pages: env_parse("RECONCILE_MAX_PAGES", defaults.reconcile_max_pages),
        }
    }
}

/// Multi-tier cache settings. A missing `REDIS_URL` disables the L2 tier.
#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub l1_capacity: usize,
    pub redis_url: Option<String>,
    pub default_l1_ttl_secs: u64,
    pub default_l2_ttl_secs: u64,
    pub default_l3_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l1_capacity: 10_000,
            redis_url: None,
            default_l1_ttl_secs: 300,
            default_l2_ttl_secs: 1800,
            default_l3_ttl_secs: 24 * 3600,
        }
    }
}

impl CacheConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            l1_capacity: env_parse("CACHE_L1_CAPACITY", defaults.l1_capacity),
            redis_url: env::var("REDIS_URL").ok(),
            default_l1_ttl_secs: env_parse("CACHE_L1_TTL_SECS", defaults.default_l1_ttl_secs),
            default_l2_ttl_secs: env_parse("CACHE_L2_TTL_SECS", defaults.default_l2_ttl_secs),
            default_l3_ttl_secs: env_parse("CACHE_L3_TTL_SECS", defaults.default_l3_ttl_secs),
        }
    }
}

/// External semantic-indexing engine endpoint.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:7272".to_string(),
            api_key: None,
            request_timeout_secs: 60,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: env::var("INDEX_ENGINE_URL").unwrap_or(defaults.base_url),
            api_key: env::var("INDEX_ENGINE_API_KEY").ok(),
            request_timeout_secs: env_parse(
                "INDEX_ENGINE_TIMEOUT_SECS",
                defaults.request_timeout_secs,
            ),
        }
    }
}

/// Top-level application configuration.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub staging_root: String,
    pub db_max_connections: u32,
    pub upload: UploadConfig,
    pub pipeline: PipelineConfig,
    pub cache: CacheConfig,
    pub engine: EngineConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

        Ok(Self {
            database_url,
            staging_root: env::var("STAGING_ROOT").unwrap_or_else(|_| "./staging".to_string()),
            db_max_connections: env_parse("DB_MAX_CONNECTIONS", 20u32),
            upload: UploadConfig::from_env(),
            pipeline: PipelineConfig::from_env(),
            cache: CacheConfig::from_env(),
            engine: EngineConfig::from_env(),
        })
    }
}
