//! Docstream Processing Pipeline
//!
//! Priority work queue between staged uploads and the external indexing
//! engine. Submissions run on a bounded worker pool behind a circuit breaker
//! and a rate limiter; failures are categorized and retried with backoff; a
//! periodic reconciler verifies completion server-side before any document
//! is marked Ready.

pub mod breaker;
pub mod pipeline;
pub mod queue;
pub mod reconcile;
pub mod retry;

pub use breaker::{BreakerState, CircuitBreaker};
pub use pipeline::{PipelineStatistics, ProcessingPipeline};
pub use queue::{IngestionQueue, QueueCounts};
