//! Docstream Infrastructure Library
//!
//! Cross-cutting infrastructure: operation-keyed rate limiting and tracing
//! initialization.

pub mod rate_limit;
pub mod telemetry;

pub use rate_limit::RateLimiter;
