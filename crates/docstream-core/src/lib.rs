//! Docstream Core Library
//!
//! Domain models, error taxonomy, configuration, and progress event types
//! shared by the upload orchestrator, processing pipeline, and cache layers.

pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod notify;
pub mod sink;

pub use config::{AppConfig, CacheConfig, EngineConfig, PipelineConfig, UploadConfig};
pub use error::{AppError, ErrorCategory};
pub use events::{DocumentAction, DocumentProgressEvent, ProgressEvent, UploadProgressEvent};
pub use notify::ProgressNotifier;
pub use sink::IngestionSink;
