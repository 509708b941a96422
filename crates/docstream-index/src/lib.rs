//! Docstream Index Library
//!
//! HTTP client for the external semantic-indexing engine. The engine is an
//! opaque collaborator: documents go in over multipart POST, completion
//! comes back asynchronously and must be reconciled, never trusted from the
//! submission response alone.

pub mod classify;
pub mod client;
pub mod types;

pub use classify::{classify_http_status, classify_transport_error};
pub use client::{IndexEngineClient, IngestionEngine};
pub use types::{EngineDocument, EngineTaskStatus, SubmitRequest, SubmitResponse};
