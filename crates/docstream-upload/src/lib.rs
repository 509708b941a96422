//! Docstream Upload Library
//!
//! Front door for bytes: validation policy, resumable chunked transfer, and
//! the session orchestrator that stages files and hands them to the
//! processing pipeline.

pub mod chunked;
pub mod orchestrator;
pub mod validation;

pub use chunked::ChunkedTransferEngine;
pub use orchestrator::{BatchResult, FileResult, UploadOrchestrator};
pub use validation::UploadValidator;
