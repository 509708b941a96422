//! Docstream Storage Library
//!
//! Staging storage abstraction for uploaded bytes. Files and chunks live
//! under a session-scoped directory until ingestion hands them off, then the
//! whole session directory is cleaned up.

pub mod checksum;
pub mod local;
pub mod traits;

pub use checksum::sha256_checksum;
pub use local::LocalStaging;
pub use traits::{StagingStorage, StorageError, StorageResult};
