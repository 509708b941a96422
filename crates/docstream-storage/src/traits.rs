//! Staging storage abstraction trait
//!
//! All staging backends must implement this trait so the transfer engine and
//! orchestrator stay decoupled from the filesystem.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use uuid::Uuid;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Staging storage abstraction
///
/// **Key format:** whole files stage as `{session_id}/{file_id}`, chunks as
/// `{session_id}/{file_id}.chunk.{index}`. Everything for a session lives
/// under one directory so cancellation can sweep it in one pass.
#[async_trait]
pub trait StagingStorage: Send + Sync {
    /// Stage a whole file; returns the storage path.
    async fn store_file(
        &self,
        session_id: Uuid,
        file_id: Uuid,
        data: Bytes,
    ) -> StorageResult<String>;

    /// Read back a staged file.
    async fn read_file(&self, session_id: Uuid, file_id: Uuid) -> StorageResult<Bytes>;

    /// Read a staged file by the path `store_file` returned. The pipeline
    /// holds only this path on its queue items.
    async fn read_path(&self, path: &str) -> StorageResult<Bytes>;

    /// Stage one chunk of a file.
    async fn store_chunk(
        &self,
        session_id: Uuid,
        file_id: Uuid,
        index: u32,
        data: Bytes,
    ) -> StorageResult<()>;

    /// Read back one staged chunk.
    async fn read_chunk(&self, session_id: Uuid, file_id: Uuid, index: u32)
        -> StorageResult<Bytes>;

    /// Whether a chunk has been staged.
    async fn chunk_exists(&self, session_id: Uuid, file_id: Uuid, index: u32)
        -> StorageResult<bool>;

    /// Remove a staged file and any of its chunks.
    async fn delete_file(&self, session_id: Uuid, file_id: Uuid) -> StorageResult<()>;

    /// Remove only the staged chunks of a file, keeping the assembled file.
    async fn delete_chunks(&self, session_id: Uuid, file_id: Uuid) -> StorageResult<()>;

    /// Remove everything staged for a session.
    async fn cleanup_session(&self, session_id: Uuid) -> StorageResult<()>;
}
