pub mod document;
pub mod queue;
pub mod upload;

pub use document::{
    is_confirmed_external_id, placeholder_external_id, Document, DocumentStatus,
    PLACEHOLDER_PREFIX,
};
pub use queue::{IngestionQueueItem, Priority, QueueItemStatus};
pub use upload::{
    ChunkInfo, ChunkStatus, ChunkedUploadInfo, FileUploadInfo, FileUploadStatus, UploadOptions,
    UploadSession, UploadSessionStatus, UploadStatistics,
};
