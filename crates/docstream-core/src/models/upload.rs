use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UploadSessionStatus {
    Ready,
    Uploading,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl UploadSessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadSessionStatus::Completed
                | UploadSessionStatus::Failed
                | UploadSessionStatus::Cancelled
        )
    }
}

impl Display for UploadSessionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            UploadSessionStatus::Ready => write!(f, "ready"),
            UploadSessionStatus::Uploading => write!(f, "uploading"),
            UploadSessionStatus::Processing => write!(f, "processing"),
            UploadSessionStatus::Completed => write!(f, "completed"),
            UploadSessionStatus::Failed => write!(f, "failed"),
            UploadSessionStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileUploadStatus {
    Pending,
    Uploading,
    Uploaded,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl FileUploadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FileUploadStatus::Completed | FileUploadStatus::Failed | FileUploadStatus::Cancelled
        )
    }
}

impl Display for FileUploadStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            FileUploadStatus::Pending => write!(f, "pending"),
            FileUploadStatus::Uploading => write!(f, "uploading"),
            FileUploadStatus::Uploaded => write!(f, "uploaded"),
            FileUploadStatus::Processing => write!(f, "processing"),
            FileUploadStatus::Completed => write!(f, "completed"),
            FileUploadStatus::Failed => write!(f, "failed"),
            FileUploadStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for FileUploadStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(FileUploadStatus::Pending),
            "uploading" => Ok(FileUploadStatus::Uploading),
            "uploaded" => Ok(FileUploadStatus::Uploaded),
            "processing" => Ok(FileUploadStatus::Processing),
            "completed" => Ok(FileUploadStatus::Completed),
            "failed" => Ok(FileUploadStatus::Failed),
            "cancelled" => Ok(FileUploadStatus::Cancelled),
            _ => Err(anyhow::anyhow!("Invalid file upload status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    Pending,
    Uploading,
    Completed,
    Failed,
}

/// One slot of a chunk plan: byte range `[offset, offset + size)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkInfo {
    pub index: u32,
    pub offset: u64,
    pub size: u64,
    pub status: ChunkStatus,
    pub checksum: Option<String>,
}

/// Chunk bookkeeping for a file above the chunking threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkedUploadInfo {
    pub session_id: Uuid,
    pub file_id: Uuid,
    pub total_chunks: u32,
    pub chunk_size: u64,
    pub chunks: Vec<ChunkInfo>,
    pub completed_chunks: u32,
}

impl ChunkedUploadInfo {
    pub fn all_completed(&self) -> bool {
        self.completed_chunks == self.total_chunks
            && self.chunks.iter().all(|c| c.status == ChunkStatus::Completed)
    }

    pub fn missing_indices(&self) -> Vec<u32> {
        self.chunks
            .iter()
            .filter(|c| c.status != ChunkStatus::Completed)
            .map(|c| c.index)
            .collect()
    }

    /// Marks every chunk Completed; used when a whole-file transfer
    /// supersedes the plan so resumption reports nothing outstanding.
    pub fn mark_all_completed(&mut self) {
        for chunk in &mut self.chunks {
            chunk.status = ChunkStatus::Completed;
        }
        self.completed_chunks = self.total_chunks;
    }

    /// Marks a chunk Completed; idempotent per index.
    pub fn mark_completed(&mut self, index: u32, checksum: Option<String>) -> bool {
        match self.chunks.iter_mut().find(|c| c.index == index) {
            Some(chunk) => {
                if chunk.status != ChunkStatus::Completed {
                    chunk.status = ChunkStatus::Completed;
                    chunk.checksum = checksum;
                    self.completed_chunks += 1;
                }
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileUploadInfo {
    pub id: Uuid,
    pub session_id: Uuid,
    pub name: String,
    pub content_type: String,
    pub declared_size: u64,
    pub uploaded_bytes: u64,
    pub checksum: Option<String>,
    pub status: FileUploadStatus,
    pub retry_count: i32,
    pub error: Option<String>,
    pub chunked: Option<ChunkedUploadInfo>,
    pub document_id: Option<Uuid>,
}

impl FileUploadInfo {
    pub fn new(session_id: Uuid, name: String, content_type: String, declared_size: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            name,
            content_type,
            declared_size,
            uploaded_bytes: 0,
            checksum: None,
            status: FileUploadStatus::Pending,
            retry_count: 0,
            error: None,
            chunked: None,
            document_id: None,
        }
    }

    /// Advances the uploaded-bytes counter, clamped at the declared size.
    pub fn record_bytes(&mut self, bytes: u64) {
        self.uploaded_bytes = (self.uploaded_bytes + bytes).min(self.declared_size);
    }

    pub fn progress_percentage(&self) -> u8 {
        if self.declared_size == 0 {
            return 0;
        }
        ((self.uploaded_bytes * 100) / self.declared_size) as u8
    }

    /// Explicit user-driven retry: the only non-monotonic transition.
    pub fn reset_for_retry(&mut self) -> bool {
        if self.status != FileUploadStatus::Failed {
            return false;
        }
        self.status = FileUploadStatus::Pending;
        self.uploaded_bytes = 0;
        self.error = None;
        self.retry_count += 1;
        if let Some(chunked) = &mut self.chunked {
            chunked.completed_chunks = 0;
            for chunk in &mut chunked.chunks {
                chunk.status = ChunkStatus::Pending;
                chunk.checksum = None;
            }
        }
        true
    }
}

/// Per-session aggregate counters, recomputed on every file event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadStatistics {
    pub total_files: usize,
    pub completed_files: usize,
    pub failed_files: usize,
    pub total_bytes: u64,
    pub transferred_bytes: u64,
    pub elapsed_seconds: f64,
    /// Bytes per second over the session lifetime.
    pub throughput: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadOptions {
    pub collection_id: Option<Uuid>,
    pub priority: super::queue::Priority,
    pub chunk_size: Option<u64>,
    pub metadata: Option<serde_json::Value>,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            collection_id: None,
            priority: super::queue::Priority::Normal,
            chunk_size: None,
            metadata: None,
        }
    }
}

/// Upload session owned exclusively by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSession {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub collection_id: Option<Uuid>,
    pub options: UploadOptions,
    pub files: Vec<FileUploadInfo>,
    pub statistics: UploadStatistics,
    pub status: UploadSessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UploadSession {
    pub fn new(tenant_id: Uuid, user_id: Uuid, options: UploadOptions) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            user_id,
            collection_id: options.collection_id,
            options,
            files: Vec::new(),
            statistics: UploadStatistics::default(),
            status: UploadSessionStatus::Ready,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn file_mut(&mut self, file_id: Uuid) -> Option<&mut FileUploadInfo> {
        self.files.iter_mut().find(|f| f.id == file_id)
    }

    /// Recomputes aggregate statistics and rolls the session status up from
    /// its files. Called after every file event.
    pub fn refresh(&mut self, now: DateTime<Utc>) {
        let stats = &mut self.statistics;
        stats.total_files = self.files.len();
        stats.completed_files = self
            .files
            .iter()
            .filter(|f| f.status == FileUploadStatus::Completed)
            .count();
        stats.failed_files = self
            .files
            .iter()
            .filter(|f| f.status == FileUploadStatus::Failed)
            .count();
        stats.total_bytes = self.files.iter().map(|f| f.declared_size).sum();
        stats.transferred_bytes = self.files.iter().map(|f| f.uploaded_bytes).sum();
        stats.elapsed_seconds = (now - self.created_at).num_milliseconds() as f64 / 1000.0;
        stats.throughput = if stats.elapsed_seconds > 0.0 {
            stats.transferred_bytes as f64 / stats.elapsed_seconds
        } else {
            0.0
        };

        if self.status != UploadSessionStatus::Cancelled {
            self.status = if self.files.iter().all(|f| f.status.is_terminal())
                && !self.files.is_empty()
            {
                if stats.failed_files == 0 {
                    UploadSessionStatus::Completed
                } else if stats.completed_files == 0 {
                    UploadSessionStatus::Failed
                } else {
                    // Mixed outcome: the session completed with failures the
                    // user can retry file by file.
                    UploadSessionStatus::Completed
                }
            } else if self
                .files
                .iter()
                .any(|f| f.status == FileUploadStatus::Processing)
            {
                UploadSessionStatus::Processing
            } else if self
                .files
                .iter()
                .any(|f| f.status == FileUploadStatus::Uploading)
            {
                UploadSessionStatus::Uploading
            } else {
                UploadSessionStatus::Ready
            };
        }
        self.updated_at = now;
    }
}
