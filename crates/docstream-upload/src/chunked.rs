use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use uuid::Uuid;

use docstream_core::models::{ChunkInfo, ChunkStatus, ChunkedUploadInfo};
use docstream_core::{AppError, UploadConfig};
use docstream_storage::{sha256_checksum, StagingStorage};

/// Splits large files into chunks, tracks completion, and reassembles them.
///
/// Chunks may arrive in any order and concurrently; assembly streams them
/// back in strict index order and refuses to produce a file whose size
/// disagrees with the declared size.
pub struct ChunkedTransferEngine {
    storage: Arc<dyn StagingStorage>,
    config: UploadConfig,
}

impl ChunkedTransferEngine {
    pub fn new(storage: Arc<dyn StagingStorage>, config: UploadConfig) -> Self {
        Self { storage, config }
    }

    /// Enumerates the chunk plan for a file. The sum of chunk sizes always
    /// equals the declared size.
    pub fn plan_chunks(
        &self,
        session_id: Uuid,
        file_id: Uuid,
        file_size: u64,
        chunk_size: Option<u64>,
    ) -> Result<ChunkedUploadInfo, AppError> {
        if file_size == 0 {
            return Err(AppError::InvalidInput(
                "Cannot chunk an empty file".to_string(),
            ));
        }

        let chunk_size = chunk_size
            .unwrap_or(self.config.default_chunk_size_bytes)
            .clamp(
                self.config.min_chunk_size_bytes,
                self.config.max_chunk_size_bytes,
            );

        let total_chunks = file_size.div_ceil(chunk_size);
        if total_chunks > self.config.max_chunk_count as u64 {
            return Err(AppError::InvalidInput(format!(
                "File needs {} chunks, limit is {}",
                total_chunks, self.config.max_chunk_count
            )));
        }

        let chunks = (0..total_chunks)
            .map(|index| {
                let offset = index * chunk_size;
                ChunkInfo {
                    index: index as u32,
                    offset,
                    size: chunk_size.min(file_size - offset),
                    status: ChunkStatus::Pending,
                    checksum: None,
                }
            })
            .collect();

        Ok(ChunkedUploadInfo {
            session_id,
            file_id,
            total_chunks: total_chunks as u32,
            chunk_size,
            chunks,
            completed_chunks: 0,
        })
    }

    /// Validates and stages one chunk, then marks it Completed in the plan.
    /// Returns the chunk's SHA-256 so the caller's bookkeeping records it.
    #[tracing::instrument(skip(self, info, data), fields(session_id = %info.session_id, file_id = %info.file_id))]
    pub async fn accept_chunk(
        &self,
        info: &mut ChunkedUploadInfo,
        index: u32,
        data: Bytes,
        declared_checksum: Option<&str>,
    ) -> Result<String, AppError> {
        let expected_size = info
            .chunks
            .iter()
            .find(|c| c.index == index)
            .map(|c| c.size)
            .ok_or_else(|| {
                AppError::InvalidInput(format!(
                    "Chunk index {} out of range (total {})",
                    index, info.total_chunks
                ))
            })?;

        if data.len() as u64 != expected_size {
            return Err(AppError::InvalidInput(format!(
                "Chunk {} is {} bytes, expected {}",
                index,
                data.len(),
                expected_size
            )));
        }

        let checksum = sha256_checksum(&data);
        if let Some(declared) = declared_checksum {
            if !declared.eq_ignore_ascii_case(&checksum) {
                return Err(AppError::InvalidInput(format!(
                    "Chunk {} checksum mismatch",
                    index
                )));
            }
        }

        self.storage
            .store_chunk(info.session_id, info.file_id, index, data)
            .await
            .map_err(|e| AppError::Storage(e.to_string()))?;

        info.mark_completed(index, Some(checksum.clone()));
        tracing::debug!(
            index,
            completed = info.completed_chunks,
            total = info.total_chunks,
            "Chunk accepted"
        );
        Ok(checksum)
    }

    /// Indices not yet Completed, so a disconnected client can resume.
    pub fn missing_chunks(&self, info: &ChunkedUploadInfo) -> Vec<u32> {
        info.missing_indices()
    }

    /// Streams every chunk in strict index order into one staged file.
    /// Fails, never truncates, when a chunk is missing or the assembled size
    /// disagrees with the declared size.
    #[tracing::instrument(skip(self, info), fields(session_id = %info.session_id, file_id = %info.file_id))]
    pub async fn assemble(
        &self,
        info: &ChunkedUploadInfo,
        declared_size: u64,
    ) -> Result<(String, String), AppError> {
        if !info.all_completed() {
            return Err(AppError::InvalidInput(format!(
                "Cannot assemble: {} of {} chunks missing",
                info.missing_indices().len(),
                info.total_chunks
            )));
        }

        let mut assembled = BytesMut::with_capacity(declared_size as usize);
        for chunk in &info.chunks {
            let data = self
                .storage
                .read_chunk(info.session_id, info.file_id, chunk.index)
                .await
                .map_err(|e| AppError::Storage(e.to_string()))?;
            if data.len() as u64 != chunk.size {
                return Err(AppError::Storage(format!(
                    "Staged chunk {} is {} bytes, expected {}",
                    chunk.index,
                    data.len(),
                    chunk.size
                )));
            }
            assembled.extend_from_slice(&data);
        }

        let assembled = assembled.freeze();
        if assembled.len() as u64 != declared_size {
            return Err(AppError::InvalidInput(format!(
                "Assembled size {} disagrees with declared size {}",
                assembled.len(),
                declared_size
            )));
        }

        let checksum = sha256_checksum(&assembled);
        let path = self
            .storage
            .store_file(info.session_id, info.file_id, assembled)
            .await
            .map_err(|e| AppError::Storage(e.to_string()))?;

        // Staged chunks are no longer needed once the whole file exists.
        if let Err(e) = self
            .storage
            .delete_chunks(info.session_id, info.file_id)
            .await
        {
            tracing::warn!(error = %e, "Failed to clean up chunks after assembly");
        }

        Ok((path, checksum))
    }
}
