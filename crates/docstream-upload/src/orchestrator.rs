use bytes::Bytes;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, Semaphore};
use uuid::Uuid;

use docstream_cache::tags::{document_mutation_tags, TAG_DOCUMENTS};
use docstream_cache::{CacheOptions, MultiTierCache};
use docstream_core::events::{
    DocumentAction, DocumentProgressEvent, ProgressEvent, UploadProgressEvent,
};
use docstream_core::models::{
    Document, DocumentStatus, FileUploadInfo, FileUploadStatus, IngestionQueueItem,
    QueueItemStatus, UploadOptions, UploadSession, UploadSessionStatus, UploadStatistics,
};
use docstream_core::sink::IngestionSink;
use docstream_core::{AppError, ProgressNotifier, UploadConfig};
use docstream_db::DocumentStore;
use docstream_storage::{sha256_checksum, StagingStorage};

use crate::chunked::ChunkedTransferEngine;
use crate::validation::UploadValidator;

const SESSION_CACHE_TTL: Duration = Duration::from_secs(30 * 60);

fn session_cache_key(session_id: Uuid) -> String {
    format!("upload:session:{}", session_id)
}

/// Outcome for one file of an upload; a batch yields exactly one of these
/// per input file, success or failure.
#[derive(Debug, Clone)]
pub struct FileResult {
    pub file_id: Uuid,
    pub name: String,
    pub success: bool,
    pub document_id: Option<Uuid>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BatchResult {
    pub session_id: Uuid,
    pub results: Vec<FileResult>,
    pub statistics: UploadStatistics,
}

/// Owns upload-session lifecycle: validates, stages bytes (whole or
/// chunked), persists the Processing document synchronously, and hands
/// completed files to the processing pipeline.
pub struct UploadOrchestrator {
    sessions: RwLock<HashMap<Uuid, UploadSession>>,
    user_slots: Mutex<HashMap<Uuid, Arc<Semaphore>>>,
    validator: UploadValidator,
    chunker: ChunkedTransferEngine,
    storage: Arc<dyn StagingStorage>,
    cache: Arc<MultiTierCache>,
    store: Arc<dyn DocumentStore>,
    sink: Arc<dyn IngestionSink>,
    notifier: ProgressNotifier,
    config: UploadConfig,
}

impl UploadOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: UploadConfig,
        storage: Arc<dyn StagingStorage>,
        cache: Arc<MultiTierCache>,
        store: Arc<dyn DocumentStore>,
        sink: Arc<dyn IngestionSink>,
        notifier: ProgressNotifier,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            user_slots: Mutex::new(HashMap::new()),
            validator: UploadValidator::new(config.clone()),
            chunker: ChunkedTransferEngine::new(storage.clone(), config.clone()),
            storage,
            cache,
            store,
            sink,
            notifier,
            config,
        }
    }

    /// Per-user transfer slot with a bounded wait: a caller that cannot
    /// acquire within the timeout fails fast instead of queuing forever.
    async fn acquire_slot(
        &self,
        user_id: Uuid,
    ) -> Result<tokio::sync::OwnedSemaphorePermit, AppError> {
        let semaphore = {
            let mut slots = self.user_slots.lock().await;
            slots
                .entry(user_id)
                .or_insert_with(|| {
                    Arc::new(Semaphore::new(self.config.max_concurrent_uploads_per_user))
                })
                .clone()
        };

        let timeout = Duration::from_secs(self.config.upload_slot_timeout_secs);
        match tokio::time::timeout(timeout, semaphore.acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(AppError::Internal(
                "Upload semaphore closed".to_string(),
            )),
            Err(_) => Err(AppError::UploadSlotTimeout(format!(
                "No upload slot available within {}s",
                self.config.upload_slot_timeout_secs
            ))),
        }
    }

    async fn bytes_in_flight(&self, user_id: Uuid) -> u64 {
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .filter(|s| s.user_id == user_id && !s.status.is_terminal())
            .map(|s| s.statistics.total_bytes)
            .sum()
    }

    async fn cache_session(&self, session: &UploadSession) {
        let options = CacheOptions::fast(SESSION_CACHE_TTL)
            .with_tags(vec!["upload-sessions".to_string()])
            .with_tenant(session.tenant_id);
        if let Err(err) = self
            .cache
            .set(&session_cache_key(session.id), session, &options)
            .await
        {
            tracing::warn!(session_id = %session.id, error = %err, "Failed to cache session");
        }
    }

    /// Creates a session for the declared files. The aggregate ceiling and
    /// quota are checked here, before any bytes are accepted; files above
    /// the chunking threshold get a chunk plan for resumable transfer.
    #[tracing::instrument(skip(self, files, options))]
    pub async fn initialize_session(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        files: Vec<(String, String, u64)>,
        options: UploadOptions,
    ) -> Result<UploadSession, AppError> {
        self.validator
            .validate_batch(&files, self.bytes_in_flight(user_id).await)?;

        let mut session = UploadSession::new(tenant_id, user_id, options);
        for (name, content_type, size) in files {
            let mut file = FileUploadInfo::new(session.id, name, content_type, size);
            if self.validator.needs_chunking(size) {
                file.chunked = Some(self.chunker.plan_chunks(
                    session.id,
                    file.id,
                    size,
                    session.options.chunk_size,
                )?);
            }
            session.files.push(file);
        }
        session.refresh(Utc::now());

        self.cache_session(&session).await;
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.id, session.clone());

        tracing::info!(
            session_id = %session.id,
            user_id = %user_id,
            files = session.files.len(),
            total_bytes = session.statistics.total_bytes,
            "Upload session initialized"
        );
        Ok(session)
    }

    pub async fn get_session(&self, session_id: Uuid) -> Option<UploadSession> {
        let sessions = self.sessions.read().await;
        sessions.get(&session_id).cloned()
    }

    /// Stages a whole (non-chunked) file and hands it to the pipeline.
    #[tracing::instrument(skip(self, data))]
    pub async fn upload_file(
        &self,
        session_id: Uuid,
        file_id: Uuid,
        user_id: Uuid,
        data: Bytes,
    ) -> FileResult {
        let _permit = match self.acquire_slot(user_id).await {
            Ok(permit) => permit,
            Err(err) => {
                return self
                    .fail_file(session_id, file_id, err.client_message())
                    .await
            }
        };

        match self.transfer_whole_file(session_id, file_id, data).await {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(
                    session_id = %session_id,
                    file_id = %file_id,
                    error = %err,
                    "File upload failed"
                );
                self.fail_file(session_id, file_id, err.client_message())
                    .await
            }
        }
    }

    /// The idempotent answer for a file that already reached the pipeline.
    /// A client retrying after a dropped response gets the original outcome
    /// back instead of triggering a second transfer.
    fn replayed_result(file: &FileUploadInfo) -> Option<FileResult> {
        match file.status {
            FileUploadStatus::Processing | FileUploadStatus::Completed => Some(FileResult {
                file_id: file.id,
                name: file.name.clone(),
                success: true,
                document_id: file.document_id,
                error: None,
            }),
            _ => None,
        }
    }

    async fn transfer_whole_file(
        &self,
        session_id: Uuid,
        file_id: Uuid,
        data: Bytes,
    ) -> Result<FileResult, AppError> {
        let (name, content_type, declared_size) = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(&session_id)
                .ok_or_else(|| AppError::NotFound(format!("Session {}", session_id)))?;
            let file = session
                .file_mut(file_id)
                .ok_or_else(|| AppError::NotFound(format!("File {}", file_id)))?;
            if let Some(result) = Self::replayed_result(file) {
                return Ok(result);
            }
            file.status = FileUploadStatus::Uploading;
            (file.name.clone(), file.content_type.clone(), file.declared_size)
        };

        self.validator
            .validate_file(&name, &content_type, data.len() as u64)?;
        if data.len() as u64 != declared_size {
            return Err(AppError::InvalidInput(format!(
                "'{}' is {} bytes, declared {}",
                name,
                data.len(),
                declared_size
            )));
        }

        let checksum = sha256_checksum(&data);
        let size = data.len() as u64;
        let path = self
            .storage
            .store_file(session_id, file_id, data)
            .await
            .map_err(|e| AppError::Storage(e.to_string()))?;

        self.finish_local_transfer(session_id, file_id, path, size, checksum)
            .await
    }

    /// Accepts one chunk of a file with a chunk plan. Chunks may arrive in
    /// any order; completion is tracked per chunk for resumption.
    #[tracing::instrument(skip(self, data))]
    pub async fn upload_chunk(
        &self,
        session_id: Uuid,
        file_id: Uuid,
        index: u32,
        data: Bytes,
        declared_checksum: Option<&str>,
    ) -> Result<(), AppError> {
        // The chunk plan is validated and staged outside the session lock;
        // only the bookkeeping write happens under it.
        let mut info = {
            let sessions = self.sessions.read().await;
            let session = sessions
                .get(&session_id)
                .ok_or_else(|| AppError::NotFound(format!("Session {}", session_id)))?;
            let file = session
                .files
                .iter()
                .find(|f| f.id == file_id)
                .ok_or_else(|| AppError::NotFound(format!("File {}", file_id)))?;
            if Self::replayed_result(file).is_some() {
                // Already assembled and queued; a replayed chunk is a no-op.
                return Ok(());
            }
            file.chunked
                .clone()
                .ok_or_else(|| AppError::InvalidInput("File is not chunked".to_string()))?
        };

        let checksum = self
            .chunker
            .accept_chunk(&mut info, index, data.clone(), declared_checksum)
            .await?;

        let event = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(&session_id)
                .ok_or_else(|| AppError::NotFound(format!("Session {}", session_id)))?;
            let user_id = session.user_id;
            let speed = session.statistics.throughput;
            let file = session
                .file_mut(file_id)
                .ok_or_else(|| AppError::NotFound(format!("File {}", file_id)))?;
            if let Some(existing) = &mut file.chunked {
                existing.mark_completed(index, Some(checksum));
            }
            file.status = FileUploadStatus::Uploading;
            file.record_bytes(data.len() as u64);
            let event = ProgressEvent::Upload {
                user_id,
                event: UploadProgressEvent {
                    session_id,
                    file_id,
                    status: file.status,
                    progress_percentage: file.progress_percentage(),
                    uploaded_bytes: file.uploaded_bytes,
                    total_bytes: file.declared_size,
                    speed,
                    timestamp: Utc::now(),
                },
            };
            session.refresh(Utc::now());
            event
        };
        self.notifier.publish(event);
        Ok(())
    }

    /// Chunk indices still outstanding, so a client can resume.
    pub async fn missing_chunks(
        &self,
        session_id: Uuid,
        file_id: Uuid,
    ) -> Result<Vec<u32>, AppError> {
        let sessions = self.sessions.read().await;
        let session = sessions
            .get(&session_id)
            .ok_or_else(|| AppError::NotFound(format!("Session {}", session_id)))?;
        let file = session
            .files
            .iter()
            .find(|f| f.id == file_id)
            .ok_or_else(|| AppError::NotFound(format!("File {}", file_id)))?;
        let info = file
            .chunked
            .as_ref()
            .ok_or_else(|| AppError::InvalidInput("File is not chunked".to_string()))?;
        Ok(self.chunker.missing_chunks(info))
    }

    /// Assembles a fully-chunked file and hands it to the pipeline.
    #[tracing::instrument(skip(self))]
    pub async fn complete_chunked_upload(
        &self,
        session_id: Uuid,
        file_id: Uuid,
    ) -> Result<FileResult, AppError> {
        let (info, declared_size) = {
            let sessions = self.sessions.read().await;
            let session = sessions
                .get(&session_id)
                .ok_or_else(|| AppError::NotFound(format!("Session {}", session_id)))?;
            let file = session
                .files
                .iter()
                .find(|f| f.id == file_id)
                .ok_or_else(|| AppError::NotFound(format!("File {}", file_id)))?;
            // A replayed completion must not re-assemble: the staged chunks
            // are already gone and the failure path would clobber the file.
            if let Some(result) = Self::replayed_result(file) {
                return Ok(result);
            }
            let info = file
                .chunked
                .clone()
                .ok_or_else(|| AppError::InvalidInput("File is not chunked".to_string()))?;
            (info, file.declared_size)
        };

        match self.chunker.assemble(&info, declared_size).await {
            Ok((path, checksum)) => {
                self.finish_local_transfer(session_id, file_id, path, declared_size, checksum)
                    .await
            }
            Err(err) => Ok(self
                .fail_file(session_id, file_id, err.client_message())
                .await),
        }
    }

    /// Batch entry point. Files are processed in fixed sub-batches with a
    /// short pause between them; every input yields exactly one result.
    #[tracing::instrument(skip(self, files, options), fields(files = files.len()))]
    pub async fn upload_batch(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        files: Vec<(String, String, Bytes)>,
        options: UploadOptions,
    ) -> Result<BatchResult, AppError> {
        let input_count = files.len();
        let declared: Vec<(String, String, u64)> = files
            .iter()
            .map(|(name, ct, data)| (name.clone(), ct.clone(), data.len() as u64))
            .collect();

        let session = self
            .initialize_session(tenant_id, user_id, declared, options)
            .await?;
        let file_ids: Vec<Uuid> = session.files.iter().map(|f| f.id).collect();

        let mut results = Vec::with_capacity(input_count);
        let inputs: Vec<(Uuid, Bytes)> = file_ids
            .iter()
            .copied()
            .zip(files.into_iter().map(|(_, _, data)| data))
            .collect();

        for sub_batch in inputs.chunks(self.config.sub_batch_size.max(1)) {
            let transfers = sub_batch
                .iter()
                .cloned()
                .map(|(file_id, data)| self.upload_file(session.id, file_id, user_id, data));
            results.extend(futures::future::join_all(transfers).await);
            if self.config.sub_batch_pause_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.sub_batch_pause_ms)).await;
            }
        }

        // N inputs must yield N results; a mismatch means files were lost
        // silently somewhere in the sub-batch machinery.
        if results.len() != input_count {
            tracing::error!(
                session_id = %session.id,
                expected = input_count,
                actual = results.len(),
                "Batch result count mismatch, invariant violated"
            );
        }

        let statistics = {
            let sessions = self.sessions.read().await;
            sessions
                .get(&session.id)
                .map(|s| s.statistics.clone())
                .unwrap_or_default()
        };

        Ok(BatchResult {
            session_id: session.id,
            results,
            statistics,
        })
    }

    /// Marks non-terminal files Cancelled and best-effort removes staged
    /// bytes. Returns false for an unknown session or foreign owner.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_session(&self, session_id: Uuid, user_id: Uuid) -> bool {
        let cancelled = {
            let mut sessions = self.sessions.write().await;
            match sessions.get_mut(&session_id) {
                Some(session) if session.user_id == user_id => {
                    for file in &mut session.files {
                        if !file.status.is_terminal() {
                            file.status = FileUploadStatus::Cancelled;
                        }
                    }
                    session.status = UploadSessionStatus::Cancelled;
                    session.refresh(Utc::now());
                    true
                }
                _ => false,
            }
        };

        if cancelled {
            if let Err(err) = self.storage.cleanup_session(session_id).await {
                tracing::warn!(session_id = %session_id, error = %err, "Failed to clean staged bytes");
            }
            if let Err(err) = self.cache.invalidate(&session_cache_key(session_id)).await {
                tracing::warn!(session_id = %session_id, error = %err, "Failed to invalidate session cache");
            }
            tracing::info!(session_id = %session_id, "Upload session cancelled");
        }
        cancelled
    }

    /// Explicit user-driven retry: resets every Failed file back to Pending
    /// with its retry counter bumped. Returns the number of files reset.
    #[tracing::instrument(skip(self))]
    pub async fn retry_failed_uploads(
        &self,
        session_id: Uuid,
        user_id: Uuid,
    ) -> Result<usize, AppError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&session_id)
            .filter(|s| s.user_id == user_id)
            .ok_or_else(|| AppError::NotFound(format!("Session {}", session_id)))?;

        let mut reset = 0;
        for file in &mut session.files {
            if file.reset_for_retry() {
                reset += 1;
            }
        }
        session.refresh(Utc::now());
        tracing::info!(session_id = %session_id, reset, "Failed uploads reset for retry");
        Ok(reset)
    }

    /// Completes the local half of an upload: synchronously persists the
    /// Processing document, invalidates list caches, emits progress, then
    /// hands the item to the pipeline.
    async fn finish_local_transfer(
        &self,
        session_id: Uuid,
        file_id: Uuid,
        path: String,
        size: u64,
        checksum: String,
    ) -> Result<FileResult, AppError> {
        let (tenant_id, user_id, collection_id, priority, name, content_type) = {
            let sessions = self.sessions.read().await;
            let session = sessions
                .get(&session_id)
                .ok_or_else(|| AppError::NotFound(format!("Session {}", session_id)))?;
            let file = session
                .files
                .iter()
                .find(|f| f.id == file_id)
                .ok_or_else(|| AppError::NotFound(format!("File {}", file_id)))?;
            (
                session.tenant_id,
                session.user_id,
                session.collection_id,
                session.options.priority,
                file.name.clone(),
                file.content_type.clone(),
            )
        };

        let now = Utc::now();
        let document = Document {
            id: Uuid::new_v4(),
            tenant_id,
            user_id,
            collection_id,
            name: name.clone(),
            size_bytes: size as i64,
            content_type: content_type.clone(),
            checksum: Some(checksum.clone()),
            status: DocumentStatus::Processing,
            external_id: None,
            progress: 5,
            processing_error: None,
            created_at: now,
            updated_at: now,
        };

        // The document row must be visible to readers before the async
        // hand-off, and stale list caches must be gone before anyone reacts
        // to the progress event.
        self.store.insert(&document).await?;
        let tags = document_mutation_tags(user_id, collection_id);
        self.cache
            .invalidate_by_tags(&tags, Some(tenant_id))
            .await?;
        self.cache
            .invalidate_pattern(&format!("{}:*", TAG_DOCUMENTS))
            .await?;

        let (upload_event, document_event) = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(&session_id)
                .ok_or_else(|| AppError::NotFound(format!("Session {}", session_id)))?;
            let speed = session.statistics.throughput;
            let file = session
                .file_mut(file_id)
                .ok_or_else(|| AppError::NotFound(format!("File {}", file_id)))?;
            file.status = FileUploadStatus::Processing;
            file.uploaded_bytes = file.declared_size;
            file.checksum = Some(checksum.clone());
            file.document_id = Some(document.id);
            // A whole transfer can finish a chunk-planned file; retire the
            // plan so resumption reports nothing outstanding.
            if let Some(info) = &mut file.chunked {
                info.mark_all_completed();
            }
            let upload_event = ProgressEvent::Upload {
                user_id,
                event: UploadProgressEvent {
                    session_id,
                    file_id,
                    status: file.status,
                    progress_percentage: 100,
                    uploaded_bytes: file.declared_size,
                    total_bytes: file.declared_size,
                    speed,
                    timestamp: Utc::now(),
                },
            };
            let document_event = ProgressEvent::Document {
                user_id,
                event: DocumentProgressEvent {
                    document_id: document.id,
                    collection_id,
                    action: DocumentAction::Created,
                    status: DocumentStatus::Processing,
                    progress: 5,
                    external_id: None,
                    current_step: Some("queued".to_string()),
                    error: None,
                    timestamp: Utc::now(),
                },
            };
            session.refresh(Utc::now());
            (upload_event, document_event)
        };
        self.notifier.publish(upload_event);
        self.notifier.publish(document_event);

        let item = IngestionQueueItem {
            id: Uuid::new_v4(),
            document_id: document.id,
            tenant_id,
            user_id,
            collection_id,
            file_path: path,
            file_name: name.clone(),
            file_size: size as i64,
            content_type,
            checksum: Some(checksum),
            priority,
            status: QueueItemStatus::Queued,
            retry_count: 0,
            // The pipeline substitutes its configured ceiling at enqueue.
            max_retries: 0,
            next_retry_at: None,
            external_id: None,
            task_id: None,
            error_category: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        self.sink.enqueue(item).await?;

        if let Some(session) = self.get_session(session_id).await {
            self.cache_session(&session).await;
        }

        tracing::info!(
            session_id = %session_id,
            file_id = %file_id,
            document_id = %document.id,
            "File staged and queued for ingestion"
        );

        Ok(FileResult {
            file_id,
            name,
            success: true,
            document_id: Some(document.id),
            error: None,
        })
    }

    /// Records a file failure in the session and emits the failure event.
    async fn fail_file(&self, session_id: Uuid, file_id: Uuid, message: String) -> FileResult {
        let mut name = String::new();
        let event = {
            let mut sessions = self.sessions.write().await;
            sessions.get_mut(&session_id).and_then(|session| {
                let user_id = session.user_id;
                let file = session.file_mut(file_id)?;
                file.status = FileUploadStatus::Failed;
                file.error = Some(message.clone());
                name = file.name.clone();
                let event = ProgressEvent::Upload {
                    user_id,
                    event: UploadProgressEvent {
                        session_id,
                        file_id,
                        status: FileUploadStatus::Failed,
                        progress_percentage: file.progress_percentage(),
                        uploaded_bytes: file.uploaded_bytes,
                        total_bytes: file.declared_size,
                        speed: 0.0,
                        timestamp: Utc::now(),
                    },
                };
                session.refresh(Utc::now());
                Some(event)
            })
        };
        if let Some(event) = event {
            self.notifier.publish(event);
        }

        FileResult {
            file_id,
            name,
            success: false,
            document_id: None,
            error: Some(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use docstream_cache::{CacheTier, MemoryTier};
    use docstream_storage::LocalStaging;

    struct MockStore {
        documents: Mutex<Vec<Document>>,
    }

    #[async_trait]
    impl DocumentStore for MockStore {
        async fn insert(&self, document: &Document) -> Result<(), AppError> {
            self.documents.lock().await.push(document.clone());
            Ok(())
        }

        async fn get(&self, _tenant_id: Uuid, id: Uuid) -> Result<Option<Document>, AppError> {
            Ok(self
                .documents
                .lock()
                .await
                .iter()
                .find(|d| d.id == id)
                .cloned())
        }

        async fn update_status(
            &self,
            _tenant_id: Uuid,
            id: Uuid,
            status: DocumentStatus,
            progress: i32,
            external_id: Option<&str>,
        ) -> Result<(), AppError> {
            let mut documents = self.documents.lock().await;
            if let Some(doc) = documents.iter_mut().find(|d| d.id == id) {
                doc.status = status;
                doc.progress = progress;
                if let Some(external_id) = external_id {
                    doc.external_id = Some(external_id.to_string());
                }
            }
            Ok(())
        }

        async fn mark_error(
            &self,
            _tenant_id: Uuid,
            id: Uuid,
            error: &str,
        ) -> Result<(), AppError> {
            let mut documents = self.documents.lock().await;
            if let Some(doc) = documents.iter_mut().find(|d| d.id == id) {
                doc.status = DocumentStatus::Error;
                doc.processing_error = Some(error.to_string());
            }
            Ok(())
        }

        async fn recovery_scan(&self) -> Result<Vec<Document>, AppError> {
            Ok(vec![])
        }

        async fn demote_to_processing(&self, _tenant_id: Uuid, _id: Uuid) -> Result<(), AppError> {
            Ok(())
        }
    }

    struct MockSink {
        items: Mutex<Vec<IngestionQueueItem>>,
    }

    #[async_trait]
    impl IngestionSink for MockSink {
        async fn enqueue(&self, item: IngestionQueueItem) -> Result<(), AppError> {
            self.items.lock().await.push(item);
            Ok(())
        }
    }

    struct Harness {
        orchestrator: UploadOrchestrator,
        store: Arc<MockStore>,
        sink: Arc<MockSink>,
        _dir: tempfile::TempDir,
    }

    async fn harness(config: UploadConfig) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(LocalStaging::new(dir.path()).await.unwrap());
        let cache = Arc::new(MultiTierCache::new(
            Arc::new(MemoryTier::new(100)) as Arc<dyn CacheTier>,
            None,
            None,
        ));
        let store = Arc::new(MockStore {
            documents: Mutex::new(Vec::new()),
        });
        let sink = Arc::new(MockSink {
            items: Mutex::new(Vec::new()),
        });
        let (notifier, _handle) = ProgressNotifier::new(256);
        let orchestrator = UploadOrchestrator::new(
            config,
            storage,
            cache,
            store.clone(),
            sink.clone(),
            notifier,
        );
        Harness {
            orchestrator,
            store,
            sink,
            _dir: dir,
        }
    }

    fn small_config() -> UploadConfig {
        UploadConfig {
            max_file_size_bytes: 1024,
            max_total_upload_size_bytes: 4096,
            chunking_threshold_bytes: 256,
            default_chunk_size_bytes: 64,
            min_chunk_size_bytes: 16,
            max_chunk_size_bytes: 512,
            sub_batch_pause_ms: 0,
            ..Default::default()
        }
    }

    fn pdf(name: &str, data: &[u8]) -> (String, String, Bytes) {
        (
            name.to_string(),
            "application/pdf".to_string(),
            Bytes::from(data.to_vec()),
        )
    }

    #[tokio::test]
    async fn batch_yields_exactly_one_result_per_input() {
        let h = harness(small_config()).await;
        let files = vec![
            pdf("ok.pdf", &[1u8; 100]),
            pdf("too-big.pdf", &[2u8; 2000]),
            pdf("fine.pdf", &[3u8; 50]),
        ];

        let result = h
            .orchestrator
            .upload_batch(Uuid::new_v4(), Uuid::new_v4(), files, UploadOptions::default())
            .await
            .unwrap();

        assert_eq!(result.results.len(), 3);
        let successes = result.results.iter().filter(|r| r.success).count();
        assert_eq!(successes, 2);
        let failure = result.results.iter().find(|r| !r.success).unwrap();
        assert_eq!(failure.name, "too-big.pdf");
        assert!(failure.error.is_some());

        // Only successful files reach the pipeline and the store.
        assert_eq!(h.sink.items.lock().await.len(), 2);
        assert_eq!(h.store.documents.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn documents_are_persisted_processing_before_enqueue() {
        let h = harness(small_config()).await;
        let result = h
            .orchestrator
            .upload_batch(
                Uuid::new_v4(),
                Uuid::new_v4(),
                vec![pdf("a.pdf", &[1u8; 100])],
                UploadOptions::default(),
            )
            .await
            .unwrap();

        let document_id = result.results[0].document_id.unwrap();
        let documents = h.store.documents.lock().await;
        let doc = documents.iter().find(|d| d.id == document_id).unwrap();
        assert_eq!(doc.status, DocumentStatus::Processing);
        assert!(doc.external_id.is_none());

        let items = h.sink.items.lock().await;
        assert_eq!(items[0].document_id, document_id);
        assert_eq!(items[0].status, QueueItemStatus::Queued);
        assert_eq!(items[0].checksum, doc.checksum);
    }

    #[tokio::test]
    async fn aggregate_ceiling_rejects_before_any_bytes() {
        let h = harness(small_config()).await;
        let err = h
            .orchestrator
            .initialize_session(
                Uuid::new_v4(),
                Uuid::new_v4(),
                vec![
                    ("a.pdf".to_string(), "application/pdf".to_string(), 3000),
                    ("b.pdf".to_string(), "application/pdf".to_string(), 3000),
                ],
                UploadOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PayloadTooLarge(_)));
        assert!(h.sink.items.lock().await.is_empty());
    }

    #[tokio::test]
    async fn chunked_file_resumes_and_completes() {
        let h = harness(small_config()).await;
        let tenant_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        // 300 bytes, above the 256-byte threshold, 64-byte chunks -> 5.
        let original: Vec<u8> = (0..=255u8).chain(0..44u8).collect();

        let session = h
            .orchestrator
            .initialize_session(
                tenant_id,
                user_id,
                vec![(
                    "big.pdf".to_string(),
                    "application/pdf".to_string(),
                    original.len() as u64,
                )],
                UploadOptions::default(),
            )
            .await
            .unwrap();
        let file = &session.files[0];
        let info = file.chunked.as_ref().unwrap();
        assert_eq!(info.total_chunks as usize, original.len().div_ceil(64));

        // Upload all but chunk 2, in scrambled order.
        let plan = info.chunks.clone();
        for index in [4u32, 0, 3, 1] {
            let chunk = &plan[index as usize];
            let slice =
                original[chunk.offset as usize..(chunk.offset + chunk.size) as usize].to_vec();
            h.orchestrator
                .upload_chunk(session.id, file.id, index, Bytes::from(slice), None)
                .await
                .unwrap();
        }

        let missing = h
            .orchestrator
            .missing_chunks(session.id, file.id)
            .await
            .unwrap();
        assert_eq!(missing, vec![2]);

        let chunk = &plan[2];
        let slice = original[chunk.offset as usize..(chunk.offset + chunk.size) as usize].to_vec();
        h.orchestrator
            .upload_chunk(session.id, file.id, 2, Bytes::from(slice), None)
            .await
            .unwrap();

        let result = h
            .orchestrator
            .complete_chunked_upload(session.id, file.id)
            .await
            .unwrap();
        assert!(result.success);

        let items = h.sink.items.lock().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].file_size as usize, original.len());
        assert_eq!(
            items[0].checksum.as_deref(),
            Some(sha256_checksum(&original).as_str())
        );
    }

    #[tokio::test]
    async fn retried_whole_upload_replays_the_original_result() {
        let h = harness(small_config()).await;
        let user_id = Uuid::new_v4();
        let data = Bytes::from(vec![7u8; 100]);
        let result = h
            .orchestrator
            .upload_batch(
                Uuid::new_v4(),
                user_id,
                vec![("a.pdf".to_string(), "application/pdf".to_string(), data.clone())],
                UploadOptions::default(),
            )
            .await
            .unwrap();
        let first = &result.results[0];
        assert!(first.success);

        // Client never saw the response and retries the same transfer.
        let second = h
            .orchestrator
            .upload_file(result.session_id, first.file_id, user_id, data)
            .await;
        assert!(second.success);
        assert_eq!(second.document_id, first.document_id);

        // No second document, no second pipeline item.
        assert_eq!(h.store.documents.lock().await.len(), 1);
        assert_eq!(h.sink.items.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn retried_completion_does_not_disturb_a_finished_file() {
        let h = harness(small_config()).await;
        let user_id = Uuid::new_v4();
        let original: Vec<u8> = (0..=255u8).chain(0..44u8).collect();

        let session = h
            .orchestrator
            .initialize_session(
                Uuid::new_v4(),
                user_id,
                vec![(
                    "big.pdf".to_string(),
                    "application/pdf".to_string(),
                    original.len() as u64,
                )],
                UploadOptions::default(),
            )
            .await
            .unwrap();
        let file_id = session.files[0].id;
        let plan = session.files[0].chunked.as_ref().unwrap().chunks.clone();
        for chunk in &plan {
            let slice =
                original[chunk.offset as usize..(chunk.offset + chunk.size) as usize].to_vec();
            h.orchestrator
                .upload_chunk(session.id, file_id, chunk.index, Bytes::from(slice), None)
                .await
                .unwrap();
        }

        let first = h
            .orchestrator
            .complete_chunked_upload(session.id, file_id)
            .await
            .unwrap();
        assert!(first.success);

        // Assembly already removed the staged chunks; the retry must not
        // re-assemble and must not flip the file to Failed.
        let second = h
            .orchestrator
            .complete_chunked_upload(session.id, file_id)
            .await
            .unwrap();
        assert!(second.success);
        assert_eq!(second.document_id, first.document_id);

        let session = h.orchestrator.get_session(session.id).await.unwrap();
        assert_eq!(session.files[0].status, FileUploadStatus::Processing);
        assert_eq!(h.store.documents.lock().await.len(), 1);
        assert_eq!(h.sink.items.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn whole_transfer_retires_stale_chunk_plan() {
        let h = harness(small_config()).await;
        // 300 bytes is above the chunking threshold, so the session plans
        // chunks, but the batch path still transfers the file whole.
        let result = h
            .orchestrator
            .upload_batch(
                Uuid::new_v4(),
                Uuid::new_v4(),
                vec![pdf("big.pdf", &[9u8; 300])],
                UploadOptions::default(),
            )
            .await
            .unwrap();
        assert!(result.results[0].success);

        let session = h.orchestrator.get_session(result.session_id).await.unwrap();
        let file = &session.files[0];
        assert_eq!(file.status, FileUploadStatus::Processing);
        assert!(file.chunked.as_ref().unwrap().all_completed());

        let missing = h
            .orchestrator
            .missing_chunks(result.session_id, file.id)
            .await
            .unwrap();
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn accepted_chunks_record_their_checksums() {
        let h = harness(small_config()).await;
        let original = vec![5u8; 300];
        let session = h
            .orchestrator
            .initialize_session(
                Uuid::new_v4(),
                Uuid::new_v4(),
                vec![(
                    "big.pdf".to_string(),
                    "application/pdf".to_string(),
                    original.len() as u64,
                )],
                UploadOptions::default(),
            )
            .await
            .unwrap();
        let file_id = session.files[0].id;
        let chunk = session.files[0].chunked.as_ref().unwrap().chunks[0].clone();
        let slice = original[..chunk.size as usize].to_vec();

        h.orchestrator
            .upload_chunk(session.id, file_id, 0, Bytes::from(slice.clone()), None)
            .await
            .unwrap();

        let session = h.orchestrator.get_session(session.id).await.unwrap();
        let recorded = &session.files[0].chunked.as_ref().unwrap().chunks[0];
        assert_eq!(recorded.checksum.as_deref(), Some(sha256_checksum(&slice).as_str()));
    }

    #[tokio::test]
    async fn cancel_marks_files_and_is_owner_scoped() {
        let h = harness(small_config()).await;
        let user_id = Uuid::new_v4();
        let session = h
            .orchestrator
            .initialize_session(
                Uuid::new_v4(),
                user_id,
                vec![("a.pdf".to_string(), "application/pdf".to_string(), 100)],
                UploadOptions::default(),
            )
            .await
            .unwrap();

        // Foreign user cannot cancel.
        assert!(!h.orchestrator.cancel_session(session.id, Uuid::new_v4()).await);
        assert!(h.orchestrator.cancel_session(session.id, user_id).await);

        let session = h.orchestrator.get_session(session.id).await.unwrap();
        assert_eq!(session.status, UploadSessionStatus::Cancelled);
        assert!(session
            .files
            .iter()
            .all(|f| f.status == FileUploadStatus::Cancelled));
    }

    #[tokio::test]
    async fn retry_failed_uploads_resets_failed_files() {
        let h = harness(small_config()).await;
        let user_id = Uuid::new_v4();
        let files = vec![pdf("bad.pdf", &[1u8; 2000])];
        let result = h
            .orchestrator
            .upload_batch(Uuid::new_v4(), user_id, files, UploadOptions::default())
            .await
            .unwrap();
        assert!(!result.results[0].success);

        let reset = h
            .orchestrator
            .retry_failed_uploads(result.session_id, user_id)
            .await
            .unwrap();
        assert_eq!(reset, 1);

        let session = h.orchestrator.get_session(result.session_id).await.unwrap();
        assert_eq!(session.files[0].status, FileUploadStatus::Pending);
        assert_eq!(session.files[0].retry_count, 1);
    }
}
