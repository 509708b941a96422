use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, OnceCell, Semaphore};
use uuid::Uuid;

use docstream_cache::tags::{document_mutation_tags, TAG_DOCUMENTS};
use docstream_cache::{CacheOptions, MultiTierCache};
use docstream_core::events::{DocumentAction, DocumentProgressEvent, ProgressEvent};
use docstream_core::models::{
    placeholder_external_id, DocumentStatus, IngestionQueueItem, QueueItemStatus,
};
use docstream_core::sink::IngestionSink;
use docstream_core::{AppError, PipelineConfig, ProgressNotifier};
use docstream_db::DocumentStore;
use docstream_index::types::SubmitRequest;
use docstream_index::IngestionEngine;
use docstream_infra::RateLimiter;
use docstream_storage::StagingStorage;

use crate::breaker::{BreakerState, CircuitBreaker};
use crate::queue::{IngestionQueue, QueueCounts};
use crate::retry::retry_delay;

/// Rate limiter operation name for engine submissions.
const SUBMIT_OP: &str = "engine_submit";

fn item_cache_key(id: Uuid) -> String {
    format!("queue:item:{}", id)
}

/// Secondary key by document id, so startup recovery can find the blob
/// starting from a recovered document row.
fn doc_cache_key(document_id: Uuid) -> String {
    format!("queue:doc:{}", document_id)
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PipelineStatistics {
    pub counts: QueueCounts,
    pub circuit_state: String,
    pub consecutive_failures: u32,
    pub available_permits: usize,
}

/// Drives queued ingestion items through the external engine: bounded worker
/// pool over a priority queue, circuit breaker and rate limiter in front of
/// submissions, retry/backoff on failure, and reconciliation before anything
/// is marked Completed.
pub struct ProcessingPipeline {
    pub(crate) queue: IngestionQueue,
    pub(crate) engine: Arc<dyn IngestionEngine>,
    pub(crate) config: PipelineConfig,
    store: Arc<dyn DocumentStore>,
    storage: Arc<dyn StagingStorage>,
    cache: Arc<MultiTierCache>,
    notifier: ProgressNotifier,
    breaker: CircuitBreaker,
    rate_limiter: RateLimiter,
    workers: Arc<Semaphore>,
    recovery: OnceCell<usize>,
}

impl ProcessingPipeline {
    pub fn new(
        config: PipelineConfig,
        engine: Arc<dyn IngestionEngine>,
        store: Arc<dyn DocumentStore>,
        storage: Arc<dyn StagingStorage>,
        cache: Arc<MultiTierCache>,
        notifier: ProgressNotifier,
    ) -> Self {
        Self {
            queue: IngestionQueue::new(),
            engine,
            store,
            storage,
            cache,
            notifier,
            breaker: CircuitBreaker::new(
                config.circuit_breaker_threshold,
                Duration::from_secs(config.circuit_breaker_cooldown_secs),
            ),
            rate_limiter: RateLimiter::new(config.submission_rate_per_sec),
            workers: Arc::new(Semaphore::new(config.max_concurrent_processing)),
            recovery: OnceCell::new(),
            config,
        }
    }

    fn item_cache_options(&self, tenant_id: Uuid) -> CacheOptions {
        CacheOptions::durable(Duration::from_secs(300), Duration::from_secs(24 * 3600))
            .with_tags(vec!["queue-items".to_string()])
            .with_tenant(tenant_id)
    }

    async fn cache_item(&self, item: &IngestionQueueItem) {
        let options = self.item_cache_options(item.tenant_id);
        for key in [item_cache_key(item.id), doc_cache_key(item.document_id)] {
            if let Err(err) = self.cache.set(&key, item, &options).await {
                tracing::warn!(item_id = %item.id, error = %err, "Failed to cache queue item");
            }
        }
    }

    /// Accepts a new item into the queue. `max_retries` of zero takes the
    /// pipeline's configured ceiling.
    #[tracing::instrument(skip(self, item), fields(item_id = %item.id, document_id = %item.document_id))]
    pub async fn enqueue(&self, mut item: IngestionQueueItem) -> Result<(), AppError> {
        if item.max_retries <= 0 {
            item.max_retries = self.config.max_retries;
        }
        item.status = QueueItemStatus::Queued;
        self.cache_item(&item).await;
        tracing::info!(
            priority = item.priority.as_i32(),
            file_name = %item.file_name,
            "Ingestion item queued"
        );
        self.queue.insert(item).await;
        Ok(())
    }

    pub async fn get_queue(&self, owner: Option<Uuid>) -> Vec<IngestionQueueItem> {
        self.queue.snapshot(owner).await
    }

    pub async fn get_item(&self, id: Uuid) -> Option<IngestionQueueItem> {
        self.queue.get(id).await
    }

    /// User-driven retry of a Failed item: counters reset, back to Queued.
    #[tracing::instrument(skip(self))]
    pub async fn retry(&self, id: Uuid) -> Result<(), AppError> {
        let mut item = self
            .queue
            .get(id)
            .await
            .ok_or_else(|| AppError::NotFound(format!("Queue item {}", id)))?;
        if item.status != QueueItemStatus::Failed {
            return Err(AppError::InvalidInput(format!(
                "Only failed items can be retried, item is {}",
                item.status
            )));
        }

        item.status = QueueItemStatus::Queued;
        item.retry_count = 0;
        item.next_retry_at = None;
        item.error_category = None;
        item.last_error = None;
        item.updated_at = Utc::now();

        self.persist_projection(&item, DocumentAction::StatusChanged, None)
            .await;
        self.queue.update(item).await;
        Ok(())
    }

    /// Cancels a Queued or Processing item.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, id: Uuid) -> Result<(), AppError> {
        let mut item = self
            .queue
            .get(id)
            .await
            .ok_or_else(|| AppError::NotFound(format!("Queue item {}", id)))?;
        if !item.status.can_transition_to(QueueItemStatus::Cancelled) {
            return Err(AppError::InvalidInput(format!(
                "Cannot cancel item in status {}",
                item.status
            )));
        }

        item.status = QueueItemStatus::Cancelled;
        item.updated_at = Utc::now();
        self.queue.update(item.clone()).await;
        self.persist_projection(
            &item,
            DocumentAction::Cancelled,
            Some("Cancelled by user".to_string()),
        )
        .await;
        tracing::info!(item_id = %id, "Ingestion item cancelled");
        Ok(())
    }

    pub async fn statistics(&self) -> PipelineStatistics {
        PipelineStatistics {
            counts: self.queue.counts().await,
            circuit_state: self.breaker.state().as_str().to_string(),
            consecutive_failures: self.breaker.consecutive_failures(),
            available_permits: self.workers.available_permits(),
        }
    }

    /// One-shot startup recovery from the document system-of-record. The
    /// scan returns Processing documents and Ready documents whose external
    /// id was never confirmed; the latter are demoted back to Processing.
    /// Items whose durable queue blob survives are re-queued for submission;
    /// the rest are left to the reconciler, which can still find them in the
    /// engine by metadata.
    pub async fn recover_from_store(&self) -> Result<usize, AppError> {
        self.recovery
            .get_or_try_init(|| async {
                let documents = self.store.recovery_scan().await?;
                let now = Utc::now();
                let mut requeued = 0;

                for document in documents {
                    if document.status == DocumentStatus::Ready {
                        self.store
                            .demote_to_processing(document.tenant_id, document.id)
                            .await?;
                        tracing::warn!(
                            document_id = %document.id,
                            "Demoted Ready document with unconfirmed external id"
                        );
                    }

                    let options = self.item_cache_options(document.tenant_id);
                    let blob: Option<IngestionQueueItem> = self
                        .cache
                        .get(&doc_cache_key(document.id), &options)
                        .await?;

                    match blob {
                        Some(mut item) => {
                            item.status = QueueItemStatus::Queued;
                            item.next_retry_at = None;
                            item.updated_at = now;
                            self.queue.insert(item).await;
                            requeued += 1;
                        }
                        None => {
                            // No staged bytes to resubmit; a reconcile-only
                            // item lets the listing search find the document
                            // in the engine, and the stuck ceiling fails it
                            // otherwise.
                            let item = IngestionQueueItem {
                                id: Uuid::new_v4(),
                                document_id: document.id,
                                tenant_id: document.tenant_id,
                                user_id: document.user_id,
                                collection_id: document.collection_id,
                                file_path: String::new(),
                                file_name: document.name.clone(),
                                file_size: document.size_bytes,
                                content_type: document.content_type.clone(),
                                checksum: document.checksum.clone(),
                                priority: Default::default(),
                                status: QueueItemStatus::Processing,
                                retry_count: 0,
                                max_retries: self.config.max_retries,
                                next_retry_at: None,
                                external_id: document
                                    .external_id
                                    .clone()
                                    .or_else(|| Some(placeholder_external_id())),
                                task_id: None,
                                error_category: None,
                                last_error: None,
                                created_at: now,
                                updated_at: now,
                            };
                            tracing::info!(
                                document_id = %document.id,
                                "Queue blob lost, recovering via reconciliation only"
                            );
                            self.queue.update(item).await;
                        }
                    }
                }

                tracing::info!(requeued, "Startup recovery complete");
                Ok(requeued)
            })
            .await
            .copied()
    }

    /// Drain loop: claims and dispatches due items, ticking the reconciler
    /// on its own interval. Polls faster while the queue has work.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: mpsc::Receiver<()>) {
        tracing::info!(
            max_workers = self.config.max_concurrent_processing,
            poll_interval_ms = self.config.poll_interval_ms,
            reconcile_interval_secs = self.config.reconcile_interval_secs,
            "Processing pipeline started"
        );

        let mut reconcile =
            tokio::time::interval(Duration::from_secs(self.config.reconcile_interval_secs.max(1)));
        reconcile.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut busy = false;

        loop {
            let poll = Duration::from_millis(if busy {
                self.config.poll_interval_ms
            } else {
                self.config.idle_poll_interval_ms
            });

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Processing pipeline shutting down");
                    break;
                }
                _ = reconcile.tick() => {
                    if let Err(err) = self.reconcile_pass().await {
                        tracing::error!(error = %err, "Reconciliation pass failed");
                    }
                }
                _ = tokio::time::sleep(poll) => {
                    busy = self.clone().dispatch_once().await;
                }
            }
        }

        tracing::info!("Processing pipeline stopped");
    }

    /// One scheduling step: breaker and rate-limiter checks, then claim and
    /// dispatch the next due item. Returns whether an item was dispatched.
    pub async fn dispatch_once(self: Arc<Self>) -> bool {
        let now = Utc::now();
        if !self.queue.has_due(now).await {
            return false;
        }

        if self.breaker.state() == BreakerState::Open {
            let until = now + chrono::Duration::seconds(self.breaker.cooldown().as_secs() as i64);
            if let Some(id) = self.queue.defer_next(now, until).await {
                tracing::warn!(item_id = %id, "Circuit breaker open, submission deferred");
            }
            return false;
        }

        let permit = match self.workers.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => return false,
        };

        if !self.rate_limiter.try_acquire(SUBMIT_OP).await {
            drop(permit);
            let until = now + chrono::Duration::seconds(self.config.rate_limit_delay_secs as i64);
            if let Some(id) = self.queue.defer_next(now, until).await {
                tracing::debug!(item_id = %id, "No submission token, item deferred");
            }
            return false;
        }

        match self.queue.claim_next(now).await {
            Some(item) => {
                let pipeline = self.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    pipeline.process_item(item).await;
                });
                true
            }
            None => {
                drop(permit);
                false
            }
        }
    }

    /// Submits one claimed item to the engine. Every outcome lands in
    /// Processing-pending-verification; only the reconciler completes items.
    #[tracing::instrument(skip(self, item), fields(item_id = %item.id, document_id = %item.document_id))]
    pub(crate) async fn process_item(&self, mut item: IngestionQueueItem) {
        self.persist_projection(&item, DocumentAction::StatusChanged, None)
            .await;

        let data = match self.storage.read_path(&item.file_path).await {
            Ok(data) => data,
            Err(err) => {
                self.fail_or_retry(item, AppError::Storage(err.to_string()))
                    .await;
                return;
            }
        };

        let request = SubmitRequest {
            document_id: item.document_id,
            tenant_id: item.tenant_id,
            user_id: item.user_id,
            collection_id: item.collection_id,
            file_name: item.file_name.clone(),
            content_type: item.content_type.clone(),
            checksum: item.checksum.clone(),
            data,
        };

        match self.engine.submit_document(request).await {
            Ok(response) => {
                self.breaker.record_success();
                item.task_id = response.task_id.clone();
                // A synchronous id is still only provisional: Ready waits
                // for reconciliation either way.
                item.external_id = Some(
                    response
                        .id
                        .clone()
                        .unwrap_or_else(placeholder_external_id),
                );
                item.updated_at = Utc::now();
                self.queue.update(item.clone()).await;
                self.persist_projection(&item, DocumentAction::StatusChanged, None)
                    .await;
                tracing::info!(
                    external_id = ?item.external_id,
                    task_id = ?item.task_id,
                    "Document submitted, awaiting reconciliation"
                );
            }
            Err(err) => {
                self.breaker.record_failure();
                self.fail_or_retry(item, err).await;
            }
        }
    }

    /// Routes a failed item: retryable categories under the retry ceiling
    /// are scheduled with backoff; everything else is terminal.
    pub(crate) async fn fail_or_retry(&self, mut item: IngestionQueueItem, err: AppError) {
        let category = err.category();
        let message = err.to_string();
        item.error_category = Some(category);
        item.last_error = Some(message.clone());

        if category.is_retryable() && item.can_retry() {
            item.retry_count += 1;
            item.status = QueueItemStatus::Retrying;
            let delay = retry_delay(category, item.retry_count, self.config.base_retry_delay_secs);
            item.next_retry_at = Some(Utc::now() + chrono::Duration::milliseconds(delay.as_millis() as i64));
            item.updated_at = Utc::now();

            self.persist_projection(&item, DocumentAction::StatusChanged, Some(message.clone()))
                .await;
            tracing::warn!(
                item_id = %item.id,
                category = %category,
                retry_count = item.retry_count,
                delay_secs = delay.as_secs(),
                error = %message,
                "Submission failed, retry scheduled"
            );

            item.status = QueueItemStatus::Queued;
            self.queue.update(item).await;
        } else {
            item.status = QueueItemStatus::Failed;
            item.updated_at = Utc::now();
            self.queue.update(item.clone()).await;
            self.persist_projection(&item, DocumentAction::Failed, Some(message.clone()))
                .await;
            tracing::error!(
                item_id = %item.id,
                category = %category,
                retry_count = item.retry_count,
                error = %message,
                "Ingestion failed terminally"
            );
        }
    }

    /// Persists the document projection, then invalidates cache tags, then
    /// emits the progress event. The order is load-bearing: readers must
    /// never observe a progress event before its row and caches agree.
    pub(crate) async fn persist_projection(
        &self,
        item: &IngestionQueueItem,
        action: DocumentAction,
        error: Option<String>,
    ) {
        let status = match item.status {
            QueueItemStatus::Completed => DocumentStatus::Ready,
            QueueItemStatus::Failed | QueueItemStatus::Cancelled => DocumentStatus::Error,
            _ => DocumentStatus::Processing,
        };

        let persisted = match status {
            DocumentStatus::Error => {
                self.store
                    .mark_error(
                        item.tenant_id,
                        item.document_id,
                        error.as_deref().unwrap_or("Ingestion failed"),
                    )
                    .await
            }
            _ => {
                self.store
                    .update_status(
                        item.tenant_id,
                        item.document_id,
                        status,
                        item.progress(),
                        item.external_id.as_deref(),
                    )
                    .await
            }
        };
        if let Err(err) = persisted {
            tracing::error!(
                item_id = %item.id,
                document_id = %item.document_id,
                error = %err,
                "Failed to persist document projection, skipping invalidation and event"
            );
            return;
        }

        self.cache_item(item).await;
        let tags = document_mutation_tags(item.user_id, item.collection_id);
        if let Err(err) = self
            .cache
            .invalidate_by_tags(&tags, Some(item.tenant_id))
            .await
        {
            tracing::warn!(item_id = %item.id, error = %err, "Tag invalidation failed");
        }
        if let Err(err) = self
            .cache
            .invalidate_pattern(&format!("{}:*", TAG_DOCUMENTS))
            .await
        {
            tracing::warn!(item_id = %item.id, error = %err, "Pattern invalidation failed");
        }

        self.notifier.publish(ProgressEvent::Document {
            user_id: item.user_id,
            event: DocumentProgressEvent {
                document_id: item.document_id,
                collection_id: item.collection_id,
                action,
                status,
                progress: item.progress(),
                external_id: item.external_id.clone(),
                current_step: Some(item.status.to_string()),
                error,
                timestamp: Utc::now(),
            },
        });
    }
}

#[async_trait]
impl IngestionSink for ProcessingPipeline {
    async fn enqueue(&self, item: IngestionQueueItem) -> Result<(), AppError> {
        ProcessingPipeline::enqueue(self, item).await
    }
}
