//! Reconciliation of Processing items against the engine.
//!
//! The engine's submission response is never trusted as completion: items sit
//! in Processing until a reconcile pass confirms the document server-side.
//! Three probes are tried in order of cheapness: the async task status when a
//! task id is known, a direct document fetch when the external id is already
//! confirmed, and a bounded listing search matching the original document id
//! embedded in the submission metadata.

use chrono::{DateTime, Utc};

use docstream_core::events::DocumentAction;
use docstream_core::models::{is_confirmed_external_id, IngestionQueueItem, QueueItemStatus};
use docstream_core::{AppError, ErrorCategory};
use docstream_index::types::EngineDocument;

use crate::pipeline::ProcessingPipeline;

fn engine_ingestion_failed(document: &EngineDocument) -> bool {
    matches!(
        document.ingestion_status.as_deref(),
        Some("failed" | "error" | "failure")
    )
}

/// An absent ingestion status counts as success; older engine versions omit
/// the field once a document is fully indexed.
fn engine_ingestion_succeeded(document: &EngineDocument) -> bool {
    matches!(
        document.ingestion_status.as_deref(),
        None | Some("success" | "completed" | "succeeded" | "enriched")
    )
}

impl ProcessingPipeline {
    /// One reconciliation sweep over every Processing item. Probe errors are
    /// logged and retried on the next pass; the stuck ceiling guarantees no
    /// item loops here forever.
    pub async fn reconcile_pass(&self) -> Result<(), AppError> {
        let now = Utc::now();
        let items = self.queue.in_status(QueueItemStatus::Processing).await;
        if items.is_empty() {
            return Ok(());
        }

        tracing::debug!(count = items.len(), "Reconciling in-flight items");
        for item in items {
            let item_id = item.id;
            if let Err(err) = self.reconcile_item(item, now).await {
                tracing::warn!(
                    item_id = %item_id,
                    error = %err,
                    "Reconciliation probe failed, will retry next pass"
                );
            }
        }
        Ok(())
    }

    async fn reconcile_item(
        &self,
        item: IngestionQueueItem,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let stuck_after = chrono::Duration::seconds(self.config.processing_timeout_secs as i64);
        if now - item.updated_at > stuck_after {
            let message = format!(
                "Processing exceeded {}s without engine confirmation",
                self.config.processing_timeout_secs
            );
            self.fail_or_retry(
                item,
                AppError::Engine {
                    category: ErrorCategory::Timeout,
                    message,
                },
            )
            .await;
            return Ok(());
        }

        if let Some(task_id) = item.task_id.clone() {
            return self.reconcile_by_task(item, &task_id, now).await;
        }

        if let Some(external_id) = item
            .external_id
            .clone()
            .filter(|id| is_confirmed_external_id(Some(id)))
        {
            return self.reconcile_by_document(item, &external_id).await;
        }

        self.reconcile_by_listing(item, now).await
    }

    async fn reconcile_by_task(
        &self,
        mut item: IngestionQueueItem,
        task_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let status = self.engine.task_status(task_id).await?;

        if status.is_failed() {
            let message = status
                .current_step
                .map(|step| format!("Engine task failed at step {}", step))
                .unwrap_or_else(|| "Engine task failed".to_string());
            self.fail_or_retry(
                item,
                AppError::Engine {
                    category: ErrorCategory::Permanent,
                    message,
                },
            )
            .await;
            return Ok(());
        }

        if status.is_completed() {
            if let Some(document_id) = status.document_id {
                item.external_id = Some(document_id);
            }
            if is_confirmed_external_id(item.external_id.as_deref()) {
                self.complete_item(item).await;
                return Ok(());
            }
            // Task done but no id reported; the listing search can still
            // confirm the document this pass.
            return self.reconcile_by_listing(item, now).await;
        }

        // In flight. A reported document id still confirms identity early.
        if let Some(document_id) = status.document_id {
            if !is_confirmed_external_id(item.external_id.as_deref()) {
                item.external_id = Some(document_id);
                item.updated_at = now;
                self.queue.update(item.clone()).await;
                self.persist_projection(&item, DocumentAction::StatusChanged, None)
                    .await;
                tracing::info!(
                    item_id = %item.id,
                    external_id = ?item.external_id,
                    "External id confirmed ahead of task completion"
                );
            }
        }
        Ok(())
    }

    async fn reconcile_by_document(
        &self,
        item: IngestionQueueItem,
        external_id: &str,
    ) -> Result<(), AppError> {
        match self.engine.get_document(external_id).await? {
            Some(document) if engine_ingestion_failed(&document) => {
                self.fail_or_retry(
                    item,
                    AppError::Engine {
                        category: ErrorCategory::Permanent,
                        message: format!(
                            "Engine reports ingestion failed for document {}",
                            external_id
                        ),
                    },
                )
                .await;
                Ok(())
            }
            Some(document) if engine_ingestion_succeeded(&document) => {
                self.complete_item(item).await;
                Ok(())
            }
            // Still ingesting, or not yet visible; the stuck ceiling bounds
            // how long we keep probing.
            Some(_) | None => Ok(()),
        }
    }

    /// Last-resort probe: page through the engine's listing looking for a
    /// document whose metadata carries our original document id. Bounded to
    /// `reconcile_max_pages` so one lost item cannot scan the whole corpus.
    async fn reconcile_by_listing(
        &self,
        mut item: IngestionQueueItem,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let page_size = self.config.reconcile_page_size.max(1);

        for page in 0..self.config.reconcile_max_pages {
            let documents = self
                .engine
                .list_documents(page * page_size, page_size)
                .await?;
            let short_page = (documents.len() as u32) < page_size;

            if let Some(document) = documents
                .into_iter()
                .find(|d| d.original_document_id() == Some(item.document_id))
            {
                if engine_ingestion_failed(&document) {
                    self.fail_or_retry(
                        item,
                        AppError::Engine {
                            category: ErrorCategory::Permanent,
                            message: format!(
                                "Engine reports ingestion failed for document {}",
                                document.id
                            ),
                        },
                    )
                    .await;
                } else if engine_ingestion_succeeded(&document) {
                    item.external_id = Some(document.id);
                    self.complete_item(item).await;
                } else {
                    // Found and still ingesting: confirm the id, keep waiting.
                    item.external_id = Some(document.id);
                    item.updated_at = now;
                    self.queue.update(item.clone()).await;
                    self.persist_projection(&item, DocumentAction::StatusChanged, None)
                        .await;
                }
                return Ok(());
            }

            if short_page {
                break;
            }
        }
        Ok(())
    }

    /// Terminal success: only reachable with a confirmed external id, which
    /// the Ready projection requires.
    async fn complete_item(&self, mut item: IngestionQueueItem) {
        if !is_confirmed_external_id(item.external_id.as_deref()) {
            tracing::error!(
                item_id = %item.id,
                external_id = ?item.external_id,
                "Refusing to complete item without a confirmed external id"
            );
            return;
        }

        item.status = QueueItemStatus::Completed;
        item.updated_at = Utc::now();
        self.queue.update(item.clone()).await;
        self.persist_projection(&item, DocumentAction::Completed, None)
            .await;
        tracing::info!(
            item_id = %item.id,
            document_id = %item.document_id,
            external_id = ?item.external_id,
            "Ingestion completed and verified"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tests::{harness, staged_item, Harness};
    use docstream_core::models::{placeholder_external_id, DocumentStatus};
    use docstream_core::PipelineConfig;
    use docstream_index::types::EngineTaskStatus;

    fn task_status(status: &str, document_id: Option<&str>) -> EngineTaskStatus {
        EngineTaskStatus {
            status: status.to_string(),
            progress: None,
            current_step: None,
            document_id: document_id.map(|s| s.to_string()),
            estimated_completion: None,
        }
    }

    fn engine_document(id: &str, original: uuid::Uuid, status: Option<&str>) -> EngineDocument {
        EngineDocument {
            id: id.to_string(),
            title: None,
            ingestion_status: status.map(|s| s.to_string()),
            extraction_status: None,
            metadata: serde_json::json!({ "original_document_id": original.to_string() }),
        }
    }

    async fn processing_item(h: &Harness) -> docstream_core::models::IngestionQueueItem {
        let mut item = staged_item(h).await;
        item.status = QueueItemStatus::Processing;
        item.external_id = Some(placeholder_external_id());
        h.pipeline.queue.update(item.clone()).await;
        item
    }

    #[tokio::test]
    async fn completed_task_confirms_and_marks_ready() {
        let h = harness(PipelineConfig::default()).await;
        let mut item = processing_item(&h).await;
        item.task_id = Some("task-1".to_string());
        h.pipeline.queue.update(item.clone()).await;
        h.engine.task_statuses.lock().await.insert(
            "task-1".to_string(),
            task_status("completed", Some("engine-doc-9")),
        );

        h.pipeline.reconcile_pass().await.unwrap();

        let stored = h.pipeline.get_item(item.id).await.unwrap();
        assert_eq!(stored.status, QueueItemStatus::Completed);
        assert_eq!(stored.external_id.as_deref(), Some("engine-doc-9"));

        let updates = h.store.status_updates.lock().await;
        let last = updates.last().unwrap();
        assert_eq!(last.1, DocumentStatus::Ready);
        assert_eq!(last.2, 100);
        assert_eq!(last.3.as_deref(), Some("engine-doc-9"));
    }

    #[tokio::test]
    async fn failed_task_is_terminal() {
        let h = harness(PipelineConfig::default()).await;
        let mut item = processing_item(&h).await;
        item.task_id = Some("task-2".to_string());
        h.pipeline.queue.update(item.clone()).await;
        h.engine
            .task_statuses
            .lock()
            .await
            .insert("task-2".to_string(), task_status("failed", None));

        h.pipeline.reconcile_pass().await.unwrap();

        let stored = h.pipeline.get_item(item.id).await.unwrap();
        assert_eq!(stored.status, QueueItemStatus::Failed);
        assert_eq!(stored.error_category, Some(ErrorCategory::Permanent));
        assert_eq!(h.store.errors.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn in_flight_task_confirms_external_id_early() {
        let h = harness(PipelineConfig::default()).await;
        let mut item = processing_item(&h).await;
        item.task_id = Some("task-3".to_string());
        h.pipeline.queue.update(item.clone()).await;
        h.engine.task_statuses.lock().await.insert(
            "task-3".to_string(),
            task_status("processing", Some("engine-doc-3")),
        );

        h.pipeline.reconcile_pass().await.unwrap();

        let stored = h.pipeline.get_item(item.id).await.unwrap();
        assert_eq!(stored.status, QueueItemStatus::Processing);
        assert_eq!(stored.external_id.as_deref(), Some("engine-doc-3"));
        assert_eq!(stored.progress(), 90);
    }

    #[tokio::test]
    async fn stuck_processing_fails_with_timeout() {
        let config = PipelineConfig {
            processing_timeout_secs: 600,
            ..Default::default()
        };
        let h = harness(config).await;
        let mut item = processing_item(&h).await;
        item.updated_at = Utc::now() - chrono::Duration::seconds(700);
        h.pipeline.queue.update(item.clone()).await;

        h.pipeline.reconcile_pass().await.unwrap();

        let stored = h.pipeline.get_item(item.id).await.unwrap();
        assert_eq!(stored.status, QueueItemStatus::Failed);
        assert_eq!(stored.error_category, Some(ErrorCategory::Timeout));
    }

    #[tokio::test]
    async fn confirmed_id_polls_document_until_ready() {
        let h = harness(PipelineConfig::default()).await;
        let mut item = processing_item(&h).await;
        item.external_id = Some("engine-doc-5".to_string());
        h.pipeline.queue.update(item.clone()).await;

        // Still ingesting: nothing changes.
        h.engine.documents.lock().await.insert(
            "engine-doc-5".to_string(),
            engine_document("engine-doc-5", item.document_id, Some("pending")),
        );
        h.pipeline.reconcile_pass().await.unwrap();
        assert_eq!(
            h.pipeline.get_item(item.id).await.unwrap().status,
            QueueItemStatus::Processing
        );

        // Ingested: completed on the next pass.
        h.engine.documents.lock().await.insert(
            "engine-doc-5".to_string(),
            engine_document("engine-doc-5", item.document_id, Some("success")),
        );
        h.pipeline.reconcile_pass().await.unwrap();
        assert_eq!(
            h.pipeline.get_item(item.id).await.unwrap().status,
            QueueItemStatus::Completed
        );
    }

    #[tokio::test]
    async fn listing_search_recovers_lost_identity() {
        let h = harness(PipelineConfig::default()).await;
        let item = processing_item(&h).await;

        h.engine.listing.lock().await.extend([
            engine_document("other-1", uuid::Uuid::new_v4(), Some("success")),
            engine_document("engine-doc-7", item.document_id, Some("success")),
        ]);

        h.pipeline.reconcile_pass().await.unwrap();

        let stored = h.pipeline.get_item(item.id).await.unwrap();
        assert_eq!(stored.status, QueueItemStatus::Completed);
        assert_eq!(stored.external_id.as_deref(), Some("engine-doc-7"));
    }

    #[tokio::test]
    async fn listing_search_is_bounded_by_page_budget() {
        let config = PipelineConfig {
            reconcile_page_size: 2,
            reconcile_max_pages: 1,
            ..Default::default()
        };
        let h = harness(config).await;
        let item = processing_item(&h).await;

        // Match sits beyond the page budget.
        let mut listing = vec![
            engine_document("a", uuid::Uuid::new_v4(), Some("success")),
            engine_document("b", uuid::Uuid::new_v4(), Some("success")),
            engine_document("c", uuid::Uuid::new_v4(), Some("success")),
        ];
        listing.push(engine_document("match", item.document_id, Some("success")));
        *h.engine.listing.lock().await = listing;

        h.pipeline.reconcile_pass().await.unwrap();

        let stored = h.pipeline.get_item(item.id).await.unwrap();
        assert_eq!(stored.status, QueueItemStatus::Processing);
    }

    #[tokio::test]
    async fn probe_error_leaves_item_for_next_pass() {
        let h = harness(PipelineConfig::default()).await;
        let mut item = processing_item(&h).await;
        item.task_id = Some("unknown-task".to_string());
        h.pipeline.queue.update(item.clone()).await;

        // task_status errors for unknown ids; the pass must not fail the item.
        h.pipeline.reconcile_pass().await.unwrap();

        let stored = h.pipeline.get_item(item.id).await.unwrap();
        assert_eq!(stored.status, QueueItemStatus::Processing);
    }
}
