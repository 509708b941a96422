use async_trait::async_trait;
use uuid::Uuid;

use docstream_core::models::{Document, DocumentStatus};
use docstream_core::AppError;

use crate::documents::DocumentRepository;

/// Persistence seam for the document system-of-record. The orchestrator,
/// pipeline and reconciler write through this trait; tests mock it.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn insert(&self, document: &Document) -> Result<(), AppError>;

    async fn get(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<Document>, AppError>;

    async fn update_status(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        status: DocumentStatus,
        progress: i32,
        external_id: Option<&str>,
    ) -> Result<(), AppError>;

    async fn mark_error(&self, tenant_id: Uuid, id: Uuid, error: &str) -> Result<(), AppError>;

    async fn recovery_scan(&self) -> Result<Vec<Document>, AppError>;

    async fn demote_to_processing(&self, tenant_id: Uuid, id: Uuid) -> Result<(), AppError>;
}

#[async_trait]
impl DocumentStore for DocumentRepository {
    async fn insert(&self, document: &Document) -> Result<(), AppError> {
        DocumentRepository::insert(self, document).await
    }

    async fn get(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<Document>, AppError> {
        DocumentRepository::get(self, tenant_id, id).await
    }

    async fn update_status(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        status: DocumentStatus,
        progress: i32,
        external_id: Option<&str>,
    ) -> Result<(), AppError> {
        DocumentRepository::update_status(self, tenant_id, id, status, progress, external_id).await
    }

    async fn mark_error(&self, tenant_id: Uuid, id: Uuid, error: &str) -> Result<(), AppError> {
        DocumentRepository::mark_error(self, tenant_id, id, error).await
    }

    async fn recovery_scan(&self) -> Result<Vec<Document>, AppError> {
        DocumentRepository::recovery_scan(self).await
    }

    async fn demote_to_processing(&self, tenant_id: Uuid, id: Uuid) -> Result<(), AppError> {
        DocumentRepository::demote_to_processing(self, tenant_id, id).await
    }
}
