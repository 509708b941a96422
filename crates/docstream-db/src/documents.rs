use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use docstream_core::models::{is_confirmed_external_id, Document, DocumentStatus};
use docstream_core::AppError;

/// Verifies the Ready invariant before any status write: a document may only
/// become Ready with a confirmed (non-placeholder) external id. This is the
/// gate that keeps unindexed content from appearing searchable.
fn check_ready_invariant(
    status: DocumentStatus,
    external_id: Option<&str>,
) -> Result<(), AppError> {
    if status == DocumentStatus::Ready && !is_confirmed_external_id(external_id) {
        return Err(AppError::Internal(format!(
            "Refusing to mark document ready with unconfirmed external id {:?}",
            external_id
        )));
    }
    Ok(())
}

/// Repository for the documents system-of-record.
#[derive(Clone)]
pub struct DocumentRepository {
    pool: PgPool,
}

impl DocumentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn insert(&self, document: &Document) -> Result<(), AppError> {
        check_ready_invariant(document.status, document.external_id.as_deref())?;

        sqlx::query(
            r#"
            INSERT INTO documents (
                id, tenant_id, user_id, collection_id, name, size_bytes,
                content_type, checksum, status, external_id, progress,
                processing_error, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(document.id)
        .bind(document.tenant_id)
        .bind(document.user_id)
        .bind(document.collection_id)
        .bind(&document.name)
        .bind(document.size_bytes)
        .bind(&document.content_type)
        .bind(&document.checksum)
        .bind(document.status.to_string())
        .bind(&document.external_id)
        .bind(document.progress)
        .bind(&document.processing_error)
        .bind(document.created_at)
        .bind(document.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<Document>, AppError> {
        let row = sqlx::query_as::<_, Document>(
            r#"
            SELECT id, tenant_id, user_id, collection_id, name, size_bytes,
                   content_type, checksum, status, external_id, progress,
                   processing_error, created_at, updated_at
            FROM documents
            WHERE id = $1 AND tenant_id = $2
            "#,
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Update status/progress/external id in one write; the Ready invariant
    /// is enforced here so no caller can bypass it.
    pub async fn update_status(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        status: DocumentStatus,
        progress: i32,
        external_id: Option<&str>,
    ) -> Result<(), AppError> {
        check_ready_invariant(status, external_id)?;

        let result = sqlx::query(
            r#"
            UPDATE documents
            SET status = $3, progress = $4,
                external_id = COALESCE($5, external_id),
                updated_at = $6
            WHERE id = $1 AND tenant_id = $2
            "#,
        )
        .bind(id)
        .bind(tenant_id)
        .bind(status.to_string())
        .bind(progress)
        .bind(external_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Document {}", id)));
        }
        Ok(())
    }

    /// Terminal failure: mark Error with the human-readable message, keep
    /// the row visible so the user can retry explicitly.
    pub async fn mark_error(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        error: &str,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE documents
            SET status = 'error', progress = 0, processing_error = $3, updated_at = $4
            WHERE id = $1 AND tenant_id = $2
            "#,
        )
        .bind(id)
        .bind(tenant_id)
        .bind(error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_for_user(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<Document>, AppError> {
        let rows = sqlx::query_as::<_, Document>(
            r#"
            SELECT id, tenant_id, user_id, collection_id, name, size_bytes,
                   content_type, checksum, status, external_id, progress,
                   processing_error, created_at, updated_at
            FROM documents
            WHERE tenant_id = $1 AND user_id = $2
            ORDER BY created_at DESC
            "#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn list_for_collection(
        &self,
        tenant_id: Uuid,
        collection_id: Uuid,
    ) -> Result<Vec<Document>, AppError> {
        let rows = sqlx::query_as::<_, Document>(
            r#"
            SELECT id, tenant_id, user_id, collection_id, name, size_bytes,
                   content_type, checksum, status, external_id, progress,
                   processing_error, created_at, updated_at
            FROM documents
            WHERE tenant_id = $1 AND collection_id = $2
            ORDER BY created_at DESC
            "#,
        )
        .bind(tenant_id)
        .bind(collection_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Startup recovery scan: documents left in Processing, plus the
    /// detectable inconsistency of Ready rows without a confirmed external
    /// id (crash between engine confirmation and the final write).
    pub async fn recovery_scan(&self) -> Result<Vec<Document>, AppError> {
        let rows = sqlx::query_as::<_, Document>(
            r#"
            SELECT id, tenant_id, user_id, collection_id, name, size_bytes,
                   content_type, checksum, status, external_id, progress,
                   processing_error, created_at, updated_at
            FROM documents
            WHERE status = 'processing'
               OR (status = 'ready'
                   AND (external_id IS NULL
                        OR external_id = ''
                        OR external_id LIKE 'pending\_%'))
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Self-healing demotion for the Ready-without-confirmed-id
    /// inconsistency found by the recovery scan.
    pub async fn demote_to_processing(&self, tenant_id: Uuid, id: Uuid) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE documents
            SET status = 'processing', progress = 10, updated_at = $3
            WHERE id = $1 AND tenant_id = $2
            "#,
        )
        .bind(id)
        .bind(tenant_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docstream_core::models::placeholder_external_id;

    #[test]
    fn ready_requires_confirmed_external_id() {
        assert!(check_ready_invariant(DocumentStatus::Ready, None).is_err());
        assert!(check_ready_invariant(DocumentStatus::Ready, Some("")).is_err());
        assert!(
            check_ready_invariant(DocumentStatus::Ready, Some(&placeholder_external_id()))
                .is_err()
        );
        assert!(check_ready_invariant(DocumentStatus::Ready, Some("engine-id-1")).is_ok());
    }

    #[test]
    fn non_ready_statuses_pass_with_any_external_id() {
        for status in [
            DocumentStatus::Draft,
            DocumentStatus::Processing,
            DocumentStatus::Error,
        ] {
            assert!(check_ready_invariant(status, None).is_ok());
            assert!(check_ready_invariant(status, Some("pending_x")).is_ok());
        }
    }
}
