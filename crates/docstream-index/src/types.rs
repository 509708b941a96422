use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Multipart submission payload. `document_id` travels in the metadata so
/// the reconciler can find the document by listing when the id is lost.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub document_id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub collection_id: Option<Uuid>,
    pub file_name: String,
    pub content_type: String,
    pub checksum: Option<String>,
    pub data: Bytes,
}

/// Engine response to a submission. Any combination of fields may be
/// present: a synchronous id, an async task id, or (legacy) neither.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, alias = "taskId")]
    pub task_id: Option<String>,
    #[serde(default, alias = "ingestionStatus")]
    pub ingestion_status: Option<String>,
    #[serde(default, alias = "extractionStatus")]
    pub extraction_status: Option<String>,
}

/// Document record as the engine reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineDocument {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, alias = "ingestionStatus")]
    pub ingestion_status: Option<String>,
    #[serde(default, alias = "extractionStatus")]
    pub extraction_status: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl EngineDocument {
    /// The original document id we embedded in the metadata at submission.
    pub fn original_document_id(&self) -> Option<Uuid> {
        self.metadata
            .get("original_document_id")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
    }
}

/// Status of an asynchronous ingestion task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineTaskStatus {
    pub status: String,
    #[serde(default)]
    pub progress: Option<i32>,
    #[serde(default, alias = "currentStep")]
    pub current_step: Option<String>,
    #[serde(default, alias = "documentId")]
    pub document_id: Option<String>,
    #[serde(default, alias = "estimatedCompletion")]
    pub estimated_completion: Option<String>,
}

impl EngineTaskStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self.status.as_str(), "completed" | "success" | "succeeded")
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status.as_str(), "failed" | "error" | "failure")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentListPage {
    #[serde(default)]
    pub results: Vec<EngineDocument>,
    #[serde(default, alias = "totalEntries")]
    pub total_entries: Option<u64>,
}
