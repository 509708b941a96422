//! Progress event types carried by the notifier channel.
//!
//! Events are best-effort, at-most-once signals for connected clients; the
//! relational store stays authoritative for all state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{DocumentStatus, FileUploadStatus};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DocumentAction {
    Created,
    StatusChanged,
    Completed,
    Failed,
    Cancelled,
}

/// Document-level state change, emitted after the projection is persisted
/// and cache tags are invalidated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentProgressEvent {
    pub document_id: Uuid,
    pub collection_id: Option<Uuid>,
    pub action: DocumentAction,
    pub status: DocumentStatus,
    pub progress: i32,
    pub external_id: Option<String>,
    pub current_step: Option<String>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Byte-level upload progress for a file within a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadProgressEvent {
    pub session_id: Uuid,
    pub file_id: Uuid,
    pub status: FileUploadStatus,
    pub progress_percentage: u8,
    pub uploaded_bytes: u64,
    pub total_bytes: u64,
    /// Bytes per second, measured over the session so far.
    pub speed: f64,
    pub timestamp: DateTime<Utc>,
}

/// Envelope routed to the owning user's channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgressEvent {
    Document {
        user_id: Uuid,
        #[serde(flatten)]
        event: DocumentProgressEvent,
    },
    Upload {
        user_id: Uuid,
        #[serde(flatten)]
        event: UploadProgressEvent,
    },
}

impl ProgressEvent {
    pub fn user_id(&self) -> Uuid {
        match self {
            ProgressEvent::Document { user_id, .. } => *user_id,
            ProgressEvent::Upload { user_id, .. } => *user_id,
        }
    }
}
