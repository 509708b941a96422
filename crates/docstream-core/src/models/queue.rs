use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ErrorCategory;
use crate::models::document::is_confirmed_external_id;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QueueItemStatus {
    Queued,
    Processing,
    Retrying,
    Completed,
    Failed,
    Cancelled,
}

impl QueueItemStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueueItemStatus::Completed | QueueItemStatus::Failed | QueueItemStatus::Cancelled
        )
    }

    /// Legal transitions of the pipeline state machine. Cancelled is
    /// reachable from Queued and Processing only.
    pub fn can_transition_to(&self, next: QueueItemStatus) -> bool {
        use QueueItemStatus::*;
        matches!(
            (self, next),
            (Queued, Processing)
                | (Queued, Cancelled)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Retrying)
                | (Processing, Cancelled)
                | (Retrying, Queued)
        )
    }
}

impl Display for QueueItemStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            QueueItemStatus::Queued => write!(f, "queued"),
            QueueItemStatus::Processing => write!(f, "processing"),
            QueueItemStatus::Retrying => write!(f, "retrying"),
            QueueItemStatus::Completed => write!(f, "completed"),
            QueueItemStatus::Failed => write!(f, "failed"),
            QueueItemStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for QueueItemStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(QueueItemStatus::Queued),
            "processing" => Ok(QueueItemStatus::Processing),
            "retrying" => Ok(QueueItemStatus::Retrying),
            "completed" => Ok(QueueItemStatus::Completed),
            "failed" => Ok(QueueItemStatus::Failed),
            "cancelled" => Ok(QueueItemStatus::Cancelled),
            _ => Err(anyhow::anyhow!("Invalid queue item status: {}", s)),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low = 3,
    #[default]
    Normal = 5,
    High = 7,
    Critical = 10,
}

impl Priority {
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    pub fn from_i32(value: i32) -> Self {
        match value {
            0..=3 => Priority::Low,
            4..=6 => Priority::Normal,
            7..=9 => Priority::High,
            _ => Priority::Critical,
        }
    }
}

impl From<Priority> for i32 {
    fn from(priority: Priority) -> Self {
        priority as i32
    }
}

/// Unit of work for the processing pipeline; the only entity that crosses
/// the boundary into the external indexing engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionQueueItem {
    pub id: Uuid,
    pub document_id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub collection_id: Option<Uuid>,
    pub file_path: String,
    pub file_name: String,
    pub file_size: i64,
    pub content_type: String,
    pub checksum: Option<String>,
    pub priority: Priority,
    pub status: QueueItemStatus,
    pub retry_count: i32,
    pub max_retries: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Engine-side document id. Placeholder until reconciled.
    pub external_id: Option<String>,
    /// Engine-side async task id, polled by the reconciler when present.
    pub task_id: Option<String>,
    pub error_category: Option<ErrorCategory>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IngestionQueueItem {
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
            && self
                .error_category
                .map(|c| c.is_retryable())
                .unwrap_or(true)
    }

    pub fn is_retry_due(&self, now: DateTime<Utc>) -> bool {
        match self.next_retry_at {
            Some(at) => at <= now,
            None => true,
        }
    }

    /// Deterministic progress for the document projection, derived from the
    /// item's state and how far the external id has been confirmed.
    pub fn progress(&self) -> i32 {
        match self.status {
            QueueItemStatus::Queued => 5,
            QueueItemStatus::Retrying => 25,
            QueueItemStatus::Processing => match &self.external_id {
                None => 10,
                Some(id) if is_confirmed_external_id(Some(id)) => 90,
                Some(_) => 50,
            },
            QueueItemStatus::Completed => 100,
            QueueItemStatus::Failed => 0,
            QueueItemStatus::Cancelled => 0,
        }
    }
}
