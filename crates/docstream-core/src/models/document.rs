use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

/// Sentinel prefix marking an external id as "submitted but not yet
/// confirmed by the engine". A document carrying one is never searchable.
pub const PLACEHOLDER_PREFIX: &str = "pending_";

/// Makes a fresh placeholder external id for a submission whose real
/// engine-side identity is not yet known.
pub fn placeholder_external_id() -> String {
    format!("{}{}", PLACEHOLDER_PREFIX, Uuid::new_v4())
}

/// True when `id` is present, non-empty and not a placeholder, i.e. the
/// engine has confirmed the document under this identity.
pub fn is_confirmed_external_id(id: Option<&str>) -> bool {
    match id {
        Some(value) => !value.is_empty() && !value.starts_with(PLACEHOLDER_PREFIX),
        None => false,
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Draft,
    Processing,
    Ready,
    Error,
}

impl Display for DocumentStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            DocumentStatus::Draft => write!(f, "draft"),
            DocumentStatus::Processing => write!(f, "processing"),
            DocumentStatus::Ready => write!(f, "ready"),
            DocumentStatus::Error => write!(f, "error"),
        }
    }
}

impl FromStr for DocumentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(DocumentStatus::Draft),
            "processing" => Ok(DocumentStatus::Processing),
            "ready" => Ok(DocumentStatus::Ready),
            "error" => Ok(DocumentStatus::Error),
            _ => Err(anyhow::anyhow!("Invalid document status: {}", s)),
        }
    }
}

/// System-of-record projection of a document moving through ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub collection_id: Option<Uuid>,
    pub name: String,
    pub size_bytes: i64,
    pub content_type: String,
    pub checksum: Option<String>,
    pub status: DocumentStatus,
    /// Engine-side identity. Placeholder (`pending_...`) until reconciled.
    pub external_id: Option<String>,
    pub progress: i32,
    pub processing_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Ready requires a confirmed (non-placeholder) external id. This gate is
    /// also enforced at the repository write path; checking here keeps the
    /// invariant visible to every caller constructing a transition.
    pub fn can_become_ready(&self) -> bool {
        is_confirmed_external_id(self.external_id.as_deref())
    }

    pub fn has_placeholder_external_id(&self) -> bool {
        matches!(&self.external_id, Some(id) if id.starts_with(PLACEHOLDER_PREFIX))
    }
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for Document {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Document {
            id: row.get("id"),
            tenant_id: row.get("tenant_id"),
            user_id: row.get("user_id"),
            collection_id: row.get("collection_id"),
            name: row.get("name"),
            size_bytes: row.get("size_bytes"),
            content_type: row.get("content_type"),
            checksum: row.get("checksum"),
            status: row.get::<String, _>("status").parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse document status: {}", e).into())
            })?,
            external_id: row.get("external_id"),
            progress: row.get("progress"),
            processing_error: row.get("processing_error"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_document(external_id: Option<&str>) -> Document {
        Document {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            collection_id: None,
            name: "report.pdf".to_string(),
            size_bytes: 2048,
            content_type: "application/pdf".to_string(),
            checksum: None,
            status: DocumentStatus::Processing,
            external_id: external_id.map(|s| s.to_string()),
            progress: 50,
            processing_error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn placeholder_ids_are_detected() {
        let id = placeholder_external_id();
        assert!(id.starts_with(PLACEHOLDER_PREFIX));
        assert!(!is_confirmed_external_id(Some(&id)));
        assert!(!is_confirmed_external_id(Some("")));
        assert!(!is_confirmed_external_id(None));
        assert!(is_confirmed_external_id(Some("doc-8f3a")));
    }

    #[test]
    fn ready_requires_confirmed_external_id() {
        assert!(!sample_document(None).can_become_ready());
        assert!(!sample_document(Some("pending_abc")).can_become_ready());
        assert!(!sample_document(Some("")).can_become_ready());
        assert!(sample_document(Some("engine-id-1")).can_become_ready());
    }

    #[test]
    fn placeholder_flag_ignores_confirmed_ids() {
        assert!(sample_document(Some("pending_xyz")).has_placeholder_external_id());
        assert!(!sample_document(Some("engine-id-1")).has_placeholder_external_id());
        assert!(!sample_document(None).has_placeholder_external_id());
    }

    #[test]
    fn status_round_trip() {
        for status in [
            DocumentStatus::Draft,
            DocumentStatus::Processing,
            DocumentStatus::Ready,
            DocumentStatus::Error,
        ] {
            assert_eq!(
                status.to_string().parse::<DocumentStatus>().unwrap(),
                status
            );
        }
        assert!("indexed".parse::<DocumentStatus>().is_err());
    }
}
