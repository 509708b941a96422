//! Error types module
//!
//! All errors are unified under the `AppError` enum. Pipeline failures
//! additionally carry an [`ErrorCategory`] that decides whether a queue item
//! is retried and with which backoff shape.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::io;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[cfg(feature = "sqlx")]
use sqlx::Error as SqlxError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[source] SqlxError),

    #[cfg(not(feature = "sqlx"))]
    #[error("Database error: {0}")]
    Database(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("File too large: {0}")]
    PayloadTooLarge(String),

    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("Quota exceeded: {resource} usage {used}/{limit}")]
    QuotaExceeded {
        resource: String,
        used: i64,
        limit: i64,
    },

    #[error("Upload slot unavailable: {0}")]
    UploadSlotTimeout(String),

    #[error("Index engine error ({category}): {message}")]
    Engine {
        category: ErrorCategory,
        message: String,
    },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Internal error with source")]
    InternalWithSource {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

#[cfg(feature = "sqlx")]
impl From<SqlxError> for AppError {
    fn from(err: SqlxError) -> Self {
        AppError::Database(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::InternalWithSource {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        AppError::Internal(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidInput(format!("JSON parsing error: {}", err))
    }
}

impl AppError {
    /// Category used when this error fails a pipeline item.
    pub fn category(&self) -> ErrorCategory {
        match self {
            AppError::Engine { category, .. } => *category,
            AppError::InvalidInput(_) | AppError::NotFound(_) => ErrorCategory::Validation,
            AppError::UnsupportedFileType(_) => ErrorCategory::FileFormat,
            AppError::PayloadTooLarge(_) => ErrorCategory::FileSize,
            AppError::Unauthorized(_) => ErrorCategory::Authentication,
            #[cfg(feature = "sqlx")]
            AppError::Database(_) => ErrorCategory::Transient,
            #[cfg(not(feature = "sqlx"))]
            AppError::Database(_) => ErrorCategory::Transient,
            AppError::Storage(_) | AppError::Cache(_) => ErrorCategory::Transient,
            _ => ErrorCategory::Unknown,
        }
    }

    /// User-facing message (internal details stripped).
    pub fn client_message(&self) -> String {
        match self {
            AppError::Database(_) => "Failed to access database".to_string(),
            AppError::Storage(_) => "Failed to access staging storage".to_string(),
            AppError::Cache(_) => "Failed to access cache".to_string(),
            AppError::Internal(_) | AppError::InternalWithSource { .. } => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Failure classification for ingestion-engine interactions.
///
/// Only `Transient`, `RateLimit` and `Unknown` are retried; everything else
/// is terminal on first occurrence because a retry cannot change the outcome.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Network failures, timeouts, 5xx responses.
    Transient,
    /// Engine signalled 429; retried with a longer linear backoff.
    RateLimit,
    /// Credential or permission failure against the engine.
    Authentication,
    /// Bad input rejected by the engine or by local validation.
    Validation,
    /// Content type not accepted by policy.
    FileFormat,
    /// Content exceeds size policy.
    FileSize,
    /// Processing exceeded the stuck-item ceiling.
    Timeout,
    /// Explicit failure signal from the engine.
    Permanent,
    /// Unclassified; defaults to retryable, capped by max retries.
    Unknown,
}

impl ErrorCategory {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCategory::Transient | ErrorCategory::RateLimit | ErrorCategory::Unknown
        )
    }
}

impl Display for ErrorCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let s = match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::Validation => "validation",
            ErrorCategory::FileFormat => "file_format",
            ErrorCategory::FileSize => "file_size",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Permanent => "permanent",
            ErrorCategory::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for ErrorCategory {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transient" => Ok(ErrorCategory::Transient),
            "rate_limit" => Ok(ErrorCategory::RateLimit),
            "authentication" => Ok(ErrorCategory::Authentication),
            "validation" => Ok(ErrorCategory::Validation),
            "file_format" => Ok(ErrorCategory::FileFormat),
            "file_size" => Ok(ErrorCategory::FileSize),
            "timeout" => Ok(ErrorCategory::Timeout),
            "permanent" => Ok(ErrorCategory::Permanent),
            "unknown" => Ok(ErrorCategory::Unknown),
            _ => Err(anyhow::anyhow!("Invalid error category: {}", s)),
        }
    }
}
