//! Database transaction utilities
//!
//! Helpers for executing multiple database operations within a transaction,
//! with bounded retry for transient failures.

use docstream_core::AppError;
use sqlx::{PgPool, Postgres, Transaction};
use std::pin::Pin;

/// Execute a closure within a database transaction
///
/// Begins a transaction, executes the closure with it, commits on success
/// and rolls back on error.
pub async fn with_transaction<T, F>(pool: &PgPool, f: F) -> Result<T, AppError>
where
    F: for<'a> FnOnce(
        &'a mut Transaction<'_, Postgres>,
    ) -> Pin<
        Box<dyn std::future::Future<Output = Result<T, AppError>> + Send + 'a>,
    >,
{
    let mut tx = pool.begin().await.map_err(|e| {
        tracing::error!(error = %e, "Failed to begin transaction");
        AppError::Database(e)
    })?;

    match f(&mut tx).await {
        Ok(result) => {
            tx.commit().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to commit transaction");
                AppError::Database(e)
            })?;
            Ok(result)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::error!(
                    error = %rollback_err,
                    original_error = %e,
                    "Failed to rollback transaction"
                );
            }
            Err(e)
        }
    }
}

/// Like [`with_transaction`] but retries transient database failures with a
/// short linear backoff. Non-database errors are returned immediately since
/// re-running the closure cannot change them.
pub async fn with_transaction_retry<T, F>(
    pool: &PgPool,
    f: F,
    max_retries: u32,
) -> Result<T, AppError>
where
    F: for<'a> Fn(
        &'a mut Transaction<'_, Postgres>,
    )
        -> Pin<Box<dyn std::future::Future<Output = Result<T, AppError>> + Send + 'a>>,
{
    let mut last_error = None;

    for attempt in 0..=max_retries {
        match with_transaction(pool, |tx| f(tx)).await {
            Ok(result) => return Ok(result),
            Err(e @ AppError::Database(_)) => {
                last_error = Some(e);
                if attempt < max_retries {
                    let delay_ms = 100 * (attempt + 1) as u64;
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries,
                        delay_ms,
                        "Transaction failed, retrying"
                    );
                    tokio::time::sleep(tokio::time::Duration::from_millis(delay_ms)).await;
                }
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_error
        .unwrap_or_else(|| AppError::Internal("Transaction failed after all retries".to_string())))
}
