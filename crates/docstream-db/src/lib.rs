//! Docstream Database Library
//!
//! Postgres repositories for the documents system-of-record and the
//! transaction helpers the pipeline uses when persisting state transitions.

pub mod documents;
pub mod store;
pub mod transaction;

pub use documents::DocumentRepository;
pub use store::DocumentStore;
pub use transaction::{with_transaction, with_transaction_retry};

use docstream_core::AppError;
use sqlx::PgPool;

/// Apply embedded migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), AppError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| AppError::Internal(format!("Migration failed: {}", e)))?;
    Ok(())
}
