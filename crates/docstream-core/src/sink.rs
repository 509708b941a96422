use async_trait::async_trait;

use crate::error::AppError;
use crate::models::IngestionQueueItem;

/// Hand-off point between the upload orchestrator and the processing
/// pipeline. Kept as a trait so the orchestrator is testable without a
/// running pipeline.
#[async_trait]
pub trait IngestionSink: Send + Sync {
    async fn enqueue(&self, item: IngestionQueueItem) -> Result<(), AppError>;
}
