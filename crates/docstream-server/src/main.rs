//! Docstream bootstrap binary.
//!
//! Loads configuration, connects the Postgres pool and cache tiers, runs
//! startup recovery, spawns the processing pipeline, and waits for a shutdown
//! signal. The HTTP transport mounts on the upload orchestrator constructed
//! here.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::mpsc;

use docstream_cache::{CacheTier, MemoryTier, MultiTierCache, PostgresTier, RedisTier};
use docstream_core::{AppConfig, ProgressNotifier};
use docstream_db::{run_migrations, DocumentRepository};
use docstream_index::IndexEngineClient;
use docstream_infra::telemetry::init_telemetry;
use docstream_pipeline::ProcessingPipeline;
use docstream_storage::LocalStaging;
use docstream_upload::UploadOrchestrator;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    dotenvy::dotenv().ok();
    init_telemetry().map_err(|e| anyhow::anyhow!("Telemetry init failed: {}", e))?;

    let config = AppConfig::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&config.database_url)
        .await
        .context("Failed to connect to Postgres")?;
    run_migrations(&pool).await.context("Migration failed")?;
    tracing::info!(max_connections = config.db_max_connections, "Database ready");

    let storage = Arc::new(
        LocalStaging::new(config.staging_root.clone())
            .await
            .context("Failed to initialize staging storage")?,
    );
    tracing::info!(staging_root = %config.staging_root, "Staging storage ready");

    let l1: Arc<dyn CacheTier> = Arc::new(MemoryTier::new(config.cache.l1_capacity));
    let l2: Option<Arc<dyn CacheTier>> = match &config.cache.redis_url {
        Some(url) => match RedisTier::connect(url).await {
            Ok(tier) => {
                tracing::info!("Redis cache tier connected");
                Some(Arc::new(tier) as Arc<dyn CacheTier>)
            }
            Err(err) => {
                tracing::warn!(error = %err, "Redis unavailable, running without L2 tier");
                None
            }
        },
        None => None,
    };
    let l3: Option<Arc<dyn CacheTier>> = Some(Arc::new(PostgresTier::new(pool.clone())));
    let cache = Arc::new(MultiTierCache::new(l1, l2, l3));

    let engine = Arc::new(IndexEngineClient::new(&config.engine)?);
    let store = Arc::new(DocumentRepository::new(pool.clone()));
    let (notifier, _notifier_task) = ProgressNotifier::new(1024);

    let pipeline = Arc::new(ProcessingPipeline::new(
        config.pipeline.clone(),
        engine,
        store.clone(),
        storage.clone(),
        cache.clone(),
        notifier.clone(),
    ));

    // Recovery must finish before the drain loop starts claiming, so
    // re-queued items compete on equal footing with fresh ones.
    let recovered = pipeline.recover_from_store().await?;
    tracing::info!(recovered, "Startup recovery finished");

    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
    let worker = tokio::spawn(pipeline.clone().run(shutdown_rx));

    let _orchestrator = Arc::new(UploadOrchestrator::new(
        config.upload.clone(),
        storage,
        cache,
        store,
        pipeline.clone(),
        notifier,
    ));
    tracing::info!("Docstream started");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    let _ = shutdown_tx.send(()).await;
    if let Err(err) = worker.await {
        tracing::error!(error = %err, "Pipeline task terminated abnormally");
    }

    let stats = pipeline.statistics().await;
    tracing::info!(
        queued = stats.counts.queued,
        processing = stats.counts.processing,
        completed = stats.counts.completed,
        failed = stats.counts.failed,
        circuit_state = %stats.circuit_state,
        "Docstream stopped"
    );
    Ok(())
}
