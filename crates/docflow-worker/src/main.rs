//! Binary entrypoint: load config, connect the pool, build the worker, run
//! it until shutdown. The worker is a durable `JobQueue` consumer plus the
//! two ingest sources (directory watcher, IMAP poller).

use anyhow::Result;
use docflow_core::blob::BlobStore;
use docflow_core::config::Settings;
use docflow_core::db::{DbPool, Repository};
use docflow_core::event_bus::EventBus;
use docflow_core::extractor::TextExtractor;
use docflow_core::ingest::{directory::DirectoryWatcherManager, imap::ImapPoller};
use docflow_core::logging;
use docflow_core::metrics::Metrics;
use docflow_core::orchestrator::Orchestrator;
use docflow_core::provider_factory::{build_embedding_provider, build_llm_provider, build_ocr_engine};
use docflow_core::queue::{JobQueue, TaskKind};
use docflow_worker::WorkerError;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// How long the queue consumer sleeps after finding no queued task.
const POLL_IDLE_DELAY: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logger("docflow-worker")?;
    info!("starting docflow-worker");

    let settings = Settings::load().map_err(WorkerError::Config)?;
    let db_pool = DbPool::connect(&settings.database.url, settings.database.pool_max_size)
        .await
        .map_err(WorkerError::Config)?;
    info!("database connection established");

    let queue = Arc::new(JobQueue::new(
        db_pool.get_pool().clone(),
        settings.queue.soft_deadline_minutes,
        settings.queue.hard_deadline_minutes,
    ));
    let repository = Arc::new(Repository::new(db_pool));
    let blob_store = Arc::new(BlobStore::new(settings.storage.local_storage_path.clone()));
    let event_bus = Arc::new(EventBus::new(256));
    let metrics = Arc::new(Metrics::new());

    let ocr_engine = build_ocr_engine(&settings).await;
    let extractor = Arc::new(TextExtractor::new(ocr_engine, settings.ocr.enabled));
    let mut embedding_provider = build_embedding_provider(&settings);
    let llm_provider = build_llm_provider(&settings);

    // The configured dimension must match both the provider's own dimension
    // and the persisted vector(D) column. A mismatch never crashes the
    // process — ingestion and OCR must keep running — it only refuses to
    // schedule embedding jobs.
    if let Some(provider) = &embedding_provider {
        if provider.dimension() != settings.embedding.dimension {
            error!(
                configured = settings.embedding.dimension,
                provider = provider.dimension(),
                "embedding dimension mismatch between config and provider, refusing to run embedding jobs"
            );
            embedding_provider = None;
        }
    }
    if let Some(provider) = &embedding_provider {
        match repository.stored_embedding_dimension().await {
            Ok(Some(stored)) if stored as usize != provider.dimension() => {
                error!(
                    configured = provider.dimension(),
                    stored,
                    "embedding dimension mismatch against the stored document_chunks column, refusing to run embedding jobs"
                );
                embedding_provider = None;
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "could not read the stored embedding dimension, proceeding without the check"),
        }
    }

    spawn_redis_mirror(&settings, &event_bus).await;

    let directory_manager = Arc::new(DirectoryWatcherManager::new(
        repository.clone(),
        blob_store.clone(),
        extractor.clone(),
        embedding_provider.clone(),
        llm_provider.clone(),
        queue.clone(),
        event_bus.clone(),
        settings.embedding.dimension,
    ));
    tokio::spawn(directory_manager.run());

    let imap_poller = Arc::new(ImapPoller::new(
        repository.clone(),
        blob_store.clone(),
        extractor.clone(),
        embedding_provider.clone(),
        llm_provider.clone(),
        queue.clone(),
        event_bus.clone(),
        settings.embedding.dimension,
    ));
    {
        let poller = imap_poller.clone();
        tokio::spawn(async move { poller.run().await });
    }

    info!("ingest sources started, entering queue consumer loop");
    run_consumer_loop(
        &repository,
        &blob_store,
        &extractor,
        embedding_provider.as_deref(),
        llm_provider.as_deref(),
        &queue,
        &event_bus,
        settings.embedding.dimension,
        settings.chunking.chunk_size,
        settings.chunking.overlap,
        &metrics,
    )
    .await;

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_consumer_loop(
    repository: &Repository,
    blob_store: &BlobStore,
    extractor: &TextExtractor,
    embedding_provider: Option<&dyn docflow_core::embedding::EmbeddingProvider>,
    llm_provider: Option<&dyn docflow_core::llm::LlmProvider>,
    queue: &JobQueue,
    event_bus: &EventBus,
    configured_dimension: usize,
    chunk_size: usize,
    overlap: usize,
    metrics: &Metrics,
) {
    let orchestrator = Orchestrator::new(
        repository,
        blob_store,
        extractor,
        embedding_provider,
        llm_provider,
        queue,
        event_bus,
        configured_dimension,
    );

    let mut shutdown = std::pin::pin!(tokio::signal::ctrl_c());

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping consumer loop");
                return;
            }
            task = queue.claim() => {
                match task {
                    Ok(Some(task)) => run_task(&orchestrator, queue, task, chunk_size, overlap, metrics).await,
                    Ok(None) => tokio::time::sleep(POLL_IDLE_DELAY).await,
                    Err(e) => {
                        error!(error = %e, "failed to claim task");
                        tokio::time::sleep(POLL_IDLE_DELAY).await;
                    }
                }
            }
        }
    }
}

async fn run_task(
    orchestrator: &Orchestrator<'_>,
    queue: &JobQueue,
    task: docflow_core::queue::JobTask,
    chunk_size: usize,
    overlap: usize,
    metrics: &Metrics,
) {
    let Ok(document_id) = task.document_id() else {
        warn!(task_id = task.id, "task payload missing document_id, marking failed");
        let _ = queue.mark_failed(task.id, "missing document_id in payload").await;
        return;
    };

    let deadline = task
        .hard_deadline_at
        .and_then(|d| (d - chrono::Utc::now()).to_std().ok())
        .unwrap_or(Duration::from_secs(30 * 60));

    let result = tokio::time::timeout(deadline, async {
        match task.kind {
            TaskKind::ProcessDocument => orchestrator.process_document(document_id).await.map(|_| ()),
            TaskKind::GenerateEmbeddings => {
                orchestrator.generate_embeddings(document_id, chunk_size, overlap).await.map(|_| ())
            }
            TaskKind::ExtractMetadata => orchestrator.extract_metadata(document_id).await.map(|_| ()),
        }
    })
    .await;

    match result {
        Ok(Ok(())) => {
            metrics.documents_processed_total.inc();
            let _ = queue.mark_done(task.id).await;
        }
        Ok(Err(e)) => {
            error!(task_id = task.id, document_id, error = %e, "task failed");
            metrics.documents_failed_total.inc();
            let _ = queue.mark_failed(task.id, &e.to_string()).await;
        }
        Err(_) => {
            warn!(task_id = task.id, document_id, "task exceeded its deadline");
            metrics.documents_failed_total.inc();
            let _ = queue.mark_failed(task.id, "task exceeded its deadline").await;
        }
    }
}

async fn spawn_redis_mirror(settings: &Settings, event_bus: &Arc<EventBus>) {
    let config = deadpool_redis::Config::from_url(settings.redis.url.clone());
    match config.create_pool(Some(deadpool_redis::Runtime::Tokio1)) {
        Ok(pool) => {
            let bridge = Arc::new(docflow_core::event_bus::RedisEventBridge::new(
                pool,
                settings.redis.events_channel.clone(),
            ));
            bridge.spawn_mirror(event_bus);
            info!("redis event mirror started");
        }
        Err(e) => warn!(error = %e, "failed to start redis event mirror, continuing without it"),
    }
}
