//! Binary entrypoint: load config, connect the pool, wire provider
//! singletons, and serve `submit`/`search`/`ask`/`health` behind axum.
//! Registration/login/OIDC/IP-whitelist/header-signature concerns belong to
//! an upstream auth layer, not this binary — see [`docflow_api::auth`].

use anyhow::Result;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use docflow_api::handlers;
use docflow_api::state::AppState;
use docflow_core::blob::BlobStore;
use docflow_core::config::Settings;
use docflow_core::db::{DbPool, Repository};
use docflow_core::event_bus::EventBus;
use docflow_core::extractor::TextExtractor;
use docflow_core::logging;
use docflow_core::provider_factory::{build_embedding_provider, build_llm_provider, build_ocr_engine};
use docflow_core::queue::JobQueue;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logger("docflow-api")?;
    info!("starting docflow-api");

    let settings = Settings::load()?;
    let db_pool = DbPool::connect(&settings.database.url, settings.database.pool_max_size).await?;
    info!("database connection established");

    let repository = Arc::new(Repository::new(db_pool.clone()));
    let blob_store = Arc::new(BlobStore::new(settings.storage.local_storage_path.clone()));
    let event_bus = Arc::new(EventBus::new(256));
    let queue = Arc::new(JobQueue::new(
        db_pool.get_pool().clone(),
        settings.queue.soft_deadline_minutes,
        settings.queue.hard_deadline_minutes,
    ));

    let ocr_engine = build_ocr_engine(&settings).await;
    let extractor = Arc::new(TextExtractor::new(ocr_engine, settings.ocr.enabled));
    let mut embedding_provider = build_embedding_provider(&settings);
    let llm_provider = build_llm_provider(&settings);

    // A dimension mismatch refuses to run embedding jobs; it never takes the
    // whole server down — uploads and the OCR stage must keep working (see
    // also docflow-worker's main.rs, which applies the same check before
    // driving the queue).
    if let Some(provider) = &embedding_provider {
        if provider.dimension() != settings.embedding.dimension {
            tracing::error!(
                configured = settings.embedding.dimension,
                provider = provider.dimension(),
                "embedding dimension mismatch between config and provider, disabling embeddings on this server"
            );
            embedding_provider = None;
        }
    }
    if let Some(provider) = &embedding_provider {
        match repository.stored_embedding_dimension().await {
            Ok(Some(stored)) if stored as usize != provider.dimension() => {
                tracing::error!(
                    configured = provider.dimension(),
                    stored,
                    "embedding dimension mismatch against the stored document_chunks column, disabling embeddings on this server"
                );
                embedding_provider = None;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "could not read the stored embedding dimension, proceeding without the check")
            }
        }
    }

    let state = AppState {
        repository,
        blob_store,
        extractor,
        embedding_provider,
        llm_provider,
        queue,
        event_bus,
        configured_dimension: settings.embedding.dimension,
    };

    let app = build_router(state);

    let host = std::env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = std::env::var("API_PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(8080);
    let addr = SocketAddr::from((host.parse::<std::net::IpAddr>()?, port));

    info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/health/ready", get(handlers::health::readiness_check))
        .route("/api/documents", post(handlers::submit::submit_handler))
        .route("/api/search", get(handlers::search::search_handler))
        .route("/api/ask", post(handlers::ask::ask_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default().include_headers(true)))
        .layer(DefaultBodyLimit::max(100 * 1024 * 1024))
}
