use docflow_core::blob::BlobStore;
use docflow_core::config::Settings;
use docflow_core::db::Repository;
use docflow_core::embedding::EmbeddingProvider;
use docflow_core::event_bus::EventBus;
use docflow_core::extractor::TextExtractor;
use docflow_core::llm::LlmProvider;
use docflow_core::orchestrator::Orchestrator;
use docflow_core::queue::JobQueue;
use docflow_core::retrieval::RetrievalEngine;
use std::sync::Arc;

/// Everything a handler needs to build a per-request [`Orchestrator`],
/// [`RetrievalEngine`], or `RagAnswerer` against the shared pool and
/// provider singletons. Nothing here is a global session — it's a scoped
/// handle cloned per request.
#[derive(Clone)]
pub struct AppState {
    pub repository: Arc<Repository>,
    pub blob_store: Arc<BlobStore>,
    pub extractor: Arc<TextExtractor>,
    pub embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    pub llm_provider: Option<Arc<dyn LlmProvider>>,
    pub queue: Arc<JobQueue>,
    pub event_bus: Arc<EventBus>,
    pub configured_dimension: usize,
}

impl AppState {
    pub fn orchestrator(&self) -> Orchestrator<'_> {
        Orchestrator::new(
            &self.repository,
            &self.blob_store,
            &self.extractor,
            self.embedding_provider.as_deref(),
            self.llm_provider.as_deref(),
            &self.queue,
            &self.event_bus,
            self.configured_dimension,
        )
    }

    pub fn retrieval(&self) -> Option<RetrievalEngine<'_>> {
        self.embedding_provider
            .as_deref()
            .map(|provider| RetrievalEngine::new(&self.repository, provider))
    }
}
