//! Directory watcher: one non-recursive filesystem observer per active
//! `directory` import source, reconciled every 60 s against the active
//! source set. Each create event gets a 2 s settle delay before ingest (to
//! let a slow writer finish), an extension filter, move/delete
//! post-import, and per-file error isolation so one bad file never takes
//! down the source.

use super::{apply_post_import_action, has_allowed_extension, ingest_one};
use crate::blob::BlobStore;
use crate::db::Repository;
use crate::embedding::EmbeddingProvider;
use crate::event_bus::EventBus;
use crate::extractor::TextExtractor;
use crate::llm::LlmProvider;
use crate::models::{ImportSource, ImportSourceType};
use crate::orchestrator::Orchestrator;
use crate::queue::JobQueue;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Reconciliation period: re-list active sources and start/stop observers.
const RECONCILE_INTERVAL: Duration = Duration::from_secs(60);
/// Settle delay before a newly created file is read, so writers finish
/// flushing before the checksum is computed.
const SETTLE_DELAY: Duration = Duration::from_secs(2);

struct ActiveWatch {
    _watcher: RecommendedWatcher,
    stop: tokio::sync::oneshot::Sender<()>,
}

pub struct DirectoryWatcherManager {
    repository: Arc<Repository>,
    blob_store: Arc<BlobStore>,
    extractor: Arc<TextExtractor>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    llm_provider: Option<Arc<dyn LlmProvider>>,
    queue: Arc<JobQueue>,
    event_bus: Arc<EventBus>,
    configured_dimension: usize,
}

impl DirectoryWatcherManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repository: Arc<Repository>,
        blob_store: Arc<BlobStore>,
        extractor: Arc<TextExtractor>,
        embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
        llm_provider: Option<Arc<dyn LlmProvider>>,
        queue: Arc<JobQueue>,
        event_bus: Arc<EventBus>,
        configured_dimension: usize,
    ) -> Self {
        Self {
            repository,
            blob_store,
            extractor,
            embedding_provider,
            llm_provider,
            queue,
            event_bus,
            configured_dimension,
        }
    }

    fn orchestrator(&self) -> Orchestrator<'_> {
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

    /// Runs forever, re-scanning active sources every [`RECONCILE_INTERVAL`].
    pub async fn run(self: Arc<Self>) {
        let mut watches: HashMap<i64, ActiveWatch> = HashMap::new();
        loop {
            self.reconcile(&mut watches).await;
            tokio::time::sleep(RECONCILE_INTERVAL).await;
        }
    }

    async fn reconcile(self: &Arc<Self>, watches: &mut HashMap<i64, ActiveWatch>) {
        let sources = match self.repository.list_active_sources(ImportSourceType::Directory).await {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to list active directory sources");
                return;
            }
        };

        let active_ids: HashSet<i64> = sources.iter().map(|s| s.id).collect();

        for source in sources {
            if watches.contains_key(&source.id) {
                continue;
            }
            match self.start_watch(source.clone()) {
                Ok(watch) => {
                    info!(source_id = source.id, path = ?source.watch_path, "started directory watch");
                    watches.insert(source.id, watch);
                }
                Err(e) => {
                    warn!(source_id = source.id, error = %e, "failed to start directory watch");
                    let _ = self.repository.mark_source_error(source.id, &e.to_string()).await;
                }
            }
        }

        let stale: Vec<i64> = watches.keys().copied().filter(|id| !active_ids.contains(id)).collect();
        for id in stale {
            if let Some(watch) = watches.remove(&id) {
                info!(source_id = id, "stopping directory watch for inactive source");
                let _ = watch.stop.send(());
            }
        }
    }

    fn start_watch(self: &Arc<Self>, source: ImportSource) -> crate::error::CoreResult<ActiveWatch> {
        let path = source
            .watch_path
            .clone()
            .ok_or_else(|| crate::error::CoreError::InvalidInput("source has no watch_path".into()))?;
        let watch_path = PathBuf::from(&path);
        if !watch_path.exists() {
            return Err(crate::error::CoreError::InvalidInput(format!(
                "watch path does not exist: {path}"
            )));
        }

        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Event>();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let _ = event_tx.send(event);
            }
            Err(e) => warn!(error = %e, "directory watch event error"),
        })
        .map_err(|e| crate::error::CoreError::Fatal(format!("watcher init failed: {e}")))?;

        watcher
            .watch(&watch_path, RecursiveMode::NonRecursive)
            .map_err(|e| crate::error::CoreError::Fatal(format!("watcher.watch failed: {e}")))?;

        let (stop_tx, mut stop_rx) = tokio::sync::oneshot::channel();
        let manager = Arc::clone(self);
        let source_id = source.id;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    event = event_rx.recv() => {
                        match event {
                            Some(event) => manager.handle_event(source_id, event).await,
                            None => break,
                        }
                    }
                }
            }
        });

        Ok(ActiveWatch { _watcher: watcher, stop: stop_tx })
    }

    async fn handle_event(self: &Arc<Self>, source_id: i64, event: Event) {
        if !matches!(event.kind, EventKind::Create(_)) {
            return;
        }
        for path in event.paths {
            if path.is_dir() {
                continue;
            }
            let Some(filename) = path.file_name().and_then(|n| n.to_str()) else { continue };
            if !has_allowed_extension(filename) {
                debug!(path = %path.display(), "skipping non-document file");
                continue;
            }
            let manager = Arc::clone(self);
            let path = path.clone();
            tokio::spawn(async move { manager.process_file(source_id, path).await });
        }
    }

    async fn process_file(self: Arc<Self>, source_id: i64, path: PathBuf) {
        tokio::time::sleep(SETTLE_DELAY).await;

        let result = self.import_file(source_id, &path).await;
        match result {
            Ok(()) => {
                let _ = self.repository.mark_source_ok(source_id).await;
            }
            Err(e) => {
                error!(source_id, path = %path.display(), error = %e, "directory import failed");
                let _ = self.repository.mark_source_error(source_id, &e.to_string()).await;
            }
        }
    }

    async fn import_file(&self, source_id: i64, path: &PathBuf) -> crate::error::CoreResult<()> {
        let source = self.repository.get_import_source(source_id).await?;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| crate::error::CoreError::InvalidInput("file has no name".into()))?
            .to_string();

        let bytes = tokio::fs::read(path).await?;
        let orchestrator = self.orchestrator();
        ingest_one(&self.repository, &self.blob_store, &orchestrator, source.owner_id, &filename, &bytes).await?;
        apply_post_import_action(&source, path).await;
        Ok(())
    }
}
