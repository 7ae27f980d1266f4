//! The pipeline state machine wiring extraction -> embed -> metadata, each
//! stage committing its own status transition before enqueuing the next.

use crate::chunker;
use crate::db::repository::NewDocument;
use crate::db::Repository;
use crate::embedding::EmbeddingProvider;
use crate::error::{CoreError, CoreResult};
use crate::event_bus::{DocumentEvent, EventBus};
use crate::extractor::TextExtractor;
use crate::llm::LlmProvider;
use crate::models::{Document, ProcessingStatus};
use crate::queue::{JobQueue, TaskKind};
use pgvector::Vector;
use serde::Serialize;
use std::path::Path;
use tracing::{error, info, warn};

/// Batch size `generate_embeddings` hands to `embed_batch`.
const EMBEDDING_BATCH_SIZE: usize = 8;

#[derive(Debug, Clone, Serialize)]
pub struct StageOutcome {
    pub document_id: i64,
    pub status: ProcessingStatus,
    pub chunks_created: Option<usize>,
}

pub struct Orchestrator<'a> {
    repository: &'a Repository,
    blob_root: &'a crate::blob::BlobStore,
    extractor: &'a TextExtractor,
    embedding_provider: Option<&'a dyn EmbeddingProvider>,
    llm_provider: Option<&'a dyn LlmProvider>,
    queue: &'a JobQueue,
    event_bus: &'a EventBus,
    configured_dimension: usize,
}

impl<'a> Orchestrator<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repository: &'a Repository,
        blob_root: &'a crate::blob::BlobStore,
        extractor: &'a TextExtractor,
        embedding_provider: Option<&'a dyn EmbeddingProvider>,
        llm_provider: Option<&'a dyn LlmProvider>,
        queue: &'a JobQueue,
        event_bus: &'a EventBus,
        configured_dimension: usize,
    ) -> Self {
        Self {
            repository,
            blob_root,
            extractor,
            embedding_provider,
            llm_provider,
            queue,
            event_bus,
            configured_dimension,
        }
    }

    /// Called by upload / ingest sources: persists the Document in
    /// `pending` and enqueues `process_document`. The document must already
    /// exist (created by the caller via `Repository::create_document`) —
    /// `submit` only transitions status and enqueues the first stage, since
    /// `create_document` already writes `pending`.
    pub async fn submit(&self, document_id: i64, owner_id: i32) -> CoreResult<()> {
        self.queue.enqueue(TaskKind::ProcessDocument, document_id).await?;
        self.event_bus.publish(DocumentEvent::Created { document_id, user_id: owner_id });
        Ok(())
    }

    /// Re-enters at `process_document` (the reprocess API alias).
    pub async fn reprocess(&self, document_id: i64) -> CoreResult<()> {
        self.queue.requeue(TaskKind::ProcessDocument, document_id).await?;
        Ok(())
    }

    /// Re-enters at `generate_embeddings`; rejects if `ocr_text` is empty
    /// (regenerate-embeddings API).
    pub async fn regenerate_embeddings(&self, document_id: i64) -> CoreResult<()> {
        let ocr_text = self.repository.get_ocr_text(document_id).await?;
        if ocr_text.as_deref().map(str::trim).unwrap_or("").is_empty() {
            return Err(CoreError::InvalidInput(
                "cannot regenerate embeddings: document has no extracted text".to_string(),
            ));
        }
        self.queue.requeue(TaskKind::GenerateEmbeddings, document_id).await?;
        Ok(())
    }

    async fn transition(
        &self,
        document_id: i64,
        old: ProcessingStatus,
        new: ProcessingStatus,
        error: Option<&str>,
    ) -> CoreResult<()> {
        self.repository.set_status(document_id, new, error).await?;
        self.event_bus.publish(DocumentEvent::StatusChanged {
            document_id,
            old_status: old.as_str().to_string(),
            new_status: new.as_str().to_string(),
        });
        Ok(())
    }

    /// Stage 1: extraction. Idempotent — overwrites `ocr_text` on re-run.
    pub async fn process_document(&self, document_id: i64) -> CoreResult<StageOutcome> {
        let document = self.repository.get_document(document_id).await?;
        self.transition(document.id, document.processing_status, ProcessingStatus::Processing, None).await?;

        let absolute_path = self.blob_root.absolute_path(&document.file_path);
        let outcome = self.run_extraction(&document, &absolute_path).await;

        match outcome {
            Ok(Some(text)) => {
                self.repository.set_ocr_result(document_id, &text, Some("en")).await?;
                self.transition(document.id, ProcessingStatus::Processing, ProcessingStatus::OcrComplete, None)
                    .await?;
                self.maybe_enqueue_next(document_id, ProcessingStatus::OcrComplete).await?;
                Ok(StageOutcome { document_id, status: ProcessingStatus::OcrComplete, chunks_created: None })
            }
            Ok(None) => {
                let message = "No text could be extracted";
                self.transition(document.id, ProcessingStatus::Processing, ProcessingStatus::OcrFailed, Some(message))
                    .await?;
                Ok(StageOutcome { document_id, status: ProcessingStatus::OcrFailed, chunks_created: None })
            }
            Err(e) => {
                error!(document_id, error = %e, "extraction failed");
                self.transition(
                    document.id,
                    ProcessingStatus::Processing,
                    ProcessingStatus::Failed,
                    Some(&e.to_string()),
                )
                .await?;
                Ok(StageOutcome { document_id, status: ProcessingStatus::Failed, chunks_created: None })
            }
        }
    }

    async fn run_extraction(&self, document: &Document, path: &Path) -> CoreResult<Option<String>> {
        let result = self.extractor.extract(path, false).await?;
        if let Some(page_count) = result.page_count {
            self.repository.set_page_count(document.id, page_count).await?;
        }
        Ok(result.text.filter(|t| !t.trim().is_empty()))
    }

    async fn maybe_enqueue_next(&self, document_id: i64, status: ProcessingStatus) -> CoreResult<()> {
        let embeddings_enabled = self.embedding_provider.is_some();
        let llm_enabled = self.llm_provider.is_some();

        if status == ProcessingStatus::OcrComplete && embeddings_enabled {
            self.queue.enqueue(TaskKind::GenerateEmbeddings, document_id).await?;
        } else if llm_enabled {
            self.queue.enqueue(TaskKind::ExtractMetadata, document_id).await?;
        }
        Ok(())
    }

    /// Stage 2: embedding. Re-reads `ocr_text` by direct query (avoids ORM
    /// proxy hazards on the blob), delete-then-inserts the whole chunk set
    /// in one committed transaction (the shared-resource invariant: no
    /// partial chunk set is ever visible).
    pub async fn generate_embeddings(&self, document_id: i64, chunk_size: usize, overlap: usize) -> CoreResult<StageOutcome> {
        let document = self.repository.get_document(document_id).await?;
        let Some(provider) = self.embedding_provider else {
            return Err(CoreError::InvalidInput("embedding provider not configured".into()));
        };

        self.check_dimension_invariant(provider)?;

        let result = self.run_embedding_stage(document_id, chunk_size, overlap, provider).await;
        match result {
            Ok(chunk_count) => {
                self.transition(document.id, document.processing_status, ProcessingStatus::EmbeddingComplete, None)
                    .await?;
                if self.llm_provider.is_some() {
                    self.queue.enqueue(TaskKind::ExtractMetadata, document_id).await?;
                }
                Ok(StageOutcome {
                    document_id,
                    status: ProcessingStatus::EmbeddingComplete,
                    chunks_created: Some(chunk_count),
                })
            }
            Err(e) => {
                error!(document_id, error = %e, "embedding stage failed");
                self.transition(
                    document.id,
                    document.processing_status,
                    ProcessingStatus::Failed,
                    Some(&e.to_string()),
                )
                .await?;
                Err(e)
            }
        }
    }

    async fn run_embedding_stage(
        &self,
        document_id: i64,
        chunk_size: usize,
        overlap: usize,
        provider: &dyn EmbeddingProvider,
    ) -> CoreResult<usize> {
        let text = self.repository.get_ocr_text(document_id).await?.unwrap_or_default();

        self.repository.delete_chunks(document_id).await?;

        let chunks = chunker::chunk(&text, chunk_size, overlap);
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = provider.embed_batch(&texts, EMBEDDING_BATCH_SIZE).await?;

        let model_label = format!("dimension-{}", provider.dimension());
        let rows: Vec<(i32, String, Vector, String)> = chunks
            .into_iter()
            .zip(vectors.into_iter())
            .map(|(c, v)| (c.index as i32, c.text, Vector::from(v), model_label.clone()))
            .collect();

        let count = rows.len();
        self.repository.insert_chunks(document_id, &rows).await?;
        Ok(count)
    }

    /// The dimension invariant is also checked once at process startup
    /// (before the binary ever drives this stage); this call is a cheap
    /// defense-in-depth repeat per invocation.
    fn check_dimension_invariant(&self, provider: &dyn EmbeddingProvider) -> CoreResult<()> {
        if provider.dimension() != self.configured_dimension {
            return Err(CoreError::InvalidInput(format!(
                "embedding dimension mismatch: configured {} but provider reports {}",
                self.configured_dimension,
                provider.dimension()
            )));
        }
        Ok(())
    }

    /// Stage 3: metadata extraction. Never fails the document — `extract_
    /// metadata` on the LLM provider itself never raises; only the tag
    /// upsert loop isolates per-tag failures.
    pub async fn extract_metadata(&self, document_id: i64) -> CoreResult<StageOutcome> {
        let document = self.repository.get_document(document_id).await?;
        let Some(provider) = self.llm_provider else {
            return Err(CoreError::InvalidInput("LLM provider not configured".into()));
        };

        let text = document.ocr_text.clone().unwrap_or_default();
        let existing_tags = self.repository.list_tag_names().await?;

        let metadata = provider
            .extract_metadata(&text, Some(&document.original_filename), &existing_tags)
            .await;

        info!(document_id, raw_tags = ?metadata.suggested_tags, "raw LLM tag suggestions");

        let extracted_title = (document.title == document.original_filename)
            .then(|| non_unknown(&metadata.title))
            .flatten();
        let extracted_date = non_unknown(&metadata.document_date.clone().unwrap_or_default())
            .and_then(|d| chrono::NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok());
        let extracted_correspondent = non_unknown(&metadata.correspondent);
        let extracted_document_type = non_unknown(&metadata.document_type);
        let extracted_summary = non_unknown(&metadata.summary);

        self.repository
            .apply_extracted_metadata(
                document_id,
                extracted_title.as_deref(),
                extracted_date,
                extracted_correspondent.as_deref(),
                extracted_document_type.as_deref(),
                extracted_summary.as_deref(),
            )
            .await?;

        let mut applied_tags = Vec::new();
        for raw_tag in &metadata.suggested_tags {
            match self.apply_one_tag(document_id, raw_tag).await {
                Ok(name) => applied_tags.push(name),
                Err(e) => warn!(document_id, tag = raw_tag, error = %e, "tag upsert failed, skipping"),
            }
        }
        info!(document_id, applied_tags = ?applied_tags, "applied tag subset");

        self.transition(document.id, document.processing_status, ProcessingStatus::LlmComplete, None).await?;
        Ok(StageOutcome { document_id, status: ProcessingStatus::LlmComplete, chunks_created: None })
    }

    async fn apply_one_tag(&self, document_id: i64, raw_tag: &str) -> CoreResult<String> {
        let name = raw_tag.trim().to_lowercase();
        let name: String = name.chars().take(50).collect();
        if name.is_empty() {
            return Err(CoreError::InvalidInput("empty tag name".into()));
        }
        let tag = self.repository.upsert_tag(&name, None).await?;
        self.repository.link_tag(document_id, tag.id, None, true).await?;
        Ok(tag.name)
    }
}

fn non_unknown(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("unknown") {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Upload entry point shared by the HTTP upload handler and ingest sources:
/// dedups by (owner, checksum), writes the blob (normalizing images to PDF),
/// creates the Document row, and calls `submit`.
pub async fn ingest_document(
    repository: &Repository,
    blob_store: &crate::blob::BlobStore,
    orchestrator: &Orchestrator<'_>,
    owner_id: i32,
    uploaded_by: Option<i32>,
    filename: &str,
    bytes: &[u8],
) -> CoreResult<Document> {
    let checksum = crate::blob::BlobStore::checksum(bytes).await;

    if let Some(existing) = repository.find_by_checksum(owner_id, &checksum).await? {
        return Err(CoreError::Duplicate { existing_document_id: existing.id });
    }

    let doc_id_seed = uuid::Uuid::new_v4().to_string();
    let put_result = blob_store.put(&doc_id_seed, filename, bytes).await?;

    let new_doc = NewDocument {
        owner_id,
        uploaded_by,
        title: filename.to_string(),
        original_filename: filename.to_string(),
        file_path: put_result.relative_path,
        file_size: bytes.len() as i64,
        mime_type: put_result.mime_type,
        checksum,
    };
    let document = repository.create_document(new_doc).await?;

    orchestrator.submit(document.id, owner_id).await?;
    Ok(document)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_sentinel_is_filtered() {
        assert_eq!(non_unknown("Unknown"), None);
        assert_eq!(non_unknown("  "), None);
        assert_eq!(non_unknown("Acme Corp"), Some("Acme Corp".to_string()));
    }
}
