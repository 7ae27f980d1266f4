//! Retrieval-augmented answer generation: retrieve relevant chunks, assemble
//! them into grounded context, and call the LLM provider for a final
//! answer. No session persistence or conversation-manager state lives here;
//! callers pass whatever trailing history they already hold.

use crate::access::AccessContext;
use crate::error::CoreResult;
use crate::llm::{ContextChunk, ConversationTurn, LlmProvider, MAX_HISTORY_TURNS, NO_EVIDENCE_ANSWER};
use crate::retrieval::{RetrievalEngine, DEFAULT_SEMANTIC_THRESHOLD};
use serde::Serialize;

pub const DEFAULT_NUM_CHUNKS: usize = 5;
pub const MIN_NUM_CHUNKS: usize = 1;
pub const MAX_NUM_CHUNKS: usize = 20;

#[derive(Debug, Clone)]
pub struct AskRequest<'a> {
    pub question: &'a str,
    pub history: &'a [ConversationTurn],
    pub num_chunks: usize,
    pub threshold: f32,
}

impl<'a> AskRequest<'a> {
    pub fn new(question: &'a str) -> Self {
        Self {
            question,
            history: &[],
            num_chunks: DEFAULT_NUM_CHUNKS,
            threshold: DEFAULT_SEMANTIC_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceDocument {
    pub document_id: i64,
    pub title: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AskResponse {
    pub answer: String,
    pub sources: Vec<SourceDocument>,
    pub chunks_used: Vec<String>,
}

pub struct RagAnswerer<'a> {
    retrieval: &'a RetrievalEngine<'a>,
    llm: &'a dyn LlmProvider,
}

impl<'a> RagAnswerer<'a> {
    pub fn new(retrieval: &'a RetrievalEngine<'a>, llm: &'a dyn LlmProvider) -> Self {
        Self { retrieval, llm }
    }

    /// Runs semantic retrieval; on empty results returns the fixed
    /// no-evidence sentence without calling the LLM. Otherwise assembles up
    /// to `num_chunks` distinct (chunk, document) pairs, dedupes sources by
    /// document id while preserving first-seen chunks, and calls
    /// `generate_answer` with the last [`MAX_HISTORY_TURNS`] history turns.
    pub async fn ask(&self, ctx: &AccessContext, request: AskRequest<'_>) -> CoreResult<AskResponse> {
        let num_chunks = request.num_chunks.clamp(MIN_NUM_CHUNKS, MAX_NUM_CHUNKS);

        let results = self
            .retrieval
            .semantic(ctx, request.question, request.threshold, num_chunks as i64)
            .await?;

        if results.is_empty() {
            return Ok(AskResponse {
                answer: NO_EVIDENCE_ANSWER.to_string(),
                sources: Vec::new(),
                chunks_used: Vec::new(),
            });
        }

        let mut sources = Vec::new();
        let mut seen_documents = std::collections::HashSet::new();
        let mut context_chunks = Vec::new();
        let mut chunks_used = Vec::new();

        for result in results.into_iter().take(num_chunks) {
            let chunk_text = result.matched_chunk.unwrap_or_default();
            if seen_documents.insert(result.document.id) {
                sources.push(SourceDocument {
                    document_id: result.document.id,
                    title: result.document.title.clone(),
                });
            }
            context_chunks.push(ContextChunk {
                document_title: result.document.title.clone(),
                chunk_text: chunk_text.clone(),
            });
            chunks_used.push(chunk_text);
        }

        let recent_history: Vec<ConversationTurn> = request
            .history
            .iter()
            .rev()
            .take(MAX_HISTORY_TURNS)
            .rev()
            .cloned()
            .collect();

        let answer = self.llm.generate_answer(request.question, &context_chunks, &recent_history).await;

        Ok(AskResponse { answer, sources, chunks_used })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn num_chunks_clamps_to_bounds() {
        let request = AskRequest { question: "q", history: &[], num_chunks: 50, threshold: 0.3 };
        assert_eq!(request.num_chunks.clamp(MIN_NUM_CHUNKS, MAX_NUM_CHUNKS), MAX_NUM_CHUNKS);
        let request = AskRequest { question: "q", history: &[], num_chunks: 0, threshold: 0.3 };
        assert_eq!(request.num_chunks.clamp(MIN_NUM_CHUNKS, MAX_NUM_CHUNKS), MIN_NUM_CHUNKS);
    }
}
