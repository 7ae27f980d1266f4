//! Metadata extraction and grounded answer generation over a tagged
//! provider (OpenAI/Gemini/Ollama). Both operations collect a single
//! complete response rather than streaming, since neither caller needs
//! incremental tokens.

mod gemini;
mod ollama;
mod openai;

pub use gemini::GeminiProvider;
pub use ollama::OllamaLlmProvider;
pub use openai::OpenAiProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub const METADATA_INPUT_CHAR_LIMIT: usize = 4000;
pub const FIELD_CHAR_LIMIT: usize = 500;
pub const MAX_SUGGESTED_TAGS: usize = 10;
pub const MAX_HISTORY_TURNS: usize = 10;
pub const ANSWER_TEMPERATURE: f32 = 0.3;
pub const ANSWER_MAX_TOKENS: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedMetadata {
    pub title: String,
    pub correspondent: String,
    pub document_date: Option<String>,
    pub document_type: String,
    pub summary: String,
    #[serde(default)]
    pub suggested_tags: Vec<String>,
}

impl ExtractedMetadata {
    /// Returned on any parse failure — errors never propagate out of
    /// metadata extraction.
    pub fn empty() -> Self {
        Self {
            title: "Unknown".to_string(),
            correspondent: "Unknown".to_string(),
            document_date: None,
            document_type: "Unknown".to_string(),
            summary: "Unknown".to_string(),
            suggested_tags: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConversationTurn {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct ContextChunk {
    pub document_title: String,
    pub chunk_text: String,
}

pub const NO_EVIDENCE_ANSWER: &str =
    "I couldn't find any relevant information in your documents to answer this question.";
pub const PROVIDER_FAILURE_ANSWER: &str =
    "I'm unable to generate an answer right now due to a provider error. Please try again shortly.";

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Never raises: a malformed or unreachable provider yields
    /// `ExtractedMetadata::empty()`.
    async fn extract_metadata(
        &self,
        text: &str,
        filename: Option<&str>,
        existing_tags: &[String],
    ) -> ExtractedMetadata;

    /// Any provider failure yields `PROVIDER_FAILURE_ANSWER` rather than
    /// propagating — the caller still has `sources`/`chunks_used` to show.
    async fn generate_answer(
        &self,
        question: &str,
        chunks: &[ContextChunk],
        history: &[ConversationTurn],
    ) -> String;
}

/// Strips Markdown code fences (```json ... ``` or ``` ... ```) before
/// parsing, the way every provider's raw completion text needs sanitizing.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let without_leading = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_leading.strip_suffix("```").unwrap_or(without_leading).trim()
}

pub fn parse_metadata_response(raw: &str) -> ExtractedMetadata {
    let cleaned = strip_code_fences(raw);
    match serde_json::from_str::<ExtractedMetadata>(cleaned) {
        Ok(mut meta) => {
            meta.title.truncate(FIELD_CHAR_LIMIT);
            meta.correspondent.truncate(FIELD_CHAR_LIMIT);
            meta.document_type.truncate(FIELD_CHAR_LIMIT);
            meta.summary.truncate(FIELD_CHAR_LIMIT);
            meta.suggested_tags.truncate(MAX_SUGGESTED_TAGS);
            meta
        }
        Err(_) => ExtractedMetadata::empty(),
    }
}

pub fn truncate_input(text: &str, limit: usize) -> &str {
    if text.len() <= limit {
        text
    } else {
        let mut end = limit;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        &text[..end]
    }
}

pub fn build_metadata_prompt(text: &str, filename: Option<&str>, existing_tags: &[String]) -> String {
    let truncated = truncate_input(text, METADATA_INPUT_CHAR_LIMIT);
    let filename_hint = filename
        .map(|f| format!("Original filename: {f}\n"))
        .unwrap_or_default();
    let tags_hint = if existing_tags.is_empty() {
        String::new()
    } else {
        format!(
            "Existing tags (prefer these when truly applicable): {}\n",
            existing_tags.join(", ")
        )
    };

    format!(
        "You extract structured metadata from a document. Return ONLY JSON matching:\n\
         {{\"title\": string, \"correspondent\": string, \"document_date\": \"YYYY-MM-DD\" or null, \
         \"document_type\": string, \"summary\": string, \"suggested_tags\": [string]}}\n\
         Use \"Unknown\" where a field cannot be determined. suggested_tags has at most {MAX_SUGGESTED_TAGS} entries.\n\
         {filename_hint}{tags_hint}\n\
         Document content:\n{truncated}"
    )
}

pub fn build_answer_prompt(question: &str, chunks: &[ContextChunk]) -> String {
    let context = chunks
        .iter()
        .enumerate()
        .map(|(i, c)| format!("Document excerpt {}: ({})\n{}", i + 1, c.document_title, c.chunk_text))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "Answer the question using ONLY the document excerpts below. If the excerpts do not \
         contain the answer, say so explicitly — never answer from outside knowledge.\n\n\
         {context}\n\nQuestion: {question}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_json_fence() {
        let raw = "```json\n{\"title\": \"x\"}\n```";
        assert_eq!(strip_code_fences(raw), "{\"title\": \"x\"}");
    }

    #[test]
    fn malformed_json_yields_empty_metadata() {
        let meta = parse_metadata_response("not json at all");
        assert_eq!(meta.title, "Unknown");
        assert!(meta.suggested_tags.is_empty());
    }

    #[test]
    fn tags_are_capped_at_ten() {
        let tags: Vec<String> = (0..20).map(|i| format!("tag{i}")).collect();
        let raw = serde_json::json!({
            "title": "t", "correspondent": "c", "document_date": null,
            "document_type": "d", "summary": "s", "suggested_tags": tags,
        })
        .to_string();
        let meta = parse_metadata_response(&raw);
        assert_eq!(meta.suggested_tags.len(), MAX_SUGGESTED_TAGS);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let text = "é".repeat(10);
        let truncated = truncate_input(&text, 3);
        assert!(truncated.len() <= 3);
    }
}
