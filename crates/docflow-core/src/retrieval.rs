//! Fulltext, semantic, and RRF-fused hybrid search, plus snippet
//! highlighting.

use crate::access::AccessContext;
use crate::db::Repository;
use crate::embedding::EmbeddingProvider;
use crate::error::CoreResult;
use crate::models::Document;
use pgvector::Vector;
use serde::Serialize;

pub const DEFAULT_SEMANTIC_THRESHOLD: f32 = 0.3;
pub const DEFAULT_MIN_RRF_SCORE: f32 = 0.005;
const RRF_K: f32 = 60.0;
const DEFAULT_FTS_WEIGHT: f32 = 0.5;
const DEFAULT_VECTOR_WEIGHT: f32 = 0.5;
const DEFAULT_CONTEXT_CHARS: usize = 150;
const DEFAULT_MAX_SNIPPETS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Fulltext,
    Semantic,
    Hybrid,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub document: Document,
    pub score: f32,
    pub highlights: Vec<String>,
    pub matched_chunk: Option<String>,
}

pub struct RetrievalEngine<'a> {
    repository: &'a Repository,
    embedding_provider: &'a dyn EmbeddingProvider,
}

impl<'a> RetrievalEngine<'a> {
    pub fn new(repository: &'a Repository, embedding_provider: &'a dyn EmbeddingProvider) -> Self {
        Self { repository, embedding_provider }
    }

    pub async fn count_fulltext(&self, ctx: &AccessContext, query: &str) -> CoreResult<i64> {
        self.repository.fulltext_count(ctx.user_id, ctx.is_superuser, query).await
    }

    /// Fulltext mode always carries `score=1.0` and no `matched_chunk`.
    pub async fn fulltext(
        &self,
        ctx: &AccessContext,
        query: &str,
        skip: i64,
        limit: i64,
    ) -> CoreResult<Vec<SearchResult>> {
        let docs = self
            .repository
            .fulltext_search(ctx.user_id, ctx.is_superuser, query, skip, limit)
            .await?;
        Ok(docs
            .into_iter()
            .map(|d| {
                let highlights = d
                    .ocr_text
                    .as_deref()
                    .map(|text| extract_snippets(text, query, DEFAULT_CONTEXT_CHARS, DEFAULT_MAX_SNIPPETS))
                    .unwrap_or_default();
                SearchResult { document: d, score: 1.0, highlights, matched_chunk: None }
            })
            .collect())
    }

    /// `q_vec = embed_one(query)` then a `SELECT DISTINCT ON (d.id) ...`
    /// cosine-similarity query. Increasing `threshold`
    /// never enlarges the result set; increasing `limit` never removes a
    /// previously returned document at equal threshold (both properties
    /// follow directly from the SQL shape, not from any extra filtering
    /// done here).
    pub async fn semantic(
        &self,
        ctx: &AccessContext,
        query: &str,
        threshold: f32,
        limit: i64,
    ) -> CoreResult<Vec<SearchResult>> {
        let q_vec = self.embedding_provider.embed_one(query).await?;
        let rows = self
            .repository
            .semantic_search(ctx.user_id, ctx.is_superuser, Vector::from(q_vec), threshold, limit)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(document, chunk_text, similarity)| SearchResult {
                document,
                score: similarity,
                highlights: Vec::new(),
                matched_chunk: Some(chunk_text),
            })
            .collect())
    }

    /// Runs both fulltext and semantic with `2*k` candidates, fuses ranked
    /// lists via Reciprocal Rank Fusion (`w / (60 + rank)` per list,
    /// 0-based rank), filters by `min_rrf_score`, and returns the first
    /// `limit` survivors sorted descending. The vector-side `chunk_text` is
    /// kept as the display chunk.
    pub async fn hybrid(
        &self,
        ctx: &AccessContext,
        query: &str,
        threshold: f32,
        limit: i64,
    ) -> CoreResult<Vec<SearchResult>> {
        let candidate_k = limit * 2;
        let fts = self.fulltext(ctx, query, 0, candidate_k).await?;
        let semantic = self.semantic(ctx, query, threshold, candidate_k).await?;

        let fused = reciprocal_rank_fusion(
            &fts,
            &semantic,
            DEFAULT_FTS_WEIGHT,
            DEFAULT_VECTOR_WEIGHT,
            DEFAULT_MIN_RRF_SCORE,
        );

        Ok(fused.into_iter().take(limit.max(0) as usize).collect())
    }
}

/// Exposed standalone so RRF math can be unit-tested without a live DB:
/// `score(doc) = sum over lists L containing doc at rank r of w_L / (60 + r)`,
/// with `r` 1-based (the top result in a list has rank 1).
pub fn reciprocal_rank_fusion(
    fts: &[SearchResult],
    semantic: &[SearchResult],
    fts_weight: f32,
    vector_weight: f32,
    min_score: f32,
) -> Vec<SearchResult> {
    use std::collections::HashMap;

    struct Accum {
        score: f32,
        document: Document,
        highlights: Vec<String>,
        matched_chunk: Option<String>,
    }

    let mut by_id: HashMap<i64, Accum> = HashMap::new();

    for (rank, r) in fts.iter().enumerate() {
        let contribution = fts_weight / (RRF_K + (rank + 1) as f32);
        let entry = by_id.entry(r.document.id).or_insert_with(|| Accum {
            score: 0.0,
            document: r.document.clone(),
            highlights: r.highlights.clone(),
            matched_chunk: None,
        });
        entry.score += contribution;
        if entry.highlights.is_empty() {
            entry.highlights = r.highlights.clone();
        }
    }

    for (rank, r) in semantic.iter().enumerate() {
        let contribution = vector_weight / (RRF_K + (rank + 1) as f32);
        let entry = by_id.entry(r.document.id).or_insert_with(|| Accum {
            score: 0.0,
            document: r.document.clone(),
            highlights: Vec::new(),
            matched_chunk: r.matched_chunk.clone(),
        });
        entry.score += contribution;
        // Vector-side chunk text always wins as the display chunk.
        entry.matched_chunk = r.matched_chunk.clone();
    }

    let mut results: Vec<SearchResult> = by_id
        .into_values()
        .filter(|a| a.score >= min_score)
        .map(|a| SearchResult {
            document: a.document,
            score: a.score,
            highlights: a.highlights,
            matched_chunk: a.matched_chunk,
        })
        .collect();

    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    results
}

/// Splits `query` on whitespace; for each of the first `max_snippets` terms,
/// finds the first case-insensitive occurrence in `text`, takes
/// `+-context_chars` bytes, wraps every query term (not just the triggering
/// one) in `<mark>`, and prepends/appends ellipses on truncation. Collapses
/// snippets whose match window is identical.
pub fn extract_snippets(
    text: &str,
    query: &str,
    context_chars: usize,
    max_snippets: usize,
) -> Vec<String> {
    let terms: Vec<&str> = query.split_whitespace().filter(|t| !t.is_empty()).collect();
    if terms.is_empty() || text.is_empty() {
        return Vec::new();
    }

    let text_lower = text.to_lowercase();
    let mut snippets = Vec::new();
    let mut seen_windows = std::collections::HashSet::new();

    for term in terms.iter().take(max_snippets) {
        let term_lower = term.to_lowercase();
        let Some(match_pos) = text_lower.find(&term_lower) else {
            continue;
        };

        let start = match_pos.saturating_sub(context_chars);
        let end = (match_pos + term_lower.len() + context_chars).min(text.len());
        let start = floor_char_boundary(text, start);
        let end = ceil_char_boundary(text, end);

        if !seen_windows.insert((start, end)) {
            continue;
        }

        let mut snippet = highlight_terms(text[start..end].trim(), &terms);
        if start > 0 {
            snippet = format!("...{snippet}");
        }
        if end < text.len() {
            snippet = format!("{snippet}...");
        }
        snippets.push(snippet);

        if snippets.len() >= max_snippets {
            break;
        }
    }

    snippets
}

fn highlight_terms(text: &str, terms: &[&str]) -> String {
    let mut result = text.to_string();
    for term in terms {
        if term.is_empty() {
            continue;
        }
        result = case_insensitive_wrap(&result, term, "<mark>", "</mark>");
    }
    result
}

/// Case-insensitive substring wrap that preserves the original casing of
/// the matched text.
fn case_insensitive_wrap(text: &str, term: &str, open: &str, close: &str) -> String {
    let lower_text = text.to_lowercase();
    let lower_term = term.to_lowercase();
    if lower_term.is_empty() {
        return text.to_string();
    }

    let mut result = String::new();
    let mut cursor = 0;
    while let Some(pos) = lower_text[cursor..].find(&lower_term) {
        let abs_start = cursor + pos;
        let abs_end = abs_start + lower_term.len();
        result.push_str(&text[cursor..abs_start]);
        result.push_str(open);
        result.push_str(&text[abs_start..abs_end]);
        result.push_str(close);
        cursor = abs_end;
    }
    result.push_str(&text[cursor..]);
    result
}

fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_char_boundary(text: &str, mut idx: usize) -> usize {
    while idx < text.len() && !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProcessingStatus;
    use chrono::Utc;

    fn doc(id: i64) -> Document {
        Document {
            id,
            owner_id: 1,
            uploaded_by: None,
            title: "t".into(),
            original_filename: "t.pdf".into(),
            file_path: "ab/1/t.pdf".into(),
            file_size: 0,
            mime_type: "application/pdf".into(),
            checksum: "x".into(),
            ocr_text: None,
            ocr_language: None,
            page_count: None,
            extracted_title: None,
            extracted_date: None,
            extracted_correspondent: None,
            extracted_document_type: None,
            extracted_summary: None,
            is_public: false,
            processing_status: ProcessingStatus::EmbeddingComplete,
            processing_error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn result(id: i64) -> SearchResult {
        SearchResult { document: doc(id), score: 1.0, highlights: vec![], matched_chunk: None }
    }

    #[test]
    fn snippet_highlights_all_query_terms() {
        let text = "The quick brown fox jumps over the lazy dog near the riverbank today.";
        let snippets = extract_snippets(text, "fox dog", 150, 2);
        assert_eq!(snippets.len(), 1);
        assert!(snippets[0].contains("<mark>fox</mark>"));
        assert!(snippets[0].contains("<mark>dog</mark>"));
    }

    #[test]
    fn snippet_adds_ellipsis_on_truncation() {
        let text = "x".repeat(500) + "needle" + &"y".repeat(500);
        let snippets = extract_snippets(&text, "needle", 50, 1);
        assert!(snippets[0].starts_with("..."));
        assert!(snippets[0].ends_with("..."));
    }

    #[test]
    fn rrf_combines_ranks_from_both_lists() {
        let fts = vec![result(1), result(2)];
        let semantic = vec![result(2), result(1)];
        let fused = reciprocal_rank_fusion(&fts, &semantic, 0.5, 0.5, 0.0);
        // doc 1: fts rank 1 + semantic rank 2; doc 2: fts rank 2 + semantic rank 1.
        // Symmetric, so both scores are equal.
        assert_eq!(fused.len(), 2);
        let expected = 0.5 / 61.0 + 0.5 / 62.0;
        for r in &fused {
            assert!((r.score - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn rrf_document_in_one_list_gets_only_its_term() {
        let fts = vec![result(1)];
        let semantic: Vec<SearchResult> = vec![];
        let fused = reciprocal_rank_fusion(&fts, &semantic, 0.5, 0.5, 0.0);
        assert_eq!(fused.len(), 1);
        assert!((fused[0].score - 0.5 / 61.0).abs() < 1e-6);
    }

    #[test]
    fn rrf_min_score_filters_low_scorers() {
        let fts = vec![result(1)];
        let semantic: Vec<SearchResult> = vec![];
        let fused = reciprocal_rank_fusion(&fts, &semantic, 0.01, 0.01, 0.005);
        assert!(fused.is_empty());
    }
}
