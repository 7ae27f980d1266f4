//! `fulltext`/`semantic`/`hybrid` retrieval. The fulltext branch goes
//! straight at `Repository::fulltext_search` since it has no dependency on
//! an embedding provider; semantic/hybrid go through `RetrievalEngine`,
//! which does.

use axum::{
    extract::{Query, State},
    Json,
};
use docflow_core::retrieval::{self, RetrievalEngine, DEFAULT_SEMANTIC_THRESHOLD};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::auth::Identity;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Fulltext,
    Semantic,
    Hybrid,
}

impl Default for SearchMode {
    fn default() -> Self {
        SearchMode::Hybrid
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    #[serde(default)]
    pub mode: SearchMode,
    pub skip: Option<i64>,
    pub limit: Option<i64>,
    pub threshold: Option<f32>,
}

#[derive(Debug, Serialize)]
pub struct SearchResultDto {
    pub document_id: i64,
    pub title: String,
    pub processing_status: String,
    pub score: f32,
    pub highlights: Vec<String>,
    pub matched_chunk: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub total: usize,
    pub results: Vec<SearchResultDto>,
}

impl From<retrieval::SearchResult> for SearchResultDto {
    fn from(r: retrieval::SearchResult) -> Self {
        SearchResultDto {
            document_id: r.document.id,
            title: r.document.title,
            processing_status: r.document.processing_status.as_str().to_string(),
            score: r.score,
            highlights: r.highlights,
            matched_chunk: r.matched_chunk,
        }
    }
}

pub async fn search_handler(
    State(state): State<AppState>,
    Identity(ctx): Identity,
    Query(params): Query<SearchQuery>,
) -> Result<Json<SearchResponse>, ApiError> {
    let skip = params.skip.unwrap_or(0).max(0);
    let limit = params.limit.unwrap_or(20).clamp(1, 100);
    let threshold = params.threshold.unwrap_or(DEFAULT_SEMANTIC_THRESHOLD);

    info!(user_id = ctx.user_id, query = %params.q, mode = ?params.mode, "search request");

    let results = match params.mode {
        SearchMode::Fulltext => {
            let docs = state
                .repository
                .fulltext_search(ctx.user_id, ctx.is_superuser, &params.q, skip, limit)
                .await?;
            docs.into_iter()
                .map(|d| {
                    let highlights = d
                        .ocr_text
                        .as_deref()
                        .map(|text| retrieval::extract_snippets(text, &params.q, 150, 2))
                        .unwrap_or_default();
                    retrieval::SearchResult { document: d, score: 1.0, highlights, matched_chunk: None }
                })
                .collect::<Vec<_>>()
        }
        SearchMode::Semantic => {
            let engine = semantic_engine(&state)?;
            engine.semantic(&ctx, &params.q, threshold, limit).await?
        }
        SearchMode::Hybrid => {
            let engine = semantic_engine(&state)?;
            engine.hybrid(&ctx, &params.q, threshold, limit).await?
        }
    };

    let results: Vec<SearchResultDto> = results.into_iter().map(Into::into).collect();
    Ok(Json(SearchResponse { total: results.len(), results }))
}

fn semantic_engine(state: &AppState) -> Result<RetrievalEngine<'_>, ApiError> {
    state
        .retrieval()
        .ok_or_else(|| ApiError::InvalidInput("embeddings are disabled on this server".to_string()))
}
