//! Retrieval-augmented question answering over the document corpus.

use axum::{extract::State, Json};
use docflow_core::llm::ConversationTurn;
use docflow_core::rag::{AskRequest, AskResponse, RagAnswerer, DEFAULT_NUM_CHUNKS};
use docflow_core::retrieval::{RetrievalEngine, DEFAULT_SEMANTIC_THRESHOLD};
use serde::Deserialize;
use tracing::info;

use crate::auth::Identity;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct HistoryTurnDto {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct AskRequestBody {
    pub question: String,
    #[serde(default)]
    pub history: Vec<HistoryTurnDto>,
    pub num_chunks: Option<usize>,
    pub threshold: Option<f32>,
}

pub async fn ask_handler(
    State(state): State<AppState>,
    Identity(ctx): Identity,
    Json(body): Json<AskRequestBody>,
) -> Result<Json<AskResponse>, ApiError> {
    if body.question.trim().is_empty() {
        return Err(ApiError::InvalidInput("question must not be empty".to_string()));
    }

    let embedding_provider = state
        .embedding_provider
        .as_deref()
        .ok_or_else(|| ApiError::InvalidInput("embeddings are disabled on this server".to_string()))?;
    let llm_provider = state
        .llm_provider
        .as_deref()
        .ok_or_else(|| ApiError::InvalidInput("the LLM provider is disabled on this server".to_string()))?;

    info!(user_id = ctx.user_id, question = %body.question, "ask request");

    let history: Vec<ConversationTurn> = body
        .history
        .into_iter()
        .map(|t| ConversationTurn { role: t.role, content: t.content })
        .collect();

    let retrieval = RetrievalEngine::new(&state.repository, embedding_provider);
    let answerer = RagAnswerer::new(&retrieval, llm_provider);

    let request = AskRequest {
        question: &body.question,
        history: &history,
        num_chunks: body.num_chunks.unwrap_or(DEFAULT_NUM_CHUNKS),
        threshold: body.threshold.unwrap_or(DEFAULT_SEMANTIC_THRESHOLD),
    };

    let response = answerer.ask(&ctx, request).await?;
    Ok(Json(response))
}
