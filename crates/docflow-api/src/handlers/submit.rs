//! Upload entry point: calls the same `ingest_document` helper the
//! directory/IMAP ingest sources use, so dedup-by-checksum and image
//! normalization behave identically regardless of origin.

use axum::{extract::Multipart, extract::State, Json};
use serde::Serialize;
use tracing::info;

use crate::auth::Identity;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub document_id: i64,
    pub processing_status: String,
}

pub async fn submit_handler(
    State(state): State<AppState>,
    Identity(ctx): Identity,
    mut multipart: Multipart,
) -> Result<Json<SubmitResponse>, ApiError> {
    let mut filename: Option<String> = None;
    let mut file_bytes: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::InvalidInput(format!("failed to read multipart field: {e}")))?
    {
        if field.name() == Some("file") {
            filename = field.file_name().map(str::to_string);
            file_bytes = Some(
                field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::InvalidInput(format!("failed to read file bytes: {e}")))?
                    .to_vec(),
            );
        }
    }

    let filename = filename.ok_or_else(|| ApiError::InvalidInput("file field required".to_string()))?;
    let file_bytes = file_bytes.ok_or_else(|| ApiError::InvalidInput("file field required".to_string()))?;

    info!(user_id = ctx.user_id, filename = %filename, "upload received");

    let orchestrator = state.orchestrator();
    let document = docflow_core::orchestrator::ingest_document(
        &state.repository,
        &state.blob_store,
        &orchestrator,
        ctx.user_id,
        Some(ctx.user_id),
        &filename,
        &file_bytes,
    )
    .await?;

    Ok(Json(SubmitResponse {
        document_id: document.id,
        processing_status: document.processing_status.as_str().to_string(),
    }))
}
