//! Maps `docflow_core::CoreError`'s abstract taxonomy onto HTTP status
//! codes. A small `thiserror` enum with a matching `IntoResponse` impl.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use docflow_core::CoreError;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate document")]
    Duplicate { existing_document_id: i64 },

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("provider error: {0}")]
    ProviderTransient(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound(msg) => ApiError::NotFound(msg),
            CoreError::Duplicate { existing_document_id } => ApiError::Duplicate { existing_document_id },
            CoreError::Unauthenticated(msg) => ApiError::Unauthenticated(msg),
            CoreError::PermissionDenied(msg) => ApiError::PermissionDenied(msg),
            CoreError::InvalidInput(msg) => ApiError::InvalidInput(msg),
            CoreError::ProviderTransient(msg) => ApiError::ProviderTransient(msg),
            CoreError::Fatal(msg) => ApiError::Internal(msg),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    document_id: Option<i64>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message, document_id) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg, None),
            ApiError::Duplicate { existing_document_id } => {
                tracing::info!(existing_document_id, "duplicate upload rejected");
                (
                    StatusCode::CONFLICT,
                    "duplicate",
                    "a document with this checksum already exists".to_string(),
                    Some(existing_document_id),
                )
            }
            ApiError::Unauthenticated(msg) => (StatusCode::UNAUTHORIZED, "unauthenticated", msg, None),
            ApiError::PermissionDenied(msg) => (StatusCode::FORBIDDEN, "permission_denied", msg, None),
            ApiError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, "invalid_input", msg, None),
            ApiError::ProviderTransient(msg) => {
                tracing::warn!(error = %msg, "provider transient failure surfaced to caller");
                (StatusCode::SERVICE_UNAVAILABLE, "provider_unavailable", msg, None)
            }
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg, None)
            }
        };

        (status, Json(ErrorBody { error, message, document_id })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_maps_to_conflict_with_existing_id() {
        let err: ApiError = CoreError::Duplicate { existing_document_id: 7 }.into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn permission_denied_maps_to_forbidden() {
        let err: ApiError = CoreError::PermissionDenied("no".into()).into();
        assert_eq!(err.into_response().status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn invalid_input_maps_to_bad_request() {
        let err: ApiError = CoreError::InvalidInput("bad".into()).into();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn fatal_maps_to_internal_server_error() {
        let err: ApiError = CoreError::Fatal("boom".into()).into();
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
