use thiserror::Error;

/// Abstract error taxonomy shared by every stage of the pipeline.
///
/// Binaries map this onto their own surface error type (`ApiError` in
/// docflow-api, `WorkerError` in docflow-worker) rather than matching on it
/// directly, so HTTP status codes and task-retry policy stay local to each
/// binary.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate document: {existing_document_id}")]
    Duplicate { existing_document_id: i64 },

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("provider transient failure: {0}")]
    ProviderTransient(String),

    #[error("fatal error: {0}")]
    Fatal(String),
}

impl CoreError {
    pub fn fatal(err: impl std::fmt::Display) -> Self {
        CoreError::Fatal(err.to_string())
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => CoreError::NotFound("row not found".to_string()),
            other => CoreError::Fatal(other.to_string()),
        }
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::Fatal(err.to_string())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
