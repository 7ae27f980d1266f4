//! Worker-local error taxonomy, kept as its own type rather than reusing
//! `docflow_core::CoreError` directly, so the binary's boundary can log and
//! report failures in its own terms.

use docflow_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("configuration error: {0}")]
    Config(#[from] anyhow::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
