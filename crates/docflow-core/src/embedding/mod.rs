//! Unified embedding API over local/remote back-ends: an OpenAI-shaped HTTP
//! provider, an Ollama-socket provider, and a local subprocess-managed
//! `llama-server` exposing an `/embedding` endpoint over the loopback
//! interface.

mod local;
mod ollama;
mod openai_http;

pub use local::{LocalProvider, LocalProviderConfig};
pub use ollama::OllamaProvider;
pub use openai_http::HttpProvider;

use crate::error::CoreResult;
use async_trait::async_trait;

/// Known model name to dimension mapping, used when `EMBEDDING_DIMENSION`
/// is not set explicitly.
pub fn dimension_for_model(model: &str) -> Option<usize> {
    match model {
        "all-MiniLM-L6-v2" | "minilm" => Some(384),
        "mpnet" | "all-mpnet-base-v2" | "nomic-embed-text" => Some(768),
        "mxbai-embed-large" => Some(1024),
        "text-embedding-3-small" | "text-embedding-ada-002" => Some(1536),
        "text-embedding-3-large" => Some(3072),
        _ => None,
    }
}

/// The HTTP backend batches up to this many inputs per request; callers
/// chunk larger batches themselves.
pub const HTTP_BATCH_CEILING: usize = 100;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn dimension(&self) -> usize;

    /// Empty input returns the zero vector of length `dimension()`.
    async fn embed_one(&self, text: &str) -> CoreResult<Vec<f32>>;

    async fn embed_batch(&self, texts: &[String], batch_size: usize) -> CoreResult<Vec<Vec<f32>>>;
}

pub fn zero_vector(dimension: usize) -> Vec<f32> {
    vec![0.0; dimension]
}
