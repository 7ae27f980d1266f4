use super::EmbeddingProvider;
use crate::error::{CoreError, CoreResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct OllamaEmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    embedding: Vec<f32>,
}

/// Ollama-shaped remote socket provider, aimed at `/api/embeddings`. Same
/// `reqwest`-client idiom as `HttpProvider`; no batching endpoint in
/// Ollama's API, so `embed_batch` issues sequential calls.
pub struct OllamaProvider {
    client: Client,
    base_url: String,
    model: String,
    dimension: usize,
}

impl OllamaProvider {
    pub fn new(base_url: String, model: String, dimension: usize) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url,
            model,
            dimension,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_one(&self, text: &str) -> CoreResult<Vec<f32>> {
        if text.is_empty() {
            return Ok(super::zero_vector(self.dimension));
        }
        let url = format!("{}/api/embeddings", self.base_url);
        let request = OllamaEmbedRequest { model: &self.model, prompt: text };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| CoreError::ProviderTransient(format!("ollama embed request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(CoreError::ProviderTransient(format!("ollama embed error: {status}")));
        }

        let parsed: OllamaEmbedResponse = response
            .json()
            .await
            .map_err(|e| CoreError::ProviderTransient(format!("invalid ollama response: {e}")))?;

        if parsed.embedding.len() != self.dimension {
            return Err(CoreError::InvalidInput(format!(
                "embedding dimension mismatch: expected {}, got {}",
                self.dimension,
                parsed.embedding.len()
            )));
        }
        Ok(parsed.embedding)
    }

    async fn embed_batch(&self, texts: &[String], _batch_size: usize) -> CoreResult<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed_one(text).await?);
        }
        Ok(results)
    }
}
