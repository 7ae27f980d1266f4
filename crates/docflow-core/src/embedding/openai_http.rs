use super::{EmbeddingProvider, HTTP_BATCH_CEILING};
use crate::error::{CoreError, CoreResult};
use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// OpenAI-shaped remote HTTP embedding provider: caches by input text and
/// checks every returned vector against the configured dimension.
pub struct HttpProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    dimension: usize,
    cache: DashMap<String, Vec<f32>>,
}

impl HttpProvider {
    pub fn new(base_url: String, api_key: Option<String>, model: String, dimension: usize) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url,
            api_key,
            model,
            dimension,
            cache: DashMap::new(),
        }
    }

    async fn embed_uncached(&self, inputs: &[String]) -> CoreResult<Vec<Vec<f32>>> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let request = EmbeddingRequest { input: inputs, model: &self.model };

        let mut builder = self.client.post(&url);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }

        let response = builder
            .json(&request)
            .send()
            .await
            .map_err(|e| CoreError::ProviderTransient(format!("embedding request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CoreError::ProviderTransient(format!(
                "embedding API error {status}: {body}"
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| CoreError::ProviderTransient(format!("invalid embedding response: {e}")))?;

        for d in &parsed.data {
            if d.embedding.len() != self.dimension {
                return Err(CoreError::InvalidInput(format!(
                    "embedding dimension mismatch: expected {}, got {}",
                    self.dimension,
                    d.embedding.len()
                )));
            }
        }

        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for HttpProvider {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_one(&self, text: &str) -> CoreResult<Vec<f32>> {
        if text.is_empty() {
            return Ok(super::zero_vector(self.dimension));
        }
        if let Some(cached) = self.cache.get(text) {
            debug!("embedding cache hit");
            return Ok(cached.clone());
        }
        let mut result = self.embed_uncached(&[text.to_string()]).await?;
        let vector = result.pop().ok_or_else(|| {
            CoreError::ProviderTransient("embedding API returned no vectors".to_string())
        })?;
        self.cache.insert(text.to_string(), vector.clone());
        Ok(vector)
    }

    async fn embed_batch(&self, texts: &[String], batch_size: usize) -> CoreResult<Vec<Vec<f32>>> {
        let batch_size = batch_size.min(HTTP_BATCH_CEILING).max(1);
        let mut results = Vec::with_capacity(texts.len());
        for batch in texts.chunks(batch_size) {
            let uncached: Vec<String> = batch
                .iter()
                .filter(|t| !t.is_empty() && !self.cache.contains_key(t.as_str()))
                .cloned()
                .collect();
            if !uncached.is_empty() {
                let vectors = self.embed_uncached(&uncached).await?;
                for (text, vector) in uncached.into_iter().zip(vectors.into_iter()) {
                    self.cache.insert(text, vector);
                }
            }
            for text in batch {
                if text.is_empty() {
                    results.push(super::zero_vector(self.dimension));
                } else {
                    let cached = self
                        .cache
                        .get(text)
                        .map(|v| v.clone())
                        .ok_or_else(|| CoreError::Fatal("embedding cache miss after fetch".into()))?;
                    results.push(cached);
                }
            }
        }
        Ok(results)
    }
}
