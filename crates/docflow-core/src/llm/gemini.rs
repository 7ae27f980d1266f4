//! Gemini-shaped provider, using Gemini's own `generateContent`
//! request/response envelope rather than its OpenAI-compatible endpoint,
//! since no streaming is required here.

use super::{
    build_answer_prompt, build_metadata_prompt, parse_metadata_response, ConversationTurn,
    ContextChunk, ExtractedMetadata, LlmProvider, ANSWER_TEMPERATURE, MAX_HISTORY_TURNS,
    PROVIDER_FAILURE_ANSWER,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: usize,
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiResponseContent,
}

#[derive(Debug, Deserialize)]
struct GeminiResponseContent {
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponsePart {
    text: String,
}

pub struct GeminiProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl GeminiProvider {
    pub fn new(base_url: String, api_key: String, model: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url,
            api_key,
            model,
        }
    }

    async fn complete(&self, contents: Vec<GeminiContent>, temperature: f32, max_tokens: usize) -> Option<String> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );
        let request = GenerateContentRequest {
            contents,
            generation_config: GenerationConfig { temperature, max_output_tokens: max_tokens },
        };

        let response = match self.client.post(&url).json(&request).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "gemini generateContent request failed");
                return None;
            }
        };

        if !response.status().is_success() {
            warn!(status = %response.status(), "gemini generateContent returned error status");
            return None;
        }

        match response.json::<GenerateContentResponse>().await {
            Ok(parsed) => parsed
                .candidates
                .into_iter()
                .next()
                .and_then(|c| c.content.parts.into_iter().next())
                .map(|p| p.text),
            Err(e) => {
                warn!(error = %e, "invalid gemini response");
                None
            }
        }
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    async fn extract_metadata(
        &self,
        text: &str,
        filename: Option<&str>,
        existing_tags: &[String],
    ) -> ExtractedMetadata {
        let prompt = build_metadata_prompt(text, filename, existing_tags);
        let contents = vec![GeminiContent {
            role: "user".to_string(),
            parts: vec![GeminiPart { text: prompt }],
        }];
        match self.complete(contents, 0.0, 1024).await {
            Some(raw) => parse_metadata_response(&raw),
            None => ExtractedMetadata::empty(),
        }
    }

    async fn generate_answer(
        &self,
        question: &str,
        chunks: &[ContextChunk],
        history: &[ConversationTurn],
    ) -> String {
        let mut contents: Vec<GeminiContent> = history
            .iter()
            .rev()
            .take(MAX_HISTORY_TURNS)
            .rev()
            .map(|t| GeminiContent {
                role: if t.role == "assistant" { "model".to_string() } else { "user".to_string() },
                parts: vec![GeminiPart { text: t.content.clone() }],
            })
            .collect();
        contents.push(GeminiContent {
            role: "user".to_string(),
            parts: vec![GeminiPart { text: build_answer_prompt(question, chunks) }],
        });

        match self.complete(contents, ANSWER_TEMPERATURE, super::ANSWER_MAX_TOKENS).await {
            Some(answer) => answer,
            None => PROVIDER_FAILURE_ANSWER.to_string(),
        }
    }
}
