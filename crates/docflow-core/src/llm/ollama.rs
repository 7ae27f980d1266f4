//! Ollama-shaped `/api/chat` provider, same idiom as `embedding::OllamaProvider`.

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

#[derive(Debug, Serialize, Clone)]
struct OllamaMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OllamaResponseMessage {
    content: String,
}

pub struct OllamaLlmProvider {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaLlmProvider {
    pub fn new(base_url: String, model: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url,
            model,
        }
    }

    async fn complete(&self, messages: Vec<OllamaMessage>, temperature: f32) -> Option<String> {
        let url = format!("{}/api/chat", self.base_url);
        let request = OllamaChatRequest {
            model: &self.model,
            messages,
            stream: false,
            options: OllamaOptions { temperature },
        };

        let response = match self.client.post(&url).json(&request).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "ollama chat request failed");
                return None;
            }
        };

        if !response.status().is_success() {
            warn!(status = %response.status(), "ollama chat returned error status");
            return None;
        }

        match response.json::<OllamaChatResponse>().await {
            Ok(parsed) => Some(parsed.message.content),
            Err(e) => {
                warn!(error = %e, "invalid ollama chat response");
                None
            }
        }
    }
}

#[async_trait]
impl LlmProvider for OllamaLlmProvider {
    async fn extract_metadata(
        &self,
        text: &str,
        filename: Option<&str>,
        existing_tags: &[String],
    ) -> ExtractedMetadata {
        let prompt = build_metadata_prompt(text, filename, existing_tags);
        let messages = vec![OllamaMessage { role: "user".to_string(), content: prompt }];
        match self.complete(messages, 0.0).await {
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
        let mut messages: Vec<OllamaMessage> = history
            .iter()
            .rev()
            .take(MAX_HISTORY_TURNS)
            .rev()
            .map(|t| OllamaMessage { role: t.role.clone(), content: t.content.clone() })
            .collect();
        messages.push(OllamaMessage {
            role: "user".to_string(),
            content: build_answer_prompt(question, chunks),
        });

        match self.complete(messages, ANSWER_TEMPERATURE).await {
            Some(answer) => answer,
            None => PROVIDER_FAILURE_ANSWER.to_string(),
        }
    }
}
