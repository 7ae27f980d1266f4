//! OpenAI-shaped chat-completions provider, collecting the full
//! (non-streamed) response since callers only need a final string.

use super::{
    build_answer_prompt, build_metadata_prompt, parse_metadata_response, ConversationTurn,
    ContextChunk, ExtractedMetadata, LlmProvider, ANSWER_MAX_TOKENS, ANSWER_TEMPERATURE,
    MAX_HISTORY_TURNS, PROVIDER_FAILURE_ANSWER,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Serialize, Clone)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: usize,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiProvider {
    pub fn new(base_url: String, api_key: Option<String>, model: String) -> Self {
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

    async fn complete(&self, messages: Vec<ChatMessage>, temperature: f32, max_tokens: usize) -> Option<String> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature,
            max_tokens,
            stream: false,
        };

        let mut builder = self.client.post(&url);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }

        let response = match builder.json(&request).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "llm completion request failed");
                return None;
            }
        };

        if !response.status().is_success() {
            warn!(status = %response.status(), "llm completion returned error status");
            return None;
        }

        match response.json::<ChatResponse>().await {
            Ok(parsed) => parsed.choices.into_iter().next().map(|c| c.message.content),
            Err(e) => {
                warn!(error = %e, "invalid llm completion response");
                None
            }
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn extract_metadata(
        &self,
        text: &str,
        filename: Option<&str>,
        existing_tags: &[String],
    ) -> ExtractedMetadata {
        let prompt = build_metadata_prompt(text, filename, existing_tags);
        let messages = vec![ChatMessage { role: "user".to_string(), content: prompt }];
        match self.complete(messages, 0.0, 1024).await {
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
        let mut messages: Vec<ChatMessage> = history
            .iter()
            .rev()
            .take(MAX_HISTORY_TURNS)
            .rev()
            .map(|t| ChatMessage { role: t.role.clone(), content: t.content.clone() })
            .collect();
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: build_answer_prompt(question, chunks),
        });

        match self.complete(messages, ANSWER_TEMPERATURE, ANSWER_MAX_TOKENS).await {
            Some(answer) => answer,
            None => PROVIDER_FAILURE_ANSWER.to_string(),
        }
    }
}
