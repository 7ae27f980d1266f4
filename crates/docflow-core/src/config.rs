//! Layered settings: a `config/settings.toml` file overridden by `APP__`
//! prefixed environment variables, shared by `docflow-worker` and
//! `docflow-api`.

use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub chunking: ChunkingConfig,
    pub llm: LlmConfig,
    pub ocr: OcrConfig,
    pub queue: QueueConfig,
    pub redis: RedisConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_max_size: u32,
    pub pool_timeout_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    Local,
    S3,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    pub storage_type: StorageType,
    pub local_storage_path: std::path::PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    Local,
    Openai,
    Ollama,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    pub enabled: bool,
    pub provider: EmbeddingProviderKind,
    pub model: String,
    pub dimension: usize,
    pub base_url: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub overlap: usize,
}

fn default_chunk_size() -> usize {
    500
}

fn default_chunk_overlap() -> usize {
    50
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_chunk_overlap(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProviderKind {
    Openai,
    Gemini,
    Ollama,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    pub enabled: bool,
    pub provider: LlmProviderKind,
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OcrProviderKind {
    Auto,
    Paddleocr,
    Easyocr,
    VisionLlm,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OcrConfig {
    pub enabled: bool,
    pub provider: OcrProviderKind,
    #[serde(default = "default_ocr_languages")]
    pub languages: Vec<String>,
    #[serde(default)]
    pub use_gpu: bool,
}

fn default_ocr_languages() -> Vec<String> {
    vec!["en".to_string()]
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    pub broker_url: String,
    pub result_backend_url: Option<String>,
    #[serde(default = "default_soft_deadline")]
    pub soft_deadline_minutes: u64,
    #[serde(default = "default_hard_deadline")]
    pub hard_deadline_minutes: u64,
}

fn default_soft_deadline() -> u64 {
    25
}

fn default_hard_deadline() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisConfig {
    pub url: String,
    #[serde(default = "default_events_channel")]
    pub events_channel: String,
}

fn default_events_channel() -> String {
    "events".to_string()
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct IngestConfig {
    #[serde(default = "default_reconcile_seconds")]
    pub reconcile_interval_seconds: u64,
}

fn default_reconcile_seconds() -> u64 {
    60
}

impl Settings {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(File::with_name("config/settings").required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        Ok(settings)
    }
}
