//! Local in-process provider: manages a `llama-server` subprocess exposing an
//! `/embedding` endpoint, started lazily on first use and kept alive for
//! subsequent calls.

use super::EmbeddingProvider;
use crate::error::{CoreError, CoreResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use sysinfo::System;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

#[derive(Debug, Serialize)]
struct LlamaEmbeddingRequest<'a> {
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct LlamaEmbeddingResponse {
    embedding: Vec<f32>,
}

pub struct LocalProviderConfig {
    pub binary_path: PathBuf,
    pub model_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub startup_timeout_seconds: u64,
    pub ctx_size: u32,
    pub threads: i32,
    pub dimension: usize,
}

struct ManagedProcess {
    process: Option<Child>,
}

impl Drop for ManagedProcess {
    fn drop(&mut self) {
        if let Some(mut child) = self.process.take() {
            let _ = child.kill();
        }
    }
}

pub struct LocalProvider {
    config: LocalProviderConfig,
    client: Client,
    base_url: String,
    process: Mutex<ManagedProcess>,
}

impl LocalProvider {
    pub fn new(config: LocalProviderConfig) -> Self {
        let base_url = format!("http://{}:{}", config.host, config.port);
        Self {
            config,
            client: Client::builder()
                .timeout(Duration::from_secs(300))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url,
            process: Mutex::new(ManagedProcess { process: None }),
        }
    }

    async fn is_running(&self) -> bool {
        self.client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn check_memory(&self) -> CoreResult<()> {
        let mut sys = System::new_all();
        sys.refresh_memory();
        let available_mb = sys.available_memory() / 1024 / 1024;
        if available_mb < 2048 {
            return Err(CoreError::ProviderTransient(
                "not enough memory to start the local embedding server (< 2GB available)".into(),
            ));
        }
        Ok(())
    }

    /// Starts the subprocess if it isn't already running. Called lazily
    /// from `embed_one`/`embed_batch` rather than at construction time.
    async fn ensure_started(&self) -> CoreResult<()> {
        if self.is_running().await {
            return Ok(());
        }

        self.check_memory()?;
        info!("starting local embedding server");

        let mut cmd = Command::new(&self.config.binary_path);
        cmd.arg("--model")
            .arg(&self.config.model_path)
            .arg("--host")
            .arg(&self.config.host)
            .arg("--port")
            .arg(self.config.port.to_string())
            .arg("--ctx-size")
            .arg(self.config.ctx_size.to_string())
            .arg("--threads")
            .arg(self.config.threads.to_string())
            .arg("--embedding")
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let child = cmd
            .spawn()
            .map_err(|e| CoreError::Fatal(format!("failed to spawn local embedding server: {e}")))?;

        {
            let mut guard = self.process.lock().await;
            guard.process = Some(child);
        }

        let ready = timeout(
            Duration::from_secs(self.config.startup_timeout_seconds),
            self.wait_until_ready(),
        )
        .await;

        match ready {
            Ok(Ok(())) => {
                info!("local embedding server ready");
                Ok(())
            }
            _ => {
                warn!("local embedding server failed to start in time");
                Err(CoreError::ProviderTransient("local embedding server startup timeout".into()))
            }
        }
    }

    async fn wait_until_ready(&self) -> CoreResult<()> {
        for _ in 0..60 {
            if self.is_running().await {
                return Ok(());
            }
            sleep(Duration::from_secs(1)).await;
        }
        Err(CoreError::ProviderTransient("local embedding server not responding".into()))
    }

    async fn embed_text(&self, text: &str) -> CoreResult<Vec<f32>> {
        self.ensure_started().await?;
        let request = LlamaEmbeddingRequest { content: text };
        let response = self
            .client
            .post(format!("{}/embedding", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| CoreError::ProviderTransient(format!("local embed request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(CoreError::ProviderTransient(format!(
                "local embed request failed: {}",
                response.status()
            )));
        }

        let parsed: LlamaEmbeddingResponse = response
            .json()
            .await
            .map_err(|e| CoreError::ProviderTransient(format!("invalid local embed response: {e}")))?;
        debug!(dims = parsed.embedding.len(), "local embedding produced");
        Ok(parsed.embedding)
    }
}

#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn dimension(&self) -> usize {
        self.config.dimension
    }

    async fn embed_one(&self, text: &str) -> CoreResult<Vec<f32>> {
        if text.is_empty() {
            return Ok(super::zero_vector(self.config.dimension));
        }
        self.embed_text(text).await
    }

    async fn embed_batch(&self, texts: &[String], _batch_size: usize) -> CoreResult<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed_one(text).await?);
        }
        Ok(results)
    }
}
