//! Translates a loaded [`Settings`] into the provider trait objects both
//! binaries drive, shared here so `docflow-worker` and `docflow-api` wire
//! providers identically instead of duplicating the construction logic in
//! each binary.

use crate::config::{EmbeddingProviderKind, LlmProviderKind, OcrProviderKind, Settings};
use crate::embedding::{EmbeddingProvider, HttpProvider, LocalProvider, LocalProviderConfig, OllamaProvider};
use crate::extractor::OcrEngine;
use crate::llm::{GeminiProvider, LlmProvider, OllamaLlmProvider, OpenAiProvider};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

pub fn build_embedding_provider(settings: &Settings) -> Option<Arc<dyn EmbeddingProvider>> {
    if !settings.embedding.enabled {
        return None;
    }
    let cfg = &settings.embedding;
    let provider: Arc<dyn EmbeddingProvider> = match cfg.provider {
        EmbeddingProviderKind::Local => Arc::new(LocalProvider::new(LocalProviderConfig {
            binary_path: PathBuf::from(
                std::env::var("LLAMA_SERVER_BIN").unwrap_or_else(|_| "llama-server".to_string()),
            ),
            model_path: PathBuf::from(&cfg.base_url),
            host: "127.0.0.1".to_string(),
            port: 8089,
            startup_timeout_seconds: 60,
            ctx_size: 4096,
            threads: num_cpus(),
            dimension: cfg.dimension,
        })),
        EmbeddingProviderKind::Openai => {
            Arc::new(HttpProvider::new(cfg.base_url.clone(), cfg.api_key.clone(), cfg.model.clone(), cfg.dimension))
        }
        EmbeddingProviderKind::Ollama => {
            Arc::new(OllamaProvider::new(cfg.base_url.clone(), cfg.model.clone(), cfg.dimension))
        }
    };
    Some(provider)
}

pub fn build_llm_provider(settings: &Settings) -> Option<Arc<dyn LlmProvider>> {
    if !settings.llm.enabled {
        return None;
    }
    let cfg = &settings.llm;
    let base_url = cfg.base_url.clone().unwrap_or_default();
    let provider: Arc<dyn LlmProvider> = match cfg.provider {
        LlmProviderKind::Openai => Arc::new(OpenAiProvider::new(base_url, cfg.api_key.clone(), cfg.model.clone())),
        LlmProviderKind::Gemini => Arc::new(GeminiProvider::new(
            base_url,
            cfg.api_key.clone().unwrap_or_default(),
            cfg.model.clone(),
        )),
        LlmProviderKind::Ollama => Arc::new(OllamaLlmProvider::new(base_url, cfg.model.clone())),
    };
    Some(provider)
}

/// Picks an OCR engine per `auto|paddleocr|easyocr|vision-llm`: construct,
/// then [`OcrEngine::initialize`], falling back to the alternate engine on
/// failure. In `auto` mode the higher-accuracy `paddleocr` is preferred on
/// x86/AMD64 and the more portable `ocrs` on ARM; `easyocr`/`vision-llm`
/// have no native engine in this workspace and fall back to the same
/// arch-preferred order, logging why.
pub async fn build_ocr_engine(settings: &Settings) -> Option<Arc<dyn OcrEngine>> {
    if !settings.ocr.enabled {
        return None;
    }

    if !matches!(settings.ocr.provider, OcrProviderKind::Auto | OcrProviderKind::Paddleocr) {
        warn!(provider = ?settings.ocr.provider, "no native engine for this provider, falling back to a compiled one");
    }

    let prefer_paddle = match settings.ocr.provider {
        OcrProviderKind::Paddleocr => true,
        OcrProviderKind::Auto | OcrProviderKind::Easyocr | OcrProviderKind::VisionLlm => {
            !crate::extractor::is_arm()
        }
    };
    let order: [&str; 2] = if prefer_paddle { ["paddleocr", "ocrs"] } else { ["ocrs", "paddleocr"] };

    for name in order {
        if let Some(engine) = try_build_engine(name, settings).await {
            return Some(engine);
        }
    }

    warn!("OCR enabled but no OCR engine could be initialized");
    None
}

async fn try_build_engine(name: &str, settings: &Settings) -> Option<Arc<dyn OcrEngine>> {
    match name {
        #[cfg(feature = "ocr-paddle")]
        "paddleocr" => {
            let engine = crate::extractor::paddle::PaddleEngine::new();
            match engine.initialize(&settings.ocr.languages, settings.ocr.use_gpu).await {
                Ok(()) => Some(Arc::new(engine)),
                Err(e) => {
                    warn!(error = %e, "paddleocr failed to initialize, trying the alternate engine");
                    None
                }
            }
        }
        #[cfg(feature = "ocr-ocrs")]
        "ocrs" => {
            let models_dir =
                PathBuf::from(std::env::var("OCR_MODELS_DIR").unwrap_or_else(|_| "models/ocr".to_string()));
            let engine = crate::extractor::portable::OcrsEngine::new(
                models_dir.join("detection.rten"),
                models_dir.join("recognition.rten"),
            );
            match engine.initialize(&settings.ocr.languages, settings.ocr.use_gpu).await {
                Ok(()) => Some(Arc::new(engine)),
                Err(e) => {
                    warn!(error = %e, "ocrs failed to initialize, trying the alternate engine");
                    None
                }
            }
        }
        _ => None,
    }
}

fn num_cpus() -> i32 {
    std::thread::available_parallelism().map(|n| n.get() as i32).unwrap_or(4)
}
