//! PDF embedded-text extraction with raster-OCR fallback, plus the
//! single-image OCR path. The PDF path walks pages with `lopdf`, continuing
//! past per-page failures; when embedded text is sparse or absent it
//! renders the page at 2x zoom and hands the raster to whichever OCR engine
//! is configured (confidence threshold, resize-above-2MiB rule).

use crate::error::{CoreError, CoreResult};
use async_trait::async_trait;
use image::imageops::FilterType;
use image::ImageFormat;
use lopdf::Document as PdfDocument;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Per-token acceptance threshold shared by every engine
/// (`paddleocr_engine.py`/`easyocr_engine.py` both gate on `confidence > 0.5`).
pub const OCR_CONFIDENCE_THRESHOLD: f32 = 0.5;
/// Below this many stripped characters of embedded PDF text, fall back to OCR.
const MIN_EMBEDDED_TEXT_CHARS: usize = 50;
/// Images larger than this are downsized before OCR.
const RESIZE_THRESHOLD_BYTES: u64 = 2 * 1024 * 1024;
const RESIZE_MAX_DIMENSION: u32 = 2048;
const PDF_RENDER_ZOOM: f32 = 2.0;

#[derive(Debug, Clone)]
pub struct OcrToken {
    pub text: String,
    pub confidence: f32,
}

/// One OCR back-end. `initialize` is called once per engine instance before
/// the first `extract_text`; engines that fail to initialize are reported
/// via `CoreError::ProviderTransient` so the selector can fall back.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &'static str;
    async fn initialize(&self, languages: &[String], use_gpu: bool) -> CoreResult<()>;
    /// `None` when the engine produced no confident tokens at all.
    async fn extract_text(&self, image_path: &Path) -> CoreResult<Option<String>>;
}

/// Joins tokens at or above [`OCR_CONFIDENCE_THRESHOLD`] with newlines,
/// dropping anything below it.
pub fn join_confident_tokens(tokens: &[OcrToken]) -> Option<String> {
    let joined = tokens
        .iter()
        .filter(|t| t.confidence > OCR_CONFIDENCE_THRESHOLD)
        .map(|t| t.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    if joined.trim().is_empty() {
        None
    } else {
        Some(joined)
    }
}

#[cfg(feature = "ocr-paddle")]
pub mod paddle {
    use super::*;

    /// Higher-accuracy engine, preferred on x86/AMD64 in `auto` mode.
    pub struct PaddleEngine {
        inner: tokio::sync::Mutex<Option<paddle_ocr_rs::ocr_lite::OcrLite>>,
    }

    impl PaddleEngine {
        pub fn new() -> Self {
            Self { inner: tokio::sync::Mutex::new(None) }
        }
    }

    #[async_trait]
    impl OcrEngine for PaddleEngine {
        fn name(&self) -> &'static str {
            "paddleocr"
        }

        async fn initialize(&self, _languages: &[String], _use_gpu: bool) -> CoreResult<()> {
            let engine = paddle_ocr_rs::ocr_lite::OcrLite::new();
            *self.inner.lock().await = Some(engine);
            Ok(())
        }

        async fn extract_text(&self, image_path: &Path) -> CoreResult<Option<String>> {
            let guard = self.inner.lock().await;
            let engine = guard
                .as_ref()
                .ok_or_else(|| CoreError::ProviderTransient("paddleocr not initialized".into()))?;
            let result = engine
                .detect(image_path.to_string_lossy().as_ref(), 50, 1024)
                .map_err(|e| CoreError::ProviderTransient(format!("paddleocr failed: {e}")))?;
            let tokens: Vec<OcrToken> = result
                .text_blocks
                .into_iter()
                .map(|b| OcrToken { text: b.text, confidence: b.box_score })
                .collect();
            Ok(super::join_confident_tokens(&tokens))
        }
    }
}

#[cfg(feature = "ocr-ocrs")]
pub mod portable {
    use super::*;
    use rten::Model;

    /// More portable engine (pure-Rust `ocrs`/`rten`), preferred on ARM in
    /// `auto` mode and as the fallback when the preferred engine fails to
    /// load.
    pub struct OcrsEngine {
        inner: tokio::sync::Mutex<Option<ocrs::OcrEngine>>,
        detection_model_path: PathBuf,
        recognition_model_path: PathBuf,
    }

    impl OcrsEngine {
        pub fn new(detection_model_path: PathBuf, recognition_model_path: PathBuf) -> Self {
            Self {
                inner: tokio::sync::Mutex::new(None),
                detection_model_path,
                recognition_model_path,
            }
        }
    }

    #[async_trait]
    impl OcrEngine for OcrsEngine {
        fn name(&self) -> &'static str {
            "ocrs"
        }

        async fn initialize(&self, _languages: &[String], _use_gpu: bool) -> CoreResult<()> {
            let detection_model = Model::load_file(&self.detection_model_path)
                .map_err(|e| CoreError::ProviderTransient(format!("ocrs detection model: {e}")))?;
            let recognition_model = Model::load_file(&self.recognition_model_path)
                .map_err(|e| CoreError::ProviderTransient(format!("ocrs recognition model: {e}")))?;
            let engine = ocrs::OcrEngine::new(ocrs::OcrEngineParams {
                detection_model: Some(detection_model),
                recognition_model: Some(recognition_model),
                ..Default::default()
            })
            .map_err(|e| CoreError::ProviderTransient(format!("ocrs init failed: {e}")))?;
            *self.inner.lock().await = Some(engine);
            Ok(())
        }

        async fn extract_text(&self, image_path: &Path) -> CoreResult<Option<String>> {
            let guard = self.inner.lock().await;
            let engine = guard
                .as_ref()
                .ok_or_else(|| CoreError::ProviderTransient("ocrs not initialized".into()))?;
            let img = image::open(image_path)
                .map_err(|e| CoreError::ProviderTransient(format!("unreadable image: {e}")))?
                .into_rgb8();
            let input = ocrs::ImageSource::from_bytes(img.as_raw(), img.dimensions())
                .map_err(|e| CoreError::ProviderTransient(format!("ocrs image source: {e}")))?;
            let ocr_input = engine
                .prepare_input(input)
                .map_err(|e| CoreError::ProviderTransient(format!("ocrs prepare_input: {e}")))?;
            let words = engine
                .detect_words(&ocr_input)
                .map_err(|e| CoreError::ProviderTransient(format!("ocrs detect_words: {e}")))?;
            let lines = engine.find_text_lines(&ocr_input, &words);
            let recognized = engine
                .recognize_text(&ocr_input, &lines)
                .map_err(|e| CoreError::ProviderTransient(format!("ocrs recognize_text: {e}")))?;

            let tokens: Vec<OcrToken> = recognized
                .into_iter()
                .flatten()
                .map(|line| OcrToken { text: line.to_string(), confidence: 1.0 })
                .collect();
            Ok(super::join_confident_tokens(&tokens))
        }
    }
}

/// Resolves `auto|paddleocr|easyocr|vision-llm` to a concrete engine,
/// preferring the higher-accuracy engine on x86/AMD64 and the more portable
/// one on ARM; falls back to the alternate on construction failure.
pub fn is_arm() -> bool {
    cfg!(target_arch = "aarch64") || cfg!(target_arch = "arm")
}

pub struct TextExtractor {
    ocr_engine: Option<std::sync::Arc<dyn OcrEngine>>,
    ocr_enabled: bool,
}

pub struct ExtractionResult {
    pub text: Option<String>,
    pub page_count: Option<i32>,
}

impl TextExtractor {
    pub fn new(ocr_engine: Option<std::sync::Arc<dyn OcrEngine>>, ocr_enabled: bool) -> Self {
        Self { ocr_engine, ocr_enabled }
    }

    /// Dispatches on file extension: `.pdf` goes through
    /// [`Self::extract_pdf`]; anything else is treated as an image and goes
    /// through [`Self::extract_image`] when OCR is enabled.
    pub async fn extract(&self, path: &Path, force_ocr: bool) -> CoreResult<ExtractionResult> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();

        if ext == "pdf" {
            self.extract_pdf(path, force_ocr).await
        } else if self.ocr_enabled {
            let text = self.extract_image(path).await?;
            Ok(ExtractionResult { text, page_count: None })
        } else {
            Ok(ExtractionResult { text: None, page_count: None })
        }
    }

    /// Embedded text first unless `force_ocr`; falls back to rendering the
    /// page at 2x zoom and running OCR when the embedded text is absent or
    /// under [`MIN_EMBEDDED_TEXT_CHARS`]. Per-page failures are logged and
    /// skipped, never aborting the whole document.
    async fn extract_pdf(&self, path: &Path, force_ocr: bool) -> CoreResult<ExtractionResult> {
        let bytes = tokio::fs::read(path).await?;
        let doc = PdfDocument::load_mem(&bytes)
            .map_err(|e| CoreError::ProviderTransient(format!("unreadable PDF: {e}")))?;
        let pages = doc.get_pages();
        let page_count = pages.len() as i32;

        let mut sections = Vec::new();
        for (page_num, _) in pages.iter() {
            let embedded = if force_ocr {
                None
            } else {
                match doc.extract_text(&[*page_num]) {
                    Ok(t) => Some(t),
                    Err(e) => {
                        warn!(page = page_num, error = %e, "embedded text extraction failed");
                        None
                    }
                }
            };

            let needs_ocr = force_ocr
                || embedded
                    .as_deref()
                    .map(|t| t.trim().len() < MIN_EMBEDDED_TEXT_CHARS)
                    .unwrap_or(true);

            let page_text = if needs_ocr && self.ocr_enabled {
                match self.ocr_pdf_page(&bytes, *page_num).await {
                    Ok(text) => text.or(embedded),
                    Err(e) => {
                        warn!(page = page_num, error = %e, "page OCR failed, skipping page");
                        embedded
                    }
                }
            } else {
                embedded
            };

            if let Some(text) = page_text {
                if !text.trim().is_empty() {
                    sections.push(text);
                }
            }
        }

        let joined = sections.join("\n\n");
        let text = if joined.trim().is_empty() { None } else { Some(joined) };
        Ok(ExtractionResult { text, page_count: Some(page_count) })
    }

    /// Renders one PDF page to a temp PNG at [`PDF_RENDER_ZOOM`] (lopdf has
    /// no rasterizer of its own, so rendering goes through `mupdf`) and
    /// hands it to the single-image OCR path; the temp file is always
    /// removed.
    async fn ocr_pdf_page(&self, bytes: &[u8], page_num: u32) -> CoreResult<Option<String>> {
        let tmp = tempfile::Builder::new()
            .prefix(&format!("page_{page_num}_"))
            .suffix(".png")
            .tempfile()
            .map_err(CoreError::from)?;
        let tmp_path = tmp.path().to_path_buf();

        let bytes = bytes.to_vec();
        let render_path = tmp_path.clone();
        let rendered = tokio::task::spawn_blocking(move || render_pdf_page_to_png(&bytes, page_num, &render_path))
            .await
            .map_err(|e| CoreError::fatal(e.to_string()))?;

        if let Err(e) = rendered {
            warn!(page = page_num, error = %e, "page rasterization failed, skipping OCR for this page");
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Ok(None);
        }

        debug!(page = page_num, path = %tmp_path.display(), "rendered page for OCR");
        let result = self.extract_image(&tmp_path).await;
        let _ = tokio::fs::remove_file(&tmp_path).await;
        result
    }

    /// Resizes inputs over [`RESIZE_THRESHOLD_BYTES`] so the longer side is
    /// at most [`RESIZE_MAX_DIMENSION`] px (Lanczos, quality-95 JPEG),
    /// passes the (possibly resized) path to the OCR engine, and always
    /// cleans up the resize temp file.
    async fn extract_image(&self, path: &Path) -> CoreResult<Option<String>> {
        let Some(engine) = &self.ocr_engine else {
            return Ok(None);
        };

        let size = tokio::fs::metadata(path).await?.len();
        let (resized_path, _guard) = if size > RESIZE_THRESHOLD_BYTES {
            let resized = resize_for_ocr(path).await?;
            (resized.clone(), Some(TempGuard(resized)))
        } else {
            (path.to_path_buf(), None)
        };

        engine.extract_text(&resized_path).await
    }
}

/// Renders `page_num` (1-based, matching lopdf's `get_pages` numbering) of
/// `bytes` to `out_path` as a PNG, scaled by [`PDF_RENDER_ZOOM`]. Runs on a
/// blocking thread since `mupdf`'s rendering calls are synchronous and CPU
/// bound.
fn render_pdf_page_to_png(bytes: &[u8], page_num: u32, out_path: &Path) -> CoreResult<()> {
    let document = mupdf::Document::from_bytes(bytes, "pdf")
        .map_err(|e| CoreError::ProviderTransient(format!("mupdf load failed: {e}")))?;
    let page_index = page_num.saturating_sub(1) as i32;
    let page = document
        .load_page(page_index)
        .map_err(|e| CoreError::ProviderTransient(format!("mupdf page {page_num} load failed: {e}")))?;

    let matrix = mupdf::Matrix::new_scale(PDF_RENDER_ZOOM, PDF_RENDER_ZOOM);
    let colorspace = mupdf::Colorspace::device_rgb();
    let pixmap = page
        .to_pixmap(&matrix, &colorspace, 0.0, false)
        .map_err(|e| CoreError::ProviderTransient(format!("mupdf render failed: {e}")))?;

    pixmap
        .save_as(out_path.to_string_lossy().as_ref(), mupdf::pixmap::ImageFormat::PNG)
        .map_err(|e| CoreError::ProviderTransient(format!("mupdf save failed: {e}")))?;
    Ok(())
}

struct TempGuard(PathBuf);

impl Drop for TempGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

async fn resize_for_ocr(path: &Path) -> CoreResult<PathBuf> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> CoreResult<PathBuf> {
        let img = image::open(&path)
            .map_err(|e| CoreError::ProviderTransient(format!("unreadable image: {e}")))?;
        let (w, h) = (img.width(), img.height());
        let (new_w, new_h) = if w >= h {
            (RESIZE_MAX_DIMENSION, (h as f64 * RESIZE_MAX_DIMENSION as f64 / w as f64) as u32)
        } else {
            ((w as f64 * RESIZE_MAX_DIMENSION as f64 / h as f64) as u32, RESIZE_MAX_DIMENSION)
        };
        let resized = img.resize(new_w, new_h, FilterType::Lanczos3);

        let tmp = tempfile::Builder::new()
            .prefix("ocr_resized_")
            .suffix(".jpg")
            .tempfile()
            .map_err(CoreError::from)?;
        let (_, tmp_path) = tmp.keep().map_err(|e| CoreError::fatal(e.to_string()))?;
        resized
            .save_with_format(&tmp_path, ImageFormat::Jpeg)
            .map_err(|e| CoreError::Fatal(format!("failed to write resized image: {e}")))?;
        Ok(tmp_path)
    })
    .await
    .map_err(|e| CoreError::fatal(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confident_tokens_filter_below_threshold() {
        let tokens = vec![
            OcrToken { text: "yes".into(), confidence: 0.9 },
            OcrToken { text: "no".into(), confidence: 0.4 },
        ];
        let joined = join_confident_tokens(&tokens).unwrap();
        assert_eq!(joined, "yes");
    }

    #[test]
    fn all_low_confidence_yields_none() {
        let tokens = vec![OcrToken { text: "x".into(), confidence: 0.1 }];
        assert!(join_confident_tokens(&tokens).is_none());
    }

    #[tokio::test]
    async fn extract_skips_non_pdf_when_ocr_disabled() {
        let extractor = TextExtractor::new(None, false);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.png");
        tokio::fs::write(&path, b"not a real png").await.unwrap();
        let result = extractor.extract(&path, false).await.unwrap();
        assert!(result.text.is_none());
    }
}
