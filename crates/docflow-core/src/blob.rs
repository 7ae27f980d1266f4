//! Content-addressed blob store: a two-char sharded directory tree keyed by
//! document id, with automatic image-to-PDF normalization on ingest.

use crate::error::{CoreError, CoreResult};
use image::{DynamicImage, ImageFormat};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "tif", "tiff", "bmp", "gif"];

pub struct PutResult {
    pub relative_path: String,
    pub final_filename: String,
    pub mime_type: String,
}

#[derive(Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `<prefix>/<doc_id>/<safe_filename>`, where `prefix` is the first two
    /// characters of `doc_id`. Image inputs are flattened to PDF before the
    /// result is returned; the original image file is removed.
    pub async fn put(&self, doc_id: &str, filename: &str, bytes: &[u8]) -> CoreResult<PutResult> {
        let prefix = doc_id_prefix(doc_id);
        let safe_name = sanitize_filename(filename)?;
        let dir = self.root.join(&prefix).join(doc_id);
        tokio::fs::create_dir_all(&dir).await?;

        let ext = safe_name
            .rsplit('.')
            .next()
            .unwrap_or("")
            .to_ascii_lowercase();

        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            let pdf_name = swap_extension(&safe_name, "pdf");
            let pdf_path = dir.join(&pdf_name);
            let pdf_bytes = image_to_pdf(bytes)?;
            tokio::fs::write(&pdf_path, pdf_bytes).await?;

            let relative_path = format!("{prefix}/{doc_id}/{pdf_name}");
            debug!(doc_id, %relative_path, "normalized image to PDF");
            return Ok(PutResult {
                relative_path,
                final_filename: pdf_name,
                mime_type: "application/pdf".to_string(),
            });
        }

        let path = dir.join(&safe_name);
        tokio::fs::write(&path, bytes).await?;
        let mime_type = infer::get(bytes)
            .map(|t| t.mime_type().to_string())
            .unwrap_or_else(|| {
                mime_guess::from_path(&safe_name)
                    .first_or_octet_stream()
                    .to_string()
            });

        Ok(PutResult {
            relative_path: format!("{prefix}/{doc_id}/{safe_name}"),
            final_filename: safe_name,
            mime_type,
        })
    }

    pub fn absolute_path(&self, relative_path: &str) -> PathBuf {
        self.root.join(relative_path)
    }

    pub async fn open(&self, relative_path: &str) -> CoreResult<Vec<u8>> {
        let path = self.absolute_path(relative_path);
        let mut file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| CoreError::NotFound(format!("{}: {e}", path.display())))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await?;
        Ok(buf)
    }

    pub async fn size(&self, relative_path: &str) -> CoreResult<u64> {
        let meta = tokio::fs::metadata(self.absolute_path(relative_path)).await?;
        Ok(meta.len())
    }

    pub async fn exists(&self, relative_path: &str) -> bool {
        tokio::fs::metadata(self.absolute_path(relative_path))
            .await
            .is_ok()
    }

    /// Removes the file, then its parent and grandparent directories if they
    /// are left empty (non-empty errors are ignored — siblings may remain).
    pub async fn delete(&self, relative_path: &str) -> CoreResult<()> {
        let path = self.absolute_path(relative_path);
        tokio::fs::remove_file(&path).await.or_else(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Ok(())
            } else {
                Err(e)
            }
        })?;

        if let Some(parent) = path.parent() {
            let _ = tokio::fs::remove_dir(parent).await;
            if let Some(grandparent) = parent.parent() {
                let _ = tokio::fs::remove_dir(grandparent).await;
            }
        }
        Ok(())
    }

    /// Streams the input twice (rewind required) so the checksum matches
    /// exactly what gets persisted.
    pub async fn checksum(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize()).to_lowercase()
    }
}

fn doc_id_prefix(doc_id: &str) -> String {
    doc_id.chars().take(2).collect::<String>().to_lowercase()
}

/// Strips any directory components and rejects traversal attempts.
fn sanitize_filename(filename: &str) -> CoreResult<String> {
    let name = Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| CoreError::InvalidInput(format!("unsafe filename: {filename}")))?;
    if name.is_empty() || name == "." || name == ".." {
        return Err(CoreError::InvalidInput(format!("unsafe filename: {filename}")));
    }
    Ok(name.to_string())
}

fn swap_extension(filename: &str, new_ext: &str) -> String {
    match filename.rfind('.') {
        Some(idx) => format!("{}.{new_ext}", &filename[..idx]),
        None => format!("{filename}.{new_ext}"),
    }
}

/// Flattens RGBA/LA/P modes onto a white RGB background and wraps the result
/// in a single-page PDF via `lopdf`'s raw image-XObject stream.
fn image_to_pdf(bytes: &[u8]) -> CoreResult<Vec<u8>> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| CoreError::InvalidInput(format!("unreadable image: {e}")))?;
    let flattened = flatten_to_rgb(img);

    let mut jpeg_bytes = Vec::new();
    flattened
        .write_to(&mut std::io::Cursor::new(&mut jpeg_bytes), ImageFormat::Jpeg)
        .map_err(|e| CoreError::Fatal(format!("failed to encode flattened image: {e}")))?;

    build_single_page_pdf(&flattened, &jpeg_bytes)
}

fn flatten_to_rgb(img: DynamicImage) -> DynamicImage {
    match &img {
        DynamicImage::ImageRgba8(_) | DynamicImage::ImageLumaA8(_) => {
            let rgba = img.to_rgba8();
            let (w, h) = rgba.dimensions();
            let mut canvas = image::RgbImage::from_pixel(w, h, image::Rgb([255, 255, 255]));
            for (x, y, pixel) in rgba.enumerate_pixels() {
                let alpha = pixel[3] as f32 / 255.0;
                let blended = [
                    (pixel[0] as f32 * alpha + 255.0 * (1.0 - alpha)) as u8,
                    (pixel[1] as f32 * alpha + 255.0 * (1.0 - alpha)) as u8,
                    (pixel[2] as f32 * alpha + 255.0 * (1.0 - alpha)) as u8,
                ];
                canvas.put_pixel(x, y, image::Rgb(blended));
            }
            DynamicImage::ImageRgb8(canvas)
        }
        _ => DynamicImage::ImageRgb8(img.to_rgb8()),
    }
}

fn build_single_page_pdf(img: &DynamicImage, jpeg_bytes: &[u8]) -> CoreResult<Vec<u8>> {
    use lopdf::{dictionary, Document as PdfDocument, Object, Stream};

    let (width, height) = (img.width() as f64, img.height() as f64);
    let mut doc = PdfDocument::with_version("1.5");

    let image_dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => img.width() as i64,
        "Height" => img.height() as i64,
        "ColorSpace" => "DeviceRGB",
        "BitsPerComponent" => 8,
        "Filter" => "DCTDecode",
    };
    let image_stream = Stream::new(image_dict, jpeg_bytes.to_vec());
    let image_id = doc.add_object(image_stream);

    let content = format!("q {width} 0 0 {height} 0 0 cm /Im0 Do Q");
    let content_stream = Stream::new(dictionary! {}, content.into_bytes());
    let content_id = doc.add_object(content_stream);

    let resources_id = doc.add_object(dictionary! {
        "XObject" => dictionary! { "Im0" => image_id },
    });

    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "MediaBox" => vec![0.into(), 0.into(), width.into(), height.into()],
        "Contents" => content_id,
        "Resources" => resources_id,
    });

    let pages_id = doc.add_object(dictionary! {
        "Type" => "Pages",
        "Kids" => vec![Object::Reference(page_id)],
        "Count" => 1,
    });
    doc.objects
        .get_mut(&page_id)
        .and_then(|obj| obj.as_dict_mut().ok())
        .map(|dict| dict.set("Parent", pages_id));

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    doc.save_to(&mut out)
        .map_err(|e| CoreError::Fatal(format!("failed to write normalized PDF: {e}")))?;
    Ok(out)
}

pub fn is_image_extension(ext: &str) -> bool {
    IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_traversal() {
        assert!(sanitize_filename("../../etc/passwd").is_err());
        assert!(sanitize_filename("a/b/c.pdf").unwrap() == "c.pdf");
    }

    #[test]
    fn swaps_extension() {
        assert_eq!(swap_extension("scan.png", "pdf"), "scan.pdf");
        assert_eq!(swap_extension("noext", "pdf"), "noext.pdf");
    }

    #[test]
    fn two_char_prefix_is_lowercased() {
        assert_eq!(doc_id_prefix("AB12"), "ab");
    }

    #[tokio::test]
    async fn put_and_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path());
        let result = store.put("abcdef", "notes.txt", b"hello").await.unwrap();
        assert_eq!(result.relative_path, "ab/abcdef/notes.txt");
        assert!(store.exists(&result.relative_path).await);
        store.delete(&result.relative_path).await.unwrap();
        assert!(!store.exists(&result.relative_path).await);
    }

    #[tokio::test]
    async fn image_put_normalizes_to_pdf() {
        let mut img_bytes = Vec::new();
        let img = image::RgbaImage::from_pixel(4, 4, image::Rgba([10, 20, 30, 128]));
        DynamicImage::ImageRgba8(img)
            .write_to(&mut std::io::Cursor::new(&mut img_bytes), ImageFormat::Png)
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path());
        let result = store.put("abcdef", "scan.png", &img_bytes).await.unwrap();
        assert!(result.relative_path.ends_with("scan.pdf"));
        assert_eq!(result.mime_type, "application/pdf");
    }
}
