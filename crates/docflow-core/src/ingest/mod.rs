//! Ingest sources. Both sub-watchers funnel into the same [`ingest_one`]
//! entry point the upload handler uses
//! (`crate::orchestrator::ingest_document`), so a file dropped into a
//! watched directory and one emailed to an IMAP mailbox are deduplicated,
//! normalized, and submitted identically.

pub mod directory;
pub mod imap;

use crate::db::Repository;
use crate::error::CoreResult;
use crate::models::ImportSource;
use crate::orchestrator::Orchestrator;
use tracing::{info, warn};

/// Extensions accepted from either ingest source, shared with the upload
/// handler's own filter.
pub const ALLOWED_EXTENSIONS: &[&str] =
    &["pdf", "png", "jpg", "jpeg", "tif", "tiff", "bmp"];

pub fn has_allowed_extension(filename: &str) -> bool {
    let ext = filename.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    ALLOWED_EXTENSIONS.contains(&ext.as_str())
}

/// Shared post-import action: move the source file into
/// `source.move_to_path` (creating parent directories) or delete it. A
/// no-op when neither is configured.
pub async fn apply_post_import_action(source: &ImportSource, file_path: &std::path::Path) {
    if source.move_after_import {
        if let Some(dest_dir) = &source.move_to_path {
            let Some(filename) = file_path.file_name() else { return };
            let dest = std::path::Path::new(dest_dir).join(filename);
            if let Some(parent) = dest.parent() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    warn!(path = %dest.display(), error = %e, "failed to create post-import directory");
                    return;
                }
            }
            if let Err(e) = tokio::fs::rename(file_path, &dest).await {
                warn!(path = %file_path.display(), error = %e, "failed to move post-import file");
            } else {
                info!(from = %file_path.display(), to = %dest.display(), "moved post-import file");
            }
        }
    } else if source.delete_after_import {
        if let Err(e) = tokio::fs::remove_file(file_path).await {
            warn!(path = %file_path.display(), error = %e, "failed to delete post-import file");
        } else {
            info!(path = %file_path.display(), "deleted post-import file");
        }
    }
}

/// Ingests one already-read file on behalf of a source: dedups by
/// (owner, checksum) and, on a fresh document, submits it into the
/// pipeline. Returns `Ok(true)` when a new document was created, `Ok(false)`
/// on a duplicate hit — the caller still runs the post-import action either
/// way.
pub async fn ingest_one(
    repository: &Repository,
    blob_store: &crate::blob::BlobStore,
    orchestrator: &Orchestrator<'_>,
    owner_id: i32,
    filename: &str,
    bytes: &[u8],
) -> CoreResult<bool> {
    match crate::orchestrator::ingest_document(
        repository,
        blob_store,
        orchestrator,
        owner_id,
        None,
        filename,
        bytes,
    )
    .await
    {
        Ok(document) => {
            info!(document_id = document.id, filename, "ingested document");
            Ok(true)
        }
        Err(crate::CoreError::Duplicate { existing_document_id }) => {
            info!(existing_document_id, filename, "duplicate ingest, skipping");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_filter_accepts_known_types_only() {
        assert!(has_allowed_extension("scan.PDF"));
        assert!(has_allowed_extension("photo.JPG"));
        assert!(!has_allowed_extension("notes.txt"));
        assert!(!has_allowed_extension("noextension"));
    }
}
