//! The entity graph: `Document` is the ownership root,
//! `DocumentChunk`/`DocumentShare`/`DocumentTag` cascade from it, `Tag` and
//! `ImportSource` are free-standing.

use chrono::{DateTime, Utc};
use pgvector::Vector;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    OcrComplete,
    OcrFailed,
    EmbeddingComplete,
    LlmComplete,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::OcrComplete => "ocr_complete",
            Self::OcrFailed => "ocr_failed",
            Self::EmbeddingComplete => "embedding_complete",
            Self::LlmComplete => "llm_complete",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub owner_id: i32,
    pub uploaded_by: Option<i32>,
    pub title: String,
    pub original_filename: String,
    pub file_path: String,
    pub file_size: i64,
    pub mime_type: String,
    pub checksum: String,
    pub ocr_text: Option<String>,
    pub ocr_language: Option<String>,
    pub page_count: Option<i32>,
    pub extracted_title: Option<String>,
    pub extracted_date: Option<chrono::NaiveDate>,
    pub extracted_correspondent: Option<String>,
    pub extracted_document_type: Option<String>,
    pub extracted_summary: Option<String>,
    pub is_public: bool,
    pub processing_status: ProcessingStatus,
    pub processing_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A single embedded slice of a document's `ocr_text`. For a document at
/// `embedding_complete` or later, rows exist contiguously `[0..n)` sharing
/// one `embedding_model`.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DocumentChunk {
    pub id: i64,
    pub document_id: i64,
    pub chunk_index: i32,
    pub chunk_text: String,
    #[serde(skip)]
    pub embedding: Vector,
    pub embedding_model: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    pub color: Option<String>,
    pub description: Option<String>,
    pub created_by: Option<i32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DocumentTag {
    pub document_id: i64,
    pub tag_id: i64,
    pub confidence: Option<f32>,
    pub is_auto_tagged: bool,
    pub tagged_at: DateTime<Utc>,
}

/// Ordered so `granted_level >= level` comparisons in the access predicate
/// are a plain `Ord` check: `Read < Write < Admin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PermissionLevel {
    Read,
    Write,
    Admin,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DocumentShare {
    pub id: i64,
    pub document_id: i64,
    pub shared_with_user_id: i32,
    pub shared_by_user_id: Option<i32>,
    pub permission_level: PermissionLevel,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl DocumentShare {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| exp > now).unwrap_or(true)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ImportSourceType {
    Directory,
    Imap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ImportSourceStatus {
    Active,
    Paused,
    Error,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ImportSource {
    pub id: i64,
    pub name: String,
    pub source_type: ImportSourceType,
    pub status: ImportSourceStatus,
    pub owner_id: i32,
    pub last_run: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub watch_path: Option<String>,
    pub move_after_import: bool,
    pub move_to_path: Option<String>,
    pub delete_after_import: bool,
    pub imap_host: Option<String>,
    pub imap_port: Option<i32>,
    pub imap_username: Option<String>,
    pub imap_password: Option<String>,
    pub imap_use_ssl: Option<bool>,
    pub imap_mailbox: Option<String>,
    pub imap_processed_folder: Option<String>,
}

/// Write-only audit trail; nothing in the core reads it back.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ActivityLog {
    pub id: i64,
    pub user_id: Option<i32>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<i64>,
    pub description: String,
    pub extra_data: Option<serde_json::Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}
