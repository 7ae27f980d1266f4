//! Plain `sqlx::query_as` throughout — no compile-time-checked macros, so
//! this crate never needs a live `DATABASE_URL` to build — over the
//! Document/DocumentChunk/Tag/Share/ImportSource/ActivityLog schema.

use super::DbPool;
use crate::error::{CoreError, CoreResult};
use crate::models::{
    ActivityLog, Document, DocumentChunk, DocumentShare, DocumentTag, ImportSource,
    ImportSourceStatus, ImportSourceType, PermissionLevel, ProcessingStatus, Tag,
};
use chrono::Utc;
use pgvector::Vector;

pub struct NewDocument {
    pub owner_id: i32,
    pub uploaded_by: Option<i32>,
    pub title: String,
    pub original_filename: String,
    pub file_path: String,
    pub file_size: i64,
    pub mime_type: String,
    pub checksum: String,
}

pub struct Repository {
    pool: DbPool,
}

impl Repository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Bare connectivity check for readiness probes — no reason for a
    /// caller outside this crate to reach for a raw `sqlx::query`.
    pub async fn ping(&self) -> CoreResult<()> {
        sqlx::query("SELECT 1").execute(self.pool.get_pool()).await?;
        Ok(())
    }

    /// Reads the persisted `document_chunks.embedding` column width straight
    /// from `pg_attribute`'s `atttypmod` (a `vector(D)` column stores `D`
    /// there directly). `None` if the table/column doesn't exist yet — a
    /// fresh database the operator hasn't migrated. The startup dimension
    /// check compares the configured `D` against this value.
    pub async fn stored_embedding_dimension(&self) -> CoreResult<Option<i32>> {
        let row: Option<(i32,)> = sqlx::query_as(
            r#"SELECT a.atttypmod
                 FROM pg_attribute a
                 JOIN pg_class c ON c.oid = a.attrelid
                WHERE c.relname = 'document_chunks'
                  AND a.attname = 'embedding'
                  AND a.attnum > 0
                  AND NOT a.attisdropped"#,
        )
        .fetch_optional(self.pool.get_pool())
        .await?;
        Ok(row.map(|(typmod,)| typmod))
    }

    // ==================== Documents ====================

    pub async fn find_by_checksum(
        &self,
        owner_id: i32,
        checksum: &str,
    ) -> CoreResult<Option<Document>> {
        let doc = sqlx::query_as::<_, Document>(
            "SELECT * FROM documents WHERE owner_id = $1 AND checksum = $2",
        )
        .bind(owner_id)
        .bind(checksum)
        .fetch_optional(self.pool.get_pool())
        .await?;
        Ok(doc)
    }

    pub async fn create_document(&self, new_doc: NewDocument) -> CoreResult<Document> {
        let doc = sqlx::query_as::<_, Document>(
            r#"INSERT INTO documents
                 (owner_id, uploaded_by, title, original_filename, file_path,
                  file_size, mime_type, checksum, is_public, processing_status,
                  created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, false, 'pending', now(), now())
               RETURNING *"#,
        )
        .bind(new_doc.owner_id)
        .bind(new_doc.uploaded_by)
        .bind(&new_doc.title)
        .bind(&new_doc.original_filename)
        .bind(&new_doc.file_path)
        .bind(new_doc.file_size)
        .bind(&new_doc.mime_type)
        .bind(&new_doc.checksum)
        .fetch_one(self.pool.get_pool())
        .await?;
        Ok(doc)
    }

    pub async fn get_document(&self, id: i64) -> CoreResult<Document> {
        sqlx::query_as::<_, Document>("SELECT * FROM documents WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.get_pool())
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("document {id}")))
    }

    /// Re-reads `ocr_text` directly, bypassing any cached struct, so the
    /// embedding stage always works from what's actually persisted.
    pub async fn get_ocr_text(&self, document_id: i64) -> CoreResult<Option<String>> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT ocr_text FROM documents WHERE id = $1")
                .bind(document_id)
                .fetch_optional(self.pool.get_pool())
                .await?;
        Ok(row.and_then(|(t,)| t))
    }

    pub async fn set_status(
        &self,
        document_id: i64,
        status: ProcessingStatus,
        error: Option<&str>,
    ) -> CoreResult<()> {
        sqlx::query(
            "UPDATE documents SET processing_status = $2, processing_error = $3, updated_at = now() WHERE id = $1",
        )
        .bind(document_id)
        .bind(status)
        .bind(error)
        .execute(self.pool.get_pool())
        .await?;
        Ok(())
    }

    pub async fn set_ocr_result(
        &self,
        document_id: i64,
        ocr_text: &str,
        ocr_language: Option<&str>,
    ) -> CoreResult<()> {
        sqlx::query(
            "UPDATE documents SET ocr_text = $2, ocr_language = $3, updated_at = now() WHERE id = $1",
        )
        .bind(document_id)
        .bind(ocr_text)
        .bind(ocr_language)
        .execute(self.pool.get_pool())
        .await?;
        Ok(())
    }

    pub async fn set_page_count(&self, document_id: i64, page_count: i32) -> CoreResult<()> {
        sqlx::query("UPDATE documents SET page_count = $2, updated_at = now() WHERE id = $1")
            .bind(document_id)
            .bind(page_count)
            .execute(self.pool.get_pool())
            .await?;
        Ok(())
    }

    /// `extracted_title` is only applied when the caller has verified the
    /// current title still equals the original filename — user edits to
    /// `title` are never clobbered.
    #[allow(clippy::too_many_arguments)]
    pub async fn apply_extracted_metadata(
        &self,
        document_id: i64,
        extracted_title: Option<&str>,
        extracted_date: Option<chrono::NaiveDate>,
        extracted_correspondent: Option<&str>,
        extracted_document_type: Option<&str>,
        extracted_summary: Option<&str>,
    ) -> CoreResult<()> {
        sqlx::query(
            r#"UPDATE documents SET
                 extracted_title = COALESCE($2, extracted_title),
                 extracted_date = COALESCE($3, extracted_date),
                 extracted_correspondent = COALESCE($4, extracted_correspondent),
                 extracted_document_type = COALESCE($5, extracted_document_type),
                 extracted_summary = COALESCE($6, extracted_summary),
                 updated_at = now()
               WHERE id = $1"#,
        )
        .bind(document_id)
        .bind(extracted_title)
        .bind(extracted_date)
        .bind(extracted_correspondent)
        .bind(extracted_document_type)
        .bind(extracted_summary)
        .execute(self.pool.get_pool())
        .await?;
        Ok(())
    }

    pub async fn delete_document(&self, id: i64) -> CoreResult<()> {
        // chunks/shares/document_tags cascade via FK ON DELETE CASCADE.
        sqlx::query("DELETE FROM documents WHERE id = $1")
            .bind(id)
            .execute(self.pool.get_pool())
            .await?;
        Ok(())
    }

    /// Realizes the access predicate as a SQL filter so this listing and
    /// `can_access` cannot diverge: owner OR superuser OR public-read OR an
    /// active, non-expired share.
    pub async fn list_accessible_documents(
        &self,
        user_id: i32,
        is_superuser: bool,
        skip: i64,
        limit: i64,
    ) -> CoreResult<Vec<Document>> {
        if is_superuser {
            let docs = sqlx::query_as::<_, Document>(
                "SELECT * FROM documents ORDER BY created_at DESC OFFSET $1 LIMIT $2",
            )
            .bind(skip)
            .bind(limit)
            .fetch_all(self.pool.get_pool())
            .await?;
            return Ok(docs);
        }

        let docs = sqlx::query_as::<_, Document>(
            r#"SELECT DISTINCT d.* FROM documents d
                 LEFT JOIN document_shares s
                   ON s.document_id = d.id
                  AND s.shared_with_user_id = $1
                  AND (s.expires_at IS NULL OR s.expires_at > now())
               WHERE d.owner_id = $1 OR d.is_public OR s.id IS NOT NULL
               ORDER BY d.created_at DESC
               OFFSET $2 LIMIT $3"#,
        )
        .bind(user_id)
        .bind(skip)
        .bind(limit)
        .fetch_all(self.pool.get_pool())
        .await?;
        Ok(docs)
    }

    pub async fn fulltext_search(
        &self,
        user_id: i32,
        is_superuser: bool,
        query: &str,
        skip: i64,
        limit: i64,
    ) -> CoreResult<Vec<Document>> {
        let pattern = format!("%{query}%");
        let docs = sqlx::query_as::<_, Document>(
            r#"SELECT DISTINCT d.* FROM documents d
                 LEFT JOIN document_shares s
                   ON s.document_id = d.id
                  AND s.shared_with_user_id = $1
                  AND (s.expires_at IS NULL OR s.expires_at > now())
               WHERE ($2 OR d.owner_id = $1 OR d.is_public OR s.id IS NOT NULL)
                 AND (d.title ILIKE $3
                      OR d.original_filename ILIKE $3
                      OR d.ocr_text ILIKE $3
                      OR d.extracted_title ILIKE $3
                      OR d.extracted_correspondent ILIKE $3)
               ORDER BY d.created_at DESC
               OFFSET $4 LIMIT $5"#,
        )
        .bind(user_id)
        .bind(is_superuser)
        .bind(&pattern)
        .bind(skip)
        .bind(limit)
        .fetch_all(self.pool.get_pool())
        .await?;
        Ok(docs)
    }

    pub async fn fulltext_count(
        &self,
        user_id: i32,
        is_superuser: bool,
        query: &str,
    ) -> CoreResult<i64> {
        let pattern = format!("%{query}%");
        let row: (i64,) = sqlx::query_as(
            r#"SELECT COUNT(DISTINCT d.id) FROM documents d
                 LEFT JOIN document_shares s
                   ON s.document_id = d.id
                  AND s.shared_with_user_id = $1
                  AND (s.expires_at IS NULL OR s.expires_at > now())
               WHERE ($2 OR d.owner_id = $1 OR d.is_public OR s.id IS NOT NULL)
                 AND (d.title ILIKE $3
                      OR d.original_filename ILIKE $3
                      OR d.ocr_text ILIKE $3
                      OR d.extracted_title ILIKE $3
                      OR d.extracted_correspondent ILIKE $3)"#,
        )
        .bind(user_id)
        .bind(is_superuser)
        .bind(&pattern)
        .fetch_one(self.pool.get_pool())
        .await?;
        Ok(row.0)
    }

    /// `SELECT DISTINCT ON (d.id) ... ORDER BY d.id, similarity DESC`,
    /// scoped by the same owner/public/share filter as
    /// `list_accessible_documents`.
    pub async fn semantic_search(
        &self,
        user_id: i32,
        is_superuser: bool,
        query_vector: Vector,
        threshold: f32,
        limit: i64,
    ) -> CoreResult<Vec<(Document, String, f32)>> {
        let rows: Vec<(
            i64, i32, Option<i32>, String, String, String, i64, String, String,
            Option<String>, Option<String>, Option<i32>,
            Option<String>, Option<chrono::NaiveDate>, Option<String>, Option<String>, Option<String>,
            bool, ProcessingStatus, Option<String>,
            chrono::DateTime<Utc>, chrono::DateTime<Utc>,
            String, f32,
        )> = sqlx::query_as(
            r#"SELECT DISTINCT ON (d.id)
                 d.id, d.owner_id, d.uploaded_by, d.title, d.original_filename, d.file_path,
                 d.file_size, d.mime_type, d.checksum, d.ocr_text, d.ocr_language, d.page_count,
                 d.extracted_title, d.extracted_date, d.extracted_correspondent,
                 d.extracted_document_type, d.extracted_summary, d.is_public,
                 d.processing_status, d.processing_error, d.created_at, d.updated_at,
                 c.chunk_text, (1 - (c.embedding <=> $3)) AS similarity
               FROM documents d
               JOIN document_chunks c ON c.document_id = d.id
               LEFT JOIN document_shares s
                 ON s.document_id = d.id
                AND s.shared_with_user_id = $1
                AND (s.expires_at IS NULL OR s.expires_at > now())
               WHERE ($2 OR d.owner_id = $1 OR d.is_public OR s.id IS NOT NULL)
                 AND (1 - (c.embedding <=> $3)) >= $4
               ORDER BY d.id, similarity DESC
               LIMIT $5"#,
        )
        .bind(user_id)
        .bind(is_superuser)
        .bind(query_vector)
        .bind(threshold)
        .bind(limit)
        .fetch_all(self.pool.get_pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| {
                let doc = Document {
                    id: r.0,
                    owner_id: r.1,
                    uploaded_by: r.2,
                    title: r.3,
                    original_filename: r.4,
                    file_path: r.5,
                    file_size: r.6,
                    mime_type: r.7,
                    checksum: r.8,
                    ocr_text: r.9,
                    ocr_language: r.10,
                    page_count: r.11,
                    extracted_title: r.12,
                    extracted_date: r.13,
                    extracted_correspondent: r.14,
                    extracted_document_type: r.15,
                    extracted_summary: r.16,
                    is_public: r.17,
                    processing_status: r.18,
                    processing_error: r.19,
                    created_at: r.20,
                    updated_at: r.21,
                };
                (doc, r.22, r.23)
            })
            .collect())
    }

    // ==================== Chunks ====================

    pub async fn delete_chunks(&self, document_id: i64) -> CoreResult<u64> {
        let result = sqlx::query("DELETE FROM document_chunks WHERE document_id = $1")
            .bind(document_id)
            .execute(self.pool.get_pool())
            .await?;
        Ok(result.rows_affected())
    }

    /// Inserted within one transaction so a concurrent `generate_embeddings`
    /// re-run never observes a partial chunk set.
    pub async fn insert_chunks(
        &self,
        document_id: i64,
        chunks: &[(i32, String, Vector, String)],
    ) -> CoreResult<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.get_pool().begin().await?;
        for (chunk_index, text, embedding, model) in chunks {
            sqlx::query(
                r#"INSERT INTO document_chunks
                     (document_id, chunk_index, chunk_text, embedding, embedding_model, created_at)
                   VALUES ($1, $2, $3, $4, $5, now())"#,
            )
            .bind(document_id)
            .bind(chunk_index)
            .bind(text)
            .bind(embedding)
            .bind(model)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn count_chunks(&self, document_id: i64) -> CoreResult<i64> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM document_chunks WHERE document_id = $1")
                .bind(document_id)
                .fetch_one(self.pool.get_pool())
                .await?;
        Ok(row.0)
    }

    pub async fn list_chunks(&self, document_id: i64) -> CoreResult<Vec<DocumentChunk>> {
        let chunks = sqlx::query_as::<_, DocumentChunk>(
            "SELECT * FROM document_chunks WHERE document_id = $1 ORDER BY chunk_index",
        )
        .bind(document_id)
        .fetch_all(self.pool.get_pool())
        .await?;
        Ok(chunks)
    }

    // ==================== Tags ====================

    pub async fn upsert_tag(&self, name: &str, created_by: Option<i32>) -> CoreResult<Tag> {
        let lowered = name.trim().to_lowercase();
        let tag = sqlx::query_as::<_, Tag>(
            r#"INSERT INTO tags (name, created_by, created_at)
               VALUES ($1, $2, now())
               ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
               RETURNING *"#,
        )
        .bind(&lowered)
        .bind(created_by)
        .fetch_one(self.pool.get_pool())
        .await?;
        Ok(tag)
    }

    pub async fn link_tag(
        &self,
        document_id: i64,
        tag_id: i64,
        confidence: Option<f32>,
        is_auto_tagged: bool,
    ) -> CoreResult<()> {
        sqlx::query(
            r#"INSERT INTO document_tags (document_id, tag_id, confidence, is_auto_tagged, tagged_at)
               VALUES ($1, $2, $3, $4, now())
               ON CONFLICT (document_id, tag_id) DO NOTHING"#,
        )
        .bind(document_id)
        .bind(tag_id)
        .bind(confidence)
        .bind(is_auto_tagged)
        .execute(self.pool.get_pool())
        .await?;
        Ok(())
    }

    pub async fn list_tag_names(&self) -> CoreResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT name FROM tags ORDER BY name")
            .fetch_all(self.pool.get_pool())
            .await?;
        Ok(rows.into_iter().map(|(n,)| n).collect())
    }

    #[allow(dead_code)]
    pub async fn list_document_tags(&self, document_id: i64) -> CoreResult<Vec<DocumentTag>> {
        let rows = sqlx::query_as::<_, DocumentTag>(
            "SELECT * FROM document_tags WHERE document_id = $1",
        )
        .bind(document_id)
        .fetch_all(self.pool.get_pool())
        .await?;
        Ok(rows)
    }

    // ==================== Shares ====================

    pub async fn list_shares_for_document(&self, document_id: i64) -> CoreResult<Vec<DocumentShare>> {
        let rows = sqlx::query_as::<_, DocumentShare>(
            "SELECT * FROM document_shares WHERE document_id = $1",
        )
        .bind(document_id)
        .fetch_all(self.pool.get_pool())
        .await?;
        Ok(rows)
    }

    pub async fn create_share(
        &self,
        document_id: i64,
        shared_with_user_id: i32,
        shared_by_user_id: Option<i32>,
        permission_level: PermissionLevel,
        expires_at: Option<chrono::DateTime<Utc>>,
    ) -> CoreResult<DocumentShare> {
        let share = sqlx::query_as::<_, DocumentShare>(
            r#"INSERT INTO document_shares
                 (document_id, shared_with_user_id, shared_by_user_id, permission_level, expires_at, created_at)
               VALUES ($1, $2, $3, $4, $5, now())
               RETURNING *"#,
        )
        .bind(document_id)
        .bind(shared_with_user_id)
        .bind(shared_by_user_id)
        .bind(permission_level)
        .bind(expires_at)
        .fetch_one(self.pool.get_pool())
        .await?;
        Ok(share)
    }

    // ==================== Import sources ====================

    pub async fn list_active_sources(
        &self,
        source_type: ImportSourceType,
    ) -> CoreResult<Vec<ImportSource>> {
        let sources = sqlx::query_as::<_, ImportSource>(
            "SELECT * FROM import_sources WHERE source_type = $1 AND status = 'active'",
        )
        .bind(source_type)
        .fetch_all(self.pool.get_pool())
        .await?;
        Ok(sources)
    }

    pub async fn get_import_source(&self, id: i64) -> CoreResult<ImportSource> {
        sqlx::query_as::<_, ImportSource>("SELECT * FROM import_sources WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.get_pool())
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("import source {id}")))
    }

    pub async fn mark_source_ok(&self, id: i64) -> CoreResult<()> {
        sqlx::query("UPDATE import_sources SET last_run = now(), last_error = NULL WHERE id = $1")
            .bind(id)
            .execute(self.pool.get_pool())
            .await?;
        Ok(())
    }

    pub async fn mark_source_error(&self, id: i64, error: &str) -> CoreResult<()> {
        sqlx::query(
            "UPDATE import_sources SET status = $2, last_error = $3, last_run = now() WHERE id = $1",
        )
        .bind(id)
        .bind(ImportSourceStatus::Error)
        .bind(error)
        .execute(self.pool.get_pool())
        .await?;
        Ok(())
    }

    // ==================== Activity log ====================

    pub async fn record_activity(
        &self,
        user_id: Option<i32>,
        action: &str,
        resource_type: &str,
        resource_id: Option<i64>,
        description: &str,
        extra_data: Option<serde_json::Value>,
    ) -> CoreResult<()> {
        sqlx::query(
            r#"INSERT INTO activity_logs
                 (user_id, action, resource_type, resource_id, description, extra_data, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, now())"#,
        )
        .bind(user_id)
        .bind(action)
        .bind(resource_type)
        .bind(resource_id)
        .bind(description)
        .bind(extra_data)
        .execute(self.pool.get_pool())
        .await?;
        Ok(())
    }

    #[allow(dead_code)]
    pub async fn recent_activity(&self, limit: i64) -> CoreResult<Vec<ActivityLog>> {
        let rows = sqlx::query_as::<_, ActivityLog>(
            "SELECT * FROM activity_logs ORDER BY created_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(self.pool.get_pool())
        .await?;
        Ok(rows)
    }
}
