//! At-least-once durable dispatch, backed by a Postgres `job_tasks` table
//! claimed via `FOR UPDATE SKIP LOCKED` so tasks survive a worker restart.
//! An in-memory staging queue sits in front as a bounded claim cache within
//! one running process, drained into the durable table on enqueue.

use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::VecDeque;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    ProcessDocument,
    GenerateEmbeddings,
    ExtractMetadata,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProcessDocument => "process_document",
            Self::GenerateEmbeddings => "generate_embeddings",
            Self::ExtractMetadata => "extract_metadata",
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct JobTask {
    pub id: i64,
    pub kind: TaskKind,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempts: i32,
    pub soft_deadline_at: Option<DateTime<Utc>>,
    pub hard_deadline_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl JobTask {
    pub fn document_id(&self) -> CoreResult<i64> {
        self.payload
            .get("document_id")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| CoreError::Fatal(format!("task {} has no document_id payload", self.id)))
    }
}

pub struct JobQueue {
    pool: PgPool,
    soft_deadline: Duration,
    hard_deadline: Duration,
    /// Bounded staging cache draining into the durable table; avoids a
    /// round trip to Postgres for the common "I just enqueued this, now
    /// claim it" path within one process.
    staging: Mutex<VecDeque<i64>>,
}

impl JobQueue {
    pub fn new(pool: PgPool, soft_deadline_minutes: u64, hard_deadline_minutes: u64) -> Self {
        Self {
            pool,
            soft_deadline: Duration::minutes(soft_deadline_minutes as i64),
            hard_deadline: Duration::minutes(hard_deadline_minutes as i64),
            staging: Mutex::new(VecDeque::new()),
        }
    }

    pub async fn enqueue(&self, kind: TaskKind, document_id: i64) -> CoreResult<i64> {
        let now = Utc::now();
        let row: (i64,) = sqlx::query_as(
            r#"INSERT INTO job_tasks
                 (kind, payload, status, run_after, soft_deadline_at, hard_deadline_at,
                  attempts, created_at, updated_at)
               VALUES ($1, $2, 'queued', now(), NULL, NULL, 0, now(), now())
               RETURNING id"#,
        )
        .bind(kind)
        .bind(serde_json::json!({ "document_id": document_id }))
        .fetch_one(&self.pool)
        .await
        .map_err(CoreError::from)?;

        let _ = now; // deadlines stamped at claim time, not enqueue time
        self.staging.lock().await.push_back(row.0);
        Ok(row.0)
    }

    /// Claims the oldest queued row under `FOR UPDATE SKIP LOCKED`, stamping
    /// soft/hard deadlines from claim time so `worker::runs a task` can
    /// enforce them with `tokio::time::timeout`.
    pub async fn claim(&self) -> CoreResult<Option<JobTask>> {
        self.staging.lock().await.pop_front();

        let now = Utc::now();
        let soft = now + self.soft_deadline;
        let hard = now + self.hard_deadline;

        let task = sqlx::query_as::<_, JobTask>(
            r#"UPDATE job_tasks SET
                 status = 'running',
                 soft_deadline_at = $1,
                 hard_deadline_at = $2,
                 attempts = attempts + 1,
                 updated_at = now()
               WHERE id = (
                 SELECT id FROM job_tasks
                 WHERE status = 'queued' AND run_after <= now()
                 ORDER BY created_at
                 FOR UPDATE SKIP LOCKED
                 LIMIT 1
               )
               RETURNING id, kind, payload, status, attempts, soft_deadline_at, hard_deadline_at, last_error"#,
        )
        .bind(soft)
        .bind(hard)
        .fetch_optional(&self.pool)
        .await
        .map_err(CoreError::from)?;

        Ok(task)
    }

    pub async fn mark_done(&self, task_id: i64) -> CoreResult<()> {
        sqlx::query("UPDATE job_tasks SET status = 'done', updated_at = now() WHERE id = $1")
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Cancellation (soft-deadline overrun) is reported the same way as any
    /// other task failure — the orchestrator treats both as a `failed`
    /// transition.
    pub async fn mark_failed(&self, task_id: i64, error: &str) -> CoreResult<()> {
        sqlx::query(
            "UPDATE job_tasks SET status = 'failed', last_error = $2, updated_at = now() WHERE id = $1",
        )
        .bind(task_id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Re-queues a task (used by the reprocess/regenerate-embeddings APIs,
    /// which re-enter `process_document`/`generate_embeddings`).
    pub async fn requeue(&self, kind: TaskKind, document_id: i64) -> CoreResult<i64> {
        self.enqueue(kind, document_id).await
    }
}
