use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "job_kind", rename_all = "snake_case")]
pub enum JobKind {
    Verify,
    ExportCsv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "job_status", rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal statuses are immutable: no transition ever leaves them.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// One asynchronous verification (or export). Created queued by the caller
/// right before enqueuing; owned by the executor afterwards.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Job {
    pub id: i64,
    pub workspace_id: i64,
    pub lead_id: Option<i64>,
    pub job_id: Uuid,
    pub kind: JobKind,
    pub status: JobStatus,
    pub progress: i32,
    pub result: Option<serde_json::Value>,
    pub error: String,
    /// JSON mirror of the public log stream, kept next to the canonical
    /// job_log_lines rows so a single row read can render progress.
    pub log_lines: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const JOB_COLUMNS: &str = r#"
    id, workspace_id, lead_id, job_id, kind, status, progress,
    result, error, log_lines, created_at, updated_at
"#;

#[derive(Debug, Clone)]
pub struct JobRepository {
    pool: PgPool,
}

impl JobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        workspace_id: i64,
        lead_id: Option<i64>,
        kind: JobKind,
    ) -> Result<Job, Error> {
        Ok(sqlx::query_as::<_, Job>(&format!(
            r#"
            INSERT INTO jobs (workspace_id, lead_id, job_id, kind, status, progress, error)
            VALUES ($1, $2, $3, $4, 'queued', 0, '')
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(workspace_id)
        .bind(lead_id)
        .bind(Uuid::new_v4())
        .bind(kind)
        .fetch_one(&self.pool)
        .await?)
    }

    pub async fn find(&self, workspace_id: i64, job_id: Uuid) -> Result<Option<Job>, Error> {
        Ok(sqlx::query_as::<_, Job>(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM jobs
            WHERE job_id = $1 AND workspace_id = $2
            "#
        ))
        .bind(job_id)
        .bind(workspace_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn status_of(&self, id: i64) -> Result<JobStatus, Error> {
        Ok(
            sqlx::query_scalar::<_, JobStatus>("SELECT status FROM jobs WHERE id = $1")
                .bind(id)
                .fetch_one(&self.pool)
                .await?,
        )
    }

    /// queued -> running. A no-op when the job already reached a terminal
    /// status.
    pub async fn mark_running(&self, id: i64, progress: i32) -> Result<(), Error> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'running', progress = $2, updated_at = now()
            WHERE id = $1 AND status NOT IN ('succeeded', 'failed', 'cancelled')
            "#,
        )
        .bind(id)
        .bind(progress)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_failed(&self, id: i64, error: &str) -> Result<(), Error> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed', error = $2, updated_at = now()
            WHERE id = $1 AND status NOT IN ('succeeded', 'failed', 'cancelled')
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Cancellation from the API: only a still-queued job can be cancelled
    /// outright. Returns whether the transition happened.
    pub async fn cancel(&self, workspace_id: i64, job_id: Uuid) -> Result<bool, Error> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'cancelled', updated_at = now()
            WHERE job_id = $1 AND workspace_id = $2 AND status = 'queued'
            "#,
        )
        .bind(job_id)
        .bind(workspace_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
