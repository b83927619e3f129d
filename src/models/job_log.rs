use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;

use crate::joblog::{Level, LogRecord, Visibility};
use crate::models::Error;

/// One persisted line of a job's log stream. `seq` is dense and contiguous
/// from 0 within the job.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct JobLogLine {
    pub id: i64,
    pub job_id: i64,
    pub seq: i32,
    pub message: String,
    pub level: Level,
    pub visibility: Visibility,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct JobLogRepository {
    pool: PgPool,
}

impl JobLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append a record with the next sequence number and mirror the message
    /// onto the job row. The executor is the only writer of a job's log, so
    /// the MAX(seq) read is race-free.
    pub async fn append(&self, job_row_id: i64, record: &LogRecord) -> Result<(), Error> {
        let message = record.message();
        let mut tx = self.pool.begin().await?;

        let seq: i32 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(seq) + 1, 0) FROM job_log_lines WHERE job_id = $1",
        )
        .bind(job_row_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO job_log_lines (job_id, seq, message, level, visibility)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(job_row_id)
        .bind(seq)
        .bind(&message)
        .bind(record.level())
        .bind(record.visibility())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE jobs
            SET log_lines = COALESCE(log_lines, '[]'::jsonb) || jsonb_build_array($2::text),
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(job_row_id)
        .bind(&message)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Log lines in sequence order, filtered by the viewer's privilege.
    pub async fn list(
        &self,
        job_row_id: i64,
        include_privileged: bool,
    ) -> Result<Vec<JobLogLine>, Error> {
        Ok(sqlx::query_as::<_, JobLogLine>(
            r#"
            SELECT id, job_id, seq, message, level, visibility, created_at
            FROM job_log_lines
            WHERE job_id = $1 AND (visibility = 'public' OR $2)
            ORDER BY seq
            "#,
        )
        .bind(job_row_id)
        .bind(include_privileged)
        .fetch_all(&self.pool)
        .await?)
    }
}
