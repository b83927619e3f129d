use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;

use crate::models::Error;
use crate::verify::VerificationStatus;

/// Canonical audit record of one completed verify job. Immutable once
/// written.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct VerificationLog {
    pub id: i64,
    pub lead_id: i64,
    pub job_id: Option<i64>,
    pub mx_hosts: Option<serde_json::Value>,
    /// email -> {accepted, detail, status, confidence_score}
    pub probe_results: Option<serde_json::Value>,
    pub best_email: String,
    pub best_status: VerificationStatus,
    pub best_confidence: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewVerificationLog {
    pub lead_id: i64,
    pub job_id: Option<i64>,
    pub mx_hosts: Vec<String>,
    pub probe_results: serde_json::Value,
    pub best_email: String,
    pub best_status: VerificationStatus,
    pub best_confidence: i32,
}

pub(crate) async fn insert_verification_log<'e, E>(
    executor: E,
    log: &NewVerificationLog,
) -> Result<(), sqlx::Error>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO verification_logs
            (lead_id, job_id, mx_hosts, probe_results, best_email, best_status, best_confidence)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(log.lead_id)
    .bind(log.job_id)
    .bind(serde_json::json!(log.mx_hosts))
    .bind(&log.probe_results)
    .bind(&log.best_email)
    .bind(log.best_status)
    .bind(log.best_confidence)
    .execute(executor)
    .await?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct VerificationLogRepository {
    pool: PgPool,
}

impl VerificationLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, log: &NewVerificationLog) -> Result<(), Error> {
        insert_verification_log(&self.pool, log).await?;
        Ok(())
    }

    pub async fn latest_for_lead(&self, lead_id: i64) -> Result<Option<VerificationLog>, Error> {
        Ok(sqlx::query_as::<_, VerificationLog>(
            r#"
            SELECT id, lead_id, job_id, mx_hosts, probe_results,
                   best_email, best_status, best_confidence, created_at
            FROM verification_logs
            WHERE lead_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(lead_id)
        .fetch_optional(&self.pool)
        .await?)
    }
}
