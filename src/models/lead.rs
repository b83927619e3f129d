use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;

use crate::models::Error;
use crate::verify::VerificationStatus;

/// A person we try to find a mailbox for. The engine only reads the naming
/// fields and writes the verification fields; everything else belongs to the
/// lead-management surface.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Lead {
    pub id: i64,
    pub workspace_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub company: String,
    pub domain: String,
    pub linkedin_url: String,
    pub email_best: String,
    pub email_candidates: Option<serde_json::Value>,
    pub verification_status: VerificationStatus,
    pub confidence_score: i32,
    pub mx_found: bool,
    pub catch_all: bool,
    pub smtp_check: bool,
    pub notes: String,
    pub web_mentioned: bool,
    pub opt_out: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Verification fields written when a verify job completes.
#[derive(Debug, Clone)]
pub struct LeadVerificationUpdate {
    pub email_candidates: Vec<String>,
    pub email_best: String,
    pub verification_status: VerificationStatus,
    pub confidence_score: i32,
    pub mx_found: bool,
    pub catch_all: bool,
    pub smtp_check: bool,
    pub notes: String,
    pub web_mentioned: bool,
}

pub(crate) async fn apply_verification<'e, E>(
    executor: E,
    lead_id: i64,
    update: &LeadVerificationUpdate,
) -> Result<(), sqlx::Error>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(
        r#"
        UPDATE leads
        SET email_candidates = $2,
            email_best = $3,
            verification_status = $4,
            confidence_score = $5,
            mx_found = $6,
            catch_all = $7,
            smtp_check = $8,
            notes = $9,
            web_mentioned = $10,
            updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(lead_id)
    .bind(serde_json::json!(update.email_candidates))
    .bind(&update.email_best)
    .bind(update.verification_status)
    .bind(update.confidence_score)
    .bind(update.mx_found)
    .bind(update.catch_all)
    .bind(update.smtp_check)
    .bind(&update.notes)
    .bind(update.web_mentioned)
    .execute(executor)
    .await?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct LeadRepository {
    pool: PgPool,
}

impl LeadRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find(&self, workspace_id: i64, lead_id: i64) -> Result<Option<Lead>, Error> {
        Ok(sqlx::query_as::<_, Lead>(
            r#"
            SELECT id, workspace_id, first_name, last_name, company, domain,
                   linkedin_url, email_best, email_candidates, verification_status,
                   confidence_score, mx_found, catch_all, smtp_check, notes,
                   web_mentioned, opt_out, created_at, updated_at
            FROM leads
            WHERE id = $1 AND workspace_id = $2
            "#,
        )
        .bind(lead_id)
        .bind(workspace_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn update_verification(
        &self,
        lead_id: i64,
        update: &LeadVerificationUpdate,
    ) -> Result<(), Error> {
        apply_verification(&self.pool, lead_id, update).await?;
        Ok(())
    }
}
