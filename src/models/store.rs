use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::executor::{ExecutorStore, JobOutcome};
use crate::joblog::LogRecord;
use crate::models::lead::apply_verification;
use crate::models::verification_log::insert_verification_log;
use crate::models::{
    Error, Job, JobLogRepository, JobRepository, JobStatus, Lead, LeadRepository, UsageKind,
    UsageRepository, VerificationSettings, WorkspaceConfigRepository, current_period,
};

/// Postgres-backed executor storage. Log appends and progress updates commit
/// individually so readers see the stream grow; the final result is one
/// transaction.
#[derive(Clone)]
pub struct PgExecutorStore {
    pool: PgPool,
    jobs: JobRepository,
    job_logs: JobLogRepository,
    leads: LeadRepository,
    config: WorkspaceConfigRepository,
    usage: UsageRepository,
}

impl PgExecutorStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            jobs: JobRepository::new(pool.clone()),
            job_logs: JobLogRepository::new(pool.clone()),
            leads: LeadRepository::new(pool.clone()),
            config: WorkspaceConfigRepository::new(pool.clone()),
            usage: UsageRepository::new(pool.clone()),
            pool,
        }
    }
}

#[async_trait]
impl ExecutorStore for PgExecutorStore {
    async fn load_job(&self, workspace_id: i64, job_id: Uuid) -> Result<Option<Job>, Error> {
        self.jobs.find(workspace_id, job_id).await
    }

    async fn job_status(&self, job: &Job) -> Result<JobStatus, Error> {
        self.jobs.status_of(job.id).await
    }

    async fn mark_job_running(&self, job: &Job, progress: i32) -> Result<(), Error> {
        self.jobs.mark_running(job.id, progress).await
    }

    async fn fail_job(&self, job: &Job, error: &str) -> Result<(), Error> {
        self.jobs.mark_failed(job.id, error).await
    }

    async fn append_log(&self, job: &Job, record: &LogRecord) -> Result<(), Error> {
        self.job_logs.append(job.id, record).await
    }

    async fn load_lead(&self, workspace_id: i64, lead_id: i64) -> Result<Option<Lead>, Error> {
        self.leads.find(workspace_id, lead_id).await
    }

    async fn resolve_settings(&self, workspace_id: i64) -> Result<VerificationSettings, Error> {
        self.config.resolve(workspace_id).await
    }

    async fn finalize_success(
        &self,
        job: &Job,
        lead: &Lead,
        outcome: &JobOutcome,
    ) -> Result<(), Error> {
        let mut tx = self.pool.begin().await?;

        insert_verification_log(&mut *tx, &outcome.verification_log(lead.id, job.id)).await?;
        apply_verification(&mut *tx, lead.id, &outcome.lead_update()).await?;

        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'succeeded', progress = 100, result = $2, updated_at = now()
            WHERE id = $1 AND status NOT IN ('succeeded', 'failed', 'cancelled')
            "#,
        )
        .bind(job.id)
        .bind(outcome.job_result(lead.id))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn increment_usage(&self, workspace_id: i64, kind: UsageKind) -> Result<(), Error> {
        self.usage
            .increment(workspace_id, &current_period(), kind)
            .await
    }
}
