//! Background job executor: consumes verification tasks, drives the engine,
//! and persists progress, log lines and results.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::joblog::{JobLogger, LogRecord, LogSink};
use crate::models::{
    Error, Job, JobStatus, Lead, LeadVerificationUpdate, NewVerificationLog, UsageKind,
    VerificationSettings,
};
use crate::queue::VerifyTask;
use crate::verify::dns::MailDns;
use crate::verify::{CandidateProbe, VerificationStatus, Verifier, VerifyResult, WebSearchUsage};
use crate::webhooks::WebhookDispatcher;

/// A verification may spend a long time on DNS and several MX hosts per
/// candidate. Past this limit the job is aborted at the next suspension
/// point; the hard kill shortly after is the deployment's concern.
pub const SOFT_TIME_LIMIT: Duration = Duration::from_secs(600);

const TIMEOUT_ERROR: &str = "Execution time exceeded (timeout)";
const MAX_ERROR_LEN: usize = 500;
const PROBE_RESULT_LOG_LIMIT: usize = 15;

/// Storage the executor drives. The production implementation wraps the
/// Postgres repositories; tests run against an in-memory store.
#[async_trait]
pub trait ExecutorStore: Send + Sync {
    async fn load_job(&self, workspace_id: i64, job_id: Uuid) -> Result<Option<Job>, Error>;
    async fn job_status(&self, job: &Job) -> Result<JobStatus, Error>;
    async fn mark_job_running(&self, job: &Job, progress: i32) -> Result<(), Error>;
    async fn fail_job(&self, job: &Job, error: &str) -> Result<(), Error>;
    async fn append_log(&self, job: &Job, record: &LogRecord) -> Result<(), Error>;
    async fn load_lead(&self, workspace_id: i64, lead_id: i64) -> Result<Option<Lead>, Error>;
    async fn resolve_settings(&self, workspace_id: i64) -> Result<VerificationSettings, Error>;
    /// One transaction: verification log row, lead verification fields, job
    /// success (status, progress, result).
    async fn finalize_success(
        &self,
        job: &Job,
        lead: &Lead,
        outcome: &JobOutcome,
    ) -> Result<(), Error>;
    async fn increment_usage(&self, workspace_id: i64, kind: UsageKind) -> Result<(), Error>;
}

/// Everything a finished verification produces.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub candidates: Vec<String>,
    pub best_email: String,
    pub best: Option<VerifyResult>,
    pub probe_results: Vec<(String, CandidateProbe)>,
    pub mx_hosts: Vec<String>,
}

impl JobOutcome {
    pub fn status(&self) -> VerificationStatus {
        self.best
            .as_ref()
            .map(|b| b.status)
            .unwrap_or(VerificationStatus::Unknown)
    }

    pub fn confidence(&self) -> i32 {
        self.best.as_ref().map(|b| b.score as i32).unwrap_or(0)
    }

    pub fn lead_update(&self) -> LeadVerificationUpdate {
        LeadVerificationUpdate {
            email_candidates: self.candidates.clone(),
            email_best: self.best_email.clone(),
            verification_status: self.status(),
            confidence_score: self.confidence(),
            mx_found: self.best.as_ref().is_some_and(|b| b.mx_found),
            catch_all: self
                .best
                .as_ref()
                .and_then(|b| b.catch_all)
                .unwrap_or(false),
            smtp_check: self.best.as_ref().is_some_and(|b| b.smtp_attempted),
            notes: self
                .best
                .as_ref()
                .map(|b| b.reason.clone())
                .unwrap_or_default(),
            web_mentioned: self.best.as_ref().is_some_and(|b| b.web_mentioned),
        }
    }

    pub fn job_result(&self, lead_id: i64) -> Value {
        json!({
            "lead_id": lead_id,
            "email_best": self.best_email,
            "verification_status": self.status(),
        })
    }

    pub fn verification_log(&self, lead_id: i64, job_row_id: i64) -> NewVerificationLog {
        let probe_results = self
            .probe_results
            .iter()
            .map(|(email, probe)| (email.clone(), serde_json::to_value(probe).unwrap_or(Value::Null)))
            .collect::<serde_json::Map<_, _>>();
        NewVerificationLog {
            lead_id,
            job_id: Some(job_row_id),
            mx_hosts: self.mx_hosts.clone(),
            probe_results: Value::Object(probe_results),
            best_email: self.best_email.clone(),
            best_status: self.status(),
            best_confidence: self.confidence(),
        }
    }
}

fn truncate_error(message: &str) -> String {
    message.chars().take(MAX_ERROR_LEN).collect()
}

/// Log sink that appends to the job's persisted stream. Append failures must
/// not take the verification down; they only surface in operational logs.
struct JobLogSink {
    store: Arc<dyn ExecutorStore>,
    job: Job,
}

#[async_trait]
impl LogSink for JobLogSink {
    async fn emit(&self, record: LogRecord) {
        if let Err(err) = self.store.append_log(&self.job, &record).await {
            error!(job_id = %self.job.job_id, "failed to append job log line: {err}");
        }
    }
}

/// Usage hook: counts web searches against the workspace. Only serper calls
/// are metered.
struct StoreWebUsage {
    store: Arc<dyn ExecutorStore>,
    workspace_id: i64,
}

#[async_trait]
impl WebSearchUsage for StoreWebUsage {
    async fn web_search_performed(&self, provider: &str) {
        if provider != "serper" {
            return;
        }
        if let Err(err) = self
            .store
            .increment_usage(self.workspace_id, UsageKind::WebSearch)
            .await
        {
            error!("failed to track web search usage: {err}");
        }
    }
}

pub struct JobExecutor {
    store: Arc<dyn ExecutorStore>,
    verifier: Arc<Verifier>,
    dns: Arc<dyn MailDns>,
    webhooks: Arc<dyn WebhookDispatcher>,
    soft_time_limit: Duration,
}

impl JobExecutor {
    pub fn new(
        store: Arc<dyn ExecutorStore>,
        verifier: Arc<Verifier>,
        dns: Arc<dyn MailDns>,
        webhooks: Arc<dyn WebhookDispatcher>,
    ) -> Self {
        Self {
            store,
            verifier,
            dns,
            webhooks,
            soft_time_limit: SOFT_TIME_LIMIT,
        }
    }

    pub fn with_soft_time_limit(mut self, limit: Duration) -> Self {
        self.soft_time_limit = limit;
        self
    }

    fn logger(&self, job: &Job) -> JobLogger {
        JobLogger::new(Arc::new(JobLogSink {
            store: self.store.clone(),
            job: job.clone(),
        }))
    }

    /// Run one task to completion. Re-running a task whose job is already in
    /// a terminal state is a no-op. Errors that escape are storage failures,
    /// re-raised to the queue infrastructure after the job row was marked
    /// failed.
    pub async fn run(&self, task: &VerifyTask) -> Result<(), Error> {
        let Some(job) = self.store.load_job(task.workspace_id, task.job_id).await? else {
            info!(job_id = %task.job_id, "job not found, skipping task");
            return Ok(());
        };
        if job.status.is_terminal() {
            info!(job_id = %task.job_id, status = ?job.status, "job already settled, skipping");
            return Ok(());
        }

        match self.execute(&job, task).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let reason = truncate_error(&err.to_string());
                self.logger(&job).error_generic(&reason).await;
                if let Err(fail_err) = self.store.fail_job(&job, &reason).await {
                    error!(job_id = %job.job_id, "failed to mark job failed: {fail_err}");
                }
                Err(err)
            }
        }
    }

    async fn execute(&self, job: &Job, task: &VerifyTask) -> Result<(), Error> {
        self.store.mark_job_running(job, 10).await?;

        let log = self.logger(job);
        log.job_started("verify", task.lead_id, task.workspace_id)
            .await;
        log.job_starting_verification().await;
        log.debug_worker_processing(&job.job_id.to_string(), task.lead_id, task.workspace_id)
            .await;

        let Some(lead) = self.store.load_lead(task.workspace_id, task.lead_id).await? else {
            log.error_lead_not_found(task.lead_id).await;
            self.store.fail_job(job, "Lead not found").await?;
            return Ok(());
        };
        if lead.opt_out {
            log.error_lead_opted_out(lead.id).await;
            self.store.fail_job(job, "Lead opted out").await?;
            return Ok(());
        }
        log.debug_lead_loaded(lead.id, &lead.domain, &lead.first_name, &lead.last_name)
            .await;

        let settings = self.store.resolve_settings(task.workspace_id).await?;
        let opts = settings.to_verify_options();

        log.verify_domain(&lead.domain).await;
        log.verify_generating_candidates().await;
        log.verify_checking_mail_server().await;
        log.debug_calling_verifier(&lead.first_name, &lead.last_name, &lead.domain)
            .await;

        let usage_hook = StoreWebUsage {
            store: self.store.clone(),
            workspace_id: task.workspace_id,
        };
        let picked = match tokio::time::timeout(
            self.soft_time_limit,
            self.verifier.verify_and_pick_best(
                &lead.first_name,
                &lead.last_name,
                &lead.domain,
                &opts,
                &log,
                Some(&usage_hook),
            ),
        )
        .await
        {
            Ok(picked) => picked,
            Err(_) => {
                log.job_timeout().await;
                self.store.fail_job(job, TIMEOUT_ERROR).await?;
                return Ok(());
            }
        };

        if let Some(best) = &picked.best {
            log.debug_verifier_result(&picked.best_email, best.status.as_str(), best.score, &best.reason)
                .await;
        }

        // Cancellation is cooperative: re-check before committing results.
        if self.store.job_status(job).await? == JobStatus::Cancelled {
            info!(job_id = %job.job_id, "job cancelled mid-flight, dropping results");
            return Ok(());
        }

        // A separate MX snapshot for the audit record; its failure is logged
        // but never fails the job.
        let mx_hosts: Vec<String> = match self.dns.mx_lookup(&lead.domain, opts.dns_deadline).await
        {
            Ok(records) => {
                log.debug_mx_lookup(
                    &lead.domain,
                    records.len(),
                    &records
                        .iter()
                        .map(|r| format!("{}={}", r.preference, r.exchange))
                        .collect::<Vec<_>>()
                        .join(", "),
                )
                .await;
                records.into_iter().map(|r| r.exchange).collect()
            }
            Err(err) => {
                log.debug_mx_lookup_failed(&lead.domain, &err.to_string()).await;
                Vec::new()
            }
        };
        if mx_hosts.is_empty() {
            log.verify_mx_not_found().await;
        } else {
            log.verify_mx_records(&mx_hosts.join(", ")).await;
        }

        for (i, (email, probe)) in picked.probe_results.iter().enumerate() {
            if i >= PROBE_RESULT_LOG_LIMIT {
                log.debug_more_candidates(picked.probe_results.len() - PROBE_RESULT_LOG_LIMIT)
                    .await;
                break;
            }
            let detail: String = probe.detail.chars().take(100).collect();
            log.debug_candidate_status(email, probe.status.as_str(), &detail)
                .await;
        }

        if picked.best.is_some() && !picked.best_email.is_empty() {
            log.verify_completed(&picked.best_email).await;
        } else {
            log.verify_no_email_found().await;
        }
        log.job_completed(lead.id).await;

        let outcome = JobOutcome {
            candidates: picked.candidates,
            best_email: picked.best_email,
            best: picked.best,
            probe_results: picked.probe_results,
            mx_hosts,
        };
        self.store.finalize_success(job, &lead, &outcome).await?;

        self.store
            .increment_usage(task.workspace_id, UsageKind::Verification)
            .await?;

        let payload = json!({
            "job_id": job.job_id,
            "lead_id": lead.id,
            "email_best": outcome.best_email,
            "verification_status": outcome.status(),
            "confidence_score": outcome.confidence(),
        });
        if let Err(err) = self
            .webhooks
            .dispatch(task.workspace_id, "verification.completed", payload)
            .await
        {
            // Delivery retries are the dispatcher's concern, not the job's.
            warn!(job_id = %job.job_id, "webhook dispatch failed: {err}");
        }

        Ok(())
    }
}
