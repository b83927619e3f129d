//! Structured, persisted job log stream.
//!
//! Every record is the JSON object `{"code": "<CODE>", "params": {...}}`;
//! consumers rebuild the localized sentence from the code and parameters at
//! render time, so no human-readable prose is ever stored. The code prefix
//! fixes level and visibility: `DEBUG_*` records are privileged diagnostics,
//! `ERROR_*` (and the failure lifecycle codes) are error level, everything
//! else is public info.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value, json};

/// Closed set of job log codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogCode {
    // Job lifecycle
    JobStarted,
    JobStartingVerification,
    JobCompleted,
    JobFailed,
    JobTimeout,
    // Verification phases
    VerifyDomain,
    VerifyGeneratingCandidates,
    VerifyCheckingMailServer,
    VerifyCandidate,
    VerifyMxRecords,
    VerifyMxNotFound,
    VerifyCompleted,
    VerifyNoEmailFound,
    // Error conditions
    ErrorLeadNotFound,
    ErrorLeadOptedOut,
    ErrorGeneric,
    // Privileged diagnostics: worker and lead
    DebugWorkerProcessing,
    DebugLeadLoaded,
    DebugConfig,
    DebugCallingVerifier,
    DebugVerifierResult,
    DebugCandidatesGenerated,
    DebugCandidateHeader,
    DebugCandidateStatus,
    DebugMoreCandidates,
    // Privileged diagnostics: DNS
    DebugMxLookup,
    DebugMxLookupFailed,
    DebugProviderDetected,
    DebugDnsSpfDmarc,
    DebugDisposableDomain,
    // Privileged diagnostics: SMTP
    DebugSmtpSkipped,
    DebugSmtpDnsResolve,
    DebugSmtpConnecting,
    DebugSmtpRcptResult,
    DebugSmtpException,
    DebugRcptVerifying,
    // Privileged diagnostics: catch-all
    DebugCatchallChecking,
    DebugCatchallTesting,
    DebugCatchallResult,
    DebugCatchallInconclusive,
    // Privileged diagnostics: web search
    DebugWebSearching,
    DebugWebFound,
    DebugWebNotFound,
    DebugWebError,
    DebugWebSkippedNoProvider,
    DebugWebSkippedNoKey,
}

impl LogCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogCode::JobStarted => "JOB_STARTED",
            LogCode::JobStartingVerification => "JOB_STARTING_VERIFICATION",
            LogCode::JobCompleted => "JOB_COMPLETED",
            LogCode::JobFailed => "JOB_FAILED",
            LogCode::JobTimeout => "JOB_TIMEOUT",
            LogCode::VerifyDomain => "VERIFY_DOMAIN",
            LogCode::VerifyGeneratingCandidates => "VERIFY_GENERATING_CANDIDATES",
            LogCode::VerifyCheckingMailServer => "VERIFY_CHECKING_MAIL_SERVER",
            LogCode::VerifyCandidate => "VERIFY_CANDIDATE",
            LogCode::VerifyMxRecords => "VERIFY_MX_RECORDS",
            LogCode::VerifyMxNotFound => "VERIFY_MX_NOT_FOUND",
            LogCode::VerifyCompleted => "VERIFY_COMPLETED",
            LogCode::VerifyNoEmailFound => "VERIFY_NO_EMAIL_FOUND",
            LogCode::ErrorLeadNotFound => "ERROR_LEAD_NOT_FOUND",
            LogCode::ErrorLeadOptedOut => "ERROR_LEAD_OPTED_OUT",
            LogCode::ErrorGeneric => "ERROR_GENERIC",
            LogCode::DebugWorkerProcessing => "DEBUG_WORKER_PROCESSING",
            LogCode::DebugLeadLoaded => "DEBUG_LEAD_LOADED",
            LogCode::DebugConfig => "DEBUG_CONFIG",
            LogCode::DebugCallingVerifier => "DEBUG_CALLING_VERIFIER",
            LogCode::DebugVerifierResult => "DEBUG_VERIFIER_RESULT",
            LogCode::DebugCandidatesGenerated => "DEBUG_CANDIDATES_GENERATED",
            LogCode::DebugCandidateHeader => "DEBUG_CANDIDATE_HEADER",
            LogCode::DebugCandidateStatus => "DEBUG_CANDIDATE_STATUS",
            LogCode::DebugMoreCandidates => "DEBUG_MORE_CANDIDATES",
            LogCode::DebugMxLookup => "DEBUG_MX_LOOKUP",
            LogCode::DebugMxLookupFailed => "DEBUG_MX_LOOKUP_FAILED",
            LogCode::DebugProviderDetected => "DEBUG_PROVIDER_DETECTED",
            LogCode::DebugDnsSpfDmarc => "DEBUG_DNS_SPF_DMARC",
            LogCode::DebugDisposableDomain => "DEBUG_DISPOSABLE_DOMAIN",
            LogCode::DebugSmtpSkipped => "DEBUG_SMTP_SKIPPED",
            LogCode::DebugSmtpDnsResolve => "DEBUG_SMTP_DNS_RESOLVE",
            LogCode::DebugSmtpConnecting => "DEBUG_SMTP_CONNECTING",
            LogCode::DebugSmtpRcptResult => "DEBUG_SMTP_RCPT_RESULT",
            LogCode::DebugSmtpException => "DEBUG_SMTP_EXCEPTION",
            LogCode::DebugRcptVerifying => "DEBUG_RCPT_VERIFYING",
            LogCode::DebugCatchallChecking => "DEBUG_CATCHALL_CHECKING",
            LogCode::DebugCatchallTesting => "DEBUG_CATCHALL_TESTING",
            LogCode::DebugCatchallResult => "DEBUG_CATCHALL_RESULT",
            LogCode::DebugCatchallInconclusive => "DEBUG_CATCHALL_INCONCLUSIVE",
            LogCode::DebugWebSearching => "DEBUG_WEB_SEARCHING",
            LogCode::DebugWebFound => "DEBUG_WEB_FOUND",
            LogCode::DebugWebNotFound => "DEBUG_WEB_NOT_FOUND",
            LogCode::DebugWebError => "DEBUG_WEB_ERROR",
            LogCode::DebugWebSkippedNoProvider => "DEBUG_WEB_SKIPPED_NO_PROVIDER",
            LogCode::DebugWebSkippedNoKey => "DEBUG_WEB_SKIPPED_NO_KEY",
        }
    }

    pub fn level(&self) -> Level {
        if matches!(self, LogCode::JobFailed | LogCode::JobTimeout)
            || self.as_str().starts_with("ERROR_")
        {
            Level::Error
        } else if self.as_str().starts_with("DEBUG_") {
            Level::Debug
        } else {
            Level::Info
        }
    }

    pub fn visibility(&self) -> Visibility {
        if self.as_str().starts_with("DEBUG_") {
            Visibility::Privileged
        } else {
            Visibility::Public
        }
    }
}

impl Serialize for LogCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl std::fmt::Display for LogCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "log_level", rename_all = "lowercase")]
pub enum Level {
    Info,
    Debug,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "log_visibility", rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Privileged,
}

/// One log line, before the store assigns it a sequence number.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    pub code: LogCode,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
}

impl LogRecord {
    pub fn new(code: LogCode, params: Value) -> Self {
        let params = match params {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self { code, params }
    }

    pub fn level(&self) -> Level {
        self.code.level()
    }

    pub fn visibility(&self) -> Visibility {
        self.code.visibility()
    }

    /// The wire/storage form: `{"code":"...","params":{...}}`.
    pub fn message(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{{\"code\":\"{}\"}}", self.code))
    }
}

/// Destination for job log records. The executor writes them to storage,
/// stateless verification drops them, tests capture them.
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn emit(&self, record: LogRecord);
}

pub struct NullSink;

#[async_trait]
impl LogSink for NullSink {
    async fn emit(&self, _record: LogRecord) {}
}

#[derive(Default)]
pub struct CapturingSink {
    records: Mutex<Vec<LogRecord>>,
}

impl CapturingSink {
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn codes(&self) -> Vec<LogCode> {
        self.records.lock().unwrap().iter().map(|r| r.code).collect()
    }
}

#[async_trait]
impl LogSink for CapturingSink {
    async fn emit(&self, record: LogRecord) {
        self.records.lock().unwrap().push(record);
    }
}

/// Typed emitters for the closed code set, so call sites never assemble raw
/// parameter maps.
#[derive(Clone)]
pub struct JobLogger {
    sink: Arc<dyn LogSink>,
}

impl JobLogger {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }

    pub async fn emit(&self, code: LogCode, params: Value) {
        self.sink.emit(LogRecord::new(code, params)).await;
    }

    // Job lifecycle

    pub async fn job_started(&self, job_type: &str, lead_id: i64, workspace_id: i64) {
        self.emit(
            LogCode::JobStarted,
            json!({ "job_type": job_type, "lead_id": lead_id, "workspace_id": workspace_id }),
        )
        .await;
    }

    pub async fn job_starting_verification(&self) {
        self.emit(LogCode::JobStartingVerification, Value::Null).await;
    }

    pub async fn job_completed(&self, lead_id: i64) {
        self.emit(LogCode::JobCompleted, json!({ "lead_id": lead_id }))
            .await;
    }

    pub async fn job_failed(&self, reason: &str) {
        self.emit(LogCode::JobFailed, json!({ "reason": reason }))
            .await;
    }

    pub async fn job_timeout(&self) {
        self.emit(LogCode::JobTimeout, Value::Null).await;
    }

    // Verification phases (public)

    pub async fn verify_domain(&self, domain: &str) {
        self.emit(LogCode::VerifyDomain, json!({ "domain": domain }))
            .await;
    }

    pub async fn verify_generating_candidates(&self) {
        self.emit(LogCode::VerifyGeneratingCandidates, Value::Null)
            .await;
    }

    pub async fn verify_checking_mail_server(&self) {
        self.emit(LogCode::VerifyCheckingMailServer, Value::Null).await;
    }

    pub async fn verify_candidate(&self, index: usize, total: usize, email: &str) {
        self.emit(
            LogCode::VerifyCandidate,
            json!({ "index": index, "total": total, "email": email }),
        )
        .await;
    }

    pub async fn verify_mx_records(&self, hosts: &str) {
        self.emit(LogCode::VerifyMxRecords, json!({ "hosts": hosts }))
            .await;
    }

    pub async fn verify_mx_not_found(&self) {
        self.emit(LogCode::VerifyMxNotFound, Value::Null).await;
    }

    pub async fn verify_completed(&self, email: &str) {
        self.emit(LogCode::VerifyCompleted, json!({ "email": email }))
            .await;
    }

    pub async fn verify_no_email_found(&self) {
        self.emit(LogCode::VerifyNoEmailFound, Value::Null).await;
    }

    // Errors

    pub async fn error_lead_not_found(&self, lead_id: i64) {
        self.emit(LogCode::ErrorLeadNotFound, json!({ "lead_id": lead_id }))
            .await;
    }

    pub async fn error_lead_opted_out(&self, lead_id: i64) {
        self.emit(LogCode::ErrorLeadOptedOut, json!({ "lead_id": lead_id }))
            .await;
    }

    pub async fn error_generic(&self, error: &str) {
        self.emit(LogCode::ErrorGeneric, json!({ "error": error }))
            .await;
    }

    // Privileged diagnostics: worker and lead

    pub async fn debug_worker_processing(&self, job_id: &str, lead_id: i64, workspace_id: i64) {
        self.emit(
            LogCode::DebugWorkerProcessing,
            json!({ "job_id": job_id, "lead_id": lead_id, "workspace_id": workspace_id }),
        )
        .await;
    }

    pub async fn debug_lead_loaded(&self, lead_id: i64, domain: &str, first: &str, last: &str) {
        self.emit(
            LogCode::DebugLeadLoaded,
            json!({ "lead_id": lead_id, "domain": domain, "first_name": first, "last_name": last }),
        )
        .await;
    }

    pub async fn debug_config(&self, mail_from: &str, smtp_timeout: u64, dns_timeout: f64) {
        self.emit(
            LogCode::DebugConfig,
            json!({ "mail_from": mail_from, "smtp_timeout": smtp_timeout, "dns_timeout": dns_timeout }),
        )
        .await;
    }

    pub async fn debug_calling_verifier(&self, first: &str, last: &str, domain: &str) {
        self.emit(
            LogCode::DebugCallingVerifier,
            json!({ "first_name": first, "last_name": last, "domain": domain }),
        )
        .await;
    }

    pub async fn debug_verifier_result(
        &self,
        email: &str,
        status: &str,
        confidence: u8,
        reason: &str,
    ) {
        self.emit(
            LogCode::DebugVerifierResult,
            json!({ "email": email, "status": status, "confidence": confidence, "reason": reason }),
        )
        .await;
    }

    pub async fn debug_candidates_generated(&self, domain: &str, count: usize, preview: &str) {
        self.emit(
            LogCode::DebugCandidatesGenerated,
            json!({ "domain": domain, "count": count, "preview": preview }),
        )
        .await;
    }

    pub async fn debug_candidate_header(&self, index: usize, total: usize, email: &str) {
        self.emit(
            LogCode::DebugCandidateHeader,
            json!({ "index": index, "total": total, "email": email }),
        )
        .await;
    }

    pub async fn debug_candidate_status(&self, email: &str, status: &str, detail: &str) {
        self.emit(
            LogCode::DebugCandidateStatus,
            json!({ "email": email, "status": status, "detail": detail }),
        )
        .await;
    }

    pub async fn debug_more_candidates(&self, count: usize) {
        self.emit(LogCode::DebugMoreCandidates, json!({ "count": count }))
            .await;
    }

    // Privileged diagnostics: DNS

    pub async fn debug_mx_lookup(&self, domain: &str, count: usize, hosts: &str) {
        self.emit(
            LogCode::DebugMxLookup,
            json!({ "domain": domain, "count": count, "hosts": hosts }),
        )
        .await;
    }

    pub async fn debug_mx_lookup_failed(&self, domain: &str, error: &str) {
        self.emit(
            LogCode::DebugMxLookupFailed,
            json!({ "domain": domain, "error": error }),
        )
        .await;
    }

    pub async fn debug_provider_detected(&self, provider: &str) {
        self.emit(
            LogCode::DebugProviderDetected,
            json!({ "provider": provider }),
        )
        .await;
    }

    pub async fn debug_dns_spf_dmarc(&self, spf: bool, dmarc: bool) {
        self.emit(
            LogCode::DebugDnsSpfDmarc,
            json!({ "spf": spf, "dmarc": dmarc }),
        )
        .await;
    }

    pub async fn debug_disposable_domain(&self, domain: &str) {
        self.emit(
            LogCode::DebugDisposableDomain,
            json!({ "domain": domain }),
        )
        .await;
    }

    // Privileged diagnostics: SMTP

    pub async fn debug_smtp_skipped(&self) {
        self.emit(LogCode::DebugSmtpSkipped, Value::Null).await;
    }

    pub async fn debug_smtp_dns_resolve(&self, host: &str, ip: Option<&str>) {
        self.emit(
            LogCode::DebugSmtpDnsResolve,
            json!({ "mx_host": host, "ip": ip.unwrap_or("failed") }),
        )
        .await;
    }

    pub async fn debug_smtp_connecting(&self, host: &str, ip: &str, timeout: u64) {
        self.emit(
            LogCode::DebugSmtpConnecting,
            json!({ "mx_host": host, "ip": ip, "timeout": timeout }),
        )
        .await;
    }

    pub async fn debug_smtp_rcpt_result(&self, mail_from: &str, email: &str, response: &str) {
        self.emit(
            LogCode::DebugSmtpRcptResult,
            json!({ "mail_from": mail_from, "email": email, "response": response }),
        )
        .await;
    }

    pub async fn debug_smtp_exception(&self, host: &str, error: &str) {
        self.emit(
            LogCode::DebugSmtpException,
            json!({ "mx_host": host, "error": error }),
        )
        .await;
    }

    pub async fn debug_rcpt_verifying(&self, email: &str, mx_host: &str) {
        self.emit(
            LogCode::DebugRcptVerifying,
            json!({ "email": email, "mx_host": mx_host }),
        )
        .await;
    }

    // Privileged diagnostics: catch-all

    pub async fn debug_catchall_checking(&self, test_email: &str) {
        self.emit(
            LogCode::DebugCatchallChecking,
            json!({ "test_email": test_email }),
        )
        .await;
    }

    pub async fn debug_catchall_testing(&self, mx_host: &str) {
        self.emit(
            LogCode::DebugCatchallTesting,
            json!({ "mx_host": mx_host }),
        )
        .await;
    }

    pub async fn debug_catchall_result(&self, mx_host: &str, accepted: bool, detail: &str) {
        self.emit(
            LogCode::DebugCatchallResult,
            json!({ "mx_host": mx_host, "accepted": accepted, "detail": detail }),
        )
        .await;
    }

    pub async fn debug_catchall_inconclusive(&self) {
        self.emit(LogCode::DebugCatchallInconclusive, Value::Null).await;
    }

    // Privileged diagnostics: web search

    pub async fn debug_web_searching(&self, provider: &str) {
        self.emit(LogCode::DebugWebSearching, json!({ "provider": provider }))
            .await;
    }

    pub async fn debug_web_found(&self) {
        self.emit(LogCode::DebugWebFound, Value::Null).await;
    }

    pub async fn debug_web_not_found(&self) {
        self.emit(LogCode::DebugWebNotFound, Value::Null).await;
    }

    pub async fn debug_web_error(&self, error: &str) {
        self.emit(LogCode::DebugWebError, json!({ "error": error }))
            .await;
    }

    pub async fn debug_web_skipped_no_provider(&self) {
        self.emit(LogCode::DebugWebSkippedNoProvider, Value::Null).await;
    }

    pub async fn debug_web_skipped_no_key(&self, provider: &str) {
        self.emit(
            LogCode::DebugWebSkippedNoKey,
            json!({ "provider": provider }),
        )
        .await;
    }
}
