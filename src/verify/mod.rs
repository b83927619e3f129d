//! Email verification engine: candidate generation, DNS and SMTP probing,
//! signal scoring, and best-candidate selection.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::joblog::JobLogger;
use crate::verify::catch_all::{CatchAllProbe, detect_catch_all};
use crate::verify::disposable::is_disposable_domain;
use crate::verify::dns::{MailDns, MxRecord};
use crate::verify::patterns::{MAX_CANDIDATES, generate_candidates};
use crate::verify::provider::{Provider, detect_provider};
use crate::verify::score::{Signals, score_signals};
use crate::verify::sentinel::Sentinel;
use crate::verify::smtp::RcptProber;
use crate::verify::web::WebSearch;

pub mod catch_all;
pub mod disposable;
pub mod dns;
pub mod patterns;
pub mod provider;
pub mod score;
pub mod sentinel;
pub mod smtp;
pub mod web;

#[cfg(test)]
pub(crate) mod mock;

pub const DEFAULT_MAIL_FROM: &str = "noreply@mailcheck.local";

/// Verification verdict for a lead or a single candidate. `Pending` only
/// appears on leads that were never verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "verification_status", rename_all = "lowercase")]
pub enum VerificationStatus {
    Pending,
    Invalid,
    Unknown,
    Risky,
    Valid,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Pending => "pending",
            VerificationStatus::Invalid => "invalid",
            VerificationStatus::Unknown => "unknown",
            VerificationStatus::Risky => "risky",
            VerificationStatus::Valid => "valid",
        }
    }

    /// Ordering used when two candidates tie on score.
    fn rank(&self) -> u8 {
        match self {
            VerificationStatus::Pending | VerificationStatus::Invalid => 0,
            VerificationStatus::Unknown => 1,
            VerificationStatus::Risky => 2,
            VerificationStatus::Valid => 3,
        }
    }
}

impl std::fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the engine learned about one address.
#[derive(Debug, Clone, Serialize)]
pub struct VerifyResult {
    pub email: String,
    pub status: VerificationStatus,
    pub reason: String,
    pub score: u8,
    pub mx_found: bool,
    pub spf_present: bool,
    pub dmarc_present: bool,
    /// None when the catch-all probe never got a usable answer.
    pub catch_all: Option<bool>,
    pub smtp_attempted: bool,
    pub smtp_blocked: bool,
    /// Raw "code text" of the decisive RCPT reply, if any.
    pub smtp_code_msg: Option<String>,
    pub provider: Provider,
    pub web_mentioned: bool,
    pub signals: Vec<String>,
}

impl VerifyResult {
    fn rejected(email: &str, reason: &str, score: u8) -> Self {
        Self {
            email: email.to_string(),
            status: VerificationStatus::Invalid,
            reason: reason.to_string(),
            score,
            mx_found: false,
            spf_present: false,
            dmarc_present: false,
            catch_all: None,
            smtp_attempted: false,
            smtp_blocked: false,
            smtp_code_msg: None,
            provider: Provider::Other,
            web_mentioned: false,
            signals: Vec::new(),
        }
    }
}

/// Per-candidate entry of the persisted probe-results map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateProbe {
    pub accepted: bool,
    pub detail: String,
    pub status: VerificationStatus,
    pub confidence_score: u8,
}

#[derive(Debug, Clone, Default)]
pub struct PickBestOutcome {
    pub candidates: Vec<String>,
    pub best_email: String,
    pub best: Option<VerifyResult>,
    /// Candidate-generator order.
    pub probe_results: Vec<(String, CandidateProbe)>,
}

/// Effective engine settings for one verification, resolved from workspace
/// overrides and system defaults.
#[derive(Debug, Clone)]
pub struct VerifyOptions {
    pub mail_from: String,
    pub smtp_deadline: Duration,
    pub dns_deadline: Duration,
    pub enabled_pattern_indices: Option<Vec<usize>>,
    pub web_search_provider: String,
    pub web_search_api_key: String,
    pub allow_no_lastname: bool,
    pub custom_patterns: Vec<String>,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            mail_from: DEFAULT_MAIL_FROM.to_string(),
            smtp_deadline: Duration::from_secs(5),
            dns_deadline: Duration::from_secs(5),
            enabled_pattern_indices: None,
            web_search_provider: String::new(),
            web_search_api_key: String::new(),
            allow_no_lastname: false,
            custom_patterns: Vec::new(),
        }
    }
}

/// Usage hook invoked once per attempted web search.
#[async_trait]
pub trait WebSearchUsage: Send + Sync {
    async fn web_search_performed(&self, provider: &str);
}

/// Signals shared by every candidate of one domain, resolved once per
/// verification.
struct DomainContext {
    mx: Option<Vec<MxRecord>>,
    spf: bool,
    dmarc: bool,
    provider: Provider,
    blocked: bool,
    catch_all: Option<CatchAllProbe>,
}

pub struct Verifier {
    dns: Arc<dyn MailDns>,
    prober: Arc<dyn RcptProber>,
    sentinel: Arc<dyn Sentinel>,
    web: Arc<dyn WebSearch>,
}

fn split_address(email: &str) -> Result<(String, String), &'static str> {
    let Some((local, domain)) = email.split_once('@') else {
        return Err("Malformed email");
    };
    let local = local.trim();
    let domain = domain.trim().to_lowercase();
    if local.is_empty()
        || domain.is_empty()
        || !domain.contains('.')
        || email.contains(char::is_whitespace)
    {
        return Err("Invalid email format");
    }
    Ok((local.to_string(), domain))
}

impl Verifier {
    pub fn new(
        dns: Arc<dyn MailDns>,
        prober: Arc<dyn RcptProber>,
        sentinel: Arc<dyn Sentinel>,
        web: Arc<dyn WebSearch>,
    ) -> Self {
        Self {
            dns,
            prober,
            sentinel,
            web,
        }
    }

    async fn build_domain_context(
        &self,
        domain: &str,
        opts: &VerifyOptions,
        log: &JobLogger,
    ) -> DomainContext {
        let mx = match self.dns.mx_lookup(domain, opts.dns_deadline).await {
            Ok(records) => {
                let hosts = records
                    .iter()
                    .map(|r| format!("{}={}", r.preference, r.exchange))
                    .collect::<Vec<_>>()
                    .join(", ");
                log.debug_mx_lookup(domain, records.len(), &hosts).await;
                Some(records)
            }
            Err(err) => {
                log.debug_mx_lookup_failed(domain, &err.to_string()).await;
                None
            }
        };

        let Some(records) = mx else {
            return DomainContext {
                mx: None,
                spf: false,
                dmarc: false,
                provider: Provider::Other,
                blocked: false,
                catch_all: None,
            };
        };

        let (spf, dmarc) = self.dns.check_spf_dmarc(domain, opts.dns_deadline).await;
        log.debug_dns_spf_dmarc(spf, dmarc).await;

        let provider = detect_provider(&records);
        log.debug_provider_detected(provider.as_str()).await;

        let blocked = self.sentinel.is_blocked().await;
        let catch_all = if blocked {
            log.debug_smtp_skipped().await;
            None
        } else {
            Some(
                detect_catch_all(
                    self.prober.as_ref(),
                    &records,
                    domain,
                    &opts.mail_from,
                    opts.smtp_deadline,
                    opts.dns_deadline,
                    log,
                )
                .await,
            )
        };

        DomainContext {
            mx: Some(records),
            spf,
            dmarc,
            provider,
            blocked,
            catch_all,
        }
    }

    async fn verify_with_context(
        &self,
        email: &str,
        ctx: &DomainContext,
        opts: &VerifyOptions,
        log: &JobLogger,
    ) -> VerifyResult {
        let (_, domain) = match split_address(email) {
            Ok(parts) => parts,
            Err(reason) => return VerifyResult::rejected(email, reason, 0),
        };

        if is_disposable_domain(&domain) {
            log.debug_disposable_domain(&domain).await;
            return VerifyResult::rejected(email, "Disposable or temporary domain", 0);
        }

        let Some(mx_hosts) = &ctx.mx else {
            let mut result =
                VerifyResult::rejected(email, "No MX records (or DNS failed)", 5);
            result.smtp_blocked = ctx.blocked;
            return result;
        };

        let catch_all_flag = ctx
            .catch_all
            .as_ref()
            .filter(|probe| probe.smtp_attempted)
            .map(|probe| probe.catch_all);

        let mut smtp_attempted = false;
        let mut accepted_any = false;
        let mut detail_any = String::new();
        let mut smtp_short: Option<String> = None;

        if !ctx.blocked {
            for mx in mx_hosts.iter().take(2) {
                log.debug_rcpt_verifying(email, &mx.exchange).await;
                let probe = self
                    .prober
                    .probe_rcpt(
                        &mx.exchange,
                        email,
                        &opts.mail_from,
                        opts.smtp_deadline,
                        opts.dns_deadline,
                        log,
                    )
                    .await;
                smtp_attempted = true;
                detail_any = format!("{}: {}", mx.exchange, probe.detail);
                if probe.short.is_some() {
                    smtp_short = probe.short;
                }
                if probe.accepted {
                    accepted_any = true;
                    break;
                }
                if probe.detail.contains("Temporary") || probe.detail.contains("SMTP error") {
                    continue;
                }
                // A clear rejection is a verdict; later MX hosts won't differ.
                break;
            }
        }

        let verdict = score_signals(&Signals {
            mx_found: true,
            spf_present: ctx.spf,
            dmarc_present: ctx.dmarc,
            provider: ctx.provider,
            smtp_blocked: ctx.blocked,
            smtp_attempted,
            accepted_any,
            catch_all: catch_all_flag,
            detail_any: detail_any.clone(),
        });

        VerifyResult {
            email: email.to_string(),
            status: verdict.status,
            reason: verdict.reason,
            score: verdict.score,
            mx_found: true,
            spf_present: ctx.spf,
            dmarc_present: ctx.dmarc,
            catch_all: catch_all_flag,
            smtp_attempted,
            smtp_blocked: ctx.blocked,
            smtp_code_msg: smtp_short,
            provider: ctx.provider,
            web_mentioned: false,
            signals: verdict.signals,
        }
    }

    /// Verify a single address end to end: format, disposable-domain check,
    /// MX, SPF/DMARC, catch-all, RCPT probe, scoring.
    pub async fn verify_email(
        &self,
        email: &str,
        opts: &VerifyOptions,
        log: &JobLogger,
    ) -> VerifyResult {
        let (_, domain) = match split_address(email) {
            Ok(parts) => parts,
            Err(reason) => return VerifyResult::rejected(email, reason, 0),
        };
        if is_disposable_domain(&domain) {
            log.debug_disposable_domain(&domain).await;
            return VerifyResult::rejected(email, "Disposable or temporary domain", 0);
        }

        let ctx = self.build_domain_context(&domain, opts, log).await;
        self.verify_with_context(email, &ctx, opts, log).await
    }

    /// Generate candidates for (first, last, domain), verify each in order,
    /// and pick the best by (score, status) with earlier candidates winning
    /// ties. Optionally enrich the winner with a public web mention lookup.
    pub async fn verify_and_pick_best(
        &self,
        first_name: &str,
        last_name: &str,
        domain: &str,
        opts: &VerifyOptions,
        log: &JobLogger,
        web_usage: Option<&dyn WebSearchUsage>,
    ) -> PickBestOutcome {
        let candidates = generate_candidates(
            first_name,
            last_name,
            domain,
            MAX_CANDIDATES,
            opts.enabled_pattern_indices.as_deref(),
            opts.allow_no_lastname,
            &opts.custom_patterns,
        );
        if candidates.is_empty() {
            return PickBestOutcome::default();
        }

        log.debug_config(
            &opts.mail_from,
            opts.smtp_deadline.as_secs(),
            opts.dns_deadline.as_secs_f64(),
        )
        .await;
        let preview = candidates
            .iter()
            .take(10)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        let preview = if candidates.len() > 10 {
            format!("{preview}...")
        } else {
            preview
        };
        log.debug_candidates_generated(domain, candidates.len(), &preview)
            .await;

        let ctx = self
            .build_domain_context(&domain.trim().to_lowercase(), opts, log)
            .await;

        let total = candidates.len();
        let mut best_email = String::new();
        let mut best: Option<VerifyResult> = None;
        let mut probe_results = Vec::with_capacity(total);

        for (i, candidate) in candidates.iter().enumerate() {
            log.debug_candidate_header(i + 1, total, candidate).await;
            log.verify_candidate(i + 1, total, candidate).await;

            let result = self.verify_with_context(candidate, &ctx, opts, log).await;

            probe_results.push((
                candidate.clone(),
                CandidateProbe {
                    accepted: matches!(
                        result.status,
                        VerificationStatus::Valid | VerificationStatus::Risky
                    ) && result.mx_found,
                    detail: result.reason.clone(),
                    status: result.status,
                    confidence_score: result.score,
                },
            ));

            let dominates = match &best {
                None => true,
                Some(current) => {
                    (result.score, result.status.rank())
                        > (current.score, current.status.rank())
                }
            };
            if dominates {
                best_email = candidate.clone();
                best = Some(result);
            }
        }

        self.enrich_with_web_mention(&best_email, &mut best, opts, log, web_usage)
            .await;

        PickBestOutcome {
            best_email: if best_email.is_empty() {
                candidates[0].clone()
            } else {
                best_email
            },
            candidates,
            best,
            probe_results,
        }
    }

    async fn enrich_with_web_mention(
        &self,
        best_email: &str,
        best: &mut Option<VerifyResult>,
        opts: &VerifyOptions,
        log: &JobLogger,
        web_usage: Option<&dyn WebSearchUsage>,
    ) {
        let Some(best) = best.as_mut() else { return };
        if best_email.is_empty() {
            return;
        }

        let provider = opts.web_search_provider.trim();
        let api_key = opts.web_search_api_key.trim();
        if provider.is_empty() {
            log.debug_web_skipped_no_provider().await;
            return;
        }
        if api_key.is_empty() {
            log.debug_web_skipped_no_key(provider).await;
            return;
        }

        log.debug_web_searching(provider).await;
        let (found, error) = self.web.check_mentioned(best_email, provider, api_key).await;
        if let Some(hook) = web_usage {
            hook.web_search_performed(provider).await;
        }

        if found {
            best.web_mentioned = true;
            best.reason = format!(
                "{} | Email found in public sources.",
                best.reason.trim_end()
            );
            best.signals.push("web".to_string());
            log.debug_web_found().await;
        } else if let Some(error) = error {
            log.debug_web_error(&error).await;
        } else {
            log.debug_web_not_found().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::joblog::{CapturingSink, JobLogger, LogCode, NullSink};
    use crate::verify::mock::{FixtureDns, ScriptedProber, StubWebSearch};
    use crate::verify::sentinel::MemorySentinel;

    fn verifier_with(
        dns: FixtureDns,
        prober: ScriptedProber,
        sentinel: MemorySentinel,
        web: StubWebSearch,
    ) -> Verifier {
        Verifier::new(
            Arc::new(dns),
            Arc::new(prober),
            Arc::new(sentinel),
            Arc::new(web),
        )
    }

    fn log() -> JobLogger {
        JobLogger::new(Arc::new(NullSink))
    }

    #[tokio::test]
    async fn malformed_addresses_are_invalid_with_zero_score() {
        let verifier = verifier_with(
            FixtureDns::default(),
            ScriptedProber::rejecting_all(),
            MemorySentinel::new(),
            StubWebSearch::not_found(),
        );
        for email in [
            "no-at-sign",
            "@example.com",
            "john@",
            "john@nodot",
            "john doe@example.com",
        ] {
            let result = verifier
                .verify_email(email, &VerifyOptions::default(), &log())
                .await;
            assert_eq!(result.status, VerificationStatus::Invalid, "{email}");
            assert_eq!(result.score, 0, "{email}");
        }
    }

    #[tokio::test]
    async fn disposable_domains_are_rejected_without_probing() {
        let prober = Arc::new(ScriptedProber::accepting_all());
        let verifier = Verifier::new(
            Arc::new(FixtureDns::default()),
            prober.clone(),
            Arc::new(MemorySentinel::new()),
            Arc::new(StubWebSearch::not_found()),
        );
        let result = verifier
            .verify_email("john@mailinator.com", &VerifyOptions::default(), &log())
            .await;
        assert_eq!(result.status, VerificationStatus::Invalid);
        assert_eq!(result.score, 0);
        assert_eq!(result.reason, "Disposable or temporary domain");
        assert_eq!(prober.calls(), 0);
    }

    // Scenario: accepting MX with SPF, random RCPT rejected => valid, high score.
    #[tokio::test]
    async fn scenario_valid_mailbox() {
        let dns = FixtureDns::default()
            .with_mx("example.com", &[(10, "mail.example.com")])
            .with_spf("example.com");
        let prober = ScriptedProber::rejecting_all().accept("john.doe@example.com");
        let verifier =
            verifier_with(dns, prober, MemorySentinel::new(), StubWebSearch::not_found());

        let outcome = verifier
            .verify_and_pick_best(
                "John",
                "Doe",
                "example.com",
                &VerifyOptions::default(),
                &log(),
                None,
            )
            .await;

        assert_eq!(outcome.best_email, "john.doe@example.com");
        let best = outcome.best.unwrap();
        assert_eq!(best.status, VerificationStatus::Valid);
        assert!(best.score >= 80);
        assert_eq!(best.catch_all, Some(false));
        assert!(best.signals.contains(&"mx".to_string()));
        assert!(best.signals.contains(&"spf".to_string()));
        assert!(!best.signals.contains(&"dmarc".to_string()));
    }

    // Scenario: DNS answers "no MX" => candidates exist, best is invalid at 5.
    #[tokio::test]
    async fn scenario_domain_without_mx() {
        let dns = FixtureDns::default().with_no_mx("no-mx.test");
        let verifier = verifier_with(
            dns,
            ScriptedProber::rejecting_all(),
            MemorySentinel::new(),
            StubWebSearch::not_found(),
        );

        let outcome = verifier
            .verify_and_pick_best(
                "John",
                "Doe",
                "no-mx.test",
                &VerifyOptions::default(),
                &log(),
                None,
            )
            .await;

        assert!(!outcome.candidates.is_empty());
        let best = outcome.best.unwrap();
        assert_eq!(best.status, VerificationStatus::Invalid);
        assert_eq!(best.score, 5);
        assert_eq!(best.reason, "No MX records (or DNS failed)");
    }

    // Scenario: catch-all domain; Jane's mailbox and the random probe are
    // both accepted => risky.
    #[tokio::test]
    async fn scenario_catch_all_domain() {
        let dns = FixtureDns::default()
            .with_mx("catchall.io", &[(10, "mx1.catchall.io"), (20, "mx2.catchall.io")]);
        let prober = ScriptedProber::accepting_all()
            .reject("jane@catchall.io")
            .reject("smith@catchall.io");
        let verifier = verifier_with(
            dns,
            prober,
            MemorySentinel::new(),
            StubWebSearch::not_found(),
        );

        let outcome = verifier
            .verify_and_pick_best(
                "Jane",
                "Smith",
                "catchall.io",
                &VerifyOptions::default(),
                &log(),
                None,
            )
            .await;

        assert_eq!(outcome.best_email, "jane.smith@catchall.io");
        let best = outcome.best.unwrap();
        assert_eq!(best.status, VerificationStatus::Risky);
        assert_eq!(best.catch_all, Some(true));
        assert!(best.reason.contains("catch-all"));
    }

    // Scenario: accented name and uppercased domain normalize cleanly.
    #[tokio::test]
    async fn scenario_unicode_name_and_uppercase_domain() {
        let dns = FixtureDns::default().with_mx("example.com", &[(10, "mail.example.com")]);
        let prober = ScriptedProber::rejecting_all().accept("ana.nunez@example.com");
        let verifier =
            verifier_with(dns, prober, MemorySentinel::new(), StubWebSearch::not_found());

        let outcome = verifier
            .verify_and_pick_best(
                "Ana",
                "Núñez",
                "EXAMPLE.COM",
                &VerifyOptions::default(),
                &log(),
                None,
            )
            .await;

        assert!(outcome
            .candidates
            .contains(&"ana.nunez@example.com".to_string()));
        assert_eq!(outcome.best_email, "ana.nunez@example.com");
        assert_eq!(outcome.best.unwrap().status, VerificationStatus::Valid);
    }

    // Scenario: no last name, allowed => generic candidates, info@ accepted.
    #[tokio::test]
    async fn scenario_generic_candidates_without_last_name() {
        let dns = FixtureDns::default().with_mx("example.com", &[(10, "mail.example.com")]);
        let prober = ScriptedProber::rejecting_all().accept("info@example.com");
        let verifier =
            verifier_with(dns, prober, MemorySentinel::new(), StubWebSearch::not_found());

        let opts = VerifyOptions {
            allow_no_lastname: true,
            ..VerifyOptions::default()
        };
        let outcome = verifier
            .verify_and_pick_best("Bob", "", "example.com", &opts, &log(), None)
            .await;

        assert!(outcome.candidates.contains(&"info@example.com".to_string()));
        assert!(outcome
            .candidates
            .contains(&"contact@example.com".to_string()));
        assert_eq!(outcome.best_email, "info@example.com");
        let best = outcome.best.unwrap();
        assert!(matches!(
            best.status,
            VerificationStatus::Valid | VerificationStatus::Risky
        ));
    }

    // Scenario: sentinel flipped => no SMTP probes, risky from DNS signals.
    #[tokio::test]
    async fn scenario_smtp_blocked_degrades_to_dns_signals() {
        let dns = FixtureDns::default()
            .with_mx("example.com", &[(10, "aspmx.l.google.com")])
            .with_spf("example.com")
            .with_dmarc("example.com");
        let sentinel = MemorySentinel::new();
        sentinel.force_blocked();
        let prober = ScriptedProber::accepting_all();
        let verifier = Verifier::new(
            Arc::new(dns),
            Arc::new(prober),
            Arc::new(sentinel),
            Arc::new(StubWebSearch::not_found()),
        );

        let outcome = verifier
            .verify_and_pick_best(
                "John",
                "Doe",
                "example.com",
                &VerifyOptions::default(),
                &log(),
                None,
            )
            .await;

        let best = outcome.best.unwrap();
        assert_eq!(best.status, VerificationStatus::Risky);
        assert!(best.score >= 50);
        assert!(best.smtp_blocked);
        assert!(!best.smtp_attempted);
        assert_eq!(best.catch_all, None);
        assert!(best.signals.contains(&"smtp_blocked".to_string()));
    }

    #[tokio::test]
    async fn no_smtp_call_is_made_while_blocked() {
        let dns = FixtureDns::default().with_mx("example.com", &[(10, "mail.example.com")]);
        let sentinel = MemorySentinel::new();
        sentinel.force_blocked();
        let prober = Arc::new(ScriptedProber::accepting_all());
        let verifier = Verifier::new(
            Arc::new(dns),
            prober.clone(),
            Arc::new(sentinel),
            Arc::new(StubWebSearch::not_found()),
        );

        verifier
            .verify_and_pick_best(
                "John",
                "Doe",
                "example.com",
                &VerifyOptions::default(),
                &log(),
                None,
            )
            .await;
        assert_eq!(prober.calls(), 0);
    }

    #[tokio::test]
    async fn empty_candidates_short_circuit() {
        let verifier = verifier_with(
            FixtureDns::default(),
            ScriptedProber::rejecting_all(),
            MemorySentinel::new(),
            StubWebSearch::not_found(),
        );
        let outcome = verifier
            .verify_and_pick_best(
                "Bob",
                "",
                "example.com",
                &VerifyOptions::default(),
                &log(),
                None,
            )
            .await;
        assert!(outcome.candidates.is_empty());
        assert_eq!(outcome.best_email, "");
        assert!(outcome.best.is_none());
        assert!(outcome.probe_results.is_empty());
    }

    #[tokio::test]
    async fn ties_keep_the_earlier_candidate() {
        let dns = FixtureDns::default().with_mx("example.com", &[(10, "mail.example.com")]);
        // Nothing accepted: every candidate scores identically.
        let verifier = verifier_with(
            dns,
            ScriptedProber::rejecting_all(),
            MemorySentinel::new(),
            StubWebSearch::not_found(),
        );

        let outcome = verifier
            .verify_and_pick_best(
                "John",
                "Doe",
                "example.com",
                &VerifyOptions::default(),
                &log(),
                None,
            )
            .await;
        assert_eq!(outcome.best_email, "john@example.com");
    }

    #[tokio::test]
    async fn web_mention_enriches_the_winner() {
        struct CountingUsage(std::sync::atomic::AtomicUsize);
        #[async_trait]
        impl WebSearchUsage for CountingUsage {
            async fn web_search_performed(&self, provider: &str) {
                assert_eq!(provider, "serper");
                self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        }

        let dns = FixtureDns::default().with_mx("example.com", &[(10, "mail.example.com")]);
        let prober = ScriptedProber::rejecting_all().accept("john.doe@example.com");
        let verifier =
            verifier_with(dns, prober, MemorySentinel::new(), StubWebSearch::found());

        let opts = VerifyOptions {
            web_search_provider: "serper".to_string(),
            web_search_api_key: "test-key".to_string(),
            ..VerifyOptions::default()
        };
        let usage = CountingUsage(std::sync::atomic::AtomicUsize::new(0));
        let outcome = verifier
            .verify_and_pick_best("John", "Doe", "example.com", &opts, &log(), Some(&usage))
            .await;

        let best = outcome.best.unwrap();
        assert!(best.web_mentioned);
        assert!(best.reason.ends_with("| Email found in public sources."));
        assert!(best.signals.contains(&"web".to_string()));
        assert_eq!(usage.0.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn web_search_is_additive_only() {
        let dns = || {
            FixtureDns::default().with_mx("example.com", &[(10, "mail.example.com")])
        };
        let make = |web: StubWebSearch| {
            verifier_with(
                dns(),
                ScriptedProber::rejecting_all().accept("john.doe@example.com"),
                MemorySentinel::new(),
                web,
            )
        };

        let with_web = make(StubWebSearch::found());
        let opts = VerifyOptions {
            web_search_provider: "serper".to_string(),
            web_search_api_key: "key".to_string(),
            ..VerifyOptions::default()
        };
        let first = with_web
            .verify_and_pick_best("John", "Doe", "example.com", &opts, &log(), None)
            .await;
        assert!(first.best.as_ref().unwrap().web_mentioned);

        let without_web = make(StubWebSearch::found());
        let second = without_web
            .verify_and_pick_best(
                "John",
                "Doe",
                "example.com",
                &VerifyOptions::default(),
                &log(),
                None,
            )
            .await;
        let best = second.best.unwrap();
        assert!(!best.web_mentioned);
        assert_eq!(best.status, first.best.unwrap().status);
    }

    #[tokio::test]
    async fn identical_fixtures_give_identical_outcomes() {
        let run = || async {
            let dns = FixtureDns::default()
                .with_mx("example.com", &[(10, "mail.example.com")])
                .with_spf("example.com");
            let verifier = verifier_with(
                dns,
                ScriptedProber::rejecting_all().accept("jdoe@example.com"),
                MemorySentinel::new(),
                StubWebSearch::not_found(),
            );
            verifier
                .verify_and_pick_best(
                    "John",
                    "Doe",
                    "example.com",
                    &VerifyOptions::default(),
                    &log(),
                    None,
                )
                .await
        };

        let a = run().await;
        let b = run().await;
        assert_eq!(a.candidates, b.candidates);
        assert_eq!(a.best_email, b.best_email);
        let (a_best, b_best) = (a.best.unwrap(), b.best.unwrap());
        assert_eq!(a_best.status, b_best.status);
        assert_eq!(a_best.score, b_best.score);
    }

    #[tokio::test]
    async fn transient_mx_failure_degrades_to_invalid() {
        let dns = FixtureDns::default().with_transient_failure("slow.test");
        let verifier = verifier_with(
            dns,
            ScriptedProber::rejecting_all(),
            MemorySentinel::new(),
            StubWebSearch::not_found(),
        );
        let result = verifier
            .verify_email("a@slow.test", &VerifyOptions::default(), &log())
            .await;
        assert_eq!(result.status, VerificationStatus::Invalid);
        assert_eq!(result.score, 5);
    }

    #[tokio::test]
    async fn candidate_stream_is_logged_in_order() {
        let dns = FixtureDns::default().with_mx("example.com", &[(10, "mail.example.com")]);
        let verifier = verifier_with(
            dns,
            ScriptedProber::rejecting_all(),
            MemorySentinel::new(),
            StubWebSearch::not_found(),
        );

        let sink = Arc::new(CapturingSink::default());
        let log = JobLogger::new(sink.clone());
        verifier
            .verify_and_pick_best(
                "John",
                "Doe",
                "example.com",
                &VerifyOptions::default(),
                &log,
                None,
            )
            .await;

        let codes = sink.codes();
        assert!(codes.contains(&LogCode::DebugConfig));
        assert!(codes.contains(&LogCode::DebugCandidatesGenerated));
        assert!(codes.contains(&LogCode::DebugMxLookup));
        assert!(codes.contains(&LogCode::VerifyCandidate));
        let first_candidate = codes
            .iter()
            .position(|c| *c == LogCode::VerifyCandidate)
            .unwrap();
        let mx_lookup = codes
            .iter()
            .position(|c| *c == LogCode::DebugMxLookup)
            .unwrap();
        assert!(mx_lookup < first_candidate);
    }
}
