//! Deterministic network fixtures for engine tests.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::joblog::JobLogger;
use crate::verify::dns::{MailDns, MxLookupError, MxRecord};
use crate::verify::smtp::{RcptProbe, RcptProber};
use crate::verify::web::WebSearch;

#[derive(Clone)]
enum MxFixture {
    Records(Vec<MxRecord>),
    DomainMissing,
    NoMx,
    Transient,
}

/// DNS resolver answering from in-memory fixtures.
#[derive(Default)]
pub struct FixtureDns {
    mx: HashMap<String, MxFixture>,
    ips: HashMap<String, IpAddr>,
    spf: HashSet<String>,
    dmarc: HashSet<String>,
}

impl FixtureDns {
    pub fn with_mx(mut self, domain: &str, hosts: &[(u16, &str)]) -> Self {
        let records = hosts
            .iter()
            .map(|(preference, exchange)| MxRecord {
                preference: *preference,
                exchange: exchange.to_string(),
            })
            .collect();
        self.mx.insert(domain.to_string(), MxFixture::Records(records));
        self
    }

    pub fn with_missing_domain(mut self, domain: &str) -> Self {
        self.mx
            .insert(domain.to_string(), MxFixture::DomainMissing);
        self
    }

    pub fn with_no_mx(mut self, domain: &str) -> Self {
        self.mx.insert(domain.to_string(), MxFixture::NoMx);
        self
    }

    pub fn with_transient_failure(mut self, domain: &str) -> Self {
        self.mx.insert(domain.to_string(), MxFixture::Transient);
        self
    }

    pub fn with_ip(mut self, host: &str, ip: &str) -> Self {
        self.ips.insert(host.to_string(), ip.parse().unwrap());
        self
    }

    pub fn with_spf(mut self, domain: &str) -> Self {
        self.spf.insert(domain.to_string());
        self
    }

    pub fn with_dmarc(mut self, domain: &str) -> Self {
        self.dmarc.insert(domain.to_string());
        self
    }
}

#[async_trait]
impl MailDns for FixtureDns {
    async fn mx_lookup(
        &self,
        domain: &str,
        _deadline: Duration,
    ) -> Result<Vec<MxRecord>, MxLookupError> {
        match self.mx.get(domain) {
            Some(MxFixture::Records(records)) => {
                let mut records = records.clone();
                records.sort_by_key(|r| r.preference);
                Ok(records)
            }
            Some(MxFixture::NoMx) => Err(MxLookupError::NoMx),
            Some(MxFixture::Transient) => {
                Err(MxLookupError::Transient("fixture timeout".to_string()))
            }
            Some(MxFixture::DomainMissing) | None => Err(MxLookupError::DomainMissing),
        }
    }

    async fn resolve_to_ip(&self, host: &str, _deadline: Duration) -> Option<IpAddr> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Some(ip);
        }
        self.ips.get(host).copied()
    }

    async fn check_spf_dmarc(&self, domain: &str, _deadline: Duration) -> (bool, bool) {
        (self.spf.contains(domain), self.dmarc.contains(domain))
    }
}

/// RCPT prober answering from a script instead of the network.
pub struct ScriptedProber {
    accepts: HashSet<String>,
    rejects: HashSet<String>,
    temp_fails: HashSet<String>,
    erroring_hosts: HashSet<String>,
    accept_unknown: bool,
    error_unknown: bool,
    delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedProber {
    /// Rejects every RCPT with a 550 unless told otherwise.
    pub fn rejecting_all() -> Self {
        Self {
            accepts: HashSet::new(),
            rejects: HashSet::new(),
            temp_fails: HashSet::new(),
            erroring_hosts: HashSet::new(),
            accept_unknown: false,
            error_unknown: false,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    /// Accepts every RCPT, i.e. a catch-all server.
    pub fn accepting_all() -> Self {
        Self {
            accept_unknown: true,
            ..Self::rejecting_all()
        }
    }

    /// Times out on every RCPT.
    pub fn erroring_all() -> Self {
        Self {
            error_unknown: true,
            ..Self::rejecting_all()
        }
    }

    /// Accept this exact mailbox with a 250.
    pub fn accept(mut self, email: &str) -> Self {
        self.accepts.insert(email.to_string());
        self
    }

    /// Answer this exact mailbox with a 550, even when accepting unknowns.
    pub fn reject(mut self, email: &str) -> Self {
        self.rejects.insert(email.to_string());
        self
    }

    /// Answer this exact mailbox with a 451.
    pub fn temp_fail(mut self, email: &str) -> Self {
        self.temp_fails.insert(email.to_string());
        self
    }

    /// Every probe against this MX host fails with a timeout.
    pub fn erroring_host(mut self, host: &str) -> Self {
        self.erroring_hosts.insert(host.to_string());
        self
    }

    /// Sleep before answering, to exercise deadline handling.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RcptProber for ScriptedProber {
    async fn probe_rcpt(
        &self,
        mx_host: &str,
        rcpt: &str,
        _mail_from: &str,
        _smtp_deadline: Duration,
        _dns_deadline: Duration,
        _log: &JobLogger,
    ) -> RcptProbe {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if self.erroring_hosts.contains(mx_host) || self.error_unknown {
            return RcptProbe {
                accepted: false,
                detail: "SMTP error: Timeout".to_string(),
                short: None,
            };
        }
        if self.rejects.contains(rcpt) {
            return RcptProbe {
                accepted: false,
                detail: "Rejected (550)".to_string(),
                short: Some("550 5.1.1 user unknown".to_string()),
            };
        }
        if self.accepts.contains(rcpt) || self.accept_unknown {
            return RcptProbe {
                accepted: true,
                detail: "RCPT accepted (250)".to_string(),
                short: Some("250 2.1.5 OK".to_string()),
            };
        }
        if self.temp_fails.contains(rcpt) {
            return RcptProbe {
                accepted: false,
                detail: "Temporary failure (451)".to_string(),
                short: Some("451 4.7.1 try again later".to_string()),
            };
        }
        RcptProbe {
            accepted: false,
            detail: "Rejected (550)".to_string(),
            short: Some("550 5.1.1 user unknown".to_string()),
        }
    }
}

/// Web search stub with a fixed answer.
pub struct StubWebSearch {
    found: bool,
    error: Option<String>,
    calls: AtomicUsize,
}

impl StubWebSearch {
    pub fn found() -> Self {
        Self {
            found: true,
            error: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn not_found() -> Self {
        Self {
            found: false,
            error: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            found: false,
            error: Some(reason.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WebSearch for StubWebSearch {
    async fn check_mentioned(
        &self,
        _email: &str,
        _provider: &str,
        _api_key: &str,
    ) -> (bool, Option<String>) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.found, self.error.clone())
    }
}
