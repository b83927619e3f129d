use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::config::{LookupIpStrategy, ResolverConfig, ResolverOpts};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::proto::ProtoErrorKind;
use hickory_resolver::proto::op::ResponseCode;
use hickory_resolver::{ResolveError, ResolveErrorKind, Resolver};
use thiserror::Error;
use tracing::trace;

/// Per-query deadlines are clamped to this range, whatever the workspace
/// configured.
pub const MIN_DEADLINE: Duration = Duration::from_secs(1);
pub const MAX_DEADLINE: Duration = Duration::from_secs(30);

pub fn clamp_deadline(deadline: Duration) -> Duration {
    deadline.clamp(MIN_DEADLINE, MAX_DEADLINE)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MxRecord {
    pub preference: u16,
    pub exchange: String,
}

#[derive(Debug, Error)]
pub enum MxLookupError {
    #[error("domain does not exist")]
    DomainMissing,
    #[error("domain has no MX records")]
    NoMx,
    #[error("transient DNS failure: {0}")]
    Transient(String),
}

/// DNS operations the verification engine needs. The resolver is stateless;
/// callers pass the deadline on every query.
#[async_trait]
pub trait MailDns: Send + Sync {
    /// MX records sorted ascending by preference, trailing dots stripped.
    async fn mx_lookup(
        &self,
        domain: &str,
        deadline: Duration,
    ) -> Result<Vec<MxRecord>, MxLookupError>;

    /// Resolve a host to an address (A, then AAAA). IP literals come back
    /// unchanged. Never fails hard: any error class is `None`.
    async fn resolve_to_ip(&self, host: &str, deadline: Duration) -> Option<IpAddr>;

    /// (has_spf, has_dmarc) from the domain's TXT records. Lookup errors are
    /// treated as "absent".
    async fn check_spf_dmarc(&self, domain: &str, deadline: Duration) -> (bool, bool);
}

pub struct HickoryDns {
    resolver: Resolver<TokioConnectionProvider>,
}

impl HickoryDns {
    pub fn new() -> Self {
        let mut options = ResolverOpts::default();
        options.ip_strategy = LookupIpStrategy::Ipv4AndIpv6;
        options.attempts = 2;

        Self {
            resolver: Resolver::builder_with_config(
                ResolverConfig::cloudflare(),
                TokioConnectionProvider::default(),
            )
            .with_options(options)
            .build(),
        }
    }
}

impl Default for HickoryDns {
    fn default() -> Self {
        Self::new()
    }
}

fn fqdn(domain: &str) -> String {
    // Queries ending with a '.' are fully qualified and cheaper lookups.
    if domain.ends_with('.') {
        domain.to_string()
    } else {
        format!("{domain}.")
    }
}

fn classify_mx_error(err: ResolveError) -> MxLookupError {
    if let ResolveErrorKind::Proto(proto) = err.kind()
        && let ProtoErrorKind::NoRecordsFound { response_code, .. } = proto.kind()
    {
        return if *response_code == ResponseCode::NXDomain {
            MxLookupError::DomainMissing
        } else {
            MxLookupError::NoMx
        };
    }
    MxLookupError::Transient(err.to_string())
}

fn txt_records_contain(lookup: &hickory_resolver::lookup::TxtLookup, needle: &str) -> bool {
    lookup.iter().any(|record| {
        let text: String = record
            .txt_data()
            .iter()
            .map(|chunk| String::from_utf8_lossy(chunk))
            .collect();
        text.to_lowercase().contains(needle)
    })
}

#[async_trait]
impl MailDns for HickoryDns {
    async fn mx_lookup(
        &self,
        domain: &str,
        deadline: Duration,
    ) -> Result<Vec<MxRecord>, MxLookupError> {
        let name = fqdn(domain);
        let lookup = tokio::time::timeout(clamp_deadline(deadline), self.resolver.mx_lookup(name))
            .await
            .map_err(|_| MxLookupError::Transient("query deadline exceeded".to_string()))?
            .map_err(classify_mx_error)?;

        let mut records: Vec<MxRecord> = lookup
            .iter()
            .map(|mx| MxRecord {
                preference: mx.preference(),
                exchange: mx.exchange().to_utf8().trim_end_matches('.').to_string(),
            })
            .collect();
        if records.is_empty() {
            return Err(MxLookupError::NoMx);
        }
        records.sort_by_key(|r| r.preference);
        trace!(domain, count = records.len(), "mx lookup");
        Ok(records)
    }

    async fn resolve_to_ip(&self, host: &str, deadline: Duration) -> Option<IpAddr> {
        let host = host.trim_end_matches('.');
        if host.is_empty() {
            return None;
        }
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Some(ip);
        }

        let deadline = clamp_deadline(deadline);
        let name = fqdn(host);

        if let Ok(Ok(lookup)) =
            tokio::time::timeout(deadline, self.resolver.ipv4_lookup(name.clone())).await
            && let Some(a) = lookup.iter().next()
        {
            return Some(IpAddr::V4(a.0));
        }

        if let Ok(Ok(lookup)) = tokio::time::timeout(deadline, self.resolver.ipv6_lookup(name)).await
            && let Some(aaaa) = lookup.iter().next()
        {
            return Some(IpAddr::V6(aaaa.0));
        }

        None
    }

    async fn check_spf_dmarc(&self, domain: &str, deadline: Duration) -> (bool, bool) {
        let deadline = clamp_deadline(deadline);

        let has_spf = match tokio::time::timeout(
            deadline,
            self.resolver.txt_lookup(fqdn(domain)),
        )
        .await
        {
            Ok(Ok(lookup)) => txt_records_contain(&lookup, "v=spf1"),
            _ => false,
        };

        let has_dmarc = match tokio::time::timeout(
            deadline,
            self.resolver.txt_lookup(format!("_dmarc.{}", fqdn(domain))),
        )
        .await
        {
            Ok(Ok(lookup)) => txt_records_contain(&lookup, "v=dmarc1"),
            _ => false,
        };

        (has_spf, has_dmarc)
    }
}
