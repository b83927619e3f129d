use std::time::Duration;

use rand::Rng;

use crate::joblog::JobLogger;
use crate::verify::dns::MxRecord;
use crate::verify::smtp::RcptProber;

const RANDOM_LOCAL_LEN: usize = 18;
const LOCAL_PART_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

#[derive(Debug, Clone)]
pub struct CatchAllProbe {
    pub catch_all: bool,
    /// False when no MX host gave a usable answer; `catch_all` is then
    /// meaningless and callers must treat the signal as unknown.
    pub smtp_attempted: bool,
    pub reason: String,
}

fn random_local_part() -> String {
    let mut rng = rand::rng();
    (0..RANDOM_LOCAL_LEN)
        .map(|_| LOCAL_PART_ALPHABET[rng.random_range(0..LOCAL_PART_ALPHABET.len())] as char)
        .collect()
}

/// Probe whether the domain accepts RCPT for any local part, by offering a
/// random mailbox to the first two MX hosts. A 2xx means catch-all; a clean
/// rejection means mailboxes are real; anything else on both hosts leaves the
/// question open.
pub async fn detect_catch_all(
    prober: &dyn RcptProber,
    mx_hosts: &[MxRecord],
    domain: &str,
    mail_from: &str,
    smtp_deadline: Duration,
    dns_deadline: Duration,
    log: &JobLogger,
) -> CatchAllProbe {
    let test_email = format!("{}@{domain}", random_local_part());
    log.debug_catchall_checking(&test_email).await;

    for mx in mx_hosts.iter().take(2) {
        log.debug_catchall_testing(&mx.exchange).await;
        let probe = prober
            .probe_rcpt(
                &mx.exchange,
                &test_email,
                mail_from,
                smtp_deadline,
                dns_deadline,
                log,
            )
            .await;
        log.debug_catchall_result(
            &mx.exchange,
            probe.accepted,
            probe.short.as_deref().unwrap_or(&probe.detail),
        )
        .await;

        if probe.accepted {
            return CatchAllProbe {
                catch_all: true,
                smtp_attempted: true,
                reason: format!("Random RCPT accepted on {}: {}", mx.exchange, probe.detail),
            };
        }
        if probe.detail.contains("SMTP error") || probe.detail.contains("Temporary") {
            continue;
        }
        return CatchAllProbe {
            catch_all: false,
            smtp_attempted: true,
            reason: format!("Random RCPT rejected on {}: {}", mx.exchange, probe.detail),
        };
    }

    log.debug_catchall_inconclusive().await;
    CatchAllProbe {
        catch_all: false,
        smtp_attempted: false,
        reason: "Could not reliably probe catch-all".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::joblog::{JobLogger, NullSink};
    use crate::verify::mock::ScriptedProber;
    use std::sync::Arc;

    fn mx_hosts(hosts: &[&str]) -> Vec<MxRecord> {
        hosts
            .iter()
            .enumerate()
            .map(|(i, h)| MxRecord {
                preference: (i as u16 + 1) * 10,
                exchange: h.to_string(),
            })
            .collect()
    }

    fn log() -> JobLogger {
        JobLogger::new(Arc::new(NullSink))
    }

    #[tokio::test]
    async fn random_local_part_shape() {
        let local = random_local_part();
        assert_eq!(local.len(), RANDOM_LOCAL_LEN);
        assert!(local.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[tokio::test]
    async fn acceptance_means_catch_all() {
        let prober = ScriptedProber::accepting_all();
        let result = detect_catch_all(
            &prober,
            &mx_hosts(&["mx1.catchall.io", "mx2.catchall.io"]),
            "catchall.io",
            "noreply@mailcheck.local",
            Duration::from_secs(5),
            Duration::from_secs(5),
            &log(),
        )
        .await;
        assert!(result.catch_all);
        assert!(result.smtp_attempted);
        assert!(result.reason.contains("mx1.catchall.io"));
    }

    #[tokio::test]
    async fn clean_rejection_means_no_catch_all() {
        let prober = ScriptedProber::rejecting_all();
        let result = detect_catch_all(
            &prober,
            &mx_hosts(&["mx1.example.com"]),
            "example.com",
            "noreply@mailcheck.local",
            Duration::from_secs(5),
            Duration::from_secs(5),
            &log(),
        )
        .await;
        assert!(!result.catch_all);
        assert!(result.smtp_attempted);
    }

    #[tokio::test]
    async fn errors_on_all_hosts_leave_it_open() {
        let prober = ScriptedProber::erroring_all();
        let result = detect_catch_all(
            &prober,
            &mx_hosts(&["mx1.example.com", "mx2.example.com", "mx3.example.com"]),
            "example.com",
            "noreply@mailcheck.local",
            Duration::from_secs(5),
            Duration::from_secs(5),
            &log(),
        )
        .await;
        assert!(!result.catch_all);
        assert!(!result.smtp_attempted);
        assert_eq!(result.reason, "Could not reliably probe catch-all");
        // Only the first two MX hosts are ever visited.
        assert_eq!(prober.calls(), 2);
    }
}
