use crate::verify::VerificationStatus;
use crate::verify::provider::Provider;

const BASE_SCORE: i32 = 35;

/// Evidence gathered for one candidate, ready to be folded into a verdict.
#[derive(Debug, Clone)]
pub struct Signals {
    pub mx_found: bool,
    pub spf_present: bool,
    pub dmarc_present: bool,
    pub provider: Provider,
    pub smtp_blocked: bool,
    pub smtp_attempted: bool,
    /// Best RCPT outcome over the probed MX hosts.
    pub accepted_any: bool,
    /// None when the catch-all probe never got a usable SMTP answer.
    pub catch_all: Option<bool>,
    /// Detail string of the last RCPT probe, e.g. "mx1: Rejected (550)".
    pub detail_any: String,
}

#[derive(Debug, Clone)]
pub struct Verdict {
    pub score: u8,
    pub status: VerificationStatus,
    pub reason: String,
    pub signals: Vec<String>,
}

/// Fold the collected signals into (score, status, reason).
///
/// The function is pure: identical signals always produce the identical
/// verdict. Early terminations (malformed address, disposable domain, MX
/// failure) are handled by the verifier before this point.
pub fn score_signals(signals: &Signals) -> Verdict {
    let mut score = BASE_SCORE;
    let mut reason_parts: Vec<String> = Vec::new();

    if signals.mx_found {
        score += 20;
        reason_parts.push("MX ok".to_string());
    }
    if signals.spf_present {
        score += 10;
        reason_parts.push("SPF".to_string());
    }
    if signals.dmarc_present {
        score += 10;
        reason_parts.push("DMARC".to_string());
    }
    if signals.provider != Provider::Other {
        if signals.provider.is_trusted() {
            score += 10;
        }
        reason_parts.push(format!("provider: {}", signals.provider));
    }

    match signals.catch_all {
        Some(true) => reason_parts.push("catch-all possible".to_string()),
        Some(false) => reason_parts.push("no catch-all signal".to_string()),
        None => reason_parts.push("catch-all unknown".to_string()),
    }

    let status = if signals.smtp_blocked {
        // Port 25 is unusable fleet-wide; do not penalize the candidate.
        reason_parts.push("SMTP outbound blocked; scored from DNS signals".to_string());
        let has_dns_evidence = signals.spf_present
            || signals.dmarc_present
            || signals.provider != Provider::Other;
        if signals.mx_found && has_dns_evidence {
            VerificationStatus::Risky
        } else if signals.mx_found {
            score = score.max(50);
            VerificationStatus::Risky
        } else {
            VerificationStatus::Unknown
        }
    } else if signals.smtp_attempted {
        reason_parts.push(format!("SMTP: {}", signals.detail_any));
        if signals.catch_all == Some(true) {
            score -= 10;
        }
        if signals.accepted_any && signals.catch_all != Some(true) {
            score += 25;
            VerificationStatus::Valid
        } else if signals.accepted_any {
            score += 10;
            VerificationStatus::Risky
        } else if ["SMTP error", "Temporary", "Timeout"]
            .iter()
            .any(|k| signals.detail_any.contains(k))
        {
            VerificationStatus::Unknown
        } else {
            // A clear 5xx on the candidate's mailbox.
            score = (score - 30).max(5);
            VerificationStatus::Invalid
        }
    } else {
        reason_parts.push("SMTP not attempted".to_string());
        if signals.mx_found {
            VerificationStatus::Risky
        } else {
            VerificationStatus::Unknown
        }
    };

    Verdict {
        score: score.clamp(0, 100) as u8,
        status,
        reason: reason_parts.join(" | "),
        signals: signal_names(signals),
    }
}

fn signal_names(signals: &Signals) -> Vec<String> {
    let mut names = Vec::new();
    if signals.mx_found {
        names.push("mx".to_string());
    }
    if signals.spf_present {
        names.push("spf".to_string());
    }
    if signals.dmarc_present {
        names.push("dmarc".to_string());
    }
    if signals.provider != Provider::Other {
        names.push(format!("provider:{}", signals.provider));
    }
    if signals.smtp_blocked {
        names.push("smtp_blocked".to_string());
    }
    names
}
