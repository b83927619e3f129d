use serde::Serialize;

use crate::verify::dns::MxRecord;

/// Operator of a domain's mail exchangers, derived from MX host names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Google,
    Microsoft,
    Ionos,
    Barracuda,
    Proofpoint,
    Mimecast,
    Ovh,
    Zoho,
    Yahoo,
    Icloud,
    Other,
}

const PROVIDER_PATTERNS: &[(Provider, &[&str])] = &[
    (
        Provider::Google,
        &[
            "google.com",
            "googlemail.com",
            "gmail-smtp-in",
            "aspmx.l.google",
        ],
    ),
    (
        Provider::Microsoft,
        &[
            "outlook.com",
            "protection.outlook",
            "hotmail",
            "microsoft.com",
        ],
    ),
    (Provider::Ionos, &["ionos."]),
    (
        Provider::Barracuda,
        &["barracudanetworks.com", "ess.barracuda"],
    ),
    (Provider::Proofpoint, &["pphosted.com", "proofpoint.com"]),
    (Provider::Mimecast, &["mimecast.com"]),
    (Provider::Ovh, &["ovh.net", "ovh.com"]),
    (Provider::Zoho, &["zoho.com", "zoho.eu"]),
    (Provider::Yahoo, &["yahoodns.net", "yahoo.com"]),
    (Provider::Icloud, &["icloud.com", "apple.com"]),
];

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Google => "google",
            Provider::Microsoft => "microsoft",
            Provider::Ionos => "ionos",
            Provider::Barracuda => "barracuda",
            Provider::Proofpoint => "proofpoint",
            Provider::Mimecast => "mimecast",
            Provider::Ovh => "ovh",
            Provider::Zoho => "zoho",
            Provider::Yahoo => "yahoo",
            Provider::Icloud => "icloud",
            Provider::Other => "other",
        }
    }

    /// Providers whose RCPT behavior is consistent enough to count as a
    /// positive deliverability signal on its own.
    pub fn is_trusted(&self) -> bool {
        matches!(
            self,
            Provider::Google | Provider::Microsoft | Provider::Icloud | Provider::Zoho
        )
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Walk MX hosts in preference order and return the first matching provider.
pub fn detect_provider(mx: &[MxRecord]) -> Provider {
    for record in mx {
        let host = record.exchange.to_lowercase();
        for (provider, patterns) in PROVIDER_PATTERNS {
            if patterns.iter().any(|p| host.contains(p)) {
                return *provider;
            }
        }
    }
    Provider::Other
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mx(hosts: &[(u16, &str)]) -> Vec<MxRecord> {
        hosts
            .iter()
            .map(|(preference, exchange)| MxRecord {
                preference: *preference,
                exchange: exchange.to_string(),
            })
            .collect()
    }

    #[test]
    fn google_mx_is_detected() {
        let records = mx(&[(10, "ASPMX.L.GOOGLE.COM"), (20, "alt1.aspmx.l.google.com")]);
        assert_eq!(detect_provider(&records), Provider::Google);
    }

    #[test]
    fn microsoft_protection_suffix() {
        let records = mx(&[(0, "example-com.mail.protection.outlook.com")]);
        assert_eq!(detect_provider(&records), Provider::Microsoft);
    }

    #[test]
    fn first_preference_wins() {
        let records = mx(&[
            (5, "mx1.zoho.com"),
            (10, "example-com.mail.protection.outlook.com"),
        ]);
        assert_eq!(detect_provider(&records), Provider::Zoho);
    }

    #[test]
    fn unknown_host_is_other() {
        let records = mx(&[(10, "mail.example.com")]);
        assert_eq!(detect_provider(&records), Provider::Other);
    }

    #[test]
    fn empty_mx_is_other() {
        assert_eq!(detect_provider(&[]), Provider::Other);
    }

    #[test]
    fn same_input_same_tag() {
        let records = mx(&[(10, "mx.yahoodns.net")]);
        assert_eq!(detect_provider(&records), detect_provider(&records));
    }
}
