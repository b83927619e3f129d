/// Throwaway/temporary mailbox providers. Addresses on these domains are
/// rejected before any network probe. Extending the list requires no schema
/// or config change.
const DISPOSABLE_DOMAINS: &[&str] = &[
    "mailinator.com",
    "mailinator.net",
    "guerrillamail.com",
    "guerrillamail.net",
    "tempmail.com",
    "temp-mail.org",
    "10minutemail.com",
    "throwaway.email",
    "maildrop.cc",
    "yopmail.com",
    "getnada.com",
    "fakeinbox.com",
    "trashmail.com",
    "sharklasers.com",
    "guerrillamailblock.com",
    "mailnesia.com",
    "dispostable.com",
];

pub fn is_disposable_domain(domain: &str) -> bool {
    DISPOSABLE_DOMAINS.contains(&domain)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_disposable_domain() {
        assert!(is_disposable_domain("mailinator.com"));
        assert!(is_disposable_domain("yopmail.com"));
    }

    #[test]
    fn regular_domain_is_not_disposable() {
        assert!(!is_disposable_domain("example.com"));
        assert!(!is_disposable_domain("gmail.com"));
    }
}
