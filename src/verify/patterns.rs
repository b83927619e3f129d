use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// Standard naming patterns, in priority order. Workspace configuration can
/// enable a subset by index and append custom templates.
pub const COMMON_PATTERNS: [&str; 10] = [
    "{first}@{domain}",
    "{last}@{domain}",
    "{first}.{last}@{domain}",
    "{f}.{last}@{domain}",
    "{f}{last}@{domain}",
    "{first}{last}@{domain}",
    "{last}.{first}@{domain}",
    "{last}{f}@{domain}",
    "{first}_{last}@{domain}",
    "{last}_{first}@{domain}",
];

/// Fallback templates when a lead has no family name: the given name plus the
/// generic inboxes small companies actually answer.
const FIRST_ONLY_PATTERNS: [&str; 6] = [
    "{first}@{domain}",
    "info@{domain}",
    "contact@{domain}",
    "contacto@{domain}",
    "hello@{domain}",
    "hola@{domain}",
];

pub const MAX_CANDIDATES: usize = 15;
pub const MAX_CUSTOM_PATTERNS: usize = 20;
pub const MAX_CUSTOM_PATTERN_LEN: usize = 100;

/// Fold a personal name down to the characters that survive in a mailbox
/// local part: decompose, drop combining marks, lowercase, keep `[a-z0-9]`.
/// "Núñez" becomes "nunez".
pub fn slugify_name(name: &str) -> String {
    name.nfkd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .filter(char::is_ascii_alphanumeric)
        .collect()
}

/// A workspace custom pattern must target the lead's domain and stay within
/// a sane template length.
pub fn is_valid_custom_pattern(pattern: &str) -> bool {
    pattern.contains("@{domain}") && pattern.len() <= MAX_CUSTOM_PATTERN_LEN
}

fn expand(pattern: &str, first: &str, last: &str, f: &str, l: &str, domain: &str) -> Option<String> {
    for (placeholder, value) in [
        ("{first}", first),
        ("{last}", last),
        ("{f}", f),
        ("{l}", l),
    ] {
        if pattern.contains(placeholder) && value.is_empty() {
            return None;
        }
    }

    let expanded = pattern
        .replace("{first}", first)
        .replace("{last}", last)
        .replace("{f}", f)
        .replace("{l}", l)
        .replace("{domain}", domain);

    // A leftover brace means the template used a placeholder we don't know.
    if expanded.contains('{') || expanded.contains('}') {
        return None;
    }
    Some(expanded)
}

fn dedup_truncate(raw: Vec<String>, max: usize) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for email in raw {
        if seen.insert(email.clone()) {
            out.push(email);
        }
        if out.len() >= max {
            break;
        }
    }
    out
}

/// Expand first/last/domain through the pattern bank into mailbox candidates.
///
/// `enabled_pattern_indices` selects a subset of [`COMMON_PATTERNS`] (out of
/// range indices are skipped); custom patterns are appended afterwards in
/// order. Without a last name the generic set is used, and only when the
/// workspace allows it.
pub fn generate_candidates(
    first_name: &str,
    last_name: &str,
    domain: &str,
    max: usize,
    enabled_pattern_indices: Option<&[usize]>,
    allow_no_lastname: bool,
    custom_patterns: &[String],
) -> Vec<String> {
    let domain = domain.trim().to_lowercase();
    if domain.is_empty() {
        return Vec::new();
    }

    let first = slugify_name(first_name);
    let last = slugify_name(last_name);
    let f = first.chars().take(1).collect::<String>();
    let l = last.chars().take(1).collect::<String>();

    if last.is_empty() {
        if !allow_no_lastname {
            return Vec::new();
        }
        let raw = FIRST_ONLY_PATTERNS
            .iter()
            .filter_map(|pattern| expand(pattern, &first, &last, &f, &l, &domain))
            .collect();
        return dedup_truncate(raw, max);
    }

    let mut patterns: Vec<&str> = match enabled_pattern_indices {
        Some(indices) => indices
            .iter()
            .filter_map(|&i| COMMON_PATTERNS.get(i).copied())
            .collect(),
        None => COMMON_PATTERNS.to_vec(),
    };
    patterns.extend(custom_patterns.iter().map(String::as_str));

    let raw = patterns
        .iter()
        .filter_map(|pattern| expand(pattern, &first, &last, &f, &l, &domain))
        .collect();
    dedup_truncate(raw, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_folds_diacritics_and_case() {
        assert_eq!(slugify_name("Núñez"), "nunez");
        assert_eq!(slugify_name("José-María"), "josemaria");
        assert_eq!(slugify_name("O'Brien"), "obrien");
        assert_eq!(slugify_name("  "), "");
    }

    #[test]
    fn all_patterns_for_full_name() {
        let candidates = generate_candidates(
            "John",
            "Doe",
            "example.com",
            MAX_CANDIDATES,
            None,
            false,
            &[],
        );
        assert_eq!(
            candidates,
            vec![
                "john@example.com",
                "doe@example.com",
                "john.doe@example.com",
                "j.doe@example.com",
                "jdoe@example.com",
                "johndoe@example.com",
                "doe.john@example.com",
                "doej@example.com",
                "john_doe@example.com",
                "doe_john@example.com",
            ]
        );
    }

    #[test]
    fn output_is_deduplicated_and_bounded() {
        let candidates =
            generate_candidates("Ann", "Lee", "example.com", 4, None, false, &[]);
        assert_eq!(candidates.len(), 4);
        let unique: std::collections::HashSet<_> = candidates.iter().collect();
        assert_eq!(unique.len(), candidates.len());
    }

    #[test]
    fn every_candidate_targets_the_lowercased_domain() {
        let candidates = generate_candidates(
            "Ana",
            "Núñez",
            "EXAMPLE.COM",
            MAX_CANDIDATES,
            None,
            false,
            &[],
        );
        assert!(!candidates.is_empty());
        assert!(candidates.iter().all(|c| c.ends_with("@example.com")));
        assert!(candidates.contains(&"ana.nunez@example.com".to_string()));
    }

    #[test]
    fn empty_domain_yields_nothing() {
        assert!(generate_candidates("John", "Doe", "", 15, None, false, &[]).is_empty());
    }

    #[test]
    fn missing_last_name_requires_opt_in() {
        assert!(generate_candidates("Bob", "", "example.com", 15, None, false, &[]).is_empty());

        let candidates =
            generate_candidates("Bob", "", "example.com", 15, None, true, &[]);
        assert_eq!(
            candidates,
            vec![
                "bob@example.com",
                "info@example.com",
                "contact@example.com",
                "contacto@example.com",
                "hello@example.com",
                "hola@example.com",
            ]
        );
    }

    #[test]
    fn generic_set_skips_first_pattern_without_first_name() {
        let candidates = generate_candidates("", "", "example.com", 15, None, true, &[]);
        assert_eq!(candidates[0], "info@example.com");
        assert_eq!(candidates.len(), 5);
    }

    #[test]
    fn enabled_indices_select_a_subset() {
        let candidates = generate_candidates(
            "John",
            "Doe",
            "example.com",
            15,
            Some(&[2, 3, 4, 5, 8]),
            false,
            &[],
        );
        assert_eq!(
            candidates,
            vec![
                "john.doe@example.com",
                "j.doe@example.com",
                "jdoe@example.com",
                "johndoe@example.com",
                "john_doe@example.com",
            ]
        );
    }

    #[test]
    fn out_of_range_indices_are_skipped() {
        let candidates = generate_candidates(
            "John",
            "Doe",
            "example.com",
            15,
            Some(&[0, 42]),
            false,
            &[],
        );
        assert_eq!(candidates, vec!["john@example.com"]);
    }

    #[test]
    fn custom_patterns_are_appended_in_order() {
        let custom = vec![
            "{f}{l}@{domain}".to_string(),
            "{first}-{last}@{domain}".to_string(),
        ];
        let candidates = generate_candidates(
            "John",
            "Doe",
            "example.com",
            15,
            Some(&[0]),
            false,
            &custom,
        );
        assert_eq!(
            candidates,
            vec![
                "john@example.com",
                "jd@example.com",
                "john-doe@example.com",
            ]
        );
    }

    #[test]
    fn unknown_placeholder_is_skipped() {
        let custom = vec!["{nickname}@{domain}".to_string()];
        let candidates = generate_candidates(
            "John",
            "Doe",
            "example.com",
            15,
            Some(&[0]),
            false,
            &custom,
        );
        assert_eq!(candidates, vec!["john@example.com"]);
    }

    #[test]
    fn custom_pattern_validation() {
        assert!(is_valid_custom_pattern("{first}.x@{domain}"));
        assert!(!is_valid_custom_pattern("{first}@gmail.com"));
        assert!(!is_valid_custom_pattern(&format!(
            "{}@{{domain}}",
            "a".repeat(120)
        )));
    }
}
