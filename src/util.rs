use std::cmp::Ordering;
use std::sync::OnceLock;

use regex::Regex;

/// Case-insensitive substring test. An empty needle matches everything.
pub fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Normalise an organisation name for comparison: lowercase, trimmed,
/// internal whitespace collapsed to single spaces.
///
/// Example: "  Acme   Growth Fund " → "acme growth fund"
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn display_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.+?)\s*\((\d{4})\)$").unwrap())
}

/// Split a display name of the form `"Company (2021)"` into name and year.
///
/// Names without a year suffix come back trimmed with `None`.
pub fn parse_display_name(display_name: &str) -> (String, Option<u16>) {
    let trimmed = display_name.trim();
    if let Some(caps) = display_name_regex().captures(trimmed) {
        let year = caps.get(2).and_then(|m| m.as_str().parse::<u16>().ok());
        if let (Some(name), Some(year)) = (caps.get(1), year) {
            return (name.as_str().trim().to_string(), Some(year));
        }
    }
    (trimmed.to_string(), None)
}

/// Format a company name with the survey year it came from.
pub fn display_name(name: &str, year: u16) -> String {
    format!("{} ({})", name, year)
}

/// Minimal shape check for an email address: something@something.
pub fn looks_like_email(email: &str) -> bool {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty() && !domain.contains('@'),
        None => false,
    }
}

/// Order opaque record ids: numerically when both parse as integers,
/// lexically otherwise.
pub fn compare_record_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<i64>(), b.parse::<i64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}
