//! Payload scanners feeding the predicate bag and the data-leak rules.
//!
//! All scanners walk string/number descendants only, so they are pure and
//! deterministic over any JSON payload.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

pub(crate) static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap());

pub(crate) static PHONE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:\+?1[-.\s]?)?(?:\(?\d{3}\)?[-.\s]?)?\d{3}[-.\s]?\d{4}\b").unwrap()
});

static URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://[^\s)]+").unwrap());

fn walk_strings<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::String(text) => out.push(text),
        Value::Object(map) => {
            for item in map.values() {
                walk_strings(item, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                walk_strings(item, out);
            }
        }
        _ => {}
    }
}

fn strings_of(value: &Value) -> Vec<&str> {
    let mut out = Vec::new();
    walk_strings(value, &mut out);
    out
}

pub fn contains_email(value: &Value) -> bool {
    strings_of(value).iter().any(|text| EMAIL_RE.is_match(text))
}

pub fn contains_phone(value: &Value) -> bool {
    strings_of(value).iter().any(|text| PHONE_RE.is_match(text))
}

/// Either PII category, used by the data-leak contract.
pub fn contains_pii(value: &Value) -> bool {
    strings_of(value)
        .iter()
        .any(|text| EMAIL_RE.is_match(text) || PHONE_RE.is_match(text))
}

/// Lowercased host portion of a URL with an explicit scheme.
pub(crate) fn host_from_url(url: &str) -> Option<String> {
    let rest = url.split_once("://")?.1;
    let authority = rest
        .split(['/', '?', '#'])
        .next()
        .unwrap_or("");
    let host_port = authority.rsplit_once('@').map(|(_, host)| host).unwrap_or(authority);
    let host = host_port.split(':').next().unwrap_or("");
    if host.is_empty() {
        None
    } else {
        Some(host.to_lowercase())
    }
}

/// Sorted set of hosts referenced by URLs anywhere in the payload.
pub fn extract_domains(value: &Value) -> Vec<String> {
    let mut domains: Vec<String> = Vec::new();
    for text in strings_of(value) {
        for url in URL_RE.find_iter(text) {
            if let Some(host) = host_from_url(url.as_str()) {
                if !domains.contains(&host) {
                    domains.push(host);
                }
            }
        }
    }
    domains.sort();
    domains
}

/// Every numeric descendant, in traversal order.
pub fn extract_numeric_values(value: &Value) -> Vec<f64> {
    let mut numbers = Vec::new();
    collect_numbers(value, &mut numbers);
    numbers
}

fn collect_numbers(value: &Value, out: &mut Vec<f64>) {
    match value {
        Value::Number(number) => {
            if let Some(raw) = number.as_f64() {
                out.push(raw);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect_numbers(item, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_numbers(item, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_email_detection() {
        assert!(contains_email(&json!({"to": "user@example.com"})));
        assert!(!contains_email(&json!({"to": "not-an-email"})));
    }

    #[test]
    fn test_phone_detection() {
        assert!(contains_phone(&json!(["call 555-123-4567 today"])));
        assert!(!contains_phone(&json!("no digits here")));
    }

    #[test]
    fn test_extract_domains_sorted_unique() {
        let value = json!({
            "a": "see https://B.example.com/page and https://a.example.com",
            "b": {"c": "https://b.example.com/other"},
        });
        assert_eq!(
            extract_domains(&value),
            vec!["a.example.com".to_string(), "b.example.com".to_string()]
        );
    }

    #[test]
    fn test_host_from_url_strips_port_and_userinfo() {
        assert_eq!(
            host_from_url("https://user:pw@Example.com:8443/x?q=1"),
            Some("example.com".to_string())
        );
        assert_eq!(host_from_url("example.com"), None);
    }

    #[test]
    fn test_extract_numeric_values() {
        let value = json!({"amount": 12.5, "items": [1, {"n": 3}]});
        let numbers = extract_numeric_values(&value);
        assert_eq!(numbers, vec![12.5, 1.0, 3.0]);
    }
}
