//! Regex redaction applied to payloads before hashing.
//!
//! Redaction happens before event ids are computed, so a redacted trace is
//! self-consistent: two traces differing only inside redacted spans share
//! event ids.

use regex::Regex;
use serde_json::{Map, Value};

pub const REDACTION_TOKEN: &str = "[REDACTED]";

/// Replace every match of the given patterns, in every string descendant,
/// with the redaction token. Invalid patterns are skipped.
pub fn apply_redactions(value: &Value, patterns: &[String]) -> Value {
    if patterns.is_empty() {
        return value.clone();
    }
    let compiled: Vec<Regex> = patterns
        .iter()
        .filter_map(|pattern| Regex::new(pattern).ok())
        .collect();
    walk(value, &compiled)
}

fn walk(value: &Value, patterns: &[Regex]) -> Value {
    match value {
        Value::String(text) => {
            let mut redacted = text.clone();
            for pattern in patterns {
                redacted = pattern.replace_all(&redacted, REDACTION_TOKEN).to_string();
            }
            Value::String(redacted)
        }
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, item) in map {
                out.insert(key.clone(), walk(item, patterns));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(|item| walk(item, patterns)).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_redacts_nested_strings() {
        let value = json!({"card": "4111-1111-1111-1111", "items": ["tok_secret_1"]});
        let redacted = apply_redactions(
            &value,
            &[r"\d{4}-\d{4}-\d{4}-\d{4}".to_string(), r"tok_\w+".to_string()],
        );
        assert_eq!(redacted["card"], "[REDACTED]");
        assert_eq!(redacted["items"][0], "[REDACTED]");
    }

    #[test]
    fn test_no_patterns_is_identity() {
        let value = json!({"a": 1});
        assert_eq!(apply_redactions(&value, &[]), value);
    }
}
