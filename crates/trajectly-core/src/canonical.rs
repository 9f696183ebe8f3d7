//! Canonical JSON normalization and content hashing.
//!
//! Every signature and fixture hash in the system goes through this module,
//! so its output must be byte-identical across platforms and across any
//! reordering of mapping keys. Mappings are emitted with lexicographically
//! sorted keys, floats are rounded to a fixed precision, and serialization
//! is compact ASCII-only JSON.

use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};

use trajectly_types::NORMALIZER_VERSION;

/// Keys stripped by `strip_volatile`: observational fields that differ
/// between otherwise-equal runs.
pub const DEFAULT_VOLATILE_KEYS: &[&str] = &[
    "timestamp",
    "run_id",
    "request_id",
    "event_id",
    "rel_ms",
    "created_at",
    "updated_at",
];

const DEFAULT_FLOAT_PRECISION: i32 = 12;

#[derive(Debug, Clone)]
pub struct CanonicalNormalizer {
    pub version: String,
    pub volatile_keys: Vec<String>,
    pub float_precision: i32,
}

impl Default for CanonicalNormalizer {
    fn default() -> Self {
        CanonicalNormalizer {
            version: NORMALIZER_VERSION.to_string(),
            volatile_keys: DEFAULT_VOLATILE_KEYS
                .iter()
                .map(|key| key.to_string())
                .collect(),
            float_precision: DEFAULT_FLOAT_PRECISION,
        }
    }
}

impl CanonicalNormalizer {
    fn normalize_number(&self, number: &Number) -> Value {
        if number.is_i64() || number.is_u64() {
            return Value::Number(number.clone());
        }
        let raw = number.as_f64().unwrap_or(0.0);
        if raw.is_nan() {
            return Value::String("NaN".to_string());
        }
        if raw.is_infinite() {
            let text = if raw > 0.0 { "Infinity" } else { "-Infinity" };
            return Value::String(text.to_string());
        }
        let factor = 10f64.powi(self.float_precision);
        let rounded = (raw * factor).round() / factor;
        Number::from_f64(rounded)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(rounded.to_string()))
    }

    fn walk(&self, value: &Value, strip_volatile: bool) -> Value {
        match value {
            Value::Object(map) => {
                let mut normalized = Map::new();
                for (key, item) in sorted_entries(map) {
                    if strip_volatile && self.volatile_keys.iter().any(|v| v == key) {
                        continue;
                    }
                    normalized.insert(key.clone(), self.walk(item, strip_volatile));
                }
                Value::Object(normalized)
            }
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.walk(item, strip_volatile))
                    .collect(),
            ),
            Value::Number(number) => self.normalize_number(number),
            other => other.clone(),
        }
    }

    /// Recursively normalize a value: sorted mapping keys, fixed-precision
    /// floats, non-finite floats mapped to their string names.
    pub fn normalize(&self, value: &Value, strip_volatile: bool) -> Value {
        self.walk(value, strip_volatile)
    }

    /// Normalize while dropping the configured volatile key set.
    pub fn strip_volatile(&self, value: &Value) -> Value {
        self.walk(value, true)
    }

    /// `dumps(normalize(v))`: the canonical byte form of a value.
    pub fn canonical_dumps(&self, value: &Value, strip_volatile: bool) -> String {
        dumps(&self.normalize(value, strip_volatile))
    }

    /// SHA-256 hex digest of the canonical byte form.
    pub fn sha256(&self, value: &Value, strip_volatile: bool) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_dumps(value, strip_volatile).as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Hash of `value` with the given top-level keys excluded. Used for
    /// content-addressed event ids, which must ignore timing fields.
    pub fn sha256_subset(&self, value: &Map<String, Value>, ignored_keys: &[&str]) -> String {
        let mut subset = Map::new();
        for (key, item) in value {
            if ignored_keys.contains(&key.as_str()) {
                continue;
            }
            subset.insert(key.clone(), item.clone());
        }
        self.sha256(&Value::Object(subset), false)
    }
}

fn sorted_entries(map: &Map<String, Value>) -> Vec<(&String, &Value)> {
    let mut entries: Vec<(&String, &Value)> = map.iter().collect();
    entries.sort_by(|(a, _), (b, _)| a.cmp(b));
    entries
}

/// Compact JSON serialization with sorted keys and ASCII-only escapes.
/// No normalization is applied; pair with `normalize` for canonical bytes.
pub fn dumps(value: &Value) -> String {
    let mut out = String::new();
    write_value(value, &mut out);
    out
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(number) => out.push_str(&number.to_string()),
        Value::String(text) => write_string(text, out),
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            out.push('{');
            for (index, (key, item)) in sorted_entries(map).into_iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_value(item, out);
            }
            out.push('}');
        }
    }
}

fn write_string(text: &str, out: &mut String) {
    out.push('"');
    for ch in text.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0C}' => out.push_str("\\f"),
            ch if (ch as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", ch as u32));
            }
            ch if (ch as u32) > 0x7E => {
                let code = ch as u32;
                if code > 0xFFFF {
                    // Encode astral-plane characters as a surrogate pair.
                    let reduced = code - 0x10000;
                    let high = 0xD800 + (reduced >> 10);
                    let low = 0xDC00 + (reduced & 0x3FF);
                    out.push_str(&format!("\\u{:04x}\\u{:04x}", high, low));
                } else {
                    out.push_str(&format!("\\u{:04x}", code));
                }
            }
            ch => out.push(ch),
        }
    }
    out.push('"');
}

/// Normalize without stripping volatile keys, using the default normalizer.
pub fn normalize_for_json(value: &Value) -> Value {
    CanonicalNormalizer::default().normalize(value, false)
}

/// Canonical byte form using the default normalizer (no volatile stripping).
pub fn canonical_dumps(value: &Value) -> String {
    CanonicalNormalizer::default().canonical_dumps(value, false)
}

/// Content hash using the default normalizer (no volatile stripping).
pub fn sha256_of_data(value: &Value) -> String {
    CanonicalNormalizer::default().sha256(value, false)
}

/// Content hash with top-level keys excluded, using the default normalizer.
pub fn sha256_of_subset(value: &Map<String, Value>, ignored_keys: &[&str]) -> String {
    CanonicalNormalizer::default().sha256_subset(value, ignored_keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dumps_sorts_keys_and_stays_compact() {
        let value = json!({"b": 1, "a": {"z": true, "m": [1, 2]}});
        assert_eq!(dumps(&value), r#"{"a":{"m":[1,2],"z":true},"b":1}"#);
    }

    #[test]
    fn test_dumps_escapes_non_ascii() {
        let value = json!({"k": "caf\u{e9}\n"});
        assert_eq!(dumps(&value), "{\"k\":\"caf\\u00e9\\n\"}");
    }

    #[test]
    fn test_dumps_astral_surrogate_pair() {
        let value = json!("\u{1F600}");
        assert_eq!(dumps(&value), "\"\\ud83d\\ude00\"");
    }

    #[test]
    fn test_canonical_stability_across_key_order() {
        let left: Value = serde_json::from_str(r#"{"a": 1, "b": {"c": 2, "d": 3}}"#).unwrap();
        let right: Value = serde_json::from_str(r#"{"b": {"d": 3, "c": 2}, "a": 1}"#).unwrap();
        assert_eq!(canonical_dumps(&left), canonical_dumps(&right));
        assert_eq!(sha256_of_data(&left), sha256_of_data(&right));
    }

    #[test]
    fn test_float_rounding() {
        let normalizer = CanonicalNormalizer::default();
        let value = json!(0.5000000000000004);
        let normalized = normalizer.normalize(&value, false);
        assert_eq!(normalized, json!(0.5));
    }

    #[test]
    fn test_strip_volatile_drops_default_keys() {
        let value = json!({"run_id": "r", "rel_ms": 4, "payload": {"timestamp": 1, "x": 2}});
        let stripped = CanonicalNormalizer::default().strip_volatile(&value);
        assert_eq!(stripped, json!({"payload": {"x": 2}}));
    }

    #[test]
    fn test_sha256_subset_ignores_keys() {
        let left = json!({"a": 1, "rel_ms": 5}).as_object().unwrap().clone();
        let right = json!({"a": 1, "rel_ms": 99}).as_object().unwrap().clone();
        assert_eq!(
            sha256_of_subset(&left, &["rel_ms"]),
            sha256_of_subset(&right, &["rel_ms"])
        );
        assert_ne!(
            sha256_of_subset(&left, &[]),
            sha256_of_subset(&right, &[])
        );
    }

    #[test]
    fn test_repeated_dumps_identical() {
        let value = json!({"nested": [{"k": 1.5}, null, "text"]});
        assert_eq!(canonical_dumps(&value), canonical_dumps(&value));
    }
}
