//! Type-aware recursive payload diff with `$`-rooted paths.

use serde_json::Value;

#[derive(Debug, Clone)]
pub struct StructuralChange {
    pub path: String,
    pub baseline: Value,
    pub current: Value,
}

fn same_shape(baseline: &Value, current: &Value) -> bool {
    matches!(
        (baseline, current),
        (Value::Null, Value::Null)
            | (Value::Bool(_), Value::Bool(_))
            | (Value::Number(_), Value::Number(_))
            | (Value::String(_), Value::String(_))
            | (Value::Array(_), Value::Array(_))
            | (Value::Object(_), Value::Object(_))
    )
}

pub fn structural_diff(baseline: &Value, current: &Value, path: &str) -> Vec<StructuralChange> {
    let mut changes = Vec::new();
    collect(baseline, current, path, &mut changes);
    changes
}

fn collect(baseline: &Value, current: &Value, path: &str, changes: &mut Vec<StructuralChange>) {
    if !same_shape(baseline, current) {
        changes.push(StructuralChange {
            path: path.to_string(),
            baseline: baseline.clone(),
            current: current.clone(),
        });
        return;
    }

    match (baseline, current) {
        (Value::Object(left), Value::Object(right)) => {
            let mut keys: Vec<&String> = left.keys().chain(right.keys()).collect();
            keys.sort();
            keys.dedup();
            for key in keys {
                let key_path = format!("{}.{}", path, key);
                match (left.get(key), right.get(key)) {
                    (Some(left_value), Some(right_value)) => {
                        collect(left_value, right_value, &key_path, changes);
                    }
                    (left_value, right_value) => changes.push(StructuralChange {
                        path: key_path,
                        baseline: left_value.cloned().unwrap_or(Value::Null),
                        current: right_value.cloned().unwrap_or(Value::Null),
                    }),
                }
            }
        }
        (Value::Array(left), Value::Array(right)) => {
            let max_len = left.len().max(right.len());
            for idx in 0..max_len {
                let idx_path = format!("{}[{}]", path, idx);
                match (left.get(idx), right.get(idx)) {
                    (Some(left_value), Some(right_value)) => {
                        collect(left_value, right_value, &idx_path, changes);
                    }
                    (left_value, right_value) => changes.push(StructuralChange {
                        path: idx_path,
                        baseline: left_value.cloned().unwrap_or(Value::Null),
                        current: right_value.cloned().unwrap_or(Value::Null),
                    }),
                }
            }
        }
        _ => {
            if baseline != current {
                changes.push(StructuralChange {
                    path: path.to_string(),
                    baseline: baseline.clone(),
                    current: current.clone(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_equal_values_no_changes() {
        let value = json!({"a": [1, {"b": 2}]});
        assert!(structural_diff(&value, &value, "$").is_empty());
    }

    #[test]
    fn test_scalar_change() {
        let changes = structural_diff(&json!({"a": 1}), &json!({"a": 2}), "$");
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].path, "$.a");
    }

    #[test]
    fn test_missing_key() {
        let changes = structural_diff(&json!({"a": 1}), &json!({}), "$");
        assert_eq!(changes[0].path, "$.a");
        assert_eq!(changes[0].current, Value::Null);
    }

    #[test]
    fn test_list_length_change() {
        let changes = structural_diff(&json!([1]), &json!([1, 2]), "$");
        assert_eq!(changes[0].path, "$[1]");
    }

    #[test]
    fn test_type_change_reported_once() {
        let changes = structural_diff(&json!({"a": {"x": 1}}), &json!({"a": [1]}), "$");
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].path, "$.a");
    }
}
