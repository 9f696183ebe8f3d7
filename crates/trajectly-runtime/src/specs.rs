//! Spec file loading.
//!
//! Spec files are JSON (`*.agent.json`); the core consumes already-parsed
//! values, so this module only resolves files and `extends` chains before
//! handing the merged value to the schema-migrating parser.

use std::path::{Path, PathBuf};

use serde_json::Value;

use trajectly_types::{AgentSpec, deep_merge};

use crate::{Error, Result};

const MAX_EXTENDS_DEPTH: usize = 10;

const AUTO_SPEC_EXCLUDED_DIRS: &[&str] = &[
    ".git",
    ".github",
    ".trajectly",
    ".venv",
    "__pycache__",
    "node_modules",
    "target",
    "dist",
    "build",
];

fn load_value(path: &Path) -> Result<Value> {
    let raw = std::fs::read_to_string(path)
        .map_err(|err| Error::Spec(format!("Cannot read spec {}: {}", path.display(), err)))?;
    let value: Value = serde_json::from_str(&raw)
        .map_err(|err| Error::Spec(format!("Spec {} is not valid JSON: {}", path.display(), err)))?;
    if !value.is_object() {
        return Err(Error::Spec(format!(
            "Spec file must be a mapping: {}",
            path.display()
        )));
    }
    Ok(value)
}

/// Recursively resolve `extends` chains with a depth guard against cycles.
fn resolve_extends(value: Value, source_path: &Path, depth: usize) -> Result<Value> {
    let mut map = match value {
        Value::Object(map) => map,
        other => return Ok(other),
    };
    let extends_raw = match map.remove("extends") {
        None => return Ok(Value::Object(map)),
        Some(Value::String(extends)) => extends,
        Some(_) => return Err(Error::Spec("extends must be a string path".to_string())),
    };
    if depth >= MAX_EXTENDS_DEPTH {
        return Err(Error::Spec(format!(
            "Spec extends depth exceeded {}: circular reference?",
            MAX_EXTENDS_DEPTH
        )));
    }

    let mut extends_path = PathBuf::from(&extends_raw);
    if !extends_path.is_absolute() {
        extends_path = source_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(extends_path);
    }
    if !extends_path.exists() {
        return Err(Error::Spec(format!(
            "extends target not found: {}",
            extends_path.display()
        )));
    }

    let base = load_value(&extends_path)?;
    let base = resolve_extends(base, &extends_path, depth + 1)?;
    Ok(deep_merge(&base, &Value::Object(map)))
}

/// Load a single spec file, resolving `extends` and migrating legacy
/// layouts to the current schema.
pub fn load_spec(path: &Path) -> Result<AgentSpec> {
    let value = load_value(path)?;
    let merged = resolve_extends(value, path, 0)?;
    Ok(AgentSpec::from_value(&merged, path)?)
}

/// Resolve spec targets relative to `cwd` in deterministic order.
pub fn load_specs(targets: &[String], cwd: &Path) -> Result<Vec<AgentSpec>> {
    let mut resolved: Vec<PathBuf> = Vec::new();
    for target in targets {
        let candidate = {
            let raw = PathBuf::from(target);
            if raw.is_absolute() { raw } else { cwd.join(raw) }
        };
        if candidate.is_file() {
            resolved.push(candidate);
        } else if candidate.is_dir() {
            resolved.extend(discover_spec_files(&candidate));
        } else {
            return Err(Error::Spec(format!("No spec files matched targets: {}", target)));
        }
    }
    resolved.sort();
    resolved.dedup();
    if resolved.is_empty() {
        return Err(Error::Spec(format!(
            "No spec files matched targets: {}",
            targets.join(", ")
        )));
    }
    resolved.iter().map(|path| load_spec(path)).collect()
}

/// Walk a project tree for `*.agent.json` specs in deterministic order,
/// skipping state and dependency directories.
pub fn discover_spec_files(project_root: &Path) -> Vec<PathBuf> {
    let mut discovered: Vec<PathBuf> = walkdir::WalkDir::new(project_root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            !(entry.file_type().is_dir()
                && (AUTO_SPEC_EXCLUDED_DIRS.contains(&name.as_ref())
                    || (name.starts_with('.') && entry.depth() > 0)))
        })
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .file_name()
                .to_string_lossy()
                .ends_with(".agent.json")
        })
        .map(|entry| entry.path().to_path_buf())
        .collect();
    discovered.sort();
    discovered
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_load_spec_with_extends() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("base.agent.json");
        std::fs::write(
            &base,
            json!({
                "schema_version": "0.4",
                "name": "base",
                "command": "true",
                "contracts": {"tools": {"deny": ["rm"]}},
            })
            .to_string(),
        )
        .unwrap();
        let child = dir.path().join("child.agent.json");
        std::fs::write(
            &child,
            json!({
                "extends": "base.agent.json",
                "name": "child",
                "contracts": {"tools": {"max_calls_total": 3}},
            })
            .to_string(),
        )
        .unwrap();

        let spec = load_spec(&child).unwrap();
        assert_eq!(spec.name, "child");
        assert_eq!(spec.contracts.tools.deny, vec!["rm"]);
        assert_eq!(spec.contracts.tools.max_calls_total, Some(3));
    }

    #[test]
    fn test_extends_cycle_rejected() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.agent.json");
        let b = dir.path().join("b.agent.json");
        std::fs::write(&a, json!({"extends": "b.agent.json", "command": "true"}).to_string())
            .unwrap();
        std::fs::write(&b, json!({"extends": "a.agent.json", "command": "true"}).to_string())
            .unwrap();
        let err = load_spec(&a).unwrap_err();
        assert!(err.to_string().contains("extends depth exceeded"));
    }

    #[test]
    fn test_discover_spec_files_skips_state_dirs() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".trajectly")).unwrap();
        std::fs::write(
            dir.path().join(".trajectly/hidden.agent.json"),
            "{}",
        )
        .unwrap();
        std::fs::write(dir.path().join("b.agent.json"), "{}").unwrap();
        std::fs::create_dir_all(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested/a.agent.json"), "{}").unwrap();

        let found = discover_spec_files(dir.path());
        let names: Vec<String> = found
            .iter()
            .map(|path| {
                path.strip_prefix(dir.path())
                    .unwrap()
                    .to_string_lossy()
                    .to_string()
            })
            .collect();
        assert_eq!(names, vec!["b.agent.json", "nested/a.agent.json"]);
    }

    #[test]
    fn test_missing_target_errors() {
        let dir = TempDir::new().unwrap();
        let err = load_specs(&["nope.agent.json".to_string()], dir.path()).unwrap_err();
        assert!(err.to_string().contains("No spec files matched"));
    }
}
