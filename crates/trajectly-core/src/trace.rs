//! Trace metadata I/O.
//!
//! Metadata is a sibling artifact to the event stream (`<stem>.meta.json`),
//! carrying schema and normalizer versions so replay can refuse to compare
//! artifacts produced by an incompatible recorder.

use std::fs;
use std::path::{Path, PathBuf};

use trajectly_types::TraceMeta;

use crate::error::Result;

/// Derived trace path for an events file: `<stem>.trace.jsonl`.
pub fn default_trace_path(events_path: &Path) -> PathBuf {
    let stem = events_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "trace".to_string());
    events_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(format!("{}.trace.jsonl", stem))
}

/// Metadata path beside a trace file.
pub fn default_trace_meta_path(trace_path: &Path) -> PathBuf {
    let name = trace_path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "trace.jsonl".to_string());
    let base = match name.strip_suffix(".jsonl") {
        Some(base) => base.to_string(),
        None => trace_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or(name),
    };
    trace_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(format!("{}.meta.json", base))
}

/// Validate and write trace metadata, pretty-printed with sorted keys.
pub fn write_trace_meta(path: &Path, meta: &TraceMeta) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let value = serde_json::to_value(meta)?;
    let validated = TraceMeta::from_value(&value)?;
    let rendered = serde_json::to_string_pretty(&validated)?;
    fs::write(path, rendered)?;
    Ok(())
}

/// Read and validate trace metadata.
pub fn read_trace_meta(path: &Path) -> Result<TraceMeta> {
    let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(path)?)?;
    Ok(TraceMeta::from_value(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_paths() {
        let events = Path::new("/tmp/spec.record.events.jsonl");
        let trace = default_trace_path(events);
        assert_eq!(trace, Path::new("/tmp/spec.record.events.trace.jsonl"));
        let meta = default_trace_meta_path(&trace);
        assert_eq!(meta, Path::new("/tmp/spec.record.events.trace.meta.json"));
    }

    #[test]
    fn test_meta_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("baseline.meta.json");
        let meta = TraceMeta {
            spec_name: Some("checkout".to_string()),
            run_id: Some("run-1".to_string()),
            mode: Some("record".to_string()),
            ..TraceMeta::default()
        };
        write_trace_meta(&path, &meta).unwrap();
        let loaded = read_trace_meta(&path).unwrap();
        assert_eq!(loaded.spec_name.as_deref(), Some("checkout"));
        assert_eq!(loaded.normalizer_version, "1");
    }

    #[test]
    fn test_read_rejects_tampered_version() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("baseline.meta.json");
        fs::write(
            &path,
            r#"{"schema_version": "0.4", "normalizer_version": "0", "metadata": {}}"#,
        )
        .unwrap();
        assert!(read_trace_meta(&path).is_err());
    }
}
