//! Report rendering and the latest-run aggregate.

use std::path::{Path, PathBuf};

use serde_json::{Value, json};

use trajectly_core::StatePaths;
use trajectly_engine::TrtResult;
use trajectly_types::{DiffResult, EVENT_SCHEMA_VERSION, LatestRunReport};

use crate::{Error, Result};

/// Markdown twin of a diff report.
pub fn render_markdown(spec_name: &str, result: &DiffResult) -> String {
    let mut lines: Vec<String> = Vec::new();
    lines.push(format!("## Trajectly Report: {}", spec_name));
    lines.push(String::new());
    let summary = &result.summary;
    let status = if summary.regression {
        "Regression detected"
    } else {
        "No regression"
    };
    lines.push(format!("- Status: **{}**", status));
    lines.push(format!("- Findings: **{}**", summary.finding_count));
    if let Some(divergence) = &summary.first_divergence {
        lines.push(format!(
            "- First divergence: **{}** at index **{}**",
            divergence.kind, divergence.index
        ));
    }

    lines.push(String::new());
    lines.push("### Budgets".to_string());
    lines.push(String::new());
    lines.push("| Metric | Baseline | Current |".to_string());
    lines.push("|---|---:|---:|".to_string());
    lines.push(format!(
        "| Duration (ms) | {} | {} |",
        summary.baseline.duration_ms, summary.current.duration_ms
    ));
    lines.push(format!(
        "| Tool Calls | {} | {} |",
        summary.baseline.tool_calls, summary.current.tool_calls
    ));
    lines.push(format!(
        "| Tokens | {} | {} |",
        summary.baseline.tokens, summary.current.tokens
    ));

    lines.push(String::new());
    lines.push("### Findings".to_string());
    lines.push(String::new());
    if result.findings.is_empty() {
        lines.push("No findings.".to_string());
    } else {
        for finding in &result.findings {
            let location = finding
                .path
                .as_ref()
                .map(|path| format!(" at `{}`", path))
                .unwrap_or_default();
            lines.push(format!(
                "- `{}`{}: {}",
                finding.classification, location, finding.message
            ));
        }
    }

    lines.push(String::new());
    lines.join("\n")
}

/// Write the diff report (JSON + markdown twin).
pub fn write_reports(
    spec_name: &str,
    result: &DiffResult,
    json_path: &Path,
    md_path: &Path,
) -> Result<()> {
    for path in [json_path, md_path] {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut payload = serde_json::to_value(result)?;
    if let Some(map) = payload.as_object_mut() {
        map.insert("schema_version".to_string(), json!(EVENT_SCHEMA_VERSION));
    }
    std::fs::write(json_path, serde_json::to_string_pretty(&payload)?)?;
    std::fs::write(md_path, render_markdown(spec_name, result))?;
    Ok(())
}

/// Nest the TRT report under the diff report as `trt_v04`.
pub fn augment_report_with_trt(report_json: &Path, trt_result: &TrtResult) -> Result<()> {
    let mut raw: Value = serde_json::from_str(&std::fs::read_to_string(report_json)?)?;
    let map = match raw.as_object_mut() {
        Some(map) => map,
        None => return Ok(()),
    };
    map.insert(
        "trt_v04".to_string(),
        serde_json::to_value(&trt_result.report)?,
    );
    std::fs::write(report_json, serde_json::to_string_pretty(&raw)?)?;
    Ok(())
}

/// Markdown twin of the latest-run aggregate.
pub fn aggregate_markdown(rows: &[Value], errors: &[String]) -> String {
    let mut lines: Vec<String> = Vec::new();
    lines.push("# Trajectly Latest Run".to_string());
    lines.push(String::new());
    if !errors.is_empty() {
        lines.push("## Errors".to_string());
        lines.push(String::new());
        for error in errors {
            lines.push(format!("- {}", error));
        }
        lines.push(String::new());
    }

    lines.push("## Specs".to_string());
    lines.push(String::new());
    if rows.is_empty() {
        lines.push("No specs processed.".to_string());
    } else {
        for row in rows {
            let text = |key: &str| row.get(key).and_then(Value::as_str).unwrap_or("");
            let status = if row.get("regression").and_then(Value::as_bool).unwrap_or(false) {
                "regression"
            } else {
                "clean"
            };
            lines.push(format!("- `{}`: {}", text("spec"), status));
            lines.push(format!("  - json: `{}`", text("report_json")));
            lines.push(format!("  - md: `{}`", text("report_md")));
            if let Some(trt_status) = row.get("trt_status").and_then(Value::as_str) {
                match row.get("trt_witness_index").and_then(Value::as_u64) {
                    Some(witness) => {
                        lines.push(format!("  - trt: `{}` (witness={})", trt_status, witness))
                    }
                    None => lines.push(format!("  - trt: `{}`", trt_status)),
                }
            }
            if !text("repro_command").is_empty() {
                lines.push(format!("  - repro: `{}`", text("repro_command")));
            }
            if !text("trt_counterexample_reduced").is_empty() {
                lines.push(format!(
                    "  - trt reduced: `{}`",
                    text("trt_counterexample_reduced")
                ));
            }
        }
    }
    lines.push(String::new());
    lines.join("\n")
}

/// Atomically refresh `latest.json` and `latest.md`.
pub fn write_latest_report(
    paths: &StatePaths,
    aggregate: &Value,
    markdown: &str,
) -> Result<(PathBuf, PathBuf)> {
    let latest_json = paths.reports.join("latest.json");
    let latest_md = paths.reports.join("latest.md");
    std::fs::create_dir_all(&paths.reports)?;
    std::fs::write(&latest_json, serde_json::to_string_pretty(aggregate)?)?;
    std::fs::write(&latest_md, markdown)?;
    Ok((latest_json, latest_md))
}

pub fn latest_report_path(paths: &StatePaths, as_json: bool) -> PathBuf {
    paths
        .reports
        .join(if as_json { "latest.json" } else { "latest.md" })
}

/// Read and validate the latest-run aggregate.
pub fn read_latest_report(paths: &StatePaths, as_json: bool) -> Result<String> {
    let path = latest_report_path(paths, as_json);
    if !path.exists() {
        return Err(Error::InvalidOperation(format!(
            "Latest report not found: {}. Run `trajectly run` first",
            path.display()
        )));
    }
    let content = std::fs::read_to_string(&path)?;
    if as_json {
        let parsed: Value = serde_json::from_str(&content)?;
        LatestRunReport::validate(&parsed)?;
    }
    Ok(content)
}

/// The validated aggregate as a typed value.
pub fn read_latest_report_value(paths: &StatePaths) -> Result<Value> {
    let content = read_latest_report(paths, true)?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use trajectly_types::{DiffSummary, Finding, TraceTotals};

    fn diff_result(findings: Vec<Finding>) -> DiffResult {
        let mut result = DiffResult {
            summary: DiffSummary {
                regression: false,
                finding_count: 0,
                classifications: BTreeMap::new(),
                first_divergence: None,
                baseline: TraceTotals {
                    duration_ms: 10,
                    tool_calls: 1,
                    tokens: 0,
                },
                current: TraceTotals {
                    duration_ms: 12,
                    tool_calls: 2,
                    tokens: 0,
                },
            },
            findings,
        };
        result.refresh_summary();
        result
    }

    #[test]
    fn test_markdown_clean_report() {
        let markdown = render_markdown("checkout", &diff_result(Vec::new()));
        assert!(markdown.contains("## Trajectly Report: checkout"));
        assert!(markdown.contains("**No regression**"));
        assert!(markdown.contains("No findings."));
        assert!(markdown.contains("| Tool Calls | 1 | 2 |"));
    }

    #[test]
    fn test_markdown_lists_findings() {
        let finding = Finding::new("contract_tool_denied", "denied").with_path("$.tool_calls[0]");
        let markdown = render_markdown("checkout", &diff_result(vec![finding]));
        assert!(markdown.contains("**Regression detected**"));
        assert!(markdown.contains("`contract_tool_denied` at `$.tool_calls[0]`: denied"));
    }

    #[test]
    fn test_aggregate_markdown_rows() {
        let rows = vec![json!({
            "spec": "checkout",
            "regression": true,
            "report_json": "/tmp/checkout.json",
            "report_md": "/tmp/checkout.md",
            "trt_status": "FAIL",
            "trt_witness_index": 3,
            "repro_command": "trajectly run checkout",
        })];
        let markdown = aggregate_markdown(&rows, &["spec-a: boom".to_string()]);
        assert!(markdown.contains("## Errors"));
        assert!(markdown.contains("- `checkout`: regression"));
        assert!(markdown.contains("- trt: `FAIL` (witness=3)"));
        assert!(markdown.contains("- repro: `trajectly run checkout`"));
    }
}
