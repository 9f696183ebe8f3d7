//! Command flows: record, run, shrink, and their shared plumbing.

mod record;
mod run;
mod shrink;

pub use record::record_specs;
pub use run::run_specs;
pub use shrink::shrink_repro;

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use trajectly_core::{StatePaths, ensure_state_dirs, state_paths, write_events_jsonl};
use trajectly_engine::TrtResult;
use trajectly_types::{
    AgentSpec, DiffResult, EVENT_SCHEMA_VERSION, EventType, Finding, ReproArtifact, TraceEvent,
    TraceMeta, Violation,
};

use crate::config::WorkspaceConfig;
use crate::report::read_latest_report_value;
use crate::{Error, Result};

/// Create the `.trajectly/` layout and a default workspace config.
pub fn initialize_workspace(project_root: &Path) -> Result<StatePaths> {
    let paths = state_paths(project_root);
    ensure_state_dirs(&paths)?;
    let config_path = paths.state.join("config.toml");
    if !config_path.exists() {
        WorkspaceConfig::default().save_to(&config_path)?;
    }
    Ok(paths)
}

pub fn build_repro_command(
    spec_path: &Path,
    project_root: &Path,
    strict_override: Option<bool>,
) -> String {
    let mut command = format!(
        "trajectly run \"{}\" --project-root \"{}\"",
        spec_path.display(),
        project_root.display()
    );
    match strict_override {
        Some(true) => command.push_str(" --strict"),
        Some(false) => command.push_str(" --no-strict"),
        None => {}
    }
    command
}

/// Seeds captured at record time, persisted in the baseline metadata and
/// replayed into the sandbox on every subsequent run.
pub(crate) fn seeds_from_meta(meta: &TraceMeta) -> crate::executor::RunSeeds {
    crate::executor::RunSeeds {
        clock_seed: meta.metadata.get("clock_seed").and_then(Value::as_f64),
        random_seed: meta.metadata.get("random_seed").and_then(Value::as_u64),
    }
}

pub(crate) fn violation_to_finding(violation: &Violation) -> Finding {
    let mut finding = Finding::new(
        violation.code.trim().to_lowercase(),
        violation.message.clone(),
    )
    .with_path(format!("$.trt.event[{}]", violation.event_index));
    finding.baseline = violation.expected.clone();
    finding.current = violation.observed.clone();
    finding
}

/// Fold TRT violations into the diff findings, deduplicating on
/// (classification, message, path).
pub(crate) fn merge_trt_findings(diff_result: &mut DiffResult, trt_result: &TrtResult) {
    let mut existing: std::collections::BTreeSet<(String, String, Option<String>)> = diff_result
        .findings
        .iter()
        .map(|finding| {
            (
                finding.classification.clone(),
                finding.message.clone(),
                finding.path.clone(),
            )
        })
        .collect();
    for violation in trt_result.all_violations() {
        let finding = violation_to_finding(violation);
        let key = (
            finding.classification.clone(),
            finding.message.clone(),
            finding.path.clone(),
        );
        if existing.contains(&key) {
            continue;
        }
        existing.insert(key);
        diff_result.findings.push(finding);
    }
}

/// Write the `[0..witness]` prefix of the current trace as the
/// counterexample artifact.
pub(crate) fn write_counterexample_prefix(
    paths: &StatePaths,
    slug: &str,
    current_events: &[TraceEvent],
    witness_index: usize,
) -> Result<PathBuf> {
    let prefix: Vec<TraceEvent> = if current_events.is_empty() {
        Vec::new()
    } else {
        let cutoff = witness_index.min(current_events.len() - 1);
        current_events[..=cutoff].to_vec()
    };
    let prefix_path = paths
        .repros
        .join(format!("{}.counterexample.prefix.jsonl", slug));
    write_events_jsonl(&prefix_path, &prefix)?;
    Ok(prefix_path)
}

/// Project a trace down to the events at or before the divergence point:
/// the envelope, operations up to the cutoff, and nearby step markers.
fn minimize_trace(events: &[TraceEvent], cutoff_index: Option<usize>) -> Vec<TraceEvent> {
    let mut minimized: Vec<TraceEvent> = Vec::new();
    let mut op_index = 0usize;

    for event in events {
        match event.event_type {
            EventType::RunStarted => minimized.push(event.clone()),
            EventType::ToolCalled
            | EventType::ToolReturned
            | EventType::LlmCalled
            | EventType::LlmReturned => {
                if cutoff_index.map(|cutoff| op_index <= cutoff).unwrap_or(true) {
                    minimized.push(event.clone());
                }
                op_index += 1;
            }
            EventType::AgentStep => {
                if cutoff_index
                    .map(|cutoff| op_index <= cutoff + 1)
                    .unwrap_or(true)
                {
                    minimized.push(event.clone());
                }
            }
            EventType::RunFinished => {}
        }
    }

    if let Some(finished) = events
        .iter()
        .filter(|event| event.event_type == EventType::RunFinished)
        .next_back()
    {
        minimized.push(finished.clone());
    }

    let mut deduped: Vec<TraceEvent> = Vec::new();
    let mut seen: std::collections::BTreeSet<(String, u64, String)> = std::collections::BTreeSet::new();
    for event in minimized {
        let key = (
            event.event_type.as_str().to_string(),
            event.seq,
            event.event_id.clone(),
        );
        if seen.contains(&key) {
            continue;
        }
        seen.insert(key);
        deduped.push(event);
    }
    deduped
}

pub(crate) fn write_minimized_repro_traces(
    paths: &StatePaths,
    slug: &str,
    baseline_events: &[TraceEvent],
    current_events: &[TraceEvent],
    cutoff_index: Option<usize>,
) -> Result<(PathBuf, PathBuf)> {
    let baseline_min_path = paths.repros.join(format!("{}.baseline.min.jsonl", slug));
    let current_min_path = paths.repros.join(format!("{}.current.min.jsonl", slug));
    write_events_jsonl(&baseline_min_path, &minimize_trace(baseline_events, cutoff_index))?;
    write_events_jsonl(&current_min_path, &minimize_trace(current_events, cutoff_index))?;
    Ok((baseline_min_path, current_min_path))
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn write_repro_artifact(
    paths: &StatePaths,
    spec: &AgentSpec,
    slug: &str,
    diff_result: &DiffResult,
    baseline_events: &[TraceEvent],
    current_events: &[TraceEvent],
    report_json: &Path,
    report_md: &Path,
    trt_result: &TrtResult,
    counterexample_prefix: Option<&Path>,
) -> Result<PathBuf> {
    let cutoff_index = diff_result
        .summary
        .first_divergence
        .as_ref()
        .map(|divergence| divergence.index);
    let (baseline_min_path, current_min_path) = write_minimized_repro_traces(
        paths,
        slug,
        baseline_events,
        current_events,
        cutoff_index,
    )?;

    let repro_path = paths.repros.join(format!("{}.json", slug));
    let artifact = ReproArtifact {
        schema_version: EVENT_SCHEMA_VERSION.to_string(),
        spec: spec.name.clone(),
        slug: slug.to_string(),
        spec_path: spec.source_path.display().to_string(),
        first_divergence: diff_result
            .summary
            .first_divergence
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?,
        finding_count: diff_result.summary.finding_count,
        regression: diff_result.summary.regression,
        report_json: report_json.display().to_string(),
        report_md: report_md.display().to_string(),
        repro_command: build_repro_command(&spec.source_path, &paths.root, None),
        baseline_min_trace: baseline_min_path.display().to_string(),
        current_min_trace: current_min_path.display().to_string(),
        trt_status: Some(trt_result.status),
        trt_failure_class: trt_result.report.failure_class,
        trt_witness_index: trt_result.report.witness_index,
        trt_counterexample_prefix: counterexample_prefix
            .map(|prefix| prefix.display().to_string()),
        trt_counterexample_reduced: None,
        trt_shrink_stats: None,
    };
    std::fs::write(&repro_path, serde_json::to_string_pretty(&artifact)?)?;
    Ok(repro_path)
}

/// Pick a row from the latest aggregate: by spec name or slug, or the
/// first regression, or the first row.
pub(crate) fn resolve_latest_report_row(
    paths: &StatePaths,
    selector: Option<&str>,
) -> Result<Value> {
    let report = read_latest_report_value(paths)?;
    let rows = report
        .get("reports")
        .and_then(Value::as_array)
        .filter(|rows| !rows.is_empty())
        .ok_or_else(|| {
            Error::InvalidOperation("Latest report contains no specs to reproduce".to_string())
        })?;

    match selector {
        Some(selector) if selector != "latest" => rows
            .iter()
            .find(|row| {
                row.get("spec").and_then(Value::as_str) == Some(selector)
                    || row.get("slug").and_then(Value::as_str) == Some(selector)
            })
            .cloned()
            .ok_or_else(|| {
                Error::InvalidOperation(format!("Spec not found in latest report: {}", selector))
            }),
        _ => Ok(rows
            .iter()
            .find(|row| row.get("regression").and_then(Value::as_bool).unwrap_or(false))
            .cloned()
            .unwrap_or_else(|| rows[0].clone())),
    }
}

/// Spec name and path for a repro target.
pub fn resolve_repro_spec(
    project_root: &Path,
    selector: Option<&str>,
) -> Result<(String, PathBuf)> {
    let paths = state_paths(project_root);
    let chosen = resolve_latest_report_row(&paths, selector)?;
    let spec_path = chosen
        .get("spec_path")
        .and_then(Value::as_str)
        .filter(|path| !path.trim().is_empty())
        .ok_or_else(|| {
            Error::InvalidOperation(
                "Latest report is missing `spec_path`. Re-run `trajectly run` with this version \
                 to generate repro metadata."
                    .to_string(),
            )
        })?;
    let spec_name = chosen
        .get("spec")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    Ok((spec_name, PathBuf::from(spec_path)))
}

/// Update one row of the latest aggregate in place and rewrite both twins.
pub(crate) fn refresh_latest_report_row(
    paths: &StatePaths,
    slug: &str,
    row_updates: Map<String, Value>,
) -> Result<(PathBuf, PathBuf)> {
    let mut aggregate = read_latest_report_value(paths)?;
    let rows = aggregate
        .get_mut("reports")
        .and_then(Value::as_array_mut)
        .ok_or_else(|| {
            Error::InvalidOperation("Latest report payload is invalid: reports must be a list".to_string())
        })?;

    let mut updated = false;
    for row in rows.iter_mut() {
        let map = match row.as_object_mut() {
            Some(map) => map,
            None => continue,
        };
        if map.get("slug").and_then(Value::as_str) != Some(slug) {
            continue;
        }
        for (key, value) in &row_updates {
            map.insert(key.clone(), value.clone());
        }
        updated = true;
        break;
    }
    if !updated {
        return Err(Error::InvalidOperation(format!(
            "Spec slug not found in latest report: {}",
            slug
        )));
    }

    let rows_snapshot = aggregate
        .get("reports")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let errors: Vec<String> = aggregate
        .get("errors")
        .and_then(Value::as_array)
        .map(|errors| {
            errors
                .iter()
                .map(|error| error.as_str().unwrap_or_default().to_string())
                .collect()
        })
        .unwrap_or_default();
    let markdown = crate::report::aggregate_markdown(&rows_snapshot, &errors);
    crate::report::write_latest_report(paths, &aggregate, &markdown)
}
