//! `shrink`: minimize the latest failing counterexample with ddmin while
//! preserving its failure class, then rewrite the report artifacts in
//! place.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::{Map, Value, json};

use trajectly_core::{ensure_state_dirs, read_events_jsonl, state_paths, write_events_jsonl};
use trajectly_engine::{ddmin_shrink, evaluate_trt};
use trajectly_types::{
    CommandOutcome, EXIT_INTERNAL_ERROR, EXIT_SUCCESS, ShrinkStats, TrtStatus,
};

use crate::ops::{build_repro_command, resolve_latest_report_row, write_counterexample_prefix};
use crate::report::augment_report_with_trt;
use crate::specs::load_spec;
use crate::{Result, ops};

fn row_path(row: &Value, key: &str) -> Option<PathBuf> {
    row.get(key)
        .and_then(Value::as_str)
        .filter(|raw| !raw.trim().is_empty())
        .map(PathBuf::from)
}

/// Shrink the selected (or first failing) spec's counterexample.
pub fn shrink_repro(
    project_root: &Path,
    selector: Option<&str>,
    max_seconds: f64,
    max_iterations: usize,
) -> Result<CommandOutcome> {
    let paths = state_paths(project_root);
    ensure_state_dirs(&paths)?;

    let selected = match resolve_latest_report_row(&paths, selector) {
        Ok(selected) => selected,
        Err(err) => {
            return Ok(CommandOutcome::error(EXIT_INTERNAL_ERROR, vec![err.to_string()]));
        }
    };

    let slug = selected
        .get("slug")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or("")
        .to_string();
    let spec_name = selected
        .get("spec")
        .and_then(Value::as_str)
        .unwrap_or(if slug.is_empty() { "unknown" } else { &slug })
        .to_string();
    if slug.is_empty() {
        return Ok(CommandOutcome::error(
            EXIT_INTERNAL_ERROR,
            vec!["Latest report row is missing slug for shrink target".to_string()],
        ));
    }

    let mut missing_fields: Vec<&str> = Vec::new();
    let spec_path = row_path(&selected, "spec_path");
    let baseline_path = row_path(&selected, "baseline");
    let current_path = row_path(&selected, "current");
    let report_json_path = row_path(&selected, "report_json");
    if spec_path.is_none() {
        missing_fields.push("spec_path");
    }
    if baseline_path.is_none() {
        missing_fields.push("baseline");
    }
    if current_path.is_none() {
        missing_fields.push("current");
    }
    if report_json_path.is_none() {
        missing_fields.push("report_json");
    }
    if !missing_fields.is_empty() {
        missing_fields.sort();
        return Ok(CommandOutcome::error(
            EXIT_INTERNAL_ERROR,
            vec![format!(
                "Latest report row for `{}` missing required fields: {}. Re-run `trajectly run` first.",
                spec_name,
                missing_fields.join(", ")
            )],
        ));
    }
    let spec_path = spec_path.unwrap();
    let baseline_path = baseline_path.unwrap();
    let current_path = current_path.unwrap();
    let report_json_path = report_json_path.unwrap();

    let spec = match load_spec(&spec_path) {
        Ok(spec) => spec,
        Err(err) => {
            return Ok(CommandOutcome::error(EXIT_INTERNAL_ERROR, vec![err.to_string()]));
        }
    };

    if !baseline_path.exists() || !current_path.exists() {
        return Ok(CommandOutcome::error(
            EXIT_INTERNAL_ERROR,
            vec![format!(
                "Missing baseline/current traces for shrink target `{}`",
                spec_name
            )],
        ));
    }

    let baseline_events = read_events_jsonl(&baseline_path)?;
    // Prefer the witness-prefix counterexample when one was written.
    let (current_events, mut prefix_path) = match row_path(&selected, "trt_counterexample_prefix") {
        Some(source) if source.exists() => (read_events_jsonl(&source)?, Some(source)),
        _ => (read_events_jsonl(&current_path)?, None),
    };

    let repro_command = selected
        .get("repro_command")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|command| !command.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| build_repro_command(&spec.source_path, &paths.root, None));

    let original = evaluate_trt(
        &baseline_events,
        &current_events,
        &spec,
        Some(&repro_command),
        BTreeMap::new(),
    );
    let original_class = match (original.status, original.report.failure_class) {
        (TrtStatus::Fail, Some(class)) => class,
        _ => {
            return Ok(CommandOutcome::error(
                EXIT_INTERNAL_ERROR,
                vec![format!("Shrink requires a failing TRT trace for `{}`", spec_name)],
            ));
        }
    };

    if prefix_path.is_none() {
        if let Some(witness) = &original.witness {
            prefix_path = Some(write_counterexample_prefix(
                &paths,
                &slug,
                &current_events,
                witness.witness_index,
            )?);
        }
    }

    let shrink_result = match ddmin_shrink(
        &current_events,
        |candidate| {
            let result = evaluate_trt(&baseline_events, candidate, &spec, Some(&repro_command), BTreeMap::new());
            result.status == TrtStatus::Fail && result.report.failure_class == Some(original_class)
        },
        Duration::from_secs_f64(max_seconds.max(0.0)),
        max_iterations,
    ) {
        Ok(result) => result,
        Err(err) => {
            return Ok(CommandOutcome::error(EXIT_INTERNAL_ERROR, vec![err.to_string()]));
        }
    };

    let mut reduced_path: Option<PathBuf> = None;
    if shrink_result.reduced() {
        let path = paths
            .repros
            .join(format!("{}.counterexample.reduced.trace.jsonl", slug));
        write_events_jsonl(&path, &shrink_result.reduced_events)?;
        reduced_path = Some(path);
    }

    let mut counterexample_paths = BTreeMap::new();
    if let Some(prefix) = &prefix_path {
        counterexample_paths.insert("prefix".to_string(), prefix.display().to_string());
    }
    if let Some(reduced) = &reduced_path {
        counterexample_paths.insert("reduced".to_string(), reduced.display().to_string());
    }

    let mut final_result = evaluate_trt(
        &baseline_events,
        &shrink_result.reduced_events,
        &spec,
        Some(&repro_command),
        counterexample_paths,
    );
    let shrink_stats = ShrinkStats {
        original_len: shrink_result.original_len,
        reduced_len: shrink_result.reduced_len,
        iterations: shrink_result.iterations,
        seconds: shrink_result.seconds,
    };
    final_result.report.shrink_stats = Some(shrink_stats);

    augment_report_with_trt(&report_json_path, &final_result)?;

    // Keep the repro artifact in sync with the shrunk counterexample.
    if let Some(repro_artifact_path) = row_path(&selected, "repro_artifact") {
        if repro_artifact_path.exists() {
            let mut payload: Value =
                serde_json::from_str(&std::fs::read_to_string(&repro_artifact_path)?)?;
            if let Some(map) = payload.as_object_mut() {
                if let Some(prefix) = &prefix_path {
                    map.insert(
                        "trt_counterexample_prefix".to_string(),
                        json!(prefix.display().to_string()),
                    );
                }
                if let Some(reduced) = &reduced_path {
                    map.insert(
                        "trt_counterexample_reduced".to_string(),
                        json!(reduced.display().to_string()),
                    );
                }
                map.insert(
                    "trt_failure_class".to_string(),
                    final_result
                        .report
                        .failure_class
                        .map(|class| json!(class.as_str()))
                        .unwrap_or(Value::Null),
                );
                map.insert(
                    "trt_witness_index".to_string(),
                    final_result
                        .report
                        .witness_index
                        .map(|index| json!(index))
                        .unwrap_or(Value::Null),
                );
                map.insert(
                    "trt_shrink_stats".to_string(),
                    serde_json::to_value(shrink_stats)?,
                );
                std::fs::write(&repro_artifact_path, serde_json::to_string_pretty(&payload)?)?;
            }
        }
    }

    let mut row_updates = Map::new();
    row_updates.insert("trt_status".to_string(), json!(final_result.status.as_str()));
    row_updates.insert(
        "trt_failure_class".to_string(),
        final_result
            .report
            .failure_class
            .map(|class| json!(class.as_str()))
            .unwrap_or(Value::Null),
    );
    row_updates.insert(
        "trt_witness_index".to_string(),
        final_result
            .report
            .witness_index
            .map(|index| json!(index))
            .unwrap_or(Value::Null),
    );
    row_updates.insert(
        "trt_primary_violation".to_string(),
        final_result
            .report
            .primary_violation
            .as_ref()
            .map(|violation| serde_json::to_value(violation).unwrap_or(Value::Null))
            .unwrap_or(Value::Null),
    );
    row_updates.insert(
        "trt_shrink_stats".to_string(),
        serde_json::to_value(shrink_stats)?,
    );
    if let Some(prefix) = &prefix_path {
        row_updates.insert(
            "trt_counterexample_prefix".to_string(),
            json!(prefix.display().to_string()),
        );
    }
    if let Some(reduced) = &reduced_path {
        row_updates.insert(
            "trt_counterexample_reduced".to_string(),
            json!(reduced.display().to_string()),
        );
    }

    let (latest_json, latest_md) = match ops::refresh_latest_report_row(&paths, &slug, row_updates) {
        Ok(paths) => paths,
        Err(err) => {
            return Ok(CommandOutcome::error(EXIT_INTERNAL_ERROR, vec![err.to_string()]));
        }
    };

    Ok(CommandOutcome {
        exit_code: EXIT_SUCCESS,
        processed_specs: 1,
        regressions: 0,
        errors: Vec::new(),
        latest_report_json: Some(latest_json),
        latest_report_md: Some(latest_md),
    })
}
