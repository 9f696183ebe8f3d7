//! `run`: replay each spec against its baseline and decide PASS/FAIL.

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::{Map, Value, json};

use trajectly_core::{
    baseline_meta_path, ensure_state_dirs, read_events_jsonl, read_trace_meta, slugify,
    state_paths, write_events_jsonl,
};
use trajectly_engine::{compare_traces, evaluate_contracts, evaluate_trt};
use trajectly_types::{
    CommandOutcome, EVENT_SCHEMA_VERSION, EXIT_INTERNAL_ERROR, EXIT_REGRESSION, EXIT_SUCCESS,
    Finding, NORMALIZER_VERSION, TraceMeta, TrtStatus,
};

use crate::executor::{RunSeeds, execute_spec};
use crate::ops::{
    build_repro_command, merge_trt_findings, seeds_from_meta, write_counterexample_prefix,
    write_repro_artifact,
};
use crate::report::{aggregate_markdown, augment_report_with_trt, write_latest_report, write_reports};
use crate::specs::load_specs;
use crate::trace_build::build_trace;
use crate::Result;

fn fresh_run_id(slug: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", slug, &suffix[..8])
}

/// Load and version-check the baseline metadata. Any failure here is a
/// `NORMALIZER_VERSION_MISMATCH` tooling condition; re-recording is the
/// only remedy.
fn check_baseline_meta(spec_name: &str, baseline_path: &Path) -> std::result::Result<TraceMeta, String> {
    let meta_path = baseline_meta_path(baseline_path);
    if !meta_path.exists() {
        return Err(format!(
            "{}: NORMALIZER_VERSION_MISMATCH: missing baseline meta at {}. Re-run `trajectly \
             record` to regenerate baseline artifacts.",
            spec_name,
            meta_path.display()
        ));
    }
    match read_trace_meta(&meta_path) {
        Ok(meta) => {
            if meta.normalizer_version != NORMALIZER_VERSION {
                return Err(format!(
                    "{}: NORMALIZER_VERSION_MISMATCH: baseline={} runtime={}. Re-record baselines.",
                    spec_name, meta.normalizer_version, NORMALIZER_VERSION
                ));
            }
            Ok(meta)
        }
        Err(err) => Err(format!(
            "{}: NORMALIZER_VERSION_MISMATCH: invalid baseline meta at {}: {}",
            spec_name,
            meta_path.display(),
            err
        )),
    }
}

/// Replay each spec in sandbox mode, evaluate TRT obligations, and write
/// per-spec reports plus the latest-run aggregate.
pub fn run_specs(
    targets: &[String],
    project_root: &Path,
    baseline_dir: Option<&Path>,
    fixtures_dir: Option<&Path>,
    strict_override: Option<bool>,
) -> Result<CommandOutcome> {
    let paths = state_paths(project_root);
    ensure_state_dirs(&paths)?;

    let specs = match load_specs(targets, project_root) {
        Ok(specs) => specs,
        Err(err) => {
            return Ok(CommandOutcome::error(EXIT_INTERNAL_ERROR, vec![err.to_string()]));
        }
    };

    let baseline_root = baseline_dir.unwrap_or(&paths.baselines).to_path_buf();
    let fixtures_root = fixtures_dir.unwrap_or(&paths.fixtures).to_path_buf();

    let mut errors: Vec<String> = Vec::new();
    let mut regressions = 0usize;
    let mut rows: Vec<Value> = Vec::new();

    for spec in &specs {
        let slug = slugify(&spec.name);
        let baseline_path = baseline_root.join(format!("{}.jsonl", slug));
        let fixture_path = fixtures_root.join(format!("{}.json", slug));

        if !baseline_path.exists() {
            errors.push(format!(
                "{}: missing baseline trace at {}. Run `trajectly record` first to capture a baseline.",
                spec.name,
                baseline_path.display()
            ));
            continue;
        }
        let baseline_meta = match check_baseline_meta(&spec.name, &baseline_path) {
            Ok(meta) => meta,
            Err(message) => {
                errors.push(message);
                continue;
            }
        };
        if !fixture_path.exists() {
            errors.push(format!(
                "{}: missing fixtures at {}. Run `trajectly record` first to capture fixtures.",
                spec.name,
                fixture_path.display()
            ));
            continue;
        }

        let strict = strict_override.unwrap_or(spec.strict);
        let run_id = fresh_run_id(&slug);
        let raw_events_path = paths.tmp.join(format!("{}.run.events.jsonl", slug));
        let seeds: RunSeeds = seeds_from_meta(&baseline_meta);

        let result = execute_spec(
            spec,
            "replay",
            &raw_events_path,
            Some(&fixture_path),
            strict,
            seeds,
        )?;
        let current_events = build_trace(spec, &result, &run_id, "replay");
        let current_path = paths.current.join(format!("{}.jsonl", slug));
        write_events_jsonl(&current_path, &current_events)?;

        let baseline_events = read_events_jsonl(&baseline_path)?;
        let mut diff_result = compare_traces(&baseline_events, &current_events, &spec.budget_thresholds);

        if let Some(internal_error) = &result.internal_error {
            diff_result.findings.push(Finding::new(
                "runtime_error",
                format!("Internal runtime error: {}", internal_error),
            ));
        }
        if result.returncode != 0 {
            diff_result.findings.push(
                Finding::new(
                    "runtime_error",
                    format!("Replay command exited non-zero ({})", result.returncode),
                )
                .with_baseline(json!(0))
                .with_current(json!(result.returncode)),
            );
        }

        diff_result
            .findings
            .extend(evaluate_contracts(&current_events, &spec.contracts));

        let repro_command = build_repro_command(&spec.source_path, &paths.root, None);
        let mut trt_result = evaluate_trt(
            &baseline_events,
            &current_events,
            spec,
            Some(&repro_command),
            BTreeMap::new(),
        );

        let mut counterexample_prefix = None;
        if let Some(witness) = &trt_result.witness {
            let prefix = write_counterexample_prefix(
                &paths,
                &slug,
                &current_events,
                witness.witness_index,
            )?;
            trt_result
                .report
                .counterexample_paths
                .insert("prefix".to_string(), prefix.display().to_string());
            counterexample_prefix = Some(prefix);
        }

        if trt_result.status == TrtStatus::Fail {
            merge_trt_findings(&mut diff_result, &trt_result);
        }
        diff_result.refresh_summary();

        let report_json = paths.reports.join(format!("{}.json", slug));
        let report_md = paths.reports.join(format!("{}.md", slug));
        write_reports(&spec.name, &diff_result, &report_json, &report_md)?;
        augment_report_with_trt(&report_json, &trt_result)?;
        let repro_artifact = write_repro_artifact(
            &paths,
            spec,
            &slug,
            &diff_result,
            &baseline_events,
            &current_events,
            &report_json,
            &report_md,
            &trt_result,
            counterexample_prefix.as_deref(),
        )?;

        if diff_result.summary.regression {
            regressions += 1;
        }

        let mut row = Map::new();
        row.insert("spec".to_string(), json!(spec.name));
        row.insert("slug".to_string(), json!(slug));
        row.insert("regression".to_string(), json!(diff_result.summary.regression));
        row.insert("report_json".to_string(), json!(report_json.display().to_string()));
        row.insert("report_md".to_string(), json!(report_md.display().to_string()));
        row.insert("baseline".to_string(), json!(baseline_path.display().to_string()));
        row.insert("current".to_string(), json!(current_path.display().to_string()));
        row.insert(
            "spec_path".to_string(),
            json!(spec.source_path.display().to_string()),
        );
        row.insert(
            "repro_artifact".to_string(),
            json!(repro_artifact.display().to_string()),
        );
        row.insert("repro_command".to_string(), json!(repro_command));
        row.insert("trt_status".to_string(), json!(trt_result.status.as_str()));
        row.insert(
            "trt_failure_class".to_string(),
            trt_result
                .report
                .failure_class
                .map(|class| json!(class.as_str()))
                .unwrap_or(Value::Null),
        );
        row.insert(
            "trt_witness_index".to_string(),
            trt_result
                .report
                .witness_index
                .map(|index| json!(index))
                .unwrap_or(Value::Null),
        );
        row.insert(
            "trt_primary_violation".to_string(),
            trt_result
                .report
                .primary_violation
                .as_ref()
                .map(|violation| serde_json::to_value(violation).unwrap_or(Value::Null))
                .unwrap_or(Value::Null),
        );
        row.insert(
            "trt_counterexample_prefix".to_string(),
            counterexample_prefix
                .as_ref()
                .map(|prefix| json!(prefix.display().to_string()))
                .unwrap_or(Value::Null),
        );
        rows.push(Value::Object(row));
    }

    let aggregate = json!({
        "schema_version": EVENT_SCHEMA_VERSION,
        "trt_mode": true,
        "processed_specs": rows.len(),
        "regressions": regressions,
        "errors": errors.clone(),
        "reports": rows,
    });
    let rows_snapshot = aggregate
        .get("reports")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let markdown = aggregate_markdown(&rows_snapshot, &errors);
    let (latest_json, latest_md) = write_latest_report(&paths, &aggregate, &markdown)?;

    let exit_code = if !errors.is_empty() {
        EXIT_INTERNAL_ERROR
    } else if regressions > 0 {
        EXIT_REGRESSION
    } else {
        EXIT_SUCCESS
    };

    Ok(CommandOutcome {
        exit_code,
        processed_specs: rows_snapshot.len(),
        regressions,
        errors,
        latest_report_json: Some(latest_json),
        latest_report_md: Some(latest_md),
    })
}
