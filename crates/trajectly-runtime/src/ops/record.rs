//! `record`: capture golden baselines and their fixtures.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::json;

use trajectly_core::{FixtureStore, ensure_state_dirs, slugify, state_paths};
use trajectly_types::{
    AgentSpec, CommandOutcome, ENV_CI, EVENT_SCHEMA_VERSION, EXIT_INTERNAL_ERROR, EXIT_SUCCESS,
    TraceMeta,
};

use crate::executor::{RunSeeds, execute_spec};
use crate::specs::load_specs;
use crate::stores::{BaselineStore, LocalBaselineStore};
use crate::trace_build::build_trace;
use crate::Result;

fn fresh_run_id(slug: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", slug, &suffix[..8])
}

/// Seeds captured once per record run. The clock seed is the recording
/// wall-clock; the random seed is derived from the run id so re-recording
/// produces a fresh deterministic stream.
fn fresh_seeds(spec: &AgentSpec, run_id: &str) -> RunSeeds {
    if spec.determinism.is_inactive() {
        return RunSeeds::default();
    }
    let clock_seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or(0.0);
    let random_seed = run_id
        .bytes()
        .fold(0u64, |acc, byte| acc.wrapping_mul(31).wrapping_add(byte as u64));
    RunSeeds {
        clock_seed: Some(clock_seed),
        random_seed: Some(random_seed),
    }
}

/// Record baselines for the given spec targets. Refuses to write when
/// `TRAJECTLY_CI=1` unless the explicit override is passed.
pub fn record_specs(
    targets: &[String],
    project_root: &Path,
    allow_ci_write: bool,
) -> Result<CommandOutcome> {
    let paths = state_paths(project_root);
    ensure_state_dirs(&paths)?;

    let specs = match load_specs(targets, project_root) {
        Ok(specs) => specs,
        Err(err) => {
            return Ok(CommandOutcome::error(EXIT_INTERNAL_ERROR, vec![err.to_string()]));
        }
    };

    if std::env::var(ENV_CI).ok().as_deref() == Some("1") && !allow_ci_write {
        return Ok(CommandOutcome::error(
            EXIT_INTERNAL_ERROR,
            vec![
                "Baseline writes are blocked when TRAJECTLY_CI=1. Re-run `trajectly record ... \
                 --allow-ci-write` only for explicit baseline updates."
                    .to_string(),
            ],
        ));
    }

    let store = LocalBaselineStore::new(&paths.baselines, &paths.fixtures);
    let mut errors: Vec<String> = Vec::new();
    for spec in &specs {
        let slug = slugify(&spec.name);
        let run_id = fresh_run_id(&slug);
        let raw_events_path = paths.tmp.join(format!("{}.record.events.jsonl", slug));
        let seeds = fresh_seeds(spec, &run_id);

        let result = execute_spec(spec, "record", &raw_events_path, None, spec.strict, seeds)?;
        let events = build_trace(spec, &result, &run_id, "record");

        let mut meta = TraceMeta {
            spec_name: Some(spec.name.clone()),
            run_id: Some(run_id.clone()),
            mode: Some("record".to_string()),
            ..TraceMeta::default()
        };
        meta.metadata.insert(
            "legacy_event_schema_version".to_string(),
            json!(EVENT_SCHEMA_VERSION),
        );
        meta.metadata
            .insert("spec_schema_version".to_string(), json!(spec.schema_version));
        if let Some(clock_seed) = seeds.clock_seed {
            meta.metadata.insert("clock_seed".to_string(), json!(clock_seed));
        }
        if let Some(random_seed) = seeds.random_seed {
            meta.metadata.insert("random_seed".to_string(), json!(random_seed));
        }

        let fixtures = FixtureStore::from_events(&events);
        store.write(&slug, &events, Some(&fixtures), &meta)?;

        if let Some(internal_error) = &result.internal_error {
            errors.push(format!("{}: internal error: {}", spec.name, internal_error));
        } else if result.returncode != 0 {
            errors.push(format!(
                "{}: command failed during record with exit code {}",
                spec.name, result.returncode
            ));
        }
    }

    let exit_code = if errors.is_empty() {
        EXIT_SUCCESS
    } else {
        EXIT_INTERNAL_ERROR
    };
    Ok(CommandOutcome {
        exit_code,
        processed_specs: specs.len(),
        regressions: 0,
        errors,
        latest_report_json: None,
        latest_report_md: None,
    })
}
