//! Runtime executor: spawn the agent command in a fresh process with a
//! pinned environment, block on its exit, and read back the event stream
//! it appended.

use std::path::Path;
use std::process::Command;
use std::time::Instant;

use serde_json::Value;

use trajectly_core::{default_trace_meta_path, default_trace_path, dumps};
use trajectly_types::{
    AgentSpec, ENV_CLOCK_SEED, ENV_CONTRACTS_JSON, ENV_DETERMINISM_JSON, ENV_EVENTS_FILE,
    ENV_FIXTURE_POLICY, ENV_FIXTURES_FILE, ENV_MODE, ENV_NETWORK_ALLOWLIST, ENV_PROJECT_ROOT,
    ENV_RANDOM_SEED, ENV_REPLAY_GUARD, ENV_SPEC_NAME, ENV_STRICT, ENV_TRACE_FILE,
    ENV_TRACE_META_FILE,
};

use crate::Result;

/// Outcome of one agent execution. A launch failure is surfaced as
/// `internal_error`, never as a panic; the engine stays alive.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub returncode: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: i64,
    pub raw_events: Vec<Value>,
    pub internal_error: Option<String>,
}

fn load_raw_events(events_path: &Path) -> Vec<Value> {
    let content = match std::fs::read_to_string(events_path) {
        Ok(content) => content,
        Err(_) => return Vec::new(),
    };
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
        .filter(|value| value.is_object())
        .collect()
}

/// Deterministic replay/record seeds handed to the agent-side sandbox.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunSeeds {
    pub clock_seed: Option<f64>,
    pub random_seed: Option<u64>,
}

/// Spawn the spec's command and collect its events.
pub fn execute_spec(
    spec: &AgentSpec,
    mode: &str,
    events_path: &Path,
    fixtures_path: Option<&Path>,
    strict: bool,
    seeds: RunSeeds,
) -> Result<ExecutionResult> {
    if let Some(parent) = events_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let trace_path = default_trace_path(events_path);
    let trace_meta_path = default_trace_meta_path(&trace_path);
    for stale in [events_path, trace_path.as_path(), trace_meta_path.as_path()] {
        if stale.exists() {
            std::fs::remove_file(stale)?;
        }
    }

    let workdir = spec.resolved_workdir();
    let mut command = Command::new("sh");
    command.arg("-c").arg(&spec.command);
    command.current_dir(&workdir);
    for (key, value) in &spec.env {
        command.env(key, value);
    }

    // Locale/hash/timezone pinning keeps agent-side formatting stable
    // across machines.
    command.env("PYTHONHASHSEED", "0");
    command.env("LC_ALL", "C.UTF-8");
    command.env("LANG", "C.UTF-8");
    command.env("TZ", "UTC");

    command.env(ENV_MODE, mode);
    command.env(ENV_EVENTS_FILE, events_path);
    command.env(ENV_TRACE_FILE, &trace_path);
    command.env(ENV_TRACE_META_FILE, &trace_meta_path);
    command.env(ENV_SPEC_NAME, &spec.name);
    command.env(ENV_FIXTURE_POLICY, spec.fixture_policy.as_str());
    command.env(ENV_STRICT, if strict { "1" } else { "0" });
    command.env(
        ENV_CONTRACTS_JSON,
        dumps(&serde_json::to_value(&spec.contracts)?),
    );
    command.env(ENV_PROJECT_ROOT, &workdir);

    if let Some(fixtures_path) = fixtures_path {
        command.env(ENV_FIXTURES_FILE, fixtures_path);
    }
    if !spec.contracts.network.allowlist.is_empty() {
        command.env(ENV_NETWORK_ALLOWLIST, spec.contracts.network.allowlist.join(","));
    }
    if !spec.determinism.is_inactive() {
        command.env(
            ENV_DETERMINISM_JSON,
            dumps(&serde_json::to_value(&spec.determinism)?),
        );
    }
    if let Some(clock_seed) = seeds.clock_seed {
        command.env(ENV_CLOCK_SEED, clock_seed.to_string());
    }
    if let Some(random_seed) = seeds.random_seed {
        command.env(ENV_RANDOM_SEED, random_seed.to_string());
    }
    if mode == "replay" {
        command.env(ENV_REPLAY_GUARD, "1");
    }

    let started = Instant::now();
    let output = match command.output() {
        Ok(output) => output,
        Err(err) => {
            let duration_ms = started.elapsed().as_millis() as i64;
            return Ok(ExecutionResult {
                returncode: 1,
                stdout: String::new(),
                stderr: String::new(),
                duration_ms,
                raw_events: load_raw_events(events_path),
                internal_error: Some(err.to_string()),
            });
        }
    };
    let duration_ms = started.elapsed().as_millis() as i64;

    Ok(ExecutionResult {
        returncode: output.status.code().unwrap_or(1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        duration_ms,
        raw_events: load_raw_events(events_path),
        internal_error: None,
    })
}
