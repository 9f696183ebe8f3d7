//! Agent-side runtime context.
//!
//! Emits the event stream (append-only, one JSON line per event, behind a
//! lock whose scope is exactly one append), replays recorded fixtures for
//! tool and LLM invocations, and applies the in-process contract
//! quick-checks parsed from `TRAJECTLY_CONTRACTS_JSON`.

use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Instant;

use serde_json::{Map, Value, json};

use trajectly_core::{FixtureError, FixtureKind, FixtureMatcher, FixtureStore, dumps};
use trajectly_types::{
    ENV_CONTRACTS_JSON, ENV_EVENTS_FILE, ENV_FIXTURE_POLICY, ENV_FIXTURES_FILE, ENV_MODE,
    ENV_STRICT, FixturePolicy,
};

use crate::error::{Error, Result};

const WRITE_TOOL_HINTS: &[&str] = &[
    "write", "delete", "remove", "rm", "update", "patch", "save", "create", "insert", "upsert",
];

fn looks_like_write_tool(tool_name: &str) -> bool {
    let normalized = tool_name.trim().to_lowercase();
    WRITE_TOOL_HINTS.iter().any(|hint| normalized.contains(hint))
}

/// In-process subset of the contract block, for fast rejection before the
/// engine-side evaluation ever runs.
#[derive(Debug, Clone, Default)]
struct RuntimeContracts {
    tools_allow: BTreeSet<String>,
    tools_deny: BTreeSet<String>,
    max_calls_total: Option<usize>,
    deny_write_tools: bool,
}

impl RuntimeContracts {
    fn parse(raw: Option<&str>) -> RuntimeContracts {
        let value: Value = match raw.and_then(|raw| serde_json::from_str(raw).ok()) {
            Some(value) => value,
            None => return RuntimeContracts::default(),
        };
        let string_set = |value: Option<&Value>| -> BTreeSet<String> {
            value
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default()
        };
        let tools = value.get("tools");
        let side_effects = value.get("side_effects");
        RuntimeContracts {
            tools_allow: string_set(tools.and_then(|tools| tools.get("allow"))),
            tools_deny: string_set(tools.and_then(|tools| tools.get("deny"))),
            max_calls_total: tools
                .and_then(|tools| tools.get("max_calls_total"))
                .and_then(Value::as_u64)
                .map(|limit| limit as usize),
            deny_write_tools: side_effects
                .and_then(|block| block.get("deny_write_tools"))
                .and_then(Value::as_bool)
                .unwrap_or(false),
        }
    }
}

/// Settings resolved from the `TRAJECTLY_*` environment.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub mode: String,
    pub events_path: Option<PathBuf>,
    pub fixtures_path: Option<PathBuf>,
    pub fixture_policy: FixturePolicy,
    pub strict: bool,
    contracts_json: Option<String>,
}

impl RuntimeSettings {
    pub fn from_env() -> RuntimeSettings {
        RuntimeSettings {
            mode: std::env::var(ENV_MODE)
                .unwrap_or_else(|_| "record".to_string())
                .trim()
                .to_lowercase(),
            events_path: std::env::var(ENV_EVENTS_FILE).ok().map(PathBuf::from),
            fixtures_path: std::env::var(ENV_FIXTURES_FILE).ok().map(PathBuf::from),
            fixture_policy: std::env::var(ENV_FIXTURE_POLICY)
                .ok()
                .as_deref()
                .and_then(FixturePolicy::parse)
                .unwrap_or(FixturePolicy::ByIndex),
            strict: std::env::var(ENV_STRICT).ok().as_deref() == Some("1"),
            contracts_json: std::env::var(ENV_CONTRACTS_JSON).ok(),
        }
    }
}

struct ContextState {
    matcher: Option<FixtureMatcher>,
    tool_calls_total: usize,
}

pub struct SdkContext {
    settings: RuntimeSettings,
    contracts: RuntimeContracts,
    started: Instant,
    emit_lock: Mutex<()>,
    state: Mutex<ContextState>,
}

impl SdkContext {
    pub fn new(settings: RuntimeSettings) -> Result<SdkContext> {
        let contracts = RuntimeContracts::parse(settings.contracts_json.as_deref());
        let matcher = if settings.mode == "replay" {
            match &settings.fixtures_path {
                Some(path) if path.exists() => {
                    let store = FixtureStore::load(path)?;
                    Some(FixtureMatcher::new(
                        store,
                        settings.fixture_policy,
                        settings.strict,
                    ))
                }
                _ => None,
            }
        } else {
            None
        };
        Ok(SdkContext {
            settings,
            contracts,
            started: Instant::now(),
            emit_lock: Mutex::new(()),
            state: Mutex::new(ContextState {
                matcher,
                tool_calls_total: 0,
            }),
        })
    }

    pub fn from_env() -> Result<SdkContext> {
        SdkContext::new(RuntimeSettings::from_env())
    }

    pub fn mode(&self) -> &str {
        &self.settings.mode
    }

    /// Emit an `agent_step` marker event.
    pub fn agent_step(&self, name: &str, details: Value) -> Result<()> {
        self.emit(
            "agent_step",
            json_map(json!({"name": name, "details": details})),
            Map::new(),
        )
    }

    /// Run one tool invocation: emit the call, consult fixtures in replay
    /// mode, run the real callable otherwise, and emit the return.
    pub fn invoke_tool<F>(&self, name: &str, args: Vec<Value>, kwargs: Map<String, Value>, real: F) -> Result<Value>
    where
        F: FnOnce(&[Value], &Map<String, Value>) -> std::result::Result<Value, String>,
    {
        let mut input = Map::new();
        input.insert("args".to_string(), Value::Array(args.clone()));
        input.insert("kwargs".to_string(), Value::Object(kwargs.clone()));
        self.emit(
            "tool_called",
            json_map(json!({"tool_name": name, "input": Value::Object(input.clone())})),
            Map::new(),
        )?;

        if let Some(rejection) = self.check_tool_contracts(name) {
            self.emit(
                "tool_returned",
                json_map(json!({"tool_name": name, "output": null, "error": rejection})),
                Map::new(),
            )?;
            return Err(Error::ContractRejected(rejection));
        }

        if self.settings.mode == "replay" {
            match self.lookup_fixture(FixtureKind::Tool, name, &input) {
                Err(fixture_error) => {
                    self.emit(
                        "tool_returned",
                        json_map(json!({
                            "tool_name": name,
                            "output": null,
                            "error": fixture_error.to_string(),
                            "error_code": fixture_error.to_payload().get("code").cloned().unwrap_or(Value::Null),
                            "error_details": Value::Object(fixture_error.to_payload()),
                        })),
                        Map::new(),
                    )?;
                    return Err(Error::Fixture(fixture_error));
                }
                Ok(Some(entry)) => {
                    let output = entry.output_payload.get("output").cloned().unwrap_or(Value::Null);
                    let error = entry.output_payload.get("error").cloned().unwrap_or(Value::Null);
                    self.emit(
                        "tool_returned",
                        json_map(json!({"tool_name": name, "output": output.clone(), "error": error.clone()})),
                        json_map(json!({"replayed": true})),
                    )?;
                    if let Value::String(message) = error {
                        return Err(Error::CallFailed(message));
                    }
                    return Ok(output);
                }
                Ok(None) => {
                    if self.settings.strict {
                        let message = format!("Missing fixture for tool call: {}", name);
                        self.emit(
                            "tool_returned",
                            json_map(json!({"tool_name": name, "output": null, "error": message})),
                            Map::new(),
                        )?;
                        return Err(Error::CallFailed(message));
                    }
                }
            }
        }

        match real(&args, &kwargs) {
            Ok(output) => {
                self.emit(
                    "tool_returned",
                    json_map(json!({"tool_name": name, "output": output.clone(), "error": null})),
                    Map::new(),
                )?;
                Ok(output)
            }
            Err(message) => {
                self.emit(
                    "tool_returned",
                    json_map(json!({"tool_name": name, "output": null, "error": message})),
                    Map::new(),
                )?;
                Err(Error::CallFailed(message))
            }
        }
    }

    /// Run one LLM invocation with the same record/replay protocol as
    /// `invoke_tool`, keyed by `provider:model`.
    pub fn invoke_llm<F>(&self, provider: &str, model: &str, request: Map<String, Value>, real: F) -> Result<Value>
    where
        F: FnOnce(&Map<String, Value>) -> std::result::Result<Value, String>,
    {
        let name = format!("{}:{}", provider, model);
        self.emit(
            "llm_called",
            json_map(json!({
                "provider": provider,
                "model": model,
                "request": Value::Object(request.clone()),
            })),
            Map::new(),
        )?;

        if self.settings.mode == "replay" {
            match self.lookup_fixture(FixtureKind::Llm, &name, &request) {
                Err(fixture_error) => {
                    self.emit(
                        "llm_returned",
                        json_map(json!({
                            "provider": provider,
                            "model": model,
                            "response": null,
                            "usage": {},
                            "error": fixture_error.to_string(),
                            "error_code": fixture_error.to_payload().get("code").cloned().unwrap_or(Value::Null),
                            "error_details": Value::Object(fixture_error.to_payload()),
                        })),
                        Map::new(),
                    )?;
                    return Err(Error::Fixture(fixture_error));
                }
                Ok(Some(entry)) => {
                    let response = entry.output_payload.get("response").cloned().unwrap_or(Value::Null);
                    let usage = entry.output_payload.get("usage").cloned().unwrap_or_else(|| json!({}));
                    let error = entry.output_payload.get("error").cloned().unwrap_or(Value::Null);
                    let result = match entry.output_payload.get("result") {
                        Some(Value::Null) | None => json!({"response": response, "usage": usage}),
                        Some(result) => result.clone(),
                    };
                    self.emit(
                        "llm_returned",
                        json_map(json!({
                            "provider": provider,
                            "model": model,
                            "response": response,
                            "usage": usage,
                            "result": result.clone(),
                            "error": error.clone(),
                        })),
                        json_map(json!({"replayed": true})),
                    )?;
                    if let Value::String(message) = error {
                        return Err(Error::CallFailed(message));
                    }
                    return Ok(result);
                }
                Ok(None) => {
                    if self.settings.strict {
                        let message = format!("Missing fixture for llm call: {}", name);
                        self.emit(
                            "llm_returned",
                            json_map(json!({
                                "provider": provider,
                                "model": model,
                                "response": null,
                                "usage": {},
                                "error": message,
                            })),
                            Map::new(),
                        )?;
                        return Err(Error::CallFailed(message));
                    }
                }
            }
        }

        match real(&request) {
            Ok(result) => {
                let (response, usage) = normalize_llm_result(&result);
                self.emit(
                    "llm_returned",
                    json_map(json!({
                        "provider": provider,
                        "model": model,
                        "response": response,
                        "usage": usage,
                        "result": result.clone(),
                        "error": null,
                    })),
                    Map::new(),
                )?;
                Ok(result)
            }
            Err(message) => {
                self.emit(
                    "llm_returned",
                    json_map(json!({
                        "provider": provider,
                        "model": model,
                        "response": null,
                        "usage": {},
                        "error": message,
                    })),
                    Map::new(),
                )?;
                Err(Error::CallFailed(message))
            }
        }
    }

    fn lookup_fixture(
        &self,
        kind: FixtureKind,
        name: &str,
        input: &Map<String, Value>,
    ) -> std::result::Result<Option<trajectly_core::FixtureEntry>, FixtureError> {
        let mut state = self.state.lock().expect("sdk state poisoned");
        match state.matcher.as_mut() {
            Some(matcher) => matcher.lookup(kind, name, input),
            None => Ok(None),
        }
    }

    fn check_tool_contracts(&self, tool_name: &str) -> Option<String> {
        let total = {
            let mut state = self.state.lock().expect("sdk state poisoned");
            state.tool_calls_total += 1;
            state.tool_calls_total
        };

        if let Some(limit) = self.contracts.max_calls_total {
            if total > limit {
                return Some(format!(
                    "CONTRACT_MAX_CALLS_TOTAL_EXCEEDED: limit={}, actual={}",
                    limit, total
                ));
            }
        }
        if self.contracts.tools_deny.contains(tool_name) {
            return Some(format!("CONTRACT_TOOL_DENIED: {}", tool_name));
        }
        if !self.contracts.tools_allow.is_empty() && !self.contracts.tools_allow.contains(tool_name)
        {
            return Some(format!("CONTRACT_TOOL_NOT_ALLOWED: {}", tool_name));
        }
        if self.contracts.deny_write_tools && looks_like_write_tool(tool_name) {
            return Some(format!("CONTRACT_WRITE_TOOL_DENIED: {}", tool_name));
        }
        None
    }

    /// Append one raw event line. The lock scope is exactly this append;
    /// no blocking work happens while it is held.
    fn emit(&self, event_type: &str, payload: Map<String, Value>, meta: Map<String, Value>) -> Result<()> {
        let path = match &self.settings.events_path {
            Some(path) => path,
            None => return Ok(()),
        };
        let record = json!({
            "event_type": event_type,
            "rel_ms": self.started.elapsed().as_millis() as i64,
            "payload": Value::Object(payload),
            "meta": Value::Object(meta),
        });
        let line = dumps(&record);

        let _guard = self.emit_lock.lock().expect("sdk emit lock poisoned");
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        Ok(())
    }
}

fn json_map(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

/// Split an LLM callable result into (response, usage) for the event
/// payload: mapping results contribute their own `response`/`usage` keys.
fn normalize_llm_result(result: &Value) -> (Value, Value) {
    match result {
        Value::Object(map) => {
            let usage = match map.get("usage") {
                Some(Value::Object(usage)) => Value::Object(usage.clone()),
                _ => json!({}),
            };
            let response = map.get("response").cloned().unwrap_or_else(|| result.clone());
            (response, usage)
        }
        other => (other.clone(), json!({})),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn settings(dir: &TempDir, mode: &str, strict: bool) -> RuntimeSettings {
        RuntimeSettings {
            mode: mode.to_string(),
            events_path: Some(dir.path().join("events.jsonl")),
            fixtures_path: Some(dir.path().join("fixtures.json")),
            fixture_policy: FixturePolicy::ByHash,
            strict,
            contracts_json: None,
        }
    }

    fn raw_lines(dir: &TempDir) -> Vec<Value> {
        let content = std::fs::read_to_string(dir.path().join("events.jsonl")).unwrap();
        content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    /// Promote the raw recorded lines into trace events, save fixtures from
    /// them, and clear the events file for the replay half of a test.
    fn fixtures_from_recording(dir: &TempDir) {
        let trace: Vec<trajectly_types::TraceEvent> = raw_lines(dir)
            .iter()
            .enumerate()
            .map(|(index, raw)| {
                let mut value = raw.clone();
                value["schema_version"] = json!("v1");
                value["seq"] = json!(index + 1);
                value["run_id"] = json!("run-1");
                trajectly_types::TraceEvent::from_value(&value).unwrap()
            })
            .collect();
        FixtureStore::from_events(&trace)
            .save(&dir.path().join("fixtures.json"))
            .unwrap();
        std::fs::remove_file(dir.path().join("events.jsonl")).unwrap();
    }

    #[test]
    fn test_record_mode_emits_call_and_return() {
        let dir = TempDir::new().unwrap();
        let context = SdkContext::new(settings(&dir, "record", false)).unwrap();
        let output = context
            .invoke_tool(
                "add",
                vec![json!(1), json!(2)],
                Map::new(),
                |args, _| Ok(json!(args[0].as_i64().unwrap() + args[1].as_i64().unwrap())),
            )
            .unwrap();
        assert_eq!(output, json!(3));

        let lines = raw_lines(&dir);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event_type"], "tool_called");
        assert_eq!(lines[1]["event_type"], "tool_returned");
        assert_eq!(lines[1]["payload"]["output"], json!(3));
    }

    #[test]
    fn test_replay_serves_fixture_without_real_call() {
        let dir = TempDir::new().unwrap();

        // Record a run first to produce fixtures.
        {
            let context = SdkContext::new(settings(&dir, "record", false)).unwrap();
            context
                .invoke_tool("add", vec![json!(1), json!(2)], Map::new(), |_, _| Ok(json!(3)))
                .unwrap();
        }
        fixtures_from_recording(&dir);

        let context = SdkContext::new(settings(&dir, "replay", true)).unwrap();
        let output = context
            .invoke_tool("add", vec![json!(1), json!(2)], Map::new(), |_, _| {
                Err("real callable must not run during replay".to_string())
            })
            .unwrap();
        assert_eq!(output, json!(3));

        let lines = raw_lines(&dir);
        assert_eq!(lines[1]["meta"]["replayed"], json!(true));
    }

    #[test]
    fn test_replay_exhaustion_emits_error_code() {
        let dir = TempDir::new().unwrap();
        {
            let context = SdkContext::new(settings(&dir, "record", false)).unwrap();
            context
                .invoke_tool("add", vec![json!(1)], Map::new(), |_, _| Ok(json!(1)))
                .unwrap();
        }
        fixtures_from_recording(&dir);

        let context = SdkContext::new(settings(&dir, "replay", true)).unwrap();
        context
            .invoke_tool("add", vec![json!(1)], Map::new(), |_, _| Ok(json!(1)))
            .unwrap();
        let err = context
            .invoke_tool("add", vec![json!(1)], Map::new(), |_, _| Ok(json!(1)))
            .unwrap_err();
        assert!(matches!(err, Error::Fixture(FixtureError::Exhausted { .. })));

        let lines = raw_lines(&dir);
        let last = lines.last().unwrap();
        assert_eq!(last["event_type"], "tool_returned");
        assert_eq!(last["payload"]["error_code"], json!("FIXTURE_EXHAUSTED"));
        assert_eq!(
            last["payload"]["error_details"]["tool_name"],
            json!("add")
        );
    }

    #[test]
    fn test_strict_miss_fails_call() {
        let dir = TempDir::new().unwrap();
        FixtureStore::default()
            .save(&dir.path().join("fixtures.json"))
            .unwrap();
        let context = SdkContext::new(settings(&dir, "replay", true)).unwrap();
        let err = context
            .invoke_tool("mystery", vec![], Map::new(), |_, _| Ok(json!(1)))
            .unwrap_err();
        assert!(err.to_string().contains("Missing fixture for tool call"));
    }

    #[test]
    fn test_permissive_miss_runs_real_callable() {
        let dir = TempDir::new().unwrap();
        FixtureStore::default()
            .save(&dir.path().join("fixtures.json"))
            .unwrap();
        let context = SdkContext::new(settings(&dir, "replay", false)).unwrap();
        let output = context
            .invoke_tool("mystery", vec![], Map::new(), |_, _| Ok(json!("live")))
            .unwrap();
        assert_eq!(output, json!("live"));
    }

    #[test]
    fn test_contract_quick_checks() {
        let dir = TempDir::new().unwrap();
        let mut settings = settings(&dir, "record", false);
        settings.contracts_json = Some(
            json!({
                "tools": {"deny": ["drop_table"], "max_calls_total": 1},
                "side_effects": {"deny_write_tools": true},
            })
            .to_string(),
        );
        let context = SdkContext::new(settings).unwrap();

        let err = context
            .invoke_tool("drop_table", vec![], Map::new(), |_, _| Ok(json!(1)))
            .unwrap_err();
        assert!(err.to_string().contains("CONTRACT_TOOL_DENIED"));

        let err = context
            .invoke_tool("read_row", vec![], Map::new(), |_, _| Ok(json!(1)))
            .unwrap_err();
        assert!(err.to_string().contains("CONTRACT_MAX_CALLS_TOTAL_EXCEEDED"));
    }

    #[test]
    fn test_llm_record_and_replay() {
        let dir = TempDir::new().unwrap();
        {
            let context = SdkContext::new(settings(&dir, "record", false)).unwrap();
            let result = context
                .invoke_llm("openai", "gpt-mock", json_map(json!({"prompt": "hi"})), |_| {
                    Ok(json!({"response": "hello", "usage": {"total_tokens": 4}}))
                })
                .unwrap();
            assert_eq!(result["response"], json!("hello"));
        }
        fixtures_from_recording(&dir);

        let context = SdkContext::new(settings(&dir, "replay", true)).unwrap();
        let result = context
            .invoke_llm("openai", "gpt-mock", json_map(json!({"prompt": "hi"})), |_| {
                Err("must not call provider in replay".to_string())
            })
            .unwrap();
        assert_eq!(result["response"], json!("hello"));
        assert_eq!(result["usage"]["total_tokens"], json!(4));
    }
}
