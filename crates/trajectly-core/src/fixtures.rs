//! Fixture store and replay matcher.
//!
//! A fixture captures one recorded tool or LLM call: canonical input, its
//! content hash, and the recorded output. At replay time the matcher serves
//! entries either positionally (`by_index`) or by input hash (`by_hash`);
//! running out of entries for a signature is the `FIXTURE_EXHAUSTED`
//! condition the engine lifts into a contract violation.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use trajectly_types::{EventType, FixturePolicy, TraceEvent};

use crate::canonical::sha256_of_data;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FixtureKind {
    Tool,
    Llm,
}

impl FixtureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FixtureKind::Tool => "tool",
            FixtureKind::Llm => "llm",
        }
    }

    /// Payload key naming the call site in diagnostics.
    fn context_key(&self) -> &'static str {
        match self {
            FixtureKind::Tool => "tool_name",
            FixtureKind::Llm => "llm_signature",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureEntry {
    pub kind: FixtureKind,
    pub name: String,
    pub input_payload: Map<String, Value>,
    pub input_hash: String,
    pub output_payload: Map<String, Value>,
    pub error: Option<String>,
}

/// Replay lookup failures.
#[derive(Debug, Clone)]
pub enum FixtureError {
    /// All recorded entries for a signature were already consumed.
    Exhausted {
        kind: FixtureKind,
        name: String,
        expected_signature: String,
        consumed_count: usize,
        available_count: usize,
    },
    /// Strict by-index replay found an entry whose input hash disagrees.
    Mismatch(String),
}

impl FixtureError {
    /// Structured payload attached to the synthetic error event.
    pub fn to_payload(&self) -> Map<String, Value> {
        match self {
            FixtureError::Exhausted {
                kind,
                name,
                expected_signature,
                consumed_count,
                available_count,
            } => {
                let mut payload = Map::new();
                payload.insert("code".to_string(), json!("FIXTURE_EXHAUSTED"));
                payload.insert("failure_class".to_string(), json!("CONTRACT"));
                payload.insert("expected_signature".to_string(), json!(expected_signature));
                payload.insert("consumed_count".to_string(), json!(consumed_count));
                payload.insert("available_count".to_string(), json!(available_count));
                payload.insert(kind.context_key().to_string(), json!(name));
                payload
            }
            FixtureError::Mismatch(message) => {
                let mut payload = Map::new();
                payload.insert("code".to_string(), json!("FIXTURE_LOOKUP_MISMATCH"));
                payload.insert("message".to_string(), json!(message));
                payload
            }
        }
    }
}

impl fmt::Display for FixtureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FixtureError::Exhausted {
                kind,
                name,
                expected_signature,
                consumed_count,
                available_count,
            } => write!(
                f,
                "FIXTURE_EXHAUSTED: {}={} expected_signature={} consumed_count={} available_count={}",
                kind.context_key(),
                name,
                expected_signature,
                consumed_count,
                available_count
            ),
            FixtureError::Mismatch(message) => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for FixtureError {}

/// Ordered list of recorded call fixtures for one baseline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureStore {
    pub entries: Vec<FixtureEntry>,
}

impl FixtureStore {
    /// Scan an event list, pairing each call with its matching return, and
    /// capture canonical-hashed inputs plus recorded outputs.
    pub fn from_events(events: &[TraceEvent]) -> FixtureStore {
        let mut pending_tool: VecDeque<(String, Map<String, Value>, String)> = VecDeque::new();
        let mut pending_llm: VecDeque<(String, Map<String, Value>, String)> = VecDeque::new();
        let mut entries = Vec::new();

        for event in events {
            let payload = &event.payload;
            match event.event_type {
                EventType::ToolCalled => {
                    let tool_name = string_or(payload.get("tool_name"), "unknown");
                    let input = object_or_empty(payload.get("input"));
                    let hash = sha256_of_data(&Value::Object(input.clone()));
                    pending_tool.push_back((tool_name, input, hash));
                }
                EventType::ToolReturned => {
                    if let Some((name, input, hash)) =
                        take_pending(&mut pending_tool, payload.get("tool_name"))
                    {
                        let mut output = Map::new();
                        output.insert(
                            "output".to_string(),
                            payload.get("output").cloned().unwrap_or(Value::Null),
                        );
                        output.insert(
                            "error".to_string(),
                            payload.get("error").cloned().unwrap_or(Value::Null),
                        );
                        entries.push(FixtureEntry {
                            kind: FixtureKind::Tool,
                            name,
                            input_payload: input,
                            input_hash: hash,
                            output_payload: output,
                            error: payload.get("error").and_then(Value::as_str).map(String::from),
                        });
                    }
                }
                EventType::LlmCalled => {
                    let provider = string_or(payload.get("provider"), "unknown");
                    let model = string_or(payload.get("model"), "unknown");
                    let name = format!("{}:{}", provider, model);
                    let request = object_or_empty(payload.get("request"));
                    let hash = sha256_of_data(&Value::Object(request.clone()));
                    pending_llm.push_back((name, request, hash));
                }
                EventType::LlmReturned => {
                    let provider = string_or(payload.get("provider"), "unknown");
                    let model = string_or(payload.get("model"), "unknown");
                    let signature = format!("{}:{}", provider, model);
                    if let Some((name, input, hash)) = take_pending(
                        &mut pending_llm,
                        Some(&Value::String(signature)).filter(|_| payload.contains_key("provider")),
                    ) {
                        let mut output = Map::new();
                        output.insert(
                            "response".to_string(),
                            payload.get("response").cloned().unwrap_or(Value::Null),
                        );
                        output.insert(
                            "usage".to_string(),
                            payload.get("usage").cloned().unwrap_or_else(|| json!({})),
                        );
                        output.insert(
                            "result".to_string(),
                            payload.get("result").cloned().unwrap_or(Value::Null),
                        );
                        output.insert(
                            "error".to_string(),
                            payload.get("error").cloned().unwrap_or(Value::Null),
                        );
                        entries.push(FixtureEntry {
                            kind: FixtureKind::Llm,
                            name,
                            input_payload: input,
                            input_hash: hash,
                            output_payload: output,
                            error: payload.get("error").and_then(Value::as_str).map(String::from),
                        });
                    }
                }
                _ => {}
            }
        }

        FixtureStore { entries }
    }

    /// Pretty-printed with sorted keys, matching the on-disk format.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let value = serde_json::to_value(self)?;
        fs::write(path, serde_json::to_string_pretty(&value)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<FixtureStore> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

fn string_or(value: Option<&Value>, fallback: &str) -> String {
    value
        .and_then(Value::as_str)
        .unwrap_or(fallback)
        .to_string()
}

fn object_or_empty(value: Option<&Value>) -> Map<String, Value> {
    value.and_then(Value::as_object).cloned().unwrap_or_default()
}

/// Pop the matching pending call: the earliest entry with the returned
/// name when one is present, otherwise the front of the queue.
fn take_pending(
    pending: &mut VecDeque<(String, Map<String, Value>, String)>,
    name_hint: Option<&Value>,
) -> Option<(String, Map<String, Value>, String)> {
    if pending.is_empty() {
        return None;
    }
    let position = name_hint
        .and_then(Value::as_str)
        .and_then(|name| pending.iter().position(|(pending_name, _, _)| pending_name == name))
        .unwrap_or(0);
    pending.remove(position)
}

type SlotKey = (FixtureKind, String);

/// Stateful replay matcher. The consumption cursor and used-slot set are
/// mutated only behind the caller's lock, one lookup at a time.
pub struct FixtureMatcher {
    policy: FixturePolicy,
    strict: bool,
    entries: BTreeMap<SlotKey, Vec<FixtureEntry>>,
    cursors: BTreeMap<SlotKey, usize>,
    used_hash_slots: BTreeSet<(SlotKey, usize)>,
}

impl FixtureMatcher {
    pub fn new(store: FixtureStore, policy: FixturePolicy, strict: bool) -> FixtureMatcher {
        let mut entries: BTreeMap<SlotKey, Vec<FixtureEntry>> = BTreeMap::new();
        for entry in store.entries {
            entries
                .entry((entry.kind, entry.name.clone()))
                .or_default()
                .push(entry);
        }
        FixtureMatcher {
            policy,
            strict,
            entries,
            cursors: BTreeMap::new(),
            used_hash_slots: BTreeSet::new(),
        }
    }

    /// Look up the fixture for one call. `Ok(None)` is a miss the caller
    /// resolves by policy (strict fails the call, permissive executes the
    /// real callable).
    pub fn lookup(
        &mut self,
        kind: FixtureKind,
        name: &str,
        input_payload: &Map<String, Value>,
    ) -> std::result::Result<Option<FixtureEntry>, FixtureError> {
        let key: SlotKey = (kind, name.to_string());
        let request_hash = sha256_of_data(&Value::Object(input_payload.clone()));
        let entries = match self.entries.get(&key) {
            Some(entries) => entries,
            None => return Ok(None),
        };

        match self.policy {
            FixturePolicy::ByIndex => {
                let cursor = self.cursors.entry(key.clone()).or_insert(0);
                if *cursor >= entries.len() {
                    if !entries.is_empty() {
                        return Err(FixtureError::Exhausted {
                            kind,
                            name: name.to_string(),
                            expected_signature: request_hash,
                            consumed_count: *cursor,
                            available_count: entries.len(),
                        });
                    }
                    return Ok(None);
                }
                let candidate = entries[*cursor].clone();
                *cursor += 1;
                if self.strict && candidate.input_hash != request_hash {
                    return Err(FixtureError::Mismatch(format!(
                        "by_index mismatch for {}:{}; expected hash {}, got {}",
                        kind.as_str(),
                        name,
                        candidate.input_hash,
                        request_hash
                    )));
                }
                Ok(Some(candidate))
            }
            FixturePolicy::ByHash => {
                let mut matching: Vec<usize> = Vec::new();
                for (index, candidate) in entries.iter().enumerate() {
                    if candidate.input_hash != request_hash {
                        continue;
                    }
                    matching.push(index);
                    let slot = (key.clone(), index);
                    if self.used_hash_slots.contains(&slot) {
                        continue;
                    }
                    self.used_hash_slots.insert(slot);
                    return Ok(Some(candidate.clone()));
                }
                if !matching.is_empty() {
                    let consumed = matching
                        .iter()
                        .filter(|index| self.used_hash_slots.contains(&(key.clone(), **index)))
                        .count();
                    return Err(FixtureError::Exhausted {
                        kind,
                        name: name.to_string(),
                        expected_signature: request_hash,
                        consumed_count: consumed,
                        available_count: matching.len(),
                    });
                }
                Ok(None)
            }
        }
    }
}
