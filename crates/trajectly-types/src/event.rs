use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::{EVENT_SCHEMA_VERSION, NORMALIZER_VERSION, TRACE_SCHEMA_VERSION};
use crate::error::{Error, Result};

/// Event kind, drawn from a closed set. The first event of a run is always
/// `run_started`, the last is `run_finished`; returns only follow calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RunStarted,
    AgentStep,
    LlmCalled,
    LlmReturned,
    ToolCalled,
    ToolReturned,
    RunFinished,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::RunStarted => "run_started",
            EventType::AgentStep => "agent_step",
            EventType::LlmCalled => "llm_called",
            EventType::LlmReturned => "llm_returned",
            EventType::ToolCalled => "tool_called",
            EventType::ToolReturned => "tool_returned",
            EventType::RunFinished => "run_finished",
        }
    }

    pub fn parse(raw: &str) -> Option<EventType> {
        match raw {
            "run_started" => Some(EventType::RunStarted),
            "agent_step" => Some(EventType::AgentStep),
            "llm_called" => Some(EventType::LlmCalled),
            "llm_returned" => Some(EventType::LlmReturned),
            "tool_called" => Some(EventType::ToolCalled),
            "tool_returned" => Some(EventType::ToolReturned),
            "run_finished" => Some(EventType::RunFinished),
            _ => None,
        }
    }
}

/// One event in a trajectory.
///
/// `event_id` is content-addressed: it hashes the event with `event_id`,
/// `rel_ms`, and `meta` excluded, so two events that differ only in timing
/// or observer annotations share an id. The id is computed by the trace I/O
/// layer; an empty string means "not yet assigned".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    pub schema_version: String,
    pub event_type: EventType,
    pub seq: u64,
    pub run_id: String,
    pub rel_ms: i64,
    pub payload: Map<String, Value>,
    #[serde(default)]
    pub meta: Map<String, Value>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub event_id: String,
}

impl TraceEvent {
    /// Serialize to a JSON object with the wire field layout.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert(
            "schema_version".to_string(),
            Value::String(self.schema_version.clone()),
        );
        map.insert(
            "event_type".to_string(),
            Value::String(self.event_type.as_str().to_string()),
        );
        map.insert("seq".to_string(), Value::from(self.seq));
        map.insert("run_id".to_string(), Value::String(self.run_id.clone()));
        map.insert("rel_ms".to_string(), Value::from(self.rel_ms));
        map.insert("payload".to_string(), Value::Object(self.payload.clone()));
        map.insert("meta".to_string(), Value::Object(self.meta.clone()));
        if !self.event_id.is_empty() {
            map.insert("event_id".to_string(), Value::String(self.event_id.clone()));
        }
        Value::Object(map)
    }

    /// Validate and decode a raw JSON object into an event.
    ///
    /// Checks the closed schema-version set, event-kind membership, and the
    /// required field types. `event_id` stays empty when absent; the caller
    /// fills it in from the canonical hash.
    pub fn from_value(data: &Value) -> Result<TraceEvent> {
        let map = data
            .as_object()
            .ok_or_else(|| Error::Validation("Trace event must be an object".to_string()))?;

        let schema_version = match map.get("schema_version") {
            None => EVENT_SCHEMA_VERSION.to_string(),
            Some(Value::String(v)) if v == EVENT_SCHEMA_VERSION => v.clone(),
            Some(other) => {
                return Err(Error::Validation(format!(
                    "Unsupported trace schema_version '{}'. Supported versions: {}. \
                     Migration required: regenerate artifacts with current Trajectly version.",
                    value_text(other),
                    EVENT_SCHEMA_VERSION
                )));
            }
        };

        let event_type_raw = map
            .get("event_type")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::Validation(
                    "Trace event requires non-empty string field `event_type`".to_string(),
                )
            })?;
        let event_type = EventType::parse(event_type_raw).ok_or_else(|| {
            Error::Validation(format!("Unsupported event type: {}", event_type_raw))
        })?;

        let seq = map
            .get("seq")
            .and_then(Value::as_u64)
            .filter(|seq| *seq > 0)
            .ok_or_else(|| {
                Error::Validation("Trace event requires positive integer field `seq`".to_string())
            })?;

        let run_id = map
            .get("run_id")
            .and_then(Value::as_str)
            .filter(|run_id| !run_id.trim().is_empty())
            .ok_or_else(|| {
                Error::Validation(
                    "Trace event requires non-empty string field `run_id`".to_string(),
                )
            })?
            .to_string();

        let rel_ms = map
            .get("rel_ms")
            .and_then(Value::as_i64)
            .filter(|rel_ms| *rel_ms >= 0)
            .ok_or_else(|| {
                Error::Validation(
                    "Trace event requires non-negative integer field `rel_ms`".to_string(),
                )
            })?;

        let payload = map
            .get("payload")
            .and_then(Value::as_object)
            .ok_or_else(|| {
                Error::Validation("Trace event requires object field `payload`".to_string())
            })?
            .clone();

        let meta = match map.get("meta") {
            None => Map::new(),
            Some(Value::Object(meta)) => meta.clone(),
            Some(_) => {
                return Err(Error::Validation(
                    "Trace event field `meta` must be an object".to_string(),
                ));
            }
        };

        let event_id = map
            .get("event_id")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();

        Ok(TraceEvent {
            schema_version,
            event_type,
            seq,
            run_id,
            rel_ms,
            payload,
            meta,
            event_id,
        })
    }
}

/// Trace metadata, stored beside the event stream as `<trace>.meta.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceMeta {
    pub schema_version: String,
    pub normalizer_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Default for TraceMeta {
    fn default() -> Self {
        TraceMeta {
            schema_version: TRACE_SCHEMA_VERSION.to_string(),
            normalizer_version: NORMALIZER_VERSION.to_string(),
            spec_name: None,
            run_id: None,
            mode: None,
            metadata: Map::new(),
        }
    }
}

impl TraceMeta {
    /// Validate and decode trace metadata.
    ///
    /// A wrong schema or normalizer version is rejected here; the runtime
    /// surfaces that rejection as `NORMALIZER_VERSION_MISMATCH`.
    pub fn from_value(data: &Value) -> Result<TraceMeta> {
        let map = data
            .as_object()
            .ok_or_else(|| Error::Validation("Trace meta payload must be an object".to_string()))?;

        let schema_version = map.get("schema_version").and_then(Value::as_str);
        if schema_version != Some(TRACE_SCHEMA_VERSION) {
            return Err(Error::Validation(format!(
                "Unsupported trace meta schema_version '{}'. Expected '{}'.",
                schema_version.unwrap_or("<missing>"),
                TRACE_SCHEMA_VERSION
            )));
        }

        let normalizer_version = map.get("normalizer_version").and_then(Value::as_str);
        if normalizer_version != Some(NORMALIZER_VERSION) {
            return Err(Error::Validation(format!(
                "Unsupported normalizer_version '{}'. Expected '{}'.",
                normalizer_version.unwrap_or("<missing>"),
                NORMALIZER_VERSION
            )));
        }

        let metadata = match map.get("metadata") {
            None => Map::new(),
            Some(Value::Object(metadata)) => metadata.clone(),
            Some(_) => {
                return Err(Error::Validation(
                    "Trace metadata field `metadata` must be an object".to_string(),
                ));
            }
        };

        let mut meta = TraceMeta {
            metadata,
            ..TraceMeta::default()
        };
        for (key, slot) in [
            ("spec_name", &mut meta.spec_name),
            ("run_id", &mut meta.run_id),
            ("mode", &mut meta.mode),
        ] {
            match map.get(key) {
                None | Some(Value::Null) => {}
                Some(Value::String(text)) => *slot = Some(text.clone()),
                Some(_) => {
                    return Err(Error::Validation(format!(
                        "Trace metadata field `{}` must be a string when provided",
                        key
                    )));
                }
            }
        }
        Ok(meta)
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_roundtrip() {
        let raw = json!({
            "schema_version": "v1",
            "event_type": "tool_called",
            "seq": 2,
            "run_id": "run-1",
            "rel_ms": 10,
            "payload": {"tool_name": "add", "input": {"args": [1, 2], "kwargs": {}}},
            "meta": {},
        });
        let event = TraceEvent::from_value(&raw).unwrap();
        assert_eq!(event.event_type, EventType::ToolCalled);
        assert_eq!(event.seq, 2);
        assert!(event.event_id.is_empty());

        let back = event.to_value();
        assert_eq!(back["event_type"], "tool_called");
        assert!(back.get("event_id").is_none());
    }

    #[test]
    fn test_event_rejects_unknown_type() {
        let raw = json!({
            "event_type": "telemetry",
            "seq": 1,
            "run_id": "run-1",
            "rel_ms": 0,
            "payload": {},
        });
        let err = TraceEvent::from_value(&raw).unwrap_err();
        assert!(err.to_string().contains("Unsupported event type"));
    }

    #[test]
    fn test_event_rejects_unknown_schema_version() {
        let raw = json!({
            "schema_version": "v9",
            "event_type": "run_started",
            "seq": 1,
            "run_id": "run-1",
            "rel_ms": 0,
            "payload": {},
        });
        let err = TraceEvent::from_value(&raw).unwrap_err();
        assert!(err.to_string().contains("Migration required"));
    }

    #[test]
    fn test_meta_rejects_wrong_normalizer() {
        let raw = json!({
            "schema_version": "0.4",
            "normalizer_version": "0",
            "metadata": {},
        });
        let err = TraceMeta::from_value(&raw).unwrap_err();
        assert!(err.to_string().contains("normalizer_version"));
    }

    #[test]
    fn test_meta_optional_fields() {
        let raw = json!({
            "schema_version": "0.4",
            "normalizer_version": "1",
            "spec_name": "checkout",
            "mode": "record",
            "metadata": {"clock_seed": 12.0},
        });
        let meta = TraceMeta::from_value(&raw).unwrap();
        assert_eq!(meta.spec_name.as_deref(), Some("checkout"));
        assert_eq!(meta.run_id, None);
        assert_eq!(meta.mode.as_deref(), Some("record"));
    }
}
