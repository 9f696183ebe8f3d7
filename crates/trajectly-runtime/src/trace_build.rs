//! Wrap raw agent events in the run envelope.
//!
//! Raw lines from the events file become a well-formed trace: a
//! `run_started` header, monotone `rel_ms`, dense sequence numbers, and a
//! `run_finished` trailer carrying exit status and stdio tails. Redaction
//! patterns are applied before event ids are computed, so redacted traces
//! stay self-consistent.

use serde_json::{Map, Value, json};

use trajectly_core::{apply_redactions, compute_event_id, make_event};
use trajectly_types::{AgentSpec, EventType, TraceEvent};

use crate::executor::ExecutionResult;

fn tail(text: &str, max_chars: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_chars {
        text.to_string()
    } else {
        chars[chars.len() - max_chars..].iter().collect()
    }
}

pub fn build_trace(
    spec: &AgentSpec,
    result: &ExecutionResult,
    run_id: &str,
    mode: &str,
) -> Vec<TraceEvent> {
    let mut events: Vec<TraceEvent> = Vec::new();
    let mut seq: u64 = 1;
    let mut started_payload = Map::new();
    started_payload.insert("spec_name".to_string(), json!(spec.name));
    started_payload.insert(
        "spec_path".to_string(),
        json!(spec.source_path.display().to_string()),
    );
    let mut started_meta = Map::new();
    started_meta.insert("mode".to_string(), json!(mode));
    events.push(make_event(
        EventType::RunStarted,
        seq,
        run_id,
        0,
        started_payload,
        started_meta,
    ));

    let mut last_rel: i64 = 0;
    for raw in &result.raw_events {
        let event_type = match raw
            .get("event_type")
            .and_then(Value::as_str)
            .map(str::trim)
            .and_then(EventType::parse)
        {
            Some(event_type) => event_type,
            None => continue,
        };

        let payload = match raw.get("payload") {
            Some(Value::Object(payload)) => payload.clone(),
            Some(other) => {
                let mut wrapped = Map::new();
                wrapped.insert("value".to_string(), other.clone());
                wrapped
            }
            None => Map::new(),
        };
        let meta = raw
            .get("meta")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let rel_ms = raw
            .get("rel_ms")
            .and_then(|value| match value {
                Value::Number(number) => number.as_i64(),
                Value::String(text) => text.trim().parse().ok(),
                _ => None,
            })
            .unwrap_or(last_rel)
            .max(last_rel);
        last_rel = rel_ms;

        seq += 1;
        events.push(make_event(event_type, seq, run_id, rel_ms, payload, meta));
    }

    seq += 1;
    let mut finished_payload = Map::new();
    finished_payload.insert("returncode".to_string(), json!(result.returncode));
    finished_payload.insert("duration_ms".to_string(), json!(result.duration_ms));
    finished_payload.insert("stdout_tail".to_string(), json!(tail(&result.stdout, 2000)));
    finished_payload.insert("stderr_tail".to_string(), json!(tail(&result.stderr, 2000)));
    finished_payload.insert(
        "internal_error".to_string(),
        result
            .internal_error
            .as_ref()
            .map(|message| json!(message))
            .unwrap_or(Value::Null),
    );
    events.push(make_event(
        EventType::RunFinished,
        seq,
        run_id,
        last_rel.max(result.duration_ms),
        finished_payload,
        Map::new(),
    ));

    if !spec.redact.is_empty() {
        for event in &mut events {
            let payload = apply_redactions(&Value::Object(event.payload.clone()), &spec.redact);
            let meta = apply_redactions(&Value::Object(event.meta.clone()), &spec.redact);
            event.payload = payload.as_object().cloned().unwrap_or_default();
            event.meta = meta.as_object().cloned().unwrap_or_default();
            event.event_id = compute_event_id(event);
        }
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use trajectly_testing::spec_from_json;

    fn execution(raw_events: Vec<Value>) -> ExecutionResult {
        ExecutionResult {
            returncode: 0,
            stdout: "out".to_string(),
            stderr: "err".to_string(),
            duration_ms: 12,
            raw_events,
            internal_error: None,
        }
    }

    fn spec() -> AgentSpec {
        spec_from_json(json!({
            "schema_version": "0.4",
            "name": "wrap",
            "command": "true",
        }))
    }

    #[test]
    fn test_wraps_events_with_envelope() {
        let raw = vec![
            json!({"event_type": "agent_step", "rel_ms": 5, "payload": {"name": "go"}, "meta": {}}),
            json!({"event_type": "tool_called", "rel_ms": 3, "payload": {"tool_name": "add", "input": {}}, "meta": {}}),
            json!({"event_type": "bogus_kind", "rel_ms": 4, "payload": {}, "meta": {}}),
        ];
        let events = build_trace(&spec(), &execution(raw), "run-1", "record");

        assert_eq!(events.len(), 4);
        assert_eq!(events[0].event_type, EventType::RunStarted);
        assert_eq!(events[0].meta.get("mode"), Some(&json!("record")));
        assert_eq!(events[3].event_type, EventType::RunFinished);
        // Unknown event types are dropped; rel_ms is clamped monotone.
        assert_eq!(events[2].event_type, EventType::ToolCalled);
        assert_eq!(events[2].rel_ms, 5);
        let seqs: Vec<u64> = events.iter().map(|event| event.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4]);
        assert_eq!(
            events[3].payload.get("returncode"),
            Some(&json!(0))
        );
        assert_eq!(events[3].payload.get("stderr_tail"), Some(&json!("err")));
    }

    #[test]
    fn test_redaction_recomputes_event_ids() {
        let raw = vec![json!({
            "event_type": "tool_called",
            "rel_ms": 1,
            "payload": {"tool_name": "send", "input": {"kwargs": {"card": "4111-1111-1111-1111"}}},
            "meta": {},
        })];
        let mut redacting = spec();
        redacting.redact = vec![r"\d{4}-\d{4}-\d{4}-\d{4}".to_string()];

        let plain = build_trace(&spec(), &execution(raw.clone()), "run-1", "record");
        let redacted = build_trace(&redacting, &execution(raw), "run-1", "record");

        let card = &redacted[1].payload["input"]["kwargs"]["card"];
        assert_eq!(card, &json!("[REDACTED]"));
        // Redaction changes content, so the content-addressed id changes too.
        assert_ne!(plain[1].event_id, redacted[1].event_id);
        // Two redacted traces differing only inside redacted spans share ids.
        let raw_other = vec![json!({
            "event_type": "tool_called",
            "rel_ms": 1,
            "payload": {"tool_name": "send", "input": {"kwargs": {"card": "4222-2222-2222-2222"}}},
            "meta": {},
        })];
        let redacted_other = build_trace(&redacting, &execution(raw_other), "run-1", "record");
        assert_eq!(redacted[1].event_id, redacted_other[1].event_id);
    }

    #[test]
    fn test_non_object_payload_wrapped() {
        let raw = vec![json!({"event_type": "agent_step", "rel_ms": 0, "payload": "text", "meta": {}})];
        let events = build_trace(&spec(), &execution(raw), "run-1", "record");
        assert_eq!(events[1].payload.get("value"), Some(&json!("text")));
    }
}
