//! Fluent trace builder producing well-formed event streams.

use serde_json::{Map, Value, json};

use trajectly_core::make_event;
use trajectly_types::{EventType, TraceEvent};

fn as_map(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

/// Builds a run wrapped in `run_started` / `run_finished`, with sequence
/// numbers and relative timestamps assigned in order.
pub struct TraceBuilder {
    run_id: String,
    events: Vec<TraceEvent>,
    seq: u64,
    rel_ms: i64,
}

impl TraceBuilder {
    pub fn new(run_id: &str) -> TraceBuilder {
        let mut builder = TraceBuilder {
            run_id: run_id.to_string(),
            events: Vec::new(),
            seq: 0,
            rel_ms: 0,
        };
        builder.push(EventType::RunStarted, json!({"spec_name": run_id}));
        builder
    }

    fn push(&mut self, event_type: EventType, payload: Value) -> &mut Self {
        self.seq += 1;
        self.rel_ms += 1;
        self.events.push(make_event(
            event_type,
            self.seq,
            &self.run_id,
            self.rel_ms,
            as_map(payload),
            Map::new(),
        ));
        self
    }

    pub fn step(&mut self, name: &str) -> &mut Self {
        self.push(EventType::AgentStep, json!({"name": name, "details": {}}))
    }

    pub fn tool_call(&mut self, name: &str, input: Value) -> &mut Self {
        self.push(EventType::ToolCalled, json!({"tool_name": name, "input": input}))
    }

    pub fn tool_return(&mut self, name: &str, output: Value) -> &mut Self {
        self.push(
            EventType::ToolReturned,
            json!({"tool_name": name, "output": output, "error": null}),
        )
    }

    pub fn tool_error(&mut self, name: &str, error_code: &str, details: Value) -> &mut Self {
        self.push(
            EventType::ToolReturned,
            json!({
                "tool_name": name,
                "output": null,
                "error": format!("{}: replay failed", error_code),
                "error_code": error_code,
                "error_details": details,
            }),
        )
    }

    pub fn llm_call(&mut self, provider: &str, model: &str, request: Value) -> &mut Self {
        self.push(
            EventType::LlmCalled,
            json!({"provider": provider, "model": model, "request": request}),
        )
    }

    pub fn llm_return(&mut self, provider: &str, model: &str, response: Value, tokens: i64) -> &mut Self {
        self.push(
            EventType::LlmReturned,
            json!({
                "provider": provider,
                "model": model,
                "response": response,
                "usage": {"total_tokens": tokens},
                "result": null,
                "error": null,
            }),
        )
    }

    pub fn raw(&mut self, event_type: EventType, payload: Value) -> &mut Self {
        self.push(event_type, payload)
    }

    pub fn finish(&mut self, returncode: i64) -> Vec<TraceEvent> {
        self.finish_with(json!({
            "returncode": returncode,
            "duration_ms": self.rel_ms + 1,
            "stdout_tail": "",
            "stderr_tail": "",
        }))
    }

    pub fn finish_with(&mut self, payload: Value) -> Vec<TraceEvent> {
        self.push(EventType::RunFinished, payload);
        self.events.clone()
    }
}

/// Convenience pair: `tool_called` + `tool_returned` for one invocation.
pub fn tool_exchange(builder: &mut TraceBuilder, name: &str, input: Value, output: Value) {
    builder.tool_call(name, input);
    builder.tool_return(name, output);
}

/// Convenience pair: `llm_called` + `llm_returned` for one invocation.
pub fn llm_exchange(builder: &mut TraceBuilder, provider: &str, model: &str, request: Value, response: Value) {
    builder.llm_call(provider, model, request);
    builder.llm_return(provider, model, response, 4);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_produces_well_formed_run() {
        let mut builder = TraceBuilder::new("run-1");
        builder.step("plan");
        tool_exchange(&mut builder, "add", json!({"args": [1, 2], "kwargs": {}}), json!(3));
        let events = builder.finish(0);

        assert_eq!(events.first().unwrap().event_type, EventType::RunStarted);
        assert_eq!(events.last().unwrap().event_type, EventType::RunFinished);
        let seqs: Vec<u64> = events.iter().map(|event| event.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
        assert!(events.iter().all(|event| !event.event_id.is_empty()));
    }
}
