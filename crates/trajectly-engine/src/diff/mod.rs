//! Trace diff engine: LCS pairing over tracked event signatures, payload
//! diffs on matched pairs, budget-breach checks, and the first-divergence
//! pointer surfaced in report summaries.

mod lcs;
mod structural;

pub use lcs::lcs_pairs;
pub use structural::{StructuralChange, structural_diff};

use std::collections::BTreeMap;

use serde_json::{Value, json};

use trajectly_types::{
    BudgetThresholds, DiffResult, DiffSummary, EventType, Finding, FirstDivergence, TraceEvent,
    TraceTotals,
};

fn tracked(events: &[TraceEvent]) -> Vec<&TraceEvent> {
    events
        .iter()
        .filter(|event| {
            matches!(
                event.event_type,
                EventType::ToolCalled
                    | EventType::ToolReturned
                    | EventType::LlmCalled
                    | EventType::LlmReturned
            )
        })
        .collect()
}

fn signature(event: &TraceEvent) -> String {
    let payload = &event.payload;
    let text = |key: &str| -> &str { payload.get(key).and_then(Value::as_str).unwrap_or("unknown") };
    match event.event_type {
        EventType::ToolCalled => format!("tool_called:{}", text("tool_name")),
        EventType::ToolReturned => format!("tool_returned:{}", text("tool_name")),
        EventType::LlmCalled => format!("llm_called:{}:{}", text("provider"), text("model")),
        EventType::LlmReturned => format!("llm_returned:{}:{}", text("provider"), text("model")),
        other => format!("other:{}", other.as_str()),
    }
}

fn sum_tokens(events: &[TraceEvent]) -> i64 {
    events
        .iter()
        .filter(|event| event.event_type == EventType::LlmReturned)
        .filter_map(|event| event.payload.get("usage"))
        .filter_map(Value::as_object)
        .filter_map(|usage| usage.get("total_tokens"))
        .filter_map(Value::as_i64)
        .sum()
}

fn duration_ms(events: &[TraceEvent]) -> i64 {
    let finished = events
        .iter()
        .filter(|event| event.event_type == EventType::RunFinished)
        .next_back();
    let payload = match finished {
        Some(event) => &event.payload,
        None => return 0,
    };
    match payload.get("duration_ms") {
        Some(Value::Number(number)) => number.as_i64().unwrap_or(0),
        Some(Value::String(text)) => text.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn tool_calls(events: &[TraceEvent]) -> usize {
    events
        .iter()
        .filter(|event| event.event_type == EventType::ToolCalled)
        .count()
}

fn first_divergence(
    baseline_ops: &[&TraceEvent],
    current_ops: &[&TraceEvent],
) -> Option<FirstDivergence> {
    let limit = baseline_ops.len().max(current_ops.len());
    for index in 0..limit {
        let baseline_event = baseline_ops.get(index);
        let current_event = current_ops.get(index);
        let baseline_signature = baseline_event.map(|event| signature(event));
        let current_signature = current_event.map(|event| signature(event));

        if baseline_signature != current_signature {
            return Some(FirstDivergence {
                kind: "sequence".to_string(),
                index,
                signature: None,
                path: None,
                baseline: baseline_signature.map(Value::String),
                current: current_signature.map(Value::String),
            });
        }

        let (baseline_event, current_event) = match (baseline_event, current_event) {
            (Some(left), Some(right)) => (left, right),
            _ => continue,
        };
        let changes = structural_diff(
            &Value::Object(baseline_event.payload.clone()),
            &Value::Object(current_event.payload.clone()),
            "$.payload",
        );
        if let Some(first_change) = changes.first() {
            return Some(FirstDivergence {
                kind: "payload".to_string(),
                index,
                signature: baseline_signature,
                path: Some(first_change.path.clone()),
                baseline: Some(first_change.baseline.clone()),
                current: Some(first_change.current.clone()),
            });
        }
    }
    None
}

/// Compare two traces: sequence mismatches, payload mismatches on matched
/// events, and budget breaches.
pub fn compare_traces(
    baseline: &[TraceEvent],
    current: &[TraceEvent],
    budgets: &BudgetThresholds,
) -> DiffResult {
    let mut findings: Vec<Finding> = Vec::new();
    let baseline_ops = tracked(baseline);
    let current_ops = tracked(current);

    let base_signatures: Vec<String> = baseline_ops.iter().map(|event| signature(event)).collect();
    let curr_signatures: Vec<String> = current_ops.iter().map(|event| signature(event)).collect();
    let pairs = lcs_pairs(&base_signatures, &curr_signatures);

    let matched_left: std::collections::BTreeSet<usize> =
        pairs.iter().map(|(left, _)| *left).collect();
    let matched_right: std::collections::BTreeSet<usize> =
        pairs.iter().map(|(_, right)| *right).collect();

    for (idx, signature) in base_signatures.iter().enumerate() {
        if !matched_left.contains(&idx) {
            findings.push(
                Finding::new(
                    "sequence_mismatch",
                    format!("Missing event from current trace: {} at index {}", signature, idx),
                )
                .with_baseline(json!(signature)),
            );
        }
    }

    for (idx, signature) in curr_signatures.iter().enumerate() {
        if !matched_right.contains(&idx) {
            findings.push(
                Finding::new(
                    "sequence_mismatch",
                    format!("Unexpected event in current trace: {} at index {}", signature, idx),
                )
                .with_current(json!(signature)),
            );
        }
    }

    for (left_idx, right_idx) in &pairs {
        let left_event = baseline_ops[*left_idx];
        let right_event = current_ops[*right_idx];
        let changes = structural_diff(
            &Value::Object(left_event.payload.clone()),
            &Value::Object(right_event.payload.clone()),
            "$.payload",
        );
        for change in changes {
            findings.push(
                Finding::new(
                    "structural_mismatch",
                    format!("Payload mismatch at {}", change.path),
                )
                .with_path(change.path)
                .with_baseline(change.baseline)
                .with_current(change.current),
            );
        }
    }

    let baseline_totals = TraceTotals {
        duration_ms: duration_ms(baseline),
        tool_calls: tool_calls(baseline),
        tokens: sum_tokens(baseline),
    };
    let current_totals = TraceTotals {
        duration_ms: duration_ms(current),
        tool_calls: tool_calls(current),
        tokens: sum_tokens(current),
    };

    if let Some(max_latency_ms) = budgets.max_latency_ms {
        if current_totals.duration_ms > max_latency_ms {
            findings.push(
                Finding::new(
                    "budget_breach",
                    format!(
                        "Latency budget exceeded (current={}ms limit={}ms)",
                        current_totals.duration_ms, max_latency_ms
                    ),
                )
                .with_baseline(json!(baseline_totals.duration_ms))
                .with_current(json!(current_totals.duration_ms)),
            );
        }
    }

    if let Some(max_tool_calls) = budgets.max_tool_calls {
        if current_totals.tool_calls > max_tool_calls {
            findings.push(
                Finding::new(
                    "budget_breach",
                    format!(
                        "Tool call budget exceeded (current={} limit={})",
                        current_totals.tool_calls, max_tool_calls
                    ),
                )
                .with_baseline(json!(baseline_totals.tool_calls))
                .with_current(json!(current_totals.tool_calls)),
            );
        }
    }

    if let Some(max_tokens) = budgets.max_tokens {
        if current_totals.tokens > max_tokens {
            findings.push(
                Finding::new(
                    "budget_breach",
                    format!(
                        "Token budget exceeded (current={} limit={})",
                        current_totals.tokens, max_tokens
                    ),
                )
                .with_baseline(json!(baseline_totals.tokens))
                .with_current(json!(current_totals.tokens)),
            );
        }
    }

    let mut classifications: BTreeMap<String, usize> = BTreeMap::new();
    for finding in &findings {
        *classifications
            .entry(finding.classification.clone())
            .or_insert(0) += 1;
    }

    let summary = DiffSummary {
        regression: !findings.is_empty(),
        finding_count: findings.len(),
        classifications,
        first_divergence: first_divergence(&baseline_ops, &current_ops),
        baseline: baseline_totals,
        current: current_totals,
    };

    DiffResult { summary, findings }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, json};
    use trajectly_core::make_event;

    fn payload(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    fn run(events: Vec<(EventType, Value)>) -> Vec<TraceEvent> {
        events
            .into_iter()
            .enumerate()
            .map(|(index, (event_type, value))| {
                make_event(
                    event_type,
                    (index + 1) as u64,
                    "run-1",
                    index as i64,
                    payload(value),
                    Map::new(),
                )
            })
            .collect()
    }

    #[test]
    fn test_identical_traces_clean() {
        let events = run(vec![
            (EventType::RunStarted, json!({})),
            (EventType::ToolCalled, json!({"tool_name": "add", "input": {}})),
            (EventType::ToolReturned, json!({"tool_name": "add", "output": 3})),
            (EventType::RunFinished, json!({"returncode": 0, "duration_ms": 5})),
        ]);
        let result = compare_traces(&events, &events, &BudgetThresholds::default());
        assert!(!result.summary.regression);
        assert!(result.findings.is_empty());
        assert!(result.summary.first_divergence.is_none());
    }

    #[test]
    fn test_extra_event_is_sequence_mismatch() {
        let baseline = run(vec![
            (EventType::ToolCalled, json!({"tool_name": "search", "input": {}})),
        ]);
        let current = run(vec![
            (EventType::ToolCalled, json!({"tool_name": "search", "input": {}})),
            (EventType::ToolCalled, json!({"tool_name": "delete", "input": {}})),
        ]);
        let result = compare_traces(&baseline, &current, &BudgetThresholds::default());
        assert_eq!(result.findings.len(), 1);
        assert_eq!(result.findings[0].classification, "sequence_mismatch");
        assert!(result.findings[0].message.contains("Unexpected event"));
    }

    #[test]
    fn test_payload_change_is_structural_mismatch() {
        let baseline = run(vec![(
            EventType::ToolReturned,
            json!({"tool_name": "add", "output": 3}),
        )]);
        let current = run(vec![(
            EventType::ToolReturned,
            json!({"tool_name": "add", "output": 4}),
        )]);
        let result = compare_traces(&baseline, &current, &BudgetThresholds::default());
        assert_eq!(result.findings[0].classification, "structural_mismatch");
        assert_eq!(
            result.findings[0].path.as_deref(),
            Some("$.payload.output")
        );
        let divergence = result.summary.first_divergence.as_ref().unwrap();
        assert_eq!(divergence.kind, "payload");
        assert_eq!(divergence.index, 0);
    }

    #[test]
    fn test_budget_breaches() {
        let baseline = run(vec![(
            EventType::RunFinished,
            json!({"returncode": 0, "duration_ms": 10}),
        )]);
        let current = run(vec![
            (EventType::ToolCalled, json!({"tool_name": "a", "input": {}})),
            (EventType::ToolCalled, json!({"tool_name": "a", "input": {}})),
            (
                EventType::LlmReturned,
                json!({"provider": "p", "model": "m", "usage": {"total_tokens": 900}}),
            ),
            (EventType::RunFinished, json!({"returncode": 0, "duration_ms": 600})),
        ]);
        let budgets = BudgetThresholds {
            max_latency_ms: Some(100),
            max_tool_calls: Some(1),
            max_tokens: Some(500),
        };
        let result = compare_traces(&baseline, &current, &budgets);
        let breaches = result
            .findings
            .iter()
            .filter(|finding| finding.classification == "budget_breach")
            .count();
        assert_eq!(breaches, 3);
        assert_eq!(result.summary.current.tokens, 900);
    }

    #[test]
    fn test_sequence_divergence_pointer() {
        let baseline = run(vec![
            (EventType::ToolCalled, json!({"tool_name": "a", "input": {}})),
            (EventType::ToolCalled, json!({"tool_name": "b", "input": {}})),
        ]);
        let current = run(vec![
            (EventType::ToolCalled, json!({"tool_name": "a", "input": {}})),
        ]);
        let result = compare_traces(&baseline, &current, &BudgetThresholds::default());
        let divergence = result.summary.first_divergence.unwrap();
        assert_eq!(divergence.kind, "sequence");
        assert_eq!(divergence.index, 1);
        assert_eq!(divergence.baseline, Some(json!("tool_called:b")));
        assert_eq!(divergence.current, None);
    }
}
