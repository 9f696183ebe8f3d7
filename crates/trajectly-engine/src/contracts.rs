//! Contract evaluator.
//!
//! Operates on the raw current event list and the spec's contract block.
//! Rule families are independent and all findings accumulate; rules are
//! applied in a fixed order and, within a rule, findings are emitted in
//! event order, so output ordering never depends on map iteration.

use std::collections::{BTreeMap, BTreeSet};

use regex::Regex;
use serde_json::{Map, Value, json};

use trajectly_types::{AgentContracts, EventType, Finding, NETWORK_BLOCK_MESSAGE, TraceEvent};

use crate::predicates::{contains_pii, host_from_url};

const WRITE_TOOL_HINTS: &[&str] = &[
    "write", "delete", "remove", "rm", "update", "patch", "save", "create", "insert", "upsert",
];

fn tool_name_from_event(event: &TraceEvent) -> Option<&str> {
    if event.event_type != EventType::ToolCalled {
        return None;
    }
    event.payload.get("tool_name").and_then(Value::as_str)
}

/// Operation signature: `tool:<name>` | `llm:<provider>:<model>` | `step:<name>`.
fn operation_signature(event: &TraceEvent) -> Option<String> {
    match event.event_type {
        EventType::ToolCalled => event
            .payload
            .get("tool_name")
            .and_then(Value::as_str)
            .map(|name| format!("tool:{}", name)),
        EventType::LlmCalled => {
            let provider = event.payload.get("provider").and_then(Value::as_str)?;
            let model = event.payload.get("model").and_then(Value::as_str)?;
            Some(format!("llm:{}:{}", provider, model))
        }
        EventType::AgentStep => event
            .payload
            .get("name")
            .and_then(Value::as_str)
            .map(|name| format!("step:{}", name)),
        _ => None,
    }
}

fn looks_like_write_tool(tool_name: &str) -> bool {
    let normalized = tool_name.trim().to_lowercase();
    WRITE_TOOL_HINTS.iter().any(|hint| normalized.contains(hint))
}

/// Baseline-order subsequence scan; returns the requirements that could
/// not be matched at or after the previous match position.
fn find_required_sequence_missing(requirements: &[String], operations: &[String]) -> Vec<String> {
    let mut missing = Vec::new();
    let mut cursor = 0;
    for required in requirements {
        match operations[cursor.min(operations.len())..]
            .iter()
            .position(|operation| operation == required)
        {
            Some(offset) => cursor += offset + 1,
            None => missing.push(required.clone()),
        }
    }
    missing
}

fn extract_tool_input(event: &TraceEvent) -> Map<String, Value> {
    event
        .payload
        .get("input")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

fn extract_tool_kwargs(event: &TraceEvent) -> Map<String, Value> {
    extract_tool_input(event)
        .get("kwargs")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

fn extract_tool_args(event: &TraceEvent) -> Vec<Value> {
    extract_tool_input(event)
        .get("args")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn contains_regex(value: &Value, pattern: &Regex) -> bool {
    match value {
        Value::String(text) => pattern.is_match(text),
        Value::Object(map) => map.values().any(|item| contains_regex(item, pattern)),
        Value::Array(items) => items.iter().any(|item| contains_regex(item, pattern)),
        _ => false,
    }
}

/// URL from kwargs (`url`|`uri`|`endpoint`) or the first positional arg.
fn extract_url_from_event(event: &TraceEvent) -> Option<String> {
    let kwargs = extract_tool_kwargs(event);
    for key in ["url", "uri", "endpoint"] {
        if let Some(url) = kwargs.get(key).and_then(Value::as_str) {
            let trimmed = url.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    let args = extract_tool_args(event);
    if let Some(Value::String(first)) = args.first() {
        let trimmed = first.trim();
        if !trimmed.is_empty() {
            return Some(trimmed.to_string());
        }
    }
    None
}

/// Resolve a host from a URL; a bare dotted string is treated as a host.
fn extract_domain(value: &str) -> Option<String> {
    if let Some(host) = host_from_url(value) {
        return Some(host);
    }
    if !value.contains("://") && !value.contains('/') && value.contains('.') {
        return Some(value.to_lowercase());
    }
    None
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Apply one tool's argument schema to one call event.
fn validate_tool_schema(tool_name: &str, event: &TraceEvent, schema: &Map<String, Value>) -> Vec<Finding> {
    let mut findings = Vec::new();
    if schema.is_empty() {
        return findings;
    }

    let required_keys: Vec<String> = schema
        .get("required_keys")
        .and_then(Value::as_array)
        .map(|keys| keys.iter().map(value_text).collect())
        .unwrap_or_default();
    let fields = schema
        .get("fields")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let mut merged_values: Map<String, Value> = extract_tool_kwargs(event);
    for (index, value) in extract_tool_args(event).into_iter().enumerate() {
        merged_values.insert(format!("arg_{}", index), value);
    }

    for required_key in &required_keys {
        if !merged_values.contains_key(required_key) {
            findings.push(
                Finding::new(
                    "contract_args_required_key_missing",
                    format!(
                        "Required argument missing for tool {}: {}",
                        tool_name, required_key
                    ),
                )
                .with_path(format!("$.tool_call.{}.required_keys", tool_name))
                .with_current(json!(required_key)),
            );
        }
    }

    for (field_name, field_rules_raw) in &fields {
        let field_rules = match field_rules_raw.as_object() {
            Some(rules) => rules,
            None => continue,
        };
        let value = match merged_values.get(field_name) {
            Some(value) => value,
            None => continue,
        };
        let field_path = format!("$.tool_call.{}.fields.{}", tool_name, field_name);
        let expected_type = field_rules.get("type").and_then(Value::as_str);

        if expected_type == Some("number") {
            let numeric = match coerce_number(value) {
                Some(numeric) => numeric,
                None => {
                    findings.push(
                        Finding::new(
                            "contract_args_type_violation",
                            format!("Field {}.{} must be numeric", tool_name, field_name),
                        )
                        .with_path(field_path.clone())
                        .with_current(value.clone()),
                    );
                    continue;
                }
            };
            if let Some(max_value) = field_rules.get("max").and_then(coerce_number) {
                if numeric > max_value {
                    findings.push(
                        Finding::new(
                            "contract_args_max_violation",
                            format!(
                                "Field {}.{} exceeds max ({} > {})",
                                tool_name, field_name, numeric, max_value
                            ),
                        )
                        .with_path(field_path.clone())
                        .with_baseline(json!(max_value))
                        .with_current(json!(numeric)),
                    );
                }
            }
            if let Some(min_value) = field_rules.get("min").and_then(coerce_number) {
                if numeric < min_value {
                    findings.push(
                        Finding::new(
                            "contract_args_min_violation",
                            format!(
                                "Field {}.{} below min ({} < {})",
                                tool_name, field_name, numeric, min_value
                            ),
                        )
                        .with_path(field_path.clone())
                        .with_baseline(json!(min_value))
                        .with_current(json!(numeric)),
                    );
                }
            }
        }

        if expected_type == Some("string") {
            let text = value_text(value);
            if let Some(enum_raw) = field_rules.get("enum").and_then(Value::as_array) {
                let allowed: Vec<String> = enum_raw.iter().map(value_text).collect();
                if !allowed.contains(&text) {
                    findings.push(
                        Finding::new(
                            "contract_args_enum_violation",
                            format!("Field {}.{} not in enum", tool_name, field_name),
                        )
                        .with_path(field_path.clone())
                        .with_baseline(json!(allowed))
                        .with_current(json!(text)),
                    );
                }
            }
            if let Some(pattern_raw) = field_rules.get("regex").and_then(Value::as_str) {
                if let Ok(pattern) = Regex::new(pattern_raw) {
                    if !pattern.is_match(&text) {
                        findings.push(
                            Finding::new(
                                "contract_args_regex_violation",
                                format!("Field {}.{} does not match regex", tool_name, field_name),
                            )
                            .with_path(field_path.clone())
                            .with_baseline(json!(pattern_raw))
                            .with_current(json!(text)),
                        );
                    }
                }
            }
        }
    }

    findings
}

pub fn evaluate_contracts(current: &[TraceEvent], contracts: &AgentContracts) -> Vec<Finding> {
    let mut findings: Vec<Finding> = Vec::new();

    let tool_events: Vec<&TraceEvent> = current
        .iter()
        .filter(|event| event.event_type == EventType::ToolCalled)
        .collect();
    let tool_names: Vec<&str> = tool_events
        .iter()
        .filter_map(|event| tool_name_from_event(event))
        .collect();
    let operations: Vec<String> = current.iter().filter_map(operation_signature).collect();

    let deny_tools: BTreeSet<&str> = contracts.tools.deny.iter().map(String::as_str).collect();
    let allow_tools: BTreeSet<&str> = contracts.tools.allow.iter().map(String::as_str).collect();

    for (position, tool_name) in tool_names.iter().enumerate() {
        if deny_tools.contains(tool_name) {
            findings.push(
                Finding::new(
                    "contract_tool_denied",
                    format!("Contract denied tool call: {}", tool_name),
                )
                .with_path(format!("$.tool_calls[{}]", position))
                .with_current(json!(tool_name)),
            );
        }

        if !allow_tools.is_empty() && !allow_tools.contains(tool_name) {
            findings.push(
                Finding::new(
                    "contract_tool_not_allowed",
                    format!("Tool call not in contracts.tools.allow: {}", tool_name),
                )
                .with_path(format!("$.tool_calls[{}]", position))
                .with_current(json!(tool_name)),
            );
        }

        if contracts.side_effects.deny_write_tools && looks_like_write_tool(tool_name) {
            findings.push(
                Finding::new(
                    "contract_side_effect_write_tool_denied",
                    format!(
                        "Write-like tool blocked by contracts.side_effects.deny_write_tools: {}",
                        tool_name
                    ),
                )
                .with_path(format!("$.tool_calls[{}]", position))
                .with_current(json!(tool_name)),
            );
        }
    }

    if let Some(max_calls_total) = contracts.tools.max_calls_total {
        if tool_names.len() > max_calls_total {
            findings.push(
                Finding::new(
                    "contract_max_calls_total_exceeded",
                    format!(
                        "contracts.tools.max_calls_total exceeded (limit={}, actual={})",
                        max_calls_total,
                        tool_names.len()
                    ),
                )
                .with_path("$.tool_calls")
                .with_baseline(json!(max_calls_total))
                .with_current(json!(tool_names.len())),
            );
        }
    }

    if !contracts.tools.max_calls_per_tool.is_empty() {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for tool_name in &tool_names {
            *counts.entry(tool_name).or_insert(0) += 1;
        }
        for (tool_name, limit) in &contracts.tools.max_calls_per_tool {
            let actual = counts.get(tool_name.as_str()).copied().unwrap_or(0);
            if actual > *limit {
                findings.push(
                    Finding::new(
                        "contract_max_calls_per_tool_exceeded",
                        format!(
                            "contracts.tools.max_calls_per_tool exceeded for {} (limit={}, actual={})",
                            tool_name, limit, actual
                        ),
                    )
                    .with_path(format!("$.tool_calls.{}", tool_name))
                    .with_baseline(json!(limit))
                    .with_current(json!(actual)),
                );
            }
        }
    }

    for required in find_required_sequence_missing(&contracts.sequence.require, &operations) {
        findings.push(
            Finding::new(
                "contract_sequence_required_missing",
                format!("Required sequence operation missing: {}", required),
            )
            .with_path("$.operations")
            .with_current(json!(operations)),
        );
    }

    let forbid_set: BTreeSet<&str> = contracts.sequence.forbid.iter().map(String::as_str).collect();
    if !forbid_set.is_empty() {
        for (position, operation) in operations.iter().enumerate() {
            if forbid_set.contains(operation.as_str()) {
                findings.push(
                    Finding::new(
                        "contract_sequence_forbidden_seen",
                        format!("Forbidden sequence operation observed: {}", operation),
                    )
                    .with_path(format!("$.operations[{}]", position))
                    .with_current(json!(operation)),
                );
            }
        }
    }

    for (required_before, required_after) in &contracts.sequence.require_before {
        let before_idx = operations.iter().position(|operation| operation == required_before);
        let after_idx = operations.iter().position(|operation| operation == required_after);
        let violated = match (before_idx, after_idx) {
            (Some(before), Some(after)) => before > after,
            _ => true,
        };
        if violated {
            findings.push(
                Finding::new(
                    "contract_sequence_require_before_violated",
                    format!(
                        "Required order violated: {} before {}",
                        required_before, required_after
                    ),
                )
                .with_path("$.operations")
                .with_current(json!(operations)),
            );
        }
    }

    for required in &contracts.sequence.eventually {
        if !operations.iter().any(|operation| operation == required) {
            findings.push(
                Finding::new(
                    "contract_sequence_eventually_missing",
                    format!("Expected operation missing: {}", required),
                )
                .with_path("$.operations")
                .with_current(json!(operations)),
            );
        }
    }

    let never_set: BTreeSet<&str> = contracts.sequence.never.iter().map(String::as_str).collect();
    if !never_set.is_empty() {
        for (position, operation) in operations.iter().enumerate() {
            if never_set.contains(operation.as_str()) {
                findings.push(
                    Finding::new(
                        "contract_sequence_never_seen",
                        format!("Operation forbidden by `never`: {}", operation),
                    )
                    .with_path(format!("$.operations[{}]", position))
                    .with_current(json!(operation)),
                );
            }
        }
    }

    for target in &contracts.sequence.at_most_once {
        let count = operations.iter().filter(|operation| *operation == target).count();
        if count > 1 {
            findings.push(
                Finding::new(
                    "contract_sequence_at_most_once_exceeded",
                    format!("Operation appears more than once: {}", target),
                )
                .with_path("$.operations")
                .with_baseline(json!(1))
                .with_current(json!(count)),
            );
        }
    }

    for event in &tool_events {
        let tool_name = match tool_name_from_event(event) {
            Some(name) => name,
            None => continue,
        };
        if let Some(Value::Object(schema)) = contracts.tools.schema.get(tool_name) {
            findings.extend(validate_tool_schema(tool_name, event, schema));
        }
    }

    findings.extend(evaluate_network(current, &tool_events, contracts));
    findings.extend(evaluate_data_leak(current, contracts));

    findings
}

fn evaluate_network(
    current: &[TraceEvent],
    tool_events: &[&TraceEvent],
    contracts: &AgentContracts,
) -> Vec<Finding> {
    let mut findings = Vec::new();

    let allowlist = if contracts.network.allowlist.is_empty() {
        &contracts.network.allow_domains
    } else {
        &contracts.network.allowlist
    };
    let network_default = contracts.network.default.trim().to_lowercase();
    let allow_domains: BTreeSet<String> = allowlist
        .iter()
        .map(|domain| domain.trim().to_lowercase())
        .filter(|domain| !domain.is_empty())
        .collect();
    let sorted_allow: Vec<&String> = allow_domains.iter().collect();

    for (position, event) in tool_events.iter().enumerate() {
        let tool_name = tool_name_from_event(event).unwrap_or("unknown");
        if tool_name != "http_request" && tool_name != "web_search" {
            continue;
        }
        let url = extract_url_from_event(event);
        let domain = url.as_deref().and_then(extract_domain);

        if network_default == "deny" {
            match domain {
                None => findings.push(
                    Finding::new(
                        "contract_network_domain_denied",
                        format!("Outbound network call blocked (no domain): {}", tool_name),
                    )
                    .with_path(format!("$.tool_calls[{}]", position))
                    .with_baseline(json!(sorted_allow))
                    .with_current(json!(url)),
                ),
                Some(domain) if !allow_domains.contains(&domain) => findings.push(
                    Finding::new(
                        "contract_network_domain_denied",
                        format!(
                            "Network domain denied by contracts.network.allow_domains: {}",
                            domain
                        ),
                    )
                    .with_path(format!("$.tool_calls[{}]", position))
                    .with_baseline(json!(sorted_allow))
                    .with_current(json!(domain)),
                ),
                Some(_) => {}
            }
        } else if !allow_domains.is_empty() {
            if let Some(domain) = domain {
                if !allow_domains.contains(&domain) {
                    findings.push(
                        Finding::new(
                            "contract_network_domain_denied",
                            format!("Network domain not in allowlist: {}", domain),
                        )
                        .with_path(format!("$.tool_calls[{}]", position))
                        .with_baseline(json!(sorted_allow))
                        .with_current(json!(domain)),
                    );
                }
            }
        }
    }

    // A runtime block by the network guard leaves its diagnostic in the
    // run_finished stderr tail.
    if !allowlist.is_empty() {
        let run_finished = current
            .iter()
            .filter(|event| event.event_type == EventType::RunFinished)
            .next_back();
        if let Some(event) = run_finished {
            if let Some(stderr_tail) = event.payload.get("stderr_tail").and_then(Value::as_str) {
                if stderr_tail.contains(NETWORK_BLOCK_MESSAGE) {
                    findings.push(
                        Finding::new(
                            "contract_network_allowlist_blocked",
                            "Network call was blocked during replay and did not match contracts.network.allowlist",
                        )
                        .with_path("$.run_finished.stderr_tail")
                        .with_current(json!(stderr_tail)),
                    );
                }
            }
        }
    }

    findings
}

fn evaluate_data_leak(current: &[TraceEvent], contracts: &AgentContracts) -> Vec<Finding> {
    let mut findings = Vec::new();

    let mut eligible: Vec<&TraceEvent> = Vec::new();
    for kind in &contracts.data_leak.outbound_kinds {
        let event_type = match kind.as_str() {
            "TOOL_CALL" => EventType::ToolCalled,
            "LLM_REQUEST" => EventType::LlmCalled,
            _ => continue,
        };
        eligible.extend(current.iter().filter(|event| event.event_type == event_type));
    }

    if contracts.data_leak.deny_pii_outbound {
        for event in &eligible {
            let payload = Value::Object(event.payload.clone());
            if contains_pii(&payload) {
                findings.push(
                    Finding::new(
                        "contract_data_leak_pii_outbound",
                        format!(
                            "PII detected in outbound payload for {}",
                            event.event_type.as_str()
                        ),
                    )
                    .with_path("$.payload")
                    .with_current(payload),
                );
                break;
            }
        }
    }

    // First matching (pattern, event) pair in pattern-major order wins;
    // scanning stops entirely after one secret finding.
    'patterns: for pattern_raw in &contracts.data_leak.secret_patterns {
        let pattern = match Regex::new(pattern_raw) {
            Ok(pattern) => pattern,
            Err(_) => continue,
        };
        for event in &eligible {
            let payload = Value::Object(event.payload.clone());
            if contains_regex(&payload, &pattern) {
                findings.push(
                    Finding::new(
                        "contract_data_leak_secret_pattern",
                        format!(
                            "Secret pattern detected in outbound payload for {}",
                            event.event_type.as_str()
                        ),
                    )
                    .with_path("$.payload")
                    .with_baseline(json!(pattern_raw))
                    .with_current(payload),
                );
                break 'patterns;
            }
        }
    }

    findings
}
