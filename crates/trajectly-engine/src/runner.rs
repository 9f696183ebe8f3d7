//! TRT decision procedure.
//!
//! `evaluate_trt` composes abstraction, contract evaluation, skeleton
//! refinement, fixture-exhaustion lifting, and witness resolution into a
//! single verdict. For fixed inputs the output is identical across
//! invocations: no randomness, no hash-map iteration, no parallelism.
//!
//! Two invariants hold by construction and are covered by the scenario
//! tests:
//! - PASS holds iff the violation list is empty.
//! - The witness index equals the minimum event index over all violations.

use std::collections::{BTreeMap, BTreeSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Value, json};

use trajectly_types::{
    AgentSpec, EventType, FailureClass, SIDE_EFFECT_TOOL_REGISTRY_V1, TraceEvent, TrtReport,
    TrtStatus, Violation,
};

use crate::abstraction::{AbstractTrace, AbstractionConfig, TokenKind, build_abstract_trace};
use crate::contracts::evaluate_contracts;
use crate::refinement::check_skeleton_refinement;
use crate::skeleton::extract_call_skeleton;
use crate::witness::{WitnessResolution, resolve_witness};

#[derive(Debug)]
pub struct TrtResult {
    pub status: TrtStatus,
    pub report: TrtReport,
    pub witness: Option<WitnessResolution>,
    pub contract_violations: Vec<Violation>,
    pub refinement_violations: Vec<Violation>,
    pub abstraction_baseline: AbstractTrace,
    pub abstraction_current: AbstractTrace,
}

impl TrtResult {
    pub fn all_violations(&self) -> Vec<&Violation> {
        self.refinement_violations
            .iter()
            .chain(self.contract_violations.iter())
            .collect()
    }
}

/// Tooling violation for a baseline recorded under a different normalizer.
pub fn normalizer_mismatch_violation(baseline_version: &str, runtime_version: &str) -> Violation {
    Violation::new(
        "NORMALIZER_VERSION_MISMATCH",
        format!(
            "Baseline normalizer version {} does not match runtime version {}",
            baseline_version, runtime_version
        ),
        FailureClass::Tooling,
        0,
    )
    .with_expected(json!(runtime_version))
    .with_observed(json!(baseline_version))
    .with_hint("Re-record baselines with the current Trajectly version.")
}

static NON_ALNUM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-zA-Z0-9]+").unwrap());
static TOOL_CALL_INDEX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\.tool_calls\[(\d+)\]").unwrap());
static OPERATION_INDEX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\.operations\[(\d+)\]").unwrap());
static TOOL_NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\.tool_call\.([^.]+)\.").unwrap());
static PER_TOOL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\.tool_calls\.([^.]+)$").unwrap());

/// Upper-case a finding classification into its stable violation code.
fn code_from_classification(classification: &str) -> String {
    let normalized = NON_ALNUM_RE
        .replace_all(classification.trim(), "_")
        .trim_matches('_')
        .to_uppercase();
    if normalized.is_empty() {
        "CONTRACT_VIOLATION".to_string()
    } else {
        normalized
    }
}

/// Map a path-based contract finding back to a concrete event index so
/// witness resolution stays actionable for repro workflows.
fn event_index_from_finding(
    path: Option<&str>,
    baseline: Option<&Value>,
    call_tokens: &[(usize, String)],
    operations: &[(usize, String)],
    fallback_index: usize,
) -> usize {
    let path = match path {
        Some(path) => path,
        None => return fallback_index,
    };

    if let Some(captures) = TOOL_CALL_INDEX_RE.captures(path) {
        let idx: usize = captures[1].parse().unwrap_or(usize::MAX);
        return call_tokens
            .get(idx)
            .map(|(event_index, _)| *event_index)
            .unwrap_or(fallback_index);
    }

    if let Some(captures) = OPERATION_INDEX_RE.captures(path) {
        let idx: usize = captures[1].parse().unwrap_or(usize::MAX);
        return operations
            .get(idx)
            .map(|(event_index, _)| *event_index)
            .unwrap_or(fallback_index);
    }

    if let Some(captures) = TOOL_NAME_RE.captures(path) {
        let tool_name = &captures[1];
        return call_tokens
            .iter()
            .find(|(_, name)| name == tool_name)
            .map(|(event_index, _)| *event_index)
            .unwrap_or(fallback_index);
    }

    if let Some(captures) = PER_TOOL_RE.captures(path) {
        let tool_name = &captures[1];
        let matching: Vec<usize> = call_tokens
            .iter()
            .filter(|(_, name)| name == tool_name)
            .map(|(event_index, _)| *event_index)
            .collect();
        if !matching.is_empty() {
            if let Some(position) = baseline.and_then(Value::as_u64) {
                if (position as usize) < matching.len() {
                    return matching[position as usize];
                }
            }
            return *matching.last().unwrap();
        }
    }

    fallback_index
}

fn token_signature(kind: TokenKind, name: &str) -> String {
    match kind {
        TokenKind::Call => format!("tool:{}", name),
        TokenKind::LlmRequest => format!("llm:{}", name),
        TokenKind::Message => format!("step:{}", name),
        other => format!("other:{:?}:{}", other, name),
    }
}

fn build_contract_violations(
    current_events: &[TraceEvent],
    current_abstract: &AbstractTrace,
    spec: &AgentSpec,
) -> Vec<Violation> {
    let mut violations = Vec::new();

    let call_tokens: Vec<(usize, String)> = current_abstract
        .tokens
        .iter()
        .filter(|token| token.kind == TokenKind::Call)
        .map(|token| (token.event_index, token.name.clone()))
        .collect();
    let operations: Vec<(usize, String)> = current_abstract
        .tokens
        .iter()
        .map(|token| (token.event_index, token_signature(token.kind, &token.name)))
        .collect();
    let fallback_index = operations
        .last()
        .map(|(event_index, _)| *event_index)
        .unwrap_or(0);

    for finding in evaluate_contracts(current_events, &spec.contracts) {
        let event_index = event_index_from_finding(
            finding.path.as_deref(),
            finding.baseline.as_ref(),
            &call_tokens,
            &operations,
            fallback_index,
        );
        let mut violation = Violation::new(
            code_from_classification(&finding.classification),
            finding.message,
            FailureClass::Contract,
            event_index,
        );
        violation.expected = finding.baseline;
        violation.observed = finding.current;
        violations.push(violation);
    }

    // Replay-side fixture misses surface as synthetic error returns; lift
    // them into CONTRACT violations with the exact stable code.
    for (event_index, event) in current_events.iter().enumerate() {
        if !matches!(
            event.event_type,
            EventType::ToolReturned | EventType::LlmReturned
        ) {
            continue;
        }
        if event.payload.get("error_code").and_then(Value::as_str) != Some("FIXTURE_EXHAUSTED") {
            continue;
        }
        let details = event
            .payload
            .get("error_details")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let detail = |key: &str| details.get(key).cloned().unwrap_or(Value::Null);
        let message = event
            .payload
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("Replay fixture exhausted")
            .to_string();
        violations.push(
            Violation::new("FIXTURE_EXHAUSTED", message, FailureClass::Contract, event_index)
                .with_expected(json!({
                    "expected_signature": detail("expected_signature"),
                    "available_count": detail("available_count"),
                }))
                .with_observed(json!({
                    "consumed_count": detail("consumed_count"),
                    "tool_name": detail("tool_name"),
                    "llm_signature": detail("llm_signature"),
                }))
                .with_hint("Record new fixtures or adjust deterministic replay policy."),
        );
    }

    violations
}

fn build_report(
    status: TrtStatus,
    witness: Option<&WitnessResolution>,
    repro_command: Option<&str>,
    counterexample_paths: BTreeMap<String, String>,
    refinement_skeleton_vacuous: bool,
    legacy_compat: bool,
) -> TrtReport {
    let mut report = TrtReport::new(status);
    report.repro_command = repro_command.map(str::to_string);
    report.counterexample_paths = counterexample_paths;
    report.metadata.metadata.insert(
        "refinement_skeleton_vacuous".to_string(),
        json!(refinement_skeleton_vacuous),
    );
    report
        .metadata
        .metadata
        .insert("baseline_legacy_compat".to_string(), json!(legacy_compat));

    if let Some(witness) = witness {
        report.witness_index = Some(witness.witness_index);
        report.failure_class = Some(witness.primary_violation.failure_class);
        report.primary_violation = Some(witness.primary_violation.clone());
        report.all_violations_at_witness = witness.all_violations_at_witness.clone();
    }
    report
}

/// The single deterministic entry point: evaluate one current trace
/// against its baseline and spec, producing a verdict plus report.
pub fn evaluate_trt(
    baseline_events: &[TraceEvent],
    current_events: &[TraceEvent],
    spec: &AgentSpec,
    repro_command: Option<&str>,
    counterexample_paths: BTreeMap<String, String>,
) -> TrtResult {
    let abstraction_cfg = AbstractionConfig {
        ignore_call_tools: spec.refinement.ignore_call_tools.clone(),
        ..AbstractionConfig::default()
    };
    let baseline_abs = build_abstract_trace(baseline_events, &abstraction_cfg);
    let current_abs = build_abstract_trace(current_events, &abstraction_cfg);

    let contract_violations = build_contract_violations(current_events, &current_abs, spec);

    let side_effect_tools: BTreeSet<String> = SIDE_EFFECT_TOOL_REGISTRY_V1
        .iter()
        .map(|name| name.to_string())
        .collect();
    let ignore: BTreeSet<String> = spec.refinement.ignore_call_tools.iter().cloned().collect();
    let baseline_steps = extract_call_skeleton(&baseline_abs, &ignore);
    let current_steps = extract_call_skeleton(&current_abs, &ignore);
    let refinement_result = check_skeleton_refinement(
        &baseline_steps,
        &current_steps,
        &spec.refinement,
        &side_effect_tools,
    );

    let mut all_violations: Vec<Violation> = Vec::new();
    all_violations.extend(refinement_result.violations.iter().cloned());
    all_violations.extend(contract_violations.iter().cloned());

    // Invariants held by construction: PASS iff zero violations, and the
    // witness (present only on FAIL) anchors at the minimum event index.
    let witness = resolve_witness(&all_violations);
    let status = if all_violations.is_empty() {
        TrtStatus::Pass
    } else {
        TrtStatus::Fail
    };

    let report = build_report(
        status,
        witness.as_ref(),
        repro_command,
        counterexample_paths,
        refinement_result.refinement_skeleton_vacuous,
        spec.legacy_compat,
    );

    TrtResult {
        status,
        report,
        witness,
        contract_violations,
        refinement_violations: refinement_result.violations,
        abstraction_baseline: baseline_abs,
        abstraction_current: current_abs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_from_classification() {
        assert_eq!(
            code_from_classification("contract_tool_denied"),
            "CONTRACT_TOOL_DENIED"
        );
        assert_eq!(
            code_from_classification("contract_network_domain_denied"),
            "CONTRACT_NETWORK_DOMAIN_DENIED"
        );
        assert_eq!(code_from_classification("  "), "CONTRACT_VIOLATION");
    }

    #[test]
    fn test_event_index_resolver_patterns() {
        let call_tokens = vec![(2, "search".to_string()), (5, "checkout".to_string())];
        let operations = vec![
            (1, "step:plan".to_string()),
            (2, "tool:search".to_string()),
            (5, "tool:checkout".to_string()),
        ];

        assert_eq!(
            event_index_from_finding(Some("$.tool_calls[1]"), None, &call_tokens, &operations, 9),
            5
        );
        assert_eq!(
            event_index_from_finding(Some("$.operations[0]"), None, &call_tokens, &operations, 9),
            1
        );
        assert_eq!(
            event_index_from_finding(
                Some("$.tool_call.checkout.required_keys"),
                None,
                &call_tokens,
                &operations,
                9
            ),
            5
        );
        assert_eq!(
            event_index_from_finding(
                Some("$.tool_calls.search"),
                Some(&json!(0)),
                &call_tokens,
                &operations,
                9
            ),
            2
        );
        assert_eq!(
            event_index_from_finding(Some("$.operations"), None, &call_tokens, &operations, 9),
            9
        );
        assert_eq!(
            event_index_from_finding(Some("$.tool_calls[99]"), None, &call_tokens, &operations, 9),
            9
        );
    }

    #[test]
    fn test_normalizer_mismatch_violation_shape() {
        let violation = normalizer_mismatch_violation("0", "1");
        assert_eq!(violation.code, "NORMALIZER_VERSION_MISMATCH");
        assert_eq!(violation.failure_class, FailureClass::Tooling);
        assert_eq!(violation.event_index, 0);
    }
}
