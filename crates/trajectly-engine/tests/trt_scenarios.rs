//! End-to-end scenarios for `evaluate_trt`: verdicts, witness resolution,
//! fixture-exhaustion lifting, and shrink interaction.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::json;

use trajectly_engine::{ddmin_shrink, evaluate_trt};
use trajectly_testing::{TraceBuilder, spec_from_json, spec_with_contracts, tool_exchange};
use trajectly_types::{FailureClass, TraceEvent, TrtStatus};

fn simple_add_run() -> Vec<TraceEvent> {
    let mut builder = TraceBuilder::new("run-1");
    tool_exchange(
        &mut builder,
        "add",
        json!({"args": [1, 2], "kwargs": {}}),
        json!(3),
    );
    builder.finish(0)
}

#[test]
fn test_pass_on_identical_replay() {
    let baseline = simple_add_run();
    let current = simple_add_run();
    let spec = spec_with_contracts(json!({"tools": {"allow": ["add"]}}));

    let result = evaluate_trt(&baseline, &current, &spec, None, BTreeMap::new());
    assert_eq!(result.status, TrtStatus::Pass);
    assert!(result.all_violations().is_empty());
    assert!(result.report.witness_index.is_none());
    assert!(result.report.failure_class.is_none());
}

#[test]
fn test_denied_tool_fails_at_call_index() {
    let baseline = {
        let mut builder = TraceBuilder::new("run-1");
        tool_exchange(&mut builder, "search", json!({"args": [], "kwargs": {}}), json!([]));
        builder.finish(0)
    };
    let current = {
        let mut builder = TraceBuilder::new("run-2");
        tool_exchange(&mut builder, "search", json!({"args": [], "kwargs": {}}), json!([]));
        builder.tool_call("delete_account", json!({"args": [], "kwargs": {}}));
        builder.finish(0)
    };
    let spec = spec_from_json(json!({
        "schema_version": "0.4",
        "name": "deny-spec",
        "command": "true",
        "contracts": {"tools": {"deny": ["delete_account"]}},
        "refinement": {"mode": "none"},
    }));

    let result = evaluate_trt(&baseline, &current, &spec, None, BTreeMap::new());
    assert_eq!(result.status, TrtStatus::Fail);
    assert_eq!(result.report.witness_index, Some(3));
    let primary = result.report.primary_violation.as_ref().unwrap();
    assert_eq!(primary.code, "CONTRACT_TOOL_DENIED");
    assert_eq!(primary.failure_class, FailureClass::Contract);
}

#[test]
fn test_refinement_outranks_contract_at_same_index() {
    let baseline = {
        let mut builder = TraceBuilder::new("run-1");
        tool_exchange(&mut builder, "search", json!({"args": [], "kwargs": {}}), json!([]));
        builder.finish(0)
    };
    let current = {
        let mut builder = TraceBuilder::new("run-2");
        tool_exchange(&mut builder, "search", json!({"args": [], "kwargs": {}}), json!([]));
        builder.tool_call("delete_account", json!({"args": [], "kwargs": {}}));
        builder.finish(0)
    };
    let spec = spec_from_json(json!({
        "schema_version": "0.4",
        "name": "tiebreak-spec",
        "command": "true",
        "contracts": {"tools": {"deny": ["delete_account"]}},
        "refinement": {"mode": "skeleton"},
    }));

    let result = evaluate_trt(&baseline, &current, &spec, None, BTreeMap::new());
    assert_eq!(result.status, TrtStatus::Fail);
    assert_eq!(result.report.witness_index, Some(3));
    // Both classes collide at index 3; REFINEMENT (rank 0) wins.
    let primary = result.report.primary_violation.as_ref().unwrap();
    assert_eq!(primary.failure_class, FailureClass::Refinement);
    let classes: Vec<FailureClass> = result
        .report
        .all_violations_at_witness
        .iter()
        .map(|violation| violation.failure_class)
        .collect();
    assert!(classes.contains(&FailureClass::Contract));
}

#[test]
fn test_fixture_exhausted_lifted_as_contract() {
    let baseline = simple_add_run();
    let current = {
        let mut builder = TraceBuilder::new("run-2");
        tool_exchange(&mut builder, "add", json!({"args": [1, 2], "kwargs": {}}), json!(3));
        builder.tool_call("add", json!({"args": [1, 2], "kwargs": {}}));
        builder.tool_error(
            "add",
            "FIXTURE_EXHAUSTED",
            json!({
                "expected_signature": "abc123",
                "consumed_count": 1,
                "available_count": 1,
                "tool_name": "add",
            }),
        );
        builder.finish(1)
    };
    let spec = spec_from_json(json!({
        "schema_version": "0.4",
        "name": "fixture-spec",
        "command": "true",
        "refinement": {"mode": "none"},
    }));

    let result = evaluate_trt(&baseline, &current, &spec, None, BTreeMap::new());
    assert_eq!(result.status, TrtStatus::Fail);
    let primary = result.report.primary_violation.as_ref().unwrap();
    assert_eq!(primary.code, "FIXTURE_EXHAUSTED");
    assert_eq!(primary.failure_class, FailureClass::Contract);
    // Anchored at the synthetic tool_returned event.
    assert_eq!(result.report.witness_index, Some(4));
}

#[test]
fn test_network_block_substring_detected() {
    let baseline = simple_add_run();
    let current = {
        let mut builder = TraceBuilder::new("run-2");
        tool_exchange(&mut builder, "add", json!({"args": [1, 2], "kwargs": {}}), json!(3));
        builder.finish_with(json!({
            "returncode": 1,
            "duration_ms": 9,
            "stdout_tail": "",
            "stderr_tail": "Trajectly replay mode blocks network access. Use recorded fixtures. (host=evil.example)",
        }))
    };
    let spec = spec_with_contracts(json!({
        "network": {"default": "deny", "allowlist": ["api.good.example"]},
    }));

    let result = evaluate_trt(&baseline, &current, &spec, None, BTreeMap::new());
    assert_eq!(result.status, TrtStatus::Fail);
    let codes: Vec<&str> = result
        .all_violations()
        .iter()
        .map(|violation| violation.code.as_str())
        .collect();
    assert!(codes.contains(&"CONTRACT_NETWORK_ALLOWLIST_BLOCKED"));
}

#[test]
fn test_empty_baseline_skeleton_vacuous_but_contracts_active() {
    let baseline = TraceBuilder::new("run-1").finish(0);
    let current = {
        let mut builder = TraceBuilder::new("run-2");
        builder.tool_call("rm_all", json!({"args": [], "kwargs": {}}));
        builder.finish(0)
    };
    let spec = spec_with_contracts(json!({"tools": {"deny": ["rm_all"]}}));

    let result = evaluate_trt(&baseline, &current, &spec, None, BTreeMap::new());
    assert_eq!(result.status, TrtStatus::Fail);
    assert!(result.refinement_violations.is_empty());
    assert_eq!(
        result.report.metadata.metadata.get("refinement_skeleton_vacuous"),
        Some(&json!(true))
    );
    assert_eq!(
        result.report.primary_violation.as_ref().unwrap().code,
        "CONTRACT_TOOL_DENIED"
    );
}

#[test]
fn test_empty_current_trace_missing_baseline_call_at_zero() {
    let baseline = simple_add_run();
    let current: Vec<TraceEvent> = Vec::new();
    let spec = spec_from_json(json!({
        "schema_version": "0.4",
        "name": "empty-current",
        "command": "true",
    }));

    let result = evaluate_trt(&baseline, &current, &spec, None, BTreeMap::new());
    assert_eq!(result.status, TrtStatus::Fail);
    let primary = result.report.primary_violation.as_ref().unwrap();
    assert_eq!(primary.code, "REFINEMENT_BASELINE_CALL_MISSING");
    assert_eq!(result.report.witness_index, Some(0));
}

#[test]
fn test_determinism_repeated_evaluation() {
    let baseline = simple_add_run();
    let current = {
        let mut builder = TraceBuilder::new("run-2");
        tool_exchange(&mut builder, "add", json!({"args": [1, 2], "kwargs": {}}), json!(3));
        builder.tool_call("send_email", json!({"args": [], "kwargs": {"to": "a@b.co"}}));
        builder.finish(0)
    };
    let spec = spec_with_contracts(json!({"tools": {"deny": ["send_email"]}}));

    let first = evaluate_trt(&baseline, &current, &spec, None, BTreeMap::new());
    let second = evaluate_trt(&baseline, &current, &spec, None, BTreeMap::new());

    assert_eq!(first.status, second.status);
    assert_eq!(first.report.witness_index, second.report.witness_index);
    let codes = |result: &trajectly_engine::TrtResult| -> Vec<String> {
        result
            .all_violations()
            .iter()
            .map(|violation| violation.code.clone())
            .collect()
    };
    assert_eq!(codes(&first), codes(&second));
}

#[test]
fn test_prefix_sufficiency() {
    let baseline = simple_add_run();
    let current = {
        let mut builder = TraceBuilder::new("run-2");
        tool_exchange(&mut builder, "add", json!({"args": [1, 2], "kwargs": {}}), json!(3));
        builder.tool_call("delete_account", json!({"args": [], "kwargs": {}}));
        builder.tool_return("delete_account", json!(true));
        builder.finish(0)
    };
    let spec = spec_from_json(json!({
        "schema_version": "0.4",
        "name": "prefix-spec",
        "command": "true",
        "contracts": {"tools": {"deny": ["delete_account"]}},
        "refinement": {"mode": "none"},
    }));

    let full = evaluate_trt(&baseline, &current, &spec, None, BTreeMap::new());
    assert_eq!(full.status, TrtStatus::Fail);
    let witness_index = full.report.witness_index.unwrap();
    let original_class = full.report.failure_class.unwrap();

    let prefix: Vec<TraceEvent> = current[..=witness_index].to_vec();
    let truncated = evaluate_trt(&baseline, &prefix, &spec, None, BTreeMap::new());
    assert_eq!(truncated.status, TrtStatus::Fail);
    assert_eq!(truncated.report.failure_class, Some(original_class));
}

#[test]
fn test_shrink_preserves_failure_class() {
    let baseline = simple_add_run();
    let current = {
        let mut builder = TraceBuilder::new("run-2");
        for index in 0..8 {
            tool_exchange(
                &mut builder,
                "add",
                json!({"args": [index, index], "kwargs": {}}),
                json!(index * 2),
            );
        }
        builder.tool_call("delete_account", json!({"args": [], "kwargs": {}}));
        builder.tool_return("delete_account", json!(true));
        builder.finish(0)
    };
    assert!(current.len() >= 19);

    let spec = spec_from_json(json!({
        "schema_version": "0.4",
        "name": "shrink-spec",
        "command": "true",
        "contracts": {"tools": {"deny": ["delete_account"]}},
        "refinement": {"mode": "none"},
    }));

    let original = evaluate_trt(&baseline, &current, &spec, None, BTreeMap::new());
    assert_eq!(original.status, TrtStatus::Fail);
    let original_class = original.report.failure_class.unwrap();

    let shrink = ddmin_shrink(
        &current,
        |candidate| {
            let result = evaluate_trt(&baseline, candidate, &spec, None, BTreeMap::new());
            result.status == TrtStatus::Fail && result.report.failure_class == Some(original_class)
        },
        Duration::from_secs(10),
        200,
    )
    .unwrap();

    assert!(shrink.reduced_len <= current.len());
    let reduced = evaluate_trt(&baseline, &shrink.reduced_events, &spec, None, BTreeMap::new());
    assert_eq!(reduced.status, TrtStatus::Fail);
    assert_eq!(reduced.report.failure_class, Some(original_class));
}

#[test]
fn test_witness_minimality_across_classes() {
    let baseline = {
        let mut builder = TraceBuilder::new("run-1");
        tool_exchange(&mut builder, "search", json!({"args": [], "kwargs": {}}), json!([]));
        builder.finish(0)
    };
    let current = {
        let mut builder = TraceBuilder::new("run-2");
        // Denied call early, refinement-relevant extra call later.
        builder.tool_call("audit_log", json!({"args": [], "kwargs": {}}));
        tool_exchange(&mut builder, "search", json!({"args": [], "kwargs": {}}), json!([]));
        builder.tool_call("checkout", json!({"args": [], "kwargs": {}}));
        builder.finish(0)
    };
    let spec = spec_with_contracts(json!({"tools": {"deny": ["audit_log"]}}));

    let result = evaluate_trt(&baseline, &current, &spec, None, BTreeMap::new());
    let min_index = result
        .all_violations()
        .iter()
        .map(|violation| violation.event_index)
        .min()
        .unwrap();
    assert_eq!(result.report.witness_index, Some(min_index));
    assert_eq!(result.report.witness_index, Some(1));
}

#[test]
fn test_ignored_tools_skip_refinement_and_skeleton() {
    let baseline = {
        let mut builder = TraceBuilder::new("run-1");
        tool_exchange(&mut builder, "search", json!({"args": [], "kwargs": {}}), json!([]));
        builder.finish(0)
    };
    let current = {
        let mut builder = TraceBuilder::new("run-2");
        tool_exchange(&mut builder, "search", json!({"args": [], "kwargs": {}}), json!([]));
        builder.tool_call("trace_log", json!({"args": [], "kwargs": {}}));
        builder.finish(0)
    };
    let spec = spec_from_json(json!({
        "schema_version": "0.4",
        "name": "ignore-spec",
        "command": "true",
        "refinement": {"mode": "skeleton", "ignore_call_tools": ["trace_log"]},
    }));

    let result = evaluate_trt(&baseline, &current, &spec, None, BTreeMap::new());
    assert_eq!(result.status, TrtStatus::Pass);
}
