//! Skeleton refinement checker.
//!
//! Verifies the refinement preorder: baseline call names must embed as a
//! subsequence of the current call names, and every extra call must be
//! permitted by policy. The subsequence scan is greedy left-to-right, which
//! is optimal here: consuming the earliest possible match maximizes the
//! room left for later matches. An empty baseline skeleton is vacuously
//! satisfied (contracts remain the only active obligations).

use std::collections::BTreeSet;

use serde_json::json;

use trajectly_types::{FailureClass, RefinementConfig, RefinementMode, Violation};

use crate::skeleton::SkeletonStep;

#[derive(Debug, Clone)]
pub struct RefinementCheckResult {
    pub violations: Vec<Violation>,
    pub refinement_skeleton_vacuous: bool,
}

/// Greedy O(|baseline| + |current|) subsequence check.
///
/// Returns (matched, match_indices, first_missing_name).
fn subsequence_with_matches(
    baseline_names: &[&str],
    current_names: &[&str],
) -> (bool, Vec<usize>, Option<String>) {
    let mut matches = Vec::new();
    let mut baseline_idx = 0;
    let mut current_idx = 0;

    while baseline_idx < baseline_names.len() && current_idx < current_names.len() {
        if baseline_names[baseline_idx] == current_names[current_idx] {
            matches.push(current_idx);
            baseline_idx += 1;
        }
        current_idx += 1;
    }

    if baseline_idx == baseline_names.len() {
        (true, matches, None)
    } else {
        (false, matches, Some(baseline_names[baseline_idx].to_string()))
    }
}

pub fn check_skeleton_refinement(
    baseline_steps: &[SkeletonStep],
    current_steps: &[SkeletonStep],
    policy: &RefinementConfig,
    side_effect_tools: &BTreeSet<String>,
) -> RefinementCheckResult {
    if policy.mode == RefinementMode::None {
        return RefinementCheckResult {
            violations: Vec::new(),
            refinement_skeleton_vacuous: false,
        };
    }

    let baseline_names: Vec<&str> = baseline_steps
        .iter()
        .map(|step| step.tool_name.as_str())
        .collect();
    let current_names: Vec<&str> = current_steps
        .iter()
        .map(|step| step.tool_name.as_str())
        .collect();

    if baseline_names.is_empty() {
        return RefinementCheckResult {
            violations: Vec::new(),
            refinement_skeleton_vacuous: true,
        };
    }

    // Strict mode forbids any non-matching call regardless of allow-lists.
    let strict = policy.mode == RefinementMode::Strict;
    let allowed_extra: BTreeSet<&str> = if strict {
        BTreeSet::new()
    } else {
        policy.allow_extra_tools.iter().map(String::as_str).collect()
    };
    let allowed_extra_side_effect: BTreeSet<&str> = if strict {
        BTreeSet::new()
    } else {
        policy
            .allow_extra_side_effect_tools
            .iter()
            .map(String::as_str)
            .collect()
    };
    let allow_new_tool_names = !strict && policy.allow_new_tool_names;

    let mut violations = Vec::new();
    let (matched, matched_indices, first_missing) =
        subsequence_with_matches(&baseline_names, &current_names);
    if !matched {
        let event_index = current_steps.last().map(|step| step.event_index).unwrap_or(0);
        violations.push(
            Violation::new(
                "REFINEMENT_BASELINE_CALL_MISSING",
                format!(
                    "Baseline skeleton call missing in current run: {}",
                    first_missing.as_deref().unwrap_or("unknown")
                ),
                FailureClass::Refinement,
                event_index,
            )
            .with_expected(json!(first_missing))
            .with_observed(json!(current_names))
            .with_hint("Ensure baseline-required tool protocol remains a subsequence."),
        );
    }

    let matched_set: BTreeSet<usize> = matched_indices.into_iter().collect();
    let baseline_tool_set: BTreeSet<&str> = baseline_names.iter().copied().collect();

    for (index, step) in current_steps.iter().enumerate() {
        if matched_set.contains(&index) {
            continue;
        }

        let tool_name = step.tool_name.as_str();
        if !allowed_extra.contains(tool_name) {
            violations.push(
                Violation::new(
                    "REFINEMENT_EXTRA_TOOL_CALL",
                    format!("Extra tool call not allowed by refinement policy: {}", tool_name),
                    FailureClass::Refinement,
                    step.event_index,
                )
                .with_expected(json!(allowed_extra.iter().collect::<Vec<_>>()))
                .with_observed(json!(tool_name))
                .with_hint("Add tool to refinement.allow_extra_tools or remove the extra call."),
            );
        }

        if side_effect_tools.contains(tool_name) && !allowed_extra_side_effect.contains(tool_name) {
            violations.push(
                Violation::new(
                    "REFINEMENT_EXTRA_SIDE_EFFECT_CALL",
                    format!("Extra side-effect tool call not allowed: {}", tool_name),
                    FailureClass::Refinement,
                    step.event_index,
                )
                .with_expected(json!(allowed_extra_side_effect.iter().collect::<Vec<_>>()))
                .with_observed(json!(tool_name))
                .with_hint("Allow explicitly via refinement.allow_extra_side_effect_tools."),
            );
        }

        if !allow_new_tool_names
            && !baseline_tool_set.contains(tool_name)
            && !allowed_extra.contains(tool_name)
        {
            let mut permitted: Vec<&str> = baseline_tool_set.union(&allowed_extra).copied().collect();
            permitted.sort();
            violations.push(
                Violation::new(
                    "REFINEMENT_NEW_TOOL_NAME_FORBIDDEN",
                    format!("New tool name not permitted by refinement policy: {}", tool_name),
                    FailureClass::Refinement,
                    step.event_index,
                )
                .with_expected(json!(permitted))
                .with_observed(json!(tool_name))
                .with_hint("Set refinement.allow_new_tool_names=true or update allow_extra_tools."),
            );
        }
    }

    RefinementCheckResult {
        violations,
        refinement_skeleton_vacuous: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trajectly_types::SIDE_EFFECT_TOOL_REGISTRY_V1;

    fn steps(names: &[&str]) -> Vec<SkeletonStep> {
        names
            .iter()
            .enumerate()
            .map(|(index, name)| SkeletonStep {
                event_index: index + 1,
                tool_name: name.to_string(),
            })
            .collect()
    }

    fn registry() -> BTreeSet<String> {
        SIDE_EFFECT_TOOL_REGISTRY_V1
            .iter()
            .map(|name| name.to_string())
            .collect()
    }

    #[test]
    fn test_identical_skeletons_pass() {
        let policy = RefinementConfig::default();
        let result = check_skeleton_refinement(
            &steps(&["search", "add"]),
            &steps(&["search", "add"]),
            &policy,
            &registry(),
        );
        assert!(result.violations.is_empty());
        assert!(!result.refinement_skeleton_vacuous);
    }

    #[test]
    fn test_empty_baseline_is_vacuous() {
        let policy = RefinementConfig::default();
        let result =
            check_skeleton_refinement(&steps(&[]), &steps(&["anything"]), &policy, &registry());
        assert!(result.violations.is_empty());
        assert!(result.refinement_skeleton_vacuous);
    }

    #[test]
    fn test_mode_none_skips() {
        let policy = RefinementConfig {
            mode: RefinementMode::None,
            ..RefinementConfig::default()
        };
        let result =
            check_skeleton_refinement(&steps(&["a"]), &steps(&[]), &policy, &registry());
        assert!(result.violations.is_empty());
        assert!(!result.refinement_skeleton_vacuous);
    }

    #[test]
    fn test_missing_baseline_call() {
        let policy = RefinementConfig::default();
        let result = check_skeleton_refinement(
            &steps(&["search", "checkout"]),
            &steps(&["search"]),
            &policy,
            &registry(),
        );
        let codes: Vec<&str> = result
            .violations
            .iter()
            .map(|violation| violation.code.as_str())
            .collect();
        assert!(codes.contains(&"REFINEMENT_BASELINE_CALL_MISSING"));
        // Anchored at the last current call.
        assert_eq!(result.violations[0].event_index, 1);
    }

    #[test]
    fn test_empty_current_with_nonempty_baseline_anchors_at_zero() {
        let policy = RefinementConfig::default();
        let result =
            check_skeleton_refinement(&steps(&["search"]), &steps(&[]), &policy, &registry());
        assert_eq!(result.violations.len(), 1);
        assert_eq!(result.violations[0].code, "REFINEMENT_BASELINE_CALL_MISSING");
        assert_eq!(result.violations[0].event_index, 0);
    }

    #[test]
    fn test_extra_call_violations() {
        let policy = RefinementConfig::default();
        let result = check_skeleton_refinement(
            &steps(&["search"]),
            &steps(&["search", "send_email"]),
            &policy,
            &registry(),
        );
        let codes: Vec<&str> = result
            .violations
            .iter()
            .map(|violation| violation.code.as_str())
            .collect();
        assert_eq!(
            codes,
            vec![
                "REFINEMENT_EXTRA_TOOL_CALL",
                "REFINEMENT_EXTRA_SIDE_EFFECT_CALL",
                "REFINEMENT_NEW_TOOL_NAME_FORBIDDEN",
            ]
        );
    }

    #[test]
    fn test_allow_lists_permit_extra_calls() {
        let policy = RefinementConfig {
            allow_extra_tools: vec!["send_email".to_string()],
            allow_extra_side_effect_tools: vec!["send_email".to_string()],
            ..RefinementConfig::default()
        };
        let result = check_skeleton_refinement(
            &steps(&["search"]),
            &steps(&["search", "send_email"]),
            &policy,
            &registry(),
        );
        assert!(result.violations.is_empty());
    }

    #[test]
    fn test_strict_mode_ignores_allow_lists() {
        let policy = RefinementConfig {
            mode: RefinementMode::Strict,
            allow_extra_tools: vec!["log".to_string()],
            allow_new_tool_names: true,
            ..RefinementConfig::default()
        };
        let result = check_skeleton_refinement(
            &steps(&["search"]),
            &steps(&["search", "log"]),
            &policy,
            &registry(),
        );
        assert!(
            result
                .violations
                .iter()
                .any(|violation| violation.code == "REFINEMENT_EXTRA_TOOL_CALL")
        );
    }

    #[test]
    fn test_repeated_names_match_greedily() {
        let policy = RefinementConfig {
            allow_extra_tools: vec!["search".to_string()],
            ..RefinementConfig::default()
        };
        // Baseline [search, search] embeds into [search, add, search, search];
        // the third search is extra but allowed.
        let result = check_skeleton_refinement(
            &steps(&["search", "search"]),
            &steps(&["search", "add", "search", "search"]),
            &policy,
            &registry(),
        );
        let codes: Vec<&str> = result
            .violations
            .iter()
            .map(|violation| violation.code.as_str())
            .collect();
        assert_eq!(
            codes,
            vec![
                "REFINEMENT_EXTRA_TOOL_CALL",
                "REFINEMENT_NEW_TOOL_NAME_FORBIDDEN",
            ]
        );
        // Both findings point at the unmatched `add`.
        assert!(result.violations.iter().all(|violation| violation.event_index == 2));
    }
}
