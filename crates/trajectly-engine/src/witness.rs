//! Witness resolution: the canonical proof of failure.
//!
//! The witness index is the minimum event index over all violations; the
//! primary violation is chosen by (class rank, code) so the tie-break is a
//! total order independent of accumulation order.

use trajectly_types::Violation;

#[derive(Debug, Clone)]
pub struct WitnessResolution {
    pub witness_index: usize,
    pub primary_violation: Violation,
    pub all_violations_at_witness: Vec<Violation>,
}

pub fn resolve_witness(violations: &[Violation]) -> Option<WitnessResolution> {
    let witness_index = violations
        .iter()
        .map(|violation| violation.event_index)
        .min()?;

    let mut at_witness: Vec<Violation> = violations
        .iter()
        .filter(|violation| violation.event_index == witness_index)
        .cloned()
        .collect();
    at_witness.sort_by(|a, b| {
        (a.failure_class.rank(), a.code.as_str()).cmp(&(b.failure_class.rank(), b.code.as_str()))
    });

    Some(WitnessResolution {
        witness_index,
        primary_violation: at_witness[0].clone(),
        all_violations_at_witness: at_witness,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use trajectly_types::FailureClass;

    fn violation(code: &str, class: FailureClass, index: usize) -> Violation {
        Violation::new(code, code.to_lowercase(), class, index)
    }

    #[test]
    fn test_empty_has_no_witness() {
        assert!(resolve_witness(&[]).is_none());
    }

    #[test]
    fn test_minimum_index_wins() {
        let violations = vec![
            violation("CONTRACT_TOOL_DENIED", FailureClass::Contract, 7),
            violation("REFINEMENT_EXTRA_TOOL_CALL", FailureClass::Refinement, 3),
        ];
        let witness = resolve_witness(&violations).unwrap();
        assert_eq!(witness.witness_index, 3);
        assert_eq!(witness.primary_violation.code, "REFINEMENT_EXTRA_TOOL_CALL");
    }

    #[test]
    fn test_class_rank_breaks_ties() {
        let violations = vec![
            violation("CONTRACT_TOOL_DENIED", FailureClass::Contract, 3),
            violation("REFINEMENT_EXTRA_TOOL_CALL", FailureClass::Refinement, 3),
            violation("NORMALIZER_VERSION_MISMATCH", FailureClass::Tooling, 3),
        ];
        let witness = resolve_witness(&violations).unwrap();
        assert_eq!(witness.primary_violation.failure_class, FailureClass::Refinement);
        let codes: Vec<&str> = witness
            .all_violations_at_witness
            .iter()
            .map(|violation| violation.code.as_str())
            .collect();
        assert_eq!(
            codes,
            vec![
                "REFINEMENT_EXTRA_TOOL_CALL",
                "CONTRACT_TOOL_DENIED",
                "NORMALIZER_VERSION_MISMATCH",
            ]
        );
    }

    #[test]
    fn test_code_breaks_ties_within_class() {
        let violations = vec![
            violation("CONTRACT_TOOL_NOT_ALLOWED", FailureClass::Contract, 2),
            violation("CONTRACT_TOOL_DENIED", FailureClass::Contract, 2),
        ];
        let witness = resolve_witness(&violations).unwrap();
        assert_eq!(witness.primary_violation.code, "CONTRACT_TOOL_DENIED");
    }
}
