use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Failure class of a violation. The witness tie-break ranks
/// REFINEMENT < CONTRACT < TOOLING; unknown classes rank last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureClass {
    Refinement,
    Contract,
    Tooling,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::Refinement => "REFINEMENT",
            FailureClass::Contract => "CONTRACT",
            FailureClass::Tooling => "TOOLING",
        }
    }

    /// Deterministic witness ordering rank.
    pub fn rank(&self) -> usize {
        match self {
            FailureClass::Refinement => 0,
            FailureClass::Contract => 1,
            FailureClass::Tooling => 2,
        }
    }
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single obligation failure, anchored at the event it points at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub code: String,
    pub message: String,
    pub failure_class: FailureClass,
    pub event_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl Violation {
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
        failure_class: FailureClass,
        event_index: usize,
    ) -> Violation {
        Violation {
            code: code.into(),
            message: message.into(),
            failure_class,
            event_index,
            expected: None,
            observed: None,
            hint: None,
        }
    }

    pub fn with_expected(mut self, expected: Value) -> Violation {
        self.expected = Some(expected);
        self
    }

    pub fn with_observed(mut self, observed: Value) -> Violation {
        self.observed = Some(observed);
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Violation {
        self.hint = Some(hint.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_class_serializes_uppercase() {
        let json = serde_json::to_string(&FailureClass::Refinement).unwrap();
        assert_eq!(json, "\"REFINEMENT\"");
    }

    #[test]
    fn test_violation_skips_absent_fields() {
        let violation = Violation::new("CONTRACT_TOOL_DENIED", "denied", FailureClass::Contract, 3);
        let value = serde_json::to_value(&violation).unwrap();
        assert!(value.get("expected").is_none());
        assert!(value.get("hint").is_none());
        assert_eq!(value["event_index"], 3);
    }
}
