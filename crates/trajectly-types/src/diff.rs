use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One diff-report finding. `classification` is a stable lowercase slug;
/// the TRT layer upper-cases it into a violation code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub classification: String,
    pub message: String,
    pub severity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<Value>,
}

impl Finding {
    pub fn new(classification: impl Into<String>, message: impl Into<String>) -> Finding {
        Finding {
            classification: classification.into(),
            message: message.into(),
            severity: "error".to_string(),
            path: None,
            baseline: None,
            current: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Finding {
        self.path = Some(path.into());
        self
    }

    pub fn with_baseline(mut self, baseline: Value) -> Finding {
        self.baseline = Some(baseline);
        self
    }

    pub fn with_current(mut self, current: Value) -> Finding {
        self.current = Some(current);
        self
    }
}

/// First point where baseline and current traces disagree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirstDivergence {
    pub kind: String,
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<Value>,
}

/// Per-trace budget totals surfaced in the diff summary.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TraceTotals {
    pub duration_ms: i64,
    pub tool_calls: usize,
    pub tokens: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffSummary {
    pub regression: bool,
    pub finding_count: usize,
    pub classifications: BTreeMap<String, usize>,
    pub first_divergence: Option<FirstDivergence>,
    pub baseline: TraceTotals,
    pub current: TraceTotals,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffResult {
    pub summary: DiffSummary,
    pub findings: Vec<Finding>,
}

impl DiffResult {
    /// Recompute the derived summary fields after findings were appended.
    pub fn refresh_summary(&mut self) {
        let mut classifications: BTreeMap<String, usize> = BTreeMap::new();
        for finding in &self.findings {
            *classifications
                .entry(finding.classification.clone())
                .or_insert(0) += 1;
        }
        self.summary.regression = !self.findings.is_empty();
        self.summary.finding_count = self.findings.len();
        self.summary.classifications = classifications;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_summary_counts_classifications() {
        let mut result = DiffResult {
            summary: DiffSummary {
                regression: false,
                finding_count: 0,
                classifications: BTreeMap::new(),
                first_divergence: None,
                baseline: TraceTotals::default(),
                current: TraceTotals::default(),
            },
            findings: vec![
                Finding::new("budget_breach", "x"),
                Finding::new("budget_breach", "y"),
                Finding::new("sequence_mismatch", "z"),
            ],
        };
        result.refresh_summary();
        assert!(result.summary.regression);
        assert_eq!(result.summary.finding_count, 3);
        assert_eq!(result.summary.classifications["budget_breach"], 2);
    }
}
