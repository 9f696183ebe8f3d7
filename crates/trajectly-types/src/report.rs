use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::{
    NORMALIZER_VERSION, REPORT_SCHEMA_VERSION, SIDE_EFFECT_REGISTRY_VERSION,
};
use crate::error::{Error, Result};
use crate::violation::{FailureClass, Violation};

/// TRT verdict for one evaluated run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrtStatus {
    Pass,
    Fail,
    Error,
}

impl TrtStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrtStatus::Pass => "PASS",
            TrtStatus::Fail => "FAIL",
            TrtStatus::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ShrinkStats {
    pub original_len: usize,
    pub reduced_len: usize,
    pub iterations: usize,
    pub seconds: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrtReportMetadata {
    pub report_schema_version: String,
    pub normalizer_version: String,
    pub side_effect_registry_version: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Default for TrtReportMetadata {
    fn default() -> Self {
        TrtReportMetadata {
            report_schema_version: REPORT_SCHEMA_VERSION.to_string(),
            normalizer_version: NORMALIZER_VERSION.to_string(),
            side_effect_registry_version: SIDE_EFFECT_REGISTRY_VERSION.to_string(),
            metadata: Map::new(),
        }
    }
}

/// Versioned TRT report, nested under the diff report as `trt_v04`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrtReport {
    pub metadata: TrtReportMetadata,
    pub status: TrtStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_class: Option<FailureClass>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub witness_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_violation: Option<Violation>,
    #[serde(default)]
    pub all_violations_at_witness: Vec<Violation>,
    pub counterexample_paths: std::collections::BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repro_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shrink_stats: Option<ShrinkStats>,
}

impl TrtReport {
    pub fn new(status: TrtStatus) -> TrtReport {
        TrtReport {
            metadata: TrtReportMetadata::default(),
            status,
            failure_class: None,
            witness_index: None,
            primary_violation: None,
            all_violations_at_witness: Vec::new(),
            counterexample_paths: std::collections::BTreeMap::new(),
            repro_command: None,
            shrink_stats: None,
        }
    }
}

/// On-disk repro artifact: everything needed to re-run and inspect a
/// failure without the original terminal session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReproArtifact {
    pub schema_version: String,
    pub spec: String,
    pub slug: String,
    pub spec_path: String,
    pub first_divergence: Option<Value>,
    pub finding_count: usize,
    pub regression: bool,
    pub report_json: String,
    pub report_md: String,
    pub repro_command: String,
    pub baseline_min_trace: String,
    pub current_min_trace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trt_status: Option<TrtStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trt_failure_class: Option<FailureClass>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trt_witness_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trt_counterexample_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trt_counterexample_reduced: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trt_shrink_stats: Option<ShrinkStats>,
}

/// Cross-spec aggregate written after every `run`, one row per spec.
/// Rows stay schemaless (JSON objects) so the shrinker can update them in
/// place without losing forward-compatible fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatestRunReport {
    pub schema_version: String,
    pub trt_mode: bool,
    pub processed_specs: usize,
    pub regressions: usize,
    pub errors: Vec<String>,
    pub reports: Vec<Value>,
}

impl LatestRunReport {
    /// Validate the shape constraints that loose JSON cannot express.
    pub fn validate(value: &Value) -> Result<LatestRunReport> {
        let map = value
            .as_object()
            .ok_or_else(|| Error::Validation("Latest report must be an object".to_string()))?;
        for key in ["processed_specs", "regressions"] {
            if map.get(key).and_then(Value::as_u64).is_none() {
                return Err(Error::Validation(format!(
                    "Latest report requires non-negative integer `{}`",
                    key
                )));
            }
        }
        if !map.get("errors").map(Value::is_array).unwrap_or(false) {
            return Err(Error::Validation(
                "Latest report requires list field `errors`".to_string(),
            ));
        }
        if !map.get("reports").map(Value::is_array).unwrap_or(false) {
            return Err(Error::Validation(
                "Latest report requires list field `reports`".to_string(),
            ));
        }
        serde_json::from_value(value.clone())
            .map_err(|err| Error::Validation(format!("Latest report payload invalid: {}", err)))
    }
}

/// Outcome of a record/run/shrink command, carrying the process exit code.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub exit_code: i32,
    pub processed_specs: usize,
    pub regressions: usize,
    pub errors: Vec<String>,
    pub latest_report_json: Option<PathBuf>,
    pub latest_report_md: Option<PathBuf>,
}

impl CommandOutcome {
    pub fn error(exit_code: i32, errors: Vec<String>) -> CommandOutcome {
        CommandOutcome {
            exit_code,
            processed_specs: 0,
            regressions: 0,
            errors,
            latest_report_json: None,
            latest_report_md: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_report_serializes_sparse() {
        let report = TrtReport::new(TrtStatus::Pass);
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["status"], "PASS");
        assert!(value.get("failure_class").is_none());
        assert!(value.get("witness_index").is_none());
        assert_eq!(value["metadata"]["report_schema_version"], "0.4");
    }

    #[test]
    fn test_latest_report_validation() {
        let good = json!({
            "schema_version": "v1",
            "trt_mode": true,
            "processed_specs": 1,
            "regressions": 0,
            "errors": [],
            "reports": [{"spec": "a"}],
        });
        assert!(LatestRunReport::validate(&good).is_ok());

        let bad = json!({"schema_version": "v1", "trt_mode": true, "regressions": 0, "errors": [], "reports": []});
        assert!(LatestRunReport::validate(&bad).is_err());
    }
}
