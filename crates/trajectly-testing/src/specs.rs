//! Spec builders for tests.

use std::path::Path;

use serde_json::{Value, json};

use trajectly_types::AgentSpec;

/// Parse a spec from an inline JSON value, panicking on invalid input.
pub fn spec_from_json(value: Value) -> AgentSpec {
    AgentSpec::from_value(&value, Path::new("/tests/spec.agent.json"))
        .expect("test spec must parse")
}

/// Minimal 0.4 spec with the given contracts block.
pub fn spec_with_contracts(contracts: Value) -> AgentSpec {
    spec_from_json(json!({
        "schema_version": "0.4",
        "name": "test-spec",
        "command": "true",
        "contracts": contracts,
    }))
}
