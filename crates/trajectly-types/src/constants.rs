//! Versioned protocol constants shared across the workspace.
//!
//! Every schema that crosses a process or filesystem boundary (events,
//! traces, specs, reports) carries one of these versions so that older
//! artifacts are rejected with a migration hint instead of being
//! misinterpreted.

/// Event-stream schema version written by the SDK and validated on load.
pub const EVENT_SCHEMA_VERSION: &str = "v1";

/// Spec schema version after migration (older spec layouts are upgraded).
pub const SPEC_SCHEMA_VERSION: &str = "0.4";

/// Trace metadata schema version.
pub const TRACE_SCHEMA_VERSION: &str = "0.4";

/// TRT report schema version.
pub const REPORT_SCHEMA_VERSION: &str = "0.4";

/// Canonical normalizer version. A baseline recorded under a different
/// normalizer cannot be compared; re-recording is the only remedy.
pub const NORMALIZER_VERSION: &str = "1";

/// Side-effect tool registry version.
pub const SIDE_EFFECT_REGISTRY_VERSION: &str = "1";

/// Built-in side-effect tool registry v1. Calls to these tools are never
/// safe to replay implicitly and require explicit policy opt-in.
pub const SIDE_EFFECT_TOOL_REGISTRY_V1: &[&str] = &[
    "checkout",
    "create_refund",
    "send_email",
    "db_write",
    "filesystem_write",
    "http_request",
];

/// Stable error codes shared between the engine and the sandbox.
pub const ERROR_CODE_FIXTURE_EXHAUSTED: &str = "FIXTURE_EXHAUSTED";
pub const ERROR_CODE_NORMALIZER_VERSION_MISMATCH: &str = "NORMALIZER_VERSION_MISMATCH";
pub const ERROR_CODE_NONDETERMINISM_CLOCK_DETECTED: &str = "NONDETERMINISM_CLOCK_DETECTED";
pub const ERROR_CODE_NONDETERMINISM_RANDOM_DETECTED: &str = "NONDETERMINISM_RANDOM_DETECTED";
pub const ERROR_CODE_NONDETERMINISM_UUID_DETECTED: &str = "NONDETERMINISM_UUID_DETECTED";
pub const ERROR_CODE_NONDETERMINISM_FILESYSTEM_DETECTED: &str =
    "NONDETERMINISM_FILESYSTEM_DETECTED";

/// Fixed diagnostic substring emitted by the network guard. The contract
/// evaluator greps the `run_finished` stderr tail for it.
pub const NETWORK_BLOCK_MESSAGE: &str = "Trajectly replay mode blocks network access";

/// Project state directory names, relative to the project root.
pub const STATE_DIR: &str = ".trajectly";
pub const BASELINES_DIR: &str = "baselines";
pub const CURRENT_DIR: &str = "current";
pub const FIXTURES_DIR: &str = "fixtures";
pub const REPORTS_DIR: &str = "reports";
pub const REPROS_DIR: &str = "repros";
pub const TMP_DIR: &str = "tmp";

/// Process exit codes when the engine is driven as a command.
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_REGRESSION: i32 = 1;
pub const EXIT_INTERNAL_ERROR: i32 = 2;

/// Environment variables read by the agent-side sandbox and SDK.
pub const ENV_MODE: &str = "TRAJECTLY_MODE";
pub const ENV_EVENTS_FILE: &str = "TRAJECTLY_EVENTS_FILE";
pub const ENV_TRACE_FILE: &str = "TRAJECTLY_TRACE_FILE";
pub const ENV_TRACE_META_FILE: &str = "TRAJECTLY_TRACE_META_FILE";
pub const ENV_FIXTURES_FILE: &str = "TRAJECTLY_FIXTURES_FILE";
pub const ENV_FIXTURE_POLICY: &str = "TRAJECTLY_FIXTURE_POLICY";
pub const ENV_STRICT: &str = "TRAJECTLY_STRICT";
pub const ENV_SPEC_NAME: &str = "TRAJECTLY_SPEC_NAME";
pub const ENV_CONTRACTS_JSON: &str = "TRAJECTLY_CONTRACTS_JSON";
pub const ENV_NETWORK_ALLOWLIST: &str = "TRAJECTLY_NETWORK_ALLOWLIST";
pub const ENV_DETERMINISM_JSON: &str = "TRAJECTLY_DETERMINISM_JSON";
pub const ENV_CLOCK_SEED: &str = "TRAJECTLY_CLOCK_SEED";
pub const ENV_RANDOM_SEED: &str = "TRAJECTLY_RANDOM_SEED";
pub const ENV_PROJECT_ROOT: &str = "TRAJECTLY_PROJECT_ROOT";
pub const ENV_REPLAY_GUARD: &str = "TRAJECTLY_REPLAY_GUARD";
pub const ENV_CI: &str = "TRAJECTLY_CI";
