use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::SPEC_SCHEMA_VERSION;
use crate::error::{Error, Result};

/// Fixture matching policy at replay time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixturePolicy {
    ByIndex,
    ByHash,
}

impl FixturePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FixturePolicy::ByIndex => "by_index",
            FixturePolicy::ByHash => "by_hash",
        }
    }

    pub fn parse(raw: &str) -> Option<FixturePolicy> {
        match raw {
            "by_index" => Some(FixturePolicy::ByIndex),
            "by_hash" => Some(FixturePolicy::ByHash),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BudgetThresholds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_latency_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tool_calls: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolContracts {
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_calls_total: Option<usize>,
    #[serde(default)]
    pub max_calls_per_tool: BTreeMap<String, usize>,
    /// Per-tool argument schemas: `required_keys` plus per-field
    /// type/enum/regex/min/max rules, kept as raw JSON and interpreted by
    /// the contract evaluator.
    #[serde(default)]
    pub schema: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SequenceContracts {
    #[serde(default)]
    pub require: Vec<String>,
    #[serde(default)]
    pub forbid: Vec<String>,
    #[serde(default)]
    pub require_before: Vec<(String, String)>,
    #[serde(default)]
    pub eventually: Vec<String>,
    #[serde(default)]
    pub never: Vec<String>,
    #[serde(default)]
    pub at_most_once: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SideEffectContracts {
    #[serde(default)]
    pub deny_write_tools: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkContracts {
    #[serde(default)]
    pub allowlist: Vec<String>,
    #[serde(default = "default_network_default")]
    pub default: String,
    #[serde(default)]
    pub allow_domains: Vec<String>,
}

fn default_network_default() -> String {
    "deny".to_string()
}

impl Default for NetworkContracts {
    fn default() -> Self {
        NetworkContracts {
            allowlist: Vec::new(),
            default: default_network_default(),
            allow_domains: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataLeakContracts {
    #[serde(default)]
    pub deny_pii_outbound: bool,
    #[serde(default)]
    pub outbound_kinds: Vec<String>,
    #[serde(default)]
    pub secret_patterns: Vec<String>,
}

/// The declarative contract block of a spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentContracts {
    pub version: String,
    #[serde(default)]
    pub tools: ToolContracts,
    #[serde(default)]
    pub sequence: SequenceContracts,
    #[serde(default)]
    pub side_effects: SideEffectContracts,
    #[serde(default)]
    pub network: NetworkContracts,
    #[serde(default)]
    pub data_leak: DataLeakContracts,
}

impl Default for AgentContracts {
    fn default() -> Self {
        AgentContracts {
            version: "v1".to_string(),
            tools: ToolContracts::default(),
            sequence: SequenceContracts::default(),
            side_effects: SideEffectContracts::default(),
            network: NetworkContracts::default(),
            data_leak: DataLeakContracts::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayMode {
    Offline,
    Online,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    pub mode: ReplayMode,
    pub strict_sequence: bool,
    pub llm_match_mode: String,
    pub tool_match_mode: String,
    pub fixture_policy: FixturePolicy,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        ReplayConfig {
            mode: ReplayMode::Offline,
            strict_sequence: false,
            llm_match_mode: "signature_match".to_string(),
            tool_match_mode: "args_signature_match".to_string(),
            fixture_policy: FixturePolicy::ByHash,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefinementMode {
    None,
    Skeleton,
    Strict,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinementConfig {
    pub mode: RefinementMode,
    #[serde(default)]
    pub allow_extra_tools: Vec<String>,
    #[serde(default)]
    pub allow_extra_side_effect_tools: Vec<String>,
    #[serde(default)]
    pub allow_new_tool_names: bool,
    #[serde(default)]
    pub ignore_call_tools: Vec<String>,
}

impl Default for RefinementConfig {
    fn default() -> Self {
        RefinementConfig {
            mode: RefinementMode::Skeleton,
            allow_extra_tools: Vec::new(),
            allow_extra_side_effect_tools: Vec::new(),
            allow_new_tool_names: false,
            ignore_call_tools: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockMode {
    #[default]
    Disabled,
    FreezeOnly,
    RecordAndFreeze,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RandomMode {
    #[default]
    Disabled,
    DeterministicSeed,
    Strict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilesystemMode {
    #[default]
    Permissive,
    Strict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubprocessMode {
    #[default]
    Disabled,
    Strict,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClockConfig {
    #[serde(default)]
    pub mode: ClockMode,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RandomConfig {
    #[serde(default)]
    pub mode: RandomMode,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilesystemConfig {
    #[serde(default)]
    pub mode: FilesystemMode,
    #[serde(default)]
    pub allow_read_paths: Vec<String>,
    #[serde(default)]
    pub allow_write_paths: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubprocessConfig {
    #[serde(default)]
    pub mode: SubprocessMode,
    #[serde(default)]
    pub allow_commands: Vec<String>,
}

/// Determinism profile: which nondeterminism sources the sandbox freezes
/// or blocks inside the agent process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeterminismConfig {
    #[serde(default)]
    pub clock: ClockConfig,
    #[serde(default)]
    pub random: RandomConfig,
    #[serde(default)]
    pub filesystem: FilesystemConfig,
    #[serde(default)]
    pub subprocess: SubprocessConfig,
}

impl DeterminismConfig {
    /// True when no guard is requested; the sandbox skips installation.
    pub fn is_inactive(&self) -> bool {
        self.clock.mode == ClockMode::Disabled
            && self.random.mode == RandomMode::Disabled
            && self.filesystem.mode == FilesystemMode::Permissive
            && self.subprocess.mode == SubprocessMode::Disabled
    }
}

/// A fully migrated agent spec. There is exactly one in-memory shape; older
/// spec layouts are upgraded on load and flagged with `legacy_compat`.
#[derive(Debug, Clone)]
pub struct AgentSpec {
    pub schema_version: String,
    pub name: String,
    pub command: String,
    pub source_path: PathBuf,
    pub workdir: Option<String>,
    pub env: BTreeMap<String, String>,
    pub fixture_policy: FixturePolicy,
    pub strict: bool,
    pub redact: Vec<String>,
    pub budget_thresholds: BudgetThresholds,
    pub contracts: AgentContracts,
    pub replay: ReplayConfig,
    pub refinement: RefinementConfig,
    pub determinism: DeterminismConfig,
    pub artifacts_dir: String,
    pub legacy_compat: bool,
}

impl AgentSpec {
    pub fn resolved_workdir(&self) -> PathBuf {
        match &self.workdir {
            None => self
                .source_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
            Some(workdir) => {
                let candidate = PathBuf::from(workdir);
                if candidate.is_absolute() {
                    candidate
                } else {
                    self.source_path
                        .parent()
                        .unwrap_or_else(|| Path::new("."))
                        .join(candidate)
                }
            }
        }
    }

    /// Decode an already-parsed spec value, migrating legacy layouts.
    ///
    /// Supported versions: `0.4` (native), `0.2`/`v1` and missing
    /// `schema_version` (compat migration). Anything else is rejected.
    pub fn from_value(data: &Value, source_path: &Path) -> Result<AgentSpec> {
        let map = ensure_object(data, "spec")?;
        match map.get("schema_version") {
            None => parse_legacy_spec(map, source_path),
            Some(version_raw) => {
                let version = value_as_trimmed_string(version_raw);
                match version.as_str() {
                    "0.4" | "v0.4" => parse_native_spec(map, source_path),
                    "0.2" | "v0.2" | "v1" | "1" => parse_legacy_spec(map, source_path),
                    other => Err(Error::Spec(format!(
                        "Unsupported schema_version: {}. Supported: 0.4 (native), 0.2/v1 (compat loader).",
                        other
                    ))),
                }
            }
        }
    }
}

/// Deterministic deep-merge: objects merge recursively, lists and scalars
/// override. Used for spec `extends` resolution.
pub fn deep_merge(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            let mut merged = base_map.clone();
            for (key, value) in overlay_map {
                let replacement = match merged.get(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        deep_merge(existing, value)
                    }
                    _ => value.clone(),
                };
                merged.insert(key.clone(), replacement);
            }
            Value::Object(merged)
        }
        _ => overlay.clone(),
    }
}

fn value_as_trimmed_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.trim().to_string(),
        other => other.to_string(),
    }
}

fn ensure_object<'a>(value: &'a Value, field_name: &str) -> Result<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| Error::Spec(format!("{} must be a mapping", field_name)))
}

fn optional_object<'a>(map: &'a Map<String, Value>, key: &str) -> Result<Map<String, Value>> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(block)) => Ok(block.clone()),
        Some(_) => Err(Error::Spec(format!("{} must be a mapping", key))),
    }
}

fn string_list(raw: Option<&Value>, field_name: &str) -> Result<Vec<String>> {
    match raw {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items.iter().map(value_as_trimmed_string).collect()),
        Some(_) => Err(Error::Spec(format!("{} must be a list", field_name))),
    }
}

fn bool_field(map: &Map<String, Value>, key: &str, default: bool, field_name: &str) -> Result<bool> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(flag)) => Ok(*flag),
        Some(_) => Err(Error::Spec(format!("{} must be a boolean", field_name))),
    }
}

fn usize_field(value: &Value, field_name: &str) -> Result<usize> {
    value
        .as_u64()
        .map(|raw| raw as usize)
        .ok_or_else(|| Error::Spec(format!("{} must be >= 0", field_name)))
}

fn parse_budget_thresholds(raw: Option<&Value>) -> Result<BudgetThresholds> {
    let map = match raw {
        None | Some(Value::Null) => return Ok(BudgetThresholds::default()),
        Some(value) => ensure_object(value, "budget_thresholds")?,
    };
    let int_field = |key: &str| -> Result<Option<i64>> {
        match map.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value
                .as_i64()
                .map(Some)
                .ok_or_else(|| Error::Spec(format!("budget_thresholds.{} must be an integer", key))),
        }
    };
    Ok(BudgetThresholds {
        max_latency_ms: int_field("max_latency_ms")?,
        max_tool_calls: int_field("max_tool_calls")?.map(|limit| limit.max(0) as usize),
        max_tokens: int_field("max_tokens")?,
    })
}

/// Parse a v1 contracts block. Shared by native and legacy spec layouts.
pub fn parse_contracts(raw: Option<&Value>) -> Result<AgentContracts> {
    let map = match raw {
        None | Some(Value::Null) => return Ok(AgentContracts::default()),
        Some(value) => ensure_object(value, "contracts")?,
    };

    if map.contains_key("refinement") {
        return Err(Error::Spec(
            "refinement must be defined at the spec top level, not in the contracts block"
                .to_string(),
        ));
    }

    let version = match map.get("version") {
        None => "v1".to_string(),
        Some(Value::String(version)) => version.trim().to_string(),
        Some(_) => return Err(Error::Spec("contracts.version must be a string".to_string())),
    };
    if version != "v1" {
        return Err(Error::Spec(format!(
            "Unsupported contracts.version: {}. Supported: v1",
            version
        )));
    }

    let tools_raw = optional_object(map, "tools")?;
    let allow = string_list(tools_raw.get("allow"), "contracts.tools.allow")?;
    let deny = string_list(tools_raw.get("deny"), "contracts.tools.deny")?;
    let mut overlap: Vec<&String> = allow.iter().filter(|name| deny.contains(name)).collect();
    overlap.sort();
    overlap.dedup();
    if !overlap.is_empty() {
        let joined = overlap
            .iter()
            .map(|name| name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        return Err(Error::Spec(format!(
            "contracts.tools allow/deny overlap: {}",
            joined
        )));
    }

    let max_calls_total = match tools_raw.get("max_calls_total") {
        None | Some(Value::Null) => None,
        Some(value) => Some(usize_field(value, "contracts.tools.max_calls_total")?),
    };

    let mut max_calls_per_tool = BTreeMap::new();
    match tools_raw.get("max_calls_per_tool") {
        None | Some(Value::Null) => {}
        Some(Value::Object(per_tool)) => {
            for (tool_name, value) in per_tool {
                let limit = usize_field(value, "contracts.tools.max_calls_per_tool values")?;
                max_calls_per_tool.insert(tool_name.clone(), limit);
            }
        }
        Some(_) => {
            return Err(Error::Spec(
                "contracts.tools.max_calls_per_tool must be a mapping".to_string(),
            ));
        }
    }

    // `schema` and `args` are two spellings of the same concern; `args`
    // entries overlay `schema` entries per tool.
    let mut schema: BTreeMap<String, Value> = BTreeMap::new();
    match tools_raw.get("schema") {
        None | Some(Value::Null) => {}
        Some(Value::Object(schema_raw)) => {
            for (tool_name, tool_schema) in schema_raw {
                schema.insert(tool_name.clone(), tool_schema.clone());
            }
        }
        Some(_) => {
            return Err(Error::Spec(
                "contracts.tools.schema must be a mapping".to_string(),
            ));
        }
    }
    match map.get("args") {
        None | Some(Value::Null) => {}
        Some(Value::Object(args_raw)) => {
            for (tool_name, tool_schema) in args_raw {
                let overlay = tool_schema
                    .as_object()
                    .ok_or_else(|| Error::Spec("contracts.args entries must be mappings".to_string()))?;
                let merged = match schema.get(tool_name) {
                    Some(Value::Object(existing)) => {
                        let mut combined = existing.clone();
                        for (key, value) in overlay {
                            combined.insert(key.clone(), value.clone());
                        }
                        Value::Object(combined)
                    }
                    _ => Value::Object(overlay.clone()),
                };
                schema.insert(tool_name.clone(), merged);
            }
        }
        Some(_) => return Err(Error::Spec("contracts.args must be a mapping".to_string())),
    }

    let sequence_raw = optional_object(map, "sequence")?;
    let mut require_before = Vec::new();
    match sequence_raw.get("require_before") {
        None | Some(Value::Null) => {}
        Some(Value::Array(items)) => {
            for item in items {
                let entry = item.as_object().ok_or_else(|| {
                    Error::Spec("contracts.sequence.require_before entries must be mappings".to_string())
                })?;
                let before = entry.get("before").and_then(Value::as_str);
                let after = entry.get("after").and_then(Value::as_str);
                match (before, after) {
                    (Some(before), Some(after)) => {
                        require_before.push((before.to_string(), after.to_string()));
                    }
                    _ => {
                        return Err(Error::Spec(
                            "contracts.sequence.require_before entries need string before/after"
                                .to_string(),
                        ));
                    }
                }
            }
        }
        Some(_) => {
            return Err(Error::Spec(
                "contracts.sequence.require_before must be a list".to_string(),
            ));
        }
    }

    let side_effects_raw = optional_object(map, "side_effects")?;
    let deny_write_tools = bool_field(
        &side_effects_raw,
        "deny_write_tools",
        false,
        "contracts.side_effects.deny_write_tools",
    )?;

    let network_raw = optional_object(map, "network")?;
    let network_default = match network_raw.get("default") {
        None => "deny".to_string(),
        Some(Value::String(raw)) => raw.trim().to_lowercase(),
        Some(_) => return Err(Error::Spec("contracts.network.default must be a string".to_string())),
    };
    if network_default != "deny" && network_default != "allow" {
        return Err(Error::Spec(
            "contracts.network.default must be deny|allow".to_string(),
        ));
    }

    let data_leak_raw = optional_object(map, "data_leak")?;
    let deny_pii_outbound = bool_field(
        &data_leak_raw,
        "deny_pii_outbound",
        false,
        "contracts.data_leak.deny_pii_outbound",
    )?;

    Ok(AgentContracts {
        version,
        tools: ToolContracts {
            allow,
            deny,
            max_calls_total,
            max_calls_per_tool,
            schema,
        },
        sequence: SequenceContracts {
            require: string_list(sequence_raw.get("require"), "contracts.sequence.require")?,
            forbid: string_list(sequence_raw.get("forbid"), "contracts.sequence.forbid")?,
            require_before,
            eventually: string_list(
                sequence_raw.get("eventually"),
                "contracts.sequence.eventually",
            )?,
            never: string_list(sequence_raw.get("never"), "contracts.sequence.never")?,
            at_most_once: string_list(
                sequence_raw.get("at_most_once"),
                "contracts.sequence.at_most_once",
            )?,
        },
        side_effects: SideEffectContracts { deny_write_tools },
        network: NetworkContracts {
            allowlist: string_list(network_raw.get("allowlist"), "contracts.network.allowlist")?,
            default: network_default,
            allow_domains: string_list(
                network_raw.get("allow_domains"),
                "contracts.network.allow_domains",
            )?,
        },
        data_leak: DataLeakContracts {
            deny_pii_outbound,
            outbound_kinds: string_list(
                data_leak_raw.get("outbound_kinds"),
                "contracts.data_leak.outbound_kinds",
            )?,
            secret_patterns: string_list(
                data_leak_raw.get("secret_patterns"),
                "contracts.data_leak.secret_patterns",
            )?,
        },
    })
}

fn parse_replay(raw: Option<&Value>) -> Result<ReplayConfig> {
    let map = match raw {
        None | Some(Value::Null) => return Ok(ReplayConfig::default()),
        Some(value) => ensure_object(value, "replay")?,
    };

    let mode = match map.get("mode").map(value_as_trimmed_string).as_deref() {
        None | Some("offline") => ReplayMode::Offline,
        Some("online") => ReplayMode::Online,
        Some(_) => return Err(Error::Spec("replay.mode must be one of offline|online".to_string())),
    };

    let llm_match_mode = map
        .get("llm_match_mode")
        .map(value_as_trimmed_string)
        .unwrap_or_else(|| "signature_match".to_string());
    if llm_match_mode != "signature_match" && llm_match_mode != "sequence_match" {
        return Err(Error::Spec(
            "replay.llm_match_mode must be signature_match|sequence_match".to_string(),
        ));
    }

    let tool_match_mode = map
        .get("tool_match_mode")
        .map(value_as_trimmed_string)
        .unwrap_or_else(|| "args_signature_match".to_string());
    if tool_match_mode != "args_signature_match" && tool_match_mode != "sequence_match" {
        return Err(Error::Spec(
            "replay.tool_match_mode must be args_signature_match|sequence_match".to_string(),
        ));
    }

    let fixture_policy = match map.get("fixture_policy") {
        None => FixturePolicy::ByHash,
        Some(value) => FixturePolicy::parse(&value_as_trimmed_string(value)).ok_or_else(|| {
            Error::Spec("replay.fixture_policy must be by_index|by_hash".to_string())
        })?,
    };

    let strict_sequence = bool_field(map, "strict_sequence", false, "replay.strict_sequence")?;

    Ok(ReplayConfig {
        mode,
        strict_sequence,
        llm_match_mode,
        tool_match_mode,
        fixture_policy,
    })
}

fn parse_refinement(raw: Option<&Value>) -> Result<RefinementConfig> {
    let map = match raw {
        None | Some(Value::Null) => return Ok(RefinementConfig::default()),
        Some(value) => ensure_object(value, "refinement")?,
    };

    let mode = match map.get("mode").map(value_as_trimmed_string).as_deref() {
        None | Some("skeleton") => RefinementMode::Skeleton,
        Some("none") => RefinementMode::None,
        Some("strict") => RefinementMode::Strict,
        Some(_) => {
            return Err(Error::Spec(
                "refinement.mode must be none|skeleton|strict".to_string(),
            ));
        }
    };

    Ok(RefinementConfig {
        mode,
        allow_extra_tools: string_list(
            map.get("allow_extra_tools"),
            "refinement.allow_extra_tools",
        )?,
        allow_extra_side_effect_tools: string_list(
            map.get("allow_extra_side_effect_tools"),
            "refinement.allow_extra_side_effect_tools",
        )?,
        allow_new_tool_names: bool_field(
            map,
            "allow_new_tool_names",
            false,
            "refinement.allow_new_tool_names",
        )?,
        ignore_call_tools: string_list(
            map.get("ignore_call_tools"),
            "refinement.ignore_call_tools",
        )?,
    })
}

fn parse_determinism(raw: Option<&Value>) -> Result<DeterminismConfig> {
    let map = match raw {
        None | Some(Value::Null) => return Ok(DeterminismConfig::default()),
        Some(value) => ensure_object(value, "determinism")?,
    };

    let clock_raw = optional_object(map, "clock")?;
    let clock_mode = match clock_raw.get("mode").map(value_as_trimmed_string).as_deref() {
        None | Some("disabled") => ClockMode::Disabled,
        Some("freeze_only") => ClockMode::FreezeOnly,
        Some("record_and_freeze") => ClockMode::RecordAndFreeze,
        Some(_) => {
            return Err(Error::Spec(
                "determinism.clock.mode must be disabled|freeze_only|record_and_freeze".to_string(),
            ));
        }
    };

    let random_raw = optional_object(map, "random")?;
    let random_mode = match random_raw.get("mode").map(value_as_trimmed_string).as_deref() {
        None | Some("disabled") => RandomMode::Disabled,
        Some("deterministic_seed") => RandomMode::DeterministicSeed,
        Some("strict") => RandomMode::Strict,
        Some(_) => {
            return Err(Error::Spec(
                "determinism.random.mode must be disabled|deterministic_seed|strict".to_string(),
            ));
        }
    };

    let fs_raw = optional_object(map, "filesystem")?;
    let fs_mode = match fs_raw.get("mode").map(value_as_trimmed_string).as_deref() {
        None | Some("permissive") => FilesystemMode::Permissive,
        Some("strict") => FilesystemMode::Strict,
        Some(_) => {
            return Err(Error::Spec(
                "determinism.filesystem.mode must be permissive|strict".to_string(),
            ));
        }
    };

    let sp_raw = optional_object(map, "subprocess")?;
    let sp_mode = match sp_raw.get("mode").map(value_as_trimmed_string).as_deref() {
        None | Some("disabled") => SubprocessMode::Disabled,
        Some("strict") => SubprocessMode::Strict,
        Some(_) => {
            return Err(Error::Spec(
                "determinism.subprocess.mode must be disabled|strict".to_string(),
            ));
        }
    };

    Ok(DeterminismConfig {
        clock: ClockConfig { mode: clock_mode },
        random: RandomConfig { mode: random_mode },
        filesystem: FilesystemConfig {
            mode: fs_mode,
            allow_read_paths: string_list(
                fs_raw.get("allow_read_paths"),
                "determinism.filesystem.allow_read_paths",
            )?,
            allow_write_paths: string_list(
                fs_raw.get("allow_write_paths"),
                "determinism.filesystem.allow_write_paths",
            )?,
        },
        subprocess: SubprocessConfig {
            mode: sp_mode,
            allow_commands: string_list(
                sp_raw.get("allow_commands"),
                "determinism.subprocess.allow_commands",
            )?
            .into_iter()
            .map(|command| command.trim().to_lowercase())
            .collect(),
        },
    })
}

fn parse_env(map: &Map<String, Value>, source_path: &Path) -> Result<BTreeMap<String, String>> {
    match map.get("env") {
        None | Some(Value::Null) => Ok(BTreeMap::new()),
        Some(Value::Object(env_raw)) => Ok(env_raw
            .iter()
            .map(|(key, value)| (key.clone(), value_as_trimmed_string(value)))
            .collect()),
        Some(_) => Err(Error::Spec(format!(
            "Spec {} field env must be a mapping",
            source_path.display()
        ))),
    }
}

fn parse_redact(map: &Map<String, Value>, source_path: &Path) -> Result<Vec<String>> {
    match map.get("redact") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items.iter().map(value_as_trimmed_string).collect()),
        Some(_) => Err(Error::Spec(format!(
            "Spec {} field redact must be a list",
            source_path.display()
        ))),
    }
}

fn parse_artifacts_dir(map: &Map<String, Value>) -> Result<String> {
    let artifacts_raw = optional_object(map, "artifacts")?;
    match artifacts_raw.get("dir") {
        None => Ok(".trajectly/artifacts".to_string()),
        Some(Value::String(dir)) if !dir.trim().is_empty() => Ok(dir.trim().to_string()),
        Some(_) => Err(Error::Spec(
            "artifacts.dir must be a non-empty string".to_string(),
        )),
    }
}

fn parse_native_spec(map: &Map<String, Value>, source_path: &Path) -> Result<AgentSpec> {
    let name = map
        .get("name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| Error::Spec("spec requires non-empty `name`".to_string()))?
        .to_string();

    let command = map
        .get("command")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|command| !command.is_empty())
        .ok_or_else(|| {
            Error::Spec(format!(
                "Spec {} is missing required field: command",
                source_path.display()
            ))
        })?
        .to_string();

    let replay = parse_replay(map.get("replay"))?;
    let fixture_policy = match map.get("fixture_policy") {
        None => replay.fixture_policy,
        Some(value) => FixturePolicy::parse(&value_as_trimmed_string(value)).ok_or_else(|| {
            Error::Spec(format!(
                "Spec {} has invalid fixture_policy",
                source_path.display()
            ))
        })?,
    };
    let strict = bool_field(map, "strict", replay.strict_sequence, "strict")?;

    Ok(AgentSpec {
        schema_version: SPEC_SCHEMA_VERSION.to_string(),
        name,
        command,
        source_path: source_path.to_path_buf(),
        workdir: map
            .get("workdir")
            .and_then(Value::as_str)
            .map(str::to_string),
        env: parse_env(map, source_path)?,
        fixture_policy,
        strict,
        redact: parse_redact(map, source_path)?,
        budget_thresholds: parse_budget_thresholds(map.get("budget_thresholds"))?,
        contracts: parse_contracts(map.get("contracts"))?,
        replay,
        refinement: parse_refinement(map.get("refinement"))?,
        determinism: parse_determinism(map.get("determinism"))?,
        artifacts_dir: parse_artifacts_dir(map)?,
        legacy_compat: false,
    })
}

/// Migrate a legacy (pre-0.4) spec layout into the current shape.
///
/// Legacy specs default to `by_index` fixture matching, have no refinement
/// or determinism blocks, and may omit `name` (the file stem is used).
fn parse_legacy_spec(map: &Map<String, Value>, source_path: &Path) -> Result<AgentSpec> {
    let name = map
        .get("name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .or_else(|| {
            source_path
                .file_stem()
                .map(|stem| stem.to_string_lossy().to_string())
        })
        .unwrap_or_else(|| "spec".to_string());

    let command = map
        .get("command")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|command| !command.is_empty())
        .ok_or_else(|| {
            Error::Spec(format!(
                "Spec {} is missing required non-empty field: command",
                source_path.display()
            ))
        })?
        .to_string();

    let fixture_policy = match map.get("fixture_policy") {
        None => FixturePolicy::ByIndex,
        Some(value) => FixturePolicy::parse(&value_as_trimmed_string(value)).ok_or_else(|| {
            Error::Spec(format!(
                "Spec {} has invalid fixture_policy",
                source_path.display()
            ))
        })?,
    };
    let strict = bool_field(map, "strict", false, "strict")?;

    Ok(AgentSpec {
        schema_version: SPEC_SCHEMA_VERSION.to_string(),
        name,
        command,
        source_path: source_path.to_path_buf(),
        workdir: map
            .get("workdir")
            .and_then(Value::as_str)
            .map(str::to_string),
        env: parse_env(map, source_path)?,
        fixture_policy,
        strict,
        redact: parse_redact(map, source_path)?,
        budget_thresholds: parse_budget_thresholds(map.get("budget_thresholds"))?,
        contracts: parse_contracts(map.get("contracts"))?,
        replay: ReplayConfig {
            fixture_policy,
            strict_sequence: strict,
            ..ReplayConfig::default()
        },
        refinement: RefinementConfig::default(),
        determinism: DeterminismConfig::default(),
        artifacts_dir: ".trajectly/artifacts".to_string(),
        legacy_compat: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::Path;

    fn source() -> &'static Path {
        Path::new("/project/checkout.agent.json")
    }

    #[test]
    fn test_native_spec_parses() {
        let raw = json!({
            "schema_version": "0.4",
            "name": "checkout",
            "command": "python agent.py",
            "fixture_policy": "by_hash",
            "strict": true,
            "contracts": {
                "tools": {"deny": ["delete_account"], "max_calls_total": 5},
                "sequence": {"require_before": [{"before": "tool:search", "after": "tool:checkout"}]},
            },
            "refinement": {"mode": "skeleton", "allow_extra_tools": ["log"]},
            "determinism": {"clock": {"mode": "record_and_freeze"}},
        });
        let spec = AgentSpec::from_value(&raw, source()).unwrap();
        assert_eq!(spec.schema_version, "0.4");
        assert!(!spec.legacy_compat);
        assert_eq!(spec.fixture_policy, FixturePolicy::ByHash);
        assert!(spec.strict);
        assert_eq!(spec.contracts.tools.deny, vec!["delete_account"]);
        assert_eq!(spec.contracts.tools.max_calls_total, Some(5));
        assert_eq!(
            spec.contracts.sequence.require_before,
            vec![("tool:search".to_string(), "tool:checkout".to_string())]
        );
        assert_eq!(spec.refinement.allow_extra_tools, vec!["log"]);
        assert_eq!(spec.determinism.clock.mode, ClockMode::RecordAndFreeze);
    }

    #[test]
    fn test_legacy_spec_migrates() {
        let raw = json!({
            "command": "python agent.py",
            "strict": true,
        });
        let spec = AgentSpec::from_value(&raw, source()).unwrap();
        assert!(spec.legacy_compat);
        assert_eq!(spec.schema_version, "0.4");
        assert_eq!(spec.name, "checkout.agent");
        assert_eq!(spec.fixture_policy, FixturePolicy::ByIndex);
        assert_eq!(spec.refinement.mode, RefinementMode::Skeleton);
        assert!(spec.determinism.is_inactive());
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let raw = json!({"schema_version": "9.9", "name": "x", "command": "y"});
        let err = AgentSpec::from_value(&raw, source()).unwrap_err();
        assert!(err.to_string().contains("Unsupported schema_version"));
    }

    #[test]
    fn test_allow_deny_overlap_rejected() {
        let raw = json!({
            "schema_version": "0.4",
            "name": "x",
            "command": "y",
            "contracts": {"tools": {"allow": ["a", "b"], "deny": ["b"]}},
        });
        let err = AgentSpec::from_value(&raw, source()).unwrap_err();
        assert!(err.to_string().contains("allow/deny overlap"));
    }

    #[test]
    fn test_args_block_merges_into_schema() {
        let raw = json!({
            "schema_version": "0.4",
            "name": "x",
            "command": "y",
            "contracts": {
                "tools": {"schema": {"add": {"required_keys": ["a"]}}},
                "args": {"add": {"fields": {"a": {"type": "number"}}}},
            },
        });
        let spec = AgentSpec::from_value(&raw, source()).unwrap();
        let merged = spec.contracts.tools.schema.get("add").unwrap();
        assert!(merged.get("required_keys").is_some());
        assert!(merged.get("fields").is_some());
    }

    #[test]
    fn test_deep_merge_overrides() {
        let base = json!({"a": {"b": 1, "c": 2}, "list": [1, 2]});
        let overlay = json!({"a": {"c": 3}, "list": [9]});
        let merged = deep_merge(&base, &overlay);
        assert_eq!(merged["a"]["b"], 1);
        assert_eq!(merged["a"]["c"], 3);
        assert_eq!(merged["list"], json!([9]));
    }
}
