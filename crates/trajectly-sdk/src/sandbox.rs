//! Deterministic replay sandbox.
//!
//! Instead of patching process globals, the sandbox is a value carrying
//! clock, random, filesystem, and subprocess providers; agents route every
//! nondeterministic operation through it. `activate_sandbox_from_env`
//! installs a process-wide instance built from the `TRAJECTLY_*`
//! environment, mirroring how the runner pre-wires the agent process;
//! `reset_for_tests` restores the uninstalled state.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use uuid::Uuid;

use trajectly_core::sha256_of_data;
use trajectly_types::{
    ClockMode, DeterminismConfig, ENV_CLOCK_SEED, ENV_DETERMINISM_JSON, ENV_EVENTS_FILE,
    ENV_FIXTURES_FILE, ENV_MODE, ENV_PROJECT_ROOT, ENV_RANDOM_SEED, ENV_TRACE_FILE,
    ENV_TRACE_META_FILE, ERROR_CODE_NONDETERMINISM_CLOCK_DETECTED,
    ERROR_CODE_NONDETERMINISM_FILESYSTEM_DETECTED, ERROR_CODE_NONDETERMINISM_RANDOM_DETECTED,
    ERROR_CODE_NONDETERMINISM_UUID_DETECTED, FilesystemMode, RandomMode, SubprocessMode,
};

/// Structured determinism-guard violation. Carries expected/actual values,
/// their content hashes, and a suggested fix so a human can correlate
/// reports without replaying.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeterminismViolation {
    pub code: String,
    pub message: String,
    pub expected: Value,
    pub actual: Value,
    pub expected_hash: String,
    pub actual_hash: String,
    pub suggested_fix: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_diff: Option<Map<String, Value>>,
}

impl DeterminismViolation {
    fn new(
        code: &str,
        message: String,
        expected: Value,
        actual: Value,
        suggested_fix: &str,
        payload_diff: Option<Map<String, Value>>,
    ) -> DeterminismViolation {
        DeterminismViolation {
            code: code.to_string(),
            message,
            expected_hash: sha256_of_data(&expected),
            actual_hash: sha256_of_data(&actual),
            expected,
            actual,
            suggested_fix: suggested_fix.to_string(),
            payload_diff,
        }
    }
}

impl fmt::Display for DeterminismViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} :: expected={} actual={}",
            self.code, self.message, self.expected, self.actual
        )
    }
}

impl std::error::Error for DeterminismViolation {}

/// Process sandbox: frozen clock, seeded RNG, filesystem and subprocess
/// allow-list checks.
#[derive(Debug)]
pub struct Sandbox {
    mode: String,
    project_root: PathBuf,
    config: DeterminismConfig,
    frozen_timestamp: Option<f64>,
    rng: Option<Mutex<StdRng>>,
    allow_read_paths: Vec<PathBuf>,
    allow_write_paths: Vec<PathBuf>,
    allow_commands: Vec<String>,
}

impl Sandbox {
    /// Build from an explicit configuration. Fails fast when a freeze or
    /// seed mode is requested without its seed.
    pub fn new(
        mode: &str,
        project_root: &Path,
        config: DeterminismConfig,
        clock_seed: Option<f64>,
        random_seed: Option<u64>,
        internal_paths: &[PathBuf],
    ) -> Result<Sandbox, DeterminismViolation> {
        let should_freeze = match config.clock.mode {
            ClockMode::Disabled => false,
            ClockMode::RecordAndFreeze => true,
            ClockMode::FreezeOnly => mode == "replay",
        };
        let frozen_timestamp = if should_freeze {
            match clock_seed {
                Some(seed) => Some(seed),
                None => {
                    return Err(DeterminismViolation::new(
                        ERROR_CODE_NONDETERMINISM_CLOCK_DETECTED,
                        "Clock freeze requested but no clock seed was provided".to_string(),
                        json!({"clock_seed": "float timestamp"}),
                        json!({"clock_seed": null}),
                        "Re-record baseline with determinism.clock.mode=record_and_freeze to capture clock_seed.",
                        None,
                    ));
                }
            }
        } else {
            None
        };

        let rng = if config.random.mode == RandomMode::Disabled {
            None
        } else {
            match random_seed {
                Some(seed) => Some(Mutex::new(StdRng::seed_from_u64(seed))),
                None => {
                    return Err(DeterminismViolation::new(
                        ERROR_CODE_NONDETERMINISM_RANDOM_DETECTED,
                        "Random determinism enabled but no random_seed was provided".to_string(),
                        json!({"random_seed": "int"}),
                        json!({"random_seed": null}),
                        "Re-record baseline with deterministic randomness enabled to capture random_seed.",
                        None,
                    ));
                }
            }
        };

        let resolve = |raw: &str| -> PathBuf {
            let candidate = PathBuf::from(raw);
            if candidate.is_absolute() {
                candidate
            } else {
                project_root.join(candidate)
            }
        };
        let mut allow_read_paths: Vec<PathBuf> = config
            .filesystem
            .allow_read_paths
            .iter()
            .map(|raw| resolve(raw))
            .collect();
        let mut allow_write_paths: Vec<PathBuf> = config
            .filesystem
            .allow_write_paths
            .iter()
            .map(|raw| resolve(raw))
            .collect();

        // Internal artifacts (events, trace, fixtures) and their parent
        // directories stay accessible in strict mode to avoid self-blocking.
        for path in internal_paths {
            allow_read_paths.push(path.clone());
            allow_write_paths.push(path.clone());
            if let Some(parent) = path.parent() {
                allow_read_paths.push(parent.to_path_buf());
                allow_write_paths.push(parent.to_path_buf());
            }
        }

        let allow_commands = config
            .subprocess
            .allow_commands
            .iter()
            .map(|command| command.trim().to_lowercase())
            .filter(|command| !command.is_empty())
            .collect();

        Ok(Sandbox {
            mode: mode.to_string(),
            project_root: project_root.to_path_buf(),
            config,
            frozen_timestamp,
            rng,
            allow_read_paths,
            allow_write_paths,
            allow_commands,
        })
    }

    /// Build from the environment. Returns `None` when the determinism
    /// profile requests nothing.
    pub fn from_env() -> Result<Option<Sandbox>, DeterminismViolation> {
        let config: DeterminismConfig = std::env::var(ENV_DETERMINISM_JSON)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();
        if config.is_inactive() {
            return Ok(None);
        }

        let mode = std::env::var(ENV_MODE)
            .unwrap_or_else(|_| "record".to_string())
            .trim()
            .to_lowercase();
        let project_root = PathBuf::from(
            std::env::var(ENV_PROJECT_ROOT).unwrap_or_else(|_| ".".to_string()),
        );
        let clock_seed = std::env::var(ENV_CLOCK_SEED)
            .ok()
            .and_then(|raw| raw.trim().parse::<f64>().ok());
        let random_seed = std::env::var(ENV_RANDOM_SEED)
            .ok()
            .and_then(|raw| raw.trim().parse::<u64>().ok());

        let internal_paths: Vec<PathBuf> = [
            ENV_EVENTS_FILE,
            ENV_TRACE_FILE,
            ENV_TRACE_META_FILE,
            ENV_FIXTURES_FILE,
        ]
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .map(PathBuf::from)
        .collect();

        Sandbox::new(
            &mode,
            &project_root,
            config,
            clock_seed,
            random_seed,
            &internal_paths,
        )
        .map(Some)
    }

    pub fn mode(&self) -> &str {
        &self.mode
    }

    /// Current wall-clock time; the frozen seed value when the clock
    /// guard is active.
    pub fn now(&self) -> DateTime<Utc> {
        match self.frozen_timestamp {
            Some(seed) => {
                let secs = seed.trunc() as i64;
                let nanos = ((seed - seed.trunc()) * 1e9) as u32;
                DateTime::from_timestamp(secs, nanos).unwrap_or_else(Utc::now)
            }
            None => Utc::now(),
        }
    }

    /// Scalar clock reading; `time()` and `monotonic()` both map here so a
    /// frozen clock returns the same value for both.
    pub fn timestamp(&self) -> f64 {
        match self.frozen_timestamp {
            Some(seed) => seed,
            None => Utc::now().timestamp_micros() as f64 / 1e6,
        }
    }

    /// UUID v4. In `deterministic_seed` mode the bytes are re-derived from
    /// the seeded RNG with version/variant bits preserved; in `strict`
    /// mode any call is a violation.
    pub fn uuid4(&self) -> Result<Uuid, DeterminismViolation> {
        match self.config.random.mode {
            RandomMode::Disabled => Ok(Uuid::new_v4()),
            RandomMode::Strict => Err(DeterminismViolation::new(
                ERROR_CODE_NONDETERMINISM_UUID_DETECTED,
                "UUID generation is blocked in strict deterministic mode".to_string(),
                json!({"uuid_source": "explicit deterministic tool or seeded generator"}),
                json!({"call": "uuid4"}),
                "Wrap UUID generation in an explicit tool and record its output.",
                None,
            )),
            RandomMode::DeterministicSeed => {
                let mut bytes = [0u8; 16];
                if let Some(rng) = &self.rng {
                    rng.lock().expect("sandbox rng poisoned").fill_bytes(&mut bytes);
                }
                Ok(uuid::Builder::from_random_bytes(bytes).into_uuid())
            }
        }
    }

    /// Random bytes from the seeded RNG; blocked entirely in strict mode.
    pub fn random_bytes(&self, size: usize) -> Result<Vec<u8>, DeterminismViolation> {
        match self.config.random.mode {
            RandomMode::Strict => Err(DeterminismViolation::new(
                ERROR_CODE_NONDETERMINISM_RANDOM_DETECTED,
                "Entropy requests are blocked in strict deterministic mode".to_string(),
                json!({"random_source": "deterministic_seed"}),
                json!({"call": "random_bytes", "size": size}),
                "Use seeded randomness through explicit tool wrappers instead of raw entropy.",
                None,
            )),
            _ => {
                let mut bytes = vec![0u8; size];
                match &self.rng {
                    Some(rng) => rng.lock().expect("sandbox rng poisoned").fill_bytes(&mut bytes),
                    None => rand::thread_rng().fill_bytes(&mut bytes),
                }
                Ok(bytes)
            }
        }
    }

    fn is_within(parent: &Path, child: &Path) -> bool {
        child.starts_with(parent)
    }

    fn allowed_path(path: &Path, allowlist: &[PathBuf]) -> bool {
        allowlist
            .iter()
            .any(|candidate| Sandbox::is_within(candidate, path))
    }

    fn normalized(&self, path: &Path) -> PathBuf {
        path.canonicalize().unwrap_or_else(|_| {
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                self.project_root.join(path)
            }
        })
    }

    /// Strict filesystem guard for reads. Paths outside the project root
    /// are unaffected so interpreter and toolchain internals keep working.
    pub fn check_read(&self, path: &Path) -> Result<(), DeterminismViolation> {
        self.check_path_access(path, true)
    }

    /// Strict filesystem guard for writes.
    pub fn check_write(&self, path: &Path) -> Result<(), DeterminismViolation> {
        self.check_path_access(path, false)
    }

    fn check_path_access(&self, path: &Path, read: bool) -> Result<(), DeterminismViolation> {
        if self.config.filesystem.mode != FilesystemMode::Strict {
            return Ok(());
        }
        let candidate = self.normalized(path);
        if !Sandbox::is_within(&self.project_root, &candidate) {
            return Ok(());
        }

        let (allowlist, kind, config_key, diff_key) = if read {
            (
                &self.allow_read_paths,
                "read",
                "allow_read_paths",
                "missing_allow_read_path",
            )
        } else {
            (
                &self.allow_write_paths,
                "write",
                "allow_write_paths",
                "missing_allow_write_path",
            )
        };
        if Sandbox::allowed_path(&candidate, allowlist) {
            return Ok(());
        }

        let allowed: Vec<String> = allowlist
            .iter()
            .map(|item| item.display().to_string())
            .collect();
        let mut payload_diff = Map::new();
        payload_diff.insert(diff_key.to_string(), json!(candidate.display().to_string()));
        Err(DeterminismViolation::new(
            ERROR_CODE_NONDETERMINISM_FILESYSTEM_DETECTED,
            format!(
                "Unapproved file {} during deterministic replay: {}",
                kind,
                candidate.display()
            ),
            json!({ config_key: allowed }),
            json!({"path": candidate.display().to_string()}),
            "Add the path under determinism.filesystem allow-lists in your spec, or route file access through an explicit deterministic tool.",
            Some(payload_diff),
        ))
    }

    /// Strict subprocess guard: the first token of the command must be in
    /// the allow-list. Shell strings are split on whitespace first.
    pub fn check_command(&self, command: &str) -> Result<(), DeterminismViolation> {
        if self.config.subprocess.mode != SubprocessMode::Strict {
            return Ok(());
        }
        let name = command
            .split_whitespace()
            .next()
            .unwrap_or("")
            .trim()
            .to_lowercase();
        if name.is_empty() || self.allow_commands.contains(&name) {
            return Ok(());
        }
        let mut payload_diff = Map::new();
        payload_diff.insert("blocked_command".to_string(), json!(name));
        Err(DeterminismViolation::new(
            ERROR_CODE_NONDETERMINISM_FILESYSTEM_DETECTED,
            format!("Subprocess command blocked in strict deterministic mode: {}", name),
            json!({"allow_commands": self.allow_commands}),
            json!({"command": command}),
            "Add the command name under determinism.subprocess.allow_commands or disable strict mode.",
            Some(payload_diff),
        ))
    }
}

static INSTALLED: OnceLock<Mutex<Option<Arc<Sandbox>>>> = OnceLock::new();

fn slot() -> &'static Mutex<Option<Arc<Sandbox>>> {
    INSTALLED.get_or_init(|| Mutex::new(None))
}

/// Install a process-wide sandbox from the environment. Idempotent: a
/// second call leaves the first installation in place.
pub fn activate_sandbox_from_env() -> Result<(), DeterminismViolation> {
    let mut guard = slot().lock().expect("sandbox slot poisoned");
    if guard.is_some() {
        return Ok(());
    }
    if let Some(sandbox) = Sandbox::from_env()? {
        *guard = Some(Arc::new(sandbox));
    }
    Ok(())
}

/// The installed sandbox, if any.
pub fn current_sandbox() -> Option<Arc<Sandbox>> {
    slot().lock().expect("sandbox slot poisoned").clone()
}

/// Restore the uninstalled state.
pub fn reset_for_tests() {
    *slot().lock().expect("sandbox slot poisoned") = None;
}
