mod canonical;
mod error;
mod events;
mod fixtures;
mod paths;
mod redaction;
mod trace;

pub use canonical::{
    CanonicalNormalizer, DEFAULT_VOLATILE_KEYS, canonical_dumps, dumps, normalize_for_json,
    sha256_of_data, sha256_of_subset,
};
pub use error::{Error, Result};
pub use events::{compute_event_id, make_event, read_events_jsonl, write_events_jsonl};
pub use fixtures::{FixtureError, FixtureEntry, FixtureKind, FixtureMatcher, FixtureStore};
pub use paths::{StatePaths, baseline_meta_path, ensure_state_dirs, slugify, state_paths};
pub use redaction::{REDACTION_TOKEN, apply_redactions};
pub use trace::{
    default_trace_meta_path, default_trace_path, read_trace_meta, write_trace_meta,
};
