//! Event construction and JSON-Lines trace I/O.
//!
//! Events serialize one per line, keys sorted, `\n` terminated. Reading
//! validates schema versions, field typing, and sequence monotonicity, and
//! fills in content-addressed ids when a line omits them.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde_json::{Map, Value};

use trajectly_types::{EventType, TraceEvent};

use crate::canonical::{dumps, sha256_of_subset};
use crate::error::{Error, Result};

/// Fields excluded from the event-id hash: the id itself plus timing and
/// observer annotations.
const EVENT_ID_IGNORED_KEYS: &[&str] = &["event_id", "rel_ms", "meta"];

/// Content-addressed event id: hash of the event with volatile envelope
/// fields excluded. Two events whose payload differs only in timing or
/// meta share an id.
pub fn compute_event_id(event: &TraceEvent) -> String {
    let value = event.to_value();
    let map = value.as_object().cloned().unwrap_or_default();
    sha256_of_subset(&map, EVENT_ID_IGNORED_KEYS)
}

/// Build an event with its id assigned.
pub fn make_event(
    event_type: EventType,
    seq: u64,
    run_id: &str,
    rel_ms: i64,
    payload: Map<String, Value>,
    meta: Map<String, Value>,
) -> TraceEvent {
    let mut event = TraceEvent {
        schema_version: trajectly_types::EVENT_SCHEMA_VERSION.to_string(),
        event_type,
        seq,
        run_id: run_id.to_string(),
        rel_ms,
        payload,
        meta,
        event_id: String::new(),
    };
    event.event_id = compute_event_id(&event);
    event
}

/// Write events one per line, keys sorted, each line `\n` terminated.
pub fn write_events_jsonl(path: &Path, events: &[TraceEvent]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::File::create(path)?;
    for event in events {
        file.write_all(dumps(&event.to_value()).as_bytes())?;
        file.write_all(b"\n")?;
    }
    Ok(())
}

/// Read and validate a JSON-Lines trace. Blank lines are skipped; missing
/// event ids are recomputed; sequence numbers must strictly increase.
pub fn read_events_jsonl(path: &Path) -> Result<Vec<TraceEvent>> {
    let content = fs::read_to_string(path)?;
    let mut events: Vec<TraceEvent> = Vec::new();
    let mut last_seq: Option<u64> = None;
    for line in content.lines() {
        let stripped = line.trim();
        if stripped.is_empty() {
            continue;
        }
        let raw: Value = serde_json::from_str(stripped)?;
        let mut event = TraceEvent::from_value(&raw)?;
        if let Some(previous) = last_seq {
            if event.seq <= previous {
                return Err(Error::Sequence(format!(
                    "Event sequence must be strictly increasing: {} after {}",
                    event.seq, previous
                )));
            }
        }
        last_seq = Some(event.seq);
        if event.event_id.is_empty() {
            event.event_id = compute_event_id(&event);
        }
        events.push(event);
    }
    Ok(events)
}
