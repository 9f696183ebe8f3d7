//! TestWorld pattern for declarative integration test setup.
//!
//! Creates an isolated project directory with the `.trajectly/` state
//! layout, and seeds baselines, fixtures, and spec files for runtime-level
//! tests.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde_json::Value;
use tempfile::TempDir;

use trajectly_core::{
    FixtureStore, StatePaths, baseline_meta_path, ensure_state_dirs, slugify, state_paths,
    write_events_jsonl, write_trace_meta,
};
use trajectly_types::{TraceEvent, TraceMeta};

pub struct TestWorld {
    _temp_dir: TempDir,
    root: PathBuf,
    paths: StatePaths,
}

impl TestWorld {
    pub fn new() -> TestWorld {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let root = temp_dir.path().to_path_buf();
        let paths = state_paths(&root);
        ensure_state_dirs(&paths).expect("Failed to create state dirs");
        TestWorld {
            _temp_dir: temp_dir,
            root,
            paths,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn paths(&self) -> &StatePaths {
        &self.paths
    }

    /// Write a spec file under the project root and return its path.
    pub fn write_spec(&self, name: &str, value: &Value) -> Result<PathBuf> {
        let path = self.root.join(format!("{}.agent.json", name));
        fs::write(&path, serde_json::to_string_pretty(value)?)?;
        Ok(path)
    }

    /// Seed a recorded baseline: trace, metadata, and fixtures derived
    /// from the events.
    pub fn seed_baseline(&self, spec_name: &str, events: &[TraceEvent]) -> Result<()> {
        let slug = slugify(spec_name);
        let baseline_path = self.paths.baselines.join(format!("{}.jsonl", slug));
        write_events_jsonl(&baseline_path, events)?;
        write_trace_meta(
            &baseline_meta_path(&baseline_path),
            &TraceMeta {
                spec_name: Some(spec_name.to_string()),
                run_id: events.first().map(|event| event.run_id.clone()),
                mode: Some("record".to_string()),
                ..TraceMeta::default()
            },
        )?;
        let store = FixtureStore::from_events(events);
        store.save(&self.paths.fixtures.join(format!("{}.json", slug)))?;
        Ok(())
    }

    pub fn baseline_path(&self, spec_name: &str) -> PathBuf {
        self.paths
            .baselines
            .join(format!("{}.jsonl", slugify(spec_name)))
    }

    pub fn fixture_path(&self, spec_name: &str) -> PathBuf {
        self.paths
            .fixtures
            .join(format!("{}.json", slugify(spec_name)))
    }

    pub fn report_json_path(&self, spec_name: &str) -> PathBuf {
        self.paths
            .reports
            .join(format!("{}.json", slugify(spec_name)))
    }
}

impl Default for TestWorld {
    fn default() -> Self {
        Self::new()
    }
}
