//! Baseline and artifact stores.
//!
//! The engine talks to stores through these traits so the filesystem
//! layout can be swapped for memory or remote storage without touching
//! the decision pipeline. Baselines are written exactly once per record
//! and never mutated; fixtures share their lifecycle.

use std::fs;
use std::path::{Path, PathBuf};

use trajectly_core::{baseline_meta_path, write_events_jsonl, write_trace_meta};
use trajectly_types::{TraceEvent, TraceMeta};

use crate::Result;

/// Resolved file paths for a baseline.
#[derive(Debug, Clone)]
pub struct BaselinePaths {
    pub trace_path: PathBuf,
    pub meta_path: PathBuf,
    pub fixture_path: PathBuf,
}

/// Abstraction for resolving, writing, and listing baselines.
pub trait BaselineStore {
    fn resolve(&self, spec_slug: &str) -> Option<BaselinePaths>;
    fn write(
        &self,
        spec_slug: &str,
        events: &[TraceEvent],
        fixtures: Option<&trajectly_core::FixtureStore>,
        meta: &TraceMeta,
    ) -> Result<BaselinePaths>;
    fn list_baselines(&self) -> Vec<String>;
}

/// Wraps the `.trajectly/baselines/` + `fixtures/` layout.
pub struct LocalBaselineStore {
    baselines_dir: PathBuf,
    fixtures_dir: PathBuf,
}

impl LocalBaselineStore {
    pub fn new(baselines_dir: &Path, fixtures_dir: &Path) -> LocalBaselineStore {
        LocalBaselineStore {
            baselines_dir: baselines_dir.to_path_buf(),
            fixtures_dir: fixtures_dir.to_path_buf(),
        }
    }

    fn paths_for(&self, spec_slug: &str) -> BaselinePaths {
        let trace_path = self.baselines_dir.join(format!("{}.jsonl", spec_slug));
        BaselinePaths {
            meta_path: baseline_meta_path(&trace_path),
            fixture_path: self.fixtures_dir.join(format!("{}.json", spec_slug)),
            trace_path,
        }
    }
}

impl BaselineStore for LocalBaselineStore {
    fn resolve(&self, spec_slug: &str) -> Option<BaselinePaths> {
        let paths = self.paths_for(spec_slug);
        if paths.trace_path.exists() {
            Some(paths)
        } else {
            None
        }
    }

    fn write(
        &self,
        spec_slug: &str,
        events: &[TraceEvent],
        fixtures: Option<&trajectly_core::FixtureStore>,
        meta: &TraceMeta,
    ) -> Result<BaselinePaths> {
        fs::create_dir_all(&self.baselines_dir)?;
        fs::create_dir_all(&self.fixtures_dir)?;
        let paths = self.paths_for(spec_slug);
        write_events_jsonl(&paths.trace_path, events)?;
        write_trace_meta(&paths.meta_path, meta)?;
        if let Some(store) = fixtures {
            store.save(&paths.fixture_path)?;
        }
        Ok(paths)
    }

    fn list_baselines(&self) -> Vec<String> {
        let mut slugs: Vec<String> = fs::read_dir(&self.baselines_dir)
            .map(|entries| {
                entries
                    .filter_map(|entry| entry.ok())
                    .filter(|entry| entry.path().is_file())
                    .filter_map(|entry| {
                        let name = entry.file_name().to_string_lossy().to_string();
                        name.strip_suffix(".jsonl").map(str::to_string)
                    })
                    .collect()
            })
            .unwrap_or_default();
        slugs.sort();
        slugs
    }
}

/// Abstraction for reading/writing artifacts (reports, repros).
pub trait ArtifactStore {
    fn put_bytes(&self, key: &str, data: &[u8]) -> Result<()>;
    fn get_bytes(&self, key: &str) -> Result<Vec<u8>>;
    fn list_keys(&self, prefix: &str) -> Vec<String>;
}

/// Wraps the `.trajectly/{reports,repros}/` filesystem layout.
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root: &Path) -> Result<LocalArtifactStore> {
        fs::create_dir_all(root)?;
        Ok(LocalArtifactStore {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ArtifactStore for LocalArtifactStore {
    fn put_bytes(&self, key: &str, data: &[u8]) -> Result<()> {
        let dest = self.root.join(key);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(dest, data)?;
        Ok(())
    }

    fn get_bytes(&self, key: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.root.join(key))?)
    }

    fn list_keys(&self, prefix: &str) -> Vec<String> {
        let base = if prefix.is_empty() {
            self.root.clone()
        } else {
            self.root.join(prefix)
        };
        if !base.exists() {
            return Vec::new();
        }
        let mut keys: Vec<String> = walkdir::WalkDir::new(&base)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                entry
                    .path()
                    .strip_prefix(&self.root)
                    .ok()
                    .map(|relative| relative.to_string_lossy().to_string())
            })
            .collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;
    use trajectly_core::FixtureStore;
    use trajectly_testing::TraceBuilder;

    #[test]
    fn test_baseline_store_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = LocalBaselineStore::new(&dir.path().join("baselines"), &dir.path().join("fixtures"));
        assert!(store.resolve("checkout").is_none());

        let mut builder = TraceBuilder::new("run-1");
        builder.tool_call("add", json!({"args": [1], "kwargs": {}}));
        builder.tool_return("add", json!(1));
        let events = builder.finish(0);
        let fixtures = FixtureStore::from_events(&events);

        let paths = store
            .write("checkout", &events, Some(&fixtures), &TraceMeta::default())
            .unwrap();
        assert!(paths.trace_path.exists());
        assert!(paths.meta_path.exists());
        assert!(paths.fixture_path.exists());
        assert!(store.resolve("checkout").is_some());
        assert_eq!(store.list_baselines(), vec!["checkout".to_string()]);
    }

    #[test]
    fn test_artifact_store_keys_sorted() {
        let dir = TempDir::new().unwrap();
        let store = LocalArtifactStore::new(dir.path()).unwrap();
        store.put_bytes("b/report.json", b"{}").unwrap();
        store.put_bytes("a/report.json", b"{}").unwrap();
        assert_eq!(
            store.list_keys(""),
            vec!["a/report.json".to_string(), "b/report.json".to_string()]
        );
        assert_eq!(store.get_bytes("a/report.json").unwrap(), b"{}");
    }
}
