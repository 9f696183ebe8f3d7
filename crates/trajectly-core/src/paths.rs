//! Project state directory layout under `<project>/.trajectly/`.

use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use trajectly_types::{
    BASELINES_DIR, CURRENT_DIR, FIXTURES_DIR, REPORTS_DIR, REPROS_DIR, STATE_DIR, TMP_DIR,
};

use crate::error::Result;

/// Resolved state directories for one project.
#[derive(Debug, Clone)]
pub struct StatePaths {
    pub root: PathBuf,
    pub state: PathBuf,
    pub baselines: PathBuf,
    pub current: PathBuf,
    pub fixtures: PathBuf,
    pub reports: PathBuf,
    pub repros: PathBuf,
    pub tmp: PathBuf,
}

pub fn state_paths(project_root: &Path) -> StatePaths {
    let state = project_root.join(STATE_DIR);
    StatePaths {
        root: project_root.to_path_buf(),
        baselines: state.join(BASELINES_DIR),
        current: state.join(CURRENT_DIR),
        fixtures: state.join(FIXTURES_DIR),
        reports: state.join(REPORTS_DIR),
        repros: state.join(REPROS_DIR),
        tmp: state.join(TMP_DIR),
        state,
    }
}

pub fn ensure_state_dirs(paths: &StatePaths) -> Result<()> {
    for directory in [
        &paths.state,
        &paths.baselines,
        &paths.current,
        &paths.fixtures,
        &paths.reports,
        &paths.repros,
        &paths.tmp,
    ] {
        fs::create_dir_all(directory)?;
    }
    Ok(())
}

static SLUG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-zA-Z0-9]+").unwrap());

/// Filesystem-safe slug for a spec name.
pub fn slugify(value: &str) -> String {
    let slug = SLUG_RE
        .replace_all(value.trim().to_lowercase().as_str(), "-")
        .trim_matches('-')
        .to_string();
    if slug.is_empty() {
        "spec".to_string()
    } else {
        slug
    }
}

/// Metadata sibling of a baseline trace file.
pub fn baseline_meta_path(baseline_trace_path: &Path) -> PathBuf {
    let stem = baseline_trace_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "baseline".to_string());
    baseline_trace_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(format!("{}.meta.json", stem))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Checkout Flow v2!"), "checkout-flow-v2");
        assert_eq!(slugify("  --  "), "spec");
        assert_eq!(slugify("simple"), "simple");
    }

    #[test]
    fn test_state_paths_layout() {
        let paths = state_paths(Path::new("/project"));
        assert_eq!(paths.state, Path::new("/project/.trajectly"));
        assert_eq!(paths.baselines, Path::new("/project/.trajectly/baselines"));
        assert_eq!(paths.repros, Path::new("/project/.trajectly/repros"));
    }

    #[test]
    fn test_ensure_state_dirs_creates_all() {
        let dir = TempDir::new().unwrap();
        let paths = state_paths(dir.path());
        ensure_state_dirs(&paths).unwrap();
        assert!(paths.tmp.is_dir());
        assert!(paths.fixtures.is_dir());
    }

    #[test]
    fn test_baseline_meta_path() {
        let meta = baseline_meta_path(Path::new("/x/.trajectly/baselines/checkout.jsonl"));
        assert_eq!(
            meta,
            Path::new("/x/.trajectly/baselines/checkout.meta.json")
        );
    }
}
