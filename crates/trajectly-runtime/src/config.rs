use std::path::Path;

use serde::{Deserialize, Serialize};

use trajectly_types::FixturePolicy;

use crate::{Error, Result};

fn default_fixture_policy() -> FixturePolicy {
    FixturePolicy::ByIndex
}

/// Workspace defaults stored at `.trajectly/config.toml`. Specs override
/// these per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    #[serde(default = "default_fixture_policy")]
    pub default_fixture_policy: FixturePolicy,
    #[serde(default)]
    pub default_strict: bool,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        WorkspaceConfig {
            default_fixture_policy: default_fixture_policy(),
            default_strict: false,
        }
    }
}

impl WorkspaceConfig {
    pub fn load_from(path: &Path) -> Result<WorkspaceConfig> {
        if !path.exists() {
            return Ok(WorkspaceConfig::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: WorkspaceConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|err| Error::Config(err.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_nonexistent_returns_default() {
        let dir = TempDir::new().unwrap();
        let config = WorkspaceConfig::load_from(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(config.default_fixture_policy, FixturePolicy::ByIndex);
        assert!(!config.default_strict);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let config = WorkspaceConfig {
            default_fixture_policy: FixturePolicy::ByHash,
            default_strict: true,
        };
        config.save_to(&path).unwrap();
        let loaded = WorkspaceConfig::load_from(&path).unwrap();
        assert_eq!(loaded.default_fixture_policy, FixturePolicy::ByHash);
        assert!(loaded.default_strict);
    }
}
