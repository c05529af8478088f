// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Engine configuration
//!
//! Loaded from `.shipflow/config.yaml`. Every field has a default, so a
//! missing file is the same as an empty one.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::ShipflowError;

/// Default location of the configuration file, relative to the project root
pub const CONFIG_FILE: &str = ".shipflow/config.yaml";

/// Engine-wide settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory holding pipeline definitions
    #[serde(default = "default_pipelines_dir")]
    pub pipelines_dir: PathBuf,

    /// Directory for per-run state (step output files)
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Run budget for pipelines that do not set `timeout_secs`
    #[serde(default)]
    pub default_timeout_secs: Option<u64>,

    /// Revision whose history is counted for build versions
    #[serde(default = "default_revision")]
    pub revision: String,
}

fn default_pipelines_dir() -> PathBuf {
    PathBuf::from(".shipflow/pipelines")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".shipflow/state")
}

fn default_revision() -> String {
    "HEAD".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pipelines_dir: default_pipelines_dir(),
            state_dir: default_state_dir(),
            default_timeout_secs: None,
            revision: default_revision(),
        }
    }
}

impl EngineConfig {
    /// Load from file
    pub fn load(path: &Path) -> Result<Self, ShipflowError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ShipflowError::FileReadError {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_yaml::from_str(&content).map_err(|e| ShipflowError::Yaml {
            message: format!("{}: {}", path.display(), e),
        })
    }

    /// Load `.shipflow/config.yaml` under a project root
    pub fn load_from_project(project_root: &Path) -> Result<Self, ShipflowError> {
        Self::load(&project_root.join(CONFIG_FILE))
    }

    /// Resolve relative directories against a project root
    pub fn rooted_at(mut self, project_root: &Path) -> Self {
        self.pipelines_dir = project_root.join(&self.pipelines_dir);
        self.state_dir = project_root.join(&self.state_dir);
        self
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig::load_from_project(dir.path()).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.revision, "HEAD");
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".shipflow")).unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "pipelines_dir: ci/pipelines\ndefault_timeout_secs: 900\n",
        )
        .unwrap();

        let config = EngineConfig::load_from_project(dir.path()).unwrap().rooted_at(dir.path());
        assert_eq!(config.pipelines_dir, dir.path().join("ci/pipelines"));
        assert_eq!(config.state_dir, dir.path().join(".shipflow/state"));
        assert_eq!(config.default_timeout(), Some(Duration::from_secs(900)));
    }

    #[test]
    fn test_invalid_yaml_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "default_timeout_secs: [oops").unwrap();
        assert!(matches!(EngineConfig::load(&path), Err(ShipflowError::Yaml { .. })));
    }
}
