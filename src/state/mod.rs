//! Persisted run configuration and state for the migration workspace.
//!
//! Everything under the output directory is owned by this module's types so
//! repeated runs can pick up where the previous one left off.
/// Current schema version for `config.json`.
pub const CONFIG_SCHEMA_VERSION: u32 = 1;
/// Current schema version for `state.json`.
pub const STATE_SCHEMA_VERSION: u32 = 1;
/// Current schema version for `history.jsonl`.
pub const HISTORY_SCHEMA_VERSION: u32 = 1;

mod fingerprint;
mod history;
mod originals;
mod paths;

pub use fingerprint::fingerprint_files;
pub use history::{append_history, HistoryEntry};
pub use originals::{pending_restores, restore_applied, snapshot_original};
pub use paths::{round_stage, WorkspacePaths, PREMIG_STAGE};

use crate::util::{read_json_optional, write_json_atomic};
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The request recorded by the previous run, used to fill omitted CLI values.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunConfig {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub python_version: Option<String>,
}

/// A project file the tool has overwritten.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppliedFile {
    /// SHA-256 of the content before the first migration.
    pub original_sha256: String,
    /// SHA-256 of the content the tool last wrote.
    pub written_sha256: String,
    /// Round that produced the current content.
    pub round: u32,
}

/// Fingerprint of the tracked files when a test stage last produced reports.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageRecord {
    pub fingerprint: String,
    pub ran_at_epoch_ms: u128,
}

/// Contents of `state.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunState {
    pub schema_version: u32,
    #[serde(default)]
    pub applied: BTreeMap<String, AppliedFile>,
    #[serde(default)]
    pub stages: BTreeMap<String, StageRecord>,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            schema_version: STATE_SCHEMA_VERSION,
            applied: BTreeMap::new(),
            stages: BTreeMap::new(),
        }
    }
}

/// Load `config.json`, or an empty config when it does not exist yet.
pub fn load_config(paths: &WorkspacePaths) -> Result<RunConfig> {
    let Some(config) = read_json_optional::<RunConfig>(&paths.config_path())? else {
        return Ok(RunConfig {
            schema_version: CONFIG_SCHEMA_VERSION,
            ..RunConfig::default()
        });
    };
    if config.schema_version != CONFIG_SCHEMA_VERSION {
        return Err(anyhow!(
            "unsupported config schema_version {} in {}",
            config.schema_version,
            paths.config_path().display()
        ));
    }
    Ok(config)
}

/// Persist `config.json`.
pub fn write_config(paths: &WorkspacePaths, config: &RunConfig) -> Result<()> {
    write_json_atomic(&paths.config_path(), config)
}

/// Load `state.json`, or a fresh state when it does not exist yet.
pub fn load_state(paths: &WorkspacePaths) -> Result<RunState> {
    let Some(state) = read_json_optional::<RunState>(&paths.state_path())? else {
        return Ok(RunState::default());
    };
    if state.schema_version != STATE_SCHEMA_VERSION {
        return Err(anyhow!(
            "unsupported state schema_version {} in {}",
            state.schema_version,
            paths.state_path().display()
        ));
    }
    Ok(state)
}

/// Persist `state.json`.
pub fn write_state(paths: &WorkspacePaths, state: &RunState) -> Result<()> {
    write_json_atomic(&paths.state_path(), state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn missing_files_load_as_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let paths = WorkspacePaths::new(dir.path().join(".libmig"));
        assert_eq!(load_state(&paths).unwrap(), RunState::default());
        let config = load_config(&paths).unwrap();
        assert_eq!(config.schema_version, CONFIG_SCHEMA_VERSION);
        assert!(config.source.is_none());
    }

    #[test]
    fn state_persists_applied_files_and_stages() {
        let dir = tempfile::tempdir().unwrap();
        let paths = WorkspacePaths::new(PathBuf::from(dir.path()));
        let mut state = RunState::default();
        state.applied.insert(
            "app/client.py".to_string(),
            AppliedFile {
                original_sha256: "a".to_string(),
                written_sha256: "b".to_string(),
                round: 1,
            },
        );
        state.stages.insert(
            PREMIG_STAGE.to_string(),
            StageRecord {
                fingerprint: "f".to_string(),
                ran_at_epoch_ms: 1,
            },
        );
        write_state(&paths, &state).unwrap();
        assert_eq!(load_state(&paths).unwrap(), state);
    }

    #[test]
    fn config_with_future_schema_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let paths = WorkspacePaths::new(PathBuf::from(dir.path()));
        std::fs::write(paths.config_path(), r#"{"schema_version": 99}"#).unwrap();
        let err = load_config(&paths).unwrap_err();
        assert!(err.to_string().contains("schema_version 99"));
    }
}
