//! Typed paths into the migration workspace.
//!
//! Centralizing path construction keeps file access consistent across the
//! workflow and prevents drift when the layout evolves.
use std::path::{Path, PathBuf};

/// Stage name for the test run against the untouched project.
pub const PREMIG_STAGE: &str = "premig";

/// Convenience wrapper for locating artifacts under the output directory.
#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    root: PathBuf,
}

impl WorkspacePaths {
    /// Create a new path helper rooted at the resolved output directory.
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Return the output root used for path derivation.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Return the `config.json` path recording the last run request.
    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.json")
    }

    /// Return the `state.json` path.
    pub fn state_path(&self) -> PathBuf {
        self.root.join("state.json")
    }

    /// Return the `report.json` path.
    pub fn report_path(&self) -> PathBuf {
        self.root.join("report.json")
    }

    /// Return the `history.jsonl` path.
    pub fn history_path(&self) -> PathBuf {
        self.root.join("history.jsonl")
    }

    /// Return the `llm_log.jsonl` path.
    pub fn llm_log_path(&self) -> PathBuf {
        self.root.join("llm_log.jsonl")
    }

    /// Return the `cache/` directory path.
    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    /// Return the `original/` snapshot directory path.
    pub fn original_dir(&self) -> PathBuf {
        self.root.join("original")
    }

    /// Return the pristine snapshot path for a project-relative file.
    pub fn original_path(&self, rel: &str) -> PathBuf {
        self.original_dir().join(rel)
    }

    /// Return the `txns/` directory path.
    pub fn txns_root(&self) -> PathBuf {
        self.root.join("txns")
    }

    /// Return the per-transaction directory path.
    pub fn txn_root(&self, txn_id: &str) -> PathBuf {
        self.txns_root().join(txn_id)
    }

    /// Return the per-transaction staging directory path.
    pub fn txn_staging_root(&self, txn_id: &str) -> PathBuf {
        self.txn_root(txn_id).join("staging")
    }

    /// Return the directory holding one test stage's reports.
    pub fn stage_dir(&self, stage: &str) -> PathBuf {
        self.root.join(stage)
    }

    /// Return a stage's `test-report.json` path.
    pub fn test_report_path(&self, stage: &str) -> PathBuf {
        self.stage_dir(stage).join("test-report.json")
    }

    /// Return a stage's `cov-report.json` path.
    pub fn cov_report_path(&self, stage: &str) -> PathBuf {
        self.stage_dir(stage).join("cov-report.json")
    }

    /// Return the explanation path for a file migrated in the given round.
    pub fn explanation_path(&self, round: u32, rel: &str) -> PathBuf {
        self.stage_dir(&round_stage(round))
            .join("explanations")
            .join(format!("{rel}.md"))
    }

    /// Return the `venv/` path used for test runs.
    pub fn venv_dir(&self) -> PathBuf {
        self.root.join("venv")
    }
}

/// Stage name for the tests run after a migration round.
pub fn round_stage(round: u32) -> String {
    format!("round-{round}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_reports_live_under_stage_dir() {
        let paths = WorkspacePaths::new(PathBuf::from("/p/.libmig"));
        assert_eq!(
            paths.test_report_path(PREMIG_STAGE),
            PathBuf::from("/p/.libmig/premig/test-report.json")
        );
        assert_eq!(
            paths.cov_report_path(&round_stage(2)),
            PathBuf::from("/p/.libmig/round-2/cov-report.json")
        );
        assert_eq!(
            paths.explanation_path(1, "pkg/client.py"),
            PathBuf::from("/p/.libmig/round-1/explanations/pkg/client.py.md")
        );
    }
}
