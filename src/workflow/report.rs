//! `report.json` and the printed run summary.
use crate::requirements::RequirementsChange;
use crate::testing::{Problem, TestRun};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::Path;

/// Current schema version for `report.json`.
pub(crate) const REPORT_SCHEMA_VERSION: u32 = 1;

/// Where a file's current content came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum RewriteOrigin {
    Cache,
    Llm,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct FileReport {
    pub(crate) path: String,
    /// Last round that changed the file.
    pub(crate) round: u32,
    pub(crate) origin: RewriteOrigin,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) coverage_percent: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct StageReport {
    pub(crate) stage: String,
    /// Reports were reused from a previous run instead of running pytest.
    pub(crate) reused: bool,
    pub(crate) passed: usize,
    pub(crate) failed: usize,
    pub(crate) errors: usize,
    pub(crate) skipped: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) coverage_percent: Option<f64>,
}

impl StageReport {
    pub(crate) fn from_run(stage: &str, run: &TestRun, reused: bool) -> Self {
        let count = |outcome: &str| {
            run.report
                .tests
                .iter()
                .filter(|test| test.outcome == outcome)
                .count()
        };
        let collection_errors = run
            .report
            .collectors
            .iter()
            .filter(|collector| collector.outcome == "failed")
            .count();
        Self {
            stage: stage.to_string(),
            reused,
            passed: count("passed"),
            failed: count("failed"),
            errors: count("error") + collection_errors,
            skipped: count("skipped"),
            coverage_percent: run
                .coverage
                .as_ref()
                .map(|coverage| coverage.totals.percent_covered),
        }
    }
}

/// Contents of `report.json`.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct MigrationReport {
    pub(crate) schema_version: u32,
    pub(crate) source: String,
    pub(crate) target: String,
    pub(crate) repo: String,
    pub(crate) code_path: String,
    pub(crate) llm: String,
    pub(crate) rounds_run: u32,
    pub(crate) files: Vec<FileReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) requirements: Option<RequirementsChange>,
    /// False when the project has no tests to run.
    pub(crate) tests_found: bool,
    pub(crate) stages: Vec<StageReport>,
    pub(crate) regressions: Vec<Problem>,
    /// LLM calls made by this run; cache hits make none.
    pub(crate) llm_calls: usize,
    pub(crate) success: bool,
}

impl MigrationReport {
    /// Human-readable summary for stdout.
    pub(crate) fn summary(&self, report_path: &Path) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "libmig: migrated {} file(s) in {} from {} to {} ({} round(s), {} LLM call(s))",
            self.files.len(),
            self.repo,
            self.source,
            self.target,
            self.rounds_run,
            self.llm_calls
        );
        for file in &self.files {
            let origin = match file.origin {
                RewriteOrigin::Cache => "cache",
                RewriteOrigin::Llm => "llm",
            };
            let _ = writeln!(out, "  {} (round {}, {origin})", file.path, file.round);
        }
        if let Some(change) = &self.requirements {
            let before = match (&change.source_specifier, &change.source_version) {
                _ if change.source_versions.len() > 1 => format!(
                    "{} ({})",
                    self.source,
                    change.source_versions.join(", ")
                ),
                (_, Some(version)) => format!("{}=={version}", self.source),
                (Some(spec), None) if !spec.is_empty() => format!("{}{spec}", self.source),
                _ => self.source.clone(),
            };
            let action = if change.removed {
                format!("removed {before} ({} already listed)", self.target)
            } else if change.added {
                format!("added {}", self.target)
            } else if change.replaced {
                format!("{before} -> {}", self.target)
            } else {
                format!("unchanged ({} already listed)", self.target)
            };
            let _ = writeln!(out, "  requirements: {action}");
        }
        if !self.tests_found {
            let _ = writeln!(out, "  tests: none found; skipped");
        }
        for stage in &self.stages {
            let coverage = stage
                .coverage_percent
                .map(|percent| format!(", {percent:.1}% covered"))
                .unwrap_or_default();
            let reused = if stage.reused { " (reused)" } else { "" };
            let _ = writeln!(
                out,
                "  {}: {} passed, {} failed, {} errors, {} skipped{coverage}{reused}",
                stage.stage, stage.passed, stage.failed, stage.errors, stage.skipped
            );
        }
        if self.regressions.is_empty() {
            let _ = writeln!(out, "  regressions: none");
        } else {
            let _ = writeln!(out, "  regressions: {}", self.regressions.len());
            for problem in self.regressions.iter().take(10) {
                let _ = writeln!(out, "    {} ({})", problem.test_id, problem.outcome);
            }
        }
        let _ = write!(out, "  report: {}", report_path.display());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> MigrationReport {
        MigrationReport {
            schema_version: REPORT_SCHEMA_VERSION,
            source: "requests".to_string(),
            target: "httpx".to_string(),
            repo: "my-app".to_string(),
            code_path: "/p/my-app".to_string(),
            llm: "claude".to_string(),
            rounds_run: 2,
            files: vec![FileReport {
                path: "app/api.py".to_string(),
                round: 2,
                origin: RewriteOrigin::Llm,
                coverage_percent: Some(80.0),
            }],
            requirements: Some(RequirementsChange {
                source_specifier: Some("==2.31.0".to_string()),
                source_version: Some("2.31.0".to_string()),
                source_versions: vec!["2.31.0".to_string()],
                duplicates_removed: 0,
                replaced: true,
                removed: false,
                added: false,
            }),
            tests_found: true,
            stages: vec![],
            regressions: vec![Problem {
                test_id: "tests/test_api.py::test_get".to_string(),
                outcome: "failed".to_string(),
                detail: None,
            }],
            llm_calls: 3,
            success: false,
        }
    }

    #[test]
    fn summary_names_files_requirements_and_regressions() {
        let text = report().summary(Path::new("/p/my-app/.libmig/report.json"));
        assert!(text.starts_with("libmig: migrated 1 file(s) in my-app from requests to httpx"));
        assert!(text.contains("app/api.py (round 2, llm)"));
        assert!(text.contains("requirements: requests==2.31.0 -> httpx"));
        assert!(text.contains("regressions: 1"));
        assert!(text.ends_with("report: /p/my-app/.libmig/report.json"));
    }

    #[test]
    fn summary_lists_every_replaced_pin() {
        let mut report = report();
        report.requirements = Some(RequirementsChange {
            source_version: Some("2.25".to_string()),
            source_versions: vec!["2.25".to_string(), "2.31".to_string()],
            duplicates_removed: 1,
            replaced: true,
            ..RequirementsChange::default()
        });
        let text = report.summary(Path::new("report.json"));
        assert!(text.contains("requirements: requests (2.25, 2.31) -> httpx"));
    }

    #[test]
    fn report_serializes_origin_in_snake_case() {
        let json = serde_json::to_value(report()).unwrap();
        assert_eq!(json["files"][0]["origin"], "llm");
        assert_eq!(json["requirements"]["source_version"], "2.31.0");
        assert_eq!(json["success"], false);
    }

    #[test]
    fn stage_counts_include_collection_errors() {
        let run = TestRun {
            report: serde_json::from_str(
                r#"{"tests": [
                {"nodeid": "a", "outcome": "passed"},
                {"nodeid": "b", "outcome": "failed"},
                {"nodeid": "c", "outcome": "skipped"}
            ],
            "collectors": [{"nodeid": "tests/test_x.py", "outcome": "failed"}]}"#,
            )
            .unwrap(),
            coverage: None,
        };
        let stage = StageReport::from_run("round-1", &run, true);
        assert_eq!(
            (stage.passed, stage.failed, stage.errors, stage.skipped),
            (1, 1, 1, 1)
        );
        assert!(stage.reused);
    }
}
