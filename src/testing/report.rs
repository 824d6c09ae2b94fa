//! Typed views of `test-report.json` and `cov-report.json`.
//!
//! The test report is pytest-json-report output, the coverage report is
//! coverage.py JSON as written by pytest-cov. Only the fields the workflow
//! reads are modeled; everything else is ignored.
use crate::util::read_json_optional;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Outcomes that count as a test working.
const OK_OUTCOMES: &[&str] = &["passed", "skipped", "xfailed", "xpassed"];

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TestSummary {
    #[serde(default)]
    pub passed: usize,
    #[serde(default)]
    pub failed: usize,
    #[serde(default)]
    pub error: usize,
    #[serde(default)]
    pub skipped: usize,
    #[serde(default)]
    pub total: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TestPhase {
    #[serde(default)]
    pub outcome: Option<String>,
    #[serde(default)]
    pub longrepr: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestCase {
    pub nodeid: String,
    pub outcome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup: Option<TestPhase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call: Option<TestPhase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teardown: Option<TestPhase>,
}

impl TestCase {
    pub fn is_ok(&self) -> bool {
        OK_OUTCOMES.contains(&self.outcome.as_str())
    }

    /// The most relevant traceback: call, then setup, then teardown.
    pub fn failure_detail(&self) -> Option<&str> {
        [&self.call, &self.setup, &self.teardown]
            .into_iter()
            .flatten()
            .find_map(|phase| phase.longrepr.as_deref())
            .filter(|detail| !detail.trim().is_empty())
    }
}

/// A collection node; a failed collector means a test module did not import.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Collector {
    pub nodeid: String,
    pub outcome: String,
    #[serde(default)]
    pub longrepr: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TestReport {
    #[serde(default)]
    pub exitcode: Option<i32>,
    #[serde(default)]
    pub summary: TestSummary,
    #[serde(default)]
    pub tests: Vec<TestCase>,
    #[serde(default)]
    pub collectors: Vec<Collector>,
}

impl TestReport {
    pub fn load(path: &Path) -> Result<Self> {
        read_json_optional(path)?.ok_or_else(|| anyhow!("missing test report {}", path.display()))
    }

    pub fn passed_ids(&self) -> BTreeSet<&str> {
        self.tests
            .iter()
            .filter(|test| test.outcome == "passed")
            .map(|test| test.nodeid.as_str())
            .collect()
    }

    /// Failing tests plus failed collectors, each as a test-like entry.
    pub fn problems(&self) -> Vec<Problem> {
        let mut problems: Vec<Problem> = self
            .tests
            .iter()
            .filter(|test| !test.is_ok())
            .map(|test| Problem {
                test_id: test.nodeid.clone(),
                outcome: test.outcome.clone(),
                detail: test.failure_detail().map(str::to_string),
            })
            .collect();
        problems.extend(
            self.collectors
                .iter()
                .filter(|collector| collector.outcome == "failed" && !collector.nodeid.is_empty())
                .map(|collector| Problem {
                    test_id: collector.nodeid.clone(),
                    outcome: "collection error".to_string(),
                    detail: collector.longrepr.clone(),
                }),
        );
        problems
    }
}

/// A test (or test module) that is not working.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Problem {
    pub test_id: String,
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Problems in `after` that were not problems in `before`.
///
/// A test counts when it passed before and does not pass now; a broken
/// collector counts when it was not already broken. Without a baseline every
/// problem counts.
pub fn regressions(before: Option<&TestReport>, after: &TestReport) -> Vec<Problem> {
    let Some(before) = before else {
        return after.problems();
    };
    let passed_before = before.passed_ids();
    let broken_before: BTreeSet<String> = before
        .problems()
        .into_iter()
        .filter(|problem| problem.outcome == "collection error")
        .map(|problem| problem.test_id)
        .collect();
    let mut found: Vec<Problem> = after
        .tests
        .iter()
        .filter(|test| test.outcome != "passed" && passed_before.contains(test.nodeid.as_str()))
        .map(|test| Problem {
            test_id: test.nodeid.clone(),
            outcome: test.outcome.clone(),
            detail: test.failure_detail().map(str::to_string),
        })
        .collect();
    found.extend(after.problems().into_iter().filter(|problem| {
        problem.outcome == "collection error" && !broken_before.contains(&problem.test_id)
    }));
    found
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CoverageTotals {
    #[serde(default)]
    pub percent_covered: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FileCoverage {
    #[serde(default)]
    pub summary: CoverageTotals,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CoverageReport {
    #[serde(default)]
    pub totals: CoverageTotals,
    #[serde(default)]
    pub files: BTreeMap<String, FileCoverage>,
}

impl CoverageReport {
    pub fn load(path: &Path) -> Result<Option<Self>> {
        read_json_optional(path)
    }

    /// Coverage of a project-relative file; coverage.py keys may be absolute.
    pub fn percent_for(&self, project_root: &Path, rel: &str) -> Option<f64> {
        if let Some(file) = self.files.get(rel) {
            return Some(file.summary.percent_covered);
        }
        let absolute = project_root.join(rel);
        self.files
            .iter()
            .find(|(key, _)| Path::new(key) == absolute || key.ends_with(&format!("/{rel}")))
            .map(|(_, file)| file.summary.percent_covered)
    }
}
