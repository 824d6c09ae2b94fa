//! One pytest invocation producing a stage's test and coverage reports.
use super::report::{CoverageReport, TestReport};
use crate::util::{display_path, write_json_atomic};
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::Path;
use std::process::Command;
use std::time::Instant;

/// pytest exit code: tests ran and all passed.
const EXIT_OK: i32 = 0;
/// pytest exit code: tests ran and some failed.
const EXIT_TESTS_FAILED: i32 = 1;
/// pytest exit code: interrupted, typically by collection errors.
const EXIT_INTERRUPTED: i32 = 2;
/// pytest exit code: nothing was collected.
const EXIT_NO_TESTS: i32 = 5;

/// Where pytest runs and where its reports go.
#[derive(Debug, Clone, Copy)]
pub struct PytestInvocation<'a> {
    pub python: &'a Path,
    pub test_root: &'a Path,
    pub code_path: &'a Path,
    pub test_report: &'a Path,
    pub cov_report: &'a Path,
    /// Workspace directory; never collected, since it holds file snapshots.
    pub output_dir: &'a Path,
}

impl PytestInvocation<'_> {
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "-m".to_string(),
            "pytest".to_string(),
            "--json-report".to_string(),
            format!("--json-report-file={}", display_path(self.test_report, None)),
            format!("--cov={}", display_path(self.code_path, None)),
            format!("--cov-report=json:{}", display_path(self.cov_report, None)),
        ];
        if self.output_dir.starts_with(self.test_root) {
            args.push(format!("--ignore={}", display_path(self.output_dir, None)));
        }
        args.push("-q".to_string());
        args
    }
}

/// Reports of one test stage.
#[derive(Debug, Clone)]
pub struct TestRun {
    pub report: TestReport,
    pub coverage: Option<CoverageReport>,
}

impl TestRun {
    /// Re-read the reports a previous run left on disk.
    pub fn load(test_report: &Path, cov_report: &Path) -> Result<Self> {
        Ok(Self {
            report: TestReport::load(test_report)?,
            coverage: CoverageReport::load(cov_report)?,
        })
    }
}

/// Run pytest and read back its reports.
pub fn run_pytest(invocation: &PytestInvocation<'_>) -> Result<TestRun> {
    if let Some(parent) = invocation.test_report.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create {}", display_path(parent, None)))?;
    }
    for stale in [invocation.test_report, invocation.cov_report] {
        if stale.is_file() {
            fs::remove_file(stale)
                .with_context(|| format!("remove stale {}", display_path(stale, None)))?;
        }
    }

    let start = Instant::now();
    let output = Command::new(invocation.python)
        .args(invocation.args())
        .current_dir(invocation.test_root)
        .output()
        .with_context(|| format!("spawn pytest with {}", display_path(invocation.python, None)))?;
    let elapsed_ms = start.elapsed().as_millis();
    let code = output.status.code();
    tracing::info!(elapsed_ms, exit_code = code.unwrap_or(-1), "pytest complete");

    match code {
        Some(EXIT_OK | EXIT_TESTS_FAILED) => {}
        Some(EXIT_INTERRUPTED) if invocation.test_report.is_file() => {
            tracing::warn!("pytest was interrupted; using the partial report");
        }
        Some(EXIT_NO_TESTS) => {
            if !invocation.test_report.is_file() {
                write_json_atomic(invocation.test_report, &TestReport::default())?;
            }
            tracing::warn!(test_root = %display_path(invocation.test_root, None), "pytest collected no tests");
        }
        _ => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr
                .lines()
                .chain(stdout.lines())
                .rfind(|line| !line.trim().is_empty())
                .unwrap_or_default()
                .trim()
                .to_string();
            return Err(anyhow!(
                "pytest failed with status {}: {}",
                output.status,
                detail
            ));
        }
    }

    TestRun::load(invocation.test_report, invocation.cov_report)
}
