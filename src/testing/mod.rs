//! Running the project's test suite and reading its reports.
mod pytest;
mod report;
mod smart_skip;
mod venv;

pub use pytest::{run_pytest, PytestInvocation, TestRun};
pub use report::{regressions, Problem};
pub use smart_skip::can_skip_stage;
pub use venv::{detect_python_version, InstallPlan, VirtualEnv};

use std::collections::BTreeSet;
use std::path::Path;

/// Files among `candidates` that the failing tests point at.
///
/// A file is implicated when its relative or absolute path appears in a test
/// id or traceback. Returns an empty list when nothing matches.
pub fn implicated_files(
    problems: &[Problem],
    project_root: &Path,
    candidates: &[String],
) -> Vec<String> {
    let mut found = BTreeSet::new();
    for rel in candidates {
        let absolute = project_root.join(rel).display().to_string();
        let mentioned = problems.iter().any(|problem| {
            problem.test_id.starts_with(rel.as_str())
                || problem
                    .detail
                    .as_deref()
                    .is_some_and(|detail| detail.contains(&absolute) || mentions_path(detail, rel))
        });
        if mentioned {
            found.insert(rel.clone());
        }
    }
    found.into_iter().collect()
}

/// pytest prints relative paths as `path:line:` at the start of a frame.
fn mentions_path(detail: &str, rel: &str) -> bool {
    detail.lines().any(|line| {
        line.trim_start()
            .strip_prefix(rel)
            .is_some_and(|rest| rest.starts_with(':'))
    })
}
