//! Deciding whether a test stage can reuse its previous reports.
use crate::state::{StageRecord, WorkspacePaths};

/// Tests count as already run only when nothing was migrated since the last
/// run and both of its reports are still on disk.
pub fn tests_already_run(
    no_new_migrations: bool,
    test_report_exists: bool,
    cov_report_exists: bool,
) -> bool {
    no_new_migrations && test_report_exists && cov_report_exists
}

/// Apply [`tests_already_run`] to one stage of the workspace.
///
/// "Nothing migrated since" means the tracked files still hash to the
/// fingerprint recorded when the stage last produced reports.
pub fn can_skip_stage(
    paths: &WorkspacePaths,
    stage: &str,
    record: Option<&StageRecord>,
    current_fingerprint: &str,
) -> bool {
    let no_new_migrations = record.is_some_and(|record| record.fingerprint == current_fingerprint);
    tests_already_run(
        no_new_migrations,
        paths.test_report_path(stage).is_file(),
        paths.cov_report_path(stage).is_file(),
    )
}
