//! Test stages: premig and one per round.
use super::context::MigrationContext;
use super::report::StageReport;
use crate::state::{self, fingerprint_files, RunState, StageRecord, PREMIG_STAGE};
use crate::testing::{
    can_skip_stage, run_pytest, InstallPlan, PytestInvocation, TestRun, VirtualEnv,
};
use crate::util::now_epoch_ms;
use anyhow::Result;

/// Runs stages against one lazily created virtual environment.
pub(crate) struct TestStages<'a> {
    ctx: &'a MigrationContext,
    venv: Option<VirtualEnv>,
}

impl<'a> TestStages<'a> {
    pub(crate) fn new(ctx: &'a MigrationContext) -> Self {
        Self { ctx, venv: None }
    }

    fn venv(&mut self, stage: &str) -> Result<&VirtualEnv> {
        let venv = match self.venv.take() {
            Some(venv) => venv,
            None => VirtualEnv::ensure(
                &self.ctx.paths.venv_dir(),
                self.ctx.python_version.as_deref(),
            )?,
        };
        let library = if stage == PREMIG_STAGE {
            &self.ctx.source
        } else {
            &self.ctx.target
        };
        let plan = InstallPlan {
            requirements_file: self
                .ctx
                .requirements_file
                .is_file()
                .then(|| self.ctx.requirements_file.clone()),
            project: Some(self.ctx.code_path.clone()),
            extra_packages: vec![library.clone()],
        };
        venv.install(&plan)?;
        Ok(self.venv.insert(venv))
    }

    /// Run (or, with smart skip, reuse) one stage and record its fingerprint.
    pub(crate) fn run(
        &mut self,
        state: &mut RunState,
        stage: &str,
        tracked: &[String],
    ) -> Result<(StageReport, TestRun)> {
        let ctx = self.ctx;
        let paths = &ctx.paths;
        let test_report = paths.test_report_path(stage);
        let cov_report = paths.cov_report_path(stage);
        let fingerprint = fingerprint_files(&ctx.code_path, tracked)?;

        if ctx.smart_skip_tests
            && can_skip_stage(paths, stage, state.stages.get(stage), &fingerprint)
        {
            tracing::info!(stage, "nothing migrated since the last run; reusing test reports");
            let run = TestRun::load(&test_report, &cov_report)?;
            return Ok((StageReport::from_run(stage, &run, true), run));
        }

        tracing::info!(stage, "running tests");
        let python = self.venv(stage)?.python();
        let run = run_pytest(&PytestInvocation {
            python: &python,
            test_root: &ctx.test_root,
            code_path: &ctx.code_path,
            test_report: &test_report,
            cov_report: &cov_report,
            output_dir: paths.root(),
        })?;

        state.stages.insert(
            stage.to_string(),
            StageRecord {
                fingerprint,
                ran_at_epoch_ms: now_epoch_ms()?,
            },
        );
        state::write_state(paths, state)?;
        Ok((StageReport::from_run(stage, &run, false), run))
    }
}
