//! The migration workflow: discover, test, migrate, test, repair.
//!
//! Each run starts from the pristine project (previously applied files are
//! restored first), so cached rewrites replay onto the inputs that produced
//! them and a rerun converges on the same result.
mod context;
mod report;
mod rounds;
mod stage;

use crate::cli::Args;
use crate::discovery::{enforce_max_files, find_files_using, has_test_files, ImportMatcher};
use crate::llm::load_llm_log;
use crate::state::{
    self, append_history, pending_restores, restore_applied, round_stage, HistoryEntry, RunState,
    HISTORY_SCHEMA_VERSION, PREMIG_STAGE,
};
use crate::testing::{detect_python_version, implicated_files, regressions, Problem, TestRun};
use crate::util::{now_epoch_ms, write_json_atomic};
use anyhow::{Context, Result};
use context::{MigrationContext, LLM_ENV};
use report::{FileReport, MigrationReport, StageReport, REPORT_SCHEMA_VERSION};
use rounds::{publish_round, update_requirements, FileRewrite, Rewriter};
use stage::TestStages;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;

/// Run one migration request end to end.
pub fn run_migration(args: &Args) -> Result<()> {
    let started_at = now_epoch_ms()?;
    let mut ctx = MigrationContext::resolve(args, std::env::var(LLM_ENV).ok())?;
    let mut state = state::load_state(&ctx.paths)?;

    let candidates = discover_candidates(&ctx, &state)?;
    enforce_max_files(&candidates, ctx.max_files, &ctx.source)?;
    let tests_found = has_test_files(&ctx.test_root, ctx.paths.root());
    if tests_found && ctx.python_version.is_none() {
        ctx.python_version = detect_python_version();
    }
    let mut rewriter = Rewriter::new(&ctx)?;
    tracing::info!(
        source = %ctx.source,
        target = %ctx.target,
        code_path = %ctx.code_path.display(),
        output = %ctx.paths.root().display(),
        files = candidates.len(),
        "starting migration"
    );

    state::write_config(&ctx.paths, &ctx.run_config())?;
    let restored = restore_applied(&ctx.paths, &ctx.code_path, &mut state)?;
    if !restored.restored.is_empty() {
        tracing::info!(
            count = restored.restored.len(),
            "restored previously migrated files"
        );
    }
    state::write_state(&ctx.paths, &state)?;

    let mut tracked = candidates.clone();
    tracked.extend(ctx.requirements_rel());
    let mut stages = TestStages::new(&ctx);
    let mut stage_reports: Vec<StageReport> = Vec::new();
    let mut files: BTreeMap<String, FileReport> = BTreeMap::new();
    let mut requirements = None;
    let mut remaining: Vec<Problem> = Vec::new();
    let mut last_run: Option<TestRun> = None;
    let mut rounds_run = 0;

    if candidates.is_empty() {
        tracing::warn!(source = %ctx.source, "no files use the source library; nothing to migrate");
    } else {
        let baseline = if tests_found {
            let (report, run) = stages.run(&mut state, PREMIG_STAGE, &tracked)?;
            stage_reports.push(report);
            Some(run.report)
        } else {
            tracing::warn!(
                test_root = %ctx.test_root.display(),
                "no test files found; skipping tests"
            );
            None
        };

        let rewrites = rewriter.migrate_files(&candidates)?;
        let update = update_requirements(&ctx)?;
        publish_round(&ctx, &mut state, 1, &rewrites, update.as_ref())?;
        record_files(&mut files, 1, &rewrites);
        requirements = update.map(|update| update.change);
        rounds_run = 1;

        if tests_found {
            let (report, run) = stages.run(&mut state, &round_stage(1), &tracked)?;
            stage_reports.push(report);
            remaining = regressions(baseline.as_ref(), &run.report);
            last_run = Some(run);
        }

        for round in 2..=ctx.rounds {
            if remaining.is_empty() {
                break;
            }
            let migrated: Vec<String> = files.keys().cloned().collect();
            let mut targets = implicated_files(&remaining, &ctx.code_path, &migrated);
            if targets.is_empty() {
                targets = migrated;
            }
            tracing::info!(
                round,
                regressions = remaining.len(),
                files = targets.len(),
                "repairing regressions"
            );
            let rewrites = rewriter.repair_files(round, &targets, &remaining)?;
            let written = publish_round(&ctx, &mut state, round, &rewrites, None)?;
            if written.is_empty() {
                tracing::warn!(round, "repair changed no files; stopping");
                break;
            }
            let changed: BTreeSet<&String> = written.iter().collect();
            let changed_rewrites: Vec<FileRewrite> = rewrites
                .into_iter()
                .filter(|rewrite| changed.contains(&rewrite.rel))
                .collect();
            record_files(&mut files, round, &changed_rewrites);
            rounds_run = round;

            let (report, run) = stages.run(&mut state, &round_stage(round), &tracked)?;
            stage_reports.push(report);
            remaining = regressions(baseline.as_ref(), &run.report);
            last_run = Some(run);
        }
    }

    if let Some(coverage) = last_run.as_ref().and_then(|run| run.coverage.as_ref()) {
        for file in files.values_mut() {
            file.coverage_percent = coverage.percent_for(&ctx.code_path, &file.path);
        }
    }
    let llm_calls = load_llm_log(&ctx.paths.llm_log_path())?
        .iter()
        .filter(|entry| entry.ts >= started_at)
        .count();

    let report = MigrationReport {
        schema_version: REPORT_SCHEMA_VERSION,
        source: ctx.source.clone(),
        target: ctx.target.clone(),
        repo: ctx.repo.clone(),
        code_path: ctx.code_path.display().to_string(),
        llm: ctx.llm.clone(),
        rounds_run,
        files: files.into_values().collect(),
        requirements,
        tests_found,
        stages: stage_reports,
        success: remaining.is_empty(),
        regressions: remaining,
        llm_calls,
    };
    let report_path = ctx.paths.report_path();
    write_json_atomic(&report_path, &report)?;
    append_history(
        &ctx.paths,
        &HistoryEntry {
            schema_version: HISTORY_SCHEMA_VERSION,
            started_at_epoch_ms: started_at,
            finished_at_epoch_ms: now_epoch_ms()?,
            source: report.source.clone(),
            target: report.target.clone(),
            repo: report.repo.clone(),
            files_migrated: report.files.len(),
            rounds_run: report.rounds_run,
            regressions_remaining: report.regressions.len(),
            success: report.success,
            message: (!report.success)
                .then(|| format!("{} regression(s) remain", report.regressions.len())),
        },
    )?;

    println!("{}", report.summary(&report_path));
    Ok(())
}

/// Files importing the source library, judged on pristine content.
///
/// Files this tool already migrated are judged by their snapshot, since the
/// restore that puts them back has not happened yet.
fn discover_candidates(ctx: &MigrationContext, state: &RunState) -> Result<Vec<String>> {
    let mut found: BTreeSet<String> =
        find_files_using(&ctx.code_path, ctx.paths.root(), &ctx.source)?
            .into_iter()
            .collect();
    let pending = pending_restores(&ctx.paths, &ctx.code_path, state)?;
    if pending.is_empty() {
        return Ok(found.into_iter().collect());
    }
    let matcher = ImportMatcher::for_library(&ctx.source)?;
    for rel in pending {
        if !rel.ends_with(".py") {
            continue;
        }
        let snapshot = ctx.paths.original_path(&rel);
        let original =
            fs::read(&snapshot).with_context(|| format!("read {}", snapshot.display()))?;
        if matcher.matches(&String::from_utf8_lossy(&original)) {
            found.insert(rel);
        } else {
            found.remove(&rel);
        }
    }
    Ok(found.into_iter().collect())
}

fn record_files(files: &mut BTreeMap<String, FileReport>, round: u32, rewrites: &[FileRewrite]) {
    for rewrite in rewrites {
        files.insert(
            rewrite.rel.clone(),
            FileReport {
                path: rewrite.rel.clone(),
                round,
                origin: rewrite.origin,
                coverage_percent: None,
            },
        );
    }
}
