//! Migrate and repair rounds: rewrite files, then publish them together.
use super::context::MigrationContext;
use super::report::RewriteOrigin;
use crate::cache::{CacheKey, RewriteCache};
use crate::llm::{
    migrate_prompt, repair_prompt, select_client, template_digest, FailureNote, LlmSession,
    LlmSpec, PromptContext, RewriteKind, RewriteRequest,
};
use crate::requirements::{RequirementsChange, RequirementsFile};
use crate::staging::Transaction;
use crate::state::{self, snapshot_original, AppliedFile, RunState};
use crate::testing::{implicated_files, Problem};
use crate::util::sha256_hex;
use anyhow::{Context, Result};
use std::fs;

/// A file's new content and where it came from.
#[derive(Debug, Clone)]
pub(crate) struct FileRewrite {
    pub(crate) rel: String,
    pub(crate) code: String,
    pub(crate) explanation: String,
    pub(crate) origin: RewriteOrigin,
}

/// Rewrites files through the cache, building the LLM backend on first miss.
pub(crate) struct Rewriter<'a> {
    ctx: &'a MigrationContext,
    cache: RewriteCache,
    backend: String,
    templates: String,
    session: Option<LlmSession>,
}

impl<'a> Rewriter<'a> {
    pub(crate) fn new(ctx: &'a MigrationContext) -> Result<Self> {
        let backend = LlmSpec::parse(&ctx.llm)?.identity();
        Ok(Self {
            ctx,
            cache: RewriteCache::new(ctx.paths.cache_dir(), ctx.cache_policy),
            backend,
            templates: template_digest(),
            session: None,
        })
    }

    fn prompt_context(&self) -> PromptContext<'a> {
        let ctx = self.ctx;
        PromptContext {
            repo: &ctx.repo,
            source: &ctx.source,
            target: &ctx.target,
        }
    }

    fn key<'k>(
        &'k self,
        kind: RewriteKind,
        rel: &'k str,
        content: &'k str,
        failures: &'k str,
    ) -> CacheKey<'k> {
        CacheKey {
            kind,
            source: &self.ctx.source,
            target: &self.ctx.target,
            backend: &self.backend,
            templates: &self.templates,
            file: rel,
            content,
            failures,
        }
    }

    fn session(&mut self) -> Result<&LlmSession> {
        let session = match self.session.take() {
            Some(session) => session,
            None => LlmSession::new(select_client(&self.ctx.llm)?, self.ctx.paths.llm_log_path()),
        };
        Ok(self.session.insert(session))
    }

    fn rewrite(
        &mut self,
        kind: RewriteKind,
        round: u32,
        rel: &str,
        content: &str,
        failures: &str,
        prompt: impl FnOnce() -> String,
    ) -> Result<FileRewrite> {
        if let Some(hit) = self.cache.lookup(&self.key(kind, rel, content, failures)) {
            tracing::info!(file = rel, %kind, round, "using cached rewrite");
            return Ok(FileRewrite {
                rel: rel.to_string(),
                code: hit.code,
                explanation: hit.explanation,
                origin: RewriteOrigin::Cache,
            });
        }

        let request = RewriteRequest {
            kind,
            round,
            file: rel,
            prompt: prompt(),
        };
        let rewrite = self.session()?.rewrite(&request)?;
        tracing::info!(file = rel, %kind, round, attempts = rewrite.attempts, "rewrote file");
        self.cache
            .store(&self.key(kind, rel, content, failures), &rewrite.code, &rewrite.explanation)
            .with_context(|| format!("cache {kind} result for {rel}"))?;
        Ok(FileRewrite {
            rel: rel.to_string(),
            code: rewrite.code,
            explanation: rewrite.explanation,
            origin: RewriteOrigin::Llm,
        })
    }

    /// Round 1: migrate every candidate from its pristine content.
    pub(crate) fn migrate_files(&mut self, candidates: &[String]) -> Result<Vec<FileRewrite>> {
        let mut rewrites = Vec::with_capacity(candidates.len());
        for rel in candidates {
            let content = read_project_file(self.ctx, rel)?;
            let ctx = self.prompt_context();
            let rewrite = self.rewrite(RewriteKind::Migrate, 1, rel, &content, "", || {
                migrate_prompt(ctx, rel, &content)
            })?;
            rewrites.push(rewrite);
        }
        Ok(rewrites)
    }

    /// Rounds 2+: ask for fixes to `targets` given the regressions.
    pub(crate) fn repair_files(
        &mut self,
        round: u32,
        targets: &[String],
        problems: &[Problem],
    ) -> Result<Vec<FileRewrite>> {
        let mut rewrites = Vec::with_capacity(targets.len());
        for rel in targets {
            let content = read_project_file(self.ctx, rel)?;
            let original = fs::read_to_string(self.ctx.paths.original_path(rel))
                .unwrap_or_else(|_| content.clone());
            let notes = failure_notes(self.ctx, rel, problems);
            let digest = failures_digest(&notes);
            let ctx = self.prompt_context();
            let rewrite = self.rewrite(RewriteKind::Repair, round, rel, &content, &digest, || {
                repair_prompt(ctx, rel, &original, &content, &notes)
            })?;
            rewrites.push(rewrite);
        }
        Ok(rewrites)
    }
}

fn read_project_file(ctx: &MigrationContext, rel: &str) -> Result<String> {
    let path = ctx.code_path.join(rel);
    fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))
}

/// Failures that point at `rel`, or every failure when none do.
fn failure_notes(ctx: &MigrationContext, rel: &str, problems: &[Problem]) -> Vec<FailureNote> {
    let target = [rel.to_string()];
    let relevant: Vec<&Problem> = problems
        .iter()
        .filter(|problem| {
            !implicated_files(std::slice::from_ref(*problem), &ctx.code_path, &target).is_empty()
        })
        .collect();
    let chosen: Vec<&Problem> = if relevant.is_empty() {
        problems.iter().collect()
    } else {
        relevant
    };
    chosen
        .into_iter()
        .map(|problem| FailureNote {
            test_id: problem.test_id.clone(),
            outcome: problem.outcome.clone(),
            detail: problem.detail.clone(),
        })
        .collect()
}

fn failures_digest(notes: &[FailureNote]) -> String {
    let mut text = String::new();
    for note in notes {
        text.push_str(&note.test_id);
        text.push('\0');
        text.push_str(&note.outcome);
        text.push('\0');
        text.push_str(note.detail.as_deref().unwrap_or_default());
        text.push('\n');
    }
    sha256_hex(text.as_bytes())
}

/// The requirements file with the source swapped for the target.
pub(crate) struct RequirementsUpdate {
    pub(crate) change: RequirementsChange,
    pub(crate) text: String,
}

/// Rewrite the requirements file in memory; `None` when there is none.
pub(crate) fn update_requirements(ctx: &MigrationContext) -> Result<Option<RequirementsUpdate>> {
    if !ctx.requirements_file.is_file() {
        tracing::warn!(
            path = %ctx.requirements_file.display(),
            "requirements file not found; skipping requirements update"
        );
        return Ok(None);
    }
    let mut file = RequirementsFile::load(&ctx.requirements_file)?;
    let change = file.replace(&ctx.source, &ctx.target);
    Ok(Some(RequirementsUpdate {
        change,
        text: file.render(),
    }))
}

/// Publish the rewrites that change something, plus the requirements update.
///
/// Returns the project-relative paths that were written.
pub(crate) fn publish_round(
    ctx: &MigrationContext,
    state: &mut RunState,
    round: u32,
    rewrites: &[FileRewrite],
    requirements: Option<&RequirementsUpdate>,
) -> Result<Vec<String>> {
    let requirements_rel = ctx.requirements_rel();
    let mut pending: Vec<(&str, &str)> = Vec::new();
    for rewrite in rewrites {
        if read_project_file(ctx, &rewrite.rel)? == rewrite.code {
            tracing::info!(file = %rewrite.rel, round, "rewrite left file unchanged");
            continue;
        }
        write_explanation(ctx, round, rewrite)?;
        pending.push((rewrite.rel.as_str(), rewrite.code.as_str()));
    }

    let mut outside_requirements = None;
    if let Some(update) = requirements {
        match requirements_rel.as_deref() {
            Some(rel) => pending.push((rel, update.text.as_str())),
            None => outside_requirements = Some(update),
        }
    }

    let mut written = Vec::new();
    if !pending.is_empty() {
        let mut txn = Transaction::begin(&ctx.paths)?;
        for (rel, text) in &pending {
            snapshot_original(&ctx.paths, &ctx.code_path, state, rel)?;
            txn.stage_text(rel, text)?;
        }
        tracing::debug!(txn = txn.id(), files = pending.len(), "publishing round");
        written = txn.publish(&ctx.code_path)?;
        for (rel, text) in &pending {
            record_applied(ctx, state, rel, text, round)?;
        }
        state::write_state(&ctx.paths, state)?;
    }

    if let Some(update) = outside_requirements {
        tracing::warn!(
            path = %ctx.requirements_file.display(),
            "requirements file is outside the project; it will not be restored on rerun"
        );
        fs::write(&ctx.requirements_file, &update.text)
            .with_context(|| format!("write {}", ctx.requirements_file.display()))?;
    }
    Ok(written)
}

fn record_applied(
    ctx: &MigrationContext,
    state: &mut RunState,
    rel: &str,
    text: &str,
    round: u32,
) -> Result<()> {
    let original_sha256 = match state.applied.get(rel) {
        Some(existing) => existing.original_sha256.clone(),
        None => {
            let snapshot = ctx.paths.original_path(rel);
            let bytes =
                fs::read(&snapshot).with_context(|| format!("read {}", snapshot.display()))?;
            sha256_hex(&bytes)
        }
    };
    state.applied.insert(
        rel.to_string(),
        AppliedFile {
            original_sha256,
            written_sha256: sha256_hex(text.as_bytes()),
            round,
        },
    );
    Ok(())
}

fn write_explanation(ctx: &MigrationContext, round: u32, rewrite: &FileRewrite) -> Result<()> {
    let path = ctx.paths.explanation_path(round, &rewrite.rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let mut text = rewrite.explanation.trim().to_string();
    text.push('\n');
    fs::write(&path, text).with_context(|| format!("write {}", path.display()))
}
