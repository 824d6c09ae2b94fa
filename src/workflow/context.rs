use crate::cache::CachePolicy;
use crate::cli::Args;
use crate::llm::DEFAULT_LLM;
use crate::state::{self, RunConfig, WorkspacePaths, CONFIG_SCHEMA_VERSION};
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Rounds run when `--rounds` is not given.
pub(crate) const DEFAULT_ROUNDS: u32 = 3;
/// Environment variable naming the LLM backend.
pub(crate) const LLM_ENV: &str = "LIBMIG_LLM";

/// A fully resolved migration request.
#[derive(Debug, Clone)]
pub(crate) struct MigrationContext {
    pub(crate) source: String,
    pub(crate) target: String,
    pub(crate) code_path: PathBuf,
    pub(crate) test_root: PathBuf,
    pub(crate) requirements_file: PathBuf,
    pub(crate) paths: WorkspacePaths,
    pub(crate) repo: String,
    pub(crate) rounds: u32,
    pub(crate) llm: String,
    pub(crate) python_version: Option<String>,
    pub(crate) cache_policy: CachePolicy,
    pub(crate) max_files: usize,
    pub(crate) smart_skip_tests: bool,
}

impl MigrationContext {
    /// Resolve CLI values against the environment and the recorded config.
    ///
    /// Reads only; nothing under the output directory is created here.
    pub(crate) fn resolve(args: &Args, env_llm: Option<String>) -> Result<Self> {
        let code_path = fs::canonicalize(&args.code_path)
            .with_context(|| format!("resolve --code-path {}", args.code_path.display()))?;
        if !code_path.is_dir() {
            return Err(anyhow!(
                "--code-path {} is not a directory",
                code_path.display()
            ));
        }

        let paths = WorkspacePaths::new(resolve_against(&code_path, &args.output));
        let recorded = state::load_config(&paths)?;

        let source = args
            .source
            .clone()
            .or_else(|| recorded.source.clone())
            .ok_or_else(|| {
                anyhow!(
                    "missing SOURCE library (none given and none recorded in {})",
                    paths.config_path().display()
                )
            })?;
        let target = args
            .target
            .clone()
            .or_else(|| recorded.target.clone())
            .ok_or_else(|| {
                anyhow!(
                    "missing TARGET library (none given and none recorded in {})",
                    paths.config_path().display()
                )
            })?;
        if crate::discovery::normalize_name(&source) == crate::discovery::normalize_name(&target) {
            return Err(anyhow!("source and target are both {source}; nothing to migrate"));
        }

        let rounds = args.rounds.unwrap_or(DEFAULT_ROUNDS);
        if rounds == 0 {
            return Err(anyhow!("--rounds must be at least 1"));
        }

        let requirements_file = match &args.requirements_file_path {
            Some(path) => resolve_against(&code_path, path),
            None => code_path.join("requirements.txt"),
        };
        let test_root = match &args.test_root {
            Some(path) => resolve_against(&code_path, path),
            None => code_path.clone(),
        };
        if !test_root.is_dir() {
            return Err(anyhow!(
                "--test-root {} is not a directory",
                test_root.display()
            ));
        }

        let repo = args
            .repo
            .clone()
            .or_else(|| recorded.repo.clone())
            .or_else(|| {
                code_path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| "project".to_string());

        let llm = args
            .llm
            .clone()
            .or(env_llm.filter(|value| !value.trim().is_empty()))
            .or_else(|| recorded.llm.clone())
            .unwrap_or_else(|| DEFAULT_LLM.to_string());

        let python_version = args
            .python_version
            .clone()
            .or_else(|| recorded.python_version.clone());

        Ok(Self {
            source,
            target,
            code_path,
            test_root,
            requirements_file,
            paths,
            repo,
            rounds,
            llm,
            python_version,
            cache_policy: CachePolicy::from_flags(args.use_cache(), args.force_rerun),
            max_files: args.max_files,
            smart_skip_tests: args.smart_skip_tests,
        })
    }

    /// The values recorded for the next run.
    pub(crate) fn run_config(&self) -> RunConfig {
        RunConfig {
            schema_version: CONFIG_SCHEMA_VERSION,
            source: Some(self.source.clone()),
            target: Some(self.target.clone()),
            repo: Some(self.repo.clone()),
            llm: Some(self.llm.clone()),
            python_version: self.python_version.clone(),
        }
    }

    /// Requirements file as a project-relative path, when it lives inside the project.
    pub(crate) fn requirements_rel(&self) -> Option<String> {
        self.requirements_file
            .strip_prefix(&self.code_path)
            .ok()
            .map(|rel| {
                rel.components()
                    .map(|part| part.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/")
            })
    }
}

fn resolve_against(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
