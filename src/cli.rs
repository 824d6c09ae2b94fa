//! CLI argument parsing for the migration workflow.
//!
//! The CLI is thin: it only names the request. Resolution of defaults that
//! depend on the filesystem lives in `workflow::context`.
use clap::Parser;
use std::path::PathBuf;

/// Default output directory, resolved against `--code-path` when relative.
pub const DEFAULT_OUTPUT: &str = ".libmig";
/// Default bound on the number of files a single run may migrate.
pub const DEFAULT_MAX_FILES: usize = 20;

/// Root CLI entrypoint: one migration request per invocation.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "libmig",
    version,
    about = "Migrate a Python project from one library to another with an LM, then repair regressions with its tests",
    after_help = "Examples:\n  libmig requests httpx --code-path=my-app\n  libmig requests httpx --cp my-app --tr tests --sst\n  libmig --cp my-app --force-rerun --llm 'anthropic:claude-sonnet-4-5'"
)]
pub struct Args {
    /// The source library from which to migrate
    #[arg(value_name = "SOURCE")]
    pub source: Option<String>,

    /// The target library to which to migrate
    #[arg(value_name = "TARGET")]
    pub target: Option<String>,

    /// Root of the project to migrate
    #[arg(
        long = "code-path",
        visible_aliases = ["path", "cp"],
        value_name = "DIRECTORY",
        default_value = "."
    )]
    pub code_path: PathBuf,

    /// Directory, relative to the project, from which tests are run
    #[arg(long = "test-root", visible_alias = "tr", value_name = "DIRECTORY")]
    pub test_root: Option<PathBuf>,

    /// Requirements file (defaults to <code-path>/requirements.txt)
    #[arg(long = "requirements-file-path", visible_alias = "rfp", value_name = "FILE")]
    pub requirements_file_path: Option<PathBuf>,

    /// Reuse cached migration results for unchanged inputs [default: true]
    #[arg(long = "use-cache", overrides_with = "no_use_cache")]
    pub use_cache: bool,

    /// Never read or write the migration cache
    #[arg(long = "no-use-cache", overrides_with = "use_cache")]
    pub no_use_cache: bool,

    /// Ignore cached results and migrate again
    #[arg(long = "force-rerun")]
    pub force_rerun: bool,

    /// Abort when more than this many files use the source library
    #[arg(long = "max-files", value_name = "INTEGER", default_value_t = DEFAULT_MAX_FILES)]
    pub max_files: usize,

    /// Skip tests when nothing was migrated since their reports were written
    #[arg(long = "smart-skip-tests", visible_alias = "sst")]
    pub smart_skip_tests: bool,

    /// Where migration artifacts are written (relative to the project)
    #[arg(
        long = "output",
        short = 'o',
        visible_aliases = ["output-path", "out"],
        value_name = "PATH",
        default_value = DEFAULT_OUTPUT
    )]
    pub output: PathBuf,

    /// LM backend: claude[:model], anthropic[:model], openai[:model], or a shell command
    #[arg(long = "llm", value_name = "TEXT")]
    pub llm: Option<String>,

    /// Number of migrate-then-test rounds
    #[arg(long = "rounds", visible_alias = "r", value_name = "INTEGER")]
    pub rounds: Option<u32>,

    /// Repository name (defaults to the project directory name)
    #[arg(long = "repo", value_name = "TEXT")]
    pub repo: Option<String>,

    /// Python version for the test virtual environment
    #[arg(long = "python-version", visible_alias = "pyv", value_name = "TEXT")]
    pub python_version: Option<String>,

    /// Install completion for the current shell
    #[arg(long = "install-completion", conflicts_with = "show_completion")]
    pub install_completion: bool,

    /// Show completion for the current shell, to copy it or customize the installation
    #[arg(long = "show-completion")]
    pub show_completion: bool,
}

impl Args {
    /// Whether cached results may be consulted at all.
    pub fn use_cache(&self) -> bool {
        !self.no_use_cache
    }
}
