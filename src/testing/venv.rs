//! Virtual environment used to run the project's tests.
//!
//! `uv` is preferred when it is on PATH; otherwise the stdlib `venv` module
//! and pip are used. Installs are skipped when the inputs have not changed
//! since the last successful install.
use crate::util::{display_path, sha256_hex};
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::Instant;

/// Packages needed to produce the test and coverage reports.
pub const TEST_TOOLING: &[&str] = &["pytest", "pytest-json-report", "pytest-cov"];

const INSTALL_MARKER: &str = ".libmig-installed";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Installer {
    Uv(PathBuf),
    Pip,
}

/// What to install into the environment.
#[derive(Debug, Clone, Default)]
pub struct InstallPlan {
    pub requirements_file: Option<PathBuf>,
    /// Project root installed in editable mode when it is a package.
    pub project: Option<PathBuf>,
    pub extra_packages: Vec<String>,
}

impl InstallPlan {
    /// Hash of everything that shapes the install.
    fn digest(&self) -> Result<String> {
        let mut parts = Vec::new();
        if let Some(path) = &self.requirements_file {
            let bytes =
                fs::read(path).with_context(|| format!("read {}", display_path(path, None)))?;
            parts.push(format!("requirements:{}", sha256_hex(&bytes)));
        }
        if let Some(project) = &self.project {
            parts.push(format!("project:{}", display_path(project, None)));
        }
        parts.extend(self.extra_packages.iter().map(|pkg| format!("pkg:{pkg}")));
        parts.extend(TEST_TOOLING.iter().map(|pkg| format!("pkg:{pkg}")));
        Ok(sha256_hex(parts.join("\n").as_bytes()))
    }
}

#[derive(Debug, Clone)]
pub struct VirtualEnv {
    dir: PathBuf,
    installer: Installer,
}

impl VirtualEnv {
    /// Create the environment at `dir` unless it already has an interpreter.
    pub fn ensure(dir: &Path, python_version: Option<&str>) -> Result<Self> {
        let installer = match which::which("uv") {
            Ok(uv) => Installer::Uv(uv),
            Err(_) => Installer::Pip,
        };
        let venv = Self {
            dir: dir.to_path_buf(),
            installer,
        };
        if venv.python().is_file() {
            tracing::debug!(dir = %display_path(dir, None), "reusing virtual environment");
            return Ok(venv);
        }

        tracing::info!(
            dir = %display_path(dir, None),
            python = python_version.unwrap_or("default"),
            "creating virtual environment"
        );
        let mut command = match &venv.installer {
            Installer::Uv(uv) => {
                let mut command = Command::new(uv);
                command.arg("venv");
                if let Some(version) = python_version {
                    command.args(["--python", version]);
                }
                command.arg(dir);
                command
            }
            Installer::Pip => {
                let mut command = Command::new(find_interpreter(python_version)?);
                command.args(["-m", "venv"]).arg(dir);
                command
            }
        };
        run_checked(&mut command, "create virtual environment")?;
        if !venv.python().is_file() {
            return Err(anyhow!(
                "virtual environment at {} has no interpreter",
                display_path(dir, None)
            ));
        }
        Ok(venv)
    }

    pub fn python(&self) -> PathBuf {
        if cfg!(windows) {
            self.dir.join("Scripts").join("python.exe")
        } else {
            self.dir.join("bin").join("python")
        }
    }

    /// Install the plan, skipping work when the same plan was installed last.
    pub fn install(&self, plan: &InstallPlan) -> Result<()> {
        let digest = plan.digest()?;
        let marker = self.dir.join(INSTALL_MARKER);
        if fs::read_to_string(&marker).is_ok_and(|stored| stored.trim() == digest) {
            tracing::debug!("dependencies unchanged; skipping install");
            return Ok(());
        }

        let mut packages: Vec<String> = TEST_TOOLING.iter().map(|pkg| pkg.to_string()).collect();
        packages.extend(plan.extra_packages.iter().cloned());
        let mut args = Vec::new();
        if let Some(requirements) = &plan.requirements_file {
            args.push("-r".to_string());
            args.push(display_path(requirements, None));
        }
        args.extend(packages);
        self.pip_install(&args)
            .context("install test dependencies")?;

        if let Some(project) = plan.project.as_deref().filter(|root| is_python_package(root)) {
            let editable = vec!["-e".to_string(), display_path(project, None)];
            if let Err(err) = self.pip_install(&editable) {
                tracing::warn!(
                    project = %display_path(project, None),
                    error = %format!("{err:#}"),
                    "editable install failed; testing from the source tree"
                );
            }
        }

        fs::write(&marker, format!("{digest}\n"))
            .with_context(|| format!("write {}", display_path(&marker, None)))?;
        Ok(())
    }

    fn pip_install(&self, args: &[String]) -> Result<()> {
        let mut command = match &self.installer {
            Installer::Uv(uv) => {
                let mut command = Command::new(uv);
                command
                    .args(["pip", "install", "--python"])
                    .arg(self.python());
                command
            }
            Installer::Pip => {
                let mut command = Command::new(self.python());
                command.args(["-m", "pip", "install", "--quiet"]);
                command
            }
        };
        command.args(args);
        run_checked(&mut command, "pip install").map(|_| ())
    }
}

/// `pyproject.toml` or `setup.py` marks an installable project.
pub fn is_python_package(root: &Path) -> bool {
    root.join("pyproject.toml").is_file() || root.join("setup.py").is_file()
}

/// Interpreter on PATH: `python<version>`, else `python3`, else `python`.
pub fn find_interpreter(python_version: Option<&str>) -> Result<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(version) = python_version {
        candidates.push(format!("python{version}"));
    }
    candidates.push("python3".to_string());
    candidates.push("python".to_string());
    for candidate in &candidates {
        if let Ok(path) = which::which(candidate) {
            if python_version.is_some() && Some(candidate) != candidates.first() {
                tracing::warn!(
                    requested = python_version.unwrap_or_default(),
                    using = %display_path(&path, None),
                    "requested python version not found on PATH"
                );
            }
            return Ok(path);
        }
    }
    Err(anyhow!(
        "no python interpreter found on PATH (tried {})",
        candidates.join(", ")
    ))
}

/// Version string reported by the interpreter on PATH, e.g. `3.12`.
pub fn detect_python_version() -> Option<String> {
    let python = find_interpreter(None).ok()?;
    let output = Command::new(python)
        .args([
            "-c",
            "import sys; print(f'{sys.version_info[0]}.{sys.version_info[1]}')",
        ])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!version.is_empty()).then_some(version)
}

/// Run a command to completion, failing with its last stderr line.
pub(crate) fn run_checked(command: &mut Command, what: &str) -> Result<Output> {
    let program = command.get_program().to_string_lossy().into_owned();
    let start = Instant::now();
    let output = command
        .output()
        .with_context(|| format!("{what}: spawn {program}"))?;
    let elapsed_ms = start.elapsed().as_millis();
    tracing::info!(elapsed_ms, program = %program, "{what} complete");

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = stderr
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .map(str::trim)
            .unwrap_or_default()
            .to_string();
        let detail = if detail.is_empty() {
            format!("status {}", output.status)
        } else {
            detail
        };
        return Err(anyhow!("{what} failed: {detail}"));
    }
    Ok(output)
}
