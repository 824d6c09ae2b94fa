//! Shared test infrastructure for integration tests.
#![allow(dead_code)]

use serde_json::Value;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// Directory name of the fixture project inside the temp dir.
pub const PROJECT: &str = "my-app";

pub const API_SOURCE: &str = "\
import requests


def fetch(url):
    return requests.get(url).json()
";

pub const MIGRATED_API: &str = "\
import httpx


def fetch(url):
    return httpx.get(url).json()
";

/// A migration the fake test suite fails on.
pub const BROKEN_API: &str = "\
import httpx


def fetch(url):
    return httpx.get(url).json  # BROKEN
";

const TEST_API: &str = "\
from app.api import fetch


def test_fetch():
    assert fetch(\"https://example.test\") == {}
";

/// Tools the fake interpreter and mock LLM need on PATH.
const SHELL_TOOLS: &[&str] = &["sh", "cat", "grep"];

/// A throwaway Python project plus a scripted stand-in for the LLM.
pub struct Fixture {
    pub dir: TempDir,
}

impl Fixture {
    /// `my-app/` with one file using requests, one that does not, and a
    /// requirements file pinning requests. There are no tests, so runs never
    /// need a Python toolchain.
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let fixture = Self { dir };
        fixture.write("app/__init__.py", "");
        fixture.write("app/api.py", API_SOURCE);
        fixture.write("app/util.py", "import json\n");
        fixture.write("requirements.txt", "requests==2.31.0\nflask\n");
        fixture.set_llm_answer(MIGRATED_API);
        fixture
    }

    pub fn project(&self) -> PathBuf {
        self.dir.path().join(PROJECT)
    }

    pub fn output(&self) -> PathBuf {
        self.project().join(".libmig")
    }

    pub fn write(&self, rel: &str, text: &str) {
        let path = self.project().join(rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("create parent");
        fs::write(&path, text).expect("write fixture file");
    }

    pub fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.project().join(rel)).expect("read project file")
    }

    fn llm_script(&self) -> PathBuf {
        self.dir.path().join("mock-llm.sh")
    }

    /// `--llm` value running the mock script.
    pub fn llm(&self) -> String {
        format!("sh {}", self.llm_script().display())
    }

    /// Make the mock answer every prompt with `code`.
    pub fn set_llm_answer(&self, code: &str) {
        let script = format!(
            "cat > /dev/null\ncat <<'ANSWER'\nReplaced requests with httpx.\n\n```python\n{}```\nANSWER\n",
            code
        );
        fs::write(self.llm_script(), script).expect("write mock llm");
    }

    /// Answer migrate prompts with `migrated` and repair prompts with `repaired`.
    pub fn set_llm_answers(&self, migrated: &str, repaired: &str) {
        let script = format!(
            "prompt=$(cat)\ncase \"$prompt\" in\n*'## Failing tests'*)\ncat <<'ANSWER'\nFixed the failing call.\n\n```python\n{repaired}```\nANSWER\n;;\n*)\ncat <<'ANSWER'\nReplaced requests with httpx.\n\n```python\n{migrated}```\nANSWER\n;;\nesac\n"
        );
        fs::write(self.llm_script(), script).expect("write mock llm");
    }

    /// Add a test suite and a prepared virtual environment whose interpreter
    /// fakes pip and pytest.
    ///
    /// The fake pytest fails `tests/test_api.py::test_fetch` while
    /// `app/api.py` contains `BROKEN`, writes both JSON reports, and logs
    /// each run. PATH is limited to a few shell tools so no real `uv` or
    /// Python is picked up.
    pub fn with_fake_pytest(self) -> Self {
        self.write("tests/__init__.py", "");
        self.write("tests/test_api.py", TEST_API);

        let bin = self.bin_dir();
        fs::create_dir_all(&bin).expect("create bin dir");
        for tool in SHELL_TOOLS {
            std::os::unix::fs::symlink(find_tool(tool), bin.join(tool)).expect("link shell tool");
        }

        let python = self.output().join("venv/bin/python");
        fs::create_dir_all(python.parent().expect("parent")).expect("create venv");
        let script = format!(
            r#"#!{sh}
if [ "$1" = "-m" ] && [ "$2" = "pip" ]; then
  exit 0
fi
echo run >> '{log}'
for arg in "$@"; do
  case "$arg" in
    --json-report-file=*) report="${{arg#--json-report-file=}}" ;;
    --cov-report=json:*) cov="${{arg#--cov-report=json:}}" ;;
  esac
done
if grep -q BROKEN '{api}'; then
  outcome=failed
  code=1
else
  outcome=passed
  code=0
fi
cat > "$report" <<REPORT
{{"exitcode": $code, "tests": [{{"nodeid": "tests/test_api.py::test_fetch", "outcome": "$outcome", "call": {{"outcome": "$outcome", "longrepr": "app/api.py:5: AssertionError"}}}}]}}
REPORT
cat > "$cov" <<COV
{{"totals": {{"percent_covered": 75.0}}, "files": {{"app/api.py": {{"summary": {{"percent_covered": 80.0}}}}}}}}
COV
exit $code
"#,
            sh = find_tool("sh").display(),
            log = self.pytest_log().display(),
            api = self.project().join("app/api.py").display(),
        );
        fs::write(&python, script).expect("write fake python");
        fs::set_permissions(&python, fs::Permissions::from_mode(0o755)).expect("chmod fake python");
        self
    }

    fn bin_dir(&self) -> PathBuf {
        self.dir.path().join("bin")
    }

    fn pytest_log(&self) -> PathBuf {
        self.dir.path().join("pytest-runs.log")
    }

    /// How many times the fake pytest ran.
    pub fn pytest_runs(&self) -> usize {
        fs::read_to_string(self.pytest_log())
            .map(|log| log.lines().count())
            .unwrap_or(0)
    }

    /// Make the mock fail like a broken backend.
    pub fn break_llm(&self) {
        fs::write(
            self.llm_script(),
            "cat > /dev/null\necho 'backend unavailable' >&2\nexit 1\n",
        )
        .expect("write mock llm");
    }

    /// Run libmig from the temp dir (the project's parent).
    pub fn libmig(&self, args: &[&str]) -> Output {
        let mut command = libmig_command(self.dir.path(), args);
        if self.bin_dir().is_dir() {
            command.env("PATH", self.bin_dir());
        }
        command.output().expect("run libmig")
    }

    /// Arguments for a standard migration with the mock LLM.
    pub fn migrate(&self, extra: &[&str]) -> Output {
        let llm = self.llm();
        let mut args = vec!["requests", "httpx", "--code-path", PROJECT, "--llm", &llm];
        args.extend_from_slice(extra);
        self.libmig(&args)
    }

    pub fn report(&self) -> Value {
        read_json(&self.output().join("report.json"))
    }
}

fn libmig_command(cwd: &Path, args: &[&str]) -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_libmig"));
    command
        .args(args)
        .current_dir(cwd)
        .env_remove("LIBMIG_LLM")
        .env("RUST_LOG", "libmig=warn");
    command
}

pub fn libmig_in(cwd: &Path, args: &[&str]) -> Output {
    libmig_command(cwd, args).output().expect("run libmig")
}

fn find_tool(name: &str) -> PathBuf {
    ["/bin", "/usr/bin"]
        .iter()
        .map(|dir| Path::new(dir).join(name))
        .find(|path| path.is_file())
        .unwrap_or_else(|| panic!("{name} not found in /bin or /usr/bin"))
}

pub fn read_json(path: &Path) -> Value {
    let text = fs::read_to_string(path)
        .unwrap_or_else(|err| panic!("read {}: {err}", path.display()));
    serde_json::from_str(&text).unwrap_or_else(|err| panic!("parse {}: {err}", path.display()))
}

pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// Panic with both streams when the run failed.
pub fn assert_success(output: &Output) {
    assert!(
        output.status.success(),
        "libmig failed with {}\nstdout:\n{}\nstderr:\n{}",
        output.status,
        stdout(output),
        stderr(output)
    );
}
