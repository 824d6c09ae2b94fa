//! Shell completion for `--show-completion` and `--install-completion`.
use crate::cli::Args;
use anyhow::{anyhow, Context, Result};
use clap::CommandFactory;
use clap_complete::{generate, Shell};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const BIN_NAME: &str = "libmig";

/// The shell named by `$SHELL`.
pub fn detect_shell() -> Result<Shell> {
    Shell::from_env().ok_or_else(|| anyhow!("cannot detect the current shell from $SHELL"))
}

/// Completion script for `shell`.
pub fn completion_script(shell: Shell) -> Vec<u8> {
    let mut buf = Vec::new();
    generate(shell, &mut Args::command(), BIN_NAME, &mut buf);
    buf
}

/// Print the script for the current shell.
pub fn show_completion() -> Result<()> {
    let script = completion_script(detect_shell()?);
    std::io::stdout()
        .write_all(&script)
        .context("write completion script")
}

/// Files written by an install.
#[derive(Debug, PartialEq, Eq)]
pub struct Installed {
    pub script: PathBuf,
    /// Startup file that now loads the script, when one had to be edited.
    pub rc_file: Option<PathBuf>,
}

/// Install the script for the current shell under the home directory.
pub fn install_completion() -> Result<()> {
    let shell = detect_shell()?;
    let home = dirs::home_dir().ok_or_else(|| anyhow!("cannot determine home directory"))?;
    let installed = install_completion_at(shell, &home)?;
    println!(
        "{shell} completion installed in {}",
        installed.script.display()
    );
    if let Some(rc_file) = installed.rc_file {
        println!("loaded from {}", rc_file.display());
    }
    println!("Completion will take effect once you restart the terminal");
    Ok(())
}

pub fn install_completion_at(shell: Shell, home: &Path) -> Result<Installed> {
    let (script, rc) = match shell {
        Shell::Bash => {
            let script = home.join(".bash_completions").join(format!("{BIN_NAME}.sh"));
            let line = format!("source '{}'", script.display());
            (script, Some((home.join(".bashrc"), line)))
        }
        Shell::Zsh => (
            home.join(".zfunc").join(format!("_{BIN_NAME}")),
            Some((
                home.join(".zshrc"),
                "fpath+=~/.zfunc; autoload -Uz compinit; compinit".to_string(),
            )),
        ),
        Shell::Fish => (
            home.join(".config")
                .join("fish")
                .join("completions")
                .join(format!("{BIN_NAME}.fish")),
            None,
        ),
        other => {
            return Err(anyhow!(
                "installing completion for {other} is not supported; use --show-completion"
            ))
        }
    };

    if let Some(parent) = script.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(&script, completion_script(shell))
        .with_context(|| format!("write {}", script.display()))?;

    let rc_file = match rc {
        Some((rc_file, line)) => {
            ensure_line(&rc_file, &line)?;
            Some(rc_file)
        }
        None => None,
    };
    Ok(Installed { script, rc_file })
}

/// Append `line` to `path` unless it is already present.
fn ensure_line(path: &Path, line: &str) -> Result<()> {
    let existing = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
    };
    if existing.lines().any(|existing_line| existing_line.trim() == line) {
        return Ok(());
    }
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    let separator = if existing.is_empty() || existing.ends_with('\n') {
        ""
    } else {
        "\n"
    };
    writeln!(file, "{separator}{line}").with_context(|| format!("write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripts_mention_the_binary_and_its_flags() {
        let script = String::from_utf8(completion_script(Shell::Bash)).unwrap();
        assert!(script.contains("libmig"));
        assert!(script.contains("--code-path"));
        assert!(script.contains("--smart-skip-tests"));
    }

    #[test]
    fn bash_install_writes_script_and_sources_it_once() {
        let home = tempfile::tempdir().unwrap();
        fs::write(home.path().join(".bashrc"), "export A=1").unwrap();

        let installed = install_completion_at(Shell::Bash, home.path()).unwrap();
        assert_eq!(
            installed.script,
            home.path().join(".bash_completions/libmig.sh")
        );
        assert!(installed.script.is_file());
        install_completion_at(Shell::Bash, home.path()).unwrap();

        let rc = fs::read_to_string(home.path().join(".bashrc")).unwrap();
        assert!(rc.starts_with("export A=1\nsource '"));
        assert_eq!(rc.matches("source '").count(), 1);
    }

    #[test]
    fn fish_install_needs_no_rc_file() {
        let home = tempfile::tempdir().unwrap();
        let installed = install_completion_at(Shell::Fish, home.path()).unwrap();
        assert_eq!(installed.rc_file, None);
        assert!(home
            .path()
            .join(".config/fish/completions/libmig.fish")
            .is_file());
    }

    #[test]
    fn unsupported_shells_are_rejected() {
        let home = tempfile::tempdir().unwrap();
        assert!(install_completion_at(Shell::Elvish, home.path()).is_err());
    }
}
