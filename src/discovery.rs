//! Discovery of project files that import the source library.
use anyhow::{anyhow, Context, Result};
use ignore::WalkBuilder;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

/// Directory names never descended into, regardless of ignore files.
const SKIPPED_DIRS: &[&str] = &[
    "venv",
    "env",
    "site-packages",
    "__pycache__",
    "node_modules",
];

/// Distributions whose import name differs from the package name.
const IMPORT_ALIASES: &[(&str, &[&str])] = &[
    ("beautifulsoup4", &["bs4"]),
    ("pyyaml", &["yaml"]),
    ("python-dateutil", &["dateutil"]),
    ("pillow", &["PIL"]),
    ("scikit-learn", &["sklearn"]),
    ("opencv-python", &["cv2"]),
    ("protobuf", &["google.protobuf"]),
    ("attrs", &["attr", "attrs"]),
    ("pyjwt", &["jwt"]),
    ("python-magic", &["magic"]),
    ("msgpack-python", &["msgpack"]),
    ("pycryptodome", &["Crypto"]),
    ("python-json-logger", &["pythonjsonlogger"]),
];

/// Normalize a distribution name the way pip compares them.
pub fn normalize_name(name: &str) -> String {
    let mut normalized = String::with_capacity(name.len());
    let mut last_sep = false;
    for ch in name.trim().chars() {
        if matches!(ch, '-' | '_' | '.') {
            if !last_sep {
                normalized.push('-');
            }
            last_sep = true;
        } else {
            normalized.push(ch.to_ascii_lowercase());
            last_sep = false;
        }
    }
    normalized
}

/// Module names a library is imported under.
pub fn import_names(library: &str) -> Vec<String> {
    let normalized = normalize_name(library);
    if let Some((_, names)) = IMPORT_ALIASES.iter().find(|(dist, _)| *dist == normalized) {
        return names.iter().map(|name| name.to_string()).collect();
    }
    vec![library.trim().replace('-', "_")]
}

/// Matches `import m`, `import a, m.sub`, `from m import x`, `from m.sub import x`.
#[derive(Debug)]
pub struct ImportMatcher {
    regex: Regex,
}

impl ImportMatcher {
    pub fn for_library(library: &str) -> Result<Self> {
        let names = import_names(library)
            .iter()
            .map(|name| regex::escape(name))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = format!(
            r"(?m)^[ \t]*(?:from[ \t]+(?:{names})(?:\.[\w.]+)?[ \t]+import\b|import[ \t]+(?:[\w.]+(?:[ \t]+as[ \t]+\w+)?[ \t]*,[ \t]*)*(?:{names})(?:\.[\w.]+)?\b)"
        );
        let regex = Regex::new(&pattern).with_context(|| format!("build import pattern for {library}"))?;
        Ok(Self { regex })
    }

    pub fn matches(&self, source: &str) -> bool {
        self.regex.is_match(source)
    }
}

/// Find Python files under `project_root` importing `library`.
///
/// Honors `.gitignore`, skips hidden and virtualenv-like directories and the
/// workspace directory itself. Paths are project-relative with `/`
/// separators, sorted.
pub fn find_files_using(project_root: &Path, workspace: &Path, library: &str) -> Result<Vec<String>> {
    let matcher = ImportMatcher::for_library(library)?;
    let workspace = workspace.to_path_buf();
    let walker = WalkBuilder::new(project_root)
        .hidden(true)
        .require_git(false)
        .filter_entry(move |entry| {
            let is_dir = entry.file_type().is_some_and(|ft| ft.is_dir());
            if !is_dir {
                return true;
            }
            if entry.path() == workspace {
                return false;
            }
            let name = entry.file_name().to_string_lossy();
            !SKIPPED_DIRS.contains(&name.as_ref())
        })
        .build();

    let mut found = Vec::new();
    for entry in walker {
        let entry = entry.with_context(|| format!("walk {}", project_root.display()))?;
        let path = entry.path();
        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }
        if path.extension().and_then(|ext| ext.to_str()) != Some("py") {
            continue;
        }
        let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
        let text = String::from_utf8_lossy(&bytes);
        if matcher.matches(&text) {
            found.push(rel_string(project_root, path));
        }
    }
    found.sort();
    Ok(found)
}

/// Refuse to migrate when more files than allowed use the library.
pub fn enforce_max_files(files: &[String], max_files: usize, library: &str) -> Result<()> {
    if files.len() > max_files {
        return Err(anyhow!(
            "found {} files using {library}, more than --max-files {max_files}; aborting migration",
            files.len()
        ));
    }
    Ok(())
}

/// Whether the directory holds any pytest-style test module.
///
/// The workspace is skipped: it may sit inside the test root and holds
/// snapshots of project files.
pub fn has_test_files(root: &Path, workspace: &Path) -> bool {
    let workspace = workspace.to_path_buf();
    WalkBuilder::new(root)
        .hidden(true)
        .require_git(false)
        .filter_entry(move |entry| {
            if entry.path() == workspace {
                return false;
            }
            let name = entry.file_name().to_string_lossy();
            !SKIPPED_DIRS.contains(&name.as_ref())
        })
        .build()
        .filter_map(|entry| entry.ok())
        .any(|entry| {
            let name = entry.file_name().to_string_lossy();
            entry.file_type().is_some_and(|ft| ft.is_file())
                && name.ends_with(".py")
                && (name.starts_with("test_") || name.ends_with("_test.py"))
        })
}

fn rel_string(root: &Path, path: &Path) -> String {
    let rel: PathBuf = path.strip_prefix(root).unwrap_or(path).to_path_buf();
    rel.components()
        .map(|component| component.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, text: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    #[test]
    fn normalizes_distribution_names() {
        assert_eq!(normalize_name("Python_Dateutil"), "python-dateutil");
        assert_eq!(normalize_name("zope.interface"), "zope-interface");
        assert_eq!(normalize_name("a--_b"), "a-b");
    }

    #[test]
    fn import_names_use_alias_table() {
        assert_eq!(import_names("beautifulsoup4"), vec!["bs4"]);
        assert_eq!(import_names("PyYAML"), vec!["yaml"]);
        assert_eq!(import_names("requests"), vec!["requests"]);
        assert_eq!(import_names("typing-extensions"), vec!["typing_extensions"]);
    }

    #[test]
    fn matcher_recognizes_import_forms() {
        let matcher = ImportMatcher::for_library("requests").unwrap();
        assert!(matcher.matches("import requests\n"));
        assert!(matcher.matches("import os, requests\n"));
        assert!(matcher.matches("import os as o, requests.adapters\n"));
        assert!(matcher.matches("    from requests import Session\n"));
        assert!(matcher.matches("from requests.exceptions import HTTPError\n"));
        assert!(!matcher.matches("import requests_mock\n"));
        assert!(!matcher.matches("from requestsx import y\n"));
        assert!(!matcher.matches("# uses requests\nx = 'requests'\n"));
    }

    #[test]
    fn matcher_handles_dotted_import_names() {
        let matcher = ImportMatcher::for_library("protobuf").unwrap();
        assert!(matcher.matches("from google.protobuf import message\n"));
        assert!(!matcher.matches("from google.cloud import storage\n"));
    }

    #[test]
    fn finds_files_and_skips_workspace_and_venvs() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "app/client.py", "import requests\n");
        write(root, "app/util.py", "import json\n");
        write(root, "main.py", "from requests import get\n");
        write(root, ".libmig/original/app/client.py", "import requests\n");
        write(root, "venv/lib/site.py", "import requests\n");
        write(root, ".hidden/x.py", "import requests\n");
        write(root, "notes.txt", "import requests\n");

        let found = find_files_using(root, &root.join(".libmig"), "requests").unwrap();
        assert_eq!(found, vec!["app/client.py".to_string(), "main.py".to_string()]);
    }

    #[test]
    fn gitignored_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, ".gitignore", "generated/\n");
        write(root, "generated/api.py", "import requests\n");
        write(root, "api.py", "import requests\n");
        let found = find_files_using(root, &root.join(".libmig"), "requests").unwrap();
        assert_eq!(found, vec!["api.py".to_string()]);
    }

    #[test]
    fn max_files_is_an_upper_bound() {
        let files: Vec<String> = (0..3).map(|i| format!("f{i}.py")).collect();
        assert!(enforce_max_files(&files, 3, "requests").is_ok());
        let err = enforce_max_files(&files, 2, "requests").unwrap_err();
        assert!(err.to_string().contains("more than --max-files 2"));
    }

    #[test]
    fn detects_test_modules() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = dir.path().join(".libmig");
        write(dir.path(), "app/core.py", "x = 1\n");
        assert!(!has_test_files(dir.path(), &workspace));
        write(dir.path(), "tests/test_core.py", "def test_x(): pass\n");
        assert!(has_test_files(dir.path(), &workspace));
    }

    #[test]
    fn visible_workspace_snapshots_are_not_tests() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = dir.path().join("artifacts");
        write(dir.path(), "app/core.py", "import requests\n");
        write(dir.path(), "artifacts/original/tests/test_core.py", "import requests\n");
        assert!(!has_test_files(dir.path(), &workspace));
        let found = find_files_using(dir.path(), &workspace, "requests").unwrap();
        assert_eq!(found, vec!["app/core.py".to_string()]);
    }

    #[test]
    fn build_and_dist_packages_are_searched() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "build/client.py", "import requests\n");
        write(dir.path(), "dist/api.py", "from requests import get\n");
        let found = find_files_using(dir.path(), &dir.path().join(".libmig"), "requests").unwrap();
        assert_eq!(found, vec!["build/client.py".to_string(), "dist/api.py".to_string()]);
    }
}
