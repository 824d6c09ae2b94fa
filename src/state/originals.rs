//! Pristine snapshots of migrated files.
//!
//! A run always starts from the project as it was before the first
//! migration, so cached results replay onto the same inputs.
use super::{RunState, WorkspacePaths};
use crate::util::sha256_hex;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Files touched by [`restore_applied`].
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RestoreOutcome {
    /// Files put back to their pre-migration content.
    pub restored: Vec<String>,
    /// Files changed outside the tool since the last run; left untouched.
    pub kept: Vec<String>,
}

/// Copy a project file into `original/` before the tool first overwrites it.
///
/// A file already recorded in `state.applied` keeps its snapshot, since its
/// current content is the tool's own output. Any other file is snapshotted
/// afresh so edits made since an earlier run are what a rerun restores.
pub fn snapshot_original(
    paths: &WorkspacePaths,
    project_root: &Path,
    state: &RunState,
    rel: &str,
) -> Result<()> {
    let snapshot = paths.original_path(rel);
    if state.applied.contains_key(rel) && snapshot.is_file() {
        return Ok(());
    }
    if let Some(parent) = snapshot.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let source = project_root.join(rel);
    fs::copy(&source, &snapshot)
        .with_context(|| format!("snapshot {} to {}", source.display(), snapshot.display()))?;
    Ok(())
}

/// Files [`restore_applied`] would put back, without touching anything.
pub fn pending_restores(
    paths: &WorkspacePaths,
    project_root: &Path,
    state: &RunState,
) -> Result<Vec<String>> {
    let mut pending = Vec::new();
    for (rel, file) in &state.applied {
        let path = project_root.join(rel);
        if !path.is_file() || !paths.original_path(rel).is_file() {
            continue;
        }
        let current = fs::read(&path).with_context(|| format!("read {}", path.display()))?;
        if sha256_hex(&current) == file.written_sha256 {
            pending.push(rel.clone());
        }
    }
    Ok(pending)
}

/// Put previously migrated files back to their snapshots.
///
/// Only files whose current content still equals what the tool wrote are
/// restored. Every visited entry is dropped from `state.applied`, and the
/// snapshot of a file that is not restored is deleted with it.
pub fn restore_applied(
    paths: &WorkspacePaths,
    project_root: &Path,
    state: &mut RunState,
) -> Result<RestoreOutcome> {
    let mut outcome = RestoreOutcome::default();
    let applied = std::mem::take(&mut state.applied);
    for (rel, file) in applied {
        let path = project_root.join(&rel);
        let snapshot = paths.original_path(&rel);
        if !path.is_file() {
            tracing::warn!(file = %rel, "previously migrated file is gone; forgetting it");
            forget_snapshot(&snapshot)?;
            continue;
        }
        let current = fs::read(&path).with_context(|| format!("read {}", path.display()))?;
        if sha256_hex(&current) != file.written_sha256 {
            tracing::warn!(file = %rel, "file changed since it was migrated; leaving it as is");
            forget_snapshot(&snapshot)?;
            outcome.kept.push(rel);
            continue;
        }
        if !snapshot.is_file() {
            tracing::warn!(file = %rel, "no pre-migration snapshot; leaving migrated content");
            outcome.kept.push(rel);
            continue;
        }
        fs::copy(&snapshot, &path)
            .with_context(|| format!("restore {} from {}", path.display(), snapshot.display()))?;
        outcome.restored.push(rel);
    }
    Ok(outcome)
}

fn forget_snapshot(snapshot: &Path) -> Result<()> {
    match fs::remove_file(snapshot) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("remove {}", snapshot.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AppliedFile;

    fn applied(original: &str, written: &str) -> AppliedFile {
        AppliedFile {
            original_sha256: sha256_hex(original.as_bytes()),
            written_sha256: sha256_hex(written.as_bytes()),
            round: 1,
        }
    }

    #[test]
    fn snapshot_is_kept_while_the_file_is_applied() {
        let project = tempfile::tempdir().unwrap();
        let paths = WorkspacePaths::new(project.path().join(".libmig"));
        let mut state = RunState::default();
        fs::write(project.path().join("a.py"), "import requests\n").unwrap();
        snapshot_original(&paths, project.path(), &state, "a.py").unwrap();
        state
            .applied
            .insert("a.py".to_string(), applied("import requests\n", "import httpx\n"));
        fs::write(project.path().join("a.py"), "import httpx\n").unwrap();
        snapshot_original(&paths, project.path(), &state, "a.py").unwrap();
        let snap = fs::read_to_string(paths.original_path("a.py")).unwrap();
        assert_eq!(snap, "import requests\n");
    }

    #[test]
    fn stale_snapshot_is_replaced_for_unapplied_files() {
        let project = tempfile::tempdir().unwrap();
        let paths = WorkspacePaths::new(project.path().join(".libmig"));
        let state = RunState::default();
        fs::write(project.path().join("a.py"), "import requests\n").unwrap();
        snapshot_original(&paths, project.path(), &state, "a.py").unwrap();
        fs::write(project.path().join("a.py"), "import requests\nEDITED = 1\n").unwrap();
        snapshot_original(&paths, project.path(), &state, "a.py").unwrap();
        let snap = fs::read_to_string(paths.original_path("a.py")).unwrap();
        assert_eq!(snap, "import requests\nEDITED = 1\n");
    }

    #[test]
    fn restore_only_touches_unedited_files() {
        let project = tempfile::tempdir().unwrap();
        let paths = WorkspacePaths::new(project.path().join(".libmig"));
        for name in ["a.py", "b.py"] {
            fs::write(project.path().join(name), "import requests\n").unwrap();
            snapshot_original(&paths, project.path(), &RunState::default(), name).unwrap();
        }
        fs::write(project.path().join("a.py"), "import httpx\n").unwrap();
        fs::write(project.path().join("b.py"), "import httpx  # edited\n").unwrap();

        let mut state = RunState::default();
        state
            .applied
            .insert("a.py".to_string(), applied("import requests\n", "import httpx\n"));
        state
            .applied
            .insert("b.py".to_string(), applied("import requests\n", "import httpx\n"));

        assert_eq!(
            pending_restores(&paths, project.path(), &state).unwrap(),
            vec!["a.py".to_string()]
        );
        let outcome = restore_applied(&paths, project.path(), &mut state).unwrap();
        assert_eq!(outcome.restored, vec!["a.py".to_string()]);
        assert_eq!(outcome.kept, vec!["b.py".to_string()]);
        assert!(state.applied.is_empty());
        assert_eq!(
            fs::read_to_string(project.path().join("a.py")).unwrap(),
            "import requests\n"
        );
        assert_eq!(
            fs::read_to_string(project.path().join("b.py")).unwrap(),
            "import httpx  # edited\n"
        );
        assert!(paths.original_path("a.py").is_file());
        assert!(!paths.original_path("b.py").exists());
    }
}
