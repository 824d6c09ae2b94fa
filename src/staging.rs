//! Transactional publication of rewritten project files.
//!
//! Files are staged under `txns/<id>/staging` and copied into the project
//! only once every file of the batch is staged. Displaced files move to
//! `txns/<id>/backup`; a failed publication restores them.
use crate::state::WorkspacePaths;
use crate::util::now_epoch_ms;
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// A batch of project-relative files waiting to be published together.
#[derive(Debug)]
pub struct Transaction {
    id: String,
    staging_root: PathBuf,
    staged: Vec<String>,
}

impl Transaction {
    /// Open a new transaction directory under the workspace.
    pub fn begin(paths: &WorkspacePaths) -> Result<Self> {
        let base = now_epoch_ms()?.to_string();
        let mut id = base.clone();
        let mut seq = 1;
        while paths.txn_root(&id).exists() {
            id = format!("{base}-{seq}");
            seq += 1;
        }
        let staging_root = paths.txn_staging_root(&id);
        fs::create_dir_all(&staging_root)
            .with_context(|| format!("create {}", staging_root.display()))?;
        Ok(Self {
            id,
            staging_root,
            staged: Vec::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Stage text for the given project-relative path.
    pub fn stage_text(&mut self, rel: &str, text: &str) -> Result<()> {
        let staging_path = self.staging_root.join(rel);
        if let Some(parent) = staging_path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&staging_path, text.as_bytes())
            .with_context(|| format!("write {}", staging_path.display()))?;
        if !self.staged.iter().any(|existing| existing == rel) {
            self.staged.push(rel.to_string());
        }
        Ok(())
    }

    /// Copy every staged file into `project_root`, all or nothing.
    ///
    /// Returns the published project-relative paths in staging order.
    pub fn publish(self, project_root: &Path) -> Result<Vec<String>> {
        let txn_root = self
            .staging_root
            .parent()
            .ok_or_else(|| anyhow!("staging root has no parent"))?;
        let backup_root = txn_root.join("backup");
        fs::create_dir_all(&backup_root)
            .with_context(|| format!("create {}", backup_root.display()))?;

        let mut published = Vec::new();
        let mut backups: Vec<(PathBuf, PathBuf)> = Vec::new();
        let mut created: Vec<PathBuf> = Vec::new();
        for rel in &self.staged {
            let staged = self.staging_root.join(rel);
            let dest = project_root.join(rel);
            let step = backup_existing(&dest, &backup_root.join(rel), &mut backups, &mut created)
                .and_then(|()| publish_file(&staged, &dest));
            if let Err(err) = step {
                rollback_publish(&backups, &created);
                return Err(err);
            }
            published.push(rel.clone());
        }
        tracing::debug!(txn = %self.id, files = published.len(), "published staged files");
        let _ = fs::remove_dir_all(&self.staging_root);
        Ok(published)
    }
}

fn backup_existing(
    dest: &Path,
    backup: &Path,
    backups: &mut Vec<(PathBuf, PathBuf)>,
    created: &mut Vec<PathBuf>,
) -> Result<()> {
    if !dest.exists() {
        created.push(dest.to_path_buf());
        return Ok(());
    }
    if let Some(parent) = backup.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::copy(dest, backup).with_context(|| format!("backup {}", dest.display()))?;
    backups.push((dest.to_path_buf(), backup.to_path_buf()));
    Ok(())
}

fn publish_file(source: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let file_name = dest
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("staged");
    let tmp_path = dest
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(format!(".{file_name}.libmig.tmp"));
    fs::copy(source, &tmp_path).with_context(|| format!("publish {}", dest.display()))?;
    fs::rename(&tmp_path, dest).with_context(|| format!("publish {}", dest.display()))?;
    Ok(())
}

fn rollback_publish(backups: &[(PathBuf, PathBuf)], created: &[PathBuf]) {
    for path in created {
        if path.exists() {
            let _ = fs::remove_file(path);
        }
    }
    for (dest, backup) in backups {
        if let Some(parent) = dest.parent() {
            let _ = fs::create_dir_all(parent);
        }
        let _ = fs::copy(backup, dest);
    }
}
