//! Content fingerprints for staleness detection.
//!
//! A fingerprint ties a test stage to the exact contents of the files it ran
//! against, so smart skip can tell whether anything was migrated since.
use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

/// Hash a set of project-relative files deterministically.
///
/// Order of `rels` does not matter. Missing files hash as a marker so that a
/// deleted file still changes the fingerprint.
pub fn fingerprint_files(project_root: &Path, rels: &[String]) -> Result<String> {
    let mut sorted = rels.to_vec();
    sorted.sort();
    sorted.dedup();
    let mut hasher = Sha256::new();
    for rel in sorted {
        let path = project_root.join(&rel);
        if !path.is_file() {
            hasher.update(b"missing:");
            hasher.update(rel.as_bytes());
            hasher.update(b"\0");
            continue;
        }
        let bytes = fs::read(&path).with_context(|| format!("read {}", path.display()))?;
        hasher.update(b"file:");
        hasher.update(rel.as_bytes());
        hasher.update(b"\0");
        hasher.update((bytes.len() as u64).to_le_bytes());
        hasher.update(&bytes);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
