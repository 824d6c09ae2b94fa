//! Content-addressed cache of LLM rewrites.
//!
//! Keys cover everything that shapes an answer: the kind of rewrite, the
//! library pair, the backend, the prompt templates, the file path and its
//! content, plus (for repairs) the failures being fixed. A changed input is
//! a miss; no invalidation pass is needed.
use crate::llm::RewriteKind;
use crate::util::{now_epoch_ms, read_json_optional, write_json_atomic};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

/// Current schema version for cache entries.
pub const CACHE_SCHEMA_VERSION: u32 = 1;

/// Whether the cache may be read and written in this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub read: bool,
    pub write: bool,
}

impl CachePolicy {
    /// `--force-rerun` ignores stored results but still refreshes them.
    pub fn from_flags(use_cache: bool, force_rerun: bool) -> Self {
        Self {
            read: use_cache && !force_rerun,
            write: use_cache || force_rerun,
        }
    }
}

/// Inputs hashed into a cache key.
#[derive(Debug, Clone)]
pub struct CacheKey<'a> {
    pub kind: RewriteKind,
    pub source: &'a str,
    pub target: &'a str,
    pub backend: &'a str,
    pub templates: &'a str,
    pub file: &'a str,
    pub content: &'a str,
    /// Digest of the failures a repair addresses; empty for migrations.
    pub failures: &'a str,
}

impl CacheKey<'_> {
    pub fn digest(&self) -> String {
        let kind = self.kind.to_string();
        let mut hasher = Sha256::new();
        for part in [
            kind.as_str(),
            self.source,
            self.target,
            self.backend,
            self.templates,
            self.file,
            self.content,
            self.failures,
        ] {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}

/// A stored rewrite.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheEntry {
    pub schema_version: u32,
    pub kind: RewriteKind,
    pub file: String,
    pub code: String,
    pub explanation: String,
    pub created_at_epoch_ms: u128,
}

/// Cache directory plus the policy for this run.
#[derive(Debug, Clone)]
pub struct RewriteCache {
    dir: PathBuf,
    policy: CachePolicy,
}

impl RewriteCache {
    pub fn new(dir: PathBuf, policy: CachePolicy) -> Self {
        Self { dir, policy }
    }

    fn entry_path(&self, digest: &str) -> PathBuf {
        self.dir.join(format!("{digest}.json"))
    }

    /// Return a stored rewrite when reading is allowed and the entry is sound.
    pub fn lookup(&self, key: &CacheKey<'_>) -> Option<CacheEntry> {
        if !self.policy.read {
            tracing::debug!(file = key.file, "cache read disabled");
            return None;
        }
        let digest = key.digest();
        let path = self.entry_path(&digest);
        match read_json_optional::<CacheEntry>(&path) {
            Ok(Some(entry)) if entry.schema_version == CACHE_SCHEMA_VERSION => {
                tracing::debug!(file = key.file, %digest, "cache hit");
                Some(entry)
            }
            Ok(Some(_)) => {
                tracing::debug!(file = key.file, %digest, "cache entry has old schema");
                None
            }
            Ok(None) => {
                tracing::debug!(file = key.file, %digest, "cache miss");
                None
            }
            Err(err) => {
                tracing::warn!(file = key.file, error = %format!("{err:#}"), "ignoring corrupt cache entry");
                None
            }
        }
    }

    /// Store a rewrite when writing is allowed.
    pub fn store(&self, key: &CacheKey<'_>, code: &str, explanation: &str) -> Result<()> {
        if !self.policy.write {
            return Ok(());
        }
        let entry = CacheEntry {
            schema_version: CACHE_SCHEMA_VERSION,
            kind: key.kind,
            file: key.file.to_string(),
            code: code.to_string(),
            explanation: explanation.to_string(),
            created_at_epoch_ms: now_epoch_ms()?,
        };
        write_json_atomic(&self.entry_path(&key.digest()), &entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key<'a>(content: &'a str, failures: &'a str) -> CacheKey<'a> {
        CacheKey {
            kind: RewriteKind::Migrate,
            source: "requests",
            target: "httpx",
            backend: "claude",
            templates: "t1",
            file: "app/api.py",
            content,
            failures,
        }
    }

    #[test]
    fn policy_follows_flags() {
        assert_eq!(
            CachePolicy::from_flags(true, false),
            CachePolicy { read: true, write: true }
        );
        assert_eq!(
            CachePolicy::from_flags(true, true),
            CachePolicy { read: false, write: true }
        );
        assert_eq!(
            CachePolicy::from_flags(false, true),
            CachePolicy { read: false, write: true }
        );
        assert_eq!(
            CachePolicy::from_flags(false, false),
            CachePolicy { read: false, write: false }
        );
    }

    #[test]
    fn digest_changes_with_every_input() {
        let base = key("import requests\n", "").digest();
        assert_eq!(base, key("import requests\n", "").digest());
        assert_ne!(base, key("import requests as r\n", "").digest());
        assert_ne!(base, key("import requests\n", "f1").digest());
        let mut other_backend = key("import requests\n", "");
        other_backend.backend = "openai:gpt-4o";
        assert_ne!(base, other_backend.digest());
        let mut repair = key("import requests\n", "");
        repair.kind = RewriteKind::Repair;
        assert_ne!(base, repair.digest());
    }

    #[test]
    fn field_boundaries_are_unambiguous() {
        let mut a = key("ab", "");
        a.file = "x";
        let mut b = key("b", "");
        b.file = "xa";
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn store_then_lookup_respects_policy() {
        let dir = tempfile::tempdir().unwrap();
        let k = key("import requests\n", "");

        let cache = RewriteCache::new(dir.path().to_path_buf(), CachePolicy::from_flags(true, false));
        assert!(cache.lookup(&k).is_none());
        cache.store(&k, "import httpx\n", "swapped").unwrap();
        let hit = cache.lookup(&k).unwrap();
        assert_eq!(hit.code, "import httpx\n");

        let forced = RewriteCache::new(dir.path().to_path_buf(), CachePolicy::from_flags(true, true));
        assert!(forced.lookup(&k).is_none());

        let disabled =
            RewriteCache::new(dir.path().join("other"), CachePolicy::from_flags(false, false));
        disabled.store(&k, "x", "y").unwrap();
        assert!(!dir.path().join("other").exists());
    }

    #[test]
    fn corrupt_entries_are_misses() {
        let dir = tempfile::tempdir().unwrap();
        let k = key("import requests\n", "");
        std::fs::write(dir.path().join(format!("{}.json", k.digest())), "{oops").unwrap();
        let cache = RewriteCache::new(dir.path().to_path_buf(), CachePolicy::from_flags(true, false));
        assert!(cache.lookup(&k).is_none());
    }
}
