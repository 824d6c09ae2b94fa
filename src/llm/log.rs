//! LLM invocation logging.
//!
//! Every call is appended to `llm_log.jsonl` so a user can see what was
//! asked for which file, how long it took, and why it failed:
//!
//! ```jsonl
//! {"schema_version":1,"ts":1707900000000,"round":1,"kind":"migrate","file":"app/client.py",...}
//! {"schema_version":1,"ts":1707900060000,"round":2,"kind":"repair","file":"app/client.py",...}
//! ```
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::time::Instant;

/// Current schema version for llm_log.jsonl entries.
pub const LLM_LOG_SCHEMA_VERSION: u32 = 1;

const PROMPT_PREVIEW_BYTES: usize = 500;

/// What an LLM call was asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewriteKind {
    /// First rewrite of a file from the source to the target library.
    Migrate,
    /// Rewrite of an already migrated file to fix failing tests.
    Repair,
}

impl std::fmt::Display for RewriteKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Migrate => write!(f, "migrate"),
            Self::Repair => write!(f, "repair"),
        }
    }
}

/// Outcome of an LLM call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmOutcome {
    Success,
    Failed,
}

/// A single LLM invocation log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmLogEntry {
    pub schema_version: u32,

    /// Unix timestamp in milliseconds when the call finished.
    pub ts: u128,

    /// Migration round the call belongs to (1-indexed).
    pub round: u32,

    pub kind: RewriteKind,

    /// Project-relative file the call rewrote.
    pub file: String,

    /// Backend identity, e.g. `claude` or `openai:gpt-4o`.
    pub backend: String,

    pub duration_ms: u64,

    /// Attempts including parse retries.
    pub attempts: u32,

    pub outcome: LlmOutcome,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_preview: Option<String>,
}

/// Builder for constructing log entries with timing.
pub struct LlmLogBuilder {
    start: Instant,
    round: u32,
    kind: RewriteKind,
    file: String,
    backend: String,
    prompt_preview: Option<String>,
}

impl LlmLogBuilder {
    pub fn new(round: u32, kind: RewriteKind, file: &str, backend: &str) -> Self {
        Self {
            start: Instant::now(),
            round,
            kind,
            file: file.to_string(),
            backend: backend.to_string(),
            prompt_preview: None,
        }
    }

    /// Set a preview of the prompt (truncated).
    pub fn with_prompt_preview(mut self, prompt: &str) -> Self {
        let mut preview = crate::util::truncate_string(prompt, PROMPT_PREVIEW_BYTES);
        if preview.len() < prompt.len() {
            preview.push_str("...");
        }
        self.prompt_preview = Some(preview);
        self
    }

    pub fn success(self, attempts: u32) -> LlmLogEntry {
        self.build(LlmOutcome::Success, attempts, None)
    }

    pub fn failed(self, attempts: u32, error: impl Into<String>) -> LlmLogEntry {
        self.build(LlmOutcome::Failed, attempts, Some(error.into()))
    }

    fn build(self, outcome: LlmOutcome, attempts: u32, error: Option<String>) -> LlmLogEntry {
        LlmLogEntry {
            schema_version: LLM_LOG_SCHEMA_VERSION,
            ts: crate::util::now_epoch_ms().unwrap_or_default(),
            round: self.round,
            kind: self.kind,
            file: self.file,
            backend: self.backend,
            duration_ms: self.start.elapsed().as_millis() as u64,
            attempts,
            outcome,
            error,
            prompt_preview: self.prompt_preview,
        }
    }
}

/// Append an entry to the log file.
pub fn append_llm_log(log_path: &Path, entry: &LlmLogEntry) -> Result<()> {
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("create output directory for llm_log")?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("open llm_log for append: {}", log_path.display()))?;
    let line = serde_json::to_string(entry).context("serialize llm_log entry")?;
    writeln!(file, "{}", line).context("write llm_log entry")?;
    Ok(())
}

/// Load all entries, skipping corrupt lines.
pub fn load_llm_log(log_path: &Path) -> Result<Vec<LlmLogEntry>> {
    if !log_path.exists() {
        return Ok(Vec::new());
    }
    let file =
        File::open(log_path).with_context(|| format!("open llm_log: {}", log_path.display()))?;
    let mut entries = Vec::new();
    for (line_num, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("read line {} of llm_log", line_num + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LlmLogEntry>(&line) {
            Ok(entry) => entries.push(entry),
            Err(err) => {
                tracing::warn!(line = line_num + 1, %err, "skip corrupt llm_log entry");
            }
        }
    }
    Ok(entries)
}
