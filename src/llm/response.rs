//! Parsing of rewrite answers.
//!
//! An answer is free-form explanation followed by the complete rewritten
//! file in a fenced code block. The last Python (or untagged) block wins, so
//! snippets quoted inside the explanation do not shadow the file.
use anyhow::{anyhow, Result};
use serde::Deserialize;
use serde_json::Value;

/// The usable part of an answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAnswer {
    pub explanation: String,
    pub code: String,
}

struct FencedBlock {
    lang: String,
    start_line: usize,
    body: String,
}

fn fenced_blocks(text: &str) -> Vec<FencedBlock> {
    let mut blocks = Vec::new();
    let mut open: Option<(String, usize, Vec<&str>)> = None;
    for (idx, line) in text.lines().enumerate() {
        let trimmed = line.trim_start();
        match open.take() {
            None => {
                if let Some(rest) = trimmed.strip_prefix("```") {
                    open = Some((rest.trim().to_ascii_lowercase(), idx, Vec::new()));
                }
            }
            Some((lang, start_line, mut body)) => {
                if trimmed.trim_end() == "```" {
                    blocks.push(FencedBlock {
                        lang,
                        start_line,
                        body: body.join("\n"),
                    });
                } else {
                    body.push(line);
                    open = Some((lang, start_line, body));
                }
            }
        }
    }
    blocks
}

/// Split an answer into explanation and code.
pub fn parse_answer(text: &str) -> Result<ParsedAnswer> {
    let blocks = fenced_blocks(text);
    let block = blocks
        .into_iter()
        .rev()
        .find(|block| matches!(block.lang.as_str(), "python" | "py" | "python3" | ""))
        .ok_or_else(|| anyhow!("response has no fenced python code block"))?;
    if block.body.trim().is_empty() {
        return Err(anyhow!("response code block is empty"));
    }
    let explanation = text
        .lines()
        .take(block.start_line)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string();
    let mut code = block.body;
    code.push('\n');
    Ok(ParsedAnswer { explanation, code })
}

#[derive(Deserialize)]
struct ClaudeEnvelope {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    is_error: bool,
}

/// Unwrap the `claude --output-format json` envelope, passing plain text through.
pub fn unwrap_claude_envelope(stdout: &str) -> Result<String> {
    let trimmed = stdout.trim();
    if !trimmed.starts_with('{') {
        return Ok(stdout.to_string());
    }
    let Ok(value) = serde_json::from_str::<Value>(trimmed) else {
        return Ok(stdout.to_string());
    };
    let Ok(envelope) = ClaudeEnvelope::deserialize(&value) else {
        return Ok(stdout.to_string());
    };
    match envelope.result {
        Some(result) if envelope.is_error => Err(anyhow!("claude reported an error: {result}")),
        Some(result) => Ok(result),
        None if envelope.is_error => Err(anyhow!("claude reported an error")),
        None => Ok(stdout.to_string()),
    }
}
