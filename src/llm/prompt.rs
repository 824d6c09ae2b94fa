//! Prompt assembly from templates compiled into the binary.
use crate::util::{sha256_hex, truncate_string};

const MIGRATE: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/prompts/migrate.md"));
const REPAIR: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/prompts/repair.md"));
const RETRY: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/prompts/retry.md"));

/// Failures quoted per repair prompt.
const MAX_FAILURES_IN_PROMPT: usize = 10;
const MAX_FAILURE_DETAIL_BYTES: usize = 2000;
const MAX_PREVIOUS_RESPONSE_BYTES: usize = 1000;

/// Shared facts every prompt mentions.
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub repo: &'a str,
    pub source: &'a str,
    pub target: &'a str,
}

/// A failing test as quoted to the LLM.
#[derive(Debug, Clone)]
pub struct FailureNote {
    pub test_id: String,
    pub outcome: String,
    pub detail: Option<String>,
}

/// Digest of all templates; part of every cache key so edited prompts miss.
pub fn template_digest() -> String {
    let mut joined = String::with_capacity(MIGRATE.len() + REPAIR.len() + RETRY.len());
    for template in [MIGRATE, REPAIR, RETRY] {
        joined.push_str(template);
        joined.push('\0');
    }
    sha256_hex(joined.as_bytes())[..16].to_string()
}

pub fn migrate_prompt(ctx: PromptContext<'_>, file_path: &str, content: &str) -> String {
    render_template(
        MIGRATE,
        &[
            ("repo", ctx.repo),
            ("source", ctx.source),
            ("target", ctx.target),
            ("file_path", file_path),
            ("content", content.trim_end_matches('\n')),
        ],
    )
}

pub fn repair_prompt(
    ctx: PromptContext<'_>,
    file_path: &str,
    original: &str,
    content: &str,
    failures: &[FailureNote],
) -> String {
    let failures = format_failures(failures);
    render_template(
        REPAIR,
        &[
            ("repo", ctx.repo),
            ("source", ctx.source),
            ("target", ctx.target),
            ("file_path", file_path),
            ("failures", &failures),
            ("original", original.trim_end_matches('\n')),
            ("content", content.trim_end_matches('\n')),
        ],
    )
}

/// Prefix `prompt` with the parse error of the previous attempt.
pub fn retry_prompt(prompt: &str, error: &str, previous_response: &str) -> String {
    let mut previous = truncate_string(previous_response, MAX_PREVIOUS_RESPONSE_BYTES);
    if previous.len() < previous_response.len() {
        previous.push_str("...(truncated)");
    }
    let mut out = render_template(RETRY, &[("error", error), ("previous", &previous)]);
    out.push_str(prompt);
    out
}

fn format_failures(failures: &[FailureNote]) -> String {
    let mut out = String::new();
    for failure in failures.iter().take(MAX_FAILURES_IN_PROMPT) {
        out.push_str(&format!("### `{}` ({})\n", failure.test_id, failure.outcome));
        if let Some(detail) = failure.detail.as_deref().filter(|d| !d.trim().is_empty()) {
            let full = detail.trim();
            let mut detail = truncate_string(full, MAX_FAILURE_DETAIL_BYTES);
            if detail.len() < full.len() {
                detail.push_str("\n...(truncated)");
            }
            out.push_str("```text\n");
            out.push_str(&detail);
            out.push_str("\n```\n");
        }
        out.push('\n');
    }
    if failures.len() > MAX_FAILURES_IN_PROMPT {
        out.push_str(&format!(
            "...and {} more failing tests.\n",
            failures.len() - MAX_FAILURES_IN_PROMPT
        ));
    }
    out.trim_end().to_string()
}

/// Substitute `{name}` tokens in one pass so substituted text is never rescanned.
fn render_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let replaced = after.find('}').and_then(|close| {
            let key = &after[..close];
            values
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| (close, *value))
        });
        match replaced {
            Some((close, value)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const CTX: PromptContext<'static> = PromptContext {
        repo: "my-app",
        source: "requests",
        target: "httpx",
    };

    #[test]
    fn migrate_prompt_fills_every_placeholder() {
        let prompt = migrate_prompt(CTX, "app/client.py", "import requests\n");
        assert!(prompt.contains("`my-app`"));
        assert!(prompt.contains("from the library `requests` to the library `httpx`"));
        assert!(prompt.contains("```python\nimport requests\n```"));
        assert!(!prompt.contains("{source}"));
        assert!(!prompt.contains("{content}"));
    }

    #[test]
    fn substituted_content_is_not_rescanned() {
        let content = "template = '{target}'\nd = {}\n";
        let prompt = migrate_prompt(CTX, "t.py", content);
        assert!(prompt.contains("template = '{target}'"));
        assert!(prompt.contains("d = {}"));
    }

    #[test]
    fn repair_prompt_lists_failures() {
        let failures: Vec<FailureNote> = (0..12)
            .map(|i| FailureNote {
                test_id: format!("tests/test_api.py::test_{i}"),
                outcome: "failed".to_string(),
                detail: Some("AttributeError: 'Response' has no attribute 'ok'".to_string()),
            })
            .collect();
        let prompt = repair_prompt(CTX, "app/api.py", "import requests\n", "import httpx\n", &failures);
        assert!(prompt.contains("### `tests/test_api.py::test_0` (failed)"));
        assert!(prompt.contains("has no attribute 'ok'"));
        assert!(!prompt.contains("test_api.py::test_10`"));
        assert!(prompt.contains("...and 2 more failing tests."));
        assert!(prompt.contains("```python\nimport requests\n```"));
        assert!(prompt.contains("```python\nimport httpx\n```"));
    }

    #[test]
    fn retry_prompt_prefixes_error() {
        let retry = retry_prompt("ORIGINAL", "no code block", "just prose");
        assert!(retry.contains("**Error:** no code block"));
        assert!(retry.contains("just prose"));
        assert!(retry.ends_with("ORIGINAL"));
    }

    #[test]
    fn template_digest_is_stable() {
        assert_eq!(template_digest(), template_digest());
        assert_eq!(template_digest().len(), 16);
    }
}
