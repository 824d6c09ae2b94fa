//! LLM-driven file rewriting.
//!
//! A rewrite sends one prompt for one file and expects an explanation plus
//! the complete new file. Answers that cannot be parsed are retried with the
//! parse error included so the model can correct itself; transport and
//! command failures are not retried.
mod client;
mod log;
mod prompt;
mod response;

pub use client::{select_client, LlmClient, LlmSpec, DEFAULT_LLM};
pub use log::{append_llm_log, load_llm_log, LlmLogBuilder, RewriteKind};
pub use prompt::{migrate_prompt, repair_prompt, template_digest, FailureNote, PromptContext};
pub use response::parse_answer;

use anyhow::{anyhow, Result};
use std::path::PathBuf;

/// Maximum number of retry attempts after an unusable answer.
const MAX_LLM_RETRIES: u32 = 2;

/// One file's rewrite request.
#[derive(Debug, Clone)]
pub struct RewriteRequest<'a> {
    pub kind: RewriteKind,
    pub round: u32,
    pub file: &'a str,
    pub prompt: String,
}

/// A successful rewrite.
#[derive(Debug, Clone)]
pub struct Rewrite {
    pub code: String,
    pub explanation: String,
    pub attempts: u32,
}

/// A backend plus the log every call is recorded in.
pub struct LlmSession {
    client: Box<dyn LlmClient>,
    log_path: PathBuf,
}

impl LlmSession {
    pub fn new(client: Box<dyn LlmClient>, log_path: PathBuf) -> Self {
        Self { client, log_path }
    }

    pub fn identity(&self) -> String {
        self.client.identity()
    }

    /// Ask for a rewrite, retrying unusable answers.
    pub fn rewrite(&self, request: &RewriteRequest<'_>) -> Result<Rewrite> {
        let backend = self.client.identity();
        let builder = LlmLogBuilder::new(request.round, request.kind, request.file, &backend)
            .with_prompt_preview(&request.prompt);

        let mut last_error: Option<String> = None;
        let mut last_response: Option<String> = None;
        let mut attempts = 0;

        for attempt in 0..=MAX_LLM_RETRIES {
            attempts = attempt + 1;
            let prompt = match (&last_error, &last_response) {
                (Some(error), Some(previous)) => {
                    tracing::warn!(
                        file = request.file,
                        attempt,
                        max = MAX_LLM_RETRIES,
                        "LLM retry (previous answer unusable)"
                    );
                    prompt::retry_prompt(&request.prompt, error, previous)
                }
                _ => request.prompt.clone(),
            };

            let response_text = match self.client.complete(&prompt) {
                Ok(text) => text,
                Err(err) => {
                    let entry = builder.failed(attempts, format!("{err:#}"));
                    append_llm_log(&self.log_path, &entry)?;
                    return Err(err.context(format!("{} {}", request.kind, request.file)));
                }
            };

            match parse_answer(&response_text) {
                Ok(answer) => {
                    append_llm_log(&self.log_path, &builder.success(attempts))?;
                    return Ok(Rewrite {
                        code: answer.code,
                        explanation: answer.explanation,
                        attempts,
                    });
                }
                Err(err) => {
                    last_error = Some(err.to_string());
                    last_response = Some(response_text);
                }
            }
        }

        let error = last_error.unwrap_or_else(|| "unknown".to_string());
        append_llm_log(&self.log_path, &builder.failed(attempts, error.clone()))?;
        Err(anyhow!(
            "LLM failed to {} {} after {} attempts. Last error: {}",
            request.kind,
            request.file,
            attempts,
            error
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Replays canned answers and records the prompts it saw.
    struct ScriptedClient {
        answers: RefCell<Vec<Result<String>>>,
        prompts: std::rc::Rc<RefCell<Vec<String>>>,
    }

    impl LlmClient for ScriptedClient {
        fn identity(&self) -> String {
            "scripted".to_string()
        }

        fn complete(&self, prompt: &str) -> Result<String> {
            self.prompts.borrow_mut().push(prompt.to_string());
            self.answers.borrow_mut().remove(0)
        }
    }

    fn session(answers: Vec<Result<String>>) -> (LlmSession, std::rc::Rc<RefCell<Vec<String>>>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let prompts = std::rc::Rc::new(RefCell::new(Vec::new()));
        let client = ScriptedClient {
            answers: RefCell::new(answers),
            prompts: prompts.clone(),
        };
        let session = LlmSession::new(Box::new(client), dir.path().join("llm_log.jsonl"));
        (session, prompts, dir)
    }

    fn request() -> RewriteRequest<'static> {
        RewriteRequest {
            kind: RewriteKind::Migrate,
            round: 1,
            file: "app/api.py",
            prompt: "PROMPT".to_string(),
        }
    }

    #[test]
    fn rewrite_retries_unparseable_answers() {
        let (session, prompts, dir) = session(vec![
            Ok("sorry, no code".to_string()),
            Ok("Swapped imports.\n```python\nimport httpx\n```".to_string()),
        ]);
        let rewrite = session.rewrite(&request()).unwrap();
        assert_eq!(rewrite.code, "import httpx\n");
        assert_eq!(rewrite.explanation, "Swapped imports.");
        assert_eq!(rewrite.attempts, 2);

        let prompts = prompts.borrow();
        assert_eq!(prompts[0], "PROMPT");
        assert!(prompts[1].contains("sorry, no code"));
        assert!(prompts[1].ends_with("PROMPT"));

        let log = load_llm_log(&dir.path().join("llm_log.jsonl")).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].attempts, 2);
    }

    #[test]
    fn rewrite_gives_up_after_max_retries() {
        let answers = (0..=MAX_LLM_RETRIES).map(|_| Ok("nothing".to_string())).collect();
        let (session, prompts, _dir) = session(answers);
        let err = session.rewrite(&request()).unwrap_err();
        assert!(err.to_string().contains("after 3 attempts"));
        assert_eq!(prompts.borrow().len(), 3);
    }

    #[test]
    fn transport_errors_are_not_retried() {
        let (session, prompts, dir) = session(vec![Err(anyhow!("connection refused"))]);
        let err = session.rewrite(&request()).unwrap_err();
        assert!(format!("{err:#}").contains("connection refused"));
        assert_eq!(prompts.borrow().len(), 1);
        let log = load_llm_log(&dir.path().join("llm_log.jsonl")).unwrap();
        assert_eq!(log[0].error.as_deref(), Some("connection refused"));
    }
}
