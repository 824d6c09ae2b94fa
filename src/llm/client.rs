//! LLM backends selected with `--llm`.
//!
//! Rather than embedding one provider, the backend is named on the command
//! line:
//!
//! - `claude` or `claude:<model>`: the Claude CLI in print mode
//! - `anthropic` or `anthropic:<model>`: the Anthropic Messages API
//! - `openai` or `openai:<model>`: an OpenAI-compatible chat completions API
//! - `cmd:<command>` or any other text: a shell command that reads the
//!   prompt on stdin and writes the answer to stdout
use super::response::unwrap_claude_envelope;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::process::{Command, Stdio};
use std::time::Instant;

/// Backend used when neither `--llm`, `LIBMIG_LLM` nor a recorded run name one.
pub const DEFAULT_LLM: &str = "claude";

const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-5";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";
const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const MAX_OUTPUT_TOKENS: u32 = 16_000;

/// A text-in, text-out completion backend.
pub trait LlmClient {
    /// Stable identity used in cache keys and logs.
    fn identity(&self) -> String;

    /// Send one prompt and return the raw answer text.
    fn complete(&self, prompt: &str) -> Result<String>;
}

/// Parsed form of an `--llm` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmSpec {
    ClaudeCli { model: Option<String> },
    Anthropic { model: String },
    OpenAi { model: String },
    Command { command: String },
}

impl LlmSpec {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(anyhow!("--llm value is empty"));
        }
        let (head, tail) = match raw.split_once(':') {
            Some((head, tail)) => (head, Some(tail.trim())),
            None => (raw, None),
        };
        let model = tail.filter(|model| !model.is_empty()).map(str::to_string);
        Ok(match head {
            "claude" => Self::ClaudeCli { model },
            "anthropic" => Self::Anthropic {
                model: model.unwrap_or_else(|| DEFAULT_ANTHROPIC_MODEL.to_string()),
            },
            "openai" => Self::OpenAi {
                model: model.unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
            },
            "cmd" => {
                let command = tail.unwrap_or_default().to_string();
                if command.is_empty() {
                    return Err(anyhow!("--llm cmd: needs a command"));
                }
                Self::Command { command }
            }
            _ => Self::Command {
                command: raw.to_string(),
            },
        })
    }

    /// Identity of the backend this spec selects, without building it.
    pub fn identity(&self) -> String {
        match self {
            Self::ClaudeCli { model: Some(model) } => format!("claude:{model}"),
            Self::ClaudeCli { model: None } => "claude".to_string(),
            Self::Anthropic { model } => format!("anthropic:{model}"),
            Self::OpenAi { model } => format!("openai:{model}"),
            Self::Command { command } => format!("cmd:{command}"),
        }
    }
}

/// Build the backend named by `raw`.
pub fn select_client(raw: &str) -> Result<Box<dyn LlmClient>> {
    Ok(match LlmSpec::parse(raw)? {
        LlmSpec::ClaudeCli { model } => Box::new(ClaudeCliClient { model }),
        LlmSpec::Anthropic { model } => Box::new(AnthropicClient {
            api_key: require_env("ANTHROPIC_API_KEY")?,
            model,
        }),
        LlmSpec::OpenAi { model } => Box::new(OpenAiClient {
            api_key: require_env("OPENAI_API_KEY")?,
            base_url: std::env::var("OPENAI_BASE_URL")
                .ok()
                .filter(|url| !url.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            model,
        }),
        LlmSpec::Command { command } => Box::new(CommandClient::new(&command)?),
    })
}

fn require_env(name: &str) -> Result<String> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| anyhow!("{name} is not set"))
}

/// Any command that accepts a prompt on stdin and answers on stdout.
#[derive(Debug)]
pub struct CommandClient {
    command: String,
    argv: Vec<String>,
}

impl CommandClient {
    pub fn new(command: &str) -> Result<Self> {
        let argv =
            shell_words::split(command).with_context(|| format!("parse LLM command: {command}"))?;
        if argv.is_empty() {
            return Err(anyhow!("LLM command is empty"));
        }
        Ok(Self {
            command: command.to_string(),
            argv,
        })
    }
}

impl LlmClient for CommandClient {
    fn identity(&self) -> String {
        format!("cmd:{}", self.command)
    }

    fn complete(&self, prompt: &str) -> Result<String> {
        run_with_stdin(&self.argv, prompt)
    }
}

/// The `claude` CLI in non-interactive print mode.
#[derive(Debug)]
pub struct ClaudeCliClient {
    model: Option<String>,
}

impl ClaudeCliClient {
    fn argv(&self) -> Vec<String> {
        let mut argv = vec![
            "claude".to_string(),
            "--print".to_string(),
            "--output-format".to_string(),
            "json".to_string(),
            "--no-session-persistence".to_string(),
            "--tools".to_string(),
            "".to_string(),
        ];
        if let Some(model) = &self.model {
            argv.push("--model".to_string());
            argv.push(model.clone());
        }
        argv
    }
}

impl LlmClient for ClaudeCliClient {
    fn identity(&self) -> String {
        match &self.model {
            Some(model) => format!("claude:{model}"),
            None => "claude".to_string(),
        }
    }

    fn complete(&self, prompt: &str) -> Result<String> {
        let stdout = run_with_stdin(&self.argv(), prompt)?;
        unwrap_claude_envelope(&stdout)
    }
}

fn run_with_stdin(argv: &[String], prompt: &str) -> Result<String> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| anyhow!("LLM command is empty"))?;
    let start = Instant::now();
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("spawn LLM command: {program}"))?;

    // Feed stdin from its own thread; commands may answer while still reading.
    let stdin = child.stdin.take();
    let (written, output) = std::thread::scope(|scope| {
        let writer = scope.spawn(move || match stdin {
            Some(mut stdin) => stdin.write_all(prompt.as_bytes()),
            None => Ok(()),
        });
        let output = child.wait_with_output();
        (writer.join(), output)
    });
    let output = output.context("wait for LLM command")?;
    match written {
        Ok(Ok(())) => {}
        Ok(Err(err)) if err.kind() == std::io::ErrorKind::BrokenPipe => {
            tracing::debug!("LLM command stopped reading the prompt early");
        }
        Ok(Err(err)) => return Err(err).context("write prompt to LLM stdin"),
        Err(_) => return Err(anyhow!("prompt writer thread panicked")),
    }
    let elapsed_ms = start.elapsed().as_millis();

    tracing::info!(
        elapsed_ms,
        prompt_bytes = prompt.len(),
        response_bytes = output.stdout.len(),
        "llm command complete"
    );

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!(
            "LLM command failed with status {}: {}",
            output.status,
            stderr.trim()
        ));
    }

    String::from_utf8(output.stdout).context("decode LLM stdout as UTF-8")
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicBlock>,
}

#[derive(Deserialize)]
struct AnthropicBlock {
    #[serde(default)]
    text: Option<String>,
}

/// Anthropic Messages API.
pub struct AnthropicClient {
    api_key: String,
    model: String,
}

impl LlmClient for AnthropicClient {
    fn identity(&self) -> String {
        format!("anthropic:{}", self.model)
    }

    fn complete(&self, prompt: &str) -> Result<String> {
        let request = AnthropicRequest {
            model: &self.model,
            max_tokens: MAX_OUTPUT_TOKENS,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };
        let start = Instant::now();
        let agent = ureq::Agent::new_with_defaults();
        let response = agent
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .send_json(&request)
            .context("anthropic request failed")?;
        let body: AnthropicResponse = response
            .into_body()
            .read_json()
            .context("parse anthropic response")?;
        tracing::info!(
            elapsed_ms = start.elapsed().as_millis(),
            prompt_bytes = prompt.len(),
            "anthropic request complete"
        );
        let text = body
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");
        if text.is_empty() {
            return Err(anyhow!("anthropic response contained no text"));
        }
        Ok(text)
    }
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat completions API.
pub struct OpenAiClient {
    api_key: String,
    base_url: String,
    model: String,
}

impl LlmClient for OpenAiClient {
    fn identity(&self) -> String {
        format!("openai:{}", self.model)
    }

    fn complete(&self, prompt: &str) -> Result<String> {
        let request = OpenAiRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let start = Instant::now();
        let agent = ureq::Agent::new_with_defaults();
        let response = agent
            .post(&url)
            .header("authorization", &format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
            .send_json(&request)
            .with_context(|| format!("openai request to {url} failed"))?;
        let body: OpenAiResponse = response
            .into_body()
            .read_json()
            .context("parse openai response")?;
        tracing::info!(
            elapsed_ms = start.elapsed().as_millis(),
            prompt_bytes = prompt.len(),
            "openai request complete"
        );
        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.is_empty())
            .ok_or_else(|| anyhow!("openai response contained no text"))
    }
}
