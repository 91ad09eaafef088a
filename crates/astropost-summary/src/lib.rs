//! Inbox digests from a local or hosted LLM.

use std::fmt::Write as _;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use astropost_content::sanitize_body;
use astropost_core::{Email, truncate_chars};

pub const NO_EMAILS: &str = "No emails to summarize.";
pub const DEFAULT_OLLAMA_ENDPOINT: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "llama3";
pub const DEFAULT_MAX_BODY_CHARS: usize = 2000;

const INBOX_INSTRUCTION: &str = "You are an assistant that summarizes an email inbox. \
Write a concise digest of the emails below. Group related messages, call out anything \
that needs a reply or an action, and skip newsletters and notifications unless they matter.";
const EMAIL_INSTRUCTION: &str = "Summarize the following email in a few sentences. \
Mention any question asked or action requested.";

pub type Result<T> = std::result::Result<T, SummaryError>;

#[derive(Debug, thiserror::Error)]
pub enum SummaryError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("LLM endpoint returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("LLM returned an empty response")]
    EmptyResponse,

    #[error("unknown LLM provider {0:?} (expected \"ollama\" or \"openai\")")]
    UnknownProvider(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Provider {
    #[default]
    Ollama,
    /// Any server speaking the OpenAI chat-completions protocol.
    OpenAi,
}

impl FromStr for Provider {
    type Err = SummaryError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(Provider::Ollama),
            "openai" | "openai-compatible" => Ok(Provider::OpenAi),
            other => Err(SummaryError::UnknownProvider(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SummaryConfig {
    pub provider: Provider,
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub max_body_chars: usize,
    pub timeout: Duration,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Ollama,
            endpoint: DEFAULT_OLLAMA_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            max_body_chars: DEFAULT_MAX_BODY_CHARS,
            timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    response: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: String,
}

pub struct Summarizer {
    config: SummaryConfig,
    http: reqwest::Client,
}

impl Summarizer {
    pub fn new(config: SummaryConfig) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &SummaryConfig {
        &self.config
    }

    /// An empty inbox is answered without contacting the model.
    pub async fn summarize_inbox(&self, emails: &[Email]) -> Result<String> {
        if emails.is_empty() {
            return Ok(NO_EMAILS.to_string());
        }
        let prompt = inbox_prompt(emails, self.config.max_body_chars);
        self.complete(&prompt).await
    }

    pub async fn summarize_email(&self, email: &Email) -> Result<String> {
        let prompt = email_prompt(email, self.config.max_body_chars);
        self.complete(&prompt).await
    }

    /// Sends one prompt and returns the cleaned reply.
    pub async fn complete(&self, prompt: &str) -> Result<String> {
        let endpoint = self.config.endpoint.trim_end_matches('/');
        debug!(provider = ?self.config.provider, model = %self.config.model, chars = prompt.len(), "LLM request");
        let raw = match self.config.provider {
            Provider::Ollama => {
                let request = OllamaRequest {
                    model: &self.config.model,
                    prompt,
                    stream: false,
                };
                let response = self
                    .http
                    .post(format!("{endpoint}/api/generate"))
                    .json(&request)
                    .send()
                    .await?;
                let body: OllamaResponse = read_json(response).await?;
                body.response
            }
            Provider::OpenAi => {
                let request = ChatRequest {
                    model: &self.config.model,
                    messages: vec![ChatMessage {
                        role: "user",
                        content: prompt,
                    }],
                };
                let mut builder = self
                    .http
                    .post(format!("{endpoint}/v1/chat/completions"))
                    .json(&request);
                if let Some(key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
                    builder = builder.bearer_auth(key);
                }
                let body: ChatResponse = read_json(builder.send().await?).await?;
                body.choices
                    .into_iter()
                    .next()
                    .map(|choice| choice.message.content)
                    .unwrap_or_default()
            }
        };

        let summary = sanitize_body(&raw);
        if summary.is_empty() {
            return Err(SummaryError::EmptyResponse);
        }
        Ok(summary)
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    let text = response.text().await?;
    if !status.is_success() {
        return Err(SummaryError::Status {
            status: status.as_u16(),
            message: truncate_chars(text.trim(), 300),
        });
    }
    Ok(serde_json::from_str(&text)?)
}

pub fn inbox_prompt(emails: &[Email], max_body_chars: usize) -> String {
    let mut prompt = String::from(INBOX_INSTRUCTION);
    prompt.push_str("\n\n");
    for (index, email) in emails.iter().enumerate() {
        let _ = writeln!(prompt, "--- Email {} ---", index + 1);
        push_email(&mut prompt, email, max_body_chars);
    }
    prompt
}

pub fn email_prompt(email: &Email, max_body_chars: usize) -> String {
    let mut prompt = String::from(EMAIL_INSTRUCTION);
    prompt.push_str("\n\n");
    push_email(&mut prompt, email, max_body_chars);
    prompt
}

fn push_email(prompt: &mut String, email: &Email, max_body_chars: usize) {
    let _ = writeln!(prompt, "From: {}", email.sender);
    let _ = writeln!(prompt, "Subject: {}", email.subject);
    let _ = writeln!(prompt, "Date: {}", email.date);
    let body = if email.body.trim().is_empty() {
        email.snippet.as_str()
    } else {
        email.body.as_str()
    };
    let mut excerpt = truncate_chars(body.trim(), max_body_chars);
    if body.trim().chars().count() > max_body_chars {
        excerpt.push_str(" [...]");
    }
    let _ = writeln!(prompt, "Body:\n{excerpt}\n");
}
