use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

pub const LABEL_INBOX: &str = "INBOX";
pub const LABEL_UNREAD: &str = "UNREAD";
pub const DEFAULT_TEXT_WIDTH: usize = 80;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Email {
    pub id: String,
    pub thread_id: String,
    #[serde(rename = "from")]
    pub sender: String,
    pub to: String,
    pub cc: String,
    pub subject: String,
    pub date: String,
    pub snippet: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub references: Option<String>,
    pub label_ids: Vec<String>,
    pub attachments: Vec<AttachmentMeta>,
}

impl Email {
    pub fn is_unread(&self) -> bool {
        self.label_ids.iter().any(|label| label == LABEL_UNREAD)
    }

    pub fn in_inbox(&self) -> bool {
        self.label_ids.iter().any(|label| label == LABEL_INBOX)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageRef {
    pub id: String,
    #[serde(rename = "threadId")]
    pub thread_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Label {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(rename = "messagesUnread", skip_serializing_if = "Option::is_none", default)]
    pub messages_unread: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttachmentMeta {
    pub filename: String,
    pub mime: String,
    pub size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendReceipt {
    pub id: String,
    pub thread_id: Option<String>,
    /// Attachment paths that did not exist and were left out.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_attachments: Vec<String>,
}

/// Where log lines go when `ASTROPOST_LOG` is unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFallback {
    Stderr,
    Silent,
}

pub fn xdg_config_dir() -> PathBuf {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
        .unwrap_or_else(|| PathBuf::from("/tmp"))
}

pub fn xdg_state_dir() -> PathBuf {
    std::env::var_os("XDG_STATE_HOME")
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".local").join("state"))
        })
        .unwrap_or_else(|| PathBuf::from("/tmp"))
}

pub fn app_config_dir() -> PathBuf {
    xdg_config_dir().join("astropost")
}

pub fn default_token_path() -> PathBuf {
    app_config_dir().join("token.json")
}

pub fn default_credentials_path() -> PathBuf {
    app_config_dir().join("credentials.json")
}

pub fn log_file_path() -> PathBuf {
    xdg_state_dir().join("astropost").join("astropost.log")
}

/// Expands a leading `~/` against `$HOME`.
pub fn expand_home(raw: &str) -> PathBuf {
    if raw == "~" {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home);
        }
    }
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(raw)
}

pub fn truncate_chars(input: &str, max: usize) -> String {
    input.chars().take(max).collect()
}

/// Installs the global tracing subscriber. `ASTROPOST_LOG` switches logging
/// to the state-dir log file and doubles as the filter directive.
pub fn init_logging(fallback: LogFallback) {
    if let Ok(value) = std::env::var("ASTROPOST_LOG") {
        let directive = log_directive(&value);
        let path = log_file_path();
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path);
        match file {
            Ok(file) => {
                let _ = tracing_subscriber::fmt()
                    .with_env_filter(EnvFilter::new(directive))
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .try_init();
                return;
            }
            Err(err) => {
                eprintln!("astropost: cannot open log file {}: {}", path.display(), err);
            }
        }
    }

    if fallback == LogFallback::Stderr {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new("warn"))
            .with_writer(std::io::stderr)
            .with_target(false)
            .without_time()
            .try_init();
    }
}

fn log_directive(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed == "1" || trimmed.eq_ignore_ascii_case("true") {
        "debug".to_string()
    } else {
        trimmed.to_string()
    }
}
