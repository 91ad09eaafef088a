use std::path::{Path, PathBuf};

use anyhow::Result;
use astropost_content::compose::HtmlStyle;
use astropost_core::{default_credentials_path, default_token_path, expand_home};
use astropost_mail::AuthSettings;
use astropost_summary::{
    DEFAULT_MAX_BODY_CHARS, DEFAULT_MODEL, DEFAULT_OLLAMA_ENDPOINT, Provider, SummaryConfig,
};
use tracing::warn;

use super::load_config_text;

const DEFAULT_LIST_COUNT: usize = 5;
const DEFAULT_FONT_FAMILY: &str = "Arial, sans-serif";
const DEFAULT_OPENAI_ENDPOINT: &str = "https://api.openai.com";
const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AuthConfig {
    pub(crate) token_path: PathBuf,
    pub(crate) credentials_path: PathBuf,
    pub(crate) port: u16,
    pub(crate) open_browser: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SendConfig {
    pub(crate) from: Option<String>,
    pub(crate) html: bool,
    pub(crate) html_font_family: String,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ListConfig {
    pub(crate) default_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SummarySettings {
    pub(crate) provider: String,
    pub(crate) endpoint: Option<String>,
    pub(crate) model: String,
    pub(crate) api_key_env: String,
    pub(crate) max_body_chars: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AppConfig {
    pub(crate) auth: AuthConfig,
    pub(crate) api_base: Option<String>,
    pub(crate) send: SendConfig,
    pub(crate) list: ListConfig,
    pub(crate) summary: SummarySettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            auth: AuthConfig {
                token_path: default_token_path(),
                credentials_path: default_credentials_path(),
                port: 0,
                open_browser: true,
            },
            api_base: None,
            send: SendConfig {
                from: None,
                html: true,
                html_font_family: DEFAULT_FONT_FAMILY.to_string(),
            },
            list: ListConfig {
                default_count: DEFAULT_LIST_COUNT,
            },
            summary: SummarySettings {
                provider: "ollama".to_string(),
                endpoint: None,
                model: DEFAULT_MODEL.to_string(),
                api_key_env: DEFAULT_API_KEY_ENV.to_string(),
                max_body_chars: DEFAULT_MAX_BODY_CHARS,
            },
        }
    }
}

fn table<'a>(value: &'a toml::Value, name: &str) -> Option<&'a toml::Value> {
    value.get(name).filter(|v| v.is_table())
}

fn str_field(section: Option<&toml::Value>, key: &str) -> Option<String> {
    section
        .and_then(|s| s.get(key))
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn bool_field(section: Option<&toml::Value>, key: &str, default: bool) -> bool {
    match section.and_then(|s| s.get(key)) {
        Some(v) => v
            .as_bool()
            .or_else(|| {
                v.as_str()
                    .map(|s| s == "1" || s.eq_ignore_ascii_case("true"))
            })
            .unwrap_or(default),
        None => default,
    }
}

fn usize_field(section: Option<&toml::Value>, key: &str, default: usize) -> usize {
    section
        .and_then(|s| s.get(key))
        .and_then(|v| v.as_integer())
        .filter(|n| *n > 0)
        .map(|n| n as usize)
        .unwrap_or(default)
}

impl AppConfig {
    pub(crate) fn from_toml(value: &toml::Value) -> Self {
        let defaults = AppConfig::default();
        let auth = table(value, "auth");
        let api = table(value, "api");
        let send = table(value, "send");
        let list = table(value, "list");
        let summary = table(value, "summary");

        let port = auth
            .and_then(|s| s.get("port"))
            .and_then(|v| v.as_integer())
            .and_then(|n| u16::try_from(n).ok())
            .unwrap_or(defaults.auth.port);

        AppConfig {
            auth: AuthConfig {
                token_path: str_field(auth, "token_path")
                    .map(|p| expand_home(&p))
                    .unwrap_or(defaults.auth.token_path),
                credentials_path: str_field(auth, "credentials_path")
                    .map(|p| expand_home(&p))
                    .unwrap_or(defaults.auth.credentials_path),
                port,
                open_browser: bool_field(auth, "open_browser", defaults.auth.open_browser),
            },
            api_base: str_field(api, "base_url"),
            send: SendConfig {
                from: str_field(send, "from"),
                html: bool_field(send, "html", defaults.send.html),
                html_font_family: str_field(send, "html_font_family")
                    .unwrap_or(defaults.send.html_font_family),
            },
            list: ListConfig {
                default_count: usize_field(list, "default_count", defaults.list.default_count),
            },
            summary: SummarySettings {
                provider: str_field(summary, "provider").unwrap_or(defaults.summary.provider),
                endpoint: str_field(summary, "endpoint"),
                model: str_field(summary, "model").unwrap_or(defaults.summary.model),
                api_key_env: str_field(summary, "api_key_env")
                    .unwrap_or(defaults.summary.api_key_env),
                max_body_chars: usize_field(
                    summary,
                    "max_body_chars",
                    defaults.summary.max_body_chars,
                ),
            },
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Some(path) = env_value("ASTROPOST_TOKEN_PATH") {
            self.auth.token_path = expand_home(&path);
        }
        if let Some(path) = env_value("ASTROPOST_CREDENTIALS_PATH") {
            self.auth.credentials_path = expand_home(&path);
        }
        if let Some(base) = env_value("ASTROPOST_API_BASE") {
            self.api_base = Some(base);
        }
        if let Some(endpoint) = env_value("ASTROPOST_LLM_ENDPOINT") {
            self.summary.endpoint = Some(endpoint);
        }
    }

    pub(crate) fn auth_settings(&self) -> AuthSettings {
        let mut settings =
            AuthSettings::new(self.auth.token_path.clone(), self.auth.credentials_path.clone());
        settings.port = self.auth.port;
        settings.open_browser = self.auth.open_browser;
        settings
    }

    pub(crate) fn html_style(&self) -> HtmlStyle {
        HtmlStyle {
            font_family: self.send.html_font_family.clone(),
        }
    }

    pub(crate) fn summary_config(&self) -> Result<SummaryConfig> {
        let provider: Provider = self.summary.provider.parse()?;
        let endpoint = self.summary.endpoint.clone().unwrap_or_else(|| {
            match provider {
                Provider::Ollama => DEFAULT_OLLAMA_ENDPOINT,
                Provider::OpenAi => DEFAULT_OPENAI_ENDPOINT,
            }
            .to_string()
        });
        let api_key = env_value(&self.summary.api_key_env);
        Ok(SummaryConfig {
            provider,
            endpoint,
            model: self.summary.model.clone(),
            api_key,
            max_body_chars: self.summary.max_body_chars,
            ..SummaryConfig::default()
        })
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(crate) fn load_app_config(explicit: Option<&Path>) -> Result<AppConfig> {
    let mut config = match load_config_text(explicit)? {
        Some(content) => match toml::from_str::<toml::Value>(&content) {
            Ok(value) => AppConfig::from_toml(&value),
            Err(err) => {
                warn!(error = %err, "config is not valid TOML; using defaults");
                AppConfig::default()
            }
        },
        None => AppConfig::default(),
    };
    config.apply_env_overrides();
    Ok(config)
}

#[cfg(test)]
mod tests {
    use astropost_summary::Provider;

    use super::AppConfig;

    fn parse(text: &str) -> AppConfig {
        let value: toml::Value = toml::from_str(text).unwrap();
        AppConfig::from_toml(&value)
    }

    #[test]
    fn empty_file_gives_defaults() {
        assert_eq!(parse(""), AppConfig::default());
    }

    #[test]
    fn sections_override_defaults() {
        let config = parse(
            r#"
[auth]
token_path = "/tmp/astro/token.json"
port = 8765
open_browser = "false"

[api]
base_url = "http://127.0.0.1:9999"

[send]
from = "Me <me@example.com>"
html = false

[list]
default_count = 12

[summary]
provider = "openai"
model = "gpt-4o-mini"
max_body_chars = 500
"#,
        );
        assert_eq!(config.auth.token_path.to_str(), Some("/tmp/astro/token.json"));
        assert_eq!(config.auth.port, 8765);
        assert!(!config.auth.open_browser);
        assert_eq!(config.api_base.as_deref(), Some("http://127.0.0.1:9999"));
        assert_eq!(config.send.from.as_deref(), Some("Me <me@example.com>"));
        assert!(!config.send.html);
        assert_eq!(config.list.default_count, 12);
        assert_eq!(config.summary.max_body_chars, 500);

        let summary = config.summary_config().unwrap();
        assert_eq!(summary.provider, Provider::OpenAi);
        assert_eq!(summary.endpoint, "https://api.openai.com");
        assert_eq!(summary.model, "gpt-4o-mini");
    }

    #[test]
    fn bad_values_fall_back() {
        let config = parse(
            r#"
[auth]
port = 70000

[list]
default_count = -3

[send]
html = 42
"#,
        );
        let defaults = AppConfig::default();
        assert_eq!(config.auth.port, defaults.auth.port);
        assert_eq!(config.list.default_count, defaults.list.default_count);
        assert!(config.send.html);
    }

    #[test]
    fn unknown_provider_is_an_error() {
        let config = parse("[summary]\nprovider = \"carrier-pigeon\"\n");
        assert!(config.summary_config().is_err());
    }

    #[test]
    fn auth_settings_carry_port_and_browser() {
        let config = parse("[auth]\nport = 9000\nopen_browser = false\n");
        let settings = config.auth_settings();
        assert_eq!(settings.port, 9000);
        assert!(!settings.open_browser);
        assert_eq!(settings.token_path, config.auth.token_path);
    }
}
