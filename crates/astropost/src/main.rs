use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::debug;

use astropost_core::{LogFallback, app_config_dir, init_logging};

mod cli;
mod scan_mod;
mod scan_ui_mod;

use crate::cli::{Cli, CliCommand, load_app_config, output_error, run_cli};

const CLI_SCHEMA_VERSION: &str = "astropost.cli.v1";
const CONFIG_FILE_NAME: &str = "astropost.toml";

fn main() -> ExitCode {
    let cli = Cli::parse();
    let json = cli.json;
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if json {
                if let Err(print_err) = output_error(&format!("{err:#}")) {
                    eprintln!("Error: {print_err}");
                }
            } else {
                eprintln!("Error: {err:#}");
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let fallback = if matches!(cli.command, CliCommand::Scan(_)) {
        LogFallback::Silent
    } else {
        LogFallback::Stderr
    };
    init_logging(fallback);

    if cli.config.is_none() {
        if let Err(err) = ensure_default_config_exists() {
            debug!(error = %err, "config bootstrap failed");
        }
    }
    let config = load_app_config(cli.config.as_deref())?;
    let rt = Arc::new(tokio::runtime::Runtime::new()?);
    run_cli(&rt, cli.command, &config, cli.json)
}

fn config_path_candidates() -> Vec<PathBuf> {
    vec![
        PathBuf::from(CONFIG_FILE_NAME),
        app_config_dir().join(CONFIG_FILE_NAME),
    ]
}

/// Text of the explicit config file, or of the first candidate that exists.
fn load_config_text(explicit: Option<&Path>) -> Result<Option<String>> {
    if let Some(path) = explicit {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("cannot read config {}: {e}", path.display()))?;
        return Ok(Some(text));
    }
    for path in config_path_candidates() {
        if let Ok(content) = std::fs::read_to_string(&path) {
            debug!(path = %path.display(), "loaded config");
            return Ok(Some(content));
        }
    }
    Ok(None)
}

fn default_config_template() -> &'static str {
    r#"# Auto-generated by astropost on first run.

[auth]
# token_path = "~/.config/astropost/token.json"
# credentials_path = "~/.config/astropost/credentials.json"
port = 0
open_browser = true

[api]
# base_url = "https://gmail.googleapis.com/gmail/v1/users/me"

[send]
# from = "Your Name <you@example.com>"
html = true
html_font_family = "Arial, sans-serif"

[list]
default_count = 5

[summary]
provider = "ollama"
endpoint = "http://localhost:11434"
model = "llama3"
api_key_env = "OPENAI_API_KEY"
max_body_chars = 2000
"#
}

fn ensure_default_config_exists() -> Result<()> {
    if config_path_candidates().iter().any(|path| path.exists()) {
        return Ok(());
    }
    let path = app_config_dir().join(CONFIG_FILE_NAME);
    write_text_atomic(&path, default_config_template())
}

fn write_text_atomic(path: &Path, content: &str) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;
    // Preserve ownership when updating an existing user-owned config file.
    if path.exists() {
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(path)?;
        file.write_all(content.as_bytes())?;
        return Ok(());
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, content.as_bytes())?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
