#![allow(dead_code)]

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use serde_json::json;

pub const LUNCH: &str = "From: Alice <alice@example.com>\r\n\
To: me@example.com\r\n\
Subject: Lunch\r\n\
Date: Mon, 7 Oct 2024 12:00:00 +0000\r\n\
Message-ID: <m1@example.com>\r\n\
\r\n\
Are you free at noon?\r\n";

pub fn token_path(home: &Path) -> PathBuf {
    home.join("token.json")
}

/// Writes a token that stays valid for the whole run, so no OAuth traffic
/// happens.
pub fn write_token(home: &Path) {
    let token = json!({
        "token": "ya29.test",
        "token_uri": "http://127.0.0.1:9/token",
        "client_id": "client.apps.googleusercontent.com",
        "scopes": [
            "https://www.googleapis.com/auth/gmail.readonly",
            "https://www.googleapis.com/auth/gmail.send",
            "https://www.googleapis.com/auth/gmail.modify"
        ],
        "expiry": "2099-01-01T00:00:00Z"
    });
    std::fs::write(token_path(home), token.to_string()).expect("write token");
}

/// The binary with every path pointed into `home` and the API at `api_base`.
pub fn astropost(home: &Path, api_base: &str) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("astropost"));
    cmd.current_dir(home)
        .env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join("config"))
        .env("XDG_STATE_HOME", home.join("state"))
        .env("ASTROPOST_TOKEN_PATH", token_path(home))
        .env("ASTROPOST_CREDENTIALS_PATH", home.join("credentials.json"))
        .env("ASTROPOST_API_BASE", api_base)
        .env_remove("ASTROPOST_LOG")
        .env_remove("ASTROPOST_LLM_ENDPOINT");
    cmd
}

pub fn stdout(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

pub fn stderr(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

pub fn assert_success(output: &std::process::Output) {
    assert!(
        output.status.success(),
        "astropost failed. status={:?}\nstdout:\n{}\nstderr:\n{}",
        output.status.code(),
        stdout(output),
        stderr(output)
    );
}
