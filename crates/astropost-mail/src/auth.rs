//! OAuth credentials for the Gmail API: client secrets, the stored
//! authorized-user token and the installed-app loopback flow.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::AuthError;

pub const GOOGLE_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
pub const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
pub const GMAIL_SCOPES: [&str; 3] = [
    "https://www.googleapis.com/auth/gmail.readonly",
    "https://www.googleapis.com/auth/gmail.send",
    "https://www.googleapis.com/auth/gmail.modify",
];

const EXPIRY_SKEW_SECS: i64 = 60;
const SUCCESS_PAGE: &str =
    "<html><body>The authentication flow has completed. You may close this window.</body></html>";
const FAILURE_PAGE: &str =
    "<html><body>Authorization failed. Return to the terminal for details.</body></html>";

type AuthResult<T> = std::result::Result<T, AuthError>;

fn default_auth_uri() -> String {
    GOOGLE_AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    GOOGLE_TOKEN_URI.to_string()
}

/// OAuth client registration as downloaded from the Google console.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

#[derive(Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

impl ClientSecrets {
    pub fn from_json(text: &str) -> AuthResult<Self> {
        let file: ClientSecretsFile = serde_json::from_str(text)?;
        file.installed.or(file.web).ok_or_else(|| {
            AuthError::InvalidSecrets("expected an \"installed\" or \"web\" client".to_string())
        })
    }

    pub fn from_file(path: &Path) -> AuthResult<Self> {
        if !path.exists() {
            return Err(AuthError::MissingCredentials(path.display().to_string()));
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}

/// Authorized-user token file. Field names match the JSON Google's client
/// libraries write, so existing token files keep working.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredToken {
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

impl StoredToken {
    /// A token without an expiry never counts as expired.
    pub fn is_expired(&self) -> bool {
        self.expiry
            .is_some_and(|exp| Utc::now() + chrono::Duration::seconds(EXPIRY_SKEW_SECS) >= exp)
    }

    pub fn is_valid(&self) -> bool {
        !self.token.is_empty() && !self.is_expired()
    }

    /// Tokens that do not record their scopes are given the benefit of the doubt.
    pub fn has_scopes(&self, required: &[String]) -> bool {
        self.scopes.is_empty() || required.iter().all(|scope| self.scopes.contains(scope))
    }
}

#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// An unreadable token file is treated like a missing one.
    pub fn load(&self) -> AuthResult<Option<StoredToken>> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        match serde_json::from_str(&text) {
            Ok(token) => Ok(Some(token)),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "ignoring unreadable token file");
                Ok(None)
            }
        }
    }

    pub fn save(&self, token: &StoredToken) -> AuthResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(token)?;
        std::fs::write(&self.path, json)?;
        set_owner_only(&self.path)?;
        Ok(())
    }

    pub fn delete(&self) -> AuthResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(unix)]
fn set_owner_only(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn set_owner_only(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// PKCE (RFC 7636) verifier and its S256 challenge.
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    pub verifier: String,
    pub challenge: String,
}

impl PkceChallenge {
    pub fn generate() -> Self {
        let verifier = random_token();
        let challenge = Self::compute_challenge(&verifier);
        Self {
            verifier,
            challenge,
        }
    }

    fn compute_challenge(verifier: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(verifier.as_bytes());
        URL_SAFE_NO_PAD.encode(hasher.finalize())
    }
}

fn random_token() -> String {
    URL_SAFE_NO_PAD.encode(rand::random::<[u8; 32]>())
}

#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub token_path: PathBuf,
    pub credentials_path: PathBuf,
    pub scopes: Vec<String>,
    /// Loopback port for the redirect; 0 lets the OS pick.
    pub port: u16,
    pub open_browser: bool,
    pub timeout: Duration,
}

impl AuthSettings {
    pub fn new(token_path: impl Into<PathBuf>, credentials_path: impl Into<PathBuf>) -> Self {
        Self {
            token_path: token_path.into(),
            credentials_path: credentials_path.into(),
            scopes: GMAIL_SCOPES.iter().map(|s| s.to_string()).collect(),
            port: 0,
            open_browser: true,
            timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
    #[serde(default)]
    error_description: String,
}

#[derive(Debug, Clone)]
pub struct Authenticator {
    settings: AuthSettings,
    store: TokenStore,
    http: reqwest::Client,
}

impl Authenticator {
    pub fn new(settings: AuthSettings) -> Self {
        let store = TokenStore::new(settings.token_path.clone());
        Self {
            settings,
            store,
            http: reqwest::Client::new(),
        }
    }

    pub fn settings(&self) -> &AuthSettings {
        &self.settings
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    /// Returns usable credentials: the stored token if still valid, a
    /// refreshed one if it expired, or a freshly authorized one otherwise.
    pub async fn load_credentials(&self) -> AuthResult<StoredToken> {
        let stored = self.store.load()?.filter(|token| {
            let covered = token.has_scopes(&self.settings.scopes);
            if !covered {
                warn!("stored token lacks required scopes; re-authorizing");
            }
            covered
        });
        match stored {
            Some(token) if token.is_valid() => Ok(token),
            Some(token) => self.renew(&token).await,
            None => self.authorize_and_save().await,
        }
    }

    /// Refreshes and persists an expired token. When the provider refuses the
    /// refresh the stored token is discarded and the interactive flow runs.
    pub async fn renew(&self, token: &StoredToken) -> AuthResult<StoredToken> {
        if token.refresh_token.is_none() {
            return self.authorize_and_save().await;
        }
        match self.refresh(token).await {
            Ok(fresh) => {
                self.store.save(&fresh)?;
                Ok(fresh)
            }
            Err(AuthError::OAuth { error, description }) => {
                warn!(%error, %description, "refresh rejected; discarding stored token");
                self.store.delete()?;
                self.authorize_and_save().await
            }
            Err(err) => Err(err),
        }
    }

    pub async fn authorize_and_save(&self) -> AuthResult<StoredToken> {
        let token = self.authorize_interactive().await?;
        self.store.save(&token)?;
        info!(path = %self.store.path().display(), "saved new token");
        Ok(token)
    }

    pub async fn refresh(&self, token: &StoredToken) -> AuthResult<StoredToken> {
        let refresh_token = token
            .refresh_token
            .as_deref()
            .ok_or_else(|| AuthError::Flow("token has no refresh token".to_string()))?;

        let mut params = HashMap::new();
        params.insert("grant_type", "refresh_token");
        params.insert("refresh_token", refresh_token);
        params.insert("client_id", token.client_id.as_str());
        if let Some(secret) = &token.client_secret {
            params.insert("client_secret", secret.as_str());
        }

        debug!(token_uri = %token.token_uri, "refreshing access token");
        let response = self
            .http
            .post(&token.token_uri)
            .form(&params)
            .send()
            .await?;
        let body = read_token_response(response).await?;

        let mut fresh = token.clone();
        fresh.token = body.access_token;
        fresh.expiry = expiry_from(body.expires_in);
        if body.refresh_token.is_some() {
            fresh.refresh_token = body.refresh_token;
        }
        if let Some(scope) = body.scope {
            fresh.scopes = split_scopes(&scope);
        }
        Ok(fresh)
    }

    /// Installed-app flow: loopback listener, browser consent, code exchange.
    pub async fn authorize_interactive(&self) -> AuthResult<StoredToken> {
        let secrets = ClientSecrets::from_file(&self.settings.credentials_path)?;
        let listener = TcpListener::bind(("127.0.0.1", self.settings.port)).await?;
        let port = listener.local_addr()?.port();
        let redirect_uri = format!("http://127.0.0.1:{port}/");
        let pkce = PkceChallenge::generate();
        let state = random_token();
        let url = authorization_url(&secrets, &self.settings.scopes, &redirect_uri, &state, &pkce)?;

        eprintln!("Please visit this URL to authorize this application: {url}");
        if self.settings.open_browser {
            if let Err(err) = open::that(url.as_str()) {
                warn!(error = %err, "could not open a browser");
            }
        }

        let code = tokio::time::timeout(self.settings.timeout, wait_for_code(&listener, &state))
            .await
            .map_err(|_| AuthError::Flow("timed out waiting for the browser redirect".to_string()))??;
        self.exchange_code(&secrets, &code, &redirect_uri, &pkce).await
    }

    async fn exchange_code(
        &self,
        secrets: &ClientSecrets,
        code: &str,
        redirect_uri: &str,
        pkce: &PkceChallenge,
    ) -> AuthResult<StoredToken> {
        let mut params = HashMap::new();
        params.insert("grant_type", "authorization_code");
        params.insert("code", code);
        params.insert("client_id", secrets.client_id.as_str());
        params.insert("redirect_uri", redirect_uri);
        params.insert("code_verifier", pkce.verifier.as_str());
        if let Some(secret) = &secrets.client_secret {
            params.insert("client_secret", secret.as_str());
        }

        let response = self
            .http
            .post(&secrets.token_uri)
            .form(&params)
            .send()
            .await?;
        let body = read_token_response(response).await?;
        Ok(StoredToken {
            token: body.access_token,
            refresh_token: body.refresh_token,
            token_uri: secrets.token_uri.clone(),
            client_id: secrets.client_id.clone(),
            client_secret: secrets.client_secret.clone(),
            scopes: body
                .scope
                .map(|scope| split_scopes(&scope))
                .unwrap_or_else(|| self.settings.scopes.clone()),
            expiry: expiry_from(body.expires_in),
        })
    }
}

pub fn authorization_url(
    secrets: &ClientSecrets,
    scopes: &[String],
    redirect_uri: &str,
    state: &str,
    pkce: &PkceChallenge,
) -> AuthResult<Url> {
    let mut url = Url::parse(&secrets.auth_uri)
        .map_err(|e| AuthError::InvalidSecrets(format!("auth_uri: {e}")))?;
    url.query_pairs_mut()
        .append_pair("client_id", &secrets.client_id)
        .append_pair("response_type", "code")
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("scope", &scopes.join(" "))
        .append_pair("state", state)
        .append_pair("code_challenge", &pkce.challenge)
        .append_pair("code_challenge_method", "S256")
        .append_pair("access_type", "offline")
        .append_pair("prompt", "consent");
    Ok(url)
}

async fn read_token_response(response: reqwest::Response) -> AuthResult<TokenResponse> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }
    let text = response.text().await.unwrap_or_default();
    if status.is_client_error() {
        return Err(match serde_json::from_str::<ErrorResponse>(&text) {
            Ok(err) => AuthError::OAuth {
                error: err.error,
                description: err.error_description,
            },
            Err(_) => AuthError::OAuth {
                error: status.as_u16().to_string(),
                description: text,
            },
        });
    }
    Err(AuthError::Server {
        status: status.as_u16(),
    })
}

fn expiry_from(expires_in: Option<i64>) -> Option<DateTime<Utc>> {
    expires_in.map(|secs| Utc::now() + chrono::Duration::seconds(secs))
}

fn split_scopes(scope: &str) -> Vec<String> {
    scope.split_whitespace().map(|s| s.to_string()).collect()
}

async fn wait_for_code(listener: &TcpListener, state: &str) -> AuthResult<String> {
    loop {
        let (mut stream, peer) = listener.accept().await?;
        debug!(%peer, "redirect connection");
        let target = read_request_target(&mut stream).await?;
        match parse_redirect(&target, state) {
            Ok(Some(code)) => {
                respond(&mut stream, "200 OK", SUCCESS_PAGE).await;
                return Ok(code);
            }
            Ok(None) => respond(&mut stream, "404 Not Found", "").await,
            Err(err) => {
                respond(&mut stream, "400 Bad Request", FAILURE_PAGE).await;
                return Err(err);
            }
        }
    }
}

async fn read_request_target(stream: &mut TcpStream) -> AuthResult<String> {
    let mut buf = vec![0u8; 8192];
    let mut len = 0;
    while len < buf.len() {
        let n = stream.read(&mut buf[len..]).await?;
        if n == 0 {
            break;
        }
        len += n;
        if buf[..len].windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let request = String::from_utf8_lossy(&buf[..len]);
    Ok(request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/")
        .to_string())
}

async fn respond(stream: &mut TcpStream, status: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    if let Err(err) = stream.write_all(response.as_bytes()).await {
        debug!(error = %err, "failed to answer redirect");
    }
    let _ = stream.shutdown().await;
}

/// `Ok(None)` for requests that carry neither a code nor an error
/// (favicon probes and the like).
fn parse_redirect(target: &str, expected_state: &str) -> AuthResult<Option<String>> {
    let url = Url::parse("http://127.0.0.1/")
        .and_then(|base| base.join(target))
        .map_err(|e| AuthError::Flow(format!("malformed redirect: {e}")))?;
    let params: HashMap<String, String> = url.query_pairs().into_owned().collect();

    if let Some(error) = params.get("error") {
        return Err(AuthError::OAuth {
            error: error.clone(),
            description: params.get("error_description").cloned().unwrap_or_default(),
        });
    }
    let Some(code) = params.get("code") else {
        return Ok(None);
    };
    if params.get("state").map(String::as_str) != Some(expected_state) {
        return Err(AuthError::Flow("state mismatch in redirect".to_string()));
    }
    Ok(Some(code.clone()))
}
