//! Gmail REST v1 client.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use reqwest::{Method, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use astropost_content::{ThreadContext, build_forward, build_reply, parse_email};
use astropost_core::{DEFAULT_TEXT_WIDTH, Email, LABEL_INBOX, Label, MessageRef, SendReceipt};

use crate::auth::{Authenticator, StoredToken};
use crate::error::{GmailError, Result};
use crate::outgoing::{OutgoingEmail, build_raw_message, load_attachments};
use crate::retry::RetryPolicy;

pub const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";
const MAX_PAGE_SIZE: usize = 500;

/// Which messages a listing returns. A query wins over labels; with
/// neither, the inbox is listed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub max_results: usize,
    pub query: Option<String>,
    pub label_ids: Vec<String>,
}

impl ListQuery {
    pub fn inbox(max_results: usize) -> Self {
        Self {
            max_results,
            ..Self::default()
        }
    }

    pub fn search(query: impl Into<String>, max_results: usize) -> Self {
        Self {
            max_results,
            query: Some(query.into()),
            label_ids: Vec::new(),
        }
    }

    fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        match self.query.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            Some(q) => params.push(("q", q.to_string())),
            None if !self.label_ids.is_empty() => {
                for label in &self.label_ids {
                    params.push(("labelIds", label.clone()));
                }
            }
            None => params.push(("labelIds", LABEL_INBOX.to_string())),
        }
        params
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessage {
    id: String,
    #[serde(default)]
    thread_id: String,
    #[serde(default)]
    label_ids: Vec<String>,
    #[serde(default)]
    snippet: String,
    raw: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SentMessage {
    id: String,
    #[serde(default)]
    thread_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LabelsResponse {
    #[serde(default)]
    labels: Vec<Label>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Profile {
    email_address: String,
}

pub struct GmailClient {
    http: reqwest::Client,
    base_url: String,
    token: Mutex<StoredToken>,
    auth: Option<Authenticator>,
    token_path: String,
    retry: RetryPolicy,
}

impl GmailClient {
    /// Loads (refreshing or authorizing as needed) credentials and returns a
    /// client that keeps them fresh for its lifetime.
    pub async fn connect(auth: Authenticator, base_url: Option<&str>) -> Result<Self> {
        let token = auth.load_credentials().await?;
        let token_path = auth.store().path().display().to_string();
        Ok(Self {
            http: reqwest::Client::new(),
            base_url: normalize_base(base_url.unwrap_or(GMAIL_API_BASE)),
            token: Mutex::new(token),
            auth: Some(auth),
            token_path,
            retry: RetryPolicy::default(),
        })
    }

    /// A client bound to a fixed token that is never refreshed.
    pub fn with_token(base_url: &str, token: StoredToken) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: normalize_base(base_url),
            token: Mutex::new(token),
            auth: None,
            token_path: "token.json".to_string(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn list_message_refs(&self, query: &ListQuery) -> Result<Vec<MessageRef>> {
        let mut refs: Vec<MessageRef> = Vec::new();
        let mut page_token: Option<String> = None;
        while refs.len() < query.max_results {
            let mut params = query.params();
            let page_size = (query.max_results - refs.len()).min(MAX_PAGE_SIZE);
            params.push(("maxResults", page_size.to_string()));
            if let Some(token) = &page_token {
                params.push(("pageToken", token.clone()));
            }

            let page: ListResponse = self.get_json("list messages", "messages", &params).await?;
            if page.messages.is_empty() {
                break;
            }
            refs.extend(page.messages);
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        refs.truncate(query.max_results);
        Ok(refs)
    }

    /// Messages that fail to load are skipped, except when the failure means
    /// no later fetch can succeed either.
    pub async fn list_emails(&self, query: &ListQuery) -> Result<Vec<Email>> {
        let refs = self.list_message_refs(query).await?;
        debug!(count = refs.len(), "fetching message details");
        let mut emails = Vec::with_capacity(refs.len());
        for msg in refs {
            match self.get_email(&msg.id).await {
                Ok(email) => emails.push(email),
                Err(err @ (GmailError::PermissionDenied { .. } | GmailError::Auth(_))) => {
                    return Err(err);
                }
                Err(err) => warn!(id = %msg.id, error = %err, "skipping message that failed to load"),
            }
        }
        Ok(emails)
    }

    pub async fn get_email(&self, id: &str) -> Result<Email> {
        let path = message_path(id, "")?;
        let message: RawMessage = self
            .get_json("get message", &path, &[("format", "raw".to_string())])
            .await
            .map_err(|err| or_not_found(err, id))?;
        email_from_raw(message)
    }

    /// Resolves reply/forward context, renders and sends. Sending is not
    /// retried.
    pub async fn send_email(&self, email: &OutgoingEmail) -> Result<SendReceipt> {
        email.validate()?;
        let thread = self.thread_context(email).await?;
        let from = match email.from.as_deref().map(str::trim).filter(|f| !f.is_empty()) {
            Some(from) => from.to_string(),
            None => self.profile_address().await?,
        };
        let (attachments, skipped) = load_attachments(&email.attachments)?;
        let raw = build_raw_message(email, &from, &thread, &attachments)?;
        let mut receipt = self.send_raw(&raw, thread.thread_id.as_deref()).await?;
        receipt.skipped_attachments = skipped;
        info!(id = %receipt.id, "message sent");
        Ok(receipt)
    }

    pub async fn thread_context(&self, email: &OutgoingEmail) -> Result<ThreadContext> {
        if let Some(id) = &email.reply_to_id {
            let original = self.get_email(id).await?;
            return Ok(build_reply(&original, &email.subject));
        }
        if let Some(id) = &email.forward_id {
            let original = self.get_email(id).await?;
            return Ok(build_forward(&original, &email.subject));
        }
        Ok(email.fresh_context())
    }

    pub async fn send_raw(&self, raw: &[u8], thread_id: Option<&str>) -> Result<SendReceipt> {
        let mut body = json!({ "raw": URL_SAFE.encode(raw) });
        if let Some(thread_id) = thread_id {
            body["threadId"] = json!(thread_id);
        }
        let response = self
            .request(Method::POST, "messages/send", &[], Some(&body))
            .await?;
        let sent: SentMessage = response.json().await?;
        Ok(SendReceipt {
            id: sent.id,
            thread_id: sent.thread_id,
            skipped_attachments: Vec::new(),
        })
    }

    pub async fn modify_labels(&self, id: &str, add: &[&str], remove: &[&str]) -> Result<()> {
        let path = message_path(id, "/modify")?;
        let body = json!({ "addLabelIds": add, "removeLabelIds": remove });
        let _: Value = self
            .post_json("modify labels", &path, Some(&body))
            .await
            .map_err(|err| or_not_found(err, id))?;
        Ok(())
    }

    pub async fn trash_email(&self, id: &str) -> Result<()> {
        let path = message_path(id, "/trash")?;
        let _: Value = self
            .post_json("trash message", &path, None)
            .await
            .map_err(|err| or_not_found(err, id))?;
        Ok(())
    }

    pub async fn list_labels(&self) -> Result<Vec<Label>> {
        let response: LabelsResponse = self.get_json("list labels", "labels", &[]).await?;
        Ok(response.labels)
    }

    pub async fn profile_address(&self) -> Result<String> {
        let profile: Profile = self.get_json("get profile", "profile", &[]).await?;
        Ok(profile.email_address)
    }

    async fn access_token(&self) -> Result<String> {
        let mut token = self.token.lock().await;
        if token.is_expired() {
            if let Some(auth) = &self.auth {
                debug!("access token expired, renewing");
                let fresh = auth.renew(&token).await?;
                *token = fresh;
            }
        }
        Ok(token.token.clone())
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        self.retry
            .run(operation, move || async move {
                let response = self.request(Method::GET, path, query, None).await?;
                Ok(response.json::<T>().await?)
            })
            .await
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T> {
        self.retry
            .run(operation, move || async move {
                let response = self.request(Method::POST, path, &[], body).await?;
                Ok(response.json::<T>().await?)
            })
            .await
    }

    /// A 401 gets one renewal and replay when the token can be refreshed.
    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Response> {
        let token = self.access_token().await?;
        let response = self.send(method.clone(), path, query, body, &token).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            if let Some(fresh) = self.renew_rejected(&token).await? {
                let replayed = self.send(method, path, query, body, &fresh).await?;
                return self.checked(replayed).await;
            }
        }
        self.checked(response).await
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
        token: &str,
    ) -> Result<Response> {
        let url = format!("{}/{}", self.base_url, path);
        debug!(%method, %url, "gmail request");
        let mut request = self.http.request(method, &url).bearer_auth(token);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }

    async fn checked(&self, response: Response) -> Result<Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        Err(self.error_from(response).await)
    }

    /// Another request may already have replaced the rejected token.
    async fn renew_rejected(&self, rejected: &str) -> Result<Option<String>> {
        let Some(auth) = &self.auth else {
            return Ok(None);
        };
        let mut token = self.token.lock().await;
        if token.token != rejected {
            return Ok(Some(token.token.clone()));
        }
        if token.refresh_token.is_none() {
            return Ok(None);
        }
        debug!("access token rejected, renewing");
        let fresh = auth.renew(&token).await?;
        *token = fresh;
        Ok(Some(token.token.clone()))
    }

    async fn error_from(&self, response: Response) -> GmailError {
        let status = response.status();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let text = response.text().await.unwrap_or_default();
        let message = google_error_message(&text)
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());

        if status == StatusCode::FORBIDDEN {
            return GmailError::PermissionDenied {
                message,
                token_path: self.token_path.clone(),
            };
        }
        GmailError::Api {
            status: status.as_u16(),
            message,
            retry_after,
        }
    }
}

fn normalize_base(base_url: &str) -> String {
    base_url.trim().trim_end_matches('/').to_string()
}

/// Gmail ids are short alphanumeric strings; anything else cannot exist.
fn message_path(id: &str, suffix: &str) -> Result<String> {
    let id = id.trim();
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(GmailError::NotFound(id.to_string()));
    }
    Ok(format!("messages/{id}{suffix}"))
}

fn or_not_found(err: GmailError, id: &str) -> GmailError {
    match err {
        GmailError::Api { status: 404, .. } => GmailError::NotFound(id.to_string()),
        other => other,
    }
}

/// `error.message` from Google's JSON error envelope.
fn google_error_message(text: &str) -> Option<String> {
    let value: Value = serde_json::from_str(text).ok()?;
    value
        .get("error")?
        .get("message")?
        .as_str()
        .map(|message| message.to_string())
}

/// Padding on the `raw` field is optional.
pub fn decode_raw(raw: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(raw.trim().trim_end_matches('='))
        .map_err(|e| GmailError::Decode(format!("raw message: {e}")))
}

fn email_from_raw(message: RawMessage) -> Result<Email> {
    let bytes = decode_raw(&message.raw)?;
    let parsed = parse_email(&bytes, DEFAULT_TEXT_WIDTH)
        .map_err(|e| GmailError::Decode(format!("message {}: {e}", message.id)))?;
    Ok(Email {
        id: message.id,
        thread_id: message.thread_id,
        sender: parsed.sender,
        to: parsed.to,
        cc: parsed.cc,
        subject: parsed.subject,
        date: parsed.date,
        snippet: html_escape::decode_html_entities(&message.snippet).into_owned(),
        body: parsed.body,
        message_id: parsed.message_id,
        references: parsed.references,
        label_ids: message.label_ids,
        attachments: parsed.attachments,
    })
}
