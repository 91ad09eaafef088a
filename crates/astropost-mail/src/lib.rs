use async_trait::async_trait;

use astropost_core::{Email, LABEL_INBOX, LABEL_UNREAD, Label, SendReceipt};

pub mod auth;
pub mod client;
pub mod error;
pub mod outgoing;
pub mod retry;

pub use auth::{AuthSettings, Authenticator, ClientSecrets, GMAIL_SCOPES, StoredToken, TokenStore};
pub use client::{GMAIL_API_BASE, GmailClient, ListQuery};
pub use error::{AuthError, GmailError, Result};
pub use outgoing::{OutgoingAttachment, OutgoingEmail};
pub use retry::RetryPolicy;

/// Mailbox operations the CLI, scan loop and summarizer are written against.
#[async_trait]
pub trait MailApi: Send + Sync {
    async fn list_emails(&self, query: &ListQuery) -> Result<Vec<Email>>;
    async fn get_email(&self, id: &str) -> Result<Email>;
    async fn send_email(&self, email: &OutgoingEmail) -> Result<SendReceipt>;
    async fn modify_labels(&self, id: &str, add: &[&str], remove: &[&str]) -> Result<()>;
    async fn trash_email(&self, id: &str) -> Result<()>;
    async fn list_labels(&self) -> Result<Vec<Label>>;

    async fn archive(&self, id: &str) -> Result<()> {
        self.modify_labels(id, &[], &[LABEL_INBOX]).await
    }

    async fn mark_read(&self, id: &str) -> Result<()> {
        self.modify_labels(id, &[], &[LABEL_UNREAD]).await
    }

    async fn mark_unread(&self, id: &str) -> Result<()> {
        self.modify_labels(id, &[LABEL_UNREAD], &[]).await
    }
}

#[async_trait]
impl MailApi for GmailClient {
    async fn list_emails(&self, query: &ListQuery) -> Result<Vec<Email>> {
        GmailClient::list_emails(self, query).await
    }

    async fn get_email(&self, id: &str) -> Result<Email> {
        GmailClient::get_email(self, id).await
    }

    async fn send_email(&self, email: &OutgoingEmail) -> Result<SendReceipt> {
        GmailClient::send_email(self, email).await
    }

    async fn modify_labels(&self, id: &str, add: &[&str], remove: &[&str]) -> Result<()> {
        GmailClient::modify_labels(self, id, add, remove).await
    }

    async fn trash_email(&self, id: &str) -> Result<()> {
        GmailClient::trash_email(self, id).await
    }

    async fn list_labels(&self) -> Result<Vec<Label>> {
        GmailClient::list_labels(self).await
    }
}
