use std::time::Duration;

pub type Result<T> = std::result::Result<T, GmailError>;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Credentials file not found at {0}")]
    MissingCredentials(String),

    #[error("invalid client secrets: {0}")]
    InvalidSecrets(String),

    /// The token endpoint refused the grant (expired or revoked refresh
    /// token, bad code). A stored token in this state is unusable.
    #[error("OAuth error: {error}: {description}")]
    OAuth { error: String, description: String },

    #[error("token endpoint returned {status}")]
    Server { status: u16 },

    #[error("authorization not completed: {0}")]
    Flow(String),
}

#[derive(Debug, thiserror::Error)]
pub enum GmailError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(
        "Permission denied ({message}). You may need to delete {token_path} to re-authorize with new scopes."
    )]
    PermissionDenied { message: String, token_path: String },

    #[error("Email {0} not found.")]
    NotFound(String),

    #[error("Gmail API error {status}: {message}")]
    Api {
        status: u16,
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("invalid message payload: {0}")]
    Decode(String),

    #[error("could not build message: {0}")]
    Compose(String),
}

impl GmailError {
    /// Transport failures, throttling and server errors are worth another try.
    pub fn is_transient(&self) -> bool {
        match self {
            GmailError::Http(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            GmailError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            GmailError::Api { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}
