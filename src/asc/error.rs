use std::time::Duration;

use reqwest::StatusCode;

/// Errors raised below the HTTP layer, before a status code exists.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request timed out")]
    Timeout,
    #[error("operation cancelled")]
    Cancelled,
    #[error("request failed: {0}")]
    Other(String),
}

impl TransportError {
    /// Whether the request can be replayed regardless of its method.
    /// A connection failure means nothing reached the server.
    pub fn is_connect(&self) -> bool {
        matches!(self, TransportError::Connect(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Connect(_) | TransportError::Timeout)
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Other(err.to_string())
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AscError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{0} is required")]
    MissingArgument(&'static str),

    #[error("invalid private key: {0}")]
    InvalidKey(String),

    #[error("failed to sign token: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),

    #[error(transparent)]
    Transport(TransportError),

    #[error("{method} {path} failed with status {status}: {message}")]
    Api {
        status: StatusCode,
        method: String,
        path: String,
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("failed to parse response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid URL {url:?}: {reason}")]
    Url { url: String, reason: String },

    #[error("refusing to follow next URL {url:?}: {reason}")]
    InvalidNextUrl { url: String, reason: String },

    #[error("pagination loop detected: {0} was returned twice")]
    RepeatedNextUrl(String),

    #[error("page {page}: {source}")]
    Page {
        page: usize,
        #[source]
        source: Box<AscError>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation cancelled")]
    Cancelled,

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl From<TransportError> for AscError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Cancelled => AscError::Cancelled,
            other => AscError::Transport(other),
        }
    }
}

impl From<reqwest::Error> for AscError {
    fn from(err: reqwest::Error) -> Self {
        AscError::from(TransportError::from(err))
    }
}

impl AscError {
    /// True for transient failures worth repeating: throttling, gateway
    /// errors and dropped connections.
    pub fn is_retryable(&self) -> bool {
        match self {
            AscError::Api { status, .. } => is_retryable_status(*status),
            AscError::Transport(err) => err.is_transient(),
            AscError::Page { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Server supplied delay hint, if the failure carried one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            AscError::Api { retry_after, .. } => *retry_after,
            AscError::Page { source, .. } => source.retry_after(),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            AscError::Api { status, .. } => Some(*status),
            AscError::Page { source, .. } => source.status(),
            _ => None,
        }
    }

    /// Wraps the error with the 1-based page it occurred on.
    pub fn at_page(self, page: usize) -> Self {
        AscError::Page {
            page,
            source: Box::new(self),
        }
    }
}

pub fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}
