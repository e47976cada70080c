use thiserror::Error;

/// Failure of a generate/chat call.
///
/// Produced by [`super::transport::OllamaTransport`] and passed through the reply
/// stream unchanged.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid host '{host}': {source}")]
    InvalidHost {
        host: String,
        #[source]
        source: url::ParseError,
    },

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned {status}: {body}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("malformed response body from {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("stream from {url} interrupted: {source}")]
    Stream {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// In-band `{"error": "..."}` object sent by the server.
    #[error("server reported an error: {0}")]
    Remote(String),

    #[error("response from {route} has no content field")]
    MissingContent {
        route: &'static str,
    },
}

impl TransportError {
    /// HTTP status when the server answered with a non-2xx code.
    pub fn status(&self) -> Option<reqwest::StatusCode> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}
