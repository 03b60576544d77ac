//! Error types for the enrichment pipeline's collaborators.
//!
//! None of these reach the alert submitter: every stage maps them to its
//! documented sentinel value.

use thiserror::Error;

/// Failure of an external collaborator call (monitoring, analysis, synthesis).
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Credentials or endpoint are missing
    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Upstream answered with a non-success status
    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Response body could not be decoded
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Call exceeded its time budget
    #[error("call timed out")]
    Timeout,

    /// Response decoded but did not have the expected shape
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ProviderError {
    pub(crate) async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Self::Status { status, body }
    }
}

/// Failure of the event stream session.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The session could not be established; the consumer loop ends.
    #[error("stream connect failed: {0}")]
    Connect(String),

    /// A single poll failed; the loop carries on.
    #[error("stream poll failed: {0}")]
    Poll(String),
}

impl From<reqwest::Error> for StreamError {
    fn from(err: reqwest::Error) -> Self {
        Self::Poll(err.to_string())
    }
}

/// Failure to persist synthesized audio.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("audio write failed: {0}")]
    Io(#[from] std::io::Error),
}
