use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Transport-level category of an upstream failure.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamErrorKind {
    /// The generator answered with an error response.
    Response,
    /// The call did not finish within the generation timeout.
    Timeout,
    /// Connection-level failure (DNS, TLS, reset, ...).
    Transport,
}

/// Raw failure reported by a generator call, before classification.
///
/// Carries whatever the upstream gave us: an HTTP-like status code, a
/// header-like `retry_after` field and the provider's message.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{}", self.describe())]
pub struct UpstreamError {
    pub kind: UpstreamErrorKind,
    pub status: Option<u16>,
    pub message: String,
    pub retry_after: Option<String>,
}

impl UpstreamError {
    pub fn response(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: UpstreamErrorKind::Response,
            status: Some(status),
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: UpstreamErrorKind::Timeout,
            status: None,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            kind: UpstreamErrorKind::Transport,
            status: None,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Plain failure with only a message (no status, no hint).
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            kind: UpstreamErrorKind::Response,
            status: None,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, value: impl Into<String>) -> Self {
        self.retry_after = Some(value.into());
        self
    }

    fn describe(&self) -> String {
        match (self.kind, self.status) {
            (UpstreamErrorKind::Timeout, _) => format!("generator timed out: {}", self.message),
            (UpstreamErrorKind::Transport, _) => format!("generator unreachable: {}", self.message),
            (UpstreamErrorKind::Response, Some(status)) => {
                format!("generator returned {status}: {}", self.message)
            }
            (UpstreamErrorKind::Response, None) => format!("generator failed: {}", self.message),
        }
    }
}
