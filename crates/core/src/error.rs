//! Errors raised while parsing or validating pipeline values.

use thiserror::Error;

/// A value that cannot enter the pipeline.
///
/// Deterministic: retrying the same input gives the same error, so job
/// payloads that fail here are rejected before they are queued.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Unknown enum label, oversized field, missing target.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
