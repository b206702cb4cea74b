//! Stage failure taxonomy.
//!
//! Handlers return a [`StageError`]; the worker pool is the only place that
//! turns it into a retry decision and an entity status.

use std::fmt;

use serde::{Deserialize, Serialize};

use coursegen_ai::{ModelRoute, OutputError};

use crate::content::ContentStoreError;

/// A classified rate-limit / overload condition on one model route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitCondition {
    pub route: ModelRoute,
    /// Seconds the upstream (or the rate-limit store) told us to wait.
    pub retry_after_secs: Option<u64>,
    /// True when no upstream call was made because the window was still open.
    pub suppressed: bool,
}

/// Failure category, recorded as the prefix of an entity's `generation_error`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    RateLimit,
    Infrastructure,
    MalformedOutput,
    Consistency,
    Generation,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::RateLimit => "rate_limit",
            FailureCategory::Infrastructure => "infrastructure",
            FailureCategory::MalformedOutput => "malformed_output",
            FailureCategory::Consistency => "consistency",
            FailureCategory::Generation => "generation",
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StageError {
    /// Retryable; never fails the owning entity on its own.
    #[error("rate limited on {}", .0.route)]
    RateLimited(RateLimitCondition),

    /// Store or queue unreachable; retried within the attempt budget.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),

    /// Generator output could not be recovered. Not retryable.
    #[error("malformed output: {0}")]
    MalformedOutput(String),

    /// Ownership mismatch, missing entity, missing prerequisite. Not retryable.
    #[error("consistency error: {0}")]
    Consistency(String),

    /// Terminal upstream failure (bad request, auth, timeout, ...).
    #[error("generation failed: {0}")]
    Generation(String),
}

impl StageError {
    pub fn consistency(msg: impl Into<String>) -> Self {
        Self::Consistency(msg.into())
    }

    pub fn infrastructure(msg: impl Into<String>) -> Self {
        Self::Infrastructure(msg.into())
    }

    pub fn category(&self) -> FailureCategory {
        match self {
            StageError::RateLimited(_) => FailureCategory::RateLimit,
            StageError::Infrastructure(_) => FailureCategory::Infrastructure,
            StageError::MalformedOutput(_) => FailureCategory::MalformedOutput,
            StageError::Consistency(_) => FailureCategory::Consistency,
            StageError::Generation(_) => FailureCategory::Generation,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, StageError::RateLimited(_) | StageError::Infrastructure(_))
    }

    pub fn rate_limit(&self) -> Option<&RateLimitCondition> {
        match self {
            StageError::RateLimited(cond) => Some(cond),
            _ => None,
        }
    }

    /// Message stored in `generation_error` when the owner is failed.
    pub fn entity_message(&self) -> String {
        format!("{}: {}", self.category(), self)
    }
}

impl From<ContentStoreError> for StageError {
    fn from(err: ContentStoreError) -> Self {
        match err {
            ContentStoreError::NotFound(what) => StageError::Consistency(format!("{what} not found")),
            ContentStoreError::Conflict(msg) => StageError::Consistency(msg),
            ContentStoreError::Storage(msg) => StageError::Infrastructure(msg),
        }
    }
}

impl From<OutputError> for StageError {
    fn from(err: OutputError) -> Self {
        StageError::MalformedOutput(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_rate_limits_and_infrastructure_retry() {
        let rl = StageError::RateLimited(RateLimitCondition {
            route: ModelRoute::new("openai", "gpt-4o"),
            retry_after_secs: Some(3),
            suppressed: false,
        });
        assert!(rl.is_retryable());
        assert!(StageError::infrastructure("db down").is_retryable());
        assert!(!StageError::MalformedOutput("x".into()).is_retryable());
        assert!(!StageError::consistency("x").is_retryable());
        assert!(!StageError::Generation("x".into()).is_retryable());
    }

    #[test]
    fn entity_message_is_prefixed_with_category() {
        let err = StageError::MalformedOutput("unbalanced".into());
        assert_eq!(
            err.entity_message(),
            "malformed_output: malformed output: unbalanced"
        );
    }

    #[test]
    fn missing_entities_are_consistency_errors() {
        let err: StageError = ContentStoreError::NotFound("article 1".into()).into();
        assert_eq!(err.category(), FailureCategory::Consistency);

        let err: StageError = ContentStoreError::Storage("pool closed".into()).into();
        assert_eq!(err.category(), FailureCategory::Infrastructure);
    }
}
