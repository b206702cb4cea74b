//! Upstream error classification.
//!
//! Decides whether a failed generator call is a rate-limit / overload
//! condition (retry later, do not fail the entity) or a terminal error.
//! Provider knowledge lives in the data tables below, not in code paths.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::UpstreamError;

/// Status codes upstream providers use for throttling or capacity problems.
pub const RATE_LIMIT_STATUS_CODES: &[u16] = &[429, 503, 529];

/// Phrases that mean "rate limited / overloaded" for every provider.
const GENERIC_PATTERNS: &[&str] = &[
    "rate limit",
    "rate-limit",
    "ratelimit",
    "too many requests",
    "overloaded",
    "quota exceeded",
    "throttl",
];

/// Provider-specific phrases, matched case-insensitively as substrings.
const PROVIDER_PATTERNS: &[(&str, &[&str])] = &[
    (
        "openai",
        &[
            "rate_limit_exceeded",
            "exceeded your current quota",
            "requests per min",
            "tokens per min",
        ],
    ),
    ("anthropic", &["overloaded_error", "rate_limit_error"]),
    (
        "google",
        &["resource_exhausted", "resource has been exhausted", "quota"],
    ),
    ("mistral", &["capacity exceeded", "service tier capacity"]),
];

/// Largest retry hint taken at face value, in seconds. Longer hints are capped.
pub const MAX_RETRY_AFTER_SECS: u64 = 86_400;

static RETRY_PHRASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:retry|try again)\D{0,24}?(\d+(?:\.\d+)?)(?:\s*(milliseconds?|ms|seconds?|secs?|s|minutes?|mins?|m)\b)?",
    )
    .expect("retry phrase regex is valid")
});

/// Outcome of classifying an upstream failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Throttled or overloaded; retry after the (optional) hinted number of seconds.
    RateLimited { retry_after: Option<u64> },
    /// Anything else. Retrying will not help.
    Terminal,
}

impl ErrorClass {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ErrorClass::RateLimited { .. })
    }
}

/// Table-driven rate-limit classifier.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    status_codes: Vec<u16>,
    generic: Vec<String>,
    providers: HashMap<String, Vec<String>>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        let providers = PROVIDER_PATTERNS
            .iter()
            .map(|(provider, patterns)| {
                (
                    provider.to_string(),
                    patterns.iter().map(|p| p.to_lowercase()).collect(),
                )
            })
            .collect();

        Self {
            status_codes: RATE_LIMIT_STATUS_CODES.to_vec(),
            generic: GENERIC_PATTERNS.iter().map(|p| p.to_lowercase()).collect(),
            providers,
        }
    }
}

impl ErrorClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add patterns for a provider (new providers need no code change).
    pub fn with_patterns<I, S>(mut self, provider: impl Into<String>, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entry = self
            .providers
            .entry(provider.into().to_lowercase())
            .or_default();
        entry.extend(patterns.into_iter().map(|p| p.as_ref().to_lowercase()));
        self
    }

    pub fn is_rate_limit_error(&self, err: &UpstreamError, provider: &str) -> bool {
        if let Some(status) = err.status {
            if self.status_codes.contains(&status) {
                return true;
            }
        }

        let message = err.message.to_lowercase();
        if self.generic.iter().any(|p| message.contains(p.as_str())) {
            return true;
        }

        self.providers
            .get(&provider.to_lowercase())
            .is_some_and(|patterns| patterns.iter().any(|p| message.contains(p.as_str())))
    }

    pub fn classify(&self, err: &UpstreamError, provider: &str) -> ErrorClass {
        if self.is_rate_limit_error(err, provider) {
            ErrorClass::RateLimited {
                retry_after: extract_retry_after(err),
            }
        } else {
            ErrorClass::Terminal
        }
    }
}

/// Suggested wait in whole seconds, if the upstream told us one.
///
/// The explicit header-like field wins; otherwise a "retry in N seconds"
/// phrase in the message is used. Fractions round up and the result never
/// exceeds [`MAX_RETRY_AFTER_SECS`].
pub fn extract_retry_after(err: &UpstreamError) -> Option<u64> {
    parse_retry_after(err).map(|secs| secs.min(MAX_RETRY_AFTER_SECS))
}

fn parse_retry_after(err: &UpstreamError) -> Option<u64> {
    if let Some(value) = err.retry_after.as_deref() {
        let value = value.trim();
        if let Ok(secs) = value.parse::<u64>() {
            return Some(secs);
        }
        // Digits too long for u64 are still a (very long) wait.
        if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
            return Some(u64::MAX);
        }
    }

    let caps = RETRY_PHRASE.captures(&err.message)?;
    let amount: f64 = caps.get(1)?.as_str().parse().ok()?;
    let unit = caps
        .get(2)
        .map(|m| m.as_str().to_lowercase())
        .unwrap_or_default();

    let seconds = if unit == "ms" || unit.starts_with("millisecond") {
        amount / 1000.0
    } else if unit == "m" || unit.starts_with("min") {
        amount * 60.0
    } else {
        amount
    };

    // Float to int casts saturate, so absurd phrases land on u64::MAX.
    Some(seconds.ceil() as u64)
}
