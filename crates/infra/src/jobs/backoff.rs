//! Retry delay computation.
//!
//! Rate-limit failures wait for the shared window instead of an
//! attempt-count curve; everything else backs off exponentially.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StageError;
use crate::rate_limit::RateLimitStore;

use super::types::JobType;

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// base * 2^(attempt - 1)
    #[default]
    Exponential,
    /// base * attempt
    Linear,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
    /// Jitter factor (0.0-1.0), applied deterministically per attempt.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(2_000),
            max_delay: Duration::from_secs(300),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    pub fn exponential(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = 0.0;
        self
    }

    /// Delay before retrying after `attempt` failed attempts (1-indexed).
    /// Never exceeds `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let delay_ms = match self.strategy {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Exponential => {
                let exp = 2_f64.powi(attempt.saturating_sub(1).min(62) as i32);
                (base_ms * exp).min(max_ms)
            }
            BackoffStrategy::Linear => (base_ms * attempt as f64).min(max_ms),
        };

        let jitter_range = delay_ms * self.jitter.clamp(0.0, 1.0);
        let jitter = if jitter_range > 0.0 {
            let pseudo_random = ((attempt as f64 * 17.0) % 100.0) / 100.0;
            jitter_range * (pseudo_random - 0.5) * 2.0
        } else {
            0.0
        };

        Duration::from_millis((delay_ms + jitter).clamp(0.0, max_ms.max(base_ms)) as u64)
    }
}

/// Computes the wait before a failed job's next attempt.
///
/// Only reads rate-limit state; never writes it.
#[derive(Debug, Clone)]
pub struct BackoffScheduler {
    default_policy: RetryPolicy,
    overrides: HashMap<JobType, RetryPolicy>,
    floor: Duration,
    rate_limits: RateLimitStore,
}

impl BackoffScheduler {
    pub fn new(policy: RetryPolicy, floor: Duration, rate_limits: RateLimitStore) -> Self {
        Self {
            default_policy: policy,
            overrides: HashMap::new(),
            floor,
            rate_limits,
        }
    }

    pub fn with_policy(mut self, job_type: JobType, policy: RetryPolicy) -> Self {
        self.overrides.insert(job_type, policy);
        self
    }

    pub fn floor(&self) -> Duration {
        self.floor
    }

    fn policy(&self, job_type: JobType) -> &RetryPolicy {
        self.overrides.get(&job_type).unwrap_or(&self.default_policy)
    }

    pub async fn delay_for(
        &self,
        attempts_made: u32,
        job_type: JobType,
        error: &StageError,
    ) -> Duration {
        let delay = match error.rate_limit() {
            Some(cond) => {
                let window = match self
                    .rate_limits
                    .remaining(&cond.route.provider, &cond.route.model)
                    .await
                {
                    Some(remaining) => remaining,
                    None => cond
                        .retry_after_secs
                        .map(|hint| Duration::from_secs(self.rate_limits.window_secs(Some(hint))))
                        .unwrap_or(Duration::ZERO),
                };
                window.max(self.floor)
            }
            None => self.policy(job_type).delay_for_attempt(attempts_made),
        };

        debug!(
            job_type = %job_type,
            attempt = attempts_made,
            delay_ms = delay.as_millis() as u64,
            rate_limited = error.rate_limit().is_some(),
            "computed retry delay"
        );
        delay
    }
}
