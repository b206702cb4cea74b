//! Runtime configuration read from the environment.

use std::str::FromStr;
use std::time::Duration;

use crate::jobs::{RetentionPolicy, RetryPolicy};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{key}={value:?} is invalid: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Upstream model endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorConfig {
    /// OpenAI-compatible base URL; unset means no HTTP generator.
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub provider: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Postgres for jobs, content and rate-limit audit; in-memory when unset.
    pub database_url: Option<String>,
    /// Redis for rate-limit windows; in-memory when unset.
    pub redis_url: Option<String>,
    pub generator: GeneratorConfig,
    pub worker_concurrency: usize,
    pub poll_interval: Duration,
    pub job_max_attempts: u32,
    pub rate_limit_default_timeout: Duration,
    /// Longest window any upstream hint may open.
    pub rate_limit_max_window: Duration,
    pub rate_limit_floor: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub generation_timeout: Duration,
    /// How long a claimed job may stay active before it is handed out again.
    pub job_lease: Duration,
    pub retention: RetentionPolicy,
    pub maintenance_interval: Duration,
    pub http_bind: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            redis_url: None,
            generator: GeneratorConfig {
                base_url: None,
                api_key: None,
                provider: "openai".to_string(),
                model: "gpt-4o-mini".to_string(),
            },
            worker_concurrency: 1,
            poll_interval: Duration::from_millis(500),
            job_max_attempts: 5,
            rate_limit_default_timeout: Duration::from_secs(60),
            rate_limit_max_window: Duration::from_secs(3_600),
            rate_limit_floor: Duration::from_secs(5),
            backoff_base: Duration::from_millis(2_000),
            backoff_max: Duration::from_millis(300_000),
            generation_timeout: Duration::from_secs(120),
            job_lease: Duration::from_secs(600),
            retention: RetentionPolicy::default(),
            maintenance_interval: Duration::from_secs(60),
            http_bind: "0.0.0.0:8080".to_string(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset or blank keys keep their default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let d = Self::default();

        let secs = |key: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            Ok(Duration::from_secs(parse(&get, key, default.as_secs())?))
        };
        let millis = |key: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            Ok(Duration::from_millis(parse(&get, key, default.as_millis() as u64)?))
        };

        let config = Self {
            database_url: get("DATABASE_URL"),
            redis_url: get("REDIS_URL"),
            generator: GeneratorConfig {
                base_url: get("GENERATOR_BASE_URL"),
                api_key: get("GENERATOR_API_KEY"),
                provider: get("GENERATOR_PROVIDER").unwrap_or(d.generator.provider),
                model: get("GENERATOR_MODEL").unwrap_or(d.generator.model),
            },
            worker_concurrency: parse(&get, "WORKER_CONCURRENCY", d.worker_concurrency)?,
            poll_interval: millis("WORKER_POLL_INTERVAL_MS", d.poll_interval)?,
            job_max_attempts: parse(&get, "JOB_MAX_ATTEMPTS", d.job_max_attempts)?,
            rate_limit_default_timeout: secs(
                "RATE_LIMIT_DEFAULT_TIMEOUT_SECS",
                d.rate_limit_default_timeout,
            )?,
            rate_limit_max_window: secs("RATE_LIMIT_MAX_WINDOW_SECS", d.rate_limit_max_window)?,
            rate_limit_floor: secs("RATE_LIMIT_FLOOR_SECS", d.rate_limit_floor)?,
            backoff_base: millis("BACKOFF_BASE_MS", d.backoff_base)?,
            backoff_max: millis("BACKOFF_MAX_MS", d.backoff_max)?,
            generation_timeout: secs("GENERATION_TIMEOUT_SECS", d.generation_timeout)?,
            job_lease: secs("JOB_LEASE_SECS", d.job_lease)?,
            retention: RetentionPolicy {
                keep_completed: parse(&get, "JOB_RETAIN_COMPLETED", d.retention.keep_completed)?,
                keep_failed: parse(&get, "JOB_RETAIN_FAILED", d.retention.keep_failed)?,
                max_age: Duration::from_secs(
                    parse(&get, "JOB_RETAIN_HOURS", d.retention.max_age.as_secs() / 3600)?
                        .saturating_mul(3600),
                ),
            },
            maintenance_interval: secs("MAINTENANCE_INTERVAL_SECS", d.maintenance_interval)?,
            http_bind: get("HTTP_BIND").unwrap_or(d.http_bind),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let positive = |key: &'static str, value: u64| {
            if value == 0 {
                Err(ConfigError::Invalid {
                    key,
                    value: "0".to_string(),
                    reason: "must be greater than zero".to_string(),
                })
            } else {
                Ok(())
            }
        };
        positive("WORKER_CONCURRENCY", self.worker_concurrency as u64)?;
        positive("JOB_MAX_ATTEMPTS", u64::from(self.job_max_attempts))?;
        positive("GENERATION_TIMEOUT_SECS", self.generation_timeout.as_secs())?;
        positive("RATE_LIMIT_DEFAULT_TIMEOUT_SECS", self.rate_limit_default_timeout.as_secs())?;

        if self.rate_limit_max_window < self.rate_limit_default_timeout {
            return Err(ConfigError::Invalid {
                key: "RATE_LIMIT_MAX_WINDOW_SECS",
                value: self.rate_limit_max_window.as_secs().to_string(),
                reason: "must not be below RATE_LIMIT_DEFAULT_TIMEOUT_SECS".to_string(),
            });
        }
        // A live handler must never lose its job to the stalled-job sweep.
        if self.job_lease <= self.generation_timeout {
            return Err(ConfigError::Invalid {
                key: "JOB_LEASE_SECS",
                value: self.job_lease.as_secs().to_string(),
                reason: "must exceed GENERATION_TIMEOUT_SECS".to_string(),
            });
        }
        if self.backoff_max < self.backoff_base {
            return Err(ConfigError::Invalid {
                key: "BACKOFF_MAX_MS",
                value: self.backoff_max.as_millis().to_string(),
                reason: "must not be below BACKOFF_BASE_MS".to_string(),
            });
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(self.backoff_base, self.backoff_max)
    }
}

fn parse<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<RuntimeConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RuntimeConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg, RuntimeConfig::default());
        assert_eq!(cfg.worker_concurrency, 1);
        assert_eq!(cfg.job_max_attempts, 5);
        assert_eq!(cfg.retention.max_age, Duration::from_secs(72 * 3600));
    }

    #[test]
    fn overrides_are_parsed_with_units() {
        let cfg = config(&[
            ("DATABASE_URL", "postgres://localhost/coursegen"),
            ("WORKER_CONCURRENCY", "4"),
            ("WORKER_POLL_INTERVAL_MS", "50"),
            ("RATE_LIMIT_DEFAULT_TIMEOUT_SECS", "90"),
            ("JOB_RETAIN_HOURS", "1"),
            ("GENERATOR_MODEL", "claude-sonnet"),
            ("REDIS_URL", "   "),
        ])
        .unwrap();

        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/coursegen"));
        assert_eq!(cfg.redis_url, None);
        assert_eq!(cfg.worker_concurrency, 4);
        assert_eq!(cfg.poll_interval, Duration::from_millis(50));
        assert_eq!(cfg.rate_limit_default_timeout, Duration::from_secs(90));
        assert_eq!(cfg.retention.max_age, Duration::from_secs(3600));
        assert_eq!(cfg.generator.model, "claude-sonnet");
        assert_eq!(cfg.generator.provider, "openai");
    }

    #[test]
    fn bad_values_name_the_key() {
        let err = config(&[("JOB_MAX_ATTEMPTS", "many")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "JOB_MAX_ATTEMPTS", .. }));

        let err = config(&[("WORKER_CONCURRENCY", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "WORKER_CONCURRENCY", .. }));

        let err = config(&[("BACKOFF_BASE_MS", "5000"), ("BACKOFF_MAX_MS", "100")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "BACKOFF_MAX_MS", .. }));
    }

    #[test]
    fn windows_and_leases_are_bounded_by_their_peers() {
        let cfg = config(&[("RATE_LIMIT_MAX_WINDOW_SECS", "120"), ("JOB_LEASE_SECS", "900")]).unwrap();
        assert_eq!(cfg.rate_limit_max_window, Duration::from_secs(120));
        assert_eq!(cfg.job_lease, Duration::from_secs(900));

        let err = config(&[("RATE_LIMIT_MAX_WINDOW_SECS", "30")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "RATE_LIMIT_MAX_WINDOW_SECS", .. }));

        let err = config(&[("JOB_LEASE_SECS", "120")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "JOB_LEASE_SECS", .. }));

        let cfg = config(&[("JOB_RETAIN_HOURS", "18446744073709551615")]).unwrap();
        assert_eq!(cfg.retention.max_age, Duration::from_secs(u64::MAX));
    }
}
