use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use coursegen_core::SharedClock;

use super::audit::RateLimitAuditStore;
use super::ephemeral::EphemeralStore;

pub const DEFAULT_KEY_PREFIX: &str = "coursegen:ratelimit";

/// Longest window a single hint may open unless configured otherwise.
pub const DEFAULT_MAX_WINDOW: Duration = Duration::from_secs(3_600);

/// Result of a rate-limit check for one (provider, model) route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitInfo {
    pub provider: String,
    pub model: String,
    pub is_rate_limited: bool,
    /// Whole seconds left in the window, rounded up.
    pub seconds_remaining: Option<u64>,
    pub timeout_until: Option<DateTime<Utc>>,
}

impl RateLimitInfo {
    fn open(provider: &str, model: &str) -> Self {
        Self {
            provider: provider.to_string(),
            model: model.to_string(),
            is_rate_limited: false,
            seconds_remaining: None,
            timeout_until: None,
        }
    }
}

/// Cross-worker rate-limit coordinator.
///
/// The ephemeral store holds one key per route whose value is the RFC 3339
/// deadline and whose native TTL matches it. Store failures never block
/// generation: reads fail open, writes are logged and dropped.
#[derive(Clone)]
pub struct RateLimitStore {
    ephemeral: Arc<dyn EphemeralStore>,
    audit: Arc<dyn RateLimitAuditStore>,
    clock: SharedClock,
    default_timeout: Duration,
    max_window: Duration,
    key_prefix: String,
}

impl std::fmt::Debug for RateLimitStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitStore")
            .field("default_timeout", &self.default_timeout)
            .field("max_window", &self.max_window)
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}

impl RateLimitStore {
    pub fn new(
        ephemeral: Arc<dyn EphemeralStore>,
        audit: Arc<dyn RateLimitAuditStore>,
        clock: SharedClock,
        default_timeout: Duration,
    ) -> Self {
        Self {
            ephemeral,
            audit,
            clock,
            default_timeout,
            max_window: DEFAULT_MAX_WINDOW.max(default_timeout),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }

    /// Cap on any window, hinted or default.
    pub fn with_max_window(mut self, max_window: Duration) -> Self {
        self.max_window = max_window;
        self
    }

    pub fn max_window(&self) -> Duration {
        self.max_window
    }

    /// Seconds a window opened with this hint lasts: at least one, at most `max_window`.
    pub fn window_secs(&self, retry_after_secs: Option<u64>) -> u64 {
        retry_after_secs
            .unwrap_or(self.default_timeout.as_secs())
            .min(self.max_window.as_secs())
            .max(1)
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    fn key(&self, provider: &str, model: &str) -> String {
        format!("{}:{provider}:{model}", self.key_prefix)
    }

    fn route_from_key<'a>(&self, key: &'a str) -> Option<(&'a str, &'a str)> {
        let rest = key.strip_prefix(&self.key_prefix)?.strip_prefix(':')?;
        rest.split_once(':')
    }

    /// Stored deadline and whether it is still ahead; `None` if absent or unreadable.
    async fn read_deadline(&self, key: &str) -> Option<(DateTime<Utc>, bool)> {
        let raw = match self.ephemeral.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key, error = %e, "rate-limit check failed, allowing call");
                return None;
            }
        };

        match DateTime::parse_from_rfc3339(raw.trim()) {
            Ok(deadline) => {
                let deadline = deadline.with_timezone(&Utc);
                Some((deadline, deadline > self.clock.now()))
            }
            Err(e) => {
                warn!(key, value = %raw, error = %e, "unparseable rate-limit deadline");
                None
            }
        }
    }

    /// Is calling this route currently suppressed?
    ///
    /// An elapsed deadline counts as absent: the key is removed and the audit
    /// record reconciled to inactive.
    pub async fn check(&self, provider: &str, model: &str) -> RateLimitInfo {
        let key = self.key(provider, model);
        let Some((deadline, live)) = self.read_deadline(&key).await else {
            return RateLimitInfo::open(provider, model);
        };

        if !live {
            debug!(provider, model, "rate-limit window elapsed");
            if let Err(e) = self.ephemeral.delete(&key).await {
                warn!(provider, model, error = %e, "failed to delete elapsed rate-limit key");
            }
            if let Err(e) = self
                .audit
                .mark_inactive(provider, model, self.clock.now())
                .await
            {
                warn!(provider, model, error = %e, "failed to reconcile rate-limit record");
            }
            return RateLimitInfo::open(provider, model);
        }

        let remaining_ms = (deadline - self.clock.now()).num_milliseconds().max(0) as u64;
        RateLimitInfo {
            provider: provider.to_string(),
            model: model.to_string(),
            is_rate_limited: true,
            seconds_remaining: Some(remaining_ms.div_ceil(1000)),
            timeout_until: Some(deadline),
        }
    }

    /// Remaining window without any cleanup side effects.
    pub async fn remaining(&self, provider: &str, model: &str) -> Option<Duration> {
        let (deadline, live) = self.read_deadline(&self.key(provider, model)).await?;
        if !live {
            return None;
        }
        (deadline - self.clock.now()).to_std().ok()
    }

    /// Open (or extend) a window on a route.
    ///
    /// The upstream hint wins whenever present; `default_timeout` applies only
    /// when there is none. Either way the window is capped at `max_window`.
    pub async fn set(
        &self,
        provider: &str,
        model: &str,
        retry_after_secs: Option<u64>,
    ) -> DateTime<Utc> {
        let ttl_secs = self.window_secs(retry_after_secs);
        if retry_after_secs.is_some_and(|hint| hint > ttl_secs) {
            warn!(provider, model, hint = retry_after_secs, ttl_secs, "retry hint capped");
        }
        let now = self.clock.now();
        let timeout_until = i64::try_from(ttl_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let key = self.key(provider, model);

        if let Err(e) = self
            .ephemeral
            .set_ex(&key, &timeout_until.to_rfc3339(), ttl_secs)
            .await
        {
            warn!(provider, model, error = %e, "failed to write rate-limit window");
        }

        match self
            .audit
            .record_hit(provider, model, timeout_until, now)
            .await
        {
            Ok(record) => info!(
                provider,
                model,
                ttl_secs,
                hit_count = record.hit_count,
                "rate limit recorded"
            ),
            Err(e) => warn!(provider, model, error = %e, "failed to record rate-limit hit"),
        }

        timeout_until
    }

    pub async fn clear(&self, provider: &str, model: &str) {
        if let Err(e) = self.ephemeral.delete(&self.key(provider, model)).await {
            warn!(provider, model, error = %e, "failed to clear rate-limit window");
        }
        if let Err(e) = self
            .audit
            .mark_inactive(provider, model, self.clock.now())
            .await
        {
            warn!(provider, model, error = %e, "failed to mark rate-limit record cleared");
        }
        info!(provider, model, "rate limit cleared");
    }

    /// Every route with an open window, resolved through [`Self::check`].
    pub async fn list_active(&self) -> Vec<RateLimitInfo> {
        let prefix = format!("{}:", self.key_prefix);
        let keys = match self.ephemeral.keys(&prefix).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "failed to enumerate rate-limit keys");
                return Vec::new();
            }
        };

        let mut active = Vec::new();
        for key in keys {
            let Some((provider, model)) = self.route_from_key(&key) else {
                continue;
            };
            let info = self.check(provider, model).await;
            if info.is_rate_limited {
                active.push(info);
            }
        }
        active
    }

    /// Mark audit records inactive when their ephemeral key is gone.
    ///
    /// Returns how many records were reconciled.
    pub async fn sweep(&self) -> usize {
        let records = match self.audit.list(true).await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "rate-limit sweep could not list records");
                return 0;
            }
        };

        let mut swept = 0;
        for record in records {
            let key = self.key(&record.provider, &record.model);
            let live = match self.ephemeral.get(&key).await {
                Ok(Some(_)) => self.check(&record.provider, &record.model).await.is_rate_limited,
                Ok(None) => false,
                // Leave the record alone; the window may still be open.
                Err(_) => continue,
            };
            if live {
                continue;
            }
            match self
                .audit
                .mark_inactive(&record.provider, &record.model, self.clock.now())
                .await
            {
                Ok(()) => swept += 1,
                Err(e) => {
                    warn!(provider = %record.provider, model = %record.model, error = %e, "sweep failed")
                }
            }
        }
        if swept > 0 {
            debug!(swept, "rate-limit records reconciled");
        }
        swept
    }
}
