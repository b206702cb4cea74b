//! Durable rate-limit history, kept for observability only.
//!
//! Nothing reads these records to decide whether a call is allowed; the
//! ephemeral store is authoritative.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRecord {
    pub provider: String,
    pub model: String,
    pub is_active: bool,
    pub timeout_until: DateTime<Utc>,
    /// Monotonic count of classified rate-limit hits.
    pub hit_count: u64,
    pub first_hit_at: DateTime<Utc>,
    pub last_hit_at: DateTime<Utc>,
    pub cleared_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuditStoreError {
    #[error("audit storage error: {0}")]
    Storage(String),
}

#[async_trait]
pub trait RateLimitAuditStore: Send + Sync + 'static {
    /// Upsert: increments `hit_count`, refreshes `timeout_until`/`last_hit_at`,
    /// sets `first_hit_at` on insert and reactivates the record.
    async fn record_hit(
        &self,
        provider: &str,
        model: &str,
        timeout_until: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<RateLimitRecord, AuditStoreError>;

    /// No-op when the record is missing or already inactive.
    async fn mark_inactive(
        &self,
        provider: &str,
        model: &str,
        at: DateTime<Utc>,
    ) -> Result<(), AuditStoreError>;

    async fn get(&self, provider: &str, model: &str)
    -> Result<Option<RateLimitRecord>, AuditStoreError>;

    async fn list(&self, active_only: bool) -> Result<Vec<RateLimitRecord>, AuditStoreError>;
}

/// In-memory audit store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryRateLimitAuditStore {
    records: RwLock<HashMap<(String, String), RateLimitRecord>>,
}

impl InMemoryRateLimitAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl RateLimitAuditStore for InMemoryRateLimitAuditStore {
    async fn record_hit(
        &self,
        provider: &str,
        model: &str,
        timeout_until: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<RateLimitRecord, AuditStoreError> {
        let mut records = self.records.write().unwrap();
        let record = records
            .entry((provider.to_string(), model.to_string()))
            .and_modify(|r| {
                r.is_active = true;
                r.timeout_until = timeout_until;
                r.hit_count += 1;
                r.last_hit_at = at;
                r.cleared_at = None;
            })
            .or_insert_with(|| RateLimitRecord {
                provider: provider.to_string(),
                model: model.to_string(),
                is_active: true,
                timeout_until,
                hit_count: 1,
                first_hit_at: at,
                last_hit_at: at,
                cleared_at: None,
            });
        Ok(record.clone())
    }

    async fn mark_inactive(
        &self,
        provider: &str,
        model: &str,
        at: DateTime<Utc>,
    ) -> Result<(), AuditStoreError> {
        let mut records = self.records.write().unwrap();
        if let Some(r) = records.get_mut(&(provider.to_string(), model.to_string())) {
            if r.is_active {
                r.is_active = false;
                r.cleared_at = Some(at);
            }
        }
        Ok(())
    }

    async fn get(
        &self,
        provider: &str,
        model: &str,
    ) -> Result<Option<RateLimitRecord>, AuditStoreError> {
        Ok(self
            .records
            .read()
            .unwrap()
            .get(&(provider.to_string(), model.to_string()))
            .cloned())
    }

    async fn list(&self, active_only: bool) -> Result<Vec<RateLimitRecord>, AuditStoreError> {
        let records = self.records.read().unwrap();
        let mut out: Vec<_> = records
            .values()
            .filter(|r| !active_only || r.is_active)
            .cloned()
            .collect();
        out.sort_by(|a, b| (&a.provider, &a.model).cmp(&(&b.provider, &b.model)));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hits_accumulate_and_clearing_keeps_history() {
        let store = InMemoryRateLimitAuditStore::new();
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(10);

        store
            .record_hit("openai", "gpt-4o", t0 + chrono::Duration::seconds(30), t0)
            .await
            .unwrap();
        let second = store
            .record_hit("openai", "gpt-4o", t1 + chrono::Duration::seconds(30), t1)
            .await
            .unwrap();

        assert_eq!(second.hit_count, 2);
        assert_eq!(second.first_hit_at, t0);
        assert_eq!(second.last_hit_at, t1);

        store.mark_inactive("openai", "gpt-4o", t1).await.unwrap();
        let record = store.get("openai", "gpt-4o").await.unwrap().unwrap();
        assert!(!record.is_active);
        assert_eq!(record.cleared_at, Some(t1));
        assert_eq!(record.hit_count, 2);

        assert!(store.list(true).await.unwrap().is_empty());
        assert_eq!(store.list(false).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn mark_inactive_on_unknown_route_is_a_noop() {
        let store = InMemoryRateLimitAuditStore::new();
        store.mark_inactive("x", "y", Utc::now()).await.unwrap();
        assert!(store.get("x", "y").await.unwrap().is_none());
    }
}
