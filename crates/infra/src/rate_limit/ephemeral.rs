//! Expiring key/value store holding the authoritative rate-limit deadlines.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use coursegen_core::SharedClock;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EphemeralStoreError {
    #[error("ephemeral store unavailable: {0}")]
    Unavailable(String),

    #[error("ephemeral store command failed: {0}")]
    Command(String),
}

/// Minimal subset of a Redis-like store: string values with native TTL.
#[async_trait]
pub trait EphemeralStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<String>, EphemeralStoreError>;

    /// Write `value` under `key`, expiring after `ttl_secs` (minimum 1).
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64)
    -> Result<(), EphemeralStoreError>;

    async fn delete(&self, key: &str) -> Result<(), EphemeralStoreError>;

    /// All live keys starting with `prefix`.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, EphemeralStoreError>;
}

/// In-memory store for tests/dev. Expiry follows the injected clock.
pub struct InMemoryEphemeralStore {
    clock: SharedClock,
    entries: RwLock<HashMap<String, (String, DateTime<Utc>)>>,
    offline: AtomicBool,
}

impl InMemoryEphemeralStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            entries: RwLock::new(HashMap::new()),
            offline: AtomicBool::new(false),
        }
    }

    /// Simulate an outage: every call fails until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> Result<(), EphemeralStoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(EphemeralStoreError::Unavailable("connection refused".into()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryEphemeralStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryEphemeralStore")
            .field("entries", &self.entries.read().unwrap().len())
            .finish()
    }
}

#[async_trait]
impl EphemeralStore for InMemoryEphemeralStore {
    async fn get(&self, key: &str) -> Result<Option<String>, EphemeralStoreError> {
        self.ensure_online()?;
        let now = self.clock.now();
        let mut entries = self.entries.write().unwrap();
        match entries.get(key) {
            Some((_, expires_at)) if *expires_at <= now => {
                entries.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn set_ex(
        &self,
        key: &str,
        value: &str,
        ttl_secs: u64,
    ) -> Result<(), EphemeralStoreError> {
        self.ensure_online()?;
        let now = self.clock.now();
        let expires_at = i64::try_from(ttl_secs.max(1))
            .ok()
            .and_then(chrono::TimeDelta::try_seconds)
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.entries
            .write()
            .unwrap()
            .insert(key.to_string(), (value.to_string(), expires_at));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), EphemeralStoreError> {
        self.ensure_online()?;
        self.entries.write().unwrap().remove(key);
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, EphemeralStoreError> {
        self.ensure_online()?;
        let now = self.clock.now();
        let mut entries = self.entries.write().unwrap();
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        let mut keys: Vec<String> = entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}
