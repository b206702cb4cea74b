//! Redis-backed ephemeral store (`SET EX` / `GET` / `DEL` / `SCAN MATCH`).

use std::sync::Arc;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tokio::sync::Mutex;
use tracing::instrument;

use super::ephemeral::{EphemeralStore, EphemeralStoreError};

const SCAN_BATCH: usize = 200;

#[derive(Clone)]
pub struct RedisEphemeralStore {
    client: Arc<redis::Client>,
    conn: Arc<Mutex<Option<MultiplexedConnection>>>,
}

impl std::fmt::Debug for RedisEphemeralStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisEphemeralStore").finish_non_exhaustive()
    }
}

impl RedisEphemeralStore {
    /// Parse the URL; the connection is opened lazily on first use.
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, EphemeralStoreError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| EphemeralStoreError::Unavailable(e.to_string()))?;
        Ok(Self {
            client: Arc::new(client),
            conn: Arc::new(Mutex::new(None)),
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, EphemeralStoreError> {
        let mut cached = self.conn.lock().await;
        if let Some(conn) = cached.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| EphemeralStoreError::Unavailable(e.to_string()))?;
        *cached = Some(conn.clone());
        Ok(conn)
    }

    /// Drop the cached connection so the next call reconnects.
    async fn reset(&self, err: &redis::RedisError) {
        if err.is_io_error() || err.is_connection_dropped() {
            *self.conn.lock().await = None;
        }
    }

    async fn map_err(&self, err: redis::RedisError) -> EphemeralStoreError {
        self.reset(&err).await;
        if err.is_io_error() || err.is_connection_dropped() || err.is_timeout() {
            EphemeralStoreError::Unavailable(err.to_string())
        } else {
            EphemeralStoreError::Command(err.to_string())
        }
    }
}

#[async_trait]
impl EphemeralStore for RedisEphemeralStore {
    async fn get(&self, key: &str) -> Result<Option<String>, EphemeralStoreError> {
        let mut conn = self.connection().await?;
        let value: Option<String> = match redis::cmd("GET").arg(key).query_async(&mut conn).await {
            Ok(v) => v,
            Err(e) => return Err(self.map_err(e).await),
        };
        Ok(value)
    }

    #[instrument(skip(self, value), err)]
    async fn set_ex(
        &self,
        key: &str,
        value: &str,
        ttl_secs: u64,
    ) -> Result<(), EphemeralStoreError> {
        let mut conn = self.connection().await?;
        let result: Result<(), _> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_secs.max(1))
            .query_async(&mut conn)
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(e) => Err(self.map_err(e).await),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), EphemeralStoreError> {
        let mut conn = self.connection().await?;
        let result: Result<i64, _> = redis::cmd("DEL").arg(key).query_async(&mut conn).await;
        match result {
            Ok(_) => Ok(()),
            Err(e) => Err(self.map_err(e).await),
        }
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, EphemeralStoreError> {
        let mut conn = self.connection().await?;
        let pattern = format!("{prefix}*");
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let result: Result<(u64, Vec<String>), _> = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await;
            let (next, batch) = match result {
                Ok(page) => page,
                Err(e) => return Err(self.map_err(e).await),
            };
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}
