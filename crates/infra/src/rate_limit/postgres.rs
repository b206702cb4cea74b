//! Postgres-backed rate-limit audit records (`rate_limit_records`).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;

use super::audit::{AuditStoreError, RateLimitAuditStore, RateLimitRecord};

#[derive(Debug, Clone)]
pub struct PostgresRateLimitAuditStore {
    pool: Arc<PgPool>,
}

impl PostgresRateLimitAuditStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

fn storage(operation: &str, err: sqlx::Error) -> AuditStoreError {
    AuditStoreError::Storage(format!("{operation}: {err}"))
}

fn record_from_row(row: &PgRow) -> Result<RateLimitRecord, AuditStoreError> {
    let map = |e| storage("decode rate_limit_record", e);
    let hit_count: i64 = row.try_get("hit_count").map_err(map)?;
    Ok(RateLimitRecord {
        provider: row.try_get("provider").map_err(map)?,
        model: row.try_get("model").map_err(map)?,
        is_active: row.try_get("is_active").map_err(map)?,
        timeout_until: row.try_get("timeout_until").map_err(map)?,
        hit_count: hit_count.max(0) as u64,
        first_hit_at: row.try_get("first_hit_at").map_err(map)?,
        last_hit_at: row.try_get("last_hit_at").map_err(map)?,
        cleared_at: row.try_get("cleared_at").map_err(map)?,
    })
}

#[async_trait]
impl RateLimitAuditStore for PostgresRateLimitAuditStore {
    #[instrument(skip(self), err)]
    async fn record_hit(
        &self,
        provider: &str,
        model: &str,
        timeout_until: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<RateLimitRecord, AuditStoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO rate_limit_records (
                provider, model, is_active, timeout_until, hit_count,
                first_hit_at, last_hit_at, cleared_at
            )
            VALUES ($1, $2, TRUE, $3, 1, $4, $4, NULL)
            ON CONFLICT (provider, model) DO UPDATE SET
                is_active = TRUE,
                timeout_until = EXCLUDED.timeout_until,
                hit_count = rate_limit_records.hit_count + 1,
                last_hit_at = EXCLUDED.last_hit_at,
                cleared_at = NULL
            RETURNING provider, model, is_active, timeout_until, hit_count,
                      first_hit_at, last_hit_at, cleared_at
            "#,
        )
        .bind(provider)
        .bind(model)
        .bind(timeout_until)
        .bind(at)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| storage("record_hit", e))?;

        record_from_row(&row)
    }

    #[instrument(skip(self), err)]
    async fn mark_inactive(
        &self,
        provider: &str,
        model: &str,
        at: DateTime<Utc>,
    ) -> Result<(), AuditStoreError> {
        sqlx::query(
            r#"
            UPDATE rate_limit_records
            SET is_active = FALSE, cleared_at = $3
            WHERE provider = $1 AND model = $2 AND is_active
            "#,
        )
        .bind(provider)
        .bind(model)
        .bind(at)
        .execute(&*self.pool)
        .await
        .map_err(|e| storage("mark_inactive", e))?;
        Ok(())
    }

    async fn get(
        &self,
        provider: &str,
        model: &str,
    ) -> Result<Option<RateLimitRecord>, AuditStoreError> {
        let row = sqlx::query(
            r#"
            SELECT provider, model, is_active, timeout_until, hit_count,
                   first_hit_at, last_hit_at, cleared_at
            FROM rate_limit_records
            WHERE provider = $1 AND model = $2
            "#,
        )
        .bind(provider)
        .bind(model)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| storage("get", e))?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn list(&self, active_only: bool) -> Result<Vec<RateLimitRecord>, AuditStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT provider, model, is_active, timeout_until, hit_count,
                   first_hit_at, last_hit_at, cleared_at
            FROM rate_limit_records
            WHERE ($1 = FALSE OR is_active)
            ORDER BY provider, model
            "#,
        )
        .bind(active_only)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| storage("list", e))?;

        rows.iter().map(record_from_row).collect()
    }
}
