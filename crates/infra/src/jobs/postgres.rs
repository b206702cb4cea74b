//! Postgres-backed job store (`generation_jobs`).
//!
//! Claims use `FOR UPDATE SKIP LOCKED` so several worker processes can poll
//! the same table without handing one job to two workers.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::instrument;

use super::store::{JobStats, JobStore, JobStoreError};
use super::types::{
    Job, JobAttemptRecord, JobId, JobPayload, JobState, RetentionPolicy, time_before,
};

const JOB_COLUMNS: &str = "id, seq, payload, state, attempts_made, max_attempts, created_at, \
     updated_at, next_run_at, started_at, finished_at, last_error, history";

#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: Arc<PgPool>,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> JobStoreError {
    JobStoreError::Storage(format!("{operation}: {err}"))
}

fn job_from_row(row: &PgRow) -> Result<Job, JobStoreError> {
    let map = |e| map_sqlx_error("decode job", e);
    let state: String = row.try_get("state").map_err(map)?;
    let seq: i64 = row.try_get("seq").map_err(map)?;
    let attempts_made: i32 = row.try_get("attempts_made").map_err(map)?;
    let max_attempts: i32 = row.try_get("max_attempts").map_err(map)?;
    let payload: Json<JobPayload> = row.try_get("payload").map_err(map)?;
    let history: Json<Vec<JobAttemptRecord>> = row.try_get("history").map_err(map)?;

    Ok(Job {
        id: JobId::from_uuid(row.try_get("id").map_err(map)?),
        payload: payload.0,
        state: state
            .parse()
            .map_err(|e| JobStoreError::Storage(format!("decode job: {e}")))?,
        attempts_made: attempts_made.max(0) as u32,
        max_attempts: max_attempts.max(1) as u32,
        seq: seq.max(0) as u64,
        created_at: row.try_get("created_at").map_err(map)?,
        updated_at: row.try_get("updated_at").map_err(map)?,
        next_run_at: row.try_get("next_run_at").map_err(map)?,
        started_at: row.try_get("started_at").map_err(map)?,
        finished_at: row.try_get("finished_at").map_err(map)?,
        last_error: row.try_get("last_error").map_err(map)?,
        history: history.0,
    })
}

#[async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip(self, job), fields(job_id = %job.id, job_type = %job.job_type()), err)]
    async fn insert(&self, job: Job) -> Result<Job, JobStoreError> {
        let sql = format!(
            r#"
            INSERT INTO generation_jobs (
                id, job_type, payload, state, attempts_made, max_attempts,
                created_at, updated_at, next_run_at, started_at, finished_at, last_error, history
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(job.id.0)
            .bind(job.job_type().as_str())
            .bind(Json(&job.payload))
            .bind(job.state.as_str())
            .bind(job.attempts_made as i32)
            .bind(job.max_attempts as i32)
            .bind(job.created_at)
            .bind(job.updated_at)
            .bind(job.next_run_at)
            .bind(job.started_at)
            .bind(job.finished_at)
            .bind(&job.last_error)
            .bind(Json(&job.history))
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
                    JobStoreError::AlreadyExists(job.id)
                }
                other => map_sqlx_error("insert", other),
            })?;

        job_from_row(&row)
    }

    async fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM generation_jobs WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(job_id.0)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;

        row.as_ref().map(job_from_row).transpose()
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, state = job.state.as_str()), err)]
    async fn update(&self, job: &Job) -> Result<(), JobStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE generation_jobs
            SET state = $2, attempts_made = $3, updated_at = $4, next_run_at = $5,
                started_at = $6, finished_at = $7, last_error = $8, history = $9
            WHERE id = $1
            "#,
        )
        .bind(job.id.0)
        .bind(job.state.as_str())
        .bind(job.attempts_made as i32)
        .bind(job.updated_at)
        .bind(job.next_run_at)
        .bind(job.started_at)
        .bind(job.finished_at)
        .bind(&job.last_error)
        .bind(Json(&job.history))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update", e))?;

        if result.rows_affected() == 0 {
            return Err(JobStoreError::NotFound(job.id));
        }
        Ok(())
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Job>, JobStoreError> {
        let sql = format!(
            r#"
            UPDATE generation_jobs
            SET state = 'active', attempts_made = attempts_made + 1,
                started_at = $1, updated_at = $1
            WHERE id = (
                SELECT id FROM generation_jobs
                WHERE state IN ('waiting', 'delayed') AND next_run_at <= $1
                ORDER BY seq ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(now)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("claim_next", e))?;

        row.as_ref().map(job_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn requeue_stalled(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Job>, JobStoreError> {
        let map = |e| map_sqlx_error("requeue_stalled", e);
        let mut tx = self.pool.begin().await.map_err(map)?;

        // Rows a live claim is still writing to are skipped until the next sweep.
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM generation_jobs \
             WHERE state = 'active' AND started_at < $1 \
             ORDER BY seq ASC \
             FOR UPDATE SKIP LOCKED"
        );
        let rows = sqlx::query(&sql)
            .bind(cutoff)
            .fetch_all(&mut *tx)
            .await
            .map_err(map)?;

        let mut requeued = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut job = job_from_row(row)?;
            job.mark_abandoned(now);
            sqlx::query(
                r#"
                UPDATE generation_jobs
                SET state = $2, updated_at = $3, next_run_at = $4, finished_at = $5,
                    last_error = $6, history = $7
                WHERE id = $1
                "#,
            )
            .bind(job.id.0)
            .bind(job.state.as_str())
            .bind(job.updated_at)
            .bind(job.next_run_at)
            .bind(job.finished_at)
            .bind(&job.last_error)
            .bind(Json(&job.history))
            .execute(&mut *tx)
            .await
            .map_err(map)?;
            requeued.push(job);
        }

        tx.commit().await.map_err(map)?;
        Ok(requeued)
    }

    async fn list(&self, state: Option<JobState>, limit: usize) -> Result<Vec<Job>, JobStoreError> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM generation_jobs \
             WHERE ($1::TEXT IS NULL OR state = $1) \
             ORDER BY seq ASC LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(state.map(|s| s.as_str()))
            .bind(limit.min(i64::MAX as usize) as i64)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list", e))?;

        rows.iter().map(job_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn purge_finished(
        &self,
        policy: RetentionPolicy,
        now: DateTime<Utc>,
    ) -> Result<usize, JobStoreError> {
        // Timestamps before the epoch are outside what the table ever holds.
        let cutoff = time_before(now, policy.max_age).max(DateTime::<Utc>::default());
        let mut removed = 0;
        for (state, keep) in [
            (JobState::Completed, policy.keep_completed),
            (JobState::Failed, policy.keep_failed),
        ] {
            let result = sqlx::query(
                r#"
                DELETE FROM generation_jobs
                WHERE state = $1
                  AND (
                    finished_at < $2
                    OR id IN (
                        SELECT id FROM generation_jobs
                        WHERE state = $1
                        ORDER BY finished_at DESC
                        OFFSET $3
                    )
                  )
                "#,
            )
            .bind(state.as_str())
            .bind(cutoff)
            .bind(keep.min(i64::MAX as usize) as i64)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("purge_finished", e))?;
            removed += result.rows_affected() as usize;
        }
        Ok(removed)
    }

    async fn stats(&self) -> Result<JobStats, JobStoreError> {
        let rows = sqlx::query("SELECT state, COUNT(*) AS n FROM generation_jobs GROUP BY state")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("stats", e))?;

        let mut stats = JobStats::default();
        for row in rows {
            let state: String = row.try_get("state").map_err(|e| map_sqlx_error("stats", e))?;
            let n: i64 = row.try_get("n").map_err(|e| map_sqlx_error("stats", e))?;
            let count = n.max(0) as usize;
            match state.parse::<JobState>() {
                Ok(JobState::Waiting) => stats.waiting += count,
                Ok(JobState::Delayed) => stats.delayed += count,
                Ok(JobState::Active) => stats.active += count,
                Ok(JobState::Completed) => stats.completed += count,
                Ok(JobState::Failed) => stats.failed += count,
                Err(e) => return Err(JobStoreError::Storage(format!("stats: {e}"))),
            }
        }
        Ok(stats)
    }
}
