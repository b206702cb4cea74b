//! Job storage implementations.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::types::{Job, JobId, JobState, RetentionPolicy, time_before};

/// Job store abstraction.
#[async_trait]
pub trait JobStore: Send + Sync + 'static {
    /// Persist a new job; the store assigns `seq`.
    async fn insert(&self, job: Job) -> Result<Job, JobStoreError>;

    async fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError>;

    async fn update(&self, job: &Job) -> Result<(), JobStoreError>;

    /// Atomically claim the oldest ready job (lowest `seq` whose `next_run_at`
    /// has passed) and mark it active. `None` when nothing is ready.
    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Job>, JobStoreError>;

    /// Take back every job claimed before `cutoff` that is still active.
    ///
    /// Each one goes through [`Job::mark_abandoned`]; the updated jobs are returned.
    async fn requeue_stalled(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Job>, JobStoreError>;

    /// Jobs ordered by `seq`, optionally filtered by state.
    async fn list(&self, state: Option<JobState>, limit: usize) -> Result<Vec<Job>, JobStoreError>;

    /// Drop finished jobs beyond the retention bounds; returns how many.
    async fn purge_finished(
        &self,
        policy: RetentionPolicy,
        now: DateTime<Utc>,
    ) -> Result<usize, JobStoreError>;

    async fn stats(&self) -> Result<JobStats, JobStoreError>;
}

/// Job store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Job counts per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    pub waiting: usize,
    pub delayed: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

impl JobStats {
    pub fn record(&mut self, state: JobState) {
        match state {
            JobState::Waiting => self.waiting += 1,
            JobState::Delayed => self.delayed += 1,
            JobState::Active => self.active += 1,
            JobState::Completed => self.completed += 1,
            JobState::Failed => self.failed += 1,
        }
    }

    /// Jobs that still have work ahead of them.
    pub fn outstanding(&self) -> usize {
        self.waiting + self.delayed + self.active
    }
}

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<JobId, Job>,
    next_seq: u64,
}

/// In-memory job store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    inner: RwLock<Inner>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

fn purge_state(
    jobs: &mut HashMap<JobId, Job>,
    state: JobState,
    keep: usize,
    cutoff: DateTime<Utc>,
) -> usize {
    let mut finished: Vec<(DateTime<Utc>, JobId)> = jobs
        .values()
        .filter(|j| j.state == state)
        .map(|j| (j.finished_at.unwrap_or(j.updated_at), j.id))
        .collect();
    // Newest first; everything past `keep` or older than the cutoff goes.
    finished.sort_by(|a, b| b.cmp(a));

    let mut removed = 0;
    for (idx, (finished_at, id)) in finished.into_iter().enumerate() {
        if idx >= keep || finished_at < cutoff {
            jobs.remove(&id);
            removed += 1;
        }
    }
    removed
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, mut job: Job) -> Result<Job, JobStoreError> {
        let mut inner = self.inner.write().unwrap();
        if inner.jobs.contains_key(&job.id) {
            return Err(JobStoreError::AlreadyExists(job.id));
        }
        inner.next_seq += 1;
        job.seq = inner.next_seq;
        inner.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        Ok(self.inner.read().unwrap().jobs.get(&job_id).cloned())
    }

    async fn update(&self, job: &Job) -> Result<(), JobStoreError> {
        let mut inner = self.inner.write().unwrap();
        match inner.jobs.get_mut(&job.id) {
            Some(slot) => {
                *slot = job.clone();
                Ok(())
            }
            None => Err(JobStoreError::NotFound(job.id)),
        }
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Job>, JobStoreError> {
        let mut inner = self.inner.write().unwrap();

        let next = inner
            .jobs
            .values()
            .filter(|j| j.is_ready(now))
            .min_by_key(|j| j.seq)
            .map(|j| j.id);

        Ok(next.and_then(|id| {
            inner.jobs.get_mut(&id).map(|job| {
                job.mark_active(now);
                job.clone()
            })
        }))
    }

    async fn requeue_stalled(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Job>, JobStoreError> {
        let mut inner = self.inner.write().unwrap();
        let mut requeued: Vec<Job> = inner
            .jobs
            .values_mut()
            .filter(|j| j.is_stalled(cutoff))
            .map(|job| {
                job.mark_abandoned(now);
                job.clone()
            })
            .collect();
        requeued.sort_by_key(|j| j.seq);
        Ok(requeued)
    }

    async fn list(&self, state: Option<JobState>, limit: usize) -> Result<Vec<Job>, JobStoreError> {
        let inner = self.inner.read().unwrap();
        let mut result: Vec<_> = inner
            .jobs
            .values()
            .filter(|j| state.is_none_or(|s| j.state == s))
            .cloned()
            .collect();
        result.sort_by_key(|j| j.seq);
        result.truncate(limit);
        Ok(result)
    }

    async fn purge_finished(
        &self,
        policy: RetentionPolicy,
        now: DateTime<Utc>,
    ) -> Result<usize, JobStoreError> {
        let cutoff = time_before(now, policy.max_age);
        let mut inner = self.inner.write().unwrap();
        let removed = purge_state(&mut inner.jobs, JobState::Completed, policy.keep_completed, cutoff)
            + purge_state(&mut inner.jobs, JobState::Failed, policy.keep_failed, cutoff);
        Ok(removed)
    }

    async fn stats(&self) -> Result<JobStats, JobStoreError> {
        let inner = self.inner.read().unwrap();
        let mut stats = JobStats::default();
        for job in inner.jobs.values() {
            stats.record(job.state);
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use coursegen_core::CourseId;

    use super::*;
    use crate::jobs::types::fixtures::{article_payload, outline_payload};

    #[tokio::test]
    async fn claims_in_fifo_order_and_marks_active() {
        let store = InMemoryJobStore::new();
        let now = Utc::now();

        let first = store.insert(Job::new(article_payload(), 3, now)).await.unwrap();
        let second = store.insert(Job::new(article_payload(), 3, now)).await.unwrap();
        assert!(first.seq < second.seq);

        let claimed = store.claim_next(now).await.unwrap().unwrap();
        assert_eq!(claimed.id, first.id);
        assert_eq!(claimed.state, JobState::Active);
        assert_eq!(claimed.attempts_made, 1);

        let claimed = store.claim_next(now).await.unwrap().unwrap();
        assert_eq!(claimed.id, second.id);
        assert!(store.claim_next(now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delayed_jobs_wait_for_their_time() {
        let store = InMemoryJobStore::new();
        let now = Utc::now();

        let delayed = store
            .insert(Job::new(article_payload(), 3, now).delayed(Duration::from_secs(30), now))
            .await
            .unwrap();
        let ready = store.insert(Job::new(article_payload(), 3, now)).await.unwrap();

        assert_eq!(store.claim_next(now).await.unwrap().unwrap().id, ready.id);
        assert!(store.claim_next(now).await.unwrap().is_none());

        let later = now + chrono::Duration::seconds(30);
        assert_eq!(store.claim_next(later).await.unwrap().unwrap().id, delayed.id);
    }

    #[tokio::test]
    async fn purge_keeps_newest_within_bounds() {
        let store = InMemoryJobStore::new();
        let now = Utc::now();

        for offset in 0..4 {
            let mut job = store
                .insert(Job::new(outline_payload(CourseId::new()), 1, now))
                .await
                .unwrap();
            job.mark_active(now);
            job.mark_completed(now - chrono::Duration::minutes(offset));
            store.update(&job).await.unwrap();
        }
        let mut stale = store.insert(Job::new(article_payload(), 1, now)).await.unwrap();
        stale.mark_active(now);
        stale.mark_failed("boom".into(), now - chrono::Duration::hours(100));
        store.update(&stale).await.unwrap();

        let policy = RetentionPolicy {
            keep_completed: 2,
            keep_failed: 10,
            max_age: Duration::from_secs(72 * 3600),
        };
        assert_eq!(store.purge_finished(policy, now).await.unwrap(), 3);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test]
    async fn stalled_active_jobs_are_requeued() {
        let store = InMemoryJobStore::new();
        let now = Utc::now();

        let stalled = store.insert(Job::new(article_payload(), 3, now)).await.unwrap();
        store.claim_next(now).await.unwrap().unwrap();
        let later = now + chrono::Duration::minutes(5);
        let fresh = store.insert(Job::new(article_payload(), 3, now)).await.unwrap();
        store.claim_next(later).await.unwrap().unwrap();

        let cutoff = later - chrono::Duration::minutes(1);
        let requeued = store.requeue_stalled(cutoff, later).await.unwrap();
        assert_eq!(requeued.len(), 1);
        assert_eq!(requeued[0].id, stalled.id);
        assert_eq!(requeued[0].state, JobState::Delayed);

        let again = store.claim_next(later).await.unwrap().unwrap();
        assert_eq!(again.id, stalled.id);
        assert_eq!(again.attempts_made, 2);
        assert_eq!(
            store.get(fresh.id).await.unwrap().unwrap().state,
            JobState::Active
        );
    }

    #[tokio::test]
    async fn huge_retention_age_keeps_everything_in_bounds() {
        let store = InMemoryJobStore::new();
        let now = Utc::now();
        let mut job = store.insert(Job::new(article_payload(), 1, now)).await.unwrap();
        job.mark_active(now);
        job.mark_completed(now);
        store.update(&job).await.unwrap();

        let policy = RetentionPolicy {
            keep_completed: 10,
            keep_failed: 10,
            max_age: Duration::from_secs(u64::MAX),
        };
        assert_eq!(store.purge_finished(policy, now).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn update_of_unknown_job_fails() {
        let store = InMemoryJobStore::new();
        let job = Job::new(article_payload(), 1, Utc::now());
        assert_eq!(
            store.update(&job).await,
            Err(JobStoreError::NotFound(job.id))
        );
    }
}
