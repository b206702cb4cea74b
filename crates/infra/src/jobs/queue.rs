use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use coursegen_core::{DomainError, SharedClock};

use crate::error::StageError;

use super::backoff::BackoffScheduler;
use super::store::{JobStats, JobStore, JobStoreError};
use super::types::{EnqueueOptions, Job, JobHandle, JobId, JobPayload, JobState, RetentionPolicy};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("invalid job payload: {0}")]
    Invalid(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] JobStoreError),
}

/// What `fail` decided for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Rescheduled; the attempt counted against the budget.
    Retrying { delay: Duration },
    /// Rescheduled without consuming an attempt (call short-circuited).
    Deferred { delay: Duration },
    /// Moved to failed: budget exhausted or error not retryable.
    Failed,
}

/// How long a claim is honoured before [`JobQueue::requeue_stalled`] takes it back.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(600);

/// Ordered, persistent work queue in front of a [`JobStore`].
///
/// Delivery is at-least-once: a job whose worker dies stays `active` only
/// until its lease runs out, then it is handed out again. Handlers must
/// tolerate re-runs.
#[derive(Clone)]
pub struct JobQueue {
    store: Arc<dyn JobStore>,
    backoff: BackoffScheduler,
    clock: SharedClock,
    default_max_attempts: u32,
    retention: RetentionPolicy,
    lease: Duration,
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("default_max_attempts", &self.default_max_attempts)
            .field("retention", &self.retention)
            .field("lease", &self.lease)
            .finish_non_exhaustive()
    }
}

impl JobQueue {
    pub fn new(
        store: Arc<dyn JobStore>,
        backoff: BackoffScheduler,
        clock: SharedClock,
        default_max_attempts: u32,
    ) -> Self {
        Self {
            store,
            backoff,
            clock,
            default_max_attempts: default_max_attempts.max(1),
            retention: RetentionPolicy::default(),
            lease: DEFAULT_LEASE,
        }
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    pub async fn enqueue(
        &self,
        payload: JobPayload,
        opts: EnqueueOptions,
    ) -> Result<JobHandle, QueueError> {
        payload.validate()?;

        let now = self.clock.now();
        let max_attempts = opts.max_attempts.unwrap_or(self.default_max_attempts);
        let mut job = Job::new(payload, max_attempts, now);
        if let Some(delay) = opts.delay {
            job = job.delayed(delay, now);
        }

        let job = self.store.insert(job).await?;
        info!(
            job_id = %job.id,
            job_type = %job.job_type(),
            workflow_id = %job.payload.workflow_id(),
            state = job.state.as_str(),
            "job enqueued"
        );
        Ok(JobHandle::from(&job))
    }

    /// Claim the next ready job, if any.
    pub async fn next(&self) -> Result<Option<Job>, QueueError> {
        let job = self.store.claim_next(self.clock.now()).await?;
        if let Some(job) = &job {
            debug!(
                job_id = %job.id,
                job_type = %job.job_type(),
                attempt = job.attempts_made,
                "job claimed"
            );
        }
        Ok(job)
    }

    pub async fn ack(&self, job: &mut Job) -> Result<(), QueueError> {
        job.mark_completed(self.clock.now());
        self.store.update(job).await?;
        info!(job_id = %job.id, job_type = %job.job_type(), attempt = job.attempts_made, "job completed");
        Ok(())
    }

    /// Record a failed attempt and decide between retry, deferral and failure.
    pub async fn fail(&self, job: &mut Job, error: &StageError) -> Result<FailOutcome, QueueError> {
        let now = self.clock.now();
        let message = error.to_string();

        let outcome = if error.rate_limit().is_some_and(|c| c.suppressed) {
            let delay = self
                .backoff
                .delay_for(job.attempts_made, job.job_type(), error)
                .await;
            job.mark_deferred(message, delay, now);
            FailOutcome::Deferred { delay }
        } else if error.is_retryable() && !job.attempts_exhausted() {
            let delay = self
                .backoff
                .delay_for(job.attempts_made, job.job_type(), error)
                .await;
            job.mark_retry(message, delay, now);
            FailOutcome::Retrying { delay }
        } else {
            job.mark_failed(message, now);
            FailOutcome::Failed
        };

        self.store.update(job).await?;

        match outcome {
            FailOutcome::Retrying { delay } | FailOutcome::Deferred { delay } => info!(
                job_id = %job.id,
                job_type = %job.job_type(),
                attempt = job.attempts_made,
                max_attempts = job.max_attempts,
                delay_ms = delay.as_millis() as u64,
                deferred = matches!(outcome, FailOutcome::Deferred { .. }),
                error = %error,
                "job rescheduled"
            ),
            FailOutcome::Failed => warn!(
                job_id = %job.id,
                job_type = %job.job_type(),
                attempt = job.attempts_made,
                category = %error.category(),
                error = %error,
                "job failed"
            ),
        }
        Ok(outcome)
    }

    pub async fn get(&self, id: JobId) -> Result<Option<Job>, QueueError> {
        Ok(self.store.get(id).await?)
    }

    pub async fn list(&self, state: Option<JobState>, limit: usize) -> Result<Vec<Job>, QueueError> {
        Ok(self.store.list(state, limit).await?)
    }

    /// Hand jobs whose lease ran out back to the queue.
    ///
    /// Returns every job taken back; those with no attempts left come back
    /// already failed so the caller can settle their owners.
    pub async fn requeue_stalled(&self) -> Result<Vec<Job>, QueueError> {
        let now = self.clock.now();
        let cutoff = super::types::time_before(now, self.lease);
        let jobs = self.store.requeue_stalled(cutoff, now).await?;
        for job in &jobs {
            warn!(
                job_id = %job.id,
                job_type = %job.job_type(),
                attempt = job.attempts_made,
                state = job.state.as_str(),
                "stalled job taken back"
            );
        }
        Ok(jobs)
    }

    /// Apply the retention policy to completed and failed jobs.
    pub async fn purge(&self) -> Result<usize, QueueError> {
        let removed = self
            .store
            .purge_finished(self.retention, self.clock.now())
            .await?;
        if removed > 0 {
            debug!(removed, "finished jobs purged");
        }
        Ok(removed)
    }

    pub async fn stats(&self) -> Result<JobStats, QueueError> {
        Ok(self.store.stats().await?)
    }
}

#[cfg(test)]
mod tests {
    use coursegen_ai::ModelRoute;
    use coursegen_core::{CourseId, ManualClock};

    use super::*;
    use crate::error::RateLimitCondition;
    use crate::jobs::backoff::RetryPolicy;
    use crate::jobs::store::InMemoryJobStore;
    use crate::jobs::types::fixtures::{article_payload, outline_payload};
    use crate::rate_limit::{InMemoryEphemeralStore, InMemoryRateLimitAuditStore, RateLimitStore};

    fn queue(max_attempts: u32) -> (Arc<ManualClock>, RateLimitStore, JobQueue) {
        let clock = ManualClock::starting_now();
        let rate_limits = RateLimitStore::new(
            Arc::new(InMemoryEphemeralStore::new(clock.clone())),
            InMemoryRateLimitAuditStore::arc(),
            clock.clone(),
            Duration::from_secs(60),
        );
        let backoff = BackoffScheduler::new(
            RetryPolicy::exponential(Duration::from_secs(2), Duration::from_secs(300))
                .without_jitter(),
            Duration::from_secs(5),
            rate_limits.clone(),
        );
        let queue = JobQueue::new(InMemoryJobStore::arc(), backoff, clock.clone(), max_attempts);
        (clock, rate_limits, queue)
    }

    fn rate_limited(suppressed: bool) -> StageError {
        StageError::RateLimited(RateLimitCondition {
            route: ModelRoute::new("openai", "gpt-4o"),
            retry_after_secs: Some(30),
            suppressed,
        })
    }

    #[tokio::test]
    async fn enqueue_rejects_invalid_payloads() {
        let (_, _, queue) = queue(3);
        let mut payload = outline_payload(CourseId::new());
        if let JobPayload::Outline(p) = &mut payload {
            p.level.clear();
        }
        assert!(matches!(
            queue.enqueue(payload, EnqueueOptions::default()).await,
            Err(QueueError::Invalid(_))
        ));
        assert_eq!(queue.stats().await.unwrap().waiting, 0);
    }

    #[tokio::test]
    async fn retryable_errors_reschedule_until_budget_runs_out() {
        let (clock, _, queue) = queue(2);
        queue
            .enqueue(article_payload(), EnqueueOptions::default())
            .await
            .unwrap();

        let mut job = queue.next().await.unwrap().unwrap();
        let outcome = queue
            .fail(&mut job, &StageError::infrastructure("db down"))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            FailOutcome::Retrying {
                delay: Duration::from_secs(2)
            }
        );
        assert!(queue.next().await.unwrap().is_none());

        clock.advance(Duration::from_secs(2));
        let mut job = queue.next().await.unwrap().unwrap();
        let outcome = queue
            .fail(&mut job, &StageError::infrastructure("db down"))
            .await
            .unwrap();
        assert_eq!(outcome, FailOutcome::Failed);
        assert_eq!(queue.stats().await.unwrap().failed, 1);
    }

    #[tokio::test]
    async fn terminal_errors_fail_immediately() {
        let (_, _, queue) = queue(5);
        queue
            .enqueue(article_payload(), EnqueueOptions::default())
            .await
            .unwrap();

        let mut job = queue.next().await.unwrap().unwrap();
        let outcome = queue
            .fail(&mut job, &StageError::MalformedOutput("garbage".into()))
            .await
            .unwrap();
        assert_eq!(outcome, FailOutcome::Failed);
        assert_eq!(job.attempts_made, 1);
    }

    #[tokio::test]
    async fn rate_limit_delay_follows_the_window() {
        let (clock, rate_limits, queue) = queue(5);
        rate_limits.set("openai", "gpt-4o", Some(30)).await;
        queue
            .enqueue(article_payload(), EnqueueOptions::default())
            .await
            .unwrap();

        let mut job = queue.next().await.unwrap().unwrap();
        let outcome = queue.fail(&mut job, &rate_limited(false)).await.unwrap();
        assert_eq!(
            outcome,
            FailOutcome::Retrying {
                delay: Duration::from_secs(30)
            }
        );

        clock.advance(Duration::from_secs(29));
        assert!(queue.next().await.unwrap().is_none());
        clock.advance(Duration::from_secs(1));
        assert!(queue.next().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn suppressed_calls_do_not_consume_attempts() {
        let (clock, rate_limits, queue) = queue(1);
        queue
            .enqueue(article_payload(), EnqueueOptions::default())
            .await
            .unwrap();

        for _ in 0..3 {
            rate_limits.set("openai", "gpt-4o", Some(10)).await;
            let mut job = queue.next().await.unwrap().unwrap();
            let outcome = queue.fail(&mut job, &rate_limited(true)).await.unwrap();
            assert!(matches!(outcome, FailOutcome::Deferred { .. }));
            assert_eq!(job.attempts_made, 0);
            clock.advance(Duration::from_secs(10));
        }

        let mut job = queue.next().await.unwrap().unwrap();
        queue.ack(&mut job).await.unwrap();
        assert_eq!(queue.stats().await.unwrap().completed, 1);
    }

    #[tokio::test]
    async fn abandoned_claims_are_redelivered_after_the_lease() {
        let (clock, _, queue) = queue(3);
        let queue = queue.with_lease(Duration::from_secs(60));
        let handle = queue
            .enqueue(article_payload(), EnqueueOptions::default())
            .await
            .unwrap();

        // Claimed, then the worker goes away without ack or fail.
        let abandoned = queue.next().await.unwrap().unwrap();
        assert_eq!(abandoned.id, handle.id);
        assert!(queue.next().await.unwrap().is_none());

        clock.advance(Duration::from_secs(59));
        assert!(queue.requeue_stalled().await.unwrap().is_empty());

        clock.advance(Duration::from_secs(2));
        let requeued = queue.requeue_stalled().await.unwrap();
        assert_eq!(requeued.len(), 1);
        assert_eq!(requeued[0].state, JobState::Delayed);

        let mut again = queue.next().await.unwrap().unwrap();
        assert_eq!(again.id, handle.id);
        assert_eq!(again.attempts_made, 2);
        queue.ack(&mut again).await.unwrap();
        assert_eq!(queue.stats().await.unwrap().completed, 1);
    }

    #[tokio::test]
    async fn stalled_job_without_budget_fails() {
        let (clock, _, queue) = queue(1);
        let queue = queue.with_lease(Duration::from_secs(60));
        queue
            .enqueue(article_payload(), EnqueueOptions::default())
            .await
            .unwrap();
        queue.next().await.unwrap().unwrap();

        clock.advance(Duration::from_secs(61));
        let requeued = queue.requeue_stalled().await.unwrap();
        assert_eq!(requeued[0].state, JobState::Failed);
        assert!(queue.next().await.unwrap().is_none());
        assert_eq!(queue.stats().await.unwrap().failed, 1);
    }

    #[tokio::test]
    async fn delayed_enqueue_and_purge() {
        let (clock, _, queue) = queue(1);
        let queue = queue.with_retention(RetentionPolicy {
            keep_completed: 0,
            keep_failed: 0,
            max_age: Duration::from_secs(3600),
        });

        let handle = queue
            .enqueue(article_payload(), EnqueueOptions::delayed(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(handle.state, JobState::Delayed);
        assert!(queue.next().await.unwrap().is_none());

        clock.advance(Duration::from_secs(5));
        let mut job = queue.next().await.unwrap().unwrap();
        queue.ack(&mut job).await.unwrap();

        assert_eq!(queue.purge().await.unwrap(), 1);
        assert!(queue.get(handle.id).await.unwrap().is_none());
    }
}
