//! Worker pool: claims jobs, dispatches them to stage handlers and turns
//! stage errors into queue decisions and entity statuses.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use coursegen_core::GenerationStatus;

use crate::content::{ContentStore, StatusTarget};
use crate::error::{FailureCategory, StageError};
use crate::jobs::{FailOutcome, Job, JobId, JobQueue, JobType, QueueError};
use crate::pipeline::StageHandler;

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Jobs processed in parallel.
    pub concurrency: usize,
    /// Sleep between polls when the queue has nothing ready.
    pub poll_interval: Duration,
    /// Name for logging
    pub name: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval: Duration::from_millis(250),
            name: "generation-worker".to_string(),
        }
    }
}

impl WorkerPoolConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// How one delivery of a job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded { follow_ups: usize },
    /// Idempotency guard short-circuited the stage.
    Skipped,
    /// Owner already FAILED; acked without running.
    OwnerFailed,
    Retrying { delay: Duration },
    Deferred { delay: Duration },
    Failed { category: FailureCategory },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedJob {
    pub job_id: JobId,
    pub job_type: JobType,
    pub outcome: JobOutcome,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerStats {
    pub processed: u64,
    pub succeeded: u64,
    pub skipped: u64,
    pub retried: u64,
    pub deferred: u64,
    pub failed: u64,
    pub running: usize,
    pub uptime_secs: u64,
}

impl WorkerStats {
    fn record(&mut self, outcome: &JobOutcome) {
        self.processed += 1;
        match outcome {
            JobOutcome::Succeeded { .. } => self.succeeded += 1,
            JobOutcome::Skipped | JobOutcome::OwnerFailed => self.skipped += 1,
            JobOutcome::Retrying { .. } => self.retried += 1,
            JobOutcome::Deferred { .. } => self.deferred += 1,
            JobOutcome::Failed { .. } => self.failed += 1,
        }
    }
}

/// Dispatches queued jobs to the handler registered for their type.
pub struct WorkerPool {
    queue: JobQueue,
    content: Arc<dyn ContentStore>,
    handlers: HashMap<JobType, Arc<dyn StageHandler>>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<_> = self.handlers.keys().map(JobType::as_str).collect();
        types.sort_unstable();
        f.debug_struct("WorkerPool")
            .field("handlers", &types)
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    pub fn new(queue: JobQueue, content: Arc<dyn ContentStore>) -> Self {
        Self {
            queue,
            content,
            handlers: HashMap::new(),
            stats: Arc::new(Mutex::new(WorkerStats::default())),
        }
    }

    /// Register a handler; a later registration for the same type replaces it.
    pub fn register(&mut self, handler: Arc<dyn StageHandler>) {
        self.handlers.insert(handler.job_type(), handler);
    }

    pub fn with_handlers(mut self, handlers: impl IntoIterator<Item = Arc<dyn StageHandler>>) -> Self {
        for handler in handlers {
            self.register(handler);
        }
        self
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats.lock().unwrap().clone()
    }

    /// Claim and process one ready job. `None` when nothing is ready.
    pub async fn process_next(&self) -> Result<Option<ProcessedJob>, QueueError> {
        match self.queue.next().await? {
            Some(job) => self.process(job).await.map(Some),
            None => Ok(None),
        }
    }

    /// Process ready jobs until the queue has none left, including follow-ups
    /// enqueued along the way. Delayed jobs are not waited for.
    pub async fn run_until_idle(&self) -> Result<Vec<ProcessedJob>, QueueError> {
        let mut processed = Vec::new();
        while let Some(done) = self.process_next().await? {
            processed.push(done);
        }
        Ok(processed)
    }

    /// Run one claimed job to a queue decision.
    pub async fn process(&self, mut job: Job) -> Result<ProcessedJob, QueueError> {
        self.stats.lock().unwrap().running += 1;
        let result = self.dispatch(&mut job).await;
        {
            let mut stats = self.stats.lock().unwrap();
            stats.running = stats.running.saturating_sub(1);
            if let Ok(outcome) = &result {
                stats.record(outcome);
            }
        }

        Ok(ProcessedJob {
            job_id: job.id,
            job_type: job.job_type(),
            outcome: result?,
        })
    }

    async fn dispatch(&self, job: &mut Job) -> Result<JobOutcome, QueueError> {
        let target = job.payload.status_target();

        let Some(handler) = self.handlers.get(&job.job_type()).cloned() else {
            let err = StageError::consistency(format!("no handler registered for {}", job.job_type()));
            return self.fail(job, target, err).await;
        };

        match self.content.status_of(target).await {
            Ok(Some(GenerationStatus::Failed)) if !job.payload.is_manual() => {
                info!(job_id = %job.id, job_type = %job.job_type(), %target, "owner failed, skipping job");
                self.queue.ack(job).await?;
                return Ok(JobOutcome::OwnerFailed);
            }
            Ok(Some(_)) => {}
            Ok(None) => {
                let err = StageError::consistency(format!("{target} not found"));
                return self.fail(job, target, err).await;
            }
            Err(e) => return self.fail(job, target, e.into()).await,
        }

        if let Err(e) = self
            .content
            .set_status(target, GenerationStatus::InProgress, None)
            .await
        {
            return self.fail(job, target, e.into()).await;
        }

        debug!(job_id = %job.id, job_type = %job.job_type(), attempt = job.attempts_made, "running stage");
        // The handler runs on its own task so a panic cannot take the worker with it.
        let claimed = job.clone();
        let run = tokio::spawn(async move { handler.handle(&claimed).await }).await;
        let outcome = match run {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => return self.fail(job, target, err).await,
            Err(join) => {
                let reason = if join.is_panic() {
                    format!("stage handler panicked: {}", panic_message(join.into_panic()))
                } else {
                    "stage handler was cancelled".to_string()
                };
                error!(job_id = %job.id, job_type = %job.job_type(), attempt = job.attempts_made, %reason, "stage aborted");
                return self.fail(job, target, StageError::infrastructure(reason)).await;
            }
        };

        let follow_ups = outcome.follow_ups.len();
        for payload in outcome.follow_ups {
            if let Err(e) = self.queue.enqueue(payload, Default::default()).await {
                let err = StageError::infrastructure(format!("enqueue follow-up: {e}"));
                return self.fail(job, target, err).await;
            }
        }
        self.queue.ack(job).await?;

        Ok(if outcome.skipped {
            JobOutcome::Skipped
        } else {
            JobOutcome::Succeeded { follow_ups }
        })
    }

    async fn fail(
        &self,
        job: &mut Job,
        target: StatusTarget,
        err: StageError,
    ) -> Result<JobOutcome, QueueError> {
        match self.queue.fail(job, &err).await? {
            FailOutcome::Retrying { delay } => Ok(JobOutcome::Retrying { delay }),
            FailOutcome::Deferred { delay } => Ok(JobOutcome::Deferred { delay }),
            FailOutcome::Failed => {
                fail_owners(self.content.as_ref(), job, target, &err.entity_message()).await;
                Ok(JobOutcome::Failed {
                    category: err.category(),
                })
            }
        }
    }

    /// Spawn `config.concurrency` polling tasks on the current runtime.
    pub fn spawn(self, config: WorkerPoolConfig) -> WorkerPoolHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = self.stats.clone();
        let pool = Arc::new(self);

        let tasks = (0..config.concurrency.max(1))
            .map(|slot| {
                let pool = pool.clone();
                let config = config.clone();
                let shutdown = shutdown_rx.clone();
                tokio::spawn(async move { worker_loop(pool, config, slot, shutdown).await })
            })
            .collect();

        info!(worker = %config.name, concurrency = config.concurrency, "worker pool started");
        WorkerPoolHandle {
            name: config.name,
            shutdown: shutdown_tx,
            tasks,
            stats,
            started: Instant::now(),
        }
    }
}

/// Mark the owner of a terminally failed job FAILED.
pub(crate) async fn fail_owners(
    content: &dyn ContentStore,
    job: &Job,
    target: StatusTarget,
    message: &str,
) {
    mark_failed(content, target, message).await;
    // A lost article means the course cannot complete.
    if matches!(job.job_type(), JobType::ArticleContent | JobType::Enrichment) {
        let course = StatusTarget::Course(job.payload.course_id());
        mark_failed(content, course, message).await;
    }
}

async fn mark_failed(content: &dyn ContentStore, target: StatusTarget, message: &str) {
    if let Err(e) = content
        .set_status(target, GenerationStatus::Failed, Some(message.to_string()))
        .await
    {
        warn!(%target, error = %e, "could not record failure on owner");
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(msg) => *msg,
        Err(payload) => payload
            .downcast_ref::<&str>()
            .map(|msg| msg.to_string())
            .unwrap_or_else(|| "non-string panic payload".to_string()),
    }
}

async fn worker_loop(
    pool: Arc<WorkerPool>,
    config: WorkerPoolConfig,
    slot: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        let idle = match pool.process_next().await {
            Ok(Some(done)) => {
                debug!(worker = %config.name, slot, job_id = %done.job_id, outcome = ?done.outcome, "job processed");
                false
            }
            Ok(None) => true,
            Err(e) => {
                error!(worker = %config.name, slot, error = %e, "queue error");
                true
            }
        };

        if idle {
            tokio::select! {
                // A dropped handle stops the pool too.
                changed = shutdown.changed() => if changed.is_err() { break; },
                _ = tokio::time::sleep(config.poll_interval) => {}
            }
        }
    }
    debug!(worker = %config.name, slot, "worker stopped");
}

/// Handle to a running pool.
#[derive(Debug)]
pub struct WorkerPoolHandle {
    name: String,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    stats: Arc<Mutex<WorkerStats>>,
    started: Instant,
}

impl WorkerPoolHandle {
    /// Stop polling and wait for in-flight jobs to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(worker = %self.name, error = %e, "worker task panicked");
            }
        }
        info!(worker = %self.name, "worker pool stopped");
    }

    pub fn stats(&self) -> WorkerStats {
        let mut stats = self.stats.lock().unwrap().clone();
        stats.uptime_secs = self.started.elapsed().as_secs();
        stats
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use coursegen_ai::ModelRoute;
    use coursegen_core::{CourseId, ManualClock};

    use super::*;
    use crate::content::{CourseRecord, InMemoryContentStore, NewArticle, NewSection};
    use crate::error::RateLimitCondition;
    use crate::jobs::types::fixtures::outline_payload;
    use crate::jobs::{
        ArticleJob, BackoffScheduler, EnqueueOptions, InMemoryJobStore, JobPayload, JobState,
        RetryPolicy,
    };
    use crate::pipeline::StageOutcome;
    use crate::rate_limit::{InMemoryEphemeralStore, InMemoryRateLimitAuditStore, RateLimitStore};

    struct Scripted {
        job_type: JobType,
        results: Mutex<VecDeque<Result<StageOutcome, StageError>>>,
    }

    impl Scripted {
        fn new(job_type: JobType, results: Vec<Result<StageOutcome, StageError>>) -> Arc<Self> {
            Arc::new(Self {
                job_type,
                results: Mutex::new(results.into()),
            })
        }
    }

    #[async_trait]
    impl StageHandler for Scripted {
        fn job_type(&self) -> JobType {
            self.job_type
        }

        async fn handle(&self, _job: &Job) -> Result<StageOutcome, StageError> {
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(StageOutcome::done()))
        }
    }

    /// Panics on its first delivery, succeeds afterwards.
    struct PanicsOnce {
        job_type: JobType,
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl StageHandler for PanicsOnce {
        fn job_type(&self) -> JobType {
            self.job_type
        }

        async fn handle(&self, _job: &Job) -> Result<StageOutcome, StageError> {
            let first = {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                *calls == 1
            };
            if first {
                panic!("generator response had no sections");
            }
            Ok(StageOutcome::done())
        }
    }

    fn panics_once(job_type: JobType) -> Arc<dyn StageHandler> {
        Arc::new(PanicsOnce {
            job_type,
            calls: Mutex::new(0),
        })
    }

    struct Fixture {
        clock: Arc<ManualClock>,
        content: Arc<InMemoryContentStore>,
        queue: JobQueue,
    }

    fn fixture() -> Fixture {
        let clock = ManualClock::starting_now();
        let rate_limits = RateLimitStore::new(
            Arc::new(InMemoryEphemeralStore::new(clock.clone())),
            InMemoryRateLimitAuditStore::arc(),
            clock.clone(),
            Duration::from_secs(60),
        );
        let backoff = BackoffScheduler::new(
            RetryPolicy::fixed(Duration::from_secs(2)).without_jitter(),
            Duration::from_secs(5),
            rate_limits,
        );
        let queue = JobQueue::new(InMemoryJobStore::arc(), backoff, clock.clone(), 3);
        Fixture {
            clock,
            content: InMemoryContentStore::arc(),
            queue,
        }
    }

    async fn course(content: &InMemoryContentStore) -> CourseId {
        let course = CourseRecord::new(
            "Rust for Operators",
            "Running Rust in production",
            "beginner",
            chrono::Utc::now(),
        );
        let id = course.id;
        content.insert_course(course).await.unwrap();
        id
    }

    async fn article_job(content: &InMemoryContentStore, course_id: CourseId) -> JobPayload {
        let articles = content
            .create_outline(
                course_id,
                vec![NewSection {
                    title: "Observability".into(),
                    description: String::new(),
                    articles: vec![NewArticle {
                        title: "Structured logging".into(),
                        description: String::new(),
                    }],
                }],
            )
            .await
            .unwrap();
        let article = &articles[0];
        JobPayload::ArticleContent(ArticleJob {
            workflow_id: coursegen_core::WorkflowId::new(),
            course_id,
            section_id: article.section_id,
            article_id: article.id,
            course_title: "Rust for Operators".into(),
            section_title: "Observability".into(),
            article_title: article.title.clone(),
            article_description: String::new(),
            level: "beginner".into(),
            include_assessments: false,
        })
    }

    #[tokio::test]
    async fn success_enqueues_follow_ups_and_acks() {
        let fx = fixture();
        let course_id = course(&fx.content).await;
        let follow_up = article_job(&fx.content, course_id).await;

        let pool = WorkerPool::new(fx.queue.clone(), fx.content.clone()).with_handlers([
            Scripted::new(
                JobType::Outline,
                vec![Ok(StageOutcome::then(vec![follow_up]))],
            ) as Arc<dyn StageHandler>,
        ]);
        fx.queue
            .enqueue(outline_payload(course_id), EnqueueOptions::default())
            .await
            .unwrap();

        let done = pool.process_next().await.unwrap().unwrap();
        assert_eq!(done.outcome, JobOutcome::Succeeded { follow_ups: 1 });
        assert_eq!(fx.queue.get(done.job_id).await.unwrap().unwrap().state, JobState::Completed);

        let stats = fx.queue.stats().await.unwrap();
        assert_eq!(stats.waiting, 1);
        assert_eq!(
            fx.content.status_of(StatusTarget::Course(course_id)).await.unwrap(),
            Some(GenerationStatus::InProgress)
        );
    }

    #[tokio::test]
    async fn terminal_article_failure_fails_article_and_course() {
        let fx = fixture();
        let course_id = course(&fx.content).await;
        let payload = article_job(&fx.content, course_id).await;
        let target = payload.status_target();

        let pool = WorkerPool::new(fx.queue.clone(), fx.content.clone()).with_handlers([
            Scripted::new(
                JobType::ArticleContent,
                vec![Err(StageError::MalformedOutput("no closing fence".into()))],
            ) as Arc<dyn StageHandler>,
        ]);
        fx.queue.enqueue(payload, EnqueueOptions::default()).await.unwrap();

        let done = pool.process_next().await.unwrap().unwrap();
        assert_eq!(
            done.outcome,
            JobOutcome::Failed {
                category: FailureCategory::MalformedOutput
            }
        );
        assert_eq!(
            fx.content.status_of(target).await.unwrap(),
            Some(GenerationStatus::Failed)
        );
        let course = fx.content.get_course(course_id).await.unwrap().unwrap();
        assert_eq!(course.generation_status, GenerationStatus::Failed);
        assert!(
            course
                .generation_error
                .unwrap()
                .starts_with("malformed_output:")
        );
    }

    #[tokio::test]
    async fn rate_limits_retry_without_failing_the_owner() {
        let fx = fixture();
        let course_id = course(&fx.content).await;
        let rate_limited = StageError::RateLimited(RateLimitCondition {
            route: ModelRoute::new("openai", "gpt-4o"),
            retry_after_secs: Some(30),
            suppressed: false,
        });

        let pool = WorkerPool::new(fx.queue.clone(), fx.content.clone()).with_handlers([
            Scripted::new(JobType::Outline, vec![Err(rate_limited)]) as Arc<dyn StageHandler>,
        ]);
        fx.queue
            .enqueue(outline_payload(course_id), EnqueueOptions::default())
            .await
            .unwrap();

        let done = pool.process_next().await.unwrap().unwrap();
        assert!(matches!(done.outcome, JobOutcome::Retrying { delay } if delay >= Duration::from_secs(5)));
        assert_eq!(
            fx.content.status_of(StatusTarget::Course(course_id)).await.unwrap(),
            Some(GenerationStatus::InProgress)
        );
        assert!(pool.process_next().await.unwrap().is_none());

        fx.clock.advance(Duration::from_secs(31));
        let done = pool.process_next().await.unwrap().unwrap();
        assert_eq!(done.outcome, JobOutcome::Succeeded { follow_ups: 0 });
        assert_eq!(pool.stats().retried, 1);
        assert_eq!(pool.stats().succeeded, 1);
    }

    #[tokio::test]
    async fn jobs_for_failed_owners_are_skipped() {
        let fx = fixture();
        let course_id = course(&fx.content).await;
        fx.content
            .set_status(
                StatusTarget::Course(course_id),
                GenerationStatus::Failed,
                Some("generation: boom".into()),
            )
            .await
            .unwrap();

        let pool = WorkerPool::new(fx.queue.clone(), fx.content.clone()).with_handlers([
            Scripted::new(JobType::Outline, vec![]) as Arc<dyn StageHandler>,
        ]);
        fx.queue
            .enqueue(outline_payload(course_id), EnqueueOptions::default())
            .await
            .unwrap();

        let done = pool.process_next().await.unwrap().unwrap();
        assert_eq!(done.outcome, JobOutcome::OwnerFailed);
        assert_eq!(
            fx.content.status_of(StatusTarget::Course(course_id)).await.unwrap(),
            Some(GenerationStatus::Failed)
        );
    }

    #[tokio::test]
    async fn missing_owner_or_handler_fails_terminally() {
        let fx = fixture();
        let pool = WorkerPool::new(fx.queue.clone(), fx.content.clone()).with_handlers([
            Scripted::new(JobType::Outline, vec![]) as Arc<dyn StageHandler>,
        ]);

        fx.queue
            .enqueue(outline_payload(CourseId::new()), EnqueueOptions::default())
            .await
            .unwrap();
        let done = pool.process_next().await.unwrap().unwrap();
        assert_eq!(
            done.outcome,
            JobOutcome::Failed {
                category: FailureCategory::Consistency
            }
        );

        let course_id = course(&fx.content).await;
        let payload = article_job(&fx.content, course_id).await;
        fx.queue.enqueue(payload, EnqueueOptions::default()).await.unwrap();
        let done = pool.process_next().await.unwrap().unwrap();
        assert_eq!(
            done.outcome,
            JobOutcome::Failed {
                category: FailureCategory::Consistency
            }
        );
    }

    #[tokio::test]
    async fn handler_panic_becomes_an_infrastructure_failure() {
        let fx = fixture();
        let course_id = course(&fx.content).await;
        let pool = WorkerPool::new(fx.queue.clone(), fx.content.clone())
            .with_handlers([panics_once(JobType::Outline)]);
        let handle = fx
            .queue
            .enqueue(outline_payload(course_id), EnqueueOptions::default())
            .await
            .unwrap();

        let done = pool.process_next().await.unwrap().unwrap();
        assert!(matches!(done.outcome, JobOutcome::Retrying { .. }));
        let job = fx.queue.get(handle.id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Delayed);
        let error = job.last_error.unwrap();
        assert!(error.contains("panicked"), "{error}");
        assert!(error.contains("no sections"), "{error}");
        assert_eq!(pool.stats().running, 0);

        fx.clock.advance(Duration::from_secs(2));
        let done = pool.process_next().await.unwrap().unwrap();
        assert_eq!(done.outcome, JobOutcome::Succeeded { follow_ups: 0 });
    }

    #[tokio::test]
    async fn repeated_panics_fail_the_owner() {
        let fx = fixture();
        let course_id = course(&fx.content).await;
        let pool = WorkerPool::new(fx.queue.clone(), fx.content.clone())
            .with_handlers([panics_once(JobType::Outline)]);
        fx.queue
            .enqueue(
                outline_payload(course_id),
                EnqueueOptions {
                    max_attempts: Some(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let done = pool.process_next().await.unwrap().unwrap();
        assert_eq!(
            done.outcome,
            JobOutcome::Failed {
                category: FailureCategory::Infrastructure
            }
        );
        let course = fx.content.get_course(course_id).await.unwrap().unwrap();
        assert_eq!(course.generation_status, GenerationStatus::Failed);
    }

    #[tokio::test]
    async fn single_worker_survives_a_panicking_handler() {
        let fx = fixture();
        let first = course(&fx.content).await;
        let second = course(&fx.content).await;
        let pool = WorkerPool::new(fx.queue.clone(), fx.content.clone())
            .with_handlers([panics_once(JobType::Outline)]);
        for course_id in [first, second] {
            fx.queue
                .enqueue(outline_payload(course_id), EnqueueOptions::default())
                .await
                .unwrap();
        }

        let handle = pool.spawn(
            WorkerPoolConfig::default()
                .with_concurrency(1)
                .with_poll_interval(Duration::from_millis(5)),
        );
        for _ in 0..200 {
            if handle.stats().succeeded == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let stats = handle.stats();
        assert_eq!(stats.retried, 1);
        assert_eq!(stats.succeeded, 1);
        handle.shutdown().await;

        let queued = fx.queue.stats().await.unwrap();
        assert_eq!(queued.completed, 1);
        assert_eq!(queued.delayed, 1);
        assert_eq!(queued.active, 0);
    }

    #[tokio::test]
    async fn spawned_pool_drains_queue_and_shuts_down() {
        let fx = fixture();
        let course_id = course(&fx.content).await;
        let pool = WorkerPool::new(fx.queue.clone(), fx.content.clone()).with_handlers([
            Scripted::new(JobType::Outline, vec![]) as Arc<dyn StageHandler>,
        ]);
        fx.queue
            .enqueue(outline_payload(course_id), EnqueueOptions::default())
            .await
            .unwrap();

        let handle = pool.spawn(
            WorkerPoolConfig::default()
                .with_concurrency(2)
                .with_poll_interval(Duration::from_millis(5)),
        );
        for _ in 0..200 {
            if handle.stats().succeeded == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(handle.stats().succeeded, 1);
        handle.shutdown().await;
        assert_eq!(fx.queue.stats().await.unwrap().completed, 1);
    }
}
