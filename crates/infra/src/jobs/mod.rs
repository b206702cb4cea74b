//! Persistent job queue for pipeline stages.
//!
//! ## Components
//!
//! - `Job` / `JobPayload`: typed work items, validated at the queue boundary
//! - `JobStore`: persistence (in-memory or Postgres)
//! - `BackoffScheduler`: rate-limit-aware retry delays
//! - `JobQueue`: enqueue / claim / ack / fail with retention

pub mod backoff;
pub mod postgres;
pub mod queue;
pub mod store;
pub mod types;

pub use backoff::{BackoffScheduler, BackoffStrategy, RetryPolicy};
pub use postgres::PostgresJobStore;
pub use queue::{FailOutcome, JobQueue, QueueError};
pub use store::{InMemoryJobStore, JobStats, JobStore, JobStoreError};
pub use types::{
    ArticleJob, ArticleQuizJob, AttemptOutcome, CourseQuizJob, EnqueueOptions, Job,
    JobAttemptRecord, JobHandle, JobId, JobPayload, JobState, JobType, OutlineJob,
    RetentionPolicy, SectionQuizJob,
};
