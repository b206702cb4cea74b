//! Job records, payloads and lifecycle transitions.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use coursegen_ai::InteractionType;
use coursegen_core::{ArticleId, CourseId, DomainError, SectionId, WorkflowId};

use crate::content::StatusTarget;

/// Upper bound for any denormalized text field carried in a payload.
pub const MAX_CONTEXT_FIELD_CHARS: usize = 2_000;

/// Unique job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Outline,
    ArticleContent,
    Enrichment,
    QuizArticle,
    QuizSection,
    QuizFinalBank,
    QuizFinalExam,
}

impl JobType {
    pub const ALL: [JobType; 7] = [
        JobType::Outline,
        JobType::ArticleContent,
        JobType::Enrichment,
        JobType::QuizArticle,
        JobType::QuizSection,
        JobType::QuizFinalBank,
        JobType::QuizFinalExam,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Outline => "outline",
            JobType::ArticleContent => "article_content",
            JobType::Enrichment => "enrichment",
            JobType::QuizArticle => "quiz_article",
            JobType::QuizSection => "quiz_section",
            JobType::QuizFinalBank => "quiz_final_bank",
            JobType::QuizFinalExam => "quiz_final_exam",
        }
    }

    pub fn interaction(&self) -> InteractionType {
        match self {
            JobType::Outline => InteractionType::Outline,
            JobType::ArticleContent => InteractionType::ArticleContent,
            JobType::Enrichment => InteractionType::Enrichment,
            JobType::QuizArticle => InteractionType::ArticleQuiz,
            JobType::QuizSection => InteractionType::SectionQuiz,
            JobType::QuizFinalBank => InteractionType::FinalQuestionBank,
            JobType::QuizFinalExam => InteractionType::FinalExam,
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown job type: {s}")))
    }
}

/// Queue-level state of a job.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Waiting,
    Delayed,
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Delayed => "delayed",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl std::str::FromStr for JobState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(JobState::Waiting),
            "delayed" => Ok(JobState::Delayed),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            other => Err(DomainError::validation(format!("unknown job state: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlineJob {
    pub workflow_id: WorkflowId,
    pub course_id: CourseId,
    pub course_title: String,
    #[serde(default)]
    pub course_description: String,
    pub level: String,
    #[serde(default)]
    pub include_assessments: bool,
}

/// Payload shared by `article_content` and `enrichment`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleJob {
    pub workflow_id: WorkflowId,
    pub course_id: CourseId,
    pub section_id: SectionId,
    pub article_id: ArticleId,
    pub course_title: String,
    pub section_title: String,
    pub article_title: String,
    #[serde(default)]
    pub article_description: String,
    pub level: String,
    #[serde(default)]
    pub include_assessments: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleQuizJob {
    pub workflow_id: WorkflowId,
    pub course_id: CourseId,
    pub article_id: ArticleId,
    pub article_title: String,
    #[serde(default)]
    pub regenerate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionQuizJob {
    pub workflow_id: WorkflowId,
    pub course_id: CourseId,
    pub section_id: SectionId,
    pub section_title: String,
    #[serde(default)]
    pub regenerate: bool,
}

/// Payload shared by the final question bank and the final exam.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseQuizJob {
    pub workflow_id: WorkflowId,
    pub course_id: CourseId,
    pub course_title: String,
    #[serde(default)]
    pub regenerate: bool,
}

/// Job payload, tagged by job type. References entities by id only; text
/// fields are short prompt context, never generated content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "job_type", rename_all = "snake_case")]
pub enum JobPayload {
    Outline(OutlineJob),
    ArticleContent(ArticleJob),
    Enrichment(ArticleJob),
    QuizArticle(ArticleQuizJob),
    QuizSection(SectionQuizJob),
    QuizFinalBank(CourseQuizJob),
    QuizFinalExam(CourseQuizJob),
}

impl JobPayload {
    pub fn job_type(&self) -> JobType {
        match self {
            JobPayload::Outline(_) => JobType::Outline,
            JobPayload::ArticleContent(_) => JobType::ArticleContent,
            JobPayload::Enrichment(_) => JobType::Enrichment,
            JobPayload::QuizArticle(_) => JobType::QuizArticle,
            JobPayload::QuizSection(_) => JobType::QuizSection,
            JobPayload::QuizFinalBank(_) => JobType::QuizFinalBank,
            JobPayload::QuizFinalExam(_) => JobType::QuizFinalExam,
        }
    }

    pub fn workflow_id(&self) -> WorkflowId {
        match self {
            JobPayload::Outline(p) => p.workflow_id,
            JobPayload::ArticleContent(p) | JobPayload::Enrichment(p) => p.workflow_id,
            JobPayload::QuizArticle(p) => p.workflow_id,
            JobPayload::QuizSection(p) => p.workflow_id,
            JobPayload::QuizFinalBank(p) | JobPayload::QuizFinalExam(p) => p.workflow_id,
        }
    }

    pub fn course_id(&self) -> CourseId {
        match self {
            JobPayload::Outline(p) => p.course_id,
            JobPayload::ArticleContent(p) | JobPayload::Enrichment(p) => p.course_id,
            JobPayload::QuizArticle(p) => p.course_id,
            JobPayload::QuizSection(p) => p.course_id,
            JobPayload::QuizFinalBank(p) | JobPayload::QuizFinalExam(p) => p.course_id,
        }
    }

    /// Entity whose `generation_status` this job drives.
    pub fn status_target(&self) -> StatusTarget {
        match self {
            JobPayload::ArticleContent(p) | JobPayload::Enrichment(p) => {
                StatusTarget::Article(p.article_id)
            }
            JobPayload::QuizArticle(p) => StatusTarget::Article(p.article_id),
            other => StatusTarget::Course(other.course_id()),
        }
    }

    /// Explicit regeneration request; allowed to run against a FAILED owner.
    pub fn is_manual(&self) -> bool {
        match self {
            JobPayload::QuizArticle(p) => p.regenerate,
            JobPayload::QuizSection(p) => p.regenerate,
            JobPayload::QuizFinalBank(p) | JobPayload::QuizFinalExam(p) => p.regenerate,
            _ => false,
        }
    }

    /// Boundary validation run by the queue before anything is stored.
    pub fn validate(&self) -> Result<(), DomainError> {
        let fields: Vec<(&str, &str, bool)> = match self {
            JobPayload::Outline(p) => vec![
                ("course_title", p.course_title.as_str(), true),
                ("course_description", p.course_description.as_str(), false),
                ("level", p.level.as_str(), true),
            ],
            JobPayload::ArticleContent(p) | JobPayload::Enrichment(p) => vec![
                ("course_title", p.course_title.as_str(), true),
                ("section_title", p.section_title.as_str(), true),
                ("article_title", p.article_title.as_str(), true),
                ("article_description", p.article_description.as_str(), false),
                ("level", p.level.as_str(), true),
            ],
            JobPayload::QuizArticle(p) => vec![("article_title", p.article_title.as_str(), true)],
            JobPayload::QuizSection(p) => vec![("section_title", p.section_title.as_str(), true)],
            JobPayload::QuizFinalBank(p) | JobPayload::QuizFinalExam(p) => {
                vec![("course_title", p.course_title.as_str(), true)]
            }
        };

        for (name, value, required) in fields {
            if required && value.trim().is_empty() {
                return Err(DomainError::validation(format!(
                    "{} payload: {name} is required",
                    self.job_type()
                )));
            }
            if value.chars().count() > MAX_CONTEXT_FIELD_CHARS {
                return Err(DomainError::validation(format!(
                    "{} payload: {name} exceeds {MAX_CONTEXT_FIELD_CHARS} characters",
                    self.job_type()
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded,
    /// Failed and rescheduled; the attempt counted.
    Retried,
    /// Short-circuited by an open rate-limit window; the attempt was refunded.
    Deferred,
    Failed,
    /// The claiming worker never reported back within its lease.
    Abandoned,
}

/// Record of a job execution attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobAttemptRecord {
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    pub error: Option<String>,
    pub duration_ms: u64,
    /// Further consecutive deferrals folded into this record.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub merged: u32,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

/// Attempt records kept per job; the oldest are dropped first.
pub const MAX_HISTORY: usize = 50;

pub const LEASE_EXPIRED: &str = "worker lease expired";

/// A queued unit of pipeline work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub payload: JobPayload,
    pub state: JobState,
    pub attempts_made: u32,
    pub max_attempts: u32,
    /// Insertion order assigned by the store; FIFO tiebreaker.
    pub seq: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Earliest time the job may be claimed.
    pub next_run_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub history: Vec<JobAttemptRecord>,
}

/// `now + delay`, saturating at the end of the representable range.
pub(crate) fn time_after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// `now - age`, saturating at the start of the representable range.
pub(crate) fn time_before(now: DateTime<Utc>, age: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(age)
        .ok()
        .and_then(|delta| now.checked_sub_signed(delta))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

impl Job {
    pub fn new(payload: JobPayload, max_attempts: u32, now: DateTime<Utc>) -> Self {
        Self {
            id: JobId::new(),
            payload,
            state: JobState::Waiting,
            attempts_made: 0,
            max_attempts: max_attempts.max(1),
            seq: 0,
            created_at: now,
            updated_at: now,
            next_run_at: now,
            started_at: None,
            finished_at: None,
            last_error: None,
            history: Vec::new(),
        }
    }

    /// Hold the job back until `now + delay`.
    pub fn delayed(mut self, delay: Duration, now: DateTime<Utc>) -> Self {
        if !delay.is_zero() {
            self.state = JobState::Delayed;
            self.next_run_at = time_after(now, delay);
        }
        self
    }

    pub fn job_type(&self) -> JobType {
        self.payload.job_type()
    }

    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        matches!(self.state, JobState::Waiting | JobState::Delayed) && self.next_run_at <= now
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.attempts_made >= self.max_attempts
    }

    pub fn mark_active(&mut self, now: DateTime<Utc>) {
        self.state = JobState::Active;
        self.attempts_made += 1;
        self.started_at = Some(now);
        self.updated_at = now;
    }

    fn record_attempt(&mut self, outcome: AttemptOutcome, error: Option<String>, now: DateTime<Utc>) {
        let started_at = self.started_at.unwrap_or(now);
        let duration_ms = (now - started_at).num_milliseconds().max(0) as u64;

        match self.history.last_mut() {
            Some(last)
                if outcome == AttemptOutcome::Deferred
                    && last.outcome == AttemptOutcome::Deferred
                    && last.attempt == self.attempts_made =>
            {
                last.finished_at = now;
                last.error = error.clone();
                last.duration_ms = duration_ms;
                last.merged = last.merged.saturating_add(1);
            }
            _ => {
                self.history.push(JobAttemptRecord {
                    attempt: self.attempts_made,
                    started_at,
                    finished_at: now,
                    outcome,
                    error: error.clone(),
                    duration_ms,
                    merged: 0,
                });
                if self.history.len() > MAX_HISTORY {
                    let excess = self.history.len() - MAX_HISTORY;
                    self.history.drain(..excess);
                }
            }
        }
        if error.is_some() {
            self.last_error = error;
        }
        self.updated_at = now;
    }

    pub fn mark_completed(&mut self, now: DateTime<Utc>) {
        self.record_attempt(AttemptOutcome::Succeeded, None, now);
        self.state = JobState::Completed;
        self.finished_at = Some(now);
    }

    pub fn mark_retry(&mut self, error: String, delay: Duration, now: DateTime<Utc>) {
        self.record_attempt(AttemptOutcome::Retried, Some(error), now);
        self.state = JobState::Delayed;
        self.next_run_at = time_after(now, delay);
    }

    /// Reschedule without consuming the attempt budget.
    pub fn mark_deferred(&mut self, error: String, delay: Duration, now: DateTime<Utc>) {
        self.record_attempt(AttemptOutcome::Deferred, Some(error), now);
        self.attempts_made = self.attempts_made.saturating_sub(1);
        self.state = JobState::Delayed;
        self.next_run_at = time_after(now, delay);
    }

    pub fn mark_failed(&mut self, error: String, now: DateTime<Utc>) {
        self.record_attempt(AttemptOutcome::Failed, Some(error), now);
        self.state = JobState::Failed;
        self.finished_at = Some(now);
    }

    /// Was this job claimed before `cutoff` and never reported back?
    pub fn is_stalled(&self, cutoff: DateTime<Utc>) -> bool {
        self.state == JobState::Active && self.started_at.is_some_and(|at| at < cutoff)
    }

    /// Take the job back from a worker that went away.
    ///
    /// The lost attempt counts; with budget left the job is runnable at once,
    /// otherwise it fails.
    pub fn mark_abandoned(&mut self, now: DateTime<Utc>) {
        self.record_attempt(AttemptOutcome::Abandoned, Some(LEASE_EXPIRED.to_string()), now);
        if self.attempts_exhausted() {
            self.state = JobState::Failed;
            self.finished_at = Some(now);
        } else {
            self.state = JobState::Delayed;
            self.next_run_at = now;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnqueueOptions {
    pub delay: Option<Duration>,
    /// Overrides the queue default.
    pub max_attempts: Option<u32>,
}

impl EnqueueOptions {
    pub fn delayed(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }
}

/// What callers get back from `enqueue`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobHandle {
    pub id: JobId,
    pub job_type: JobType,
    pub state: JobState,
    pub next_run_at: DateTime<Utc>,
}

impl From<&Job> for JobHandle {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            job_type: job.job_type(),
            state: job.state,
            next_run_at: job.next_run_at,
        }
    }
}

/// Bounds on how many finished jobs are kept, and for how long.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub keep_completed: usize,
    pub keep_failed: usize,
    pub max_age: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            keep_completed: 1_000,
            keep_failed: 5_000,
            max_age: Duration::from_secs(72 * 3600),
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn outline_payload(course_id: CourseId) -> JobPayload {
        JobPayload::Outline(OutlineJob {
            workflow_id: WorkflowId::new(),
            course_id,
            course_title: "Rust for Operators".into(),
            course_description: "Running Rust services in production".into(),
            level: "intermediate".into(),
            include_assessments: false,
        })
    }

    pub fn article_payload() -> JobPayload {
        JobPayload::ArticleContent(ArticleJob {
            workflow_id: WorkflowId::new(),
            course_id: CourseId::new(),
            section_id: SectionId::new(),
            article_id: ArticleId::new(),
            course_title: "Rust for Operators".into(),
            section_title: "Observability".into(),
            article_title: "Structured logging".into(),
            article_description: String::new(),
            level: "intermediate".into(),
            include_assessments: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn payload_is_tagged_by_job_type() {
        let payload = article_payload();
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["job_type"], "article_content");

        let back: JobPayload = serde_json::from_value(json).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn job_type_parses_from_its_name() {
        for t in JobType::ALL {
            assert_eq!(t.as_str().parse::<JobType>().unwrap(), t);
        }
        assert!("quiz".parse::<JobType>().is_err());
    }

    #[test]
    fn validation_rejects_blank_and_oversized_fields() {
        let mut payload = outline_payload(CourseId::new());
        assert!(payload.validate().is_ok());

        if let JobPayload::Outline(p) = &mut payload {
            p.course_title = "  ".into();
        }
        let err = payload.validate().unwrap_err();
        assert!(err.to_string().contains("course_title is required"));

        let mut payload = outline_payload(CourseId::new());
        if let JobPayload::Outline(p) = &mut payload {
            p.course_description = "x".repeat(MAX_CONTEXT_FIELD_CHARS + 1);
        }
        assert!(payload.validate().is_err());
    }

    #[test]
    fn owners_follow_the_stage() {
        let course_id = CourseId::new();
        assert_eq!(
            outline_payload(course_id).status_target(),
            StatusTarget::Course(course_id)
        );
        assert!(matches!(
            article_payload().status_target(),
            StatusTarget::Article(_)
        ));
    }

    #[test]
    fn deferral_refunds_the_attempt() {
        let now = Utc::now();
        let mut job = Job::new(article_payload(), 3, now);
        assert!(job.is_ready(now));

        job.mark_active(now);
        assert_eq!(job.attempts_made, 1);
        job.mark_deferred("window open".into(), Duration::from_secs(10), now);
        assert_eq!(job.attempts_made, 0);
        assert_eq!(job.state, JobState::Delayed);
        assert!(!job.is_ready(now));
        assert!(job.is_ready(now + chrono::Duration::seconds(10)));
        assert_eq!(job.history[0].outcome, AttemptOutcome::Deferred);
    }

    #[test]
    fn repeated_deferrals_fold_into_one_record() {
        let mut now = Utc::now();
        let mut job = Job::new(article_payload(), 3, now);

        for _ in 0..500 {
            job.mark_active(now);
            job.mark_deferred("window open".into(), Duration::from_secs(5), now);
            now += chrono::Duration::seconds(5);
        }

        assert_eq!(job.attempts_made, 0);
        assert_eq!(job.history.len(), 1);
        assert_eq!(job.history[0].merged, 499);
        assert_eq!(job.history[0].finished_at, now - chrono::Duration::seconds(5));
    }

    #[test]
    fn history_is_capped() {
        let mut now = Utc::now();
        let mut job = Job::new(article_payload(), u32::MAX, now);

        for i in 0..(MAX_HISTORY + 20) {
            job.mark_active(now);
            job.mark_retry(format!("boom {i}"), Duration::from_secs(1), now);
            now += chrono::Duration::seconds(1);
        }

        assert_eq!(job.history.len(), MAX_HISTORY);
        assert_eq!(job.history[0].attempt, 21);
        assert_eq!(
            job.history.last().unwrap().error.as_deref(),
            Some(format!("boom {}", MAX_HISTORY + 19).as_str())
        );
    }

    #[test]
    fn oversized_delays_saturate_instead_of_overflowing() {
        let now = Utc::now();
        let mut job = Job::new(article_payload(), 3, now);
        job.mark_active(now);
        job.mark_retry("boom".into(), Duration::from_secs(u64::MAX), now);
        assert_eq!(job.next_run_at, DateTime::<Utc>::MAX_UTC);

        assert_eq!(time_before(now, Duration::from_secs(u64::MAX)), DateTime::<Utc>::MIN_UTC);
        assert_eq!(time_after(now, Duration::from_secs(5)), now + chrono::Duration::seconds(5));
    }

    #[test]
    fn abandoned_jobs_come_back_until_the_budget_runs_out() {
        let now = Utc::now();
        let mut job = Job::new(article_payload(), 2, now);

        job.mark_active(now);
        let later = now + chrono::Duration::seconds(30);
        assert!(job.is_stalled(later));
        assert!(!job.is_stalled(now));

        job.mark_abandoned(later);
        assert_eq!(job.state, JobState::Delayed);
        assert!(job.is_ready(later));
        assert_eq!(job.history[0].outcome, AttemptOutcome::Abandoned);

        job.mark_active(later);
        job.mark_abandoned(later + chrono::Duration::seconds(30));
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.last_error.as_deref(), Some(LEASE_EXPIRED));
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn lifecycle_records_history() {
        let now = Utc::now();
        let mut job = Job::new(article_payload(), 2, now);

        job.mark_active(now);
        job.mark_retry("boom".into(), Duration::from_secs(2), now);
        assert_eq!(job.state, JobState::Delayed);
        assert!(!job.attempts_exhausted());

        let later = now + chrono::Duration::seconds(2);
        job.mark_active(later);
        assert!(job.attempts_exhausted());
        job.mark_failed("boom again".into(), later);

        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.history.len(), 2);
        assert_eq!(job.last_error.as_deref(), Some("boom again"));
        assert!(job.finished_at.is_some());
    }
}
