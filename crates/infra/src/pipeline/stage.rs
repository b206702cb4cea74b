use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};
use uuid::Uuid;

use coursegen_ai::QuizQuestion;
use coursegen_core::{CourseId, GenerationStatus, QuizId, SharedClock};

use crate::content::{
    ArticleRecord, ContentStore, ContentStoreError, CourseRecord, QuizKind, QuizRecord,
    StatusTarget,
};
use crate::error::StageError;
use crate::jobs::{Job, JobPayload, JobType};

use super::gateway::GenerationGateway;

/// What a successful stage run produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageOutcome {
    /// Jobs to enqueue before the current one is acked.
    pub follow_ups: Vec<JobPayload>,
    /// True when the idempotency guard short-circuited the stage.
    pub skipped: bool,
}

impl StageOutcome {
    pub fn done() -> Self {
        Self::default()
    }

    pub fn then(follow_ups: Vec<JobPayload>) -> Self {
        Self {
            follow_ups,
            skipped: false,
        }
    }

    pub fn skipped() -> Self {
        Self {
            follow_ups: Vec::new(),
            skipped: true,
        }
    }

    pub fn with_follow_ups(mut self, follow_ups: Vec<JobPayload>) -> Self {
        self.follow_ups.extend(follow_ups);
        self
    }
}

/// One pipeline stage. Handlers load and verify, generate, persist and flip
/// status; they never decide retry-vs-terminal.
#[async_trait]
pub trait StageHandler: Send + Sync + 'static {
    fn job_type(&self) -> JobType;

    async fn handle(&self, job: &Job) -> Result<StageOutcome, StageError>;
}

/// Question counts requested from the generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuizSettings {
    pub article_questions: usize,
    pub section_questions: usize,
    pub bank_questions: usize,
    pub exam_questions: usize,
}

impl Default for QuizSettings {
    fn default() -> Self {
        Self {
            article_questions: 5,
            section_questions: 8,
            bank_questions: 30,
            exam_questions: 15,
        }
    }
}

/// Collaborators shared by every stage handler.
#[derive(Clone)]
pub struct StageContext {
    pub content: Arc<dyn ContentStore>,
    pub gateway: GenerationGateway,
    pub clock: SharedClock,
    pub quizzes: QuizSettings,
}

impl StageContext {
    pub fn new(
        content: Arc<dyn ContentStore>,
        gateway: GenerationGateway,
        clock: SharedClock,
    ) -> Self {
        Self {
            content,
            gateway,
            clock,
            quizzes: QuizSettings::default(),
        }
    }

    pub fn with_quiz_settings(mut self, quizzes: QuizSettings) -> Self {
        self.quizzes = quizzes;
        self
    }

    pub async fn course(&self, id: CourseId) -> Result<CourseRecord, StageError> {
        self.content
            .get_course(id)
            .await?
            .ok_or_else(|| StageError::consistency(format!("course {id} not found")))
    }

    /// Load an article and check it belongs to `course_id`.
    pub async fn owned_article(
        &self,
        course_id: CourseId,
        article_id: coursegen_core::ArticleId,
    ) -> Result<ArticleRecord, StageError> {
        let article = self
            .content
            .get_article(article_id)
            .await?
            .ok_or_else(|| StageError::consistency(format!("article {article_id} not found")))?;
        if article.course_id != course_id {
            return Err(StageError::consistency(format!(
                "article {article_id} belongs to course {}, not {course_id}",
                article.course_id
            )));
        }
        Ok(article)
    }

    /// Existing quiz for `(kind, owner)` unless the caller asked to regenerate.
    pub async fn existing_quiz(
        &self,
        kind: QuizKind,
        owner_id: Uuid,
        regenerate: bool,
    ) -> Result<Option<QuizRecord>, StageError> {
        if regenerate {
            return Ok(None);
        }
        let existing = self.content.find_quiz(kind, owner_id).await?;
        if existing.is_some() {
            debug!(kind = kind.as_str(), %owner_id, "quiz already exists, skipping");
        }
        Ok(existing)
    }

    /// Persist a quiz: replace when regenerating, otherwise insert.
    ///
    /// Returns false when a concurrent run inserted the same quiz first.
    pub async fn store_quiz(
        &self,
        course_id: CourseId,
        kind: QuizKind,
        owner_id: Uuid,
        questions: Vec<QuizQuestion>,
        regenerate: bool,
    ) -> Result<bool, StageError> {
        let record = QuizRecord {
            id: QuizId::new(),
            course_id,
            kind,
            owner_id,
            questions,
            created_at: self.clock.now(),
        };
        let count = record.questions.len();

        if regenerate {
            self.content.replace_quiz(record).await?;
        } else {
            match self.content.insert_quiz(record).await {
                Ok(()) => {}
                Err(ContentStoreError::Conflict(_)) => return Ok(false),
                Err(e) => return Err(e.into()),
            }
        }
        info!(kind = kind.as_str(), %owner_id, questions = count, regenerate, "quiz stored");
        Ok(true)
    }

    /// Resolve the course to COMPLETED once every article has content and
    /// enrichment. Returns whether it is complete.
    pub async fn finalize_course(&self, course_id: CourseId) -> Result<bool, StageError> {
        let articles = self.content.list_articles(course_id).await?;
        if articles.is_empty() || !articles.iter().all(ArticleRecord::is_finished) {
            return Ok(false);
        }
        self.content
            .set_status(
                StatusTarget::Course(course_id),
                GenerationStatus::Completed,
                None,
            )
            .await?;
        info!(%course_id, articles = articles.len(), "course generation completed");
        Ok(true)
    }
}

/// Handlers are registered per job type; a payload of another type is a
/// routing bug, reported as a consistency error.
pub(crate) fn unexpected_payload(expected: JobType, job: &Job) -> StageError {
    StageError::consistency(format!(
        "{expected} handler received a {} job",
        job.job_type()
    ))
}
