//! Entry points exposed to the content system: start a workflow, read its
//! progress, request assessments manually.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use coursegen_core::{ArticleId, CourseId, GenerationStatus, SectionId, WorkflowId};

use crate::content::{ContentStore, ContentStoreError, QuizKind, StatusTarget};
use crate::jobs::{
    ArticleQuizJob, CourseQuizJob, EnqueueOptions, JobHandle, JobPayload, JobQueue, OutlineJob,
    QueueError, SectionQuizJob,
};

/// Course statuses a workflow may be started from.
const STARTABLE: [GenerationStatus; 3] = [
    GenerationStatus::Pending,
    GenerationStatus::Completed,
    GenerationStatus::Failed,
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkflowError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error(transparent)]
    Content(#[from] ContentStoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Course status plus child progress counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowStatus {
    pub course_id: CourseId,
    pub status: GenerationStatus,
    pub error: Option<String>,
    pub articles_total: usize,
    pub articles_completed: usize,
    pub articles_failed: usize,
    pub quizzes: usize,
}

#[derive(Clone)]
pub struct WorkflowService {
    content: Arc<dyn ContentStore>,
    queue: JobQueue,
}

impl std::fmt::Debug for WorkflowService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowService").finish_non_exhaustive()
    }
}

impl WorkflowService {
    pub fn new(content: Arc<dyn ContentStore>, queue: JobQueue) -> Self {
        Self { content, queue }
    }

    /// Seed a workflow by enqueuing the outline job.
    ///
    /// Also the manual re-trigger for a FAILED course: the outline stage
    /// resumes unfinished articles. The course is claimed by moving it to
    /// IN_PROGRESS in one compare-and-set, so of two concurrent starts only
    /// one enqueues an outline.
    pub async fn start(
        &self,
        course_id: CourseId,
        include_assessments: bool,
    ) -> Result<JobHandle, WorkflowError> {
        let course = self
            .content
            .get_course(course_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("course {course_id}")))?;

        let target = StatusTarget::Course(course_id);
        let previous = match self
            .content
            .transition_status(target, &STARTABLE, GenerationStatus::InProgress)
            .await?
        {
            None => return Err(WorkflowError::NotFound(format!("course {course_id}"))),
            Some(status) if STARTABLE.contains(&status) => status,
            Some(_) => {
                return Err(WorkflowError::Conflict(format!(
                    "course {course_id} is already being generated"
                )));
            }
        };

        let workflow_id = WorkflowId::new();
        let enqueued = self
            .queue
            .enqueue(
                JobPayload::Outline(OutlineJob {
                    workflow_id,
                    course_id,
                    course_title: course.title,
                    course_description: course.description,
                    level: course.level,
                    include_assessments,
                }),
                EnqueueOptions::default(),
            )
            .await;

        let handle = match enqueued {
            Ok(handle) => handle,
            Err(e) => {
                // Release the claim so the course is not left IN_PROGRESS with no job.
                if let Err(release) = self
                    .content
                    .set_status(target, previous, course.generation_error)
                    .await
                {
                    warn!(%course_id, error = %release, "could not release workflow claim");
                }
                return Err(e.into());
            }
        };

        info!(%workflow_id, %course_id, job_id = %handle.id, include_assessments, "workflow started");
        Ok(handle)
    }

    pub async fn status(&self, course_id: CourseId) -> Result<WorkflowStatus, WorkflowError> {
        let course = self
            .content
            .get_course(course_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("course {course_id}")))?;
        let articles = self.content.list_articles(course_id).await?;
        let quizzes = self.content.list_quizzes(course_id).await?;

        Ok(WorkflowStatus {
            course_id,
            status: course.generation_status,
            error: course.generation_error,
            articles_total: articles.len(),
            articles_completed: articles.iter().filter(|a| a.is_finished()).count(),
            articles_failed: articles
                .iter()
                .filter(|a| a.generation_status == GenerationStatus::Failed)
                .count(),
            quizzes: quizzes.len(),
        })
    }

    /// Enqueue one assessment stage by hand.
    ///
    /// `target_id` names the article or section for those kinds and is
    /// ignored for course-level kinds. Prerequisites are checked here so a
    /// bad request is rejected instead of failing the owner.
    pub async fn request_quiz(
        &self,
        course_id: CourseId,
        kind: QuizKind,
        target_id: Option<Uuid>,
        regenerate: bool,
    ) -> Result<JobHandle, WorkflowError> {
        let course = self
            .content
            .get_course(course_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("course {course_id}")))?;
        let articles = self.content.list_articles(course_id).await?;
        let workflow_id = WorkflowId::new();

        let target = || {
            target_id.ok_or_else(|| {
                WorkflowError::Invalid(format!("{} quiz requires a target_id", kind.as_str()))
            })
        };

        let payload = match kind {
            QuizKind::Article => {
                let article_id = ArticleId::from_uuid(target()?);
                let article = articles
                    .iter()
                    .find(|a| a.id == article_id)
                    .ok_or_else(|| WorkflowError::NotFound(format!("article {article_id}")))?;
                if !article.is_finished() {
                    return Err(WorkflowError::Conflict(format!(
                        "article {article_id} is not finished"
                    )));
                }
                JobPayload::QuizArticle(ArticleQuizJob {
                    workflow_id,
                    course_id,
                    article_id,
                    article_title: article.title.clone(),
                    regenerate,
                })
            }
            QuizKind::Section => {
                let section_id = SectionId::from_uuid(target()?);
                let section = self
                    .content
                    .get_section(section_id)
                    .await?
                    .filter(|s| s.course_id == course_id)
                    .ok_or_else(|| WorkflowError::NotFound(format!("section {section_id}")))?;
                let in_section: Vec<_> = articles
                    .iter()
                    .filter(|a| a.section_id == section_id)
                    .collect();
                if in_section.is_empty() || !in_section.iter().all(|a| a.is_finished()) {
                    return Err(WorkflowError::Conflict(format!(
                        "section {section_id} is not finished"
                    )));
                }
                JobPayload::QuizSection(SectionQuizJob {
                    workflow_id,
                    course_id,
                    section_id,
                    section_title: section.title,
                    regenerate,
                })
            }
            QuizKind::FinalBank | QuizKind::FinalExam => {
                if articles.is_empty() || !articles.iter().all(|a| a.is_finished()) {
                    return Err(WorkflowError::Conflict(format!(
                        "course {course_id} is not finished"
                    )));
                }
                let p = CourseQuizJob {
                    workflow_id,
                    course_id,
                    course_title: course.title,
                    regenerate,
                };
                if kind == QuizKind::FinalBank {
                    JobPayload::QuizFinalBank(p)
                } else {
                    if self
                        .content
                        .find_quiz(QuizKind::FinalBank, *course_id.as_uuid())
                        .await?
                        .is_none()
                    {
                        return Err(WorkflowError::Conflict(format!(
                            "course {course_id} has no question bank"
                        )));
                    }
                    JobPayload::QuizFinalExam(p)
                }
            }
        };

        let handle = self.queue.enqueue(payload, EnqueueOptions::default()).await?;
        info!(
            %course_id,
            kind = kind.as_str(),
            regenerate,
            job_id = %handle.id,
            "assessment requested"
        );
        Ok(handle)
    }
}
