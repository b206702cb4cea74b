use async_trait::async_trait;
use tracing::info;

use coursegen_ai::{Enrichment, GeneratedOutput, InteractionType, parse_article_body, prompt};
use coursegen_core::GenerationStatus;

use crate::content::StatusTarget;
use crate::error::StageError;
use crate::jobs::{ArticleJob, ArticleQuizJob, CourseQuizJob, Job, JobPayload, JobType, SectionQuizJob};

use super::stage::{StageContext, StageHandler, StageOutcome, unexpected_payload};

/// Writes an article body, then hands off to enrichment.
pub struct ArticleContentStage {
    ctx: StageContext,
}

impl ArticleContentStage {
    pub fn new(ctx: StageContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl StageHandler for ArticleContentStage {
    fn job_type(&self) -> JobType {
        JobType::ArticleContent
    }

    async fn handle(&self, job: &Job) -> Result<StageOutcome, StageError> {
        let JobPayload::ArticleContent(p) = &job.payload else {
            return Err(unexpected_payload(JobType::ArticleContent, job));
        };

        let article = self.ctx.owned_article(p.course_id, p.article_id).await?;
        if article.section_id != p.section_id {
            return Err(StageError::consistency(format!(
                "article {} is not in section {}",
                p.article_id, p.section_id
            )));
        }

        // Redelivered after the body was saved: go straight to enrichment.
        if article.content.is_some() {
            return Ok(StageOutcome::skipped()
                .with_follow_ups(vec![JobPayload::Enrichment(p.clone())]));
        }

        let raw = self
            .ctx
            .gateway
            .generate(
                InteractionType::ArticleContent,
                prompt::article_content(
                    &p.course_title,
                    &p.section_title,
                    &p.article_title,
                    &p.article_description,
                    &p.level,
                ),
                &[
                    ("course_title", p.course_title.as_str()),
                    ("article_title", p.article_title.as_str()),
                ],
            )
            .await?;
        let body = parse_article_body(&raw)?;
        let bytes = body.len();
        self.ctx.content.save_article_content(article.id, body).await?;

        info!(article_id = %article.id, bytes, "article content stored");
        Ok(StageOutcome::then(vec![JobPayload::Enrichment(p.clone())]))
    }
}

/// Generates summary material and completes the article.
///
/// With assessments enabled it also enqueues the article quiz, the section
/// quiz once the whole section is done, and the final bank once the course is.
pub struct EnrichmentStage {
    ctx: StageContext,
}

impl EnrichmentStage {
    pub fn new(ctx: StageContext) -> Self {
        Self { ctx }
    }

    async fn complete(&self, p: &ArticleJob, skipped: bool) -> Result<StageOutcome, StageError> {
        self.ctx
            .content
            .set_status(
                StatusTarget::Article(p.article_id),
                GenerationStatus::Completed,
                None,
            )
            .await?;

        let course_done = self.ctx.finalize_course(p.course_id).await?;

        let mut follow_ups = Vec::new();
        if p.include_assessments {
            follow_ups.push(JobPayload::QuizArticle(ArticleQuizJob {
                workflow_id: p.workflow_id,
                course_id: p.course_id,
                article_id: p.article_id,
                article_title: p.article_title.clone(),
                regenerate: false,
            }));

            let section_done = self
                .ctx
                .content
                .list_articles(p.course_id)
                .await?
                .iter()
                .filter(|a| a.section_id == p.section_id)
                .all(|a| a.is_finished());
            if section_done {
                follow_ups.push(JobPayload::QuizSection(SectionQuizJob {
                    workflow_id: p.workflow_id,
                    course_id: p.course_id,
                    section_id: p.section_id,
                    section_title: p.section_title.clone(),
                    regenerate: false,
                }));
            }

            if course_done {
                follow_ups.push(JobPayload::QuizFinalBank(CourseQuizJob {
                    workflow_id: p.workflow_id,
                    course_id: p.course_id,
                    course_title: p.course_title.clone(),
                    regenerate: false,
                }));
            }
        }

        let outcome = if skipped {
            StageOutcome::skipped()
        } else {
            StageOutcome::done()
        };
        Ok(outcome.with_follow_ups(follow_ups))
    }
}

#[async_trait]
impl StageHandler for EnrichmentStage {
    fn job_type(&self) -> JobType {
        JobType::Enrichment
    }

    async fn handle(&self, job: &Job) -> Result<StageOutcome, StageError> {
        let JobPayload::Enrichment(p) = &job.payload else {
            return Err(unexpected_payload(JobType::Enrichment, job));
        };

        let article = self.ctx.owned_article(p.course_id, p.article_id).await?;
        let Some(body) = article.content.as_deref() else {
            return Err(StageError::consistency(format!(
                "article {} has no content to enrich",
                article.id
            )));
        };

        if article.enrichment.is_some() {
            return self.complete(p, true).await;
        }

        let raw = self
            .ctx
            .gateway
            .generate(
                InteractionType::Enrichment,
                prompt::enrichment(&article.title, body),
                &[("article_title", article.title.as_str())],
            )
            .await?;
        let enrichment = Enrichment::parse(&raw)?;
        self.ctx
            .content
            .save_enrichment(article.id, enrichment)
            .await?;

        info!(article_id = %article.id, "enrichment stored");
        self.complete(p, false).await
    }
}
