use std::collections::HashMap;

use async_trait::async_trait;
use tracing::info;

use coursegen_ai::{CourseOutline, GeneratedOutput, InteractionType, prompt};
use coursegen_core::{GenerationStatus, SectionId};

use crate::content::{ArticleRecord, ContentStoreError, NewArticle, NewSection, StatusTarget};
use crate::error::StageError;
use crate::jobs::{ArticleJob, CourseQuizJob, Job, JobPayload, JobType, OutlineJob};

use super::stage::{StageContext, StageHandler, StageOutcome, unexpected_payload};

/// Plans the course and fans out one `article_content` job per article.
///
/// Re-running against a course that already has an outline reuses it and
/// only re-enqueues unfinished articles.
pub struct OutlineStage {
    ctx: StageContext,
}

impl OutlineStage {
    pub fn new(ctx: StageContext) -> Self {
        Self { ctx }
    }

    async fn resume(
        &self,
        p: &OutlineJob,
        articles: Vec<ArticleRecord>,
    ) -> Result<StageOutcome, StageError> {
        let sections = self.section_titles(p).await?;

        let mut follow_ups = Vec::new();
        for article in articles.iter().filter(|a| !a.is_finished()) {
            if article.generation_status == GenerationStatus::Failed {
                self.ctx
                    .content
                    .set_status(
                        StatusTarget::Article(article.id),
                        GenerationStatus::Pending,
                        None,
                    )
                    .await?;
            }
            let section_title = sections.get(&article.section_id).ok_or_else(|| {
                StageError::consistency(format!(
                    "article {} references missing section {}",
                    article.id, article.section_id
                ))
            })?;
            let job = article_job(p, article, section_title);
            follow_ups.push(if article.content.is_some() {
                JobPayload::Enrichment(job)
            } else {
                JobPayload::ArticleContent(job)
            });
        }

        info!(
            course_id = %p.course_id,
            articles = articles.len(),
            resumed = follow_ups.len(),
            "reusing existing outline"
        );

        if follow_ups.is_empty()
            && self.ctx.finalize_course(p.course_id).await?
            && p.include_assessments
        {
            follow_ups.push(JobPayload::QuizFinalBank(CourseQuizJob {
                workflow_id: p.workflow_id,
                course_id: p.course_id,
                course_title: p.course_title.clone(),
                regenerate: false,
            }));
        }
        Ok(StageOutcome::then(follow_ups))
    }

    async fn section_titles(
        &self,
        p: &OutlineJob,
    ) -> Result<HashMap<SectionId, String>, StageError> {
        Ok(self
            .ctx
            .content
            .list_sections(p.course_id)
            .await?
            .into_iter()
            .map(|s| (s.id, s.title))
            .collect())
    }

    fn fan_out(
        p: &OutlineJob,
        articles: &[ArticleRecord],
        sections: &HashMap<SectionId, String>,
    ) -> Result<Vec<JobPayload>, StageError> {
        articles
            .iter()
            .map(|article| {
                let section_title = sections.get(&article.section_id).ok_or_else(|| {
                    StageError::consistency(format!(
                        "article {} references missing section {}",
                        article.id, article.section_id
                    ))
                })?;
                Ok(JobPayload::ArticleContent(article_job(p, article, section_title)))
            })
            .collect()
    }
}

fn article_job(p: &OutlineJob, article: &ArticleRecord, section_title: &str) -> ArticleJob {
    ArticleJob {
        workflow_id: p.workflow_id,
        course_id: p.course_id,
        section_id: article.section_id,
        article_id: article.id,
        course_title: p.course_title.clone(),
        section_title: section_title.to_string(),
        article_title: article.title.clone(),
        article_description: article.description.clone(),
        level: p.level.clone(),
        include_assessments: p.include_assessments,
    }
}

#[async_trait]
impl StageHandler for OutlineStage {
    fn job_type(&self) -> JobType {
        JobType::Outline
    }

    async fn handle(&self, job: &Job) -> Result<StageOutcome, StageError> {
        let JobPayload::Outline(p) = &job.payload else {
            return Err(unexpected_payload(JobType::Outline, job));
        };

        let course = self.ctx.course(p.course_id).await?;

        let existing = self.ctx.content.list_articles(course.id).await?;
        if !existing.is_empty() {
            return self.resume(p, existing).await;
        }

        let raw = self
            .ctx
            .gateway
            .generate(
                InteractionType::Outline,
                prompt::outline(&course.title, &course.description, &course.level),
                &[
                    ("course_title", course.title.as_str()),
                    ("level", course.level.as_str()),
                ],
            )
            .await?;
        let outline = CourseOutline::parse(&raw)?;

        let sections: Vec<NewSection> = outline
            .sections
            .iter()
            .map(|s| NewSection {
                title: s.title.clone(),
                description: s.description.clone(),
                articles: s
                    .articles
                    .iter()
                    .map(|a| NewArticle {
                        title: a.title.clone(),
                        description: a.description.clone(),
                    })
                    .collect(),
            })
            .collect();

        let articles = match self.ctx.content.create_outline(course.id, sections).await {
            Ok(articles) => articles,
            // Another delivery of this job persisted an outline first.
            Err(ContentStoreError::Conflict(_)) => {
                let existing = self.ctx.content.list_articles(course.id).await?;
                return self.resume(p, existing).await;
            }
            Err(e) => return Err(e.into()),
        };

        let sections = self.section_titles(p).await?;
        let follow_ups = Self::fan_out(p, &articles, &sections)?;

        info!(
            course_id = %course.id,
            sections = outline.sections.len(),
            articles = articles.len(),
            "outline stored"
        );
        Ok(StageOutcome::then(follow_ups))
    }
}
