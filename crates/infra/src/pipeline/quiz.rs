//! Assessment stages. Each checks for an existing quiz of its kind before
//! calling the generator and only replaces one when asked to regenerate.

use async_trait::async_trait;

use coursegen_ai::{ExamSelection, GeneratedOutput, InteractionType, QuizDraft, prompt};
use coursegen_core::{CourseId, GenerationStatus};

use crate::content::{ArticleRecord, QuizKind, StatusTarget};
use crate::error::StageError;
use crate::jobs::{CourseQuizJob, Job, JobPayload, JobType};

use super::stage::{StageContext, StageHandler, StageOutcome, unexpected_payload};

fn summaries(articles: &[ArticleRecord]) -> Vec<String> {
    articles
        .iter()
        .map(|a| match &a.enrichment {
            Some(e) => format!("{}: {}", a.title, e.summary),
            None => a.title.clone(),
        })
        .collect()
}

fn require_finished(articles: &[ArticleRecord], scope: &str) -> Result<(), StageError> {
    if articles.is_empty() {
        return Err(StageError::consistency(format!("{scope} has no articles")));
    }
    let unfinished = articles.iter().filter(|a| !a.is_finished()).count();
    if unfinished > 0 {
        return Err(StageError::consistency(format!(
            "{scope} has {unfinished} unfinished article(s)"
        )));
    }
    Ok(())
}

pub struct ArticleQuizStage {
    ctx: StageContext,
}

impl ArticleQuizStage {
    pub fn new(ctx: StageContext) -> Self {
        Self { ctx }
    }

    async fn settle(&self, article: &ArticleRecord) -> Result<(), StageError> {
        self.ctx
            .content
            .set_status(
                StatusTarget::Article(article.id),
                GenerationStatus::Completed,
                None,
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl StageHandler for ArticleQuizStage {
    fn job_type(&self) -> JobType {
        JobType::QuizArticle
    }

    async fn handle(&self, job: &Job) -> Result<StageOutcome, StageError> {
        let JobPayload::QuizArticle(p) = &job.payload else {
            return Err(unexpected_payload(JobType::QuizArticle, job));
        };

        let article = self.ctx.owned_article(p.course_id, p.article_id).await?;
        require_finished(std::slice::from_ref(&article), &format!("article {}", article.id))?;
        let owner = *article.id.as_uuid();

        if self
            .ctx
            .existing_quiz(QuizKind::Article, owner, p.regenerate)
            .await?
            .is_some()
        {
            self.settle(&article).await?;
            return Ok(StageOutcome::skipped());
        }

        let body = article.content.as_deref().unwrap_or_default();
        let raw = self
            .ctx
            .gateway
            .generate(
                InteractionType::ArticleQuiz,
                prompt::article_quiz(&article.title, body, self.ctx.quizzes.article_questions),
                &[("article_title", article.title.as_str())],
            )
            .await?;
        let draft = QuizDraft::parse(&raw)?;

        let stored = self
            .ctx
            .store_quiz(
                p.course_id,
                QuizKind::Article,
                owner,
                draft.questions,
                p.regenerate,
            )
            .await?;
        self.settle(&article).await?;
        Ok(if stored {
            StageOutcome::done()
        } else {
            StageOutcome::skipped()
        })
    }
}

pub struct SectionQuizStage {
    ctx: StageContext,
}

impl SectionQuizStage {
    pub fn new(ctx: StageContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl StageHandler for SectionQuizStage {
    fn job_type(&self) -> JobType {
        JobType::QuizSection
    }

    async fn handle(&self, job: &Job) -> Result<StageOutcome, StageError> {
        let JobPayload::QuizSection(p) = &job.payload else {
            return Err(unexpected_payload(JobType::QuizSection, job));
        };

        let section = self
            .ctx
            .content
            .get_section(p.section_id)
            .await?
            .ok_or_else(|| StageError::consistency(format!("section {} not found", p.section_id)))?;
        if section.course_id != p.course_id {
            return Err(StageError::consistency(format!(
                "section {} belongs to course {}, not {}",
                section.id, section.course_id, p.course_id
            )));
        }

        let owner = *section.id.as_uuid();
        if self
            .ctx
            .existing_quiz(QuizKind::Section, owner, p.regenerate)
            .await?
            .is_some()
        {
            self.ctx.finalize_course(p.course_id).await?;
            return Ok(StageOutcome::skipped());
        }

        let articles: Vec<ArticleRecord> = self
            .ctx
            .content
            .list_articles(p.course_id)
            .await?
            .into_iter()
            .filter(|a| a.section_id == section.id)
            .collect();
        require_finished(&articles, &format!("section {}", section.id))?;

        let raw = self
            .ctx
            .gateway
            .generate(
                InteractionType::SectionQuiz,
                prompt::section_quiz(
                    &section.title,
                    &summaries(&articles),
                    self.ctx.quizzes.section_questions,
                ),
                &[("section_title", section.title.as_str())],
            )
            .await?;
        let draft = QuizDraft::parse(&raw)?;

        let stored = self
            .ctx
            .store_quiz(
                p.course_id,
                QuizKind::Section,
                owner,
                draft.questions,
                p.regenerate,
            )
            .await?;
        self.ctx.finalize_course(p.course_id).await?;
        Ok(if stored {
            StageOutcome::done()
        } else {
            StageOutcome::skipped()
        })
    }
}

/// Course-wide question bank; always followed by the final exam.
pub struct FinalBankStage {
    ctx: StageContext,
}

impl FinalBankStage {
    pub fn new(ctx: StageContext) -> Self {
        Self { ctx }
    }
}

fn exam_job(p: &CourseQuizJob) -> JobPayload {
    JobPayload::QuizFinalExam(p.clone())
}

#[async_trait]
impl StageHandler for FinalBankStage {
    fn job_type(&self) -> JobType {
        JobType::QuizFinalBank
    }

    async fn handle(&self, job: &Job) -> Result<StageOutcome, StageError> {
        let JobPayload::QuizFinalBank(p) = &job.payload else {
            return Err(unexpected_payload(JobType::QuizFinalBank, job));
        };

        let course = self.ctx.course(p.course_id).await?;
        let owner = *course.id.as_uuid();

        // The exam stage has its own guard, so it is enqueued even on skip
        // in case an earlier run stopped between the two.
        if self
            .ctx
            .existing_quiz(QuizKind::FinalBank, owner, p.regenerate)
            .await?
            .is_some()
        {
            self.ctx.finalize_course(course.id).await?;
            return Ok(StageOutcome::skipped().with_follow_ups(vec![exam_job(p)]));
        }

        let articles = self.ctx.content.list_articles(course.id).await?;
        require_finished(&articles, &format!("course {}", course.id))?;

        let raw = self
            .ctx
            .gateway
            .generate(
                InteractionType::FinalQuestionBank,
                prompt::final_question_bank(
                    &course.title,
                    &summaries(&articles),
                    self.ctx.quizzes.bank_questions,
                ),
                &[("course_title", course.title.as_str())],
            )
            .await?;
        let draft = QuizDraft::parse(&raw)?;

        self.ctx
            .store_quiz(
                course.id,
                QuizKind::FinalBank,
                owner,
                draft.questions,
                p.regenerate,
            )
            .await?;
        self.ctx.finalize_course(course.id).await?;
        Ok(StageOutcome::then(vec![exam_job(p)]))
    }
}

/// Final exam: a selection of questions from the stored bank.
pub struct FinalExamStage {
    ctx: StageContext,
}

impl FinalExamStage {
    pub fn new(ctx: StageContext) -> Self {
        Self { ctx }
    }

    async fn finish(
        &self,
        course_id: CourseId,
        outcome: StageOutcome,
    ) -> Result<StageOutcome, StageError> {
        self.ctx.finalize_course(course_id).await?;
        Ok(outcome)
    }
}

#[async_trait]
impl StageHandler for FinalExamStage {
    fn job_type(&self) -> JobType {
        JobType::QuizFinalExam
    }

    async fn handle(&self, job: &Job) -> Result<StageOutcome, StageError> {
        let JobPayload::QuizFinalExam(p) = &job.payload else {
            return Err(unexpected_payload(JobType::QuizFinalExam, job));
        };

        let course = self.ctx.course(p.course_id).await?;
        let owner = *course.id.as_uuid();

        if self
            .ctx
            .existing_quiz(QuizKind::FinalExam, owner, p.regenerate)
            .await?
            .is_some()
        {
            return self.finish(course.id, StageOutcome::skipped()).await;
        }

        let bank = self
            .ctx
            .content
            .find_quiz(QuizKind::FinalBank, owner)
            .await?
            .ok_or_else(|| {
                StageError::consistency(format!("course {} has no question bank", course.id))
            })?;

        let wanted = self.ctx.quizzes.exam_questions.min(bank.questions.len());
        let raw = self
            .ctx
            .gateway
            .generate(
                InteractionType::FinalExam,
                prompt::final_exam(&course.title, &bank.questions, wanted),
                &[("course_title", course.title.as_str())],
            )
            .await?;
        let selection = ExamSelection::parse(&raw)?;
        let questions = selection.select(&bank.questions)?;

        let stored = self
            .ctx
            .store_quiz(
                course.id,
                QuizKind::FinalExam,
                owner,
                questions,
                p.regenerate,
            )
            .await?;
        let outcome = if stored {
            StageOutcome::done()
        } else {
            StageOutcome::skipped()
        };
        self.finish(course.id, outcome).await
    }
}
