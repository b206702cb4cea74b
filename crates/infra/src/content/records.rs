use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use coursegen_ai::{Enrichment, QuizQuestion};
use coursegen_core::{ArticleId, CourseId, DomainError, GenerationStatus, QuizId, SectionId};

/// Entity whose `generation_status` a job drives.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum StatusTarget {
    Course(CourseId),
    Article(ArticleId),
}

impl std::fmt::Display for StatusTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusTarget::Course(id) => write!(f, "course:{id}"),
            StatusTarget::Article(id) => write!(f, "article:{id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseRecord {
    pub id: CourseId,
    pub title: String,
    pub description: String,
    pub level: String,
    pub generation_status: GenerationStatus,
    pub generation_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl CourseRecord {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        level: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: CourseId::new(),
            title: title.into(),
            description: description.into(),
            level: level.into(),
            generation_status: GenerationStatus::Pending,
            generation_error: None,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionRecord {
    pub id: SectionId,
    pub course_id: CourseId,
    pub position: u32,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleRecord {
    pub id: ArticleId,
    pub course_id: CourseId,
    pub section_id: SectionId,
    pub position: u32,
    pub title: String,
    pub description: String,
    pub content: Option<String>,
    pub enrichment: Option<Enrichment>,
    pub generation_status: GenerationStatus,
    pub generation_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ArticleRecord {
    /// Body and enrichment are both stored; quizzes are optional extras.
    pub fn is_finished(&self) -> bool {
        self.content.is_some() && self.enrichment.is_some()
    }
}

/// Outline section to persist, with its planned articles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSection {
    pub title: String,
    pub description: String,
    pub articles: Vec<NewArticle>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewArticle {
    pub title: String,
    pub description: String,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuizKind {
    Article,
    Section,
    FinalBank,
    FinalExam,
}

impl QuizKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuizKind::Article => "article",
            QuizKind::Section => "section",
            QuizKind::FinalBank => "final_bank",
            QuizKind::FinalExam => "final_exam",
        }
    }
}

impl std::str::FromStr for QuizKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "article" => Ok(QuizKind::Article),
            "section" => Ok(QuizKind::Section),
            "final_bank" => Ok(QuizKind::FinalBank),
            "final_exam" => Ok(QuizKind::FinalExam),
            other => Err(DomainError::validation(format!("unknown quiz kind: {other}"))),
        }
    }
}

/// A generated quiz. At most one exists per `(kind, owner_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizRecord {
    pub id: QuizId,
    pub course_id: CourseId,
    pub kind: QuizKind,
    /// Article, section or course id depending on `kind`.
    pub owner_id: Uuid,
    pub questions: Vec<QuizQuestion>,
    pub created_at: DateTime<Utc>,
}
