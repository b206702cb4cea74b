//! Content store abstraction and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use uuid::Uuid;

use coursegen_ai::Enrichment;
use coursegen_core::{ArticleId, CourseId, GenerationStatus, SectionId, SharedClock, SystemClock};

use super::records::{
    ArticleRecord, CourseRecord, NewSection, QuizKind, QuizRecord, SectionRecord, StatusTarget,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContentStoreError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("storage error: {0}")]
    Storage(String),
}

/// CRUD surface the pipeline needs from the content system.
#[async_trait]
pub trait ContentStore: Send + Sync + 'static {
    async fn insert_course(&self, course: CourseRecord) -> Result<(), ContentStoreError>;

    async fn get_course(&self, id: CourseId) -> Result<Option<CourseRecord>, ContentStoreError>;

    /// Current status of a course or article (`None` if the entity does not exist).
    async fn status_of(
        &self,
        target: StatusTarget,
    ) -> Result<Option<GenerationStatus>, ContentStoreError>;

    /// Set status and error message. Completing or resetting clears the error.
    async fn set_status(
        &self,
        target: StatusTarget,
        status: GenerationStatus,
        error: Option<String>,
    ) -> Result<(), ContentStoreError>;

    /// Compare-and-set: move `target` to `to` only while its status is one of `from`.
    ///
    /// Returns the status found before the write (`None` if the entity does
    /// not exist). The write happened exactly when that status is in `from`.
    async fn transition_status(
        &self,
        target: StatusTarget,
        from: &[GenerationStatus],
        to: GenerationStatus,
    ) -> Result<Option<GenerationStatus>, ContentStoreError>;

    /// Persist an outline atomically. Fails with `Conflict` if the course already has one.
    async fn create_outline(
        &self,
        course_id: CourseId,
        sections: Vec<NewSection>,
    ) -> Result<Vec<ArticleRecord>, ContentStoreError>;

    async fn list_sections(&self, course_id: CourseId)
    -> Result<Vec<SectionRecord>, ContentStoreError>;

    async fn get_section(&self, id: SectionId) -> Result<Option<SectionRecord>, ContentStoreError>;

    /// Articles of a course ordered by section position, then article position.
    async fn list_articles(&self, course_id: CourseId)
    -> Result<Vec<ArticleRecord>, ContentStoreError>;

    async fn get_article(&self, id: ArticleId) -> Result<Option<ArticleRecord>, ContentStoreError>;

    async fn save_article_content(
        &self,
        id: ArticleId,
        content: String,
    ) -> Result<(), ContentStoreError>;

    async fn save_enrichment(
        &self,
        id: ArticleId,
        enrichment: Enrichment,
    ) -> Result<(), ContentStoreError>;

    async fn find_quiz(
        &self,
        kind: QuizKind,
        owner_id: Uuid,
    ) -> Result<Option<QuizRecord>, ContentStoreError>;

    /// Insert a quiz. Fails with `Conflict` if one already exists for `(kind, owner_id)`.
    async fn insert_quiz(&self, quiz: QuizRecord) -> Result<(), ContentStoreError>;

    /// Atomically drop any quiz for `(kind, owner_id)` and insert this one.
    async fn replace_quiz(&self, quiz: QuizRecord) -> Result<(), ContentStoreError>;

    async fn list_quizzes(&self, course_id: CourseId) -> Result<Vec<QuizRecord>, ContentStoreError>;
}

#[derive(Debug, Default)]
struct Inner {
    courses: HashMap<CourseId, CourseRecord>,
    sections: HashMap<SectionId, SectionRecord>,
    articles: HashMap<ArticleId, ArticleRecord>,
    quizzes: HashMap<(QuizKind, Uuid), QuizRecord>,
}

/// In-memory content store for tests/dev.
pub struct InMemoryContentStore {
    inner: RwLock<Inner>,
    clock: SharedClock,
}

impl Default for InMemoryContentStore {
    fn default() -> Self {
        Self {
            inner: RwLock::default(),
            clock: SystemClock::shared(),
        }
    }
}

impl std::fmt::Debug for InMemoryContentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryContentStore")
            .field("courses", &self.inner.read().unwrap().courses.len())
            .finish_non_exhaustive()
    }
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Stamp `updated_at` from `clock` instead of the system clock.
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn insert_course(&self, course: CourseRecord) -> Result<(), ContentStoreError> {
        let mut inner = self.inner.write().unwrap();
        if inner.courses.contains_key(&course.id) {
            return Err(ContentStoreError::Conflict(format!(
                "course {} already exists",
                course.id
            )));
        }
        inner.courses.insert(course.id, course);
        Ok(())
    }

    async fn get_course(&self, id: CourseId) -> Result<Option<CourseRecord>, ContentStoreError> {
        Ok(self.inner.read().unwrap().courses.get(&id).cloned())
    }

    async fn status_of(
        &self,
        target: StatusTarget,
    ) -> Result<Option<GenerationStatus>, ContentStoreError> {
        let inner = self.inner.read().unwrap();
        Ok(match target {
            StatusTarget::Course(id) => inner.courses.get(&id).map(|c| c.generation_status),
            StatusTarget::Article(id) => inner.articles.get(&id).map(|a| a.generation_status),
        })
    }

    async fn set_status(
        &self,
        target: StatusTarget,
        status: GenerationStatus,
        error: Option<String>,
    ) -> Result<(), ContentStoreError> {
        let now = self.clock.now();
        let mut inner = self.inner.write().unwrap();
        match target {
            StatusTarget::Course(id) => {
                let course = inner
                    .courses
                    .get_mut(&id)
                    .ok_or_else(|| ContentStoreError::NotFound(format!("course {id}")))?;
                course.generation_status = status;
                course.generation_error = error;
                course.updated_at = now;
            }
            StatusTarget::Article(id) => {
                let article = inner
                    .articles
                    .get_mut(&id)
                    .ok_or_else(|| ContentStoreError::NotFound(format!("article {id}")))?;
                article.generation_status = status;
                article.generation_error = error;
                article.updated_at = now;
            }
        }
        Ok(())
    }

    async fn transition_status(
        &self,
        target: StatusTarget,
        from: &[GenerationStatus],
        to: GenerationStatus,
    ) -> Result<Option<GenerationStatus>, ContentStoreError> {
        let now = self.clock.now();
        let mut inner = self.inner.write().unwrap();
        let slot = match target {
            StatusTarget::Course(id) => inner
                .courses
                .get_mut(&id)
                .map(|c| (&mut c.generation_status, &mut c.generation_error, &mut c.updated_at)),
            StatusTarget::Article(id) => inner
                .articles
                .get_mut(&id)
                .map(|a| (&mut a.generation_status, &mut a.generation_error, &mut a.updated_at)),
        };
        let Some((status, error, updated_at)) = slot else {
            return Ok(None);
        };

        let found = *status;
        if from.contains(&found) {
            *status = to;
            *error = None;
            *updated_at = now;
        }
        Ok(Some(found))
    }

    async fn create_outline(
        &self,
        course_id: CourseId,
        sections: Vec<NewSection>,
    ) -> Result<Vec<ArticleRecord>, ContentStoreError> {
        let mut inner = self.inner.write().unwrap();
        if !inner.courses.contains_key(&course_id) {
            return Err(ContentStoreError::NotFound(format!("course {course_id}")));
        }
        if inner.sections.values().any(|s| s.course_id == course_id) {
            return Err(ContentStoreError::Conflict(format!(
                "course {course_id} already has an outline"
            )));
        }

        let now = self.clock.now();
        let mut created = Vec::new();
        for (section_pos, section) in sections.into_iter().enumerate() {
            let section_id = SectionId::new();
            inner.sections.insert(
                section_id,
                SectionRecord {
                    id: section_id,
                    course_id,
                    position: section_pos as u32,
                    title: section.title,
                    description: section.description,
                },
            );

            for (article_pos, article) in section.articles.into_iter().enumerate() {
                let record = ArticleRecord {
                    id: ArticleId::new(),
                    course_id,
                    section_id,
                    position: article_pos as u32,
                    title: article.title,
                    description: article.description,
                    content: None,
                    enrichment: None,
                    generation_status: GenerationStatus::Pending,
                    generation_error: None,
                    updated_at: now,
                };
                inner.articles.insert(record.id, record.clone());
                created.push(record);
            }
        }

        Ok(created)
    }

    async fn list_sections(
        &self,
        course_id: CourseId,
    ) -> Result<Vec<SectionRecord>, ContentStoreError> {
        let inner = self.inner.read().unwrap();
        let mut sections: Vec<_> = inner
            .sections
            .values()
            .filter(|s| s.course_id == course_id)
            .cloned()
            .collect();
        sections.sort_by_key(|s| s.position);
        Ok(sections)
    }

    async fn get_section(&self, id: SectionId) -> Result<Option<SectionRecord>, ContentStoreError> {
        Ok(self.inner.read().unwrap().sections.get(&id).cloned())
    }

    async fn list_articles(
        &self,
        course_id: CourseId,
    ) -> Result<Vec<ArticleRecord>, ContentStoreError> {
        let inner = self.inner.read().unwrap();
        let mut articles: Vec<_> = inner
            .articles
            .values()
            .filter(|a| a.course_id == course_id)
            .cloned()
            .collect();
        articles.sort_by_key(|a| {
            let section_pos = inner.sections.get(&a.section_id).map_or(u32::MAX, |s| s.position);
            (section_pos, a.position)
        });
        Ok(articles)
    }

    async fn get_article(&self, id: ArticleId) -> Result<Option<ArticleRecord>, ContentStoreError> {
        Ok(self.inner.read().unwrap().articles.get(&id).cloned())
    }

    async fn save_article_content(
        &self,
        id: ArticleId,
        content: String,
    ) -> Result<(), ContentStoreError> {
        let mut inner = self.inner.write().unwrap();
        let article = inner
            .articles
            .get_mut(&id)
            .ok_or_else(|| ContentStoreError::NotFound(format!("article {id}")))?;
        article.content = Some(content);
        article.updated_at = self.clock.now();
        Ok(())
    }

    async fn save_enrichment(
        &self,
        id: ArticleId,
        enrichment: Enrichment,
    ) -> Result<(), ContentStoreError> {
        let mut inner = self.inner.write().unwrap();
        let article = inner
            .articles
            .get_mut(&id)
            .ok_or_else(|| ContentStoreError::NotFound(format!("article {id}")))?;
        article.enrichment = Some(enrichment);
        article.updated_at = self.clock.now();
        Ok(())
    }

    async fn find_quiz(
        &self,
        kind: QuizKind,
        owner_id: Uuid,
    ) -> Result<Option<QuizRecord>, ContentStoreError> {
        Ok(self.inner.read().unwrap().quizzes.get(&(kind, owner_id)).cloned())
    }

    async fn insert_quiz(&self, quiz: QuizRecord) -> Result<(), ContentStoreError> {
        let mut inner = self.inner.write().unwrap();
        let key = (quiz.kind, quiz.owner_id);
        if inner.quizzes.contains_key(&key) {
            return Err(ContentStoreError::Conflict(format!(
                "{} quiz already exists for {}",
                quiz.kind.as_str(),
                quiz.owner_id
            )));
        }
        inner.quizzes.insert(key, quiz);
        Ok(())
    }

    async fn replace_quiz(&self, quiz: QuizRecord) -> Result<(), ContentStoreError> {
        let mut inner = self.inner.write().unwrap();
        inner.quizzes.insert((quiz.kind, quiz.owner_id), quiz);
        Ok(())
    }

    async fn list_quizzes(&self, course_id: CourseId) -> Result<Vec<QuizRecord>, ContentStoreError> {
        let inner = self.inner.read().unwrap();
        let mut quizzes: Vec<_> = inner
            .quizzes
            .values()
            .filter(|q| q.course_id == course_id)
            .cloned()
            .collect();
        quizzes.sort_by_key(|q| q.created_at);
        Ok(quizzes)
    }
}
