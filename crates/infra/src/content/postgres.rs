//! Postgres-backed content store.
//!
//! Quiz uniqueness is enforced by `UNIQUE (kind, owner_id)` on `course_quizzes`,
//! so two workers racing on the same quiz stage cannot both insert.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use coursegen_ai::{Enrichment, QuizQuestion};
use coursegen_core::{
    ArticleId, CourseId, GenerationStatus, QuizId, SectionId, SharedClock, SystemClock,
};

use super::records::{
    ArticleRecord, CourseRecord, NewSection, QuizKind, QuizRecord, SectionRecord, StatusTarget,
};
use super::store::{ContentStore, ContentStoreError};

#[derive(Clone)]
pub struct PostgresContentStore {
    pool: Arc<PgPool>,
    clock: SharedClock,
}

impl std::fmt::Debug for PostgresContentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresContentStore")
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl PostgresContentStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
            clock: SystemClock::shared(),
        }
    }

    /// Stamp rows created in application code from `clock`.
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> ContentStoreError {
    match err {
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505") => {
            ContentStoreError::Conflict(format!("{operation}: {}", db_err.message()))
        }
        other => ContentStoreError::Storage(format!("{operation}: {other}")),
    }
}

fn parse_status(operation: &str, raw: &str) -> Result<GenerationStatus, ContentStoreError> {
    raw.parse()
        .map_err(|e| ContentStoreError::Storage(format!("{operation}: {e}")))
}

fn course_from_row(row: &PgRow) -> Result<CourseRecord, ContentStoreError> {
    let map = |e: sqlx::Error| map_sqlx_error("decode course", e);
    let status: String = row.try_get("generation_status").map_err(map)?;
    Ok(CourseRecord {
        id: CourseId::from_uuid(row.try_get("id").map_err(map)?),
        title: row.try_get("title").map_err(map)?,
        description: row.try_get("description").map_err(map)?,
        level: row.try_get("level").map_err(map)?,
        generation_status: parse_status("decode course", &status)?,
        generation_error: row.try_get("generation_error").map_err(map)?,
        updated_at: row.try_get("updated_at").map_err(map)?,
    })
}

fn section_from_row(row: &PgRow) -> Result<SectionRecord, ContentStoreError> {
    let map = |e: sqlx::Error| map_sqlx_error("decode section", e);
    let position: i32 = row.try_get("position").map_err(map)?;
    Ok(SectionRecord {
        id: SectionId::from_uuid(row.try_get("id").map_err(map)?),
        course_id: CourseId::from_uuid(row.try_get("course_id").map_err(map)?),
        position: position.max(0) as u32,
        title: row.try_get("title").map_err(map)?,
        description: row.try_get("description").map_err(map)?,
    })
}

fn article_from_row(row: &PgRow) -> Result<ArticleRecord, ContentStoreError> {
    let map = |e: sqlx::Error| map_sqlx_error("decode article", e);
    let position: i32 = row.try_get("position").map_err(map)?;
    let status: String = row.try_get("generation_status").map_err(map)?;
    let enrichment: Option<Json<Enrichment>> = row.try_get("enrichment").map_err(map)?;
    Ok(ArticleRecord {
        id: ArticleId::from_uuid(row.try_get("id").map_err(map)?),
        course_id: CourseId::from_uuid(row.try_get("course_id").map_err(map)?),
        section_id: SectionId::from_uuid(row.try_get("section_id").map_err(map)?),
        position: position.max(0) as u32,
        title: row.try_get("title").map_err(map)?,
        description: row.try_get("description").map_err(map)?,
        content: row.try_get("content").map_err(map)?,
        enrichment: enrichment.map(|j| j.0),
        generation_status: parse_status("decode article", &status)?,
        generation_error: row.try_get("generation_error").map_err(map)?,
        updated_at: row.try_get("updated_at").map_err(map)?,
    })
}

fn quiz_from_row(row: &PgRow) -> Result<QuizRecord, ContentStoreError> {
    let map = |e: sqlx::Error| map_sqlx_error("decode quiz", e);
    let kind: String = row.try_get("kind").map_err(map)?;
    let questions: Json<Vec<QuizQuestion>> = row.try_get("questions").map_err(map)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(map)?;
    Ok(QuizRecord {
        id: QuizId::from_uuid(row.try_get("id").map_err(map)?),
        course_id: CourseId::from_uuid(row.try_get("course_id").map_err(map)?),
        kind: kind
            .parse()
            .map_err(|e| ContentStoreError::Storage(format!("decode quiz: {e}")))?,
        owner_id: row.try_get("owner_id").map_err(map)?,
        questions: questions.0,
        created_at,
    })
}

const ARTICLE_COLUMNS: &str = "a.id, a.course_id, a.section_id, a.position, a.title, a.description, \
     a.content, a.enrichment, a.generation_status, a.generation_error, a.updated_at";

#[async_trait]
impl ContentStore for PostgresContentStore {
    #[instrument(skip(self, course), fields(course_id = %course.id), err)]
    async fn insert_course(&self, course: CourseRecord) -> Result<(), ContentStoreError> {
        sqlx::query(
            r#"
            INSERT INTO courses (id, title, description, level, generation_status, generation_error, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(course.id.as_uuid())
        .bind(&course.title)
        .bind(&course.description)
        .bind(&course.level)
        .bind(course.generation_status.as_str())
        .bind(&course.generation_error)
        .bind(course.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_course", e))?;
        Ok(())
    }

    async fn get_course(&self, id: CourseId) -> Result<Option<CourseRecord>, ContentStoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, title, description, level, generation_status, generation_error, updated_at
            FROM courses
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_course", e))?;

        row.as_ref().map(course_from_row).transpose()
    }

    async fn status_of(
        &self,
        target: StatusTarget,
    ) -> Result<Option<GenerationStatus>, ContentStoreError> {
        let (sql, id) = match target {
            StatusTarget::Course(id) => (
                "SELECT generation_status FROM courses WHERE id = $1",
                *id.as_uuid(),
            ),
            StatusTarget::Article(id) => (
                "SELECT generation_status FROM course_articles WHERE id = $1",
                *id.as_uuid(),
            ),
        };

        let row = sqlx::query(sql)
            .bind(id)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("status_of", e))?;

        match row {
            Some(row) => {
                let raw: String = row
                    .try_get("generation_status")
                    .map_err(|e| map_sqlx_error("status_of", e))?;
                parse_status("status_of", &raw).map(Some)
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self, error), fields(target = %target, status = %status), err)]
    async fn set_status(
        &self,
        target: StatusTarget,
        status: GenerationStatus,
        error: Option<String>,
    ) -> Result<(), ContentStoreError> {
        let (sql, id) = match target {
            StatusTarget::Course(id) => (
                "UPDATE courses SET generation_status = $2, generation_error = $3, updated_at = NOW() WHERE id = $1",
                *id.as_uuid(),
            ),
            StatusTarget::Article(id) => (
                "UPDATE course_articles SET generation_status = $2, generation_error = $3, updated_at = NOW() WHERE id = $1",
                *id.as_uuid(),
            ),
        };

        let result = sqlx::query(sql)
            .bind(id)
            .bind(status.as_str())
            .bind(error)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("set_status", e))?;

        if result.rows_affected() == 0 {
            return Err(ContentStoreError::NotFound(target.to_string()));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(target = %target, to = %to), err)]
    async fn transition_status(
        &self,
        target: StatusTarget,
        from: &[GenerationStatus],
        to: GenerationStatus,
    ) -> Result<Option<GenerationStatus>, ContentStoreError> {
        let (table, id) = match target {
            StatusTarget::Course(id) => ("courses", *id.as_uuid()),
            StatusTarget::Article(id) => ("course_articles", *id.as_uuid()),
        };
        // The row lock makes a concurrent caller re-read the status we wrote.
        let sql = format!(
            r#"
            WITH current AS (
                SELECT id, generation_status FROM {table} WHERE id = $1 FOR UPDATE
            ), moved AS (
                UPDATE {table} t
                SET generation_status = $3, generation_error = NULL, updated_at = NOW()
                FROM current
                WHERE t.id = current.id AND current.generation_status = ANY($2)
            )
            SELECT generation_status FROM current
            "#
        );
        let allowed: Vec<&str> = from.iter().map(|s| s.as_str()).collect();

        let row = sqlx::query(&sql)
            .bind(id)
            .bind(allowed)
            .bind(to.as_str())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("transition_status", e))?;

        match row {
            Some(row) => {
                let raw: String = row
                    .try_get("generation_status")
                    .map_err(|e| map_sqlx_error("transition_status", e))?;
                parse_status("transition_status", &raw).map(Some)
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self, sections), fields(course_id = %course_id, sections = sections.len()), err)]
    async fn create_outline(
        &self,
        course_id: CourseId,
        sections: Vec<NewSection>,
    ) -> Result<Vec<ArticleRecord>, ContentStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("create_outline", e))?;

        // Row lock on the course serializes concurrent outline writers.
        let exists = sqlx::query("SELECT id FROM courses WHERE id = $1 FOR UPDATE")
            .bind(course_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("create_outline", e))?;
        if exists.is_none() {
            return Err(ContentStoreError::NotFound(format!("course {course_id}")));
        }

        let existing = sqlx::query("SELECT 1 FROM course_sections WHERE course_id = $1 LIMIT 1")
            .bind(course_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("create_outline", e))?;
        if existing.is_some() {
            return Err(ContentStoreError::Conflict(format!(
                "course {course_id} already has an outline"
            )));
        }

        let now = self.clock.now();
        let mut created = Vec::new();
        for (section_pos, section) in sections.into_iter().enumerate() {
            let section_id = SectionId::new();
            sqlx::query(
                r#"
                INSERT INTO course_sections (id, course_id, position, title, description)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(section_id.as_uuid())
            .bind(course_id.as_uuid())
            .bind(section_pos as i32)
            .bind(&section.title)
            .bind(&section.description)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("create_outline", e))?;

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

                sqlx::query(
                    r#"
                    INSERT INTO course_articles (
                        id, course_id, section_id, position, title, description,
                        generation_status, updated_at
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                    "#,
                )
                .bind(record.id.as_uuid())
                .bind(course_id.as_uuid())
                .bind(section_id.as_uuid())
                .bind(record.position as i32)
                .bind(&record.title)
                .bind(&record.description)
                .bind(record.generation_status.as_str())
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("create_outline", e))?;

                created.push(record);
            }
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("create_outline", e))?;
        Ok(created)
    }

    async fn list_sections(
        &self,
        course_id: CourseId,
    ) -> Result<Vec<SectionRecord>, ContentStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, course_id, position, title, description
            FROM course_sections
            WHERE course_id = $1
            ORDER BY position ASC
            "#,
        )
        .bind(course_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_sections", e))?;

        rows.iter().map(section_from_row).collect()
    }

    async fn get_section(&self, id: SectionId) -> Result<Option<SectionRecord>, ContentStoreError> {
        let row = sqlx::query(
            "SELECT id, course_id, position, title, description FROM course_sections WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_section", e))?;

        row.as_ref().map(section_from_row).transpose()
    }

    async fn list_articles(
        &self,
        course_id: CourseId,
    ) -> Result<Vec<ArticleRecord>, ContentStoreError> {
        let sql = format!(
            "SELECT {ARTICLE_COLUMNS} FROM course_articles a \
             JOIN course_sections s ON s.id = a.section_id \
             WHERE a.course_id = $1 \
             ORDER BY s.position ASC, a.position ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(course_id.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_articles", e))?;

        rows.iter().map(article_from_row).collect()
    }

    async fn get_article(&self, id: ArticleId) -> Result<Option<ArticleRecord>, ContentStoreError> {
        let sql = format!("SELECT {ARTICLE_COLUMNS} FROM course_articles a WHERE a.id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_article", e))?;

        row.as_ref().map(article_from_row).transpose()
    }

    #[instrument(skip(self, content), fields(article_id = %id, bytes = content.len()), err)]
    async fn save_article_content(
        &self,
        id: ArticleId,
        content: String,
    ) -> Result<(), ContentStoreError> {
        let result = sqlx::query(
            "UPDATE course_articles SET content = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(content)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("save_article_content", e))?;

        if result.rows_affected() == 0 {
            return Err(ContentStoreError::NotFound(format!("article {id}")));
        }
        Ok(())
    }

    #[instrument(skip(self, enrichment), fields(article_id = %id), err)]
    async fn save_enrichment(
        &self,
        id: ArticleId,
        enrichment: Enrichment,
    ) -> Result<(), ContentStoreError> {
        let result = sqlx::query(
            "UPDATE course_articles SET enrichment = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(Json(enrichment))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("save_enrichment", e))?;

        if result.rows_affected() == 0 {
            return Err(ContentStoreError::NotFound(format!("article {id}")));
        }
        Ok(())
    }

    async fn find_quiz(
        &self,
        kind: QuizKind,
        owner_id: Uuid,
    ) -> Result<Option<QuizRecord>, ContentStoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, course_id, kind, owner_id, questions, created_at
            FROM course_quizzes
            WHERE kind = $1 AND owner_id = $2
            "#,
        )
        .bind(kind.as_str())
        .bind(owner_id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_quiz", e))?;

        row.as_ref().map(quiz_from_row).transpose()
    }

    #[instrument(skip(self, quiz), fields(kind = quiz.kind.as_str(), owner_id = %quiz.owner_id), err)]
    async fn insert_quiz(&self, quiz: QuizRecord) -> Result<(), ContentStoreError> {
        sqlx::query(
            r#"
            INSERT INTO course_quizzes (id, course_id, kind, owner_id, questions, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(quiz.id.as_uuid())
        .bind(quiz.course_id.as_uuid())
        .bind(quiz.kind.as_str())
        .bind(quiz.owner_id)
        .bind(Json(&quiz.questions))
        .bind(quiz.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_quiz", e))?;
        Ok(())
    }

    #[instrument(skip(self, quiz), fields(kind = quiz.kind.as_str(), owner_id = %quiz.owner_id), err)]
    async fn replace_quiz(&self, quiz: QuizRecord) -> Result<(), ContentStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("replace_quiz", e))?;

        sqlx::query("DELETE FROM course_quizzes WHERE kind = $1 AND owner_id = $2")
            .bind(quiz.kind.as_str())
            .bind(quiz.owner_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("replace_quiz", e))?;

        sqlx::query(
            r#"
            INSERT INTO course_quizzes (id, course_id, kind, owner_id, questions, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(quiz.id.as_uuid())
        .bind(quiz.course_id.as_uuid())
        .bind(quiz.kind.as_str())
        .bind(quiz.owner_id)
        .bind(Json(&quiz.questions))
        .bind(quiz.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("replace_quiz", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("replace_quiz", e))?;
        Ok(())
    }

    async fn list_quizzes(&self, course_id: CourseId) -> Result<Vec<QuizRecord>, ContentStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, course_id, kind, owner_id, questions, created_at
            FROM course_quizzes
            WHERE course_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(course_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_quizzes", e))?;

        rows.iter().map(quiz_from_row).collect()
    }
}
