//! Typed shapes the generator is asked to produce, with post-parse validation.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sanitize::{SanitizeError, parse_structured, strip_wrapper};

/// Generator output that could not be turned into a usable value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OutputError {
    #[error(transparent)]
    Sanitize(#[from] SanitizeError),

    #[error("invalid output: {0}")]
    Invalid(String),
}

impl OutputError {
    fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

/// A structured output with invariants beyond what serde checks.
pub trait GeneratedOutput: DeserializeOwned {
    fn validate(&self) -> Result<(), OutputError>;

    /// Sanitize, repair, deserialize and validate raw generator text.
    fn parse(raw: &str) -> Result<Self, OutputError> {
        let value: Self = parse_structured(raw)?;
        value.validate()?;
        Ok(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseOutline {
    pub sections: Vec<OutlineSection>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlineSection {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub articles: Vec<OutlineArticle>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlineArticle {
    pub title: String,
    #[serde(default)]
    pub description: String,
}

impl CourseOutline {
    pub fn article_count(&self) -> usize {
        self.sections.iter().map(|s| s.articles.len()).sum()
    }
}

impl GeneratedOutput for CourseOutline {
    fn validate(&self) -> Result<(), OutputError> {
        if self.sections.is_empty() {
            return Err(OutputError::invalid("outline has no sections"));
        }
        for (idx, section) in self.sections.iter().enumerate() {
            if section.title.trim().is_empty() {
                return Err(OutputError::invalid(format!("section {idx} has no title")));
            }
            if section.articles.is_empty() {
                return Err(OutputError::invalid(format!(
                    "section {:?} has no articles",
                    section.title
                )));
            }
            if section.articles.iter().any(|a| a.title.trim().is_empty()) {
                return Err(OutputError::invalid(format!(
                    "section {:?} has an untitled article",
                    section.title
                )));
            }
        }
        Ok(())
    }
}

/// Supplementary material generated after an article's body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrichment {
    pub summary: String,
    pub key_takeaways: Vec<String>,
    #[serde(default)]
    pub further_reading: Vec<String>,
}

impl GeneratedOutput for Enrichment {
    fn validate(&self) -> Result<(), OutputError> {
        if self.summary.trim().is_empty() {
            return Err(OutputError::invalid("enrichment summary is empty"));
        }
        if self.key_takeaways.is_empty() {
            return Err(OutputError::invalid("enrichment has no key takeaways"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizQuestion {
    #[serde(alias = "question")]
    pub prompt: String,
    pub options: Vec<String>,
    #[serde(alias = "answer_index")]
    pub correct_index: usize,
    #[serde(default)]
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizDraft {
    pub questions: Vec<QuizQuestion>,
}

impl GeneratedOutput for QuizDraft {
    fn validate(&self) -> Result<(), OutputError> {
        if self.questions.is_empty() {
            return Err(OutputError::invalid("quiz has no questions"));
        }
        for (idx, q) in self.questions.iter().enumerate() {
            if q.prompt.trim().is_empty() {
                return Err(OutputError::invalid(format!("question {idx} has no prompt")));
            }
            if q.options.len() < 2 {
                return Err(OutputError::invalid(format!(
                    "question {idx} needs at least two options"
                )));
            }
            if q.correct_index >= q.options.len() {
                return Err(OutputError::invalid(format!(
                    "question {idx} answer index {} out of range",
                    q.correct_index
                )));
            }
        }
        Ok(())
    }
}

/// Final exam expressed as a selection from the course question bank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamSelection {
    pub question_indices: Vec<usize>,
}

impl ExamSelection {
    /// Validate against the bank size and materialize the selected questions.
    pub fn select(&self, bank: &[QuizQuestion]) -> Result<Vec<QuizQuestion>, OutputError> {
        if self.question_indices.is_empty() {
            return Err(OutputError::invalid("exam selects no questions"));
        }
        let mut seen = std::collections::HashSet::new();
        let mut selected = Vec::with_capacity(self.question_indices.len());
        for &idx in &self.question_indices {
            let question = bank.get(idx).ok_or_else(|| {
                OutputError::invalid(format!(
                    "exam references question {idx} but the bank has {}",
                    bank.len()
                ))
            })?;
            if seen.insert(idx) {
                selected.push(question.clone());
            }
        }
        Ok(selected)
    }
}

impl GeneratedOutput for ExamSelection {
    fn validate(&self) -> Result<(), OutputError> {
        Ok(())
    }
}

/// Article bodies are markdown, not JSON: only a whole-response fence is removed.
pub fn parse_article_body(raw: &str) -> Result<String, OutputError> {
    let body = strip_wrapper(raw);
    if body.is_empty() {
        return Err(OutputError::Sanitize(SanitizeError::Empty));
    }
    Ok(body)
}
