use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::UpstreamError;

/// Kind of generation call; selects the prompt template and model route.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionType {
    Outline,
    ArticleContent,
    Enrichment,
    ArticleQuiz,
    SectionQuiz,
    FinalQuestionBank,
    FinalExam,
}

impl InteractionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionType::Outline => "outline",
            InteractionType::ArticleContent => "article_content",
            InteractionType::Enrichment => "enrichment",
            InteractionType::ArticleQuiz => "article_quiz",
            InteractionType::SectionQuiz => "section_quiz",
            InteractionType::FinalQuestionBank => "final_question_bank",
            InteractionType::FinalExam => "final_exam",
        }
    }

    /// Whether the generator is expected to answer with JSON.
    pub fn expects_json(&self) -> bool {
        !matches!(self, InteractionType::ArticleContent)
    }
}

impl fmt::Display for InteractionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The (provider, model) pair a call is sent to. Rate limits are tracked per route.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelRoute {
    pub provider: String,
    pub model: String,
}

impl ModelRoute {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

impl fmt::Display for ModelRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.model)
    }
}

/// A single call to the generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub interaction: InteractionType,
    pub route: ModelRoute,
    pub prompt: String,
    /// Small denormalized fields (titles, level) forwarded for tracing/caching upstream.
    pub context: BTreeMap<String, String>,
}

impl GenerationRequest {
    pub fn new(interaction: InteractionType, route: ModelRoute, prompt: impl Into<String>) -> Self {
        Self {
            interaction,
            route,
            prompt: prompt.into(),
            context: BTreeMap::new(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// External text generator.
///
/// Implementations return raw text (possibly fenced, possibly malformed) or
/// an unclassified [`UpstreamError`]. Classification happens in the caller.
#[async_trait]
pub trait ContentGenerator: Send + Sync + 'static {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, UpstreamError>;
}
