//! `coursegen-ai`
//!
//! **Responsibility:** boundary to the external text generator.
//!
//! This crate is intentionally storage-agnostic:
//! - It must not touch job queues, rate-limit stores or entity records.
//! - It defines what a generator call looks like, how its failures are
//!   classified, and how its free-text output is recovered into typed data.

pub mod classifier;
pub mod error;
pub mod generator;
pub mod prompt;
pub mod sanitize;
pub mod schema;

pub use classifier::{
    ErrorClass, ErrorClassifier, MAX_RETRY_AFTER_SECS, RATE_LIMIT_STATUS_CODES, extract_retry_after,
};
pub use error::{UpstreamError, UpstreamErrorKind};
pub use generator::{ContentGenerator, GenerationRequest, InteractionType, ModelRoute};
pub use sanitize::{SanitizeError, parse_structured, repair, sanitize};
pub use schema::{
    CourseOutline, Enrichment, ExamSelection, GeneratedOutput, OutlineArticle, OutlineSection,
    OutputError, QuizDraft, QuizQuestion, parse_article_body,
};
