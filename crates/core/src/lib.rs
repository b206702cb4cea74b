//! `coursegen-core`: shared building blocks for the generation pipeline.
//!
//! This crate contains **pure** primitives (no infrastructure concerns):
//! identifiers, the domain error model, the generation status carried by
//! content entities, and the clock abstraction every time-based component reads.

pub mod clock;
pub mod error;
pub mod id;
pub mod status;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use error::DomainError;
pub use id::{ArticleId, CourseId, QuizId, SectionId, WorkflowId};
pub use status::GenerationStatus;
