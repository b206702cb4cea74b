//! Content entities the pipeline reads and writes.
//!
//! The pipeline owns only the generation fields (status, error, generated
//! payloads). Everything else about courses lives with the content system;
//! this store is the narrow CRUD surface the stages need.

pub mod postgres;
pub mod records;
pub mod store;

pub use postgres::PostgresContentStore;
pub use records::{
    ArticleRecord, CourseRecord, NewArticle, NewSection, QuizKind, QuizRecord, SectionRecord,
    StatusTarget,
};
pub use store::{ContentStore, ContentStoreError, InMemoryContentStore};
