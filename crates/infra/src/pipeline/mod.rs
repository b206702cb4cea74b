//! Course-generation state machine.
//!
//! ```text
//! outline -> article_content (per article) -> enrichment
//!                                               |-> quiz_article
//!                                               |-> quiz_section (section done)
//!                                               `-> quiz_final_bank (course done) -> quiz_final_exam
//! ```
//!
//! Assessment stages only run when the workflow was started with
//! `include_assessments`, or when requested by hand.

pub mod article;
pub mod gateway;
pub mod outline;
pub mod quiz;
pub mod stage;
pub mod workflow;

use std::sync::Arc;

pub use article::{ArticleContentStage, EnrichmentStage};
pub use gateway::{GenerationGateway, ModelRoutes};
pub use outline::OutlineStage;
pub use quiz::{ArticleQuizStage, FinalBankStage, FinalExamStage, SectionQuizStage};
pub use stage::{QuizSettings, StageContext, StageHandler, StageOutcome};
pub use workflow::{WorkflowError, WorkflowService, WorkflowStatus};

/// One handler per job type, all sharing `ctx`.
pub fn stage_handlers(ctx: &StageContext) -> Vec<Arc<dyn StageHandler>> {
    vec![
        Arc::new(OutlineStage::new(ctx.clone())),
        Arc::new(ArticleContentStage::new(ctx.clone())),
        Arc::new(EnrichmentStage::new(ctx.clone())),
        Arc::new(ArticleQuizStage::new(ctx.clone())),
        Arc::new(SectionQuizStage::new(ctx.clone())),
        Arc::new(FinalBankStage::new(ctx.clone())),
        Arc::new(FinalExamStage::new(ctx.clone())),
    ]
}
