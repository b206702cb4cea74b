use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use coursegen_infra::content::QuizKind;
use coursegen_infra::jobs::JobHandle;

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateCourseRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub level: String,
}

#[derive(Debug, Deserialize)]
pub struct StartWorkflowRequest {
    pub course_id: Uuid,
    #[serde(default)]
    pub include_assessments: bool,
}

#[derive(Debug, Deserialize)]
pub struct QuizRequest {
    pub kind: String,
    pub target_id: Option<Uuid>,
    #[serde(default)]
    pub regenerate: bool,
}

// -------------------------
// Mapping helpers
// -------------------------

pub fn job_handle_json(handle: &JobHandle) -> Value {
    json!({
        "job_id": handle.id.to_string(),
        "job_type": handle.job_type,
        "state": handle.state,
        "next_run_at": handle.next_run_at,
    })
}

pub fn parse_quiz_kind(s: &str) -> Result<QuizKind, axum::response::Response> {
    s.to_lowercase().parse().map_err(|_| {
        errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_quiz_kind",
            "kind must be one of: article, section, final_bank, final_exam",
        )
    })
}
