use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use coursegen_core::CourseId;
use coursegen_infra::GenerationRuntime;

use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(start_workflow))
        .route("/:course_id", get(workflow_status))
}

/// Enqueue the outline job; generation continues in the worker pool.
async fn start_workflow(
    Extension(runtime): Extension<Arc<GenerationRuntime>>,
    Json(body): Json<dto::StartWorkflowRequest>,
) -> axum::response::Response {
    let course_id = CourseId::from_uuid(body.course_id);
    match runtime
        .workflows()
        .start(course_id, body.include_assessments)
        .await
    {
        Ok(handle) => (StatusCode::ACCEPTED, Json(dto::job_handle_json(&handle))).into_response(),
        Err(e) => errors::workflow_error_to_response(e),
    }
}

async fn workflow_status(
    Extension(runtime): Extension<Arc<GenerationRuntime>>,
    Path(course_id): Path<String>,
) -> axum::response::Response {
    let course_id: CourseId = match course_id.parse() {
        Ok(id) => id,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid course id"),
    };

    match runtime.workflows().status(course_id).await {
        Ok(status) => (StatusCode::OK, Json(status)).into_response(),
        Err(e) => errors::workflow_error_to_response(e),
    }
}
