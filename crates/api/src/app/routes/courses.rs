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
use coursegen_infra::content::{ContentStore, CourseRecord};

use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_course))
        .route("/:course_id", get(get_course))
        .route("/:course_id/quizzes", post(request_quiz))
}

async fn create_course(
    Extension(runtime): Extension<Arc<GenerationRuntime>>,
    Json(body): Json<dto::CreateCourseRequest>,
) -> axum::response::Response {
    if body.title.trim().is_empty() {
        return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", "title is required");
    }
    if body.level.trim().is_empty() {
        return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", "level is required");
    }

    let course = CourseRecord::new(
        body.title.trim(),
        body.description,
        body.level.trim(),
        runtime.clock().now(),
    );
    let id = course.id;
    if let Err(e) = runtime.content().insert_course(course).await {
        return errors::content_error_to_response(e);
    }
    tracing::info!(course_id = %id, "course created");

    (
        StatusCode::CREATED,
        Json(serde_json::json!({ "id": id.to_string() })),
    )
        .into_response()
}

async fn get_course(
    Extension(runtime): Extension<Arc<GenerationRuntime>>,
    Path(course_id): Path<String>,
) -> axum::response::Response {
    let course_id: CourseId = match course_id.parse() {
        Ok(id) => id,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid course id"),
    };

    match runtime.content().get_course(course_id).await {
        Ok(Some(course)) => (StatusCode::OK, Json(course)).into_response(),
        Ok(None) => errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("course {course_id} not found"),
        ),
        Err(e) => errors::content_error_to_response(e),
    }
}

async fn request_quiz(
    Extension(runtime): Extension<Arc<GenerationRuntime>>,
    Path(course_id): Path<String>,
    Json(body): Json<dto::QuizRequest>,
) -> axum::response::Response {
    let course_id: CourseId = match course_id.parse() {
        Ok(id) => id,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid course id"),
    };
    let kind = match dto::parse_quiz_kind(&body.kind) {
        Ok(kind) => kind,
        Err(resp) => return resp,
    };

    match runtime
        .workflows()
        .request_quiz(course_id, kind, body.target_id, body.regenerate)
        .await
    {
        Ok(handle) => (StatusCode::ACCEPTED, Json(dto::job_handle_json(&handle))).into_response(),
        Err(e) => errors::workflow_error_to_response(e),
    }
}
