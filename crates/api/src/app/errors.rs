use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use coursegen_infra::content::ContentStoreError;
use coursegen_infra::jobs::QueueError;
use coursegen_infra::pipeline::WorkflowError;

pub fn workflow_error_to_response(err: WorkflowError) -> axum::response::Response {
    match err {
        WorkflowError::NotFound(what) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("{what} not found"))
        }
        WorkflowError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        WorkflowError::Invalid(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        WorkflowError::Content(e) => content_error_to_response(e),
        WorkflowError::Queue(QueueError::Invalid(e)) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string())
        }
        WorkflowError::Queue(e @ QueueError::Store(_)) => {
            tracing::error!(error = %e, "job store unavailable");
            json_error(StatusCode::SERVICE_UNAVAILABLE, "store_error", e.to_string())
        }
    }
}

pub fn content_error_to_response(err: ContentStoreError) -> axum::response::Response {
    match err {
        ContentStoreError::NotFound(what) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("{what} not found"))
        }
        ContentStoreError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        ContentStoreError::Storage(msg) => {
            tracing::error!(error = %msg, "content store unavailable");
            json_error(StatusCode::SERVICE_UNAVAILABLE, "store_error", msg)
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
