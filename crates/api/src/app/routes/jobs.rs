use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use coursegen_infra::GenerationRuntime;
use coursegen_infra::jobs::{JobId, JobState};

use crate::app::errors;

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 500;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_jobs))
        .route("/stats", get(stats))
        .route("/:job_id", get(get_job))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    state: Option<JobState>,
    limit: Option<usize>,
}

async fn stats(Extension(runtime): Extension<Arc<GenerationRuntime>>) -> axum::response::Response {
    let queue = match runtime.queue().stats().await {
        Ok(stats) => stats,
        Err(e) => {
            return errors::json_error(StatusCode::SERVICE_UNAVAILABLE, "store_error", e.to_string());
        }
    };
    (
        StatusCode::OK,
        Json(json!({
            "queue": queue,
            "workers": runtime.worker_stats(),
        })),
    )
        .into_response()
}

async fn list_jobs(
    Extension(runtime): Extension<Arc<GenerationRuntime>>,
    Query(query): Query<ListQuery>,
) -> axum::response::Response {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT);
    match runtime.queue().list(query.state, limit).await {
        Ok(jobs) => (StatusCode::OK, Json(jobs)).into_response(),
        Err(e) => errors::json_error(StatusCode::SERVICE_UNAVAILABLE, "store_error", e.to_string()),
    }
}

async fn get_job(
    Extension(runtime): Extension<Arc<GenerationRuntime>>,
    Path(job_id): Path<String>,
) -> axum::response::Response {
    let job_id = match job_id.parse::<Uuid>() {
        Ok(id) => JobId(id),
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid job id"),
    };

    match runtime.queue().get(job_id).await {
        Ok(Some(job)) => (StatusCode::OK, Json(job)).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", format!("job {job_id} not found")),
        Err(e) => errors::json_error(StatusCode::SERVICE_UNAVAILABLE, "store_error", e.to_string()),
    }
}
