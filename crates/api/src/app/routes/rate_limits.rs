use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get},
};

use coursegen_infra::GenerationRuntime;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_active))
        .route("/:provider/:model", delete(clear))
}

/// Currently open windows with their remaining seconds.
async fn list_active(
    Extension(runtime): Extension<Arc<GenerationRuntime>>,
) -> axum::response::Response {
    let active = runtime.rate_limits().list_active().await;
    (StatusCode::OK, Json(active)).into_response()
}

/// Operator override: lift a window before it lapses.
async fn clear(
    Extension(runtime): Extension<Arc<GenerationRuntime>>,
    Path((provider, model)): Path<(String, String)>,
) -> StatusCode {
    runtime.rate_limits().clear(&provider, &model).await;
    tracing::info!(%provider, %model, "rate limit cleared by operator");
    StatusCode::NO_CONTENT
}
