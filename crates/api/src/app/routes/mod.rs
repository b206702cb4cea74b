use axum::Router;

pub mod courses;
pub mod jobs;
pub mod rate_limits;
pub mod system;
pub mod workflows;

/// Every route except `/health`.
pub fn router() -> Router {
    Router::new()
        .nest("/courses", courses::router())
        .nest("/workflows", workflows::router())
        .nest("/rate-limits", rate_limits::router())
        .nest("/jobs", jobs::router())
}
