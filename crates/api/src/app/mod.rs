//! Axum router wiring.
//!
//! - `routes/`: handlers, one file per area
//! - `dto.rs`: request bodies
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use coursegen_infra::GenerationRuntime;

pub mod dto;
pub mod errors;
pub mod routes;

/// Build the full HTTP router around an already constructed runtime.
///
/// The runtime's background tasks are the caller's business; the router
/// only enqueues work and reads state.
pub fn build_app(runtime: Arc<GenerationRuntime>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::router())
        .layer(ServiceBuilder::new().layer(Extension(runtime)))
}
