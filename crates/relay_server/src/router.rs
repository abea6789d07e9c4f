//! Router construction for the escalation server.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Extension, Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use relay_core::RelayService;

use crate::handlers;

/// Build the full axum router. The id routes accept POST as well as GET for
/// parity with the original collaborator client.
pub fn build_router(service: Arc<RelayService>) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        .route(
            "/queries",
            post(handlers::queries::create_query).get(handlers::queries::list_queries),
        )
        .route(
            "/queries/:id",
            get(handlers::queries::get_query).post(handlers::queries::get_query),
        )
        .route(
            "/answers",
            post(handlers::answers::commit_answer).get(handlers::answers::list_answers),
        )
        .route(
            "/answers/:id",
            get(handlers::answers::get_answer).post(handlers::answers::get_answer),
        )
        .route("/vector_search", post(handlers::search::vector_search))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(Extension(service))
}
