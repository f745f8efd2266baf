use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::banner))
        .route("/health", get(handlers::health_check))
        .route("/generate", post(handlers::generate_speech))
        .route("/stats", get(handlers::get_stats))
        // Request logging + permissive CORS for dashboard tooling
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
