//! Axum router configuration with middleware.
//!
//! All routes are under `/api/v1/`.
//! Middleware: CORS, tracing.

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Event history and live feeds
        .route("/worlds/{world}/events", get(handlers::events::get_events))
        .route(
            "/worlds/{world}/events/stream",
            get(handlers::stream::stream_events),
        )
        .route("/worlds/{world}/ws", get(handlers::ws::ws_handler))
        .route("/worlds/{world}/stats", get(handlers::events::get_stats))
        // Approvals
        .route(
            "/worlds/{world}/approvals",
            get(handlers::approvals::list_approvals),
        )
        .route(
            "/worlds/{world}/approvals/{id}/decision",
            post(handlers::approvals::decide_approval),
        )
        // Turn intake
        .route(
            "/worlds/{world}/agents/{agent}/turns",
            post(handlers::turns::start_turn),
        );

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/health", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health - Simple health check endpoint.
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
