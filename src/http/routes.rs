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
        // Health check
        .route("/health", get(handlers::health_check))
        // Session start and room access
        .route("/api/start-interview", post(handlers::start_interview))
        .route("/api/token", post(handlers::mint_token))
        .route("/api/agent-status", get(handlers::agent_status))
        .route("/api/v1/live-kit", get(handlers::list_sessions))
        // Transcripts
        .route(
            "/api/interview-transcript",
            post(handlers::save_transcript).get(handlers::get_transcript),
        )
        .route(
            "/api/interviews/save-transcript",
            post(handlers::save_transcript),
        )
        // Room service callbacks
        .route("/api/webhooks/livekit", post(handlers::livekit_webhook))
        // Reports
        .route(
            "/api/interview-report",
            post(handlers::save_report).get(handlers::get_report),
        )
        // Change feed
        .route("/api/changes/:company_id", get(handlers::change_feed))
        .route(
            "/api/changes/:company_id/mounts/:mount_id/visibility",
            post(handlers::set_visibility),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
