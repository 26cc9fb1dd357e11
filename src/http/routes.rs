use super::handlers;
use super::state::AppState;
use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Room lifecycle
        .route("/rooms", post(handlers::open_room))
        .route("/rooms/:code", delete(handlers::leave_room))
        .route("/rooms/:code/state", get(handlers::get_room_state))
        .route("/rooms/:code/timeline", get(handlers::get_room_timeline))
        // Prompt progression
        .route("/rooms/:code/prompts", post(handlers::add_prompt))
        .route("/rooms/:code/advance", post(handlers::advance_prompt))
        .route("/rooms/:code/retreat", post(handlers::retreat_prompt))
        // Capture windows
        .route("/rooms/:code/capture/start", post(handlers::start_capture))
        .route("/rooms/:code/capture/stop", post(handlers::stop_capture))
        .route("/rooms/:code/response", post(handlers::set_response))
        // Local media
        .route("/rooms/:code/media/:kind", post(handlers::set_track))
        .route("/rooms/:code/complete", post(handlers::complete_session))
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        // The UI is served from another origin
        .layer(CorsLayer::permissive())
        .with_state(state)
}
