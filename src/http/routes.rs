use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        .route("/studio/status", get(handlers::get_status))
        // Sources
        .route("/studio/screen/share", post(handlers::share_screen))
        .route("/studio/screen/stop", post(handlers::stop_sharing))
        .route("/studio/camera/enable", post(handlers::enable_camera))
        .route("/studio/camera/disable", post(handlers::disable_camera))
        .route("/studio/microphone/enable", post(handlers::enable_microphone))
        .route("/studio/microphone/disable", post(handlers::disable_microphone))
        .route("/studio/overlay", post(handlers::update_overlay))
        // Recording control
        .route("/studio/recording/start", post(handlers::start_recording))
        .route("/studio/recording/pause", post(handlers::pause_recording))
        .route("/studio/recording/resume", post(handlers::resume_recording))
        .route("/studio/recording/stop", post(handlers::stop_recording))
        .route("/studio/recording/discard", post(handlers::discard_recording))
        .route("/studio/recording/artifact", get(handlers::get_artifact))
        .route("/studio/errors/clear", post(handlers::clear_errors))
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
