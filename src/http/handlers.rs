use super::state::AppState;
use crate::compositor::OverlayPatch;
use crate::error::{ErrorKind, StudioError};
use crate::studio::StudioStats;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ShareScreenRequest {
    /// Share system audio along with the screen
    pub with_audio: bool,
}

#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub message: String,
    pub stats: StudioStats,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

fn studio_error(e: StudioError) -> Response {
    let status = match &e {
        StudioError::NotSharing => StatusCode::CONFLICT,
        StudioError::Capture(_) => StatusCode::SERVICE_UNAVAILABLE,
        other => match other.kind() {
            ErrorKind::Source => StatusCode::CONFLICT,
            ErrorKind::EmptyResult => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::Unsupported => StatusCode::NOT_IMPLEMENTED,
            ErrorKind::Pipeline => StatusCode::INTERNAL_SERVER_ERROR,
        },
    };
    error!("Request failed: {}", e);
    error_response(status, e.to_string())
}

async fn respond(state: &AppState, message: &str) -> Response {
    let stats = state.studio.stats().await;
    (
        StatusCode::OK,
        Json(ActionResponse {
            message: message.to_string(),
            stats,
        }),
    )
        .into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /studio/status
pub async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.studio.stats().await))
}

/// POST /studio/screen/share
pub async fn share_screen(
    State(state): State<AppState>,
    req: Option<Json<ShareScreenRequest>>,
) -> Response {
    // A bare POST shares without system audio
    let req = req.map(|Json(req)| req).unwrap_or_default();
    info!("Sharing screen (system audio: {})", req.with_audio);
    match state.studio.share_screen(req.with_audio).await {
        Ok(()) => respond(&state, "Screen sharing started").await,
        Err(e) => studio_error(e),
    }
}

/// POST /studio/screen/stop
pub async fn stop_sharing(State(state): State<AppState>) -> Response {
    state.studio.stop_sharing().await;
    respond(&state, "Screen sharing stopped").await
}

/// POST /studio/camera/enable
pub async fn enable_camera(State(state): State<AppState>) -> Response {
    match state.studio.enable_camera().await {
        Ok(()) => respond(&state, "Camera enabled").await,
        Err(e) => studio_error(e),
    }
}

/// POST /studio/camera/disable
pub async fn disable_camera(State(state): State<AppState>) -> Response {
    state.studio.disable_camera().await;
    respond(&state, "Camera disabled").await
}

/// POST /studio/microphone/enable
pub async fn enable_microphone(State(state): State<AppState>) -> Response {
    match state.studio.enable_microphone().await {
        Ok(()) => respond(&state, "Microphone enabled").await,
        Err(e) => studio_error(e),
    }
}

/// POST /studio/microphone/disable
pub async fn disable_microphone(State(state): State<AppState>) -> Response {
    state.studio.disable_microphone().await;
    respond(&state, "Microphone disabled").await
}

/// POST /studio/overlay
/// Merge a partial overlay update
pub async fn update_overlay(
    State(state): State<AppState>,
    Json(patch): Json<OverlayPatch>,
) -> Response {
    state.studio.update_overlay(&patch).await;
    respond(&state, "Overlay updated").await
}

/// POST /studio/recording/start
pub async fn start_recording(State(state): State<AppState>) -> Response {
    info!("Starting recording");
    match state.studio.start_recording().await {
        Ok(()) => respond(&state, "Recording started").await,
        Err(e) => studio_error(e),
    }
}

/// POST /studio/recording/pause
pub async fn pause_recording(State(state): State<AppState>) -> Response {
    state.studio.pause_recording();
    respond(&state, "Recording paused").await
}

/// POST /studio/recording/resume
pub async fn resume_recording(State(state): State<AppState>) -> Response {
    state.studio.resume_recording();
    respond(&state, "Recording resumed").await
}

/// POST /studio/recording/stop
pub async fn stop_recording(State(state): State<AppState>) -> Response {
    info!("Stopping recording");
    match state.studio.stop_recording().await {
        Ok(()) => respond(&state, "Recording stopped").await,
        Err(e) => studio_error(e),
    }
}

/// POST /studio/recording/discard
pub async fn discard_recording(State(state): State<AppState>) -> Response {
    state.studio.discard_recording().await;
    respond(&state, "Recording discarded").await
}

/// GET /studio/recording/artifact
/// Download the finished recording
pub async fn get_artifact(State(state): State<AppState>) -> Response {
    match state.studio.artifact().await {
        Some(artifact) => {
            let disposition = format!("attachment; filename=\"{}\"", artifact.file_name());
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, artifact.format.mime().to_string()),
                    (header::CONTENT_DISPOSITION, disposition),
                ],
                artifact.data.as_ref().clone(),
            )
                .into_response()
        }
        None => error_response(StatusCode::NOT_FOUND, "No recording is available"),
    }
}

/// POST /studio/errors/clear
pub async fn clear_errors(State(state): State<AppState>) -> Response {
    state.studio.clear_errors().await;
    respond(&state, "Errors cleared").await
}
