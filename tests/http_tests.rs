// HTTP API tests, driving the router in-process with `oneshot`

use anyhow::Result;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use screenmix::audio::AudioMode;
use screenmix::capture::{Resolution, SyntheticCapture, SyntheticConfig};
use screenmix::compositor::HeadlessHost;
use screenmix::recorder::{SegmentReader, SEGMENT_MIME};
use screenmix::studio::{Studio, StudioSettings};
use screenmix::{create_router, AppState};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn app() -> Router {
    let capture = Arc::new(SyntheticCapture::new(SyntheticConfig {
        screen: Resolution::new(48, 27),
        camera: Resolution::new(16, 12),
        ..Default::default()
    }));
    let mut settings = StudioSettings::default();
    settings.recording.audio_source = AudioMode::System;
    let studio = Studio::new(capture, Arc::new(HeadlessHost::default()), settings);
    create_router(AppState::new(Arc::new(studio)))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> Result<(StatusCode, Vec<u8>)> {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            request = request.header(header::CONTENT_TYPE, "application/json");
            Body::from(serde_json::to_vec(&json)?)
        }
        None => Body::empty(),
    };

    let response = app.clone().oneshot(request.body(body)?).await?;
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    Ok((status, bytes.to_vec()))
}

async fn send_json(app: &Router, method: &str, uri: &str, body: Option<Value>) -> Result<(StatusCode, Value)> {
    let (status, bytes) = send(app, method, uri, body).await?;
    Ok((status, serde_json::from_slice(&bytes)?))
}

#[tokio::test]
async fn test_health_check() -> Result<()> {
    let app = app();
    let (status, body) = send(&app, "GET", "/health", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"OK");
    Ok(())
}

#[tokio::test]
async fn test_errors_are_json() -> Result<()> {
    let app = app();

    let (status, body) = send_json(&app, "POST", "/studio/recording/start", None).await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Screen is not being shared");

    let (status, body) = send_json(&app, "GET", "/studio/recording/artifact", None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
    Ok(())
}

#[tokio::test]
async fn test_share_screen_without_body_uses_defaults() -> Result<()> {
    let app = app();

    let (status, body) = send_json(&app, "POST", "/studio/screen/share", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stats"]["is_sharing"], true);
    assert_eq!(body["stats"]["has_system_audio"], false);

    send_json(&app, "POST", "/studio/screen/stop", None).await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_recording_lifecycle_over_http() -> Result<()> {
    let app = app();

    let (status, body) = send_json(
        &app,
        "POST",
        "/studio/screen/share",
        Some(serde_json::json!({ "with_audio": true })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stats"]["is_sharing"], true);
    assert_eq!(body["stats"]["has_system_audio"], true);

    let (status, body) = send_json(
        &app,
        "POST",
        "/studio/overlay",
        Some(serde_json::json!({ "position": "top-right", "padding": 8 })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stats"]["overlay"]["position"], "top-right");
    assert_eq!(body["stats"]["overlay"]["padding"], 8);

    let (status, body) = send_json(&app, "POST", "/studio/recording/start", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stats"]["recording"]["state"], "recording");
    assert_eq!(body["stats"]["compositing"]["strategy"], "frame-driven");

    tokio::time::sleep(Duration::from_millis(1500)).await;

    let (_, body) = send_json(&app, "POST", "/studio/recording/pause", None).await?;
    assert_eq!(body["stats"]["recording"]["state"], "paused");
    let (_, body) = send_json(&app, "POST", "/studio/recording/resume", None).await?;
    assert_eq!(body["stats"]["recording"]["state"], "recording");

    tokio::time::sleep(Duration::from_secs(1)).await;

    let (status, body) = send_json(&app, "POST", "/studio/recording/stop", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stats"]["recording"]["state"], "stopped");
    assert_eq!(body["stats"]["recording"]["has_artifact"], true);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/studio/recording/artifact")
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], SEGMENT_MIME);
    let disposition = response.headers()[header::CONTENT_DISPOSITION].to_str()?.to_string();
    assert!(disposition.contains("screen-recording-"));
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    let segment = SegmentReader::parse(&bytes)?;
    assert!(segment.video_frames().count() > 0);
    assert!(segment.audio_frames().count() > 0);

    let (_, body) = send_json(&app, "GET", "/studio/status", None).await?;
    assert_eq!(body["recording"]["state"], "stopped");
    assert_eq!(body["audio_source"], "system");

    let (_, body) = send_json(&app, "POST", "/studio/recording/discard", None).await?;
    assert_eq!(body["stats"]["recording"]["state"], "idle");
    let (status, _) = send(&app, "GET", "/studio/recording/artifact", None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send_json(&app, "POST", "/studio/screen/stop", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stats"]["is_sharing"], false);
    Ok(())
}

#[tokio::test]
async fn test_device_toggles_and_error_clearing() -> Result<()> {
    let app = app();

    let (status, body) = send_json(&app, "POST", "/studio/camera/enable", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stats"]["camera_enabled"], true);

    let (_, body) = send_json(&app, "POST", "/studio/camera/disable", None).await?;
    assert_eq!(body["stats"]["camera_enabled"], false);

    let (_, body) = send_json(&app, "POST", "/studio/microphone/enable", None).await?;
    assert_eq!(body["stats"]["microphone_enabled"], true);
    let (_, body) = send_json(&app, "POST", "/studio/microphone/disable", None).await?;
    assert_eq!(body["stats"]["microphone_enabled"], false);

    let (status, body) = send_json(&app, "POST", "/studio/errors/clear", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert!(body["stats"]["errors"]["capture"].is_null());
    Ok(())
}
