// Integration tests for the studio orchestrator over synthetic capture

use anyhow::Result;
use screenmix::audio::AudioMode;
use screenmix::capture::{Resolution, SyntheticCapture, SyntheticConfig};
use screenmix::compositor::{CameraPosition, HeadlessHost, OverlayPatch, StrategyKind};
use screenmix::error::{RecorderError, StudioError};
use screenmix::recorder::{RecordingState, SegmentReader};
use screenmix::studio::{Studio, StudioSettings};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

fn small_capture(config: SyntheticConfig) -> Arc<SyntheticCapture> {
    Arc::new(SyntheticCapture::new(SyntheticConfig {
        screen: Resolution::new(64, 36),
        camera: Resolution::new(32, 24),
        ..config
    }))
}

fn studio(capture: Arc<SyntheticCapture>, audio: AudioMode) -> Studio {
    let mut settings = StudioSettings::default();
    settings.recording.audio_source = audio;
    Studio::new(capture, Arc::new(HeadlessHost::default()), settings)
}

#[tokio::test(start_paused = true)]
async fn test_full_recording_lifecycle() -> Result<()> {
    let studio = studio(small_capture(SyntheticConfig::default()), AudioMode::Both);

    studio.share_screen(true).await?;
    studio.enable_microphone().await?;

    let stats = studio.stats().await;
    assert!(stats.is_sharing);
    assert!(stats.has_system_audio);
    assert!(stats.camera_enabled);
    assert!(stats.microphone_enabled);
    assert!(!stats.compositing.active);

    studio.start_recording().await?;
    let stats = studio.stats().await;
    assert!(stats.compositing.active);
    assert_eq!(stats.compositing.strategy, Some(StrategyKind::FrameDriven));
    assert_eq!(stats.compositing.canvas, Some(Resolution::new(64, 36)));
    assert_eq!(stats.recording.state, RecordingState::Recording);

    sleep(Duration::from_millis(2500)).await;
    studio.pause_recording();
    assert_eq!(studio.recording_state(), RecordingState::Paused);
    studio.resume_recording();
    sleep(Duration::from_secs(1)).await;

    studio.stop_recording().await?;
    let stats = studio.stats().await;
    assert_eq!(stats.recording.state, RecordingState::Stopped);
    assert!(!stats.compositing.active);
    assert!(stats.recording.has_artifact);

    let artifact = studio.artifact().await.expect("artifact after stop");
    let segment = SegmentReader::parse(&artifact.data)?;
    assert_eq!((segment.header.width, segment.header.height), (64, 36));
    assert!(segment.video_frames().count() > 0);
    assert!(segment.audio_frames().count() > 0);

    studio.discard_recording().await;
    assert_eq!(studio.recording_state(), RecordingState::Idle);
    assert!(studio.artifact().await.is_none());

    studio.shutdown().await;
    let stats = studio.stats().await;
    assert!(!stats.is_sharing);
    assert!(!stats.camera_enabled);
    assert!(!stats.microphone_enabled);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_recording_without_audio_has_no_audio_records() -> Result<()> {
    let studio = studio(small_capture(SyntheticConfig::default()), AudioMode::None);

    studio.share_screen(true).await?;
    studio.enable_microphone().await?;
    studio.start_recording().await?;
    sleep(Duration::from_millis(1500)).await;
    studio.stop_recording().await?;

    let artifact = studio.artifact().await.unwrap();
    let segment = SegmentReader::parse(&artifact.data)?;
    assert!(segment.video_frames().count() > 0);
    assert_eq!(segment.audio_frames().count(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_screen_ending_mid_recording_keeps_partial_recording() -> Result<()> {
    let capture = small_capture(SyntheticConfig::default());
    let studio = studio(capture.clone(), AudioMode::Microphone);
    let mut recording = studio.subscribe_recording();

    studio.share_screen(false).await?;
    studio.start_recording().await?;
    sleep(Duration::from_millis(2500)).await;

    assert!(capture.simulate_screen_disconnect());
    recording
        .wait_for(|s| s.state == RecordingState::Stopped)
        .await?;
    // Let the screen watcher run
    sleep(Duration::from_millis(100)).await;

    let stats = studio.stats().await;
    assert!(!stats.is_sharing);
    assert!(!stats.compositing.active);
    assert!(stats.recording.has_artifact);
    assert!(stats.errors.capture.is_some());
    assert_eq!(
        stats.errors.recorder.as_ref().map(|e| e.message.clone()),
        Some(RecorderError::SourceEnded.to_string())
    );

    // Stopping again is harmless and the artifact survives
    studio.stop_recording().await?;
    assert!(studio.artifact().await.is_some());

    studio.clear_errors().await;
    assert!(studio.stats().await.errors.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_recording_requires_a_shared_screen() {
    let studio = studio(small_capture(SyntheticConfig::default()), AudioMode::None);

    let err = studio.start_recording().await.unwrap_err();
    assert_eq!(err, StudioError::NotSharing);
    assert_eq!(studio.recording_state(), RecordingState::Idle);
}

#[tokio::test]
async fn test_camera_failure_is_recorded_and_clearable() -> Result<()> {
    let capture = small_capture(SyntheticConfig {
        camera_available: false,
        ..Default::default()
    });
    let studio = studio(capture, AudioMode::None);

    // Sharing still succeeds when the camera is missing
    studio.share_screen(false).await?;
    let stats = studio.stats().await;
    assert!(stats.is_sharing);
    assert!(!stats.camera_enabled);

    let err = studio.enable_camera().await.unwrap_err();
    assert!(matches!(err, StudioError::Capture(_)));
    assert!(studio.stats().await.errors.capture.is_some());

    studio.clear_errors().await;
    assert!(studio.stats().await.errors.capture.is_none());
    studio.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_overlay_and_camera_toggles() -> Result<()> {
    let studio = studio(small_capture(SyntheticConfig::default()), AudioMode::None);

    studio
        .update_overlay(&OverlayPatch {
            position: Some(CameraPosition::TopRight),
            size_ratio: Some(0.9),
            ..Default::default()
        })
        .await;
    let stats = studio.stats().await;
    assert_eq!(stats.overlay.position, CameraPosition::TopRight);
    assert_eq!(stats.overlay.size_ratio, 0.55);
    assert_eq!(studio.settings().await.camera.overlay.position, CameraPosition::TopRight);

    studio.enable_camera().await?;
    assert!(studio.stats().await.camera_enabled);
    studio.disable_camera().await;
    assert!(!studio.stats().await.camera_enabled);
    assert!(!studio.settings().await.camera.enabled);

    studio.shutdown().await;
    Ok(())
}
