use std::sync::{Arc, Weak};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::settings::StudioSettings;
use super::stats::{CompositingStats, ErrorReport, StudioErrors, StudioStats};
use crate::audio::{AudioMixer, MixerConfig};
use crate::capture::{CaptureProvider, EndReason, ScreenCapture, VideoTrack};
use crate::compositor::{Compositor, CompositorConfig, CompositorStatus, Host, OverlayPatch};
use crate::error::{CompositorError, StudioError};
use crate::recorder::{
    format_elapsed, Artifact, EncoderFactory, Recorder, RecordingSnapshot, RecordingState,
    SegmentEncoderFactory,
};

struct StudioState {
    screen: Option<ScreenCapture>,
    camera: Option<VideoTrack>,
    mixer: AudioMixer,
    compositor: Compositor,
    settings: StudioSettings,
    capture_error: Option<String>,
    screen_watcher: Option<JoinHandle<()>>,
}

impl StudioState {
    fn live_screen(&self) -> Option<&ScreenCapture> {
        self.screen.as_ref().filter(|s| !s.video.is_ended())
    }

    fn live_camera(&self) -> Option<&VideoTrack> {
        self.camera.as_ref().filter(|c| !c.is_ended())
    }

    fn release_screen(&mut self) {
        if let Some(watcher) = self.screen_watcher.take() {
            watcher.abort();
        }
        if let Some(screen) = self.screen.take() {
            screen.stop();
        }
        // System audio belongs to the screen share
        self.mixer.detach_system_audio();
    }
}

/// Screen recording studio
///
/// Ties capture, mixing, compositing and recording together behind one
/// set of operations. Cheap to share behind an `Arc`; operations serialize
/// on an internal lock, except the recorder's own pause/resume.
pub struct Studio {
    capture: Arc<dyn CaptureProvider>,
    state: Arc<Mutex<StudioState>>,
    recorder: Recorder,
}

impl Studio {
    /// Studio recording with the built-in segment encoder
    pub fn new(
        capture: Arc<dyn CaptureProvider>,
        host: Arc<dyn Host>,
        settings: StudioSettings,
    ) -> Self {
        Self::with_factory(capture, host, settings, Arc::new(SegmentEncoderFactory))
    }

    pub fn with_factory(
        capture: Arc<dyn CaptureProvider>,
        host: Arc<dyn Host>,
        settings: StudioSettings,
        factory: Arc<dyn EncoderFactory>,
    ) -> Self {
        info!(
            "Studio created with {} capture ({} fps, audio: {:?}, {} compositing)",
            capture.name(),
            settings.recording.fps,
            settings.recording.audio_source,
            settings.compositor.preferred_strategy
        );

        let recorder = Recorder::new(factory, settings.recorder_options());
        let mut compositor = Compositor::new(host, settings.compositor_options());
        compositor.update_config(&OverlayPatch {
            position: Some(settings.camera.overlay.position),
            size_ratio: Some(settings.camera.overlay.size_ratio),
            corner_roundness: Some(settings.camera.overlay.corner_roundness),
            padding: Some(settings.camera.overlay.padding),
        });

        Self {
            capture,
            state: Arc::new(Mutex::new(StudioState {
                screen: None,
                camera: None,
                mixer: AudioMixer::new(MixerConfig::default()),
                compositor,
                settings,
                capture_error: None,
                screen_watcher: None,
            })),
            recorder,
        }
    }

    /// Acquire the screen, replacing any current share
    ///
    /// Brings the camera up too when the settings ask for it; a camera
    /// failure is recorded but does not fail the share.
    pub async fn share_screen(&self, with_audio: bool) -> Result<(), StudioError> {
        let screen = match self.capture.acquire_screen(with_audio).await {
            Ok(screen) => screen,
            Err(e) => {
                let message = format!("Failed to share screen: {:#}", e);
                error!("{}", message);
                self.state.lock().await.capture_error = Some(message.clone());
                return Err(StudioError::Capture(message));
            }
        };

        let mut state = self.state.lock().await;
        state.release_screen();

        if let Some(audio) = &screen.audio {
            state.mixer.attach_system_audio(audio.clone());
        }
        state.screen_watcher = Some(tokio::spawn(watch_screen(
            Arc::downgrade(&self.state),
            screen.video.clone(),
        )));
        state.screen = Some(screen);
        state.capture_error = None;
        info!("Screen sharing started");

        if state.settings.camera.enabled && state.live_camera().is_none() {
            if let Err(e) = self.bring_up_camera(&mut state).await {
                warn!("Camera unavailable: {}", e);
            }
        }
        Ok(())
    }

    /// Stop sharing; a running recording stops with whatever it captured
    pub async fn stop_sharing(&self) {
        let mut state = self.state.lock().await;
        if state.screen.is_none() {
            return;
        }
        state.release_screen();
        state.compositor.stop_compositing().await;
        info!("Screen sharing stopped");
    }

    pub async fn enable_camera(&self) -> Result<(), StudioError> {
        let mut state = self.state.lock().await;
        state.settings.camera.enabled = true;
        if state.live_camera().is_some() {
            return Ok(());
        }
        self.bring_up_camera(&mut state).await
    }

    async fn bring_up_camera(&self, state: &mut StudioState) -> Result<(), StudioError> {
        match self.capture.acquire_camera().await {
            Ok(camera) => {
                if let Some(previous) = state.camera.replace(camera.clone()) {
                    previous.stop();
                }
                state.compositor.update_camera_stream(Some(&camera));
                info!("Camera enabled");
                Ok(())
            }
            Err(e) => {
                let message = format!("Failed to enable camera: {:#}", e);
                state.capture_error = Some(message.clone());
                Err(StudioError::Capture(message))
            }
        }
    }

    pub async fn disable_camera(&self) {
        let mut state = self.state.lock().await;
        state.settings.camera.enabled = false;
        if let Some(camera) = state.camera.take() {
            camera.stop();
            state.compositor.update_camera_stream(None);
            info!("Camera disabled");
        }
    }

    pub async fn enable_microphone(&self) -> Result<(), StudioError> {
        let microphone = self.capture.acquire_microphone().await;
        let mut state = self.state.lock().await;
        match microphone {
            Ok(track) => {
                state.mixer.attach_microphone(track);
                info!("Microphone enabled");
                Ok(())
            }
            Err(e) => {
                let message = format!("Failed to enable microphone: {:#}", e);
                state.capture_error = Some(message.clone());
                Err(StudioError::Capture(message))
            }
        }
    }

    pub async fn disable_microphone(&self) {
        let mut state = self.state.lock().await;
        state.mixer.detach_microphone();
    }

    /// Merge an overlay update; a running session picks it up next frame
    pub async fn update_overlay(&self, patch: &OverlayPatch) {
        let mut state = self.state.lock().await;
        state.settings.camera.overlay = state.settings.camera.overlay.apply(patch);
        state.compositor.update_config(patch);
    }

    /// Composite the shared screen and start recording it
    ///
    /// Ignored unless the recorder is idle. A mixer failure records without
    /// audio rather than failing the recording.
    pub async fn start_recording(&self) -> Result<(), StudioError> {
        let mut state = self.state.lock().await;
        if self.recorder.state() != RecordingState::Idle {
            debug!("Ignoring start while {}", self.recorder.state());
            return Ok(());
        }

        let screen = state.live_screen().cloned().ok_or(StudioError::NotSharing)?;
        let camera = state.live_camera().cloned();
        let mode = state.settings.recording.audio_source;

        let audio = match state.mixer.mixed_track(mode).await {
            Ok(audio) => audio,
            Err(e) => {
                warn!("Recording without audio: {}", e);
                None
            }
        };

        let config = CompositorConfig {
            fps: state.settings.recording.fps,
            overlay: state.settings.camera.overlay,
        };
        let feed = state
            .compositor
            .start_compositing(&screen.video, camera.as_ref(), audio, config)
            .await
            .ok_or_else(|| {
                state
                    .compositor
                    .last_error()
                    .unwrap_or_else(|| CompositorError::Pipeline("compositor did not start".to_string()))
            })?;

        if let Err(e) = self.recorder.start(&feed).await {
            state.compositor.stop_compositing().await;
            return Err(e.into());
        }
        Ok(())
    }

    pub fn pause_recording(&self) {
        self.recorder.pause();
    }

    pub fn resume_recording(&self) {
        self.recorder.resume();
    }

    /// Stop recording, then stop compositing
    pub async fn stop_recording(&self) -> Result<(), StudioError> {
        let result = self.recorder.stop().await;
        self.state.lock().await.compositor.stop_compositing().await;
        result.map_err(StudioError::from)
    }

    pub async fn discard_recording(&self) {
        self.recorder.discard().await;
    }

    pub async fn artifact(&self) -> Option<Artifact> {
        self.recorder.artifact().await
    }

    pub fn recording_state(&self) -> RecordingState {
        self.recorder.state()
    }

    pub fn subscribe_recording(&self) -> watch::Receiver<RecordingSnapshot> {
        self.recorder.subscribe()
    }

    pub async fn settings(&self) -> StudioSettings {
        self.state.lock().await.settings.clone()
    }

    pub async fn stats(&self) -> StudioStats {
        let state = self.state.lock().await;
        let recording = self.recorder.snapshot();

        let compositor = &state.compositor;
        let schedule = match compositor.status() {
            CompositorStatus::Running { schedule, .. } => schedule,
            _ => None,
        };
        let pipeline = compositor.stats();
        let compositing = CompositingStats {
            active: compositor.is_compositing(),
            strategy: compositor.strategy(),
            schedule,
            canvas: compositor.canvas_size(),
            fps: compositor.fps(),
            frames_emitted: pipeline.as_ref().map(|s| s.frames_emitted()).unwrap_or(0),
            frames_dropped: pipeline.as_ref().map(|s| s.frames_dropped()).unwrap_or(0),
        };

        let errors = StudioErrors {
            capture: state.capture_error.clone(),
            compositor: compositor.last_error().map(|e| ErrorReport {
                kind: e.kind(),
                message: e.to_string(),
            }),
            mixer: state.mixer.last_error().map(|e| ErrorReport {
                kind: e.kind(),
                message: e.to_string(),
            }),
            recorder: recording.error.clone().zip(recording.error_kind).map(|(message, kind)| {
                ErrorReport { kind, message }
            }),
        };

        StudioStats {
            is_sharing: state.live_screen().is_some(),
            has_system_audio: state.mixer.has_system_audio(),
            camera_enabled: state.live_camera().is_some(),
            microphone_enabled: state.mixer.has_microphone(),
            audio_source: state.settings.recording.audio_source,
            compositing,
            overlay: compositor.overlay(),
            elapsed: format_elapsed(recording.elapsed_secs),
            recording,
            errors,
        }
    }

    /// Clear every component's last error
    pub async fn clear_errors(&self) {
        let mut state = self.state.lock().await;
        state.capture_error = None;
        state.compositor.clear_error();
        state.mixer.clear_error();
        drop(state);
        self.recorder.clear_error().await;
    }

    /// Stop everything and release every device
    pub async fn shutdown(&self) {
        self.recorder.shutdown().await;

        let mut state = self.state.lock().await;
        state.compositor.stop_compositing().await;
        state.release_screen();
        if let Some(camera) = state.camera.take() {
            camera.stop();
        }
        state.mixer.cleanup().await;
        info!("Studio shut down");
    }
}

/// Forget the screen once its track ends and tear compositing down
///
/// The recorder notices the composited track ending on its own and stops
/// with the chunks it has.
async fn watch_screen(state: Weak<Mutex<StudioState>>, video: VideoTrack) {
    let reason = video.ended().wait().await;

    let Some(state) = state.upgrade() else {
        return;
    };
    let mut state = state.lock().await;
    let current = state
        .screen
        .as_ref()
        .map(|s| s.video.same_source(&video))
        .unwrap_or(false);
    if !current {
        return;
    }

    warn!("Screen capture ended: {}", reason);
    if reason != EndReason::Stopped {
        state.capture_error = Some(format!("Screen sharing ended: {}", reason));
    }
    // Not through release_screen: that would abort this task
    if let Some(screen) = state.screen.take() {
        screen.stop();
    }
    state.screen_watcher = None;
    state.mixer.detach_system_audio();
    state.compositor.stop_compositing().await;
}
