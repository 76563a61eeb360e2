use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::canvas::RenderTarget;
use super::geometry::{OverlayConfig, OverlayPatch};
use super::host::Host;
use super::strategy::{
    strategy_for, CompositorStatus, PipelineContext, PipelineStats, Strategy, StrategyKind,
};
use super::{CombinedFeed, CompositorConfig, MAX_FPS};
use crate::capture::{
    video_track, AudioTrack, EndReason, Resolution, VideoKind, VideoTrack, VideoTrackWriter,
};
use crate::error::CompositorError;

/// Compositor tuning that outlives individual sessions
#[derive(Debug, Clone)]
pub struct CompositorOptions {
    pub preferred: StrategyKind,
    /// Camera frames older than this are not drawn
    pub camera_stale_after: Duration,
}

impl Default for CompositorOptions {
    fn default() -> Self {
        Self {
            preferred: StrategyKind::FrameDriven,
            camera_stale_after: Duration::from_secs(1),
        }
    }
}

/// One running compositing session
struct ActiveSession {
    id: Uuid,
    strategy: StrategyKind,
    canvas: Resolution,
    fps: u32,
    overlay: watch::Sender<OverlayConfig>,
    camera: watch::Sender<Option<VideoTrack>>,
    shutdown: watch::Sender<bool>,
    status: watch::Receiver<CompositorStatus>,
    stats: Arc<PipelineStats>,
    feed: CombinedFeed,
    task: JoinHandle<()>,
}

impl ActiveSession {
    fn status(&self) -> CompositorStatus {
        self.status.borrow().clone()
    }
}

/// Composites a screen feed with an optional camera overlay
///
/// At most one session runs at a time. Camera and overlay updates go to the
/// running pipeline through watch channels and take effect on the next frame.
pub struct Compositor {
    host: Arc<dyn Host>,
    options: CompositorOptions,
    overlay: OverlayConfig,
    session: Option<ActiveSession>,
    error: Option<CompositorError>,
}

impl Compositor {
    pub fn new(host: Arc<dyn Host>, options: CompositorOptions) -> Self {
        Self {
            host,
            options,
            overlay: OverlayConfig::default(),
            session: None,
            error: None,
        }
    }

    /// Start compositing `screen`, optionally with a camera overlay
    ///
    /// Returns `None` on failure; the reason is available from
    /// [`Compositor::last_error`]. A running session is stopped first.
    pub async fn start_compositing(
        &mut self,
        screen: &VideoTrack,
        camera: Option<&VideoTrack>,
        audio: Option<AudioTrack>,
        config: CompositorConfig,
    ) -> Option<CombinedFeed> {
        if self.session.is_some() {
            debug!("Replacing running compositing session");
            self.stop_compositing().await;
        }
        self.error = None;

        match self.try_start(screen, camera, audio, config) {
            Ok(session) => {
                let feed = session.feed.clone();
                self.session = Some(session);
                Some(feed)
            }
            Err(e) => {
                error!("Failed to start compositing: {}", e);
                self.error = Some(e);
                None
            }
        }
    }

    fn try_start(
        &mut self,
        screen: &VideoTrack,
        camera: Option<&VideoTrack>,
        audio: Option<AudioTrack>,
        config: CompositorConfig,
    ) -> Result<ActiveSession, CompositorError> {
        if screen.is_ended() {
            return Err(CompositorError::NoScreenVideo);
        }
        let resolution = screen.resolution();
        if resolution.width == 0 || resolution.height == 0 {
            return Err(CompositorError::InvalidDimensions {
                width: resolution.width,
                height: resolution.height,
            });
        }
        if config.fps == 0 {
            return Err(CompositorError::InvalidFrameRate(config.fps));
        }
        let fps = if config.fps > MAX_FPS {
            warn!("Frame rate {} exceeds {}, clamping", config.fps, MAX_FPS);
            MAX_FPS
        } else {
            config.fps
        };

        let strategy = self.select_strategy(screen)?;
        let kind = strategy.kind();

        self.overlay = config.overlay;
        let (overlay_tx, overlay_rx) = watch::channel(self.overlay);
        let (camera_tx, camera_rx) = watch::channel(camera.cloned());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (status_tx, status_rx) = watch::channel(CompositorStatus::Running {
            strategy: kind,
            schedule: None,
        });
        let status_tx = Arc::new(status_tx);
        let (output_writer, output) =
            video_track("composited", VideoKind::Composited, resolution, true);
        let stats = Arc::new(PipelineStats::default());

        let ctx = PipelineContext {
            screen: screen.clone(),
            canvas: RenderTarget::new(resolution.width, resolution.height),
            overlay: overlay_rx,
            camera: camera_rx,
            camera_stale_after: self.options.camera_stale_after,
            fps,
            output: output_writer.clone(),
            shutdown: shutdown_rx,
            status: Arc::clone(&status_tx),
            stats: Arc::clone(&stats),
            background_lock: self.host.acquire_background_lock(),
        };
        let pipeline = strategy.spawn(ctx);
        let task = tokio::spawn(supervise(pipeline, status_tx, output_writer));

        let id = Uuid::new_v4();
        info!(
            "Compositing session {} started: {}x{} @ {} fps, {} strategy, camera: {}",
            id,
            resolution.width,
            resolution.height,
            fps,
            kind,
            camera.is_some()
        );

        Ok(ActiveSession {
            id,
            strategy: kind,
            canvas: resolution,
            fps,
            overlay: overlay_tx,
            camera: camera_tx,
            shutdown: shutdown_tx,
            status: status_rx,
            stats,
            feed: CombinedFeed::new(Some(output), audio),
            task,
        })
    }

    /// Prepare the preferred strategy, falling back to the other one
    fn select_strategy(&self, screen: &VideoTrack) -> Result<Box<dyn Strategy>, CompositorError> {
        let preferred = self.options.preferred;
        let mut strategy = strategy_for(preferred);
        match strategy.prepare(screen, self.host.as_ref()) {
            Ok(()) => return Ok(strategy),
            Err(e) => {
                info!("{}; falling back to {} compositing", e, preferred.fallback());
            }
        }

        let mut fallback = strategy_for(preferred.fallback());
        fallback.prepare(screen, self.host.as_ref())?;
        Ok(fallback)
    }

    /// Merge a partial overlay update into the active config
    pub fn update_config(&mut self, patch: &OverlayPatch) {
        self.overlay = self.overlay.apply(patch);
        if let Some(session) = &self.session {
            session.overlay.send_replace(self.overlay);
        }
        debug!("Overlay config updated: {:?}", self.overlay);
    }

    /// Attach, detach or swap the camera of the running session
    pub fn update_camera_stream(&mut self, camera: Option<&VideoTrack>) {
        if let Some(session) = &self.session {
            session.camera.send_replace(camera.cloned());
            debug!(
                "Camera {} for session {}",
                if camera.is_some() { "attached" } else { "detached" },
                session.id
            );
        }
    }

    /// Stop compositing and wait for the pipeline to release its resources
    ///
    /// Calling it again, or with nothing running, does nothing.
    pub async fn stop_compositing(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        session.shutdown.send_replace(true);
        if let Err(e) = session.task.await {
            warn!("Compositor pipeline task ended abnormally: {}", e);
        }
        self.error = None;
        info!("Compositing session {} stopped", session.id);
    }

    pub fn is_compositing(&self) -> bool {
        self.session
            .as_ref()
            .map(|s| s.status().is_running())
            .unwrap_or(false)
    }

    pub fn status(&self) -> CompositorStatus {
        match &self.session {
            Some(session) => session.status(),
            None => CompositorStatus::Idle,
        }
    }

    /// Watch the running session's status
    pub fn subscribe_status(&self) -> Option<watch::Receiver<CompositorStatus>> {
        self.session.as_ref().map(|s| s.status.clone())
    }

    pub fn last_error(&self) -> Option<CompositorError> {
        if let Some(error) = &self.error {
            return Some(error.clone());
        }
        match self.status() {
            CompositorStatus::Failed { error } => Some(error),
            _ => None,
        }
    }

    /// Forget the last error; a failed session is discarded with it
    pub fn clear_error(&mut self) {
        self.error = None;
        let failed = matches!(self.status(), CompositorStatus::Failed { .. });
        if failed {
            // The pipeline task has already exited.
            self.session = None;
        }
    }

    /// Combined feed of the running session
    pub fn feed(&self) -> Option<CombinedFeed> {
        self.session.as_ref().map(|s| s.feed.clone())
    }

    pub fn overlay(&self) -> OverlayConfig {
        self.overlay
    }

    pub fn strategy(&self) -> Option<StrategyKind> {
        self.session.as_ref().map(|s| s.strategy)
    }

    pub fn canvas_size(&self) -> Option<Resolution> {
        self.session.as_ref().map(|s| s.canvas)
    }

    pub fn fps(&self) -> Option<u32> {
        self.session.as_ref().map(|s| s.fps)
    }

    pub fn stats(&self) -> Option<Arc<PipelineStats>> {
        self.session.as_ref().map(|s| Arc::clone(&s.stats))
    }
}

/// Await the pipeline task and turn a panic into a failed session
///
/// The panicking task drops its context while unwinding, so the output
/// would otherwise stay open and the status would keep saying `Running`.
async fn supervise(
    pipeline: JoinHandle<()>,
    status: Arc<watch::Sender<CompositorStatus>>,
    output: VideoTrackWriter,
) {
    let Err(e) = pipeline.await else {
        return;
    };
    if !e.is_panic() {
        return;
    }

    let message = "compositor pipeline panicked".to_string();
    error!("{}", message);
    status.send_replace(CompositorStatus::Failed {
        error: CompositorError::Pipeline(message.clone()),
    });
    output.end(EndReason::Failed(message));
}

impl Drop for Compositor {
    fn drop(&mut self) {
        if let Some(session) = &self.session {
            session.shutdown.send_replace(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_panicking_pipeline_fails_session_and_ends_output() {
        let (status_tx, status_rx) = watch::channel(CompositorStatus::Running {
            strategy: StrategyKind::FrameDriven,
            schedule: None,
        });
        let (writer, output) =
            video_track("composited", VideoKind::Composited, Resolution::new(4, 4), true);

        let pipeline = tokio::spawn(async {
            panic!("draw failed");
        });
        supervise(pipeline, Arc::new(status_tx), writer).await;

        assert!(matches!(
            &*status_rx.borrow(),
            CompositorStatus::Failed {
                error: CompositorError::Pipeline(_)
            }
        ));
        assert!(matches!(output.ended().reason(), Some(EndReason::Failed(_))));
    }

    #[tokio::test]
    async fn test_clean_pipeline_exit_leaves_status_alone() {
        let (status_tx, status_rx) = watch::channel(CompositorStatus::Idle);
        let (writer, output) =
            video_track("composited", VideoKind::Composited, Resolution::new(4, 4), true);

        supervise(tokio::spawn(async {}), Arc::new(status_tx), writer).await;

        assert_eq!(*status_rx.borrow(), CompositorStatus::Idle);
        assert!(!output.is_ended());
    }
}
