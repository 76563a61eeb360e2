//! Execution strategies and the context they run with
//!
//! A strategy is prepared against the screen track (which is where a
//! missing platform capability shows up) and then spawned with a
//! `PipelineContext` that it owns until the pipeline exits.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::canvas::RenderTarget;
use super::geometry::{overlay_rect, OverlayConfig};
use super::host::{BackgroundLock, Host};
use crate::capture::{EndReason, VideoFrame, VideoTrack, VideoTrackWriter};
use crate::error::CompositorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    /// Driven by the screen source's push delivery
    FrameDriven,
    /// Driven by the host's paint primitive or a timer
    Polling,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::FrameDriven => "frame-driven",
            StrategyKind::Polling => "polling",
        }
    }

    /// The strategy tried when this one cannot initialize
    pub fn fallback(&self) -> StrategyKind {
        match self {
            StrategyKind::FrameDriven => StrategyKind::Polling,
            StrategyKind::Polling => StrategyKind::FrameDriven,
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StrategyKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "frame-driven" => Ok(StrategyKind::FrameDriven),
            "polling" => Ok(StrategyKind::Polling),
            other => anyhow::bail!("Unknown compositor strategy: {}", other),
        }
    }
}

/// Scheduling primitive used by the polling strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Schedule {
    /// Host paint primitive (visible)
    Paint,
    /// Fixed 1/fps timer (hidden)
    Timer,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompositorStatus {
    Idle,
    Running {
        strategy: StrategyKind,
        schedule: Option<Schedule>,
    },
    Failed {
        error: CompositorError,
    },
}

impl CompositorStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, CompositorStatus::Running { .. })
    }
}

/// Frame counters for one compositing session
#[derive(Debug, Default)]
pub struct PipelineStats {
    emitted: AtomicU64,
    dropped: AtomicU64,
}

impl PipelineStats {
    pub fn frames_emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }
}

/// How a pipeline loop finished
#[derive(Debug)]
pub(crate) enum Exit {
    Shutdown,
    ScreenEnded(EndReason),
}

/// Everything a running pipeline owns
pub(crate) struct PipelineContext {
    pub screen: VideoTrack,
    pub canvas: RenderTarget,
    pub overlay: watch::Receiver<OverlayConfig>,
    pub camera: watch::Receiver<Option<VideoTrack>>,
    pub camera_stale_after: Duration,
    pub fps: u32,
    pub output: VideoTrackWriter,
    pub shutdown: watch::Receiver<bool>,
    pub status: Arc<watch::Sender<CompositorStatus>>,
    pub stats: Arc<PipelineStats>,
    /// Held for the pipeline's lifetime; dropped on every exit path
    pub background_lock: Option<BackgroundLock>,
}

impl PipelineContext {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / self.fps as u64)
    }

    /// Draw the screen frame and, if a fresh camera frame exists, the overlay
    ///
    /// Returns false when the screen frame could not be drawn; the canvas
    /// then still holds the previous frame and nothing should be emitted.
    pub fn render(&mut self, screen: &VideoFrame) -> bool {
        if !self.canvas.draw_frame(screen) {
            warn!(
                "Skipping malformed screen frame: {}x{} with {} bytes",
                screen.width,
                screen.height,
                screen.data.len()
            );
            return false;
        }

        let overlay = *self.overlay.borrow();
        let camera = self.camera.borrow().clone();
        let Some(camera) = camera else {
            return true;
        };
        let Some(frame) = self.fresh_camera_frame(&camera) else {
            return true;
        };

        let rect = overlay_rect(self.canvas.width(), self.canvas.height(), &overlay);
        if !self.canvas.draw_overlay(&frame, &rect) && !frame.is_well_formed() {
            warn!(
                "Skipping malformed camera frame: {}x{} with {} bytes",
                frame.width,
                frame.height,
                frame.data.len()
            );
        }
        true
    }

    /// Latest camera frame, unless it ended, has no pixels, or arrived more
    /// than `camera_stale_after` before the frame now being drawn
    fn fresh_camera_frame(&self, camera: &VideoTrack) -> Option<Arc<VideoFrame>> {
        if camera.is_ended() {
            return None;
        }
        let frame = camera.latest()?;
        if frame.is_empty() {
            return None;
        }
        match camera.latest_age() {
            Some(age) if age <= self.camera_stale_after => Some(frame),
            _ => None,
        }
    }

    /// Push the current canvas downstream
    pub fn emit(&self, timestamp_us: i64) {
        if self.output.push(self.canvas.snapshot(timestamp_us)) {
            self.stats.emitted.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Close the output and publish the terminal status
    pub fn finish(self, exit: Exit) {
        match exit {
            Exit::Shutdown => {
                info!("Compositor pipeline stopped");
                self.output.end(EndReason::Stopped);
            }
            Exit::ScreenEnded(reason) => {
                warn!("Screen source ended during compositing: {}", reason);
                self.status.send_replace(CompositorStatus::Failed {
                    error: CompositorError::ScreenEnded,
                });
                self.output.end(reason);
            }
        }
        if self.background_lock.is_some() {
            debug!("Releasing background throttling lock");
        }
    }
}

/// Resolve once shutdown is requested or the compositor goes away
pub(crate) async fn shutdown_requested(mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// One way of driving the compositing loop
pub(crate) trait Strategy: Send {
    fn kind(&self) -> StrategyKind;

    /// Acquire what the strategy needs from the screen and host
    ///
    /// Fails with `CompositorError::Unsupported` when the platform lacks
    /// the primitive this strategy depends on.
    fn prepare(&mut self, screen: &VideoTrack, host: &dyn Host) -> Result<(), CompositorError>;

    /// Run the pipeline until shutdown or the screen ends
    fn spawn(self: Box<Self>, ctx: PipelineContext) -> JoinHandle<()>;
}

pub(crate) fn strategy_for(kind: StrategyKind) -> Box<dyn Strategy> {
    match kind {
        StrategyKind::FrameDriven => Box::new(super::frame_driven::FrameDriven::default()),
        StrategyKind::Polling => Box::new(super::polling::Polling::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_kind_parse() {
        assert_eq!("polling".parse::<StrategyKind>().unwrap(), StrategyKind::Polling);
        assert_eq!(
            "frame-driven".parse::<StrategyKind>().unwrap(),
            StrategyKind::FrameDriven
        );
        assert!("vsync".parse::<StrategyKind>().is_err());
    }

    #[test]
    fn test_fallback_is_the_other_strategy() {
        assert_eq!(StrategyKind::FrameDriven.fallback(), StrategyKind::Polling);
        assert_eq!(StrategyKind::Polling.fallback(), StrategyKind::FrameDriven);
    }
}
