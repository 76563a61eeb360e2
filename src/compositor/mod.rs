//! Frame compositor
//!
//! Overlays a mirrored, rounded camera picture on the screen feed and
//! publishes the result as a new video track. Two execution strategies
//! exist (frame-driven and polling); one is chosen per session with
//! automatic fallback.

mod canvas;
mod frame_driven;
pub mod geometry;
pub mod host;
mod polling;
mod session;
mod strategy;

pub use canvas::{RenderTarget, RING_WIDTH};
pub use frame_driven::FrameGate;
pub use geometry::{
    cover_crop, overlay_rect, CameraPosition, CropRect, OverlayConfig, OverlayPatch, OverlayRect,
};
pub use host::{BackgroundLock, HeadlessHost, Host, Visibility};
pub use session::{Compositor, CompositorOptions};
pub use strategy::{CompositorStatus, PipelineStats, Schedule, StrategyKind};

use crate::capture::{AudioTrack, VideoTrack};

/// Highest frame rate a session runs at; higher requests are clamped
pub const MAX_FPS: u32 = 120;

/// Per-session compositing parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompositorConfig {
    pub fps: u32,
    pub overlay: OverlayConfig,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            fps: 30,
            overlay: OverlayConfig::default(),
        }
    }
}

/// Composited video plus at most one audio track, ready for recording
#[derive(Debug, Clone)]
pub struct CombinedFeed {
    video: Option<VideoTrack>,
    audio: Option<AudioTrack>,
}

impl CombinedFeed {
    pub fn new(video: Option<VideoTrack>, audio: Option<AudioTrack>) -> Self {
        Self { video, audio }
    }

    pub fn video(&self) -> Option<&VideoTrack> {
        self.video.as_ref()
    }

    pub fn audio(&self) -> Option<&AudioTrack> {
        self.audio.as_ref()
    }

    pub fn video_tracks(&self) -> usize {
        self.video.iter().count()
    }

    pub fn audio_tracks(&self) -> usize {
        self.audio.iter().count()
    }

    /// Same feed with the audio track replaced
    pub fn with_audio(mut self, audio: Option<AudioTrack>) -> Self {
        self.audio = audio;
        self
    }
}
