use serde::Serialize;

use crate::audio::AudioMode;
use crate::capture::Resolution;
use crate::compositor::{OverlayConfig, Schedule, StrategyKind};
use crate::error::ErrorKind;
use crate::recorder::RecordingSnapshot;

/// Point-in-time view of a studio, as served by the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct StudioStats {
    /// Whether a live screen track is held
    pub is_sharing: bool,

    /// Whether the shared screen came with system audio
    pub has_system_audio: bool,

    pub camera_enabled: bool,
    pub microphone_enabled: bool,
    pub audio_source: AudioMode,

    pub compositing: CompositingStats,

    pub overlay: OverlayConfig,

    pub recording: RecordingSnapshot,

    /// Recording elapsed time as `MM:SS` or `HH:MM:SS`
    pub elapsed: String,

    pub errors: StudioErrors,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CompositingStats {
    pub active: bool,
    pub strategy: Option<StrategyKind>,
    pub schedule: Option<Schedule>,
    pub canvas: Option<Resolution>,
    pub fps: Option<u32>,
    pub frames_emitted: u64,
    pub frames_dropped: u64,
}

/// Last error of each component; each clears independently
#[derive(Debug, Clone, Default, Serialize)]
pub struct StudioErrors {
    pub capture: Option<String>,
    pub compositor: Option<ErrorReport>,
    pub mixer: Option<ErrorReport>,
    pub recorder: Option<ErrorReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
}

impl StudioErrors {
    pub fn is_empty(&self) -> bool {
        self.capture.is_none()
            && self.compositor.is_none()
            && self.mixer.is_none()
            && self.recorder.is_none()
    }
}
