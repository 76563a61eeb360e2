//! Live capture sources
//!
//! The engine consumes screen, camera and microphone feeds as tracks. How
//! the frames are produced lives behind [`CaptureProvider`]; the crate ships
//! a synthetic provider for the demo binary and tests.

pub mod synthetic;
mod track;

pub use synthetic::{SyntheticCapture, SyntheticConfig};
pub use track::{
    audio_track, video_track, AudioFrame, AudioStreamSource, AudioTrack, AudioTrackWriter,
    EndReason, EndedSignal, Resolution, VideoFrame, VideoKind, VideoTrack, VideoTrackWriter,
};

use anyhow::Result;

/// Result of acquiring the screen
#[derive(Debug, Clone)]
pub struct ScreenCapture {
    pub video: VideoTrack,
    /// System audio shared along with the screen, if the user granted it
    pub audio: Option<AudioTrack>,
}

impl ScreenCapture {
    pub fn has_system_audio(&self) -> bool {
        self.audio.is_some()
    }

    /// Stop every track of the capture
    pub fn stop(&self) {
        self.video.stop();
        if let Some(audio) = &self.audio {
            audio.stop();
        }
    }
}

/// Capture acquisition layer
///
/// Implementations handle permissions and device selection; failures come
/// back as descriptive errors.
#[async_trait::async_trait]
pub trait CaptureProvider: Send + Sync {
    /// Acquire the screen, optionally with system audio
    async fn acquire_screen(&self, with_audio: bool) -> Result<ScreenCapture>;

    /// Acquire the camera
    async fn acquire_camera(&self) -> Result<VideoTrack>;

    /// Acquire the microphone
    async fn acquire_microphone(&self) -> Result<AudioTrack>;

    /// Provider name for logging
    fn name(&self) -> &str;
}
