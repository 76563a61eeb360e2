pub mod audio;
pub mod capture;
pub mod compositor;
pub mod config;
pub mod error;
pub mod http;
pub mod recorder;
pub mod studio;

pub use audio::{AudioMixer, AudioMode, MixerConfig};
pub use capture::{
    AudioFrame, AudioStreamSource, AudioTrack, CaptureProvider, ScreenCapture, SyntheticCapture,
    SyntheticConfig, VideoFrame, VideoTrack,
};
pub use compositor::{
    CameraPosition, CombinedFeed, Compositor, CompositorConfig, CompositorOptions,
    CompositorStatus, HeadlessHost, Host, OverlayConfig, OverlayPatch, StrategyKind,
};
pub use config::Config;
pub use error::{CompositorError, ErrorKind, MixerError, RecorderError, StudioError};
pub use http::{create_router, AppState};
pub use recorder::{Artifact, Recorder, RecorderOptions, RecordingState, SegmentReader};
pub use studio::{Studio, StudioSettings, StudioStats};
