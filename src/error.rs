//! Error taxonomy for the compositing and recording engine.
//!
//! Every component error maps onto one of four kinds so callers can decide
//! between retrying, falling back, or giving up.

use serde::Serialize;
use thiserror::Error;

/// Broad classification of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// An input device or feed ended or errored mid-session
    Source,
    /// The compositor or encoder failed to initialize or failed while running
    Pipeline,
    /// A recording produced no data
    EmptyResult,
    /// A required platform primitive is missing
    Unsupported,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompositorError {
    #[error("Screen source does not have a video track")]
    NoScreenVideo,

    #[error("Invalid screen dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("Invalid frame rate: {0}")]
    InvalidFrameRate(u32),

    #[error("Screen capture was disconnected")]
    ScreenEnded,

    #[error("{strategy} compositing is not supported: {reason}")]
    Unsupported {
        strategy: &'static str,
        reason: String,
    },

    #[error("Compositor pipeline error: {0}")]
    Pipeline(String),
}

impl CompositorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CompositorError::ScreenEnded => ErrorKind::Source,
            CompositorError::Unsupported { .. } => ErrorKind::Unsupported,
            CompositorError::NoScreenVideo
            | CompositorError::InvalidDimensions { .. }
            | CompositorError::InvalidFrameRate(_)
            | CompositorError::Pipeline(_) => ErrorKind::Pipeline,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MixerError {
    #[error("Audio mixing is unavailable: {0}")]
    Unavailable(String),
}

impl MixerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MixerError::Unavailable(_) => ErrorKind::Unsupported,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecorderError {
    #[error("Combined feed has no video track")]
    NoVideoTrack,

    #[error("No supported recording format is available")]
    NoSupportedFormat,

    #[error("Failed to start encoder: {0}")]
    EncoderStart(String),

    #[error("Recording error occurred: {0}")]
    Encoder(String),

    #[error("Recording produced no data")]
    EmptyRecording,

    #[error("Screen capture ended; recording was stopped")]
    SourceEnded,
}

impl RecorderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RecorderError::SourceEnded => ErrorKind::Source,
            RecorderError::EmptyRecording => ErrorKind::EmptyResult,
            RecorderError::NoSupportedFormat => ErrorKind::Unsupported,
            RecorderError::NoVideoTrack
            | RecorderError::EncoderStart(_)
            | RecorderError::Encoder(_) => ErrorKind::Pipeline,
        }
    }
}

/// Failures surfaced by the studio orchestrator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StudioError {
    #[error("Screen is not being shared")]
    NotSharing,

    #[error("{0}")]
    Capture(String),

    #[error(transparent)]
    Compositor(#[from] CompositorError),

    #[error(transparent)]
    Recorder(#[from] RecorderError),
}

impl StudioError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StudioError::NotSharing | StudioError::Capture(_) => ErrorKind::Source,
            StudioError::Compositor(e) => e.kind(),
            StudioError::Recorder(e) => e.kind(),
        }
    }
}
