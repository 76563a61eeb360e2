//! Studio orchestration
//!
//! This module provides the `Studio` that the CLI and HTTP layer drive:
//! - Screen, camera and microphone acquisition through a capture provider
//! - Audio source selection and mixing
//! - Compositing with live camera and overlay updates
//! - Recording lifecycle and artifact retrieval
//! - Aggregated status and per-component errors

mod settings;
mod stats;
#[allow(clippy::module_inception)]
mod studio;

pub use settings::{CameraSettings, CompositorSettings, RecordingSettings, StudioSettings};
pub use stats::{CompositingStats, ErrorReport, StudioErrors, StudioStats};
pub use studio::Studio;
