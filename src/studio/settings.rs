use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::audio::AudioMode;
use crate::compositor::{CameraPosition, CompositorOptions, OverlayConfig, StrategyKind};
use crate::config::Config;
use crate::recorder::RecorderOptions;

/// User-facing settings for a studio
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StudioSettings {
    pub camera: CameraSettings,
    pub recording: RecordingSettings,
    pub compositor: CompositorSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraSettings {
    /// Turn the camera on when the studio starts
    pub enabled: bool,
    pub overlay: OverlayConfig,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            overlay: OverlayConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecordingSettings {
    pub fps: u32,
    pub video_bitrate_mbps: f64,
    pub audio_source: AudioMode,
    pub timeslice_ms: u64,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            fps: 30,
            video_bitrate_mbps: 4.0,
            audio_source: AudioMode::Microphone,
            timeslice_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompositorSettings {
    pub preferred_strategy: StrategyKind,
    pub camera_stale_ms: u64,
}

impl Default for CompositorSettings {
    fn default() -> Self {
        Self {
            preferred_strategy: StrategyKind::FrameDriven,
            camera_stale_ms: 1000,
        }
    }
}

impl StudioSettings {
    pub fn from_config(config: &Config) -> Self {
        let camera = &config.camera;
        Self {
            camera: CameraSettings {
                enabled: camera.enabled,
                overlay: OverlayConfig::new(
                    camera.position,
                    camera.size_ratio,
                    camera.corner_roundness,
                    camera.padding,
                ),
            },
            recording: RecordingSettings {
                fps: config.recording.fps,
                video_bitrate_mbps: config.recording.video_bitrate_mbps,
                audio_source: config.recording.audio_source,
                timeslice_ms: config.recording.timeslice_ms,
            },
            compositor: CompositorSettings {
                preferred_strategy: config.compositor.preferred_strategy,
                camera_stale_ms: config.compositor.camera_stale_ms,
            },
        }
    }

    pub fn camera_position(&self) -> CameraPosition {
        self.camera.overlay.position
    }

    pub(crate) fn compositor_options(&self) -> CompositorOptions {
        CompositorOptions {
            preferred: self.compositor.preferred_strategy,
            camera_stale_after: Duration::from_millis(self.compositor.camera_stale_ms),
        }
    }

    pub(crate) fn recorder_options(&self) -> RecorderOptions {
        RecorderOptions {
            video_bitrate_mbps: self.recording.video_bitrate_mbps,
            timeslice: Duration::from_millis(self.recording.timeslice_ms.max(1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_clamps_overlay() {
        let mut config = Config::default();
        config.camera.size_ratio = 0.9;
        config.camera.position = CameraPosition::TopRight;
        config.recording.audio_source = AudioMode::Both;

        let settings = StudioSettings::from_config(&config);
        assert_eq!(settings.camera_position(), CameraPosition::TopRight);
        assert_eq!(settings.camera.overlay.size_ratio, 0.55);
        assert_eq!(settings.recording.audio_source, AudioMode::Both);
    }

    #[test]
    fn test_recorder_options() {
        let settings = StudioSettings::default();
        let options = settings.recorder_options();
        assert_eq!(options.video_bitrate_mbps, 4.0);
        assert_eq!(options.timeslice, Duration::from_secs(1));
    }
}
