use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::audio::AudioMode;
use crate::compositor::{CameraPosition, StrategyKind};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub recording: RecordingConfig,
    pub camera: CameraConfig,
    pub compositor: CompositorSection,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "screenmix".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 3030,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub fps: u32,
    pub video_bitrate_mbps: f64,
    pub audio_source: AudioMode,
    pub timeslice_ms: u64,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            fps: 30,
            video_bitrate_mbps: 4.0,
            audio_source: AudioMode::Microphone,
            timeslice_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub enabled: bool,
    pub position: CameraPosition,
    pub size_ratio: f32,
    pub corner_roundness: f32,
    pub padding: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            position: CameraPosition::BottomLeft,
            size_ratio: 0.25,
            corner_roundness: 1.0,
            padding: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CompositorSection {
    pub preferred_strategy: StrategyKind,
    /// Host paint cadence used by the polling strategy
    pub paint_hz: u32,
    pub camera_stale_ms: u64,
}

impl Default for CompositorSection {
    fn default() -> Self {
        Self {
            preferred_strategy: StrategyKind::FrameDriven,
            paint_hz: 60,
            camera_stale_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub directory: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: "recordings".to_string(),
        }
    }
}

impl Config {
    /// Load from a TOML file (optional) with `SCREENMIX__SECTION__KEY`
    /// environment overrides
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("SCREENMIX")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read config from {}", path))?;

        let config: Config = settings
            .try_deserialize()
            .context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML text, without environment overrides
    pub fn from_toml(text: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()?;
        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.recording.fps == 0 {
            bail!("recording.fps must be at least 1");
        }
        if self.recording.timeslice_ms == 0 {
            bail!("recording.timeslice_ms must be at least 1");
        }
        if self.compositor.paint_hz == 0 {
            bail!("compositor.paint_hz must be at least 1");
        }
        Ok(())
    }
}
