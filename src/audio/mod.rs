pub mod convert;
pub mod graph;
pub mod mixer;

pub use convert::{convert_channels, LinearResampler};
pub use graph::{GraphFormat, SummingNode};
pub use mixer::{AudioMixer, MixerConfig};

use serde::{Deserialize, Serialize};

/// Which audio goes into a recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioMode {
    None,
    #[default]
    Microphone,
    System,
    Both,
}

impl AudioMode {
    pub fn wants_microphone(&self) -> bool {
        matches!(self, AudioMode::Microphone | AudioMode::Both)
    }

    pub fn wants_system(&self) -> bool {
        matches!(self, AudioMode::System | AudioMode::Both)
    }
}

impl std::str::FromStr for AudioMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(AudioMode::None),
            "microphone" | "mic" => Ok(AudioMode::Microphone),
            "system" => Ok(AudioMode::System),
            "both" => Ok(AudioMode::Both),
            other => anyhow::bail!("Unknown audio mode: {} (expected none, microphone, system or both)", other),
        }
    }
}
