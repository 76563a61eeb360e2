//! Encoder seam
//!
//! The recorder drives an [`Encoder`] and collects the chunks it hands off
//! over a channel. Factories advertise which formats they can produce.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

use super::format::MediaFormat;
use crate::compositor::CombinedFeed;
use crate::error::RecorderError;

/// Settings fixed for one recording
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderOptions {
    pub video_bits_per_second: u64,
    /// Chunk hand-off period
    pub timeslice: Duration,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        Self {
            video_bits_per_second: 4_000_000,
            timeslice: Duration::from_millis(1000),
        }
    }
}

/// What an encoder reports while running
#[derive(Debug, Clone, PartialEq)]
pub enum EncoderEvent {
    /// Encoded bytes, in order
    Chunk(Vec<u8>),
    /// The encoder failed; no further chunks follow
    Error(String),
}

#[async_trait]
pub trait Encoder: Send {
    fn format(&self) -> &MediaFormat;

    /// Begin consuming `feed`; chunks and errors go to `events`
    ///
    /// The encoder drops its sender once it has flushed after `stop` or
    /// failed, which closes the channel.
    async fn start(
        &mut self,
        feed: &CombinedFeed,
        events: mpsc::Sender<EncoderEvent>,
    ) -> Result<(), RecorderError>;

    fn pause(&mut self);

    fn resume(&mut self);

    /// Flush the remainder as a final chunk and stop
    async fn stop(&mut self);
}

pub trait EncoderFactory: Send + Sync {
    fn supports(&self, format: &MediaFormat) -> bool;

    fn create(
        &self,
        format: &MediaFormat,
        options: EncoderOptions,
    ) -> Result<Box<dyn Encoder>, RecorderError>;
}
