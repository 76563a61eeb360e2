use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

/// Push-delivery buffer per track. Slow subscribers lag and skip frames.
const DELIVERY_CAPACITY: usize = 64;

/// RGBA8 video frame
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGBA pixels, `width * height * 4` bytes
    pub data: Vec<u8>,
    /// Capture timestamp in microseconds
    pub timestamp_us: i64,
}

impl VideoFrame {
    pub fn new(width: u32, height: u32, data: Vec<u8>, timestamp_us: i64) -> Self {
        debug_assert_eq!(data.len(), width as usize * height as usize * 4);
        Self {
            width,
            height,
            data,
            timestamp_us,
        }
    }

    /// Frame filled with a single RGBA colour
    pub fn solid(width: u32, height: u32, rgba: [u8; 4], timestamp_us: i64) -> Self {
        let mut data = vec![0u8; width as usize * height as usize * 4];
        for pixel in data.chunks_exact_mut(4) {
            pixel.copy_from_slice(&rgba);
        }
        Self {
            width,
            height,
            data,
            timestamp_us,
        }
    }

    /// Pixel at (x, y) as [R, G, B, A]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let offset = (y as usize * self.width as usize + x as usize) * 4;
        [
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
            self.data[offset + 3],
        ]
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Whether `data` holds exactly `width * height` RGBA pixels
    pub fn is_well_formed(&self) -> bool {
        self.data.len() == self.width as usize * self.height as usize * 4
    }
}

/// Audio stream source type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioStreamSource {
    /// System audio (applications, browser, etc.)
    System,
    /// Microphone input
    Microphone,
    /// Output of the mixing graph
    Mixed,
}

/// Audio sample data (16-bit PCM, interleaved)
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since the source started
    pub timestamp_ms: u64,
    /// Audio stream source
    pub source: AudioStreamSource,
}

impl AudioFrame {
    /// Number of sample frames (samples per channel)
    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.frame_count() as u64 * 1000 / self.sample_rate as u64
    }
}

/// Why a track stopped producing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// The consumer called `stop`
    Stopped,
    /// Device unplugged or the user stopped sharing
    Disconnected,
    /// Capture permission was revoked
    PermissionRevoked,
    /// The source reported an error
    Failed(String),
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndReason::Stopped => write!(f, "stopped"),
            EndReason::Disconnected => write!(f, "disconnected"),
            EndReason::PermissionRevoked => write!(f, "permission revoked"),
            EndReason::Failed(msg) => write!(f, "failed: {}", msg),
        }
    }
}

/// Notification that a track has ended
///
/// Cloneable and independent of how the source is implemented. Each
/// subscriber awaits it on its own.
#[derive(Debug, Clone)]
pub struct EndedSignal {
    rx: watch::Receiver<Option<EndReason>>,
}

impl EndedSignal {
    pub fn reason(&self) -> Option<EndReason> {
        self.rx.borrow().clone()
    }

    pub fn is_ended(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// Resolve once the track ends
    pub async fn wait(mut self) -> EndReason {
        loop {
            if let Some(reason) = self.rx.borrow_and_update().clone() {
                return reason;
            }
            if self.rx.changed().await.is_err() {
                return self.rx.borrow().clone().unwrap_or(EndReason::Disconnected);
            }
        }
    }
}

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// What a video track carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoKind {
    Screen,
    Camera,
    Composited,
}

/// Last frame of a feed and when it arrived
#[derive(Debug)]
struct Latest<F> {
    frame: Arc<F>,
    received_at: Instant,
}

impl<F> Clone for Latest<F> {
    fn clone(&self) -> Self {
        Self {
            frame: Arc::clone(&self.frame),
            received_at: self.received_at,
        }
    }
}

/// Shared plumbing behind a track and its writer
#[derive(Debug)]
struct Feed<F> {
    id: Uuid,
    label: String,
    latest: watch::Sender<Option<Latest<F>>>,
    delivery: Option<broadcast::Sender<Arc<F>>>,
    ended: watch::Sender<Option<EndReason>>,
}

impl<F> Feed<F> {
    fn new(label: String, push_delivery: bool) -> Self {
        let (latest, _) = watch::channel(None);
        let (ended, _) = watch::channel(None);
        let delivery = push_delivery.then(|| broadcast::channel(DELIVERY_CAPACITY).0);
        Self {
            id: Uuid::new_v4(),
            label,
            latest,
            delivery,
            ended,
        }
    }

    fn push(&self, frame: F) -> bool {
        if self.ended.borrow().is_some() {
            return false;
        }
        let frame = Arc::new(frame);
        if let Some(delivery) = &self.delivery {
            // No subscribers is fine; the frame is still visible via `latest`.
            let _ = delivery.send(Arc::clone(&frame));
        }
        self.latest.send_replace(Some(Latest {
            frame,
            received_at: Instant::now(),
        }));
        true
    }

    fn latest(&self) -> Option<Arc<F>> {
        self.latest.borrow().as_ref().map(|l| Arc::clone(&l.frame))
    }

    fn latest_age(&self) -> Option<Duration> {
        self.latest.borrow().as_ref().map(|l| l.received_at.elapsed())
    }

    fn end(&self, reason: EndReason) -> bool {
        let changed = self.ended.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason.clone());
                true
            } else {
                false
            }
        });
        if changed {
            debug!("Track '{}' ({}) ended: {}", self.label, self.id, reason);
        }
        changed
    }

    fn ended(&self) -> EndedSignal {
        EndedSignal {
            rx: self.ended.subscribe(),
        }
    }
}

/// Consumer handle to a live video source
#[derive(Debug, Clone)]
pub struct VideoTrack {
    feed: Arc<Feed<VideoFrame>>,
    kind: VideoKind,
    resolution: Resolution,
}

/// Producer side of a [`VideoTrack`], held by whatever captures frames
#[derive(Debug, Clone)]
pub struct VideoTrackWriter {
    feed: Arc<Feed<VideoFrame>>,
}

/// Create a connected video writer/track pair
///
/// `push_delivery` declares whether the source can hand frames to
/// subscribers as they are produced. Without it consumers can only poll
/// the latest frame.
pub fn video_track(
    label: impl Into<String>,
    kind: VideoKind,
    resolution: Resolution,
    push_delivery: bool,
) -> (VideoTrackWriter, VideoTrack) {
    let feed = Arc::new(Feed::new(label.into(), push_delivery));
    (
        VideoTrackWriter {
            feed: Arc::clone(&feed),
        },
        VideoTrack {
            feed,
            kind,
            resolution,
        },
    )
}

impl VideoTrack {
    pub fn id(&self) -> Uuid {
        self.feed.id
    }

    pub fn label(&self) -> &str {
        &self.feed.label
    }

    pub fn kind(&self) -> VideoKind {
        self.kind
    }

    /// Native resolution
    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn supports_frame_delivery(&self) -> bool {
        self.feed.delivery.is_some()
    }

    /// Subscribe to push delivery, `None` if the source cannot push
    pub fn subscribe(&self) -> Option<broadcast::Receiver<Arc<VideoFrame>>> {
        self.feed.delivery.as_ref().map(|tx| tx.subscribe())
    }

    /// Most recent frame, if any has been produced
    pub fn latest(&self) -> Option<Arc<VideoFrame>> {
        self.feed.latest()
    }

    /// Time since the most recent frame arrived
    pub fn latest_age(&self) -> Option<Duration> {
        self.feed.latest_age()
    }

    pub fn ended(&self) -> EndedSignal {
        self.feed.ended()
    }

    pub fn is_ended(&self) -> bool {
        self.feed.ended.borrow().is_some()
    }

    /// Stop the source; a no-op if it already ended
    pub fn stop(&self) {
        self.feed.end(EndReason::Stopped);
    }

    /// Whether two handles refer to the same underlying source
    pub fn same_source(&self, other: &VideoTrack) -> bool {
        Arc::ptr_eq(&self.feed, &other.feed)
    }
}

impl VideoTrackWriter {
    /// Publish a frame. Returns false once the track has ended.
    pub fn push(&self, frame: VideoFrame) -> bool {
        self.feed.push(frame)
    }

    /// End the track. Returns false if it had already ended.
    pub fn end(&self, reason: EndReason) -> bool {
        self.feed.end(reason)
    }

    pub fn ended(&self) -> EndedSignal {
        self.feed.ended()
    }

    pub fn is_ended(&self) -> bool {
        self.feed.ended.borrow().is_some()
    }
}

/// Consumer handle to a live audio source
#[derive(Debug, Clone)]
pub struct AudioTrack {
    feed: Arc<Feed<AudioFrame>>,
    source: AudioStreamSource,
    sample_rate: u32,
    channels: u16,
}

/// Producer side of an [`AudioTrack`]
#[derive(Debug, Clone)]
pub struct AudioTrackWriter {
    feed: Arc<Feed<AudioFrame>>,
}

/// Create a connected audio writer/track pair
pub fn audio_track(
    label: impl Into<String>,
    source: AudioStreamSource,
    sample_rate: u32,
    channels: u16,
) -> (AudioTrackWriter, AudioTrack) {
    let feed = Arc::new(Feed::new(label.into(), true));
    (
        AudioTrackWriter {
            feed: Arc::clone(&feed),
        },
        AudioTrack {
            feed,
            source,
            sample_rate,
            channels,
        },
    )
}

impl AudioTrack {
    pub fn id(&self) -> Uuid {
        self.feed.id
    }

    pub fn label(&self) -> &str {
        &self.feed.label
    }

    pub fn source(&self) -> AudioStreamSource {
        self.source
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<AudioFrame>> {
        match &self.feed.delivery {
            Some(tx) => tx.subscribe(),
            // Audio feeds are always created with push delivery.
            None => broadcast::channel(1).1,
        }
    }

    pub fn ended(&self) -> EndedSignal {
        self.feed.ended()
    }

    pub fn is_ended(&self) -> bool {
        self.feed.ended.borrow().is_some()
    }

    pub fn stop(&self) {
        self.feed.end(EndReason::Stopped);
    }

    pub fn same_source(&self, other: &AudioTrack) -> bool {
        Arc::ptr_eq(&self.feed, &other.feed)
    }
}

impl AudioTrackWriter {
    pub fn push(&self, frame: AudioFrame) -> bool {
        self.feed.push(frame)
    }

    pub fn end(&self, reason: EndReason) -> bool {
        self.feed.end(reason)
    }

    pub fn ended(&self) -> EndedSignal {
        self.feed.ended()
    }

    pub fn is_ended(&self) -> bool {
        self.feed.ended.borrow().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_push_reaches_subscribers_and_latest() {
        let (writer, track) = video_track("screen", VideoKind::Screen, Resolution::new(2, 2), true);
        let mut rx = track.subscribe().unwrap();

        assert!(writer.push(VideoFrame::solid(2, 2, [1, 2, 3, 255], 10)));

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.timestamp_us, 10);
        assert_eq!(track.latest().unwrap().pixel(1, 1), [1, 2, 3, 255]);
    }

    #[tokio::test]
    async fn test_no_push_delivery() {
        let (writer, track) = video_track("canvas", VideoKind::Screen, Resolution::new(1, 1), false);
        assert!(!track.supports_frame_delivery());
        assert!(track.subscribe().is_none());

        writer.push(VideoFrame::solid(1, 1, [0, 0, 0, 255], 0));
        assert!(track.latest().is_some());
    }

    #[tokio::test]
    async fn test_end_is_idempotent_and_observable() {
        let (writer, track) = audio_track("mic", AudioStreamSource::Microphone, 48000, 1);
        let signal = track.ended();

        assert!(writer.end(EndReason::Disconnected));
        assert!(!writer.end(EndReason::Stopped));
        track.stop();

        assert_eq!(signal.wait().await, EndReason::Disconnected);
        assert!(!writer.push(AudioFrame {
            samples: vec![0; 4],
            sample_rate: 48000,
            channels: 1,
            timestamp_ms: 0,
            source: AudioStreamSource::Microphone,
        }));
    }

    #[test]
    fn test_audio_frame_duration() {
        let frame = AudioFrame {
            samples: vec![0; 960],
            sample_rate: 48000,
            channels: 2,
            timestamp_ms: 0,
            source: AudioStreamSource::System,
        };
        assert_eq!(frame.frame_count(), 480);
        assert_eq!(frame.duration_ms(), 10);
    }
}
