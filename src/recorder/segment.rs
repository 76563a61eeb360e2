// Built-in segment encoder
//
// Writes the composited feed into a simple tagged container:
//
//   header:  "SMX1" | u16 format len | format | u64 bitrate | u32 width | u32 height
//   video:   'V' | i64 ts_us | u32 width | u32 height | u32 len | RLE RGBA
//   audio:   'A' | u64 ts_ms | u32 rate | u16 channels | u8 source | u32 count | i16 LE samples
//
// All integers are little-endian. Records are buffered and handed off as a
// chunk every timeslice; the header travels in the first chunk.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::encoder::{Encoder, EncoderEvent, EncoderFactory, EncoderOptions};
use super::format::{MediaFormat, SEGMENT_MIME};
use crate::capture::{AudioFrame, AudioStreamSource, VideoFrame};
use crate::compositor::CombinedFeed;
use crate::error::RecorderError;

const MAGIC: &[u8; 4] = b"SMX1";
const VIDEO_TAG: u8 = b'V';
const AUDIO_TAG: u8 = b'A';
const MAX_RUN: usize = 255;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SegmentError {
    #[error("Not a screenmix artifact (bad magic)")]
    BadMagic,

    #[error("Artifact truncated at byte {0}")]
    Truncated(usize),

    #[error("Unknown record tag 0x{tag:02x} at byte {offset}")]
    UnknownRecord { tag: u8, offset: usize },

    #[error("Corrupt record at byte {offset}: {reason}")]
    Corrupt { offset: usize, reason: String },
}

/// Run-length encode RGBA pixels as (run, r, g, b, a) groups
pub fn rle_encode(rgba: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut pixels = rgba.chunks_exact(4).peekable();

    while let Some(pixel) = pixels.next() {
        let mut run = 1;
        while run < MAX_RUN && pixels.peek() == Some(&pixel) {
            pixels.next();
            run += 1;
        }
        out.push(run as u8);
        out.extend_from_slice(pixel);
    }

    out
}

/// Decode `rle_encode` output, expecting exactly `pixel_count` pixels
pub fn rle_decode(encoded: &[u8], pixel_count: usize) -> Option<Vec<u8>> {
    if encoded.len() % 5 != 0 {
        return None;
    }
    let mut out = Vec::with_capacity(pixel_count * 4);
    for group in encoded.chunks_exact(5) {
        let run = group[0] as usize;
        if run == 0 {
            return None;
        }
        for _ in 0..run {
            out.extend_from_slice(&group[1..5]);
        }
    }
    (out.len() == pixel_count * 4).then_some(out)
}

/// Artifact header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentHeader {
    pub format: String,
    pub video_bits_per_second: u64,
    pub width: u32,
    pub height: u32,
}

impl SegmentHeader {
    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&(self.format.len() as u16).to_le_bytes());
        out.extend_from_slice(self.format.as_bytes());
        out.extend_from_slice(&self.video_bits_per_second.to_le_bytes());
        out.extend_from_slice(&self.width.to_le_bytes());
        out.extend_from_slice(&self.height.to_le_bytes());
    }
}

fn write_video(frame: &VideoFrame, out: &mut Vec<u8>) {
    let encoded = rle_encode(&frame.data);
    out.push(VIDEO_TAG);
    out.extend_from_slice(&frame.timestamp_us.to_le_bytes());
    out.extend_from_slice(&frame.width.to_le_bytes());
    out.extend_from_slice(&frame.height.to_le_bytes());
    out.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
    out.extend_from_slice(&encoded);
}

fn write_audio(frame: &AudioFrame, out: &mut Vec<u8>) {
    out.push(AUDIO_TAG);
    out.extend_from_slice(&frame.timestamp_ms.to_le_bytes());
    out.extend_from_slice(&frame.sample_rate.to_le_bytes());
    out.extend_from_slice(&frame.channels.to_le_bytes());
    out.push(source_code(frame.source));
    out.extend_from_slice(&(frame.samples.len() as u32).to_le_bytes());
    for sample in &frame.samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
}

fn source_code(source: AudioStreamSource) -> u8 {
    match source {
        AudioStreamSource::System => 0,
        AudioStreamSource::Microphone => 1,
        AudioStreamSource::Mixed => 2,
    }
}

fn source_from_code(code: u8) -> Option<AudioStreamSource> {
    match code {
        0 => Some(AudioStreamSource::System),
        1 => Some(AudioStreamSource::Microphone),
        2 => Some(AudioStreamSource::Mixed),
        _ => None,
    }
}

/// A decoded record
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Video(VideoFrame),
    Audio(AudioFrame),
}

/// Fully parsed artifact
#[derive(Debug, Clone)]
pub struct Segment {
    pub header: SegmentHeader,
    pub records: Vec<Record>,
}

impl Segment {
    pub fn video_frames(&self) -> impl Iterator<Item = &VideoFrame> {
        self.records.iter().filter_map(|r| match r {
            Record::Video(frame) => Some(frame),
            Record::Audio(_) => None,
        })
    }

    pub fn audio_frames(&self) -> impl Iterator<Item = &AudioFrame> {
        self.records.iter().filter_map(|r| match r {
            Record::Audio(frame) => Some(frame),
            Record::Video(_) => None,
        })
    }

    /// Span between the first and last video timestamps, in microseconds
    pub fn video_span_us(&self) -> i64 {
        let mut timestamps = self.video_frames().map(|f| f.timestamp_us);
        let Some(first) = timestamps.next() else {
            return 0;
        };
        let last = timestamps.last().unwrap_or(first);
        last - first
    }
}

/// Sequential reader over an artifact
pub struct SegmentReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SegmentReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Parse a whole artifact
    pub fn parse(data: &'a [u8]) -> Result<Segment, SegmentError> {
        let mut reader = Self::new(data);
        let header = reader.read_header()?;
        let mut records = Vec::new();
        while let Some(record) = reader.next_record()? {
            records.push(record);
        }
        Ok(Segment { header, records })
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], SegmentError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(SegmentError::Truncated(self.pos))?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], SegmentError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, SegmentError> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16, SegmentError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, SegmentError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64, SegmentError> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn i64(&mut self) -> Result<i64, SegmentError> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    pub fn read_header(&mut self) -> Result<SegmentHeader, SegmentError> {
        if self.data.len() < MAGIC.len() || &self.data[..MAGIC.len()] != MAGIC {
            return Err(SegmentError::BadMagic);
        }
        self.pos = MAGIC.len();

        let format_len = self.u16()? as usize;
        let offset = self.pos;
        let format = String::from_utf8(self.take(format_len)?.to_vec()).map_err(|e| {
            SegmentError::Corrupt {
                offset,
                reason: e.to_string(),
            }
        })?;

        Ok(SegmentHeader {
            format,
            video_bits_per_second: self.u64()?,
            width: self.u32()?,
            height: self.u32()?,
        })
    }

    /// Next record, `None` at the end of the data
    pub fn next_record(&mut self) -> Result<Option<Record>, SegmentError> {
        if self.pos >= self.data.len() {
            return Ok(None);
        }

        let offset = self.pos;
        match self.u8()? {
            VIDEO_TAG => {
                let timestamp_us = self.i64()?;
                let width = self.u32()?;
                let height = self.u32()?;
                let len = self.u32()? as usize;
                let encoded = self.take(len)?;
                let data = rle_decode(encoded, width as usize * height as usize).ok_or_else(|| {
                    SegmentError::Corrupt {
                        offset,
                        reason: format!("pixel data does not match {}x{}", width, height),
                    }
                })?;
                Ok(Some(Record::Video(VideoFrame::new(width, height, data, timestamp_us))))
            }
            AUDIO_TAG => {
                let timestamp_ms = self.u64()?;
                let sample_rate = self.u32()?;
                let channels = self.u16()?;
                let source = source_from_code(self.u8()?).ok_or_else(|| SegmentError::Corrupt {
                    offset,
                    reason: "unknown audio source".to_string(),
                })?;
                let count = self.u32()? as usize;
                let bytes = self.take(count * 2)?;
                let samples = bytes
                    .chunks_exact(2)
                    .map(|b| i16::from_le_bytes([b[0], b[1]]))
                    .collect();
                Ok(Some(Record::Audio(AudioFrame {
                    samples,
                    sample_rate,
                    channels,
                    timestamp_ms,
                    source,
                })))
            }
            tag => Err(SegmentError::UnknownRecord { tag, offset }),
        }
    }
}

/// Factory for the built-in format
#[derive(Debug, Clone, Default)]
pub struct SegmentEncoderFactory;

impl EncoderFactory for SegmentEncoderFactory {
    fn supports(&self, format: &MediaFormat) -> bool {
        format.mime() == SEGMENT_MIME
    }

    fn create(
        &self,
        format: &MediaFormat,
        options: EncoderOptions,
    ) -> Result<Box<dyn Encoder>, RecorderError> {
        if !self.supports(format) {
            return Err(RecorderError::EncoderStart(format!(
                "segment encoder cannot produce {}",
                format
            )));
        }
        Ok(Box::new(SegmentEncoder::new(format.clone(), options)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Running,
    Paused,
    Stopping,
}

/// Encoder writing the segment container
pub struct SegmentEncoder {
    format: MediaFormat,
    options: EncoderOptions,
    control: Option<watch::Sender<Control>>,
    task: Option<JoinHandle<()>>,
}

impl SegmentEncoder {
    pub fn new(format: MediaFormat, options: EncoderOptions) -> Self {
        Self {
            format,
            options,
            control: None,
            task: None,
        }
    }

    fn set(&self, from: Control, to: Control) {
        if let Some(control) = &self.control {
            control.send_if_modified(|current| {
                if *current == from {
                    *current = to;
                    true
                } else {
                    false
                }
            });
        }
    }
}

#[async_trait]
impl Encoder for SegmentEncoder {
    fn format(&self) -> &MediaFormat {
        &self.format
    }

    async fn start(
        &mut self,
        feed: &CombinedFeed,
        events: mpsc::Sender<EncoderEvent>,
    ) -> Result<(), RecorderError> {
        if self.task.is_some() {
            return Err(RecorderError::EncoderStart("encoder already started".to_string()));
        }

        let video = feed.video().ok_or(RecorderError::NoVideoTrack)?;
        let video_rx = video.subscribe().ok_or_else(|| {
            RecorderError::EncoderStart("video track has no frame delivery".to_string())
        })?;
        let audio_rx = feed.audio().map(|a| a.subscribe());

        let resolution = video.resolution();
        let header = SegmentHeader {
            format: self.format.mime().to_string(),
            video_bits_per_second: self.options.video_bits_per_second,
            width: resolution.width,
            height: resolution.height,
        };

        let (control_tx, control_rx) = watch::channel(Control::Running);
        self.control = Some(control_tx);
        self.task = Some(tokio::spawn(run_segment_writer(
            header,
            self.options.clone(),
            video_rx,
            audio_rx,
            control_rx,
            events,
        )));

        info!(
            "Segment encoder started: {}x{}, {} bps, timeslice {:?}",
            resolution.width,
            resolution.height,
            self.options.video_bits_per_second,
            self.options.timeslice
        );
        Ok(())
    }

    fn pause(&mut self) {
        self.set(Control::Running, Control::Paused);
    }

    fn resume(&mut self) {
        self.set(Control::Paused, Control::Running);
    }

    async fn stop(&mut self) {
        if let Some(control) = &self.control {
            control.send_replace(Control::Stopping);
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Segment writer task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for SegmentEncoder {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

struct ChunkBuffer {
    header: Option<Vec<u8>>,
    records: Vec<u8>,
    record_count: usize,
}

impl ChunkBuffer {
    fn new(header: &SegmentHeader) -> Self {
        let mut bytes = Vec::new();
        header.write(&mut bytes);
        Self {
            header: Some(bytes),
            records: Vec::new(),
            record_count: 0,
        }
    }

    /// Take buffered records as a chunk; the first chunk carries the header
    fn take_chunk(&mut self) -> Option<Vec<u8>> {
        if self.record_count == 0 {
            return None;
        }
        let mut chunk = self.header.take().unwrap_or_default();
        chunk.append(&mut self.records);
        self.record_count = 0;
        Some(chunk)
    }
}

async fn run_segment_writer(
    header: SegmentHeader,
    options: EncoderOptions,
    mut video: broadcast::Receiver<Arc<VideoFrame>>,
    audio: Option<broadcast::Receiver<Arc<AudioFrame>>>,
    mut control: watch::Receiver<Control>,
    events: mpsc::Sender<EncoderEvent>,
) {
    let expected_len = header.width as usize * header.height as usize * 4;
    let mut buffer = ChunkBuffer::new(&header);

    // Without audio, park on a channel that never yields
    let (_audio_keep_alive, idle_audio) = broadcast::channel::<Arc<AudioFrame>>(1);
    let has_audio = audio.is_some();
    let mut audio = audio.unwrap_or(idle_audio);

    let mut slices = interval_at(Instant::now() + options.timeslice, options.timeslice);
    slices.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut video_open = true;
    let mut audio_open = has_audio;

    loop {
        let state = *control.borrow_and_update();
        if state == Control::Stopping {
            break;
        }
        let running = state == Control::Running;

        tokio::select! {
            biased;
            changed = control.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = slices.tick() => {
                if let Some(chunk) = buffer.take_chunk() {
                    debug!("Segment chunk ready: {} bytes", chunk.len());
                    if events.send(EncoderEvent::Chunk(chunk)).await.is_err() {
                        return;
                    }
                }
            }
            received = video.recv(), if video_open => match received {
                Ok(frame) => {
                    if !running {
                        continue;
                    }
                    if frame.data.len() != expected_len
                        || frame.width != header.width
                        || frame.height != header.height
                    {
                        let message = format!(
                            "video frame {}x{} does not match canvas {}x{}",
                            frame.width, frame.height, header.width, header.height
                        );
                        // Records written before the failure are still delivered
                        if let Some(chunk) = buffer.take_chunk() {
                            let _ = events.send(EncoderEvent::Chunk(chunk)).await;
                        }
                        let _ = events.send(EncoderEvent::Error(message)).await;
                        return;
                    }
                    write_video(&frame, &mut buffer.records);
                    buffer.record_count += 1;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Segment encoder skipped {} video frames", skipped);
                }
                Err(RecvError::Closed) => video_open = false,
            },
            received = audio.recv(), if audio_open => match received {
                Ok(frame) => {
                    if running {
                        write_audio(&frame, &mut buffer.records);
                        buffer.record_count += 1;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Segment encoder skipped {} audio frames", skipped);
                }
                Err(RecvError::Closed) => audio_open = false,
            },
        }
    }

    if let Some(chunk) = buffer.take_chunk() {
        debug!("Final segment chunk: {} bytes", chunk.len());
        let _ = events.send(EncoderEvent::Chunk(chunk)).await;
    }
    debug!("Segment writer finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rle_compresses_runs() {
        let frame = VideoFrame::solid(100, 1, [1, 2, 3, 255], 0);
        let encoded = rle_encode(&frame.data);
        // 100 identical pixels fit in one run
        assert_eq!(encoded, vec![100, 1, 2, 3, 255]);
        assert_eq!(rle_decode(&encoded, 100).unwrap(), frame.data);
    }

    #[test]
    fn test_rle_splits_long_runs() {
        let frame = VideoFrame::solid(300, 1, [0, 0, 0, 255], 0);
        let encoded = rle_encode(&frame.data);
        assert_eq!(encoded.len(), 10);
        assert_eq!(encoded[0], 255);
        assert_eq!(encoded[5], 45);
    }

    #[test]
    fn test_rle_decode_rejects_wrong_size() {
        let encoded = rle_encode(&VideoFrame::solid(4, 1, [9, 9, 9, 9], 0).data);
        assert!(rle_decode(&encoded, 5).is_none());
        assert!(rle_decode(&encoded[..4], 4).is_none());
    }

    #[test]
    fn test_reader_parses_header_and_records() {
        let header = SegmentHeader {
            format: SEGMENT_MIME.to_string(),
            video_bits_per_second: 4_000_000,
            width: 2,
            height: 1,
        };
        let mut bytes = Vec::new();
        header.write(&mut bytes);
        write_video(&VideoFrame::solid(2, 1, [5, 6, 7, 255], 33_333), &mut bytes);
        write_audio(
            &AudioFrame {
                samples: vec![-1, 2, -3, 4],
                sample_rate: 48_000,
                channels: 2,
                timestamp_ms: 20,
                source: AudioStreamSource::Mixed,
            },
            &mut bytes,
        );

        let segment = SegmentReader::parse(&bytes).unwrap();
        assert_eq!(segment.header, header);
        assert_eq!(segment.records.len(), 2);
        assert_eq!(segment.video_frames().next().unwrap().timestamp_us, 33_333);
        assert_eq!(segment.audio_frames().next().unwrap().samples, vec![-1, 2, -3, 4]);
    }

    #[test]
    fn test_reader_errors() {
        assert_eq!(SegmentReader::parse(b"WEBM").unwrap_err(), SegmentError::BadMagic);

        let header = SegmentHeader {
            format: SEGMENT_MIME.to_string(),
            video_bits_per_second: 1,
            width: 1,
            height: 1,
        };
        let mut bytes = Vec::new();
        header.write(&mut bytes);
        let header_len = bytes.len();

        bytes.push(b'X');
        assert!(matches!(
            SegmentReader::parse(&bytes).unwrap_err(),
            SegmentError::UnknownRecord { tag: b'X', .. }
        ));

        bytes.truncate(header_len);
        bytes.extend_from_slice(&[VIDEO_TAG, 1, 2]);
        assert!(matches!(
            SegmentReader::parse(&bytes).unwrap_err(),
            SegmentError::Truncated(_)
        ));
    }

    #[test]
    fn test_factory_supports_only_builtin() {
        let factory = SegmentEncoderFactory;
        assert!(factory.supports(&MediaFormat::segment()));
        assert!(!factory.supports(&MediaFormat::new("video/webm")));
        assert!(factory
            .create(&MediaFormat::new("video/webm"), EncoderOptions::default())
            .is_err());
    }

    #[test]
    fn test_chunk_buffer_header_only_in_first_chunk() {
        let header = SegmentHeader {
            format: SEGMENT_MIME.to_string(),
            video_bits_per_second: 1,
            width: 1,
            height: 1,
        };
        let mut buffer = ChunkBuffer::new(&header);
        assert!(buffer.take_chunk().is_none());

        write_video(&VideoFrame::solid(1, 1, [0, 0, 0, 255], 0), &mut buffer.records);
        buffer.record_count += 1;
        let first = buffer.take_chunk().unwrap();
        assert_eq!(&first[..4], MAGIC);

        write_video(&VideoFrame::solid(1, 1, [0, 0, 0, 255], 1), &mut buffer.records);
        buffer.record_count += 1;
        let second = buffer.take_chunk().unwrap();
        assert_eq!(second[0], VIDEO_TAG);
    }
}
