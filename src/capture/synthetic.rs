// Synthetic capture provider
//
// Generates test patterns instead of talking to real devices:
// - Screen: horizontal/vertical gradient with a progress bar along the top
// - Camera: split image whose halves cycle colour (shows mirroring)
// - Microphone / system audio: sine tones
//
// Each source runs as a tokio task until its track is stopped or ended.

use anyhow::{bail, Result};
use std::f32::consts::PI;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::track::{
    audio_track, video_track, AudioFrame, AudioStreamSource, AudioTrack, AudioTrackWriter,
    EndReason, Resolution, VideoFrame, VideoKind, VideoTrack, VideoTrackWriter,
};
use super::{CaptureProvider, ScreenCapture};

/// Configuration for the synthetic sources
#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub screen: Resolution,
    pub screen_fps: u32,
    /// Whether the screen track supports push delivery
    pub frame_delivery: bool,
    /// Whether sharing the screen can include system audio
    pub system_audio: bool,
    pub camera: Resolution,
    pub camera_fps: u32,
    pub camera_available: bool,
    pub microphone_available: bool,
    pub sample_rate: u32,
    /// Duration of each generated audio frame
    pub audio_frame_ms: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            screen: Resolution::new(1280, 720),
            screen_fps: 30,
            frame_delivery: true,
            system_audio: true,
            camera: Resolution::new(640, 480),
            camera_fps: 30,
            camera_available: true,
            microphone_available: true,
            sample_rate: 48000,
            audio_frame_ms: 20,
        }
    }
}

/// Capture provider backed by generated test patterns
pub struct SyntheticCapture {
    config: SyntheticConfig,
    screen_writer: Mutex<Option<VideoTrackWriter>>,
}

impl SyntheticCapture {
    pub fn new(config: SyntheticConfig) -> Self {
        info!(
            "Synthetic capture initialized: screen {}x{}@{} (push delivery: {}), camera {}x{}",
            config.screen.width,
            config.screen.height,
            config.screen_fps,
            config.frame_delivery,
            config.camera.width,
            config.camera.height
        );

        Self {
            config,
            screen_writer: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SyntheticConfig {
        &self.config
    }

    /// End the most recently shared screen as if the user stopped sharing
    pub fn simulate_screen_disconnect(&self) -> bool {
        let writer = match self.screen_writer.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        match writer {
            Some(writer) => writer.end(EndReason::Disconnected),
            None => false,
        }
    }
}

impl Default for SyntheticCapture {
    fn default() -> Self {
        Self::new(SyntheticConfig::default())
    }
}

#[async_trait::async_trait]
impl CaptureProvider for SyntheticCapture {
    async fn acquire_screen(&self, with_audio: bool) -> Result<ScreenCapture> {
        let (writer, video) = video_track(
            "synthetic-screen",
            VideoKind::Screen,
            self.config.screen,
            self.config.frame_delivery,
        );
        spawn_video(writer.clone(), self.config.screen, self.config.screen_fps, draw_screen);

        if let Ok(mut guard) = self.screen_writer.lock() {
            *guard = Some(writer);
        }

        let audio = if with_audio && self.config.system_audio {
            let (writer, track) =
                audio_track("synthetic-system", AudioStreamSource::System, self.config.sample_rate, 2);
            spawn_tone(writer, self.config.sample_rate, 2, 220.0, self.config.audio_frame_ms);
            Some(track)
        } else {
            None
        };

        info!(
            "Screen shared ({}x{}, system audio: {})",
            self.config.screen.width,
            self.config.screen.height,
            audio.is_some()
        );

        Ok(ScreenCapture { video, audio })
    }

    async fn acquire_camera(&self) -> Result<VideoTrack> {
        if !self.config.camera_available {
            bail!("No camera found. Please connect a camera.");
        }

        let (writer, track) =
            video_track("synthetic-camera", VideoKind::Camera, self.config.camera, true);
        spawn_video(writer, self.config.camera, self.config.camera_fps, draw_camera);

        Ok(track)
    }

    async fn acquire_microphone(&self) -> Result<AudioTrack> {
        if !self.config.microphone_available {
            bail!("No microphone found.");
        }

        let (writer, track) = audio_track(
            "synthetic-microphone",
            AudioStreamSource::Microphone,
            self.config.sample_rate,
            1,
        );
        spawn_tone(writer, self.config.sample_rate, 1, 440.0, self.config.audio_frame_ms);

        Ok(track)
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}

type Pattern = fn(&mut [u8], Resolution, u64, u32);

fn spawn_video(writer: VideoTrackWriter, resolution: Resolution, fps: u32, pattern: Pattern) {
    let fps = fps.max(1);
    tokio::spawn(async move {
        let start = Instant::now();
        let mut ticker = interval(Duration::from_micros(1_000_000 / fps as u64));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let ended = writer.ended().wait();
        tokio::pin!(ended);
        let mut index = 0u64;

        loop {
            tokio::select! {
                reason = &mut ended => {
                    debug!("Synthetic video source stopped: {}", reason);
                    break;
                }
                _ = ticker.tick() => {
                    let mut data =
                        vec![0u8; resolution.width as usize * resolution.height as usize * 4];
                    pattern(&mut data, resolution, index, fps);
                    let timestamp_us = start.elapsed().as_micros() as i64;
                    let frame = VideoFrame::new(resolution.width, resolution.height, data, timestamp_us);
                    if !writer.push(frame) {
                        break;
                    }
                    index += 1;
                }
            }
        }
    });
}

fn spawn_tone(
    writer: AudioTrackWriter,
    sample_rate: u32,
    channels: u16,
    frequency: f32,
    frame_ms: u64,
) {
    tokio::spawn(async move {
        let frames_per_chunk = (sample_rate as u64 * frame_ms / 1000) as usize;
        let mut ticker = interval(Duration::from_millis(frame_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
        let ended = writer.ended().wait();
        tokio::pin!(ended);
        let mut n = 0u64;
        let mut timestamp_ms = 0u64;

        loop {
            tokio::select! {
                _ = &mut ended => break,
                _ = ticker.tick() => {
                    let mut samples = Vec::with_capacity(frames_per_chunk * channels as usize);
                    for _ in 0..frames_per_chunk {
                        let phase = 2.0 * PI * frequency * (n as f32 / sample_rate as f32);
                        let value = (phase.sin() * 8000.0) as i16;
                        for _ in 0..channels {
                            samples.push(value);
                        }
                        n += 1;
                    }
                    let frame = AudioFrame {
                        samples,
                        sample_rate,
                        channels,
                        timestamp_ms,
                        source: if channels == 1 {
                            AudioStreamSource::Microphone
                        } else {
                            AudioStreamSource::System
                        },
                    };
                    if !writer.push(frame) {
                        break;
                    }
                    timestamp_ms += frame_ms;
                }
            }
        }
    });
}

fn draw_screen(data: &mut [u8], resolution: Resolution, index: u64, fps: u32) {
    let (w, h) = (resolution.width as usize, resolution.height as usize);
    let bar_height = (h / 60).max(4).min(h);
    let bar_width = w * (index % fps as u64) as usize / fps as usize;
    let blue = ((index * 3) % 256) as u8;

    for (y, row) in data.chunks_exact_mut(w * 4).enumerate() {
        let green = (y * 255 / h.max(1)) as u8;
        for (x, pixel) in row.chunks_exact_mut(4).enumerate() {
            if y < bar_height && x < bar_width {
                pixel.copy_from_slice(&[255, 255, 255, 255]);
            } else {
                pixel.copy_from_slice(&[(x * 255 / w.max(1)) as u8, green, blue, 255]);
            }
        }
    }
}

fn draw_camera(data: &mut [u8], resolution: Resolution, index: u64, _fps: u32) {
    let w = resolution.width as usize;
    let shade = ((index * 5) % 128) as u8;
    let left = [200, shade, 40, 255];
    let right = [40, shade, 200, 255];

    for row in data.chunks_exact_mut(w * 4) {
        for (x, pixel) in row.chunks_exact_mut(4).enumerate() {
            pixel.copy_from_slice(if x < w / 2 { &left } else { &right });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_screen_frames_flow_until_stopped() -> Result<()> {
        let capture = SyntheticCapture::new(SyntheticConfig {
            screen: Resolution::new(16, 8),
            ..Default::default()
        });

        let screen = capture.acquire_screen(true).await?;
        assert!(screen.has_system_audio());
        let mut frames = screen.video.subscribe().unwrap();

        let first = frames.recv().await?;
        let second = frames.recv().await?;
        assert_eq!((first.width, first.height), (16, 8));
        assert!(second.timestamp_us > first.timestamp_us);

        screen.stop();
        assert!(screen.video.is_ended());
        Ok(())
    }

    #[tokio::test]
    async fn test_unavailable_camera_is_an_error() {
        let capture = SyntheticCapture::new(SyntheticConfig {
            camera_available: false,
            ..Default::default()
        });

        let err = capture.acquire_camera().await.unwrap_err();
        assert!(err.to_string().contains("No camera found"));
    }

    #[tokio::test]
    async fn test_simulated_disconnect_ends_screen() -> Result<()> {
        let capture = SyntheticCapture::new(SyntheticConfig {
            screen: Resolution::new(4, 4),
            ..Default::default()
        });
        let screen = capture.acquire_screen(false).await?;

        assert!(capture.simulate_screen_disconnect());
        assert_eq!(screen.video.ended().wait().await, EndReason::Disconnected);
        assert!(!capture.simulate_screen_disconnect());
        Ok(())
    }
}
