// Audio mixer for combining system audio and microphone streams
//
// This module decides which audio feed goes into a recording:
// - No source requested: no audio track at all
// - One source available: that source's track, untouched
// - Both available: the output of a summing graph (mic 1.0, system 0.8)
//
// The mixing context (destination track + graph) is created lazily on the
// first mix and kept until cleanup, so every recording made while both
// sources are attached sees the same destination track.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use super::graph::{Graph, GraphFormat, GraphInput};
use super::AudioMode;
use crate::capture::{audio_track, AudioStreamSource, AudioTrack, AudioTrackWriter, EndReason};
use crate::error::MixerError;

/// Configuration for audio mixer
#[derive(Debug, Clone)]
pub struct MixerConfig {
    /// Output sample rate of the mixing context
    pub sample_rate: u32,
    /// Output channels of the mixing context
    pub channels: u16,
    /// Render quantum of the summing node
    pub quantum_ms: u64,
    /// How far one input may run ahead before the other is padded (default: 200ms)
    pub max_buffer_delay_ms: u64,
    pub microphone_gain: f32,
    pub system_gain: f32,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            quantum_ms: 10,
            max_buffer_delay_ms: 200,
            microphone_gain: 1.0,
            system_gain: 0.8,
        }
    }
}

/// Long-lived destination plus whatever graph currently feeds it
struct MixingContext {
    writer: AudioTrackWriter,
    output: AudioTrack,
    graph: Option<Graph>,
    position_frames: Arc<AtomicU64>,
}

/// Audio mixer that combines the microphone and system audio
pub struct AudioMixer {
    config: MixerConfig,
    microphone: Option<AudioTrack>,
    system: Option<AudioTrack>,
    context: Option<MixingContext>,
    live_nodes: Arc<AtomicUsize>,
    error: Option<MixerError>,
}

impl AudioMixer {
    pub fn new(config: MixerConfig) -> Self {
        info!(
            "Audio mixer initialized: {}Hz, {} channels, gains mic {} / system {}",
            config.sample_rate, config.channels, config.microphone_gain, config.system_gain
        );

        Self {
            config,
            microphone: None,
            system: None,
            context: None,
            live_nodes: Arc::new(AtomicUsize::new(0)),
            error: None,
        }
    }

    pub fn attach_microphone(&mut self, track: AudioTrack) {
        debug!("Microphone attached: {}", track.label());
        if let Some(previous) = self.microphone.replace(track) {
            previous.stop();
        }
    }

    /// Attach the audio shared along with the screen
    pub fn attach_system_audio(&mut self, track: AudioTrack) {
        debug!("System audio attached: {}", track.label());
        self.system = Some(track);
    }

    /// Stop and forget the microphone
    pub fn detach_microphone(&mut self) {
        if let Some(track) = self.microphone.take() {
            track.stop();
            debug!("Microphone detached");
        }
    }

    /// Stop and forget the system audio
    pub fn detach_system_audio(&mut self) {
        if let Some(track) = self.system.take() {
            track.stop();
            debug!("System audio detached");
        }
    }

    pub fn has_microphone(&self) -> bool {
        live(&self.microphone).is_some()
    }

    pub fn has_system_audio(&self) -> bool {
        live(&self.system).is_some()
    }

    /// Audio track to record for `mode`
    ///
    /// `Ok(None)` means there is nothing to record. When both sources are
    /// present the summing graph is (re)built; any previous graph is
    /// disconnected first.
    pub async fn mixed_track(&mut self, mode: AudioMode) -> Result<Option<AudioTrack>, MixerError> {
        let microphone = live(&self.microphone).cloned();
        let system = live(&self.system).cloned();

        let track = match mode {
            AudioMode::None => None,
            AudioMode::Microphone => microphone,
            AudioMode::System => system,
            AudioMode::Both => match (microphone, system) {
                (Some(microphone), Some(system)) => {
                    match self.build_graph(microphone, system).await {
                        Ok(track) => Some(track),
                        Err(e) => {
                            warn!("{}", e);
                            self.error = Some(e.clone());
                            return Err(e);
                        }
                    }
                }
                // Single source goes straight through
                (Some(only), None) | (None, Some(only)) => Some(only),
                (None, None) => None,
            },
        };

        debug!(
            "Audio for {:?}: {}",
            mode,
            track.as_ref().map(|t| t.label()).unwrap_or("none")
        );
        Ok(track)
    }

    async fn build_graph(
        &mut self,
        microphone: AudioTrack,
        system: AudioTrack,
    ) -> Result<AudioTrack, MixerError> {
        if Handle::try_current().is_err() {
            return Err(MixerError::Unavailable(
                "no async runtime to host the mixing graph".to_string(),
            ));
        }

        let format = GraphFormat {
            sample_rate: self.config.sample_rate,
            channels: self.config.channels,
        };
        let context = self.context.get_or_insert_with(|| {
            let (writer, output) =
                audio_track("mixed-audio", AudioStreamSource::Mixed, format.sample_rate, format.channels);
            info!("Mixing context created ({}Hz, {} channels)", format.sample_rate, format.channels);
            MixingContext {
                writer,
                output,
                graph: None,
                position_frames: Arc::new(AtomicU64::new(0)),
            }
        });

        if let Some(previous) = context.graph.take() {
            debug!("Disconnecting previous mixing graph");
            previous.disconnect().await;
        }

        let inputs = vec![
            GraphInput {
                track: microphone,
                gain: self.config.microphone_gain,
            },
            GraphInput {
                track: system,
                gain: self.config.system_gain,
            },
        ];
        context.graph = Some(Graph::connect(
            inputs,
            format,
            self.config.quantum_ms,
            self.config.max_buffer_delay_ms,
            context.writer.clone(),
            Arc::clone(&context.position_frames),
            &self.live_nodes,
        ));
        info!("Mixing graph connected: microphone + system audio");

        Ok(context.output.clone())
    }

    /// Stop the microphone, tear down the graph and close the context
    pub async fn cleanup(&mut self) {
        self.detach_microphone();
        self.system = None;

        if let Some(mut context) = self.context.take() {
            if let Some(graph) = context.graph.take() {
                graph.disconnect().await;
            }
            context.writer.end(EndReason::Stopped);
            info!("Mixing context closed");
        }
        self.error = None;
    }

    /// Number of graph node tasks currently alive
    pub fn live_graph_nodes(&self) -> usize {
        self.live_nodes.load(Ordering::SeqCst)
    }

    pub fn has_context(&self) -> bool {
        self.context.is_some()
    }

    pub fn last_error(&self) -> Option<&MixerError> {
        self.error.as_ref()
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }
}

impl Default for AudioMixer {
    fn default() -> Self {
        Self::new(MixerConfig::default())
    }
}

fn live(track: &Option<AudioTrack>) -> Option<&AudioTrack> {
    track.as_ref().filter(|t| !t.is_ended())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(source: AudioStreamSource) -> (AudioTrackWriter, AudioTrack) {
        audio_track(format!("{:?}", source), source, 48_000, 1)
    }

    #[tokio::test]
    async fn test_none_mode_has_no_track() {
        let mut mixer = AudioMixer::default();
        let (_w, mic) = track(AudioStreamSource::Microphone);
        mixer.attach_microphone(mic);

        assert!(mixer.mixed_track(AudioMode::None).await.unwrap().is_none());
        assert!(!mixer.has_context());
    }

    #[tokio::test]
    async fn test_single_source_passes_through() {
        let mut mixer = AudioMixer::default();
        let (_w, mic) = track(AudioStreamSource::Microphone);
        mixer.attach_microphone(mic.clone());

        let mixed = mixer.mixed_track(AudioMode::Both).await.unwrap().unwrap();
        assert!(mixed.same_source(&mic));
        assert_eq!(mixer.live_graph_nodes(), 0);
        assert!(mixer.mixed_track(AudioMode::System).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ended_source_is_ignored() {
        let mut mixer = AudioMixer::default();
        let (_w, mic) = track(AudioStreamSource::Microphone);
        let (_s, system) = track(AudioStreamSource::System);
        mixer.attach_microphone(mic);
        mixer.attach_system_audio(system.clone());

        system.stop();
        let mixed = mixer.mixed_track(AudioMode::Both).await.unwrap().unwrap();
        assert_eq!(mixed.source(), AudioStreamSource::Microphone);
    }

    #[test]
    fn test_unavailable_without_runtime() {
        let mut mixer = AudioMixer::default();
        let (_m, mic) = track(AudioStreamSource::Microphone);
        let (_s, system) = track(AudioStreamSource::System);
        mixer.attach_microphone(mic);
        mixer.attach_system_audio(system);

        let result = futures::executor::block_on(mixer.mixed_track(AudioMode::Both));
        assert!(matches!(result, Err(MixerError::Unavailable(_))));
        assert!(mixer.last_error().is_some());
    }
}
