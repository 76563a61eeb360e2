// Signal routing graph behind the audio mixer
//
// Each input node converts its track to the context format and forwards
// the samples to a single summing node. The summing node mixes fixed
// render quanta with per-input gain and clipping, and pushes the result
// into the context's destination track.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::convert::{convert_channels, LinearResampler};
use crate::capture::{AudioFrame, AudioStreamSource, AudioTrack, AudioTrackWriter};

/// Format every graph node produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl GraphFormat {
    /// Interleaved samples in `ms` milliseconds of audio
    pub fn samples_for_ms(&self, ms: u64) -> usize {
        (self.sample_rate as u64 * ms / 1000) as usize * self.channels as usize
    }
}

#[derive(Debug)]
struct InputBuffer {
    gain: f32,
    samples: VecDeque<i16>,
    ended: bool,
}

/// Sums converted inputs in fixed quanta
#[derive(Debug)]
pub struct SummingNode {
    inputs: Vec<InputBuffer>,
    quantum: usize,
    max_delay: usize,
}

impl SummingNode {
    /// `quantum` and `max_delay` are in interleaved samples
    pub fn new(gains: &[f32], quantum: usize, max_delay: usize) -> Self {
        Self {
            inputs: gains
                .iter()
                .map(|&gain| InputBuffer {
                    gain,
                    samples: VecDeque::new(),
                    ended: false,
                })
                .collect(),
            quantum: quantum.max(1),
            max_delay: max_delay.max(quantum),
        }
    }

    pub fn push(&mut self, input: usize, samples: &[i16]) {
        if let Some(buffer) = self.inputs.get_mut(input) {
            if !buffer.ended {
                buffer.samples.extend(samples.iter().copied());
            }
        }
    }

    /// Mark an input as finished; it contributes silence from here on
    pub fn end(&mut self, input: usize) {
        if let Some(buffer) = self.inputs.get_mut(input) {
            buffer.ended = true;
        }
    }

    pub fn all_ended(&self) -> bool {
        self.inputs.iter().all(|b| b.ended && b.samples.is_empty())
    }

    fn ready(&self) -> bool {
        let full = |b: &InputBuffer| b.samples.len() >= self.quantum;
        if self.inputs.iter().all(full) {
            return true;
        }
        if !self.inputs.iter().any(full) {
            return false;
        }
        // Some input is short. Pad it if it is finished or has stalled for
        // longer than the allowed delay behind the others.
        let ahead = self.inputs.iter().map(|b| b.samples.len()).max().unwrap_or(0);
        self.inputs
            .iter()
            .filter(|b| !full(b))
            .all(|b| b.ended || ahead >= self.max_delay)
    }

    /// Mix every complete quantum that is ready
    pub fn drain(&mut self) -> Vec<Vec<i16>> {
        let mut quanta = Vec::new();
        while self.ready() {
            let mut mixed = Vec::with_capacity(self.quantum);
            for _ in 0..self.quantum {
                let mut sum = 0.0f32;
                for input in &mut self.inputs {
                    let sample = input.samples.pop_front().unwrap_or(0);
                    sum += sample as f32 * input.gain;
                }
                mixed.push(sum.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16);
            }
            quanta.push(mixed);
        }
        quanta
    }
}

enum NodeEvent {
    Samples(usize, Vec<i16>),
    Ended(usize),
}

/// Counts live node tasks; decremented when the task future is dropped
struct NodeGuard(Arc<AtomicUsize>);

impl NodeGuard {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for NodeGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A connected set of graph nodes
pub struct Graph {
    nodes: Vec<JoinHandle<()>>,
}

/// Input of a graph: a source track and its gain
pub struct GraphInput {
    pub track: AudioTrack,
    pub gain: f32,
}

impl Graph {
    /// Spawn the input and summing nodes feeding `destination`
    pub fn connect(
        inputs: Vec<GraphInput>,
        format: GraphFormat,
        quantum_ms: u64,
        max_delay_ms: u64,
        destination: AudioTrackWriter,
        position_frames: Arc<AtomicU64>,
        live_nodes: &Arc<AtomicUsize>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(64);
        let gains: Vec<f32> = inputs.iter().map(|i| i.gain).collect();
        let summing = SummingNode::new(
            &gains,
            format.samples_for_ms(quantum_ms),
            format.samples_for_ms(max_delay_ms),
        );

        let mut nodes = Vec::with_capacity(inputs.len() + 1);
        for (index, input) in inputs.into_iter().enumerate() {
            let guard = NodeGuard::new(live_nodes);
            // Frames pushed right after connect must not be missed
            let frames = input.track.subscribe();
            nodes.push(tokio::spawn(run_input(
                index,
                input.track,
                frames,
                format,
                tx.clone(),
                guard,
            )));
        }
        drop(tx);

        let guard = NodeGuard::new(live_nodes);
        nodes.push(tokio::spawn(run_summing(
            rx,
            summing,
            format,
            destination,
            position_frames,
            guard,
        )));

        Self { nodes }
    }

    /// Abort every node and wait until they are gone
    pub async fn disconnect(self) {
        for node in &self.nodes {
            node.abort();
        }
        for node in self.nodes {
            let _ = node.await;
        }
    }
}

async fn run_input(
    index: usize,
    track: AudioTrack,
    mut frames: broadcast::Receiver<Arc<AudioFrame>>,
    format: GraphFormat,
    tx: mpsc::Sender<NodeEvent>,
    _guard: NodeGuard,
) {
    let mut resampler = LinearResampler::new(track.sample_rate(), format.sample_rate, format.channels);
    let ended = track.ended().wait();
    tokio::pin!(ended);

    loop {
        tokio::select! {
            reason = &mut ended => {
                debug!("Mixer input '{}' ended: {}", track.label(), reason);
                break;
            }
            received = frames.recv() => match received {
                Ok(frame) => {
                    let converted = convert_channels(&frame.samples, frame.channels, format.channels);
                    let resampled = resampler.process(&converted);
                    if tx.send(NodeEvent::Samples(index, resampled)).await.is_err() {
                        return;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Mixer input '{}' lagged, {} frames lost", track.label(), skipped);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    let _ = tx.send(NodeEvent::Ended(index)).await;
}

async fn run_summing(
    mut rx: mpsc::Receiver<NodeEvent>,
    mut summing: SummingNode,
    format: GraphFormat,
    destination: AudioTrackWriter,
    position_frames: Arc<AtomicU64>,
    _guard: NodeGuard,
) {
    while let Some(event) = rx.recv().await {
        match event {
            NodeEvent::Samples(input, samples) => summing.push(input, &samples),
            NodeEvent::Ended(input) => summing.end(input),
        }

        for samples in summing.drain() {
            let frames = (samples.len() / format.channels as usize) as u64;
            let start = position_frames.fetch_add(frames, Ordering::SeqCst);
            let frame = AudioFrame {
                samples,
                sample_rate: format.sample_rate,
                channels: format.channels,
                timestamp_ms: start * 1000 / format.sample_rate as u64,
                source: AudioStreamSource::Mixed,
            };
            if !destination.push(frame) {
                return;
            }
        }

        if summing.all_ended() {
            debug!("All mixer inputs ended");
            break;
        }
    }
}
