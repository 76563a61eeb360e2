use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::encoder::{Encoder, EncoderEvent, EncoderFactory, EncoderOptions};
use super::format::{negotiate, MediaFormat};
use super::state::{RecordingState, Transition};
use crate::capture::EndedSignal;
use crate::compositor::CombinedFeed;
use crate::error::{ErrorKind, RecorderError};

/// Recorder settings
#[derive(Debug, Clone, PartialEq)]
pub struct RecorderOptions {
    /// Video bitrate in megabits per second
    pub video_bitrate_mbps: f64,
    /// Chunk hand-off period
    pub timeslice: Duration,
}

impl Default for RecorderOptions {
    fn default() -> Self {
        Self {
            video_bitrate_mbps: 4.0,
            timeslice: Duration::from_millis(1000),
        }
    }
}

impl RecorderOptions {
    fn encoder_options(&self) -> EncoderOptions {
        EncoderOptions {
            video_bits_per_second: (self.video_bitrate_mbps.max(0.0) * 1_000_000.0) as u64,
            timeslice: self.timeslice,
        }
    }
}

/// Finished recording
#[derive(Debug, Clone, Serialize)]
pub struct Artifact {
    #[serde(skip)]
    pub data: Arc<Vec<u8>>,
    pub format: MediaFormat,
    pub duration_secs: u64,
    pub chunk_count: usize,
    pub started_at: DateTime<Utc>,
}

impl Artifact {
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }

    /// `screen-recording-YYYY-MM-DD-HHMMSS.<ext>`
    pub fn file_name(&self) -> String {
        format!(
            "screen-recording-{}.{}",
            self.started_at.format("%Y-%m-%d-%H%M%S"),
            self.format.extension()
        )
    }

    /// Write the artifact into `dir` under [`Artifact::file_name`]
    pub async fn save(&self, dir: &Path) -> anyhow::Result<PathBuf> {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let path = dir.join(self.file_name());
        tokio::fs::write(&path, self.data.as_slice())
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Saved recording to {} ({} bytes)", path.display(), self.size_bytes());
        Ok(path)
    }
}

/// Published view of the recorder
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecordingSnapshot {
    pub state: RecordingState,
    pub elapsed_secs: u64,
    pub chunk_count: usize,
    pub format: Option<MediaFormat>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub has_artifact: bool,
}

/// Render elapsed seconds as `MM:SS`, or `HH:MM:SS` from one hour
pub fn format_elapsed(secs: u64) -> String {
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

/// Chunks gathered by the collector task
#[derive(Debug, Default)]
struct Collected {
    chunks: Vec<Vec<u8>>,
    error: Option<String>,
}

/// Live encoder plus the tasks that serve it
struct ActiveRecording {
    id: Uuid,
    format: MediaFormat,
    encoder: Box<dyn Encoder>,
    collector: JoinHandle<Collected>,
    supervisor: JoinHandle<()>,
    ticker: Option<JoinHandle<()>>,
    started_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    state: RecordingState,
    session: Option<ActiveRecording>,
}

/// Results of the last recording, readable without the transition lock
#[derive(Debug, Clone, Default)]
struct Outcome {
    artifact: Option<Artifact>,
    error: Option<RecorderError>,
}

struct Shared {
    factory: Arc<dyn EncoderFactory>,
    options: RecorderOptions,
    inner: Mutex<Inner>,
    outcome: watch::Sender<Outcome>,
    elapsed: Arc<AtomicU64>,
    snapshot: Arc<watch::Sender<RecordingSnapshot>>,
}

/// Why a recording is being stopped
enum StopCause {
    Requested,
    /// Stopped by the supervisor; the error is recorded
    Forced(RecorderError),
}

/// Recording state machine
///
/// Cheap to clone; clones share one session. Transitions are serialized by
/// an async mutex. `pause` and `resume` never wait for it: if another
/// transition is in flight they are dropped. The artifact and last error
/// live outside that mutex, so reading them never blocks a transition.
#[derive(Clone)]
pub struct Recorder {
    shared: Arc<Shared>,
}

impl Recorder {
    pub fn new(factory: Arc<dyn EncoderFactory>, options: RecorderOptions) -> Self {
        let (snapshot, _) = watch::channel(RecordingSnapshot::default());
        let (outcome, _) = watch::channel(Outcome::default());
        Self {
            shared: Arc::new(Shared {
                factory,
                options,
                inner: Mutex::new(Inner::default()),
                outcome,
                elapsed: Arc::new(AtomicU64::new(0)),
                snapshot: Arc::new(snapshot),
            }),
        }
    }

    /// Start recording `feed`
    ///
    /// Ignored unless idle. Fails if the feed has no live video track, no
    /// format is supported, or the encoder cannot start; the recorder then
    /// stays idle with the error recorded.
    pub async fn start(&self, feed: &CombinedFeed) -> Result<(), RecorderError> {
        let mut inner = self.shared.inner.lock().await;
        if inner.state.next(Transition::Start).is_none() {
            debug!("Ignoring start while {}", inner.state);
            return Ok(());
        }

        match self.begin(feed).await {
            Ok(session) => {
                info!("Recording {} started ({})", session.id, session.format);
                inner.session = Some(session);
                inner.state = RecordingState::Recording;
                self.set_error(None);
                self.publish(&inner);
                Ok(())
            }
            Err(e) => {
                error!("Failed to start recording: {}", e);
                self.set_error(Some(e.clone()));
                self.publish(&inner);
                Err(e)
            }
        }
    }

    async fn begin(&self, feed: &CombinedFeed) -> Result<ActiveRecording, RecorderError> {
        let video = feed
            .video()
            .filter(|v| !v.is_ended())
            .ok_or(RecorderError::NoVideoTrack)?;

        let format = negotiate(self.shared.factory.as_ref())?;
        let mut encoder = self
            .shared
            .factory
            .create(&format, self.shared.options.encoder_options())?;

        let (events_tx, events_rx) = mpsc::channel(64);
        encoder.start(feed, events_tx).await?;

        let id = Uuid::new_v4();
        let (failure_tx, failure_rx) = watch::channel(None);
        let collector = tokio::spawn(collect_chunks(
            events_rx,
            Arc::clone(&self.shared.snapshot),
            failure_tx,
        ));
        let supervisor = tokio::spawn(supervise(self.clone(), id, video.ended(), failure_rx));

        self.shared.elapsed.store(0, Ordering::SeqCst);
        let ticker = self.spawn_ticker();

        Ok(ActiveRecording {
            id,
            format,
            encoder,
            collector,
            supervisor,
            ticker: Some(ticker),
            started_at: Utc::now(),
        })
    }

    /// Pause; a no-op unless recording
    pub fn pause(&self) {
        let Ok(mut inner) = self.shared.inner.try_lock() else {
            debug!("Transition in progress; ignoring pause");
            return;
        };
        let Some(next) = inner.state.next(Transition::Pause) else {
            debug!("Ignoring pause while {}", inner.state);
            return;
        };

        if let Some(session) = inner.session.as_mut() {
            session.encoder.pause();
            if let Some(ticker) = session.ticker.take() {
                ticker.abort();
            }
        }
        inner.state = next;
        info!(
            "Recording paused at {}",
            format_elapsed(self.shared.elapsed.load(Ordering::SeqCst))
        );
        self.publish(&inner);
    }

    /// Resume; a no-op unless paused
    pub fn resume(&self) {
        let Ok(mut inner) = self.shared.inner.try_lock() else {
            debug!("Transition in progress; ignoring resume");
            return;
        };
        let Some(next) = inner.state.next(Transition::Resume) else {
            debug!("Ignoring resume while {}", inner.state);
            return;
        };

        let ticker = self.spawn_ticker();
        if let Some(session) = inner.session.as_mut() {
            session.encoder.resume();
            session.ticker = Some(ticker);
        } else {
            ticker.abort();
        }
        inner.state = next;
        info!("Recording resumed");
        self.publish(&inner);
    }

    /// Stop and assemble the artifact
    ///
    /// A no-op unless recording or paused. With zero chunks the recorder
    /// returns to idle and reports `EmptyRecording`.
    pub async fn stop(&self) -> Result<(), RecorderError> {
        let mut inner = self.shared.inner.lock().await;
        if !inner.state.is_active() {
            debug!("Ignoring stop while {}", inner.state);
            return Ok(());
        }
        self.finish(&mut inner, StopCause::Requested).await
    }

    /// Called by the supervisor when the source ends or the encoder fails
    async fn force_stop(&self, id: Uuid, cause: RecorderError) {
        let mut inner = self.shared.inner.lock().await;
        let current = inner.session.as_ref().map(|s| s.id);
        if current != Some(id) || !inner.state.is_active() {
            return;
        }
        warn!("Forcing recording {} to stop: {}", id, cause);
        let _ = self.finish(&mut inner, StopCause::Forced(cause)).await;
    }

    async fn finish(
        &self,
        inner: &mut MutexGuard<'_, Inner>,
        cause: StopCause,
    ) -> Result<(), RecorderError> {
        let Some(mut session) = inner.session.take() else {
            inner.state = RecordingState::Idle;
            self.publish(inner);
            return Ok(());
        };

        if let Some(ticker) = session.ticker.take() {
            ticker.abort();
        }
        if matches!(cause, StopCause::Requested) {
            // The supervisor must not race this stop
            session.supervisor.abort();
        }

        session.encoder.stop().await;
        drop(session.encoder);

        let collected = match session.collector.await {
            Ok(collected) => collected,
            Err(e) => Collected {
                chunks: Vec::new(),
                error: Some(format!("chunk collector failed: {}", e)),
            },
        };

        let forced_error = match cause {
            StopCause::Forced(error) => Some(error),
            StopCause::Requested => collected.error.map(RecorderError::Encoder),
        };

        if collected.chunks.is_empty() {
            let error = forced_error.unwrap_or(RecorderError::EmptyRecording);
            warn!("Recording {} produced no data: {}", session.id, error);
            self.shared.elapsed.store(0, Ordering::SeqCst);
            inner.state = RecordingState::Idle;
            self.set_error(Some(error.clone()));
            self.publish(inner);
            return Err(error);
        }

        let chunk_count = collected.chunks.len();
        let data: Vec<u8> = collected.chunks.concat();
        let artifact = Artifact {
            data: Arc::new(data),
            format: session.format,
            duration_secs: self.shared.elapsed.load(Ordering::SeqCst),
            chunk_count,
            started_at: session.started_at,
        };
        info!(
            "Recording {} stopped: {} chunks, {} bytes, {}",
            session.id,
            chunk_count,
            artifact.size_bytes(),
            format_elapsed(artifact.duration_secs)
        );

        self.shared.outcome.send_modify(|o| {
            o.artifact = Some(artifact);
            if let Some(error) = forced_error {
                o.error = Some(error);
            }
        });
        inner.state = RecordingState::Stopped;
        self.publish(inner);
        Ok(())
    }

    /// Drop the artifact and return to idle; a no-op unless stopped
    pub async fn discard(&self) {
        let mut inner = self.shared.inner.lock().await;
        let Some(next) = inner.state.next(Transition::Discard) else {
            debug!("Ignoring discard while {}", inner.state);
            return;
        };
        self.shared.outcome.send_modify(|o| o.artifact = None);
        inner.session = None;
        inner.state = next;
        self.shared.elapsed.store(0, Ordering::SeqCst);
        self.shared.snapshot.send_modify(|s| s.chunk_count = 0);
        info!("Recording discarded");
        self.publish(&inner);
    }

    /// Tear down whatever is running without producing an artifact
    pub async fn shutdown(&self) {
        let mut inner = self.shared.inner.lock().await;
        if let Some(mut session) = inner.session.take() {
            session.supervisor.abort();
            if let Some(ticker) = session.ticker.take() {
                ticker.abort();
            }
            session.encoder.stop().await;
            session.collector.abort();
        }
        self.shared.outcome.send_modify(|o| o.artifact = None);
        inner.state = RecordingState::Idle;
        self.shared.elapsed.store(0, Ordering::SeqCst);
        self.publish(&inner);
    }

    pub fn state(&self) -> RecordingState {
        self.shared.snapshot.borrow().state
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.shared.elapsed.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> RecordingSnapshot {
        self.shared.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RecordingSnapshot> {
        self.shared.snapshot.subscribe()
    }

    pub async fn artifact(&self) -> Option<Artifact> {
        self.shared.outcome.borrow().artifact.clone()
    }

    pub async fn last_error(&self) -> Option<RecorderError> {
        self.shared.outcome.borrow().error.clone()
    }

    pub async fn clear_error(&self) {
        self.set_error(None);
        self.shared.snapshot.send_modify(|s| {
            s.error = None;
            s.error_kind = None;
        });
    }

    fn set_error(&self, error: Option<RecorderError>) {
        self.shared.outcome.send_modify(|o| o.error = error);
    }

    fn spawn_ticker(&self) -> JoinHandle<()> {
        let elapsed = Arc::clone(&self.shared.elapsed);
        let snapshot = Arc::clone(&self.shared.snapshot);
        tokio::spawn(async move {
            let second = Duration::from_secs(1);
            let mut ticks = interval_at(Instant::now() + second, second);
            loop {
                ticks.tick().await;
                let secs = elapsed.fetch_add(1, Ordering::SeqCst) + 1;
                snapshot.send_modify(|s| s.elapsed_secs = secs);
            }
        })
    }

    fn publish(&self, inner: &Inner) {
        let elapsed = self.shared.elapsed.load(Ordering::SeqCst);
        let outcome = self.shared.outcome.borrow().clone();
        let format = inner
            .session
            .as_ref()
            .map(|s| s.format.clone())
            .or_else(|| outcome.artifact.as_ref().map(|a| a.format.clone()));
        self.shared.snapshot.send_modify(|s| {
            s.state = inner.state;
            s.elapsed_secs = elapsed;
            s.format = format;
            s.error = outcome.error.as_ref().map(|e| e.to_string());
            s.error_kind = outcome.error.as_ref().map(|e| e.kind());
            s.has_artifact = outcome.artifact.is_some();
            if let Some(artifact) = &outcome.artifact {
                s.chunk_count = artifact.chunk_count;
            }
        });
    }
}

async fn collect_chunks(
    mut events: mpsc::Receiver<EncoderEvent>,
    snapshot: Arc<watch::Sender<RecordingSnapshot>>,
    failure: watch::Sender<Option<String>>,
) -> Collected {
    let mut collected = Collected::default();
    snapshot.send_modify(|s| s.chunk_count = 0);

    while let Some(event) = events.recv().await {
        match event {
            EncoderEvent::Chunk(chunk) => {
                if chunk.is_empty() {
                    continue;
                }
                collected.chunks.push(chunk);
                let count = collected.chunks.len();
                snapshot.send_modify(|s| s.chunk_count = count);
            }
            EncoderEvent::Error(message) => {
                error!("Encoder error: {}", message);
                collected.error = Some(message.clone());
                failure.send_replace(Some(message));
            }
        }
    }

    collected
}

/// Force the recording to stop when its video source ends or the encoder fails
async fn supervise(
    recorder: Recorder,
    id: Uuid,
    ended: EndedSignal,
    mut failure: watch::Receiver<Option<String>>,
) {
    let encoder_failure = async {
        loop {
            if let Some(message) = failure.borrow_and_update().clone() {
                return message;
            }
            if failure.changed().await.is_err() {
                // Collector finished cleanly
                std::future::pending::<()>().await;
            }
        }
    };

    let cause = tokio::select! {
        reason = ended.wait() => {
            info!("Recorded video source ended: {}", reason);
            RecorderError::SourceEnded
        }
        message = encoder_failure => RecorderError::Encoder(message),
    };

    recorder.force_stop(id, cause).await;
}
