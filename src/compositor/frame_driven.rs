//! Frame-driven pipeline
//!
//! Consumes the screen's push delivery directly. The source paces the
//! pipeline, so host throttling has no effect on it.

use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::host::Host;
use super::strategy::{shutdown_requested, Exit, PipelineContext, Strategy, StrategyKind};
use crate::capture::{EndReason, VideoFrame, VideoTrack};
use crate::error::CompositorError;

/// Drops frames that arrive sooner than the target interval after the
/// last emitted one
#[derive(Debug, Clone)]
pub struct FrameGate {
    interval_us: i64,
    last_emitted_us: Option<i64>,
}

impl FrameGate {
    pub fn new(fps: u32) -> Self {
        Self {
            interval_us: 1_000_000 / fps.max(1) as i64,
            last_emitted_us: None,
        }
    }

    /// Whether a frame with this timestamp should be emitted
    ///
    /// Admitting a frame moves the gate forward; a rejected frame leaves it
    /// untouched.
    pub fn admit(&mut self, timestamp_us: i64) -> bool {
        if let Some(last) = self.last_emitted_us {
            if timestamp_us - last < self.interval_us {
                return false;
            }
        }
        self.last_emitted_us = Some(timestamp_us);
        true
    }
}

#[derive(Default)]
pub(crate) struct FrameDriven {
    frames: Option<broadcast::Receiver<Arc<VideoFrame>>>,
}

impl Strategy for FrameDriven {
    fn kind(&self) -> StrategyKind {
        StrategyKind::FrameDriven
    }

    fn prepare(&mut self, screen: &VideoTrack, _host: &dyn Host) -> Result<(), CompositorError> {
        let frames = screen.subscribe().ok_or_else(|| CompositorError::Unsupported {
            strategy: StrategyKind::FrameDriven.as_str(),
            reason: "screen source has no native frame delivery".to_string(),
        })?;
        self.frames = Some(frames);
        Ok(())
    }

    fn spawn(self: Box<Self>, mut ctx: PipelineContext) -> JoinHandle<()> {
        let frames = self.frames;

        tokio::spawn(async move {
            let Some(mut frames) = frames else {
                // spawn without prepare; nothing to drive the loop
                ctx.finish(Exit::ScreenEnded(EndReason::Failed(
                    "frame delivery was not prepared".to_string(),
                )));
                return;
            };

            info!("Frame-driven compositing started at {} fps", ctx.fps);
            let mut gate = FrameGate::new(ctx.fps);
            let shutdown = shutdown_requested(ctx.shutdown.clone());
            let ended = ctx.screen.ended().wait();
            tokio::pin!(shutdown, ended);

            let exit = loop {
                tokio::select! {
                    biased;
                    _ = &mut shutdown => break Exit::Shutdown,
                    reason = &mut ended => break Exit::ScreenEnded(reason),
                    received = frames.recv() => match received {
                        Ok(frame) => {
                            // A malformed frame must not move the gate
                            if !frame.is_well_formed() {
                                warn!(
                                    "Dropping malformed screen frame: {}x{} with {} bytes",
                                    frame.width,
                                    frame.height,
                                    frame.data.len()
                                );
                                ctx.stats.record_drop();
                                continue;
                            }
                            if !gate.admit(frame.timestamp_us) {
                                ctx.stats.record_drop();
                                continue;
                            }
                            if !ctx.render(&frame) {
                                ctx.stats.record_drop();
                                continue;
                            }
                            ctx.emit(frame.timestamp_us);
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            debug!("Compositor lagged behind screen by {} frames", skipped);
                        }
                        Err(RecvError::Closed) => break Exit::ScreenEnded(EndReason::Disconnected),
                    },
                }
            };

            ctx.finish(exit);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_drops_frames_inside_interval() {
        let mut gate = FrameGate::new(30);
        assert!(gate.admit(0));
        assert!(!gate.admit(16_666));
        assert!(gate.admit(33_333));
        assert!(!gate.admit(50_000));
        assert!(gate.admit(66_666));
    }

    #[test]
    fn test_gate_rejects_out_of_order_frames() {
        let mut gate = FrameGate::new(10);
        assert!(gate.admit(500_000));
        assert!(!gate.admit(100_000));
        assert!(gate.admit(600_000));
    }

    #[test]
    fn test_emitted_deltas_respect_interval() {
        let mut gate = FrameGate::new(24);
        let interval = 1_000_000 / 24;
        // 60 Hz input
        let emitted: Vec<i64> = (0..120)
            .map(|i| i * 16_667)
            .filter(|ts| gate.admit(*ts))
            .collect();

        assert!(emitted.len() > 1);
        for pair in emitted.windows(2) {
            assert!(pair[1] - pair[0] >= interval);
        }
    }
}
