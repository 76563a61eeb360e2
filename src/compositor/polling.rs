//! Polling pipeline
//!
//! Redraws from the screen's latest frame on the host's paint cadence
//! while visible and on a 1/fps timer while hidden. A separate capture
//! ticker samples the render target at the configured frame rate.

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, Interval, MissedTickBehavior};
use tracing::info;

use super::host::{Host, Visibility};
use super::strategy::{
    shutdown_requested, CompositorStatus, Exit, PipelineContext, Schedule, Strategy, StrategyKind,
};
use crate::capture::VideoTrack;
use crate::error::CompositorError;

#[derive(Default)]
pub(crate) struct Polling {
    visibility: Option<watch::Receiver<Visibility>>,
    paint_interval: Duration,
}

fn ticker(period: Duration) -> Interval {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

fn schedule_for(visibility: Visibility) -> Schedule {
    match visibility {
        Visibility::Visible => Schedule::Paint,
        Visibility::Hidden => Schedule::Timer,
    }
}

impl Strategy for Polling {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Polling
    }

    fn prepare(&mut self, _screen: &VideoTrack, host: &dyn Host) -> Result<(), CompositorError> {
        let paint_interval = host.paint_interval();
        if paint_interval.is_zero() {
            return Err(CompositorError::Unsupported {
                strategy: StrategyKind::Polling.as_str(),
                reason: "host has no paint cadence".to_string(),
            });
        }
        self.paint_interval = paint_interval;
        self.visibility = Some(host.visibility());
        Ok(())
    }

    fn spawn(self: Box<Self>, mut ctx: PipelineContext) -> JoinHandle<()> {
        let Polling {
            visibility,
            paint_interval,
        } = *self;

        tokio::spawn(async move {
            let frame_interval = ctx.frame_interval();
            let started = Instant::now();

            // Without a host signal the pipeline stays on the paint cadence.
            let (_keep_alive, mut visibility) = match visibility {
                Some(rx) => (None, rx),
                None => {
                    let (tx, rx) = watch::channel(Visibility::Visible);
                    (Some(tx), rx)
                }
            };

            let mut schedule = schedule_for(*visibility.borrow_and_update());
            let period = |schedule: Schedule| match schedule {
                Schedule::Paint => paint_interval,
                Schedule::Timer => frame_interval,
            };
            let mut draw = ticker(period(schedule));
            let mut capture = ticker(frame_interval);
            let mut visibility_open = true;
            let mut drawn = false;

            ctx.status.send_replace(CompositorStatus::Running {
                strategy: StrategyKind::Polling,
                schedule: Some(schedule),
            });
            info!(
                "Polling compositing started at {} fps ({:?} schedule)",
                ctx.fps, schedule
            );

            let shutdown = shutdown_requested(ctx.shutdown.clone());
            let ended = ctx.screen.ended().wait();
            tokio::pin!(shutdown, ended);

            let exit = loop {
                tokio::select! {
                    biased;
                    _ = &mut shutdown => break Exit::Shutdown,
                    reason = &mut ended => break Exit::ScreenEnded(reason),
                    changed = visibility.changed(), if visibility_open => {
                        if changed.is_err() {
                            visibility_open = false;
                            continue;
                        }
                        let next = schedule_for(*visibility.borrow_and_update());
                        if next != schedule {
                            info!("Visibility changed, switching draw schedule to {:?}", next);
                            schedule = next;
                            draw = ticker(period(schedule));
                            ctx.status.send_replace(CompositorStatus::Running {
                                strategy: StrategyKind::Polling,
                                schedule: Some(schedule),
                            });
                        }
                    }
                    _ = draw.tick() => {
                        // Nothing to draw until the screen produced a frame
                        if let Some(frame) = ctx.screen.latest() {
                            drawn |= ctx.render(&frame);
                        }
                    }
                    _ = capture.tick() => {
                        if drawn {
                            ctx.emit(started.elapsed().as_micros() as i64);
                        }
                    }
                }
            };

            ctx.finish(exit);
        })
    }
}
