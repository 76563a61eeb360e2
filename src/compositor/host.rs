//! Host environment the compositor runs inside
//!
//! The host decides whether the application is visible, how often the
//! "next paint" primitive fires, and whether background throttling can be
//! prevented. `HeadlessHost` is the in-process implementation used by the
//! binary and tests.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Visible,
    Hidden,
}

/// Guard that keeps background throttling disabled while held
///
/// Released on drop.
pub struct BackgroundLock {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl BackgroundLock {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }
}

impl Drop for BackgroundLock {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for BackgroundLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundLock")
            .field("held", &self.release.is_some())
            .finish()
    }
}

pub trait Host: Send + Sync {
    /// Current visibility, updated on every change
    fn visibility(&self) -> watch::Receiver<Visibility>;

    /// Period of the paint primitive while visible
    fn paint_interval(&self) -> Duration;

    /// Best effort; `None` when the host cannot prevent throttling
    fn acquire_background_lock(&self) -> Option<BackgroundLock>;
}

/// Host without a window: visibility is set programmatically
pub struct HeadlessHost {
    visibility: watch::Sender<Visibility>,
    paint_interval: Duration,
    supports_lock: bool,
    locks_held: Arc<AtomicUsize>,
}

impl HeadlessHost {
    pub fn new(paint_hz: u32) -> Self {
        let (visibility, _) = watch::channel(Visibility::Visible);
        Self {
            visibility,
            paint_interval: Duration::from_micros(1_000_000 / paint_hz.max(1) as u64),
            supports_lock: true,
            locks_held: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Host that cannot hold a background lock
    pub fn without_background_lock(mut self) -> Self {
        self.supports_lock = false;
        self
    }

    pub fn set_visibility(&self, visibility: Visibility) {
        let changed = self.visibility.send_if_modified(|current| {
            if *current == visibility {
                false
            } else {
                *current = visibility;
                true
            }
        });
        if changed {
            debug!("Host visibility changed to {:?}", visibility);
        }
    }

    /// Number of background locks currently held
    pub fn locks_held(&self) -> usize {
        self.locks_held.load(Ordering::SeqCst)
    }
}

impl Default for HeadlessHost {
    fn default() -> Self {
        Self::new(60)
    }
}

impl Host for HeadlessHost {
    fn visibility(&self) -> watch::Receiver<Visibility> {
        self.visibility.subscribe()
    }

    fn paint_interval(&self) -> Duration {
        self.paint_interval
    }

    fn acquire_background_lock(&self) -> Option<BackgroundLock> {
        if !self.supports_lock {
            return None;
        }
        self.locks_held.fetch_add(1, Ordering::SeqCst);
        let counter = Arc::clone(&self.locks_held);
        Some(BackgroundLock::new(move || {
            counter.fetch_sub(1, Ordering::SeqCst);
        }))
    }
}
