use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::wait::CancelToken;

/// Source of time for polling loops.
pub trait Pacer: Send + Sync {
    /// Time elapsed since the pacer was created.
    fn now(&self) -> Duration;

    /// Pause for `interval` or until `cancel` fires.
    ///
    /// Returns `true` if cancelled.
    fn pause(&self, interval: Duration, cancel: &CancelToken) -> bool;
}

/// Wall-clock pacer that sleeps on the cancel token.
#[derive(Debug, Clone, Copy)]
pub struct SystemPacer {
    origin: Instant,
}

impl SystemPacer {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemPacer {
    fn default() -> Self {
        Self::new()
    }
}

impl Pacer for SystemPacer {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn pause(&self, interval: Duration, cancel: &CancelToken) -> bool {
        cancel.wait(interval)
    }
}

pub type TickHook = Box<dyn FnMut(u64) + Send>;

/// Virtual-time pacer for tests.
///
/// `pause` advances the clock by the requested interval without sleeping, then
/// runs the tick hook with the 1-based tick number so a test can change the
/// simulated process (or cancel) between polls.
#[derive(Default)]
pub struct ManualPacer {
    elapsed: Mutex<Duration>,
    ticks: AtomicU64,
    on_tick: Mutex<Option<TickHook>>,
}

impl ManualPacer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tick<F>(hook: F) -> Self
    where
        F: FnMut(u64) + Send + 'static,
    {
        let pacer = Self::new();
        pacer.set_on_tick(hook);
        pacer
    }

    pub fn set_on_tick<F>(&self, hook: F)
    where
        F: FnMut(u64) + Send + 'static,
    {
        *self.on_tick.lock().unwrap_or_else(PoisonError::into_inner) = Some(Box::new(hook));
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    pub fn advance(&self, by: Duration) {
        *self.elapsed.lock().unwrap_or_else(PoisonError::into_inner) += by;
    }
}

impl Pacer for ManualPacer {
    fn now(&self) -> Duration {
        *self.elapsed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pause(&self, interval: Duration, cancel: &CancelToken) -> bool {
        if cancel.is_cancelled() {
            return true;
        }
        self.advance(interval);
        let tick = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(hook) = self
            .on_tick
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
        {
            hook(tick);
        }
        cancel.is_cancelled()
    }
}
