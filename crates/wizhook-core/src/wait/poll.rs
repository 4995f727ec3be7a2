use std::time::Duration;

use tracing::debug;

use crate::config::polling::POLL_INTERVAL;
use crate::error::{Error, Result};
use crate::wait::{CancelToken, Pacer};

/// Interval and optional deadline of one polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    /// `None` polls until the condition holds or the wait is cancelled.
    pub timeout: Option<Duration>,
}

impl PollConfig {
    pub fn new(interval: Duration, timeout: Option<Duration>) -> Self {
        Self { interval, timeout }
    }

    pub fn forever(interval: Duration) -> Self {
        Self::new(interval, None)
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::forever(POLL_INTERVAL)
    }
}

/// Run `check` every interval until it yields a value.
///
/// The check runs at least once. Errors from the check end the loop as they
/// are; the loop itself only fails with `Timeout` or `Cancelled`, and never
/// sleeps past the deadline.
pub fn poll_until<T, F>(
    what: &'static str,
    config: &PollConfig,
    pacer: &dyn Pacer,
    cancel: &CancelToken,
    mut check: F,
) -> Result<T>
where
    F: FnMut() -> Result<Option<T>>,
{
    let start = pacer.now();
    loop {
        if cancel.is_cancelled() {
            debug!("Wait for {} cancelled", what);
            return Err(Error::Cancelled(what));
        }
        if let Some(value) = check()? {
            return Ok(value);
        }

        let waited = pacer.now().saturating_sub(start);
        let step = match config.timeout {
            Some(timeout) if waited >= timeout => {
                debug!("Wait for {} timed out after {:?}", what, waited);
                return Err(Error::Timeout { what, waited });
            }
            Some(timeout) => config.interval.min(timeout - waited),
            None => config.interval,
        };
        if pacer.pause(step, cancel) {
            debug!("Wait for {} cancelled", what);
            return Err(Error::Cancelled(what));
        }
    }
}
