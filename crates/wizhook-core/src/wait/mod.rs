//! Polling waits with timeouts and cooperative cancellation.

mod cancel;
mod pacer;
mod poll;

pub use cancel::CancelToken;
pub use pacer::{ManualPacer, Pacer, SystemPacer, TickHook};
pub use poll::{PollConfig, poll_until};
