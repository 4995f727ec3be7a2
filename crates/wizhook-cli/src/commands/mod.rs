//! CLI command implementations.

pub mod combat;
pub mod hooks;
pub mod scan;
pub mod snapshot;
pub mod watch;
