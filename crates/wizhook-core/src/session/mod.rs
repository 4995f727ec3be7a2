//! Attached clients and the registry that multiplexes them.

mod client;
mod manager;

pub use client::{DetachReport, Session};
pub use manager::SessionManager;
