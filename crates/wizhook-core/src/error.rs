use std::time::Duration;

use thiserror::Error;

use crate::hook::HookKind;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Process not found: {0}")]
    ProcessNotFound(String),

    #[error("Failed to open process: {0}")]
    ProcessOpenFailed(String),

    #[error("Target process has closed")]
    ProcessClosed,

    #[error("Pattern `{pattern}` matched nothing")]
    PatternNotFound { pattern: String },

    #[error("Pattern `{pattern}` matched {count} times, expected exactly one")]
    PatternAmbiguous { pattern: String, count: usize },

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("Unknown hook: {0}")]
    UnknownHook(String),

    #[error("Hook {0} has not been activated yet")]
    HookNotReady(HookKind),

    #[error("Hook {0} is not active")]
    HookNotActive(HookKind),

    #[error("Hook {0} is already active")]
    HookAlreadyActivated(HookKind),

    #[error("Activation of hook {hook} failed: {reason}")]
    HookActivationFailed { hook: HookKind, reason: String },

    #[error("Export {symbol} not found in {module}")]
    SymbolNotFound { module: String, symbol: String },

    #[error("Cannot detour {address:#x}: {reason}")]
    DetourFailed { address: u64, reason: String },

    #[error("Failed to read process memory at address {address:#x}: {message}")]
    MemoryReadError { address: u64, message: String },

    #[error("Failed to write process memory at address {address:#x}: {message}")]
    MemoryWriteError { address: u64, message: String },

    #[error("Address {address:#x} is not a live scratch allocation")]
    InvalidFree { address: u64 },

    #[error("Failed to allocate {size} bytes in the target process: {message}")]
    AllocationFailed { size: usize, message: String },

    #[error("Encoding error: {0}")]
    EncodingError(String),

    #[error("Invalid {type_name} value: {value}")]
    InvalidEnum { type_name: &'static str, value: i64 },

    #[error("Invalid layout: {0}")]
    InvalidLayout(String),

    #[error("Traversal aborted at {address:#x} after {hops} hops: {reason}")]
    TraversalAborted {
        address: u64,
        hops: usize,
        reason: String,
    },

    #[error("Round changed {attempts} times while sampling combat state")]
    SnapshotUnstable { attempts: u32 },

    #[error("Card not found: {0}")]
    CardNotFound(String),

    #[error("Combat member not found: {0}")]
    MemberNotFound(String),

    #[error("Card is already enchanted: {0}")]
    CardAlreadyEnchanted(String),

    #[error("Not in combat")]
    NotInCombat,

    #[error("Not enough mana: need {required}, have {available}")]
    NotEnoughMana { required: u32, available: u32 },

    #[error("Not enough pips: need {required}, have {available}")]
    NotEnoughPips { required: u32, available: u32 },

    #[error("Timed out after {waited:?} waiting for {what}")]
    Timeout { what: &'static str, waited: Duration },

    #[error("Wait for {0} was cancelled")]
    Cancelled(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the caller may reasonably retry after this error.
    ///
    /// A closed process is terminal for the session; everything the resolver or a
    /// wait can produce may succeed on a later attempt.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::ProcessClosed | Error::ProcessNotFound(_) | Error::ProcessOpenFailed(_) => false,
            Error::PatternNotFound { .. }
            | Error::PatternAmbiguous { .. }
            | Error::SymbolNotFound { .. }
            | Error::HookNotReady(_)
            | Error::HookNotActive(_)
            | Error::HookActivationFailed { .. }
            | Error::MemoryReadError { .. }
            | Error::TraversalAborted { .. }
            | Error::SnapshotUnstable { .. }
            | Error::Timeout { .. }
            | Error::NotInCombat
            | Error::CardNotFound(_)
            | Error::MemberNotFound(_) => true,
            _ => false,
        }
    }

    pub(crate) fn read(address: u64, message: impl Into<String>) -> Self {
        Error::MemoryReadError {
            address,
            message: message.into(),
        }
    }

    pub(crate) fn write(address: u64, message: impl Into<String>) -> Self {
        Error::MemoryWriteError {
            address,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_closed_is_terminal() {
        assert!(!Error::ProcessClosed.is_recoverable());
    }

    #[test]
    fn test_resolver_and_wait_errors_are_recoverable() {
        let not_found = Error::PatternNotFound {
            pattern: "48 8B".to_string(),
        };
        assert!(not_found.is_recoverable());

        let timeout = Error::Timeout {
            what: "planning phase",
            waited: Duration::from_secs(1),
        };
        assert!(timeout.is_recoverable());
        assert!(Error::HookNotReady(HookKind::Duel).is_recoverable());
    }

    #[test]
    fn test_display_includes_address() {
        let err = Error::read(0xDEAD, "short read");
        assert_eq!(
            err.to_string(),
            "Failed to read process memory at address 0xdead: short read"
        );
    }
}
