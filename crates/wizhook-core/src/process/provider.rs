//! Process backend abstraction.
//!
//! Everything above this layer talks to the target through `ProcessMemory`, so
//! the in-memory mock and the Windows handle are interchangeable.

use std::sync::Arc;

use crate::error::Result;
use crate::process::{MemoryRegion, ModuleInfo};

/// Raw access to another process's address space.
///
/// Implementations report OS failures as errors and may return fewer bytes than
/// requested when a read crosses into an unreadable page; callers decide how to
/// treat short reads.
pub trait ProcessMemory: Send + Sync {
    fn pid(&self) -> u32;

    /// Check if the process is still running.
    fn is_alive(&self) -> bool;

    fn read_bytes(&self, address: u64, size: usize) -> Result<Vec<u8>>;

    /// Write `data` at `address`, returning the number of bytes written.
    fn write_bytes(&self, address: u64, data: &[u8]) -> Result<usize>;

    /// Committed regions in ascending address order.
    fn regions(&self) -> Result<Vec<MemoryRegion>>;

    fn modules(&self) -> Result<Vec<ModuleInfo>>;

    /// Commit at least `size` bytes of read/write memory and return its base.
    fn allocate_pages(&self, size: usize) -> Result<u64>;

    /// Commit at least `size` bytes of read/write/execute memory within rel32
    /// reach of `near`.
    fn allocate_pages_near(&self, size: usize, near: u64) -> Result<u64>;

    /// Release pages previously returned by `allocate_pages` or
    /// `allocate_pages_near`.
    fn free_pages(&self, address: u64) -> Result<()>;
}

impl<T: ProcessMemory + ?Sized> ProcessMemory for Arc<T> {
    fn pid(&self) -> u32 {
        (**self).pid()
    }

    fn is_alive(&self) -> bool {
        (**self).is_alive()
    }

    fn read_bytes(&self, address: u64, size: usize) -> Result<Vec<u8>> {
        (**self).read_bytes(address, size)
    }

    fn write_bytes(&self, address: u64, data: &[u8]) -> Result<usize> {
        (**self).write_bytes(address, data)
    }

    fn regions(&self) -> Result<Vec<MemoryRegion>> {
        (**self).regions()
    }

    fn modules(&self) -> Result<Vec<ModuleInfo>> {
        (**self).modules()
    }

    fn allocate_pages(&self, size: usize) -> Result<u64> {
        (**self).allocate_pages(size)
    }

    fn allocate_pages_near(&self, size: usize, near: u64) -> Result<u64> {
        (**self).allocate_pages_near(size, near)
    }

    fn free_pages(&self, address: u64) -> Result<()> {
        (**self).free_pages(address)
    }
}

/// A client process discovered by an enumerator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessCandidate {
    pub pid: u32,
    pub name: String,
}

/// Lists candidate client processes.
pub trait ProcessEnumerator {
    fn candidates(&self) -> Result<Vec<ProcessCandidate>>;
}

/// Opens candidates into process backends.
pub trait ProcessProvider {
    type Process: ProcessMemory;

    fn open_process(&self, candidate: &ProcessCandidate) -> Result<Self::Process>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::process::MockProcess;

    struct FixedEnumerator(Vec<u32>);

    impl ProcessEnumerator for FixedEnumerator {
        fn candidates(&self) -> Result<Vec<ProcessCandidate>> {
            Ok(self
                .0
                .iter()
                .map(|&pid| ProcessCandidate {
                    pid,
                    name: "WizardGraphicalClient.exe".to_string(),
                })
                .collect())
        }
    }

    struct EvenOnlyProvider;

    impl ProcessProvider for EvenOnlyProvider {
        type Process = MockProcess;

        fn open_process(&self, candidate: &ProcessCandidate) -> Result<Self::Process> {
            if candidate.pid % 2 == 0 {
                Ok(MockProcess::new(candidate.pid))
            } else {
                Err(Error::ProcessOpenFailed(format!("access denied: {}", candidate.pid)))
            }
        }
    }

    #[test]
    fn test_provider_opens_candidates() {
        let enumerator = FixedEnumerator(vec![2, 3, 4]);
        let opened: Vec<u32> = enumerator
            .candidates()
            .unwrap()
            .iter()
            .filter_map(|c| EvenOnlyProvider.open_process(c).ok())
            .map(|p| p.pid())
            .collect();

        assert_eq!(opened, vec![2, 4]);
    }

    #[test]
    fn test_provider_open_failure() {
        let candidate = ProcessCandidate {
            pid: 7,
            name: "WizardGraphicalClient.exe".to_string(),
        };
        assert!(matches!(
            EvenOnlyProvider.open_process(&candidate),
            Err(Error::ProcessOpenFailed(_))
        ));
    }
}
