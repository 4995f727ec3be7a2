//! Pattern scanning over the target's committed memory.

use tracing::{debug, info};

use crate::config::scan::{CHUNK_SIZE, MAX_USER_ADDRESS};
use crate::error::{Error, Result};
use crate::memory::MemoryAccessor;
use crate::process::ProcessMemory;
use crate::scan::{ChunkedMemoryIterator, PatternSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// Exactly one match is required.
    Unique,
    /// Every match, in ascending address order.
    All,
}

/// Which part of the address space a scan covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanScope {
    Process,
    Module(String),
    Range { start: u64, end: u64 },
}

pub struct AddressResolver<'a, P: ProcessMemory> {
    memory: &'a MemoryAccessor<P>,
    chunk_size: usize,
}

impl<'a, P: ProcessMemory> AddressResolver<'a, P> {
    pub fn new(memory: &'a MemoryAccessor<P>) -> Self {
        Self {
            memory,
            chunk_size: CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn memory(&self) -> &'a MemoryAccessor<P> {
        self.memory
    }

    fn bounds(&self, scope: &ScanScope) -> Result<(u64, u64)> {
        match scope {
            ScanScope::Process => Ok((0, MAX_USER_ADDRESS + 1)),
            ScanScope::Module(name) => {
                let module = self.memory.module(name)?;
                Ok((module.base, module.end()))
            }
            ScanScope::Range { start, end } if start < end => Ok((*start, *end)),
            ScanScope::Range { start, end } => Err(Error::InvalidPattern(format!(
                "empty scan range {:#x}..{:#x}",
                start, end
            ))),
        }
    }

    /// Scan `scope` for `pattern`, returning match addresses with the pattern's
    /// offset applied.
    ///
    /// Both modes fail with `PatternNotFound` when nothing matches; `Unique`
    /// fails with `PatternAmbiguous` on more than one match.
    pub fn scan(&self, pattern: &PatternSpec, scope: &ScanScope, mode: ScanMode) -> Result<Vec<u64>> {
        let (start, end) = self.bounds(scope)?;
        let regions = self.memory.regions()?;
        let overlap = pattern.len().saturating_sub(1);
        let mut found = Vec::new();

        for region in regions
            .iter()
            .filter(|r| r.readable)
            .filter_map(|r| r.clamp(start, end))
        {
            let chunks = ChunkedMemoryIterator::new(self.memory, region.start, region.end(), self.chunk_size)
                .with_overlap(overlap);
            for chunk in chunks {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(Error::ProcessClosed) => return Err(Error::ProcessClosed),
                    Err(e) => {
                        debug!("Skipping rest of region {:#x}: {}", region.start, e);
                        break;
                    }
                };
                found.extend(
                    pattern
                        .find_all(&chunk.data)
                        .into_iter()
                        .take_while(|&pos| pos < chunk.fresh_len)
                        .map(|pos| (chunk.address + pos as u64).wrapping_add_signed(pattern.offset())),
                );
            }
        }

        debug!("Pattern {} in {:?}: {} match(es)", pattern, scope, found.len());
        match (mode, found.len()) {
            (_, 0) => Err(Error::PatternNotFound {
                pattern: pattern.to_string(),
            }),
            (ScanMode::Unique, 1) | (ScanMode::All, _) => Ok(found),
            (ScanMode::Unique, count) => Err(Error::PatternAmbiguous {
                pattern: pattern.to_string(),
                count,
            }),
        }
    }

    pub fn scan_unique(&self, pattern: &PatternSpec, scope: &ScanScope) -> Result<u64> {
        let address = self.scan(pattern, scope, ScanMode::Unique)?[0];
        info!("Pattern {} resolved to {:#x}", pattern, address);
        Ok(address)
    }

    pub fn scan_all(&self, pattern: &PatternSpec, scope: &ScanScope) -> Result<Vec<u64>> {
        self.scan(pattern, scope, ScanMode::All)
    }
}
