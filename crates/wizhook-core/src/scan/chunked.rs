//! Chunked reads over a region.
//!
//! Consecutive chunks overlap by `overlap` bytes so a pattern straddling a chunk
//! boundary is still contained in one chunk. Callers only keep matches that
//! start before `MemoryChunk::fresh_len` to avoid reporting them twice.

use crate::error::Result;
use crate::memory::MemoryAccessor;
use crate::process::ProcessMemory;

/// A chunk of memory read from a process.
#[derive(Debug)]
pub struct MemoryChunk {
    /// Starting address of this chunk.
    pub address: u64,
    /// The actual bytes read.
    pub data: Vec<u8>,
    /// Bytes at the start of `data` not covered by the next chunk.
    pub fresh_len: usize,
}

pub struct ChunkedMemoryIterator<'a, P: ProcessMemory> {
    memory: &'a MemoryAccessor<P>,
    current: u64,
    end: u64,
    chunk_size: usize,
    overlap: usize,
}

impl<'a, P: ProcessMemory> ChunkedMemoryIterator<'a, P> {
    pub fn new(memory: &'a MemoryAccessor<P>, start: u64, end: u64, chunk_size: usize) -> Self {
        Self {
            memory,
            current: start,
            end,
            chunk_size: chunk_size.max(1),
            overlap: 0,
        }
    }

    pub fn with_overlap(mut self, overlap: usize) -> Self {
        self.overlap = overlap;
        self
    }
}

impl<P: ProcessMemory> Iterator for ChunkedMemoryIterator<'_, P> {
    type Item = Result<MemoryChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current >= self.end {
            return None;
        }

        let remaining = self.end - self.current;
        let fresh_len = (self.chunk_size as u64).min(remaining) as usize;
        let read_size = ((self.chunk_size + self.overlap) as u64).min(remaining) as usize;
        let address = self.current;
        self.current += fresh_len as u64;

        Some(
            self.memory
                .read_bytes(address, read_size)
                .map(|data| MemoryChunk {
                    address,
                    data,
                    fresh_len,
                }),
        )
    }
}
