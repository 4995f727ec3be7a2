//! Bookkeeping for scratch memory allocated inside the target.
//!
//! The pool never touches the target itself: growth goes through a caller
//! supplied page allocator, and `drain` hands the page bases back so the owner
//! can release them.

use std::collections::BTreeMap;

use tracing::debug;

use crate::config::scratch::{ALIGNMENT, PAGE_SIZE};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Page {
    base: u64,
    size: u64,
}

impl Page {
    fn contains(&self, address: u64) -> bool {
        address >= self.base && address < self.base + self.size
    }
}

/// First-fit allocator over pages committed in the target.
#[derive(Debug, Default)]
pub struct ScratchPool {
    pages: Vec<Page>,
    /// Free blocks, address -> size.
    free: BTreeMap<u64, u64>,
    /// Handed-out blocks, address -> size.
    live: BTreeMap<u64, u64>,
}

fn align_up(value: u64, align: u64) -> u64 {
    value.div_ceil(align) * align
}

impl ScratchPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate `size` bytes, calling `grow(len)` for a fresh page run when no
    /// free block fits. Returned addresses are 16-byte aligned.
    pub fn allocate(
        &mut self,
        size: usize,
        grow: impl FnOnce(usize) -> Result<u64>,
    ) -> Result<u64> {
        if size == 0 {
            return Err(Error::AllocationFailed {
                size,
                message: "zero-sized allocation".to_string(),
            });
        }
        let size = align_up(size as u64, ALIGNMENT as u64);

        let fit = self
            .free
            .iter()
            .find(|&(_, &len)| len >= size)
            .map(|(&address, &len)| (address, len));

        let address = match fit {
            Some((address, len)) => {
                self.free.remove(&address);
                if len > size {
                    self.free.insert(address + size, len - size);
                }
                address
            }
            None => {
                let page_len = align_up(size, PAGE_SIZE as u64);
                let base = grow(page_len as usize)?;
                debug!("Scratch pool grew by {:#x} bytes at {:#x}", page_len, base);
                self.pages.push(Page {
                    base,
                    size: page_len,
                });
                if page_len > size {
                    self.free.insert(base + size, page_len - size);
                }
                base
            }
        };

        self.live.insert(address, size);
        Ok(address)
    }

    /// Return a block to the pool. Unknown or already-freed addresses fail.
    pub fn free(&mut self, address: u64) -> Result<()> {
        let size = self
            .live
            .remove(&address)
            .ok_or(Error::InvalidFree { address })?;

        let page = self.pages.iter().find(|p| p.contains(address)).copied();
        let mut start = address;
        let mut len = size;

        // Coalesce with neighbours in the same page.
        if let Some((&prev, &prev_len)) = self.free.range(..address).next_back()
            && prev + prev_len == address
            && page.is_some_and(|p| p.contains(prev))
        {
            self.free.remove(&prev);
            start = prev;
            len += prev_len;
        }
        if let Some(&next_len) = self.free.get(&(address + size))
            && page.is_some_and(|p| p.contains(address + size))
        {
            self.free.remove(&(address + size));
            len += next_len;
        }

        self.free.insert(start, len);
        Ok(())
    }

    pub fn is_live(&self, address: u64) -> bool {
        self.live.contains_key(&address)
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Forget every block and return the page bases for release.
    pub fn drain(&mut self) -> Vec<u64> {
        self.free.clear();
        self.live.clear();
        self.pages.drain(..).map(|p| p.base).collect()
    }
}
