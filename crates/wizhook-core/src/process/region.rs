use serde::{Deserialize, Serialize};

/// A committed range of the target's address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRegion {
    pub start: u64,
    pub size: u64,
    pub readable: bool,
    pub writable: bool,
    pub executable: bool,
}

impl MemoryRegion {
    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.size)
    }

    pub fn contains(&self, address: u64) -> bool {
        address >= self.start && address < self.end()
    }

    /// Clamp this region to `[start, end)`, or `None` if they do not overlap.
    pub fn clamp(&self, start: u64, end: u64) -> Option<MemoryRegion> {
        let lo = self.start.max(start);
        let hi = self.end().min(end);
        (lo < hi).then_some(MemoryRegion {
            start: lo,
            size: hi - lo,
            ..*self
        })
    }
}

/// A module (executable or DLL) loaded in the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub name: String,
    pub base: u64,
    pub size: u64,
}

impl ModuleInfo {
    pub fn end(&self) -> u64 {
        self.base.saturating_add(self.size)
    }
}
