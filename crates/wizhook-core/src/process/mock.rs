//! In-memory process backend for testing.
//!
//! `MockProcess` implements `ProcessMemory` over a sparse set of byte regions so
//! the accessor, resolver, graph reader and combat engine can be exercised
//! without a running client. Reads, writes and allocations are counted so tests
//! can assert that an operation touched (or did not touch) memory.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::detour::{ALLOCATION_GRANULARITY, NEAR_RANGE};
use crate::error::{Error, Result};
use crate::process::{
    MemoryRegion, ModuleInfo, ProcessCandidate, ProcessEnumerator, ProcessMemory, ProcessProvider,
};

const ALLOCATION_BASE: u64 = 0x7FF0_0000_0000;
const PAGE: u64 = 0x1000;

#[derive(Debug, Clone)]
struct MockRegion {
    data: Vec<u8>,
    writable: bool,
    executable: bool,
    allocated: bool,
}

impl MockRegion {
    fn data(data: Vec<u8>) -> Self {
        Self {
            data,
            writable: true,
            executable: false,
            allocated: false,
        }
    }

    fn end(&self, start: u64) -> u64 {
        start + self.data.len() as u64
    }
}

#[derive(Debug)]
struct MockState {
    regions: BTreeMap<u64, MockRegion>,
    modules: Vec<ModuleInfo>,
    next_alloc: u64,
    fail_writes: bool,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            regions: BTreeMap::new(),
            modules: Vec::new(),
            next_alloc: ALLOCATION_BASE,
            fail_writes: false,
        }
    }
}

impl MockState {
    /// Copy `bytes` to `address`, growing or merging regions as needed.
    fn place(&mut self, address: u64, bytes: &[u8]) {
        let end = address + bytes.len() as u64;
        let start = match self.regions.range(..=address).next_back() {
            Some((&start, region)) if address <= region.end(start) => start,
            _ => {
                self.regions.insert(address, MockRegion::data(Vec::new()));
                address
            }
        };

        let followers: Vec<u64> = self
            .regions
            .range(start + 1..=end)
            .map(|(&s, _)| s)
            .collect();
        let absorbed: Vec<(u64, MockRegion)> = followers
            .into_iter()
            .filter_map(|s| self.regions.remove(&s).map(|r| (s, r)))
            .collect();

        let Some(region) = self.regions.get_mut(&start) else {
            return;
        };
        for (s, follower) in absorbed {
            let offset = (s - start) as usize;
            let needed = offset + follower.data.len();
            if region.data.len() < needed {
                region.data.resize(needed, 0);
            }
            region.data[offset..needed].copy_from_slice(&follower.data);
        }

        let offset = (address - start) as usize;
        let needed = offset + bytes.len();
        if region.data.len() < needed {
            region.data.resize(needed, 0);
        }
        region.data[offset..needed].copy_from_slice(bytes);
    }

    /// Whether `[address, address + len)` overlaps no region.
    fn is_free(&self, address: u64, len: u64) -> bool {
        self.regions
            .range(..address + len)
            .next_back()
            .is_none_or(|(&start, region)| region.end(start) <= address)
    }

    fn insert_allocation(&mut self, address: u64, len: u64, executable: bool) {
        self.regions.insert(
            address,
            MockRegion {
                data: vec![0; len as usize],
                writable: true,
                executable,
                allocated: true,
            },
        );
    }

    fn locate(&self, address: u64) -> Option<(u64, &MockRegion)> {
        self.regions
            .range(..=address)
            .next_back()
            .filter(|(start, region)| address < region.end(**start))
            .map(|(start, region)| (*start, region))
    }
}

/// Mock process backed by sparse in-memory regions.
#[derive(Debug)]
pub struct MockProcess {
    pid: u32,
    alive: AtomicBool,
    state: Mutex<MockState>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    allocations: AtomicUsize,
}

impl MockProcess {
    /// Create an empty, running process.
    pub fn new(pid: u32) -> Self {
        Self::from_state(pid, MockState::default())
    }

    fn from_state(pid: u32, state: MockState) -> Self {
        Self {
            pid,
            alive: AtomicBool::new(true),
            state: Mutex::new(state),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            allocations: AtomicUsize::new(0),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Simulate the process exiting (or coming back, for negative tests).
    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::SeqCst);
    }

    /// Make every subsequent `write_bytes` fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.state().fail_writes = fail;
    }

    /// Write directly into the mock without going through `ProcessMemory`.
    /// Not counted as a write.
    pub fn poke(&self, address: u64, bytes: &[u8]) {
        self.state().place(address, bytes);
    }

    pub fn poke_u64(&self, address: u64, value: u64) {
        self.poke(address, &value.to_le_bytes());
    }

    pub fn poke_u32(&self, address: u64, value: u32) {
        self.poke(address, &value.to_le_bytes());
    }

    pub fn poke_i32(&self, address: u64, value: i32) {
        self.poke(address, &value.to_le_bytes());
    }

    pub fn poke_u8(&self, address: u64, value: u8) {
        self.poke(address, &[value]);
    }

    /// Read directly from the mock. Not counted as a read.
    pub fn peek(&self, address: u64, size: usize) -> Option<Vec<u8>> {
        let state = self.state();
        let (start, region) = state.locate(address)?;
        let offset = (address - start) as usize;
        region.data.get(offset..offset + size).map(<[u8]>::to_vec)
    }

    pub fn peek_u64(&self, address: u64) -> Option<u64> {
        let bytes = self.peek(address, 8)?;
        Some(u64::from_le_bytes(bytes.try_into().ok()?))
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn allocation_count(&self) -> usize {
        self.allocations.load(Ordering::SeqCst)
    }

    /// Number of pages allocated through `allocate_pages` and not yet freed.
    pub fn live_allocations(&self) -> usize {
        self.state().regions.values().filter(|r| r.allocated).count()
    }

    pub fn reset_counters(&self) {
        self.reads.store(0, Ordering::SeqCst);
        self.writes.store(0, Ordering::SeqCst);
        self.allocations.store(0, Ordering::SeqCst);
    }
}

impl ProcessMemory for MockProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn read_bytes(&self, address: u64, size: usize) -> Result<Vec<u8>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if !self.is_alive() {
            return Err(Error::read(address, "process has exited"));
        }

        let state = self.state();
        let (start, region) = state
            .locate(address)
            .ok_or_else(|| Error::read(address, "unmapped address"))?;
        let offset = (address - start) as usize;
        let available = size.min(region.data.len() - offset);
        Ok(region.data[offset..offset + available].to_vec())
    }

    fn write_bytes(&self, address: u64, data: &[u8]) -> Result<usize> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if !self.is_alive() {
            return Err(Error::write(address, "process has exited"));
        }

        let mut state = self.state();
        if state.fail_writes {
            return Err(Error::write(address, "access denied"));
        }
        // Image pages accept writes the way WriteProcessMemory handles them.
        let (start, len, writable) = state
            .locate(address)
            .map(|(start, region)| (start, region.data.len(), region.writable || region.executable))
            .ok_or_else(|| Error::write(address, "unmapped address"))?;
        if !writable {
            return Err(Error::write(address, "page is not writable"));
        }

        let offset = (address - start) as usize;
        let written = data.len().min(len - offset);
        if let Some(region) = state.regions.get_mut(&start) {
            region.data[offset..offset + written].copy_from_slice(&data[..written]);
        }
        Ok(written)
    }

    fn regions(&self) -> Result<Vec<MemoryRegion>> {
        if !self.is_alive() {
            return Err(Error::read(0, "process has exited"));
        }
        Ok(self
            .state()
            .regions
            .iter()
            .map(|(&start, region)| MemoryRegion {
                start,
                size: region.data.len() as u64,
                readable: true,
                writable: region.writable,
                executable: region.executable,
            })
            .collect())
    }

    fn modules(&self) -> Result<Vec<ModuleInfo>> {
        Ok(self.state().modules.clone())
    }

    fn allocate_pages(&self, size: usize) -> Result<u64> {
        if !self.is_alive() {
            return Err(Error::AllocationFailed {
                size,
                message: "process has exited".to_string(),
            });
        }
        self.allocations.fetch_add(1, Ordering::SeqCst);

        let mut state = self.state();
        let len = (size as u64).div_ceil(PAGE).max(1) * PAGE;
        let address = state.next_alloc;
        state.next_alloc += len + PAGE;
        state.insert_allocation(address, len, false);
        Ok(address)
    }

    fn allocate_pages_near(&self, size: usize, near: u64) -> Result<u64> {
        if !self.is_alive() {
            return Err(Error::AllocationFailed {
                size,
                message: "process has exited".to_string(),
            });
        }
        self.allocations.fetch_add(1, Ordering::SeqCst);

        let mut state = self.state();
        let len = (size as u64).div_ceil(PAGE).max(1) * PAGE;
        let origin = near & !(ALLOCATION_GRANULARITY - 1);
        let address = (1..NEAR_RANGE / ALLOCATION_GRANULARITY)
            .map(|step| origin + step * ALLOCATION_GRANULARITY)
            .find(|&candidate| state.is_free(candidate, len))
            .ok_or_else(|| Error::AllocationFailed {
                size,
                message: format!("no free pages within reach of {:#x}", near),
            })?;
        state.insert_allocation(address, len, true);
        Ok(address)
    }

    fn free_pages(&self, address: u64) -> Result<()> {
        let mut state = self.state();
        match state.regions.get(&address) {
            Some(region) if region.allocated => {
                state.regions.remove(&address);
                Ok(())
            }
            _ => Err(Error::InvalidFree { address }),
        }
    }
}

/// Builder for `MockProcess` contents.
///
/// Writes land in the region that covers (or directly precedes) the address and
/// grow it as needed, so structures can be laid out field by field.
#[derive(Debug, Default)]
pub struct MockMemoryBuilder {
    pid: u32,
    state: MockState,
}

impl MockMemoryBuilder {
    pub fn new() -> Self {
        Self {
            pid: 1,
            state: MockState::default(),
        }
    }

    pub fn pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    /// Add a zero-filled read/write region.
    pub fn region(mut self, start: u64, size: usize) -> Self {
        self.state.place(start, &vec![0; size]);
        self
    }

    /// Add read/execute code bytes. Like image pages they are not reported as
    /// writable but still accept `write_bytes`.
    pub fn code(mut self, start: u64, bytes: &[u8]) -> Self {
        self.state.regions.insert(
            start,
            MockRegion {
                data: bytes.to_vec(),
                writable: false,
                executable: true,
                allocated: false,
            },
        );
        self
    }

    /// Add read-only data that rejects every write.
    pub fn readonly(mut self, start: u64, bytes: &[u8]) -> Self {
        self.state.regions.insert(
            start,
            MockRegion {
                data: bytes.to_vec(),
                writable: false,
                executable: false,
                allocated: false,
            },
        );
        self
    }

    pub fn module(mut self, name: &str, base: u64, size: u64) -> Self {
        self.state.modules.push(ModuleInfo {
            name: name.to_string(),
            base,
            size,
        });
        self
    }

    pub fn write_bytes(mut self, address: u64, bytes: &[u8]) -> Self {
        self.state.place(address, bytes);
        self
    }

    pub fn write_u8(self, address: u64, value: u8) -> Self {
        self.write_bytes(address, &[value])
    }

    pub fn write_bool(self, address: u64, value: bool) -> Self {
        self.write_bytes(address, &[value as u8])
    }

    pub fn write_i32(self, address: u64, value: i32) -> Self {
        self.write_bytes(address, &value.to_le_bytes())
    }

    pub fn write_u32(self, address: u64, value: u32) -> Self {
        self.write_bytes(address, &value.to_le_bytes())
    }

    pub fn write_u64(self, address: u64, value: u64) -> Self {
        self.write_bytes(address, &value.to_le_bytes())
    }

    pub fn write_f32(self, address: u64, value: f32) -> Self {
        self.write_bytes(address, &value.to_le_bytes())
    }

    pub fn write_utf8(self, address: u64, text: &str) -> Self {
        self.write_bytes(address, text.as_bytes())
    }

    pub fn build(self) -> MockProcess {
        MockProcess::from_state(self.pid, self.state)
    }
}

/// Enumerates and opens a fixed set of mock processes.
///
/// Opened processes are shared with the provider so tests can keep driving them
/// (for example to simulate an exit) after a session attaches.
#[derive(Debug, Default)]
pub struct MockProvider {
    processes: Mutex<BTreeMap<u32, Arc<MockProcess>>>,
    refused: Mutex<BTreeSet<u32>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, process: MockProcess) -> Arc<MockProcess> {
        let process = Arc::new(process);
        self.processes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(process.pid(), Arc::clone(&process));
        process
    }

    /// Make `open_process` fail for `pid`.
    pub fn refuse(&self, pid: u32) {
        self.refused
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(pid);
    }
}

impl ProcessEnumerator for MockProvider {
    fn candidates(&self) -> Result<Vec<ProcessCandidate>> {
        Ok(self
            .processes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|p| p.is_alive())
            .map(|p| ProcessCandidate {
                pid: p.pid(),
                name: "WizardGraphicalClient.exe".to_string(),
            })
            .collect())
    }
}

impl ProcessProvider for MockProvider {
    type Process = Arc<MockProcess>;

    fn open_process(&self, candidate: &ProcessCandidate) -> Result<Self::Process> {
        if self
            .refused
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&candidate.pid)
        {
            return Err(Error::ProcessOpenFailed(format!(
                "access denied for PID {}",
                candidate.pid
            )));
        }
        self.processes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&candidate.pid)
            .cloned()
            .ok_or_else(|| Error::ProcessNotFound(format!("PID {}", candidate.pid)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_grows_regions() {
        let mock = MockMemoryBuilder::new()
            .write_u32(0x1000, 0xDEADBEEF)
            .write_u32(0x1004, 0x12345678)
            .build();

        let regions = mock.regions().unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].size, 8);
        assert_eq!(
            mock.read_bytes(0x1000, 8).unwrap(),
            vec![0xEF, 0xBE, 0xAD, 0xDE, 0x78, 0x56, 0x34, 0x12]
        );
    }

    #[test]
    fn test_builder_merges_overlapping_regions() {
        let mock = MockMemoryBuilder::new()
            .write_u8(0x1010, 0xAA)
            .region(0x1000, 0x20)
            .build();

        let regions = mock.regions().unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(mock.peek(0x1010, 1).unwrap(), vec![0]);
    }

    #[test]
    fn test_short_read_at_region_end() {
        let mock = MockMemoryBuilder::new().region(0x1000, 0x10).build();
        assert_eq!(mock.read_bytes(0x1008, 0x10).unwrap().len(), 8);
    }

    #[test]
    fn test_unmapped_read_fails() {
        let mock = MockMemoryBuilder::new().region(0x1000, 0x10).build();
        assert!(matches!(
            mock.read_bytes(0x5000, 4),
            Err(Error::MemoryReadError { address: 0x5000, .. })
        ));
    }

    #[test]
    fn test_dead_process_rejects_reads() {
        let mock = MockMemoryBuilder::new().region(0x1000, 0x10).build();
        mock.set_alive(false);
        assert!(mock.read_bytes(0x1000, 4).is_err());
        assert_eq!(mock.read_count(), 1);
    }

    #[test]
    fn test_page_protection() {
        let mock = MockMemoryBuilder::new()
            .code(0x1000, &[0x90; 16])
            .readonly(0x2000, &[0; 16])
            .build();
        let regions = mock.regions().unwrap();
        assert!(regions[0].executable && !regions[0].writable);

        assert_eq!(mock.write_bytes(0x1000, &[0xCC]).unwrap(), 1);
        assert_eq!(mock.peek(0x1000, 2).unwrap(), vec![0xCC, 0x90]);
        assert!(mock.write_bytes(0x2000, &[0xCC]).is_err());
    }

    #[test]
    fn test_allocate_near_stays_in_reach() {
        let mock = MockMemoryBuilder::new()
            .code(0x40_0000, &[0x90; 16])
            .region(0x41_0000, 0x100)
            .build();
        let a = mock.allocate_pages_near(0x20, 0x40_0008).unwrap();
        let b = mock.allocate_pages_near(0x20, 0x40_0008).unwrap();

        assert_eq!(a, 0x42_0000);
        assert_eq!(b, 0x43_0000);
        assert!(mock.regions().unwrap().iter().any(|r| r.start == a && r.executable));
        assert_eq!(mock.live_allocations(), 2);
        mock.free_pages(a).unwrap();
        assert_eq!(mock.live_allocations(), 1);
    }

    #[test]
    fn test_allocate_and_free_pages() {
        let mock = MockProcess::new(1);
        let a = mock.allocate_pages(10).unwrap();
        let b = mock.allocate_pages(0x1800).unwrap();
        assert_eq!(a % PAGE, 0);
        assert!(b >= a + PAGE);
        assert_eq!(mock.live_allocations(), 2);

        mock.free_pages(a).unwrap();
        assert_eq!(mock.live_allocations(), 1);
        assert!(matches!(mock.free_pages(a), Err(Error::InvalidFree { .. })));
    }

    #[test]
    fn test_provider_shares_processes() {
        let provider = MockProvider::new();
        let handle = provider.add(MockProcess::new(42));
        provider.refuse(43);
        provider.add(MockProcess::new(43));

        let candidates = provider.candidates().unwrap();
        assert_eq!(candidates.len(), 2);

        let opened = provider.open_process(&candidates[0]).unwrap();
        handle.set_alive(false);
        assert!(!opened.is_alive());
        assert!(provider.open_process(&candidates[1]).is_err());
    }
}
