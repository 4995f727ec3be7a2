#![cfg_attr(not(target_os = "windows"), allow(dead_code))]

use crate::error::{Error, Result};
use crate::process::{
    MemoryRegion, ModuleInfo, ProcessCandidate, ProcessEnumerator, ProcessMemory, ProcessProvider,
};

#[cfg(target_os = "windows")]
use std::ffi::c_void;
#[cfg(target_os = "windows")]
use std::sync::atomic::{AtomicBool, Ordering};
#[cfg(target_os = "windows")]
use tracing::{debug, warn};

#[cfg(target_os = "windows")]
use windows::Win32::Foundation::{CloseHandle, HANDLE, HMODULE};
#[cfg(target_os = "windows")]
use windows::Win32::System::Diagnostics::Debug::{ReadProcessMemory, WriteProcessMemory};
#[cfg(target_os = "windows")]
use windows::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, PROCESSENTRY32W, Process32FirstW, Process32NextW, TH32CS_SNAPPROCESS,
};
#[cfg(target_os = "windows")]
use windows::Win32::System::Memory::{
    MEM_COMMIT, MEM_FREE, MEM_RELEASE, MEM_RESERVE, MEMORY_BASIC_INFORMATION, PAGE_EXECUTE,
    PAGE_EXECUTE_READ, PAGE_EXECUTE_READWRITE, PAGE_EXECUTE_WRITECOPY, PAGE_GUARD, PAGE_NOACCESS,
    PAGE_READONLY, PAGE_READWRITE, PAGE_WRITECOPY, VirtualAllocEx, VirtualFreeEx, VirtualQueryEx,
};
#[cfg(target_os = "windows")]
use windows::Win32::System::ProcessStatus::{
    EnumProcessModulesEx, GetModuleBaseNameW, GetModuleInformation, LIST_MODULES_ALL, MODULEINFO,
};
#[cfg(target_os = "windows")]
use windows::Win32::System::Threading::{
    GetExitCodeProcess, OpenProcess, PROCESS_QUERY_INFORMATION, PROCESS_VM_OPERATION,
    PROCESS_VM_READ, PROCESS_VM_WRITE,
};

/// Executable name of the game client.
pub const CLIENT_PROCESS_NAME: &str = "WizardGraphicalClient.exe";

#[cfg(target_os = "windows")]
const MAX_SCAN_ADDRESS: u64 = crate::config::scan::MAX_USER_ADDRESS;

#[cfg(target_os = "windows")]
use crate::config::detour::{ALLOCATION_GRANULARITY, NEAR_RANGE};

/// An open handle to a client process.
///
/// `release` closes the OS handle early; afterwards every operation fails with
/// `ProcessClosed`.
#[cfg(target_os = "windows")]
pub struct ProcessHandle {
    handle: HANDLE,
    pid: u32,
    released: AtomicBool,
}

#[cfg(not(target_os = "windows"))]
pub struct ProcessHandle {
    pid: u32,
}

// SAFETY: a process HANDLE is an opaque kernel object reference; the Win32 memory
// functions used here may be called from any thread.
#[cfg(target_os = "windows")]
unsafe impl Send for ProcessHandle {}
#[cfg(target_os = "windows")]
unsafe impl Sync for ProcessHandle {}

#[cfg(target_os = "windows")]
impl ProcessHandle {
    pub fn open(pid: u32) -> Result<Self> {
        // SAFETY: OpenProcess is called with valid access flags and a process ID from
        // the toolhelp snapshot. The handle is closed in `release` or Drop.
        let handle = unsafe {
            OpenProcess(
                PROCESS_QUERY_INFORMATION | PROCESS_VM_READ | PROCESS_VM_WRITE | PROCESS_VM_OPERATION,
                false,
                pid,
            )
            .map_err(|e| {
                debug!("OpenProcess failed for PID {}: {}", pid, e);
                Error::ProcessOpenFailed(e.to_string())
            })?
        };

        Ok(Self {
            handle,
            pid,
            released: AtomicBool::new(false),
        })
    }

    /// Close the OS handle. Idempotent.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        if !self.handle.is_invalid() {
            // SAFETY: the handle came from OpenProcess and the swap above guarantees it
            // is closed exactly once.
            if let Err(e) = unsafe { CloseHandle(self.handle) } {
                warn!("Failed to close process handle: {}", e);
            }
        }
    }

    fn live_handle(&self) -> Result<HANDLE> {
        if self.released.load(Ordering::SeqCst) {
            return Err(Error::ProcessClosed);
        }
        Ok(self.handle)
    }

    fn query(&self, address: u64) -> Option<MEMORY_BASIC_INFORMATION> {
        let handle = self.live_handle().ok()?;
        let mut info = MEMORY_BASIC_INFORMATION::default();
        // SAFETY: info is a properly sized MEMORY_BASIC_INFORMATION owned by this frame.
        let written = unsafe {
            VirtualQueryEx(
                handle,
                Some(address as *const c_void),
                &mut info,
                std::mem::size_of::<MEMORY_BASIC_INFORMATION>(),
            )
        };
        (written != 0).then_some(info)
    }
}

#[cfg(target_os = "windows")]
impl ProcessMemory for ProcessHandle {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn is_alive(&self) -> bool {
        const STILL_ACTIVE: u32 = 259;

        let Ok(handle) = self.live_handle() else {
            return false;
        };
        let mut exit_code: u32 = 0;
        // SAFETY: handle is a live process handle; exit_code is a valid out pointer.
        unsafe { GetExitCodeProcess(handle, &mut exit_code).is_ok() && exit_code == STILL_ACTIVE }
    }

    fn read_bytes(&self, address: u64, size: usize) -> Result<Vec<u8>> {
        let handle = self.live_handle()?;
        let mut buffer = vec![0u8; size];
        let mut bytes_read = 0usize;

        // SAFETY: buffer has exactly `size` bytes of writable storage and bytes_read is
        // a valid out pointer for the duration of the call.
        let result = unsafe {
            ReadProcessMemory(
                handle,
                address as *const c_void,
                buffer.as_mut_ptr() as *mut c_void,
                size,
                Some(&mut bytes_read),
            )
        };

        match result {
            Ok(()) => {
                buffer.truncate(bytes_read);
                Ok(buffer)
            }
            Err(_) if bytes_read > 0 => {
                buffer.truncate(bytes_read);
                Ok(buffer)
            }
            Err(e) => Err(Error::read(address, e.to_string())),
        }
    }

    fn write_bytes(&self, address: u64, data: &[u8]) -> Result<usize> {
        let handle = self.live_handle()?;
        let mut written = 0usize;

        // SAFETY: data is a valid slice for the duration of the call and written is a
        // valid out pointer.
        unsafe {
            WriteProcessMemory(
                handle,
                address as *const c_void,
                data.as_ptr() as *const c_void,
                data.len(),
                Some(&mut written),
            )
        }
        .map_err(|e| Error::write(address, e.to_string()))?;

        Ok(written)
    }

    fn regions(&self) -> Result<Vec<MemoryRegion>> {
        self.live_handle()?;
        let mut regions = Vec::new();
        let mut address = 0u64;

        while address < MAX_SCAN_ADDRESS {
            let Some(info) = self.query(address) else {
                break;
            };
            let start = info.BaseAddress as u64;
            let size = info.RegionSize as u64;
            if size == 0 {
                break;
            }

            let protect = info.Protect;
            let accessible = info.State == MEM_COMMIT
                && (protect & PAGE_GUARD).0 == 0
                && (protect & PAGE_NOACCESS).0 == 0;
            if accessible {
                let base = protect.0 & 0xFF;
                let readable = [
                    PAGE_READONLY,
                    PAGE_READWRITE,
                    PAGE_WRITECOPY,
                    PAGE_EXECUTE_READ,
                    PAGE_EXECUTE_READWRITE,
                    PAGE_EXECUTE_WRITECOPY,
                ]
                .iter()
                .any(|p| p.0 == base);
                let writable = [
                    PAGE_READWRITE,
                    PAGE_WRITECOPY,
                    PAGE_EXECUTE_READWRITE,
                    PAGE_EXECUTE_WRITECOPY,
                ]
                .iter()
                .any(|p| p.0 == base);
                let executable = [
                    PAGE_EXECUTE,
                    PAGE_EXECUTE_READ,
                    PAGE_EXECUTE_READWRITE,
                    PAGE_EXECUTE_WRITECOPY,
                ]
                .iter()
                .any(|p| p.0 == base);

                if readable {
                    regions.push(MemoryRegion {
                        start,
                        size,
                        readable,
                        writable,
                        executable,
                    });
                }
            }

            address = start.saturating_add(size);
        }

        debug!("PID {}: {} readable regions", self.pid, regions.len());
        Ok(regions)
    }

    fn modules(&self) -> Result<Vec<ModuleInfo>> {
        let handle = self.live_handle()?;
        let mut handles = [HMODULE::default(); 1024];
        let mut needed: u32 = 0;

        // SAFETY: handles is a fixed-size array and its byte length is passed alongside.
        unsafe {
            EnumProcessModulesEx(
                handle,
                handles.as_mut_ptr(),
                std::mem::size_of_val(&handles) as u32,
                &mut needed,
                LIST_MODULES_ALL,
            )
        }
        .map_err(|e| Error::read(0, format!("Failed to enumerate modules: {}", e)))?;

        let count = (needed as usize / std::mem::size_of::<HMODULE>()).min(handles.len());
        let mut modules = Vec::with_capacity(count);
        for &module in &handles[..count] {
            let mut info = MODULEINFO::default();
            // SAFETY: module is one of the handles returned above; info is properly sized.
            let ok = unsafe {
                GetModuleInformation(
                    handle,
                    module,
                    &mut info,
                    std::mem::size_of::<MODULEINFO>() as u32,
                )
            }
            .is_ok();
            if !ok {
                continue;
            }

            let mut name = [0u16; 260];
            // SAFETY: name is a writable UTF-16 buffer; the return value is its used length.
            let len = unsafe { GetModuleBaseNameW(handle, module, &mut name) } as usize;
            modules.push(ModuleInfo {
                name: String::from_utf16_lossy(&name[..len.min(name.len())]),
                base: info.lpBaseOfDll as u64,
                size: info.SizeOfImage as u64,
            });
        }

        Ok(modules)
    }

    fn allocate_pages(&self, size: usize) -> Result<u64> {
        let handle = self.live_handle()?;
        // SAFETY: VirtualAllocEx reserves and commits fresh pages in the target; no
        // local memory is touched.
        let address = unsafe {
            VirtualAllocEx(handle, None, size, MEM_COMMIT | MEM_RESERVE, PAGE_READWRITE)
        };
        if address.is_null() {
            return Err(Error::AllocationFailed {
                size,
                message: windows::core::Error::from_win32().to_string(),
            });
        }
        Ok(address as u64)
    }

    fn allocate_pages_near(&self, size: usize, near: u64) -> Result<u64> {
        let handle = self.live_handle()?;
        let origin = near & !(ALLOCATION_GRANULARITY - 1);
        let steps = NEAR_RANGE / ALLOCATION_GRANULARITY;

        for step in 1..steps {
            let distance = step * ALLOCATION_GRANULARITY;
            for candidate in [origin.checked_sub(distance), origin.checked_add(distance)]
                .into_iter()
                .flatten()
                .filter(|&c| c > 0 && c < MAX_SCAN_ADDRESS)
            {
                if !self.query(candidate).is_some_and(|info| info.State == MEM_FREE) {
                    continue;
                }
                // SAFETY: the hint is a free, granularity aligned address in the
                // target; VirtualAllocEx fails cleanly if it was taken meanwhile.
                let address = unsafe {
                    VirtualAllocEx(
                        handle,
                        Some(candidate as *const c_void),
                        size,
                        MEM_COMMIT | MEM_RESERVE,
                        PAGE_EXECUTE_READWRITE,
                    )
                };
                if !address.is_null() {
                    debug!("Allocated {} bytes at {:#x} near {:#x}", size, address as u64, near);
                    return Ok(address as u64);
                }
            }
        }

        Err(Error::AllocationFailed {
            size,
            message: format!("no free pages within reach of {:#x}", near),
        })
    }

    fn free_pages(&self, address: u64) -> Result<()> {
        let handle = self.live_handle()?;
        // SAFETY: address was returned by VirtualAllocEx for this process; MEM_RELEASE
        // requires a size of zero.
        unsafe { VirtualFreeEx(handle, address as *mut c_void, 0, MEM_RELEASE) }
            .map_err(|e| Error::write(address, format!("VirtualFreeEx failed: {}", e)))
    }
}

#[cfg(target_os = "windows")]
impl Drop for ProcessHandle {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(not(target_os = "windows"))]
impl ProcessHandle {
    pub fn open(_pid: u32) -> Result<Self> {
        Err(Error::ProcessOpenFailed(
            "Windows only: process access not supported on this platform".to_string(),
        ))
    }

    pub fn release(&self) {}
}

#[cfg(not(target_os = "windows"))]
impl ProcessMemory for ProcessHandle {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn is_alive(&self) -> bool {
        false
    }

    fn read_bytes(&self, _address: u64, _size: usize) -> Result<Vec<u8>> {
        Err(Error::ProcessClosed)
    }

    fn write_bytes(&self, _address: u64, _data: &[u8]) -> Result<usize> {
        Err(Error::ProcessClosed)
    }

    fn regions(&self) -> Result<Vec<MemoryRegion>> {
        Err(Error::ProcessClosed)
    }

    fn modules(&self) -> Result<Vec<ModuleInfo>> {
        Err(Error::ProcessClosed)
    }

    fn allocate_pages(&self, size: usize) -> Result<u64> {
        Err(Error::AllocationFailed {
            size,
            message: "process access not supported on this platform".to_string(),
        })
    }

    fn allocate_pages_near(&self, size: usize, _near: u64) -> Result<u64> {
        self.allocate_pages(size)
    }

    fn free_pages(&self, _address: u64) -> Result<()> {
        Err(Error::ProcessClosed)
    }
}

/// Lists running processes by executable name via a toolhelp snapshot.
#[derive(Debug, Clone)]
pub struct SystemProcesses {
    name: String,
}

impl SystemProcesses {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn clients() -> Self {
        Self::named(CLIENT_PROCESS_NAME)
    }
}

impl ProcessEnumerator for SystemProcesses {
    #[cfg(target_os = "windows")]
    fn candidates(&self) -> Result<Vec<ProcessCandidate>> {
        use std::ffi::OsString;
        use std::os::windows::ffi::OsStringExt;

        // SAFETY: CreateToolhelp32Snapshot with TH32CS_SNAPPROCESS is safe to call.
        // The returned handle is closed at the end of this function.
        let snapshot = unsafe {
            CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0)
                .map_err(|e| Error::ProcessNotFound(e.to_string()))?
        };

        let mut entry = PROCESSENTRY32W {
            dwSize: std::mem::size_of::<PROCESSENTRY32W>() as u32,
            ..Default::default()
        };
        let mut found = Vec::new();

        // SAFETY: snapshot is valid and entry is initialized with its size.
        unsafe {
            if Process32FirstW(snapshot, &mut entry).is_ok() {
                loop {
                    let len = entry
                        .szExeFile
                        .iter()
                        .position(|&c| c == 0)
                        .unwrap_or(entry.szExeFile.len());
                    let exe_name = OsString::from_wide(&entry.szExeFile[..len])
                        .to_string_lossy()
                        .into_owned();
                    if exe_name.eq_ignore_ascii_case(&self.name) {
                        found.push(ProcessCandidate {
                            pid: entry.th32ProcessID,
                            name: exe_name,
                        });
                    }
                    if Process32NextW(snapshot, &mut entry).is_err() {
                        break;
                    }
                }
            }
        }

        // SAFETY: snapshot is a valid handle from CreateToolhelp32Snapshot
        let _ = unsafe { CloseHandle(snapshot) };
        found.sort_by_key(|c| c.pid);
        Ok(found)
    }

    #[cfg(not(target_os = "windows"))]
    fn candidates(&self) -> Result<Vec<ProcessCandidate>> {
        Err(Error::ProcessNotFound(format!(
            "Windows only: cannot enumerate '{}' on this platform",
            self.name
        )))
    }
}

/// Opens client processes with read, write and allocation rights.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProvider;

impl ProcessProvider for SystemProvider {
    type Process = ProcessHandle;

    fn open_process(&self, candidate: &ProcessCandidate) -> Result<Self::Process> {
        ProcessHandle::open(candidate.pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn test_open_unsupported_off_windows() {
        assert!(matches!(
            ProcessHandle::open(1234),
            Err(Error::ProcessOpenFailed(_))
        ));
        assert!(SystemProcesses::clients().candidates().is_err());
    }

    #[test]
    fn test_client_enumerator_name() {
        let enumerator = SystemProcesses::clients();
        assert_eq!(enumerator.name, CLIENT_PROCESS_NAME);
    }
}
