//! Configuration and tuning constants.
//!
//! - `AutomationConfig` - user-facing combat automation settings (JSON)
//! - Scan, traversal, scratch, and polling constants

mod automation;

pub use automation::*;

/// Address space scanning.
pub mod scan {
    /// Bytes read per chunk while scanning a region (4MB).
    pub const CHUNK_SIZE: usize = 4 * 1024 * 1024;

    /// Highest user-mode address on 64-bit Windows.
    pub const MAX_USER_ADDRESS: u64 = 0x7FFF_FFFF_FFFF;

    /// Largest single read the accessor accepts.
    pub const MAX_READ_SIZE: usize = 64 * 1024 * 1024;
}

/// Object graph traversal bounds.
pub mod traversal {
    /// Maximum number of nodes visited by one traversal before it is aborted.
    pub const MAX_HOPS: usize = 4096;

    /// Maximum number of elements accepted from one vector or list.
    pub const MAX_LIST_ELEMENTS: usize = 1000;

    /// Maximum length (in code units) of a game string.
    pub const MAX_STRING_LEN: usize = 5000;
}

/// Scratch pool allocation in the target process.
pub mod scratch {
    /// Size of each page requested from the OS.
    pub const PAGE_SIZE: usize = 0x1000;

    /// Alignment of every block handed out by the pool.
    pub const ALIGNMENT: usize = 16;
}

/// Code detours installed by hooks.
pub mod detour {
    /// Granularity of reservations in the target; near allocations step by it.
    pub const ALLOCATION_GRANULARITY: u64 = 0x1_0000;

    /// Farthest a stub may sit from its jump site and still be reached by rel32.
    pub const NEAR_RANGE: u64 = 0x7FFF_0000;

    /// Bytes searched backwards from a jump site for a companion patch.
    pub const PATCH_WINDOW: usize = 0x100;
}

/// Combat polling defaults.
pub mod polling {
    use std::time::Duration;

    /// Interval between combat state samples.
    pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

    /// Maximum time to wait for a planning phase once in combat.
    pub const PLANNING_TIMEOUT: Duration = Duration::from_secs(120);

    /// Maximum time to wait for the round number to advance.
    pub const ROUND_TIMEOUT: Duration = Duration::from_secs(180);

    /// Attempts at assembling a snapshot while the round keeps changing.
    pub const SNAPSHOT_ATTEMPTS: u32 = 3;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_constants() {
        assert_eq!(scan::CHUNK_SIZE, 4 * 1024 * 1024);
        assert!(scan::MAX_READ_SIZE <= scan::MAX_USER_ADDRESS as usize);
    }

    #[test]
    fn test_scratch_alignment_divides_page() {
        assert_eq!(scratch::PAGE_SIZE % scratch::ALIGNMENT, 0);
    }

    #[test]
    fn test_near_range_fits_rel32() {
        assert!(detour::NEAR_RANGE < i32::MAX as u64);
        assert_eq!(detour::ALLOCATION_GRANULARITY % scratch::PAGE_SIZE as u64, 0);
    }

    #[test]
    fn test_polling_constants() {
        assert!(polling::POLL_INTERVAL < polling::PLANNING_TIMEOUT);
        assert!(polling::SNAPSHOT_ATTEMPTS >= 1);
    }
}
