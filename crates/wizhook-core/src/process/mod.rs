mod handle;
pub mod provider;
mod region;

// In-memory process backend for unit and integration tests
#[doc(hidden)]
pub mod mock;

pub use handle::*;
pub use provider::{ProcessCandidate, ProcessEnumerator, ProcessMemory, ProcessProvider};
pub use region::{MemoryRegion, ModuleInfo};

#[doc(hidden)]
pub use mock::{MockMemoryBuilder, MockProcess, MockProvider};
