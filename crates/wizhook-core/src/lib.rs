pub mod combat;
pub mod config;
pub mod error;
pub mod graph;
pub mod hook;
pub mod memory;
pub mod process;
pub mod scan;
pub mod session;
pub mod wait;

pub use combat::{
    CombatEngine, CombatSnapshot, CombatState, CombatStrategy, CombatTracker, ScriptedStrategy,
};
pub use config::{AutomationConfig, FallbackAction};
pub use error::{Error, Result};
pub use graph::{EntityFilter, EntityRecord, GraphReader};
pub use hook::{HookKind, HookRegistry, SignatureSet, builtin_signatures};
pub use memory::{LayoutSet, MemoryAccessor, ScratchPool, Value, builtin_layouts};
pub use process::{ProcessHandle, ProcessMemory, ProcessProvider};
pub use scan::AddressResolver;
pub use session::{DetachReport, Session, SessionManager};
pub use wait::{CancelToken, Pacer, PollConfig, SystemPacer};
