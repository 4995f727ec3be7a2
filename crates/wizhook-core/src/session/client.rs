use std::sync::Arc;

use chrono::{DateTime, Local};
use strum::IntoEnumIterator;
use tracing::{debug, info};

use crate::config::traversal::MAX_HOPS;
use crate::error::{Error, Result};
use crate::graph::{EntityRecord, GraphReader};
use crate::hook::{BaseAccess, HookKind, HookRegistry, SignatureSet};
use crate::memory::{LayoutSet, MemoryAccessor, Value, layouts};
use crate::process::ProcessMemory;

/// What `detach` cleaned up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetachReport {
    pub hooks: Vec<HookKind>,
    pub scratch_pages: usize,
}

/// One attached client: its memory accessor, hook registry and layouts.
///
/// A session is owned by exactly one automation task. Dropping it without
/// `detach` runs the same teardown.
pub struct Session<P: ProcessMemory> {
    memory: MemoryAccessor<P>,
    hooks: HookRegistry,
    layouts: Arc<LayoutSet>,
    attached_at: DateTime<Local>,
    max_hops: usize,
    detached: bool,
}

impl<P: ProcessMemory> Session<P> {
    pub fn attach(process: Arc<P>, signatures: SignatureSet, layouts: Arc<LayoutSet>) -> Result<Self> {
        if !process.is_alive() {
            return Err(Error::ProcessClosed);
        }
        info!("Attached to client (PID: {})", process.pid());
        Ok(Self {
            memory: MemoryAccessor::new(process),
            hooks: HookRegistry::new(signatures),
            layouts,
            attached_at: Local::now(),
            max_hops: MAX_HOPS,
            detached: false,
        })
    }

    pub fn with_max_hops(mut self, max_hops: usize) -> Self {
        self.max_hops = max_hops;
        self
    }

    pub fn pid(&self) -> u32 {
        self.memory.pid()
    }

    pub fn memory(&self) -> &MemoryAccessor<P> {
        &self.memory
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    pub fn layouts(&self) -> &Arc<LayoutSet> {
        &self.layouts
    }

    pub fn attached_at(&self) -> DateTime<Local> {
        self.attached_at
    }

    pub fn is_alive(&self) -> bool {
        self.memory.is_alive()
    }

    pub fn graph(&self) -> GraphReader<'_, P> {
        GraphReader::new(&self.memory, &self.layouts).with_max_hops(self.max_hops)
    }

    pub fn activate(&self, kind: HookKind) -> Result<u64> {
        self.hooks.activate(kind, &self.memory)
    }

    pub fn activate_exclusive(&self, kind: HookKind) -> Result<u64> {
        self.hooks.activate_exclusive(kind, &self.memory)
    }

    /// Deactivate `kind`, restoring any code its detour replaced.
    pub fn deactivate(&self, kind: HookKind) -> bool {
        self.hooks.deactivate(kind, &self.memory)
    }

    /// Activate every hook except the mouseless cursor, stopping at the first
    /// failure.
    pub fn activate_all(&self) -> Result<Vec<HookKind>> {
        let mut activated = Vec::new();
        for kind in HookKind::iter().filter(|k| k.activated_by_default()) {
            self.activate(kind)?;
            activated.push(kind);
        }
        Ok(activated)
    }

    /// Address of the structure behind `kind`.
    ///
    /// Pointer hooks whose slot holds null yield `None` (no duel: not in combat).
    pub fn read_base(&self, kind: HookKind) -> Result<Option<u64>> {
        let slot = self.hooks.address(kind)?;
        match kind.base_access() {
            BaseAccess::Pointer => self.memory.read_pointer(slot),
            BaseAccess::Inline => Ok(Some(slot)),
        }
    }

    /// Like `read_base`, but an unavailable hook is also `None`.
    ///
    /// Only a closed process is reported as an error.
    pub fn optional_base(&self, kind: HookKind) -> Result<Option<u64>> {
        match self.read_base(kind) {
            Ok(base) => Ok(base),
            Err(Error::ProcessClosed) => Err(Error::ProcessClosed),
            Err(e) => {
                debug!("Hook {} unavailable: {}", kind, e);
                Ok(None)
            }
        }
    }

    pub fn read_hook_field(&self, kind: HookKind, field: &str) -> Result<Option<Value>> {
        let Some(base) = self.read_base(kind)? else {
            return Ok(None);
        };
        let layout = self.layouts.get(kind.layout())?;
        self.memory.read_field(base, layout, field).map(Some)
    }

    pub fn read_hook_record(&self, kind: HookKind) -> Result<Option<EntityRecord>> {
        match self.read_base(kind)? {
            Some(base) => self.graph().record(base, kind.layout()).map(Some),
            None => Ok(None),
        }
    }

    /// Move the cursor the client sees while the mouseless cursor hook is active.
    pub fn write_mouse_position(&self, x: i32, y: i32) -> Result<()> {
        let slot = self.hooks.address(HookKind::MouselessCursor)?;
        let layout = self.layouts.get(layouts::MOUSE_POSITION)?;
        self.memory.write_field(slot, layout, "x", &Value::I32(x))?;
        self.memory.write_field(slot, layout, "y", &Value::I32(y))
    }

    fn teardown(&mut self) -> DetachReport {
        if self.detached {
            return DetachReport::default();
        }
        self.detached = true;

        let hooks = self.hooks.deactivate_all(&self.memory);
        self.memory.mark_closed();
        let scratch_pages = self.memory.release_scratch();
        info!(
            "Detached from client (PID: {}): {} hooks, {} scratch pages",
            self.pid(),
            hooks.len(),
            scratch_pages
        );
        DetachReport {
            hooks,
            scratch_pages,
        }
    }

    /// Deactivate every hook, close memory access, then free outstanding
    /// scratch allocations. The OS handle closes when the session drops.
    pub fn detach(mut self) -> DetachReport {
        self.teardown()
    }
}

impl<P: ProcessMemory> Drop for Session<P> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hook::{DetourSpec, HookSignature, ResolveStep};
    use crate::memory::builtin_layouts;
    use crate::process::{MockMemoryBuilder, MockProcess};

    const CODE: u64 = 0x40_0000;
    const DUEL_SLOT: u64 = 0x60_0000;
    const MOUSE_SLOT: u64 = 0x60_0100;
    const DUEL: u64 = 0x70_0000;

    fn signature(hook: HookKind, marker: u8, target: u64) -> HookSignature {
        let at = CODE + marker as u64 * 0x10;
        HookSignature {
            hook,
            pattern: format!("57 5A 48 {:02X}", marker),
            offset: 0,
            module: None,
            symbol: None,
            steps: vec![ResolveStep::Add {
                value: target as i64 - at as i64,
            }],
            detour: None,
        }
    }

    fn signatures() -> SignatureSet {
        SignatureSet {
            version: "test".to_string(),
            hooks: vec![
                signature(HookKind::Duel, 1, DUEL_SLOT),
                signature(HookKind::MouselessCursor, 2, MOUSE_SLOT),
            ],
        }
    }

    fn process(duel: u64) -> Arc<MockProcess> {
        let mut code = vec![0u8; 0x40];
        for marker in 1..=2u8 {
            let at = marker as usize * 0x10;
            code[at..at + 4].copy_from_slice(&[0x57, 0x5A, 0x48, marker]);
        }
        Arc::new(
            MockMemoryBuilder::new()
                .code(CODE, &code)
                .region(DUEL_SLOT, 0x200)
                .region(DUEL, 0x100)
                .write_u64(DUEL_SLOT, duel)
                .write_i32(DUEL + 188, 4)
                .build(),
        )
    }

    fn session(duel: u64) -> (Arc<MockProcess>, Session<MockProcess>) {
        let process = process(duel);
        let session =
            Session::attach(Arc::clone(&process), signatures(), Arc::new(builtin_layouts()))
                .unwrap();
        (process, session)
    }

    #[test]
    fn test_read_base_requires_activation() {
        let (_, session) = session(DUEL);
        assert!(matches!(
            session.read_base(HookKind::Duel),
            Err(Error::HookNotReady(HookKind::Duel))
        ));
        assert_eq!(session.optional_base(HookKind::Duel).unwrap(), None);

        assert_eq!(session.activate(HookKind::Duel).unwrap(), DUEL_SLOT);
        assert_eq!(session.read_base(HookKind::Duel).unwrap(), Some(DUEL));
        assert_eq!(
            session.read_hook_field(HookKind::Duel, "round_number").unwrap(),
            Some(Value::I32(4))
        );
    }

    #[test]
    fn test_null_duel_is_none() {
        let (_, session) = session(0);
        session.activate(HookKind::Duel).unwrap();
        assert_eq!(session.read_base(HookKind::Duel).unwrap(), None);
        assert_eq!(session.read_hook_record(HookKind::Duel).unwrap(), None);
    }

    #[test]
    fn test_write_mouse_position() {
        let (process, session) = session(DUEL);
        assert!(matches!(
            session.write_mouse_position(1, 2),
            Err(Error::HookNotReady(HookKind::MouselessCursor))
        ));

        session.activate(HookKind::MouselessCursor).unwrap();
        assert_eq!(session.read_base(HookKind::MouselessCursor).unwrap(), Some(MOUSE_SLOT));
        session.write_mouse_position(640, 360).unwrap();
        assert_eq!(process.peek(MOUSE_SLOT, 4).unwrap(), 640i32.to_le_bytes().to_vec());
        assert_eq!(process.peek(MOUSE_SLOT + 4, 4).unwrap(), 360i32.to_le_bytes().to_vec());
    }

    #[test]
    fn test_activate_all_skips_mouseless_and_stops_on_failure() {
        let (_, session) = session(DUEL);
        // Client has no signature in this set.
        assert!(matches!(session.activate_all(), Err(Error::UnknownHook(_))));
        assert!(!session.hooks().is_active(HookKind::MouselessCursor));
    }

    #[test]
    fn test_detach_order() {
        let (process, session) = session(DUEL);
        session.activate(HookKind::Duel).unwrap();
        session.memory().allocate(64).unwrap();
        assert_eq!(process.live_allocations(), 1);

        let report = session.detach();
        assert_eq!(report.hooks, vec![HookKind::Duel]);
        assert_eq!(report.scratch_pages, 1);
        assert_eq!(process.live_allocations(), 0);
    }

    #[test]
    fn test_detach_removes_detours() {
        let process = process(DUEL);
        let hook = HookSignature {
            steps: Vec::new(),
            detour: Some(DetourSpec {
                length: 5,
                capture: "48 A3 {export}".to_string(),
                relocate: true,
                patches: Vec::new(),
            }),
            ..signature(HookKind::RootWindow, 1, 0)
        };
        let set = SignatureSet {
            version: "test".to_string(),
            hooks: vec![hook],
        };
        let session =
            Session::attach(Arc::clone(&process), set, Arc::new(builtin_layouts())).unwrap();

        let export = session.activate(HookKind::RootWindow).unwrap();
        assert_eq!(process.peek(CODE + 0x10, 1).unwrap(), vec![0xE9]);
        process.poke_u64(export, DUEL);
        assert_eq!(session.read_base(HookKind::RootWindow).unwrap(), Some(DUEL));

        let report = session.detach();
        assert_eq!(report.hooks, vec![HookKind::RootWindow]);
        assert_eq!(process.peek(CODE + 0x10, 4).unwrap(), vec![0x57, 0x5A, 0x48, 0x01]);
        assert_eq!(process.live_allocations(), 0);
    }

    #[test]
    fn test_attach_to_dead_process() {
        let process = process(DUEL);
        process.set_alive(false);
        assert!(matches!(
            Session::attach(process, signatures(), Arc::new(builtin_layouts())),
            Err(Error::ProcessClosed)
        ));
    }
}
