//! Per-session hook state.
//!
//! Activation runs the resolver at most once per hook: a second caller that
//! arrives while a scan is in flight blocks on the condition variable and gets
//! the first caller's outcome. Hooks with a detour own it while active, and
//! deactivation takes it out of the client again.

use std::collections::HashMap;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use strum::{Display, IntoEnumIterator};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::hook::{HookKind, InstalledDetour, SignatureSet};
use crate::memory::MemoryAccessor;
use crate::process::ProcessMemory;
use crate::scan::AddressResolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum HookState {
    Inactive,
    Activating,
    Active,
    Failed,
}

#[derive(Debug)]
struct HookSlot {
    state: HookState,
    address: Option<u64>,
    detour: Option<InstalledDetour>,
    ever_activated: bool,
    last_error: Option<String>,
    /// Bumped every time an activation finishes.
    generation: u64,
    scans: u32,
}

impl HookSlot {
    fn new() -> Self {
        Self {
            state: HookState::Inactive,
            address: None,
            detour: None,
            ever_activated: false,
            last_error: None,
            generation: 0,
            scans: 0,
        }
    }
}

/// Returns a hook to `Inactive` and wakes waiters if its resolver unwinds.
struct ActivationGuard<'a> {
    registry: &'a HookRegistry,
    kind: HookKind,
    finished: bool,
}

impl Drop for ActivationGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut slots = self.registry.slots();
        if let Some(slot) = slots.get_mut(&self.kind) {
            warn!("Hook {} activation panicked", self.kind);
            slot.state = HookState::Inactive;
            slot.address = None;
            slot.generation += 1;
            slot.last_error = Some("activation panicked".to_string());
        }
        drop(slots);
        self.registry.changed.notify_all();
    }
}

pub struct HookRegistry {
    signatures: SignatureSet,
    slots: Mutex<HashMap<HookKind, HookSlot>>,
    changed: Condvar,
}

impl HookRegistry {
    pub fn new(signatures: SignatureSet) -> Self {
        let slots = HookKind::iter().map(|k| (k, HookSlot::new())).collect();
        Self {
            signatures,
            slots: Mutex::new(slots),
            changed: Condvar::new(),
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<HookKind, HookSlot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve the hook's address, installing its detour if it has one, or
    /// return the cached address.
    ///
    /// Idempotent once active. A failed hook is retried on the next call.
    pub fn activate<P: ProcessMemory>(
        &self,
        kind: HookKind,
        memory: &MemoryAccessor<P>,
    ) -> Result<u64> {
        self.activate_inner(kind, memory, false)
    }

    /// Like `activate`, but an already active hook is an error.
    pub fn activate_exclusive<P: ProcessMemory>(
        &self,
        kind: HookKind,
        memory: &MemoryAccessor<P>,
    ) -> Result<u64> {
        self.activate_inner(kind, memory, true)
    }

    fn activate_inner<P: ProcessMemory>(
        &self,
        kind: HookKind,
        memory: &MemoryAccessor<P>,
        exclusive: bool,
    ) -> Result<u64> {
        let signature = self
            .signatures
            .get(kind)
            .cloned()
            .ok_or_else(|| Error::UnknownHook(format!("no signature for {}", kind)))?;

        {
            let mut slots = self.slots();
            let mut waited_on = None;
            loop {
                let slot = slots.entry(kind).or_insert_with(HookSlot::new);
                match slot.state {
                    HookState::Active => {
                        if exclusive && waited_on.is_none() {
                            return Err(Error::HookAlreadyActivated(kind));
                        }
                        if let Some(address) = slot.address {
                            return Ok(address);
                        }
                    }
                    HookState::Activating => {
                        waited_on.get_or_insert(slot.generation);
                        debug!("Hook {} is activating, waiting", kind);
                        slots = self
                            .changed
                            .wait(slots)
                            .unwrap_or_else(PoisonError::into_inner);
                        continue;
                    }
                    HookState::Failed if waited_on.is_some_and(|g| g != slot.generation) => {
                        return Err(Error::HookActivationFailed {
                            hook: kind,
                            reason: slot.last_error.clone().unwrap_or_default(),
                        });
                    }
                    HookState::Inactive | HookState::Failed => {}
                }

                slot.state = HookState::Activating;
                slot.ever_activated = true;
                slot.scans += 1;
                break;
            }
        }

        let mut guard = ActivationGuard {
            registry: self,
            kind,
            finished: false,
        };
        debug!("Activating hook {}", kind);
        let outcome = signature
            .resolve(&AddressResolver::new(memory))
            .and_then(|site| match &signature.detour {
                Some(spec) => {
                    let detour = InstalledDetour::install(memory, spec, site)?;
                    Ok((detour.export(), Some(detour)))
                }
                None => Ok((site, None)),
            });

        let mut slots = self.slots();
        guard.finished = true;
        let slot = slots.entry(kind).or_insert_with(HookSlot::new);
        slot.generation += 1;
        let result = match outcome {
            Ok((address, detour)) => {
                info!("Hook {} active at {:#x}", kind, address);
                slot.state = HookState::Active;
                slot.address = Some(address);
                slot.detour = detour;
                slot.last_error = None;
                Ok(address)
            }
            Err(e) => {
                warn!("Hook {} failed to activate: {}", kind, e);
                slot.state = HookState::Failed;
                slot.address = None;
                slot.last_error = Some(e.to_string());
                Err(e)
            }
        };
        drop(slots);
        self.changed.notify_all();
        result
    }

    /// Return an active or failed hook to `Inactive`, removing its detour.
    /// Returns whether the hook was active.
    ///
    /// A detour that cannot be removed (the client exited, say) is logged and
    /// dropped; the hook is inactive either way.
    pub fn deactivate<P: ProcessMemory>(&self, kind: HookKind, memory: &MemoryAccessor<P>) -> bool {
        let mut slots = self.slots();
        let Some(slot) = slots.get_mut(&kind) else {
            return false;
        };
        let was_active = match slot.state {
            HookState::Active => true,
            HookState::Failed => false,
            HookState::Inactive | HookState::Activating => return false,
        };
        // Removed under the lock so a concurrent activation cannot see a half
        // restored site.
        if let Some(detour) = slot.detour.take()
            && let Err(e) = detour.remove(memory)
        {
            warn!("Hook {}: failed to remove detour at {:#x}: {}", kind, detour.site(), e);
        }
        slot.state = HookState::Inactive;
        slot.address = None;
        debug!("Hook {} deactivated", kind);
        was_active
    }

    /// Deactivate every active hook, returning the ones that were active.
    pub fn deactivate_all<P: ProcessMemory>(&self, memory: &MemoryAccessor<P>) -> Vec<HookKind> {
        let mut kinds: Vec<HookKind> = HookKind::iter()
            .filter(|&k| self.deactivate(k, memory))
            .collect();
        kinds.sort();
        kinds
    }

    /// The hook's address: a static slot, or the export slot of its detour.
    ///
    /// `HookNotReady` if the hook was never activated (or its first activation is
    /// still running); `HookNotActive` after deactivation or failure.
    pub fn address(&self, kind: HookKind) -> Result<u64> {
        let slots = self.slots();
        let Some(slot) = slots.get(&kind) else {
            return Err(Error::HookNotReady(kind));
        };
        match (slot.state, slot.address) {
            (HookState::Active, Some(address)) => Ok(address),
            _ if !slot.ever_activated => Err(Error::HookNotReady(kind)),
            (HookState::Activating, _) if slot.generation == 0 => Err(Error::HookNotReady(kind)),
            _ => Err(Error::HookNotActive(kind)),
        }
    }

    pub fn state(&self, kind: HookKind) -> HookState {
        self.slots()
            .get(&kind)
            .map_or(HookState::Inactive, |slot| slot.state)
    }

    pub fn is_active(&self, kind: HookKind) -> bool {
        self.state(kind) == HookState::Active
    }

    pub fn last_error(&self, kind: HookKind) -> Option<String> {
        self.slots().get(&kind).and_then(|slot| slot.last_error.clone())
    }

    /// Number of resolver runs started for `kind`.
    pub fn scan_count(&self, kind: HookKind) -> u32 {
        self.slots().get(&kind).map_or(0, |slot| slot.scans)
    }

    pub fn active_hooks(&self) -> Vec<HookKind> {
        let slots = self.slots();
        let mut kinds: Vec<HookKind> = slots
            .iter()
            .filter(|(_, slot)| slot.state == HookState::Active)
            .map(|(&kind, _)| kind)
            .collect();
        kinds.sort();
        kinds
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::hook::{DetourSpec, HookSignature, ResolveStep};
    use crate::process::{MockMemoryBuilder, MockProcess};

    const DUEL_CODE: [u8; 8] = [0x48, 0x8B, 0x05, 0x00, 0x01, 0x00, 0x00, 0xC3];

    fn signatures() -> SignatureSet {
        SignatureSet {
            version: "test".to_string(),
            hooks: vec![
                HookSignature {
                    hook: HookKind::Duel,
                    pattern: "48 8B 05 ?? ?? ?? ?? C3".to_string(),
                    offset: 0,
                    module: None,
                    symbol: None,
                    steps: vec![ResolveStep::RipRelative {
                        disp_offset: 3,
                        instr_len: 7,
                    }],
                    detour: None,
                },
                HookSignature {
                    hook: HookKind::Quest,
                    pattern: "DE AD BE EF".to_string(),
                    offset: 0,
                    module: None,
                    symbol: None,
                    steps: vec![],
                    detour: None,
                },
            ],
        }
    }

    fn memory() -> MemoryAccessor<MockProcess> {
        MemoryAccessor::new(Arc::new(
            MockMemoryBuilder::new().code(0x40_0000, &DUEL_CODE).build(),
        ))
    }

    /// A backend that panics as soon as the resolver touches it.
    struct PanickingProcess;

    impl ProcessMemory for PanickingProcess {
        fn pid(&self) -> u32 {
            1
        }

        fn is_alive(&self) -> bool {
            true
        }

        fn read_bytes(&self, _address: u64, _size: usize) -> Result<Vec<u8>> {
            panic!("read_bytes")
        }

        fn write_bytes(&self, _address: u64, _data: &[u8]) -> Result<usize> {
            panic!("write_bytes")
        }

        fn regions(&self) -> Result<Vec<crate::process::MemoryRegion>> {
            panic!("regions")
        }

        fn modules(&self) -> Result<Vec<crate::process::ModuleInfo>> {
            panic!("modules")
        }

        fn allocate_pages(&self, _size: usize) -> Result<u64> {
            panic!("allocate_pages")
        }

        fn allocate_pages_near(&self, _size: usize, _near: u64) -> Result<u64> {
            panic!("allocate_pages_near")
        }

        fn free_pages(&self, _address: u64) -> Result<()> {
            panic!("free_pages")
        }
    }

    #[test]
    fn test_panicking_resolver_resets_hook() {
        let registry = HookRegistry::new(signatures());
        let broken = MemoryAccessor::new(Arc::new(PanickingProcess));

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            registry.activate(HookKind::Duel, &broken)
        }));
        assert!(outcome.is_err());
        assert_eq!(registry.state(HookKind::Duel), HookState::Inactive);
        assert!(matches!(
            registry.address(HookKind::Duel),
            Err(Error::HookNotActive(HookKind::Duel))
        ));

        // Nothing is left waiting on the aborted scan.
        let address = registry.activate(HookKind::Duel, &memory()).unwrap();
        assert_eq!(registry.address(HookKind::Duel).unwrap(), address);
        assert_eq!(registry.scan_count(HookKind::Duel), 2);
    }

    #[test]
    fn test_read_before_activation_is_not_ready() {
        let registry = HookRegistry::new(signatures());
        assert!(matches!(
            registry.address(HookKind::Duel),
            Err(Error::HookNotReady(HookKind::Duel))
        ));
        assert_eq!(registry.state(HookKind::Duel), HookState::Inactive);
    }

    #[test]
    fn test_activate_is_idempotent() {
        let registry = HookRegistry::new(signatures());
        let memory = memory();

        let first = registry.activate(HookKind::Duel, &memory).unwrap();
        let second = registry.activate(HookKind::Duel, &memory).unwrap();
        assert_eq!(first, 0x40_0107);
        assert_eq!(first, second);
        assert_eq!(registry.scan_count(HookKind::Duel), 1);
        assert_eq!(registry.address(HookKind::Duel).unwrap(), first);
    }

    #[test]
    fn test_exclusive_activation_rejects_active_hook() {
        let registry = HookRegistry::new(signatures());
        let memory = memory();
        registry.activate_exclusive(HookKind::Duel, &memory).unwrap();
        assert!(matches!(
            registry.activate_exclusive(HookKind::Duel, &memory),
            Err(Error::HookAlreadyActivated(HookKind::Duel))
        ));
    }

    #[test]
    fn test_deactivate_then_read_is_not_active() {
        let registry = HookRegistry::new(signatures());
        let memory = memory();
        registry.activate(HookKind::Duel, &memory).unwrap();

        assert!(registry.deactivate(HookKind::Duel, &memory));
        assert!(!registry.deactivate(HookKind::Duel, &memory));
        assert!(matches!(
            registry.address(HookKind::Duel),
            Err(Error::HookNotActive(HookKind::Duel))
        ));

        // Reactivation scans again.
        registry.activate(HookKind::Duel, &memory).unwrap();
        assert_eq!(registry.scan_count(HookKind::Duel), 2);
    }

    #[test]
    fn test_failed_activation_is_retried() {
        let registry = HookRegistry::new(signatures());
        let memory = memory();

        assert!(matches!(
            registry.activate(HookKind::Quest, &memory),
            Err(Error::PatternNotFound { .. })
        ));
        assert_eq!(registry.state(HookKind::Quest), HookState::Failed);
        assert!(registry.last_error(HookKind::Quest).is_some());
        assert!(matches!(
            registry.address(HookKind::Quest),
            Err(Error::HookNotActive(HookKind::Quest))
        ));

        assert!(registry.activate(HookKind::Quest, &memory).is_err());
        assert_eq!(registry.scan_count(HookKind::Quest), 2);

        assert!(!registry.deactivate(HookKind::Quest, &memory));
        assert_eq!(registry.state(HookKind::Quest), HookState::Inactive);
        assert!(registry.last_error(HookKind::Quest).is_some());
    }

    #[test]
    fn test_missing_signature() {
        let registry = HookRegistry::new(signatures());
        assert!(matches!(
            registry.activate(HookKind::Client, &memory()),
            Err(Error::UnknownHook(_))
        ));
        assert_eq!(registry.state(HookKind::Client), HookState::Inactive);
    }

    #[test]
    fn test_deactivate_all() {
        let registry = HookRegistry::new(signatures());
        let memory = memory();
        registry.activate(HookKind::Duel, &memory).unwrap();
        let _ = registry.activate(HookKind::Quest, &memory);

        assert_eq!(registry.active_hooks(), vec![HookKind::Duel]);
        assert_eq!(registry.deactivate_all(&memory), vec![HookKind::Duel]);
        assert!(registry.active_hooks().is_empty());
    }

    const SITE: u64 = 0x40_0010;
    const SITE_BYTES: [u8; 7] = [0x49, 0x8B, 0x8F, 0xD8, 0x00, 0x00, 0x00];

    fn detoured() -> (Arc<MockProcess>, MemoryAccessor<MockProcess>, HookRegistry) {
        let mut code = vec![0xCC; 0x40];
        code[0x08..0x0B].copy_from_slice(&[0x48, 0x8B, 0x01]);
        code[0x10..0x17].copy_from_slice(&SITE_BYTES);
        let process = Arc::new(
            MockMemoryBuilder::new()
                .code(0x40_0000, &code)
                .module("WizardGraphicalClient.exe", 0x40_0000, 0x1000)
                .build(),
        );
        let registry = HookRegistry::new(SignatureSet {
            version: "test".to_string(),
            hooks: vec![HookSignature {
                hook: HookKind::RootWindow,
                pattern: "48 8B 01 ?? ?? ?? ?? ?? 49 8B 8F".to_string(),
                offset: 8,
                module: Some("WizardGraphicalClient.exe".to_string()),
                symbol: None,
                steps: Vec::new(),
                detour: Some(DetourSpec {
                    length: 7,
                    capture: "50 49 8B 87 D8 00 00 00 48 A3 {export} 58".to_string(),
                    relocate: true,
                    patches: Vec::new(),
                }),
            }],
        });
        (Arc::clone(&process), MemoryAccessor::new(process), registry)
    }

    #[test]
    fn test_detour_hook_exports_through_slot() {
        let (process, memory, registry) = detoured();
        let export = registry.activate(HookKind::RootWindow, &memory).unwrap();

        assert_eq!(process.live_allocations(), 1);
        assert_eq!(process.peek_u64(export), Some(0));
        let site = process.peek(SITE, 7).unwrap();
        assert_eq!(site[0], 0xE9);
        assert_eq!(&site[5..], &[0x90, 0x90]);
        let rel = i32::from_le_bytes([site[1], site[2], site[3], site[4]]);
        let stub = (SITE + 5).wrapping_add_signed(rel as i64);
        assert_eq!(
            process.peek(stub, 10).unwrap(),
            vec![0x50, 0x49, 0x8B, 0x87, 0xD8, 0x00, 0x00, 0x00, 0x48, 0xA3]
        );
        assert_eq!(process.peek_u64(stub + 10), Some(export));

        // The client running the stub publishes its pointer.
        process.poke_u64(export, 0x1234_5000);
        let slot = registry.address(HookKind::RootWindow).unwrap();
        assert_eq!(memory.read_pointer(slot).unwrap(), Some(0x1234_5000));

        // Activating again reuses the installed detour.
        assert_eq!(registry.activate(HookKind::RootWindow, &memory).unwrap(), export);
        assert_eq!(process.live_allocations(), 1);
    }

    #[test]
    fn test_deactivate_restores_site() {
        let (process, memory, registry) = detoured();
        registry.activate(HookKind::RootWindow, &memory).unwrap();

        assert_eq!(registry.deactivate_all(&memory), vec![HookKind::RootWindow]);
        assert_eq!(process.peek(SITE, 7).unwrap(), SITE_BYTES.to_vec());
        assert_eq!(process.live_allocations(), 0);

        // The restored site can be detoured again.
        registry.activate(HookKind::RootWindow, &memory).unwrap();
        assert_eq!(process.peek(SITE, 1).unwrap(), vec![0xE9]);
    }

    #[test]
    fn test_deactivate_after_exit_still_resets() {
        let (process, memory, registry) = detoured();
        registry.activate(HookKind::RootWindow, &memory).unwrap();
        process.set_alive(false);

        assert!(registry.deactivate(HookKind::RootWindow, &memory));
        assert_eq!(registry.state(HookKind::RootWindow), HookState::Inactive);
    }
}
