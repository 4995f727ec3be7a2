use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hook::{DetourSpec, HookKind, SitePatch};
use crate::memory::MemoryAccessor;
use crate::process::{CLIENT_PROCESS_NAME, ProcessMemory};
use crate::scan::{AddressResolver, PatternSpec, ScanScope, find_export};

/// One step applied to a match address on the way to the hook slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ResolveStep {
    /// Treat the address as an instruction with a 32-bit displacement at
    /// `disp_offset`; the target is `address + instr_len + disp`.
    RipRelative { disp_offset: u64, instr_len: u64 },
    /// Follow the pointer stored at the address.
    Deref,
    Add { value: i64 },
}

impl ResolveStep {
    pub fn apply<P: ProcessMemory>(&self, memory: &MemoryAccessor<P>, address: u64) -> Result<u64> {
        match *self {
            ResolveStep::RipRelative {
                disp_offset,
                instr_len,
            } => {
                let disp = memory.read_i32(address + disp_offset)?;
                Ok((address + instr_len).wrapping_add_signed(disp as i64))
            }
            ResolveStep::Deref => memory
                .read_pointer(address)?
                .ok_or_else(|| Error::read(address, "null pointer in resolution chain")),
            ResolveStep::Add { value } => Ok(address.wrapping_add_signed(value)),
        }
    }
}

/// How to find a hook's address.
///
/// The site comes from a code pattern, or from a module export when `symbol`
/// is set, and is then walked through `steps`. Without a detour the result is
/// a static slot in the client. With one, the site is diverted and the hook
/// address is the detour's export slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookSignature {
    pub hook: HookKind,
    #[serde(default)]
    pub pattern: String,
    #[serde(default)]
    pub offset: i64,
    /// Restrict the scan to this module; the whole process otherwise.
    #[serde(default)]
    pub module: Option<String>,
    /// Export of `module` to use as the site instead of the pattern.
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub steps: Vec<ResolveStep>,
    #[serde(default)]
    pub detour: Option<DetourSpec>,
}

impl HookSignature {
    pub fn pattern_spec(&self) -> Result<PatternSpec> {
        Ok(PatternSpec::parse(&self.pattern)?.with_offset(self.offset))
    }

    pub fn scope(&self) -> ScanScope {
        match &self.module {
            Some(name) => ScanScope::Module(name.clone()),
            None => ScanScope::Process,
        }
    }

    /// Locate the site and walk the steps from it.
    pub fn resolve<P: ProcessMemory>(&self, resolver: &AddressResolver<'_, P>) -> Result<u64> {
        let mut address = match &self.symbol {
            Some(symbol) => {
                let module = self.module.as_deref().ok_or_else(|| {
                    Error::InvalidPattern(format!("export {} has no module", symbol))
                })?;
                find_export(resolver.memory(), module, symbol)?
            }
            None => resolver.scan_unique(&self.pattern_spec()?, &self.scope())?,
        };
        for step in &self.steps {
            address = step.apply(resolver.memory(), address)?;
        }
        Ok(address)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureSet {
    pub version: String,
    pub hooks: Vec<HookSignature>,
}

impl SignatureSet {
    pub fn get(&self, kind: HookKind) -> Option<&HookSignature> {
        self.hooks.iter().find(|s| s.hook == kind)
    }
}

pub fn load_signatures<P: AsRef<Path>>(path: P) -> Result<SignatureSet> {
    let content = fs::read_to_string(&path)?;
    Ok(serde_json::from_str(&content)?)
}

pub fn save_signatures<P: AsRef<Path>>(path: P, signatures: &SignatureSet) -> Result<()> {
    let content = serde_json::to_string_pretty(signatures)?;
    fs::write(path, content)?;
    Ok(())
}

fn capture(length: usize, capture: &str) -> Option<DetourSpec> {
    Some(DetourSpec {
        length,
        capture: capture.to_string(),
        relocate: true,
        patches: Vec::new(),
    })
}

/// Signatures for the current client build.
///
/// Every hook detours a 64-bit client instruction and copies the structure
/// pointer it handles into the export slot. The mouseless cursor replaces
/// `GetCursorPos` outright and flips the client's two cursor toggles.
pub fn builtin_signatures() -> SignatureSet {
    let site = |hook, pattern: &str, detour| HookSignature {
        hook,
        pattern: pattern.to_string(),
        offset: 0,
        module: Some(CLIENT_PROCESS_NAME.to_string()),
        symbol: None,
        steps: Vec::new(),
        detour,
    };
    let toggle = |pattern: &str, offset| SitePatch {
        pattern: pattern.to_string(),
        offset,
        module: Some(CLIENT_PROCESS_NAME.to_string()),
        before_site: false,
        bytes: "01".to_string(),
        required: true,
    };

    let mut duel = capture(5, "50 49 8B 07 48 A3 {export} 58");
    if let Some(spec) = duel.as_mut() {
        // jle over the logging call; forced to jmp so the hook runs at every log level.
        spec.patches.push(SitePatch {
            pattern: "7E ?? E8 ?? ?? ?? ?? E9".to_string(),
            offset: 0,
            module: None,
            before_site: true,
            bytes: "EB".to_string(),
            required: false,
        });
    }

    SignatureSet {
        version: "builtin".to_string(),
        hooks: vec![
            site(
                HookKind::Client,
                "48 ?? ?? ?? ?? ?? ?? 48 8B 7C 24 40 48 85 FF 74 29 8B C6 F0 0F C1 47 08 \
                 83 F8 01 75 1D 48 8B 07 48 8B CF FF 50 08 F0 0F C1 77 0C",
                capture(7, "50 48 8B C7 48 A3 {export} 58"),
            ),
            site(
                HookKind::Duel,
                "48 89 ?? ?? ?? 48 89 ?? ?? ?? 48 89 ?? ?? ?? 89 4C",
                duel,
            ),
            site(
                HookKind::Player,
                "F2 0F 10 40 58 F2",
                // Only objects whose type tag at +0x474 is 8 are the player.
                capture(
                    5,
                    "51 8B 88 74 04 00 00 83 F9 08 59 0F 85 0A 00 00 00 48 A3 {export}",
                ),
            ),
            site(
                HookKind::PlayerStat,
                "2B D8 B8 ?? ?? ?? ?? 0F 49 C3 48 83 C4 20 5B C3",
                capture(7, "50 48 89 C8 48 A3 {export} 58"),
            ),
            site(
                HookKind::Quest,
                "?? ?? ?? ?? ?? ?? ?? ?? ?? F3 0F 11 45 E0 ?? ?? ?? ?? ?? ?? ?? ?? ?? \
                 F3 0F 11 4D E4 ?? ?? ?? ?? ?? ?? ?? ?? ?? F3 0F 11 45 E8 48",
                capture(9, "50 49 8D 86 AC 0C 00 00 48 A3 {export} 58"),
            ),
            site(
                HookKind::RenderContext,
                "?? ?? ?? ?? ?? ?? ?? ?? ?? ?? ?? ?? ?? ?? ?? ?? ?? ?? F3 41 0F 10 28 \
                 F3 0F 10 56 04 48 63 C1",
                capture(9, "50 48 89 D8 48 A3 {export} 58"),
            ),
            site(
                HookKind::RootWindow,
                "?? ?? ?? ?? ?? ?? ?? 48 8B 01 ?? ?? ?? ?? ?? ?? ?? FF 50 70 84",
                capture(7, "50 49 8B 87 D8 00 00 00 48 A3 {export} 58"),
            ),
            HookSignature {
                hook: HookKind::MouselessCursor,
                pattern: String::new(),
                offset: 0,
                module: Some("user32.dll".to_string()),
                symbol: Some("GetCursorPos".to_string()),
                steps: Vec::new(),
                // mov rax, [export]; mov [rcx], rax; mov eax, 1; ret
                detour: Some(DetourSpec {
                    length: 5,
                    capture: "48 A1 {export} 48 89 01 B8 01 00 00 00 C3".to_string(),
                    relocate: false,
                    patches: vec![
                        toggle("00 FF 50 18 66 C7", 0),
                        toggle("C6 86 ?? ?? ?? 00 ?? 33 FF", 6),
                    ],
                }),
            },
        ],
    }
}
