//! Code detours that publish a register through an export slot.
//!
//! The jump site is overwritten with `E9 rel32` plus `NOP` padding. The stub
//! lives in a page allocated within rel32 reach of the site:
//!
//! ```text
//! page + 0x00  export slot (8 bytes, zeroed)
//! page + 0x10  capture prologue, original site bytes, E9 back to site + length
//! ```
//!
//! Removal restores every byte that was overwritten and frees the page.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::detour::PATCH_WINDOW;
use crate::config::scratch::PAGE_SIZE;
use crate::error::{Error, Result};
use crate::memory::MemoryAccessor;
use crate::process::ProcessMemory;
use crate::scan::{AddressResolver, PatternSpec, ScanScope};

const JMP_REL32: u8 = 0xE9;
const JMP_LEN: usize = 5;
const NOP: u8 = 0x90;
const STUB_OFFSET: u64 = 0x10;
const EXPORT_TOKEN: &str = "{export}";

fn default_true() -> bool {
    true
}

/// A byte patch applied next to a detour and undone with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SitePatch {
    pub pattern: String,
    #[serde(default)]
    pub offset: i64,
    #[serde(default)]
    pub module: Option<String>,
    /// Search the bytes just before the jump site and take the first match,
    /// instead of requiring a unique match in the module.
    #[serde(default)]
    pub before_site: bool,
    /// Hex bytes written at the match.
    pub bytes: String,
    /// Fail the activation when the pattern is missing.
    #[serde(default = "default_true")]
    pub required: bool,
}

impl SitePatch {
    fn locate<P: ProcessMemory>(&self, memory: &MemoryAccessor<P>, site: u64) -> Result<u64> {
        let pattern = PatternSpec::parse(&self.pattern)?.with_offset(self.offset);
        let resolver = AddressResolver::new(memory);
        if self.before_site {
            let scope = ScanScope::Range {
                start: site.saturating_sub(PATCH_WINDOW as u64),
                end: site,
            };
            return Ok(resolver.scan_all(&pattern, &scope)?[0]);
        }
        let scope = match &self.module {
            Some(name) => ScanScope::Module(name.clone()),
            None => ScanScope::Process,
        };
        resolver.scan_unique(&pattern, &scope)
    }
}

/// How a hook diverts the client's code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetourSpec {
    /// Bytes overwritten at the site: the jump plus NOP padding.
    pub length: usize,
    /// Stub prologue as hex bytes; `{export}` expands to the export slot
    /// address.
    pub capture: String,
    /// Replay the overwritten instructions and jump back after the prologue.
    /// Without it the prologue must return on its own.
    #[serde(default = "default_true")]
    pub relocate: bool,
    #[serde(default)]
    pub patches: Vec<SitePatch>,
}

impl DetourSpec {
    /// Stub bytes for a stub at `stub` that exports through `export`.
    pub fn stub(&self, stub: u64, site: u64, original: &[u8], export: u64) -> Result<Vec<u8>> {
        let mut code = assemble(&self.capture, export)?;
        if self.relocate {
            code.extend_from_slice(original);
            let from = stub + code.len() as u64;
            code.extend(jump(from, site + self.length as u64)?);
        }
        Ok(code)
    }

    /// Bytes written over the site.
    pub fn site_code(&self, site: u64, stub: u64) -> Result<Vec<u8>> {
        if self.length < JMP_LEN {
            return Err(Error::DetourFailed {
                address: site,
                reason: format!("{} bytes cannot hold a jump", self.length),
            });
        }
        let mut code = jump(site, stub)?;
        code.resize(self.length, NOP);
        Ok(code)
    }
}

/// Parse hex bytes, expanding `{export}` to the little-endian address.
pub fn assemble(template: &str, export: u64) -> Result<Vec<u8>> {
    let mut code = Vec::new();
    for token in template.split_whitespace() {
        if token == EXPORT_TOKEN {
            code.extend_from_slice(&export.to_le_bytes());
            continue;
        }
        let byte = u8::from_str_radix(token, 16)
            .map_err(|_| Error::InvalidPattern(format!("invalid byte in code template: {}", token)))?;
        code.push(byte);
    }
    Ok(code)
}

/// `jmp rel32` placed at `from`, landing on `to`.
fn jump(from: u64, to: u64) -> Result<Vec<u8>> {
    let distance = (to as i128) - (from as i128 + JMP_LEN as i128);
    let rel = i32::try_from(distance).map_err(|_| Error::DetourFailed {
        address: from,
        reason: format!("{:#x} is out of rel32 reach", to),
    })?;
    let mut code = vec![JMP_REL32];
    code.extend_from_slice(&rel.to_le_bytes());
    Ok(code)
}

/// A detour written into the target.
#[derive(Debug)]
pub struct InstalledDetour {
    site: u64,
    original: Vec<u8>,
    page: u64,
    patches: Vec<(u64, Vec<u8>)>,
}

impl InstalledDetour {
    /// Write the stub, the companion patches and finally the jump.
    ///
    /// On failure everything already written is restored and the page freed.
    pub fn install<P: ProcessMemory>(
        memory: &MemoryAccessor<P>,
        spec: &DetourSpec,
        site: u64,
    ) -> Result<Self> {
        let original = memory.read_bytes(site, spec.length.max(JMP_LEN))?;
        if original[0] == JMP_REL32 {
            return Err(Error::DetourFailed {
                address: site,
                reason: "site already holds a jump".to_string(),
            });
        }

        let page = memory.allocate_code_near(PAGE_SIZE, site)?;
        let mut detour = Self {
            site,
            original,
            page,
            patches: Vec::new(),
        };
        match detour.write(memory, spec) {
            Ok(()) => {
                info!(
                    "Detoured {:#x} to {:#x}, export at {:#x}",
                    site,
                    detour.stub(),
                    detour.export()
                );
                Ok(detour)
            }
            Err(e) => {
                debug!("Rolling back detour at {:#x}: {}", site, e);
                if let Err(undo) = detour.remove(memory) {
                    warn!("Rollback of detour at {:#x} failed: {}", site, undo);
                }
                Err(e)
            }
        }
    }

    fn write<P: ProcessMemory>(&mut self, memory: &MemoryAccessor<P>, spec: &DetourSpec) -> Result<()> {
        let site_code = spec.site_code(self.site, self.stub())?;
        let stub_code = spec.stub(self.stub(), self.site, &self.original, self.export())?;
        if STUB_OFFSET as usize + stub_code.len() > PAGE_SIZE {
            return Err(Error::DetourFailed {
                address: self.site,
                reason: format!("stub of {} bytes does not fit its page", stub_code.len()),
            });
        }
        memory.write_bytes(self.export(), &[0; 8])?;
        memory.write_bytes(self.stub(), &stub_code)?;

        for patch in &spec.patches {
            let address = match patch.locate(memory, self.site) {
                Ok(address) => address,
                Err(e) if patch.required => return Err(e),
                Err(e) => {
                    warn!("Skipping optional patch `{}`: {}", patch.pattern, e);
                    continue;
                }
            };
            let bytes = assemble(&patch.bytes, self.export())?;
            let before = memory.read_bytes(address, bytes.len())?;
            memory.write_bytes(address, &bytes)?;
            debug!("Patched {} bytes at {:#x}", bytes.len(), address);
            self.patches.push((address, before));
        }

        memory.write_bytes(self.site, &site_code)
    }

    pub fn site(&self) -> u64 {
        self.site
    }

    pub fn stub(&self) -> u64 {
        self.page + STUB_OFFSET
    }

    /// The slot the stub writes into.
    pub fn export(&self) -> u64 {
        self.page
    }

    /// Addresses of the companion patches that were applied.
    pub fn patched(&self) -> Vec<u64> {
        self.patches.iter().map(|(address, _)| *address).collect()
    }

    /// Restore the site and patches, then free the page.
    ///
    /// Every step is attempted; the first failure is returned.
    pub fn remove<P: ProcessMemory>(&self, memory: &MemoryAccessor<P>) -> Result<()> {
        let mut first_error = None;
        let mut record = |result: Result<()>| {
            if let Err(e) = result
                && first_error.is_none()
            {
                first_error = Some(e);
            }
        };

        record(memory.write_bytes(self.site, &self.original));
        for (address, bytes) in self.patches.iter().rev() {
            record(memory.write_bytes(*address, bytes));
        }
        record(memory.free_code(self.page));

        match first_error {
            None => {
                debug!("Removed detour at {:#x}", self.site);
                Ok(())
            }
            Some(e) => Err(e),
        }
    }
}
