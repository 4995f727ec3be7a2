//! Export lookup in modules loaded by the target.
//!
//! Walks the PE32+ export directory of a mapped image: DOS header, NT headers,
//! then the name, ordinal and function tables.

use tracing::debug;

use crate::error::{Error, Result};
use crate::memory::{ByteBuffer, MemoryAccessor};
use crate::process::ProcessMemory;

const DOS_MAGIC: &[u8; 2] = b"MZ";
const NT_SIGNATURE: &[u8; 4] = b"PE\0\0";

struct PeOffsets;

impl PeOffsets {
    const LFANEW: u64 = 0x3C;
    /// Export data directory entry, relative to the NT headers (PE32+).
    const EXPORT_DIRECTORY: u64 = 0x88;
    const NUMBER_OF_NAMES: usize = 0x18;
    const ADDRESS_OF_FUNCTIONS: usize = 0x1C;
    const ADDRESS_OF_NAMES: usize = 0x20;
    const ADDRESS_OF_NAME_ORDINALS: usize = 0x24;
    const DIRECTORY_LEN: usize = 0x28;
}

fn not_found(module: &str, symbol: &str) -> Error {
    Error::SymbolNotFound {
        module: module.to_string(),
        symbol: symbol.to_string(),
    }
}

/// Address of the function `symbol` exported by `module`.
///
/// Forwarded exports are reported as not found.
pub fn find_export<P: ProcessMemory>(
    memory: &MemoryAccessor<P>,
    module: &str,
    symbol: &str,
) -> Result<u64> {
    let base = memory.module(module)?.base;

    if memory.read_bytes(base, 2)? != DOS_MAGIC {
        return Err(Error::read(base, format!("{} has no DOS header", module)));
    }
    let nt = base + memory.read_u32(base + PeOffsets::LFANEW)? as u64;
    if memory.read_bytes(nt, 4)? != NT_SIGNATURE {
        return Err(Error::read(nt, format!("{} has no NT headers", module)));
    }

    let dir_rva = memory.read_u32(nt + PeOffsets::EXPORT_DIRECTORY)? as u64;
    let dir_size = memory.read_u32(nt + PeOffsets::EXPORT_DIRECTORY + 4)? as u64;
    if dir_rva == 0 {
        return Err(not_found(module, symbol));
    }

    let header = memory.read_bytes(base + dir_rva, PeOffsets::DIRECTORY_LEN)?;
    let dir = ByteBuffer::at(&header, base + dir_rva);
    let count = dir.read_u32_at(PeOffsets::NUMBER_OF_NAMES)? as usize;
    let functions = base + dir.read_u32_at(PeOffsets::ADDRESS_OF_FUNCTIONS)? as u64;
    let names_at = base + dir.read_u32_at(PeOffsets::ADDRESS_OF_NAMES)? as u64;
    let ordinals_at = base + dir.read_u32_at(PeOffsets::ADDRESS_OF_NAME_ORDINALS)? as u64;
    if count == 0 {
        return Err(not_found(module, symbol));
    }

    let names = memory.read_bytes(names_at, count * 4)?;
    let ordinals = memory.read_bytes(ordinals_at, count * 2)?;
    let wanted: Vec<u8> = symbol.bytes().chain(std::iter::once(0)).collect();

    for (index, rva) in names.chunks_exact(4).enumerate() {
        let rva = u32::from_le_bytes([rva[0], rva[1], rva[2], rva[3]]) as u64;
        // Names near the end of the image may be shorter than the one wanted.
        let Ok(name) = memory.read_bytes(base + rva, wanted.len()) else {
            continue;
        };
        if name != wanted {
            continue;
        }

        let ordinal = u16::from_le_bytes([ordinals[index * 2], ordinals[index * 2 + 1]]) as u64;
        let function_rva = memory.read_u32(functions + ordinal * 4)? as u64;
        if (dir_rva..dir_rva + dir_size).contains(&function_rva) {
            debug!("{}!{} is forwarded", module, symbol);
            return Err(not_found(module, symbol));
        }
        let address = base + function_rva;
        debug!("{}!{} at {:#x}", module, symbol, address);
        return Ok(address);
    }

    Err(not_found(module, symbol))
}
