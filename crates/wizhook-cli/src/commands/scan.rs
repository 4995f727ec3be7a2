//! Scan command implementation.

use anyhow::Result;
use wizhook_core::scan::{AddressResolver, PatternSpec, ScanMode, ScanScope, format_pattern};

use crate::cli_utils::{Resources, attach};

pub fn run(
    resources: &Resources,
    pid: Option<u32>,
    pattern: &str,
    module: Option<&str>,
    offset: i64,
    all: bool,
) -> Result<()> {
    let session = attach(resources, pid)?;
    let spec = PatternSpec::parse(pattern)?.with_offset(offset);
    let scope = match module {
        Some(name) => ScanScope::Module(name.to_string()),
        None => ScanScope::Process,
    };
    let mode = if all { ScanMode::All } else { ScanMode::Unique };

    println!("Scanning for {}...", format_pattern(spec.tokens()));
    let matches = AddressResolver::new(session.memory()).scan(&spec, &scope, mode)?;
    println!("{} match(es)", matches.len());
    for address in matches {
        println!("  {:#x}", address);
    }
    Ok(())
}
