//! Snapshot command implementation.

use anyhow::Result;
use wizhook_core::CombatSnapshot;

use crate::cli_utils::{Resources, attach};
use crate::console::format_snapshot;

pub fn run(resources: &Resources, pid: Option<u32>, json: bool) -> Result<()> {
    let session = attach(resources, pid)?;
    session.activate_all()?;

    match CombatSnapshot::take(&session, resources.config.snapshot_attempts)? {
        Some(snapshot) if json => println!("{}", serde_json::to_string_pretty(&snapshot)?),
        Some(snapshot) => println!("{}", format_snapshot(&snapshot)),
        None => println!("Not in combat"),
    }
    Ok(())
}
