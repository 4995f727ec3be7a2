//! Hooks command implementation.

use anyhow::Result;
use serde_json::json;
use strum::IntoEnumIterator;
use tracing::warn;
use wizhook_core::HookKind;

use crate::cli_utils::{Resources, attach};
use crate::console::format_hook_state;

pub fn run(resources: &Resources, pid: Option<u32>, mouseless: bool, json: bool) -> Result<()> {
    let session = attach(resources, pid)?;

    // One failing signature should not hide the others.
    for kind in HookKind::iter().filter(|k| k.activated_by_default() || mouseless) {
        if let Err(e) = session.activate(kind) {
            warn!("Hook {} failed: {}", kind, e);
        }
    }

    let hooks = session.hooks();
    if json {
        let rows: Vec<_> = HookKind::iter()
            .map(|kind| {
                json!({
                    "hook": kind,
                    "state": hooks.state(kind).to_string(),
                    "slot": hooks.address(kind).ok(),
                    "base": session.optional_base(kind).ok().flatten(),
                    "error": hooks.last_error(kind),
                })
            })
            .collect();
        let output = json!({ "pid": session.pid(), "hooks": rows });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    for kind in HookKind::iter() {
        let state = format_hook_state(hooks.state(kind));
        match hooks.address(kind) {
            Ok(slot) => {
                let base = match session.optional_base(kind) {
                    Ok(Some(base)) => format!("{:#x}", base),
                    Ok(None) => "null".to_string(),
                    Err(e) => format!("unreadable ({})", e),
                };
                println!("  {:<16} {} slot {:#x} -> {}", kind.name(), state, slot, base);
            }
            Err(_) => match hooks.last_error(kind) {
                Some(error) => println!("  {:<16} {} {}", kind.name(), state, error),
                None => println!("  {:<16} {}", kind.name(), state),
            },
        }
    }
    Ok(())
}
