//! Watch command implementation.

use anyhow::Result;
use wizhook_core::combat::read_duel;
use wizhook_core::{CombatTracker, Error, HookKind};

use crate::cli_utils::{Resources, attach, cancel_on_ctrlc};
use crate::console::format_state;

/// Print every combat state change until Ctrl+C or the client exits.
pub fn run(resources: &Resources, pid: Option<u32>) -> Result<()> {
    let session = attach(resources, pid)?;
    session.activate(HookKind::Duel)?;
    let cancel = cancel_on_ctrlc()?;

    println!("Watching combat... (Press Ctrl+C to quit)");
    let mut tracker = CombatTracker::new();
    let mut last = None;
    loop {
        let reading = match read_duel(&session) {
            Ok(reading) => reading,
            Err(Error::ProcessClosed) => {
                println!("Client exited");
                break;
            }
            Err(e) => return Err(e.into()),
        };
        let state = tracker.detect(reading.as_ref());
        if last != Some(state) {
            println!("{}", format_state(&state));
            last = Some(state);
        }
        if cancel.wait(resources.config.poll_interval()) {
            break;
        }
    }

    let report = session.detach();
    println!("Detached ({} hooks released)", report.hooks.len());
    Ok(())
}
