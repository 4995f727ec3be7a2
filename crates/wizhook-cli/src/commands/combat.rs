//! Combat command implementation.

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info, warn};
use wizhook_core::combat::{CardSelector, InputSink, TargetSelector};
use wizhook_core::process::ProcessHandle;
use wizhook_core::{
    AutomationConfig, CancelToken, CombatEngine, Error, FallbackAction, ScriptedStrategy, Session,
};

use crate::cli_utils::{Resources, attach_all, cancel_on_ctrlc};
use crate::input::LoggingInput;

/// Run one automation task per attached client until Ctrl+C.
pub fn run(resources: &Resources, pid: Option<u32>, cast: &[String], flee: bool) -> Result<()> {
    let mut manager = attach_all(resources, pid)?;
    let cancel = cancel_on_ctrlc()?;

    for (pid, result) in manager.activate_all_hooks() {
        if let Err(e) = result {
            warn!("PID {}: hook activation incomplete: {}", pid, e);
        }
    }

    let mut config = resources.config.clone();
    if flee {
        config.fallback = FallbackAction::Flee;
    }
    println!(
        "Automating {} client(s)... (Press Ctrl+C to quit)",
        manager.len()
    );

    let results = manager.run_each(|session| play(session, &config, cast, &cancel));
    for (pid, result) in results {
        match result {
            Ok(combats) => println!("PID {}: {} combat(s) finished", pid, combats),
            Err(e) => error!("PID {}: automation stopped: {}", pid, e),
        }
    }

    for (pid, report) in manager.close() {
        info!("PID {}: released {} hooks", pid, report.hooks.len());
    }
    Ok(())
}

fn strategy(config: &AutomationConfig, cast: &[String]) -> ScriptedStrategy {
    cast.iter().fold(ScriptedStrategy::from_config(config), |strategy, name| {
        strategy.rule(CardSelector::named(name), TargetSelector::WeakestMonster)
    })
}

fn play(
    session: &Session<ProcessHandle>,
    config: &AutomationConfig,
    cast: &[String],
    cancel: &CancelToken,
) -> wizhook_core::Result<u32> {
    let input: Arc<dyn InputSink> = Arc::new(LoggingInput::new(session.pid()));
    let mut engine = CombatEngine::new(session, input)
        .with_config(config.clone())
        .with_cancel(cancel.clone());
    let mut strategy = strategy(config, cast);

    let mut combats = 0;
    loop {
        match engine.handle_combat(&mut strategy) {
            Ok(rounds) => {
                combats += 1;
                info!("PID {}: combat {} took {} rounds", session.pid(), combats, rounds);
            }
            Err(Error::Cancelled(_)) => return Ok(combats),
            Err(e) if e.is_recoverable() => {
                warn!("PID {}: {}, waiting for the next combat", session.pid(), e);
                if cancel.wait(config.poll_interval()) {
                    return Ok(combats);
                }
            }
            Err(e) => return Err(e),
        }
    }
}
