//! Common CLI utility functions shared across commands.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tracing::{info, warn};
use wizhook_core::hook::load_signatures;
use wizhook_core::memory::load_layouts;
use wizhook_core::process::{
    CLIENT_PROCESS_NAME, ProcessCandidate, ProcessEnumerator, ProcessHandle, SystemProcesses,
    SystemProvider,
};
use wizhook_core::{
    AutomationConfig, CancelToken, LayoutSet, Session, SessionManager, SignatureSet,
    builtin_layouts, builtin_signatures,
};

use crate::cli::Args;

/// Config, signatures and layouts shared by every command.
pub struct Resources {
    pub config: AutomationConfig,
    pub signatures: SignatureSet,
    pub layouts: Arc<LayoutSet>,
}

pub fn load_resources(args: &Args) -> Result<Resources> {
    let config = if args.config.exists() {
        match AutomationConfig::load(&args.config) {
            Ok(config) => {
                info!("Loaded config from {:?}", args.config);
                config
            }
            Err(e) => {
                warn!("Failed to load config: {}, using defaults", e);
                AutomationConfig::default()
            }
        }
    } else {
        AutomationConfig::default()
    };

    let signatures = match &args.signatures {
        Some(path) => {
            let signatures = load_signatures(path)
                .with_context(|| format!("Failed to load signatures from {:?}", path))?;
            info!("Loaded signatures version: {}", signatures.version);
            signatures
        }
        None => builtin_signatures(),
    };

    let mut layouts = builtin_layouts();
    if let Some(path) = &args.layouts {
        let overrides =
            load_layouts(path).with_context(|| format!("Failed to load layouts from {:?}", path))?;
        layouts.merge(overrides);
        info!("Merged layouts from {:?}", path);
    }

    Ok(Resources {
        config,
        signatures,
        layouts: Arc::new(layouts),
    })
}

/// Open a client by PID or the first one running.
pub fn open_process(pid: Option<u32>) -> Result<ProcessHandle> {
    if let Some(pid) = pid {
        return Ok(ProcessHandle::open(pid)?);
    }
    let Some(candidate) = SystemProcesses::clients().candidates()?.into_iter().next() else {
        bail!("No {} is running", CLIENT_PROCESS_NAME);
    };
    Ok(ProcessHandle::open(candidate.pid)?)
}

pub fn attach(resources: &Resources, pid: Option<u32>) -> Result<Session<ProcessHandle>> {
    let process = open_process(pid)?;
    let session = Session::attach(
        Arc::new(process),
        resources.signatures.clone(),
        Arc::clone(&resources.layouts),
    )?
    .with_max_hops(resources.config.max_hops);
    println!("Attached to client (PID: {})", session.pid());
    Ok(session)
}

/// Attach one client by PID, or every running client.
pub fn attach_all(
    resources: &Resources,
    pid: Option<u32>,
) -> Result<SessionManager<SystemProvider>> {
    let mut manager = SessionManager::new(
        SystemProvider,
        resources.signatures.clone(),
        Arc::clone(&resources.layouts),
    )
    .with_max_hops(resources.config.max_hops);

    match pid {
        Some(pid) => {
            manager.attach(&ProcessCandidate {
                pid,
                name: CLIENT_PROCESS_NAME.to_string(),
            })?;
        }
        None => {
            manager.attach_new(&SystemProcesses::clients())?;
        }
    }
    if manager.is_empty() {
        bail!("No {} could be attached", CLIENT_PROCESS_NAME);
    }
    Ok(manager)
}

/// A token cancelled by Ctrl+C.
pub fn cancel_on_ctrlc() -> Result<CancelToken> {
    let cancel = CancelToken::new();
    let cancel_ctrlc = cancel.clone();
    ctrlc::set_handler(move || {
        println!("\nShutting down...");
        cancel_ctrlc.cancel();
    })?;
    Ok(cancel)
}
