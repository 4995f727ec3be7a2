mod cli;
mod cli_utils;
mod commands;
mod console;
mod input;

use anyhow::Result;
use clap::Parser;
use cli::{Args, Command};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("wizhook=info,wizhook_core=info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let resources = cli_utils::load_resources(&args)?;

    match args.command {
        Command::Scan {
            pattern,
            module,
            offset,
            all,
            pid,
        } => commands::scan::run(&resources, pid, &pattern, module.as_deref(), offset, all),
        Command::Hooks {
            pid,
            mouseless,
            json,
        } => commands::hooks::run(&resources, pid, mouseless, json),
        Command::Snapshot { pid, json } => commands::snapshot::run(&resources, pid, json),
        Command::Watch { pid } => commands::watch::run(&resources, pid),
        Command::Combat { pid, cast, flee } => commands::combat::run(&resources, pid, &cast, flee),
    }
}
