//! CLI argument definitions for wizhook.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "wizhook")]
#[command(about = "Wizard101 client hooks and combat automation", version)]
pub struct Args {
    /// Automation config (JSON)
    #[arg(short, long, value_name = "FILE", default_value = "automation.json")]
    pub config: PathBuf,

    /// Hook signatures (JSON), replacing the built-in set
    #[arg(long, value_name = "FILE", env = "WIZHOOK_SIGNATURES")]
    pub signatures: Option<PathBuf>,

    /// Structure layouts (JSON), merged over the built-in set
    #[arg(long, value_name = "FILE", env = "WIZHOOK_LAYOUTS")]
    pub layouts: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Scan a client for a byte pattern
    Scan {
        /// Pattern, e.g. "48 8B 05 ?? ?? ?? ??"
        pattern: String,
        /// Limit the scan to one module
        #[arg(long)]
        module: Option<String>,
        /// Added to every match address
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        offset: i64,
        /// List every match instead of requiring a unique one
        #[arg(long)]
        all: bool,
        /// Process ID (skip automatic detection)
        #[arg(long)]
        pid: Option<u32>,
    },
    /// Activate hooks and show where they resolved
    Hooks {
        /// Process ID (skip automatic detection)
        #[arg(long)]
        pid: Option<u32>,
        /// Also activate the mouseless cursor hook
        #[arg(long)]
        mouseless: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the current combat snapshot
    Snapshot {
        /// Process ID (skip automatic detection)
        #[arg(long)]
        pid: Option<u32>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Follow combat state changes until Ctrl+C
    Watch {
        /// Process ID (skip automatic detection)
        #[arg(long)]
        pid: Option<u32>,
    },
    /// Play combat on every running client until Ctrl+C
    Combat {
        /// Only this client
        #[arg(long)]
        pid: Option<u32>,
        /// Card to cast at the weakest monster, in priority order
        #[arg(long, value_name = "CARD")]
        cast: Vec<String>,
        /// Flee instead of passing when nothing can be cast
        #[arg(long)]
        flee: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_with_negative_offset() {
        let args =
            Args::try_parse_from(["wizhook", "scan", "48 8B ?? ??", "--offset", "-8", "--all"])
                .unwrap();
        match args.command {
            Command::Scan {
                pattern,
                offset,
                all,
                module,
                pid,
            } => {
                assert_eq!(pattern, "48 8B ?? ??");
                assert_eq!(offset, -8);
                assert!(all);
                assert_eq!(module, None);
                assert_eq!(pid, None);
            }
            _ => panic!("expected scan"),
        }
        assert_eq!(args.config, PathBuf::from("automation.json"));
    }

    #[test]
    fn test_combat_with_cast_rules() {
        let args = Args::try_parse_from([
            "wizhook",
            "--config",
            "bot.json",
            "combat",
            "--pid",
            "4242",
            "--cast",
            "Fire Cat",
            "--cast",
            "Meteor",
            "--flee",
        ])
        .unwrap();
        assert_eq!(args.config, PathBuf::from("bot.json"));
        match args.command {
            Command::Combat { pid, cast, flee } => {
                assert_eq!(pid, Some(4242));
                assert_eq!(cast, vec!["Fire Cat".to_string(), "Meteor".to_string()]);
                assert!(flee);
            }
            _ => panic!("expected combat"),
        }
    }

    #[test]
    fn test_subcommand_is_required() {
        assert!(Args::try_parse_from(["wizhook"]).is_err());
    }
}
