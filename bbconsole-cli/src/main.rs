//! bbconsole CLI - interactive console for BLE line-console devices.
//!
//! ## Features
//!
//! - Live device discovery with signal-strength listing
//! - Interactive line console with send progress and reboot handling
//! - Recovery-mode (bootloader-only) detection
//! - Layered configuration and environment variable support
//! - Shell completion generation

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use env_logger::Env;
use log::debug;

mod ble;
mod commands;
mod config;

use config::Config;

/// Set by the Ctrl-C handler; long-running loops poll it.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Whether Ctrl-C was pressed since startup.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// bbconsole - a host console for BLE line-oriented console devices.
///
/// Environment variables:
///   BBCONSOLE_DEVICE            - Default peripheral (identifier or name)
///   BBCONSOLE_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "bbconsole")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Peripheral to connect to, by identifier or advertised name.
    #[arg(short, long, global = true, env = "BBCONSOLE_DEVICE")]
    device: Option<String>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "BBCONSOLE_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Scan for console devices and list them live.
    Scan {
        /// List every advertiser, not just the known console families.
        #[arg(long)]
        all: bool,

        /// Stop after this many seconds (default: run until Ctrl-C).
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Output the final listing as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Open an interactive console session with a device.
    Console,

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions.
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "bbconsole v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed))
        .context("failed to install Ctrl-C handler")?;

    // Load configuration
    let mut config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Scan { all, timeout, json } => {
            commands::scan::cmd_scan(&cli, &config, *all, *timeout, *json)
        },
        Commands::Console => commands::console::cmd_console(&cli, &mut config),
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}

#[cfg(test)]
mod cli_tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_command_is_valid() {
        // Verifies that all derive macros produce a valid clap Command
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parse_scan() {
        let cli = Cli::try_parse_from(["bbconsole", "scan", "--all", "--timeout", "30"]).unwrap();
        if let Commands::Scan { all, timeout, json } = cli.command {
            assert!(all);
            assert_eq!(timeout, Some(30));
            assert!(!json);
        } else {
            panic!("Expected Scan command");
        }
    }

    #[test]
    fn test_cli_parse_scan_json() {
        let cli = Cli::try_parse_from(["bbconsole", "scan", "--json"]).unwrap();
        assert!(matches!(cli.command, Commands::Scan { json: true, .. }));
    }

    #[test]
    fn test_cli_parse_console_with_device() {
        let cli =
            Cli::try_parse_from(["bbconsole", "--device", "BASIC#AA:BB", "console"]).unwrap();
        assert_eq!(cli.device.as_deref(), Some("BASIC#AA:BB"));
        assert!(matches!(cli.command, Commands::Console));
    }

    #[test]
    fn test_cli_parse_completions() {
        let cli = Cli::try_parse_from(["bbconsole", "completions", "bash"]).unwrap();
        assert!(matches!(cli.command, Commands::Completions { .. }));
    }

    #[test]
    fn test_cli_default_values() {
        let cli = Cli::try_parse_from(["bbconsole", "scan"]).unwrap();
        assert!(cli.device.is_none());
        assert_eq!(cli.verbose, 0);
        assert!(!cli.quiet);
        assert!(!cli.non_interactive);
        assert!(cli.config_path.is_none());
    }

    #[test]
    fn test_cli_global_options() {
        let cli = Cli::try_parse_from([
            "bbconsole",
            "--device",
            "hci0/dev_AA_BB",
            "-vv",
            "--quiet",
            "--non-interactive",
            "--config",
            "/tmp/config.toml",
            "scan",
        ])
        .unwrap();
        assert_eq!(cli.device.as_deref(), Some("hci0/dev_AA_BB"));
        assert_eq!(cli.verbose, 2);
        assert!(cli.quiet);
        assert!(cli.non_interactive);
        assert_eq!(
            cli.config_path.as_deref(),
            Some(std::path::Path::new("/tmp/config.toml"))
        );
    }

    #[test]
    fn test_cli_missing_subcommand() {
        let result = Cli::try_parse_from(["bbconsole"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_invalid_shell() {
        let result = Cli::try_parse_from(["bbconsole", "completions", "notashell"]);
        assert!(result.is_err());
    }
}
