//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "envsense")]
#[command(author, version, about = "CLI for BLE environmental sensors", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Use this config file instead of the default location
    #[arg(long, global = true, env = "ENVSENSE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan for nearby environmental sensors
    Scan {
        /// Scan timeout in seconds (defaults to the config value, then 5)
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Connect to a sensor and print its readings
    Stream {
        /// Device address, or use ENVSENSE_DEVICE env var
        #[arg(short, long, env = "ENVSENSE_DEVICE")]
        device: Option<String>,

        /// Stop after this many seconds (default: until Ctrl-C)
        #[arg(long)]
        duration: Option<u64>,

        /// Print one JSON object per reading
        #[arg(long)]
        json: bool,
    },

    /// Show whether Bluetooth is ready
    Status,

    /// Show the last temperature saved by `stream`
    Last,

    /// Remember a device as the default for `stream`
    Use {
        /// Device address
        device: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_stream() {
        let cli = Cli::try_parse_from([
            "envsense",
            "stream",
            "--device",
            "AA:BB:CC:DD:EE:FF",
            "--duration",
            "30",
            "--json",
        ])
        .unwrap();
        match cli.command {
            Commands::Stream {
                device,
                duration,
                json,
            } => {
                assert_eq!(device.as_deref(), Some("AA:BB:CC:DD:EE:FF"));
                assert_eq!(duration, Some(30));
                assert!(json);
            }
            _ => panic!("expected stream"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["envsense", "scan", "-t", "3", "--verbose"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Scan { timeout: Some(3) }));
    }

    #[test]
    fn test_parse_use() {
        let cli = Cli::try_parse_from(["envsense", "use", "AA:BB:CC:DD:EE:FF"]).unwrap();
        assert!(matches!(cli.command, Commands::Use { device } if device == "AA:BB:CC:DD:EE:FF"));
    }
}
