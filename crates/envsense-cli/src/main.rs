mod cli;
mod commands;
mod config;
mod format;
mod preferences;

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use commands::{StreamArgs, cmd_last, cmd_scan, cmd_status, cmd_stream, open_radio};
use config::{Config, resolve_device};
use preferences::FilePreferences;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Quiet mode suppresses info-level logging
    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let config_path = cli.config.clone().unwrap_or_else(Config::path);
    let mut config = Config::load_from(&config_path);

    let mut stdout = io::stdout().lock();

    match cli.command {
        Commands::Scan { timeout } => {
            let (radio, monitor) = open_radio().await?;
            cmd_scan(
                radio,
                monitor,
                config.scan_options(timeout),
                cli.quiet,
                &mut stdout,
            )
            .await?;
        }
        Commands::Stream {
            device,
            duration,
            json,
        } => {
            let Some(address) = resolve_device(device, &config) else {
                bail!("No device specified. Use --device, ENVSENSE_DEVICE or set `device` in the config file");
            };
            let (radio, monitor) = open_radio().await?;
            let preferences = Arc::new(FilePreferences::new(config.preferences_path()));
            let args = StreamArgs {
                address,
                config: config.connection_config(),
                duration: duration.map(Duration::from_secs),
                json,
            };
            let shutdown = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::warn!("Failed to listen for Ctrl-C: {}", e);
                    std::future::pending::<()>().await;
                }
            };
            cmd_stream(radio, monitor, preferences, args, shutdown, &mut stdout).await?;
        }
        Commands::Status => {
            let (_radio, monitor) = open_radio().await?;
            cmd_status(&monitor, &mut stdout).await?;
        }
        Commands::Last => {
            let preferences = FilePreferences::new(config.preferences_path());
            cmd_last(&preferences, &mut stdout)?;
        }
        Commands::Use { device } => {
            config.device = Some(device);
            config.save_to(&config_path)?;
            writeln!(stdout, "Default device saved to {}", config_path.display())?;
        }
    }

    Ok(())
}
