//! Command-line interface for Bluetooth LE heart-rate sensors.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `scan` | Scan for nearby heart-rate sensors |
//! | `watch` | Connect to a sensor and print readings |
//! | `config` | Manage CLI configuration |
//! | `completions` | Generate shell completions |
//!
//! # Configuration
//!
//! The CLI stores configuration in `~/.config/hrlink/config.toml` (or platform
//! equivalent). The last connected sensor is remembered there and reconnected
//! to automatically when it is seen again.

use std::io;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod config;
mod style;

use cli::{Cli, Commands, OutputFormat};
use commands::{WatchArgs, cmd_config, cmd_scan, cmd_watch};
use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle completions command early (before tracing init)
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "hrlink", &mut io::stdout());
        return Ok(());
    }

    // When quiet mode is enabled, suppress info-level logging
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

    let config = Config::load();
    let default_format = OutputFormat::from_config(config.format.as_deref()).unwrap_or_default();

    match cli.command {
        Commands::Scan { timeout, format } => {
            cmd_scan(
                timeout,
                format.unwrap_or(default_format),
                cli.quiet,
                cli.no_color,
            )
            .await
        }
        Commands::Watch {
            device,
            no_auto_connect,
            format,
            interval,
        } => {
            let args = WatchArgs {
                device,
                auto_connect: !no_auto_connect,
                format: format.unwrap_or(default_format),
                interval,
                quiet: cli.quiet,
                no_color: cli.no_color,
            };
            cmd_watch(args, &config).await
        }
        Commands::Config { action } => cmd_config(action),
        Commands::Completions { .. } => Ok(()),
    }
}
