//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use hrlink_core::BluetoothAddress;

/// Output format for commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl OutputFormat {
    /// Parse a format name stored in the config file.
    pub fn from_config(value: Option<&str>) -> Option<Self> {
        value.and_then(|v| <Self as ValueEnum>::from_str(v, true).ok())
    }
}

#[derive(Parser)]
#[command(name = "hrlink")]
#[command(author, version, about = "CLI for Bluetooth LE heart-rate sensors", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan for nearby heart-rate sensors
    Scan {
        /// Scan timeout in seconds
        #[arg(short, long, default_value = "10")]
        timeout: u64,

        /// Output format
        #[arg(short, long, value_enum)]
        format: Option<OutputFormat>,
    },

    /// Connect to a sensor and print readings until Ctrl+C
    Watch {
        /// Sensor address, or use HRLINK_DEVICE env var
        #[arg(short, long, env = "HRLINK_DEVICE", value_parser = parse_address)]
        device: Option<BluetoothAddress>,

        /// Do not reconnect to the last sensor automatically
        #[arg(long)]
        no_auto_connect: bool,

        /// Output format
        #[arg(short, long, value_enum)]
        format: Option<OutputFormat>,

        /// Print a status line every N seconds (0 to disable)
        #[arg(short, long, default_value = "0")]
        interval: u64,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Configuration subcommands
#[derive(Debug, Clone, Copy, Subcommand)]
pub enum ConfigAction {
    /// Show configuration file path
    Path,

    /// Show current configuration
    Show,

    /// Forget the last connected sensor
    Forget,
}

/// Parse a sensor address argument.
fn parse_address(s: &str) -> Result<BluetoothAddress, String> {
    s.parse()
        .map_err(|e| format!("'{}' is not a Bluetooth address: {}", s, e))
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
    fn test_parse_watch_device() {
        let cli = Cli::try_parse_from(["hrlink", "watch", "--device", "aa-bb-cc-dd-ee-ff"]).unwrap();
        match cli.command {
            Commands::Watch { device, .. } => {
                assert_eq!(device.unwrap().to_string(), "AA:BB:CC:DD:EE:FF");
            }
            _ => panic!("expected watch"),
        }
    }

    #[test]
    fn test_parse_rejects_bad_address() {
        assert!(Cli::try_parse_from(["hrlink", "watch", "--device", "nope"]).is_err());
    }

    #[test]
    fn test_output_format_from_config() {
        assert_eq!(OutputFormat::from_config(Some("json")), Some(OutputFormat::Json));
        assert_eq!(OutputFormat::from_config(Some("TEXT")), Some(OutputFormat::Text));
        assert_eq!(OutputFormat::from_config(Some("csv")), None);
        assert_eq!(OutputFormat::from_config(None), None);
    }
}
