//! Visual styling utilities for the CLI.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;

/// Standard spinner tick characters (Braille dots animation)
const SPINNER_TICK_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// Standard spinner tick interval
const SPINNER_TICK_MS: u64 = 80;

/// Get the standard spinner style.
fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars(SPINNER_TICK_CHARS)
}

/// Create a spinner for scanning operations.
pub fn scanning_spinner(timeout_secs: u64) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(spinner_style());
    pb.set_message(format!(
        "Scanning for heart-rate sensors... ({}s)",
        timeout_secs
    ));
    pb.enable_steady_tick(Duration::from_millis(SPINNER_TICK_MS));
    pb
}

/// Heart-rate zones by bpm, for coloring only.
fn heart_rate_zone(bpm: u16) -> u8 {
    match bpm {
        0..=99 => 1,
        100..=139 => 2,
        140..=169 => 3,
        _ => 4,
    }
}

/// Format a heart rate, colored by zone unless `no_color`.
pub fn format_heart_rate(bpm: u16, no_color: bool) -> String {
    let text = format!("{} bpm", bpm);
    if no_color {
        return text;
    }
    match heart_rate_zone(bpm) {
        1 => text.green().to_string(),
        2 => text.yellow().to_string(),
        3 => text.bright_red().to_string(),
        _ => text.red().bold().to_string(),
    }
}

/// Format an address for display.
pub fn format_address(address: &str, no_color: bool) -> String {
    if no_color {
        address.to_string()
    } else {
        address.cyan().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heart_rate_zones() {
        assert_eq!(heart_rate_zone(0), 1);
        assert_eq!(heart_rate_zone(99), 1);
        assert_eq!(heart_rate_zone(100), 2);
        assert_eq!(heart_rate_zone(150), 3);
        assert_eq!(heart_rate_zone(254), 4);
    }

    #[test]
    fn test_no_color_is_plain() {
        assert_eq!(format_heart_rate(72, true), "72 bpm");
        assert_eq!(format_address("AA:BB:CC:DD:EE:FF", true), "AA:BB:CC:DD:EE:FF");
        assert!(format_heart_rate(72, false).contains("72 bpm"));
    }
}
