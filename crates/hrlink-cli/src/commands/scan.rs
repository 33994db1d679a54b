//! Scan command implementation.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use hrlink_core::{DeviceEvent, HeartRateMonitor, MonitorConfig, RegisteredDevice};
use tokio::sync::broadcast::error::TryRecvError;

use crate::cli::OutputFormat;
use crate::style;

pub async fn cmd_scan(timeout: u64, format: OutputFormat, quiet: bool, no_color: bool) -> Result<()> {
    // Discovery only, never connect
    let config = MonitorConfig::default().auto_connect(false);
    let monitor = HeartRateMonitor::with_default_adapter(config)
        .await
        .context("Failed to open Bluetooth adapter")?;
    let mut events = monitor.subscribe_events();

    let spinner = if !quiet && matches!(format, OutputFormat::Text) {
        Some(style::scanning_spinner(timeout))
    } else {
        None
    };

    monitor.start_scanning().await;
    let adapter_error = first_adapter_error(&mut events);
    if adapter_error.is_none() {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = tokio::time::sleep(Duration::from_secs(timeout)) => {}
        }
    }

    let devices = monitor.discovered_devices();
    monitor.shutdown().await;

    if let Some(sp) = spinner {
        sp.finish_and_clear();
    }
    if let Some(message) = adapter_error {
        bail!("Failed to scan for devices: {}", message);
    }

    let content = match format {
        OutputFormat::Json => format_scan_json(&devices)?,
        OutputFormat::Text => format_scan_text(&devices, no_color, !quiet),
    };
    print!("{}", content);
    Ok(())
}

fn first_adapter_error(events: &mut hrlink_core::EventReceiver) -> Option<String> {
    loop {
        match events.try_recv() {
            Ok(DeviceEvent::AdapterError { message }) => return Some(message),
            Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => return None,
        }
    }
}

fn format_scan_json(devices: &[RegisteredDevice]) -> Result<String> {
    let mut json = serde_json::to_string_pretty(devices)?;
    json.push('\n');
    Ok(json)
}

fn format_scan_text(devices: &[RegisteredDevice], no_color: bool, show_tips: bool) -> String {
    if devices.is_empty() {
        let mut out = String::from("No heart-rate sensors found.\n");
        if show_tips {
            out.push_str("\nMake sure:\n");
            out.push_str("  - The sensor is worn or its contacts are moistened\n");
            out.push_str("  - Bluetooth is enabled on this computer\n");
            out.push_str("  - The sensor is not connected to another app\n");
        }
        return out;
    }

    let mut out = format!("Found {} sensor(s):\n\n", devices.len());
    for device in devices {
        let name = device.name.as_deref().filter(|n| !n.is_empty()).unwrap_or("Unknown");
        out.push_str(&format!(
            "  {:<24} {}\n",
            name,
            style::format_address(&HeartRateMonitor::address_to_string(device.address), no_color)
        ));
    }
    if show_tips {
        out.push_str("\nConnect with: hrlink watch --device <ADDRESS>\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn devices() -> Vec<RegisteredDevice> {
        vec![
            RegisteredDevice {
                address: "C0:FF:EE:00:00:01".parse().unwrap(),
                name: Some("Polar H10".to_string()),
            },
            RegisteredDevice {
                address: "C0:FF:EE:00:00:02".parse().unwrap(),
                name: None,
            },
        ]
    }

    #[test]
    fn test_format_scan_text() {
        let text = format_scan_text(&devices(), true, false);
        assert!(text.starts_with("Found 2 sensor(s):"));
        assert!(text.contains("Polar H10"));
        assert!(text.contains("C0:FF:EE:00:00:02"));
        assert!(text.contains("Unknown"));
        assert!(!text.contains("hrlink watch"));
    }

    #[test]
    fn test_format_scan_text_empty() {
        let text = format_scan_text(&[], true, true);
        assert!(text.starts_with("No heart-rate sensors found."));
        assert!(text.contains("Make sure:"));
    }

    #[test]
    fn test_format_scan_json() {
        let json = format_scan_json(&devices()).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed[0]["address"], "C0:FF:EE:00:00:01");
        assert_eq!(parsed[0]["name"], "Polar H10");
        assert!(parsed[1]["name"].is_null());
    }
}
