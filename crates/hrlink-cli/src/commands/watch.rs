//! Watch command implementation.
//!
//! Scans until the requested sensor (or, with auto-connect, the remembered
//! one) shows up, then prints readings as they arrive. The monitor resumes
//! scanning after a drop, so a sensor that comes back is picked up again.
//! A failed connect to `--device` restarts the scan after a short delay, so
//! the sensor is found, and tried, again.

use std::time::Duration;

use anyhow::{Context, Result};
use hrlink_core::{
    BluetoothAddress, DeviceEvent, HeartRateMonitor, HeartRateSource, MonitorConfig,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Interval;
use tracing::{debug, warn};

use crate::cli::OutputFormat;
use crate::config::{Config, update_last_device};
use crate::style;

/// Delay before rescanning for `--device` after it reported an error.
const RETRY_DELAY: Duration = Duration::from_secs(3);

/// Arguments for the watch command.
pub struct WatchArgs {
    pub device: Option<BluetoothAddress>,
    pub auto_connect: bool,
    pub format: OutputFormat,
    pub interval: u64,
    pub quiet: bool,
    pub no_color: bool,
}

pub async fn cmd_watch(args: WatchArgs, config: &Config) -> Result<()> {
    let monitor_config: MonitorConfig = config
        .monitor_config()
        .auto_connect(args.auto_connect && config.auto_connect);
    let remembered = monitor_config
        .auto_connect
        .then_some(monitor_config.last_connected)
        .flatten();

    let monitor = HeartRateMonitor::with_default_adapter(monitor_config)
        .await
        .context("Failed to open Bluetooth adapter")?;
    let mut events = monitor.subscribe_events();

    if !args.quiet {
        match (args.device, remembered) {
            (Some(device), _) => eprintln!("Waiting for {}...", device),
            (None, Some(last)) => eprintln!("Waiting for last connected sensor {}...", last),
            (None, None) => eprintln!("Scanning. Use --device <ADDRESS> to pick a sensor."),
        }
        eprintln!("Press Ctrl+C to stop");
        eprintln!("{}", "-".repeat(50));
    }

    monitor.start_scanning().await;

    let mut status = (args.interval > 0).then(|| {
        let period = Duration::from_secs(args.interval);
        tokio::time::interval_at(tokio::time::Instant::now() + period, period)
    });

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\nShutting down...");
                break;
            }
            _ = next_tick(&mut status) => {
                if monitor.is_listening() {
                    print_status(&monitor, &args)?;
                }
            }
            event = events.recv() => match event {
                Ok(event) => handle_event(&monitor, event, &args)?,
                Err(RecvError::Lagged(n)) => warn!("Dropped {} events", n),
                Err(RecvError::Closed) => break,
            },
        }
    }

    monitor.shutdown().await;
    Ok(())
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn handle_event(monitor: &HeartRateMonitor, event: DeviceEvent, args: &WatchArgs) -> Result<()> {
    if let DeviceEvent::DeviceFound { address, .. } = &event
        && args.device == Some(*address)
        && monitor.can_connect()
    {
        let monitor = monitor.clone();
        let address = *address;
        // Failures come back as DeviceError events
        tokio::spawn(async move {
            if let Err(e) = monitor.subscribe_to_device(address).await {
                debug!("Subscribe to {} ended: {}", address, e);
            }
        });
    }

    if let Some(address) = retry_target(&event, args.device) {
        debug!("Rescanning for {} in {:?}", address, RETRY_DELAY);
        tokio::spawn(rescan_after(monitor.clone(), RETRY_DELAY));
    }

    if let DeviceEvent::DeviceConnected { address } = &event {
        let device = monitor
            .discovered_devices()
            .into_iter()
            .find(|d| d.address == *address);
        if let Some(device) = &device {
            debug!("Remembering {}", device.display_name());
        }
        let name = device.and_then(|d| d.name);
        if let Err(e) = update_last_device(*address, name.as_deref()) {
            warn!("Failed to remember {}: {:#}", address, e);
        }
    }

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string(&event)?),
        OutputFormat::Text => {
            if let Some(line) = format_event_text(&event, args.no_color) {
                if event.is_error() {
                    eprintln!("{}", line);
                } else if !args.quiet || matches!(event, DeviceEvent::HeartRateUpdated { .. }) {
                    println!("{}", line);
                }
            }
        }
    }
    Ok(())
}

/// The wanted device, if `event` is an error reported for it.
fn retry_target(event: &DeviceEvent, wanted: Option<BluetoothAddress>) -> Option<BluetoothAddress> {
    match event {
        DeviceEvent::DeviceError {
            address: Some(address),
            ..
        } if Some(*address) == wanted => Some(*address),
        _ => None,
    }
}

/// Restart the scan so the registry forgets every sensor and the next
/// advertisement raises `DeviceFound` again.
async fn rescan_after(monitor: HeartRateMonitor, delay: Duration) {
    tokio::time::sleep(delay).await;
    if !monitor.can_connect() {
        return;
    }
    monitor.stop_scanning().await;
    monitor.start_scanning().await;
}

fn print_status(source: &impl HeartRateSource, args: &WatchArgs) -> Result<()> {
    let bpm = source.heart_rate();
    match args.format {
        OutputFormat::Json => println!("{}", serde_json::json!({ "type": "status", "heart_rate": bpm })),
        OutputFormat::Text => println!("Status: {}", style::format_heart_rate(bpm, args.no_color)),
    }
    Ok(())
}

fn format_event_text(event: &DeviceEvent, no_color: bool) -> Option<String> {
    let addr = |a: &BluetoothAddress| {
        style::format_address(&HeartRateMonitor::address_to_string(*a), no_color)
    };
    let line = match event {
        DeviceEvent::AdapterError { message } => format!("Bluetooth error: {}", message),
        DeviceEvent::DeviceFound { address, name } => format!(
            "Found {} {}",
            name.as_deref().unwrap_or("Unknown"),
            addr(address)
        ),
        DeviceEvent::DeviceConnecting { address } => format!("Connecting to {}...", addr(address)),
        DeviceEvent::DeviceConnected { address } => format!("Connected to {}", addr(address)),
        DeviceEvent::DeviceDisconnecting { .. } => return None,
        DeviceEvent::DeviceDisconnected { address, reason } => {
            format!("Disconnected from {} ({})", addr(address), reason)
        }
        DeviceEvent::DeviceError { address, message } => match address {
            Some(address) => format!("Error from {}: {}", addr(address), message),
            None => format!("Error: {}", message),
        },
        DeviceEvent::HeartRateUpdated { value } => {
            format!("Heart rate: {}", style::format_heart_rate(*value, no_color))
        }
        DeviceEvent::BatteryLevelUpdated { value } => format!("Battery: {}%", value),
        DeviceEvent::AutoConnectCountdown { address, remaining } => {
            format!("Reconnecting to {} in {}...", addr(address), remaining)
        }
        _ => return None,
    };
    Some(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use hrlink_core::{DisconnectReason, MockAdapter, MockPeripheral, MockPeripheralBuilder};

    fn address() -> BluetoothAddress {
        "C0:FF:EE:00:00:01".parse().unwrap()
    }

    #[test]
    fn test_format_heart_rate_event() {
        let line = format_event_text(&DeviceEvent::HeartRateUpdated { value: 72 }, true);
        assert_eq!(line.as_deref(), Some("Heart rate: 72 bpm"));
    }

    #[test]
    fn test_format_lifecycle_events() {
        let line = format_event_text(
            &DeviceEvent::DeviceDisconnected {
                address: address(),
                reason: DisconnectReason::ConnectionLost,
            },
            true,
        );
        assert_eq!(
            line.as_deref(),
            Some("Disconnected from C0:FF:EE:00:00:01 (connection lost)")
        );

        let line = format_event_text(
            &DeviceEvent::AutoConnectCountdown {
                address: address(),
                remaining: 2,
            },
            true,
        );
        assert_eq!(line.as_deref(), Some("Reconnecting to C0:FF:EE:00:00:01 in 2..."));
    }

    #[test]
    fn test_disconnecting_is_silent() {
        let event = DeviceEvent::DeviceDisconnecting { address: address() };
        assert!(format_event_text(&event, true).is_none());
    }

    #[test]
    fn test_retry_target_only_for_wanted_device() {
        let error = |address| DeviceEvent::DeviceError {
            address,
            message: "Service 0000180d-0000-1000-8000-00805f9b34fb not found".to_string(),
        };
        let other: BluetoothAddress = "C0:FF:EE:00:00:02".parse().unwrap();

        assert_eq!(retry_target(&error(Some(address())), Some(address())), Some(address()));
        assert_eq!(retry_target(&error(Some(other)), Some(address())), None);
        assert_eq!(retry_target(&error(None), Some(address())), None);
        assert_eq!(retry_target(&error(Some(address())), None), None);
        let connected = DeviceEvent::DeviceConnected { address: address() };
        assert_eq!(retry_target(&connected, Some(address())), None);
    }

    async fn next_found(events: &mut hrlink_core::EventReceiver) -> BluetoothAddress {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .expect("timed out waiting for an event")
                .expect("event channel closed");
            if let DeviceEvent::DeviceFound { address, .. } = event {
                return address;
            }
        }
    }

    fn mock_monitor() -> (Arc<MockAdapter>, Arc<MockPeripheral>, HeartRateMonitor) {
        let adapter = Arc::new(MockAdapter::new());
        let sensor = MockPeripheralBuilder::new().address(address()).build();
        adapter.add_peripheral(sensor.clone());
        let config = MonitorConfig::default().auto_connect(false);
        let monitor = HeartRateMonitor::new(adapter.clone(), config).unwrap();
        (adapter, sensor, monitor)
    }

    #[tokio::test]
    async fn test_rescan_finds_sensor_again() {
        let (adapter, sensor, monitor) = mock_monitor();
        let mut events = monitor.subscribe_events();
        monitor.start_scanning().await;
        assert!(adapter.advertise_peripheral(&sensor));
        assert_eq!(next_found(&mut events).await, address());

        rescan_after(monitor.clone(), Duration::ZERO).await;
        assert_eq!(adapter.scan_start_count(), 2);
        assert!(monitor.discovered_devices().is_empty());

        assert!(adapter.advertise_peripheral(&sensor));
        assert_eq!(next_found(&mut events).await, address());
        monitor.shutdown().await;
    }

    #[tokio::test]
    async fn test_rescan_skipped_while_connected() {
        let (adapter, sensor, monitor) = mock_monitor();
        monitor.subscribe_to_device(sensor.address()).await.unwrap();

        rescan_after(monitor.clone(), Duration::ZERO).await;
        assert_eq!(adapter.scan_start_count(), 0);
        assert!(monitor.is_listening());
        monitor.shutdown().await;
    }

    #[test]
    fn test_format_device_error() {
        let event = DeviceEvent::DeviceError {
            address: None,
            message: "connection lost".to_string(),
        };
        assert_eq!(
            format_event_text(&event, true).as_deref(),
            Some("Error: connection lost")
        );
    }
}
