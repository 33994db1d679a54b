//! Example: Watching a Heart-Rate Sensor
//!
//! This example scans for heart-rate sensors, connects to the first one
//! found, and prints readings until Ctrl+C is pressed.
//!
//! Run with: `cargo run --example watch_heart_rate`

use hrlink_core::{DeviceEvent, HeartRateMonitor, MonitorConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let monitor = HeartRateMonitor::with_default_adapter(MonitorConfig::default()).await?;
    let mut events = monitor.subscribe_events();

    println!("Scanning for heart-rate sensors...");
    monitor.start_scanning().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => {
                let Ok(event) = event else { break };
                match event {
                    DeviceEvent::DeviceFound { address, name } => {
                        println!("Found {} ({})", address, name.as_deref().unwrap_or("unnamed"));
                        if monitor.can_connect() {
                            if let Err(e) = monitor.subscribe_to_device(address).await {
                                println!("Could not connect: {}", e);
                            }
                        }
                    }
                    DeviceEvent::DeviceConnected { address } => println!("Connected to {}", address),
                    DeviceEvent::HeartRateUpdated { value } => println!("Heart rate: {} bpm", value),
                    DeviceEvent::BatteryLevelUpdated { value } => println!("Battery: {}%", value),
                    DeviceEvent::DeviceDisconnected { address, reason } => {
                        println!("Disconnected from {} ({})", address, reason)
                    }
                    event if event.is_error() => println!("Error: {:?}", event),
                    _ => {}
                }
            }
        }
    }

    monitor.shutdown().await;
    Ok(())
}
