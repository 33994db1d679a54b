//! Connection subsystem for Bluetooth LE heart-rate sensors.
//!
//! This crate discovers sensors that advertise the standard Heart Rate
//! service, holds a session with one of them, and publishes what happens as
//! a stream of [`DeviceEvent`]s.
//!
//! # Features
//!
//! - **Device discovery**: Keep an ordered, de-duplicated list of sensors seen while scanning
//! - **Single session**: Connect, discover, subscribe, with a timeout on every step
//! - **Readings**: Heart rate (clamped for display) and optional battery level
//! - **Auto-reconnect**: Cancellable countdown when the last sensor shows up again
//! - **Testability**: A [`MockAdapter`] that runs the whole subsystem without a radio
//!
//! # Platform Differences
//!
//! - **Linux/Windows**: Sensors are identified by their Bluetooth address
//!   (e.g., `AA:BB:CC:DD:EE:FF`).
//! - **macOS**: CoreBluetooth does not expose addresses, so every sensor
//!   reports `00:00:00:00:00:00`. Only one sensor can be told apart.
//!
//! # Quick Start
//!
//! ```no_run
//! use hrlink_core::{DeviceEvent, HeartRateMonitor, MonitorConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let monitor = HeartRateMonitor::with_default_adapter(MonitorConfig::default()).await?;
//!     let mut events = monitor.subscribe_events();
//!     monitor.start_scanning().await;
//!
//!     while let Ok(event) = events.recv().await {
//!         match event {
//!             DeviceEvent::DeviceFound { address, .. } => {
//!                 monitor.subscribe_to_device(address).await?;
//!             }
//!             DeviceEvent::HeartRateUpdated { value } => println!("{value} bpm"),
//!             _ => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod ble;
pub mod config;
pub mod error;
pub mod events;
mod machine;
pub mod mock;
pub mod monitor;
pub mod registry;
pub mod state;
pub mod supervisor;
pub mod traits;
pub mod transport;

// Core exports
pub use config::MonitorConfig;
pub use error::{Error, Result};
pub use events::{DeviceEvent, DisconnectReason, EventDispatcher, EventReceiver, EventSender};
pub use monitor::HeartRateMonitor;
pub use registry::{DeviceRegistry, RegisteredDevice};
pub use state::LifecycleState;
pub use supervisor::{AutoReconnectSupervisor, CountdownOptions, ReconnectTarget};
pub use traits::{DeviceHandler, HeartRateSource};

// Transports
pub use ble::{BtleplugAdapter, BtleplugLink};
pub use mock::{MockAdapter, MockPeripheral, MockPeripheralBuilder};
pub use transport::{
    Advertisement, AdvertisementStream, BleAdapter, BleLink, Notification, NotificationStream,
    until_link_lost,
};

// Re-export from hrlink-types
pub use hrlink_types::uuids;
pub use hrlink_types::{
    BluetoothAddress, DecodeError, HeartRateFrame, MAX_DISPLAY_HEART_RATE, SensorContact,
};
