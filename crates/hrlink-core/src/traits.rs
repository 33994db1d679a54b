//! Trait abstractions over the heart-rate monitor.
//!
//! Consumers that only publish the current reading depend on
//! [`HeartRateSource`]. Consumers that drive the connection depend on
//! [`DeviceHandler`]. Both are implemented by
//! [`HeartRateMonitor`](crate::HeartRateMonitor).

use async_trait::async_trait;
use hrlink_types::BluetoothAddress;

use crate::error::Result;
use crate::events::EventReceiver;

/// Pull-only access to the latest heart rate.
///
/// # Example
///
/// ```ignore
/// use hrlink_core::HeartRateSource;
///
/// fn publish<S: HeartRateSource>(source: &S) {
///     println!("{} bpm", source.heart_rate());
/// }
/// ```
pub trait HeartRateSource: Send + Sync {
    /// Last heart rate in bpm. Zero before the first reading.
    fn heart_rate(&self) -> u16;
}

/// Full control over scanning and the sensor session.
#[async_trait]
pub trait DeviceHandler: HeartRateSource {
    // --- Events ---

    /// Subscribe to lifecycle, reading and error events.
    fn subscribe_events(&self) -> EventReceiver;

    // --- Scanning ---

    /// Start the advertisement watcher.
    async fn start_scanning(&self);

    /// Stop the advertisement watcher.
    async fn stop_scanning(&self);

    // --- Session ---

    /// Connect to a sensor and start listening.
    async fn subscribe_to_device(&self, address: BluetoothAddress) -> Result<()>;

    /// Close the session or abort the attempt in progress.
    async fn unsubscribe_from_device(&self) -> Result<()>;

    /// Whether a session is open.
    fn is_listening(&self) -> bool;

    /// Whether a new connection would be accepted.
    fn can_connect(&self) -> bool;

    // --- Readings ---

    /// Last battery level. Zero before the first reading.
    fn battery_level(&self) -> u8;

    /// Format an address for display.
    fn address_to_string(&self, address: BluetoothAddress) -> String {
        address.to_string()
    }
}
