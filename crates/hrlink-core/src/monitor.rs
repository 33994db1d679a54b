//! Public facade over the connection subsystem.

use std::sync::Arc;

use async_trait::async_trait;
use hrlink_types::BluetoothAddress;

use crate::ble::BtleplugAdapter;
use crate::config::MonitorConfig;
use crate::error::Result;
use crate::events::EventReceiver;
use crate::machine::StateMachine;
use crate::registry::RegisteredDevice;
use crate::state::LifecycleState;
use crate::traits::{DeviceHandler, HeartRateSource};
use crate::transport::BleAdapter;

/// Scans for heart-rate sensors, holds at most one sensor session, and
/// publishes what happens as [`DeviceEvent`](crate::DeviceEvent)s.
///
/// Cloning is cheap; clones share the same session.
///
/// Background tasks keep the monitor alive while scanning or listening, so
/// call [`shutdown`](Self::shutdown) when done.
#[derive(Clone)]
pub struct HeartRateMonitor {
    machine: Arc<StateMachine>,
}

impl std::fmt::Debug for HeartRateMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeartRateMonitor")
            .field("lifecycle", &self.lifecycle())
            .field("heart_rate", &self.heart_rate())
            .field("battery_level", &self.battery_level())
            .finish()
    }
}

impl HeartRateMonitor {
    /// Create a monitor on top of `adapter`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`](crate::Error::InvalidConfig) if the
    /// configuration does not validate.
    pub fn new(adapter: Arc<dyn BleAdapter>, config: MonitorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            machine: StateMachine::new(adapter, config),
        })
    }

    /// Create a monitor on the host's first Bluetooth adapter.
    pub async fn with_default_adapter(config: MonitorConfig) -> Result<Self> {
        let adapter = BtleplugAdapter::first().await?;
        Self::new(Arc::new(adapter), config)
    }

    /// The configuration this monitor was built with.
    pub fn config(&self) -> &MonitorConfig {
        self.machine.config()
    }

    /// Subscribe to lifecycle, reading and error events.
    pub fn subscribe_events(&self) -> EventReceiver {
        self.machine.subscribe_events()
    }

    /// Start the advertisement watcher.
    ///
    /// Clears the list of discovered devices. Failures are reported as
    /// [`DeviceEvent::AdapterError`](crate::DeviceEvent::AdapterError).
    /// Does nothing if already scanning.
    pub async fn start_scanning(&self) {
        self.machine.start_scanning().await;
    }

    /// Stop the advertisement watcher.
    pub async fn stop_scanning(&self) {
        self.machine.stop_scanning().await;
    }

    /// Whether the advertisement watcher is running.
    pub fn is_scanning(&self) -> bool {
        self.machine.is_scanning()
    }

    /// Connect to `address` and start receiving heart-rate notifications.
    ///
    /// A running auto-connect countdown is dropped first.
    ///
    /// # Errors
    ///
    /// - [`Error::SessionActive`](crate::Error::SessionActive) if a session
    ///   or another attempt already exists. The existing session is untouched.
    /// - [`Error::Cancelled`](crate::Error::Cancelled) if the attempt was
    ///   aborted by [`unsubscribe_from_device`](Self::unsubscribe_from_device).
    /// - Any connect, discovery, subscribe or timeout failure. These are also
    ///   published as [`DeviceEvent::DeviceError`](crate::DeviceEvent::DeviceError).
    pub async fn subscribe_to_device(&self, address: BluetoothAddress) -> Result<()> {
        self.machine.supervisor().disarm();
        self.machine.connect(address).await
    }

    /// Close the session, or abort the attempt in progress.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`](crate::Error::NotConnected) if there
    /// is nothing to tear down.
    pub async fn unsubscribe_from_device(&self) -> Result<()> {
        self.machine.unsubscribe().await
    }

    /// Last heart rate in bpm, clamped to 0..=254. Zero before the first reading.
    pub fn heart_rate(&self) -> u16 {
        self.machine.heart_rate()
    }

    /// Last battery level. Zero before the first reading.
    pub fn battery_level(&self) -> u8 {
        self.machine.battery_level()
    }

    /// Whether a session is open.
    pub fn is_listening(&self) -> bool {
        self.machine.is_listening()
    }

    /// Whether [`subscribe_to_device`](Self::subscribe_to_device) would be
    /// accepted.
    pub fn can_connect(&self) -> bool {
        self.machine.can_connect()
    }

    /// Current lifecycle state.
    pub fn lifecycle(&self) -> LifecycleState {
        self.machine.lifecycle()
    }

    /// Address of the connected sensor.
    pub fn connected_address(&self) -> Option<BluetoothAddress> {
        self.machine.connected_address()
    }

    /// Sensors seen since scanning last started, in discovery order.
    pub fn discovered_devices(&self) -> Vec<RegisteredDevice> {
        self.machine.discovered_devices()
    }

    /// Address auto-connect will reconnect to.
    pub fn last_connected(&self) -> Option<BluetoothAddress> {
        self.machine.last_connected()
    }

    /// Replace the remembered address, e.g. after loading it from disk.
    pub fn set_last_connected(&self, address: Option<BluetoothAddress>) {
        self.machine.set_last_connected(address);
    }

    /// Whether an auto-connect countdown is running.
    pub fn is_auto_connect_pending(&self) -> bool {
        self.machine.supervisor().is_active()
    }

    /// Cancel the running auto-connect countdown.
    ///
    /// Publishes [`DisconnectReason::AutoConnectCancelled`](crate::DisconnectReason::AutoConnectCancelled).
    /// Returns `false` if no countdown was running.
    pub fn cancel_auto_connect(&self) -> bool {
        self.machine.supervisor().cancel()
    }

    /// Format an address for display.
    pub fn address_to_string(address: BluetoothAddress) -> String {
        address.to_string()
    }

    /// Stop everything: countdown, session and scanning.
    pub async fn shutdown(&self) {
        self.machine.shutdown().await;
    }
}

impl HeartRateSource for HeartRateMonitor {
    fn heart_rate(&self) -> u16 {
        HeartRateMonitor::heart_rate(self)
    }
}

#[async_trait]
impl DeviceHandler for HeartRateMonitor {
    fn subscribe_events(&self) -> EventReceiver {
        HeartRateMonitor::subscribe_events(self)
    }

    async fn start_scanning(&self) {
        HeartRateMonitor::start_scanning(self).await
    }

    async fn stop_scanning(&self) {
        HeartRateMonitor::stop_scanning(self).await
    }

    async fn subscribe_to_device(&self, address: BluetoothAddress) -> Result<()> {
        HeartRateMonitor::subscribe_to_device(self, address).await
    }

    async fn unsubscribe_from_device(&self) -> Result<()> {
        HeartRateMonitor::unsubscribe_from_device(self).await
    }

    fn battery_level(&self) -> u8 {
        HeartRateMonitor::battery_level(self)
    }

    fn is_listening(&self) -> bool {
        HeartRateMonitor::is_listening(self)
    }

    fn can_connect(&self) -> bool {
        HeartRateMonitor::can_connect(self)
    }

    fn address_to_string(&self, address: BluetoothAddress) -> String {
        HeartRateMonitor::address_to_string(address)
    }
}
