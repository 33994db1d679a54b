//! In-memory BLE stack for testing.
//!
//! [`MockAdapter`] implements [`BleAdapter`] and hands out [`MockPeripheral`]
//! links, so the whole connection subsystem can run without a radio.
//!
//! # Features
//!
//! - **Advertisement injection**: push advertisements into a running scan
//! - **Notification injection**: push heart-rate and battery payloads
//! - **Failure injection**: fail the scan, the connect, or a descriptor write
//! - **Latency simulation**: delay connects, discovery and releases
//! - **Link loss**: end the notification stream as a dropped connection would
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use hrlink_core::{HeartRateMonitor, MockAdapter, MockPeripheralBuilder, MonitorConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let adapter = Arc::new(MockAdapter::new());
//!     let sensor = MockPeripheralBuilder::new().name("Polar H10").build();
//!     adapter.add_peripheral(sensor.clone());
//!
//!     let monitor = HeartRateMonitor::new(adapter.clone(), MonitorConfig::default()).unwrap();
//!     monitor.subscribe_to_device(sensor.address()).await.unwrap();
//!     assert!(monitor.is_listening());
//!     monitor.shutdown().await;
//! }
//! ```

use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use hrlink_types::BluetoothAddress;
use hrlink_types::uuids::{
    BATTERY_LEVEL, BATTERY_SERVICE, BODY_SENSOR_LOCATION, HEART_RATE_MEASUREMENT,
    HEART_RATE_SERVICE,
};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::transport::{
    Advertisement, AdvertisementStream, BleAdapter, BleLink, Notification, NotificationStream,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn receiver_stream<T: Send + 'static>(
    rx: mpsc::UnboundedReceiver<T>,
) -> Pin<Box<dyn Stream<Item = T> + Send>> {
    Box::pin(futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    }))
}

/// A mock radio.
#[derive(Default)]
pub struct MockAdapter {
    peripherals: Mutex<HashMap<BluetoothAddress, Arc<MockPeripheral>>>,
    scan_tx: Mutex<Option<mpsc::UnboundedSender<Advertisement>>>,
    fail_scan: AtomicBool,
    scan_starts: AtomicU32,
    open_count: AtomicU32,
}

impl std::fmt::Debug for MockAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockAdapter")
            .field("peripherals", &lock(&self.peripherals).len())
            .field("scanning", &self.is_scanning())
            .finish()
    }
}

impl MockAdapter {
    /// Create an adapter with no peripherals.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a peripheral connectable.
    pub fn add_peripheral(&self, peripheral: Arc<MockPeripheral>) {
        lock(&self.peripherals).insert(peripheral.address(), peripheral);
    }

    /// Look up a peripheral by address.
    pub fn peripheral(&self, address: BluetoothAddress) -> Option<Arc<MockPeripheral>> {
        lock(&self.peripherals).get(&address).cloned()
    }

    /// Make the next scan starts fail.
    pub fn set_scan_failure(&self, fail: bool) {
        self.fail_scan.store(fail, Ordering::SeqCst);
    }

    /// Whether an advertisement watcher is running.
    pub fn is_scanning(&self) -> bool {
        lock(&self.scan_tx).is_some()
    }

    /// Deliver an advertisement to the running scan.
    ///
    /// Returns `false` if no scan is running.
    pub fn advertise(&self, advertisement: Advertisement) -> bool {
        match lock(&self.scan_tx).as_ref() {
            Some(tx) => tx.send(advertisement).is_ok(),
            None => false,
        }
    }

    /// Deliver a peripheral's advertisement to the running scan.
    pub fn advertise_peripheral(&self, peripheral: &MockPeripheral) -> bool {
        self.advertise(peripheral.advertisement())
    }

    /// End the running scan stream as if the radio stopped it.
    pub fn end_scan(&self) {
        lock(&self.scan_tx).take();
    }

    /// Number of successful scan starts.
    pub fn scan_start_count(&self) -> u32 {
        self.scan_starts.load(Ordering::SeqCst)
    }

    /// Number of `open` calls.
    pub fn open_count(&self) -> u32 {
        self.open_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BleAdapter for MockAdapter {
    async fn start_scan(&self) -> Result<AdvertisementStream> {
        if self.fail_scan.load(Ordering::SeqCst) {
            return Err(Error::ScanFailed("mock scan failure".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *lock(&self.scan_tx) = Some(tx);
        self.scan_starts.fetch_add(1, Ordering::SeqCst);
        Ok(receiver_stream(rx))
    }

    async fn stop_scan(&self) -> Result<()> {
        lock(&self.scan_tx).take();
        Ok(())
    }

    async fn open(&self, address: BluetoothAddress) -> Result<Arc<dyn BleLink>> {
        self.open_count.fetch_add(1, Ordering::SeqCst);
        let peripheral = self
            .peripheral(address)
            .ok_or(Error::DeviceNotFound(address))?;
        peripheral.connect().await?;
        Ok(peripheral)
    }
}

/// A mock heart-rate sensor.
///
/// Build one with [`MockPeripheralBuilder`].
pub struct MockPeripheral {
    address: BluetoothAddress,
    name: Option<String>,
    services: Vec<(Uuid, Vec<Uuid>)>,
    advertised_services: Vec<Uuid>,
    connected: AtomicBool,
    fail_connect: AtomicBool,
    fail_subscribe: Mutex<HashSet<Uuid>>,
    /// Simulated connect latency in milliseconds (0 = no delay).
    connect_latency_ms: AtomicU64,
    /// Simulated discovery latency in milliseconds (0 = no delay).
    discovery_latency_ms: AtomicU64,
    /// Simulated release latency in milliseconds (0 = no delay).
    release_latency_ms: AtomicU64,
    enabled: Mutex<HashSet<Uuid>>,
    notify_tx: Mutex<Option<mpsc::UnboundedSender<Notification>>>,
    connect_count: AtomicU32,
    release_count: AtomicU32,
}

impl std::fmt::Debug for MockPeripheral {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockPeripheral")
            .field("address", &self.address)
            .field("name", &self.name)
            .field("connected", &self.connected.load(Ordering::Relaxed))
            .finish()
    }
}

impl MockPeripheral {
    /// Device address.
    pub fn address(&self) -> BluetoothAddress {
        self.address
    }

    /// Advertised name.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The advertisement this peripheral broadcasts.
    pub fn advertisement(&self) -> Advertisement {
        Advertisement {
            address: self.address,
            name: self.name.clone(),
            services: self.advertised_services.clone(),
            rssi: Some(-55),
        }
    }

    /// Whether a link is open.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Whether notifications are enabled for a characteristic.
    pub fn is_notifying(&self, characteristic: Uuid) -> bool {
        lock(&self.enabled).contains(&characteristic)
    }

    /// Number of successful connects.
    pub fn connect_count(&self) -> u32 {
        self.connect_count.load(Ordering::SeqCst)
    }

    /// Number of releases.
    pub fn release_count(&self) -> u32 {
        self.release_count.load(Ordering::SeqCst)
    }

    /// Make connects fail.
    pub fn set_connect_failure(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Make descriptor writes to a characteristic fail.
    pub fn set_subscribe_failure(&self, characteristic: Uuid, fail: bool) {
        let mut failing = lock(&self.fail_subscribe);
        if fail {
            failing.insert(characteristic);
        } else {
            failing.remove(&characteristic);
        }
    }

    /// Set the simulated connect latency.
    pub fn set_connect_latency(&self, latency: Duration) {
        self.connect_latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Set the simulated discovery latency.
    pub fn set_discovery_latency(&self, latency: Duration) {
        self.discovery_latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Set the simulated release latency. The link stays up until it elapses.
    pub fn set_release_latency(&self, latency: Duration) {
        self.release_latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Push a characteristic value.
    ///
    /// Delivered only while connected with notifications enabled for it.
    pub fn notify(&self, characteristic: Uuid, value: impl Into<Vec<u8>>) -> bool {
        if !self.is_notifying(characteristic) {
            return false;
        }
        match lock(&self.notify_tx).as_ref() {
            Some(tx) => tx
                .send(Notification {
                    characteristic,
                    value: value.into(),
                })
                .is_ok(),
            None => false,
        }
    }

    /// Push an 8-bit heart-rate measurement.
    pub fn notify_heart_rate(&self, bpm: u8) -> bool {
        self.notify(HEART_RATE_MEASUREMENT, vec![0x00, bpm])
    }

    /// Push a battery level.
    pub fn notify_battery(&self, level: u8) -> bool {
        self.notify(BATTERY_LEVEL, vec![level])
    }

    /// Drop the link as if the sensor went out of range.
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
        lock(&self.enabled).clear();
        lock(&self.notify_tx).take();
    }

    async fn simulate_latency(latency_ms: &AtomicU64) {
        let ms = latency_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    async fn connect(&self) -> Result<()> {
        Self::simulate_latency(&self.connect_latency_ms).await;
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(Error::connection_failed(self.address, "mock connect failure"));
        }
        self.connected.store(true, Ordering::SeqCst);
        self.connect_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    fn has_characteristic(&self, characteristic: Uuid) -> bool {
        self.services
            .iter()
            .any(|(_, characteristics)| characteristics.contains(&characteristic))
    }
}

#[async_trait]
impl BleLink for MockPeripheral {
    fn address(&self) -> BluetoothAddress {
        self.address
    }

    async fn discover_services(&self) -> Result<Vec<Uuid>> {
        Self::simulate_latency(&self.discovery_latency_ms).await;
        self.ensure_connected()?;
        Ok(self.services.iter().map(|(uuid, _)| *uuid).collect())
    }

    async fn discover_characteristics(&self, service: Uuid) -> Result<Vec<Uuid>> {
        self.ensure_connected()?;
        self.services
            .iter()
            .find(|(uuid, _)| *uuid == service)
            .map(|(_, characteristics)| characteristics.clone())
            .ok_or(Error::ServiceNotFound { uuid: service })
    }

    async fn notifications(&self) -> Result<NotificationStream> {
        self.ensure_connected()?;
        let (tx, rx) = mpsc::unbounded_channel();
        *lock(&self.notify_tx) = Some(tx);
        Ok(receiver_stream(rx))
    }

    async fn enable_notifications(&self, characteristic: Uuid) -> Result<()> {
        self.ensure_connected()?;
        if !self.has_characteristic(characteristic) {
            return Err(Error::characteristic_not_found(
                characteristic,
                self.services.len(),
            ));
        }
        if lock(&self.fail_subscribe).contains(&characteristic) {
            return Err(Error::subscribe_failed(
                characteristic,
                "mock descriptor write failure",
            ));
        }
        lock(&self.enabled).insert(characteristic);
        Ok(())
    }

    async fn disable_notifications(&self, characteristic: Uuid) -> Result<()> {
        self.ensure_connected()?;
        lock(&self.enabled).remove(&characteristic);
        Ok(())
    }

    async fn release(&self) -> Result<()> {
        Self::simulate_latency(&self.release_latency_ms).await;
        self.connected.store(false, Ordering::SeqCst);
        lock(&self.enabled).clear();
        lock(&self.notify_tx).take();
        self.release_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Builder for creating mock peripherals with custom settings.
#[derive(Debug, Clone)]
pub struct MockPeripheralBuilder {
    address: Option<BluetoothAddress>,
    name: Option<String>,
    heart_rate_service: bool,
    heart_rate_characteristic: bool,
    battery_service: bool,
    advertise_heart_rate: bool,
    fail_connect: bool,
    fail_subscribe: Vec<Uuid>,
    connect_latency: Duration,
    discovery_latency: Duration,
    release_latency: Duration,
}

impl Default for MockPeripheralBuilder {
    fn default() -> Self {
        Self {
            address: None,
            name: Some("Mock HRM".to_string()),
            heart_rate_service: true,
            heart_rate_characteristic: true,
            battery_service: true,
            advertise_heart_rate: true,
            fail_connect: false,
            fail_subscribe: Vec::new(),
            connect_latency: Duration::ZERO,
            discovery_latency: Duration::ZERO,
            release_latency: Duration::ZERO,
        }
    }
}

impl MockPeripheralBuilder {
    /// Create a new builder for a heart-rate sensor with a battery service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the address. A random one is used otherwise.
    #[must_use]
    pub fn address(mut self, address: BluetoothAddress) -> Self {
        self.address = Some(address);
        self
    }

    /// Set the advertised name.
    #[must_use]
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Advertise without a name.
    #[must_use]
    pub fn unnamed(mut self) -> Self {
        self.name = None;
        self
    }

    /// Omit the battery service.
    #[must_use]
    pub fn without_battery(mut self) -> Self {
        self.battery_service = false;
        self
    }

    /// Omit the heart-rate service from the GATT table.
    #[must_use]
    pub fn without_heart_rate_service(mut self) -> Self {
        self.heart_rate_service = false;
        self
    }

    /// Keep the heart-rate service but omit its measurement characteristic.
    #[must_use]
    pub fn without_heart_rate_characteristic(mut self) -> Self {
        self.heart_rate_characteristic = false;
        self
    }

    /// Leave the heart-rate service out of the advertisement.
    #[must_use]
    pub fn not_advertising_heart_rate(mut self) -> Self {
        self.advertise_heart_rate = false;
        self
    }

    /// Make connects fail.
    #[must_use]
    pub fn fail_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    /// Make descriptor writes to a characteristic fail.
    #[must_use]
    pub fn fail_subscribe(mut self, characteristic: Uuid) -> Self {
        self.fail_subscribe.push(characteristic);
        self
    }

    /// Set the simulated connect latency.
    #[must_use]
    pub fn connect_latency(mut self, latency: Duration) -> Self {
        self.connect_latency = latency;
        self
    }

    /// Set the simulated discovery latency.
    #[must_use]
    pub fn discovery_latency(mut self, latency: Duration) -> Self {
        self.discovery_latency = latency;
        self
    }

    /// Set the simulated release latency.
    #[must_use]
    pub fn release_latency(mut self, latency: Duration) -> Self {
        self.release_latency = latency;
        self
    }

    /// Build the peripheral.
    #[must_use]
    pub fn build(self) -> Arc<MockPeripheral> {
        let address = self
            .address
            .unwrap_or_else(|| BluetoothAddress::new(rand::random::<u64>()));

        let mut services = Vec::new();
        if self.heart_rate_service {
            let mut characteristics = vec![BODY_SENSOR_LOCATION];
            if self.heart_rate_characteristic {
                characteristics.insert(0, HEART_RATE_MEASUREMENT);
            }
            services.push((HEART_RATE_SERVICE, characteristics));
        }
        if self.battery_service {
            services.push((BATTERY_SERVICE, vec![BATTERY_LEVEL]));
        }

        let mut advertised_services = Vec::new();
        if self.advertise_heart_rate {
            advertised_services.push(HEART_RATE_SERVICE);
        }

        Arc::new(MockPeripheral {
            address,
            name: self.name,
            services,
            advertised_services,
            connected: AtomicBool::new(false),
            fail_connect: AtomicBool::new(self.fail_connect),
            fail_subscribe: Mutex::new(self.fail_subscribe.into_iter().collect()),
            connect_latency_ms: AtomicU64::new(self.connect_latency.as_millis() as u64),
            discovery_latency_ms: AtomicU64::new(self.discovery_latency.as_millis() as u64),
            release_latency_ms: AtomicU64::new(self.release_latency.as_millis() as u64),
            enabled: Mutex::new(HashSet::new()),
            notify_tx: Mutex::new(None),
            connect_count: AtomicU32::new(0),
            release_count: AtomicU32::new(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_scan_delivers_advertisements() {
        let adapter = MockAdapter::new();
        let sensor = MockPeripheralBuilder::new().name("H10").build();

        assert!(!adapter.advertise_peripheral(&sensor));
        let mut stream = adapter.start_scan().await.unwrap();
        assert!(adapter.is_scanning());
        assert!(adapter.advertise_peripheral(&sensor));

        let adv = stream.next().await.unwrap();
        assert_eq!(adv.address, sensor.address());
        assert_eq!(adv.name.as_deref(), Some("H10"));
        assert!(adv.advertises(HEART_RATE_SERVICE));

        adapter.stop_scan().await.unwrap();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_scan_failure() {
        let adapter = MockAdapter::new();
        adapter.set_scan_failure(true);
        let result = adapter.start_scan().await;
        assert!(matches!(result, Err(Error::ScanFailed(_))));
        assert_eq!(adapter.scan_start_count(), 0);
    }

    #[tokio::test]
    async fn test_open_unknown_address() {
        let adapter = MockAdapter::new();
        let result = adapter.open(BluetoothAddress::new(9)).await;
        assert!(matches!(result, Err(Error::DeviceNotFound(_))));
        assert_eq!(adapter.open_count(), 1);
    }

    #[tokio::test]
    async fn test_gatt_table() {
        let adapter = MockAdapter::new();
        let sensor = MockPeripheralBuilder::new().build();
        adapter.add_peripheral(sensor.clone());

        let link = adapter.open(sensor.address()).await.unwrap();
        assert!(sensor.is_connected());

        let services = link.discover_services().await.unwrap();
        assert_eq!(services, vec![HEART_RATE_SERVICE, BATTERY_SERVICE]);

        let characteristics = link
            .discover_characteristics(HEART_RATE_SERVICE)
            .await
            .unwrap();
        assert!(characteristics.contains(&HEART_RATE_MEASUREMENT));

        link.release().await.unwrap();
        assert!(!sensor.is_connected());
        assert_eq!(sensor.release_count(), 1);
    }

    #[tokio::test]
    async fn test_notifications_require_enable() {
        let sensor = MockPeripheralBuilder::new().build();
        sensor.connect().await.unwrap();

        let mut stream = sensor.notifications().await.unwrap();
        assert!(!sensor.notify_heart_rate(70));

        sensor
            .enable_notifications(HEART_RATE_MEASUREMENT)
            .await
            .unwrap();
        assert!(sensor.notify_heart_rate(70));

        let notification = stream.next().await.unwrap();
        assert_eq!(notification.characteristic, HEART_RATE_MEASUREMENT);
        assert_eq!(notification.value, vec![0x00, 70]);

        sensor.drop_connection();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_subscribe_failure_injection() {
        let sensor = MockPeripheralBuilder::new()
            .fail_subscribe(HEART_RATE_MEASUREMENT)
            .build();
        sensor.connect().await.unwrap();

        let result = sensor.enable_notifications(HEART_RATE_MEASUREMENT).await;
        assert!(matches!(result, Err(Error::SubscribeFailed { .. })));

        sensor.set_subscribe_failure(HEART_RATE_MEASUREMENT, false);
        assert!(
            sensor
                .enable_notifications(HEART_RATE_MEASUREMENT)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_builder_variants() {
        let sensor = MockPeripheralBuilder::new()
            .without_battery()
            .without_heart_rate_characteristic()
            .not_advertising_heart_rate()
            .unnamed()
            .build();
        sensor.connect().await.unwrap();

        assert_eq!(
            sensor.discover_services().await.unwrap(),
            vec![HEART_RATE_SERVICE]
        );
        assert_eq!(
            sensor
                .discover_characteristics(HEART_RATE_SERVICE)
                .await
                .unwrap(),
            vec![BODY_SENSOR_LOCATION]
        );
        assert!(sensor.advertisement().services.is_empty());
        assert!(sensor.advertisement().name.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_latency() {
        let sensor = MockPeripheralBuilder::new()
            .connect_latency(Duration::from_secs(2))
            .build();
        let start = tokio::time::Instant::now();
        sensor.connect().await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let sensor = MockPeripheralBuilder::new().fail_connect().build();
        assert!(matches!(
            sensor.connect().await,
            Err(Error::ConnectionFailed { .. })
        ));
        assert!(!sensor.is_connected());
        sensor.set_connect_failure(false);
        assert!(sensor.connect().await.is_ok());
        assert_eq!(sensor.connect_count(), 1);
    }
}
