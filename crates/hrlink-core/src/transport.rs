//! Host BLE stack abstractions.
//!
//! The connection state machine only talks to the radio through
//! [`BleAdapter`] and [`BleLink`]. [`BtleplugAdapter`](crate::BtleplugAdapter)
//! implements them on the platform stack and [`MockAdapter`](crate::MockAdapter)
//! in memory. The transport is chosen once, when the
//! [`HeartRateMonitor`](crate::HeartRateMonitor) is constructed.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use hrlink_types::BluetoothAddress;
use uuid::Uuid;

use crate::error::Result;

/// An advertisement received while scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Address of the advertiser.
    pub address: BluetoothAddress,
    /// Local name, if advertised.
    pub name: Option<String>,
    /// Advertised service UUIDs.
    pub services: Vec<Uuid>,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
}

impl Advertisement {
    /// Whether the advertisement lists the given service.
    pub fn advertises(&self, service: Uuid) -> bool {
        self.services.contains(&service)
    }
}

/// A characteristic value pushed by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// The characteristic that changed.
    pub characteristic: Uuid,
    /// Raw payload.
    pub value: Vec<u8>,
}

/// Stream of advertisements, ended when the watcher stops.
pub type AdvertisementStream = Pin<Box<dyn Stream<Item = Advertisement> + Send>>;

/// Stream of notifications, ended when the link drops.
pub type NotificationStream = Pin<Box<dyn Stream<Item = Notification> + Send>>;

/// End `notifications` once `lost` resolves.
///
/// For stacks whose value stream outlives the link: `lost` watches for the
/// disconnect instead.
pub fn until_link_lost(
    notifications: NotificationStream,
    lost: impl Future<Output = ()> + Send + 'static,
) -> NotificationStream {
    Box::pin(notifications.take_until(lost))
}

/// The radio: advertisement watcher and device opener.
#[async_trait]
pub trait BleAdapter: Send + Sync {
    /// Start the advertisement watcher.
    async fn start_scan(&self) -> Result<AdvertisementStream>;

    /// Stop the advertisement watcher.
    async fn stop_scan(&self) -> Result<()>;

    /// Open a connection to the device with this address.
    async fn open(&self, address: BluetoothAddress) -> Result<Arc<dyn BleLink>>;
}

/// An open connection to one device.
#[async_trait]
pub trait BleLink: Send + Sync {
    /// Address of the connected device.
    fn address(&self) -> BluetoothAddress;

    // --- Discovery ---

    /// Enumerate the device's services.
    async fn discover_services(&self) -> Result<Vec<Uuid>>;

    /// Enumerate the characteristics of one service.
    async fn discover_characteristics(&self, service: Uuid) -> Result<Vec<Uuid>>;

    // --- Notifications ---

    /// Value-changed stream for every subscribed characteristic on this link.
    async fn notifications(&self) -> Result<NotificationStream>;

    /// Write the notification-enable descriptor of a characteristic.
    async fn enable_notifications(&self, characteristic: Uuid) -> Result<()>;

    /// Clear the notification-enable descriptor of a characteristic.
    async fn disable_notifications(&self, characteristic: Uuid) -> Result<()>;

    // --- Teardown ---

    /// Release the device handle.
    async fn release(&self) -> Result<()>;
}
