//! Host BLE stack implementation on btleplug.
//!
//! On macOS CoreBluetooth hides device addresses, so every peripheral reports
//! `00:00:00:00:00:00` and cannot be told apart by address. Linux and Windows
//! report real addresses.
//!
//! btleplug keeps a peripheral's notification stream open after the link
//! drops, so [`BtleplugLink`] ends it itself on a disconnect event or a failed
//! connection check.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::{Stream, StreamExt};
use hrlink_types::BluetoothAddress;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::transport::{
    Advertisement, AdvertisementStream, BleAdapter, BleLink, Notification, NotificationStream,
    until_link_lost,
};

/// How often an open link is checked for a silent disconnect.
const LINK_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Get the first available Bluetooth adapter.
pub async fn get_adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;

    adapters.into_iter().next().ok_or(Error::AdapterUnavailable)
}

/// [`BleAdapter`] backed by a btleplug adapter.
#[derive(Debug, Clone)]
pub struct BtleplugAdapter {
    adapter: Adapter,
}

impl BtleplugAdapter {
    /// Wrap an adapter.
    pub fn new(adapter: Adapter) -> Self {
        Self { adapter }
    }

    /// Open the first available adapter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AdapterUnavailable`] when the host has no adapter.
    pub async fn first() -> Result<Self> {
        Ok(Self::new(get_adapter().await?))
    }

    async fn find_peripheral(&self, address: BluetoothAddress) -> Result<Peripheral> {
        for peripheral in self.adapter.peripherals().await? {
            if let Ok(Some(props)) = peripheral.properties().await
                && BluetoothAddress::from_octets(props.address.into_inner()) == address
            {
                return Ok(peripheral);
            }
        }
        Err(Error::DeviceNotFound(address))
    }
}

async fn advertisement_for(adapter: &Adapter, event: CentralEvent) -> Option<Advertisement> {
    let id = match event {
        CentralEvent::DeviceDiscovered(id)
        | CentralEvent::DeviceUpdated(id)
        | CentralEvent::ServicesAdvertisement { id, .. } => id,
        _ => return None,
    };

    let peripheral = adapter.peripheral(&id).await.ok()?;
    let props = peripheral.properties().await.ok()??;
    Some(Advertisement {
        address: BluetoothAddress::from_octets(props.address.into_inner()),
        name: props.local_name,
        services: props.services,
        rssi: props.rssi,
    })
}

#[async_trait]
impl BleAdapter for BtleplugAdapter {
    async fn start_scan(&self) -> Result<AdvertisementStream> {
        let events = self.adapter.events().await?;
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| Error::ScanFailed(e.to_string()))?;
        info!("Advertisement watcher started");

        let adapter = self.adapter.clone();
        let stream = events.filter_map(move |event| {
            let adapter = adapter.clone();
            async move { advertisement_for(&adapter, event).await }
        });
        Ok(Box::pin(stream))
    }

    async fn stop_scan(&self) -> Result<()> {
        self.adapter.stop_scan().await?;
        info!("Advertisement watcher stopped");
        Ok(())
    }

    async fn open(&self, address: BluetoothAddress) -> Result<Arc<dyn BleLink>> {
        let peripheral = self.find_peripheral(address).await?;
        peripheral
            .connect()
            .await
            .map_err(|e| Error::connection_failed(address, e.to_string()))?;
        debug!("Link to {} open", address);
        Ok(Arc::new(BtleplugLink {
            adapter: self.adapter.clone(),
            peripheral,
            address,
        }))
    }
}

/// Resolve once the peripheral is reported disconnected, or a periodic
/// `is_connected` check fails.
async fn link_lost(
    peripheral: Peripheral,
    address: BluetoothAddress,
    mut events: Pin<Box<dyn Stream<Item = CentralEvent> + Send>>,
) {
    let id = peripheral.id();
    let mut check = tokio::time::interval(LINK_CHECK_INTERVAL);
    check.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(CentralEvent::DeviceDisconnected(gone)) if gone == id => {
                    debug!("{} reported disconnected", address);
                    return;
                }
                Some(_) => {}
                None => {
                    debug!("Adapter event stream closed, treating {} as lost", address);
                    return;
                }
            },
            _ = check.tick() => {
                if !peripheral.is_connected().await.unwrap_or(false) {
                    debug!("{} no longer connected", address);
                    return;
                }
            }
        }
    }
}

/// [`BleLink`] backed by a connected btleplug peripheral.
#[derive(Debug)]
pub struct BtleplugLink {
    adapter: Adapter,
    peripheral: Peripheral,
    address: BluetoothAddress,
}

impl BtleplugLink {
    fn find_characteristic(&self, uuid: Uuid) -> Result<Characteristic> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or_else(|| Error::characteristic_not_found(uuid, self.peripheral.services().len()))
    }
}

#[async_trait]
impl BleLink for BtleplugLink {
    fn address(&self) -> BluetoothAddress {
        self.address
    }

    async fn discover_services(&self) -> Result<Vec<Uuid>> {
        self.peripheral.discover_services().await?;
        Ok(self
            .peripheral
            .services()
            .iter()
            .map(|service| service.uuid)
            .collect())
    }

    async fn discover_characteristics(&self, service: Uuid) -> Result<Vec<Uuid>> {
        self.peripheral
            .services()
            .into_iter()
            .find(|s| s.uuid == service)
            .map(|s| s.characteristics.iter().map(|c| c.uuid).collect())
            .ok_or(Error::ServiceNotFound { uuid: service })
    }

    async fn notifications(&self) -> Result<NotificationStream> {
        let events = self.adapter.events().await?;
        let stream = self.peripheral.notifications().await?;
        let values: NotificationStream = Box::pin(stream.map(|notification| Notification {
            characteristic: notification.uuid,
            value: notification.value,
        }));
        Ok(until_link_lost(
            values,
            link_lost(self.peripheral.clone(), self.address, events),
        ))
    }

    async fn enable_notifications(&self, characteristic: Uuid) -> Result<()> {
        let target = self.find_characteristic(characteristic)?;
        self.peripheral
            .subscribe(&target)
            .await
            .map_err(|e| Error::subscribe_failed(characteristic, e.to_string()))
    }

    async fn disable_notifications(&self, characteristic: Uuid) -> Result<()> {
        let target = self.find_characteristic(characteristic)?;
        self.peripheral.unsubscribe(&target).await?;
        Ok(())
    }

    async fn release(&self) -> Result<()> {
        self.peripheral.disconnect().await?;
        debug!("Link to {} released", self.address);
        Ok(())
    }
}
