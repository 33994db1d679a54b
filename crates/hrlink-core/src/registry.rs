//! Registry of heart-rate sensors discovered during the current scan.

use std::collections::HashSet;

use hrlink_types::BluetoothAddress;
use serde::{Deserialize, Serialize};

/// A discovered sensor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredDevice {
    /// Device address, the registry key.
    pub address: BluetoothAddress,
    /// Advertised name, if the advertisement carried one.
    pub name: Option<String>,
}

impl RegisteredDevice {
    /// Label for selection lists: `"Name (AA:BB:CC:DD:EE:FF)"`, or just the
    /// address when the device is unnamed.
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) if !name.is_empty() => format!("{} ({})", name, self.address),
            _ => self.address.to_string(),
        }
    }
}

/// Insertion-ordered set of discovered devices keyed by address.
///
/// The first sighting of an address wins. Later sightings, even with a
/// different name, are ignored.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    entries: Vec<RegisteredDevice>,
    seen: HashSet<BluetoothAddress>,
}

impl DeviceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a device. Returns `true` if the address was new.
    pub fn insert(&mut self, address: BluetoothAddress, name: Option<String>) -> bool {
        if !self.seen.insert(address) {
            return false;
        }
        self.entries.push(RegisteredDevice { address, name });
        true
    }

    /// Forget every device.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.seen.clear();
    }

    /// Whether the address has been recorded.
    pub fn contains(&self, address: BluetoothAddress) -> bool {
        self.seen.contains(&address)
    }

    /// Look up a device by address.
    pub fn get(&self, address: BluetoothAddress) -> Option<&RegisteredDevice> {
        if !self.contains(address) {
            return None;
        }
        self.entries.iter().find(|entry| entry.address == address)
    }

    /// Devices in discovery order.
    pub fn iter(&self) -> impl Iterator<Item = &RegisteredDevice> {
        self.entries.iter()
    }

    /// Number of recorded devices.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no device has been recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy of the devices in discovery order.
    pub fn snapshot(&self) -> Vec<RegisteredDevice> {
        self.entries.clone()
    }
}
