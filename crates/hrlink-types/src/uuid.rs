//! Bluetooth UUIDs for heart-rate sensors.
//!
//! All identifiers are 16-bit Bluetooth SIG assigned numbers expanded onto
//! the Bluetooth base UUID.

use uuid::{Uuid, uuid};

// --- Standard BLE Service UUIDs ---

/// Heart Rate service.
pub const HEART_RATE_SERVICE: Uuid = uuid!("0000180d-0000-1000-8000-00805f9b34fb");

/// Battery service.
pub const BATTERY_SERVICE: Uuid = uuid!("0000180f-0000-1000-8000-00805f9b34fb");

// --- Standard BLE Characteristic UUIDs ---

/// Heart Rate Measurement characteristic (notify only).
pub const HEART_RATE_MEASUREMENT: Uuid = uuid!("00002a37-0000-1000-8000-00805f9b34fb");

/// Body Sensor Location characteristic.
pub const BODY_SENSOR_LOCATION: Uuid = uuid!("00002a38-0000-1000-8000-00805f9b34fb");

/// Battery Level characteristic.
pub const BATTERY_LEVEL: Uuid = uuid!("00002a19-0000-1000-8000-00805f9b34fb");

// --- Descriptors ---

/// Client Characteristic Configuration descriptor, written to enable notifications.
pub const CLIENT_CHARACTERISTIC_CONFIG: Uuid = uuid!("00002902-0000-1000-8000-00805f9b34fb");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heart_rate_service_uuid() {
        assert_eq!(
            HEART_RATE_SERVICE.to_string(),
            "0000180d-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_heart_rate_measurement_uuid() {
        assert_eq!(
            HEART_RATE_MEASUREMENT.to_string(),
            "00002a37-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_battery_uuids() {
        assert_eq!(
            BATTERY_SERVICE.to_string(),
            "0000180f-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            BATTERY_LEVEL.to_string(),
            "00002a19-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_cccd_uuid() {
        assert_eq!(
            CLIENT_CHARACTERISTIC_CONFIG.to_string(),
            "00002902-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_uuids_are_distinct() {
        let all = [
            HEART_RATE_SERVICE,
            BATTERY_SERVICE,
            HEART_RATE_MEASUREMENT,
            BODY_SENSOR_LOCATION,
            BATTERY_LEVEL,
            CLIENT_CHARACTERISTIC_CONFIG,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
