//! Platform-agnostic types for BLE heart-rate sensors.
//!
//! This crate holds everything about the heart-rate protocol that does not
//! need a radio: payload decoding, device addresses and the GATT identifiers.
//! The BLE connection logic lives in hrlink-core.
//!
//! # Features
//!
//! - Heart Rate Measurement and Battery Level decoding
//! - 48-bit Bluetooth addresses with a canonical string form
//! - UUID constants for the services and characteristics involved
//! - Error types for decoding and address parsing
//!
//! # Example
//!
//! ```
//! use hrlink_types::{decode_heart_rate, BluetoothAddress};
//!
//! let frame = decode_heart_rate(&[0x00, 72]).unwrap();
//! assert_eq!(frame.display_rate(), 72);
//!
//! let address: BluetoothAddress = "C0:FF:EE:00:00:01".parse().unwrap();
//! assert_eq!(address.to_string(), "C0:FF:EE:00:00:01");
//! ```

pub mod address;
pub mod error;
pub mod frame;
pub mod uuid;

pub use address::BluetoothAddress;
pub use error::{AddressParseError, DecodeError, DecodeResult};
pub use frame::{
    HeartRateFrame, MAX_DISPLAY_HEART_RATE, SensorContact, decode_battery_level,
    decode_heart_rate,
};
pub use uuid as uuids;

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn short_payloads_never_decode(payload in proptest::collection::vec(any::<u8>(), 0..2)) {
            let is_too_short = matches!(
                decode_heart_rate(&payload),
                Err(DecodeError::TooShort { .. })
            );
            prop_assert!(is_too_short);
        }

        #[test]
        fn narrow_rate_is_second_byte(
            flags in any::<u8>().prop_map(|f| f & !0x01),
            rate in any::<u8>(),
            tail in proptest::collection::vec(any::<u8>(), 0..12),
        ) {
            let mut payload = vec![flags, rate];
            payload.extend(tail);
            let frame = decode_heart_rate(&payload).unwrap();
            prop_assert_eq!(frame.heart_rate, u16::from(rate));
            prop_assert_eq!(frame.flags, flags);
        }

        #[test]
        fn wide_rate_is_little_endian(
            flags in any::<u8>().prop_map(|f| f | 0x01),
            rate in any::<u16>(),
            tail in proptest::collection::vec(any::<u8>(), 0..12),
        ) {
            let mut payload = vec![flags];
            payload.extend_from_slice(&rate.to_le_bytes());
            payload.extend(tail);
            let frame = decode_heart_rate(&payload).unwrap();
            prop_assert_eq!(frame.heart_rate, rate);
            prop_assert!(frame.display_rate() <= MAX_DISPLAY_HEART_RATE);
        }

        #[test]
        fn decode_never_panics(payload in proptest::collection::vec(any::<u8>(), 0..32)) {
            let _ = decode_heart_rate(&payload);
            let _ = decode_battery_level(&payload);
        }

        #[test]
        fn address_display_parses_back(raw in 0u64..(1u64 << 48)) {
            let address = BluetoothAddress::new(raw);
            let parsed: BluetoothAddress = address.to_string().parse().unwrap();
            prop_assert_eq!(parsed, address);
        }
    }

    #[test]
    fn test_reexported_uuids() {
        assert_eq!(
            uuids::HEART_RATE_MEASUREMENT.to_string(),
            "00002a37-0000-1000-8000-00805f9b34fb"
        );
    }
}
