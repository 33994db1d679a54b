//! 48-bit Bluetooth device addresses.

use std::fmt;
use std::str::FromStr;

use crate::error::AddressParseError;

const ADDRESS_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

/// A 48-bit Bluetooth device address.
///
/// Stored as the low 48 bits of a `u64`. The canonical text form is six
/// upper-case hex octets separated by colons, most significant first, and is
/// what gets persisted as the last-connected device.
///
/// ```
/// use hrlink_types::BluetoothAddress;
///
/// let address = BluetoothAddress::new(0x0011_2233_4455);
/// assert_eq!(address.to_string(), "00:11:22:33:44:55");
/// assert_eq!("00:11:22:33:44:55".parse::<BluetoothAddress>().unwrap(), address);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct BluetoothAddress(u64);

impl BluetoothAddress {
    /// Create an address from its integer form. Bits above 48 are discarded.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw & ADDRESS_MASK)
    }

    /// Create an address from six octets, most significant first.
    #[must_use]
    pub fn from_octets(octets: [u8; 6]) -> Self {
        let raw = octets
            .iter()
            .fold(0u64, |acc, &octet| (acc << 8) | u64::from(octet));
        Self(raw)
    }

    /// The six octets, most significant first.
    #[must_use]
    pub fn octets(&self) -> [u8; 6] {
        let bytes = self.0.to_be_bytes();
        [bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7]]
    }

    /// The integer form of the address.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for BluetoothAddress {
    fn from(raw: u64) -> Self {
        Self::new(raw)
    }
}

impl From<[u8; 6]> for BluetoothAddress {
    fn from(octets: [u8; 6]) -> Self {
        Self::from_octets(octets)
    }
}

impl From<BluetoothAddress> for u64 {
    fn from(address: BluetoothAddress) -> Self {
        address.0
    }
}

impl fmt::Display for BluetoothAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = self.octets();
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl FromStr for BluetoothAddress {
    type Err = AddressParseError;

    /// Accepts `AA:BB:CC:DD:EE:FF` or `AA-BB-CC-DD-EE-FF`, any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AddressParseError::InvalidFormat(s.to_string());
        let trimmed = s.trim();

        let parts: Vec<&str> = trimmed.split([':', '-']).collect();
        if parts.len() != 6 {
            return Err(invalid());
        }

        let mut octets = [0u8; 6];
        for (slot, part) in octets.iter_mut().zip(&parts) {
            if part.len() != 2 {
                return Err(invalid());
            }
            *slot = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        Ok(Self::from_octets(octets))
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for BluetoothAddress {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for BluetoothAddress {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_colon_separated_upper_hex() {
        let address = BluetoothAddress::new(0xA1B2_C3D4_E5F6);
        assert_eq!(address.to_string(), "A1:B2:C3:D4:E5:F6");
    }

    #[test]
    fn test_display_pads_leading_zeros() {
        assert_eq!(BluetoothAddress::new(1).to_string(), "00:00:00:00:00:01");
        assert_eq!(BluetoothAddress::default().to_string(), "00:00:00:00:00:00");
    }

    #[test]
    fn test_new_discards_high_bits() {
        let address = BluetoothAddress::new(0xFFFF_0000_0000_0001);
        assert_eq!(address.as_u64(), 1);
    }

    #[test]
    fn test_octets_round_trip() {
        let octets = [0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x42];
        let address = BluetoothAddress::from_octets(octets);
        assert_eq!(address.as_u64(), 0xDEAD_BEEF_0042);
        assert_eq!(address.octets(), octets);
    }

    #[test]
    fn test_parse_accepts_lower_case_and_dashes() {
        let expected = BluetoothAddress::new(0xA1B2_C3D4_E5F6);
        assert_eq!("a1:b2:c3:d4:e5:f6".parse::<BluetoothAddress>(), Ok(expected));
        assert_eq!("A1-B2-C3-D4-E5-F6".parse::<BluetoothAddress>(), Ok(expected));
        assert_eq!(" A1:B2:C3:D4:E5:F6\n".parse::<BluetoothAddress>(), Ok(expected));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in [
            "",
            "A1:B2:C3:D4:E5",
            "A1:B2:C3:D4:E5:F6:07",
            "A1:B2:C3:D4:E5:G6",
            "A1B2:C3:D4:E5:F6:07",
            "1:2:3:4:5:6",
        ] {
            assert!(bad.parse::<BluetoothAddress>().is_err(), "{bad:?}");
        }
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_serde_uses_canonical_string() {
        let address = BluetoothAddress::new(0x0011_2233_4455);
        let json = serde_json::to_string(&address).unwrap();
        assert_eq!(json, "\"00:11:22:33:44:55\"");
        let back: BluetoothAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, address);
        assert!(serde_json::from_str::<BluetoothAddress>("\"bogus\"").is_err());
    }
}
