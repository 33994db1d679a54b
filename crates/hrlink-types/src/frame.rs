//! Heart Rate Measurement and Battery Level payload decoding.
//!
//! Layout of a Heart Rate Measurement notification:
//!
//! | byte(s) | field | present when |
//! |---------|-------|--------------|
//! | 0 | flags | always |
//! | 1 or 1-2 | heart rate (u8, or u16 LE) | always, width chosen by flag bit 0 |
//! | next 2 | energy expended, kJ (u16 LE) | flag bit 3 |
//! | rest | RR intervals, 1/1024 s (u16 LE each) | flag bit 4 |
//!
//! Flag bits 1-2 carry the sensor contact status. Optional fields are read when
//! enough bytes remain and dropped otherwise.

use std::fmt;

use bytes::Buf;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, DecodeResult};

/// Minimum number of bytes in a Heart Rate Measurement payload.
pub const MIN_HEART_RATE_BYTES: usize = 2;

/// Minimum number of bytes in a Battery Level payload.
pub const MIN_BATTERY_LEVEL_BYTES: usize = 1;

/// Highest heart rate shown to consumers; decoded values above it are clamped.
pub const MAX_DISPLAY_HEART_RATE: u16 = 254;

const FLAG_VALUE_FORMAT_U16: u8 = 0b0000_0001;
const FLAG_CONTACT_DETECTED: u8 = 0b0000_0010;
const FLAG_CONTACT_SUPPORTED: u8 = 0b0000_0100;
const FLAG_ENERGY_EXPENDED: u8 = 0b0000_1000;
const FLAG_RR_INTERVALS: u8 = 0b0001_0000;

/// Sensor contact status reported in the measurement flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SensorContact {
    /// The sensor does not report skin contact.
    #[default]
    NotSupported,
    /// Contact is supported but currently not detected.
    NotDetected,
    /// Contact is supported and detected.
    Detected,
}

impl SensorContact {
    fn from_flags(flags: u8) -> Self {
        match (
            flags & FLAG_CONTACT_SUPPORTED != 0,
            flags & FLAG_CONTACT_DETECTED != 0,
        ) {
            (false, _) => SensorContact::NotSupported,
            (true, false) => SensorContact::NotDetected,
            (true, true) => SensorContact::Detected,
        }
    }
}

impl fmt::Display for SensorContact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SensorContact::NotSupported => "not supported",
            SensorContact::NotDetected => "not detected",
            SensorContact::Detected => "detected",
        };
        f.write_str(text)
    }
}

/// A decoded Heart Rate Measurement notification.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HeartRateFrame {
    /// Raw flags byte.
    pub flags: u8,
    /// Heart rate in beats per minute, unclamped.
    pub heart_rate: u16,
    /// Skin contact status.
    pub sensor_contact: SensorContact,
    /// Accumulated energy expended in kilojoules.
    pub energy_expended: Option<u16>,
    /// RR intervals in units of 1/1024 second, oldest first.
    pub rr_intervals: Vec<u16>,
}

impl HeartRateFrame {
    /// Parse a `HeartRateFrame` from a notification payload.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::TooShort`] if the payload is shorter than
    /// [`MIN_HEART_RATE_BYTES`], or if the flags announce a 16-bit value and
    /// only one value byte follows.
    #[must_use = "parsing returns a Result that should be handled"]
    pub fn from_bytes(data: &[u8]) -> DecodeResult<Self> {
        if data.len() < MIN_HEART_RATE_BYTES {
            return Err(DecodeError::TooShort {
                expected: MIN_HEART_RATE_BYTES,
                actual: data.len(),
            });
        }

        let mut buf = data;
        let flags = buf.get_u8();

        let heart_rate = if flags & FLAG_VALUE_FORMAT_U16 != 0 {
            if buf.remaining() < 2 {
                return Err(DecodeError::TooShort {
                    expected: MIN_HEART_RATE_BYTES + 1,
                    actual: data.len(),
                });
            }
            buf.get_u16_le()
        } else {
            u16::from(buf.get_u8())
        };

        let energy_expended = if flags & FLAG_ENERGY_EXPENDED != 0 && buf.remaining() >= 2 {
            Some(buf.get_u16_le())
        } else {
            None
        };

        let mut rr_intervals = Vec::new();
        if flags & FLAG_RR_INTERVALS != 0 {
            while buf.remaining() >= 2 {
                rr_intervals.push(buf.get_u16_le());
            }
        }

        Ok(HeartRateFrame {
            flags,
            heart_rate,
            sensor_contact: SensorContact::from_flags(flags),
            energy_expended,
            rr_intervals,
        })
    }

    /// Heart rate clamped to [`MAX_DISPLAY_HEART_RATE`].
    #[must_use]
    pub fn display_rate(&self) -> u16 {
        self.heart_rate.min(MAX_DISPLAY_HEART_RATE)
    }

    /// Whether the value was encoded as 16 bits.
    #[must_use]
    pub fn is_wide_format(&self) -> bool {
        self.flags & FLAG_VALUE_FORMAT_U16 != 0
    }

    /// RR intervals converted to milliseconds.
    #[must_use]
    pub fn rr_intervals_ms(&self) -> Vec<f32> {
        self.rr_intervals
            .iter()
            .map(|&rr| f32::from(rr) * 1000.0 / 1024.0)
            .collect()
    }
}

/// Decode a Heart Rate Measurement payload.
///
/// ```
/// use hrlink_types::decode_heart_rate;
///
/// let frame = decode_heart_rate(&[0x00, 72]).unwrap();
/// assert_eq!(frame.heart_rate, 72);
///
/// let frame = decode_heart_rate(&[0x01, 0x64, 0x00]).unwrap();
/// assert_eq!(frame.heart_rate, 100);
/// ```
///
/// # Errors
///
/// See [`HeartRateFrame::from_bytes`].
pub fn decode_heart_rate(payload: &[u8]) -> DecodeResult<HeartRateFrame> {
    HeartRateFrame::from_bytes(payload)
}

/// Decode a Battery Level payload into a percentage.
///
/// Only the first byte is significant. Values are passed through as sent.
///
/// # Errors
///
/// Returns [`DecodeError::TooShort`] for an empty payload.
pub fn decode_battery_level(payload: &[u8]) -> DecodeResult<u8> {
    payload.first().copied().ok_or(DecodeError::TooShort {
        expected: MIN_BATTERY_LEVEL_BYTES,
        actual: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_eight_bit_rate() {
        let frame = decode_heart_rate(&[0x00, 72]).unwrap();
        assert_eq!(frame.heart_rate, 72);
        assert!(!frame.is_wide_format());
        assert_eq!(frame.sensor_contact, SensorContact::NotSupported);
        assert_eq!(frame.energy_expended, None);
        assert!(frame.rr_intervals.is_empty());
    }

    #[test]
    fn test_decode_sixteen_bit_rate() {
        let frame = decode_heart_rate(&[0x01, 0x64, 0x00]).unwrap();
        assert_eq!(frame.heart_rate, 100);
        assert!(frame.is_wide_format());
    }

    #[test]
    fn test_decode_sixteen_bit_rate_high_byte() {
        // 0x012C = 300 bpm, beyond the display ceiling
        let frame = decode_heart_rate(&[0x01, 0x2C, 0x01]).unwrap();
        assert_eq!(frame.heart_rate, 300);
        assert_eq!(frame.display_rate(), MAX_DISPLAY_HEART_RATE);
    }

    #[test]
    fn test_display_rate_leaves_normal_values() {
        let frame = decode_heart_rate(&[0x00, 255]).unwrap();
        assert_eq!(frame.heart_rate, 255);
        assert_eq!(frame.display_rate(), 254);

        let frame = decode_heart_rate(&[0x00, 60]).unwrap();
        assert_eq!(frame.display_rate(), 60);
    }

    #[test]
    fn test_decode_rejects_short_payloads() {
        assert_eq!(
            decode_heart_rate(&[]),
            Err(DecodeError::TooShort {
                expected: 2,
                actual: 0
            })
        );
        assert_eq!(
            decode_heart_rate(&[0x00]),
            Err(DecodeError::TooShort {
                expected: 2,
                actual: 1
            })
        );
    }

    #[test]
    fn test_decode_rejects_truncated_wide_value() {
        assert_eq!(
            decode_heart_rate(&[0x01, 0x64]),
            Err(DecodeError::TooShort {
                expected: 3,
                actual: 2
            })
        );
    }

    #[test]
    fn test_decode_sensor_contact() {
        let frame = decode_heart_rate(&[0b0000_0110, 80]).unwrap();
        assert_eq!(frame.sensor_contact, SensorContact::Detected);

        let frame = decode_heart_rate(&[0b0000_0100, 80]).unwrap();
        assert_eq!(frame.sensor_contact, SensorContact::NotDetected);

        // Detected bit without the supported bit is meaningless
        let frame = decode_heart_rate(&[0b0000_0010, 80]).unwrap();
        assert_eq!(frame.sensor_contact, SensorContact::NotSupported);
    }

    #[test]
    fn test_decode_energy_and_rr_intervals() {
        // flags: energy + RR, 8-bit rate 65, energy 0x0102, RR 1024 and 512
        let payload = [0b0001_1000, 65, 0x02, 0x01, 0x00, 0x04, 0x00, 0x02];
        let frame = decode_heart_rate(&payload).unwrap();
        assert_eq!(frame.heart_rate, 65);
        assert_eq!(frame.energy_expended, Some(0x0102));
        assert_eq!(frame.rr_intervals, vec![1024, 512]);
        assert_eq!(frame.rr_intervals_ms(), vec![1000.0, 500.0]);
    }

    #[test]
    fn test_decode_rr_intervals_with_wide_rate() {
        let payload = [0b0001_0001, 0x50, 0x00, 0x00, 0x03];
        let frame = decode_heart_rate(&payload).unwrap();
        assert_eq!(frame.heart_rate, 80);
        assert_eq!(frame.energy_expended, None);
        assert_eq!(frame.rr_intervals, vec![768]);
    }

    #[test]
    fn test_decode_tolerates_truncated_optional_fields() {
        // Energy flagged but only one byte follows
        let frame = decode_heart_rate(&[0b0000_1000, 70, 0x01]).unwrap();
        assert_eq!(frame.heart_rate, 70);
        assert_eq!(frame.energy_expended, None);

        // RR flagged with an odd trailing byte
        let frame = decode_heart_rate(&[0b0001_0000, 70, 0x00, 0x04, 0x07]).unwrap();
        assert_eq!(frame.rr_intervals, vec![1024]);
    }

    #[test]
    fn test_decode_ignores_unflagged_trailing_bytes() {
        let frame = decode_heart_rate(&[0x00, 90, 0xAA, 0xBB]).unwrap();
        assert_eq!(frame.heart_rate, 90);
        assert_eq!(frame.energy_expended, None);
        assert!(frame.rr_intervals.is_empty());
    }

    #[test]
    fn test_decode_battery_level() {
        assert_eq!(decode_battery_level(&[87]), Ok(87));
        assert_eq!(decode_battery_level(&[100, 0xFF]), Ok(100));
        assert_eq!(
            decode_battery_level(&[]),
            Err(DecodeError::TooShort {
                expected: 1,
                actual: 0
            })
        );
    }

    #[test]
    fn test_sensor_contact_display() {
        assert_eq!(SensorContact::Detected.to_string(), "detected");
        assert_eq!(SensorContact::NotDetected.to_string(), "not detected");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_frame_serializes() {
        let frame = decode_heart_rate(&[0b0000_0110, 72]).unwrap();
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"heart_rate\":72"));
        assert!(json.contains("\"sensor_contact\":\"detected\""));
    }
}
