//! Error types for frame decoding and address parsing in hrlink-types.

use thiserror::Error;

/// Errors that can occur when decoding a characteristic payload.
///
/// Decode failures are expected on a noisy link. Callers that consume a
/// notification stream should drop the offending frame and keep listening.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum DecodeError {
    /// The payload ended before a mandatory field.
    #[error("Payload too short: requires {expected} bytes, got {actual}")]
    TooShort {
        /// Minimum number of bytes needed to decode the mandatory fields.
        expected: usize,
        /// Number of bytes actually received.
        actual: usize,
    },
}

/// Error returned when a string is not a valid Bluetooth address.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum AddressParseError {
    /// Expected six octets separated by `:` or `-`.
    #[error("Invalid address '{0}': expected six hex octets like AA:BB:CC:DD:EE:FF")]
    InvalidFormat(String),
}

/// Result type alias for decoding operations.
pub type DecodeResult<T> = std::result::Result<T, DecodeError>;
