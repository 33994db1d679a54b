//! Error types for hrlink-core.
//!
//! Every host-stack failure is caught where the asynchronous call returns and
//! converted into one of these variants. The state machine then reports it as
//! a [`DeviceEvent`](crate::DeviceEvent), so callers that only listen to
//! events never have to handle a `Result` to learn about a failed connection.
//!
//! ## Classification
//!
//! | Error Type | Reported as | Typical recovery |
//! |------------|-------------|------------------|
//! | [`Error::AdapterUnavailable`] | `AdapterError` | Enable the radio, start scanning again |
//! | [`Error::ScanFailed`] | `AdapterError` | Retry the scan |
//! | [`Error::Bluetooth`] | `DeviceError` | Pick the device again |
//! | [`Error::ConnectionFailed`] | `DeviceError` | Pick the device again |
//! | [`Error::Timeout`] | `DeviceError` | Move closer, pick the device again |
//! | [`Error::ServiceNotFound`] | `DeviceError` | Not a heart-rate sensor |
//! | [`Error::CharacteristicNotFound`] | `DeviceError` | Firmware incompatibility |
//! | [`Error::SubscribeFailed`] | `DeviceError` | Pick the device again |
//! | [`Error::SessionActive`] | not reported | Unsubscribe first |
//! | [`Error::Decode`] | not reported | Frame is dropped |
//!
//! No error is retried automatically. The only automatic reconnect is the
//! countdown started by the [`AutoReconnectSupervisor`](crate::AutoReconnectSupervisor)
//! when the last device is seen again.

use std::time::Duration;

use hrlink_types::{BluetoothAddress, DecodeError};
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur when talking to a heart-rate sensor.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error from the host stack.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// No Bluetooth adapter is present or it cannot be opened.
    #[error("No Bluetooth adapter available")]
    AdapterUnavailable,

    /// The advertisement watcher could not be started.
    #[error("Scan failed: {0}")]
    ScanFailed(String),

    /// The host stack does not know a device with this address.
    #[error("Device not found: {0}")]
    DeviceNotFound(BluetoothAddress),

    /// Opening the link to the device failed.
    #[error("Connection to {address} failed: {reason}")]
    ConnectionFailed {
        /// The device that failed to connect.
        address: BluetoothAddress,
        /// Why the connection failed.
        reason: String,
    },

    /// The device does not expose a required service.
    #[error("Service not found: {uuid}")]
    ServiceNotFound {
        /// The service UUID that was not found.
        uuid: Uuid,
    },

    /// The service does not contain a required characteristic.
    #[error("Characteristic not found: {uuid} (searched in {service_count} services)")]
    CharacteristicNotFound {
        /// The characteristic UUID that was not found.
        uuid: Uuid,
        /// Number of services the device exposes.
        service_count: usize,
    },

    /// Writing the notification-enable descriptor failed.
    #[error("Subscribe to characteristic {uuid} failed: {reason}")]
    SubscribeFailed {
        /// The characteristic UUID.
        uuid: Uuid,
        /// The reason for the failure.
        reason: String,
    },

    /// Operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// A session or connection attempt already exists.
    #[error("A device session is already active")]
    SessionActive,

    /// Operation attempted while not connected to a device.
    #[error("Not connected to device")]
    NotConnected,

    /// Operation was cancelled by unsubscribe or shutdown.
    #[error("Operation cancelled")]
    Cancelled,

    /// A payload could not be decoded.
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a connection failure for an address.
    pub fn connection_failed(address: BluetoothAddress, reason: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            address,
            reason: reason.into(),
        }
    }

    /// Create a characteristic not found error.
    pub fn characteristic_not_found(uuid: Uuid, service_count: usize) -> Self {
        Self::CharacteristicNotFound {
            uuid,
            service_count,
        }
    }

    /// Create a subscribe failure.
    pub fn subscribe_failed(uuid: Uuid, reason: impl Into<String>) -> Self {
        Self::SubscribeFailed {
            uuid,
            reason: reason.into(),
        }
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Whether this error concerns the radio rather than a particular device.
    ///
    /// Adapter errors are reported as `AdapterError` events, everything else
    /// that reaches the event stream as `DeviceError`.
    pub fn is_adapter_error(&self) -> bool {
        matches!(self, Self::AdapterUnavailable | Self::ScanFailed(_))
    }
}

/// Result type alias using hrlink-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
