//! Device event system for lifecycle and measurement notifications.
//!
//! Events are delivered over a tokio broadcast channel. A subscriber's
//! lifetime is the lifetime of its [`EventReceiver`]: dropping the receiver
//! detaches it, and the state machine never calls into consumer code.

use std::fmt;

use hrlink_types::BluetoothAddress;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events raised by the connection subsystem.
///
/// All events are serializable for logging and IPC.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum DeviceEvent {
    /// The radio could not be opened or the scan could not start.
    AdapterError { message: String },
    /// A heart-rate sensor was seen for the first time in this scan.
    DeviceFound {
        address: BluetoothAddress,
        name: Option<String>,
    },
    /// A connection attempt started.
    DeviceConnecting { address: BluetoothAddress },
    /// Heart-rate notifications are flowing.
    DeviceConnected { address: BluetoothAddress },
    /// A session or attempt is being torn down.
    DeviceDisconnecting { address: BluetoothAddress },
    /// The subsystem returned to idle.
    DeviceDisconnected {
        address: BluetoothAddress,
        reason: DisconnectReason,
    },
    /// Connect, discovery or subscription failed, or the link dropped.
    DeviceError {
        address: Option<BluetoothAddress>,
        message: String,
    },
    /// The displayed heart rate changed.
    HeartRateUpdated { value: u16 },
    /// The battery level changed.
    BatteryLevelUpdated { value: u8 },
    /// One tick of the auto-reconnect countdown.
    AutoConnectCountdown {
        address: BluetoothAddress,
        remaining: u32,
    },
}

impl DeviceEvent {
    /// Whether this event reports a failure.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            DeviceEvent::AdapterError { .. } | DeviceEvent::DeviceError { .. }
        )
    }
}

/// Reason for returning to idle.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum DisconnectReason {
    /// Unsubscribe requested by the user, or an attempt aborted by it.
    UserRequested,
    /// The notification stream ended while listening.
    ConnectionLost,
    /// The auto-reconnect countdown was cancelled.
    AutoConnectCancelled,
    /// The subsystem is shutting down.
    Shutdown,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DisconnectReason::UserRequested => "user requested",
            DisconnectReason::ConnectionLost => "connection lost",
            DisconnectReason::AutoConnectCancelled => "auto-connect cancelled",
            DisconnectReason::Shutdown => "shutdown",
        };
        f.write_str(text)
    }
}

/// Sender for device events.
pub type EventSender = broadcast::Sender<DeviceEvent>;

/// Receiver for device events.
pub type EventReceiver = broadcast::Receiver<DeviceEvent>;

/// Event dispatcher for sending events to multiple receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: DeviceEvent) {
        // Ignore error if no receivers
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}
