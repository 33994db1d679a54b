//! Lifecycle states of the connection subsystem.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where the subsystem is in its connect/listen/disconnect cycle.
///
/// ```text
/// Idle -> Scanning -> Connecting -> Subscribing -> Listening -> Disconnecting -> Idle
///            |  ^
///            v  |
///    AutoConnectPending -> Connecting
/// ```
///
/// Failures are reported as events and settle back to `Idle`, or to
/// `Scanning` when the advertisement watcher is still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Nothing running.
    #[default]
    Idle,
    /// The advertisement watcher is running.
    Scanning,
    /// The last device was seen again and the reconnect countdown is running.
    AutoConnectPending,
    /// Opening the connection.
    Connecting,
    /// Discovering services and enabling notifications.
    Subscribing,
    /// Heart-rate notifications are flowing.
    Listening,
    /// Tearing down a session or an attempt.
    Disconnecting,
}

impl LifecycleState {
    /// Whether a connection attempt is in progress.
    pub fn is_connecting(&self) -> bool {
        matches!(self, LifecycleState::Connecting | LifecycleState::Subscribing)
    }

    /// Whether the subsystem is at rest with no session, attempt or countdown.
    pub fn is_settled(&self) -> bool {
        matches!(self, LifecycleState::Idle | LifecycleState::Scanning)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Scanning => "scanning",
            LifecycleState::AutoConnectPending => "auto-connect pending",
            LifecycleState::Connecting => "connecting",
            LifecycleState::Subscribing => "subscribing",
            LifecycleState::Listening => "listening",
            LifecycleState::Disconnecting => "disconnecting",
        };
        f.write_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_idle() {
        assert_eq!(LifecycleState::default(), LifecycleState::Idle);
    }

    #[test]
    fn test_predicates() {
        assert!(LifecycleState::Connecting.is_connecting());
        assert!(LifecycleState::Subscribing.is_connecting());
        assert!(!LifecycleState::Listening.is_connecting());
        assert!(LifecycleState::Scanning.is_settled());
        assert!(!LifecycleState::AutoConnectPending.is_settled());
    }

    #[test]
    fn test_display() {
        assert_eq!(LifecycleState::AutoConnectPending.to_string(), "auto-connect pending");
        assert_eq!(LifecycleState::Listening.to_string(), "listening");
    }

    #[test]
    fn test_serialization() {
        let json = serde_json::to_string(&LifecycleState::AutoConnectPending).unwrap();
        assert_eq!(json, "\"auto_connect_pending\"");
    }
}
