//! Monitor configuration.

use std::time::Duration;

use hrlink_types::BluetoothAddress;

use crate::error::{Error, Result};
use crate::supervisor::CountdownOptions;

/// Default timeout for opening a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default timeout for service and characteristic discovery.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for writing a notification-enable descriptor.
pub const DEFAULT_SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for disabling notifications and releasing the link.
pub const DEFAULT_RELEASE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default broadcast channel capacity for events.
pub const DEFAULT_EVENT_CAPACITY: usize = 100;

/// Configuration for a [`HeartRateMonitor`](crate::HeartRateMonitor).
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use hrlink_core::MonitorConfig;
///
/// let config = MonitorConfig::default()
///     .connect_timeout(Duration::from_secs(20))
///     .last_connected("C0:FF:EE:00:00:01".parse().ok());
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Timeout for opening the connection.
    pub connect_timeout: Duration,
    /// Timeout for each service or characteristic enumeration.
    pub discovery_timeout: Duration,
    /// Timeout for each notification-enable descriptor write.
    pub subscribe_timeout: Duration,
    /// Timeout for each teardown step.
    pub release_timeout: Duration,
    /// Auto-reconnect countdown shape.
    pub countdown: CountdownOptions,
    /// Whether rediscovering the last device starts the countdown.
    pub auto_connect: bool,
    /// Address of the last connected device, usually loaded from settings.
    pub last_connected: Option<BluetoothAddress>,
    /// Whether scanning restarts after a disconnect or failed attempt.
    pub resume_scanning: bool,
    /// Event channel capacity.
    pub event_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            subscribe_timeout: DEFAULT_SUBSCRIBE_TIMEOUT,
            release_timeout: DEFAULT_RELEASE_TIMEOUT,
            countdown: CountdownOptions::default(),
            auto_connect: true,
            last_connected: None,
            resume_scanning: true,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl MonitorConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the discovery timeout.
    #[must_use]
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Set the descriptor write timeout.
    #[must_use]
    pub fn subscribe_timeout(mut self, timeout: Duration) -> Self {
        self.subscribe_timeout = timeout;
        self
    }

    /// Set the teardown timeout.
    #[must_use]
    pub fn release_timeout(mut self, timeout: Duration) -> Self {
        self.release_timeout = timeout;
        self
    }

    /// Set the countdown shape.
    #[must_use]
    pub fn countdown(mut self, countdown: CountdownOptions) -> Self {
        self.countdown = countdown;
        self
    }

    /// Enable or disable auto-reconnect.
    #[must_use]
    pub fn auto_connect(mut self, enabled: bool) -> Self {
        self.auto_connect = enabled;
        self
    }

    /// Set the last connected device.
    #[must_use]
    pub fn last_connected(mut self, address: Option<BluetoothAddress>) -> Self {
        self.last_connected = address;
        self
    }

    /// Enable or disable scan resumption after a disconnect.
    #[must_use]
    pub fn resume_scanning(mut self, enabled: bool) -> Self {
        self.resume_scanning = enabled;
        self
    }

    /// Set the event channel capacity.
    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for zero timeouts, an empty countdown
    /// or a zero event capacity.
    pub fn validate(&self) -> Result<()> {
        let timeouts = [
            ("connect_timeout", self.connect_timeout),
            ("discovery_timeout", self.discovery_timeout),
            ("subscribe_timeout", self.subscribe_timeout),
            ("release_timeout", self.release_timeout),
        ];
        for (name, value) in timeouts {
            if value.is_zero() {
                return Err(Error::invalid_config(format!("{name} must be > 0")));
            }
        }
        self.countdown.validate()?;
        if self.event_capacity == 0 {
            return Err(Error::invalid_config("event_capacity must be > 0"));
        }
        Ok(())
    }
}
