//! Auto-reconnect countdown.
//!
//! When the last connected sensor is seen again, the supervisor counts down
//! before reconnecting so the user can pick another sensor or stay idle.
//! Ticks and cancellation are serialized through one lock, so once
//! [`AutoReconnectSupervisor::cancel`] returns no further tick is delivered.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use hrlink_types::BluetoothAddress;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Shape of the countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountdownOptions {
    /// Number of ticks before reconnecting.
    pub steps: u32,
    /// Delay after each tick.
    pub interval: Duration,
}

impl Default for CountdownOptions {
    fn default() -> Self {
        Self {
            steps: 3,
            interval: Duration::from_secs(1),
        }
    }
}

impl CountdownOptions {
    /// Create countdown options.
    pub fn new(steps: u32, interval: Duration) -> Self {
        Self { steps, interval }
    }

    /// Total time from the first tick to the reconnect.
    pub fn total(&self) -> Duration {
        self.interval * self.steps
    }

    /// Validate the options.
    pub fn validate(&self) -> Result<()> {
        if self.steps == 0 {
            return Err(Error::invalid_config("countdown steps must be > 0"));
        }
        if self.interval.is_zero() {
            return Err(Error::invalid_config("countdown interval must be > 0"));
        }
        Ok(())
    }
}

/// Receiver of countdown progress.
#[async_trait]
pub trait ReconnectTarget: Send + Sync {
    /// A tick with this many steps left, counting down to 1.
    fn countdown_tick(&self, address: BluetoothAddress, remaining: u32);

    /// The user cancelled the countdown.
    fn countdown_cancelled(&self, address: BluetoothAddress);

    /// The countdown elapsed.
    async fn reconnect(&self, address: BluetoothAddress);
}

struct ActiveCountdown {
    id: u64,
    address: BluetoothAddress,
    cancel: CancellationToken,
    target: Arc<dyn ReconnectTarget>,
}

type Slot = Arc<Mutex<Option<ActiveCountdown>>>;

fn lock(slot: &Mutex<Option<ActiveCountdown>>) -> MutexGuard<'_, Option<ActiveCountdown>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs at most one reconnect countdown at a time.
pub struct AutoReconnectSupervisor {
    options: CountdownOptions,
    active: Slot,
    next_id: AtomicU64,
}

impl AutoReconnectSupervisor {
    /// Create a supervisor.
    pub fn new(options: CountdownOptions) -> Self {
        Self {
            options,
            active: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(1),
        }
    }

    /// The countdown shape.
    pub fn options(&self) -> CountdownOptions {
        self.options
    }

    /// Whether a countdown is running.
    pub fn is_active(&self) -> bool {
        lock(&self.active).is_some()
    }

    /// Address the running countdown will reconnect to.
    pub fn active_address(&self) -> Option<BluetoothAddress> {
        lock(&self.active).as_ref().map(|active| active.address)
    }

    /// Start a countdown for `address`.
    ///
    /// Returns `false`, and does nothing, if a countdown is already running.
    /// Must be called from within a tokio runtime.
    pub fn arm(&self, address: BluetoothAddress, target: Arc<dyn ReconnectTarget>) -> bool {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        {
            let mut active = lock(&self.active);
            if active.is_some() {
                debug!("Countdown already running, ignoring {}", address);
                return false;
            }
            *active = Some(ActiveCountdown {
                id,
                address,
                cancel: cancel.clone(),
                target: Arc::clone(&target),
            });
        }

        info!(
            "Auto-connecting to {} in {:?}",
            address,
            self.options.total()
        );
        let slot = Arc::clone(&self.active);
        let options = self.options;
        tokio::spawn(async move {
            if run_countdown(&slot, id, address, options, &cancel, target.as_ref()).await {
                target.reconnect(address).await;
            }
        });
        true
    }

    /// Cancel the running countdown on behalf of the user.
    ///
    /// The target is told through
    /// [`countdown_cancelled`](ReconnectTarget::countdown_cancelled) before
    /// this returns. Returns `false` if nothing was running.
    pub fn cancel(&self) -> bool {
        let taken = {
            let mut active = lock(&self.active);
            let taken = active.take();
            if let Some(countdown) = &taken {
                countdown.cancel.cancel();
            }
            taken
        };
        match taken {
            Some(countdown) => {
                info!("Auto-connect to {} cancelled", countdown.address);
                countdown.target.countdown_cancelled(countdown.address);
                true
            }
            None => false,
        }
    }

    /// Stop the running countdown without notifying the target.
    pub fn disarm(&self) -> bool {
        let mut active = lock(&self.active);
        match active.take() {
            Some(countdown) => {
                debug!("Auto-connect to {} disarmed", countdown.address);
                countdown.cancel.cancel();
                true
            }
            None => false,
        }
    }
}

impl Drop for AutoReconnectSupervisor {
    fn drop(&mut self) {
        if let Some(countdown) = lock(&self.active).take() {
            countdown.cancel.cancel();
        }
    }
}

/// Deliver ticks until the countdown elapses or is cancelled.
///
/// Returns `true` if the countdown completed, in which case the slot has
/// already been cleared.
async fn run_countdown(
    slot: &Slot,
    id: u64,
    address: BluetoothAddress,
    options: CountdownOptions,
    cancel: &CancellationToken,
    target: &dyn ReconnectTarget,
) -> bool {
    for remaining in (1..=options.steps).rev() {
        {
            let _guard = lock(slot);
            if cancel.is_cancelled() {
                return false;
            }
            target.countdown_tick(address, remaining);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return false,
            _ = tokio::time::sleep(options.interval) => {}
        }
    }

    let mut active = lock(slot);
    if cancel.is_cancelled() {
        return false;
    }
    if active.as_ref().is_some_and(|countdown| countdown.id == id) {
        *active = None;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[derive(Default)]
    struct Recorder {
        ticks: Mutex<Vec<u32>>,
        cancelled: AtomicU32,
        reconnects: AtomicU32,
    }

    #[async_trait]
    impl ReconnectTarget for Recorder {
        fn countdown_tick(&self, _address: BluetoothAddress, remaining: u32) {
            self.ticks.lock().unwrap().push(remaining);
        }

        fn countdown_cancelled(&self, _address: BluetoothAddress) {
            self.cancelled.fetch_add(1, Ordering::SeqCst);
        }

        async fn reconnect(&self, _address: BluetoothAddress) {
            self.reconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn address() -> BluetoothAddress {
        BluetoothAddress::new(0x00AA_BBCC_DDEE)
    }

    #[test]
    fn test_countdown_options_default() {
        let options = CountdownOptions::default();
        assert_eq!(options.steps, 3);
        assert_eq!(options.total(), Duration::from_secs(3));
        assert!(options.validate().is_ok());
        assert!(CountdownOptions::new(3, Duration::ZERO).validate().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_runs_to_completion() {
        let supervisor = AutoReconnectSupervisor::new(CountdownOptions::default());
        let recorder = Arc::new(Recorder::default());

        assert!(supervisor.arm(address(), recorder.clone()));
        assert!(supervisor.is_active());
        assert_eq!(supervisor.active_address(), Some(address()));

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(*recorder.ticks.lock().unwrap(), vec![3, 2, 1]);
        assert_eq!(recorder.reconnects.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(recorder.reconnects.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.cancelled.load(Ordering::SeqCst), 0);
        assert!(!supervisor.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_ticks_and_reconnect() {
        let supervisor = AutoReconnectSupervisor::new(CountdownOptions::default());
        let recorder = Arc::new(Recorder::default());

        supervisor.arm(address(), recorder.clone());
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(*recorder.ticks.lock().unwrap(), vec![3, 2]);

        assert!(supervisor.cancel());
        assert_eq!(recorder.cancelled.load(Ordering::SeqCst), 1);
        assert!(!supervisor.is_active());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(*recorder.ticks.lock().unwrap(), vec![3, 2]);
        assert_eq!(recorder.reconnects.load(Ordering::SeqCst), 0);
        assert!(!supervisor.cancel());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_arm_is_ignored() {
        let supervisor = AutoReconnectSupervisor::new(CountdownOptions::default());
        let recorder = Arc::new(Recorder::default());

        assert!(supervisor.arm(address(), recorder.clone()));
        assert!(!supervisor.arm(BluetoothAddress::new(7), recorder.clone()));
        assert_eq!(supervisor.active_address(), Some(address()));

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(recorder.reconnects.load(Ordering::SeqCst), 1);
        assert_eq!(*recorder.ticks.lock().unwrap(), vec![3, 2, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarm_is_silent() {
        let supervisor = AutoReconnectSupervisor::new(CountdownOptions::default());
        let recorder = Arc::new(Recorder::default());

        supervisor.arm(address(), recorder.clone());
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(supervisor.disarm());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(recorder.cancelled.load(Ordering::SeqCst), 0);
        assert_eq!(recorder.reconnects.load(Ordering::SeqCst), 0);
        assert_eq!(*recorder.ticks.lock().unwrap(), vec![3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_can_rearm_after_completion() {
        let supervisor = AutoReconnectSupervisor::new(CountdownOptions::new(
            1,
            Duration::from_millis(100),
        ));
        let recorder = Arc::new(Recorder::default());

        supervisor.arm(address(), recorder.clone());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(supervisor.arm(address(), recorder.clone()));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(recorder.reconnects.load(Ordering::SeqCst), 2);
    }
}
