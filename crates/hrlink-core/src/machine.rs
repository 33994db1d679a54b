//! Connection state machine.
//!
//! All mutable state sits behind one `std::sync::Mutex` that is never held
//! across an `.await`. Events are broadcast after the guard is released.
//!
//! Lock order: the supervisor's countdown slot is taken before the state
//! lock, never after. Supervisor methods are only called with the state lock
//! released.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use hrlink_types::uuids::{BATTERY_LEVEL, BATTERY_SERVICE, HEART_RATE_MEASUREMENT, HEART_RATE_SERVICE};
use hrlink_types::{BluetoothAddress, decode_battery_level, decode_heart_rate};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::config::MonitorConfig;
use crate::error::{Error, Result};
use crate::events::{DeviceEvent, DisconnectReason, EventDispatcher, EventReceiver};
use crate::registry::{DeviceRegistry, RegisteredDevice};
use crate::state::LifecycleState;
use crate::supervisor::{AutoReconnectSupervisor, ReconnectTarget};
use crate::transport::{
    Advertisement, AdvertisementStream, BleAdapter, BleLink, Notification, NotificationStream,
};

struct ScanTask {
    id: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct PendingAttempt {
    id: u64,
    address: BluetoothAddress,
    cancel: CancellationToken,
    /// Cancelled when the connecting task has released anything it opened.
    finished: CancellationToken,
}

struct Session {
    id: u64,
    address: BluetoothAddress,
    link: Arc<dyn BleLink>,
    battery_characteristic: Option<Uuid>,
    cancel: CancellationToken,
    pump: JoinHandle<()>,
}

enum Teardown {
    Session(Session),
    Attempt(PendingAttempt),
}

impl Teardown {
    fn address(&self) -> BluetoothAddress {
        match self {
            Teardown::Session(session) => session.address,
            Teardown::Attempt(attempt) => attempt.address,
        }
    }
}

/// Result of a successful connect-discover-subscribe sequence.
struct Established {
    link: Arc<dyn BleLink>,
    battery_characteristic: Option<Uuid>,
    notifications: NotificationStream,
}

#[derive(Default)]
struct Inner {
    lifecycle: LifecycleState,
    registry: DeviceRegistry,
    scan: Option<ScanTask>,
    attempt: Option<PendingAttempt>,
    session: Option<Session>,
    /// Device whose link is still being released after teardown.
    releasing: Option<BluetoothAddress>,
    heart_rate: u16,
    battery_level: u8,
    last_connected: Option<BluetoothAddress>,
}

impl Inner {
    fn can_connect(&self) -> bool {
        self.session.is_none() && self.attempt.is_none() && self.releasing.is_none()
    }

    /// Settle unless a newer attempt or session has taken over.
    fn settle_if_free(&mut self) {
        if self.can_connect() {
            self.settle();
        }
    }

    /// Return to the resting state after a session, attempt or countdown ends.
    fn settle(&mut self) {
        self.lifecycle = if self.scan.is_some() {
            LifecycleState::Scanning
        } else {
            LifecycleState::Idle
        };
    }
}

async fn with_timeout<T>(
    operation: &str,
    duration: Duration,
    future: impl Future<Output = Result<T>>,
) -> Result<T> {
    timeout(duration, future)
        .await
        .map_err(|_| Error::timeout(operation, duration))?
}

pub(crate) struct StateMachine {
    me: Weak<StateMachine>,
    adapter: Arc<dyn BleAdapter>,
    config: MonitorConfig,
    events: EventDispatcher,
    supervisor: AutoReconnectSupervisor,
    inner: Mutex<Inner>,
    /// Serializes watcher start and stop.
    scan_lock: tokio::sync::Mutex<()>,
    next_id: AtomicU64,
}

impl StateMachine {
    pub(crate) fn new(adapter: Arc<dyn BleAdapter>, config: MonitorConfig) -> Arc<Self> {
        Arc::new_cyclic(|me| StateMachine {
            me: me.clone(),
            adapter,
            events: EventDispatcher::new(config.event_capacity),
            supervisor: AutoReconnectSupervisor::new(config.countdown),
            inner: Mutex::new(Inner {
                last_connected: config.last_connected,
                ..Inner::default()
            }),
            scan_lock: tokio::sync::Mutex::new(()),
            next_id: AtomicU64::new(1),
            config,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle(&self) -> Option<Arc<Self>> {
        self.me.upgrade()
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    // --- Accessors ---

    pub(crate) fn subscribe_events(&self) -> EventReceiver {
        self.events.subscribe()
    }

    pub(crate) fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub(crate) fn lifecycle(&self) -> LifecycleState {
        self.lock().lifecycle
    }

    pub(crate) fn heart_rate(&self) -> u16 {
        self.lock().heart_rate
    }

    pub(crate) fn battery_level(&self) -> u8 {
        self.lock().battery_level
    }

    pub(crate) fn is_listening(&self) -> bool {
        self.lock().session.is_some()
    }

    pub(crate) fn can_connect(&self) -> bool {
        self.lock().can_connect()
    }

    pub(crate) fn is_scanning(&self) -> bool {
        self.lock().scan.is_some()
    }

    pub(crate) fn connected_address(&self) -> Option<BluetoothAddress> {
        self.lock().session.as_ref().map(|session| session.address)
    }

    pub(crate) fn discovered_devices(&self) -> Vec<RegisteredDevice> {
        self.lock().registry.snapshot()
    }

    pub(crate) fn last_connected(&self) -> Option<BluetoothAddress> {
        self.lock().last_connected
    }

    pub(crate) fn set_last_connected(&self, address: Option<BluetoothAddress>) {
        self.lock().last_connected = address;
    }

    pub(crate) fn supervisor(&self) -> &AutoReconnectSupervisor {
        &self.supervisor
    }

    // --- Scanning ---

    pub(crate) async fn start_scanning(&self) {
        let _scan_guard = self.scan_lock.lock().await;
        let already_scanning = self.lock().scan.is_some();
        if already_scanning {
            debug!("Already scanning");
            return;
        }
        let Some(machine) = self.handle() else {
            return;
        };

        self.lock().registry.clear();
        let stream = match self.adapter.start_scan().await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Failed to start scanning: {}", e);
                self.events.send(DeviceEvent::AdapterError {
                    message: e.to_string(),
                });
                return;
            }
        };

        let id = self.next_id();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(scan_loop(machine, id, stream, cancel.clone()));
        {
            let mut inner = self.lock();
            inner.scan = Some(ScanTask { id, cancel, handle });
            if inner.lifecycle.is_settled() {
                inner.lifecycle = LifecycleState::Scanning;
            }
        }
        info!("Scanning for heart-rate sensors");
    }

    pub(crate) async fn stop_scanning(&self) {
        let _scan_guard = self.scan_lock.lock().await;
        let task = {
            let mut inner = self.lock();
            let task = inner.scan.take();
            if task.is_some() && inner.lifecycle == LifecycleState::Scanning {
                inner.lifecycle = LifecycleState::Idle;
            }
            task
        };
        let Some(task) = task else {
            return;
        };

        task.cancel.cancel();
        if let Err(e) = task.handle.await {
            debug!("Scan task ended abnormally: {}", e);
        }
        if let Err(e) = self.adapter.stop_scan().await {
            warn!("Failed to stop scanning: {}", e);
        }
        info!("Scanning stopped");
    }

    fn scan_ended(&self, id: u64) {
        let ended = {
            let mut inner = self.lock();
            let current = inner.scan.as_ref().is_some_and(|task| task.id == id);
            if current {
                inner.scan = None;
                if inner.lifecycle == LifecycleState::Scanning {
                    inner.lifecycle = LifecycleState::Idle;
                }
            }
            current
        };
        if ended {
            warn!("Advertisement watcher stopped unexpectedly");
            self.events.send(DeviceEvent::AdapterError {
                message: "Advertisement watcher stopped".to_string(),
            });
        }
    }

    pub(crate) fn handle_advertisement(&self, advertisement: Advertisement) {
        if !advertisement.advertises(HEART_RATE_SERVICE) {
            trace!("Ignoring {} without heart-rate service", advertisement.address);
            return;
        }
        let Advertisement { address, name, .. } = advertisement;

        let arm = {
            let mut inner = self.lock();
            if !inner.registry.insert(address, name.clone()) {
                return;
            }
            let arm = self.config.auto_connect
                && inner.last_connected == Some(address)
                && inner.can_connect()
                && inner.lifecycle == LifecycleState::Scanning;
            if arm {
                inner.lifecycle = LifecycleState::AutoConnectPending;
            }
            arm
        };

        info!(
            "Found heart-rate sensor {} ({})",
            address,
            name.as_deref().unwrap_or("unnamed")
        );
        self.events.send(DeviceEvent::DeviceFound { address, name });

        if arm && let Some(target) = self.handle() {
            self.supervisor.arm(address, target);
        }
    }

    // --- Connecting ---

    /// Run the connect, discover and subscribe sequence for `address`.
    #[tracing::instrument(skip_all, fields(address = %address))]
    pub(crate) async fn connect(&self, address: BluetoothAddress) -> Result<()> {
        let (id, cancel, finished) = {
            let mut inner = self.lock();
            if !inner.can_connect() {
                return Err(Error::SessionActive);
            }
            let id = self.next_id();
            let cancel = CancellationToken::new();
            let finished = CancellationToken::new();
            inner.attempt = Some(PendingAttempt {
                id,
                address,
                cancel: cancel.clone(),
                finished: finished.clone(),
            });
            inner.lifecycle = LifecycleState::Connecting;
            (id, cancel, finished)
        };
        // Teardown of this attempt waits on the guard, which also fires if
        // the caller drops this future
        let _finished = finished.drop_guard();
        info!("Connecting to {}", address);
        self.events.send(DeviceEvent::DeviceConnecting { address });

        match self.establish(id, address, &cancel).await {
            Ok(established) => self.finish_connect(id, address, established).await,
            Err(e) => self.abort_connect(id, address, e).await,
        }
    }

    /// Open the link and subscribe. Any link opened here is released before
    /// an error is returned.
    async fn establish(
        &self,
        id: u64,
        address: BluetoothAddress,
        cancel: &CancellationToken,
    ) -> Result<Established> {
        // Not raced against cancellation: dropping a pending open can leave
        // the peripheral connected with nothing left to release it
        let link = with_timeout(
            "open connection",
            self.config.connect_timeout,
            self.adapter.open(address),
        )
        .await?;

        if cancel.is_cancelled() || !self.mark_subscribing(id) {
            self.release_link(link.as_ref()).await;
            return Err(Error::Cancelled);
        }

        let subscribed = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = self.subscribe_link(link.as_ref()) => result,
        };
        match subscribed {
            Ok((battery_characteristic, notifications)) => Ok(Established {
                link,
                battery_characteristic,
                notifications,
            }),
            Err(e) => {
                self.release_link(link.as_ref()).await;
                Err(e)
            }
        }
    }

    /// Discover the heart-rate service and enable its notifications, then
    /// try the battery service.
    async fn subscribe_link(&self, link: &dyn BleLink) -> Result<(Option<Uuid>, NotificationStream)> {
        debug!("Discovering services");
        let services = with_timeout(
            "discover services",
            self.config.discovery_timeout,
            link.discover_services(),
        )
        .await?;
        if !services.contains(&HEART_RATE_SERVICE) {
            return Err(Error::ServiceNotFound {
                uuid: HEART_RATE_SERVICE,
            });
        }

        let characteristics = with_timeout(
            "discover characteristics",
            self.config.discovery_timeout,
            link.discover_characteristics(HEART_RATE_SERVICE),
        )
        .await?;
        if !characteristics.contains(&HEART_RATE_MEASUREMENT) {
            return Err(Error::characteristic_not_found(
                HEART_RATE_MEASUREMENT,
                services.len(),
            ));
        }

        // Attach to the value stream before enabling so the first frame is kept
        let notifications = with_timeout(
            "attach notification stream",
            self.config.subscribe_timeout,
            link.notifications(),
        )
        .await?;
        with_timeout(
            "enable heart-rate notifications",
            self.config.subscribe_timeout,
            link.enable_notifications(HEART_RATE_MEASUREMENT),
        )
        .await?;

        let battery_characteristic = self.subscribe_battery(link, &services).await;
        Ok((battery_characteristic, notifications))
    }

    /// Move the attempt to `Subscribing`. Returns `false` if the attempt was
    /// torn down while the link was opening.
    fn mark_subscribing(&self, id: u64) -> bool {
        let mut inner = self.lock();
        let current = inner.attempt.as_ref().is_some_and(|attempt| attempt.id == id);
        if current && inner.lifecycle.is_connecting() {
            inner.lifecycle = LifecycleState::Subscribing;
        }
        current
    }

    /// Battery reporting is optional; any failure here is logged and ignored.
    async fn subscribe_battery(&self, link: &dyn BleLink, services: &[Uuid]) -> Option<Uuid> {
        if !services.contains(&BATTERY_SERVICE) {
            debug!("No battery service");
            return None;
        }

        match with_timeout(
            "discover battery characteristics",
            self.config.discovery_timeout,
            link.discover_characteristics(BATTERY_SERVICE),
        )
        .await
        {
            Ok(characteristics) if characteristics.contains(&BATTERY_LEVEL) => {}
            Ok(_) => {
                debug!("No battery level characteristic");
                return None;
            }
            Err(e) => {
                debug!("Battery discovery failed: {}", e);
                return None;
            }
        }

        match with_timeout(
            "enable battery notifications",
            self.config.subscribe_timeout,
            link.enable_notifications(BATTERY_LEVEL),
        )
        .await
        {
            Ok(()) => Some(BATTERY_LEVEL),
            Err(e) => {
                debug!("Battery notifications unavailable: {}", e);
                None
            }
        }
    }

    async fn finish_connect(
        &self,
        id: u64,
        address: BluetoothAddress,
        established: Established,
    ) -> Result<()> {
        let Established {
            link,
            battery_characteristic,
            notifications,
        } = established;

        let started = match self.handle() {
            Some(machine) => {
                let mut inner = self.lock();
                let current = inner
                    .attempt
                    .as_ref()
                    .is_some_and(|attempt| attempt.id == id && !attempt.cancel.is_cancelled());
                if current {
                    inner.attempt = None;
                    let cancel = CancellationToken::new();
                    let pump = tokio::spawn(pump_notifications(
                        machine,
                        id,
                        notifications,
                        battery_characteristic,
                        cancel.clone(),
                    ));
                    inner.session = Some(Session {
                        id,
                        address,
                        link: Arc::clone(&link),
                        battery_characteristic,
                        cancel,
                        pump,
                    });
                    inner.lifecycle = LifecycleState::Listening;
                    inner.last_connected = Some(address);
                }
                current
            }
            None => false,
        };

        if !started {
            self.release_link(link.as_ref()).await;
            return Err(Error::Cancelled);
        }

        info!(
            "Listening to {} (battery: {})",
            address,
            if battery_characteristic.is_some() { "yes" } else { "no" }
        );
        self.events.send(DeviceEvent::DeviceConnected { address });
        self.stop_scanning().await;
        Ok(())
    }

    /// Clear a failed attempt. The link, if any, was already released by
    /// [`establish`](Self::establish).
    async fn abort_connect(&self, id: u64, address: BluetoothAddress, error: Error) -> Result<()> {
        let (owned, resume) = {
            let mut inner = self.lock();
            let owned = inner.attempt.as_ref().is_some_and(|attempt| attempt.id == id);
            if owned {
                inner.attempt = None;
                inner.settle_if_free();
            }
            (owned, self.config.resume_scanning && inner.can_connect())
        };

        if owned && !matches!(error, Error::Cancelled) {
            warn!("Connection to {} failed: {}", address, error);
            let message = error.to_string();
            self.events.send(if error.is_adapter_error() {
                DeviceEvent::AdapterError { message }
            } else {
                DeviceEvent::DeviceError {
                    address: Some(address),
                    message,
                }
            });
            if resume {
                self.start_scanning().await;
            }
        }
        Err(error)
    }

    // --- Notifications ---

    fn handle_notification(&self, notification: Notification, battery: Option<Uuid>) {
        if notification.characteristic == HEART_RATE_MEASUREMENT {
            self.handle_heart_rate(&notification.value);
        } else if Some(notification.characteristic) == battery {
            self.handle_battery_level(&notification.value);
        } else {
            trace!(
                "Ignoring notification from {}",
                notification.characteristic
            );
        }
    }

    /// Decode a heart-rate payload and publish it if the displayed value changed.
    pub(crate) fn handle_heart_rate(&self, payload: &[u8]) -> Option<u16> {
        let value = match display_heart_rate(payload) {
            Ok(value) => value,
            Err(e) => {
                trace!("Ignoring heart-rate frame {:02X?}: {}", payload, e);
                return None;
            }
        };

        let changed = {
            let mut inner = self.lock();
            let changed = inner.heart_rate != value;
            inner.heart_rate = value;
            changed
        };
        if !changed {
            return None;
        }
        debug!("Heart rate {} bpm", value);
        self.events.send(DeviceEvent::HeartRateUpdated { value });
        Some(value)
    }

    /// Decode a battery payload and publish it if the level changed.
    pub(crate) fn handle_battery_level(&self, payload: &[u8]) -> Option<u8> {
        let value = match decode_battery_level(payload) {
            Ok(value) => value,
            Err(e) => {
                trace!("Ignoring battery frame: {}", e);
                return None;
            }
        };

        let changed = {
            let mut inner = self.lock();
            let changed = inner.battery_level != value;
            inner.battery_level = value;
            changed
        };
        if !changed {
            return None;
        }
        debug!("Battery {}%", value);
        self.events.send(DeviceEvent::BatteryLevelUpdated { value });
        Some(value)
    }

    async fn connection_lost(&self, id: u64) {
        let address = {
            let inner = self.lock();
            match inner.session.as_ref() {
                Some(session) if session.id == id => session.address,
                _ => return,
            }
        };
        warn!("Lost connection to {}", address);
        self.events.send(DeviceEvent::DeviceError {
            address: Some(address),
            message: "connection lost".to_string(),
        });
        let resume = self.config.resume_scanning;
        if let Err(e) = self
            .teardown(DisconnectReason::ConnectionLost, resume, Some(id))
            .await
        {
            debug!("Session {} already torn down: {}", id, e);
        }
    }

    // --- Teardown ---

    pub(crate) async fn unsubscribe(&self) -> Result<()> {
        self.teardown(
            DisconnectReason::UserRequested,
            self.config.resume_scanning,
            None,
        )
        .await
    }

    /// Tear down the session, or abort the in-flight attempt.
    ///
    /// With `only` set, nothing happens unless the session or attempt has
    /// that id.
    async fn teardown(
        &self,
        reason: DisconnectReason,
        resume_scanning: bool,
        only: Option<u64>,
    ) -> Result<()> {
        let target = {
            let mut inner = self.lock();
            let session_matches = inner
                .session
                .as_ref()
                .is_some_and(|session| only.is_none_or(|id| session.id == id));
            let attempt_matches = inner
                .attempt
                .as_ref()
                .is_some_and(|attempt| only.is_none_or(|id| attempt.id == id));

            let target = if session_matches {
                inner.session.take().map(Teardown::Session)
            } else if attempt_matches {
                inner.attempt.take().map(Teardown::Attempt)
            } else {
                None
            };
            let Some(target) = target else {
                return Err(Error::NotConnected);
            };
            if let Teardown::Attempt(attempt) = &target {
                attempt.cancel.cancel();
            }
            // Keeps can_connect false until the link is gone
            inner.releasing = Some(target.address());
            inner.lifecycle = LifecycleState::Disconnecting;
            target
        };

        let address = target.address();
        info!("Disconnecting from {} ({})", address, reason);
        self.events
            .send(DeviceEvent::DeviceDisconnecting { address });

        match target {
            Teardown::Session(session) => {
                // Detach the callbacks before touching the link
                session.cancel.cancel();
                if let Err(e) = session.pump.await {
                    debug!("Notification task ended abnormally: {}", e);
                }
                let link = session.link.as_ref();
                self.disable_quietly(link, HEART_RATE_MEASUREMENT).await;
                if let Some(battery) = session.battery_characteristic {
                    self.disable_quietly(link, battery).await;
                }
                self.release_link(link).await;
            }
            Teardown::Attempt(attempt) => {
                // The connecting task releases whatever it opened
                attempt.finished.cancelled().await;
            }
        }

        let resume = {
            let mut inner = self.lock();
            inner.releasing = None;
            inner.settle_if_free();
            resume_scanning && inner.can_connect()
        };
        self.events
            .send(DeviceEvent::DeviceDisconnected { address, reason });

        if resume {
            self.start_scanning().await;
        }
        Ok(())
    }

    async fn disable_quietly(&self, link: &dyn BleLink, characteristic: Uuid) {
        let result = with_timeout(
            "disable notifications",
            self.config.release_timeout,
            link.disable_notifications(characteristic),
        )
        .await;
        if let Err(e) = result {
            debug!("Could not disable {} on {}: {}", characteristic, link.address(), e);
        }
    }

    async fn release_link(&self, link: &dyn BleLink) {
        let result = with_timeout(
            "release device",
            self.config.release_timeout,
            link.release(),
        )
        .await;
        match result {
            Ok(()) => debug!("Released {}", link.address()),
            Err(e) => warn!("Failed to release {}: {}", link.address(), e),
        }
    }

    pub(crate) async fn shutdown(&self) {
        self.supervisor.disarm();
        if self
            .teardown(DisconnectReason::Shutdown, false, None)
            .await
            .is_ok()
        {
            debug!("Session closed for shutdown");
        }
        self.stop_scanning().await;
        self.lock().settle_if_free();
        info!("Heart-rate monitor shut down");
    }
}

#[async_trait]
impl ReconnectTarget for StateMachine {
    fn countdown_tick(&self, address: BluetoothAddress, remaining: u32) {
        debug!("Auto-connect to {} in {}", address, remaining);
        self.events
            .send(DeviceEvent::AutoConnectCountdown { address, remaining });
    }

    fn countdown_cancelled(&self, address: BluetoothAddress) {
        {
            let mut inner = self.lock();
            if inner.lifecycle == LifecycleState::AutoConnectPending {
                inner.settle();
            }
        }
        self.events.send(DeviceEvent::DeviceDisconnected {
            address,
            reason: DisconnectReason::AutoConnectCancelled,
        });
    }

    async fn reconnect(&self, address: BluetoothAddress) {
        if let Err(e) = self.connect(address).await {
            debug!("Auto-connect to {} did not complete: {}", address, e);
        }
    }
}

fn display_heart_rate(payload: &[u8]) -> Result<u16> {
    Ok(decode_heart_rate(payload)?.display_rate())
}

async fn scan_loop(
    machine: Arc<StateMachine>,
    id: u64,
    mut stream: AdvertisementStream,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = stream.next() => match next {
                Some(advertisement) => machine.handle_advertisement(advertisement),
                None => {
                    machine.scan_ended(id);
                    break;
                }
            },
        }
    }
}

async fn pump_notifications(
    machine: Arc<StateMachine>,
    id: u64,
    mut stream: NotificationStream,
    battery: Option<Uuid>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = stream.next() => match next {
                Some(notification) => machine.handle_notification(notification, battery),
                None => {
                    // Teardown joins this task, so it has to run elsewhere
                    let lost = Arc::clone(&machine);
                    tokio::spawn(async move { lost.connection_lost(id).await });
                    break;
                }
            },
        }
    }
}
