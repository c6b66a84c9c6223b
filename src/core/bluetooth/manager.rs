//! Bluetooth manager for the sensor band
//! This module provides the main interface for bluetooth operations.
//!
//! [`BluetoothManager`] is a cheap, cloneable handle. All work happens on one
//! driver task that owns the scanner and the session state machine; backend
//! completions are posted back into the same queue as caller commands, so
//! state is only ever mutated from that task.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{ConnectionConfig, ReconnectPolicy};
use crate::core::bluetooth::backend::GattBackend;
use crate::core::bluetooth::connection::{ConnectionStateMachine, GattEvent, GattRequest};
use crate::core::bluetooth::constants::BLUETOOTH_OPERATION_TIMEOUT_SECS;
use crate::core::bluetooth::error::BleError;
use crate::core::bluetooth::notification::NotificationHandler;
use crate::core::bluetooth::scanner::{run_scan_task, BluetoothScanner, ScanEvent, ScanState};
use crate::core::bluetooth::types::{
    ChannelTag, ConnectionState, DecodedSample, PeripheralRef, ScanFilter, SessionId,
};
use crate::core::stream::{ChannelListener, ListenerToken};

#[derive(Debug)]
enum Command {
    StartScan(Option<ScanFilter>),
    StopScan,
    Connect(String),
    Disconnect,
    Reset,
    Shutdown,
}

#[derive(Debug)]
enum Input {
    Command(Command),
    Scan(ScanEvent),
    Gatt(GattEvent),
    Notification {
        session: SessionId,
        characteristic: Uuid,
        value: Vec<u8>,
        received_at: DateTime<Utc>,
    },
}

/// Posts from background tasks without keeping the driver alive
#[derive(Clone)]
struct Poster(mpsc::WeakUnboundedSender<Input>);

impl Poster {
    fn post(&self, input: Input) -> bool {
        match self.0.upgrade() {
            Some(tx) => tx.send(input).is_ok(),
            None => false,
        }
    }
}

/// Manages Bluetooth operations
#[derive(Clone)]
pub struct BluetoothManager {
    /// Queue into the driver task
    tx: mpsc::UnboundedSender<Input>,
    /// Current connection state
    connection_state: watch::Receiver<ConnectionState>,
    /// Current scan state
    scan_state: watch::Receiver<ScanState>,
    /// Discovered devices, strongest signal first
    devices: watch::Receiver<Vec<PeripheralRef>>,
    /// Stream pipeline shared with the driver
    notification_handler: Arc<Mutex<NotificationHandler>>,
}

impl BluetoothManager {
    /// Spawns the driver task on the current runtime.
    pub fn spawn(
        backend: Arc<dyn GattBackend>,
        config: ConnectionConfig,
        notification_handler: NotificationHandler,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, connection_state) = watch::channel(ConnectionState::Idle);
        let (scan_state_tx, scan_state) = watch::channel(ScanState::Idle);
        let (devices_tx, devices) = watch::channel(Vec::new());
        let notification_handler = Arc::new(Mutex::new(notification_handler));

        let driver = SessionDriver {
            backend,
            machine: ConnectionStateMachine::new(config.target()),
            scanner: BluetoothScanner::new(config.scan_filter()),
            config,
            notification_handler: notification_handler.clone(),
            poster: Poster(tx.downgrade()),
            state_tx,
            scan_state_tx,
            devices_tx,
            session_token: None,
            pending_release: None,
        };
        let handle = tokio::spawn(driver.run(rx));

        (
            Self {
                tx,
                connection_state,
                scan_state,
                devices,
                notification_handler,
            },
            handle,
        )
    }

    /// Starts discovery. `None` uses the configured default filter.
    pub fn start_scan(&self, filter: Option<ScanFilter>) -> Result<(), BleError> {
        self.send(Command::StartScan(filter))
    }

    pub fn stop_scan(&self) -> Result<(), BleError> {
        self.send(Command::StopScan)
    }

    /// Requests a session with `address`.
    ///
    /// `Ok` means the request was accepted, not that the link is up; watch
    /// [`BluetoothManager::watch_state`] for the outcome.
    pub fn connect(&self, address: impl Into<String>) -> Result<(), BleError> {
        if let ConnectionState::Error(error) = &*self.connection_state.borrow() {
            return Err(BleError::InvalidState(format!(
                "session is in error ({}); reset before connecting",
                error
            )));
        }
        self.send(Command::Connect(address.into()))
    }

    pub fn disconnect(&self) -> Result<(), BleError> {
        self.send(Command::Disconnect)
    }

    /// Clears an error so a new connection can be made.
    pub fn reset(&self) -> Result<(), BleError> {
        self.send(Command::Reset)
    }

    /// Stops scanning, releases the session and ends the driver task.
    pub fn shutdown(&self) -> Result<(), BleError> {
        self.send(Command::Shutdown)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection_state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection_state.clone()
    }

    pub fn scan_state(&self) -> ScanState {
        self.scan_state.borrow().clone()
    }

    pub fn watch_scan_state(&self) -> watch::Receiver<ScanState> {
        self.scan_state.clone()
    }

    pub fn devices(&self) -> Vec<PeripheralRef> {
        self.devices.borrow().clone()
    }

    pub fn watch_devices(&self) -> watch::Receiver<Vec<PeripheralRef>> {
        self.devices.clone()
    }

    /// Registers the listener for `channel`, replacing the current one.
    pub fn subscribe<L: ChannelListener + 'static>(
        &self,
        channel: ChannelTag,
        listener: L,
    ) -> ListenerToken {
        self.handler().subscribe(channel, listener)
    }

    pub fn unsubscribe(&self, token: ListenerToken) -> bool {
        self.handler().unsubscribe(token)
    }

    pub fn latest_sample(&self, channel: ChannelTag) -> Option<DecodedSample> {
        self.handler().latest_sample(channel).cloned()
    }

    /// Direct access to the stream pipeline, e.g. to register analyzers.
    pub fn notification_handler(&self) -> Arc<Mutex<NotificationHandler>> {
        self.notification_handler.clone()
    }

    fn handler(&self) -> std::sync::MutexGuard<'_, NotificationHandler> {
        self.notification_handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn send(&self, command: Command) -> Result<(), BleError> {
        self.tx
            .send(Input::Command(command))
            .map_err(|_| BleError::Closed)
    }
}

/// The single writer of session and scan state
struct SessionDriver {
    backend: Arc<dyn GattBackend>,
    config: ConnectionConfig,
    machine: ConnectionStateMachine,
    scanner: BluetoothScanner,
    notification_handler: Arc<Mutex<NotificationHandler>>,
    poster: Poster,
    state_tx: watch::Sender<ConnectionState>,
    scan_state_tx: watch::Sender<ScanState>,
    devices_tx: watch::Sender<Vec<PeripheralRef>>,
    /// Cancels the live session's background tasks
    session_token: Option<CancellationToken>,
    /// Backend disconnect of the last released session, if still running
    pending_release: Option<JoinHandle<()>>,
}

impl SessionDriver {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Input>) {
        info!("Bluetooth driver started.");
        while let Some(input) = rx.recv().await {
            match input {
                Input::Command(Command::Shutdown) => break,
                Input::Command(command) => self.on_command(command).await,
                Input::Scan(event) => self.on_scan_event(event).await,
                Input::Gatt(event) => self.on_gatt_event(event).await,
                Input::Notification {
                    session,
                    characteristic,
                    value,
                    received_at,
                } => self.on_notification(session, characteristic, &value, received_at),
            }
            self.publish();
        }

        self.stop_scan();
        let requests = self.machine.disconnect();
        self.execute(requests).await;
        self.publish();
        self.settle_release().await;
        info!("Bluetooth driver stopped.");
    }

    async fn on_command(&mut self, command: Command) {
        debug!("Command: {:?}", command);
        match command {
            Command::StartScan(filter) => self.start_scan(filter),
            Command::StopScan => self.stop_scan(),
            Command::Connect(address) => self.connect(address).await,
            Command::Disconnect => {
                let requests = self.machine.disconnect();
                self.execute(requests).await;
            }
            Command::Reset => {
                if !self.machine.reset() {
                    debug!("Reset requested outside of the error state.");
                }
            }
            Command::Shutdown => {}
        }
    }

    async fn on_scan_event(&mut self, event: ScanEvent) {
        match event {
            ScanEvent::Observed {
                generation,
                advertisement,
            } => {
                let address = advertisement.address.clone();
                if self.scanner.observe(generation, advertisement) && self.config.auto_connect {
                    info!("Auto-connecting to {}", address);
                    self.connect(address).await;
                }
            }
            ScanEvent::Failed { generation, error } => {
                if self.scanner.fail(generation, error) {
                    self.machine.scan_stopped();
                }
            }
            ScanEvent::Finished { generation } | ScanEvent::TimedOut { generation } => {
                if self.scanner.finish(generation) {
                    self.machine.scan_stopped();
                }
            }
        }
    }

    async fn on_gatt_event(&mut self, event: GattEvent) {
        let transition = self.machine.handle(event);
        self.execute(transition.requests).await;

        if transition.link_lost && self.config.reconnect == ReconnectPolicy::Rescan {
            info!("Link lost, rescanning for the device.");
            let filter = self.scanner.filter().clone();
            self.start_scan(Some(filter));
        }
    }

    fn on_notification(
        &mut self,
        session: SessionId,
        characteristic: Uuid,
        value: &[u8],
        received_at: DateTime<Utc>,
    ) {
        if !self.machine.accepts_notifications(session) {
            debug!("Dropping notification from stale session {}", session);
            return;
        }
        self.notification_handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .handle_notification(characteristic, value, received_at);
    }

    fn start_scan(&mut self, filter: Option<ScanFilter>) {
        let Some(ticket) = self.scanner.start(filter) else {
            return;
        };
        self.machine.scan_started();

        let poster = self.poster.clone();
        let scan_timeout = self.config.scan_timeout_secs.map(Duration::from_secs);
        tokio::spawn(run_scan_task(
            self.backend.clone(),
            ticket,
            scan_timeout,
            move |event| {
                poster.post(Input::Scan(event));
            },
        ));
    }

    fn stop_scan(&mut self) {
        if self.scanner.stop() {
            self.machine.scan_stopped();
        }
    }

    async fn connect(&mut self, address: String) {
        // A refused connect leaves the scan and its results alone.
        let requests = match self.machine.connect(&address) {
            Ok(requests) => requests,
            Err(e) => {
                warn!("Connect to {} rejected: {}", address, e);
                return;
            }
        };

        self.stop_scan();
        self.scanner.clear_devices();
        self.notification_handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reset_session();
        self.execute(requests).await;
    }

    async fn execute(&mut self, requests: Vec<GattRequest>) {
        for request in requests {
            match request {
                GattRequest::Release { session, address } => self.release(session, address),
                GattRequest::Connect { session, address } => {
                    self.settle_release().await;
                    self.spawn_connect(session, address)
                }
                GattRequest::DiscoverServices { session, address } => {
                    self.spawn_discovery(session, address)
                }
                GattRequest::EnableNotifications {
                    session,
                    address,
                    service,
                    characteristic,
                } => self.spawn_subscription(session, address, service, characteristic),
            }
        }
    }

    /// Cancels the session's tasks and closes its handle in the background.
    ///
    /// The state change is already visible; [`Self::settle_release`] orders
    /// the close ahead of the next connect.
    fn release(&mut self, session: SessionId, address: String) {
        if let Some(token) = self.session_token.take() {
            token.cancel();
        }

        let previous = self.pending_release.take();
        let backend = self.backend.clone();
        self.pending_release = Some(tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            let limit = Duration::from_secs(BLUETOOTH_OPERATION_TIMEOUT_SECS);
            match timeout(limit, backend.disconnect(&address)).await {
                Ok(Ok(())) => info!("Session {} released {}", session, address),
                Ok(Err(e)) => warn!("Failed to release {}: {}", address, e),
                Err(_) => warn!("Releasing {} timed out", address),
            }
        }));
    }

    /// Waits for an outstanding release so sessions never overlap on the backend.
    async fn settle_release(&mut self) {
        let Some(pending) = self.pending_release.take() else {
            return;
        };
        self.publish();
        if let Err(e) = pending.await {
            error!("Release task failed: {}", e);
        }
    }

    fn session_token(&mut self) -> CancellationToken {
        self.session_token
            .get_or_insert_with(CancellationToken::new)
            .clone()
    }

    fn spawn_connect(&mut self, session: SessionId, address: String) {
        let token = CancellationToken::new();
        self.session_token = Some(token.clone());

        if let Some(secs) = self.config.connect_timeout_secs {
            let poster = self.poster.clone();
            let token = token.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(Duration::from_secs(secs)) => {
                        poster.post(Input::Gatt(GattEvent::ConnectTimedOut { session }));
                    }
                }
            });
        }

        let backend = self.backend.clone();
        let poster = self.poster.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = token.cancelled() => return,
                result = backend.connect(&address) => result,
            };
            let linked = result.is_ok();
            poster.post(Input::Gatt(GattEvent::LinkUp { session, result }));
            if !linked {
                return;
            }

            tokio::select! {
                _ = token.cancelled() => {}
                reason = backend.wait_for_link_down(&address) => {
                    poster.post(Input::Gatt(GattEvent::LinkDown { session, reason }));
                }
            }
        });
    }

    fn spawn_discovery(&mut self, session: SessionId, address: String) {
        let token = self.session_token();
        let backend = self.backend.clone();
        let poster = self.poster.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                result = backend.discover_services(&address) => {
                    poster.post(Input::Gatt(GattEvent::ServicesDiscovered { session, result }));
                }
            }
        });
    }

    /// Enables notifications and forwards them, in order, until the session ends.
    fn spawn_subscription(
        &mut self,
        session: SessionId,
        address: String,
        service: Uuid,
        characteristic: Uuid,
    ) {
        let token = self.session_token();
        let backend = self.backend.clone();
        let poster = self.poster.clone();
        tokio::spawn(async move {
            let subscribed = tokio::select! {
                _ = token.cancelled() => return,
                result = backend.subscribe(&address, service, characteristic) => result,
            };
            let mut stream = match subscribed {
                Ok(stream) => stream,
                Err(failure) => {
                    poster.post(Input::Gatt(GattEvent::NotificationsEnabled {
                        session,
                        result: Err(failure),
                    }));
                    return;
                }
            };
            if !poster.post(Input::Gatt(GattEvent::NotificationsEnabled {
                session,
                result: Ok(()),
            })) {
                return;
            }

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    item = stream.next() => match item {
                        Some(Ok(value)) => {
                            let notification = Input::Notification {
                                session,
                                characteristic,
                                value,
                                received_at: Utc::now(),
                            };
                            if !poster.post(notification) {
                                break;
                            }
                        }
                        Some(Err(failure)) => {
                            error!("Notification stream error: {}", failure);
                            poster.post(Input::Gatt(GattEvent::LinkDown {
                                session,
                                reason: Some(failure),
                            }));
                            break;
                        }
                        None => {
                            info!("Notification stream for session {} ended.", session);
                            poster.post(Input::Gatt(GattEvent::LinkDown {
                                session,
                                reason: None,
                            }));
                            break;
                        }
                    },
                }
            }
        });
    }

    fn publish(&self) {
        let state = self.machine.state();
        self.state_tx.send_if_modified(|current| {
            if current != state {
                *current = state.clone();
                true
            } else {
                false
            }
        });

        let scan_state = self.scanner.state();
        self.scan_state_tx.send_if_modified(|current| {
            if current != scan_state {
                *current = scan_state.clone();
                true
            } else {
                false
            }
        });

        let devices = self.scanner.devices();
        self.devices_tx.send_if_modified(|current| {
            if current.as_slice() != devices {
                *current = devices.to_vec();
                true
            } else {
                false
            }
        });
    }
}
