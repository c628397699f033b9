//! Control Unit driver
//!
//! A [`ControlUnit`] owns one transport and keeps the unit busy: after every
//! received frame the next queued command (or a poll) goes out, so exactly
//! one request is in flight at any time. Decoded frames are published on
//! `watch` channels for status values and a `broadcast` channel for timer
//! events; subscribers survive reconnects.
//!
//! All link I/O happens on a single background task. The handle only
//! enqueues commands and reads published state, so it is cheap to clone.

mod error;
mod service;
pub mod tuning;

pub use error::{CommandError, ConnectionError};
pub use service::ControlUnitService;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ConnectionConfig;
use crate::peripheral::Peripheral;
use crate::protocol::{Button, Command, Frame, TimerTick, NUM_CARS};
use crate::transport::{LinkEvent, RepeatFilter, Transport, TransportError};

use self::tuning::Tuning;

/// Timer events buffered for slow subscribers
const TIMER_CHANNEL_CAPACITY: usize = 256;

/// Connection state of the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(s)
    }
}

/// Whether the start lights should blink: on a false start or penalty
/// code, or while the unit is not reachable
pub fn blink(start: u8, state: ConnectionState) -> bool {
    start >= 8 || state != ConnectionState::Connected
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn update<T: PartialEq>(tx: &watch::Sender<T>, value: T) {
    tx.send_if_modified(|current| {
        if *current != value {
            *current = value;
            true
        } else {
            false
        }
    });
}

/// Everything published by the link task
struct Shared {
    peripheral: Peripheral,
    config: ConnectionConfig,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Sender<ConnectionState>,
    start: watch::Sender<u8>,
    mode: watch::Sender<u8>,
    fuel: watch::Sender<[u8; NUM_CARS]>,
    pit: watch::Sender<u8>,
    version: watch::Sender<Option<String>>,
    last_error: watch::Sender<Option<TransportError>>,
    timer: broadcast::Sender<TimerTick>,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        if self.state.send_replace(state) != state {
            debug!(peripheral = %self.peripheral, %state, "Connection state changed");
        }
    }

    fn set_error(&self, err: TransportError) {
        self.last_error.send_replace(Some(err));
    }

    fn dispatch(&self, frame: Frame) {
        match frame {
            Frame::Status(status) => {
                update(&self.fuel, status.fuel);
                update(&self.start, status.start);
                update(&self.mode, status.mode);
                update(&self.pit, status.pit);
            }
            Frame::Timer(tick) => {
                // no subscribers is fine
                let _ = self.timer.send(tick);
            }
            Frame::Version(version) => {
                self.version.send_if_modified(|current| {
                    if current.is_none() {
                        info!(%version, "Control Unit firmware version");
                        *current = Some(version);
                        true
                    } else {
                        false
                    }
                });
            }
            Frame::Ack(cmd) => debug!(command = %char::from(cmd), "Command acknowledged"),
        }
    }
}

/// State the link task owns while running and hands back when it stops
struct Worker {
    transport: Box<dyn Transport>,
    commands: mpsc::UnboundedReceiver<Command>,
    received: RepeatFilter,
    /// The current link has confirmed liveness
    live: bool,
    /// The version query still has to go out on this link
    query_version: bool,
}

enum Exit {
    Cancelled,
    LinkLost,
    Stale,
}

impl Worker {
    /// Drive one open link until it ends
    async fn drive(
        &mut self,
        shared: &Shared,
        events: &mut mpsc::Receiver<LinkEvent>,
        cancel: &CancellationToken,
        ready: &mut Option<oneshot::Sender<()>>,
    ) -> Exit {
        self.live = false;
        self.query_version = shared.version.borrow().is_none();
        let deadline = sleep(shared.config.connection_timeout());
        tokio::pin!(deadline);

        loop {
            // the initial connect is bounded by the caller's timeout
            let armed = self.live || ready.is_none();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Exit::Cancelled,
                event = events.recv() => match event {
                    Some(LinkEvent::Connected) => {
                        self.mark_live(shared, ready);
                        self.send_next(shared).await;
                        deadline.as_mut().reset(Instant::now() + shared.config.request_timeout());
                    }
                    Some(LinkEvent::Frame(data)) => {
                        deadline.as_mut().reset(Instant::now() + shared.config.request_timeout());
                        if let Some(frame) = self.decode(&data) {
                            if matches!(frame, Frame::Status(_)) {
                                self.mark_live(shared, ready);
                            }
                            shared.dispatch(frame);
                        }
                        if self.live {
                            self.send_next(shared).await;
                        }
                    }
                    Some(LinkEvent::Error(e)) => {
                        error!(peripheral = %shared.peripheral, error = %e, "Transport error");
                        shared.set_error(e);
                    }
                    Some(LinkEvent::Disconnected) | None => return Exit::LinkLost,
                },
                _ = &mut deadline, if armed => {
                    warn!(
                        peripheral = %shared.peripheral,
                        timeout_ms = shared.config.request_timeout,
                        "No response from Control Unit"
                    );
                    return Exit::Stale;
                }
            }
        }
    }

    fn mark_live(&mut self, shared: &Shared, ready: &mut Option<oneshot::Sender<()>>) {
        if self.live {
            return;
        }
        self.live = true;
        shared.set_state(ConnectionState::Connected);
        info!(peripheral = %shared.peripheral, "Connected to Control Unit");
        if let Some(ready) = ready.take() {
            let _ = ready.send(());
        }
    }

    fn decode(&mut self, data: &Bytes) -> Option<Frame> {
        if self.received.is_new(data) {
            debug!(frame = %String::from_utf8_lossy(data), "Received frame");
        }
        match Frame::decode(data) {
            Ok(frame) => Some(frame),
            Err(e) => {
                warn!(frame = %String::from_utf8_lossy(data), error = %e, "Dropping invalid frame");
                None
            }
        }
    }

    /// Send the next request: the version query first, then queued
    /// commands, otherwise a poll
    async fn send_next(&mut self, shared: &Shared) {
        let command = if std::mem::take(&mut self.query_version) {
            Command::Version
        } else {
            self.commands.try_recv().unwrap_or(Command::Poll)
        };
        if let Err(e) = self.transport.send(&command.payload()).await {
            let err = CommandError::Write(e);
            warn!(peripheral = %shared.peripheral, ?command, error = %err, "Command failed");
        }
    }

    fn discard_queued(&mut self) {
        while self.commands.try_recv().is_ok() {}
    }

    async fn close(&mut self, shared: &Shared) {
        if let Err(e) = self.transport.close().await {
            warn!(peripheral = %shared.peripheral, error = %e, "Error closing transport");
        }
    }
}

/// Link task: drive the link, reopen it after a request timeout, hand the
/// worker back when cancelled or when the link is lost
async fn run(
    shared: Arc<Shared>,
    mut worker: Worker,
    mut events: mpsc::Receiver<LinkEvent>,
    cancel: CancellationToken,
    ready: oneshot::Sender<()>,
) -> Worker {
    let mut ready = Some(ready);
    let mut attempt = 0;
    loop {
        match worker.drive(&shared, &mut events, &cancel, &mut ready).await {
            Exit::Cancelled => {
                worker.close(&shared).await;
                shared.set_state(ConnectionState::Disconnected);
                return worker;
            }
            Exit::LinkLost => {
                warn!(peripheral = %shared.peripheral, "Connection to Control Unit lost");
                worker.close(&shared).await;
                if shared.last_error.borrow().is_none() {
                    shared.set_error(TransportError::LinkLost(shared.peripheral.name.clone()));
                }
                shared.set_state(ConnectionState::Disconnected);
                return worker;
            }
            Exit::Stale => {
                if worker.live {
                    attempt = 0;
                }
                shared.set_state(ConnectionState::Reconnecting);
                worker.close(&shared).await;
                worker.discard_queued();
                loop {
                    let delay = shared.config.reconnect_delay(attempt);
                    attempt = attempt.saturating_add(1);
                    info!(
                        peripheral = %shared.peripheral,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Reconnecting to Control Unit"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            shared.set_state(ConnectionState::Disconnected);
                            return worker;
                        }
                        _ = sleep(delay) => {}
                    }
                    match worker.transport.open().await {
                        Ok(rx) => {
                            events = rx;
                            break;
                        }
                        Err(e) => {
                            warn!(peripheral = %shared.peripheral, error = %e, "Reconnect failed");
                            shared.set_error(e);
                        }
                    }
                }
            }
        }
    }
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<Worker>,
}

struct Inner {
    shared: Arc<Shared>,
    /// Idle worker, present while no link task runs
    worker: Mutex<Option<Worker>>,
    running: Mutex<Option<Running>>,
    /// Serializes connect and disconnect
    lifecycle: tokio::sync::Mutex<()>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let running = self
            .running
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(running) = running {
            running.cancel.cancel();
        }
    }
}

/// Handle to a Control Unit
#[derive(Clone)]
pub struct ControlUnit {
    inner: Arc<Inner>,
}

impl fmt::Debug for ControlUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlUnit")
            .field("peripheral", &self.inner.shared.peripheral)
            .field("state", &*self.inner.shared.state.borrow())
            .finish()
    }
}

impl ControlUnit {
    /// Create a driver for an unopened transport
    pub fn new(transport: Box<dyn Transport>, config: ConnectionConfig) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (timer, _) = broadcast::channel(TIMER_CHANNEL_CAPACITY);
        let shared = Shared {
            peripheral: transport.peripheral().clone(),
            config,
            commands,
            state: watch::channel(ConnectionState::Disconnected).0,
            start: watch::channel(0).0,
            mode: watch::channel(0).0,
            fuel: watch::channel([0; NUM_CARS]).0,
            pit: watch::channel(0).0,
            version: watch::channel(None).0,
            last_error: watch::channel(None).0,
            timer,
        };
        let worker = Worker {
            transport,
            commands: command_rx,
            received: RepeatFilter::default(),
            live: false,
            query_version: true,
        };
        Self {
            inner: Arc::new(Inner {
                shared: Arc::new(shared),
                worker: Mutex::new(Some(worker)),
                running: Mutex::new(None),
                lifecycle: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn peripheral(&self) -> &Peripheral {
        &self.inner.shared.peripheral
    }

    /// Whether both handles drive the same device
    pub fn equals(&self, other: &ControlUnit) -> bool {
        self.peripheral().equals(other.peripheral())
    }

    /// Open the link and wait until the unit responds.
    ///
    /// Fails with [`ConnectionError::Timeout`] if neither the transport's
    /// connected signal nor a status frame arrives within the configured
    /// connection timeout.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        let _guard = self.inner.lifecycle.lock().await;
        self.start_link().await
    }

    /// Tear down the current link and establish a new one. Subscribers keep
    /// their receivers.
    pub async fn reconnect(&self) -> Result<(), ConnectionError> {
        let _guard = self.inner.lifecycle.lock().await;
        info!(peripheral = %self.peripheral(), "Reconnecting to Control Unit");
        self.stop_link().await;
        self.start_link().await
    }

    /// Close the link. Never fails; transport errors during teardown are
    /// logged.
    pub async fn disconnect(&self) {
        let _guard = self.inner.lifecycle.lock().await;
        self.stop_link().await;
        info!(peripheral = %self.peripheral(), "Disconnected from Control Unit");
    }

    async fn start_link(&self) -> Result<(), ConnectionError> {
        let finished = match lock(&self.inner.running).as_ref() {
            Some(running) if !running.handle.is_finished() => {
                return Err(ConnectionError::AlreadyConnected)
            }
            Some(_) => true,
            None => false,
        };
        if finished {
            // reclaim the worker of a link lost earlier
            self.stop_link().await;
        }

        let shared = &self.inner.shared;
        let mut worker = lock(&self.inner.worker)
            .take()
            .ok_or(ConnectionError::NoTransport)?;
        worker.discard_queued();
        shared.last_error.send_replace(None);
        shared.set_state(ConnectionState::Connecting);
        info!(peripheral = %shared.peripheral, "Connecting to Control Unit");

        let events = match worker.transport.open().await {
            Ok(events) => events,
            Err(e) => {
                error!(peripheral = %shared.peripheral, error = %e, "Failed to open transport");
                *lock(&self.inner.worker) = Some(worker);
                shared.set_error(e.clone());
                shared.set_state(ConnectionState::Disconnected);
                return Err(ConnectionError::Transport(e));
            }
        };

        let cancel = CancellationToken::new();
        let (ready_tx, ready_rx) = oneshot::channel();
        let handle = tokio::spawn(run(
            shared.clone(),
            worker,
            events,
            cancel.clone(),
            ready_tx,
        ));
        *lock(&self.inner.running) = Some(Running { cancel, handle });

        let connect_timeout = shared.config.connection_timeout();
        match timeout(connect_timeout, ready_rx).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => {
                // link task ended before the unit answered
                self.stop_link().await;
                let err = shared
                    .last_error
                    .borrow()
                    .clone()
                    .unwrap_or_else(|| TransportError::LinkLost(shared.peripheral.name.clone()));
                Err(ConnectionError::Transport(err))
            }
            Err(_) => {
                warn!(
                    peripheral = %shared.peripheral,
                    timeout_ms = shared.config.connection_timeout,
                    "Timeout connecting to Control Unit"
                );
                self.stop_link().await;
                Err(ConnectionError::Timeout(shared.config.connection_timeout))
            }
        }
    }

    async fn stop_link(&self) {
        let running = lock(&self.inner.running).take();
        if let Some(running) = running {
            running.cancel.cancel();
            match running.handle.await {
                Ok(worker) => *lock(&self.inner.worker) = Some(worker),
                Err(e) => error!(error = %e, "Control Unit link task failed"),
            }
        }
        self.inner.shared.set_state(ConnectionState::Disconnected);
    }

    /// Connection state
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.shared.state.subscribe()
    }

    /// Start light code
    pub fn start(&self) -> watch::Receiver<u8> {
        self.inner.shared.start.subscribe()
    }

    /// Track mode bitmask
    pub fn mode(&self) -> watch::Receiver<u8> {
        self.inner.shared.mode.subscribe()
    }

    /// Fuel level per car
    pub fn fuel(&self) -> watch::Receiver<[u8; NUM_CARS]> {
        self.inner.shared.fuel.subscribe()
    }

    /// Pit lane bitmap, one bit per car
    pub fn pit(&self) -> watch::Receiver<u8> {
        self.inner.shared.pit.subscribe()
    }

    /// Sensor crossings in the order received
    pub fn timer(&self) -> broadcast::Receiver<TimerTick> {
        self.inner.shared.timer.subscribe()
    }

    /// Last transport error, cleared on connect
    pub fn last_error(&self) -> watch::Receiver<Option<TransportError>> {
        self.inner.shared.last_error.subscribe()
    }

    /// Firmware version if already known
    pub fn current_version(&self) -> Option<String> {
        self.inner.shared.version.borrow().clone()
    }

    /// Wait for the firmware version. It is queried once per driver and
    /// cached.
    pub async fn version(&self) -> String {
        let mut rx = self.inner.shared.version.subscribe();
        loop {
            if let Some(version) = rx.borrow_and_update().clone() {
                return version;
            }
            if rx.changed().await.is_err() {
                // the sender lives as long as `self`
                std::future::pending::<()>().await;
            }
        }
    }

    /// Queue a command for the unit.
    ///
    /// Fails when not connected; the command is dropped in that case.
    pub fn send(&self, command: Command) -> Result<(), CommandError> {
        let shared = &self.inner.shared;
        if *shared.state.borrow() != ConnectionState::Connected {
            return Err(CommandError::NotConnected);
        }
        shared
            .commands
            .send(command)
            .map_err(|_| CommandError::NotConnected)
    }

    fn fire(&self, command: Result<Command, crate::protocol::ProtocolError>) {
        if let Err(e) = command.map_err(CommandError::from).and_then(|c| self.send(c)) {
            debug!(peripheral = %self.peripheral(), error = %e, "Command dropped");
        }
    }

    /// Disable cars at the track, one bit per car
    pub fn set_mask(&self, mask: u8) {
        self.fire(Ok(Command::SetMask(mask)));
    }

    /// Clear the position tower
    pub fn clear_position(&self) {
        self.fire(Ok(Command::clear_position()));
    }

    /// Reset the lap timer
    pub fn reset(&self) {
        self.fire(Ok(Command::Reset));
    }

    /// Set the lap shown by the position tower
    pub fn set_lap(&self, lap: u32) {
        match Command::lap(lap) {
            Ok([hi, lo]) => {
                self.fire(Ok(hi));
                self.fire(Ok(lo));
            }
            Err(e) => self.fire(Err(e)),
        }
    }

    pub fn set_speed(&self, car: u8, level: u8) {
        self.fire(Command::speed(car, level));
    }

    pub fn set_brake(&self, car: u8, level: u8) {
        self.fire(Command::brake(car, level));
    }

    pub fn set_fuel(&self, car: u8, level: u8) {
        self.fire(Command::fuel(car, level));
    }

    /// Apply a tuning step (0..=10) of the user scale
    pub fn set_tuning(&self, tuning: Tuning, car: u8, step: u8) {
        let Some(level) = tuning.to_level(step) else {
            debug!(?tuning, step, "Tuning step out of range");
            return;
        };
        match tuning {
            Tuning::Speed => self.set_speed(car, level),
            Tuning::Brake => self.set_brake(car, level),
            Tuning::Fuel => self.set_fuel(car, level),
        }
    }

    /// Mark a car as finished on the position tower
    pub fn set_finished(&self, car: u8) {
        self.fire(Command::finished(car));
    }

    /// Press a button on the unit
    pub fn trigger(&self, button: Button) {
        self.fire(Ok(Command::Trigger(button)));
    }
}
