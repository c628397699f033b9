//! Session runner
//!
//! Runs a [`Session`] on its own task, fed by a driver's streams. The task
//! is the only writer of the session; the handle talks to it over a channel
//! and observes it through a `watch` snapshot and a `broadcast` event
//! stream. Dropping the handle cancels the task, which drops every
//! subscription it holds on the driver.

use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{RaceEvent, Session, SessionSnapshot, TIMER_INTERVAL_MS};
use crate::config::{RaceOptions, SessionType};
use crate::driver::{ConnectionState, ControlUnit};
use crate::protocol::Button;

/// Race events buffered for slow subscribers
const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy)]
enum Request {
    Start,
    Stop,
    ToggleYellowFlag,
}

/// Lights sequence for qualifying and race: press START if the lights are
/// off, then start timing when they go out
#[derive(Debug, Default)]
struct StartSequence {
    /// START was pressed or the lights were already on
    armed: bool,
    previous: u8,
}

impl StartSequence {
    /// Returns true once the session should start
    fn advance(&mut self, control_unit: &ControlUnit, start: u8, connected: bool) -> bool {
        if !connected {
            return false;
        }
        if !self.armed {
            self.armed = true;
            self.previous = start;
            if start == 0 {
                info!("Triggering start sequence");
                control_unit.trigger(Button::Start);
            }
            return false;
        }
        let go = self.previous != 0 && start == 0;
        self.previous = start;
        go
    }
}

/// Spawns sessions on a driver
pub struct SessionRunner {
    control_unit: ControlUnit,
    options: RaceOptions,
    start_sequence: bool,
}

impl SessionRunner {
    /// Runner for a session on `control_unit`. Qualifying and race run the
    /// start sequence unless disabled.
    pub fn new(control_unit: ControlUnit, options: RaceOptions) -> Self {
        let start_sequence = options.mode != SessionType::Practice;
        Self {
            control_unit,
            options,
            start_sequence,
        }
    }

    /// Leave starting to the caller
    pub fn without_start_sequence(mut self) -> Self {
        self.start_sequence = false;
        self
    }

    /// Create the session and start feeding it
    pub fn spawn(self) -> SessionHandle {
        let session = Session::new(self.control_unit.clone(), self.options.clone());
        let (snapshots, snapshot_rx) = watch::channel(session.snapshot());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (requests, request_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let task = Task {
            session,
            control_unit: self.control_unit.clone(),
            requests: request_rx,
            snapshots,
            events: events.clone(),
            sequence: self.start_sequence.then(StartSequence::default),
            origin: Instant::now(),
        };
        let handle = tokio::spawn(task.run(cancel.clone()));

        SessionHandle {
            requests,
            snapshots: snapshot_rx,
            events,
            cancel,
            task: Some(handle),
            runner: self,
        }
    }
}

struct Task {
    session: Session<ControlUnit>,
    control_unit: ControlUnit,
    requests: mpsc::UnboundedReceiver<Request>,
    snapshots: watch::Sender<SessionSnapshot>,
    events: broadcast::Sender<RaceEvent>,
    sequence: Option<StartSequence>,
    origin: Instant,
}

impl Task {
    async fn run(mut self, cancel: CancellationToken) {
        let cu = self.control_unit.clone();
        let mut timer = cu.timer();
        let mut fuel = cu.fuel();
        let mut pit = cu.pit();
        let mut start = cu.start();
        let mut state = cu.state();
        let connected = *state.borrow_and_update() == ConnectionState::Connected;
        let code = *start.borrow_and_update();
        let levels = *fuel.borrow_and_update();
        let bits = *pit.borrow_and_update();
        self.session.on_state(*state.borrow());
        // defaults before the first status line are meaningless
        if connected {
            self.session.on_start(code);
            self.session.on_fuel(levels);
            self.session.on_pit(bits);
        }
        self.advance_start(code, connected);
        self.publish();

        let period = Duration::from_millis(TIMER_INTERVAL_MS);
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let timed = self.session.remaining_time().is_some();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                request = self.requests.recv() => match request {
                    Some(Request::Start) => self.session.start(),
                    Some(Request::Stop) => self.session.stop(),
                    Some(Request::ToggleYellowFlag) => self.session.toggle_yellow_flag(),
                    None => break,
                },
                tick = timer.recv() => match tick {
                    Ok(tick) => {
                        let now = self.now_ms();
                        self.session.on_timer(tick, now);
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Session fell behind the timer stream");
                    }
                    Err(RecvError::Closed) => break,
                },
                changed = fuel.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let levels = *fuel.borrow_and_update();
                    self.session.on_fuel(levels);
                }
                changed = pit.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let bits = *pit.borrow_and_update();
                    self.session.on_pit(bits);
                }
                changed = start.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let code = *start.borrow_and_update();
                    self.session.on_start(code);
                    let connected = *state.borrow() == ConnectionState::Connected;
                    self.advance_start(code, connected);
                }
                changed = state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let current = *state.borrow_and_update();
                    self.session.on_state(current);
                    let code = *start.borrow();
                    self.advance_start(code, current == ConnectionState::Connected);
                }
                _ = ticker.tick(), if timed => {
                    self.session.tick();
                }
            }
            self.publish();
        }
        debug!(mode = ?self.session.options().mode, "Session task stopped");
    }

    fn advance_start(&mut self, code: u8, connected: bool) {
        let Some(sequence) = self.sequence.as_mut() else {
            return;
        };
        if sequence.advance(&self.control_unit, code, connected) {
            self.sequence = None;
            self.session.start();
        }
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn publish(&mut self) {
        for event in self.session.take_events() {
            if let Err(unsent) = self.events.send(event) {
                debug!(event = %unsent.0, "No race event subscribers");
            }
        }
        let snapshot = self.session.snapshot();
        self.snapshots.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        });
    }
}

/// Handle to a running session
pub struct SessionHandle {
    requests: mpsc::UnboundedSender<Request>,
    snapshots: watch::Receiver<SessionSnapshot>,
    events: broadcast::Sender<RaceEvent>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    runner: SessionRunner,
}

impl SessionHandle {
    fn request(&self, request: Request) {
        if self.requests.send(request).is_err() {
            debug!(?request, "Session task is gone");
        }
    }

    /// Begin timing
    pub fn start(&self) {
        self.request(Request::Start);
    }

    /// Stop the session
    pub fn stop(&self) {
        self.request(Request::Stop);
    }

    pub fn toggle_yellow_flag(&self) {
        self.request(Request::ToggleYellowFlag);
    }

    /// Latest snapshot
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Snapshot updates
    pub fn snapshots(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    /// Race events raised from now on
    pub fn events(&self) -> broadcast::Receiver<RaceEvent> {
        self.events.subscribe()
    }

    pub fn options(&self) -> &RaceOptions {
        &self.runner.options
    }

    /// Stop the session task and wait for it
    pub async fn shutdown(mut self) {
        self.stop_task().await;
    }

    /// Replace this session with a fresh one using the same options
    pub async fn restart(mut self) -> SessionHandle {
        self.stop_task().await;
        info!(mode = ?self.runner.options.mode, "Restarting session");
        let runner = SessionRunner {
            control_unit: self.runner.control_unit.clone(),
            options: self.runner.options.clone(),
            start_sequence: self.runner.start_sequence,
        };
        runner.spawn()
    }

    async fn stop_task(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!(error = %e, "Session task failed");
            }
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
