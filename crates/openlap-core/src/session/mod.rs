//! Race session engine
//!
//! A [`Session`] consumes the Control Unit's timer, fuel, pit and start
//! streams and turns them into per-car [`Entry`] state, a live ranking and
//! [`RaceEvent`]s. It is a plain single-threaded state machine: every input
//! is a method call, and every command for the track goes through
//! [`TrackControl`]. [`SessionRunner`] wires it to a live driver.

mod clock;
mod entry;
mod events;
mod mask;
mod ranking;
mod runner;

pub use clock::ClockReconciler;
pub use entry::{Entry, TickOutcome};
pub use events::{RaceEvent, RaceEventKind};
pub use mask::CarMask;
pub use ranking::{race_compare, rank, time_compare};
pub use runner::{SessionHandle, SessionRunner};

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{RaceOptions, SessionType};
use crate::driver::{ConnectionState, ControlUnit};
use crate::protocol::{is_false_start, TimerTick, NUM_CARS};

/// Interval of the time-limit countdown in milliseconds
pub const TIMER_INTERVAL_MS: u64 = 500;

/// Overall bests tracked for events: lap plus three sectors
const TRACKED_BESTS: usize = 4;

/// Laps a car must have completed before its bests are announced
const ANNOUNCE_BESTS_AFTER: u32 = 3;

/// Commands a session sends to the track
pub trait TrackControl {
    fn set_mask(&self, mask: u8);
    fn clear_position(&self);
    fn reset(&self);
    fn set_lap(&self, lap: u32);
    fn set_finished(&self, car: u8);
}

impl TrackControl for ControlUnit {
    fn set_mask(&self, mask: u8) {
        ControlUnit::set_mask(self, mask);
    }

    fn clear_position(&self) {
        ControlUnit::clear_position(self);
    }

    fn reset(&self) {
        ControlUnit::reset(self);
    }

    fn set_lap(&self, lap: u32) {
        ControlUnit::set_lap(self, lap);
    }

    fn set_finished(&self, car: u8) {
        ControlUnit::set_finished(self, car);
    }
}

impl<T: TrackControl + ?Sized> TrackControl for Arc<T> {
    fn set_mask(&self, mask: u8) {
        (**self).set_mask(mask);
    }

    fn clear_position(&self) {
        (**self).clear_position();
    }

    fn reset(&self) {
        (**self).reset();
    }

    fn set_lap(&self, lap: u32) {
        (**self).set_lap(lap);
    }

    fn set_finished(&self, car: u8) {
        (**self).set_finished(car);
    }
}

/// Published view of a session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub mode: SessionType,
    pub ranking: Vec<Entry>,
    pub current_lap: u32,
    /// Lap limit, 0 for none
    pub total_laps: u32,
    pub remaining_time: Option<u64>,
    pub started: bool,
    pub finished: bool,
    pub yellow_flag: bool,
    /// Mask currently applied at the track
    pub mask: CarMask,
}

/// Whether the commands sent at construction reached the unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrackSetup {
    /// No connection state reported yet
    Unconfirmed,
    /// The unit was offline, so the commands were dropped
    Missed,
    Done,
}

/// One racing session
pub struct Session<C: TrackControl> {
    control: C,
    options: RaceOptions,
    /// Mask without the yellow-flag override
    mask: CarMask,
    yellow_flag: bool,
    /// Cars seen or seeded in this session
    active: u8,
    clock: ClockReconciler,
    entries: BTreeMap<u8, Entry>,
    started: bool,
    stopped: bool,
    finished: bool,
    current_lap: u32,
    remaining: Option<u64>,
    // latest values from the unit
    fuel: Option<[u8; NUM_CARS]>,
    pit: u8,
    start: u8,
    connected: bool,
    setup: TrackSetup,
    bests: [Option<u64>; TRACKED_BESTS],
    leader: Option<u8>,
    events: Vec<RaceEvent>,
}

impl<C: TrackControl> Session<C> {
    /// Create a session and reset the track for it.
    ///
    /// Practice sessions start timing immediately; other modes wait for
    /// [`Session::start`]. If the first state reported through
    /// [`Session::on_state`] is not `Connected`, the track is set up again
    /// once the unit connects.
    pub fn new(control: C, options: RaceOptions) -> Self {
        let mask = CarMask::from_options(&options);
        let mut entries = BTreeMap::new();
        let mut active = 0u8;
        if options.drivers.is_some_and(|d| d > 0) {
            // show a partial grid before anyone crossed the line
            for car in mask.enabled_cars() {
                entries.insert(car, Entry::new(car));
                active |= 1 << car;
            }
        }

        info!(
            mode = ?options.mode,
            laps = options.laps,
            time_ms = options.time,
            mask = %mask,
            "Starting session"
        );
        control.set_mask(mask.bits());
        Self::prepare_track(&control);

        let remaining = (options.time > 0).then_some(options.time);
        let started = options.mode == SessionType::Practice;
        Self {
            control,
            options,
            mask,
            yellow_flag: false,
            active,
            clock: ClockReconciler::new(),
            entries,
            started,
            stopped: false,
            finished: false,
            current_lap: 0,
            remaining,
            fuel: None,
            pit: 0,
            start: 0,
            connected: false,
            setup: TrackSetup::Unconfirmed,
            bests: [None; TRACKED_BESTS],
            leader: None,
            events: Vec::new(),
        }
    }

    pub fn options(&self) -> &RaceOptions {
        &self.options
    }

    pub fn control(&self) -> &C {
        &self.control
    }

    /// Begin timing once the start lights went out
    pub fn start(&mut self) {
        if !self.started {
            info!(mode = ?self.options.mode, "Session started");
            self.started = true;
        }
    }

    /// Stop the session; every car finishes when it next crosses the line
    pub fn stop(&mut self) {
        info!(mode = ?self.options.mode, "Session stopped");
        self.stopped = true;
        self.finish(None);
    }

    /// Disable every car at the track, or restore the mask from before
    pub fn toggle_yellow_flag(&mut self) {
        self.yellow_flag = !self.yellow_flag;
        let kind = if self.yellow_flag {
            RaceEventKind::YellowFlag
        } else {
            RaceEventKind::GreenFlag
        };
        info!(yellow_flag = self.yellow_flag, "Yellow flag toggled");
        self.push_mask();
        self.emit(RaceEvent::new(kind));
    }

    /// Count down the time limit by one interval.
    ///
    /// Returns the remaining time, or `None` for sessions without a limit.
    pub fn tick(&mut self) -> Option<u64> {
        let remaining = self.remaining?;
        let running = !self.options.pause || (self.start == 0 && self.connected);
        if !self.started || !running {
            return Some(remaining);
        }
        let remaining = remaining.saturating_sub(TIMER_INTERVAL_MS);
        self.remaining = Some(remaining);
        if remaining == 0 && !self.stopped {
            info!("Time limit reached");
            self.stopped = true;
            self.finish(None);
        }
        Some(remaining)
    }

    /// Apply a sensor crossing. `now_ms` is a monotonic wall-clock reading.
    pub fn on_timer(&mut self, tick: TimerTick, now_ms: u64) {
        if self.mask.is_disabled(tick.car) {
            debug!(car = tick.car, "Ignoring timer event of disabled car");
            return;
        }
        let time = self.clock.reconcile(tick.time, now_ms);
        let car = tick.car;
        self.active |= 1 << car;

        let in_pit = self.in_pit(car);
        let fuel = self.fuel.map(|fuel| fuel[usize::from(car)]);
        let previous = self.entries.get(&car).cloned();
        let entry = self.entries.entry(car).or_insert_with(|| {
            let mut entry = Entry::new(car);
            entry.fuel = fuel;
            entry.pit = in_pit;
            entry.pits = u32::from(in_pit);
            entry
        });

        let outcome = entry.apply_tick(time, tick.sensor, self.options.min_lap_time);
        let laps = entry.laps;
        let was_finished = entry.finished;
        match outcome {
            TickOutcome::Rejected if previous.is_some() => return,
            TickOutcome::Lap if !was_finished && self.is_finished(laps) => {
                if let Some(entry) = self.entries.get_mut(&car) {
                    entry.finished = true;
                }
                info!(car, laps, "Car finished");
                self.finish(Some(car));
            }
            _ => {}
        }
        self.entry_changed(car, previous);
    }

    /// Fuel levels from a status frame
    pub fn on_fuel(&mut self, fuel: [u8; NUM_CARS]) {
        if self.fuel == Some(fuel) {
            return;
        }
        self.fuel = Some(fuel);
        let cars: Vec<u8> = self.entries.keys().copied().collect();
        for car in cars {
            let level = fuel[usize::from(car)];
            let Some(entry) = self.entries.get_mut(&car) else {
                continue;
            };
            if entry.fuel != Some(level) {
                let previous = entry.clone();
                entry.fuel = Some(level);
                self.entry_changed(car, Some(previous));
            }
        }
    }

    /// Pit lane bitmap from a status frame
    pub fn on_pit(&mut self, pit: u8) {
        if self.pit == pit {
            return;
        }
        self.pit = pit;
        let cars: Vec<u8> = self.entries.keys().copied().collect();
        for car in cars {
            let in_pit = self.in_pit(car);
            let Some(entry) = self.entries.get_mut(&car) else {
                continue;
            };
            if entry.pit != in_pit {
                let previous = entry.clone();
                entry.pit = in_pit;
                if in_pit {
                    entry.pits += 1;
                }
                self.entry_changed(car, Some(previous));
            }
        }
    }

    /// Start light code
    pub fn on_start(&mut self, start: u8) {
        if self.start == start {
            return;
        }
        self.start = start;
        if start != 0 {
            self.push_mask();
        }
        if is_false_start(start) {
            info!("False start");
            self.emit(RaceEvent::new(RaceEventKind::FalseStart));
        }
    }

    /// Driver connection state
    pub fn on_state(&mut self, state: ConnectionState) {
        self.connected = state == ConnectionState::Connected;
        if !self.connected {
            if self.setup == TrackSetup::Unconfirmed {
                self.setup = TrackSetup::Missed;
            }
            return;
        }
        self.push_mask();
        if self.setup == TrackSetup::Missed {
            info!("Setting up track after connect");
            Self::prepare_track(&self.control);
            if self.current_lap != 0 {
                self.control.set_lap(self.current_lap);
            }
        }
        self.setup = TrackSetup::Done;
    }

    /// Entries ordered by the session's ranking rule
    pub fn ranking(&self) -> Vec<Entry> {
        rank(self.entries.values(), self.options.mode)
    }

    pub fn entry(&self, car: u8) -> Option<&Entry> {
        self.entries.get(&car)
    }

    pub fn current_lap(&self) -> u32 {
        self.current_lap
    }

    pub fn started(&self) -> bool {
        self.started
    }

    pub fn stopped(&self) -> bool {
        self.stopped
    }

    pub fn finished(&self) -> bool {
        self.finished
    }

    pub fn yellow_flag(&self) -> bool {
        self.yellow_flag
    }

    pub fn remaining_time(&self) -> Option<u64> {
        self.remaining
    }

    /// Mask currently applied at the track
    pub fn mask(&self) -> CarMask {
        if self.yellow_flag {
            CarMask::ALL
        } else {
            self.mask
        }
    }

    /// Drain events raised since the last call
    pub fn take_events(&mut self) -> Vec<RaceEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            mode: self.options.mode,
            ranking: self.ranking(),
            current_lap: self.current_lap,
            total_laps: self.options.laps,
            remaining_time: self.remaining,
            started: self.started,
            finished: self.finished,
            yellow_flag: self.yellow_flag,
            mask: self.mask(),
        }
    }

    fn prepare_track(control: &C) {
        control.clear_position();
        control.reset();
        control.set_lap(0);
    }

    fn in_pit(&self, car: u8) -> bool {
        self.pit & !self.mask.bits() & (1 << car) != 0
    }

    fn is_finished(&self, laps: u32) -> bool {
        self.stopped
            || (self.options.laps > 0 && laps >= self.options.laps)
            || (!self.options.slotmode && self.finished)
    }

    fn push_mask(&self) {
        let mask = self.mask();
        debug!(mask = %mask, "Pushing car mask");
        self.control.set_mask(mask.bits());
    }

    /// Disable cars that never showed up and, if given, the finishing car
    fn finish(&mut self, car: Option<u8>) {
        let before = self.mask;
        self.mask.disable_inactive(self.active);
        if let Some(car) = car {
            self.mask.disable_car(car);
        }
        // under a yellow flag the new mask is applied when the flag clears
        if self.mask != before && !self.yellow_flag {
            self.push_mask();
        }
        if let Some(car) = car {
            self.control.set_finished(car);
        }
        if !self.finished {
            self.finished = true;
            info!(mode = ?self.options.mode, "Session finished");
            let kind = match self.options.mode {
                SessionType::Race => RaceEventKind::Finished,
                _ => RaceEventKind::EndSession,
            };
            self.emit(RaceEvent::new(kind));
        }
    }

    fn entry_changed(&mut self, car: u8, previous: Option<Entry>) {
        self.update_current_lap(car);
        if let Some(previous) = previous {
            self.entry_events(car, &previous);
        }
        self.update_leader();
    }

    fn update_current_lap(&mut self, car: u8) {
        if !self.started {
            return;
        }
        let Some(entry) = self.entries.get(&car) else {
            return;
        };
        let lap = if self.current_lap > entry.laps {
            self.current_lap
        } else if self.finished || entry.time.is_none() {
            entry.laps
        } else {
            entry.laps + 1
        };
        if lap == self.current_lap {
            return;
        }
        self.current_lap = lap;
        debug!(lap, "Current lap");
        self.control.set_lap(lap);
        if self.options.laps > 0 && lap == self.options.laps && !self.finished {
            self.emit(RaceEvent::new(RaceEventKind::FinalLap));
        }
    }

    fn entry_events(&mut self, car: u8, previous: &Entry) {
        let Some(entry) = self.entries.get(&car) else {
            return;
        };
        let mut events = Vec::new();
        for (index, best) in entry.best.iter().enumerate().take(TRACKED_BESTS) {
            let Some(best) = *best else {
                continue;
            };
            if self.bests[index].map_or(true, |overall| best < overall) {
                self.bests[index] = Some(best);
                if entry.laps >= ANNOUNCE_BESTS_AFTER {
                    let kind = match index {
                        0 => RaceEventKind::BestLap,
                        sector => RaceEventKind::BestSector(sector as u8),
                    };
                    events.push(RaceEvent::car(kind, car));
                }
            }
        }
        if !entry.finished && entry.time.is_some() {
            if let (Some(fuel), Some(before)) = (entry.fuel, previous.fuel) {
                if fuel < before {
                    events.push(RaceEvent::car(RaceEventKind::Fuel(fuel), car));
                }
            }
            if entry.pit && !previous.pit {
                events.push(RaceEvent::car(RaceEventKind::PitEnter, car));
            }
            if !entry.pit && previous.pit {
                events.push(RaceEvent::car(RaceEventKind::PitExit, car));
            }
        }
        for event in events {
            self.emit(event);
        }
    }

    fn update_leader(&mut self) {
        if self.options.mode != SessionType::Race {
            return;
        }
        let leader = self
            .entries
            .values()
            .min_by(|a, b| race_compare(a, b))
            .map(|entry| entry.id);
        if let (Some(previous), Some(current)) = (self.leader, leader) {
            if previous != current {
                self.emit(RaceEvent::car(RaceEventKind::NewLeader, current));
            }
        }
        if leader.is_some() {
            self.leader = leader;
        }
    }

    fn emit(&mut self, event: RaceEvent) {
        debug!(event = %event, "Race event");
        self.events.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        Mask(u8),
        ClearPosition,
        Reset,
        Lap(u32),
        Finished(u8),
    }

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<Call>>,
    }

    impl Recorder {
        fn take(&self) -> Vec<Call> {
            std::mem::take(&mut *self.calls.lock().unwrap())
        }

        fn record(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl TrackControl for Recorder {
        fn set_mask(&self, mask: u8) {
            self.record(Call::Mask(mask));
        }

        fn clear_position(&self) {
            self.record(Call::ClearPosition);
        }

        fn reset(&self) {
            self.record(Call::Reset);
        }

        fn set_lap(&self, lap: u32) {
            self.record(Call::Lap(lap));
        }

        fn set_finished(&self, car: u8) {
            self.record(Call::Finished(car));
        }
    }

    fn session(options: RaceOptions) -> (Session<Arc<Recorder>>, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let session = Session::new(recorder.clone(), options);
        (session, recorder)
    }

    fn race(laps: u32) -> RaceOptions {
        RaceOptions {
            laps,
            ..RaceOptions::new(SessionType::Race)
        }
    }

    fn cross(session: &mut Session<Arc<Recorder>>, car: u8, time: u32) {
        session.on_timer(
            TimerTick {
                car,
                time,
                sensor: 0,
            },
            u64::from(time),
        );
    }

    fn kinds(events: &[RaceEvent]) -> Vec<RaceEventKind> {
        events.iter().map(|e| e.kind).collect()
    }

    #[test]
    fn test_track_set_up_again_after_offline_start() {
        let (mut session, recorder) = session(race(10));
        recorder.take();

        session.on_state(ConnectionState::Connecting);
        assert_eq!(recorder.take(), vec![]);
        session.on_state(ConnectionState::Connected);
        assert_eq!(
            recorder.take(),
            vec![Call::Mask(0xc0), Call::ClearPosition, Call::Reset, Call::Lap(0)]
        );

        // later reconnects only restore the mask
        session.on_state(ConnectionState::Reconnecting);
        session.on_state(ConnectionState::Connected);
        assert_eq!(recorder.take(), vec![Call::Mask(0xc0)]);
    }

    #[test]
    fn test_connected_at_construction_keeps_setup() {
        let (mut session, recorder) = session(race(10));
        recorder.take();
        session.on_state(ConnectionState::Connected);
        assert_eq!(recorder.take(), vec![Call::Mask(0xc0)]);
    }

    #[test]
    fn test_construction_resets_track() {
        let (session, recorder) = session(race(10));
        assert_eq!(
            recorder.take(),
            vec![Call::Mask(0xc0), Call::ClearPosition, Call::Reset, Call::Lap(0)]
        );
        assert!(!session.started());
        assert!(session.ranking().is_empty());
        assert_eq!(session.remaining_time(), None);
    }

    #[test]
    fn test_partial_grid_is_seeded() {
        let (session, recorder) = session(RaceOptions {
            drivers: Some(4),
            ..race(10)
        });
        assert_eq!(recorder.take()[0], Call::Mask(0xf0));
        let ranking = session.ranking();
        assert_eq!(ranking.iter().map(|e| e.id).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
        assert!(ranking.iter().all(|e| e.time.is_none()));
    }

    #[test]
    fn test_finish_propagation() {
        let (mut session, recorder) = session(race(10));
        session.start();

        let mut ticks: Vec<(u8, u32)> = (0..=10).map(|k| (0, 1000 + k * 5000)).collect();
        ticks.extend([(1, 1500), (1, 7000), (1, 12_500)]);
        ticks.sort_by_key(|(_, time)| *time);
        for (car, time) in ticks {
            cross(&mut session, car, time);
        }

        assert!(session.finished());
        assert_eq!(session.entry(0).map(|e| e.laps), Some(10));
        // cars 0 and 1 are active, car 0 finished
        assert_eq!(session.mask().bits(), 0xfd);
        assert!(recorder.take().contains(&Call::Finished(0)));

        // the other car still completes its lap and finishes too
        cross(&mut session, 1, 60_000);
        let entry = session.entry(1).cloned().unwrap();
        assert_eq!(entry.laps, 3);
        assert!(entry.finished);
        assert_eq!(session.mask().bits(), 0xff);
        assert_eq!(session.ranking()[0].id, 0);
        assert_eq!(recorder.take(), vec![Call::Mask(0xff), Call::Finished(1)]);
        assert_eq!(
            kinds(&session.take_events())
                .into_iter()
                .filter(|k| *k == RaceEventKind::Finished)
                .count(),
            1
        );
    }

    #[test]
    fn test_slotmode_keeps_running() {
        let (mut session, _) = session(RaceOptions {
            slotmode: true,
            ..race(2)
        });
        session.start();
        cross(&mut session, 0, 1000);
        cross(&mut session, 2, 1300);
        cross(&mut session, 0, 6000);
        cross(&mut session, 0, 11_000);
        assert!(session.finished());
        cross(&mut session, 2, 12_000);
        // a car below the limit in slot mode keeps racing
        let entry = session.entry(2).cloned().unwrap();
        assert_eq!(entry.laps, 1);
        assert!(!entry.finished);
    }

    #[test]
    fn test_yellow_flag_round_trip() {
        let (mut session, recorder) = session(RaceOptions {
            drivers: Some(4),
            ..race(10)
        });
        recorder.take();
        let before = session.mask();

        session.toggle_yellow_flag();
        assert!(session.yellow_flag());
        assert_eq!(session.mask(), CarMask::ALL);
        session.toggle_yellow_flag();
        assert!(!session.yellow_flag());
        assert_eq!(session.mask(), before);

        assert_eq!(recorder.take(), vec![Call::Mask(0xff), Call::Mask(0xf0)]);
        assert_eq!(
            kinds(&session.take_events()),
            vec![RaceEventKind::YellowFlag, RaceEventKind::GreenFlag]
        );
    }

    #[test]
    fn test_finish_under_yellow_flag_applies_on_green() {
        let (mut session, recorder) = session(race(10));
        cross(&mut session, 0, 1000);
        session.toggle_yellow_flag();
        recorder.take();
        session.stop();
        assert!(!recorder.take().iter().any(|c| matches!(c, Call::Mask(_))));
        session.toggle_yellow_flag();
        // only car 0 was active
        assert_eq!(recorder.take(), vec![Call::Mask(0xfe)]);
    }

    #[test]
    fn test_disabled_cars_are_ignored() {
        let (mut session, _) = session(RaceOptions {
            drivers: Some(2),
            ..race(10)
        });
        cross(&mut session, 4, 1000);
        assert!(session.entry(4).is_none());
        cross(&mut session, 1, 1000);
        assert_eq!(session.entry(1).and_then(|e| e.time), Some(1000));
    }

    #[test]
    fn test_intermediate_sensor_shows_car() {
        let (mut session, _) = session(race(10));
        session.on_timer(
            TimerTick {
                car: 3,
                time: 800,
                sensor: 1,
            },
            800,
        );
        let entry = session.entry(3).cloned().unwrap();
        assert_eq!(entry.time, None);
        assert!(entry.times.is_empty());
    }

    #[test]
    fn test_current_lap_and_final_lap() {
        let (mut session, recorder) = session(race(3));
        cross(&mut session, 0, 1000);
        // not started yet
        assert_eq!(session.current_lap(), 0);

        session.start();
        recorder.take();
        for time in [6000, 11_000] {
            cross(&mut session, 0, time);
        }
        assert_eq!(session.current_lap(), 3);
        assert_eq!(recorder.take(), vec![Call::Lap(2), Call::Lap(3)]);
        assert_eq!(kinds(&session.take_events()), vec![RaceEventKind::FinalLap]);

        cross(&mut session, 0, 16_000);
        assert!(session.finished());
        assert_eq!(session.current_lap(), 3);
        assert_eq!(kinds(&session.take_events()), vec![RaceEventKind::Finished]);
    }

    #[test]
    fn test_best_lap_announced_after_three_laps() {
        let (mut session, _) = session(RaceOptions::new(SessionType::Practice));
        assert!(session.started());
        for time in [1000, 7000, 12_000, 18_000] {
            cross(&mut session, 0, time);
        }
        assert!(session.take_events().is_empty());

        cross(&mut session, 0, 22_500);
        assert_eq!(
            session.take_events(),
            vec![RaceEvent::car(RaceEventKind::BestLap, 0)]
        );
        assert_eq!(session.entry(0).and_then(Entry::best_lap), Some(4500));
    }

    #[test]
    fn test_fuel_and_pit_events() {
        let (mut session, _) = session(RaceOptions::new(SessionType::Practice));
        session.on_fuel([15; NUM_CARS]);
        cross(&mut session, 2, 1000);
        assert_eq!(session.entry(2).and_then(|e| e.fuel), Some(15));

        let mut fuel = [15; NUM_CARS];
        fuel[2] = 14;
        session.on_fuel(fuel);
        session.on_pit(0b100);
        session.on_pit(0);
        session.on_pit(0b100);
        assert_eq!(
            kinds(&session.take_events()),
            vec![
                RaceEventKind::Fuel(14),
                RaceEventKind::PitEnter,
                RaceEventKind::PitExit,
                RaceEventKind::PitEnter,
            ]
        );
        assert_eq!(session.entry(2).map(|e| e.pits), Some(2));
    }

    #[test]
    fn test_false_start_and_mask_repush() {
        let (mut session, recorder) = session(race(10));
        recorder.take();
        session.on_start(1);
        session.on_start(9);
        session.on_start(0);
        session.on_state(ConnectionState::Connected);
        assert_eq!(
            recorder.take(),
            vec![Call::Mask(0xc0), Call::Mask(0xc0), Call::Mask(0xc0)]
        );
        assert_eq!(kinds(&session.take_events()), vec![RaceEventKind::FalseStart]);
    }

    #[test]
    fn test_new_leader() {
        let (mut session, _) = session(race(10));
        cross(&mut session, 0, 1000);
        cross(&mut session, 1, 1100);
        assert!(session.take_events().is_empty());
        cross(&mut session, 1, 5900);
        assert_eq!(
            session.take_events(),
            vec![RaceEvent::car(RaceEventKind::NewLeader, 1)]
        );
    }

    #[test]
    fn test_time_limit() {
        let (mut session, recorder) = session(RaceOptions {
            time: 1000,
            ..RaceOptions::new(SessionType::Qualifying)
        });
        assert_eq!(session.tick(), Some(1000));

        session.start();
        assert_eq!(session.tick(), Some(500));
        assert!(!session.finished());
        assert_eq!(session.tick(), Some(0));
        assert!(session.finished());
        assert!(session.stopped());
        assert_eq!(session.tick(), Some(0));
        assert_eq!(kinds(&session.take_events()), vec![RaceEventKind::EndSession]);
        // no car was active, so everything is disabled
        assert_eq!(recorder.take().last(), Some(&Call::Mask(0xff)));
    }

    #[test]
    fn test_time_limit_pauses() {
        let (mut session, _) = session(RaceOptions {
            time: 5000,
            pause: true,
            ..RaceOptions::new(SessionType::Qualifying)
        });
        session.start();
        // not connected
        assert_eq!(session.tick(), Some(5000));
        session.on_state(ConnectionState::Connected);
        session.on_start(3);
        assert_eq!(session.tick(), Some(5000));
        session.on_start(0);
        assert_eq!(session.tick(), Some(4500));
    }

    #[test]
    fn test_no_time_limit() {
        let (mut session, _) = session(race(10));
        session.start();
        assert_eq!(session.tick(), None);
    }
}
