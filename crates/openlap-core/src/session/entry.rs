//! Per-car lap reconstruction

use serde::{Deserialize, Serialize};

/// What a timer tick did to an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Bounce, noise or a sensor before the first lap: nothing changed
    Rejected,
    /// An intermediate sensor recorded a split
    Split,
    /// The finish line was crossed and a new lap opened
    Lap,
}

/// Running state of one car
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Car index (0..=7)
    pub id: u8,
    /// Timeline time the current lap started, `None` before the first crossing
    pub time: Option<u64>,
    /// Completed laps
    pub laps: u32,
    /// Most recent lap time (index 0) and sector times (index n)
    pub last: Vec<Option<u64>>,
    /// Best lap time (index 0) and sector times (index n)
    pub best: Vec<Option<u64>>,
    /// Sensor split times per lap; `times[n][0]` is the start of lap n
    pub times: Vec<Vec<Option<u64>>>,
    /// Fuel level, once reported
    pub fuel: Option<u8>,
    /// Currently in the pit lane
    pub pit: bool,
    /// Pit lane visits
    pub pits: u32,
    /// Sector the car is currently in
    pub sector: usize,
    pub finished: bool,
}

fn set(values: &mut Vec<Option<u64>>, index: usize, value: Option<u64>) {
    if values.len() <= index {
        values.resize(index + 1, None);
    }
    values[index] = value;
}

fn get(values: &[Option<u64>], index: usize) -> Option<u64> {
    values.get(index).copied().flatten()
}

impl Entry {
    /// An entry that has not crossed any sensor yet
    pub fn new(id: u8) -> Self {
        Self {
            id,
            time: None,
            laps: 0,
            last: Vec::new(),
            best: Vec::new(),
            times: Vec::new(),
            fuel: None,
            pit: false,
            pits: 0,
            sector: 0,
            finished: false,
        }
    }

    /// Best lap time
    pub fn best_lap(&self) -> Option<u64> {
        get(&self.best, 0)
    }

    /// Most recent lap time
    pub fn last_lap(&self) -> Option<u64> {
        get(&self.last, 0)
    }

    /// Record the time of a completed lap or sector at `index`
    fn record(&mut self, index: usize, elapsed: Option<u64>) {
        set(&mut self.last, index, elapsed);
        if let Some(elapsed) = elapsed {
            let best = get(&self.best, index).map_or(elapsed, |best| best.min(elapsed));
            set(&mut self.best, index, Some(best));
        }
    }

    /// Apply a sensor crossing at `time` on the synthetic timeline.
    ///
    /// A crossing is ignored unless it is more than `min_lap_time` after the
    /// previous crossing of the same sensor in the current lap.
    pub fn apply_tick(&mut self, time: u64, sensor: u8, min_lap_time: u64) -> TickOutcome {
        let sensor = usize::from(sensor);
        let tail = self.times.last().cloned().unwrap_or_default();
        if let Some(previous) = get(&tail, sensor) {
            if time <= previous.saturating_add(min_lap_time) {
                return TickOutcome::Rejected;
            }
        }

        let outcome = if sensor == 0 {
            self.times.push(vec![Some(time)]);
            let lap = get(&tail, 0).map(|start| time - start);
            self.record(0, lap);
            if tail.len() > 1 {
                // the final sector ends at the finish line
                let index = tail.len();
                let sector = get(&tail, index - 1).map(|split| time.saturating_sub(split));
                self.record(index, sector);
            }
            TickOutcome::Lap
        } else {
            // intermediate sensors only count once a lap is running
            let Some(current) = self.times.last_mut() else {
                return TickOutcome::Rejected;
            };
            set(current, sensor, Some(time));
            let split = get(&tail, sensor - 1).map(|prev| time.saturating_sub(prev));
            self.record(sensor, split);
            TickOutcome::Split
        };

        self.refresh();
        outcome
    }

    fn refresh(&mut self) {
        self.laps = u32::try_from(self.times.len().saturating_sub(1)).unwrap_or(u32::MAX);
        let current = self.times.last();
        self.time = current.and_then(|lap| get(lap, 0));
        let in_lap = current.map_or(0, Vec::len).saturating_sub(1);
        self.sector = if in_lap != 0 {
            in_lap
        } else {
            self.times
                .len()
                .checked_sub(2)
                .map_or(0, |prev| self.times[prev].len())
        };
    }
}
