//! Race events
//!
//! Notable moments of a session, named the way notification settings and
//! speech output refer to them (`bestlap`, `fuel2`, `pitenter`, ...).

use serde::{Serialize, Serializer};
use std::fmt;

/// Kind of race event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RaceEventKind {
    /// New overall fastest lap
    BestLap,
    /// New overall fastest time in sector 1..=3
    BestSector(u8),
    /// Fuel dropped to the given level
    Fuel(u8),
    PitEnter,
    PitExit,
    FalseStart,
    /// The leader started the last lap
    FinalLap,
    YellowFlag,
    GreenFlag,
    NewLeader,
    /// Race finished
    Finished,
    /// Practice or qualifying ended
    EndSession,
}

impl RaceEventKind {
    pub fn name(&self) -> String {
        match self {
            RaceEventKind::BestLap => "bestlap".into(),
            RaceEventKind::BestSector(sector) => format!("bests{}", sector),
            RaceEventKind::Fuel(level) => format!("fuel{}", level),
            RaceEventKind::PitEnter => "pitenter".into(),
            RaceEventKind::PitExit => "pitexit".into(),
            RaceEventKind::FalseStart => "falsestart".into(),
            RaceEventKind::FinalLap => "finallap".into(),
            RaceEventKind::YellowFlag => "yellowflag".into(),
            RaceEventKind::GreenFlag => "greenflag".into(),
            RaceEventKind::NewLeader => "newleader".into(),
            RaceEventKind::Finished => "finished".into(),
            RaceEventKind::EndSession => "endsession".into(),
        }
    }
}

impl fmt::Display for RaceEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl Serialize for RaceEventKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name())
    }
}

/// An event, optionally about one car
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RaceEvent {
    pub kind: RaceEventKind,
    pub car: Option<u8>,
}

impl RaceEvent {
    pub fn new(kind: RaceEventKind) -> Self {
        Self { kind, car: None }
    }

    pub fn car(kind: RaceEventKind, car: u8) -> Self {
        Self {
            kind,
            car: Some(car),
        }
    }
}

impl fmt::Display for RaceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.car {
            Some(car) => write!(f, "{} (car {})", self.kind, car + 1),
            None => write!(f, "{}", self.kind),
        }
    }
}
