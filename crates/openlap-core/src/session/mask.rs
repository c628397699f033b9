//! Car enable mask
//!
//! One bit per controller address; a set bit disables the car at the track.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::RaceOptions;
use crate::protocol::NUM_CARS;

/// Bit mask of cars disabled at the track
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CarMask(u8);

impl CarMask {
    /// Address of the autonomous (ghost) car
    pub const AUTONOMOUS_CAR: u8 = 6;

    /// Address of the pace car
    pub const PACE_CAR: u8 = 7;

    /// Number of regular driver addresses
    pub const DRIVER_CARS: u8 = 6;

    /// Every car disabled
    pub const ALL: CarMask = CarMask(0xff);

    /// No car disabled
    pub const NONE: CarMask = CarMask(0);

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Initial mask for a session: the autonomous and pace cars unless
    /// enabled, and driver addresses beyond a partial grid
    pub fn from_options(options: &RaceOptions) -> Self {
        let mut mask = Self::NONE;
        if !options.auto {
            mask.disable_car(Self::AUTONOMOUS_CAR);
        }
        if !options.pace {
            mask.disable_car(Self::PACE_CAR);
        }
        if let Some(drivers) = options.drivers.filter(|d| *d > 0) {
            mask.disable_range(drivers, Self::DRIVER_CARS);
        }
        mask
    }

    pub fn is_disabled(self, car: u8) -> bool {
        car < 8 && self.0 & (1 << car) != 0
    }

    pub fn disable_car(&mut self, car: u8) {
        if car < 8 {
            self.0 |= 1 << car;
        }
    }

    /// Disable cars `first..last`
    pub fn disable_range(&mut self, first: u8, last: u8) {
        for car in first..last.min(8) {
            self.disable_car(car);
        }
    }

    /// Disable every car not in `active`
    pub fn disable_inactive(&mut self, active: u8) {
        self.0 |= !active;
    }

    /// Whether every car is disabled
    pub fn all_disabled(self) -> bool {
        self == Self::ALL
    }

    /// Cars not disabled, ascending
    pub fn enabled_cars(self) -> impl Iterator<Item = u8> {
        (0..NUM_CARS as u8).filter(move |car| !self.is_disabled(*car))
    }
}

impl fmt::Display for CarMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010b}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionType;
    use pretty_assertions::assert_eq;

    fn options(auto: bool, pace: bool, drivers: Option<u8>) -> RaceOptions {
        RaceOptions {
            auto,
            pace,
            drivers,
            ..RaceOptions::new(SessionType::Race)
        }
    }

    #[test]
    fn test_partial_grid() {
        let mask = CarMask::from_options(&options(false, false, Some(4)));
        assert_eq!(mask.bits(), 0b1111_0000);
        assert_eq!(mask.enabled_cars().collect::<Vec<_>>(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_auto_and_pace() {
        assert_eq!(CarMask::from_options(&options(true, true, None)), CarMask::NONE);
        assert_eq!(CarMask::from_options(&options(true, false, None)).bits(), 0x80);
        assert_eq!(CarMask::from_options(&options(false, true, None)).bits(), 0x40);
        // a full grid disables nothing extra
        assert_eq!(CarMask::from_options(&options(true, true, Some(6))), CarMask::NONE);
    }

    #[test]
    fn test_disable_inactive() {
        let mut mask = CarMask::from_bits(0b1100_0000);
        mask.disable_inactive(0b0000_0101);
        assert_eq!(mask.bits(), 0b1111_1010);
        assert!(!mask.all_disabled());
        mask.disable_car(0);
        mask.disable_car(2);
        assert!(mask.all_disabled());
    }
}
