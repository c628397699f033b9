//! Car tuning scales
//!
//! Speed, brake and fuel are shown as ten steps but stored as 4-bit levels
//! on the Control Unit. The device curve is not linear.

use serde::{Deserialize, Serialize};

/// Tunable car property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tuning {
    Speed,
    Brake,
    Fuel,
}

/// Highest step of the user scale
pub const MAX_STEP: u8 = 10;

// device level for each step 0..=10
const SPEED_LEVELS: [u8; 11] = [0, 1, 2, 3, 5, 6, 7, 9, 11, 13, 15];
const BRAKE_LEVELS: [u8; 11] = [0, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15];
const FUEL_LEVELS: [u8; 11] = [0, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12];

// step for each device level 0..=15
const SPEED_STEPS: [u8; 16] = [1, 1, 2, 3, 3, 4, 5, 6, 6, 7, 7, 8, 8, 9, 9, 10];
const BRAKE_STEPS: [u8; 16] = [1, 1, 1, 1, 1, 1, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10];
const FUEL_STEPS: [u8; 16] = [1, 1, 1, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 10, 10, 10];

impl Tuning {
    /// Device level for a step, `None` above [`MAX_STEP`]
    pub fn to_level(self, step: u8) -> Option<u8> {
        let levels = match self {
            Tuning::Speed => &SPEED_LEVELS,
            Tuning::Brake => &BRAKE_LEVELS,
            Tuning::Fuel => &FUEL_LEVELS,
        };
        levels.get(usize::from(step)).copied()
    }

    /// Step shown for a device level, `None` above 15
    pub fn to_step(self, level: u8) -> Option<u8> {
        let steps = match self {
            Tuning::Speed => &SPEED_STEPS,
            Tuning::Brake => &BRAKE_STEPS,
            Tuning::Fuel => &FUEL_STEPS,
        };
        steps.get(usize::from(level)).copied()
    }
}
